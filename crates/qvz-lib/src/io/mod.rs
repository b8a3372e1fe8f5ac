mod fastq;

pub use fastq::{FastqReader, FastqRecord, FileReader};

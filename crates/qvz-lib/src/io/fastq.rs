use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

/// Read buffer for FASTQ input.
const READ_BUFFER_SIZE: usize = 4 * 1024 * 1024;

/// A FASTQ record with byte-oriented fields.
///
/// Only the quality line is coded; the id and sequence are kept so callers can
/// report which read was malformed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FastqRecord {
    pub id: Vec<u8>,
    pub sequence: Vec<u8>,
    pub quality: Vec<u8>,
}

/// Plain or gzip-compressed file input.
pub enum FileReader {
    Plain(BufReader<std::fs::File>),
    Gzipped(BufReader<GzDecoder<BufReader<std::fs::File>>>),
}

impl Read for FileReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            FileReader::Plain(r) => r.read(buf),
            FileReader::Gzipped(r) => r.read(buf),
        }
    }
}

impl BufRead for FileReader {
    fn fill_buf(&mut self) -> std::io::Result<&[u8]> {
        match self {
            FileReader::Plain(r) => r.fill_buf(),
            FileReader::Gzipped(r) => r.fill_buf(),
        }
    }

    fn consume(&mut self, amt: usize) {
        match self {
            FileReader::Plain(r) => r.consume(amt),
            FileReader::Gzipped(r) => r.consume(amt),
        }
    }
}

/// Streaming FASTQ parser.
pub struct FastqReader<R: BufRead> {
    reader: R,
    buffer: Vec<u8>,
    records: u64,
}

impl FastqReader<FileReader> {
    /// Open a FASTQ file, decompressing on the fly when it starts with the gzip magic.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = std::fs::File::open(path)
            .with_context(|| format!("Failed to open file: {}", path.display()))?;

        let mut buffered = BufReader::with_capacity(READ_BUFFER_SIZE, file);
        let is_gzipped = {
            let peek = buffered.fill_buf()?;
            peek.len() >= 2 && peek[0] == 0x1f && peek[1] == 0x8b
        };

        let reader = if is_gzipped {
            FileReader::Gzipped(BufReader::new(GzDecoder::new(buffered)))
        } else {
            FileReader::Plain(buffered)
        };
        Ok(Self::new(reader))
    }
}

impl<R: BufRead> FastqReader<R> {
    pub fn new(reader: R) -> Self {
        Self { reader, buffer: Vec::with_capacity(512), records: 0 }
    }

    #[inline]
    fn trim_newline(buf: &mut Vec<u8>) {
        while buf.last().is_some_and(|&b| b == b'\n' || b == b'\r') {
            buf.pop();
        }
    }

    /// Read one line into the scratch buffer; `false` at EOF.
    fn read_line(&mut self) -> Result<bool> {
        self.buffer.clear();
        let n = self.reader.read_until(b'\n', &mut self.buffer)?;
        Self::trim_newline(&mut self.buffer);
        Ok(n > 0)
    }

    /// Next record, or `None` at end of input.
    pub fn next(&mut self) -> Result<Option<FastqRecord>> {
        // Skip blank lines between records and at the end of the file.
        loop {
            if !self.read_line()? {
                return Ok(None);
            }
            if !self.buffer.is_empty() {
                break;
            }
        }
        let record_no = self.records + 1;
        if self.buffer.first() != Some(&b'@') {
            anyhow::bail!(
                "Invalid FASTQ: record {record_no} header does not start with '@': {:?}",
                String::from_utf8_lossy(&self.buffer)
            );
        }
        let id = self.buffer.clone();

        if !self.read_line()? {
            anyhow::bail!("Invalid FASTQ: unexpected EOF at sequence line of record {record_no}");
        }
        let sequence = self.buffer.clone();

        if !self.read_line()? {
            anyhow::bail!("Invalid FASTQ: unexpected EOF at '+' line of record {record_no}");
        }
        if self.buffer.first() != Some(&b'+') {
            anyhow::bail!(
                "Invalid FASTQ: expected '+' separator line, got {:?}",
                String::from_utf8_lossy(&self.buffer)
            );
        }

        if !self.read_line()? {
            anyhow::bail!("Invalid FASTQ: unexpected EOF at quality line of record {record_no}");
        }
        let quality = self.buffer.clone();

        if quality.len() != sequence.len() {
            anyhow::bail!(
                "Invalid FASTQ: sequence length ({}) != quality length ({}) for read {}",
                sequence.len(),
                quality.len(),
                String::from_utf8_lossy(&id)
            );
        }

        self.records = record_no;
        Ok(Some(FastqRecord { id, sequence, quality }))
    }

    /// Drain the reader, keeping only the quality lines.
    pub fn read_qualities(&mut self) -> Result<Vec<Vec<u8>>> {
        let mut qualities = Vec::new();
        while let Some(record) = self.next()? {
            qualities.push(record.quality);
        }
        Ok(qualities)
    }
}

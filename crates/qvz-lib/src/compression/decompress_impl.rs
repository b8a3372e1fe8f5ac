//! File-level decompression: quality archive in, one quality line per read out.

use anyhow::{Context, Result};
use std::io::Write;
use std::time::Instant;
use tracing::info;
use crate::cli::DecompressConfig;
use super::*;

pub(super) fn decompress(args: &DecompressConfig) -> Result<()> {
    let start_time = Instant::now();

    let num_threads = if args.threads == 0 {
        crate::cli::num_cpus()
    } else {
        args.threads
    };
    rayon::ThreadPoolBuilder::new()
        .num_threads(num_threads)
        .build_global()
        .ok(); // Ignore error if already initialized

    info!("Using {} threads for decompression", num_threads);
    info!("Input file: {:?}", args.input);
    info!("Output file: {:?}", args.output);

    info!("Reading compressed file...");
    let data = std::fs::read(&args.input)
        .with_context(|| format!("Failed to read archive: {:?}", args.input))?;
    let qualities = decompress_qualities(&data)?;
    info!("Decompressed {} records", qualities.len());

    let file = std::fs::File::create(&args.output)
        .with_context(|| format!("Failed to create output file: {:?}", args.output))?;
    let mut output = std::io::BufWriter::with_capacity(IO_BUFFER_SIZE, file);
    for line in &qualities {
        output.write_all(line)?;
        output.write_all(b"\n")?;
    }
    output.flush()?;

    let elapsed = start_time.elapsed();
    info!("Decompression completed in {:.2}s", elapsed.as_secs_f64());
    Ok(())
}

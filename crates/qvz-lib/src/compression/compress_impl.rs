//! File-level compression: FASTQ in, quality archive out.

use anyhow::{Context, Result};
use std::io::Write;
use std::time::Instant;
use tracing::info;
use crate::cli::{CompressConfig, RateTarget};
use crate::io::FastqReader;
use super::*;

pub(super) fn compress(args: &CompressConfig) -> Result<()> {
    let start_time = Instant::now();

    // Set up thread pool
    let num_threads = if args.threads == 0 {
        crate::cli::num_cpus()
    } else {
        args.threads
    };
    rayon::ThreadPoolBuilder::new()
        .num_threads(num_threads)
        .build_global()
        .ok(); // Ignore error if already initialized

    info!("Using {} threads for compression", num_threads);
    info!("Input file: {:?}", args.input);
    info!("Output: {:?}", args.output);
    match args.options.target {
        RateTarget::Distortion(d) => info!("Target distortion: {} ({:?})", d, args.options.distortion),
        RateTarget::EntropyRatio(r) => info!("Target entropy ratio: {} ({:?})", r, args.options.distortion),
    }

    let qualities = FastqReader::from_path(&args.input)?.read_qualities()?;
    let input_bytes: usize = qualities.iter().map(Vec::len).sum();
    info!("Read {} records in {:.2}s", qualities.len(), start_time.elapsed().as_secs_f64());

    let compressed = compress_qualities_reconstructed(&qualities, &args.options)?;
    let archive = compressed.archive;
    std::fs::write(&args.output, &archive)
        .with_context(|| format!("Failed to write output file: {:?}", args.output))?;

    if let Some(path) = &args.reconstructed {
        let file = std::fs::File::create(path)
            .with_context(|| format!("Failed to create reconstruction file: {:?}", path))?;
        let mut output = std::io::BufWriter::with_capacity(IO_BUFFER_SIZE, file);
        for line in &compressed.reconstructed {
            output.write_all(line)?;
            output.write_all(b"\n")?;
        }
        output.flush()?;
        info!("Reconstructed qualities: {:?}", path);
    }

    if input_bytes > 0 {
        info!(
            "Quality bytes: {} -> {} ({:.2}x)",
            input_bytes,
            archive.len(),
            input_bytes as f64 / archive.len() as f64
        );
    }
    info!("Compression completed in {:.2}s", start_time.elapsed().as_secs_f64());
    Ok(())
}

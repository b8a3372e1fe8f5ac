use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing::info;

use qvz_lib::cli::{
    CompressConfig, DecompressConfig, DistortionKind, QvzOptions, RateTarget, DEFAULT_ALPHABET_SIZE,
    DEFAULT_BLOCK_SIZE, DEFAULT_MAX_COLUMNS, DEFAULT_QUALITY_OFFSET,
};

#[derive(Parser)]
#[command(name = "qvz")]
#[command(author = "QVZ Contributors")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Lossy compression of FASTQ quality values", long_about = None)]
struct Cli {
    /// Log per-column codebook details
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compress the quality lines of a FASTQ file
    Compress(CompressArgs),
    /// Decompress a QVZ archive to one quality line per read
    Decompress(DecompressArgs),
}

/// Built-in distortion measures
#[derive(Clone, Copy, Debug, ValueEnum, PartialEq, Eq)]
enum CliDistortion {
    /// Squared error
    Mse,
    /// Absolute error
    Manhattan,
    /// log2(1 + absolute error)
    Lorentzian,
}

#[derive(Parser)]
struct CompressArgs {
    /// Input FASTQ file (plain or gzipped)
    #[arg(short, long, value_name = "FILE", required = true)]
    input: PathBuf,

    /// Output QVZ archive file
    #[arg(short, long, value_name = "FILE", required = true)]
    output: PathBuf,

    /// Also write the quantized quality lines (as decompression will yield them)
    #[arg(long, value_name = "FILE")]
    reconstructed: Option<PathBuf>,

    /// Number of threads (0 = auto-detect)
    #[arg(short = 't', long, default_value = "0")]
    threads: usize,

    /// Target mean distortion per symbol (0 = lossless)
    #[arg(short = 'D', long, default_value = "1.0", conflicts_with = "ratio")]
    distortion_target: f64,

    /// Target output entropy as a fraction of the input entropy
    #[arg(long, value_name = "R")]
    ratio: Option<f64>,

    /// Distortion measure
    #[arg(short, long, value_enum, default_value = "mse")]
    distortion: CliDistortion,

    /// Custom distortion table (whitespace-separated, alphabet_size x alphabet_size)
    #[arg(long, value_name = "FILE")]
    distortion_table: Option<PathBuf>,

    /// Number of read clusters, each with its own codebook
    #[arg(short = 'k', long, default_value = "1")]
    clusters: usize,

    /// Reads per independently coded block
    #[arg(long, default_value_t = DEFAULT_BLOCK_SIZE)]
    block_size: usize,

    /// Number of quality symbols
    #[arg(long, default_value_t = DEFAULT_ALPHABET_SIZE)]
    alphabet_size: usize,

    /// ASCII offset of quality characters
    #[arg(long, default_value_t = DEFAULT_QUALITY_OFFSET)]
    quality_offset: u8,

    /// Longest accepted read
    #[arg(long, default_value_t = DEFAULT_MAX_COLUMNS)]
    max_columns: usize,

    /// Seed for the quantizer-choice PRNG
    #[arg(long)]
    seed: Option<u32>,
}

#[derive(Parser)]
struct DecompressArgs {
    /// Input QVZ archive
    #[arg(short, long, value_name = "FILE", required = true)]
    input: PathBuf,

    /// Output file, one quality line per read
    #[arg(short, long, value_name = "FILE", required = true)]
    output: PathBuf,

    /// Number of threads (0 = auto-detect)
    #[arg(short = 't', long, default_value = "0")]
    threads: usize,
}

impl CompressArgs {
    fn into_config(self) -> CompressConfig {
        let distortion = match (self.distortion_table, self.distortion) {
            (Some(path), _) => DistortionKind::Custom(path),
            (None, CliDistortion::Mse) => DistortionKind::Mse,
            (None, CliDistortion::Manhattan) => DistortionKind::Manhattan,
            (None, CliDistortion::Lorentzian) => DistortionKind::Lorentzian,
        };
        let target = match self.ratio {
            Some(r) => RateTarget::EntropyRatio(r),
            None => RateTarget::Distortion(self.distortion_target),
        };

        CompressConfig {
            input: self.input,
            output: self.output,
            reconstructed: self.reconstructed,
            threads: self.threads,
            options: QvzOptions {
                distortion,
                target,
                alphabet_size: self.alphabet_size,
                quality_offset: self.quality_offset,
                max_columns: self.max_columns,
                clusters: self.clusters,
                block_size: self.block_size,
                seed: self.seed,
            },
        }
    }
}

impl DecompressArgs {
    fn into_config(self) -> DecompressConfig {
        DecompressConfig {
            input: self.input,
            output: self.output,
            threads: self.threads,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .init();

    if std::env::var("QVZ_NO_BANNER").is_err() {
        eprintln!("QVZ v{} - Lossy quality value compression", env!("CARGO_PKG_VERSION"));
        eprintln!("Compression: rate-distortion quantizers + adaptive arithmetic coding");
        eprintln!();
    }

    match cli.command {
        Commands::Compress(args) => {
            info!("Starting compression...");
            let config = args.into_config();
            qvz_lib::compression::compress(&config)?;
            info!("Compression complete!");
        }
        Commands::Decompress(args) => {
            info!("Starting decompression...");
            let config = args.into_config();
            qvz_lib::compression::decompress(&config)?;
            info!("Decompression complete!");
        }
    }

    Ok(())
}

use anyhow::Result;
use std::path::PathBuf;

/// Quality symbols per alphabet by default (Phred 0..=71).
pub const DEFAULT_ALPHABET_SIZE: usize = 72;
/// Largest supported alphabet: printable ASCII from `!` to `~`.
pub const MAX_ALPHABET_SIZE: usize = 94;
/// Standard Sanger/Illumina 1.8+ quality offset.
pub const DEFAULT_QUALITY_OFFSET: u8 = 33;
/// Most reads that may share one coded block.
pub const DEFAULT_BLOCK_SIZE: usize = 100_000;
/// Longest read the codec accepts by default.
pub const DEFAULT_MAX_COLUMNS: usize = 4096;
/// Most clusters a file may be split into (ids are coded in one byte).
pub const MAX_CLUSTERS: usize = 255;

/// Distortion measure the quantizers are optimized for.
#[derive(Clone, Debug, PartialEq)]
pub enum DistortionKind {
    /// Squared error
    Mse,
    /// Absolute error
    Manhattan,
    /// log2(1 + absolute error)
    Lorentzian,
    /// Whitespace-separated `n x n` table loaded from a file
    Custom(PathBuf),
}

/// Operating point requested from every context's quantizer pair.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum RateTarget {
    /// Mean distortion per symbol (0 = lossless)
    Distortion(f64),
    /// Output entropy as a fraction of the input entropy (1 = lossless)
    EntropyRatio(f64),
}

/// Codec parameters.
#[derive(Clone, Debug)]
pub struct QvzOptions {
    /// Distortion measure
    pub distortion: DistortionKind,
    /// Rate target
    pub target: RateTarget,
    /// Number of quality symbols (Phred 0..alphabet_size)
    pub alphabet_size: usize,
    /// ASCII offset of quality characters
    pub quality_offset: u8,
    /// Longest accepted read
    pub max_columns: usize,
    /// Number of read clusters, each with its own codebook
    pub clusters: usize,
    /// Reads per independently coded block
    pub block_size: usize,
    /// PRNG seed (None = fixed default state)
    pub seed: Option<u32>,
}

impl Default for QvzOptions {
    fn default() -> Self {
        Self {
            distortion: DistortionKind::Mse,
            target: RateTarget::Distortion(1.0),
            alphabet_size: DEFAULT_ALPHABET_SIZE,
            quality_offset: DEFAULT_QUALITY_OFFSET,
            max_columns: DEFAULT_MAX_COLUMNS,
            clusters: 1,
            block_size: DEFAULT_BLOCK_SIZE,
            seed: None,
        }
    }
}

impl QvzOptions {
    pub fn validate(&self) -> Result<()> {
        if self.alphabet_size == 0 || self.alphabet_size > MAX_ALPHABET_SIZE {
            anyhow::bail!("alphabet size must be in 1..={MAX_ALPHABET_SIZE}, got {}", self.alphabet_size);
        }
        if self.quality_offset as usize + self.alphabet_size > 256 {
            anyhow::bail!("quality offset {} leaves no room for {} symbols", self.quality_offset, self.alphabet_size);
        }
        if self.clusters == 0 || self.clusters > MAX_CLUSTERS {
            anyhow::bail!("cluster count must be in 1..={MAX_CLUSTERS}, got {}", self.clusters);
        }
        if self.block_size == 0 {
            anyhow::bail!("block size must be positive");
        }
        if self.max_columns > u16::MAX as usize {
            anyhow::bail!("max columns {} exceeds {}", self.max_columns, u16::MAX);
        }
        match self.target {
            RateTarget::Distortion(d) if !(d.is_finite() && d >= 0.0) => {
                anyhow::bail!("target distortion must be finite and non-negative, got {d}")
            }
            RateTarget::EntropyRatio(r) if !(0.0..=1.0).contains(&r) => {
                anyhow::bail!("entropy ratio must be in [0, 1], got {r}")
            }
            _ => Ok(()),
        }
    }
}

/// Configuration for compression.
#[derive(Clone)]
pub struct CompressConfig {
    /// Input FASTQ file (plain or gzipped)
    pub input: PathBuf,
    /// Output archive
    pub output: PathBuf,
    /// Optional side file receiving the quantized quality lines
    pub reconstructed: Option<PathBuf>,
    /// Number of threads (0 = auto-detect)
    pub threads: usize,
    /// Codec parameters
    pub options: QvzOptions,
}

impl Default for CompressConfig {
    fn default() -> Self {
        Self {
            input: PathBuf::new(),
            output: PathBuf::from("output.qvz"),
            reconstructed: None,
            threads: 0,
            options: QvzOptions::default(),
        }
    }
}

/// Configuration for decompression.
#[derive(Clone)]
pub struct DecompressConfig {
    /// Input archive
    pub input: PathBuf,
    /// Output file, one quality line per read
    pub output: PathBuf,
    /// Number of threads (0 = auto-detect)
    pub threads: usize,
}

impl Default for DecompressConfig {
    fn default() -> Self {
        Self {
            input: PathBuf::new(),
            output: PathBuf::from("qualities.txt"),
            threads: 0,
        }
    }
}

/// Number of CPUs available.
pub fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(8)
}

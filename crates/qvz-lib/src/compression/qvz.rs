//! Quality stream coding: one arithmetic-coded stream per block of reads.
//!
//! Per read the cluster id is coded with the cluster table, then each column
//! draws the lo/hi choice for its context, quantizes the symbol and codes the
//! quantizer's output index with the adaptive table for
//! `(cluster, column, 2 * context + side)`. The reconstructed symbol becomes the
//! next column's context. The decoder repeats the same draws in the same order.

use anyhow::Result;

use super::alphabet::Symbol;
use super::arith::{ArithmeticDecoder, ArithmeticEncoder, FrequencyTable};
use super::codebook::Codebook;
use super::distortion::DistortionMatrix;
use super::well::Well1024a;

/// Lifecycle of a stream coder. Coding is only valid while `Streaming`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoderState {
    Idle,
    Streaming,
    Finalized,
}

/// Start/end contract shared by [`QvzEncoder`] and [`QvzDecoder`].
pub trait QualityCoder {
    /// Idle -> Streaming.
    fn start(&mut self) -> Result<()>;
    /// Streaming -> Finalized.
    fn end(&mut self) -> Result<()>;
    fn state(&self) -> CoderState;

    fn ensure_streaming(&self) -> Result<()> {
        match self.state() {
            CoderState::Streaming => Ok(()),
            s => anyhow::bail!("quality coder is {s:?}, expected Streaming"),
        }
    }
}

/// Adaptive tables indexed by `[cluster][column][2 * context + side]`.
struct AdaptiveModels {
    tables: Vec<Vec<Vec<FrequencyTable>>>,
}

impl AdaptiveModels {
    fn new(codebooks: &[Codebook]) -> Self {
        let tables = codebooks
            .iter()
            .map(|cb| {
                (0..cb.columns())
                    .map(|c| {
                        cb.column(c)
                            .pairs()
                            .iter()
                            .flat_map(|p| {
                                [FrequencyTable::new(p.lo.levels()), FrequencyTable::new(p.hi.levels())]
                            })
                            .collect()
                    })
                    .collect()
            })
            .collect();
        Self { tables }
    }

    #[inline]
    fn table(&mut self, cluster: usize, column: usize, index: usize) -> &mut FrequencyTable {
        &mut self.tables[cluster][column][index]
    }
}

fn codebook_for(codebooks: &[Codebook], cluster: usize, len: usize) -> Result<&Codebook> {
    let Some(cb) = codebooks.get(cluster) else {
        anyhow::bail!("cluster {cluster} has no codebook ({} available)", codebooks.len());
    };
    if len > cb.columns() {
        anyhow::bail!("read of length {len} exceeds the {} codebook columns", cb.columns());
    }
    Ok(cb)
}

// ============================================================================
// Encoder
// ============================================================================
pub struct QvzEncoder<'a> {
    codebooks: &'a [Codebook],
    models: AdaptiveModels,
    clusters: FrequencyTable,
    well: Well1024a,
    coder: Option<ArithmeticEncoder>,
    output: Vec<u8>,
    state: CoderState,
}

impl<'a> QvzEncoder<'a> {
    /// `well` must be in the same state the decoder will start from.
    pub fn new(codebooks: &'a [Codebook], well: Well1024a) -> Self {
        Self {
            codebooks,
            models: AdaptiveModels::new(codebooks),
            clusters: FrequencyTable::new(codebooks.len()),
            well,
            coder: None,
            output: Vec::new(),
            state: CoderState::Idle,
        }
    }

    /// Code one read; returns its reconstruction.
    pub fn encode_read(&mut self, cluster: usize, read: &[Symbol]) -> Result<Vec<Symbol>> {
        self.ensure_streaming()?;
        let codebook = codebook_for(self.codebooks, cluster, read.len())?;
        if let Some(x) = read.iter().find(|&&x| x as usize >= codebook.alphabet_size()) {
            anyhow::bail!("symbol {x} outside alphabet of {}", codebook.alphabet_size());
        }
        let Some(coder) = self.coder.as_mut() else {
            anyhow::bail!("encoder has no active stream");
        };

        coder.encode(&mut self.clusters, cluster)?;
        let mut recon = Vec::with_capacity(read.len());
        let mut prev: Symbol = 0;
        for (column, &x) in read.iter().enumerate() {
            let (q, index) = codebook.choose(&mut self.well, column, prev)?;
            coder.encode(self.models.table(cluster, column, index), q.state_of(x))?;
            prev = q.apply(x);
            recon.push(prev);
        }
        Ok(recon)
    }

    /// The finished stream.
    pub fn into_bytes(self) -> Result<Vec<u8>> {
        if self.state != CoderState::Finalized {
            anyhow::bail!("encoder output requested before end()");
        }
        Ok(self.output)
    }
}

impl QualityCoder for QvzEncoder<'_> {
    fn start(&mut self) -> Result<()> {
        if self.state != CoderState::Idle {
            anyhow::bail!("encoder already started");
        }
        self.coder = Some(ArithmeticEncoder::new());
        self.state = CoderState::Streaming;
        Ok(())
    }

    fn end(&mut self) -> Result<()> {
        self.ensure_streaming()?;
        if let Some(coder) = self.coder.take() {
            self.output = coder.finish();
        }
        self.state = CoderState::Finalized;
        Ok(())
    }

    fn state(&self) -> CoderState {
        self.state
    }
}

// ============================================================================
// Decoder
// ============================================================================
pub struct QvzDecoder<'a> {
    codebooks: &'a [Codebook],
    models: AdaptiveModels,
    clusters: FrequencyTable,
    well: Well1024a,
    data: &'a [u8],
    coder: Option<ArithmeticDecoder<'a>>,
    remaining: u64,
    state: CoderState,
}

impl<'a> QvzDecoder<'a> {
    /// `total_symbols` counts every coded symbol in `data`, cluster ids
    /// included; the last one is decoded without renormalization.
    pub fn new(codebooks: &'a [Codebook], well: Well1024a, data: &'a [u8], total_symbols: u64) -> Self {
        Self {
            codebooks,
            models: AdaptiveModels::new(codebooks),
            clusters: FrequencyTable::new(codebooks.len()),
            well,
            data,
            coder: None,
            remaining: total_symbols,
            state: CoderState::Idle,
        }
    }

    fn next_symbol(
        coder: &mut ArithmeticDecoder<'a>,
        table: &mut FrequencyTable,
        remaining: &mut u64,
    ) -> Result<usize> {
        match *remaining {
            0 => anyhow::bail!("quality stream holds no more symbols"),
            1 => {
                *remaining = 0;
                coder.decode_last(table)
            }
            _ => {
                *remaining -= 1;
                coder.decode(table)
            }
        }
    }

    /// Decode one read of `len` symbols; returns `(cluster, reconstruction)`.
    pub fn decode_read(&mut self, len: usize) -> Result<(usize, Vec<Symbol>)> {
        self.ensure_streaming()?;
        let Some(coder) = self.coder.as_mut() else {
            anyhow::bail!("decoder has no active stream");
        };

        let cluster = Self::next_symbol(coder, &mut self.clusters, &mut self.remaining)?;
        let codebook = codebook_for(self.codebooks, cluster, len)?;
        let mut recon = Vec::with_capacity(len);
        let mut prev: Symbol = 0;
        for column in 0..len {
            let (q, index) = codebook.choose(&mut self.well, column, prev)?;
            let table = self.models.table(cluster, column, index);
            let state = Self::next_symbol(coder, table, &mut self.remaining)?;
            let Some(y) = q.output().get(state) else {
                anyhow::bail!("decoded index {state} outside quantizer output at column {column}");
            };
            prev = y;
            recon.push(y);
        }
        Ok((cluster, recon))
    }
}

impl QualityCoder for QvzDecoder<'_> {
    fn start(&mut self) -> Result<()> {
        if self.state != CoderState::Idle {
            anyhow::bail!("decoder already started");
        }
        self.coder = Some(ArithmeticDecoder::new(self.data));
        self.state = CoderState::Streaming;
        Ok(())
    }

    fn end(&mut self) -> Result<()> {
        self.ensure_streaming()?;
        if self.remaining != 0 {
            anyhow::bail!("quality stream ended with {} symbols left", self.remaining);
        }
        self.coder = None;
        self.state = CoderState::Finalized;
        Ok(())
    }

    fn state(&self) -> CoderState {
        self.state
    }
}

// ============================================================================
// Block helpers
// ============================================================================

/// One coded block, the reads the decoder will reconstruct from it and the
/// distortion they carry.
pub struct EncodedBlock {
    pub data: Vec<u8>,
    pub reconstructed: Vec<Vec<Symbol>>,
    pub distortion: f64,
    pub symbols: u64,
}

pub struct DecodedBlock {
    pub clusters: Vec<usize>,
    pub reads: Vec<Vec<Symbol>>,
}

/// Encode `reads` (with their cluster ids) as one stream starting from `seed`.
pub fn encode_block(
    codebooks: &[Codebook],
    seed: &Well1024a,
    reads: &[Vec<Symbol>],
    clusters: &[usize],
    dist: &DistortionMatrix,
) -> Result<EncodedBlock> {
    if reads.len() != clusters.len() {
        anyhow::bail!("{} reads but {} cluster ids", reads.len(), clusters.len());
    }
    let mut encoder = QvzEncoder::new(codebooks, seed.clone());
    encoder.start()?;
    let mut reconstructed = Vec::with_capacity(reads.len());
    let mut distortion = 0.0;
    let mut symbols = 0u64;
    for (read, &cluster) in reads.iter().zip(clusters) {
        let recon = encoder.encode_read(cluster, read)?;
        distortion += read.iter().zip(&recon).map(|(&x, &y)| dist.get(x, y)).sum::<f64>();
        symbols += read.len() as u64;
        reconstructed.push(recon);
    }
    encoder.end()?;
    Ok(EncodedBlock { data: encoder.into_bytes()?, reconstructed, distortion, symbols })
}

/// Decode a block of reads with the given lengths.
pub fn decode_block(
    codebooks: &[Codebook],
    seed: &Well1024a,
    data: &[u8],
    lengths: &[usize],
) -> Result<DecodedBlock> {
    let total = lengths.iter().map(|&l| l as u64 + 1).sum();
    let mut decoder = QvzDecoder::new(codebooks, seed.clone(), data, total);
    decoder.start()?;
    let mut clusters = Vec::with_capacity(lengths.len());
    let mut reads = Vec::with_capacity(lengths.len());
    for &len in lengths {
        let (cluster, read) = decoder.decode_read(len)?;
        clusters.push(cluster);
        reads.push(read);
    }
    decoder.end()?;
    Ok(DecodedBlock { clusters, reads })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::RateTarget;
    use crate::compression::codebook::build;
    use crate::compression::pmf::QualityStats;

    fn reads(n: u32, len: u32) -> Vec<Vec<Symbol>> {
        (0..n)
            .map(|i| {
                (0..len)
                    .map(|j| {
                        let base = 30u32.saturating_sub(j / 4);
                        (base - ((i * 31 + j * 17) % 7)) as Symbol
                    })
                    .collect()
            })
            .collect()
    }

    fn codebooks(data: &[Vec<Symbol>], target: f64) -> Vec<Codebook> {
        let stats = QualityStats::from_reads(data, 41, 20);
        vec![build(&stats, &DistortionMatrix::mse(41), RateTarget::Distortion(target), 20).unwrap()]
    }

    fn roundtrip(target: f64) {
        let data = reads(300, 20);
        let cbs = codebooks(&data, target);
        let dist = DistortionMatrix::mse(41);
        let seed = Well1024a::from_seed(9);
        let ids = vec![0; data.len()];

        let mut encoder = QvzEncoder::new(&cbs, seed.clone());
        encoder.start().unwrap();
        let expected: Vec<Vec<Symbol>> = data.iter().map(|r| encoder.encode_read(0, r).unwrap()).collect();
        encoder.end().unwrap();
        let bytes = encoder.into_bytes().unwrap();

        let lengths: Vec<usize> = data.iter().map(|r| r.len()).collect();
        let decoded = decode_block(&cbs, &seed, &bytes, &lengths).unwrap();
        for (i, (a, b)) in expected.iter().zip(&decoded.reads).enumerate() {
            assert_eq!(a, b, "read {i} mismatch");
        }
        assert!(decoded.clusters.iter().all(|&c| c == 0));

        let block = encode_block(&cbs, &seed, &data, &ids, &dist).unwrap();
        assert_eq!(block.data, bytes);
        assert_eq!(block.symbols, 300 * 20);
        if target == 0.0 {
            assert_eq!(block.distortion, 0.0);
            assert_eq!(decoded.reads, data);
        } else {
            assert!(block.distortion / block.symbols as f64 <= target + 0.5);
        }
    }

    #[test]
    fn test_roundtrip_lossless() {
        roundtrip(0.0);
    }

    #[test]
    fn test_roundtrip_lossy() {
        roundtrip(1.0);
        roundtrip(4.0);
    }

    #[test]
    fn test_variable_lengths_and_empty_reads() {
        let mut data = reads(50, 20);
        data[3].truncate(5);
        data[10].clear();
        data[49].clear();
        let cbs = codebooks(&data, 2.0);
        let seed = Well1024a::default();
        let ids = vec![0; data.len()];
        let block = encode_block(&cbs, &seed, &data, &ids, &DistortionMatrix::mse(41)).unwrap();
        let lengths: Vec<usize> = data.iter().map(|r| r.len()).collect();
        let decoded = decode_block(&cbs, &seed, &block.data, &lengths).unwrap();
        assert_eq!(decoded.reads[10].len(), 0);
        assert_eq!(decoded.reads[3].len(), 5);
    }

    #[test]
    fn test_cluster_table_roundtrip() {
        let mut x: u32 = 7;
        let ids: Vec<usize> = (0..10_000)
            .map(|_| {
                x = x.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
                (x >> 30) as usize
            })
            .collect();

        let mut enc = ArithmeticEncoder::new();
        let mut table = FrequencyTable::new(4);
        for &id in &ids {
            enc.encode(&mut table, id).unwrap();
        }
        let bytes = enc.finish();

        let mut dec = ArithmeticDecoder::new(&bytes);
        let mut table = FrequencyTable::new(4);
        for (i, &id) in ids.iter().enumerate() {
            let got = if i + 1 == ids.len() {
                dec.decode_last(&mut table).unwrap()
            } else {
                dec.decode(&mut table).unwrap()
            };
            assert_eq!(got, id, "cluster id {i} mismatch");
        }
    }

    #[test]
    fn test_multiple_clusters() {
        let data = reads(200, 12);
        let low: Vec<Vec<Symbol>> = data.iter().map(|r| r.iter().map(|&s| s / 3).collect()).collect();
        let stats_a = QualityStats::from_reads(&data, 41, 20);
        let stats_b = QualityStats::from_reads(&low, 41, 20);
        let dist = DistortionMatrix::mse(41);
        let cbs = vec![
            build(&stats_a, &dist, RateTarget::Distortion(0.0), 20).unwrap(),
            build(&stats_b, &dist, RateTarget::Distortion(0.0), 20).unwrap(),
        ];
        let mut all = Vec::new();
        let mut ids = Vec::new();
        for (a, b) in data.iter().zip(&low) {
            all.push(a.clone());
            ids.push(0);
            all.push(b.clone());
            ids.push(1);
        }
        let seed = Well1024a::from_seed(3);
        let block = encode_block(&cbs, &seed, &all, &ids, &dist).unwrap();
        let lengths: Vec<usize> = all.iter().map(|r| r.len()).collect();
        let decoded = decode_block(&cbs, &seed, &block.data, &lengths).unwrap();
        assert_eq!(decoded.clusters, ids);
        assert_eq!(decoded.reads, all);
    }

    #[test]
    fn test_lifecycle_enforced() {
        let data = reads(5, 20);
        let cbs = codebooks(&data, 1.0);
        let mut encoder = QvzEncoder::new(&cbs, Well1024a::default());
        assert_eq!(encoder.state(), CoderState::Idle);
        assert!(encoder.encode_read(0, &data[0]).is_err());
        encoder.start().unwrap();
        assert!(encoder.start().is_err());
        encoder.encode_read(0, &data[0]).unwrap();
        encoder.end().unwrap();
        assert_eq!(encoder.state(), CoderState::Finalized);
        assert!(encoder.encode_read(0, &data[1]).is_err());
        assert!(encoder.end().is_err());
    }

    #[test]
    fn test_decoder_rejects_leftover_symbols() {
        let data = reads(5, 20);
        let cbs = codebooks(&data, 1.0);
        let seed = Well1024a::default();
        let block = encode_block(&cbs, &seed, &data, &[0; 5], &DistortionMatrix::mse(41)).unwrap();
        let mut decoder = QvzDecoder::new(&cbs, seed, &block.data, 5 * 21);
        decoder.start().unwrap();
        decoder.decode_read(20).unwrap();
        assert!(decoder.end().is_err());
    }

    #[test]
    fn test_bad_inputs_rejected() {
        let data = reads(5, 20);
        let cbs = codebooks(&data, 1.0);
        let mut encoder = QvzEncoder::new(&cbs, Well1024a::default());
        encoder.start().unwrap();
        assert!(encoder.encode_read(1, &data[0]).is_err());
        assert!(encoder.encode_read(0, &[50]).is_err());
        assert!(encoder.encode_read(0, &[1; 21]).is_err());
    }
}

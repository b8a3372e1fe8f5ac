pub mod alphabet;
pub mod arith;
pub mod bitstream;
pub mod cluster;
pub mod codebook;
pub mod codebook_format;
pub mod distortion;
pub mod pmf;
pub mod quantizer;
pub mod qvz;
pub mod well;
mod compress_impl;
mod decompress_impl;

use crate::cli::{CompressConfig, DecompressConfig, QvzOptions};
use anyhow::{Context, Result};
use rayon::prelude::*;
use tracing::{debug, info};

use alphabet::Symbol;
use codebook::Codebook;
use distortion::DistortionMatrix;
use pmf::QualityStats;
use well::Well1024a;

/// QVZ archive magic bytes (file identification)
const ARCHIVE_MAGIC: [u8; 2] = *b"QV";
/// Current archive format version
const ARCHIVE_VERSION: u8 = 1;
/// magic(2) + version(1) + reserved(1) + alphabet_size(1) + quality_offset(1)
/// + columns(2) + clusters(1)
const HEADER_SIZE: usize = 9;
/// Buffer size for output writers (8 MB)
const IO_BUFFER_SIZE: usize = 8 * 1024 * 1024;

/// Read a little-endian u16 from `data` at `offset`, returning an error on truncation.
pub(crate) fn read_le_u16(data: &[u8], offset: usize) -> Result<u16> {
    data.get(offset..offset + 2)
        .and_then(|s| <[u8; 2]>::try_from(s).ok())
        .map(u16::from_le_bytes)
        .ok_or_else(|| anyhow::anyhow!("truncated archive at offset {offset}"))
}

/// Read a little-endian u32 from `data` at `offset`, returning an error on truncation.
pub(crate) fn read_le_u32(data: &[u8], offset: usize) -> Result<u32> {
    data.get(offset..offset + 4)
        .and_then(|s| <[u8; 4]>::try_from(s).ok())
        .map(u32::from_le_bytes)
        .ok_or_else(|| anyhow::anyhow!("truncated archive at offset {offset}"))
}

/// Read a little-endian u64 from `data` at `offset`, returning an error on truncation.
pub(crate) fn read_le_u64(data: &[u8], offset: usize) -> Result<u64> {
    data.get(offset..offset + 8)
        .and_then(|s| <[u8; 8]>::try_from(s).ok())
        .map(u64::from_le_bytes)
        .ok_or_else(|| anyhow::anyhow!("truncated archive at offset {offset}"))
}

/// Write variable-length integer
pub(crate) fn write_varint<W: std::io::Write>(writer: &mut W, mut value: usize) -> std::io::Result<()> {
    while value >= 0x80 {
        writer.write_all(&[((value & 0x7F) | 0x80) as u8])?;
        value >>= 7;
    }
    writer.write_all(&[value as u8])
}

/// Maximum varint size in bytes (10 bytes = up to 70 bits, enough for usize on 64-bit)
const MAX_VARINT_BYTES: usize = 10;

/// Read variable-length integer
pub(crate) fn read_varint(data: &[u8], offset: &mut usize) -> Option<usize> {
    let mut value = 0usize;
    let mut shift = 0;
    for _ in 0..MAX_VARINT_BYTES {
        let byte = *data.get(*offset)?;
        *offset += 1;
        value |= ((byte & 0x7F) as usize).checked_shl(shift)?;
        if byte & 0x80 == 0 {
            return Some(value);
        }
        shift += 7;
    }
    None
}

/// Convert an ASCII quality line to symbols, rejecting characters outside
/// `offset..offset + alphabet_size`.
pub fn quality_to_symbols(line: &[u8], offset: u8, alphabet_size: usize) -> Result<Vec<Symbol>> {
    line.iter()
        .enumerate()
        .map(|(i, &c)| match c.checked_sub(offset) {
            Some(s) if (s as usize) < alphabet_size => Ok(s),
            _ => anyhow::bail!(
                "quality character {:?} at position {i} outside range {}..{}",
                c as char,
                offset,
                offset as usize + alphabet_size
            ),
        })
        .collect()
}

pub fn symbols_to_quality(symbols: &[Symbol], offset: u8) -> Vec<u8> {
    symbols.iter().map(|&s| s + offset).collect()
}

/// Fields of the fixed archive header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ArchiveHeader {
    alphabet_size: usize,
    quality_offset: u8,
    columns: usize,
    clusters: usize,
}

impl ArchiveHeader {
    fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&ARCHIVE_MAGIC);
        out.push(ARCHIVE_VERSION);
        out.push(0);
        out.push(self.alphabet_size as u8);
        out.push(self.quality_offset);
        out.extend_from_slice(&(self.columns as u16).to_le_bytes());
        out.push(self.clusters as u8);
    }

    fn read(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_SIZE {
            anyhow::bail!("archive too short ({} bytes)", data.len());
        }
        if data[0..2] != ARCHIVE_MAGIC {
            anyhow::bail!("not a QVZ archive (bad magic)");
        }
        if data[2] != ARCHIVE_VERSION {
            anyhow::bail!("unsupported archive version {}", data[2]);
        }
        let header = Self {
            alphabet_size: data[4] as usize,
            quality_offset: data[5],
            columns: read_le_u16(data, 6)? as usize,
            clusters: data[8] as usize,
        };
        if header.alphabet_size == 0 || header.quality_offset as usize + header.alphabet_size > 256 {
            anyhow::bail!(
                "invalid alphabet {} with quality offset {}",
                header.alphabet_size,
                header.quality_offset
            );
        }
        if header.clusters == 0 {
            anyhow::bail!("archive declares no clusters");
        }
        Ok(header)
    }
}

/// One codebook per cluster, trained on that cluster's reads.
fn build_codebooks(
    reads: &[Vec<Symbol>],
    ids: &[usize],
    options: &QvzOptions,
    dist: &DistortionMatrix,
    columns: usize,
) -> Result<Vec<Codebook>> {
    (0..options.clusters)
        .map(|c| {
            let members: Vec<&[Symbol]> = reads
                .iter()
                .zip(ids)
                .filter(|(_, &id)| id == c)
                .map(|(r, _)| r.as_slice())
                .collect();
            let stats = QualityStats::from_reads(&members, options.alphabet_size, columns);
            let codebook = codebook::build(&stats, dist, options.target, columns)
                .with_context(|| format!("Failed to build codebook for cluster {c}"))?;
            debug!("cluster {c}: {} reads, {} columns", members.len(), codebook.columns());
            Ok(codebook)
        })
        .collect()
}

/// An archive together with the quality lines its decoder will produce.
pub struct CompressedQualities {
    pub archive: Vec<u8>,
    pub reconstructed: Vec<Vec<u8>>,
}

/// Compress quality lines (ASCII, one per read) into a self-contained archive.
pub fn compress_qualities(qualities: &[Vec<u8>], options: &QvzOptions) -> Result<Vec<u8>> {
    Ok(compress_qualities_reconstructed(qualities, options)?.archive)
}

/// Like [`compress_qualities`], also returning the quantized quality lines
/// exactly as [`decompress_qualities`] will reproduce them.
///
/// Layout:
/// `[header:9B][WELL state:128B][codebook per cluster][num_reads:8B]`
/// `[read lengths:varint...][num_blocks:4B]` then per block
/// `[reads:4B][len:4B][arithmetic-coded stream]`.
pub fn compress_qualities_reconstructed(qualities: &[Vec<u8>], options: &QvzOptions) -> Result<CompressedQualities> {
    options.validate()?;
    let size = options.alphabet_size;

    let reads: Vec<Vec<Symbol>> = qualities
        .par_iter()
        .enumerate()
        .map(|(i, q)| {
            quality_to_symbols(q, options.quality_offset, size)
                .with_context(|| format!("Invalid quality line in read {}", i + 1))
        })
        .collect::<Result<_>>()?;
    let columns = reads.iter().map(Vec::len).max().unwrap_or(0);
    if columns > options.max_columns {
        anyhow::bail!("read length {columns} exceeds the maximum of {}", options.max_columns);
    }

    let dist = DistortionMatrix::new(&options.distortion, size)?;
    let ids = cluster::assign_clusters(&reads, options.clusters, columns);
    let codebooks = build_codebooks(&reads, &ids, options, &dist, columns)?;
    let seed = options.seed.map(Well1024a::from_seed).unwrap_or_default();

    let mut out = Vec::new();
    ArchiveHeader {
        alphabet_size: size,
        quality_offset: options.quality_offset,
        columns,
        clusters: options.clusters,
    }
    .write(&mut out);
    seed.write_state(&mut out);
    let codebook_start = out.len();
    for cb in &codebooks {
        codebook_format::write_codebook(cb, &mut out)?;
    }
    info!("Codebooks: {} cluster(s), {} columns, {} bytes", codebooks.len(), columns, out.len() - codebook_start);

    out.extend_from_slice(&(reads.len() as u64).to_le_bytes());
    for read in &reads {
        write_varint(&mut out, read.len())?;
    }

    let blocks: Vec<qvz::EncodedBlock> = reads
        .par_chunks(options.block_size)
        .zip(ids.par_chunks(options.block_size))
        .map(|(r, c)| qvz::encode_block(&codebooks, &seed, r, c, &dist))
        .collect::<Result<_>>()?;

    out.extend_from_slice(&(blocks.len() as u32).to_le_bytes());
    let mut stream_bytes = 0usize;
    let mut distortion = 0.0;
    let mut symbols = 0u64;
    for (block, chunk) in blocks.iter().zip(reads.chunks(options.block_size)) {
        let len = u32::try_from(block.data.len()).context("coded block exceeds 4 GiB")?;
        out.extend_from_slice(&(chunk.len() as u32).to_le_bytes());
        out.extend_from_slice(&len.to_le_bytes());
        out.extend_from_slice(&block.data);
        stream_bytes += block.data.len();
        distortion += block.distortion;
        symbols += block.symbols;
    }

    if symbols > 0 {
        info!(
            "Quality stream: {} symbols in {} blocks, {:.4} bits/symbol, mean distortion {:.4}",
            symbols,
            blocks.len(),
            stream_bytes as f64 * 8.0 / symbols as f64,
            distortion / symbols as f64
        );
    }
    let reconstructed = blocks
        .into_iter()
        .flat_map(|block| block.reconstructed)
        .map(|read| symbols_to_quality(&read, options.quality_offset))
        .collect();
    Ok(CompressedQualities { archive: out, reconstructed })
}

/// Inverse of [`compress_qualities`]: one reconstructed quality line per read.
pub fn decompress_qualities(data: &[u8]) -> Result<Vec<Vec<u8>>> {
    let header = ArchiveHeader::read(data)?;
    let mut offset = HEADER_SIZE;
    let seed = Well1024a::read_state(data, &mut offset)?;

    let codebooks: Vec<Codebook> = (0..header.clusters)
        .map(|c| {
            codebook_format::read_codebook(data, &mut offset, header.columns, header.alphabet_size)
                .with_context(|| format!("Failed to read codebook for cluster {c}"))
        })
        .collect::<Result<_>>()?;

    let num_reads = read_le_u64(data, offset)?;
    offset += 8;
    let lengths: Vec<usize> = (0..num_reads)
        .map(|i| match read_varint(data, &mut offset) {
            Some(len) if len <= header.columns => Ok(len),
            Some(len) => anyhow::bail!("read {i} length {len} exceeds {} columns", header.columns),
            None => anyhow::bail!("truncated read length table at offset {offset}"),
        })
        .collect::<Result<_>>()?;

    let num_blocks = read_le_u32(data, offset)? as usize;
    offset += 4;
    let mut blocks: Vec<(&[u8], &[usize])> = Vec::new();
    let mut first_read = 0usize;
    for b in 0..num_blocks {
        let reads = read_le_u32(data, offset)? as usize;
        let len = read_le_u32(data, offset + 4)? as usize;
        offset += 8;
        let stream = data
            .get(offset..offset + len)
            .ok_or_else(|| anyhow::anyhow!("truncated block {b} at offset {offset}"))?;
        offset += len;
        let Some(block_lengths) = lengths.get(first_read..first_read + reads) else {
            anyhow::bail!("block {b} claims more reads than the archive holds");
        };
        blocks.push((stream, block_lengths));
        first_read += reads;
    }
    if first_read != lengths.len() {
        anyhow::bail!("blocks cover {first_read} reads, archive holds {}", lengths.len());
    }

    let decoded: Vec<qvz::DecodedBlock> = blocks
        .par_iter()
        .enumerate()
        .map(|(b, (stream, lens))| {
            qvz::decode_block(&codebooks, &seed, stream, lens).with_context(|| format!("Failed to decode block {b}"))
        })
        .collect::<Result<_>>()?;

    Ok(decoded
        .into_iter()
        .flat_map(|block| block.reads)
        .map(|read| symbols_to_quality(&read, header.quality_offset))
        .collect())
}

/// Compress the quality lines of a FASTQ file.
pub fn compress(args: &CompressConfig) -> Result<()> {
    compress_impl::compress(args)
}

/// Decompress an archive to one quality line per read.
pub fn decompress(args: &DecompressConfig) -> Result<()> {
    decompress_impl::decompress(args)
}

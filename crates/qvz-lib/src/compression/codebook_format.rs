//! Byte layout of a serialized [`Codebook`].
//!
//! ```text
//! column 0:   [ratio+33:1B][size:2B BE][lo table:size B][hi table:size B]
//! column i>0: [n:2B BE][ratio+33:n B][n lo tables:n*size B][n hi tables:n*size B]
//! ```
//!
//! Table entries are reconstruction symbols plus 33. The contexts of column
//! `i > 0` are not stored: the reader derives them from the tables of column
//! `i - 1` and rejects a stored `n` that disagrees. The column count comes from
//! the enclosing archive header.

use anyhow::Result;

use super::alphabet::{Alphabet, Symbol};
use super::codebook::{Codebook, CodebookColumn};
use super::quantizer::{Quantizer, QuantizerPair, RATIO_SCALE};

/// Added to every stored byte to keep the block printable.
pub const CODEBOOK_BIAS: u8 = 33;

fn put_u16_be(out: &mut Vec<u8>, value: usize, what: &str) -> Result<()> {
    let v = u16::try_from(value).map_err(|_| anyhow::anyhow!("{what} {value} does not fit in 16 bits"))?;
    out.extend_from_slice(&v.to_be_bytes());
    Ok(())
}

fn put_table(out: &mut Vec<u8>, q: &Quantizer) {
    out.extend(q.mapping().iter().map(|&y| y + CODEBOOK_BIAS));
}

/// Append the serialized codebook to `out`.
pub fn write_codebook(codebook: &Codebook, out: &mut Vec<u8>) -> Result<()> {
    if codebook.alphabet_size() > (u8::MAX - CODEBOOK_BIAS) as usize {
        anyhow::bail!("alphabet of {} symbols cannot be stored", codebook.alphabet_size());
    }
    for i in 0..codebook.columns() {
        let column = codebook.column(i);
        if i == 0 {
            let pair = &column.pairs()[0];
            out.push(pair.ratio + CODEBOOK_BIAS);
            put_u16_be(out, codebook.alphabet_size(), "alphabet size")?;
            put_table(out, &pair.lo);
            put_table(out, &pair.hi);
            continue;
        }
        put_u16_be(out, column.pairs().len(), "context count")?;
        out.extend(column.pairs().iter().map(|p| p.ratio + CODEBOOK_BIAS));
        for pair in column.pairs() {
            put_table(out, &pair.lo);
        }
        for pair in column.pairs() {
            put_table(out, &pair.hi);
        }
    }
    Ok(())
}

struct Cursor<'a> {
    data: &'a [u8],
    offset: &'a mut usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let start = *self.offset;
        let bytes = start
            .checked_add(n)
            .and_then(|end| self.data.get(start..end))
            .ok_or_else(|| anyhow::anyhow!("truncated codebook at offset {start} (need {n} bytes)"))?;
        *self.offset += n;
        Ok(bytes)
    }

    fn u16_be(&mut self) -> Result<usize> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]) as usize)
    }

    fn ratio(&mut self) -> Result<u8> {
        let at = *self.offset;
        let raw = self.take(1)?[0];
        unbias_ratio(raw, at)
    }

    fn table(&mut self, size: usize) -> Result<Quantizer> {
        let at = *self.offset;
        let bytes = self.take(size)?;
        let mut mapping: Vec<Symbol> = Vec::with_capacity(size);
        for (i, &b) in bytes.iter().enumerate() {
            match b.checked_sub(CODEBOOK_BIAS) {
                Some(y) if (y as usize) < size => mapping.push(y),
                _ => anyhow::bail!("invalid quantizer entry {b} at offset {}", at + i),
            }
        }
        Ok(Quantizer::from_mapping(mapping))
    }
}

fn unbias_ratio(raw: u8, at: usize) -> Result<u8> {
    match raw.checked_sub(CODEBOOK_BIAS) {
        Some(r) if r as u32 <= RATIO_SCALE => Ok(r),
        _ => anyhow::bail!("invalid ratio byte {raw} at offset {at}"),
    }
}

/// Parse a codebook of `columns` columns over `alphabet_size` symbols starting
/// at `*offset`; advances `offset` past it.
pub fn read_codebook(
    data: &[u8],
    offset: &mut usize,
    columns: usize,
    alphabet_size: usize,
) -> Result<Codebook> {
    let mut cur = Cursor { data, offset };
    let mut built: Vec<CodebookColumn> = Vec::with_capacity(columns);

    for i in 0..columns {
        if i == 0 {
            let ratio = cur.ratio()?;
            let size = cur.u16_be()?;
            if size != alphabet_size {
                anyhow::bail!("codebook table size {size} does not match alphabet size {alphabet_size}");
            }
            let lo = cur.table(size)?;
            let hi = cur.table(size)?;
            built.push(CodebookColumn::new(
                Alphabet::from_symbols([0]),
                vec![QuantizerPair { lo, hi, ratio }],
            )?);
            continue;
        }

        let contexts = built[i - 1].output_union();
        let n = cur.u16_be()?;
        if n != contexts.len() {
            anyhow::bail!(
                "column {i}: stored context count {n} but previous column yields {}",
                contexts.len()
            );
        }
        let ratios: Vec<u8> = (0..n).map(|_| cur.ratio()).collect::<Result<_>>()?;
        let los: Vec<Quantizer> = (0..n).map(|_| cur.table(alphabet_size)).collect::<Result<_>>()?;
        let his: Vec<Quantizer> = (0..n).map(|_| cur.table(alphabet_size)).collect::<Result<_>>()?;
        let pairs = los
            .into_iter()
            .zip(his)
            .zip(ratios)
            .map(|((lo, hi), ratio)| QuantizerPair { lo, hi, ratio })
            .collect();
        built.push(CodebookColumn::new(contexts, pairs)?);
    }

    Codebook::from_columns(alphabet_size, built)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::RateTarget;
    use crate::compression::codebook::build;
    use crate::compression::distortion::DistortionMatrix;
    use crate::compression::pmf::QualityStats;

    fn sample(columns: usize, target: f64) -> Codebook {
        let reads: Vec<Vec<Symbol>> = (0..300u32)
            .map(|i| (0..columns as u32).map(|j| ((i * 13 + j * 5) % 9 + j % 2) as Symbol).collect())
            .collect();
        let stats = QualityStats::from_reads(&reads, 12, columns);
        build(&stats, &DistortionMatrix::mse(12), RateTarget::Distortion(target), columns).unwrap()
    }

    fn roundtrip(cb: &Codebook) -> Codebook {
        let mut buf = Vec::new();
        write_codebook(cb, &mut buf).unwrap();
        let mut offset = 0;
        let back = read_codebook(&buf, &mut offset, cb.columns(), cb.alphabet_size()).unwrap();
        assert_eq!(offset, buf.len());
        back
    }

    #[test]
    fn test_single_column_roundtrip() {
        let cb = sample(1, 1.5);
        assert_eq!(roundtrip(&cb), cb);
    }

    #[test]
    fn test_multi_column_roundtrip() {
        for target in [0.0, 0.5, 3.0] {
            let cb = sample(8, target);
            let back = roundtrip(&cb);
            assert_eq!(back, cb);
            for i in 0..cb.columns() {
                let (a, b) = (cb.column(i), back.column(i));
                assert_eq!(a.contexts(), b.contexts());
                for (pa, pb) in a.pairs().iter().zip(b.pairs()) {
                    assert_eq!(pa.ratio, pb.ratio);
                    assert_eq!(pa.lo.output(), pb.lo.output());
                    assert_eq!(pa.hi.output(), pb.hi.output());
                }
            }
        }
    }

    #[test]
    fn test_column0_layout() {
        let cb = sample(1, 1.0);
        let mut buf = Vec::new();
        write_codebook(&cb, &mut buf).unwrap();
        assert_eq!(buf.len(), 1 + 2 + 2 * 12);
        assert_eq!(buf[0], cb.column(0).pairs()[0].ratio + 33);
        assert_eq!(&buf[1..3], &[0, 12]);
        assert!(buf[3..].iter().all(|&b| (33..33 + 12).contains(&b)));
    }

    #[test]
    fn test_truncated_codebook_errors() {
        let cb = sample(6, 1.0);
        let mut buf = Vec::new();
        write_codebook(&cb, &mut buf).unwrap();
        for cut in [0, 1, 2, 10, buf.len() / 2, buf.len() - 1] {
            let mut offset = 0;
            assert!(
                read_codebook(&buf[..cut], &mut offset, 6, 12).is_err(),
                "cut at {cut} should fail"
            );
        }
    }

    #[test]
    fn test_inconsistent_fields_error() {
        let cb = sample(3, 1.0);
        let mut buf = Vec::new();
        write_codebook(&cb, &mut buf).unwrap();

        let mut bad_size = buf.clone();
        bad_size[2] = 11;
        assert!(read_codebook(&bad_size, &mut 0, 3, 12).is_err());

        let mut bad_ratio = buf.clone();
        bad_ratio[0] = 33 + 129;
        assert!(read_codebook(&bad_ratio, &mut 0, 3, 12).is_err());

        let mut bad_entry = buf.clone();
        bad_entry[3] = 33 + 12;
        assert!(read_codebook(&bad_entry, &mut 0, 3, 12).is_err());

        let mut bad_count = buf.clone();
        let at = 1 + 2 + 2 * 12;
        bad_count[at + 1] = bad_count[at + 1].wrapping_add(1);
        assert!(read_codebook(&bad_count, &mut 0, 3, 12).is_err());
    }
}

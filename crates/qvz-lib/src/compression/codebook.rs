//! Per-column, per-context quantizer pairs.
//!
//! Column 0 has a single context (symbol 0). The contexts of column `i + 1` are
//! exactly the symbols that some quantizer of column `i` can output, so the
//! previous reconstructed symbol always names a context of the next column.
//!
//! Building walks the columns left to right, carrying the joint distribution
//! of (context, symbol) through the chosen quantizers and the training
//! transition statistics.

use anyhow::Result;
use rayon::prelude::*;
use tracing::debug;

use super::alphabet::{Alphabet, Symbol};
use super::distortion::DistortionMatrix;
use super::pmf::{Pmf, QualityStats};
use super::quantizer::{optimize, Quantizer, QuantizerPair, RATIO_BITS};
use super::well::Well1024a;
use crate::cli::RateTarget;

/// Quantizer pairs of one column, indexed by the position of the context
/// symbol in `contexts`.
#[derive(Debug, Clone, PartialEq)]
pub struct CodebookColumn {
    contexts: Alphabet,
    pairs: Vec<QuantizerPair>,
}

impl CodebookColumn {
    pub fn new(contexts: Alphabet, pairs: Vec<QuantizerPair>) -> Result<Self> {
        if contexts.len() != pairs.len() {
            anyhow::bail!(
                "column has {} contexts but {} quantizer pairs",
                contexts.len(),
                pairs.len()
            );
        }
        Ok(Self { contexts, pairs })
    }

    #[inline]
    pub fn contexts(&self) -> &Alphabet {
        &self.contexts
    }

    #[inline]
    pub fn pairs(&self) -> &[QuantizerPair] {
        &self.pairs
    }

    /// Every symbol any quantizer in this column can output.
    pub fn output_union(&self) -> Alphabet {
        Alphabet::from_symbols(
            self.pairs
                .iter()
                .flat_map(|p| p.lo.output().symbols().iter().chain(p.hi.output().symbols()))
                .copied(),
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Codebook {
    alphabet_size: usize,
    columns: Vec<CodebookColumn>,
}

impl Codebook {
    /// Assemble from columns, checking that contexts chain.
    pub fn from_columns(alphabet_size: usize, columns: Vec<CodebookColumn>) -> Result<Self> {
        for (i, column) in columns.iter().enumerate() {
            for pair in column.pairs() {
                if pair.lo.input_size() != alphabet_size || pair.hi.input_size() != alphabet_size {
                    anyhow::bail!("column {i}: quantizer table size does not match alphabet size {alphabet_size}");
                }
            }
            let expected = match i {
                0 => Alphabet::from_symbols([0]),
                _ => columns[i - 1].output_union(),
            };
            if column.contexts() != &expected {
                anyhow::bail!("column {i}: context alphabet does not match previous column outputs");
            }
        }
        Ok(Self { alphabet_size, columns })
    }

    #[inline]
    pub fn alphabet_size(&self) -> usize {
        self.alphabet_size
    }

    #[inline]
    pub fn columns(&self) -> usize {
        self.columns.len()
    }

    #[inline]
    pub fn column(&self, column: usize) -> &CodebookColumn {
        &self.columns[column]
    }

    /// Position of `prev` among the contexts of `column`.
    pub fn context_index(&self, column: usize, prev: Symbol) -> Result<usize> {
        let Some(col) = self.columns.get(column) else {
            anyhow::bail!("column {column} beyond codebook of {} columns", self.columns.len());
        };
        col.contexts
            .index_of(prev)
            .ok_or_else(|| anyhow::anyhow!("context {prev} not present in column {column}"))
    }

    /// The quantizer pair used in `column` after reconstructing `prev`.
    pub fn pair(&self, column: usize, prev: Symbol) -> Result<&QuantizerPair> {
        let idx = self.context_index(column, prev)?;
        Ok(&self.columns[column].pairs[idx])
    }

    /// Draw the lo/hi choice for `(column, prev)`. Returns the quantizer and its
    /// model index `2 * context + (0 | 1)`.
    pub fn choose(
        &self,
        well: &mut Well1024a,
        column: usize,
        prev: Symbol,
    ) -> Result<(&Quantizer, usize)> {
        let idx = self.context_index(column, prev)?;
        let (q, side) = self.columns[column].pairs[idx].select(well.next_bits(RATIO_BITS));
        Ok((q, 2 * idx + side))
    }
}

/// Design a codebook of `columns` columns from training statistics.
pub fn build(
    stats: &QualityStats,
    dist: &DistortionMatrix,
    target: RateTarget,
    columns: usize,
) -> Result<Codebook> {
    let size = stats.alphabet_size();
    if dist.size() != size {
        anyhow::bail!("distortion matrix is {0}x{0}, alphabet has {size} symbols", dist.size());
    }
    if columns > stats.columns() {
        anyhow::bail!("requested {columns} columns, statistics cover {}", stats.columns());
    }
    let mut built: Vec<CodebookColumn> = Vec::with_capacity(columns);
    if columns == 0 {
        return Codebook::from_columns(size, built);
    }

    let first = with_fallback(stats.conditional(0, 0).clone(), stats, 0);
    let pair = optimize(&first, dist, target);
    debug!(
        "column 0: lo {} / hi {} levels, ratio {}",
        pair.lo.levels(),
        pair.hi.levels(),
        pair.ratio
    );
    let mut joint: Vec<Vec<f64>> = vec![(0..size).map(|x| first.probability(x as Symbol)).collect()];
    built.push(CodebookColumn::new(Alphabet::from_symbols([0]), vec![pair])?);

    for column in 1..columns {
        let prev = &built[column - 1];
        let contexts = prev.output_union();
        let next_joint = propagate(prev, &joint, &contexts, stats, column);

        let pairs: Vec<QuantizerPair> = next_joint
            .par_iter()
            .map(|row| {
                let pmf = with_fallback(Pmf::from_masses(row.clone()), stats, column);
                optimize(&pmf, dist, target)
            })
            .collect();
        debug!(
            "column {column}: {} contexts, mean expected distortion {:.4}",
            contexts.len(),
            pairs.iter().map(|p| p.expected_distortion()).sum::<f64>() / pairs.len().max(1) as f64
        );

        built.push(CodebookColumn::new(contexts, pairs)?);
        joint = next_joint;
    }

    Codebook::from_columns(size, built)
}

/// Joint mass of (context of `column`, symbol at `column`) given the joint of
/// the previous column and its quantizers.
///
/// A previous (context `q`, symbol `x`) reconstructs `x` as `lo_q(x)` with the
/// stored lo weight and as `hi_q(x)` otherwise; the reconstruction becomes the
/// new context and the next symbol follows the training transition from `x`.
fn propagate(
    prev: &CodebookColumn,
    joint: &[Vec<f64>],
    contexts: &Alphabet,
    stats: &QualityStats,
    column: usize,
) -> Vec<Vec<f64>> {
    let size = stats.alphabet_size();

    // Mass of (new context, previous symbol x).
    let mut carried = vec![vec![0.0; size]; contexts.len()];
    for (pair, row) in prev.pairs().iter().zip(joint) {
        let w = pair.lo_weight();
        for (x, &m) in row.iter().enumerate() {
            if m <= 0.0 {
                continue;
            }
            let x = x as Symbol;
            if let Some(c) = contexts.index_of(pair.lo.apply(x)) {
                carried[c][x as usize] += w * m;
            }
            if let Some(c) = contexts.index_of(pair.hi.apply(x)) {
                carried[c][x as usize] += (1.0 - w) * m;
            }
        }
    }

    carried
        .par_iter()
        .map(|by_prev| {
            let mut row = vec![0.0; size];
            for (x, &m) in by_prev.iter().enumerate() {
                let transition = stats.conditional(column, x as Symbol);
                if m <= 0.0 || transition.is_zero() {
                    continue;
                }
                for (y, slot) in row.iter_mut().enumerate() {
                    *slot += m * transition.probability(y as Symbol);
                }
            }
            row
        })
        .collect()
}

/// Contexts never reached in training use the column marginal, then uniform.
fn with_fallback(pmf: Pmf, stats: &QualityStats, column: usize) -> Pmf {
    if !pmf.is_zero() {
        return pmf;
    }
    let marginal = stats.marginal(column);
    if !marginal.is_zero() {
        return marginal;
    }
    Pmf::uniform(stats.alphabet_size())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn training_reads() -> Vec<Vec<Symbol>> {
        let mut reads = Vec::new();
        for i in 0..200u32 {
            let read: Vec<Symbol> = (0..12u32)
                .map(|j| (((i * 7 + j * 3) % 11) + (j % 3)) as Symbol)
                .collect();
            reads.push(read);
        }
        reads
    }

    fn built(target: RateTarget) -> Codebook {
        let reads = training_reads();
        let stats = QualityStats::from_reads(&reads, 16, 12);
        build(&stats, &DistortionMatrix::mse(16), target, 12).unwrap()
    }

    #[test]
    fn test_contexts_chain() {
        let cb = built(RateTarget::Distortion(1.0));
        assert_eq!(cb.columns(), 12);
        assert_eq!(cb.column(0).contexts().symbols(), &[0]);
        for i in 1..cb.columns() {
            assert_eq!(cb.column(i).contexts(), &cb.column(i - 1).output_union(), "column {i}");
        }
    }

    #[test]
    fn test_quantizers_total() {
        let cb = built(RateTarget::Distortion(2.0));
        for i in 0..cb.columns() {
            for pair in cb.column(i).pairs() {
                for q in [&pair.lo, &pair.hi] {
                    assert_eq!(q.input_size(), 16);
                    for x in 0..16 {
                        assert!(q.output().contains(q.apply(x)));
                    }
                }
            }
        }
    }

    #[test]
    fn test_lossless_reproduces_training_symbols() {
        let reads = training_reads();
        let cb = built(RateTarget::Distortion(0.0));
        let mut well = Well1024a::default();
        for read in reads.iter().take(20) {
            let mut prev = 0;
            for (col, &x) in read.iter().enumerate() {
                let (q, _) = cb.choose(&mut well, col, prev).unwrap();
                assert_eq!(q.apply(x), x);
                prev = x;
            }
        }
    }

    #[test]
    fn test_missing_context_is_error() {
        let cb = built(RateTarget::Distortion(4.0));
        let absent = (0..16u8).find(|&s| !cb.column(1).contexts().contains(s)).unwrap();
        assert!(cb.pair(1, absent).is_err());
        assert!(cb.context_index(0, 1).is_err());
        assert!(cb.context_index(99, 0).is_err());
    }

    #[test]
    fn test_zero_mass_context_falls_back() {
        let stats = QualityStats::new(6, 2);
        let cb = build(&stats, &DistortionMatrix::mse(6), RateTarget::Distortion(1.0), 2).unwrap();
        assert_eq!(cb.columns(), 2);
        assert!(!cb.column(1).contexts().is_empty());
    }

    #[test]
    fn test_build_rejects_mismatched_distortion() {
        let stats = QualityStats::new(6, 2);
        assert!(build(&stats, &DistortionMatrix::mse(5), RateTarget::Distortion(1.0), 2).is_err());
        assert!(build(&stats, &DistortionMatrix::mse(6), RateTarget::Distortion(1.0), 3).is_err());
    }

    #[test]
    fn test_choose_index_layout() {
        let cb = built(RateTarget::Distortion(0.0));
        let mut well = Well1024a::default();
        let (_, idx) = cb.choose(&mut well, 0, 0).unwrap();
        // ratio 0 at D = 0: always hi of context 0
        assert_eq!(idx, 1);
    }
}

//! Empirical probability mass functions and per-column training statistics.
//!
//! A [`Pmf`] stores raw (possibly fractional) mass per symbol and normalizes on
//! demand. [`QualityStats`] holds one `Pmf` per `(column, previous symbol)` pair,
//! counted over the training reads.

use rayon::prelude::*;

use super::alphabet::Symbol;

/// Mass per symbol plus a cached total. Probabilities are `mass / total`.
#[derive(Debug, Clone, PartialEq)]
pub struct Pmf {
    mass: Vec<f64>,
    total: f64,
}

impl Pmf {
    /// All-zero PMF over `size` symbols.
    pub fn new(size: usize) -> Self {
        Self { mass: vec![0.0; size], total: 0.0 }
    }

    pub fn uniform(size: usize) -> Self {
        Self { mass: vec![1.0; size], total: size as f64 }
    }

    /// Build from raw masses. Negative or non-finite entries are treated as zero.
    pub fn from_masses(masses: Vec<f64>) -> Self {
        let mass: Vec<f64> = masses
            .into_iter()
            .map(|m| if m.is_finite() && m > 0.0 { m } else { 0.0 })
            .collect();
        let total = mass.iter().sum();
        Self { mass, total }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.mass.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.mass.is_empty()
    }

    #[inline]
    pub fn total(&self) -> f64 {
        self.total
    }

    /// True when no symbol carries mass.
    #[inline]
    pub fn is_zero(&self) -> bool {
        self.total <= 0.0
    }

    #[inline]
    pub fn increment(&mut self, symbol: Symbol) {
        self.add(symbol, 1.0);
    }

    #[inline]
    pub fn add(&mut self, symbol: Symbol, weight: f64) {
        self.mass[symbol as usize] += weight;
        self.total += weight;
    }

    /// Add `other`'s masses into `self`.
    pub fn accumulate(&mut self, other: &Pmf) {
        for (m, o) in self.mass.iter_mut().zip(&other.mass) {
            *m += o;
        }
        self.total += other.total;
    }

    #[inline]
    pub fn mass(&self, symbol: Symbol) -> f64 {
        self.mass[symbol as usize]
    }

    #[inline]
    pub fn probability(&self, symbol: Symbol) -> f64 {
        if self.total > 0.0 {
            self.mass[symbol as usize] / self.total
        } else {
            0.0
        }
    }

    /// Symbols with nonzero mass, ascending.
    pub fn support(&self) -> Vec<Symbol> {
        self.mass
            .iter()
            .enumerate()
            .filter(|(_, &m)| m > 0.0)
            .map(|(s, _)| s as Symbol)
            .collect()
    }

    /// Shannon entropy in bits.
    pub fn entropy(&self) -> f64 {
        if self.total <= 0.0 {
            return 0.0;
        }
        self.mass
            .iter()
            .filter(|&&m| m > 0.0)
            .map(|&m| {
                let p = m / self.total;
                -p * p.log2()
            })
            .sum()
    }
}

/// Reads per rayon task when counting training statistics.
const STATS_CHUNK_READS: usize = 16_384;

/// Conditional symbol counts: for column `i` and previous symbol `x`, the
/// distribution of the symbol at column `i`. Column 0 is conditioned on the
/// fixed context `0`.
#[derive(Debug, Clone, PartialEq)]
pub struct QualityStats {
    alphabet_size: usize,
    columns: usize,
    pmfs: Vec<Pmf>,
}

impl QualityStats {
    pub fn new(alphabet_size: usize, columns: usize) -> Self {
        Self {
            alphabet_size,
            columns,
            pmfs: vec![Pmf::new(alphabet_size); alphabet_size * columns],
        }
    }

    /// Count every read in parallel and merge the partial tables.
    pub fn from_reads<R: AsRef<[Symbol]> + Sync>(reads: &[R], alphabet_size: usize, columns: usize) -> Self {
        reads
            .par_chunks(STATS_CHUNK_READS)
            .map(|chunk| {
                let mut stats = Self::new(alphabet_size, columns);
                for read in chunk {
                    stats.update(read.as_ref());
                }
                stats
            })
            .reduce(
                || Self::new(alphabet_size, columns),
                |mut a, b| {
                    a.merge(&b);
                    a
                },
            )
    }

    #[inline]
    pub fn alphabet_size(&self) -> usize {
        self.alphabet_size
    }

    #[inline]
    pub fn columns(&self) -> usize {
        self.columns
    }

    /// Count one read. Symbols past the last tracked column are ignored.
    pub fn update(&mut self, read: &[Symbol]) {
        let mut prev: Symbol = 0;
        for (column, &symbol) in read.iter().take(self.columns).enumerate() {
            let slot = column * self.alphabet_size + prev as usize;
            self.pmfs[slot].increment(symbol);
            prev = symbol;
        }
    }

    pub fn merge(&mut self, other: &QualityStats) {
        for (a, b) in self.pmfs.iter_mut().zip(&other.pmfs) {
            a.accumulate(b);
        }
    }

    /// Distribution of column `column` given previous symbol `prev`.
    #[inline]
    pub fn conditional(&self, column: usize, prev: Symbol) -> &Pmf {
        &self.pmfs[column * self.alphabet_size + prev as usize]
    }

    /// Distribution of column `column` over all contexts.
    pub fn marginal(&self, column: usize) -> Pmf {
        let mut pmf = Pmf::new(self.alphabet_size);
        for prev in 0..self.alphabet_size {
            pmf.accumulate(self.conditional(column, prev as Symbol));
        }
        pmf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pmf_probability_and_entropy() {
        let mut pmf = Pmf::new(4);
        pmf.increment(0);
        pmf.increment(1);
        pmf.add(2, 2.0);
        assert_eq!(pmf.total(), 4.0);
        assert_eq!(pmf.probability(2), 0.5);
        assert_eq!(pmf.probability(3), 0.0);
        assert_eq!(pmf.support(), vec![0, 1, 2]);
        assert!((pmf.entropy() - 1.5).abs() < 1e-12);
    }

    #[test]
    fn test_zero_pmf() {
        let pmf = Pmf::new(3);
        assert!(pmf.is_zero());
        assert_eq!(pmf.probability(1), 0.0);
        assert_eq!(pmf.entropy(), 0.0);
        assert!(pmf.support().is_empty());
    }

    #[test]
    fn test_from_masses_drops_invalid() {
        let pmf = Pmf::from_masses(vec![1.0, -2.0, f64::NAN, 3.0]);
        assert_eq!(pmf.total(), 4.0);
        assert_eq!(pmf.support(), vec![0, 3]);
    }

    #[test]
    fn test_stats_conditioning() {
        let reads: Vec<Vec<Symbol>> = vec![vec![2, 3, 3], vec![2, 1], vec![0]];
        let stats = QualityStats::from_reads(&reads, 4, 3);

        let col0 = stats.conditional(0, 0);
        assert_eq!(col0.mass(2), 2.0);
        assert_eq!(col0.mass(0), 1.0);

        let col1 = stats.conditional(1, 2);
        assert_eq!(col1.mass(3), 1.0);
        assert_eq!(col1.mass(1), 1.0);
        assert!(stats.conditional(1, 0).is_zero());

        assert_eq!(stats.conditional(2, 3).mass(3), 1.0);
        assert_eq!(stats.marginal(1).total(), 2.0);
    }

    #[test]
    fn test_stats_truncates_long_reads() {
        let mut stats = QualityStats::new(4, 2);
        stats.update(&[1, 2, 3, 3]);
        assert_eq!(stats.marginal(0).total(), 1.0);
        assert_eq!(stats.marginal(1).total(), 1.0);
    }
}

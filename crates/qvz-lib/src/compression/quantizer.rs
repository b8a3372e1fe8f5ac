//! Lloyd-Max scalar quantizer design and two-quantizer rate mixing.
//!
//! A [`Quantizer`] is a total mapping from the input alphabet to reconstruction
//! symbols. [`design`] runs Lloyd-Max up to a number of levels; [`optimize`]
//! searches level counts for the pair `(lo, hi)` whose random mixture meets a
//! distortion or entropy target.

use super::alphabet::{Alphabet, Symbol};
use super::distortion::DistortionMatrix;
use super::pmf::Pmf;
use crate::cli::RateTarget;

/// Upper bound on Lloyd-Max refinement passes.
pub const QUANTIZER_MAX_ITER: usize = 100;
/// PRNG bits drawn per symbol to pick between the lo and hi quantizer.
pub const RATIO_BITS: u32 = 7;
/// Fixed-point scale of a stored mixing ratio (`1 << RATIO_BITS`).
pub const RATIO_SCALE: u32 = 1 << RATIO_BITS;

#[derive(Debug, Clone)]
pub struct Quantizer {
    mapping: Vec<Symbol>,
    output: Alphabet,
    states: Vec<usize>,
    distortion: f64,
}

/// Quantizers are equal when their tables are; the output alphabet and state
/// indices are derived from the table and the recorded distortion is not
/// part of the wire format.
impl PartialEq for Quantizer {
    fn eq(&self, other: &Self) -> bool {
        self.mapping == other.mapping
    }
}

impl Quantizer {
    /// Wrap a mapping table. The output alphabet is the sorted set of values
    /// the table produces; distortion is unknown and reported as 0.
    pub fn from_mapping(mapping: Vec<Symbol>) -> Self {
        let output = Alphabet::from_symbols(mapping.iter().copied());
        let states = mapping
            .iter()
            .map(|&y| output.index_of(y).unwrap_or(0))
            .collect();
        Self { mapping, output, states, distortion: 0.0 }
    }

    fn with_distortion(mut self, pmf: &Pmf, dist: &DistortionMatrix) -> Self {
        self.distortion = self.mean_distortion(pmf, dist);
        self
    }

    #[inline]
    pub fn mapping(&self) -> &[Symbol] {
        &self.mapping
    }

    #[inline]
    pub fn output(&self) -> &Alphabet {
        &self.output
    }

    /// Number of distinct reconstruction symbols.
    #[inline]
    pub fn levels(&self) -> usize {
        self.output.len()
    }

    #[inline]
    pub fn input_size(&self) -> usize {
        self.mapping.len()
    }

    /// Mean distortion against the PMF the quantizer was designed for.
    #[inline]
    pub fn distortion(&self) -> f64 {
        self.distortion
    }

    #[inline]
    pub fn apply(&self, symbol: Symbol) -> Symbol {
        self.mapping[symbol as usize]
    }

    /// Index of `apply(symbol)` within the output alphabet; this is what the
    /// arithmetic coder sees.
    #[inline]
    pub fn state_of(&self, symbol: Symbol) -> usize {
        self.states[symbol as usize]
    }

    pub fn mean_distortion(&self, pmf: &Pmf, dist: &DistortionMatrix) -> f64 {
        self.mapping
            .iter()
            .enumerate()
            .map(|(x, &y)| pmf.probability(x as Symbol) * dist.get(x as Symbol, y))
            .sum()
    }

    /// Distribution of the reconstruction when inputs follow `pmf`.
    pub fn output_pmf(&self, pmf: &Pmf) -> Pmf {
        let mut out = Pmf::new(self.mapping.len());
        for (x, &y) in self.mapping.iter().enumerate() {
            let m = pmf.mass(x as Symbol);
            if m > 0.0 {
                out.add(y, m);
            }
        }
        out
    }
}

/// Initial region boundaries for `levels` regions over an alphabet of `size`.
///
/// The support is split into `levels` groups holding (nearly) the same number of
/// symbols; region `j` starts at the first support symbol of group `j` and the
/// last region ends just past the last support symbol. An empty support or a
/// single level gives one region covering the whole alphabet. Returns
/// `levels + 1` boundaries.
///
/// This heuristic decides which local optimum Lloyd-Max converges to and is the
/// knob to turn when tuning quantizer quality.
pub fn seed_regions(support: &[Symbol], size: usize, levels: usize) -> Vec<usize> {
    if support.is_empty() || levels <= 1 {
        return vec![0, size];
    }
    let count = support.len();
    let mut bounds: Vec<usize> = (0..levels)
        .map(|j| support[(j * count) / levels] as usize)
        .collect();
    bounds.push(support[count - 1] as usize + 1);
    bounds
}

/// Best quantizer for `pmf` with at most `levels` reconstruction points.
///
/// `levels` is clamped to `[1, |support|]`. Mean distortion never increases
/// with `levels`: the result is the best Lloyd-Max outcome over every level
/// count up to `levels`.
pub fn design(pmf: &Pmf, dist: &DistortionMatrix, levels: usize) -> Quantizer {
    QuantizerLadder::new(pmf, dist).rung(levels).clone()
}

/// Expand region bounds and reconstruction points into a full mapping table.
/// Symbols outside the regions take the nearest end's reconstruction.
fn regions_to_mapping(bounds: &[usize], recon: &[usize], size: usize) -> Vec<Symbol> {
    let levels = recon.len();
    let mut mapping = vec![0 as Symbol; size];
    for j in 0..levels {
        for slot in &mut mapping[bounds[j]..bounds[j + 1]] {
            *slot = recon[j] as Symbol;
        }
    }
    let (first, last) = (bounds[0], bounds[levels] - 1);
    let (head, tail) = (mapping[first], mapping[last]);
    mapping[..first].fill(head);
    mapping[last + 1..].fill(tail);
    mapping
}

/// One Lloyd-Max run with exactly `levels` regions seeded by [`seed_regions`].
fn lloyd_max(pmf: &Pmf, dist: &DistortionMatrix, levels: usize) -> Quantizer {
    lloyd_max_passes(pmf, dist, levels, QUANTIZER_MAX_ITER)
}

/// Stops once no reconstruction point moves or after `max_passes` passes. The
/// lowest-distortion candidate seen over all passes is returned.
fn lloyd_max_passes(pmf: &Pmf, dist: &DistortionMatrix, levels: usize, max_passes: usize) -> Quantizer {
    let size = pmf.len();
    if size == 0 {
        return Quantizer::from_mapping(Vec::new());
    }
    let support = pmf.support();
    let levels = levels.clamp(1, support.len().max(1));

    let prob: Vec<f64> = (0..size).map(|x| pmf.probability(x as Symbol)).collect();
    let d = |x: usize, y: usize| dist.get(x as Symbol, y as Symbol);

    let mut bounds = seed_regions(&support, size, levels);
    let mut recon: Vec<usize> = (0..levels)
        .map(|j| (bounds[j] + bounds[j + 1] - 1) / 2)
        .collect();

    let mut best: Option<Quantizer> = None;
    let mut changed = true;
    let mut iter = 0;
    while changed && iter < max_passes.max(1) {
        changed = false;
        iter += 1;

        // Best reconstruction point per region; empty regions keep theirs.
        for j in 0..levels {
            let (lo, hi) = (bounds[j], bounds[j + 1]);
            if lo >= hi {
                continue;
            }
            let mut point = lo;
            let mut point_cost = f64::INFINITY;
            for y in lo..hi {
                let cost: f64 = (lo..hi).map(|x| prob[x] * d(x, y)).sum();
                if cost < point_cost {
                    point = y;
                    point_cost = cost;
                }
            }
            if point != recon[j] {
                recon[j] = point;
                changed = true;
            }
        }

        // Move each interior boundary to the first symbol closer to the next point.
        let (first, end) = (bounds[0], bounds[levels]);
        let mut r = 0;
        for x in first + 1..end {
            if r + 1 >= levels {
                break;
            }
            if d(x, recon[r + 1]) < d(x, recon[r]) {
                r += 1;
                bounds[r] = x;
            }
        }
        for b in bounds.iter_mut().take(levels).skip(r + 1) {
            *b = end;
        }

        let candidate =
            Quantizer::from_mapping(regions_to_mapping(&bounds, &recon, size)).with_distortion(pmf, dist);
        if best.as_ref().map_or(true, |b| candidate.distortion() <= b.distortion()) {
            best = Some(candidate);
        }
    }

    best.unwrap_or_else(|| {
        Quantizer::from_mapping(regions_to_mapping(&bounds, &recon, size)).with_distortion(pmf, dist)
    })
}

/// Lazily designed quantizers for one PMF, indexed by level count.
///
/// Rung `k` is the better of a `k`-level Lloyd-Max run and rung `k - 1`, so
/// distortion never increases with the level count even when Lloyd-Max lands
/// in a poor local optimum.
pub struct QuantizerLadder<'a> {
    pmf: &'a Pmf,
    dist: &'a DistortionMatrix,
    rungs: Vec<Quantizer>,
    max_levels: usize,
}

impl<'a> QuantizerLadder<'a> {
    pub fn new(pmf: &'a Pmf, dist: &'a DistortionMatrix) -> Self {
        let max_levels = pmf.support().len().max(1);
        Self { pmf, dist, rungs: Vec::new(), max_levels }
    }

    #[inline]
    pub fn max_levels(&self) -> usize {
        self.max_levels
    }

    /// Best quantizer using at most `levels` levels (clamped to the support size).
    pub fn rung(&mut self, levels: usize) -> &Quantizer {
        let levels = levels.clamp(1, self.max_levels);
        while self.rungs.len() < levels {
            let candidate = lloyd_max(self.pmf, self.dist, self.rungs.len() + 1);
            let next = match self.rungs.last() {
                Some(prev) if prev.distortion() <= candidate.distortion() => prev.clone(),
                _ => candidate,
            };
            self.rungs.push(next);
        }
        &self.rungs[levels - 1]
    }

    fn output_entropy(&mut self, levels: usize) -> f64 {
        let pmf = self.pmf;
        self.rung(levels).output_pmf(pmf).entropy()
    }
}

/// Two quantizers for one context and the probability of using `lo`, stored as
/// a fixed-point value in `0..=RATIO_SCALE`.
#[derive(Debug, Clone, PartialEq)]
pub struct QuantizerPair {
    pub lo: Quantizer,
    pub hi: Quantizer,
    pub ratio: u8,
}

impl QuantizerPair {
    /// A pair that always uses `q`.
    pub fn single(q: Quantizer) -> Self {
        Self { lo: q.clone(), hi: q, ratio: RATIO_SCALE as u8 }
    }

    /// Probability of picking `lo`, as realized by the stored ratio.
    #[inline]
    pub fn lo_weight(&self) -> f64 {
        self.ratio as f64 / RATIO_SCALE as f64
    }

    /// Pick by a `RATIO_BITS` draw: `draw >= ratio` selects `hi`. Returns the
    /// quantizer and 0 for lo, 1 for hi.
    #[inline]
    pub fn select(&self, draw: u32) -> (&Quantizer, usize) {
        if draw >= self.ratio as u32 {
            (&self.hi, 1)
        } else {
            (&self.lo, 0)
        }
    }

    /// Mean distortion of the mixture.
    pub fn expected_distortion(&self) -> f64 {
        let w = self.lo_weight();
        w * self.lo.distortion() + (1.0 - w) * self.hi.distortion()
    }
}

/// Round a probability to the stored fixed-point ratio.
pub fn quantize_ratio(ratio: f64) -> u8 {
    (ratio.clamp(0.0, 1.0) * RATIO_SCALE as f64).round() as u8
}

/// Weight on `lo` so that `w * lo + (1 - w) * hi == target`, clamped to [0, 1].
fn mix_ratio(target: f64, lo: f64, hi: f64) -> f64 {
    let denom = lo - hi;
    if denom.abs() < f64::EPSILON {
        return 1.0;
    }
    ((target - hi) / denom).clamp(0.0, 1.0)
}

/// Choose the `(lo, hi)` pair for `pmf` meeting `target`.
pub fn optimize(pmf: &Pmf, dist: &DistortionMatrix, target: RateTarget) -> QuantizerPair {
    let mut ladder = QuantizerLadder::new(pmf, dist);
    match target {
        RateTarget::Distortion(d) => optimize_for_distortion(&mut ladder, d),
        RateTarget::EntropyRatio(r) => optimize_for_entropy(&mut ladder, r * pmf.entropy()),
    }
}

/// Smallest `hi` with distortion <= `target`, `lo = hi - 1`. If one level
/// already suffices, or no level count does, both sides use the same rung.
pub fn optimize_for_distortion(ladder: &mut QuantizerLadder<'_>, target: f64) -> QuantizerPair {
    let max = ladder.max_levels();
    let mut hi = 1;
    while hi < max && ladder.rung(hi).distortion() > target {
        hi += 1;
    }
    if hi == 1 || ladder.rung(hi).distortion() > target {
        return QuantizerPair::single(ladder.rung(hi).clone());
    }
    let hi_q = ladder.rung(hi).clone();
    let lo_q = ladder.rung(hi - 1).clone();
    let ratio = mix_ratio(target, lo_q.distortion(), hi_q.distortion());
    QuantizerPair { lo: lo_q, hi: hi_q, ratio: quantize_ratio(ratio) }
}

/// Like [`optimize_for_distortion`] but bracketing a target output entropy (bits).
pub fn optimize_for_entropy(ladder: &mut QuantizerLadder<'_>, target: f64) -> QuantizerPair {
    let max = ladder.max_levels();
    let mut hi = 1;
    while hi < max && ladder.output_entropy(hi) < target {
        hi += 1;
    }
    let hi_entropy = ladder.output_entropy(hi);
    if hi == 1 || hi_entropy < target {
        return QuantizerPair::single(ladder.rung(hi).clone());
    }
    let lo_entropy = ladder.output_entropy(hi - 1);
    let hi_q = ladder.rung(hi).clone();
    let lo_q = ladder.rung(hi - 1).clone();
    let ratio = mix_ratio(target, lo_entropy, hi_entropy);
    QuantizerPair { lo: lo_q, hi: hi_q, ratio: quantize_ratio(ratio) }
}

//! Pairwise reconstruction cost between quality symbols.

use anyhow::{Context, Result};
use std::path::Path;

use super::alphabet::Symbol;
use crate::cli::DistortionKind;

/// Dense `size x size` cost matrix; `get(x, y)` is the cost of reconstructing
/// input `x` as `y`.
#[derive(Debug, Clone, PartialEq)]
pub struct DistortionMatrix {
    size: usize,
    values: Vec<f64>,
}

impl DistortionMatrix {
    /// Build the matrix selected by `kind` for an alphabet of `size` symbols.
    pub fn new(kind: &DistortionKind, size: usize) -> Result<Self> {
        match kind {
            DistortionKind::Mse => Ok(Self::mse(size)),
            DistortionKind::Manhattan => Ok(Self::manhattan(size)),
            DistortionKind::Lorentzian => Ok(Self::lorentzian(size)),
            DistortionKind::Custom(path) => Self::from_table_file(path, size),
        }
    }

    /// Squared error `(x - y)^2`.
    pub fn mse(size: usize) -> Self {
        Self::from_fn(size, |d| d * d)
    }

    /// Absolute error `|x - y|`.
    pub fn manhattan(size: usize) -> Self {
        Self::from_fn(size, |d| d)
    }

    /// `log2(1 + |x - y|)`.
    pub fn lorentzian(size: usize) -> Self {
        Self::from_fn(size, |d| (1.0 + d).log2())
    }

    fn from_fn(size: usize, cost: impl Fn(f64) -> f64) -> Self {
        let mut values = Vec::with_capacity(size * size);
        for x in 0..size {
            for y in 0..size {
                values.push(cost((x as f64 - y as f64).abs()));
            }
        }
        Self { size, values }
    }

    /// Load a custom matrix: `size * size` whitespace-separated numbers, row `x`
    /// holding the cost of reconstructing `x` as each `y`.
    pub fn from_table_file(path: &Path, size: usize) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read distortion table: {}", path.display()))?;
        Self::parse_table(&text, size)
            .with_context(|| format!("Invalid distortion table: {}", path.display()))
    }

    pub fn parse_table(text: &str, size: usize) -> Result<Self> {
        let mut values = Vec::with_capacity(size * size);
        for token in text.split_whitespace() {
            let v: f64 = token
                .parse()
                .with_context(|| format!("Bad distortion value '{token}' at entry {}", values.len()))?;
            if !v.is_finite() || v < 0.0 {
                anyhow::bail!("Distortion value at entry {} must be finite and non-negative", values.len());
            }
            values.push(v);
        }
        if values.len() != size * size {
            anyhow::bail!(
                "Expected {} distortion values for a {size}x{size} table, found {}",
                size * size,
                values.len()
            );
        }
        Ok(Self { size, values })
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn get(&self, x: Symbol, y: Symbol) -> f64 {
        self.values[x as usize * self.size + y as usize]
    }
}

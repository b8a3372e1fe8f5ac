//! Ordered symbol sets with a reverse index.
//!
//! Quality symbols are Phred scores with the ASCII offset removed, so every
//! symbol fits in a `u8`. An [`Alphabet`] keeps its symbols in ascending order
//! and answers "where is symbol `s`?" in O(1).

/// A quality symbol (Phred score without the ASCII offset).
pub type Symbol = u8;

/// Ascending, duplicate-free set of symbols with a position lookup.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Alphabet {
    symbols: Vec<Symbol>,
    positions: Vec<Option<usize>>,
}

impl Alphabet {
    /// Build from any symbol sequence; the result is sorted and deduplicated.
    pub fn from_symbols<I: IntoIterator<Item = Symbol>>(symbols: I) -> Self {
        let mut symbols: Vec<Symbol> = symbols.into_iter().collect();
        symbols.sort_unstable();
        symbols.dedup();

        let span = symbols.last().map_or(0, |&s| s as usize + 1);
        let mut positions = vec![None; span];
        for (i, &s) in symbols.iter().enumerate() {
            positions[s as usize] = Some(i);
        }
        Self { symbols, positions }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    #[inline]
    pub fn symbols(&self) -> &[Symbol] {
        &self.symbols
    }

    /// Symbol stored at position `index`.
    #[inline]
    pub fn get(&self, index: usize) -> Option<Symbol> {
        self.symbols.get(index).copied()
    }

    /// Position of `symbol`, or `None` if it is not a member.
    #[inline]
    pub fn index_of(&self, symbol: Symbol) -> Option<usize> {
        self.positions.get(symbol as usize).copied().flatten()
    }

    #[inline]
    pub fn contains(&self, symbol: Symbol) -> bool {
        self.index_of(symbol).is_some()
    }
}

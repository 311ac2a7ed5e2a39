//! String interning for identifiers and literals.
//!
//! Names flow through the whole pipeline (trees, IR instructions, scope
//! records), so they are deduplicated once and passed around as small
//! copyable symbols.

use rustc_hash::FxHashMap;
use std::num::NonZeroU32;

/// An interned string symbol (32-bit index).
///
/// Symbols are small (4 bytes) and can be copied cheaply.
/// Use `Interner::resolve()` to get the actual string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Symbol(NonZeroU32);

impl Symbol {
    #[inline]
    fn from_raw(raw: u32) -> Self {
        // NonZeroU32 cannot hold 0, so indices are stored shifted by one
        Symbol(NonZeroU32::new(raw + 1).unwrap())
    }

    #[inline]
    fn to_raw(self) -> usize {
        (self.0.get() - 1) as usize
    }

    /// Create a dummy symbol (for error messages and tests)
    #[inline]
    pub const fn dummy() -> Self {
        // SAFETY: 1 is non-zero
        Symbol(unsafe { NonZeroU32::new_unchecked(1) })
    }
}

/// String interner that deduplicates strings.
///
/// Strings are stored once and referred to by small integer symbols.
/// This reduces memory usage and makes string comparison O(1).
#[derive(Clone, Default)]
pub struct Interner {
    map: FxHashMap<String, Symbol>,
    strings: Vec<String>,
}

impl Interner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            map: FxHashMap::with_capacity_and_hasher(capacity, Default::default()),
            strings: Vec::with_capacity(capacity),
        }
    }

    /// Intern a string, returning its symbol.
    ///
    /// If the string was already interned, returns the existing symbol.
    /// Otherwise, allocates a new symbol and stores the string.
    pub fn intern(&mut self, s: &str) -> Symbol {
        if let Some(&sym) = self.map.get(s) {
            return sym;
        }

        let sym = Symbol::from_raw(self.strings.len() as u32);
        self.strings.push(s.to_string());
        self.map.insert(s.to_string(), sym);
        sym
    }

    /// Resolve a symbol back to its string.
    ///
    /// # Panics
    ///
    /// Panics if the symbol is invalid (not from this interner).
    #[inline]
    pub fn resolve(&self, sym: Symbol) -> &str {
        &self.strings[sym.to_raw()]
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intern_deduplicates() {
        let mut interner = Interner::new();

        let sym1 = interner.intern("each");
        let sym2 = interner.intern("map");
        let sym3 = interner.intern("each");

        assert_eq!(sym1, sym3);
        assert_ne!(sym1, sym2);
        assert_eq!(interner.len(), 2);
    }

    #[test]
    fn test_resolve() {
        let mut interner = Interner::new();
        let sym = interner.intern("StandardError");
        assert_eq!(interner.resolve(sym), "StandardError");
    }

    #[test]
    fn test_symbols_are_small() {
        assert_eq!(std::mem::size_of::<Symbol>(), 4);
        assert_eq!(std::mem::size_of::<Option<Symbol>>(), 4);
    }
}

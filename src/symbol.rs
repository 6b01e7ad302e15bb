/// Symbol interning
///
/// A `Symbol` is a process-wide interned identifier; two symbols are
/// equal iff they are the same interned entry (identity, not string
/// compare). Array-index property names (`"0"`, `"1"`, …) get a fast
/// path: the index is recoverable directly from the symbol without a
/// table lookup.

use std::collections::HashMap;
use once_cell::sync::Lazy;
use parking_lot::Mutex;

/// Sentinel for "no symbol" (absent property, empty slot).
pub const DUMMY: Symbol = Symbol(0);

const ARRAY_INDEX_TAG: u32 = 0x8000_0000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Symbol(u32);

impl Symbol {
    pub fn is_dummy(self) -> bool {
        self == DUMMY
    }

    /// True if this symbol directly encodes an array index (no string
    /// backing, no interner lookup needed).
    pub fn is_array_index(self) -> bool {
        self.0 & ARRAY_INDEX_TAG != 0
    }

    /// Panics if `!is_array_index()`.
    pub fn index(self) -> u32 {
        debug_assert!(self.is_array_index());
        self.0 & !ARRAY_INDEX_TAG
    }
}

struct Interner {
    strings: Vec<String>,
    ids: HashMap<String, u32>,
}

impl Interner {
    fn new() -> Self {
        // id 0 is reserved for DUMMY.
        Interner { strings: vec![String::new()], ids: HashMap::new() }
    }

    fn intern(&mut self, s: &str) -> Symbol {
        if let Some(idx) = array_index_of(s) {
            return Symbol(idx | ARRAY_INDEX_TAG);
        }
        if let Some(&id) = self.ids.get(s) {
            return Symbol(id);
        }
        let id = self.strings.len() as u32;
        self.strings.push(s.to_string());
        self.ids.insert(s.to_string(), id);
        Symbol(id)
    }

    fn resolve(&self, sym: Symbol) -> String {
        if sym.is_array_index() {
            return sym.index().to_string();
        }
        self.strings.get(sym.0 as usize).cloned().unwrap_or_default()
    }
}

/// A string is an array index iff it is "0" or a decimal literal with
/// no leading zero, fitting in u32.
fn array_index_of(s: &str) -> Option<u32> {
    if s == "0" {
        return Some(0);
    }
    if s.is_empty() || s.starts_with('0') || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse::<u32>().ok().filter(|&n| n != u32::MAX)
}

static INTERNER: Lazy<Mutex<Interner>> = Lazy::new(|| Mutex::new(Interner::new()));

pub fn intern(s: &str) -> Symbol {
    INTERNER.lock().intern(s)
}

pub fn resolve(sym: Symbol) -> String {
    INTERNER.lock().resolve(sym)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_is_idempotent() {
        let a = intern("length");
        let b = intern("length");
        assert_eq!(a, b);
    }

    #[test]
    fn distinct_strings_get_distinct_symbols() {
        assert_ne!(intern("foo_sym_test"), intern("bar_sym_test"));
    }

    #[test]
    fn array_indices_bypass_the_table() {
        let a = intern("42");
        let b = intern("42");
        assert_eq!(a, b);
        assert!(a.is_array_index());
        assert_eq!(a.index(), 42);
    }

    #[test]
    fn leading_zero_is_not_an_array_index() {
        let a = intern("042");
        assert!(!a.is_array_index());
    }
}

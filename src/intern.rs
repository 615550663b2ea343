//! Event-name interning.
//!
//! A trace has a handful of distinct event names repeated across millions of
//! lines. The first occurrence of a name is copied into the arena and given a
//! [`Sym`]; every later occurrence maps to the same symbol, so events compare
//! names by id instead of by string.
//!
//! # ID sequentiality
//!
//! Symbols are dense and assigned in first-seen order starting at 0, which
//! lets callers index side tables by `Sym::index()`.

use std::collections::HashMap;

use serde::Serialize;

use crate::arena::{Arena, ArenaError, StrRef};

/// Initial capacity for the name map. Real traces rarely carry more.
const INITIAL_NAME_CAPACITY: usize = 64;

/// Interned event name.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct Sym(u32);

impl Sym {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Maps event names to symbols and symbols back to arena strings.
#[derive(Debug)]
pub struct Interner {
    lookup: HashMap<Box<str>, Sym>,
    names: Vec<StrRef>,
}

impl Interner {
    pub fn new() -> Self {
        Self {
            lookup: HashMap::with_capacity(INITIAL_NAME_CAPACITY),
            names: Vec::with_capacity(INITIAL_NAME_CAPACITY),
        }
    }

    /// Get or create the symbol for `name`.
    ///
    /// Only the first occurrence allocates; it copies the name into `arena`.
    pub fn intern(&mut self, arena: &mut Arena, name: &str) -> Result<Sym, ArenaError> {
        if let Some(sym) = self.lookup.get(name) {
            return Ok(*sym);
        }
        let text = arena.alloc_str(name)?;
        let sym = Sym(self.names.len() as u32);
        self.names.push(text);
        self.lookup.insert(name.into(), sym);
        Ok(sym)
    }

    /// Symbol for `name` if it was ever interned.
    pub fn get(&self, name: &str) -> Option<Sym> {
        self.lookup.get(name).copied()
    }

    /// Arena string for a symbol.
    pub fn resolve(&self, sym: Sym) -> StrRef {
        self.names.get(sym.index()).copied().unwrap_or_default()
    }

    /// Number of distinct names.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// All symbols in first-seen order.
    pub fn symbols(&self) -> impl Iterator<Item = Sym> + '_ {
        (0..self.names.len() as u32).map(Sym)
    }
}

impl Default for Interner {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interner_sequential() {
        let mut arena = Arena::new(4096);
        let mut names = Interner::new();

        // First symbol should be 0
        assert_eq!(names.intern(&mut arena, "sched_switch").unwrap().index(), 0);
        // Second symbol should be 1
        assert_eq!(names.intern(&mut arena, "sched_wakeup").unwrap().index(), 1);
        // Looking up an existing name returns the same symbol
        assert_eq!(names.intern(&mut arena, "sched_switch").unwrap().index(), 0);
        assert_eq!(names.len(), 2);
    }

    #[test]
    fn test_interner_single_arena_copy() {
        let mut arena = Arena::new(4096);
        let mut names = Interner::new();

        let sym = names.intern(&mut arena, "cpu_idle").unwrap();
        let committed = arena.committed_bytes();
        for _ in 0..1000 {
            assert_eq!(names.intern(&mut arena, "cpu_idle").unwrap(), sym);
        }
        assert_eq!(arena.committed_bytes(), committed);
        assert_eq!(arena.str(names.resolve(sym)), "cpu_idle");
    }

    #[test]
    fn test_interner_get_unknown() {
        let names = Interner::new();
        assert_eq!(names.get("sched_switch"), None);
        assert!(names.is_empty());
    }
}

//! Append-only string table.
//!
//! Identifiers and string literals are interned once per bytecode module.
//! When several units are bundled into one module on different threads the
//! table is shared behind a [`SharedStringTable`].

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::sync::Arc;

/// Interned string id. Ids are dense and assigned in insertion order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StringId(pub u32);

/// An append-only table mapping strings to dense ids.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct StringTable {
    ids: FxHashMap<Box<str>, StringId>,
    strings: Vec<Box<str>>,
}

impl StringTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Interns `s`, returning the existing id when already present.
    pub fn intern(&mut self, s: &str) -> StringId {
        if let Some(&id) = self.ids.get(s) {
            return id;
        }
        let id = StringId(self.strings.len() as u32);
        self.strings.push(s.into());
        self.ids.insert(s.into(), id);
        id
    }

    /// Looks up an id without inserting.
    pub fn get(&self, s: &str) -> Option<StringId> {
        self.ids.get(s).copied()
    }

    /// Returns the string for `id`.
    pub fn resolve(&self, id: StringId) -> Option<&str> {
        self.strings.get(id.0 as usize).map(|s| &**s)
    }

    /// Number of interned strings.
    pub fn len(&self) -> usize {
        self.strings.len()
    }

    /// Returns true if nothing has been interned.
    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }

    /// Iterates strings in id order.
    pub fn iter(&self) -> impl Iterator<Item = (StringId, &str)> {
        self.strings
            .iter()
            .enumerate()
            .map(|(i, s)| (StringId(i as u32), &**s))
    }
}

/// Anything strings can be interned into while emitting bytecode.
pub trait Interner {
    fn intern(&mut self, s: &str) -> StringId;
}

impl Interner for StringTable {
    fn intern(&mut self, s: &str) -> StringId {
        StringTable::intern(self, s)
    }
}

impl Interner for &SharedStringTable {
    fn intern(&mut self, s: &str) -> StringId {
        SharedStringTable::intern(self, s)
    }
}

/// A string table shared between compilation threads.
#[derive(Debug, Default, Clone)]
pub struct SharedStringTable {
    inner: Arc<RwLock<StringTable>>,
}

impl SharedStringTable {
    /// Creates an empty shared table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Interns `s` under the write lock. Readers take the fast path.
    pub fn intern(&self, s: &str) -> StringId {
        if let Some(id) = self.inner.read().get(s) {
            return id;
        }
        self.inner.write().intern(s)
    }

    /// Copies the current contents out.
    pub fn snapshot(&self) -> StringTable {
        self.inner.read().clone()
    }

    /// Number of interned strings.
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    /// Returns true if nothing has been interned.
    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intern_dedupes() {
        let mut table = StringTable::new();
        let a = table.intern("print");
        let b = table.intern("arguments");
        let c = table.intern("print");
        assert_eq!(a, c);
        assert_ne!(a, b);
        assert_eq!(table.len(), 2);
        assert_eq!(table.resolve(b), Some("arguments"));
    }

    #[test]
    fn test_tables_compare_by_contents() {
        let mut a = StringTable::new();
        let mut b = StringTable::new();
        a.intern("x");
        b.intern("x");
        assert_eq!(a, b);
        b.intern("y");
        assert_ne!(a, b);
    }

    #[test]
    fn test_ids_are_dense() {
        let mut table = StringTable::new();
        for (i, s) in ["a", "b", "c"].iter().enumerate() {
            assert_eq!(table.intern(s), StringId(i as u32));
        }
        let collected: Vec<_> = table.iter().map(|(_, s)| s.to_string()).collect();
        assert_eq!(collected, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_shared_table_across_threads() {
        let shared = SharedStringTable::new();
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let shared = shared.clone();
                std::thread::spawn(move || {
                    for name in ["x", "y", "z"] {
                        shared.intern(name);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(shared.len(), 3);
    }
}

//! Handle registry: slab-managed indices over an associative payload store.

use rustc_hash::FxHashMap;

use crate::slab::Slab;

/// A `handle -> T` table with dense, reusable handles.
///
/// The slab manages index allocation; payloads live in a hash map keyed by
/// index. Payload types are cheap clones (`Arc`s and small enums) so `get`
/// hands back an owned copy and the caller never holds the registry lock
/// while running user code.
///
/// Lookups of stale or never-allocated handles panic: in correct usage the
/// foreign side only echoes handles the host gave it, so a miss is a fatal
/// programming error rather than a recoverable condition.
#[derive(Debug)]
pub(crate) struct Registry<T> {
    slab: Slab,
    entries: FxHashMap<usize, T>,
}

impl<T: Clone> Registry<T> {
    pub fn new() -> Self {
        Registry {
            slab: Slab::new(),
            entries: FxHashMap::default(),
        }
    }

    /// Store a payload and return its handle.
    pub fn insert(&mut self, value: T) -> usize {
        let handle = self.slab.allocate();
        self.entries.insert(handle, value);
        handle
    }

    /// Copy out the payload for a live handle.
    pub fn get(&self, handle: usize) -> T {
        match self.entries.get(&handle) {
            Some(value) => value.clone(),
            None => panic!("registry lookup of stale handle {handle}"),
        }
    }

    /// Release a handle, returning its payload and recycling the index.
    pub fn remove(&mut self, handle: usize) -> T {
        match self.entries.remove(&handle) {
            Some(value) => {
                self.slab.deallocate(handle);
                value
            }
            None => panic!("registry removal of stale handle {handle}"),
        }
    }

    /// Whether a handle currently names an entry.
    #[cfg(test)]
    pub fn contains(&self, handle: usize) -> bool {
        self.entries.contains_key(&handle)
    }

    /// Number of live entries.
    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

impl<T: Clone> Default for Registry<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let mut registry = Registry::new();
        let a = registry.insert("alpha");
        let b = registry.insert("beta");
        assert_eq!(registry.get(a), "alpha");
        assert_eq!(registry.get(b), "beta");
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_remove_recycles_handle() {
        let mut registry = Registry::new();
        let a = registry.insert(1);
        let _b = registry.insert(2);
        assert_eq!(registry.remove(a), 1);
        assert!(!registry.contains(a));
        // The freed index is the smallest free one, so it comes back.
        let c = registry.insert(3);
        assert_eq!(c, a);
        assert_eq!(registry.get(c), 3);
    }

    #[test]
    #[should_panic(expected = "stale handle")]
    fn test_get_after_remove_panics() {
        let mut registry = Registry::new();
        let handle = registry.insert(7);
        registry.remove(handle);
        registry.get(handle);
    }

    #[test]
    #[should_panic(expected = "stale handle")]
    fn test_remove_twice_panics() {
        let mut registry = Registry::new();
        let handle = registry.insert(7);
        registry.remove(handle);
        registry.remove(handle);
    }
}

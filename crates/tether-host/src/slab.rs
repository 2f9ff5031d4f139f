//! Dense free-list index allocator backing every handle registry.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

/// Allocates small reusable indices over a dense slot array.
///
/// `allocate` always returns the smallest currently-free index, so an index
/// released by one owner is handed to the next allocation before the slot
/// array grows. The slab itself is not synchronized; each registry guards
/// its slab behind the registry lock.
#[derive(Debug, Default)]
pub(crate) struct Slab {
    /// Slot states; `used[i]` is true while index `i` is live.
    used: Vec<bool>,
    /// Min-heap of freed indices below the high-water mark.
    free: BinaryHeap<Reverse<usize>>,
}

impl Slab {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the smallest free index and mark it live.
    pub fn allocate(&mut self) -> usize {
        if let Some(Reverse(index)) = self.free.pop() {
            self.used[index] = true;
            return index;
        }
        self.used.push(true);
        self.used.len() - 1
    }

    /// Release a live index for reuse.
    ///
    /// Panics if the index is not currently allocated; double-free of a
    /// handle is a logic defect, not a recoverable condition.
    pub fn deallocate(&mut self, index: usize) {
        if self.used.get(index) != Some(&true) {
            panic!("deallocated slab index {index} that was not allocated");
        }
        self.used[index] = false;
        self.free.push(Reverse(index));
    }

    /// Number of live indices.
    #[cfg(test)]
    pub fn live(&self) -> usize {
        self.used.len() - self.free.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_sequential() {
        let mut slab = Slab::new();
        assert_eq!(slab.allocate(), 0);
        assert_eq!(slab.allocate(), 1);
        assert_eq!(slab.allocate(), 2);
        assert_eq!(slab.live(), 3);
    }

    #[test]
    fn test_smallest_free_reuse() {
        let mut slab = Slab::new();
        for _ in 0..4 {
            slab.allocate();
        }
        slab.deallocate(2);
        slab.deallocate(0);
        // Both 0 and 2 are free; the smaller one comes back first.
        assert_eq!(slab.allocate(), 0);
        assert_eq!(slab.allocate(), 2);
        // Free list drained, so the array grows.
        assert_eq!(slab.allocate(), 4);
    }

    #[test]
    fn test_no_duplicate_live_indices() {
        let mut slab = Slab::new();
        let mut live = std::collections::HashSet::new();
        for _ in 0..16 {
            assert!(live.insert(slab.allocate()));
        }
        for index in [3, 7, 11] {
            slab.deallocate(index);
            live.remove(&index);
        }
        for _ in 0..6 {
            assert!(live.insert(slab.allocate()));
        }
        assert_eq!(slab.live(), live.len());
    }

    #[test]
    #[should_panic(expected = "was not allocated")]
    fn test_deallocate_unallocated_panics() {
        let mut slab = Slab::new();
        slab.allocate();
        slab.deallocate(5);
    }

    #[test]
    #[should_panic(expected = "was not allocated")]
    fn test_double_deallocate_panics() {
        let mut slab = Slab::new();
        let index = slab.allocate();
        slab.deallocate(index);
        slab.deallocate(index);
    }
}

//! Expiration Queue Module
//!
//! Binary min-heap of dispose records ordered by absolute expiry instant.
//!
//! Records live in a slot arena so that each one keeps a stable
//! [`ExpirationHandle`] while the heap reorders them. The heap itself is a
//! vector of slot indices and every slot remembers its current heap position,
//! which is what makes `remove` and `update` O(log n) instead of a scan.

use std::mem;
use std::time::Instant;

/// Heap position marking a free slot.
const VACANT: usize = usize::MAX;

// == Expiration Handle ==
/// Stable reference to a record in an [`ExpirationQueue`].
///
/// A handle stays valid until its record is popped or removed. Afterwards the
/// slot may be reused, so owners must drop the handle at that point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExpirationHandle(usize);

#[derive(Debug)]
struct Slot {
    key: String,
    dispose_at: Instant,
    heap_index: usize,
}

// == Expiration Queue ==
#[derive(Debug, Default)]
pub struct ExpirationQueue {
    slots: Vec<Slot>,
    free_list: Vec<usize>,
    /// Slot indices in heap order
    heap: Vec<usize>,
}

impl ExpirationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    // == Push ==
    /// Inserts a dispose record and returns its handle.
    pub fn push(&mut self, key: String, dispose_at: Instant) -> ExpirationHandle {
        let heap_index = self.heap.len();
        let slot = Slot {
            key,
            dispose_at,
            heap_index,
        };
        let idx = match self.free_list.pop() {
            Some(idx) => {
                self.slots[idx] = slot;
                idx
            }
            None => {
                self.slots.push(slot);
                self.slots.len() - 1
            }
        };
        self.heap.push(idx);
        self.sift_up(heap_index);
        ExpirationHandle(idx)
    }

    // == Peek Min ==
    /// Returns the record with the earliest dispose instant.
    pub fn peek_min(&self) -> Option<(&str, Instant)> {
        self.heap.first().map(|&idx| {
            let slot = &self.slots[idx];
            (slot.key.as_str(), slot.dispose_at)
        })
    }

    // == Pop Min ==
    /// Removes and returns the record with the earliest dispose instant.
    pub fn pop_min(&mut self) -> Option<(String, Instant)> {
        let idx = *self.heap.first()?;
        self.remove(ExpirationHandle(idx))
    }

    // == Pop Due ==
    /// Pops every record due at or before `now`, earliest first.
    pub fn pop_due(&mut self, now: Instant) -> Vec<String> {
        let mut due = Vec::new();
        while let Some(dispose_at) = self.min_dispose_at() {
            if dispose_at > now {
                break;
            }
            if let Some((key, _)) = self.pop_min() {
                due.push(key);
            }
        }
        due
    }

    // == Remove ==
    /// Removes the record behind `handle`, wherever it sits in the heap.
    ///
    /// Returns None if the handle no longer refers to a live record.
    pub fn remove(&mut self, handle: ExpirationHandle) -> Option<(String, Instant)> {
        let pos = self.position(handle)?;
        let last = self.heap.len() - 1;
        if pos != last {
            self.swap(pos, last);
        }
        self.heap.pop();
        if pos < self.heap.len() {
            self.fix(pos);
        }

        let slot = &mut self.slots[handle.0];
        slot.heap_index = VACANT;
        self.free_list.push(handle.0);
        Some((mem::take(&mut slot.key), slot.dispose_at))
    }

    // == Update ==
    /// Moves the record behind `handle` to a new dispose instant and restores
    /// heap order from its position.
    ///
    /// Returns false if the handle no longer refers to a live record.
    pub fn update(&mut self, handle: ExpirationHandle, dispose_at: Instant) -> bool {
        match self.position(handle) {
            Some(pos) => {
                self.slots[handle.0].dispose_at = dispose_at;
                self.fix(pos);
                true
            }
            None => false,
        }
    }

    /// Returns the earliest dispose instant in the queue.
    pub fn min_dispose_at(&self) -> Option<Instant> {
        self.peek_min().map(|(_, dispose_at)| dispose_at)
    }

    /// Returns the dispose instant recorded for `handle`.
    pub fn dispose_at(&self, handle: ExpirationHandle) -> Option<Instant> {
        self.position(handle).map(|_| self.slots[handle.0].dispose_at)
    }

    /// Drops every record. Outstanding handles become invalid.
    pub fn clear(&mut self) {
        self.slots.clear();
        self.free_list.clear();
        self.heap.clear();
    }

    /// Checks heap order and position bookkeeping.
    pub fn is_consistent(&self) -> bool {
        let ordered = (1..self.heap.len()).all(|i| self.at(parent(i)) <= self.at(i));
        let indexed = self
            .heap
            .iter()
            .enumerate()
            .all(|(pos, &idx)| self.slots[idx].heap_index == pos);
        let live = self
            .slots
            .iter()
            .filter(|slot| slot.heap_index != VACANT)
            .count();
        ordered && indexed && live == self.heap.len()
    }

    // == Heap Internals ==

    fn position(&self, handle: ExpirationHandle) -> Option<usize> {
        self.slots
            .get(handle.0)
            .map(|slot| slot.heap_index)
            .filter(|&pos| pos != VACANT)
    }

    fn at(&self, pos: usize) -> Instant {
        self.slots[self.heap[pos]].dispose_at
    }

    fn swap(&mut self, a: usize, b: usize) {
        self.heap.swap(a, b);
        self.slots[self.heap[a]].heap_index = a;
        self.slots[self.heap[b]].heap_index = b;
    }

    /// Re-sifts `pos` in whichever direction its key requires.
    fn fix(&mut self, pos: usize) {
        if pos > 0 && self.at(pos) < self.at(parent(pos)) {
            self.sift_up(pos);
        } else {
            self.sift_down(pos);
        }
    }

    fn sift_up(&mut self, mut pos: usize) {
        while pos > 0 {
            let up = parent(pos);
            if self.at(up) <= self.at(pos) {
                break;
            }
            self.swap(pos, up);
            pos = up;
        }
    }

    fn sift_down(&mut self, mut pos: usize) {
        let len = self.heap.len();
        loop {
            let left = 2 * pos + 1;
            if left >= len {
                break;
            }
            let right = left + 1;
            let child = if right < len && self.at(right) < self.at(left) {
                right
            } else {
                left
            };
            if self.at(pos) <= self.at(child) {
                break;
            }
            self.swap(pos, child);
            pos = child;
        }
    }
}

fn parent(pos: usize) -> usize {
    (pos - 1) / 2
}

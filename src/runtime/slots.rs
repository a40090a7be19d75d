//! Fixed-capacity client slot table.
//!
//! Each slot is either vacant or holds the handle of the connection being
//! served from it. New connections take the lowest vacant index. The
//! dispatcher and every worker share one table behind a single lock; no
//! I/O happens while it is held.

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Returned by [`SlotTable::register`] when every slot is occupied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotTableFull;

impl std::fmt::Display for SlotTableFull {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "client slot table is full")
    }
}

impl std::error::Error for SlotTableFull {}

/// Table of `capacity` slots mapping slot index to a connection handle.
pub struct SlotTable<H> {
    slots: Mutex<Vec<Option<H>>>,
}

impl<H: Clone> SlotTable<H> {
    /// Create a table with `capacity` vacant slots.
    pub fn new(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self {
            slots: Mutex::new(slots),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Option<H>>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Place `handle` in the first vacant slot.
    pub fn register(&self, handle: H) -> Result<usize, SlotTableFull> {
        let mut slots = self.lock();
        let idx = slots
            .iter()
            .position(Option::is_none)
            .ok_or(SlotTableFull)?;
        slots[idx] = Some(handle);
        Ok(idx)
    }

    /// Mark a slot vacant, returning its previous occupant.
    ///
    /// Releasing a vacant or out-of-range slot is a no-op.
    pub fn release(&self, idx: usize) -> Option<H> {
        self.lock().get_mut(idx).and_then(Option::take)
    }

    /// Handle occupying `idx`, if any.
    pub fn get(&self, idx: usize) -> Option<H> {
        self.lock().get(idx).and_then(Clone::clone)
    }

    /// Occupied slots in index order.
    pub fn occupied(&self) -> Vec<(usize, H)> {
        self.lock()
            .iter()
            .enumerate()
            .filter_map(|(idx, slot)| slot.as_ref().map(|h| (idx, h.clone())))
            .collect()
    }

    /// Vacate every slot, returning the former occupants in index order.
    pub fn drain(&self) -> Vec<(usize, H)> {
        self.lock()
            .iter_mut()
            .enumerate()
            .filter_map(|(idx, slot)| slot.take().map(|h| (idx, h)))
            .collect()
    }

    /// Number of occupied slots.
    #[cfg(test)]
    pub fn in_use(&self) -> usize {
        self.lock().iter().filter(|s| s.is_some()).count()
    }

    #[cfg(test)]
    pub fn capacity(&self) -> usize {
        self.lock().len()
    }
}

//! Bounded FIFO record of recently computed digests.
//!
//! The cache is observational only: workers append (text, digest) pairs as
//! they complete and nothing ever looks an entry up to answer a request.
//! When full, the oldest entry is evicted before a new one is appended.
//! A capacity of zero disables recording entirely.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, trace};

/// A single recorded digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// Raw request text, not necessarily UTF-8.
    pub text: Vec<u8>,
    pub digest: String,
}

/// Thread-safe bounded FIFO of digest results.
pub struct DigestCache {
    entries: Mutex<VecDeque<CacheEntry>>,
    capacity: usize,
}

impl DigestCache {
    /// Create a new cache holding at most `capacity` entries.
    ///
    /// Storage grows with use, so a large bound costs nothing up front.
    pub fn new(capacity: usize) -> Arc<Self> {
        info!(capacity, enabled = capacity > 0, "Initializing digest cache");
        Arc::new(Self {
            entries: Mutex::new(VecDeque::new()),
            capacity,
        })
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<CacheEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append an entry, evicting the oldest one first if at capacity.
    pub fn insert(&self, text: Vec<u8>, digest: String) {
        if self.capacity == 0 {
            return;
        }

        let mut entries = self.lock();
        if entries.len() >= self.capacity {
            if let Some(evicted) = entries.pop_front() {
                trace!(
                    text = %String::from_utf8_lossy(&evicted.text),
                    "Evicted oldest cache entry"
                );
            }
        }
        entries.push_back(CacheEntry { text, digest });
    }

    /// Remove every entry. Returns how many were dropped.
    pub fn clear(&self) -> usize {
        let drained = std::mem::take(&mut *self.lock());
        debug!(count = drained.len(), "Cache cleared");
        drained.len()
    }

    /// Copy of the current contents, oldest first.
    pub fn snapshot(&self) -> Vec<CacheEntry> {
        self.lock().iter().cloned().collect()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

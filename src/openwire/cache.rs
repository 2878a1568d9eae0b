//! # Reference Cache
//!
//! Session-scoped tables that let the encoder send a repeated sub-structure
//! as a two-byte index instead of a full encoding.
//!
//! The encoder owns a [`MarshalCache`] and the decoder an [`UnmarshalCache`].
//! The encoder assigns indices in the order it first visits each structure
//! and transmits the index next to the full encoding; the decoder stores the
//! structure at that index. Both sides must hold the same entry at the same
//! index at every point in the stream. A miss on the decode side means the
//! peers diverged and the session cannot continue.
//!
//! Lookups are by `Arc` identity, not by value.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::trace;

use crate::error::{ProtocolError, Result};
use crate::openwire::command::StructureRef;

/// Upper bound on negotiated cache sizes
pub const MAX_CACHE_SIZE: usize = (i16::MAX as usize) / 2;

/// Default number of cache slots
pub const DEFAULT_CACHE_SIZE: usize = 1024;

/// Slots kept free by the eviction sweep that runs before each frame
pub const CACHE_FREE_SPACE: usize = 100;

/// Index written on the wire when a structure could not be cached
pub const NOT_CACHED: i16 = -1;

#[inline]
fn identity(structure: &StructureRef) -> usize {
    Arc::as_ptr(structure) as usize
}

/// Encode-side arena
#[derive(Debug)]
pub struct MarshalCache {
    /// Holds each cached `Arc` so its address stays unique while indexed
    slots: Vec<Option<StructureRef>>,
    index: HashMap<usize, i16>,
    next_index: usize,
    next_eviction: usize,
}

impl MarshalCache {
    pub fn new(size: usize) -> Self {
        let size = size.clamp(1, MAX_CACHE_SIZE);
        Self {
            slots: vec![None; size],
            index: HashMap::new(),
            next_index: 0,
            next_eviction: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Index previously assigned to this exact instance
    pub fn index_of(&self, structure: &StructureRef) -> Option<i16> {
        self.index.get(&identity(structure)).copied()
    }

    /// Assign the next sequential index to `structure`.
    ///
    /// Returns [`NOT_CACHED`] when every slot is occupied; the decoder skips
    /// storing such structures.
    pub fn put(&mut self, structure: &StructureRef) -> i16 {
        if self.index.len() >= self.slots.len() {
            return NOT_CACHED;
        }
        let slot = self.next_index;
        self.next_index = (self.next_index + 1) % self.slots.len();
        if let Some(old) = self.slots[slot].take() {
            self.index.remove(&identity(&old));
        }
        self.slots[slot] = Some(Arc::clone(structure));
        self.index.insert(identity(structure), slot as i16);
        trace!(index = slot, "Cached structure for marshalling");
        slot as i16
    }

    /// Evict oldest entries until at least [`CACHE_FREE_SPACE`] slots are free
    /// (or the cache is empty, for caches smaller than that).
    pub fn evict_sweep(&mut self) {
        let limit = self.slots.len().saturating_sub(CACHE_FREE_SPACE);
        while self.index.len() > limit {
            if let Some(old) = self.slots[self.next_eviction].take() {
                self.index.remove(&identity(&old));
            }
            self.next_eviction = (self.next_eviction + 1) % self.slots.len();
        }
    }

    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|slot| *slot = None);
        self.index.clear();
        self.next_index = 0;
        self.next_eviction = 0;
    }
}

/// Decode-side arena
#[derive(Debug)]
pub struct UnmarshalCache {
    slots: Vec<Option<StructureRef>>,
}

impl UnmarshalCache {
    pub fn new(size: usize) -> Self {
        Self {
            slots: vec![None; size.clamp(1, MAX_CACHE_SIZE)],
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Store a freshly decoded structure at the encoder-assigned index
    pub fn set(&mut self, index: i16, structure: StructureRef) -> Result<()> {
        if index == NOT_CACHED {
            return Ok(());
        }
        let slot = usize::try_from(index)
            .ok()
            .and_then(|i| self.slots.get_mut(i))
            .ok_or(ProtocolError::CacheDesync(index))?;
        *slot = Some(structure);
        Ok(())
    }

    /// Structure previously stored at `index`
    pub fn get(&self, index: i16) -> Result<StructureRef> {
        usize::try_from(index)
            .ok()
            .and_then(|i| self.slots.get(i))
            .and_then(Option::clone)
            .ok_or(ProtocolError::CacheDesync(index))
    }

    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|slot| *slot = None);
    }
}

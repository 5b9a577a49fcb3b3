//! The allocation table.
//!
//! A [`Registry`] is an append-only table of [`AllocationRecord`]s with a fixed
//! number of slots. Slots are handed out in order and never reused: freeing an
//! allocation only clears the record's address to the [`FREED`] sentinel. Once
//! every slot has been used, further allocations are counted as `untracked`
//! and otherwise ignored.
//!
//! Lookup by address goes through an index of live slots, kept in ascending
//! slot order per address, so that when the same address is live in more
//! than one record (which a real allocator never does, but a confused host
//! can make us believe) the oldest record is the one that gets released.

use ahash::RandomState;
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use crate::{error::RegistryFull, origin::Origin};

/// Address value marking a freed record.
pub const FREED: usize = 0;

/// How many allocations a default registry can track.
pub const DEFAULT_CAPACITY: usize = 1000;

/// One allocation we have seen.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AllocationRecord {
    /// Where the allocation lives, or [`FREED`]
    pub address: usize,
    /// How many bytes were asked for
    pub size: usize,
    /// Who asked for them
    pub origin: Origin,
}

impl AllocationRecord {
    pub const fn is_live(&self) -> bool {
        self.address != FREED
    }
}

/// Running totals over every tracked operation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    pub allocations: usize,
    pub frees: usize,
    pub total_allocated: usize,
    pub total_freed: usize,
    /// Allocations that arrived after the table filled up
    pub untracked: usize,
}

impl Stats {
    /// Bytes allocated but never freed. `None` if more was freed than was
    /// ever allocated, which means the bookkeeping is broken.
    pub fn leaked(&self) -> Option<usize> {
        self.total_allocated.checked_sub(self.total_freed)
    }
}

pub struct Registry {
    slots: Vec<AllocationRecord>,
    capacity: usize,
    /// address -> live slots holding it, oldest first
    live: HashMap<usize, Vec<usize>, RandomState>,
    stats: Stats,
}

impl Registry {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// A registry with room for `capacity` records. Slots are allocated as
    /// they are used, so `usize::MAX` means unbounded.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity.min(DEFAULT_CAPACITY)),
            capacity,
            live: HashMap::with_hasher(RandomState::new()),
            stats: Stats::default(),
        }
    }

    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// The next unused slot. Only ever grows.
    pub fn next_slot(&self) -> usize {
        self.slots.len()
    }

    pub fn is_full(&self) -> bool {
        self.next_slot() >= self.capacity
    }

    pub const fn stats(&self) -> Stats {
        self.stats
    }

    /// Store a new allocation, returning the slot it went into.
    ///
    /// `address` must not be [`FREED`]; the tracker never records a failed
    /// allocation.
    pub fn record(
        &mut self,
        address: usize,
        size: usize,
        origin: Origin,
    ) -> Result<usize, RegistryFull> {
        debug_assert_ne!(address, FREED, "null allocations are never recorded");
        if self.is_full() {
            self.stats.untracked += 1;
            return Err(RegistryFull {
                capacity: self.capacity,
            });
        }

        let slot = self.slots.len();
        log::trace!("record {address:#x} ({size} bytes) from {origin} in slot {slot}");
        self.slots.push(AllocationRecord {
            address,
            size,
            origin,
        });
        self.live.entry(address).or_default().push(slot);
        self.stats.allocations += 1;
        self.stats.total_allocated += size;
        Ok(slot)
    }

    /// Mark the oldest live record for `address` as freed and return a copy of
    /// it as it was before. `None` if nothing live has that address (including
    /// `address == FREED`).
    pub fn release(&mut self, address: usize) -> Option<AllocationRecord> {
        if address == FREED {
            return None;
        }
        let slots = self.live.get_mut(&address)?;
        let slot = slots.remove(0);
        if slots.is_empty() {
            self.live.remove(&address);
        }

        let record = &mut self.slots[slot];
        let released = record.clone();
        record.address = FREED;
        self.stats.frees += 1;
        self.stats.total_freed += released.size;
        log::trace!(
            "release {address:#x} ({} bytes) from slot {slot}",
            released.size
        );
        Some(released)
    }

    /// Is there a live record for `address`?
    pub fn is_live(&self, address: usize) -> bool {
        address != FREED && self.live.contains_key(&address)
    }

    /// Every used slot, in slot order, freed ones included.
    pub fn iter(&self) -> impl Iterator<Item = &AllocationRecord> + '_ {
        self.slots.iter()
    }

    /// Records that have not been freed, in slot order.
    pub fn live(&self) -> impl Iterator<Item = &AllocationRecord> + '_ {
        self.slots.iter().filter(|r| r.is_live())
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

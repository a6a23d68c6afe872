//! # Entity Management
//!
//! Entities are bare `u32` indices into every column of a world. They carry
//! no generation counter: an id is only handed out again after its removal
//! has been committed, so a live id always names one logical entity.
//!
//! Removal is two-phase. [`EntityAllocator::request_removal`] marks an id
//! as pending; the id stays live (and keeps its components) until
//! [`EntityAllocator::take_pending`] is called at the commit point.

use super::bitset::BitSet;

/// Identifier of an entity within one world.
pub type EntityId = u32;

/// Issues and recycles entity ids within a fixed capacity.
#[derive(Clone, Debug)]
pub struct EntityAllocator {
    /// Ids currently allocated, pending removal included.
    live: BitSet,
    /// Ids whose removal has been requested but not committed.
    pending: BitSet,
    /// Pending ids in request order.
    pending_order: Vec<EntityId>,
    /// Committed ids available for reuse, in release order. May hold
    /// stale entries for ids claimed since; `free_set` is authoritative.
    free: Vec<EntityId>,
    /// Membership of the free pool.
    free_set: BitSet,
    /// Next never-issued id.
    high_water: usize,
    /// Maximum number of ids.
    capacity: usize,
}

impl EntityAllocator {
    /// Creates an allocator for ids in `0..capacity`.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            live: BitSet::new(capacity),
            pending: BitSet::new(capacity),
            pending_order: Vec::new(),
            free: Vec::new(),
            free_set: BitSet::new(capacity),
            high_water: 0,
            capacity,
        }
    }

    /// Returns the id capacity.
    #[inline]
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of live ids, pending removals included.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.live.count_ones()
    }

    /// Returns `true` if no id is live.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.live.none()
    }

    /// Number of removals waiting for the commit point.
    #[inline]
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending_order.len()
    }

    /// Returns `true` if there is room for another id without growing.
    #[inline]
    #[must_use]
    pub fn has_room(&self) -> bool {
        !self.free_set.none() || self.high_water < self.capacity
    }

    /// Number of ids that can be allocated without growing.
    #[inline]
    #[must_use]
    pub fn available(&self) -> usize {
        self.free_set.count_ones() + (self.capacity - self.high_water)
    }

    /// Allocates an id. Recycled ids are preferred over fresh ones.
    ///
    /// Returns `None` when the capacity is exhausted.
    pub fn allocate(&mut self) -> Option<EntityId> {
        let id = match self.pop_free() {
            Some(id) => id,
            None if self.high_water < self.capacity => {
                let id = self.high_water as EntityId;
                self.high_water += 1;
                id
            }
            None => return None,
        };
        self.live.insert(id as usize);
        Some(id)
    }

    /// Allocates exactly `id` if it is not live.
    ///
    /// Fresh ids skipped over on the way are put in the free pool. Returns
    /// `false` if `id` is already live or outside the capacity.
    pub fn claim(&mut self, id: EntityId) -> bool {
        let index = id as usize;
        if index >= self.capacity || self.live.contains(index) {
            return false;
        }
        if index < self.high_water {
            if !self.free_set.remove(index) {
                return false;
            }
            if self.free.len() > 2 * self.free_set.count_ones() {
                let free_set = &self.free_set;
                self.free.retain(|&f| free_set.contains(f as usize));
            }
        } else {
            for skipped in (self.high_water..index).rev() {
                self.free.push(skipped as EntityId);
                self.free_set.insert(skipped);
            }
            self.high_water = index + 1;
        }
        self.live.insert(index);
        true
    }

    fn pop_free(&mut self) -> Option<EntityId> {
        while let Some(id) = self.free.pop() {
            if self.free_set.remove(id as usize) {
                return Some(id);
            }
        }
        None
    }

    /// Returns `true` if `id` is allocated (pending removal included).
    #[inline]
    #[must_use]
    pub fn is_alive(&self, id: EntityId) -> bool {
        self.live.contains(id as usize)
    }

    /// Returns `true` if `id` has a removal pending.
    #[inline]
    #[must_use]
    pub fn is_pending(&self, id: EntityId) -> bool {
        self.pending.contains(id as usize)
    }

    /// Marks a live id for removal at the next commit point.
    ///
    /// Returns `Some(true)` if newly marked, `Some(false)` if it was already
    /// pending and `None` if the id is not live.
    pub fn request_removal(&mut self, id: EntityId) -> Option<bool> {
        if !self.is_alive(id) {
            return None;
        }
        if self.pending.insert(id as usize) {
            self.pending_order.push(id);
            Some(true)
        } else {
            Some(false)
        }
    }

    /// Frees every pending id and returns them in request order.
    pub fn take_pending(&mut self) -> Vec<EntityId> {
        let removed = std::mem::take(&mut self.pending_order);
        for &id in &removed {
            self.pending.remove(id as usize);
            self.live.remove(id as usize);
            self.free.push(id);
            self.free_set.insert(id as usize);
        }
        removed
    }

    /// Iterates live ids in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.live.iter().map(|i| i as EntityId)
    }

    /// Raises the capacity. Existing ids are unaffected.
    pub fn grow(&mut self, capacity: usize) {
        debug_assert!(capacity >= self.capacity);
        self.live.resize(capacity);
        self.pending.resize(capacity);
        self.free_set.resize(capacity);
        self.capacity = capacity;
    }

    /// Forgets every id, keeping the capacity.
    pub fn reset(&mut self) {
        self.live.clear();
        self.pending.clear();
        self.pending_order.clear();
        self.free.clear();
        self.free_set.clear();
        self.high_water = 0;
    }
}

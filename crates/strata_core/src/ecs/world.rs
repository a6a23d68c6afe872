//! # ECS World
//!
//! The container for one isolated universe of entities: the id allocator,
//! every registered component store, the compiled queries and the
//! remote-id table used by mapped deserialization.
//!
//! All storage is allocated up front for the world's capacity. What
//! happens when the capacity is reached is fixed at creation by the
//! world's [`CapacityPolicy`].
//!
//! # Example
//!
//! ```rust
//! use strata_core::{define_component, define_query, FieldType, Schema, World, WorldConfig};
//!
//! let position = define_component(Schema::object([
//!     ("x", Schema::from(FieldType::F32)),
//!     ("y", Schema::from(FieldType::F32)),
//! ]));
//! let mut world = World::with_config(WorldConfig::fixed(10)).unwrap();
//! let a = world.add_entity().unwrap();
//! let b = world.add_entity().unwrap();
//! world.add_component(&position, a).unwrap();
//! world.add_component(&position, b).unwrap();
//! world.set::<f32>(&position, "x", b, 3.0).unwrap();
//!
//! let query = define_query([&position]);
//! assert_eq!(query.run(&mut world).unwrap(), vec![a, b]);
//! world.remove_component(&position, a).unwrap();
//! assert_eq!(query.run(&mut world).unwrap(), vec![b]);
//! ```

use std::collections::{HashMap, HashSet};

use tracing::{debug, trace};

use super::component::{ComponentDef, FieldType};
use super::entity::{EntityAllocator, EntityId};
use super::query::{Query, QueryState, Term};
use super::storage::{Column, ComponentStore, Primitive};
use crate::config::{default_config, CapacityPolicy, WorldConfig};
use crate::error::{EcsError, EcsResult};

/// Maximum number of components registered in one world.
pub const MAX_COMPONENTS: usize = 64;

/// An isolated universe of entities, components and queries.
pub struct World {
    config: WorldConfig,
    capacity: usize,
    entities: EntityAllocator,
    /// Stores in registration order; position is the component index.
    stores: Vec<ComponentStore>,
    /// Definition id to store index.
    store_lookup: HashMap<u64, usize>,
    /// Compiled queries, parallel to `query_ids`.
    queries: Vec<QueryState>,
    query_ids: Vec<u64>,
    /// Query id to position in `queries`.
    query_lookup: HashMap<u64, usize>,
    /// Per store index, the queries to notify.
    watchers: Vec<Vec<u64>>,
    remote_to_local: HashMap<EntityId, EntityId>,
    local_to_remote: HashMap<EntityId, EntityId>,
}

impl World {
    /// Creates a world from the process-wide default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::build(default_config())
    }

    /// Creates a world from an explicit configuration.
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::InvalidConfig`] if the configuration fails
    /// validation.
    pub fn with_config(config: WorldConfig) -> EcsResult<Self> {
        config.validate()?;
        Ok(Self::build(config))
    }

    /// Creates a fixed-capacity world.
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::InvalidConfig`] if `capacity` is zero or too large.
    pub fn with_capacity(capacity: usize) -> EcsResult<Self> {
        Self::with_config(WorldConfig::fixed(capacity))
    }

    fn build(config: WorldConfig) -> Self {
        let capacity = config.default_size;
        debug!(capacity, policy = ?config.capacity_policy, "world created");
        Self {
            config,
            capacity,
            entities: EntityAllocator::new(capacity),
            stores: Vec::new(),
            store_lookup: HashMap::new(),
            queries: Vec::new(),
            query_ids: Vec::new(),
            query_lookup: HashMap::new(),
            watchers: Vec::new(),
            remote_to_local: HashMap::new(),
            local_to_remote: HashMap::new(),
        }
    }

    /// The configuration captured at creation.
    #[inline]
    #[must_use]
    pub const fn config(&self) -> &WorldConfig {
        &self.config
    }

    /// Current entity capacity.
    #[inline]
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of live entities, pending removals included.
    #[inline]
    #[must_use]
    pub const fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// Returns `true` if `eid` is allocated (pending removal included).
    #[inline]
    #[must_use]
    pub fn is_alive(&self, eid: EntityId) -> bool {
        self.entities.is_alive(eid)
    }

    /// Live entity ids in ascending order.
    #[must_use]
    pub fn entities(&self) -> Vec<EntityId> {
        self.entities.iter().collect()
    }

    /// Clears entities, component data, change state, query membership and
    /// the remote-id table. Capacity and registrations are kept.
    pub fn reset(&mut self) {
        self.entities.reset();
        for store in &mut self.stores {
            store.clear();
        }
        for state in &mut self.queries {
            state.clear();
        }
        self.remote_to_local.clear();
        self.local_to_remote.clear();
        debug!(capacity = self.capacity, "world reset");
    }

    /// Releases the world and everything it owns.
    pub fn delete(self) {
        debug!(
            capacity = self.capacity,
            entities = self.entities.len(),
            "world deleted"
        );
    }

    // =========================================================================
    // Capacity
    // =========================================================================

    /// Largest capacity reachable under the world's policy.
    #[must_use]
    pub fn max_capacity(&self) -> usize {
        match self.config.capacity_policy {
            CapacityPolicy::Fixed => self.capacity,
            CapacityPolicy::Grow { max_capacity } => max_capacity,
        }
    }

    /// Returns `true` if `count` more entities can be allocated.
    #[must_use]
    pub fn can_allocate(&self, count: usize) -> bool {
        count <= self.entities.available() + (self.max_capacity() - self.capacity)
    }

    /// Returns `true` if `eid` is, or can become, addressable.
    pub(crate) fn can_hold(&self, eid: EntityId) -> bool {
        (eid as usize) < self.max_capacity()
    }

    /// Grows so that ids below `required` are addressable.
    fn ensure_capacity(&mut self, required: usize) -> EcsResult<()> {
        if required <= self.capacity {
            return Ok(());
        }
        let ceiling = self.max_capacity();
        if required > ceiling {
            return Err(EcsError::CapacityExceeded { capacity: ceiling });
        }
        let target = self.capacity.saturating_mul(2).max(required).min(ceiling);
        self.grow(target);
        Ok(())
    }

    fn grow(&mut self, capacity: usize) {
        debug!(from = self.capacity, to = capacity, "growing world storage");
        self.entities.grow(capacity);
        for store in &mut self.stores {
            store.grow(capacity);
        }
        for state in &mut self.queries {
            state.grow(capacity);
        }
        self.capacity = capacity;
    }

    // =========================================================================
    // Entities
    // =========================================================================

    /// Allocates an entity id, reusing committed removals first.
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::CapacityExceeded`] when the capacity is reached
    /// and the policy forbids (further) growth.
    pub fn add_entity(&mut self) -> EcsResult<EntityId> {
        if !self.entities.has_room() {
            self.ensure_capacity(self.capacity + 1)?;
        }
        let eid = self
            .entities
            .allocate()
            .ok_or(EcsError::CapacityExceeded {
                capacity: self.capacity,
            })?;
        self.touch_all(eid);
        trace!(eid, "entity added");
        Ok(eid)
    }

    /// Allocates exactly `eid`, growing if the policy allows.
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::CapacityExceeded`] if `eid` cannot be addressed
    /// and [`EcsError::InvalidEntity`] if it is already live.
    pub fn claim_entity(&mut self, eid: EntityId) -> EcsResult<()> {
        self.ensure_capacity(eid as usize + 1)?;
        if !self.entities.claim(eid) {
            return Err(EcsError::InvalidEntity(eid));
        }
        self.touch_all(eid);
        trace!(eid, "entity claimed");
        Ok(())
    }

    /// Requests removal of `eid`. The entity keeps its id and components
    /// until [`World::commit_removals`].
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::InvalidEntity`] if `eid` is not live.
    pub fn remove_entity(&mut self, eid: EntityId) -> EcsResult<()> {
        match self.entities.request_removal(eid) {
            Some(_) => {
                trace!(eid, "entity removal requested");
                Ok(())
            }
            None => Err(EcsError::InvalidEntity(eid)),
        }
    }

    /// Number of removals waiting for the commit point.
    #[must_use]
    pub fn pending_removals(&self) -> usize {
        self.entities.pending_len()
    }

    /// Applies every pending removal: clears the entity's presence bits,
    /// zeroes data of components with [`ResetPolicy::Zero`], drops its
    /// remote-id mapping and returns the id to the free pool.
    ///
    /// Returns the number of entities removed.
    ///
    /// [`ResetPolicy::Zero`]: crate::ResetPolicy::Zero
    pub fn commit_removals(&mut self) -> usize {
        let removed = self.entities.take_pending();
        for &eid in &removed {
            for store in &mut self.stores {
                if store.remove(eid) && store.def().zeroes_on_remove() {
                    store.zero(eid);
                }
            }
            if let Some(remote) = self.local_to_remote.remove(&eid) {
                self.remote_to_local.remove(&remote);
            }
            for state in &mut self.queries {
                state.forget_changed(None, eid);
            }
        }
        if !removed.is_empty() {
            debug!(count = removed.len(), "removals committed");
        }
        removed.len()
    }

    // =========================================================================
    // Components
    // =========================================================================

    /// Binds a component definition to this world. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::TooManyComponents`] once [`MAX_COMPONENTS`]
    /// stores exist.
    pub fn register_component(&mut self, def: &ComponentDef) -> EcsResult<()> {
        self.register(def).map(|_| ())
    }

    /// Registers each definition in order.
    ///
    /// # Errors
    ///
    /// Stops at the first failure; see [`World::register_component`].
    pub fn register_components<'a, I>(&mut self, defs: I) -> EcsResult<()>
    where
        I: IntoIterator<Item = &'a ComponentDef>,
    {
        let defs: Vec<&ComponentDef> = defs.into_iter().collect();
        self.check_room(defs.iter().copied())?;
        for def in defs {
            self.register(def)?;
        }
        Ok(())
    }

    /// Fails if registering every definition in `defs` would exceed
    /// [`MAX_COMPONENTS`]. Nothing is registered.
    fn check_room<'a, I>(&self, defs: I) -> EcsResult<()>
    where
        I: IntoIterator<Item = &'a ComponentDef>,
    {
        let fresh: HashSet<u64> = defs
            .into_iter()
            .map(ComponentDef::id)
            .filter(|id| !self.store_lookup.contains_key(id))
            .collect();
        if self.stores.len() + fresh.len() > MAX_COMPONENTS {
            return Err(EcsError::TooManyComponents {
                limit: MAX_COMPONENTS,
            });
        }
        Ok(())
    }

    fn register(&mut self, def: &ComponentDef) -> EcsResult<usize> {
        if let Some(&index) = self.store_lookup.get(&def.id()) {
            return Ok(index);
        }
        if self.stores.len() >= MAX_COMPONENTS {
            return Err(EcsError::TooManyComponents {
                limit: MAX_COMPONENTS,
            });
        }
        let index = self.stores.len();
        self.stores
            .push(ComponentStore::new(def.clone(), index, self.capacity));
        self.store_lookup.insert(def.id(), index);
        self.watchers.push(Vec::new());
        debug!(
            component = %def.name(),
            index,
            fields = def.fields().len(),
            "component registered"
        );
        Ok(index)
    }

    /// Returns `true` if `def` is registered on this world.
    #[must_use]
    pub fn is_registered(&self, def: &ComponentDef) -> bool {
        self.store_lookup.contains_key(&def.id())
    }

    /// Registered definitions in registration order.
    #[must_use]
    pub fn registered_components(&self) -> Vec<ComponentDef> {
        self.stores.iter().map(|s| s.def().clone()).collect()
    }

    /// The store bound to `def`, if registered.
    #[must_use]
    pub fn store(&self, def: &ComponentDef) -> Option<&ComponentStore> {
        self.store_lookup.get(&def.id()).map(|&i| &self.stores[i])
    }

    /// All stores in registration order.
    #[inline]
    #[must_use]
    pub fn stores(&self) -> &[ComponentStore] {
        &self.stores
    }

    pub(crate) fn store_index(&self, def: &ComponentDef) -> EcsResult<usize> {
        self.store_lookup
            .get(&def.id())
            .copied()
            .ok_or_else(|| EcsError::UnregisteredComponent {
                component: def.name(),
            })
    }

    fn check_alive(&self, eid: EntityId) -> EcsResult<()> {
        if self.entities.is_alive(eid) {
            Ok(())
        } else {
            Err(EcsError::InvalidEntity(eid))
        }
    }

    /// Attaches `def` to `eid`, zeroing its data. Registers `def` on first
    /// use. Adding a component the entity already has is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::InvalidEntity`] if `eid` is not live, or
    /// [`EcsError::TooManyComponents`] if registration fails.
    pub fn add_component(&mut self, def: &ComponentDef, eid: EntityId) -> EcsResult<()> {
        self.add_component_with_reset(def, eid, true)
    }

    /// Attaches `def` to `eid`; `reset` controls whether the slot is zeroed.
    ///
    /// # Errors
    ///
    /// See [`World::add_component`].
    pub fn add_component_with_reset(
        &mut self,
        def: &ComponentDef,
        eid: EntityId,
        reset: bool,
    ) -> EcsResult<()> {
        self.check_alive(eid)?;
        let index = self.register(def)?;
        self.attach(index, eid, reset);
        Ok(())
    }

    /// Sets the presence bit of store `index` for `eid` if clear.
    pub(crate) fn attach(&mut self, index: usize, eid: EntityId, reset: bool) {
        let store = &mut self.stores[index];
        if !store.insert(eid) {
            return;
        }
        if reset {
            store.zero(eid);
        }
        self.touch(index, eid);
        self.note_write(index, eid);
    }

    /// Detaches `def` from `eid`, zeroing its data.
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::UnregisteredComponent`] or
    /// [`EcsError::InvalidEntity`].
    pub fn remove_component(&mut self, def: &ComponentDef, eid: EntityId) -> EcsResult<()> {
        self.remove_component_with_reset(def, eid, true)
    }

    /// Detaches `def` from `eid`; `reset` controls whether data is zeroed.
    ///
    /// # Errors
    ///
    /// See [`World::remove_component`].
    pub fn remove_component_with_reset(
        &mut self,
        def: &ComponentDef,
        eid: EntityId,
        reset: bool,
    ) -> EcsResult<()> {
        let index = self.store_index(def)?;
        self.check_alive(eid)?;
        self.detach(index, eid, reset);
        Ok(())
    }

    pub(crate) fn detach(&mut self, index: usize, eid: EntityId, reset: bool) {
        let store = &mut self.stores[index];
        if !store.remove(eid) {
            return;
        }
        if reset {
            store.zero(eid);
        }
        for id in &self.watchers[index] {
            if let Some(&slot) = self.query_lookup.get(id) {
                self.queries[slot].forget_changed(Some(index), eid);
            }
        }
    }

    /// O(1) presence test. Unregistered components are never present.
    #[must_use]
    pub fn has_component(&self, def: &ComponentDef, eid: EntityId) -> bool {
        self.store(def).is_some_and(|s| s.has(eid))
    }

    /// Components attached to `eid`, in registration order, derived from
    /// the presence bits.
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::InvalidEntity`] if `eid` is not live.
    pub fn get_entity_components(&self, eid: EntityId) -> EcsResult<Vec<ComponentDef>> {
        self.check_alive(eid)?;
        Ok(self
            .stores
            .iter()
            .filter(|s| s.has(eid))
            .map(|s| s.def().clone())
            .collect())
    }

    // =========================================================================
    // Field access
    // =========================================================================

    fn locate(&self, def: &ComponentDef, path: &str) -> EcsResult<(usize, usize)> {
        let store = self.store_index(def)?;
        let field = def
            .field_index(path)
            .ok_or_else(|| EcsError::UnknownField {
                component: def.name(),
                path: path.to_string(),
            })?;
        Ok((store, field))
    }

    fn type_mismatch(path: &str, ty: FieldType) -> EcsError {
        EcsError::FieldTypeMismatch {
            path: path.to_string(),
            expected: ty.name(),
        }
    }

    /// The column backing `def.path`, for bulk reads.
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::UnregisteredComponent`] or
    /// [`EcsError::UnknownField`].
    pub fn column(&self, def: &ComponentDef, path: &str) -> EcsResult<&Column> {
        let (store, field) = self.locate(def, path)?;
        Ok(&self.stores[store].columns()[field])
    }

    /// Reads the first element of `eid`'s `def.path` slot.
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::FieldTypeMismatch`] when `T` does not match
    /// the stored type, plus the errors of [`World::column`] and
    /// [`EcsError::InvalidEntity`].
    pub fn get<T: Primitive>(&self, def: &ComponentDef, path: &str, eid: EntityId) -> EcsResult<T> {
        self.get_array::<T>(def, path, eid).map(|slot| slot[0])
    }

    /// Reads all elements of `eid`'s `def.path` slot.
    ///
    /// # Errors
    ///
    /// See [`World::get`].
    pub fn get_array<T: Primitive>(
        &self,
        def: &ComponentDef,
        path: &str,
        eid: EntityId,
    ) -> EcsResult<&[T]> {
        self.check_alive(eid)?;
        let column = self.column(def, path)?;
        let ty = column.descriptor().ty;
        if !T::accepts(ty) {
            return Err(Self::type_mismatch(path, ty));
        }
        column.slot::<T>(eid).ok_or(EcsError::InvalidEntity(eid))
    }

    /// Writes the first element of `eid`'s `def.path` slot and marks the
    /// component changed.
    ///
    /// # Errors
    ///
    /// See [`World::get`].
    pub fn set<T: Primitive>(
        &mut self,
        def: &ComponentDef,
        path: &str,
        eid: EntityId,
        value: T,
    ) -> EcsResult<()> {
        self.set_array(def, path, eid, &[value])
    }

    /// Writes the leading elements of `eid`'s `def.path` slot from
    /// `values` (extra values are ignored) and marks the component changed.
    ///
    /// # Errors
    ///
    /// See [`World::get`].
    pub fn set_array<T: Primitive>(
        &mut self,
        def: &ComponentDef,
        path: &str,
        eid: EntityId,
        values: &[T],
    ) -> EcsResult<()> {
        self.check_alive(eid)?;
        let (store, field) = self.locate(def, path)?;
        let column = &mut self.stores[store].columns_mut()[field];
        let ty = column.descriptor().ty;
        if !T::accepts(ty) {
            return Err(Self::type_mismatch(path, ty));
        }
        let slot = column
            .slot_mut::<T>(eid)
            .ok_or(EcsError::InvalidEntity(eid))?;
        let n = slot.len().min(values.len());
        slot[..n].copy_from_slice(&values[..n]);
        self.note_write(store, eid);
        Ok(())
    }

    /// Reads element `element` of `eid`'s `def.path` slot as `f64`.
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::UnknownField`] if `element` is past the
    /// field's stride, plus the errors of [`World::column`].
    pub fn get_f64(
        &self,
        def: &ComponentDef,
        path: &str,
        eid: EntityId,
        element: usize,
    ) -> EcsResult<f64> {
        self.check_alive(eid)?;
        self.column(def, path)?
            .get_f64(eid, element)
            .ok_or_else(|| EcsError::UnknownField {
                component: def.name(),
                path: format!("{path}[{element}]"),
            })
    }

    /// Writes element `element` of `eid`'s `def.path` slot from an `f64`,
    /// converting with the field type's semantics.
    ///
    /// # Errors
    ///
    /// See [`World::get_f64`].
    pub fn set_f64(
        &mut self,
        def: &ComponentDef,
        path: &str,
        eid: EntityId,
        element: usize,
        value: f64,
    ) -> EcsResult<()> {
        self.check_alive(eid)?;
        let (store, field) = self.locate(def, path)?;
        if !self.stores[store].columns_mut()[field].set_f64(eid, element, value) {
            return Err(EcsError::UnknownField {
                component: def.name(),
                path: format!("{path}[{element}]"),
            });
        }
        self.note_write(store, eid);
        Ok(())
    }

    /// Overwrites one field slot from little-endian bytes. Used by the
    /// deserializer after the packet has been validated.
    pub(crate) fn write_slot(&mut self, store: usize, field: usize, eid: EntityId, bytes: &[u8]) {
        if self.stores[store].columns_mut()[field].decode_slot(eid, bytes) {
            self.note_write(store, eid);
        }
    }

    /// Mutable column access for the deserializer's id remapping.
    pub(crate) fn column_at_mut(&mut self, store: usize, field: usize) -> &mut Column {
        &mut self.stores[store].columns_mut()[field]
    }

    // =========================================================================
    // Change tracking
    // =========================================================================

    /// Flags `def` as changed on `eid`, as a field write would. Use after
    /// writing through means that bypass the world.
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::UnregisteredComponent`] or
    /// [`EcsError::InvalidEntity`].
    pub fn mark_changed(&mut self, def: &ComponentDef, eid: EntityId) -> EcsResult<()> {
        let store = self.store_index(def)?;
        self.check_alive(eid)?;
        self.note_write(store, eid);
        Ok(())
    }

    /// Tests the store-level changed bit of `def` for `eid`.
    #[must_use]
    pub fn is_changed(&self, def: &ComponentDef, eid: EntityId) -> bool {
        self.store(def).is_some_and(|s| s.is_changed(eid))
    }

    /// Clears the store-level changed bits of `def`. Query change windows
    /// are unaffected.
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::UnregisteredComponent`].
    pub fn clear_changed(&mut self, def: &ComponentDef) -> EcsResult<()> {
        let store = self.store_index(def)?;
        self.stores[store].clear_changed();
        Ok(())
    }

    /// Flags a write to `store` on `eid`. Writes to a component the
    /// entity does not hold leave no change record.
    pub(crate) fn note_write(&mut self, store: usize, eid: EntityId) {
        if !self.stores[store].has(eid) {
            return;
        }
        self.stores[store].mark_changed(eid);
        for id in &self.watchers[store] {
            if let Some(&slot) = self.query_lookup.get(id) {
                self.queries[slot].note_changed(store, eid);
            }
        }
    }

    fn touch(&mut self, store: usize, eid: EntityId) {
        for id in &self.watchers[store] {
            if let Some(&slot) = self.query_lookup.get(id) {
                self.queries[slot].touch(eid);
            }
        }
    }

    fn touch_all(&mut self, eid: EntityId) {
        for state in &mut self.queries {
            state.touch(eid);
        }
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Compiles `query` for this world if needed and returns its slot.
    fn ensure_query(&mut self, query: &Query) -> EcsResult<usize> {
        let id = query.id();
        if let Some(&slot) = self.query_lookup.get(&id) {
            return Ok(slot);
        }
        self.check_room(query.terms().iter().map(Term::component))?;
        let mut resolved: Vec<(Term, usize)> = Vec::with_capacity(query.terms().len());
        for term in query.terms() {
            let index = self.register(term.component())?;
            resolved.push((term.clone(), index));
        }
        let mut state = QueryState::compile(&resolved, self.capacity);
        state.populate(&self.stores, &self.entities);
        let mut watched: Vec<usize> = state.watched().collect();
        watched.sort_unstable();
        watched.dedup();
        for store in watched {
            self.watchers[store].push(id);
        }
        debug!(query = id, terms = resolved.len(), "query registered");
        let slot = self.queries.len();
        self.queries.push(state);
        self.query_ids.push(id);
        self.query_lookup.insert(id, slot);
        Ok(slot)
    }

    fn refreshed(&mut self, query: &Query) -> EcsResult<&mut QueryState> {
        let slot = self.ensure_query(query)?;
        let state = &mut self.queries[slot];
        state.refresh(&self.stores, &self.entities);
        Ok(state)
    }

    /// Evaluates `query`; see [`Query::run_with`].
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::TooManyComponents`] if compiling the query
    /// would register too many components.
    pub fn run_query(&mut self, query: &Query, clear_diff: bool) -> EcsResult<Vec<EntityId>> {
        let state = self.refreshed(query)?;
        if clear_diff {
            state.clear_diff();
        }
        Ok(state.dense().to_vec())
    }

    /// Evaluates `query` and drains its entered ids.
    ///
    /// # Errors
    ///
    /// See [`World::run_query`].
    pub fn drain_entered(&mut self, query: &Query) -> EcsResult<Vec<EntityId>> {
        Ok(self.refreshed(query)?.drain_entered())
    }

    /// Evaluates `query` and drains its exited ids.
    ///
    /// # Errors
    ///
    /// See [`World::run_query`].
    pub fn drain_exited(&mut self, query: &Query) -> EcsResult<Vec<EntityId>> {
        Ok(self.refreshed(query)?.drain_exited())
    }

    /// Starts a fresh change window for `query`'s `Changed` terms.
    ///
    /// Calling it twice in a row is harmless; the second call just narrows
    /// the next window.
    ///
    /// # Errors
    ///
    /// See [`World::run_query`].
    pub fn reset_changed_query(&mut self, query: &Query) -> EcsResult<()> {
        let slot = self.ensure_query(query)?;
        self.queries[slot].reset_changed();
        Ok(())
    }

    /// Stops tracking `query` in this world. Returns `true` if it was
    /// tracked. A later run compiles it afresh.
    pub fn remove_query(&mut self, query: &Query) -> bool {
        let id = query.id();
        let Some(slot) = self.query_lookup.remove(&id) else {
            return false;
        };
        self.queries.swap_remove(slot);
        self.query_ids.swap_remove(slot);
        if let Some(&moved) = self.query_ids.get(slot) {
            self.query_lookup.insert(moved, slot);
        }
        for list in &mut self.watchers {
            list.retain(|&q| q != id);
        }
        debug!(query = id, "query removed");
        true
    }

    /// Returns `true` if `query` is compiled in this world.
    #[must_use]
    pub fn is_tracking(&self, query: &Query) -> bool {
        self.query_lookup.contains_key(&query.id())
    }

    // =========================================================================
    // Remote id table
    // =========================================================================

    /// Local id bound to a remote id by mapped deserialization.
    #[must_use]
    pub fn remote_to_local(&self, remote: EntityId) -> Option<EntityId> {
        self.remote_to_local.get(&remote).copied()
    }

    /// Remote id a local entity was mapped from.
    #[must_use]
    pub fn local_to_remote(&self, local: EntityId) -> Option<EntityId> {
        self.local_to_remote.get(&local).copied()
    }

    pub(crate) fn bind_remote(&mut self, remote: EntityId, local: EntityId) {
        self.remote_to_local.insert(remote, local);
        self.local_to_remote.insert(local, remote);
    }
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

/// Creates a world from the process-wide defaults.
#[must_use]
pub fn create_world() -> World {
    World::new()
}

/// Clears a world, keeping capacity and registrations.
pub fn reset_world(world: &mut World) -> &mut World {
    world.reset();
    world
}

/// Releases a world.
pub fn delete_world(world: World) {
    world.delete();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::component::{define_component, ResetPolicy, Schema};
    use crate::ecs::query::{changed, define_query};

    fn position() -> ComponentDef {
        ComponentDef::named(
            "Position",
            Schema::object([
                ("x", Schema::from(FieldType::F32)),
                ("y", Schema::from(FieldType::F32)),
            ]),
        )
    }

    fn world(capacity: usize) -> World {
        World::with_capacity(capacity).unwrap()
    }

    #[test]
    fn test_world_creation() {
        let w = world(1000);
        assert_eq!(w.capacity(), 1000);
        assert_eq!(w.entity_count(), 0);
        assert!(World::with_capacity(0).is_err());
    }

    #[test]
    fn test_fixed_capacity_fails() {
        let mut w = world(2);
        w.add_entity().unwrap();
        w.add_entity().unwrap();
        assert_eq!(
            w.add_entity(),
            Err(EcsError::CapacityExceeded { capacity: 2 })
        );
    }

    #[test]
    fn test_growth_copies_data() {
        let mut w = World::with_config(WorldConfig::growable(2, 16)).unwrap();
        let pos = position();
        let a = w.add_entity().unwrap();
        w.add_component(&pos, a).unwrap();
        w.set::<f32>(&pos, "x", a, 4.5).unwrap();
        let _b = w.add_entity().unwrap();
        let c = w.add_entity().unwrap();
        assert_eq!(w.capacity(), 4);
        assert_eq!(w.get::<f32>(&pos, "x", a).unwrap(), 4.5);
        assert_eq!(w.store(&pos).unwrap().presence().len(), 4);
        w.add_component(&pos, c).unwrap();
        assert!(w.has_component(&pos, c));

        for _ in 3..16 {
            w.add_entity().unwrap();
        }
        assert_eq!(w.capacity(), 16);
        assert_eq!(
            w.add_entity(),
            Err(EcsError::CapacityExceeded { capacity: 16 })
        );
    }

    #[test]
    fn test_remove_entity_is_deferred() {
        let mut w = world(4);
        let pos = position();
        let a = w.add_entity().unwrap();
        w.add_component(&pos, a).unwrap();
        w.remove_entity(a).unwrap();
        assert!(w.is_alive(a));
        assert!(w.has_component(&pos, a));
        assert_eq!(w.pending_removals(), 1);

        assert_eq!(w.commit_removals(), 1);
        assert!(!w.is_alive(a));
        assert!(!w.has_component(&pos, a));
        assert_eq!(w.remove_entity(a), Err(EcsError::InvalidEntity(a)));
    }

    #[test]
    fn test_keep_policy_leaves_stale_data() {
        let mut w = world(2);
        let kept = ComponentDef::with_reset(None, Schema::from(FieldType::I32), ResetPolicy::Keep);
        let zeroed = ComponentDef::new(Schema::from(FieldType::I32));
        let a = w.add_entity().unwrap();
        w.add_component(&kept, a).unwrap();
        w.add_component(&zeroed, a).unwrap();
        w.set::<i32>(&kept, "", a, -7).unwrap();
        w.set::<i32>(&zeroed, "", a, -7).unwrap();
        w.remove_entity(a).unwrap();
        w.commit_removals();

        let kept_col = w.column(&kept, "").unwrap();
        let zeroed_col = w.column(&zeroed, "").unwrap();
        assert_eq!(kept_col.slot::<i32>(a).unwrap(), &[-7]);
        assert_eq!(zeroed_col.slot::<i32>(a).unwrap(), &[0]);
        assert!(!w.has_component(&kept, a));
    }

    #[test]
    fn test_add_component_registers_and_resets() {
        let mut w = world(4);
        let pos = position();
        let a = w.add_entity().unwrap();
        assert!(!w.is_registered(&pos));
        w.add_component(&pos, a).unwrap();
        assert!(w.is_registered(&pos));

        w.set::<f32>(&pos, "y", a, 9.0).unwrap();
        w.remove_component_with_reset(&pos, a, false).unwrap();
        w.add_component_with_reset(&pos, a, false).unwrap();
        assert_eq!(w.get::<f32>(&pos, "y", a).unwrap(), 9.0);

        w.remove_component(&pos, a).unwrap();
        w.add_component_with_reset(&pos, a, false).unwrap();
        assert_eq!(w.get::<f32>(&pos, "y", a).unwrap(), 0.0);
    }

    #[test]
    fn test_unregistered_component_errors() {
        let mut w = world(4);
        let pos = position();
        let a = w.add_entity().unwrap();
        assert!(!w.has_component(&pos, a));
        assert!(matches!(
            w.remove_component(&pos, a),
            Err(EcsError::UnregisteredComponent { .. })
        ));
        assert!(matches!(
            w.get::<f32>(&pos, "x", a),
            Err(EcsError::UnregisteredComponent { .. })
        ));
    }

    #[test]
    fn test_field_errors() {
        let mut w = world(4);
        let pos = position();
        let a = w.add_entity().unwrap();
        w.add_component(&pos, a).unwrap();
        assert!(matches!(
            w.get::<f64>(&pos, "x", a),
            Err(EcsError::FieldTypeMismatch { expected: "f32", .. })
        ));
        assert!(matches!(
            w.set::<f32>(&pos, "z", a, 1.0),
            Err(EcsError::UnknownField { .. })
        ));
        assert!(matches!(
            w.get_f64(&pos, "x", a, 1),
            Err(EcsError::UnknownField { .. })
        ));
        assert_eq!(w.get::<f32>(&pos, "x", 3), Err(EcsError::InvalidEntity(3)));
    }

    #[test]
    fn test_get_entity_components() {
        let mut w = world(4);
        let pos = position();
        let tag = define_component(Schema::empty());
        let a = w.add_entity().unwrap();
        w.register_components([&pos, &tag]).unwrap();
        w.add_component(&tag, a).unwrap();
        assert_eq!(w.get_entity_components(a).unwrap(), vec![tag.clone()]);
        w.add_component(&pos, a).unwrap();
        assert_eq!(w.get_entity_components(a).unwrap(), vec![pos, tag]);
        assert!(w.get_entity_components(3).is_err());
    }

    #[test]
    fn test_component_limit() {
        let mut w = world(1);
        for _ in 0..MAX_COMPONENTS {
            w.register_component(&define_component(Schema::empty()))
                .unwrap();
        }
        assert_eq!(
            w.register_component(&define_component(Schema::empty())),
            Err(EcsError::TooManyComponents {
                limit: MAX_COMPONENTS
            })
        );
    }

    #[test]
    fn test_component_limit_registers_nothing_on_failure() {
        let mut w = world(1);
        for _ in 0..MAX_COMPONENTS - 1 {
            w.register_component(&define_component(Schema::empty()))
                .unwrap();
        }
        let first = define_component(Schema::empty());
        let second = define_component(Schema::empty());
        let q = define_query([&first, &second]);
        assert_eq!(
            q.run(&mut w),
            Err(EcsError::TooManyComponents {
                limit: MAX_COMPONENTS
            })
        );
        assert!(!w.is_registered(&first));
        assert!(!w.is_tracking(&q));
        assert!(w
            .register_components([&first, &second])
            .is_err());
        assert!(!w.is_registered(&first));
        assert_eq!(w.registered_components().len(), MAX_COMPONENTS - 1);

        // The last slot is still usable.
        w.register_component(&second).unwrap();
        assert_eq!(w.registered_components().len(), MAX_COMPONENTS);
    }

    #[test]
    fn test_reset_keeps_registrations() {
        let mut w = world(4);
        let pos = position();
        let q = define_query([&pos]);
        let a = w.add_entity().unwrap();
        w.add_component(&pos, a).unwrap();
        assert_eq!(q.run(&mut w).unwrap(), vec![a]);

        reset_world(&mut w);
        assert_eq!(w.entity_count(), 0);
        assert!(w.is_registered(&pos));
        assert!(q.run(&mut w).unwrap().is_empty());
        assert_eq!(w.add_entity().unwrap(), 0);
        assert!(!w.has_component(&pos, 0));
    }

    #[test]
    fn test_changed_bits() {
        let mut w = world(4);
        let pos = position();
        let a = w.add_entity().unwrap();
        w.add_component(&pos, a).unwrap();
        w.clear_changed(&pos).unwrap();
        assert!(!w.is_changed(&pos, a));
        w.set_f64(&pos, "x", a, 0, 1.0).unwrap();
        assert!(w.is_changed(&pos, a));

        let q = define_query([changed(&pos)]);
        assert_eq!(q.run(&mut w).unwrap(), Vec::<EntityId>::new());
        w.mark_changed(&pos, a).unwrap();
        assert_eq!(q.run(&mut w).unwrap(), vec![a]);
    }

    #[test]
    fn test_changed_window_drops_detached_component() {
        let mut w = world(4);
        let pos = position();
        let q = define_query([changed(&pos)]);
        let a = w.add_entity().unwrap();
        w.add_component(&pos, a).unwrap();
        w.set::<f32>(&pos, "x", a, 2.0).unwrap();
        assert_eq!(q.run(&mut w).unwrap(), vec![a]);

        w.remove_component(&pos, a).unwrap();
        assert!(q.run(&mut w).unwrap().is_empty());

        // Re-adding without a write after the window reset stays quiet.
        w.add_component(&pos, a).unwrap();
        w.reset_changed_query(&q).unwrap();
        assert!(q.run(&mut w).unwrap().is_empty());
    }

    #[test]
    fn test_changed_window_forgets_recycled_id() {
        let mut w = world(4);
        let pos = position();
        let q = define_query([changed(&pos)]);
        q.run(&mut w).unwrap();
        let a = w.add_entity().unwrap();
        w.add_component(&pos, a).unwrap();
        w.set::<f32>(&pos, "x", a, 2.0).unwrap();
        w.remove_entity(a).unwrap();
        w.commit_removals();

        let b = w.add_entity().unwrap();
        assert_eq!(a, b);
        assert!(!w.has_component(&pos, b));
        assert!(q.run(&mut w).unwrap().is_empty());

        w.add_component(&pos, b).unwrap();
        assert_eq!(q.run(&mut w).unwrap(), vec![b]);
    }

    #[test]
    fn test_write_without_component_is_not_a_change() {
        let mut w = world(4);
        let pos = position();
        w.register_component(&pos).unwrap();
        let q = define_query([changed(&pos)]);
        let a = w.add_entity().unwrap();
        w.set::<f32>(&pos, "x", a, 1.0).unwrap();
        assert!(!w.is_changed(&pos, a));
        assert!(q.run(&mut w).unwrap().is_empty());
    }

    #[test]
    fn test_remove_query() {
        let mut w = world(4);
        let pos = position();
        let q = define_query([&pos]);
        assert!(!w.remove_query(&q));
        q.run(&mut w).unwrap();
        assert!(w.is_tracking(&q));
        assert!(w.remove_query(&q));
        assert!(!w.is_tracking(&q));
        assert!(w.watchers.iter().all(Vec::is_empty));
    }
}

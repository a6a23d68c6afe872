//! # Queries
//!
//! A query is a conjunction of [`Term`]s over components:
//!
//! | Term | Entity matches when |
//! |------|---------------------|
//! | `Has(C)` | its presence bit for `C` is set |
//! | `Not(C)` | its presence bit for `C` is clear |
//! | `Changed(C)` | a field of `C` was written since this query's last change reset |
//!
//! [`Query`] itself is a portable, storage-free definition. The first time it
//! runs in a world, the world compiles it into per-world state: term lists
//! resolved to component indices, a membership bit-vector, the cached
//! ascending result and the enter/exit accumulators. From then on the world
//! feeds it the ids it must re-check ("touched" ids), and evaluation only
//! re-derives membership for those.
//!
//! ## Example
//!
//! ```rust
//! use strata_core::{define_component, define_query, not, FieldType, Schema, World, WorldConfig};
//!
//! let position = define_component(Schema::object([("x", Schema::from(FieldType::F32))]));
//! let frozen = define_component(Schema::empty());
//! let movable = define_query([position.clone().into(), not(&frozen)]);
//!
//! let mut world = World::with_config(WorldConfig::fixed(16)).unwrap();
//! let a = world.add_entity().unwrap();
//! let b = world.add_entity().unwrap();
//! world.add_component(&position, a).unwrap();
//! world.add_component(&position, b).unwrap();
//! world.add_component(&frozen, b).unwrap();
//!
//! assert_eq!(movable.run(&mut world).unwrap(), vec![a]);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::bitset::BitSet;
use super::component::ComponentDef;
use super::entity::{EntityAllocator, EntityId};
use super::storage::ComponentStore;
use super::world::World;
use crate::error::EcsResult;

/// Above this many membership changes per evaluation, the cached result is
/// rebuilt from the membership bits instead of spliced.
const SPLICE_LIMIT: usize = 32;

/// One condition of a query.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Term {
    /// The entity has the component.
    Has(ComponentDef),
    /// The entity does not have the component.
    Not(ComponentDef),
    /// A field of the component was written in the current change window.
    Changed(ComponentDef),
}

impl Term {
    /// The component this term refers to.
    #[must_use]
    pub fn component(&self) -> &ComponentDef {
        match self {
            Self::Has(c) | Self::Not(c) | Self::Changed(c) => c,
        }
    }
}

impl From<ComponentDef> for Term {
    fn from(component: ComponentDef) -> Self {
        Self::Has(component)
    }
}

impl From<&ComponentDef> for Term {
    fn from(component: &ComponentDef) -> Self {
        Self::Has(component.clone())
    }
}

/// Builds a negated term.
#[must_use]
pub fn not(component: &ComponentDef) -> Term {
    Term::Not(component.clone())
}

/// Builds a change-detection term.
#[must_use]
pub fn changed(component: &ComponentDef) -> Term {
    Term::Changed(component.clone())
}

static NEXT_QUERY_ID: AtomicU64 = AtomicU64::new(0);

#[derive(Debug)]
struct QueryInner {
    id: u64,
    terms: Vec<Term>,
}

/// A compiled, portable query definition.
///
/// Clones share identity: all clones address the same per-world state.
#[derive(Clone, Debug)]
pub struct Query(Arc<QueryInner>);

impl Query {
    /// Process-unique identity.
    #[inline]
    #[must_use]
    pub fn id(&self) -> u64 {
        self.0.id
    }

    /// Terms in declaration order.
    #[inline]
    #[must_use]
    pub fn terms(&self) -> &[Term] {
        &self.0.terms
    }

    /// Returns `true` if any term is [`Term::Changed`].
    #[must_use]
    pub fn has_changed_terms(&self) -> bool {
        self.0.terms.iter().any(|t| matches!(t, Term::Changed(_)))
    }

    /// Evaluates the query, returning matching ids in ascending order.
    ///
    /// Also starts a fresh enter/exit baseline, so [`EnterQuery::run`] and
    /// [`ExitQuery::run`] only report transitions after this call.
    ///
    /// # Errors
    ///
    /// Fails only if registering the query's components exceeds the
    /// world's component limit.
    pub fn run(&self, world: &mut World) -> EcsResult<Vec<EntityId>> {
        world.run_query(self, true)
    }

    /// Evaluates the query; with `clear_diff == false` the accumulated
    /// enter/exit deltas survive for the wrappers to drain.
    ///
    /// # Errors
    ///
    /// See [`Query::run`].
    pub fn run_with(&self, world: &mut World, clear_diff: bool) -> EcsResult<Vec<EntityId>> {
        world.run_query(self, clear_diff)
    }
}

impl PartialEq for Query {
    fn eq(&self, other: &Self) -> bool {
        self.0.id == other.0.id
    }
}

impl Eq for Query {}

/// Compiles terms into a query definition.
#[must_use]
pub fn define_query<I>(terms: I) -> Query
where
    I: IntoIterator,
    I::Item: Into<Term>,
{
    Query(Arc::new(QueryInner {
        id: NEXT_QUERY_ID.fetch_add(1, Ordering::Relaxed),
        terms: terms.into_iter().map(Into::into).collect(),
    }))
}

/// Yields ids that started matching a query since the previous drain.
#[derive(Clone, Debug)]
pub struct EnterQuery(Query);

impl EnterQuery {
    /// Evaluates the query and drains its entered ids, ascending.
    ///
    /// # Errors
    ///
    /// See [`Query::run`].
    pub fn run(&self, world: &mut World) -> EcsResult<Vec<EntityId>> {
        world.drain_entered(&self.0)
    }

    /// The wrapped query.
    #[must_use]
    pub fn query(&self) -> &Query {
        &self.0
    }
}

/// Yields ids that stopped matching a query since the previous drain.
#[derive(Clone, Debug)]
pub struct ExitQuery(Query);

impl ExitQuery {
    /// Evaluates the query and drains its exited ids, ascending.
    ///
    /// # Errors
    ///
    /// See [`Query::run`].
    pub fn run(&self, world: &mut World) -> EcsResult<Vec<EntityId>> {
        world.drain_exited(&self.0)
    }

    /// The wrapped query.
    #[must_use]
    pub fn query(&self) -> &Query {
        &self.0
    }
}

/// Wraps a query so each call yields newly matching ids.
#[must_use]
pub fn enter_query(query: &Query) -> EnterQuery {
    EnterQuery(query.clone())
}

/// Wraps a query so each call yields ids that stopped matching.
#[must_use]
pub fn exit_query(query: &Query) -> ExitQuery {
    ExitQuery(query.clone())
}

/// A query compiled against one world.
#[derive(Clone, Debug)]
pub(crate) struct QueryState {
    /// Store indices that must be present.
    has: Vec<usize>,
    /// Store indices that must be absent.
    not: Vec<usize>,
    /// Store indices with a `Changed` term, parallel to `changed_bits`.
    changed: Vec<usize>,
    /// Per-term change windows owned by this query.
    changed_bits: Vec<BitSet>,
    /// Current members.
    members: BitSet,
    /// Members in ascending order.
    dense: Vec<EntityId>,
    /// Ids to re-check at the next evaluation.
    touched: BitSet,
    entered: BitSet,
    exited: BitSet,
}

impl QueryState {
    /// Compiles terms whose components resolve to the given store indices.
    pub(crate) fn compile(terms: &[(Term, usize)], capacity: usize) -> Self {
        let mut state = Self {
            has: Vec::new(),
            not: Vec::new(),
            changed: Vec::new(),
            changed_bits: Vec::new(),
            members: BitSet::new(capacity),
            dense: Vec::new(),
            touched: BitSet::new(capacity),
            entered: BitSet::new(capacity),
            exited: BitSet::new(capacity),
        };
        for (term, index) in terms {
            match term {
                Term::Has(_) => state.has.push(*index),
                Term::Not(_) => state.not.push(*index),
                Term::Changed(_) => {
                    state.has.push(*index);
                    state.changed.push(*index);
                    state.changed_bits.push(BitSet::new(capacity));
                }
            }
        }
        state
    }

    /// Store indices this query must be notified about.
    pub(crate) fn watched(&self) -> impl Iterator<Item = usize> + '_ {
        self.has.iter().chain(&self.not).copied()
    }

    /// Seeds membership with a full scan of live entities. Initial members
    /// count as entered.
    pub(crate) fn populate(&mut self, stores: &[ComponentStore], entities: &EntityAllocator) {
        for eid in entities.iter() {
            if self.matches(eid, stores, entities) {
                self.members.insert(eid as usize);
                self.entered.insert(eid as usize);
                self.dense.push(eid);
            }
        }
    }

    /// Schedules `eid` for re-evaluation.
    #[inline]
    pub(crate) fn touch(&mut self, eid: EntityId) {
        self.touched.insert(eid as usize);
    }

    /// Records a write to the store at `store` for `eid`.
    pub(crate) fn note_changed(&mut self, store: usize, eid: EntityId) {
        let mut hit = false;
        for (index, bits) in self.changed.iter().zip(&mut self.changed_bits) {
            if *index == store {
                bits.insert(eid as usize);
                hit = true;
            }
        }
        if hit {
            self.touch(eid);
        }
    }

    /// Drops `eid` from the change windows of `store`, or of every
    /// `Changed` term when `store` is `None`, and schedules it for
    /// re-evaluation.
    pub(crate) fn forget_changed(&mut self, store: Option<usize>, eid: EntityId) {
        for (index, bits) in self.changed.iter().zip(&mut self.changed_bits) {
            if store.map_or(true, |s| s == *index) {
                bits.remove(eid as usize);
            }
        }
        self.touch(eid);
    }

    /// Closes the change window: clears this query's changed bits and
    /// schedules current members for re-evaluation.
    pub(crate) fn reset_changed(&mut self) {
        for bits in &mut self.changed_bits {
            bits.clear();
        }
        if !self.changed.is_empty() {
            for eid in self.members.iter() {
                self.touched.insert(eid);
            }
        }
    }

    fn matches(&self, eid: EntityId, stores: &[ComponentStore], entities: &EntityAllocator) -> bool {
        entities.is_alive(eid)
            && self.has.iter().all(|&i| stores[i].has(eid))
            && self.not.iter().all(|&i| !stores[i].has(eid))
            && self.changed_bits.iter().all(|bits| bits.contains(eid as usize))
    }

    /// Re-derives membership for touched ids and splices the cached
    /// result.
    pub(crate) fn refresh(&mut self, stores: &[ComponentStore], entities: &EntityAllocator) {
        if self.touched.none() {
            return;
        }
        let touched: Vec<EntityId> = self.touched.iter().map(|i| i as EntityId).collect();
        self.touched.clear();

        let mut transitions = Vec::new();
        for eid in touched {
            let index = eid as usize;
            let matches = self.matches(eid, stores, entities);
            if matches == self.members.contains(index) {
                continue;
            }
            if matches {
                self.members.insert(index);
                self.entered.insert(index);
            } else {
                self.members.remove(index);
                self.entered.remove(index);
                self.exited.insert(index);
            }
            transitions.push((eid, matches));
        }

        if transitions.len() > SPLICE_LIMIT {
            self.dense.clear();
            self.dense
                .extend(self.members.iter().map(|i| i as EntityId));
            return;
        }
        for (eid, added) in transitions {
            match (self.dense.binary_search(&eid), added) {
                (Err(pos), true) => self.dense.insert(pos, eid),
                (Ok(pos), false) => {
                    self.dense.remove(pos);
                }
                _ => {}
            }
        }
    }

    /// Members in ascending order.
    #[inline]
    pub(crate) fn dense(&self) -> &[EntityId] {
        &self.dense
    }

    pub(crate) fn drain_entered(&mut self) -> Vec<EntityId> {
        let ids = self.entered.iter().map(|i| i as EntityId).collect();
        self.entered.clear();
        ids
    }

    pub(crate) fn drain_exited(&mut self) -> Vec<EntityId> {
        let ids = self.exited.iter().map(|i| i as EntityId).collect();
        self.exited.clear();
        ids
    }

    pub(crate) fn clear_diff(&mut self) {
        self.entered.clear();
        self.exited.clear();
    }

    /// Forgets all members and change windows. Used on world reset.
    pub(crate) fn clear(&mut self) {
        for bits in &mut self.changed_bits {
            bits.clear();
        }
        self.members.clear();
        self.dense.clear();
        self.touched.clear();
        self.entered.clear();
        self.exited.clear();
    }

    pub(crate) fn grow(&mut self, capacity: usize) {
        for bits in &mut self.changed_bits {
            bits.resize(capacity);
        }
        self.members.resize(capacity);
        self.touched.resize(capacity);
        self.entered.resize(capacity);
        self.exited.resize(capacity);
    }
}

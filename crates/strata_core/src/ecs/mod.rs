//! # Entity Component System
//!
//! Bitmask-driven ECS with pre-allocated columnar storage.
//!
//! ## Design Philosophy
//!
//! - Entities are bare `u32` indices recycled through a free list
//! - Each component owns one column per flattened field plus a presence
//!   bit-vector, all sized to the world's capacity
//! - Queries are compiled once per world and kept current incrementally
//! - Entity removal is deferred until [`World::commit_removals`]

mod bitset;
mod component;
mod entity;
mod query;
mod storage;
mod system;
mod world;

pub use bitset::{BitSet, Ones};
pub use component::{
    define_component, ComponentDef, FieldDescriptor, FieldType, ResetPolicy, Schema,
};
pub use entity::{EntityAllocator, EntityId};
pub use query::{
    changed, define_query, enter_query, exit_query, not, EnterQuery, ExitQuery, Query, Term,
};
pub use storage::{clamp_u8, Column, ColumnData, ComponentStore, Primitive};
pub use system::{define_system, pipe, Pipe, System};
pub use world::{create_world, delete_world, reset_world, World, MAX_COMPONENTS};

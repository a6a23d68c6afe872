//! # STRATA Core
//!
//! Data-oriented entity component system with bitmask queries, change
//! tracking and binary world snapshots.
//!
//! ## Architecture Rules
//!
//! 1. **Pre-allocated storage** - every column and bit-vector is sized to the
//!    world's capacity when a component is registered
//! 2. **Structure of arrays** - one contiguous column per flattened field
//! 3. **Bitmask membership** - component presence is one bit per entity
//! 4. **Deferred removal** - entities leave only at [`World::commit_removals`]
//!
//! ## Example
//!
//! ```rust
//! use strata_core::{
//!     define_component, define_query, enter_query, FieldType, Schema, World, WorldConfig,
//! };
//!
//! let position = define_component(Schema::object([
//!     ("x", Schema::from(FieldType::F32)),
//!     ("y", Schema::from(FieldType::F32)),
//! ]));
//! let mut world = World::with_config(WorldConfig::fixed(1_000)).unwrap();
//! let moving = define_query([&position]);
//! let spawned = enter_query(&moving);
//!
//! let e = world.add_entity().unwrap();
//! world.add_component(&position, e).unwrap();
//! assert_eq!(spawned.run(&mut world).unwrap(), vec![e]);
//! assert!(spawned.run(&mut world).unwrap().is_empty());
//!
//! for id in moving.run(&mut world).unwrap() {
//!     let x = world.get::<f32>(&position, "x", id).unwrap();
//!     world.set::<f32>(&position, "x", id, x + 1.0).unwrap();
//! }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod ecs;
pub mod error;
pub mod serial;

pub use config::{
    default_config, set_default_config, set_default_size, CapacityPolicy, WorldConfig,
    DEFAULT_SIZE,
};
pub use ecs::{
    changed, create_world, define_component, define_query, define_system, delete_world,
    enter_query, exit_query, not, pipe, reset_world, BitSet, Column, ComponentDef,
    ComponentStore, EnterQuery, EntityId, ExitQuery, FieldDescriptor, FieldType, Pipe,
    Primitive, Query, ResetPolicy, Schema, System, Term, World, MAX_COMPONENTS,
};
pub use error::{EcsError, EcsResult};
pub use serial::{
    define_deserializer, define_serializer, DeserializeMode, Deserializer, Packet,
    SerializeTarget, Serializer,
};

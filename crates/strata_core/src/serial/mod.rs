//! # Serialization
//!
//! Binary snapshots and diffs of world state.
//!
//! ```rust
//! use strata_core::{
//!     define_component, define_deserializer, define_serializer, DeserializeMode, FieldType,
//!     Schema, SerializeTarget, World, WorldConfig,
//! };
//!
//! let health = define_component(Schema::from(FieldType::U16));
//! let mut server = World::with_config(WorldConfig::fixed(32)).unwrap();
//! let hero = server.add_entity().unwrap();
//! server.add_component(&health, hero).unwrap();
//! server.set::<u16>(&health, "", hero, 90).unwrap();
//!
//! let packet = define_serializer(SerializeTarget::components([&health]), None)
//!     .serialize(&mut server)
//!     .unwrap();
//!
//! let mut client = World::with_config(WorldConfig::fixed(32)).unwrap();
//! client.register_component(&health).unwrap();
//! let ids = define_deserializer(SerializeTarget::components([&health]))
//!     .deserialize(&mut client, packet.bytes(), DeserializeMode::Map)
//!     .unwrap();
//! assert_eq!(client.get::<u16>(&health, "", ids[0]).unwrap(), 90);
//! ```

pub mod codec;
mod deserializer;
mod serializer;

pub use deserializer::{define_deserializer, DeserializeMode, Deserializer};
pub use serializer::{define_serializer, Packet, SerializeTarget, Serializer};

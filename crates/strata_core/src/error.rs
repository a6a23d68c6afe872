//! # Error Types
//!
//! Every fallible world, query and serialization operation reports through
//! [`EcsError`]. All variants are local and recoverable: a returned error
//! never leaves the world half-mutated.

use thiserror::Error;

use crate::ecs::EntityId;

/// Errors that can occur while operating on a world.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EcsError {
    /// Allocation would exceed the world's capacity.
    #[error("capacity exceeded: world holds at most {capacity} entities")]
    CapacityExceeded {
        /// The capacity that was hit.
        capacity: usize,
    },

    /// The component was never registered on this world.
    #[error("component {component} is not registered on this world")]
    UnregisteredComponent {
        /// Label of the component.
        component: String,
    },

    /// A packet's declared layout disagrees with the local layout.
    #[error("layout mismatch at component {component}: {reason}")]
    LayoutMismatch {
        /// Header index of the offending component term.
        component: usize,
        /// What differed.
        reason: String,
    },

    /// The packet header alone does not fit in the byte budget.
    #[error("serialization overflow: {required} bytes required, cap is {max_bytes}")]
    SerializationOverflow {
        /// The configured cap.
        max_bytes: usize,
        /// Bytes needed for the smallest valid packet.
        required: usize,
    },

    /// The id is not a live entity of this world.
    #[error("invalid entity: {0}")]
    InvalidEntity(EntityId),

    /// The world's component bitmask space is exhausted.
    #[error("too many components: a world holds at most {limit}")]
    TooManyComponents {
        /// Maximum number of registered components.
        limit: usize,
    },

    /// No field with this path exists on the component.
    #[error("component {component} has no field '{path}'")]
    UnknownField {
        /// Label of the component.
        component: String,
        /// The requested field path.
        path: String,
    },

    /// The field exists but is stored with a different primitive type.
    #[error("field '{path}' is stored as {expected}")]
    FieldTypeMismatch {
        /// The requested field path.
        path: String,
        /// Name of the stored type tag.
        expected: &'static str,
    },

    /// The packet is truncated or corrupt.
    #[error("malformed packet: {0}")]
    MalformedPacket(String),

    /// Configuration could not be parsed or failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type for world operations.
pub type EcsResult<T> = Result<T, EcsError>;

//! # Component Definitions
//!
//! A component is described by a [`Schema`]: a tree of named fields whose
//! leaves are primitive [`FieldType`]s or fixed-length arrays of them.
//! [`define_component`] flattens the tree once into [`FieldDescriptor`]s,
//! each of which becomes one capacity-sized column when the component is
//! registered in a world.
//!
//! Definitions hold no storage and can be registered in any number of
//! worlds; each world allocates its own columns.
//!
//! ## Example
//!
//! ```rust
//! use strata_core::{ComponentDef, FieldType, Schema};
//!
//! let transform = ComponentDef::named(
//!     "Transform",
//!     Schema::object([
//!         ("position", Schema::object([
//!             ("x", Schema::from(FieldType::F32)),
//!             ("y", Schema::from(FieldType::F32)),
//!         ])),
//!         ("matrix", Schema::array(FieldType::F32, 9)),
//!     ]),
//! );
//! assert_eq!(transform.fields().len(), 3);
//! assert_eq!(transform.fields()[1].path, "position.y");
//! ```

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Primitive storage type of a field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FieldType {
    /// Signed 8-bit integer.
    I8 = 0,
    /// Unsigned 8-bit integer.
    U8 = 1,
    /// Unsigned 8-bit integer, clamped on numeric conversion.
    U8Clamped = 2,
    /// Signed 16-bit integer.
    I16 = 3,
    /// Unsigned 16-bit integer.
    U16 = 4,
    /// Signed 32-bit integer.
    I32 = 5,
    /// Unsigned 32-bit integer.
    U32 = 6,
    /// 32-bit float.
    F32 = 7,
    /// 64-bit float.
    F64 = 8,
    /// Reference to another entity, stored as `u32`.
    Eid = 9,
}

impl FieldType {
    /// All type tags in tag order.
    pub const ALL: [Self; 10] = [
        Self::I8,
        Self::U8,
        Self::U8Clamped,
        Self::I16,
        Self::U16,
        Self::I32,
        Self::U32,
        Self::F32,
        Self::F64,
        Self::Eid,
    ];

    /// Size of one element in bytes.
    #[inline]
    #[must_use]
    pub const fn size(self) -> usize {
        match self {
            Self::I8 | Self::U8 | Self::U8Clamped => 1,
            Self::I16 | Self::U16 => 2,
            Self::I32 | Self::U32 | Self::F32 | Self::Eid => 4,
            Self::F64 => 8,
        }
    }

    /// Short type name, as used in error messages.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::I8 => "i8",
            Self::U8 => "u8",
            Self::U8Clamped => "u8c",
            Self::I16 => "i16",
            Self::U16 => "u16",
            Self::I32 => "i32",
            Self::U32 => "u32",
            Self::F32 => "f32",
            Self::F64 => "f64",
            Self::Eid => "eid",
        }
    }

    /// Wire tag of this type.
    #[inline]
    #[must_use]
    pub const fn tag(self) -> u8 {
        self as u8
    }

    /// Decodes a wire tag.
    #[must_use]
    pub fn from_tag(tag: u8) -> Option<Self> {
        Self::ALL.get(tag as usize).copied()
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Declarative shape of a component.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Schema {
    /// A single primitive value per entity.
    Field(FieldType),
    /// A fixed-length array of primitives per entity.
    Array(FieldType, usize),
    /// Named sub-fields, in declaration order.
    Object(Vec<(String, Schema)>),
}

impl Schema {
    /// A schema with no fields. Components built from it are tags.
    #[must_use]
    pub const fn empty() -> Self {
        Self::Object(Vec::new())
    }

    /// A fixed-length array field.
    #[must_use]
    pub const fn array(ty: FieldType, len: usize) -> Self {
        Self::Array(ty, len)
    }

    /// Builds an object schema. A repeated key replaces the earlier entry
    /// in place.
    #[must_use]
    pub fn object<I, K>(fields: I) -> Self
    where
        I: IntoIterator<Item = (K, Schema)>,
        K: Into<String>,
    {
        let mut out: Vec<(String, Schema)> = Vec::new();
        for (key, schema) in fields {
            let key = key.into();
            if let Some(slot) = out.iter_mut().find(|(k, _)| *k == key) {
                slot.1 = schema;
            } else {
                out.push((key, schema));
            }
        }
        Self::Object(out)
    }

    /// Flattens the tree into column descriptors, depth-first in
    /// declaration order. Zero-length arrays produce no column.
    #[must_use]
    pub fn flatten(&self) -> Vec<FieldDescriptor> {
        let mut out = Vec::new();
        self.flatten_into(String::new(), &mut out);
        out
    }

    fn flatten_into(&self, path: String, out: &mut Vec<FieldDescriptor>) {
        match self {
            Self::Field(ty) => out.push(FieldDescriptor {
                path,
                ty: *ty,
                array_len: None,
            }),
            Self::Array(_, 0) => {}
            Self::Array(ty, len) => out.push(FieldDescriptor {
                path,
                ty: *ty,
                array_len: Some(*len),
            }),
            Self::Object(fields) => {
                for (key, child) in fields {
                    let child_path = if path.is_empty() {
                        key.clone()
                    } else {
                        format!("{path}.{key}")
                    };
                    child.flatten_into(child_path, out);
                }
            }
        }
    }
}

impl From<FieldType> for Schema {
    fn from(ty: FieldType) -> Self {
        Self::Field(ty)
    }
}

impl From<(FieldType, usize)> for Schema {
    fn from((ty, len): (FieldType, usize)) -> Self {
        Self::Array(ty, len)
    }
}

/// One flattened leaf of a schema, backed by one column.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FieldDescriptor {
    /// Dotted path from the schema root, e.g. `"position.x"`.
    pub path: String,
    /// Element type.
    pub ty: FieldType,
    /// `Some(n)` for fixed arrays, `None` for scalars.
    pub array_len: Option<usize>,
}

impl FieldDescriptor {
    /// Elements stored per entity.
    #[inline]
    #[must_use]
    pub fn stride(&self) -> usize {
        self.array_len.unwrap_or(1)
    }

    /// Bytes stored per entity.
    #[inline]
    #[must_use]
    pub fn slot_bytes(&self) -> usize {
        self.stride() * self.ty.size()
    }
}

/// What happens to a component's data when its entity's removal is
/// committed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ResetPolicy {
    /// Zero every slot so a recycled id starts clean.
    #[default]
    Zero,
    /// Leave stale values behind; presence bits are still cleared.
    Keep,
}

static NEXT_COMPONENT_ID: AtomicU64 = AtomicU64::new(0);

struct ComponentInner {
    id: u64,
    name: Option<String>,
    schema: Schema,
    fields: Vec<FieldDescriptor>,
    reset: ResetPolicy,
}

/// A compiled, storage-free component definition.
///
/// Cloning is cheap; clones compare equal and name the same component.
#[derive(Clone)]
pub struct ComponentDef(Arc<ComponentInner>);

impl ComponentDef {
    /// Compiles an anonymous component.
    #[must_use]
    pub fn new(schema: Schema) -> Self {
        Self::build(None, schema, ResetPolicy::default())
    }

    /// Compiles a component with a label used in logs and errors.
    #[must_use]
    pub fn named(name: impl Into<String>, schema: Schema) -> Self {
        Self::build(Some(name.into()), schema, ResetPolicy::default())
    }

    /// Compiles a component with an explicit removal policy.
    #[must_use]
    pub fn with_reset(name: Option<String>, schema: Schema, reset: ResetPolicy) -> Self {
        Self::build(name, schema, reset)
    }

    fn build(name: Option<String>, schema: Schema, reset: ResetPolicy) -> Self {
        let fields = schema.flatten();
        Self(Arc::new(ComponentInner {
            id: NEXT_COMPONENT_ID.fetch_add(1, Ordering::Relaxed),
            name,
            schema,
            fields,
            reset,
        }))
    }

    /// Process-unique identity of this definition.
    #[inline]
    #[must_use]
    pub fn id(&self) -> u64 {
        self.0.id
    }

    /// Label for logs and errors.
    #[must_use]
    pub fn name(&self) -> String {
        match &self.0.name {
            Some(name) => name.clone(),
            None => format!("component#{}", self.0.id),
        }
    }

    /// The schema this definition was compiled from.
    #[must_use]
    pub fn schema(&self) -> &Schema {
        &self.0.schema
    }

    /// Flattened fields in declaration order.
    #[inline]
    #[must_use]
    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.0.fields
    }

    /// Position of the field with this path.
    #[must_use]
    pub fn field_index(&self, path: &str) -> Option<usize> {
        self.0.fields.iter().position(|f| f.path == path)
    }

    /// Returns `true` if the component has no data, only presence.
    #[inline]
    #[must_use]
    pub fn is_tag(&self) -> bool {
        self.0.fields.is_empty()
    }

    /// Policy applied when an entity's removal is committed.
    #[inline]
    #[must_use]
    pub fn reset_policy(&self) -> ResetPolicy {
        self.0.reset
    }

    pub(crate) fn zeroes_on_remove(&self) -> bool {
        self.0.reset == ResetPolicy::Zero
    }

    /// Bytes of field data per entity.
    #[must_use]
    pub fn row_bytes(&self) -> usize {
        self.0.fields.iter().map(FieldDescriptor::slot_bytes).sum()
    }
}

impl PartialEq for ComponentDef {
    fn eq(&self, other: &Self) -> bool {
        self.0.id == other.0.id
    }
}

impl Eq for ComponentDef {}

impl Hash for ComponentDef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.id.hash(state);
    }
}

impl fmt::Debug for ComponentDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentDef")
            .field("name", &self.name())
            .field("fields", &self.0.fields)
            .finish()
    }
}

/// Compiles a schema into a component definition.
#[must_use]
pub fn define_component(schema: Schema) -> ComponentDef {
    ComponentDef::new(schema)
}

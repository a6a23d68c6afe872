//! # Component Storage
//!
//! Pre-allocated, column-wise storage for one component in one world.
//!
//! Every flattened field of a component gets its own [`Column`], sized to
//! the world's capacity times the field's stride:
//! - All slots are allocated at registration (and on growth)
//! - Access is O(1) via entity id
//! - Bulk iteration walks contiguous memory
//!
//! A [`ComponentStore`] bundles the columns with the component's presence
//! and changed bit-vectors.

use std::fmt;

use bytemuck::{Pod, Zeroable};

use super::bitset::BitSet;
use super::component::{ComponentDef, FieldDescriptor, FieldType};
use super::entity::EntityId;

/// Typed backing buffer of a column.
///
/// `U8Clamped` fields are stored as `u8` and `Eid` fields as `u32`.
#[derive(Clone, Debug, PartialEq)]
pub enum ColumnData {
    /// `i8` elements.
    I8(Vec<i8>),
    /// `u8` elements.
    U8(Vec<u8>),
    /// `i16` elements.
    I16(Vec<i16>),
    /// `u16` elements.
    U16(Vec<u16>),
    /// `i32` elements.
    I32(Vec<i32>),
    /// `u32` elements.
    U32(Vec<u32>),
    /// `f32` elements.
    F32(Vec<f32>),
    /// `f64` elements.
    F64(Vec<f64>),
}

macro_rules! with_data {
    ($data:expr, $v:ident => $body:expr) => {
        match $data {
            ColumnData::I8($v) => $body,
            ColumnData::U8($v) => $body,
            ColumnData::I16($v) => $body,
            ColumnData::U16($v) => $body,
            ColumnData::I32($v) => $body,
            ColumnData::U32($v) => $body,
            ColumnData::F32($v) => $body,
            ColumnData::F64($v) => $body,
        }
    };
}

impl ColumnData {
    fn zeroed(ty: FieldType, len: usize) -> Self {
        match ty {
            FieldType::I8 => Self::I8(vec![0; len]),
            FieldType::U8 | FieldType::U8Clamped => Self::U8(vec![0; len]),
            FieldType::I16 => Self::I16(vec![0; len]),
            FieldType::U16 => Self::U16(vec![0; len]),
            FieldType::I32 => Self::I32(vec![0; len]),
            FieldType::U32 | FieldType::Eid => Self::U32(vec![0; len]),
            FieldType::F32 => Self::F32(vec![0.0; len]),
            FieldType::F64 => Self::F64(vec![0.0; len]),
        }
    }

    fn len(&self) -> usize {
        with_data!(self, v => v.len())
    }
}

/// A primitive that can be read from and written to a column.
pub trait Primitive: Pod + PartialEq + fmt::Debug {
    /// Returns `true` if values of this type are stored for `ty` fields.
    fn accepts(ty: FieldType) -> bool;
    /// Borrows the column buffer if it holds this type.
    fn slice(data: &ColumnData) -> Option<&[Self]>;
    /// Mutably borrows the column buffer if it holds this type.
    fn slice_mut(data: &mut ColumnData) -> Option<&mut [Self]>;
    /// Appends the little-endian encoding of `self`.
    fn write_le(self, out: &mut Vec<u8>);
    /// Decodes from exactly `size_of::<Self>()` little-endian bytes.
    fn read_le(bytes: &[u8]) -> Self;
    /// Widens to `f64`.
    fn to_f64(self) -> f64;
    /// Narrows from `f64` with typed-array semantics: integers truncate
    /// and wrap, non-finite values become zero.
    fn from_f64(value: f64) -> Self;
}

macro_rules! impl_primitive {
    ($ty:ty, $variant:ident, [$($tag:ident),+], |$x:ident| $from:expr) => {
        impl Primitive for $ty {
            #[inline]
            fn accepts(ty: FieldType) -> bool {
                matches!(ty, $(FieldType::$tag)|+)
            }

            #[inline]
            fn slice(data: &ColumnData) -> Option<&[Self]> {
                match data {
                    ColumnData::$variant(v) => Some(v),
                    _ => None,
                }
            }

            #[inline]
            fn slice_mut(data: &mut ColumnData) -> Option<&mut [Self]> {
                match data {
                    ColumnData::$variant(v) => Some(v),
                    _ => None,
                }
            }

            #[inline]
            fn write_le(self, out: &mut Vec<u8>) {
                out.extend_from_slice(&self.to_le_bytes());
            }

            #[inline]
            fn read_le(bytes: &[u8]) -> Self {
                let mut buf = [0u8; std::mem::size_of::<$ty>()];
                buf.copy_from_slice(bytes);
                <$ty>::from_le_bytes(buf)
            }

            #[inline]
            #[allow(clippy::cast_lossless, clippy::cast_precision_loss)]
            fn to_f64(self) -> f64 {
                self as f64
            }

            #[inline]
            #[allow(
                clippy::cast_possible_truncation,
                clippy::cast_sign_loss,
                clippy::cast_possible_wrap
            )]
            fn from_f64($x: f64) -> Self {
                $from
            }
        }
    };
}

macro_rules! wrap_int {
    ($x:ident, $ty:ty) => {
        if $x.is_finite() {
            ($x.trunc() as i64) as $ty
        } else {
            0
        }
    };
}

impl_primitive!(i8, I8, [I8], |x| wrap_int!(x, i8));
impl_primitive!(u8, U8, [U8, U8Clamped], |x| wrap_int!(x, u8));
impl_primitive!(i16, I16, [I16], |x| wrap_int!(x, i16));
impl_primitive!(u16, U16, [U16], |x| wrap_int!(x, u16));
impl_primitive!(i32, I32, [I32], |x| wrap_int!(x, i32));
impl_primitive!(u32, U32, [U32, Eid], |x| wrap_int!(x, u32));
impl_primitive!(f32, F32, [F32], |x| x as f32);
impl_primitive!(f64, F64, [F64], |x| x);

/// Converts to `u8` the way a clamped byte array does: NaN is zero, values
/// saturate to `0..=255` and halves round to even.
#[must_use]
pub fn clamp_u8(value: f64) -> u8 {
    if value.is_nan() || value <= 0.0 {
        return 0;
    }
    if value >= 255.0 {
        return 255;
    }
    let floor = value.floor();
    let diff = value - floor;
    let rounded = if diff > 0.5 || (diff == 0.5 && floor % 2.0 != 0.0) {
        floor + 1.0
    } else {
        floor
    };
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let byte = rounded as u8;
    byte
}

/// Storage for one flattened field across all entity slots.
#[derive(Clone, Debug, PartialEq)]
pub struct Column {
    descriptor: FieldDescriptor,
    stride: usize,
    data: ColumnData,
}

impl Column {
    /// Creates a zeroed column for `capacity` entities.
    #[must_use]
    pub fn new(descriptor: FieldDescriptor, capacity: usize) -> Self {
        let stride = descriptor.stride();
        let data = ColumnData::zeroed(descriptor.ty, capacity * stride);
        Self {
            descriptor,
            stride,
            data,
        }
    }

    /// The field this column stores.
    #[inline]
    #[must_use]
    pub fn descriptor(&self) -> &FieldDescriptor {
        &self.descriptor
    }

    /// Elements per entity.
    #[inline]
    #[must_use]
    pub const fn stride(&self) -> usize {
        self.stride
    }

    /// Number of entity slots.
    #[must_use]
    pub fn capacity(&self) -> usize {
        if self.stride == 0 {
            0
        } else {
            self.data.len() / self.stride
        }
    }

    /// The typed backing buffer.
    #[inline]
    #[must_use]
    pub fn data(&self) -> &ColumnData {
        &self.data
    }

    /// The whole column as `T`, or `None` on a type mismatch.
    ///
    /// Entity `e` occupies `[e * stride, (e + 1) * stride)`.
    #[inline]
    #[must_use]
    pub fn as_slice<T: Primitive>(&self) -> Option<&[T]> {
        T::slice(&self.data)
    }

    /// The whole column as raw native-endian bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        with_data!(&self.data, v => bytemuck::cast_slice(v.as_slice()))
    }

    /// The elements belonging to `eid`.
    #[must_use]
    pub fn slot<T: Primitive>(&self, eid: EntityId) -> Option<&[T]> {
        let start = eid as usize * self.stride;
        T::slice(&self.data)?.get(start..start + self.stride)
    }

    /// Mutable elements belonging to `eid`.
    pub fn slot_mut<T: Primitive>(&mut self, eid: EntityId) -> Option<&mut [T]> {
        let start = eid as usize * self.stride;
        T::slice_mut(&mut self.data)?.get_mut(start..start + self.stride)
    }

    /// Reads element `element` of `eid`'s slot as `f64`.
    #[must_use]
    pub fn get_f64(&self, eid: EntityId, element: usize) -> Option<f64> {
        if element >= self.stride {
            return None;
        }
        let index = eid as usize * self.stride + element;
        with_data!(&self.data, v => v.get(index).map(|x| Primitive::to_f64(*x)))
    }

    /// Writes element `element` of `eid`'s slot from an `f64`, converting
    /// with the field type's semantics. Returns `false` if out of range.
    pub fn set_f64(&mut self, eid: EntityId, element: usize, value: f64) -> bool {
        if element >= self.stride {
            return false;
        }
        let index = eid as usize * self.stride + element;
        let clamped = self.descriptor.ty == FieldType::U8Clamped;
        let written = match &mut self.data {
            ColumnData::U8(v) if clamped => v.get_mut(index).map(|x| *x = clamp_u8(value)),
            data => with_data!(data, v => v.get_mut(index).map(|x| *x = Primitive::from_f64(value))),
        };
        written.is_some()
    }

    /// Appends `eid`'s slot as little-endian bytes.
    pub fn encode_slot(&self, eid: EntityId, out: &mut Vec<u8>) {
        let start = eid as usize * self.stride;
        with_data!(&self.data, v => {
            if let Some(slot) = v.get(start..start + self.stride) {
                for x in slot {
                    (*x).write_le(out);
                }
            }
        });
    }

    /// Overwrites `eid`'s slot from little-endian bytes.
    ///
    /// `bytes` must hold exactly one slot; returns `false` otherwise.
    pub fn decode_slot(&mut self, eid: EntityId, bytes: &[u8]) -> bool {
        if bytes.len() != self.descriptor.slot_bytes() {
            return false;
        }
        let start = eid as usize * self.stride;
        let size = self.descriptor.ty.size();
        with_data!(&mut self.data, v => match v.get_mut(start..start + self.stride) {
            Some(slot) => {
                for (dst, chunk) in slot.iter_mut().zip(bytes.chunks_exact(size)) {
                    *dst = Primitive::read_le(chunk);
                }
                true
            }
            None => false,
        })
    }

    /// Zeroes `eid`'s slot.
    pub fn zero(&mut self, eid: EntityId) {
        let start = eid as usize * self.stride;
        with_data!(&mut self.data, v => {
            if let Some(slot) = v.get_mut(start..start + self.stride) {
                slot.fill(Zeroable::zeroed());
            }
        });
    }

    /// Zeroes every slot.
    pub fn clear(&mut self) {
        with_data!(&mut self.data, v => v.fill(Zeroable::zeroed()));
    }

    /// Extends the column to `capacity` slots; new slots are zeroed.
    pub fn grow(&mut self, capacity: usize) {
        let len = capacity * self.stride;
        with_data!(&mut self.data, v => v.resize(len, Zeroable::zeroed()));
    }
}

/// A component definition bound to one world.
#[derive(Clone, Debug)]
pub struct ComponentStore {
    def: ComponentDef,
    /// Bit position within the world's component space.
    index: usize,
    columns: Vec<Column>,
    presence: BitSet,
    changed: BitSet,
}

impl ComponentStore {
    /// Allocates columns and bit-vectors for `capacity` entities.
    #[must_use]
    pub fn new(def: ComponentDef, index: usize, capacity: usize) -> Self {
        let columns = def
            .fields()
            .iter()
            .map(|field| Column::new(field.clone(), capacity))
            .collect();
        Self {
            def,
            index,
            columns,
            presence: BitSet::new(capacity),
            changed: BitSet::new(capacity),
        }
    }

    /// The bound definition.
    #[inline]
    #[must_use]
    pub fn def(&self) -> &ComponentDef {
        &self.def
    }

    /// Index within the world's component space.
    #[inline]
    #[must_use]
    pub const fn index(&self) -> usize {
        self.index
    }

    /// Columns in field declaration order.
    #[inline]
    #[must_use]
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    #[inline]
    pub(crate) fn columns_mut(&mut self) -> &mut [Column] {
        &mut self.columns
    }

    /// Column for the field at `field` (declaration order).
    #[inline]
    #[must_use]
    pub fn column(&self, field: usize) -> Option<&Column> {
        self.columns.get(field)
    }

    /// Mutable column for the field at `field`.
    #[inline]
    pub fn column_mut(&mut self, field: usize) -> Option<&mut Column> {
        self.columns.get_mut(field)
    }

    /// Presence bit-vector.
    #[inline]
    #[must_use]
    pub fn presence(&self) -> &BitSet {
        &self.presence
    }

    /// Store-level changed bit-vector.
    #[inline]
    #[must_use]
    pub fn changed(&self) -> &BitSet {
        &self.changed
    }

    /// O(1) presence test.
    #[inline]
    #[must_use]
    pub fn has(&self, eid: EntityId) -> bool {
        self.presence.contains(eid as usize)
    }

    /// Sets the presence bit. Returns `true` if it was clear.
    #[inline]
    pub fn insert(&mut self, eid: EntityId) -> bool {
        self.presence.insert(eid as usize)
    }

    /// Clears the presence and changed bits. Returns `true` if present.
    #[inline]
    pub fn remove(&mut self, eid: EntityId) -> bool {
        self.changed.remove(eid as usize);
        self.presence.remove(eid as usize)
    }

    /// Zeroes every column slot of `eid`.
    pub fn zero(&mut self, eid: EntityId) {
        for column in &mut self.columns {
            column.zero(eid);
        }
    }

    /// Sets the store-level changed bit of `eid`.
    #[inline]
    pub fn mark_changed(&mut self, eid: EntityId) {
        self.changed.insert(eid as usize);
    }

    /// Tests the store-level changed bit of `eid`.
    #[inline]
    #[must_use]
    pub fn is_changed(&self, eid: EntityId) -> bool {
        self.changed.contains(eid as usize)
    }

    /// Clears every store-level changed bit.
    pub fn clear_changed(&mut self) {
        self.changed.clear();
    }

    /// Reallocates to `capacity` slots, copying existing data.
    pub fn grow(&mut self, capacity: usize) {
        for column in &mut self.columns {
            column.grow(capacity);
        }
        self.presence.resize(capacity);
        self.changed.resize(capacity);
    }

    /// Clears presence, change state and data.
    pub fn clear(&mut self) {
        for column in &mut self.columns {
            column.clear();
        }
        self.presence.clear();
        self.changed.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::component::{define_component, Schema};

    fn field(path: &str, ty: FieldType, array_len: Option<usize>) -> FieldDescriptor {
        FieldDescriptor {
            path: path.into(),
            ty,
            array_len,
        }
    }

    #[test]
    fn test_column_creation() {
        let column = Column::new(field("v", FieldType::F32, Some(3)), 100);
        assert_eq!(column.capacity(), 100);
        assert_eq!(column.as_slice::<f32>().unwrap().len(), 300);
        assert!(column.as_slice::<f64>().is_none());
    }

    #[test]
    fn test_slot_access() {
        let mut column = Column::new(field("v", FieldType::I16, Some(2)), 4);
        column.slot_mut::<i16>(2).unwrap().copy_from_slice(&[-5, 7]);
        assert_eq!(column.slot::<i16>(2).unwrap(), &[-5, 7]);
        assert_eq!(column.slot::<i16>(1).unwrap(), &[0, 0]);
        assert!(column.slot::<i16>(4).is_none());
    }

    #[test]
    fn test_encode_decode_slot() {
        let mut column = Column::new(field("x", FieldType::F64, None), 2);
        column.set_f64(1, 0, 2.5);
        let mut bytes = Vec::new();
        column.encode_slot(1, &mut bytes);
        assert_eq!(bytes, 2.5f64.to_le_bytes());

        assert!(column.decode_slot(0, &bytes));
        assert_eq!(column.get_f64(0, 0), Some(2.5));
        assert!(!column.decode_slot(0, &bytes[..4]));
    }

    #[test]
    fn test_numeric_conversion() {
        let mut clamped = Column::new(field("c", FieldType::U8Clamped, None), 1);
        clamped.set_f64(0, 0, 300.0);
        assert_eq!(clamped.get_f64(0, 0), Some(255.0));
        clamped.set_f64(0, 0, 2.5);
        assert_eq!(clamped.get_f64(0, 0), Some(2.0));
        clamped.set_f64(0, 0, 3.5);
        assert_eq!(clamped.get_f64(0, 0), Some(4.0));

        let mut wrapping = Column::new(field("w", FieldType::U8, None), 1);
        wrapping.set_f64(0, 0, 257.9);
        assert_eq!(wrapping.get_f64(0, 0), Some(1.0));

        let mut signed = Column::new(field("s", FieldType::I8, None), 1);
        signed.set_f64(0, 0, f64::NAN);
        assert_eq!(signed.get_f64(0, 0), Some(0.0));
        signed.set_f64(0, 0, -129.0);
        assert_eq!(signed.get_f64(0, 0), Some(127.0));
    }

    #[test]
    fn test_zero_and_grow() {
        let mut column = Column::new(field("x", FieldType::U32, None), 2);
        column.set_f64(0, 0, 9.0);
        column.set_f64(1, 0, 8.0);
        column.zero(0);
        column.grow(5);
        assert_eq!(column.capacity(), 5);
        assert_eq!(column.as_slice::<u32>().unwrap(), &[0, 8, 0, 0, 0]);
        assert_eq!(column.as_bytes().len(), 20);
    }

    #[test]
    fn test_store_presence() {
        let def = define_component(Schema::object([("x", Schema::from(FieldType::F32))]));
        let mut store = ComponentStore::new(def, 0, 8);
        assert!(!store.has(3));
        assert!(store.insert(3));
        store.mark_changed(3);
        assert!(store.has(3) && store.is_changed(3));
        assert!(store.remove(3));
        assert!(!store.has(3) && !store.is_changed(3));

        store.grow(16);
        assert_eq!(store.presence().len(), 16);
        assert_eq!(store.columns()[0].capacity(), 16);
    }
}

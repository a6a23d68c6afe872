//! # Packet Codec
//!
//! Little-endian primitives and the packet header shared by the serializer
//! and the deserializer.
//!
//! ## Wire Format
//!
//! ```text
//! magic "STRA" | version u8 | component_count u8
//! per component: flags u8 | field_count u16 | per field: type u8, array_len u32
//! entity_count u32
//! per entity (ascending id): id u32 | mask u64 | slot bytes of each set component
//! ```
//!
//! `array_len` is 0 for scalar fields. Flag bit 0 marks a component selected
//! by a `Changed` term. Slot bytes follow the component's field declaration
//! order.

use crate::ecs::{ComponentDef, FieldType};
use crate::error::{EcsError, EcsResult};

/// Leading bytes of every packet.
pub const MAGIC: [u8; 4] = *b"STRA";

/// Wire format version.
pub const VERSION: u8 = 1;

/// Flag bit for components encoded as change diffs.
pub const FLAG_CHANGED: u8 = 0b0000_0001;

/// Growable little-endian writer.
#[derive(Debug, Default)]
pub struct PacketWriter {
    buffer: Vec<u8>,
}

impl PacketWriter {
    /// Creates an empty writer.
    #[must_use]
    pub const fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Returns the number of bytes written.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Returns true if no bytes have been written.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Returns a slice of the written data.
    #[inline]
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.buffer
    }

    /// Consumes the writer, returning its bytes.
    #[must_use]
    pub fn into_inner(self) -> Vec<u8> {
        self.buffer
    }

    /// Writes a single byte.
    #[inline]
    pub fn write_u8(&mut self, value: u8) {
        self.buffer.push(value);
    }

    /// Writes a u16 in little-endian format.
    #[inline]
    pub fn write_u16(&mut self, value: u16) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Writes a u32 in little-endian format.
    #[inline]
    pub fn write_u32(&mut self, value: u32) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Writes a u64 in little-endian format.
    #[inline]
    pub fn write_u64(&mut self, value: u64) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Writes raw bytes.
    #[inline]
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Overwrites a u32 written earlier at `at`. Returns false if out of
    /// bounds.
    pub fn patch_u32(&mut self, at: usize, value: u32) -> bool {
        match self.buffer.get_mut(at..at + 4) {
            Some(dst) => {
                dst.copy_from_slice(&value.to_le_bytes());
                true
            }
            None => false,
        }
    }
}

/// Little-endian reader over a borrowed packet.
pub struct PacketReader<'a> {
    buffer: &'a [u8],
    position: usize,
}

impl<'a> PacketReader<'a> {
    /// Creates a new reader over `buffer`.
    #[must_use]
    pub const fn new(buffer: &'a [u8]) -> Self {
        Self { buffer, position: 0 }
    }

    /// Returns the number of bytes remaining.
    #[inline]
    #[must_use]
    pub const fn remaining(&self) -> usize {
        self.buffer.len().saturating_sub(self.position)
    }

    /// Reads `len` raw bytes.
    #[inline]
    pub fn read_bytes(&mut self, len: usize) -> Option<&'a [u8]> {
        let end = self.position.checked_add(len)?;
        let bytes = self.buffer.get(self.position..end)?;
        self.position = end;
        Some(bytes)
    }

    /// Reads a single byte.
    #[inline]
    pub fn read_u8(&mut self) -> Option<u8> {
        self.read_bytes(1).map(|b| b[0])
    }

    /// Reads a u16 in little-endian format.
    #[inline]
    pub fn read_u16(&mut self) -> Option<u16> {
        let bytes = self.read_bytes(2)?;
        Some(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    /// Reads a u32 in little-endian format.
    #[inline]
    pub fn read_u32(&mut self) -> Option<u32> {
        let bytes = self.read_bytes(4)?;
        Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Reads a u64 in little-endian format.
    #[inline]
    pub fn read_u64(&mut self) -> Option<u64> {
        let bytes = self.read_bytes(8)?;
        bytemuck::try_pod_read_unaligned(bytes)
            .ok()
            .map(u64::from_le)
    }
}

/// Wire description of one field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FieldLayout {
    /// Storage type.
    pub ty: FieldType,
    /// Elements per entity; 0 for scalars.
    pub array_len: u32,
}

impl FieldLayout {
    /// Bytes one entity occupies for this field.
    #[must_use]
    pub fn slot_bytes(&self) -> usize {
        self.ty.size() * (self.array_len.max(1) as usize)
    }
}

/// Wire description of one component.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ComponentLayout {
    /// Encoded as a change diff.
    pub changed: bool,
    /// Fields in declaration order.
    pub fields: Vec<FieldLayout>,
}

impl ComponentLayout {
    /// Describes `def` as it would be written to a packet.
    #[must_use]
    pub fn of(def: &ComponentDef, changed: bool) -> Self {
        let fields = def
            .fields()
            .iter()
            .map(|f| FieldLayout {
                ty: f.ty,
                array_len: f.array_len.map_or(0, |n| u32::try_from(n).unwrap_or(u32::MAX)),
            })
            .collect();
        Self { changed, fields }
    }

    /// Bytes one entity occupies for this component.
    #[must_use]
    pub fn row_bytes(&self) -> usize {
        self.fields.iter().map(FieldLayout::slot_bytes).sum()
    }

    /// Describes the first difference from `other`, if any.
    #[must_use]
    pub fn diff(&self, other: &Self) -> Option<String> {
        if self.changed != other.changed {
            return Some("change-diff flag differs".to_string());
        }
        if self.fields.len() != other.fields.len() {
            return Some(format!(
                "{} fields in packet, {} locally",
                self.fields.len(),
                other.fields.len()
            ));
        }
        self.fields
            .iter()
            .zip(&other.fields)
            .enumerate()
            .find(|(_, (a, b))| a != b)
            .map(|(i, (a, b))| {
                format!(
                    "field {i} is {}[{}] in packet, {}[{}] locally",
                    a.ty, a.array_len, b.ty, b.array_len
                )
            })
    }
}

/// Decoded packet header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PacketHeader {
    /// Included components in mask-bit order.
    pub components: Vec<ComponentLayout>,
    /// Number of entity records that follow.
    pub entity_count: u32,
}

impl PacketHeader {
    /// Writes the header and returns the offset of the entity count, which
    /// the caller patches once the records are written.
    pub fn write(components: &[ComponentLayout], out: &mut PacketWriter) -> usize {
        out.write_bytes(&MAGIC);
        out.write_u8(VERSION);
        out.write_u8(u8::try_from(components.len()).unwrap_or(u8::MAX));
        for component in components {
            out.write_u8(if component.changed { FLAG_CHANGED } else { 0 });
            out.write_u16(u16::try_from(component.fields.len()).unwrap_or(u16::MAX));
            for field in &component.fields {
                out.write_u8(field.ty.tag());
                out.write_u32(field.array_len);
            }
        }
        let at = out.len();
        out.write_u32(0);
        at
    }

    /// Parses a header.
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::MalformedPacket`] for a truncated header, a bad
    /// magic or version, or an unknown field type.
    pub fn read(reader: &mut PacketReader<'_>) -> EcsResult<Self> {
        let truncated = || EcsError::MalformedPacket("truncated header".to_string());
        if reader.read_bytes(MAGIC.len()).ok_or_else(truncated)? != MAGIC {
            return Err(EcsError::MalformedPacket("bad magic".to_string()));
        }
        let version = reader.read_u8().ok_or_else(truncated)?;
        if version != VERSION {
            return Err(EcsError::MalformedPacket(format!(
                "unsupported version {version}"
            )));
        }
        let count = reader.read_u8().ok_or_else(truncated)?;
        if usize::from(count) > crate::ecs::MAX_COMPONENTS {
            return Err(EcsError::MalformedPacket(format!(
                "{count} components exceed the mask width"
            )));
        }
        let mut components = Vec::with_capacity(usize::from(count));
        for _ in 0..count {
            let flags = reader.read_u8().ok_or_else(truncated)?;
            let field_count = reader.read_u16().ok_or_else(truncated)?;
            let mut fields = Vec::with_capacity(usize::from(field_count).min(reader.remaining()));
            for _ in 0..field_count {
                let tag = reader.read_u8().ok_or_else(truncated)?;
                let ty = FieldType::from_tag(tag).ok_or_else(|| {
                    EcsError::MalformedPacket(format!("unknown field type tag {tag}"))
                })?;
                let array_len = reader.read_u32().ok_or_else(truncated)?;
                fields.push(FieldLayout { ty, array_len });
            }
            components.push(ComponentLayout {
                changed: flags & FLAG_CHANGED != 0,
                fields,
            });
        }
        let entity_count = reader.read_u32().ok_or_else(truncated)?;
        Ok(Self {
            components,
            entity_count,
        })
    }
}

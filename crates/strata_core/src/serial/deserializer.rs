//! # Deserializer
//!
//! Applies packets produced by a [`Serializer`](super::Serializer) to a
//! world under one of three reconciliation modes.
//!
//! A packet is validated in full before the world is touched: the header
//! must match the local layout of the deserializer's target, every record
//! must be well formed and the world must be able to hold every entity the
//! mode needs. A rejected packet leaves the world unchanged.

use std::collections::{HashMap, HashSet};

use tracing::{debug, warn};

use crate::ecs::{EntityId, FieldType, World};
use crate::error::{EcsError, EcsResult};

use super::codec::{ComponentLayout, PacketHeader, PacketReader};
use super::serializer::SerializeTarget;

/// How packet entity ids relate to local ids.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum DeserializeMode {
    /// Packet ids are local ids; data is overwritten in place and missing
    /// ids are claimed exactly.
    #[default]
    Replace,
    /// Every packet entity becomes a newly allocated local entity.
    Append,
    /// Packet ids are remote ids resolved through the world's persistent
    /// remote-to-local table; unseen ids allocate.
    Map,
}

struct Record<'a> {
    remote: EntityId,
    mask: u64,
    data: &'a [u8],
}

/// A compiled decoder.
#[derive(Clone, Debug)]
pub struct Deserializer {
    target: SerializeTarget,
}

impl Deserializer {
    /// The target this deserializer was compiled for.
    #[must_use]
    pub fn target(&self) -> &SerializeTarget {
        &self.target
    }

    /// Applies `packet` to `world` and returns the affected local ids in
    /// packet order.
    ///
    /// Every written component is flagged changed. For components included
    /// without a `Changed` term, a record whose mask lacks the component
    /// removes it locally. In `Map` and `Append` modes, `Eid` fields are
    /// translated to local ids.
    ///
    /// # Errors
    ///
    /// - [`EcsError::MalformedPacket`] for corrupt or truncated bytes.
    /// - [`EcsError::UnregisteredComponent`] if a target component is not
    ///   registered on `world`.
    /// - [`EcsError::LayoutMismatch`] if the packet header disagrees with
    ///   the local layout.
    /// - [`EcsError::CapacityExceeded`] if the world cannot hold the
    ///   entities the packet needs.
    pub fn deserialize(
        &self,
        world: &mut World,
        packet: &[u8],
        mode: DeserializeMode,
    ) -> EcsResult<Vec<EntityId>> {
        let mut reader = PacketReader::new(packet);
        let header = PacketHeader::read(&mut reader)?;
        let layout = self.target.resolve(world)?;
        check_layout(world, &header, &layout)?;
        let records = read_records(&mut reader, &header)?;
        plan(world, &header, &records, mode)?;

        let mut locals = Vec::with_capacity(records.len());
        let mut appended: HashMap<EntityId, EntityId> = HashMap::new();
        for record in &records {
            let local = match mode {
                DeserializeMode::Replace => {
                    if !world.is_alive(record.remote) {
                        world.claim_entity(record.remote)?;
                    }
                    record.remote
                }
                DeserializeMode::Append => {
                    let local = world.add_entity()?;
                    appended.insert(record.remote, local);
                    local
                }
                DeserializeMode::Map => map_remote(world, record.remote)?,
            };
            locals.push(local);
        }

        for (record, &local) in records.iter().zip(&locals) {
            let mut offset = 0;
            for (bit, (&(store, changed), wire)) in layout.iter().zip(&header.components).enumerate() {
                if record.mask & (1 << bit) == 0 {
                    if !changed {
                        world.detach(store, local, true);
                    }
                    continue;
                }
                world.attach(store, local, false);
                for (field, slot) in wire.fields.iter().enumerate() {
                    let end = offset + slot.slot_bytes();
                    world.write_slot(store, field, local, &record.data[offset..end]);
                    offset = end;
                    if slot.ty == FieldType::Eid && mode != DeserializeMode::Replace {
                        remap_eids(world, store, field, local, mode, &appended)?;
                    }
                }
                world.note_write(store, local);
            }
        }

        debug!(?mode, entities = locals.len(), "packet deserialized");
        Ok(locals)
    }
}

fn check_layout(
    world: &World,
    header: &PacketHeader,
    layout: &[(usize, bool)],
) -> EcsResult<()> {
    let mismatch = |component: usize, reason: String| {
        warn!(component, %reason, "packet rejected: layout mismatch");
        EcsError::LayoutMismatch { component, reason }
    };
    if header.components.len() != layout.len() {
        return Err(mismatch(
            header.components.len().min(layout.len()),
            format!(
                "{} components in packet, {} locally",
                header.components.len(),
                layout.len()
            ),
        ));
    }
    let stores = world.stores();
    for (index, (wire, &(store, changed))) in header.components.iter().zip(layout).enumerate() {
        let local = ComponentLayout::of(stores[store].def(), changed);
        if let Some(reason) = wire.diff(&local) {
            return Err(mismatch(index, reason));
        }
    }
    Ok(())
}

fn read_records<'a>(
    reader: &mut PacketReader<'a>,
    header: &PacketHeader,
) -> EcsResult<Vec<Record<'a>>> {
    let truncated = || EcsError::MalformedPacket("truncated entity record".to_string());
    let width = header.components.len();
    let count = header.entity_count as usize;
    let mut records = Vec::with_capacity(count.min(reader.remaining() / 12));
    let mut seen = HashSet::with_capacity(records.capacity());
    for _ in 0..count {
        let remote = reader.read_u32().ok_or_else(truncated)?;
        let mask = reader.read_u64().ok_or_else(truncated)?;
        if width < 64 && mask >> width != 0 {
            return Err(EcsError::MalformedPacket(format!(
                "entity {remote} names a component past the header"
            )));
        }
        if !seen.insert(remote) {
            return Err(EcsError::MalformedPacket(format!(
                "entity {remote} appears twice"
            )));
        }
        let row: usize = header
            .components
            .iter()
            .enumerate()
            .filter(|(bit, _)| mask & (1 << bit) != 0)
            .map(|(_, c)| c.row_bytes())
            .sum();
        let data = reader.read_bytes(row).ok_or_else(truncated)?;
        records.push(Record { remote, mask, data });
    }
    if reader.remaining() != 0 {
        return Err(EcsError::MalformedPacket(format!(
            "{} trailing bytes",
            reader.remaining()
        )));
    }
    Ok(records)
}

/// Calls `f` with every `Eid` element carried by `record`.
fn for_each_eid(header: &PacketHeader, record: &Record<'_>, mut f: impl FnMut(EntityId)) {
    let mut offset = 0;
    for (bit, component) in header.components.iter().enumerate() {
        if record.mask & (1 << bit) == 0 {
            continue;
        }
        for field in &component.fields {
            let end = offset + field.slot_bytes();
            if field.ty == FieldType::Eid {
                for chunk in record.data[offset..end].chunks_exact(4) {
                    f(u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
                }
            }
            offset = end;
        }
    }
}

/// Checks that the world can hold every entity `mode` would create.
fn plan(
    world: &World,
    header: &PacketHeader,
    records: &[Record<'_>],
    mode: DeserializeMode,
) -> EcsResult<()> {
    let exceeded = || EcsError::CapacityExceeded {
        capacity: world.max_capacity(),
    };
    match mode {
        DeserializeMode::Replace => {
            if records
                .iter()
                .any(|r| !world.is_alive(r.remote) && !world.can_hold(r.remote))
            {
                return Err(exceeded());
            }
        }
        DeserializeMode::Append => {
            if !world.can_allocate(records.len()) {
                return Err(exceeded());
            }
        }
        DeserializeMode::Map => {
            let mut unseen = HashSet::new();
            for record in records {
                if world.remote_to_local(record.remote).is_none() {
                    unseen.insert(record.remote);
                }
                for_each_eid(header, record, |remote| {
                    if world.remote_to_local(remote).is_none() {
                        unseen.insert(remote);
                    }
                });
            }
            if !world.can_allocate(unseen.len()) {
                return Err(exceeded());
            }
        }
    }
    Ok(())
}

fn map_remote(world: &mut World, remote: EntityId) -> EcsResult<EntityId> {
    if let Some(local) = world.remote_to_local(remote) {
        return Ok(local);
    }
    let local = world.add_entity()?;
    world.bind_remote(remote, local);
    Ok(local)
}

fn remap_eids(
    world: &mut World,
    store: usize,
    field: usize,
    local: EntityId,
    mode: DeserializeMode,
    appended: &HashMap<EntityId, EntityId>,
) -> EcsResult<()> {
    let Some(values) = world
        .column_at_mut(store, field)
        .slot::<u32>(local)
        .map(<[u32]>::to_vec)
    else {
        return Ok(());
    };
    let mut mapped = Vec::with_capacity(values.len());
    for remote in values {
        mapped.push(match mode {
            DeserializeMode::Map => map_remote(world, remote)?,
            _ => appended.get(&remote).copied().unwrap_or(remote),
        });
    }
    if let Some(slot) = world.column_at_mut(store, field).slot_mut::<u32>(local) {
        slot.copy_from_slice(&mapped);
    }
    Ok(())
}

/// Compiles a decoder for `target`.
#[must_use]
pub fn define_deserializer(target: SerializeTarget) -> Deserializer {
    Deserializer { target }
}

//! # Serializer
//!
//! Encodes selected entities and their component slots into a binary
//! packet (see [`codec`](super::codec) for the wire format).
//!
//! A serializer is bound to a [`SerializeTarget`] that decides which
//! components are included and, when invoked on a whole world, which
//! entities are selected:
//!
//! - [`SerializeTarget::World`]: every registered component, every live entity.
//! - [`SerializeTarget::Components`]: the listed components; entities
//!   carrying at least one of them. A [`changed`](crate::changed) term
//!   includes the component only where its changed bit is set.
//! - [`SerializeTarget::Query`]: the components of the query's positive
//!   terms; the entities the query returns.
//!
//! With a byte cap, encoding stops at the first entity that would not fit;
//! entities are never split.

use tracing::warn;

use crate::ecs::{ComponentDef, ComponentStore, EntityId, Query, Term, World};
use crate::error::{EcsError, EcsResult};

use super::codec::{ComponentLayout, PacketHeader, PacketWriter};

/// What a serializer or deserializer operates on.
#[derive(Clone, Debug)]
pub enum SerializeTarget {
    /// All components registered on the world at call time.
    World,
    /// An explicit component list. `Not` terms are ignored.
    Components(Vec<Term>),
    /// The positive terms of a query; `Not` terms only filter.
    Query(Query),
}

impl SerializeTarget {
    /// Builds a component-list target.
    #[must_use]
    pub fn components<I>(terms: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Term>,
    {
        Self::Components(terms.into_iter().map(Into::into).collect())
    }

    /// Builds a query target.
    #[must_use]
    pub fn query(query: &Query) -> Self {
        Self::Query(query.clone())
    }

    fn terms(&self) -> &[Term] {
        match self {
            Self::World => &[],
            Self::Components(terms) => terms,
            Self::Query(query) => query.terms(),
        }
    }

    /// Included components and whether each is a change diff, deduplicated
    /// by first occurrence.
    pub(crate) fn selection(&self, world: &World) -> Vec<(ComponentDef, bool)> {
        if matches!(self, Self::World) {
            return world
                .registered_components()
                .into_iter()
                .map(|def| (def, false))
                .collect();
        }
        let mut out: Vec<(ComponentDef, bool)> = Vec::new();
        for term in self.terms() {
            let entry = match term {
                Term::Has(def) => (def.clone(), false),
                Term::Changed(def) => (def.clone(), true),
                Term::Not(_) => continue,
            };
            if !out.iter().any(|(def, _)| *def == entry.0) {
                out.push(entry);
            }
        }
        out
    }

    /// Resolves the selection to store indices.
    pub(crate) fn resolve(&self, world: &World) -> EcsResult<Vec<(usize, bool)>> {
        self.selection(world)
            .iter()
            .map(|(def, changed)| Ok((world.store_index(def)?, *changed)))
            .collect()
    }
}

/// An encoded packet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Packet {
    bytes: Vec<u8>,
    entities_written: usize,
    entities_selected: usize,
}

impl Packet {
    /// The encoded bytes.
    #[inline]
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Consumes the packet, returning its bytes.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// Encoded size in bytes.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Never true for a packet produced by a serializer; the header is
    /// always present.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Entities actually encoded.
    #[inline]
    #[must_use]
    pub const fn entities_written(&self) -> usize {
        self.entities_written
    }

    /// Entities selected before the byte cap applied.
    #[inline]
    #[must_use]
    pub const fn entities_selected(&self) -> usize {
        self.entities_selected
    }

    /// Returns `true` if no selected entity was cut by the byte cap.
    #[inline]
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.entities_written == self.entities_selected
    }
}

impl AsRef<[u8]> for Packet {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

/// How entities are picked and masked during one encode.
#[derive(Clone, Copy)]
struct Selection {
    /// Drop entities whose mask comes out empty.
    skip_empty: bool,
    /// Ignore store-level changed bits; the caller already filtered.
    presence_only: bool,
}

/// A compiled encoder.
#[derive(Clone, Debug)]
pub struct Serializer {
    target: SerializeTarget,
    max_bytes: Option<usize>,
}

impl Serializer {
    /// The target this serializer was compiled for.
    #[must_use]
    pub fn target(&self) -> &SerializeTarget {
        &self.target
    }

    /// Byte cap, if any.
    #[must_use]
    pub const fn max_bytes(&self) -> Option<usize> {
        self.max_bytes
    }

    /// Encodes the target's selection of `world`.
    ///
    /// For a query target this evaluates the query, which may register its
    /// components and advances nothing else.
    ///
    /// # Errors
    ///
    /// - [`EcsError::UnregisteredComponent`] if a listed component is not
    ///   registered on `world`.
    /// - [`EcsError::SerializationOverflow`] if the header alone exceeds the
    ///   byte cap.
    pub fn serialize(&self, world: &mut World) -> EcsResult<Packet> {
        let (ids, selection) = match &self.target {
            SerializeTarget::World => (
                world.entities(),
                Selection {
                    skip_empty: false,
                    presence_only: false,
                },
            ),
            SerializeTarget::Components(_) => (
                world.entities(),
                Selection {
                    skip_empty: true,
                    presence_only: false,
                },
            ),
            SerializeTarget::Query(query) => (
                query.run_with(world, false)?,
                Selection {
                    skip_empty: false,
                    presence_only: true,
                },
            ),
        };
        self.encode(world, &ids, selection)
    }

    /// Encodes an explicit id list, in ascending order with duplicates
    /// dropped. When the target has `Changed` terms, ids with nothing
    /// changed are skipped.
    ///
    /// # Errors
    ///
    /// [`EcsError::InvalidEntity`] for an id that is not live, plus the
    /// errors of [`Serializer::serialize`].
    pub fn serialize_entities(&self, world: &World, ids: &[EntityId]) -> EcsResult<Packet> {
        let mut ids = ids.to_vec();
        ids.sort_unstable();
        ids.dedup();
        if let Some(&bad) = ids.iter().find(|&&eid| !world.is_alive(eid)) {
            return Err(EcsError::InvalidEntity(bad));
        }
        let has_diff = self
            .target
            .terms()
            .iter()
            .any(|t| matches!(t, Term::Changed(_)));
        self.encode(
            world,
            &ids,
            Selection {
                skip_empty: has_diff,
                presence_only: false,
            },
        )
    }

    fn encode(&self, world: &World, ids: &[EntityId], selection: Selection) -> EcsResult<Packet> {
        let layout = self.target.resolve(world)?;
        let stores = world.stores();
        let components: Vec<ComponentLayout> = layout
            .iter()
            .map(|&(store, changed)| ComponentLayout::of(stores[store].def(), changed))
            .collect();

        let mut out = PacketWriter::new();
        let count_at = PacketHeader::write(&components, &mut out);
        if let Some(max_bytes) = self.max_bytes {
            if out.len() > max_bytes {
                return Err(EcsError::SerializationOverflow {
                    max_bytes,
                    required: out.len(),
                });
            }
        }

        let mut record = Vec::new();
        let mut written: u32 = 0;
        let mut selected = 0usize;
        let mut capped = false;
        for &eid in ids {
            let mask = entity_mask(stores, &layout, eid, selection.presence_only);
            if mask == 0 && selection.skip_empty {
                continue;
            }
            selected += 1;
            if capped {
                continue;
            }
            record.clear();
            record.extend_from_slice(&eid.to_le_bytes());
            record.extend_from_slice(&mask.to_le_bytes());
            for (bit, &(store, _)) in layout.iter().enumerate() {
                if mask & (1 << bit) != 0 {
                    for column in stores[store].columns() {
                        column.encode_slot(eid, &mut record);
                    }
                }
            }
            if self
                .max_bytes
                .is_some_and(|max| out.len() + record.len() > max)
            {
                capped = true;
                continue;
            }
            out.write_bytes(&record);
            written += 1;
        }

        if capped {
            warn!(
                written,
                selected,
                max_bytes = ?self.max_bytes,
                "packet capped before all entities fit"
            );
        }
        out.patch_u32(count_at, written);
        Ok(Packet {
            bytes: out.into_inner(),
            entities_written: written as usize,
            entities_selected: selected,
        })
    }
}

fn entity_mask(
    stores: &[ComponentStore],
    layout: &[(usize, bool)],
    eid: EntityId,
    presence_only: bool,
) -> u64 {
    layout
        .iter()
        .enumerate()
        .filter(|&(_, &(store, diff))| {
            let store = &stores[store];
            store.has(eid) && (presence_only || !diff || store.is_changed(eid))
        })
        .fold(0, |mask, (bit, _)| mask | (1 << bit))
}

/// Compiles an encoder for `target`, optionally capped at `max_bytes`.
#[must_use]
pub fn define_serializer(target: SerializeTarget, max_bytes: Option<usize>) -> Serializer {
    Serializer { target, max_bytes }
}

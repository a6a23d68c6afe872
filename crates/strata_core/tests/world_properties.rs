//! # World Property Tests
//!
//! Exercises the observable guarantees of the world and query engine over
//! long, pseudo-random operation sequences.
//!
//! Run with: cargo test --package strata_core --test world_properties

use std::collections::BTreeSet;

use strata_core::{
    changed, define_component, define_query, enter_query, exit_query, not, ComponentDef,
    EcsError, FieldType, Schema, World, WorldConfig,
};

/// Deterministic xorshift stream for operation sequences.
struct Stream(u64);

impl Stream {
    fn next(&mut self) -> u64 {
        self.0 ^= self.0 << 13;
        self.0 ^= self.0 >> 7;
        self.0 ^= self.0 << 17;
        self.0
    }

    fn below(&mut self, n: usize) -> usize {
        (self.next() % n as u64) as usize
    }
}

fn position() -> ComponentDef {
    ComponentDef::named(
        "Position",
        Schema::object([
            ("x", Schema::from(FieldType::F32)),
            ("y", Schema::from(FieldType::F32)),
        ]),
    )
}

fn world(capacity: usize) -> World {
    World::with_config(WorldConfig::fixed(capacity)).unwrap()
}

// ============================================================================
// CONCRETE SCENARIO
// ============================================================================

#[test]
fn verify_position_scenario() {
    let mut w = world(10);
    assert_eq!(w.add_entity().unwrap(), 0);
    assert_eq!(w.add_entity().unwrap(), 1);

    let pos = position();
    w.add_component(&pos, 0).unwrap();
    w.add_component(&pos, 1).unwrap();
    let q = define_query([&pos]);
    assert_eq!(q.run(&mut w).unwrap(), vec![0, 1]);

    w.remove_component(&pos, 0).unwrap();
    assert_eq!(q.run(&mut w).unwrap(), vec![1]);
}

// ============================================================================
// ENTITY IDS
// ============================================================================

#[test]
fn verify_ids_unique_and_reused_only_after_commit() {
    let mut w = world(64);
    let mut rng = Stream(0x9E37_79B9_7F4A_7C15);
    let mut live: BTreeSet<u32> = BTreeSet::new();
    let mut pending: BTreeSet<u32> = BTreeSet::new();

    for _ in 0..5_000 {
        match rng.below(4) {
            0 | 1 => {
                if let Ok(id) = w.add_entity() {
                    assert!(live.insert(id), "id {id} issued while live");
                    assert!(!pending.contains(&id));
                }
            }
            2 => {
                if let Some(&id) = live.iter().nth(rng.below(live.len().max(1))) {
                    w.remove_entity(id).unwrap();
                    pending.insert(id);
                }
            }
            _ => {
                let committed = w.commit_removals();
                assert_eq!(committed, pending.len());
                for id in std::mem::take(&mut pending) {
                    live.remove(&id);
                }
            }
        }
        assert_eq!(w.entity_count(), live.len());
    }
    assert_eq!(w.entities(), live.iter().copied().collect::<Vec<_>>());
}

#[test]
fn verify_remove_entity_edge_cases() {
    let mut w = world(4);
    assert_eq!(w.remove_entity(2), Err(EcsError::InvalidEntity(2)));
    let a = w.add_entity().unwrap();
    w.remove_entity(a).unwrap();
    w.remove_entity(a).unwrap();
    assert_eq!(w.commit_removals(), 1);
    assert_eq!(w.commit_removals(), 0);
    assert_eq!(w.remove_entity(a), Err(EcsError::InvalidEntity(a)));
}

#[test]
fn verify_fixed_and_growing_capacity() {
    let mut fixed = world(3);
    for _ in 0..3 {
        fixed.add_entity().unwrap();
    }
    assert_eq!(
        fixed.add_entity(),
        Err(EcsError::CapacityExceeded { capacity: 3 })
    );

    let mut growing = World::with_config(WorldConfig::growable(3, 12)).unwrap();
    let pos = position();
    let q = define_query([&pos]);
    for _ in 0..12 {
        let e = growing.add_entity().unwrap();
        growing.add_component(&pos, e).unwrap();
    }
    assert_eq!(growing.capacity(), 12);
    assert_eq!(q.run(&mut growing).unwrap(), (0..12).collect::<Vec<u32>>());
    assert!(growing.add_entity().is_err());
}

// ============================================================================
// PRESENCE
// ============================================================================

#[test]
fn verify_has_component_ignores_pending_removals() {
    let mut w = world(8);
    let pos = position();
    let a = w.add_entity().unwrap();
    let b = w.add_entity().unwrap();
    w.remove_entity(b).unwrap();

    w.add_component(&pos, a).unwrap();
    assert!(w.has_component(&pos, a));
    w.remove_component(&pos, a).unwrap();
    assert!(!w.has_component(&pos, a));
}

#[test]
fn verify_entity_components_follow_presence() {
    let mut w = world(4);
    let pos = position();
    let tag = define_component(Schema::empty());
    let e = w.add_entity().unwrap();
    assert!(w.get_entity_components(e).unwrap().is_empty());
    w.add_component(&tag, e).unwrap();
    w.add_component(&pos, e).unwrap();
    assert_eq!(w.get_entity_components(e).unwrap(), vec![tag.clone(), pos.clone()]);
    w.remove_component(&tag, e).unwrap();
    assert_eq!(w.get_entity_components(e).unwrap(), vec![pos]);
}

// ============================================================================
// QUERIES
// ============================================================================

#[test]
fn verify_query_matches_brute_force() {
    let a = define_component(Schema::from(FieldType::U8));
    let b = define_component(Schema::from(FieldType::U8));
    let c = define_component(Schema::empty());
    let both = define_query([&a, &b]);
    let a_not_c = define_query([a.clone().into(), not(&c)]);

    let mut w = world(48);
    for _ in 0..48 {
        w.add_entity().unwrap();
    }
    let mut rng = Stream(42);
    let comps = [&a, &b, &c];
    for step in 0..4_000 {
        let e = rng.below(48) as u32;
        let comp = comps[rng.below(3)];
        if rng.below(2) == 0 {
            w.add_component(comp, e).unwrap();
        } else if w.is_registered(comp) {
            w.remove_component(comp, e).unwrap();
        }

        if step % 7 == 0 {
            let expected: Vec<u32> = (0..48)
                .filter(|&id| w.has_component(&a, id) && w.has_component(&b, id))
                .collect();
            assert_eq!(both.run(&mut w).unwrap(), expected);

            let expected: Vec<u32> = (0..48)
                .filter(|&id| w.has_component(&a, id) && !w.has_component(&c, id))
                .collect();
            assert_eq!(a_not_c.run(&mut w).unwrap(), expected);
        }
    }
}

#[test]
fn verify_enter_yields_once_per_entry() {
    let pos = position();
    let q = define_query([&pos]);
    let entered = enter_query(&q);
    let mut w = world(8);
    let e = w.add_entity().unwrap();

    assert!(entered.run(&mut w).unwrap().is_empty());
    w.add_component(&pos, e).unwrap();
    assert_eq!(entered.run(&mut w).unwrap(), vec![e]);
    assert!(entered.run(&mut w).unwrap().is_empty());

    w.set::<f32>(&pos, "x", e, 1.0).unwrap();
    assert!(entered.run(&mut w).unwrap().is_empty());

    w.remove_component(&pos, e).unwrap();
    assert!(entered.run(&mut w).unwrap().is_empty());
    w.add_component(&pos, e).unwrap();
    assert_eq!(entered.run(&mut w).unwrap(), vec![e]);
}

#[test]
fn verify_exit_after_commit_once() {
    let pos = position();
    let q = define_query([&pos]);
    let exited = exit_query(&q);
    let mut w = world(8);
    let a = w.add_entity().unwrap();
    let b = w.add_entity().unwrap();
    w.add_component(&pos, a).unwrap();
    w.add_component(&pos, b).unwrap();
    assert!(exited.run(&mut w).unwrap().is_empty());

    w.remove_entity(a).unwrap();
    assert!(exited.run(&mut w).unwrap().is_empty());
    assert_eq!(q.run(&mut w).unwrap(), vec![a, b]);

    w.commit_removals();
    assert_eq!(exited.run(&mut w).unwrap(), vec![a]);
    assert!(exited.run(&mut w).unwrap().is_empty());
    assert_eq!(q.run(&mut w).unwrap(), vec![b]);
}

#[test]
fn verify_base_run_resets_enter_and_exit_baseline() {
    let pos = position();
    let q = define_query([&pos]);
    let mut w = world(4);
    let e = w.add_entity().unwrap();
    w.add_component(&pos, e).unwrap();

    assert_eq!(q.run(&mut w).unwrap(), vec![e]);
    assert!(enter_query(&q).run(&mut w).unwrap().is_empty());

    w.remove_component(&pos, e).unwrap();
    assert!(q.run(&mut w).unwrap().is_empty());
    assert!(exit_query(&q).run(&mut w).unwrap().is_empty());
}

#[test]
fn verify_run_with_keeps_accumulators_on_request() {
    let pos = position();
    let q = define_query([&pos]);
    let mut w = world(4);
    let e = w.add_entity().unwrap();
    w.add_component(&pos, e).unwrap();

    assert_eq!(q.run_with(&mut w, false).unwrap(), vec![e]);
    assert_eq!(enter_query(&q).run(&mut w).unwrap(), vec![e]);

    w.remove_component(&pos, e).unwrap();
    assert!(q.run_with(&mut w, false).unwrap().is_empty());
    assert_eq!(exit_query(&q).run(&mut w).unwrap(), vec![e]);
}

#[test]
fn verify_changed_window_per_query() {
    let pos = position();
    let dirty = define_query([changed(&pos)]);
    let other = define_query([changed(&pos)]);
    let mut w = world(8);
    let a = w.add_entity().unwrap();
    let b = w.add_entity().unwrap();
    w.add_component(&pos, a).unwrap();
    w.add_component(&pos, b).unwrap();
    dirty.run(&mut w).unwrap();
    other.run(&mut w).unwrap();

    w.set::<f32>(&pos, "y", b, 3.0).unwrap();
    assert_eq!(dirty.run(&mut w).unwrap(), vec![b]);
    assert_eq!(dirty.run(&mut w).unwrap(), vec![b]);

    w.reset_changed_query(&dirty).unwrap();
    assert!(dirty.run(&mut w).unwrap().is_empty());
    assert_eq!(other.run(&mut w).unwrap(), vec![b]);

    w.set::<f32>(&pos, "x", a, 1.0).unwrap();
    assert_eq!(dirty.run(&mut w).unwrap(), vec![a]);
}

#[test]
fn verify_worlds_are_isolated() {
    let pos = position();
    let q = define_query([&pos]);
    let mut left = world(4);
    let mut right = world(4);
    let l = left.add_entity().unwrap();
    let r = right.add_entity().unwrap();
    left.add_component(&pos, l).unwrap();
    right.add_component(&pos, r).unwrap();
    left.set::<f32>(&pos, "x", l, 5.0).unwrap();

    assert_eq!(right.get::<f32>(&pos, "x", r).unwrap(), 0.0);
    right.remove_component(&pos, r).unwrap();
    assert_eq!(q.run(&mut left).unwrap(), vec![l]);
    assert!(q.run(&mut right).unwrap().is_empty());
}

// ============================================================================
// FIELD ACCESS
// ============================================================================

#[test]
fn verify_typed_array_conversions() {
    let stats = define_component(Schema::object([
        ("level", Schema::from(FieldType::U8)),
        ("tint", Schema::array(FieldType::U8Clamped, 3)),
        ("delta", Schema::from(FieldType::I16)),
    ]));
    let mut w = world(2);
    let e = w.add_entity().unwrap();
    w.add_component(&stats, e).unwrap();

    w.set_f64(&stats, "level", e, 0, 300.0).unwrap();
    assert_eq!(w.get::<u8>(&stats, "level", e).unwrap(), 44);

    w.set_f64(&stats, "tint", e, 0, 300.0).unwrap();
    w.set_f64(&stats, "tint", e, 1, -4.0).unwrap();
    w.set_f64(&stats, "tint", e, 2, 2.5).unwrap();
    assert_eq!(w.get_array::<u8>(&stats, "tint", e).unwrap(), &[255, 0, 2]);

    w.set_f64(&stats, "delta", e, 0, -1.9).unwrap();
    assert_eq!(w.get::<i16>(&stats, "delta", e).unwrap(), -1);

    w.set_array::<u8>(&stats, "tint", e, &[9, 8]).unwrap();
    assert_eq!(w.get_array::<u8>(&stats, "tint", e).unwrap(), &[9, 8, 0]);
}

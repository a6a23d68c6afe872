//! # ECS Performance Benchmark
//!
//! Entity churn, component toggling and query evaluation over a
//! 100,000-entity world.
//!
//! Run with: `cargo bench --package strata_core`

#![allow(missing_docs)]

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use strata_core::{
    changed, define_component, define_query, not, ComponentDef, FieldType, Schema, World,
    WorldConfig,
};

const ENTITY_COUNT: usize = 100_000;

fn position() -> ComponentDef {
    define_component(Schema::object([
        ("x", Schema::from(FieldType::F32)),
        ("y", Schema::from(FieldType::F32)),
    ]))
}

fn populated(count: usize, pos: &ComponentDef, vel: &ComponentDef) -> World {
    let mut world = World::with_config(WorldConfig::fixed(count)).unwrap();
    for i in 0..count {
        let e = world.add_entity().unwrap();
        world.add_component(pos, e).unwrap();
        if i % 2 == 0 {
            world.add_component(vel, e).unwrap();
        }
    }
    world
}

fn bench_add_entities(c: &mut Criterion) {
    let mut group = c.benchmark_group("add_entities");
    for count in [10_000, ENTITY_COUNT] {
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            b.iter(|| {
                let mut world = World::with_config(WorldConfig::fixed(count)).unwrap();
                for _ in 0..count {
                    black_box(world.add_entity().unwrap());
                }
                world.entity_count()
            });
        });
    }
    group.finish();
}

fn bench_entity_churn(c: &mut Criterion) {
    let pos = position();
    let vel = position();
    let mut world = populated(ENTITY_COUNT, &pos, &vel);
    let query = define_query([&pos]);
    query.run(&mut world).unwrap();

    c.bench_function("churn_1000_per_frame", |b| {
        b.iter(|| {
            for e in 0..1_000u32 {
                world.remove_entity(e).unwrap();
            }
            world.commit_removals();
            for _ in 0..1_000 {
                let e = world.add_entity().unwrap();
                world.add_component(&pos, e).unwrap();
            }
            black_box(query.run(&mut world).unwrap().len())
        });
    });
}

fn bench_query_steady_state(c: &mut Criterion) {
    let pos = position();
    let vel = position();
    let mut world = populated(ENTITY_COUNT, &pos, &vel);
    let moving = define_query([&pos, &vel]);
    let idle = define_query([pos.clone().into(), not(&vel)]);

    c.bench_function("query_steady_state", |b| {
        b.iter(|| {
            black_box(moving.run(&mut world).unwrap().len());
            black_box(idle.run(&mut world).unwrap().len());
        });
    });
}

fn bench_toggle_component(c: &mut Criterion) {
    let pos = position();
    let vel = position();
    let mut world = populated(ENTITY_COUNT, &pos, &vel);
    let moving = define_query([&pos, &vel]);
    moving.run(&mut world).unwrap();

    c.bench_function("toggle_16_components", |b| {
        b.iter(|| {
            for e in (1..32u32).step_by(2) {
                world.add_component(&vel, e).unwrap();
            }
            black_box(moving.run(&mut world).unwrap().len());
            for e in (1..32u32).step_by(2) {
                world.remove_component(&vel, e).unwrap();
            }
            black_box(moving.run(&mut world).unwrap().len())
        });
    });
}

fn bench_changed_window(c: &mut Criterion) {
    let pos = position();
    let vel = position();
    let mut world = populated(ENTITY_COUNT, &pos, &vel);
    let dirty = define_query([changed(&pos)]);

    c.bench_function("changed_window_1000_writes", |b| {
        b.iter(|| {
            for e in 0..1_000u32 {
                world.set::<f32>(&pos, "x", e, 1.0).unwrap();
            }
            let n = dirty.run(&mut world).unwrap().len();
            world.reset_changed_query(&dirty).unwrap();
            black_box(n)
        });
    });
}

criterion_group!(
    benches,
    bench_add_entities,
    bench_entity_churn,
    bench_query_steady_state,
    bench_toggle_component,
    bench_changed_window,
);
criterion_main!(benches);

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use ecs_core::serialization::{Format, SerializeOptions, WorldSerializer};
use ecs_core::world::World;
use serde::{Deserialize, Serialize};
use speedy::{Readable, Writable};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Readable, Writable)]
struct Position {
    x: f32,
    y: f32,
    z: f32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Readable, Writable)]
struct Health {
    hp: f32,
}

fn populated_world(entity_count: usize) -> World {
    let mut world = World::new();
    world.component_registry_mut().register_serializable::<Position>().unwrap();
    world.component_registry_mut().register_serializable::<Health>().unwrap();
    for i in 0..entity_count {
        world
            .spawn()
            .with(Position { x: i as f32, y: (i * 2) as f32, z: 0.0 })
            .with(Health { hp: 100.0 })
            .build().unwrap();
    }
    world
}

fn bench_save(c: &mut Criterion) {
    let mut group = c.benchmark_group("serialize_save");
    for &count in &[1_000usize, 10_000] {
        group.bench_with_input(BenchmarkId::new("binary", count), &count, |b, &count| {
            let world = populated_world(count);
            b.iter(|| {
                let mut buffer = Vec::new();
                WorldSerializer::save(&world, &mut buffer, Format::Binary, &SerializeOptions::default())
                    .unwrap();
                buffer
            });
        });
        group.bench_with_input(BenchmarkId::new("text", count), &count, |b, &count| {
            let world = populated_world(count);
            b.iter(|| {
                let mut buffer = Vec::new();
                WorldSerializer::save(&world, &mut buffer, Format::Text, &SerializeOptions::default())
                    .unwrap();
                buffer
            });
        });
    }
    group.finish();
}

fn bench_load(c: &mut Criterion) {
    let mut group = c.benchmark_group("serialize_load");
    for &count in &[1_000usize, 10_000] {
        group.bench_with_input(BenchmarkId::new("binary", count), &count, |b, &count| {
            let world = populated_world(count);
            let mut buffer = Vec::new();
            WorldSerializer::save(&world, &mut buffer, Format::Binary, &SerializeOptions::default())
                .unwrap();
            b.iter(|| {
                let mut target = populated_world(0);
                WorldSerializer::load(&mut target, &mut &buffer[..], Format::Binary, &SerializeOptions::default())
                    .unwrap();
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_save, bench_load);
criterion_main!(benches);

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use ecs_core::world::World;

#[derive(Debug, Clone, Copy)]
struct Position {
    x: f32,
    y: f32,
}

fn bench_record_added(c: &mut Criterion) {
    c.bench_function("spawn_10k_with_change_tracking", |b| {
        b.iter(|| {
            let mut world = World::new();
            for i in 0..10_000 {
                world.spawn().with(Position { x: i as f32, y: 0.0 }).build().unwrap();
            }
            black_box(world.change_log_len());
        });
    });
}

fn bench_subscriber_dispatch(c: &mut Criterion) {
    c.bench_function("drain_changes_with_one_subscriber_10k", |b| {
        b.iter_batched(
            || {
                let mut world = World::new();
                let id = world.component_registry_mut().register::<Position>();
                world.subscribe_changes(
                    id,
                    &[ecs_core::change::ChangeKind::Added],
                    None,
                    None,
                    Box::new(|_records| {}),
                );
                world
            },
            |mut world| {
                for i in 0..10_000 {
                    world.spawn().with(Position { x: i as f32, y: 0.0 }).build().unwrap();
                }
                world.drain_changes();
            },
            criterion::BatchSize::LargeInput,
        );
    });
}

criterion_group!(benches, bench_record_added, bench_subscriber_dispatch);
criterion_main!(benches);

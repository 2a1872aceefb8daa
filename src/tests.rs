// Copyright 2024 Saptak Santra
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! End-to-end scenarios exercising the full entity/archetype/query/
//! scheduling/serialization stack together, as opposed to each module's own
//! unit tests.

#[cfg(test)]
mod tests {
    use crate::change::ChangeKind;
    use crate::error::EcsError;
    use crate::query::{Query, QueryMut};
    use crate::serialization::{Format, SerializeOptions, WorldSerializer};
    use crate::system::{System, SystemAccess};
    use crate::world::World;
    use crate::Result;
    use serde::{Deserialize, Serialize};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[derive(Debug, Clone, Copy, PartialEq)]
    struct Position {
        x: f32,
        y: f32,
    }

    #[derive(Debug, Clone, Copy)]
    struct Velocity {
        x: f32,
        y: f32,
    }

    #[derive(Debug, Clone, Copy)]
    struct Health(u32);

    #[test]
    fn lifecycle_and_query_reflect_current_archetype() {
        let mut world = World::new();
        let mover = world
            .spawn()
            .with(Position { x: 0.0, y: 0.0 })
            .with(Velocity { x: 1.0, y: 0.0 })
            .build().unwrap();
        let still = world.spawn().with(Position { x: 5.0, y: 5.0 }).build().unwrap();

        assert_eq!(world.query::<&Position>().count(), 2);

        world.add_component(still, Velocity { x: 0.0, y: 2.0 }).unwrap();
        assert_eq!(world.query::<(&Position, &Velocity)>().count(), 2);

        world.remove_component::<Velocity>(mover).unwrap();
        assert_eq!(world.query::<(&Position, &Velocity)>().count(), 1);
        assert!(world.get_component::<Velocity>(mover).is_none());

        world.despawn(mover).unwrap();
        assert!(!world.is_alive(mover));
        assert_eq!(world.entity_count(), 1);
        assert!(matches!(
            world.despawn(mover),
            Err(EcsError::InvalidHandle(_))
        ));
    }

    #[test]
    fn component_add_remove_migrates_between_archetypes() {
        let mut world = World::new();
        let e = world.spawn().with(Position { x: 1.0, y: 1.0 }).build().unwrap();
        assert_eq!(world.archetype_count(), 1);

        world.add_component(e, Health(100)).unwrap();
        world.add_component(e, Velocity { x: 0.0, y: 0.0 }).unwrap();
        // Position-only archetype plus Position+Health+Velocity archetype.
        assert_eq!(world.archetype_count(), 2);
        assert_eq!(world.get_component::<Health>(e).unwrap().0, 100);

        world.remove_component::<Health>(e).unwrap();
        assert!(world.get_component::<Health>(e).is_none());
        assert_eq!(world.get_component::<Position>(e).unwrap().x, 1.0);
    }

    #[test]
    fn systems_run_in_declared_order_within_one_tick() {
        struct Spawner;
        impl System for Spawner {
            fn access(&self) -> SystemAccess {
                SystemAccess::empty()
            }
            fn name(&self) -> &'static str {
                "spawner"
            }
            fn run(&mut self, world: &mut World) -> Result<()> {
                world.spawn().with(Position { x: 0.0, y: 0.0 }).build().unwrap();
                Ok(())
            }
        }

        struct Mover;
        impl System for Mover {
            fn access(&self) -> SystemAccess {
                SystemAccess::empty()
            }
            fn name(&self) -> &'static str {
                "mover"
            }
            fn run(&mut self, world: &mut World) -> Result<()> {
                for pos in world.query_mut::<&mut Position>().iter() {
                    pos.x += 1.0;
                }
                Ok(())
            }
        }

        let mut world = World::new();
        let spawner = world.register_system(Box::new(Spawner), &[]).unwrap();
        world.register_system(Box::new(Mover), &[spawner]).unwrap();

        world.run_systems(1.0 / 60.0).unwrap();
        // Mover ran after Spawner's entity existed, in the same tick.
        assert_eq!(world.query::<&Position>().iter().next().unwrap().x, 1.0);
    }

    #[test]
    fn reactive_subscription_respects_frequency_gate() {
        let mut world = World::new();
        let id = world.component_registry_mut().register::<Position>();
        let count = Arc::new(AtomicU32::new(0));
        let count2 = count.clone();
        world.subscribe_changes(
            id,
            &[ChangeKind::Added],
            Some(2),
            None,
            Box::new(move |records| {
                count2.fetch_add(records.len() as u32, Ordering::SeqCst);
            }),
        );

        world.spawn().with(Position { x: 0.0, y: 0.0 }).build().unwrap();
        world.drain_changes();
        assert_eq!(count.load(Ordering::SeqCst), 0, "tick 0 isn't due yet");

        world.increment_tick();
        world.increment_tick();
        world.drain_changes();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn parent_child_cycle_is_rejected() {
        let mut world = World::new();
        let a = world.spawn().with(Position { x: 0.0, y: 0.0 }).build().unwrap();
        let b = world.spawn().with(Position { x: 0.0, y: 0.0 }).build().unwrap();
        let c = world.spawn().with(Position { x: 0.0, y: 0.0 }).build().unwrap();

        world.set_parent(b, a).unwrap();
        world.set_parent(c, b).unwrap();
        assert!(matches!(
            world.set_parent(a, c),
            Err(EcsError::RelationshipCycle)
        ));
        assert_eq!(world.children_of(a).to_vec(), vec![b]);
        assert_eq!(world.parent_of(b), Some(a));
    }

    #[derive(
        Debug, Clone, Copy, PartialEq, Serialize, Deserialize, speedy::Writable, speedy::Readable,
    )]
    struct SavedPosition {
        x: f32,
        y: f32,
    }

    #[test]
    fn binary_snapshot_round_trips_entity_population() {
        let mut world = World::new();
        world
            .component_registry_mut()
            .register_serializable::<SavedPosition>()
            .unwrap();
        world.spawn().with(SavedPosition { x: 3.0, y: 4.0 }).build().unwrap();
        world.spawn().with(SavedPosition { x: -1.0, y: 2.0 }).build().unwrap();

        let mut buffer = Vec::new();
        WorldSerializer::save(&world, &mut buffer, Format::Binary, &SerializeOptions::default())
            .unwrap();

        let mut restored = World::new();
        restored
            .component_registry_mut()
            .register_serializable::<SavedPosition>()
            .unwrap();
        WorldSerializer::load(
            &mut restored,
            &mut &buffer[..],
            Format::Binary,
            &SerializeOptions::default(),
        )
        .unwrap();

        assert_eq!(restored.entity_count(), 2);
        let mut xs: Vec<f32> = restored.query::<&SavedPosition>().iter().map(|p| p.x).collect();
        xs.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert_eq!(xs, vec![-1.0, 3.0]);
    }

    #[test]
    fn corrupted_snapshot_leaves_target_world_untouched() {
        let mut world = World::new();
        world
            .component_registry_mut()
            .register_serializable::<SavedPosition>()
            .unwrap();
        world.spawn().with(SavedPosition { x: 1.0, y: 1.0 }).build().unwrap();

        let mut buffer = Vec::new();
        WorldSerializer::save(&world, &mut buffer, Format::Binary, &SerializeOptions::default())
            .unwrap();
        let last = buffer.len() - 1;
        buffer[last] ^= 0xFF;

        let mut target = World::new();
        target
            .component_registry_mut()
            .register_serializable::<SavedPosition>()
            .unwrap();
        target.spawn().with(SavedPosition { x: 9.0, y: 9.0 }).build().unwrap();

        let result = WorldSerializer::load(
            &mut target,
            &mut &buffer[..],
            Format::Binary,
            &SerializeOptions::default(),
        );
        assert!(result.is_err());
        assert_eq!(target.entity_count(), 1);
        assert_eq!(
            target.query::<&SavedPosition>().iter().next().unwrap().x,
            9.0
        );
    }

    #[test]
    fn query_mut_iter_and_query_immutable_agree_on_matches() {
        let mut query_count = 0;
        let mut world = World::new();
        for i in 0..4 {
            world
                .spawn()
                .with(Position { x: i as f32, y: 0.0 })
                .with(Velocity { x: 1.0, y: 0.0 })
                .build().unwrap();
        }
        {
            let mut moving: QueryMut<(&mut Position, &Velocity)> =
                world.query_mut::<(&mut Position, &Velocity)>();
            for (pos, vel) in moving.iter() {
                pos.x += vel.x;
                query_count += 1;
            }
        }
        assert_eq!(query_count, 4);
        let read: Query<&Position> = world.query::<&Position>();
        let total: f32 = read.iter().map(|p| p.x).sum();
        assert_eq!(total, (0..4).map(|i| i as f32 + 1.0).sum::<f32>());
    }
}

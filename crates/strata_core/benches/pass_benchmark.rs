// =============================================================================
// PASS BENCHMARK - Full schedule pass over SoA blocks
// =============================================================================

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use strata_core::{
    BlockAccessor, Bundle, CommandBuffer, ComponentQuery, JobScheduler, Schedule, System, World,
};

#[derive(Debug, Clone, Copy)]
struct Position(f32);

#[derive(Debug, Clone, Copy)]
struct Velocity(f32);

struct Movement {
    query: ComponentQuery,
}

impl System for Movement {
    fn name(&self) -> &'static str {
        "movement"
    }

    fn query(&self) -> &ComponentQuery {
        &self.query
    }

    fn process_block(&self, dt: f32, block: &BlockAccessor<'_>, _commands: &mut CommandBuffer) {
        let positions = block.component_data_mut::<Position>();
        let velocities = block.component_data::<Velocity>();
        for (position, velocity) in positions.iter_mut().zip(velocities) {
            position.0 += velocity.0 * dt;
        }
    }
}

fn setup(count: usize, workers: Option<usize>) -> (World, JobScheduler, Schedule) {
    let mut world = World::new();
    let scheduler = JobScheduler::new(workers);
    let mut schedule = Schedule::new();
    for i in 0..count {
        world
            .spawn(Bundle::new().with(Position(i as f32)).with(Velocity(1.0)))
            .unwrap();
    }
    let query = world
        .query()
        .write::<Position>()
        .read::<Velocity>()
        .build()
        .unwrap();
    schedule.add_system(Movement { query });
    (world, scheduler, schedule)
}

fn bench_pass(c: &mut Criterion) {
    let mut group = c.benchmark_group("pass");
    for &count in &[1_000usize, 10_000, 100_000] {
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(
            BenchmarkId::new("single_thread", count),
            &count,
            |b, &count| {
                let (mut world, mut scheduler, mut schedule) = setup(count, Some(0));
                b.iter(|| schedule.run_pass(0.016, &mut world, &mut scheduler));
            },
        );
        group.bench_with_input(
            BenchmarkId::new("worker_pool", count),
            &count,
            |b, &count| {
                let (mut world, mut scheduler, mut schedule) = setup(count, None);
                b.iter(|| schedule.run_pass(0.016, &mut world, &mut scheduler));
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_pass);
criterion_main!(benches);

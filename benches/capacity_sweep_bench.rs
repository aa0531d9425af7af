//! Compare sequential vs parallel capacity sweeps.
//!
//! Run with: `cargo bench --bench capacity_sweep`

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use modforge::data::catalog::Module;
use modforge::optimizer::{find_optimal_build, AbilityTiming, BuildRequest};
use modforge::parallel::{sweep_capacities, WorkerPool};
use modforge::scaled::{Pct, Time};

fn catalog() -> Vec<Module> {
    (0..24i64)
        .map(|i| {
            Module::new(format!("m{i}"), format!("Module {i}"), 3 + i % 9)
                .with_group(format!("G{}", i % 8))
                .with_flat(Pct::units(1 + i % 7))
                .with_modifier(Pct::units(2 + i % 5))
        })
        .collect()
}

fn bench_capacity_sweep(c: &mut Criterion) {
    let catalog = catalog();
    let request = BuildRequest::reference().with_ability(AbilityTiming {
        base_duration: Time::units(40),
        base_cooldown: Time::from_raw(397),
    });
    let capacities = 0..=64i64;

    let mut group = c.benchmark_group("capacity_sweep");
    group.sample_size(10);

    group.bench_function("sequential", |b| {
        b.iter(|| {
            let results: Vec<_> = capacities
                .clone()
                .map(|capacity| find_optimal_build(&catalog, &request.clone().with_capacity(capacity)))
                .collect();
            black_box(results)
        });
    });

    group.bench_function("parallel", |b| {
        b.iter(|| {
            black_box(sweep_capacities(
                &catalog,
                &request,
                capacities.clone(),
                &WorkerPool::default(),
            ))
        });
    });

    group.finish();
}

criterion_group!(benches, bench_capacity_sweep);
criterion_main!(benches);

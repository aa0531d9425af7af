//! Exact solve time over synthetic catalogs of growing size.
//!
//! Run with: `cargo bench --bench optimizer`

use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use modforge::data::catalog::Module;
use modforge::optimizer::{find_optimal_build, AbilityTiming, BuildRequest, SolverLimits};
use modforge::scaled::{Pct, Time};

/// Deterministic catalog: costs 4..=15, groups of three, mixed flat/modifier/timing stats.
fn synthetic_catalog(size: usize) -> Vec<Module> {
    let mut state = 0x2545_f491_u64;
    let mut next = move |modulo: i64| {
        state = state.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1);
        ((state >> 33) as i64).rem_euclid(modulo)
    };
    (0..size)
        .map(|i| {
            let module = Module::new(format!("m{i}"), format!("Module {i}"), 4 + next(12))
                .with_flat(Pct::from_raw(100 * next(25)))
                .with_modifier(Pct::from_raw(50 * next(30)))
                .with_cooldown(Pct::from_raw(-100 * next(8)))
                .with_duration(Pct::from_raw(100 * next(6)));
            if i % 2 == 0 {
                module.with_group(format!("G{}", i / 6))
            } else {
                module
            }
        })
        .collect()
}

fn request() -> BuildRequest {
    BuildRequest::reference()
        .with_ability(AbilityTiming {
            base_duration: Time::units(40),
            base_cooldown: Time::from_raw(397),
        })
        .with_limits(SolverLimits::default().with_time_limit(Duration::from_secs(60)))
}

fn bench_optimizer(c: &mut Criterion) {
    let mut group = c.benchmark_group("optimizer");
    group.sample_size(10);

    for size in [16usize, 32, 48, 80, 120] {
        let catalog = synthetic_catalog(size);
        let request = request().with_capacity(60);
        group.bench_with_input(BenchmarkId::new("modules", size), &catalog, |b, catalog| {
            b.iter(|| black_box(find_optimal_build(catalog, &request)))
        });
    }

    let catalog = synthetic_catalog(120);
    let request = request();
    group.bench_function("reference_capacity/120", |b| {
        b.iter(|| black_box(find_optimal_build(&catalog, &request)))
    });

    group.finish();
}

criterion_group!(benches, bench_optimizer);
criterion_main!(benches);

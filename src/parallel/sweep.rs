//! Independent optimizations over a range of capacities.
//!
//! Each capacity is its own solve over the shared read-only catalog, so the batch parallelizes
//! with one solve per Rayon task. Results come back in capacity order.

use std::ops::RangeInclusive;

use rayon::prelude::*;
use rayon::ThreadPoolBuildError;
use serde::Serialize;
use thiserror::Error;

use crate::data::catalog::Module;
use crate::optimizer::model::ModelError;
use crate::optimizer::{find_optimal_build, BuildRequest, OptimizationResult};
use crate::parallel::pool::WorkerPool;

#[derive(Debug, Error)]
pub enum SweepError {
    #[error("empty capacity range {from}..={to}")]
    EmptyRange { from: i64, to: i64 },
    #[error("failed to start worker pool: {0}")]
    Pool(#[from] ThreadPoolBuildError),
    #[error("capacity {capacity}: {source}")]
    Model { capacity: i64, source: ModelError },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SweepPoint {
    pub capacity: i64,
    pub result: OptimizationResult,
}

pub fn sweep_capacities(
    catalog: &[Module],
    request: &BuildRequest,
    capacities: RangeInclusive<i64>,
    pool: &WorkerPool,
) -> Result<Vec<SweepPoint>, SweepError> {
    if capacities.is_empty() {
        return Err(SweepError::EmptyRange {
            from: *capacities.start(),
            to: *capacities.end(),
        });
    }
    tracing::info!(
        from = capacities.start(),
        to = capacities.end(),
        workers = pool.workers,
        "starting capacity sweep"
    );
    let capacities: Vec<i64> = capacities.collect();
    pool.install(|| {
        capacities
            .par_iter()
            .map(|&capacity| {
                let request = request.clone().with_capacity(capacity);
                find_optimal_build(catalog, &request)
                    .map(|result| SweepPoint { capacity, result })
                    .map_err(|source| SweepError::Model { capacity, source })
            })
            .collect::<Result<Vec<_>, _>>()
    })?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimizer::AbilityTiming;
    use crate::scaled::{Pct, Time};

    fn catalog() -> Vec<Module> {
        vec![
            Module::new("1", "a", 4).with_flat(Pct::units(10)),
            Module::new("2", "b", 6).with_modifier(Pct::units(15)),
            Module::new("3", "c", 9).with_flat(Pct::units(25)),
        ]
    }

    fn sustained() -> BuildRequest {
        BuildRequest::reference().with_ability(AbilityTiming {
            base_duration: Time::units(40),
            base_cooldown: Time::from_raw(397),
        })
    }

    #[test]
    fn sweep_matches_individual_solves_in_order() {
        let catalog = catalog();
        let request = sustained();
        let points =
            sweep_capacities(&catalog, &request, 0..=12, &WorkerPool::with_workers(2)).unwrap();
        assert_eq!(points.len(), 13);
        for (point, capacity) in points.iter().zip(0..) {
            assert_eq!(point.capacity, capacity);
            let single =
                find_optimal_build(&catalog, &request.clone().with_capacity(capacity)).unwrap();
            assert_eq!(point.result, single);
        }
    }

    #[test]
    fn empty_range_is_rejected() {
        assert!(matches!(
            sweep_capacities(&catalog(), &sustained(), 5..=4, &WorkerPool::default()),
            Err(SweepError::EmptyRange { from: 5, to: 4 })
        ));
    }
}

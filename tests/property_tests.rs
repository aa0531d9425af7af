use std::collections::HashSet;

use modforge::data::catalog::Module;
use modforge::optimizer::{
    find_optimal_build, AbilityTiming, BuildRequest, OptimizationResult, UptimeBound,
};
use modforge::scaled::{Pct, ScaleError, Time};
use proptest::prelude::*;

fn catalog_strategy() -> impl Strategy<Value = Vec<Module>> {
    let module = (
        0i64..=20,
        prop::option::of(0u8..3),
        -500i64..=3000,
        -500i64..=2000,
        -3000i64..=1000,
        -500i64..=3000,
    );
    prop::collection::vec(module, 0..=8).prop_map(|specs| {
        specs
            .into_iter()
            .enumerate()
            .map(|(i, (cost, group, flat, modifier, cooldown, duration))| {
                let module = Module::new(format!("m{i}"), format!("Module {i}"), cost)
                    .with_flat(Pct::from_raw(flat))
                    .with_modifier(Pct::from_raw(modifier))
                    .with_cooldown(Pct::from_raw(cooldown))
                    .with_duration(Pct::from_raw(duration));
                match group {
                    Some(group) => module.with_group(format!("G{group}")),
                    None => module,
                }
            })
            .collect()
    })
}

fn request_strategy() -> impl Strategy<Value = BuildRequest> {
    (0i64..=60, 1usize..=10, 10i64..=400, 10i64..=400, any::<bool>()).prop_map(
        |(capacity, max_modules, duration, cooldown, strict)| {
            BuildRequest {
                max_modules,
                ..BuildRequest::reference()
            }
            .with_capacity(capacity)
            .with_ability(AbilityTiming {
                base_duration: Time::from_raw(duration),
                base_cooldown: Time::from_raw(cooldown),
            })
            .with_uptime_bound(if strict {
                UptimeBound::Strict
            } else {
                UptimeBound::Inclusive
            })
        },
    )
}

/// Objective of the subset `mask`, or `None` if it breaks any constraint.
fn evaluate(catalog: &[Module], request: &BuildRequest, mask: u32) -> Option<i128> {
    let chosen: Vec<&Module> = catalog
        .iter()
        .enumerate()
        .filter(|(i, _)| mask & (1u32 << *i) != 0)
        .map(|(_, m)| m)
        .collect();

    let cost: i64 = chosen.iter().map(|m| m.cost).sum();
    if cost > request.max_capacity || chosen.len() > request.max_modules {
        return None;
    }
    let mut groups = HashSet::new();
    for module in &chosen {
        if let Some(group) = &module.rune_group {
            if !groups.insert(group.as_str()) {
                return None;
            }
        }
    }

    let hundred = 10_000_i128;
    let total = |f: fn(&Module) -> Pct| chosen.iter().map(|m| f(m).raw() as i128).sum::<i128>();
    let duration = request.ability.base_duration.raw() as i128
        * (hundred + total(|m| m.skill_duration));
    let cooldown = request.ability.base_cooldown.raw() as i128
        * (hundred + total(|m| m.skill_cooldown) + request.external_cooldown_total().raw() as i128);
    let uptime = match request.uptime_bound {
        UptimeBound::Inclusive => duration >= cooldown,
        UptimeBound::Strict => duration > cooldown,
    };
    if !uptime {
        return None;
    }

    let flat = hundred + total(|m| m.flat_skill_power);
    let modifier =
        hundred + request.base_modifier.raw() as i128 + total(|m| m.modifier_skill_power);
    Some(flat * modifier)
}

fn brute_force(catalog: &[Module], request: &BuildRequest) -> Option<i128> {
    (0..1u32 << catalog.len())
        .filter_map(|mask| evaluate(catalog, request, mask))
        .max()
}

fn selection_mask(catalog: &[Module], result: &OptimizationResult) -> Option<u32> {
    let build = result.solved()?;
    Some(build.selected.iter().fold(0, |mask, selected| {
        let index = catalog
            .iter()
            .position(|m| m.id == selected.id)
            .expect("selected module comes from the catalog");
        mask | (1u32 << index)
    }))
}

proptest! {
    /// Property: the solver's optimum equals exhaustive enumeration, and the returned
    /// selection satisfies budget, cardinality, group and uptime constraints.
    #[test]
    fn prop_matches_brute_force(catalog in catalog_strategy(), request in request_strategy()) {
        let result = find_optimal_build(&catalog, &request).unwrap();
        match brute_force(&catalog, &request) {
            None => prop_assert_eq!(result, OptimizationResult::Infeasible),
            Some(best) => {
                let build = result.solved().expect("feasible instance must be solved");
                prop_assert!(build.proven_optimal);
                prop_assert_eq!(build.objective as i128, best);
                let mask = selection_mask(&catalog, &result).unwrap();
                prop_assert_eq!(evaluate(&catalog, &request, mask), Some(best));
            }
        }
    }

    /// Property: more capacity never lowers the optimum.
    #[test]
    fn prop_monotone_in_capacity(
        catalog in catalog_strategy(),
        request in request_strategy(),
        extra in 0i64..=30,
    ) {
        let larger = request.clone().with_capacity(request.max_capacity + extra);
        let small = find_optimal_build(&catalog, &request).unwrap();
        let large = find_optimal_build(&catalog, &larger).unwrap();
        if let Some(small) = small.solved() {
            let large = large.solved().expect("a feasible build stays feasible");
            prop_assert!(large.objective >= small.objective);
        }
    }

    /// Property: identical inputs produce identical outputs.
    #[test]
    fn prop_deterministic(catalog in catalog_strategy(), request in request_strategy()) {
        let first = find_optimal_build(&catalog, &request).unwrap();
        let second = find_optimal_build(&catalog, &request).unwrap();
        prop_assert_eq!(first, second);
    }

    /// Property: scaling the unscaled value returns the original integer.
    #[test]
    fn prop_scale_round_trip(raw in -1_000_000i64..=1_000_000) {
        prop_assume!(raw == 0 || raw.abs() >= 100);
        let pct = Pct::from_raw(raw);
        prop_assert_eq!(Pct::from_decimal(pct.unscale()), Ok(pct));
        let time = Time::from_raw(raw);
        prop_assert_eq!(Time::from_decimal(time.unscale()), Ok(time));
    }

    /// Property: magnitudes strictly between 0 and 1 are unit errors.
    #[test]
    fn prop_fractions_are_unit_errors(raw in 1i64..100, negative in any::<bool>()) {
        let raw = if negative { -raw } else { raw };
        let err = Pct::from_decimal(Pct::from_raw(raw).unscale()).unwrap_err();
        let is_unit_error = matches!(err, ScaleError::Unit { .. });
        prop_assert!(is_unit_error);
    }
}

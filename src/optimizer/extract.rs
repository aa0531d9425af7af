//! Turns a solver outcome back into modules and realized totals.

use rust_decimal::Decimal;
use serde::Serialize;

use crate::data::catalog::Module;
use crate::optimizer::constraints::BuildVars;
use crate::optimizer::objective::{damage_multiplier, DamageObjective};
use crate::optimizer::request::BuildRequest;
use crate::optimizer::solver::{SolveOutcome, Solution, SolverResult, SolverStatistics};
use crate::scaled::{Pct, Percent, QuantityKind, Seconds};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SelectedModule {
    pub id: String,
    pub name: String,
    pub cost: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rune_group: Option<String>,
}

/// Totals realized by a build, all in percent unless noted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildReport {
    pub total_cost: i64,
    pub module_count: usize,
    pub flat_skill_power: Pct,
    /// Module contribution only; the base modifier is reported separately.
    pub modifier_skill_power: Pct,
    pub base_modifier: Pct,
    /// Includes external adjustments.
    pub skill_cooldown: Pct,
    pub skill_duration: Pct,
    /// Seconds.
    pub effective_duration: Decimal,
    /// Seconds.
    pub effective_cooldown: Decimal,
    pub damage_multiplier: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SolvedBuild {
    /// Catalog order.
    pub selected: Vec<SelectedModule>,
    pub objective: i64,
    /// False when the solver stopped early and this is only the best build found.
    pub proven_optimal: bool,
    pub report: BuildReport,
}

impl SolvedBuild {
    pub fn selected_ids(&self) -> Vec<&str> {
        self.selected.iter().map(|m| m.id.as_str()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum OptimizationResult {
    /// No build satisfies the constraints. Distinct from a build with zero bonus.
    Infeasible,
    /// Stopped before any build was found.
    Unknown { reason: String },
    Solved(SolvedBuild),
}

impl OptimizationResult {
    pub fn solved(&self) -> Option<&SolvedBuild> {
        match self {
            Self::Solved(build) => Some(build),
            Self::Infeasible | Self::Unknown { .. } => None,
        }
    }

    pub fn status(&self) -> &'static str {
        match self {
            Self::Infeasible => "infeasible",
            Self::Unknown { .. } => "unknown",
            Self::Solved(_) => "solved",
        }
    }
}

pub fn extract_build(
    catalog: &[Module],
    vars: &BuildVars,
    objective: &DamageObjective,
    request: &BuildRequest,
    outcome: &SolveOutcome,
) -> OptimizationResult {
    let (solution, proven_optimal) = match &outcome.result {
        SolverResult::Optimal(solution) => (solution, true),
        SolverResult::Feasible(solution) => (solution, false),
        SolverResult::Infeasible => return OptimizationResult::Infeasible,
        SolverResult::Unknown => {
            return OptimizationResult::Unknown {
                reason: outcome.reason.to_string(),
            }
        }
    };

    let chosen: Vec<&Module> = catalog
        .iter()
        .zip(&vars.selection)
        .filter(|(_, x)| solution.value(**x))
        .map(|(module, _)| module)
        .collect();
    let selected = chosen
        .iter()
        .map(|module| SelectedModule {
            id: module.id.clone(),
            name: module.name.clone(),
            cost: module.cost,
            rune_group: module.rune_group.clone(),
        })
        .collect();

    let report = build_report(&chosen, vars, objective, request, solution);
    log_summary(&report, &outcome.statistics);
    OptimizationResult::Solved(SolvedBuild {
        selected,
        objective: solution.objective_value(),
        proven_optimal,
        report,
    })
}

fn build_report(
    chosen: &[&Module],
    vars: &BuildVars,
    objective: &DamageObjective,
    request: &BuildRequest,
    solution: &Solution,
) -> BuildReport {
    let hundred = Pct::hundred_percent();
    let skill_cooldown = Pct::from_raw(solution.int_value(vars.total_cooldown));
    let skill_duration = Pct::from_raw(solution.int_value(vars.total_duration));
    let flat_skill_power = Pct::from_raw(solution.int_value(objective.flat_term)) - hundred;
    let modifier_skill_power = Pct::from_raw(solution.int_value(objective.modifier_term))
        - hundred
        - request.base_modifier;

    BuildReport {
        total_cost: chosen.iter().map(|m| m.cost).sum(),
        module_count: chosen.len(),
        flat_skill_power,
        modifier_skill_power,
        base_modifier: request.base_modifier,
        skill_cooldown,
        skill_duration,
        effective_duration: seconds_after(request.ability.base_duration.raw(), skill_duration),
        effective_cooldown: seconds_after(request.ability.base_cooldown.raw(), skill_cooldown),
        damage_multiplier: damage_multiplier(solution.objective_value()),
    }
}

/// `base * (100% + delta)` in seconds.
fn seconds_after(base_raw: i64, delta: Pct) -> Decimal {
    let factor = Pct::hundred_percent() + delta;
    let digits = Seconds::DIGITS + Percent::DIGITS + 2;
    Decimal::from_i128_with_scale(base_raw as i128 * factor.raw() as i128, digits).normalize()
}

fn log_summary(report: &BuildReport, statistics: &SolverStatistics) {
    tracing::info!(
        modules = report.module_count,
        cost = report.total_cost,
        multiplier = %report.damage_multiplier,
        nodes = statistics.nodes,
        "extracted build"
    );
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    #[test]
    fn effective_seconds_apply_percent_delta() {
        assert_eq!(seconds_after(397, Pct::from_raw(-1290)), dec!(34.5787));
        assert_eq!(seconds_after(50, Pct::units(100)), dec!(10));
        assert_eq!(seconds_after(50, Pct::ZERO), dec!(5));
    }

    #[test]
    fn status_tags_serialize_lowercase() {
        let json = serde_json::to_value(OptimizationResult::Infeasible).unwrap();
        assert_eq!(json["status"], "infeasible");
        let json = serde_json::to_value(OptimizationResult::Unknown {
            reason: "Aborted: time limit reached".to_string(),
        })
        .unwrap();
        assert_eq!(json["status"], "unknown");
        assert_eq!(json["reason"], "Aborted: time limit reached");
    }
}

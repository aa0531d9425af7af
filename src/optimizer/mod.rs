pub mod constraints;
pub mod extract;
pub mod model;
pub mod monitor;
pub mod objective;
pub mod request;
pub mod solver;

use thiserror::Error;

use crate::data::catalog::{normalize_catalog, Module};
use crate::data::record::{CatalogError, ModuleRecords};
use crate::optimizer::constraints::{build_constraints, BuildVars};
use crate::optimizer::extract::extract_build;
use crate::optimizer::model::{ConstraintModel, ModelError};
use crate::optimizer::objective::{add_damage_objective, DamageObjective};
use crate::optimizer::solver::Solver;

pub use crate::optimizer::extract::{BuildReport, OptimizationResult, SelectedModule, SolvedBuild};
pub use crate::optimizer::request::{
    AbilityTiming, BuildRequest, CooldownAdjustment, UptimeBound, MAX_EQUIPPED_MODULES,
};
pub use crate::optimizer::solver::SolverLimits;

#[derive(Debug, Error)]
pub enum OptimizeError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error(transparent)]
    Model(#[from] ModelError),
}

/// A fully built model together with the handles needed to read a solution back.
#[derive(Debug, Clone)]
pub struct BuildModel {
    pub model: ConstraintModel,
    pub vars: BuildVars,
    pub objective: DamageObjective,
}

pub fn build_model(catalog: &[Module], request: &BuildRequest) -> Result<BuildModel, ModelError> {
    let mut model = ConstraintModel::new();
    let vars = build_constraints(&mut model, catalog, request)?;
    let objective = add_damage_objective(&mut model, &vars.selection, catalog, request)?;
    Ok(BuildModel {
        model,
        vars,
        objective,
    })
}

/// Finds the module subset with the highest damage multiplier for `request`.
///
/// Infeasible and timed-out searches are reported through [OptimizationResult]; an `Err` means
/// the model itself could not be built or solved (for example an arithmetic overflow).
pub fn find_optimal_build(
    catalog: &[Module],
    request: &BuildRequest,
) -> Result<OptimizationResult, ModelError> {
    let built = build_model(catalog, request)?;
    let outcome = Solver::new(request.limits.clone()).solve(&built.model)?;
    Ok(extract_build(
        catalog,
        &built.vars,
        &built.objective,
        request,
        &outcome,
    ))
}

/// Normalizes raw records for the requested element and category, then optimizes.
pub fn find_optimal_build_from_records(
    records: &ModuleRecords,
    request: &BuildRequest,
) -> Result<OptimizationResult, OptimizeError> {
    let load = normalize_catalog(records, request.element, request.category)?;
    Ok(find_optimal_build(&load.modules, request)?)
}

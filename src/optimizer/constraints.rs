//! Build constraints over one boolean per catalog module.

use std::collections::BTreeMap;

use crate::data::catalog::Module;
use crate::optimizer::model::{BoolVar, ConstraintModel, IntVar, LinearExpr, ModelError, Sense};
use crate::optimizer::request::{BuildRequest, UptimeBound};
use crate::scaled::Pct;

/// Decision variables, index-aligned with the catalog slice they were built from.
#[derive(Debug, Clone)]
pub struct BuildVars {
    pub selection: Vec<BoolVar>,
    /// Module cooldown deltas plus every external adjustment, raw percent.
    pub total_cooldown: IntVar,
    /// Module duration deltas, raw percent.
    pub total_duration: IntVar,
}

/// Domain `[-b, b]` for `constant + Σ x_i * c_i` with at most `picks` of the `x_i` set.
///
/// `b = picks * max|c_i| + |constant|`, so the domain adapts to the catalog instead of relying
/// on a fixed bound.
pub fn aux_domain(
    coefficients: impl IntoIterator<Item = i64>,
    picks: usize,
    constant: i64,
    name: &str,
) -> Result<(i64, i64), ModelError> {
    let overflow = || ModelError::Overflow {
        context: name.to_string(),
    };
    let largest = coefficients
        .into_iter()
        .map(|c| c.checked_abs().ok_or_else(overflow))
        .try_fold(0_i64, |max, c| c.map(|c| max.max(c)))?;
    let picks = i64::try_from(picks).map_err(|_| overflow())?;
    let bound = largest
        .checked_mul(picks)
        .and_then(|b| b.checked_add(constant.checked_abs()?))
        .ok_or_else(overflow)?;
    Ok((-bound, bound))
}

/// Adds budget, cardinality, group exclusivity and the uptime requirement for `catalog`.
pub fn build_constraints(
    model: &mut ConstraintModel,
    catalog: &[Module],
    request: &BuildRequest,
) -> Result<BuildVars, ModelError> {
    let selection: Vec<BoolVar> = catalog
        .iter()
        .map(|module| model.new_bool_var(format!("pick {}", module.id)))
        .collect();
    let picks = request.max_modules.min(catalog.len());

    model.add_linear(
        "capacity",
        LinearExpr::weighted_sum(selection.iter().zip(catalog).map(|(x, m)| (*x, m.cost))),
        Sense::LessEqual,
        request.max_capacity,
    );

    let max_modules = i64::try_from(request.max_modules).map_err(|_| ModelError::Overflow {
        context: "module count".to_string(),
    })?;
    model.add_linear(
        "module count",
        LinearExpr::weighted_sum(selection.iter().map(|x| (*x, 1))),
        Sense::LessEqual,
        max_modules,
    );

    let mut groups: BTreeMap<&str, Vec<BoolVar>> = BTreeMap::new();
    for (x, module) in selection.iter().zip(catalog) {
        if let Some(group) = module.rune_group.as_deref() {
            groups.entry(group).or_default().push(*x);
        }
    }
    for (group, members) in &groups {
        model.add_linear(
            format!("rune group {group}"),
            LinearExpr::weighted_sum(members.iter().map(|x| (*x, 1))),
            Sense::LessEqual,
            1,
        );
    }

    let external = request.external_cooldown_total();
    let total_cooldown = sum_var(
        model,
        "total cooldown",
        &selection,
        catalog.iter().map(|m| m.skill_cooldown),
        external,
        picks,
    )?;
    let total_duration = sum_var(
        model,
        "total duration",
        &selection,
        catalog.iter().map(|m| m.skill_duration),
        Pct::ZERO,
        picks,
    )?;
    add_uptime(model, request, total_cooldown, total_duration)?;

    tracing::debug!(
        modules = catalog.len(),
        groups = groups.len(),
        capacity = request.max_capacity,
        uptime = %request.uptime_bound,
        "built constraints"
    );

    Ok(BuildVars {
        selection,
        total_cooldown,
        total_duration,
    })
}

/// Defines `constant + Σ x_m * value_m` as a new integer variable.
pub(crate) fn sum_var(
    model: &mut ConstraintModel,
    name: &str,
    selection: &[BoolVar],
    values: impl Iterator<Item = Pct> + Clone,
    constant: Pct,
    picks: usize,
) -> Result<IntVar, ModelError> {
    let (lower, upper) = aux_domain(values.clone().map(|v| v.raw()), picks, constant.raw(), name)?;
    let var = model.new_int_var(lower, upper, name)?;
    let expr = LinearExpr::weighted_sum(selection.iter().copied().zip(values.map(|v| v.raw())))
        .plus(constant.raw());
    model.add_linear_equality(var, expr)?;
    Ok(var)
}

/// `base_duration * (100% + total_duration)` against `base_cooldown * (100% + total_cooldown)`,
/// rearranged so both totals stay on the left.
fn add_uptime(
    model: &mut ConstraintModel,
    request: &BuildRequest,
    total_cooldown: IntVar,
    total_duration: IntVar,
) -> Result<(), ModelError> {
    let duration = request.ability.base_duration.raw();
    let cooldown = request.ability.base_cooldown.raw();
    let hundred = Pct::hundred_percent().raw();
    let rhs = cooldown
        .checked_sub(duration)
        .and_then(|diff| diff.checked_mul(hundred))
        .ok_or_else(|| ModelError::Overflow {
            context: "uptime".to_string(),
        })?;
    let sense = match request.uptime_bound {
        UptimeBound::Inclusive => Sense::GreaterEqual,
        UptimeBound::Strict => Sense::Greater,
    };
    model.add_linear(
        "uptime",
        LinearExpr::new()
            .term(total_duration, duration)
            .term(total_cooldown, -cooldown),
        sense,
        rhs,
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimizer::model::Var;

    #[test]
    fn aux_domain_scales_with_catalog() {
        assert_eq!(aux_domain([300, -1250, 40], 10, -1290, "cd").unwrap(), (-13_790, 13_790));
        assert_eq!(aux_domain([], 10, 0, "empty").unwrap(), (0, 0));
        assert!(aux_domain([i64::MAX], 2, 0, "huge").is_err());
        assert!(aux_domain([i64::MIN], 1, 0, "min").is_err());
    }

    #[test]
    fn adds_one_row_per_rune_group() {
        let catalog = vec![
            Module::new("1", "a", 3).with_group("Focus"),
            Module::new("2", "b", 3).with_group("Focus"),
            Module::new("3", "c", 3).with_group("Core"),
            Module::new("4", "d", 3),
        ];
        let mut model = ConstraintModel::new();
        let vars = build_constraints(&mut model, &catalog, &BuildRequest::reference()).unwrap();
        assert_eq!(vars.selection.len(), 4);

        let names: Vec<&str> = model.constraints().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["capacity", "module count", "rune group Core", "rune group Focus", "uptime"]
        );
        let focus = &model.constraints()[3];
        assert_eq!(focus.expr.terms().len(), 2);
        assert_eq!(focus.rhs, 1);
    }

    #[test]
    fn uptime_row_follows_bound_policy() {
        let catalog = vec![Module::new("1", "a", 3).with_duration(Pct::units(10))];
        for (bound, sense) in [
            (UptimeBound::Inclusive, Sense::GreaterEqual),
            (UptimeBound::Strict, Sense::Greater),
        ] {
            let mut model = ConstraintModel::new();
            let request = BuildRequest::reference().with_uptime_bound(bound);
            let vars = build_constraints(&mut model, &catalog, &request).unwrap();
            let uptime = model.constraints().last().unwrap();
            assert_eq!(uptime.sense, sense);
            assert_eq!(uptime.rhs, (397 - 50) * 10_000);
            assert_eq!(
                uptime.expr.terms(),
                &[
                    (Var::Int(vars.total_duration), 50),
                    (Var::Int(vars.total_cooldown), -397)
                ]
            );
        }
    }

    #[test]
    fn cooldown_total_carries_external_adjustments() {
        let catalog = vec![Module::new("1", "a", 3).with_cooldown(Pct::units(-20))];
        let mut model = ConstraintModel::new();
        let vars = build_constraints(&mut model, &catalog, &BuildRequest::reference()).unwrap();
        let decl = model.int_decl(vars.total_cooldown);
        assert_eq!((decl.lower, decl.upper), (-3290, 3290));
    }
}

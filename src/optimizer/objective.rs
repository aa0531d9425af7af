//! The damage objective `(100% + flat) * (100% + base + modifier)`.
//!
//! Both factors are linear in the selection, so each becomes an auxiliary integer and the
//! product is a single multiplication equality. The result is in raw-percent squared:
//! `10_000 * 10_000` is a multiplier of exactly 1.

use rust_decimal::Decimal;

use crate::data::catalog::Module;
use crate::optimizer::constraints::sum_var;
use crate::optimizer::model::{BoolVar, ConstraintModel, IntVar, ModelError};
use crate::optimizer::request::BuildRequest;
use crate::scaled::{Percent, Pct, QuantityKind};

/// Decimal digits of a raw objective value read as a plain multiplier.
pub const MULTIPLIER_DIGITS: u32 = 2 * (Percent::DIGITS + 2);

#[derive(Debug, Clone, Copy)]
pub struct DamageObjective {
    /// `100% + Σ flat`.
    pub flat_term: IntVar,
    /// `100% + base + Σ modifier`.
    pub modifier_term: IntVar,
    pub objective: IntVar,
}

pub fn add_damage_objective(
    model: &mut ConstraintModel,
    selection: &[BoolVar],
    catalog: &[Module],
    request: &BuildRequest,
) -> Result<DamageObjective, ModelError> {
    let picks = request.max_modules.min(catalog.len());
    let hundred = Pct::hundred_percent();

    let flat_term = sum_var(
        model,
        "flat term",
        selection,
        catalog.iter().map(|m| m.flat_skill_power),
        hundred,
        picks,
    )?;
    let modifier_base = hundred
        .checked_add(request.base_modifier)
        .ok_or_else(|| ModelError::Overflow {
            context: "modifier term".to_string(),
        })?;
    let modifier_term = sum_var(
        model,
        "modifier term",
        selection,
        catalog.iter().map(|m| m.modifier_skill_power),
        modifier_base,
        picks,
    )?;

    let bound = [flat_term, modifier_term]
        .iter()
        .map(|var| {
            let decl = model.int_decl(*var);
            decl.lower.unsigned_abs().max(decl.upper.unsigned_abs())
        })
        .try_fold(1_u64, |acc, magnitude| acc.checked_mul(magnitude))
        .and_then(|bound| i64::try_from(bound).ok())
        .ok_or_else(|| ModelError::Overflow {
            context: "damage".to_string(),
        })?;
    let objective = model.new_int_var(-bound, bound, "damage")?;
    model.add_multiplication_equality(objective, [flat_term, modifier_term])?;
    model.maximize(objective);

    Ok(DamageObjective {
        flat_term,
        modifier_term,
        objective,
    })
}

/// Reads a raw objective value as a plain multiplier, e.g. `194_286_600` as `1.942866`.
pub fn damage_multiplier(objective: i64) -> Decimal {
    Decimal::new(objective, MULTIPLIER_DIGITS).normalize()
}

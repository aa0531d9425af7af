//! What one optimization call asks for: budget, target buckets, ability timing and limits.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::data::catalog::{Category, Element};
use crate::optimizer::solver::SolverLimits;
use crate::scaled::{Pct, Time};

/// Modules a character can equip at once.
pub const MAX_EQUIPPED_MODULES: usize = 10;

/// Capacity of the reference character: level 85 minus six locked slots, two points each.
pub const REFERENCE_CAPACITY: i64 = (85 - 6) * 2;

/// Base skill-power modifier of the reference character, in raw percent.
pub const REFERENCE_BASE_MODIFIER: Pct = Pct::from_raw(6890);

/// Whether skill duration may equal the cooldown or must strictly exceed it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UptimeBound {
    /// `duration >= cooldown`.
    #[default]
    Inclusive,
    /// `duration > cooldown`.
    Strict,
}

impl fmt::Display for UptimeBound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Inclusive => "inclusive",
            Self::Strict => "strict",
        })
    }
}

/// Unmodified duration and cooldown of the ability the build supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbilityTiming {
    pub base_duration: Time,
    pub base_cooldown: Time,
}

impl AbilityTiming {
    /// 5 s of duration against a 39.7 s cooldown. The cooldown keeps 0.3 s of slack below 40 s
    /// for server tick jitter.
    pub fn reference() -> Self {
        Self {
            base_duration: Time::from_raw(50),
            base_cooldown: Time::from_raw(397),
        }
    }
}

impl Default for AbilityTiming {
    fn default() -> Self {
        Self::reference()
    }
}

/// A cooldown change that applies regardless of the selected modules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CooldownAdjustment {
    pub source: String,
    pub value: Pct,
}

impl CooldownAdjustment {
    pub fn new(source: impl Into<String>, value: Pct) -> Self {
        Self {
            source: source.into(),
            value,
        }
    }

    /// Archetype tuning (-5.5%) and reactor (-7.4%).
    pub fn reference() -> Vec<Self> {
        vec![
            Self::new("arche tuning", Pct::from_raw(-550)),
            Self::new("reactor", Pct::from_raw(-740)),
        ]
    }
}

#[derive(Debug, Clone)]
pub struct BuildRequest {
    pub max_capacity: i64,
    pub element: Element,
    pub category: Category,
    pub base_modifier: Pct,
    pub ability: AbilityTiming,
    pub external_cooldown: Vec<CooldownAdjustment>,
    pub max_modules: usize,
    pub uptime_bound: UptimeBound,
    pub limits: SolverLimits,
}

impl BuildRequest {
    /// The reference character: non-attribute element, dimension category, 158 capacity.
    pub fn reference() -> Self {
        Self {
            max_capacity: REFERENCE_CAPACITY,
            element: Element::NonAttribute,
            category: Category::Dimension,
            base_modifier: REFERENCE_BASE_MODIFIER,
            ability: AbilityTiming::reference(),
            external_cooldown: CooldownAdjustment::reference(),
            max_modules: MAX_EQUIPPED_MODULES,
            uptime_bound: UptimeBound::Inclusive,
            limits: SolverLimits::default(),
        }
    }

    pub fn with_capacity(mut self, max_capacity: i64) -> Self {
        self.max_capacity = max_capacity;
        self
    }

    pub fn with_ability(mut self, ability: AbilityTiming) -> Self {
        self.ability = ability;
        self
    }

    pub fn with_uptime_bound(mut self, uptime_bound: UptimeBound) -> Self {
        self.uptime_bound = uptime_bound;
        self
    }

    pub fn with_limits(mut self, limits: SolverLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn external_cooldown_total(&self) -> Pct {
        self.external_cooldown.iter().map(|adj| adj.value).sum()
    }
}

impl Default for BuildRequest {
    fn default() -> Self {
        Self::reference()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_profile_constants() {
        let request = BuildRequest::reference();
        assert_eq!(request.max_capacity, 158);
        assert_eq!(request.base_modifier.to_string(), "68.9%");
        assert_eq!(request.ability.base_cooldown.to_string(), "39.7s");
        assert_eq!(request.external_cooldown_total(), Pct::from_raw(-1290));
        assert_eq!(request.max_modules, MAX_EQUIPPED_MODULES);
        assert_eq!(request.uptime_bound, UptimeBound::Inclusive);
    }
}

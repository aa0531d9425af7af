//! Build profile loaded from YAML.
//!
//! Every field is optional; omitted fields take the reference character's values. A missing
//! profile file is not an error, a malformed one is.

use std::env;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::data::catalog::{Category, Element};
use crate::optimizer::request::{
    AbilityTiming, BuildRequest, CooldownAdjustment, UptimeBound, MAX_EQUIPPED_MODULES,
    REFERENCE_BASE_MODIFIER, REFERENCE_CAPACITY,
};
use crate::optimizer::solver::SolverLimits;
use crate::scaled::Pct;

pub const DEFAULT_PROFILE_PATH: &str = "data/profile.yaml";
pub const PROFILE_ENV: &str = "MODFORGE_PROFILE";
/// Search budget when a profile names none. `time_limit_secs: null` lifts it.
pub const DEFAULT_TIME_LIMIT_SECS: u64 = 60;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read profile {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid profile {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OptimizerConfig {
    pub capacity: i64,
    pub element: Element,
    pub category: Category,
    pub base_modifier: Pct,
    pub ability: AbilityTiming,
    pub external_cooldown: Vec<CooldownAdjustment>,
    pub max_modules: usize,
    pub uptime_bound: UptimeBound,
    pub time_limit_secs: Option<u64>,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            capacity: REFERENCE_CAPACITY,
            element: Element::NonAttribute,
            category: Category::Dimension,
            base_modifier: REFERENCE_BASE_MODIFIER,
            ability: AbilityTiming::reference(),
            external_cooldown: CooldownAdjustment::reference(),
            max_modules: MAX_EQUIPPED_MODULES,
            uptime_bound: UptimeBound::Inclusive,
            time_limit_secs: Some(DEFAULT_TIME_LIMIT_SECS),
        }
    }
}

impl OptimizerConfig {
    pub fn into_request(self) -> BuildRequest {
        let limits = match self.time_limit_secs {
            Some(secs) => SolverLimits::default().with_time_limit(Duration::from_secs(secs)),
            None => SolverLimits::default(),
        };
        BuildRequest {
            max_capacity: self.capacity,
            element: self.element,
            category: self.category,
            base_modifier: self.base_modifier,
            ability: self.ability,
            external_cooldown: self.external_cooldown,
            max_modules: self.max_modules,
            uptime_bound: self.uptime_bound,
            limits,
        }
    }
}

/// Profile path from `MODFORGE_PROFILE`, else [DEFAULT_PROFILE_PATH].
pub fn profile_path() -> PathBuf {
    resolve_profile_path(env::var_os(PROFILE_ENV))
}

fn resolve_profile_path(from_env: Option<OsString>) -> PathBuf {
    from_env
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_PROFILE_PATH))
}

pub fn load_config(path: impl AsRef<Path>) -> Result<OptimizerConfig, ConfigError> {
    let path = path.as_ref();
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Like [load_config], but a missing file yields [OptimizerConfig::default].
pub fn load_config_or_default(path: impl AsRef<Path>) -> Result<OptimizerConfig, ConfigError> {
    let path = path.as_ref();
    if !path.exists() {
        tracing::debug!(path = %path.display(), "no profile file, using reference profile");
        return Ok(OptimizerConfig::default());
    }
    load_config(path)
}

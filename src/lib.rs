//! Exact build optimizer for skill-damage module loadouts.
//!
//! A catalog of modules ([data]) becomes an integer model ([optimizer::model]) with budget,
//! slot, rune-group and uptime constraints and a product objective; [optimizer::solver]
//! solves it exactly and [optimizer::extract] reports the chosen build.

pub mod cli;
pub mod config;
pub mod data;
pub mod optimizer;
pub mod parallel;
pub mod scaled;

pub use optimizer::{
    find_optimal_build, find_optimal_build_from_records, BuildRequest, OptimizationResult,
};

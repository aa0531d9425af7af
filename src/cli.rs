use std::path::PathBuf;

use serde::Serialize;

use crate::config::{load_config_or_default, profile_path, OptimizerConfig};
use crate::data::catalog::{normalize_catalog, CatalogLoad, SkippedModule};
use crate::data::record::{load_module_records, skill_power_fields, DEFAULT_CATALOG_PATH};
use crate::data::validate::{validate_catalog_file, ValidationSeverity};
use crate::optimizer::{find_optimal_build, BuildRequest, OptimizationResult, UptimeBound};
use crate::parallel::{sweep_capacities, SweepPoint, WorkerPool};

const USAGE: &str = "usage: modforge <optimize|sweep|validate|inspect>";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Optimize,
    Sweep,
    Validate,
    Inspect,
}

pub fn parse_command(args: &[String]) -> Option<Command> {
    match args.get(1).map(String::as_str) {
        Some("optimize") => Some(Command::Optimize),
        Some("sweep") => Some(Command::Sweep),
        Some("validate") => Some(Command::Validate),
        Some("inspect") => Some(Command::Inspect),
        _ => None,
    }
}

pub fn run_with_args(args: &[String]) -> i32 {
    match parse_command(args) {
        Some(Command::Optimize) => handle_optimize(args),
        Some(Command::Sweep) => handle_sweep(args),
        Some(Command::Validate) => handle_validate(args),
        Some(Command::Inspect) => handle_inspect(args),
        None => {
            eprintln!("{USAGE}");
            2
        }
    }
}

/// The part of the request echoed back next to results.
#[derive(Debug, Serialize)]
struct RequestSummary {
    capacity: i64,
    element: String,
    category: String,
    max_modules: usize,
    uptime_bound: UptimeBound,
}

impl RequestSummary {
    fn of(request: &BuildRequest) -> Self {
        Self {
            capacity: request.max_capacity,
            element: request.element.to_string(),
            category: request.category.to_string(),
            max_modules: request.max_modules,
            uptime_bound: request.uptime_bound,
        }
    }
}

#[derive(Debug, Serialize)]
struct OptimizeOutput {
    request: RequestSummary,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    skipped: Vec<SkippedModule>,
    result: OptimizationResult,
}

#[derive(Debug, Serialize)]
struct SweepOutput {
    request: RequestSummary,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    skipped: Vec<SkippedModule>,
    points: Vec<SweepPoint>,
}

fn handle_optimize(args: &[String]) -> i32 {
    let catalog_path = args.get(2).map(String::as_str).unwrap_or(DEFAULT_CATALOG_PATH);
    let Some((request, load)) = prepare(catalog_path, args.get(3)) else {
        return 1;
    };

    let result = match find_optimal_build(&load.modules, &request) {
        Ok(result) => result,
        Err(err) => {
            eprintln!("optimization failed: {err}");
            return 1;
        }
    };
    print_json(&OptimizeOutput {
        request: RequestSummary::of(&request),
        skipped: load.skipped,
        result,
    })
}

fn handle_sweep(args: &[String]) -> i32 {
    let (Some(catalog_path), Some(from), Some(to)) = (args.get(2), args.get(3), args.get(4)) else {
        eprintln!("usage: modforge sweep <catalog.json> <from> <to> [profile.yaml]");
        return 2;
    };
    let (Some(from), Some(to)) = (parse_capacity(from), parse_capacity(to)) else {
        return 2;
    };
    let Some((request, load)) = prepare(catalog_path, args.get(5)) else {
        return 1;
    };

    match sweep_capacities(&load.modules, &request, from..=to, &WorkerPool::default()) {
        Ok(points) => print_json(&SweepOutput {
            request: RequestSummary::of(&request),
            skipped: load.skipped,
            points,
        }),
        Err(err) => {
            eprintln!("sweep failed: {err}");
            1
        }
    }
}

fn handle_validate(args: &[String]) -> i32 {
    let path = args.get(2).map(String::as_str).unwrap_or(DEFAULT_CATALOG_PATH);
    let report = match validate_catalog_file(path) {
        Ok(report) => report,
        Err(err) => {
            eprintln!("validation failed: {err}");
            return 1;
        }
    };

    let code = print_json(&report);
    if code != 0 {
        return code;
    }
    if report.has_errors() {
        eprintln!(
            "validation failed: {} error(s), {} warning(s)",
            report.count(ValidationSeverity::Error),
            report.count(ValidationSeverity::Warning)
        );
        return 1;
    }
    0
}

fn handle_inspect(args: &[String]) -> i32 {
    let path = args.get(2).map(String::as_str).unwrap_or(DEFAULT_CATALOG_PATH);
    match load_module_records(path) {
        Ok(records) => print_json(&skill_power_fields(&records)),
        Err(err) => {
            eprintln!("inspect failed: {err}");
            1
        }
    }
}

/// Loads the profile and catalog, reporting failures on stderr.
fn prepare(catalog_path: &str, profile: Option<&String>) -> Option<(BuildRequest, CatalogLoad)> {
    let profile = profile.map(PathBuf::from).unwrap_or_else(profile_path);
    let config: OptimizerConfig = match load_config_or_default(&profile) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{err}");
            return None;
        }
    };
    let request = config.into_request();

    let records = match load_module_records(catalog_path) {
        Ok(records) => records,
        Err(err) => {
            eprintln!("{err}");
            return None;
        }
    };
    match normalize_catalog(&records, request.element, request.category) {
        Ok(load) => Some((request, load)),
        Err(err) => {
            eprintln!("{err}");
            None
        }
    }
}

fn parse_capacity(raw: &str) -> Option<i64> {
    match raw.parse::<i64>() {
        Ok(value) => Some(value),
        Err(_) => {
            eprintln!("invalid capacity '{raw}'");
            None
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> i32 {
    match serde_json::to_string_pretty(value) {
        Ok(payload) => {
            println!("{payload}");
            0
        }
        Err(err) => {
            eprintln!("failed to serialize output: {err}");
            1
        }
    }
}

use std::collections::HashSet;
use std::fmt;
use std::path::Path;

use serde::Serialize;

use crate::data::catalog::{Category, Element, COST_SENTINEL};
use crate::data::record::{
    load_module_records, CatalogError, CostField, ModuleRecord, ModuleRecords, StatMode,
};
use crate::scaled::Pct;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationSeverity {
    Error,
    Warning,
    Info,
}

impl ValidationSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Info => "info",
        }
    }
}

impl fmt::Display for ValidationSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationDiagnostic {
    pub severity: ValidationSeverity,
    pub context: String,
    pub message: String,
}

impl fmt::Display for ValidationDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.severity, self.context, self.message)
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationReport {
    pub diagnostics: Vec<ValidationDiagnostic>,
}

impl ValidationReport {
    pub fn push(
        &mut self,
        severity: ValidationSeverity,
        context: impl Into<String>,
        message: impl Into<String>,
    ) {
        self.diagnostics.push(ValidationDiagnostic {
            severity,
            context: context.into(),
            message: message.into(),
        });
    }

    pub fn has_errors(&self) -> bool {
        self.count(ValidationSeverity::Error) > 0
    }

    pub fn count(&self, severity: ValidationSeverity) -> usize {
        self.diagnostics
            .iter()
            .filter(|diag| diag.severity == severity)
            .count()
    }
}

pub fn validate_catalog_file(path: impl AsRef<Path>) -> Result<ValidationReport, CatalogError> {
    let records = load_module_records(path)?;
    Ok(validate_catalog(&records))
}

/// Checks every record without normalizing it. Unlike [crate::data::catalog::normalize_catalog],
/// nothing here aborts: unknown modes are reported alongside everything else.
pub fn validate_catalog(records: &ModuleRecords) -> ValidationReport {
    let mut report = ValidationReport::default();
    let mut seen_ids = HashSet::new();

    for (key, record) in records {
        let context = format!("module '{key}'");

        match record.id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => {
                if !seen_ids.insert(id.to_string()) {
                    report.push(
                        ValidationSeverity::Error,
                        format!("{context}.id"),
                        format!("duplicate id '{id}'"),
                    );
                }
            }
            _ => report.push(
                ValidationSeverity::Error,
                format!("{context}.id"),
                "missing non-empty 'id'",
            ),
        }

        if key.trim().is_empty()
            && record.name.as_deref().map_or(true, |name| name.trim().is_empty())
        {
            report.push(
                ValidationSeverity::Error,
                format!("{context}.name"),
                "missing non-empty 'name'",
            );
        }

        validate_cost(&mut report, &context, record);
        validate_stats(&mut report, &context, record);
        validate_modes(&mut report, &context, record);
    }

    report
}

fn validate_cost(report: &mut ValidationReport, context: &str, record: &ModuleRecord) {
    match record.cost() {
        Ok(CostField::Listed(_)) => {}
        Ok(CostField::Missing) => report.push(
            ValidationSeverity::Warning,
            format!("{context}.attributes"),
            format!("no tier cost listed; cost defaults to {COST_SENTINEL}"),
        ),
        Err(issue) => report.push(
            ValidationSeverity::Error,
            format!("{context}.attributes"),
            issue.to_string(),
        ),
    }
}

fn validate_stats(report: &mut ValidationReport, context: &str, record: &ModuleRecord) {
    for key in record.stat_keys() {
        let stat_context = format!("{context}.{key}");
        let value = match record.stat(key) {
            Ok(value) => value,
            Err(issue) => {
                report.push(ValidationSeverity::Error, stat_context, issue.to_string());
                continue;
            }
        };
        if let Err(err) = Pct::from_decimal(value) {
            report.push(ValidationSeverity::Error, stat_context.clone(), err.to_string());
        }
        if !is_optimized_stat(key) {
            report.push(
                ValidationSeverity::Warning,
                stat_context,
                format!("unrecognized stat key '{key}' is ignored by the optimizer"),
            );
        }
    }
}

fn validate_modes(report: &mut ValidationReport, context: &str, record: &ModuleRecord) {
    for (stat, label) in record.stat_modes() {
        let mode_context = format!("{context}.{stat}Type");
        match label.as_str().and_then(StatMode::from_label) {
            Some(StatMode::Additive) => {}
            Some(StatMode::Multiplicative) => report.push(
                ValidationSeverity::Info,
                mode_context,
                format!("'{stat}' is multiplicative but the optimizer sums it additively"),
            ),
            None => report.push(
                ValidationSeverity::Error,
                mode_context,
                format!("unknown stat mode {label}"),
            ),
        }
    }
}

fn is_optimized_stat(key: &str) -> bool {
    if matches!(
        key,
        "allSkillPowerFlat" | "allSkillPowerModifier" | "skillCooldown" | "skillDuration"
    ) {
        return true;
    }
    Element::ALL.iter().any(|element| element.flat_key() == key)
        || Category::ALL
            .iter()
            .any(|category| category.modifier_key() == key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::record::parse_module_records;

    fn report_for(raw: &str) -> ValidationReport {
        validate_catalog(&parse_module_records(raw).unwrap())
    }

    fn messages(report: &ValidationReport, severity: ValidationSeverity) -> Vec<String> {
        report
            .diagnostics
            .iter()
            .filter(|diag| diag.severity == severity)
            .map(|diag| diag.message.clone())
            .collect()
    }

    #[test]
    fn clean_catalog_has_no_diagnostics() {
        let report = report_for(
            r#"{"A": {"id": "1", "attributes": [{"cost": 3}], "fireSkillPowerFlat": 7.4, "fireSkillPowerFlatType": "add"}}"#,
        );
        assert!(report.diagnostics.is_empty(), "{:?}", report.diagnostics);
    }

    #[test]
    fn duplicate_and_missing_ids_are_errors() {
        let report = report_for(
            r#"{"A": {"id": "1", "attributes": [{"cost": 1}]}, "B": {"id": "1", "attributes": [{"cost": 1}]}, "C": {"attributes": [{"cost": 1}]}}"#,
        );
        let errors = messages(&report, ValidationSeverity::Error);
        assert!(errors.iter().any(|m| m.contains("duplicate id '1'")));
        assert!(errors.iter().any(|m| m.contains("missing non-empty 'id'")));
        assert!(report.has_errors());
    }

    #[test]
    fn cost_sentinel_is_flagged_as_warning() {
        let report = report_for(r#"{"A": {"id": "1"}}"#);
        assert!(!report.has_errors());
        let warnings = messages(&report, ValidationSeverity::Warning);
        assert_eq!(warnings, vec![format!("no tier cost listed; cost defaults to {COST_SENTINEL}")]);
    }

    #[test]
    fn unit_and_precision_violations_are_errors() {
        let report = report_for(
            r#"{"A": {"id": "1", "attributes": [{"cost": 1}], "skillCooldown": 0.074, "skillDuration": 1.234}}"#,
        );
        assert_eq!(report.count(ValidationSeverity::Error), 2);
    }

    #[test]
    fn modes_and_unknown_keys_are_reported() {
        let report = report_for(
            r#"{"A": {"id": "1", "attributes": [{"cost": 1}],
                "skillCooldown": -5, "skillCooldownType": "mult",
                "skillDuration": 5, "skillDurationType": "??",
                "plasmaSkillPowerFlat": 3}}"#,
        );
        assert_eq!(report.count(ValidationSeverity::Info), 1);
        assert_eq!(report.count(ValidationSeverity::Error), 1);
        assert!(messages(&report, ValidationSeverity::Warning)
            .iter()
            .any(|m| m.contains("plasmaSkillPowerFlat")));
    }
}

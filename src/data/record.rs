//! Cleaned module records as produced by the description-mining stage.
//!
//! The file is a JSON object keyed by module name. Besides identity and tier data, each record
//! carries flat stat keys such as `fireSkillPowerFlat` or `skillCooldown` (decimal percentages)
//! and, for each mined stat, a `<stat>Type` key holding its directional mode (`add` / `mult`).

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::scaled::ScaleError;

pub const DEFAULT_CATALOG_PATH: &str = "data/modules-with-data.json";

const MODE_SUFFIX: &str = "Type";

/// Module name → record, ordered by name so every downstream pass is deterministic.
pub type ModuleRecords = BTreeMap<String, ModuleRecord>;

/// Failures that abort a whole catalog load.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to read catalog '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse catalog JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("module '{module}': unknown stat mode '{mode}' for {stat}")]
    UnknownStatMode {
        module: String,
        stat: String,
        mode: String,
    },
    #[error("unknown directional token '{token}'")]
    UnknownDirectionalToken { token: char },
}

/// Problems confined to a single record. The record is skipped; the batch continues.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
pub enum RecordIssue {
    #[error("missing non-empty 'id'")]
    MissingId,
    #[error("missing non-empty 'name'")]
    MissingName,
    #[error("{stat}: expected a decimal number, found {found}")]
    NotANumber { stat: String, found: String },
    #[error("{stat}: {source}")]
    Scale {
        stat: String,
        #[serde(serialize_with = "serialize_display")]
        source: ScaleError,
    },
    #[error("cost must be a non-negative integer, found {found}")]
    InvalidCost { found: String },
}

fn serialize_display<S: serde::Serializer>(
    value: &ScaleError,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_str(value)
}

/// How a mined stat combines with the rest of the build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatMode {
    #[serde(rename = "add")]
    Additive,
    #[serde(rename = "mult")]
    Multiplicative,
}

impl StatMode {
    /// Decodes the marker that follows a value in a module description, e.g. `12%[+`.
    pub fn from_token(token: char) -> Result<Self, CatalogError> {
        match token {
            '+' => Ok(Self::Additive),
            'x' => Ok(Self::Multiplicative),
            other => Err(CatalogError::UnknownDirectionalToken { token: other }),
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "add" => Some(Self::Additive),
            "mult" => Some(Self::Multiplicative),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Additive => "add",
            Self::Multiplicative => "mult",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AttributeTier {
    #[serde(default)]
    pub cost: Option<Value>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModuleRecord {
    #[serde(default, deserialize_with = "string_or_number")]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub rune_group_name: Option<String>,
    #[serde(default)]
    pub attributes: Vec<AttributeTier>,
    /// Every other key: mined stats, their modes, and descriptive fields.
    #[serde(flatten)]
    pub stats: BTreeMap<String, Value>,
}

fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(text)) => Some(text),
        Some(Value::Number(number)) => Some(number.to_string()),
        _ => None,
    })
}

/// The cost of the highest tier, or the reason it could not be read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CostField {
    Listed(i64),
    Missing,
}

impl ModuleRecord {
    /// A mined stat as an exact decimal. Absent and `null` keys read as zero.
    pub fn stat(&self, key: &str) -> Result<Decimal, RecordIssue> {
        match self.stats.get(key) {
            None | Some(Value::Null) => Ok(Decimal::ZERO),
            Some(value) => decimal_from_json(value).ok_or_else(|| RecordIssue::NotANumber {
                stat: key.to_string(),
                found: value.to_string(),
            }),
        }
    }

    /// Cost of the last attribute tier.
    pub fn cost(&self) -> Result<CostField, RecordIssue> {
        let Some(raw) = self.attributes.last().and_then(|tier| tier.cost.as_ref()) else {
            return Ok(CostField::Missing);
        };
        match raw {
            Value::Null => Ok(CostField::Missing),
            Value::Number(number) => number
                .as_i64()
                .filter(|cost| *cost >= 0)
                .map(CostField::Listed)
                .ok_or_else(|| RecordIssue::InvalidCost {
                    found: number.to_string(),
                }),
            other => Err(RecordIssue::InvalidCost {
                found: other.to_string(),
            }),
        }
    }

    /// Mode keys of this record: `(stat, label)` for every `<stat>Type` whose stat is present.
    pub fn stat_modes(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.stats.iter().filter_map(|(key, value)| {
            let stat = key.strip_suffix(MODE_SUFFIX)?;
            self.stats.contains_key(stat).then_some((stat, value))
        })
    }

    /// Decodes every mode key. An unrecognized mode means the mining rules met a format they
    /// were never written for, so it fails the whole load instead of being guessed.
    pub fn check_stat_modes(&self, module: &str) -> Result<BTreeMap<String, StatMode>, CatalogError> {
        let mut modes = BTreeMap::new();
        for (stat, label) in self.stat_modes() {
            let mode = label.as_str().and_then(StatMode::from_label).ok_or_else(|| {
                CatalogError::UnknownStatMode {
                    module: module.to_string(),
                    stat: stat.to_string(),
                    mode: label.as_str().map(str::to_string).unwrap_or_else(|| label.to_string()),
                }
            })?;
            modes.insert(stat.to_string(), mode);
        }
        Ok(modes)
    }

    /// Keys that hold numeric stat values (mode keys excluded).
    pub fn stat_keys(&self) -> impl Iterator<Item = &str> {
        self.stats
            .keys()
            .map(String::as_str)
            .filter(|key| is_stat_key(key))
    }

    pub fn rune_group(&self) -> Option<&str> {
        self.rune_group_name
            .as_deref()
            .map(str::trim)
            .filter(|group| !group.is_empty())
    }
}

fn is_stat_key(key: &str) -> bool {
    if key.ends_with(MODE_SUFFIX) {
        return false;
    }
    key.contains("SkillPower") || key == "skillCooldown" || key == "skillDuration"
}

/// Exact decimal for a JSON number or numeric string. Never goes through `f64` arithmetic:
/// the number's shortest textual form is parsed directly.
pub fn decimal_from_json(value: &Value) -> Option<Decimal> {
    let text = match value {
        Value::Number(number) => number.to_string(),
        Value::String(text) => text.trim().to_string(),
        _ => return None,
    };
    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .ok()
}

pub fn parse_module_records(raw: &str) -> Result<ModuleRecords, CatalogError> {
    Ok(serde_json::from_str(raw)?)
}

pub fn load_module_records(path: impl AsRef<Path>) -> Result<ModuleRecords, CatalogError> {
    let path = path.as_ref();
    let raw = fs::read_to_string(path).map_err(|source| CatalogError::Read {
        path: path.display().to_string(),
        source,
    })?;
    parse_module_records(&raw)
}

/// Skill-power keys and rune group of one module, for inspecting a catalog.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkillPowerFields {
    pub rune_group_name: Option<String>,
    pub fields: BTreeMap<String, Decimal>,
}

/// Every module with at least one skill-power stat, with those stats and its rune group.
pub fn skill_power_fields(records: &ModuleRecords) -> BTreeMap<String, SkillPowerFields> {
    records
        .iter()
        .filter_map(|(name, record)| {
            let fields: BTreeMap<String, Decimal> = record
                .stat_keys()
                .filter(|key| key.contains("SkillPower"))
                .filter_map(|key| {
                    let value = record.stats.get(key).and_then(decimal_from_json)?;
                    Some((key.to_string(), value))
                })
                .collect();
            if fields.is_empty() {
                return None;
            }
            Some((
                name.clone(),
                SkillPowerFields {
                    rune_group_name: record.rune_group_name.clone(),
                    fields,
                },
            ))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    const SAMPLE: &str = r#"{
        "Battle of Stamina": {
            "id": 251001,
            "name": "Battle of Stamina",
            "rune_group_name": "",
            "attributes": [{"cost": 6}, {"cost": 15}],
            "skillDuration": 8.79,
            "skillDurationType": "add"
        },
        "Dimension Bonus": {
            "id": "m-2",
            "name": "Dimension Bonus",
            "rune_group_name": "Skill Power",
            "attributes": [],
            "dimensionSkillPowerModifier": 12.0,
            "dimensionSkillPowerModifierType": "add",
            "desc": "Dimension Skill Power Modifier 12%[+"
        }
    }"#;

    #[test]
    fn parses_records_with_numeric_and_string_ids() {
        let records = parse_module_records(SAMPLE).unwrap();
        assert_eq!(records.len(), 2);
        let stamina = &records["Battle of Stamina"];
        assert_eq!(stamina.id.as_deref(), Some("251001"));
        assert_eq!(stamina.stat("skillDuration").unwrap(), dec!(8.79));
        assert_eq!(stamina.stat("skillCooldown").unwrap(), Decimal::ZERO);
        assert_eq!(stamina.cost().unwrap(), CostField::Listed(15));
        assert_eq!(stamina.rune_group(), None);

        let bonus = &records["Dimension Bonus"];
        assert_eq!(bonus.id.as_deref(), Some("m-2"));
        assert_eq!(bonus.cost().unwrap(), CostField::Missing);
        assert_eq!(bonus.rune_group(), Some("Skill Power"));
    }

    #[test]
    fn directional_tokens_decode_or_fail() {
        assert_eq!(StatMode::from_token('+').unwrap(), StatMode::Additive);
        assert_eq!(StatMode::from_token('x').unwrap(), StatMode::Multiplicative);
        assert!(matches!(
            StatMode::from_token('~'),
            Err(CatalogError::UnknownDirectionalToken { token: '~' })
        ));
    }

    #[test]
    fn unknown_stat_mode_is_fatal() {
        let raw = r#"{"Odd": {"id": "1", "skillCooldown": -5, "skillCooldownType": "pow"}}"#;
        let records = parse_module_records(raw).unwrap();
        let err = records["Odd"].check_stat_modes("Odd").unwrap_err();
        assert!(matches!(err, CatalogError::UnknownStatMode { ref mode, .. } if mode == "pow"));
    }

    #[test]
    fn stat_modes_ignore_unrelated_type_keys() {
        let raw = r#"{"M": {"id": "1", "socketType": "Almandine", "skillCooldown": -5, "skillCooldownType": "mult"}}"#;
        let records = parse_module_records(raw).unwrap();
        let modes = records["M"].check_stat_modes("M").unwrap();
        assert_eq!(modes.len(), 1);
        assert_eq!(modes["skillCooldown"], StatMode::Multiplicative);
    }

    #[test]
    fn negative_or_fractional_cost_is_reported() {
        let raw = r#"{"A": {"id": "1", "attributes": [{"cost": -3}]}, "B": {"id": "2", "attributes": [{"cost": 2.5}]}}"#;
        let records = parse_module_records(raw).unwrap();
        assert!(matches!(records["A"].cost(), Err(RecordIssue::InvalidCost { .. })));
        assert!(matches!(records["B"].cost(), Err(RecordIssue::InvalidCost { .. })));
    }

    #[test]
    fn non_numeric_stat_is_reported() {
        let raw = r#"{"A": {"id": "1", "skillCooldown": true}}"#;
        let records = parse_module_records(raw).unwrap();
        assert!(matches!(
            records["A"].stat("skillCooldown"),
            Err(RecordIssue::NotANumber { .. })
        ));
    }

    #[test]
    fn skill_power_fields_lists_only_skill_power_modules() {
        let records = parse_module_records(SAMPLE).unwrap();
        let fields = skill_power_fields(&records);
        assert_eq!(fields.len(), 1);
        let bonus = &fields["Dimension Bonus"];
        assert_eq!(bonus.rune_group_name.as_deref(), Some("Skill Power"));
        assert_eq!(bonus.fields["dimensionSkillPowerModifier"], dec!(12));
    }
}

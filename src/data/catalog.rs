//! Normalizes cleaned records into the fields the optimizer consumes.

use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::data::record::{CatalogError, CostField, ModuleRecord, ModuleRecords, RecordIssue};
use crate::scaled::Pct;

/// Cost assumed when a record lists no tier cost. High enough that such a module is
/// effectively unaffordable under any realistic capacity.
pub const COST_SENTINEL: i64 = 99;

const ALL_BUCKET: &str = "all";
const FLAT_SUFFIX: &str = "SkillPowerFlat";
const MODIFIER_SUFFIX: &str = "SkillPowerModifier";
const COOLDOWN_KEY: &str = "skillCooldown";
const DURATION_KEY: &str = "skillDuration";

/// Damage element a flat skill-power bonus applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Element {
    Chill,
    Electric,
    Fire,
    NonAttribute,
    Toxic,
}

impl Element {
    pub const ALL: [Element; 5] = [
        Element::Chill,
        Element::Electric,
        Element::Fire,
        Element::NonAttribute,
        Element::Toxic,
    ];

    /// Record key prefix, e.g. `non-attribute` in `non-attributeSkillPowerFlat`.
    pub fn key_prefix(&self) -> &'static str {
        match self {
            Self::Chill => "chill",
            Self::Electric => "electric",
            Self::Fire => "fire",
            Self::NonAttribute => "non-attribute",
            Self::Toxic => "toxic",
        }
    }

    pub fn flat_key(&self) -> String {
        format!("{}{FLAT_SUFFIX}", self.key_prefix())
    }
}

impl fmt::Display for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key_prefix())
    }
}

/// A label that names no known element or category.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LabelError {
    #[error("unknown element '{0}'")]
    UnknownElement(String),
    #[error("unknown category '{0}'")]
    UnknownCategory(String),
}

impl FromStr for Element {
    type Err = LabelError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let wanted = value.trim().to_lowercase().replace('_', "-");
        Self::ALL
            .into_iter()
            .find(|element| element.key_prefix() == wanted)
            .ok_or_else(|| LabelError::UnknownElement(value.to_string()))
    }
}

/// Skill category a skill-power modifier applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Dimension,
    Fusion,
    Singular,
    Tech,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Category::Dimension,
        Category::Fusion,
        Category::Singular,
        Category::Tech,
    ];

    pub fn key_prefix(&self) -> &'static str {
        match self {
            Self::Dimension => "dimension",
            Self::Fusion => "fusion",
            Self::Singular => "singular",
            Self::Tech => "tech",
        }
    }

    pub fn modifier_key(&self) -> String {
        format!("{}{MODIFIER_SUFFIX}", self.key_prefix())
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key_prefix())
    }
}

impl FromStr for Category {
    type Err = LabelError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let wanted = value.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|category| category.key_prefix() == wanted)
            .ok_or_else(|| LabelError::UnknownCategory(value.to_string()))
    }
}

/// One selectable module, resolved for a specific element and category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Module {
    pub id: String,
    pub name: String,
    pub cost: i64,
    /// Set when `cost` is [COST_SENTINEL] because the record listed none.
    pub cost_defaulted: bool,
    pub rune_group: Option<String>,
    /// Requested element bucket plus the `all` bucket.
    pub flat_skill_power: Pct,
    /// Requested category bucket plus the `all` bucket.
    pub modifier_skill_power: Pct,
    pub skill_cooldown: Pct,
    pub skill_duration: Pct,
}

impl Module {
    /// A module with no stats. Mostly useful for assembling catalogs in code.
    pub fn new(id: impl Into<String>, name: impl Into<String>, cost: i64) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            cost,
            cost_defaulted: false,
            rune_group: None,
            flat_skill_power: Pct::ZERO,
            modifier_skill_power: Pct::ZERO,
            skill_cooldown: Pct::ZERO,
            skill_duration: Pct::ZERO,
        }
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        let group = group.into();
        self.rune_group = (!group.trim().is_empty()).then_some(group);
        self
    }

    pub fn with_flat(mut self, value: Pct) -> Self {
        self.flat_skill_power = value;
        self
    }

    pub fn with_modifier(mut self, value: Pct) -> Self {
        self.modifier_skill_power = value;
        self
    }

    pub fn with_cooldown(mut self, value: Pct) -> Self {
        self.skill_cooldown = value;
        self
    }

    pub fn with_duration(mut self, value: Pct) -> Self {
        self.skill_duration = value;
        self
    }
}

/// A record that could not be turned into a [Module].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedModule {
    pub module: String,
    pub issue: RecordIssue,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CatalogLoad {
    pub modules: Vec<Module>,
    pub skipped: Vec<SkippedModule>,
}

/// Normalizes every record for the given element and category.
///
/// Records with missing identity or unusable stats are skipped and reported; an unknown stat
/// mode aborts the load.
pub fn normalize_catalog(
    records: &ModuleRecords,
    element: Element,
    category: Category,
) -> Result<CatalogLoad, CatalogError> {
    let mut load = CatalogLoad::default();
    for (key, record) in records {
        record.check_stat_modes(key)?;
        match normalize_module(key, record, element, category) {
            Ok(module) => load.modules.push(module),
            Err(issue) => {
                tracing::warn!(module = %key, %issue, "skipping module");
                load.skipped.push(SkippedModule {
                    module: key.clone(),
                    issue,
                });
            }
        }
    }
    tracing::debug!(
        modules = load.modules.len(),
        skipped = load.skipped.len(),
        %element,
        %category,
        "normalized catalog"
    );
    Ok(load)
}

pub fn normalize_module(
    key: &str,
    record: &ModuleRecord,
    element: Element,
    category: Category,
) -> Result<Module, RecordIssue> {
    let id = record
        .id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .ok_or(RecordIssue::MissingId)?;
    let name = record
        .name
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .or_else(|| Some(key.trim()).filter(|key| !key.is_empty()))
        .ok_or(RecordIssue::MissingName)?;

    let (cost, cost_defaulted) = match record.cost()? {
        CostField::Listed(cost) => (cost, false),
        CostField::Missing => (COST_SENTINEL, true),
    };

    let all_flat = format!("{ALL_BUCKET}{FLAT_SUFFIX}");
    let all_modifier = format!("{ALL_BUCKET}{MODIFIER_SUFFIX}");
    let flat = bucket_sum(record, &element.flat_key(), &all_flat)?;
    let modifier = bucket_sum(record, &category.modifier_key(), &all_modifier)?;

    Ok(Module {
        id: id.to_string(),
        name: name.to_string(),
        cost,
        cost_defaulted,
        rune_group: record.rune_group().map(str::to_string),
        flat_skill_power: scale_stat(&element.flat_key(), flat)?,
        modifier_skill_power: scale_stat(&category.modifier_key(), modifier)?,
        skill_cooldown: scale_stat(COOLDOWN_KEY, record.stat(COOLDOWN_KEY)?)?,
        skill_duration: scale_stat(DURATION_KEY, record.stat(DURATION_KEY)?)?,
    })
}

fn bucket_sum(record: &ModuleRecord, bucket: &str, all: &str) -> Result<Decimal, RecordIssue> {
    Ok(record.stat(bucket)? + record.stat(all)?)
}

fn scale_stat(stat: &str, value: Decimal) -> Result<Pct, RecordIssue> {
    Pct::from_decimal(value).map_err(|source| RecordIssue::Scale {
        stat: stat.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::record::parse_module_records;
    use crate::scaled::ScaleError;

    const CATALOG: &str = r#"{
        "Fire Focus": {
            "id": "1", "name": "Fire Focus", "rune_group_name": "Focus",
            "attributes": [{"cost": 4}, {"cost": 11}],
            "fireSkillPowerFlat": 20.5, "allSkillPowerFlat": 3
        },
        "Wide Focus": {
            "id": "2", "name": "Wide Focus", "rune_group_name": null,
            "attributes": [{"cost": 9}],
            "allSkillPowerModifier": 7.4, "dimensionSkillPowerModifier": 10,
            "skillCooldown": -12.5, "skillDuration": 4
        },
        "No Cost": {"id": "3", "name": "No Cost", "non-attributeSkillPowerFlat": 8.79},
        "No Id": {"name": "No Id", "attributes": [{"cost": 1}]},
        "Fraction": {"id": "5", "attributes": [{"cost": 1}], "skillDuration": 0.5}
    }"#;

    fn load(element: Element, category: Category) -> CatalogLoad {
        let records = parse_module_records(CATALOG).unwrap();
        normalize_catalog(&records, element, category).unwrap()
    }

    fn module<'a>(load: &'a CatalogLoad, name: &str) -> &'a Module {
        load.modules.iter().find(|m| m.name == name).unwrap()
    }

    #[test]
    fn resolves_requested_buckets_plus_all_bucket() {
        let fire = load(Element::Fire, Category::Dimension);
        let focus = module(&fire, "Fire Focus");
        assert_eq!(focus.flat_skill_power.raw(), 2350);
        assert_eq!(focus.cost, 11);
        assert_eq!(focus.rune_group.as_deref(), Some("Focus"));

        let wide = module(&fire, "Wide Focus");
        assert_eq!(wide.modifier_skill_power.raw(), 1740);
        assert_eq!(wide.skill_cooldown.raw(), -1250);
        assert_eq!(wide.skill_duration.raw(), 400);
        assert_eq!(wide.rune_group, None);

        let toxic = load(Element::Toxic, Category::Tech);
        assert_eq!(module(&toxic, "Fire Focus").flat_skill_power.raw(), 300);
        assert_eq!(module(&toxic, "Wide Focus").modifier_skill_power.raw(), 740);
    }

    #[test]
    fn missing_cost_falls_back_to_sentinel_policy() {
        let catalog = load(Element::NonAttribute, Category::Dimension);
        let no_cost = module(&catalog, "No Cost");
        assert_eq!(no_cost.cost, COST_SENTINEL);
        assert!(no_cost.cost_defaulted);
        assert_eq!(no_cost.flat_skill_power.raw(), 879);
    }

    #[test]
    fn bad_records_are_skipped_not_fatal() {
        let catalog = load(Element::NonAttribute, Category::Dimension);
        assert_eq!(catalog.modules.len(), 3);
        assert_eq!(catalog.skipped.len(), 2);
        let no_id = catalog.skipped.iter().find(|s| s.module == "No Id").unwrap();
        assert_eq!(no_id.issue, RecordIssue::MissingId);
        let fraction = catalog.skipped.iter().find(|s| s.module == "Fraction").unwrap();
        assert!(matches!(
            fraction.issue,
            RecordIssue::Scale {
                source: ScaleError::Unit { .. },
                ..
            }
        ));
    }

    #[test]
    fn name_falls_back_to_catalog_key() {
        let records = parse_module_records(r#"{"Keyed": {"id": "9"}}"#).unwrap();
        let catalog = normalize_catalog(&records, Element::Fire, Category::Tech).unwrap();
        assert_eq!(catalog.modules[0].name, "Keyed");
    }

    #[test]
    fn unknown_stat_mode_aborts_load() {
        let records = parse_module_records(
            r#"{"Odd": {"id": "1", "skillDuration": 5, "skillDurationType": "?"}}"#,
        )
        .unwrap();
        let err = normalize_catalog(&records, Element::Fire, Category::Tech).unwrap_err();
        assert!(matches!(err, CatalogError::UnknownStatMode { .. }));
    }

    #[test]
    fn element_and_category_parse_from_labels() {
        assert_eq!("non-attribute".parse::<Element>().unwrap(), Element::NonAttribute);
        assert_eq!("Non_Attribute".parse::<Element>().unwrap(), Element::NonAttribute);
        assert_eq!("Dimension".parse::<Category>().unwrap(), Category::Dimension);
        assert_eq!(
            "plasma".parse::<Element>().unwrap_err(),
            LabelError::UnknownElement("plasma".to_string())
        );
        let err = "warp".parse::<Category>().unwrap_err();
        assert_eq!(err, LabelError::UnknownCategory("warp".to_string()));
        assert_eq!(err.to_string(), "unknown category 'warp'");
        assert_eq!(Element::NonAttribute.flat_key(), "non-attributeSkillPowerFlat");
        assert_eq!(Category::Tech.modifier_key(), "techSkillPowerModifier");
    }
}

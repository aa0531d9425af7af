pub mod catalog;
pub mod record;
pub mod validate;

pub use catalog::{normalize_catalog, Category, CatalogLoad, Element, LabelError, Module};
pub use record::{load_module_records, CatalogError, ModuleRecord, ModuleRecords};
pub use validate::{validate_catalog, ValidationReport, ValidationSeverity};

//! Custom field handlers for shapes plain path assignment cannot express.
//!
//! A handler is looked up by the field's complete path string before any
//! traversal happens. Handlers are a closed set of variants, one per shape
//! family; new paths are attached to a family with
//! [`HandlerRegistry::register`].

use std::collections::HashMap;

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::error::AssemblyError;

pub const US_CORE_RACE: &str = "http://hl7.org/fhir/us/core/StructureDefinition/us-core-race";
pub const US_CORE_ETHNICITY: &str =
    "http://hl7.org/fhir/us/core/StructureDefinition/us-core-ethnicity";
pub const US_CORE_BIRTH_SEX: &str =
    "http://hl7.org/fhir/us/core/StructureDefinition/us-core-birthsex";
pub const NPI_SYSTEM: &str = "http://hl7.org/fhir/sid/us-npi";
pub const CLIA_SYSTEM: &str = "urn:oid:2.16.840.1.113883.4.7";

const OMB_SYSTEM: &str = "urn:oid:2.16.840.1.113883.6.238";

/// One entry of an OMB category value set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OmbCategory {
    pub code: &'static str,
    pub display: &'static str,
}

/// Coded lookup table keyed by normalized (trimmed, lower-cased) input text.
pub type CategoryTable = IndexMap<&'static str, OmbCategory>;

pub static OMB_RACE_CATEGORIES: Lazy<CategoryTable> = Lazy::new(|| {
    IndexMap::from([
        (
            "american indian or alaska native",
            OmbCategory { code: "1002-5", display: "American Indian or Alaska Native" },
        ),
        ("asian", OmbCategory { code: "2028-9", display: "Asian" }),
        (
            "black or african american",
            OmbCategory { code: "2054-5", display: "Black or African American" },
        ),
        (
            "native hawaiian or other pacific islander",
            OmbCategory { code: "2076-8", display: "Native Hawaiian or Other Pacific Islander" },
        ),
        ("white", OmbCategory { code: "2106-3", display: "White" }),
    ])
});

pub static OMB_ETHNICITY_CATEGORIES: Lazy<CategoryTable> = Lazy::new(|| {
    let not_hispanic = OmbCategory { code: "2186-5", display: "Not Hispanic or Latino" };
    IndexMap::from([
        (
            "hispanic or latino",
            OmbCategory { code: "2135-2", display: "Hispanic or Latino" },
        ),
        ("not hispanic or latino", not_hispanic),
        ("non hispanic or latino", not_hispanic),
    ])
});

/// A domain-specific merge strategy for one field.
#[derive(Debug, Clone)]
pub enum FieldHandler {
    /// Complex extension holding a coded `ombCategory` and a free-text `text`
    /// sub-extension.
    OmbExtension {
        url: &'static str,
        categories: &'static Lazy<CategoryTable>,
    },
    /// Simple extension carrying a `valueCode`.
    CodeExtension { url: &'static str },
    /// Repeatable identifier kept unique by its `system`.
    IdentifierBySystem { system: &'static str },
}

impl FieldHandler {
    /// Merge `raw` into `target` (the resource root).
    ///
    /// `key` is the leaf key of the registered path; the built-in handlers
    /// address fixed locations and only use it for logging.
    pub fn apply(&self, target: &mut Value, key: &str, raw: &str) -> Result<(), AssemblyError> {
        match self {
            FieldHandler::OmbExtension { url, categories } => {
                let extension = find_or_create_by(array_at(target, "extension")?, "url", url);
                let parts = array_at(extension, "extension")?;

                match categories.get(raw.trim().to_lowercase().as_str()) {
                    Some(category) => {
                        let omb = find_or_insert_first(parts, "url", "ombCategory");
                        set(
                            omb,
                            "valueCoding",
                            json!({
                                "system": OMB_SYSTEM,
                                "code": category.code,
                                "display": category.display,
                            }),
                        );
                    }
                    None => {
                        debug!(key, raw, url, "no OMB category for value, keeping text only");
                        parts.retain(|part| {
                            part.get("url").and_then(Value::as_str) != Some("ombCategory")
                        });
                    }
                }

                let text = find_or_create_by(parts, "url", "text");
                set(text, "valueString", Value::String(raw.trim().to_string()));
            }
            FieldHandler::CodeExtension { url } => {
                let extension = find_or_create_by(array_at(target, "extension")?, "url", url);
                set(extension, "valueCode", Value::String(raw.trim().to_string()));
            }
            FieldHandler::IdentifierBySystem { system } => {
                let identifier =
                    find_or_create_by(array_at(target, "identifier")?, "system", system);
                set(identifier, "value", Value::String(raw.to_string()));
            }
        }
        Ok(())
    }
}

/// Ensure an array exists under `key` in an object and return it.
fn array_at<'a>(target: &'a mut Value, key: &str) -> Result<&'a mut Vec<Value>, AssemblyError> {
    if target.is_null() {
        *target = Value::Object(Map::new());
    }
    let shape_error = |found: &'static str| AssemblyError::StructuralType {
        path: key.to_string(),
        segment: key.to_string(),
        expected: "array",
        found,
    };

    let Value::Object(object) = target else {
        return Err(shape_error("non-object parent"));
    };
    let slot = object
        .entry(key.to_string())
        .or_insert_with(|| Value::Array(Vec::new()));
    match slot {
        Value::Array(items) => Ok(items),
        other => Err(shape_error(crate::assembler::shape_name(other))),
    }
}

/// First element whose `field` equals `wanted`, appending `{field: wanted}` if absent.
fn find_or_create_by<'a>(items: &'a mut Vec<Value>, field: &str, wanted: &str) -> &'a mut Value {
    let position = items
        .iter()
        .position(|item| item.get(field).and_then(Value::as_str) == Some(wanted));
    let index = match position {
        Some(index) => index,
        None => {
            items.push(json!({ field: wanted }));
            items.len() - 1
        }
    };
    &mut items[index]
}

/// Like [`find_or_create_by`], but a new element goes to the front.
fn find_or_insert_first<'a>(items: &'a mut Vec<Value>, field: &str, wanted: &str) -> &'a mut Value {
    let position = items
        .iter()
        .position(|item| item.get(field).and_then(Value::as_str) == Some(wanted));
    let index = match position {
        Some(index) => index,
        None => {
            items.insert(0, json!({ field: wanted }));
            0
        }
    };
    &mut items[index]
}

fn set(target: &mut Value, key: &str, value: Value) {
    if let Value::Object(object) = target {
        object.insert(key.to_string(), value);
    }
}

/// Registry mapping exact path strings to handlers.
#[derive(Debug, Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, FieldHandler>,
}

impl HandlerRegistry {
    /// Create a new empty handler registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the US Core demographic and identifier handlers.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.register(
            "Patient.extension[Race].ombCategory",
            FieldHandler::OmbExtension {
                url: US_CORE_RACE,
                categories: &OMB_RACE_CATEGORIES,
            },
        );
        registry.register(
            "Patient.extension[Ethnicity].ombCategory",
            FieldHandler::OmbExtension {
                url: US_CORE_ETHNICITY,
                categories: &OMB_ETHNICITY_CATEGORIES,
            },
        );
        registry.register(
            "Patient.extension[Birthsex].value",
            FieldHandler::CodeExtension { url: US_CORE_BIRTH_SEX },
        );
        registry.register(
            "Organization.identifier[system=NPI].value",
            FieldHandler::IdentifierBySystem { system: NPI_SYSTEM },
        );
        registry.register(
            "Organization.identifier[system=CLIA].value",
            FieldHandler::IdentifierBySystem { system: CLIA_SYSTEM },
        );
        registry.register(
            "Practitioner.identifier[system=NPI].value",
            FieldHandler::IdentifierBySystem { system: NPI_SYSTEM },
        );
        registry
    }

    /// Attach a handler to an exact path, replacing any previous one.
    pub fn register(&mut self, path: impl Into<String>, handler: FieldHandler) {
        self.handlers.insert(path.into(), handler);
    }

    /// Handler registered for exactly this path string.
    pub fn get(&self, path: &str) -> Option<&FieldHandler> {
        self.handlers.get(path)
    }

    /// Check if a handler is registered for a path
    pub fn has_handler(&self, path: &str) -> bool {
        self.handlers.contains_key(path)
    }

    /// Get list of all registered paths
    pub fn list_paths(&self) -> Vec<String> {
        self.handlers.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn patient() -> Value {
        json!({ "resourceType": "Patient", "id": "p1" })
    }

    fn race_extension(resource: &Value) -> &Value {
        resource["extension"]
            .as_array()
            .unwrap()
            .iter()
            .find(|e| e["url"] == US_CORE_RACE)
            .unwrap()
    }

    #[test]
    fn test_standard_registry_paths() {
        let registry = HandlerRegistry::standard();

        assert!(registry.has_handler("Patient.extension[Race].ombCategory"));
        assert!(registry.has_handler("Organization.identifier[system=CLIA].value"));
        assert!(!registry.has_handler("Patient.extension[Race]"));
        assert_eq!(registry.list_paths().len(), 6);
    }

    #[test]
    fn test_race_extension_is_created_with_coding_and_text() {
        let registry = HandlerRegistry::standard();
        let handler = registry.get("Patient.extension[Race].ombCategory").unwrap();
        let mut resource = patient();

        handler.apply(&mut resource, "ombCategory", "  White ").unwrap();

        let race = race_extension(&resource);
        let parts = race["extension"].as_array().unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0]["url"], "ombCategory");
        assert_eq!(parts[0]["valueCoding"]["code"], "2106-3");
        assert_eq!(parts[0]["valueCoding"]["system"], OMB_SYSTEM);
        assert_eq!(parts[1]["url"], "text");
        assert_eq!(parts[1]["valueString"], "White");
    }

    #[test]
    fn test_race_extension_is_reused_on_second_write() {
        let registry = HandlerRegistry::standard();
        let handler = registry.get("Patient.extension[Race].ombCategory").unwrap();
        let mut resource = patient();

        handler.apply(&mut resource, "ombCategory", "Asian").unwrap();
        handler.apply(&mut resource, "ombCategory", "White").unwrap();

        assert_eq!(resource["extension"].as_array().unwrap().len(), 1);
        let parts = race_extension(&resource)["extension"].as_array().unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0]["valueCoding"]["display"], "White");
    }

    #[test]
    fn test_unknown_category_keeps_text_only() {
        let registry = HandlerRegistry::standard();
        let handler = registry.get("Patient.extension[Ethnicity].ombCategory").unwrap();
        let mut resource = patient();

        handler.apply(&mut resource, "ombCategory", "Declined").unwrap();

        let ethnicity = &resource["extension"][0];
        assert_eq!(ethnicity["url"], US_CORE_ETHNICITY);
        let parts = ethnicity["extension"].as_array().unwrap();
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0]["valueString"], "Declined");
    }

    #[test]
    fn test_unknown_category_drops_earlier_coding() {
        let registry = HandlerRegistry::standard();
        let handler = registry.get("Patient.extension[Race].ombCategory").unwrap();
        let mut resource = patient();

        handler.apply(&mut resource, "ombCategory", "White").unwrap();
        handler.apply(&mut resource, "ombCategory", "Other").unwrap();

        let parts = resource["extension"][0]["extension"].as_array().unwrap();
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0]["url"], "text");
        assert_eq!(parts[0]["valueString"], "Other");
    }

    #[test]
    fn test_category_precedes_text_after_rewrite() {
        let registry = HandlerRegistry::standard();
        let handler = registry.get("Patient.extension[Race].ombCategory").unwrap();
        let mut resource = patient();

        handler.apply(&mut resource, "ombCategory", "Declined").unwrap();
        handler.apply(&mut resource, "ombCategory", "Asian").unwrap();

        let parts = resource["extension"][0]["extension"].as_array().unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0]["url"], "ombCategory");
        assert_eq!(parts[0]["valueCoding"]["code"], "2028-9");
        assert_eq!(parts[1]["url"], "text");
        assert_eq!(parts[1]["valueString"], "Asian");
    }

    #[test]
    fn test_ethnicity_lookup_is_normalized() {
        let handler = FieldHandler::OmbExtension {
            url: US_CORE_ETHNICITY,
            categories: &OMB_ETHNICITY_CATEGORIES,
        };
        let mut resource = patient();

        handler.apply(&mut resource, "ombCategory", "Non Hispanic or Latino").unwrap();

        assert_eq!(resource["extension"][0]["extension"][0]["valueCoding"]["code"], "2186-5");
    }

    #[test]
    fn test_birth_sex_extension_updates_in_place() {
        let handler = FieldHandler::CodeExtension { url: US_CORE_BIRTH_SEX };
        let mut resource = patient();

        handler.apply(&mut resource, "value", "F").unwrap();
        handler.apply(&mut resource, "value", "M").unwrap();

        let extensions = resource["extension"].as_array().unwrap();
        assert_eq!(extensions.len(), 1);
        assert_eq!(extensions[0]["url"], US_CORE_BIRTH_SEX);
        assert_eq!(extensions[0]["valueCode"], "M");
    }

    #[test]
    fn test_identifier_unique_by_system() {
        let registry = HandlerRegistry::standard();
        let npi = registry.get("Organization.identifier[system=NPI].value").unwrap();
        let clia = registry.get("Organization.identifier[system=CLIA].value").unwrap();
        let mut resource = json!({
            "resourceType": "Organization",
            "identifier": [{ "system": "urn:local", "value": "A-1" }]
        });

        npi.apply(&mut resource, "value", "1234567890").unwrap();
        clia.apply(&mut resource, "value", "05D0000001").unwrap();
        npi.apply(&mut resource, "value", "1999999999").unwrap();

        let identifiers = resource["identifier"].as_array().unwrap();
        assert_eq!(identifiers.len(), 3);
        assert_eq!(identifiers[1]["system"], NPI_SYSTEM);
        assert_eq!(identifiers[1]["value"], "1999999999");
        assert_eq!(identifiers[2]["system"], CLIA_SYSTEM);
    }

    #[test]
    fn test_non_array_extension_is_structural_error() {
        let handler = FieldHandler::CodeExtension { url: US_CORE_BIRTH_SEX };
        let mut resource = json!({ "extension": "oops" });

        let err = handler.apply(&mut resource, "value", "F").unwrap_err();
        assert!(matches!(err, AssemblyError::StructuralType { expected: "array", .. }));
    }
}

//! Cross-resource references.
//!
//! Runs after every entity of a subject has been assembled: each link rule
//! writes `{"reference": "<Type>/<id>"}` into its origin resource, using the
//! same path semantics as field assembly.

use convert_case::{Case, Casing};
use indexmap::IndexMap;
use serde_json::json;
use tracing::{debug, warn};

use crate::assembler::assign_value;
use crate::coercion::TypedValue;
use crate::error::{AssemblyError, ConfigurationError, Diagnostic};
use crate::model::{LinkRule, Resource};
use crate::path::{FieldPath, PathSegment};

/// Write every rule's reference into its origin resource.
///
/// `resources` is keyed by entity name. A rule naming an entity that is not
/// present is a configuration error; a reference path that cannot be written
/// only skips that rule and is reported as a [`Diagnostic`].
pub fn resolve(
    resources: &mut IndexMap<String, Resource>,
    rules: &[LinkRule],
) -> Result<Vec<Diagnostic>, ConfigurationError> {
    let mut diagnostics = Vec::new();

    for rule in rules {
        let reference = resources
            .get(&rule.destination)
            .map(Resource::reference)
            .ok_or_else(|| unknown(rule, &rule.destination))?;
        let origin = resources
            .get_mut(&rule.origin)
            .ok_or_else(|| unknown(rule, &rule.origin))?;

        match write_reference(origin, &rule.reference_path, reference) {
            Ok(()) => debug!(origin = %rule.origin, destination = %rule.destination, "linked"),
            Err(error) => {
                warn!(
                    origin = %rule.origin,
                    destination = %rule.destination,
                    path = %rule.reference_path,
                    error = %error,
                    "link not written"
                );
                diagnostics.push(Diagnostic::LinkSkipped {
                    origin: rule.origin.clone(),
                    destination: rule.destination.clone(),
                    error,
                });
            }
        }
    }

    Ok(diagnostics)
}

/// Write `{"reference": reference}` at `path` inside `origin`.
pub fn write_reference(
    origin: &mut Resource,
    path: &str,
    reference: String,
) -> Result<(), AssemblyError> {
    let resource_type = origin.resource_type().to_string();
    let path = reference_path(path, &resource_type)?;
    assign_value(
        origin.body_mut(),
        &path,
        &resource_type,
        TypedValue::Complex(json!({ "reference": reference })),
    )
}

/// Parse a reference path, lower-camel-casing its keys (`Subject` becomes
/// `subject`). The resource type tag and qualifier contents are left alone.
pub fn reference_path(path: &str, resource_type: &str) -> Result<FieldPath, AssemblyError> {
    let parsed = FieldPath::parse(path)?;
    let segments = parsed
        .segments
        .into_iter()
        .map(|segment| match segment {
            PathSegment::Key(key) if key != resource_type => PathSegment::Key(key.to_case(Case::Camel)),
            PathSegment::Keyed { key, qualifier } => PathSegment::Keyed {
                key: key.to_case(Case::Camel),
                qualifier,
            },
            other => other,
        })
        .collect();

    Ok(FieldPath {
        raw: parsed.raw,
        segments,
    })
}

fn unknown(rule: &LinkRule, missing: &str) -> ConfigurationError {
    ConfigurationError::UnknownLinkEntity {
        origin: rule.origin.clone(),
        destination: rule.destination.clone(),
        missing: missing.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subject_resources() -> IndexMap<String, Resource> {
        let mut resources = IndexMap::new();
        resources.insert("PrimaryPatient".to_string(), Resource::new("Patient", "p1", &[]));
        resources.insert("PrimaryEncounter".to_string(), Resource::new("Encounter", "e1", &[]));
        resources
    }

    #[test]
    fn test_resolve_writes_reference() {
        let mut resources = subject_resources();
        let rules = vec![LinkRule::new("PrimaryEncounter", "Subject", "PrimaryPatient")];

        let diagnostics = resolve(&mut resources, &rules).unwrap();

        assert!(diagnostics.is_empty());
        assert_eq!(
            resources["PrimaryEncounter"].body()["subject"],
            json!({ "reference": "Patient/p1" })
        );
    }

    #[test]
    fn test_reference_into_array() {
        let mut resources = subject_resources();
        let rules = vec![
            LinkRule::new("PrimaryEncounter", "Encounter.Participant[0].individual", "PrimaryPatient"),
        ];

        resolve(&mut resources, &rules).unwrap();

        assert_eq!(
            resources["PrimaryEncounter"].body()["participant"][0]["individual"]["reference"],
            "Patient/p1"
        );
    }

    #[test]
    fn test_missing_destination_is_configuration_error() {
        let mut resources = subject_resources();
        let rules = vec![LinkRule::new("PrimaryEncounter", "subject", "Ghost")];

        let err = resolve(&mut resources, &rules).unwrap_err();
        assert!(matches!(err, ConfigurationError::UnknownLinkEntity { missing, .. } if missing == "Ghost"));
    }

    #[test]
    fn test_bad_reference_path_is_skipped() {
        let mut resources = subject_resources();
        let rules = vec![
            LinkRule::new("PrimaryEncounter", "subject[", "PrimaryPatient"),
            LinkRule::new("PrimaryEncounter", "subject", "PrimaryPatient"),
        ];

        let diagnostics = resolve(&mut resources, &rules).unwrap();

        assert_eq!(diagnostics.len(), 1);
        assert!(matches!(&diagnostics[0], Diagnostic::LinkSkipped { error: AssemblyError::PathSyntax { .. }, .. }));
        assert_eq!(resources["PrimaryEncounter"].body()["subject"]["reference"], "Patient/p1");
    }

    #[test]
    fn test_reference_path_keeps_resource_type_and_qualifier() {
        let path = reference_path("Encounter.Location[status=Active].location", "Encounter").unwrap();
        let rendered: Vec<String> = path.segments.iter().map(|s| s.to_string()).collect();

        assert_eq!(rendered, vec!["Encounter", "location[status=Active]", "location"]);
    }
}

//! Path-driven structure assembly.
//!
//! [`PathAssembler::assign`] writes one raw cell value into a resource at the
//! location named by a path expression, creating objects and arrays on the
//! way. Custom handlers are consulted first, by exact path string; otherwise
//! the value is coerced and placed by walking the parsed segments.
//!
//! Traversal is recursive: each step receives an exclusive borrow of the
//! sub-structure it is about to extend and hands a narrower borrow to the
//! next step.

use serde_json::{Map, Value};
use tracing::trace;

use crate::coercion::{coerce, TypedValue, ValueType};
use crate::error::AssemblyError;
use crate::handlers::HandlerRegistry;
use crate::path::{raw_leaf, FieldPath, PathSegment, Qualifier};

/// Writes field values into resources.
#[derive(Debug, Clone, Copy)]
pub struct PathAssembler<'r> {
    handlers: &'r HandlerRegistry,
}

impl<'r> PathAssembler<'r> {
    pub fn new(handlers: &'r HandlerRegistry) -> Self {
        Self { handlers }
    }

    /// Assign `raw` at `path` inside `root` and hand `root` back.
    ///
    /// `resource_type` is the owning entity's type tag; a segment equal to it
    /// (like the `$` root marker) is skipped. With no `value_type` the raw
    /// text is written verbatim.
    ///
    /// # Errors
    ///
    /// - [`AssemblyError::PathSyntax`] before anything is written
    /// - [`AssemblyError::ValueFormat`] before anything is written
    /// - [`AssemblyError::StructuralType`] when a qualifier meets an existing
    ///   value of the wrong shape
    ///
    /// # Example
    ///
    /// ```
    /// use cohort_bundler::assembler::PathAssembler;
    /// use cohort_bundler::coercion::ValueType;
    /// use cohort_bundler::handlers::HandlerRegistry;
    /// use serde_json::json;
    ///
    /// let handlers = HandlerRegistry::new();
    /// let assembler = PathAssembler::new(&handlers);
    /// let mut patient = json!({ "resourceType": "Patient" });
    ///
    /// let updated = assembler
    ///     .assign(&mut patient, "Patient.name[use=official].family", "Patient", Some(ValueType::String), "Doe")
    ///     .unwrap();
    /// assert_eq!(updated["name"], json!([{ "use": "official", "family": "Doe" }]));
    /// ```
    pub fn assign<'v>(
        &self,
        root: &'v mut Value,
        path: &str,
        resource_type: &str,
        value_type: Option<ValueType>,
        raw: &str,
    ) -> Result<&'v mut Value, AssemblyError> {
        if let Some(handler) = self.handlers.get(path) {
            trace!(path, "custom handler");
            handler.apply(root, raw_leaf(path), raw)?;
            return Ok(root);
        }

        let field_path = FieldPath::parse(path)?;
        let value = match value_type {
            Some(value_type) => coerce(raw, value_type)?,
            None => TypedValue::Text(raw.to_string()),
        };
        assign_value(root, &field_path, resource_type, value)?;
        Ok(root)
    }
}

/// Place an already-typed value at a parsed path.
///
/// Shared by field assembly and link resolution so both get identical
/// array and qualifier semantics.
pub fn assign_value(
    root: &mut Value,
    path: &FieldPath,
    resource_type: &str,
    value: TypedValue,
) -> Result<(), AssemblyError> {
    let segments: Vec<&PathSegment> = path
        .segments
        .iter()
        .filter(|segment| match segment {
            PathSegment::Root => false,
            PathSegment::Key(key) => key != resource_type,
            _ => true,
        })
        .collect();

    if segments.is_empty() {
        return Err(AssemblyError::syntax(&path.raw, "path does not address a field"));
    }
    build(root, &segments, &path.raw, value)
}

fn build(
    current: &mut Value,
    segments: &[&PathSegment],
    path: &str,
    value: TypedValue,
) -> Result<(), AssemblyError> {
    match segments {
        [] => Ok(()),
        [leaf] => place_leaf(current, leaf, path, value),
        [segment, rest @ ..] => {
            let next = descend(current, segment, path)?;
            build(next, rest, path, value)
        }
    }
}

/// Step into (creating if needed) the structure a non-final segment names.
fn descend<'a>(
    current: &'a mut Value,
    segment: &PathSegment,
    path: &str,
) -> Result<&'a mut Value, AssemblyError> {
    match segment {
        PathSegment::Root => Ok(current),
        PathSegment::Key(key) => Ok(object_mut(current, segment, path)?
            .entry(key.clone())
            .or_insert_with(|| Value::Object(Map::new()))),
        PathSegment::Keyed { key, qualifier } => {
            let slot = object_mut(current, segment, path)?
                .entry(key.clone())
                .or_insert_with(|| Value::Array(Vec::new()));
            Ok(select(array_mut(slot, segment, path)?, qualifier))
        }
        PathSegment::Qualified(qualifier) => {
            Ok(select(array_mut(current, segment, path)?, qualifier))
        }
    }
}

fn place_leaf(
    current: &mut Value,
    segment: &PathSegment,
    path: &str,
    value: TypedValue,
) -> Result<(), AssemblyError> {
    match segment {
        PathSegment::Root => Err(AssemblyError::syntax(path, "path ends at the root marker")),
        PathSegment::Key(key) => {
            let slot = object_mut(current, segment, path)?
                .entry(key.clone())
                .or_insert(Value::Null);
            put(slot, value, segment, path)
        }
        PathSegment::Keyed { key, qualifier } => {
            let slot = object_mut(current, segment, path)?
                .entry(key.clone())
                .or_insert_with(|| Value::Array(Vec::new()));
            let element = select(array_mut(slot, segment, path)?, qualifier);
            put_element(element, qualifier, value, segment, path)
        }
        PathSegment::Qualified(qualifier) => {
            let element = select(array_mut(current, segment, path)?, qualifier);
            put_element(element, qualifier, value, segment, path)
        }
    }
}

/// Write into a slot: list items append, everything else replaces.
fn put(
    slot: &mut Value,
    value: TypedValue,
    segment: &PathSegment,
    path: &str,
) -> Result<(), AssemblyError> {
    match value {
        TypedValue::ListItem(item) => {
            array_mut(slot, segment, path)?.push(Value::String(item));
            Ok(())
        }
        other => {
            *slot = other.into_json();
            Ok(())
        }
    }
}

/// Write into an array element reached through a qualifier.
///
/// An index element takes the value as-is. An element located by condition
/// keeps its condition field, so only object values can be merged into it.
fn put_element(
    element: &mut Value,
    qualifier: &Qualifier,
    value: TypedValue,
    segment: &PathSegment,
    path: &str,
) -> Result<(), AssemblyError> {
    match (qualifier, value) {
        (Qualifier::Index(_), value) => put(element, value, segment, path),
        (Qualifier::Equals { .. }, TypedValue::Complex(Value::Object(fields))) => {
            let target = object_mut(element, segment, path)?;
            for (key, field) in fields {
                target.insert(key, field);
            }
            Ok(())
        }
        (Qualifier::Equals { .. }, _) => Err(AssemblyError::StructuralType {
            path: path.to_string(),
            segment: segment.to_string(),
            expected: "object value for a conditional element",
            found: "scalar",
        }),
    }
}

/// Locate-or-create the element a qualifier names.
fn select<'a>(items: &'a mut Vec<Value>, qualifier: &Qualifier) -> &'a mut Value {
    let index = match qualifier {
        Qualifier::Index(index) => {
            while items.len() <= *index {
                items.push(Value::Object(Map::new()));
            }
            *index
        }
        Qualifier::Equals { name, value } => {
            match items.iter().position(|item| field_equals(item, name, value)) {
                Some(index) => index,
                None => {
                    let mut seed = Map::new();
                    seed.insert(name.clone(), Value::String(value.clone()));
                    items.push(Value::Object(seed));
                    items.len() - 1
                }
            }
        }
    };
    &mut items[index]
}

fn field_equals(item: &Value, name: &str, wanted: &str) -> bool {
    match item.get(name) {
        Some(Value::String(text)) => text == wanted,
        Some(Value::Number(number)) => number.to_string() == wanted,
        Some(Value::Bool(flag)) => flag.to_string() == wanted,
        _ => false,
    }
}

/// Treat the slot as an object; `null` becomes `{}`.
fn object_mut<'a>(
    value: &'a mut Value,
    segment: &PathSegment,
    path: &str,
) -> Result<&'a mut Map<String, Value>, AssemblyError> {
    if value.is_null() {
        *value = Value::Object(Map::new());
    }
    match value {
        Value::Object(map) => Ok(map),
        other => Err(shape_mismatch(path, segment, "object", other)),
    }
}

/// Treat the slot as an array; `null` and `{}` count as not yet initialized.
fn array_mut<'a>(
    value: &'a mut Value,
    segment: &PathSegment,
    path: &str,
) -> Result<&'a mut Vec<Value>, AssemblyError> {
    let uninitialized = match &*value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    };
    if uninitialized {
        *value = Value::Array(Vec::new());
    }
    match value {
        Value::Array(items) => Ok(items),
        other => Err(shape_mismatch(path, segment, "array", other)),
    }
}

fn shape_mismatch(
    path: &str,
    segment: &PathSegment,
    expected: &'static str,
    found: &Value,
) -> AssemblyError {
    AssemblyError::StructuralType {
        path: path.to_string(),
        segment: segment.to_string(),
        expected,
        found: shape_name(found),
    }
}

pub(crate) fn shape_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn assign(root: &mut Value, path: &str, value_type: Option<ValueType>, raw: &str) -> Result<(), AssemblyError> {
        let handlers = HandlerRegistry::standard();
        PathAssembler::new(&handlers)
            .assign(root, path, "Patient", value_type, raw)
            .map(|_| ())
    }

    fn patient() -> Value {
        json!({ "resourceType": "Patient", "id": "p1" })
    }

    #[test]
    fn test_bare_keys_create_nested_objects() {
        let mut resource = patient();
        assign(&mut resource, "$.Patient.contact.name.family", Some(ValueType::String), "Doe").unwrap();

        assert_eq!(resource["contact"]["name"]["family"], "Doe");
    }

    #[test]
    fn test_assign_returns_updated_root() {
        let handlers = HandlerRegistry::standard();
        let assembler = PathAssembler::new(&handlers);
        let mut resource = patient();

        let root = assembler
            .assign(&mut resource, "Patient.gender", "Patient", Some(ValueType::Code), "male")
            .unwrap();
        assert_eq!(root["gender"], "male");

        let root = assembler
            .assign(root, "Patient.extension[Birthsex].value", "Patient", Some(ValueType::Code), "M")
            .unwrap();
        assert_eq!(root["extension"][0]["valueCode"], "M");
        assert_eq!(root["id"], "p1");
    }

    #[test]
    fn test_bare_key_order_does_not_matter() {
        let fields = [
            ("Patient.gender", "female"),
            ("Patient.birthDate", "1980-01-02"),
            ("Patient.maritalStatus.text", "Married"),
        ];

        let mut forward = patient();
        for (path, raw) in fields {
            assign(&mut forward, path, None, raw).unwrap();
        }
        let mut backward = patient();
        for (path, raw) in fields.iter().rev() {
            assign(&mut backward, path, None, raw).unwrap();
        }

        assert_eq!(forward, backward);
    }

    #[test]
    fn test_index_growth_preserves_prior_elements() {
        let mut resource = patient();
        assign(&mut resource, "Patient.telecom.[0].value", None, "555-0100").unwrap();
        assign(&mut resource, "Patient.telecom.[3].value", None, "555-0103").unwrap();
        assign(&mut resource, "Patient.telecom.[1].value", None, "555-0101").unwrap();

        let telecom = resource["telecom"].as_array().unwrap();
        assert_eq!(telecom.len(), 4);
        assert_eq!(telecom[0]["value"], "555-0100");
        assert_eq!(telecom[1]["value"], "555-0101");
        assert_eq!(telecom[2], json!({}));
        assert_eq!(telecom[3]["value"], "555-0103");
    }

    #[test]
    fn test_high_index_before_low_index() {
        let mut resource = patient();
        assign(&mut resource, "Patient.name[2].family", None, "Third").unwrap();
        assign(&mut resource, "Patient.name[0].family", None, "First").unwrap();

        let names = resource["name"].as_array().unwrap();
        assert_eq!(names.len(), 3);
        assert_eq!(names[0]["family"], "First");
        assert_eq!(names[2]["family"], "Third");
    }

    #[test]
    fn test_equality_qualifier_is_idempotent() {
        let mut resource = patient();
        assign(&mut resource, "Patient.identifier[type=MRN].system", None, "urn:mrn").unwrap();
        let after_first = resource["identifier"].as_array().unwrap().len();
        assign(&mut resource, "Patient.identifier[type=MRN].value", None, "12345").unwrap();
        let after_second = resource["identifier"].as_array().unwrap().len();

        assert_eq!(after_first, 1);
        assert_eq!(after_second, after_first);
        assert_eq!(
            resource["identifier"][0],
            json!({ "type": "MRN", "system": "urn:mrn", "value": "12345" })
        );
    }

    #[test]
    fn test_equality_qualifier_first_match_wins() {
        let mut resource = json!({
            "name": [
                { "use": "usual", "family": "A" },
                { "use": "official", "family": "B" },
                { "use": "official", "family": "C" }
            ]
        });
        assign(&mut resource, "name[use=official].given", None, "Jo").unwrap();

        assert_eq!(resource["name"][1]["given"], "Jo");
        assert!(resource["name"][2].get("given").is_none());
    }

    #[test]
    fn test_distinct_conditions_create_distinct_elements() {
        let mut resource = patient();
        assign(&mut resource, "Patient.identifier[type=MRN].value", None, "1").unwrap();
        assign(&mut resource, "Patient.identifier[type=SSN].value", None, "2").unwrap();

        assert_eq!(resource["identifier"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_string_list_appends() {
        let mut resource = patient();
        assign(&mut resource, "Patient.name.[0].given", Some(ValueType::StringList), "Mary").unwrap();
        assign(&mut resource, "Patient.name.[0].given", Some(ValueType::StringList), "Ann").unwrap();

        assert_eq!(resource["name"][0]["given"], json!(["Mary", "Ann"]));
    }

    #[test]
    fn test_index_as_final_segment_places_value() {
        let mut resource = patient();
        assign(
            &mut resource,
            "Patient.address.[0]",
            Some(ValueType::Address),
            "1234 Main Street^Atlanta^Fulton^30345^GA^USA",
        )
        .unwrap();

        assert_eq!(resource["address"][0]["line"], json!(["1234 Main Street"]));
        assert_eq!(resource["address"][0]["city"], "Atlanta");
    }

    #[test]
    fn test_conditional_final_segment_merges_objects() {
        let mut resource = patient();
        assign(
            &mut resource,
            "Patient.communication[preferred=true]",
            Some(ValueType::Coding),
            "urn:ietf:bcp:47^en^English",
        )
        .unwrap();

        assert_eq!(resource["communication"][0]["preferred"], "true");
        assert_eq!(resource["communication"][0]["code"], "en");

        let err = assign(&mut resource, "Patient.communication[preferred=true]", None, "en").unwrap_err();
        assert!(matches!(err, AssemblyError::StructuralType { .. }));
    }

    #[test]
    fn test_standalone_index_on_populated_object_fails() {
        let mut resource = patient();
        assign(&mut resource, "Patient.maritalStatus.text", None, "Married").unwrap();

        let err = assign(&mut resource, "Patient.maritalStatus.[0].text", None, "x").unwrap_err();
        assert!(matches!(err, AssemblyError::StructuralType { expected: "array", found: "object", .. }));
    }

    #[test]
    fn test_keyed_index_on_scalar_fails() {
        let mut resource = patient();
        assign(&mut resource, "Patient.gender", None, "male").unwrap();

        let err = assign(&mut resource, "Patient.gender[0].code", None, "x").unwrap_err();
        assert!(matches!(err, AssemblyError::StructuralType { found: "string", .. }));
    }

    #[test]
    fn test_malformed_path_writes_nothing() {
        let mut resource = patient();
        let before = resource.clone();

        let err = assign(&mut resource, "Patient.name[0.family", None, "Doe").unwrap_err();
        assert!(matches!(err, AssemblyError::PathSyntax { .. }));
        assert_eq!(resource, before);
    }

    #[test]
    fn test_bad_date_writes_nothing() {
        let mut resource = patient();
        let before = resource.clone();

        let err = assign(&mut resource, "Patient.contact.period.start", Some(ValueType::DateTime), "someday")
            .unwrap_err();
        assert!(matches!(err, AssemblyError::ValueFormat { .. }));
        assert_eq!(resource, before);
    }

    #[test]
    fn test_path_naming_only_the_resource_is_rejected() {
        let mut resource = patient();
        let err = assign(&mut resource, "$.Patient", None, "x").unwrap_err();
        assert!(matches!(err, AssemblyError::PathSyntax { .. }));
    }

    #[test]
    fn test_custom_handler_takes_precedence() {
        let mut resource = patient();
        assign(&mut resource, "Patient.extension[Race].ombCategory", None, "Asian").unwrap();

        assert_eq!(
            resource["extension"][0]["url"],
            "http://hl7.org/fhir/us/core/StructureDefinition/us-core-race"
        );
        assert!(resource.get("ombCategory").is_none());
    }

    #[test]
    fn test_missing_value_type_is_verbatim() {
        let mut resource = patient();
        assign(&mut resource, "Patient.multipleBirthInteger", None, " 2 ").unwrap();

        assert_eq!(resource["multipleBirthInteger"], " 2 ");
    }

    #[test]
    fn test_assign_value_typed() {
        let mut resource = patient();
        let path = FieldPath::parse("subject").unwrap();
        assign_value(
            &mut resource,
            &path,
            "Encounter",
            TypedValue::Complex(json!({ "reference": "Patient/p1" })),
        )
        .unwrap();

        assert_eq!(resource["subject"]["reference"], "Patient/p1");
    }
}

//! Cohort data model: entity definitions, field columns, link rules and the
//! resources built from them.

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::coercion::ValueType;

/// One cell of a field column.
///
/// Cells come from loosely typed input, so any scalar is accepted and
/// rendered to text before coercion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum FieldValue {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Null,
}

impl FieldValue {
    /// Text form of the cell, or `None` when the cell is null or blank.
    pub fn as_raw(&self) -> Option<String> {
        match self {
            FieldValue::Null => None,
            FieldValue::String(s) if s.trim().is_empty() => None,
            other => Some(other.to_string()),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::String(s) => write!(f, "{}", s),
            FieldValue::Int(i) => write!(f, "{}", i),
            FieldValue::Float(fl) => write!(f, "{}", fl),
            FieldValue::Bool(b) => write!(f, "{}", b),
            FieldValue::Null => Ok(()),
        }
    }
}

/// A named instance of a resource type within one subject's data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityDefinition {
    /// Logical name, unique per cohort (e.g. `PrimaryPatient`)
    pub entity: String,
    /// Resource type tag (e.g. `Patient`)
    pub resource_type: String,
    /// Conformance profile URIs, carried opaquely
    #[serde(default)]
    pub profiles: Vec<String>,
}

impl EntityDefinition {
    pub fn new(entity: impl Into<String>, resource_type: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            resource_type: resource_type.into(),
            profiles: Vec::new(),
        }
    }

    pub fn with_profile(mut self, profile: impl Into<String>) -> Self {
        self.profiles.push(profile.into());
        self
    }
}

/// A reference to write from `origin` to `destination` at `reference_path`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkRule {
    pub origin: String,
    pub reference_path: String,
    pub destination: String,
}

impl LinkRule {
    pub fn new(
        origin: impl Into<String>,
        reference_path: impl Into<String>,
        destination: impl Into<String>,
    ) -> Self {
        Self {
            origin: origin.into(),
            reference_path: reference_path.into(),
            destination: destination.into(),
        }
    }
}

/// One column of cohort data: where it goes and a cell per subject.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FieldEntry {
    /// Human-readable label
    #[serde(default)]
    pub name: Option<String>,
    /// Owning entity
    pub entity: String,
    /// Path expression inside the entity's resource
    pub path: String,
    /// Declared type; `None` writes the raw text verbatim
    #[serde(default)]
    pub value_type: Option<ValueType>,
    /// Bound value set, informational only
    #[serde(default)]
    pub value_set: Option<String>,
    /// `values[i]` belongs to subject `i`
    #[serde(default)]
    pub values: Vec<FieldValue>,
}

impl FieldEntry {
    pub fn new(entity: impl Into<String>, path: impl Into<String>, value_type: Option<ValueType>) -> Self {
        Self {
            name: None,
            entity: entity.into(),
            path: path.into(),
            value_type,
            value_set: None,
            values: Vec::new(),
        }
    }

    pub fn with_values<I, V>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<FieldValue>,
    {
        self.values = values.into_iter().map(Into::into).collect();
        self
    }

    /// Raw text for subject `index`; `None` when out of range or blank.
    pub fn raw_value(&self, index: usize) -> Option<String> {
        self.values.get(index).and_then(FieldValue::as_raw)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::String(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::String(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Int(value)
    }
}

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(FieldValue::Null)
    }
}

/// Field columns grouped by entity, plus the number of subject rows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CohortData {
    fields: IndexMap<String, Vec<FieldEntry>>,
    row_count: usize,
}

impl CohortData {
    pub fn new(row_count: usize) -> Self {
        Self {
            fields: IndexMap::new(),
            row_count,
        }
    }

    /// Append a field under its entity, keeping declaration order.
    pub fn push(&mut self, field: FieldEntry) {
        self.fields.entry(field.entity.clone()).or_default().push(field);
    }

    /// Fields declared for `entity`, in declaration order.
    pub fn fields_for(&self, entity: &str) -> &[FieldEntry] {
        self.fields.get(entity).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn row_count(&self) -> usize {
        self.row_count
    }

    pub fn field_count(&self) -> usize {
        self.fields.values().map(Vec::len).sum()
    }
}

/// An assembled resource document.
///
/// The body always carries `resourceType` and `id`; `meta.profile` is only
/// present when the entity declares profiles.
#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    resource_type: String,
    id: String,
    body: Value,
}

impl Resource {
    pub fn new(resource_type: impl Into<String>, id: impl Into<String>, profiles: &[String]) -> Self {
        let resource_type = resource_type.into();
        let id = id.into();

        let mut body = Map::new();
        body.insert("resourceType".to_string(), Value::String(resource_type.clone()));
        body.insert("id".to_string(), Value::String(id.clone()));
        if !profiles.is_empty() {
            let mut meta = Map::new();
            meta.insert(
                "profile".to_string(),
                Value::Array(profiles.iter().cloned().map(Value::String).collect()),
            );
            body.insert("meta".to_string(), Value::Object(meta));
        }

        Self {
            resource_type,
            id,
            body: Value::Object(body),
        }
    }

    pub fn resource_type(&self) -> &str {
        &self.resource_type
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// `<Type>/<id>`, the relative reference other resources use.
    pub fn reference(&self) -> String {
        format!("{}/{}", self.resource_type, self.id)
    }

    pub fn body(&self) -> &Value {
        &self.body
    }

    pub fn body_mut(&mut self) -> &mut Value {
        &mut self.body
    }

    pub fn into_body(self) -> Value {
        self.body
    }
}

impl Serialize for Resource {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.body.serialize(serializer)
    }
}

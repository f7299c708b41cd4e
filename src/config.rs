//! Cohort file loading and validation.
//!
//! A cohort file is YAML (JSON also parses) with three lists: `resources`
//! (entity definitions), `links` (link rules) and `fields` (one column of
//! subject data each). Validation runs once at load time so that a broken
//! mapping fails before any subject is assembled.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use serde::Deserialize;
use tracing::debug;

use crate::error::ConfigurationError;
use crate::model::{CohortData, EntityDefinition, FieldEntry, LinkRule};

/// Raw cohort file as written on disk.
#[derive(Debug, Clone, Deserialize)]
pub struct CohortFile {
    pub resources: Vec<EntityDefinition>,
    #[serde(default)]
    pub links: Vec<LinkRule>,
    #[serde(default)]
    pub fields: Vec<FieldEntry>,
    /// Number of subject rows; defaults to the longest `values` list.
    #[serde(default)]
    pub subject_count: Option<usize>,
}

/// A validated cohort: entities, link rules and field data.
#[derive(Debug, Clone)]
pub struct Cohort {
    entities: Vec<EntityDefinition>,
    links: Vec<LinkRule>,
    data: CohortData,
}

impl Cohort {
    /// Load and validate a cohort file.
    ///
    /// # Errors
    /// [`ConfigurationError::Io`] if the file cannot be read, otherwise any
    /// error from [`Cohort::from_yaml_str`].
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigurationError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigurationError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), "loaded cohort file");
        Self::from_yaml_str(&contents)
    }

    /// Parse and validate cohort text.
    ///
    /// # Example
    /// ```
    /// use cohort_bundler::config::Cohort;
    ///
    /// let cohort = Cohort::from_yaml_str(r#"
    /// resources:
    ///   - entity: PrimaryPatient
    ///     resource_type: Patient
    /// fields:
    ///   - entity: PrimaryPatient
    ///     path: Patient.gender
    ///     value_type: code
    ///     values: [male, female]
    /// "#).unwrap();
    ///
    /// assert_eq!(cohort.row_count(), 2);
    /// ```
    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigurationError> {
        let file: CohortFile = serde_yaml::from_str(text)?;
        Self::from_file(file)
    }

    pub fn from_file(file: CohortFile) -> Result<Self, ConfigurationError> {
        Self::from_parts(file.resources, file.links, file.fields, file.subject_count)
    }

    /// Build a cohort from already-parsed parts.
    ///
    /// # Errors
    /// - duplicate entity name
    /// - link rule naming an undefined origin or destination
    /// - field declared for an undefined entity
    pub fn from_parts(
        entities: Vec<EntityDefinition>,
        links: Vec<LinkRule>,
        fields: Vec<FieldEntry>,
        subject_count: Option<usize>,
    ) -> Result<Self, ConfigurationError> {
        let mut names = HashSet::new();
        for entity in &entities {
            if !names.insert(entity.entity.as_str()) {
                return Err(ConfigurationError::DuplicateEntity(entity.entity.clone()));
            }
        }

        for rule in &links {
            for name in [&rule.origin, &rule.destination] {
                if !names.contains(name.as_str()) {
                    return Err(ConfigurationError::UnknownLinkEntity {
                        origin: rule.origin.clone(),
                        destination: rule.destination.clone(),
                        missing: name.clone(),
                    });
                }
            }
        }

        for field in &fields {
            if !names.contains(field.entity.as_str()) {
                return Err(ConfigurationError::UnknownFieldEntity {
                    field: field.name.clone().unwrap_or_else(|| field.path.clone()),
                    entity: field.entity.clone(),
                });
            }
        }

        let row_count = subject_count
            .unwrap_or_else(|| fields.iter().map(|f| f.values.len()).max().unwrap_or(0));
        let mut data = CohortData::new(row_count);
        for field in fields {
            data.push(field);
        }

        Ok(Self {
            entities,
            links,
            data,
        })
    }

    /// Entity definitions in declaration order.
    pub fn entities(&self) -> &[EntityDefinition] {
        &self.entities
    }

    pub fn links(&self) -> &[LinkRule] {
        &self.links
    }

    pub fn data(&self) -> &CohortData {
        &self.data
    }

    pub fn row_count(&self) -> usize {
        self.data.row_count()
    }

    pub fn entity(&self, name: &str) -> Option<&EntityDefinition> {
        self.entities.iter().find(|e| e.entity == name)
    }

    pub fn has_entity(&self, name: &str) -> bool {
        self.entity(name).is_some()
    }

    pub fn entity_names(&self) -> Vec<&str> {
        self.entities.iter().map(|e| e.entity.as_str()).collect()
    }
}

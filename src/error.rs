//! Error types for cohort assembly.
//!
//! Errors fall into two tiers. [`AssemblyError`] is scoped to a single field of
//! a single subject: the field is skipped and assembly continues. A
//! [`ConfigurationError`] means the declared mapping itself is broken and is
//! raised before any subject is processed.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Failure while writing one field into a resource.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AssemblyError {
    /// Malformed path text (unbalanced brackets, bad index, empty segment).
    #[error("malformed path '{path}': {reason}")]
    PathSyntax { path: String, reason: String },

    /// A qualifier or key met an existing value of the wrong shape.
    #[error("path '{path}' at '{segment}': expected {expected}, found {found}")]
    StructuralType {
        path: String,
        segment: String,
        expected: &'static str,
        found: &'static str,
    },

    /// Raw text does not match the lexical form of its declared type.
    #[error("cannot read '{raw}' as {value_type}: {reason}")]
    ValueFormat {
        raw: String,
        value_type: String,
        reason: String,
    },
}

impl AssemblyError {
    pub(crate) fn syntax(path: &str, reason: impl Into<String>) -> Self {
        AssemblyError::PathSyntax {
            path: path.to_string(),
            reason: reason.into(),
        }
    }

    /// Short stable name of the error class, used as a log field.
    pub fn kind(&self) -> &'static str {
        match self {
            AssemblyError::PathSyntax { .. } => "path_syntax",
            AssemblyError::StructuralType { .. } => "structural_type",
            AssemblyError::ValueFormat { .. } => "value_format",
        }
    }
}

/// The cohort declaration is unusable; nothing is assembled.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("entity '{0}' is declared more than once")]
    DuplicateEntity(String),

    #[error("link rule {origin} -> {destination} names unknown entity '{missing}'")]
    UnknownLinkEntity {
        origin: String,
        destination: String,
        missing: String,
    },

    #[error("field '{field}' belongs to unknown entity '{entity}'")]
    UnknownFieldEntity { field: String, entity: String },

    #[error("unknown entity '{0}'")]
    UnknownEntity(String),

    #[error("unknown value type '{0}'")]
    UnknownValueType(String),

    #[error("failed to read cohort file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse cohort declaration: {0}")]
    Parse(#[from] serde_yaml::Error),
}

/// Failure while handing finished envelopes to storage.
#[derive(Debug, Error)]
pub enum OutputError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Non-fatal event recorded while assembling one subject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    /// The cohort declares no fields for this entity; its resource is bare.
    EntityHasNoFields { entity: String },
    /// One field could not be written and was left out.
    FieldSkipped {
        entity: String,
        path: String,
        error: AssemblyError,
    },
    /// A reference could not be written into the origin resource.
    LinkSkipped {
        origin: String,
        destination: String,
        error: AssemblyError,
    },
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::EntityHasNoFields { entity } => {
                write!(f, "entity '{}' has no fields", entity)
            }
            Diagnostic::FieldSkipped { entity, path, error } => {
                write!(f, "{}: skipped '{}': {}", entity, path, error)
            }
            Diagnostic::LinkSkipped { origin, destination, error } => {
                write!(f, "{} -> {}: link not written: {}", origin, destination, error)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assembly_error_display() {
        let err = AssemblyError::syntax("name[0.family", "unbalanced '['");
        assert_eq!(
            err.to_string(),
            "malformed path 'name[0.family': unbalanced '['"
        );
        assert_eq!(err.kind(), "path_syntax");
    }

    #[test]
    fn test_configuration_error_display() {
        let err = ConfigurationError::UnknownLinkEntity {
            origin: "Encounter".to_string(),
            destination: "Ghost".to_string(),
            missing: "Ghost".to_string(),
        };
        assert!(err.to_string().contains("unknown entity 'Ghost'"));
    }
}

//! # Cohort Bundler: Tabular Cohort Data to Linked Resource Bundles
//!
//! Cohort Bundler maps per-subject tabular data onto hierarchical resource
//! documents and packages each subject's resources into a transaction
//! envelope.
//!
//! ## Features
//!
//! - **Path-driven assembly**: a small path language (`name[use=official].family`,
//!   `identifier.[0].value`) locates or creates nested objects and array elements
//! - **Typed coercion**: declared value types validate and convert raw cells,
//!   including caret-delimited composites (`Coding`, `Address`, `Quantity`)
//! - **Custom handlers**: exact-path handlers for shapes plain assignment cannot
//!   express (US Core race/ethnicity/birth sex extensions, NPI/CLIA identifiers)
//! - **Links**: cross-resource references written after every entity is built
//!
//! ## Example: cohort file
//!
//! ```yaml
//! resources:
//!   - entity: PrimaryPatient
//!     resource_type: Patient
//!   - entity: PrimaryEncounter
//!     resource_type: Encounter
//! links:
//!   - origin: PrimaryEncounter
//!     reference_path: subject
//!     destination: PrimaryPatient
//! fields:
//!   - entity: PrimaryPatient
//!     path: Patient.gender
//!     value_type: code
//!     values: [male, female]
//! ```
//!
//! ## Example: conversion
//!
//! ```
//! use cohort_bundler::{Cohort, CohortConverter};
//!
//! let cohort = Cohort::from_yaml_str(r#"
//! resources:
//!   - entity: PrimaryPatient
//!     resource_type: Patient
//! fields:
//!   - entity: PrimaryPatient
//!     path: Patient.gender
//!     values: [male]
//! "#).unwrap();
//!
//! let bundles = CohortConverter::new(&cohort).convert_all().unwrap();
//! assert_eq!(bundles[0].envelope.entries[0].resource.body()["gender"], "male");
//! ```

// Core modules
pub mod error;
pub mod path;
pub mod coercion;
pub mod handlers;
pub mod assembler;

// Cohort model and loading
pub mod model;
pub mod config;

// Assembly pipeline
pub mod identity;
pub mod links;
pub mod envelope;
pub mod converter;
pub mod serialization;

// Re-export key types
pub use error::{AssemblyError, ConfigurationError, Diagnostic, OutputError};
pub use path::{FieldPath, PathSegment, Qualifier};
pub use coercion::{coerce, TypedValue, ValueType, Zone};
pub use handlers::{FieldHandler, HandlerRegistry};
pub use assembler::{assign_value, PathAssembler};

pub use model::{CohortData, EntityDefinition, FieldEntry, FieldValue, LinkRule, Resource};
pub use config::{Cohort, CohortFile};

pub use identity::{IdGenerator, SequentialIds, UuidGenerator};
pub use envelope::{Envelope, EnvelopeEntry, SubmissionMethod, SubmissionRequest};
pub use converter::{CohortConverter, SubjectBundle};
pub use serialization::{write_envelopes, write_ndjson_file, NdjsonWriter};

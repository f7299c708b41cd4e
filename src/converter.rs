//! Per-subject assembly.
//!
//! For each subject row the converter builds every declared entity in
//! declaration order, resolves links between them and packages the result
//! into a transaction [`Envelope`]. Field-level failures are logged, recorded
//! as [`Diagnostic`]s and skipped; they never abort a subject.

use indexmap::IndexMap;
use tracing::{debug, info, warn};

use crate::assembler::PathAssembler;
use crate::config::Cohort;
use crate::envelope::Envelope;
use crate::error::{ConfigurationError, Diagnostic};
use crate::handlers::HandlerRegistry;
use crate::identity::{IdGenerator, UuidGenerator};
use crate::links;
use crate::model::{EntityDefinition, Resource};

/// Everything produced for one subject row.
#[derive(Debug, Clone)]
pub struct SubjectBundle {
    pub index: usize,
    pub envelope: Envelope,
    pub diagnostics: Vec<Diagnostic>,
}

/// Converts a validated [`Cohort`] into envelopes.
///
/// Holds only read-only state, so one converter can serve concurrent
/// subject assemblies.
pub struct CohortConverter<'c> {
    cohort: &'c Cohort,
    handlers: HandlerRegistry,
    ids: Box<dyn IdGenerator>,
}

impl<'c> CohortConverter<'c> {
    /// Converter with the standard handlers and random UUID identities.
    pub fn new(cohort: &'c Cohort) -> Self {
        Self {
            cohort,
            handlers: HandlerRegistry::standard(),
            ids: Box::new(UuidGenerator),
        }
    }

    pub fn with_handlers(mut self, handlers: HandlerRegistry) -> Self {
        self.handlers = handlers;
        self
    }

    pub fn with_id_generator(mut self, ids: impl IdGenerator + 'static) -> Self {
        self.ids = Box::new(ids);
        self
    }

    pub fn cohort(&self) -> &Cohort {
        self.cohort
    }

    /// Build one entity's resource for subject `index`.
    ///
    /// Failed fields are left out and reported through `diagnostics`.
    pub fn build_resource(
        &self,
        definition: &EntityDefinition,
        index: usize,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Resource {
        let mut resource = Resource::new(
            definition.resource_type.as_str(),
            self.ids.next_id(),
            &definition.profiles,
        );

        let fields = self.cohort.data().fields_for(&definition.entity);
        if fields.is_empty() {
            warn!(entity = %definition.entity, "entity has no fields");
            diagnostics.push(Diagnostic::EntityHasNoFields {
                entity: definition.entity.clone(),
            });
            return resource;
        }

        let assembler = PathAssembler::new(&self.handlers);
        for field in fields {
            let Some(raw) = field.raw_value(index) else {
                continue;
            };

            if let Err(error) = assembler.assign(
                resource.body_mut(),
                &field.path,
                &definition.resource_type,
                field.value_type,
                &raw,
            ) {
                warn!(
                    subject = index,
                    entity = %definition.entity,
                    path = %field.path,
                    kind = error.kind(),
                    error = %error,
                    "field skipped"
                );
                diagnostics.push(Diagnostic::FieldSkipped {
                    entity: definition.entity.clone(),
                    path: field.path.clone(),
                    error,
                });
            }
        }

        resource
    }

    /// Assemble, link and package every entity for subject `index`.
    ///
    /// # Errors
    /// [`ConfigurationError`] only if a link rule names an entity that was
    /// not built, which validation at load time rules out.
    pub fn build_subject(&self, index: usize) -> Result<SubjectBundle, ConfigurationError> {
        let mut diagnostics = Vec::new();
        let mut resources = IndexMap::new();

        for definition in self.cohort.entities() {
            let resource = self.build_resource(definition, index, &mut diagnostics);
            resources.insert(definition.entity.clone(), resource);
        }

        diagnostics.extend(links::resolve(&mut resources, self.cohort.links())?);

        let envelope = Envelope::generate(self.ids.as_ref(), resources.into_values());
        debug!(
            subject = index,
            entries = envelope.entries.len(),
            skipped = diagnostics.len(),
            "subject assembled"
        );

        Ok(SubjectBundle {
            index,
            envelope,
            diagnostics,
        })
    }

    /// Lazily assemble every subject in row order.
    pub fn subjects(&self) -> impl Iterator<Item = Result<SubjectBundle, ConfigurationError>> + '_ {
        (0..self.cohort.row_count()).map(move |index| self.build_subject(index))
    }

    /// Assemble every subject.
    pub fn convert_all(&self) -> Result<Vec<SubjectBundle>, ConfigurationError> {
        info!(
            subjects = self.cohort.row_count(),
            entities = self.cohort.entities().len(),
            "converting cohort"
        );
        self.subjects().collect()
    }

    /// Build a single entity's resource for one subject, without an envelope.
    ///
    /// Link rules originating at this entity are applied with references
    /// naming the destination entity (`<Type>/<EntityName>`), since no
    /// destination resource exists.
    pub fn build_single_resource(
        &self,
        entity: &str,
        index: usize,
    ) -> Result<(Resource, Vec<Diagnostic>), ConfigurationError> {
        let definition = self
            .cohort
            .entity(entity)
            .ok_or_else(|| ConfigurationError::UnknownEntity(entity.to_string()))?;

        let mut diagnostics = Vec::new();
        let mut resource = self.build_resource(definition, index, &mut diagnostics);

        for rule in self.cohort.links().iter().filter(|rule| rule.origin == entity) {
            let destination = self
                .cohort
                .entity(&rule.destination)
                .ok_or_else(|| ConfigurationError::UnknownEntity(rule.destination.clone()))?;
            let reference = format!("{}/{}", destination.resource_type, destination.entity);

            if let Err(error) = links::write_reference(&mut resource, &rule.reference_path, reference) {
                warn!(origin = %rule.origin, path = %rule.reference_path, error = %error, "link not written");
                diagnostics.push(Diagnostic::LinkSkipped {
                    origin: rule.origin.clone(),
                    destination: rule.destination.clone(),
                    error,
                });
            }
        }

        Ok((resource, diagnostics))
    }
}

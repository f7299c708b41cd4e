//! Transaction envelope for one subject's resources.
//!
//! Wraps every assembled resource with an idempotent `PUT <Type>/<id>`
//! submission directive so the whole subject can be posted atomically.

use serde::Serialize;

use crate::identity::IdGenerator;
use crate::model::Resource;

pub const ENVELOPE_TYPE: &str = "Bundle";
pub const SUBMISSION_TYPE: &str = "transaction";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// Always `Bundle`
    pub resource_type: &'static str,

    /// Unique envelope ID
    pub id: String,

    /// Always `transaction`
    #[serde(rename = "type")]
    pub submission_type: &'static str,

    #[serde(rename = "entry")]
    pub entries: Vec<EnvelopeEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvelopeEntry {
    /// `urn:uuid:<resource id>`
    pub full_url: String,
    pub resource: Resource,
    pub request: SubmissionRequest,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubmissionRequest {
    pub method: SubmissionMethod,
    /// `<Type>/<id>`
    pub url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SubmissionMethod {
    Put,
}

impl Envelope {
    /// Create a new transaction envelope over `resources`, in order.
    pub fn new(id: String, resources: impl IntoIterator<Item = Resource>) -> Self {
        Self {
            resource_type: ENVELOPE_TYPE,
            id,
            submission_type: SUBMISSION_TYPE,
            entries: resources.into_iter().map(EnvelopeEntry::replace).collect(),
        }
    }

    pub fn generate(ids: &dyn IdGenerator, resources: impl IntoIterator<Item = Resource>) -> Self {
        Self::new(ids.next_id(), resources)
    }

    /// Resources in the envelope of the given type.
    pub fn resources_of_type<'a>(&'a self, resource_type: &'a str) -> impl Iterator<Item = &'a Resource> + 'a {
        self.entries
            .iter()
            .map(|entry| &entry.resource)
            .filter(move |resource| resource.resource_type() == resource_type)
    }
}

impl EnvelopeEntry {
    /// Entry that creates or replaces `resource` by type and identity.
    pub fn replace(resource: Resource) -> Self {
        Self {
            full_url: format!("urn:uuid:{}", resource.id()),
            request: SubmissionRequest {
                method: SubmissionMethod::Put,
                url: resource.reference(),
            },
            resource,
        }
    }
}

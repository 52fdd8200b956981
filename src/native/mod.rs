//! Native XML codec for a submission's editorial workflow.
//!
//! `encode` walks a loaded `SubmissionRecord` into a `DocumentNode` tree;
//! `decode` walks a tree and appends the described participants, queries,
//! review rounds and review assignments to a target submission.

mod dates;
mod decode;
mod document;
mod encode;
mod error;
mod record;
mod store;
mod worklist;

#[cfg(test)]
mod memory;

pub use decode::{ImportReport, NativeImporter};
pub use document::DocumentNode;
pub use encode::NativeExporter;
pub use error::CodecError;
pub use record::{AssignmentRecord, QueryRecord, RoundRecord, SubmissionRecord};
pub use store::{
    EntityFactory, EntityResolver, FileStore, IdentityResolver, ImportStore, SearchIndexer,
    SequenceService, StoreError, StoreResult,
};

use crate::db::{Context, Submission};

/// Where a document is produced or consumed.
#[derive(Debug, Clone)]
pub struct Deployment {
    pub namespace: String,
    pub schema_location: String,
    pub context: Context,
    /// Embed file payloads as base64 on export.
    pub embed_files: bool,
}

impl Deployment {
    pub fn new(namespace: &str, schema_location: &str, context: Context) -> Self {
        Self {
            namespace: namespace.to_string(),
            schema_location: schema_location.to_string(),
            context,
            embed_files: true,
        }
    }

    pub fn primary_locale(&self) -> &str {
        &self.context.primary_locale
    }
}

pub async fn export_xml(
    record: &SubmissionRecord,
    deployment: &Deployment,
    resolver: &dyn EntityResolver,
    files: &dyn FileStore,
) -> Result<String, CodecError> {
    NativeExporter::new(deployment, resolver, files)
        .encode(record)
        .await?
        .to_xml()
}

pub async fn import_xml<S: ImportStore>(
    xml: &str,
    submission: &Submission,
    deployment: &Deployment,
    store: &mut S,
) -> Result<ImportReport, CodecError> {
    let document = DocumentNode::parse(xml)?;
    NativeImporter::new(store, deployment, submission)
        .decode(&document)
        .await
}

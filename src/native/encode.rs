use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::collections::HashMap;
use tracing::{debug, info, warn};

use super::dates::{format_bool, format_date, format_datetime};
use super::document::DocumentNode;
use super::error::CodecError;
use super::record::{AssignmentRecord, QueryRecord, RoundRecord, SubmissionRecord};
use super::store::{EntityResolver, FileStore};
use super::Deployment;
use crate::db::{Note, StageAssignment, Submission, SubmissionFile, WorkflowStage};

/// Title written on a `form` node when the assignment uses free-text answers.
pub(crate) const DEFAULT_FORM_TITLE: &str = "default";

const XSI_NAMESPACE: &str = "http://www.w3.org/2001/XMLSchema-instance";

/// Builds the document for one submission record.
///
/// Referenced users, groups, genres and forms that cannot be resolved leave
/// their attribute or child out; only store failures are errors.
pub struct NativeExporter<'a> {
    deployment: &'a Deployment,
    resolver: &'a dyn EntityResolver,
    files: &'a dyn FileStore,
    emails: HashMap<i64, Option<String>>,
}

impl<'a> NativeExporter<'a> {
    pub fn new(
        deployment: &'a Deployment,
        resolver: &'a dyn EntityResolver,
        files: &'a dyn FileStore,
    ) -> Self {
        Self {
            deployment,
            resolver,
            files,
            emails: HashMap::new(),
        }
    }

    pub async fn encode(&mut self, record: &SubmissionRecord) -> Result<DocumentNode, CodecError> {
        let mut node = self.submission_node(&record.submission);
        node.push(self.participants_node(&record.participants).await?);
        node.push(self.stages_node(record).await?);

        info!(
            "Encoded submission {} ({} participants, {} queries, {} rounds)",
            record.submission.id,
            record.participants.len(),
            record.queries.len(),
            record.rounds.len()
        );
        Ok(node)
    }

    fn submission_node(&self, submission: &Submission) -> DocumentNode {
        let mut node = DocumentNode::new("submission")
            .with_attr("xmlns", self.deployment.namespace.as_str())
            .with_attr("xmlns:xsi", XSI_NAMESPACE)
            .with_attr(
                "xsi:schemaLocation",
                format!("{} {}", self.deployment.namespace, self.deployment.schema_location),
            )
            .with_attr("locale", submission.locale.as_str());
        if let Some(stage) = WorkflowStage::from_id(submission.stage_id) {
            node.set_attr("stage", stage.name());
        }
        if submission.date_submitted.is_some() {
            node.set_attr("date_submitted", format_datetime(submission.date_submitted));
        }
        node
    }

    async fn participants_node(
        &mut self,
        participants: &[StageAssignment],
    ) -> Result<DocumentNode, CodecError> {
        let mut node = DocumentNode::new("participants");
        for participant in participants {
            let mut child = DocumentNode::new("participant");
            if let Some(email) = self.email(participant.user_id).await? {
                child.set_attr("mail", email);
            }
            let group = self.resolver.user_group(participant.user_group_id).await?;
            if let Some(name) = group
                .as_ref()
                .and_then(|g| g.name.localized(self.deployment.primary_locale()))
            {
                child.set_attr("user_group_ref", name);
            }
            node.push(child);
        }
        Ok(node)
    }

    async fn stages_node(&mut self, record: &SubmissionRecord) -> Result<DocumentNode, CodecError> {
        let mut node = DocumentNode::new("stages");
        for stage in WorkflowStage::ALL {
            let mut stage_node = DocumentNode::new("stage")
                .with_attr("id", stage.id().to_string())
                .with_attr("name", stage.name());

            let mut queries = DocumentNode::new("queries");
            for query in record.queries_for(stage) {
                queries.push(self.query_node(query).await?);
            }
            stage_node.push(queries);

            if stage == WorkflowStage::ExternalReview {
                let mut rounds = DocumentNode::new("rounds");
                for round in record.rounds_for(stage) {
                    rounds.push(self.round_node(round).await?);
                }
                stage_node.push(rounds);

                for crossed in record.crossed_rounds(stage) {
                    warn!(
                        "Submission {}: a {} of round {} does not sort after one of round {}; \
                         import will not restore their round membership",
                        record.submission.id,
                        crossed.stage,
                        crossed.later_round,
                        crossed.earlier_round
                    );
                }
            }
            node.push(stage_node);
        }
        Ok(node)
    }

    async fn query_node(&mut self, query: &QueryRecord) -> Result<DocumentNode, CodecError> {
        let mut node = DocumentNode::new("query");
        for note in &query.notes {
            node.push(self.note_node(note).await?);
        }
        Ok(node)
    }

    async fn note_node(&mut self, note: &Note) -> Result<DocumentNode, CodecError> {
        let mut node = DocumentNode::new("note").with_text(note.contents.as_str());
        if let Some(email) = self.email(note.user_id).await? {
            node.set_attr("user", email);
        }
        node.set_attr("date_created", format_datetime(Some(note.date_created)));
        node.set_attr("date_modified", format_datetime(note.date_modified));
        if let Some(title) = note.title.as_deref().filter(|t| !t.is_empty()) {
            node.set_attr("title", title);
        }
        Ok(node)
    }

    /// Assignments first, then files in store order. Decode hands stored
    /// files to rounds in the order `file` nodes appear, so the files of
    /// successive rounds must follow that same order.
    async fn round_node(&mut self, round: &RoundRecord) -> Result<DocumentNode, CodecError> {
        let mut node = DocumentNode::new("round").with_attr("round", round.round.round.to_string());
        if let Some(status) = round.round.status {
            node.set_attr("status", status.to_string());
        }

        for assignment in &round.assignments {
            node.push(self.assignment_node(assignment).await?);
        }

        let mut files: Vec<&SubmissionFile> = round.files.iter().collect();
        files.sort_by_key(|f| f.store_order_key());
        for file in files {
            node.push(self.file_node(file).await?);
        }

        debug!(
            "Encoded review round {} with {} assignments and {} files",
            round.round.round,
            round.assignments.len(),
            round.files.len()
        );
        Ok(node)
    }

    async fn assignment_node(
        &mut self,
        record: &AssignmentRecord,
    ) -> Result<DocumentNode, CodecError> {
        let a = &record.assignment;
        let mut node = DocumentNode::new("reviewAssignment");
        if let Some(email) = self.email(a.reviewer_id).await? {
            node.set_attr("reviewer", email);
        }
        node.set_attr("method", a.review_method.to_string());
        node.set_attr("round", a.round.to_string());
        node.set_attr("unconsidered", a.unconsidered.to_string());
        node.set_attr("date_rated", format_datetime(a.date_rated));
        node.set_attr("last_modified", format_datetime(a.last_modified));
        node.set_attr("date_assigned", format_datetime(a.date_assigned));
        node.set_attr("date_notified", format_datetime(a.date_notified));
        node.set_attr("date_confirmed", format_datetime(a.date_confirmed));
        node.set_attr("date_completed", format_datetime(a.date_completed));
        node.set_attr("date_acknowledged", format_datetime(a.date_acknowledged));
        node.set_attr("date_reminded", format_datetime(a.date_reminded));
        node.set_attr("date_due", format_date(a.date_due));
        node.set_attr("date_response_due", format_date(a.date_response_due));
        node.set_attr("declined", format_bool(a.declined));
        node.set_attr("cancelled", format_bool(a.cancelled));
        node.set_attr("automatic", format_bool(a.reminder_was_automatic));
        node.set_attr("quality", a.quality.to_string());
        node.set_attr(
            "recommendation",
            a.recommendation.map(|r| r.to_string()).unwrap_or_default(),
        );
        node.set_attr(
            "competing_interest",
            a.competing_interests.clone().unwrap_or_default(),
        );

        match a.review_form_id {
            Some(form_id) => {
                let form = self.resolver.review_form(form_id).await?;
                match form
                    .as_ref()
                    .and_then(|f| f.title.localized(self.deployment.primary_locale()))
                {
                    Some(title) => node.push(DocumentNode::new("form").with_attr("title", title)),
                    None => warn!("Review form {} not found, omitting form", form_id),
                }
            }
            None => {
                let mut form = DocumentNode::new("form").with_attr("title", DEFAULT_FORM_TITLE);
                for comment in &record.comments {
                    form.push(
                        DocumentNode::new("answer")
                            .with_attr("value", comment.comments.as_str())
                            .with_attr("viewable", format_bool(comment.viewable)),
                    );
                }
                node.push(form);
            }
        }
        Ok(node)
    }

    async fn file_node(&mut self, file: &SubmissionFile) -> Result<DocumentNode, CodecError> {
        let deployment = self.deployment;
        let locale = deployment.primary_locale();
        let mut node = DocumentNode::new("file")
            .with_attr("id", file.file_id.to_string())
            .with_attr("revision", file.revision.to_string());
        if let Some(source) = file.source_file_id {
            node.set_attr("source_file_id", source.to_string());
        }
        if let Some(source) = file.source_revision {
            node.set_attr("source_revision", source.to_string());
        }
        if let Some(genre_id) = file.genre_id {
            let genre = self.resolver.genre(genre_id).await?;
            if let Some(name) = genre.as_ref().and_then(|g| g.name.localized(locale)) {
                node.set_attr("genre", name);
            }
        }
        node.set_attr("filename", file.original_file_name.as_str());
        node.set_attr("viewable", format_bool(file.viewable));
        node.set_attr("date_uploaded", format_datetime(Some(file.date_uploaded)));
        node.set_attr("date_modified", format_datetime(Some(file.date_modified)));
        node.set_attr("filesize", file.file_size.to_string());
        node.set_attr("filetype", file_type(file));
        if let Some(uploader) = file.uploader_user_id {
            if let Some(email) = self.email(uploader).await? {
                node.set_attr("uploader", email);
            }
        }
        node.set_attr("stage", file.file_stage.to_string());

        for (name_locale, name) in file.name.iter() {
            node.push(
                DocumentNode::new("name")
                    .with_attr("locale", name_locale)
                    .with_text(name),
            );
        }

        if deployment.embed_files {
            match self.files.read_bytes(&file.path).await {
                Ok(bytes) => node.push(
                    DocumentNode::new("embed")
                        .with_attr("encoding", "base64")
                        .with_text(STANDARD.encode(bytes)),
                ),
                Err(e) => warn!(
                    "Could not read file {}-{} at {}: {}",
                    file.file_id, file.revision, file.path, e
                ),
            }
        }
        Ok(node)
    }

    async fn email(&mut self, user_id: i64) -> Result<Option<String>, CodecError> {
        if let Some(cached) = self.emails.get(&user_id) {
            return Ok(cached.clone());
        }
        let email = self.resolver.user(user_id).await?.map(|u| u.email);
        self.emails.insert(user_id, email.clone());
        Ok(email)
    }
}

fn file_type(file: &SubmissionFile) -> String {
    if !file.file_type.is_empty() {
        return file.file_type.clone();
    }
    mime_guess::from_path(&file.original_file_name)
        .first_raw()
        .unwrap_or("application/octet-stream")
        .to_string()
}

use chrono::{NaiveDate, NaiveDateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::dates::{parse_bool, parse_date, parse_datetime};
use super::document::DocumentNode;
use super::encode::DEFAULT_FORM_TITLE;
use super::error::{CodecError, EntityKind, ImportWarning};
use super::store::{ImportStore, StoreError};
use super::worklist::RoundFiles;
use super::Deployment;
use crate::db::{
    FileStage, Note, Query, ReviewAssignment, ReviewForm, ReviewRound, ReviewRoundFile,
    StageAssignment, Submission, SubmissionComment, User, UserGroup, WorkflowStage,
    COMMENT_TYPE_PEER_REVIEW, REVIEW_METHOD_DOUBLE_BLIND, ROLE_ID_REVIEWER,
};

/// Sequence given to a new query so that resequencing places it last.
const APPEND_SEQUENCE: i64 = i64::MAX;

/// Everything a decode appended to the target store, plus its warnings.
#[derive(Debug, Serialize)]
pub struct ImportReport {
    pub import_id: Uuid,
    pub submission_id: i64,
    pub participants: Vec<StageAssignment>,
    pub queries: Vec<Query>,
    pub notes: Vec<Note>,
    pub review_rounds: Vec<ReviewRound>,
    pub round_files: Vec<ReviewRoundFile>,
    pub review_assignments: Vec<ReviewAssignment>,
    pub comments: Vec<SubmissionComment>,
    pub warnings: Vec<ImportWarning>,
}

impl ImportReport {
    fn new(submission_id: i64) -> Self {
        Self {
            import_id: Uuid::new_v4(),
            submission_id,
            participants: Vec::new(),
            queries: Vec::new(),
            notes: Vec::new(),
            review_rounds: Vec::new(),
            round_files: Vec::new(),
            review_assignments: Vec::new(),
            comments: Vec::new(),
            warnings: Vec::new(),
        }
    }
}

/// Appends the workflow described by a document to an existing submission.
///
/// Decodes against one submission must not run concurrently: round numbers,
/// query sequences and file assignment all read the store's current state.
pub struct NativeImporter<'a, S> {
    store: &'a mut S,
    deployment: &'a Deployment,
    submission: &'a Submission,
    users: HashMap<String, User>,
    review_forms: Option<Vec<ReviewForm>>,
    report: ImportReport,
}

impl<'a, S: ImportStore> NativeImporter<'a, S> {
    pub fn new(store: &'a mut S, deployment: &'a Deployment, submission: &'a Submission) -> Self {
        Self {
            store,
            deployment,
            submission,
            users: HashMap::new(),
            review_forms: None,
            report: ImportReport::new(submission.id),
        }
    }

    pub async fn decode(mut self, document: &DocumentNode) -> Result<ImportReport, CodecError> {
        if document.name() != "submission" {
            return Err(CodecError::malformed(format!(
                "expected a submission element, found `{}`",
                document.name()
            )));
        }

        for child in document.children() {
            match child.name() {
                "participants" => self.parse_participants(child).await?,
                "stages" => self.parse_stages(child).await?,
                other => self.warn(CodecError::malformed(format!("unknown element `{}`", other))),
            }
        }

        self.store.submission_changed(self.submission.id).await?;
        self.store.changes_finished().await?;

        let report = self.report;
        info!(
            "Import {} into submission {}: {} participants, {} queries, {} rounds, {} assignments, {} warnings",
            report.import_id,
            report.submission_id,
            report.participants.len(),
            report.queries.len(),
            report.review_rounds.len(),
            report.review_assignments.len(),
            report.warnings.len()
        );
        Ok(report)
    }

    fn warn(&mut self, err: CodecError) {
        warn!(
            "Import {} (submission {}): {}",
            self.report.import_id, self.submission.id, err
        );
        self.report
            .warnings
            .push(ImportWarning::new(self.submission.id, &err));
    }

    /// Turns a non-fatal error into a warning.
    fn recover<T>(&mut self, result: Result<T, CodecError>) -> Result<Option<T>, CodecError> {
        match result {
            Ok(value) => Ok(Some(value)),
            Err(err) if err.is_fatal() => Err(err),
            Err(err) => {
                self.warn(err);
                Ok(None)
            }
        }
    }

    /// For attribute parsing, which never fails fatally.
    fn or_warn<T>(&mut self, result: Result<T, CodecError>, fallback: T) -> T {
        result.unwrap_or_else(|err| {
            self.warn(err);
            fallback
        })
    }

    async fn resolve_user(&mut self, email: &str) -> Result<User, CodecError> {
        if let Some(user) = self.users.get(email) {
            return Ok(user.clone());
        }
        if email.is_empty() {
            return Err(CodecError::unresolved(EntityKind::User, email));
        }
        let user = self
            .store
            .user_by_email(email)
            .await?
            .ok_or_else(|| CodecError::unresolved(EntityKind::User, email))?;
        self.users.insert(email.to_string(), user.clone());
        Ok(user)
    }

    /// First group carrying `name` in any locale. Several matches are
    /// reported but the first one is still used.
    fn resolve_group(&mut self, name: &str, groups: &[UserGroup]) -> Result<UserGroup, CodecError> {
        let matches: Vec<&UserGroup> = groups
            .iter()
            .filter(|g| !name.is_empty() && g.name.contains_value(name))
            .collect();
        let first = matches
            .first()
            .map(|g| (*g).clone())
            .ok_or_else(|| CodecError::unresolved(EntityKind::UserGroup, name))?;
        if matches.len() > 1 {
            self.warn(CodecError::AmbiguousReference {
                kind: EntityKind::UserGroup,
                key: name.to_string(),
                candidates: matches.len(),
            });
        }
        Ok(first)
    }

    async fn parse_participants(&mut self, node: &DocumentNode) -> Result<(), CodecError> {
        let groups = self.store.user_groups(self.deployment.context.id).await?;

        for participant in node.children_named("participant") {
            let user = self.resolve_user(participant.attr_or_empty("mail")).await;
            let Some(user) = self.recover(user)? else {
                continue;
            };
            let group = self.resolve_group(participant.attr_or_empty("user_group_ref"), &groups);
            let Some(group) = self.recover(group)? else {
                continue;
            };

            let link = self
                .store
                .insert_stage_assignment(self.submission.id, group.id, user.id)
                .await?;
            self.report.participants.push(link);
        }
        Ok(())
    }

    async fn parse_stages(&mut self, node: &DocumentNode) -> Result<(), CodecError> {
        for stage_node in node.children_named("stage") {
            let raw_id = stage_node.attr_or_empty("id");
            let Some(stage) = raw_id.trim().parse().ok().and_then(WorkflowStage::from_id) else {
                self.warn(CodecError::malformed(format!(
                    "stage with unknown id `{}`",
                    raw_id
                )));
                continue;
            };

            match stage_node.child("queries") {
                Some(queries) => self.parse_queries(queries, stage).await?,
                None => self.warn(CodecError::malformed(format!(
                    "stage `{}` has no queries element",
                    stage
                ))),
            }

            if stage == WorkflowStage::ExternalReview {
                match stage_node.child("rounds") {
                    Some(rounds) => self.parse_rounds(rounds, stage).await?,
                    None => self.warn(CodecError::malformed(format!(
                        "stage `{}` has no rounds element",
                        stage
                    ))),
                }
            }
        }
        Ok(())
    }

    async fn parse_queries(
        &mut self,
        node: &DocumentNode,
        stage: WorkflowStage,
    ) -> Result<(), CodecError> {
        let submission_id = self.submission.id;

        for query_node in node.children_named("query") {
            let inserted = self
                .store
                .insert_query(Query {
                    id: 0,
                    submission_id,
                    stage_id: stage.id(),
                    seq: APPEND_SEQUENCE,
                    closed: false,
                })
                .await?;
            let ordered = self.store.resequence_queries(submission_id).await?;
            let query = ordered
                .iter()
                .find(|q| q.id == inserted.id)
                .cloned()
                .ok_or_else(|| {
                    CodecError::Sequencing(format!(
                        "query {} missing after resequencing submission {}",
                        inserted.id, submission_id
                    ))
                })?;
            for earlier in self.report.queries.iter_mut() {
                if let Some(renumbered) = ordered.iter().find(|q| q.id == earlier.id) {
                    earlier.seq = renumbered.seq;
                }
            }

            for note_node in query_node.children_named("note") {
                self.parse_note(note_node, &query).await?;
            }
            self.report.queries.push(query);
        }
        Ok(())
    }

    async fn parse_note(&mut self, node: &DocumentNode, query: &Query) -> Result<(), CodecError> {
        let author = self.resolve_user(node.attr_or_empty("user")).await;
        let Some(author) = self.recover(author)? else {
            return Ok(());
        };

        let participants = self.store.query_participant_ids(query.id).await?;
        if !participants.contains(&author.id) {
            self.store
                .insert_query_participant(query.id, author.id)
                .await?;
        }

        let created = self.datetime_attr(node, "date_created");
        let note = Note {
            id: 0,
            query_id: query.id,
            user_id: author.id,
            date_created: created.unwrap_or_else(now),
            date_modified: self.datetime_attr(node, "date_modified"),
            title: node
                .attr("title")
                .filter(|t| !t.is_empty())
                .map(str::to_string),
            contents: node.text_content().to_string(),
        };
        let note = self.store.insert_note(note).await?;
        self.report.notes.push(note);
        Ok(())
    }

    /// Recreates the rounds of `stage` and hands stored review files and
    /// revisions to them. The worklists are built once and threaded through
    /// every round, so later rounds only see what earlier rounds left.
    async fn parse_rounds(
        &mut self,
        node: &DocumentNode,
        stage: WorkflowStage,
    ) -> Result<(), CodecError> {
        let files = self.store.submission_files(self.submission.id).await?;
        let mut pending = RoundFiles::partition(files);

        for round_node in node.children_named("round") {
            pending = self.parse_round(round_node, stage, pending).await?;
        }

        debug!(
            "Submission {}: {} review files and {} revisions left unassigned",
            self.submission.id,
            pending.remaining(FileStage::ReviewFile),
            pending.remaining(FileStage::ReviewRevision)
        );
        Ok(())
    }

    async fn parse_round(
        &mut self,
        node: &DocumentNode,
        stage: WorkflowStage,
        mut pending: RoundFiles,
    ) -> Result<RoundFiles, CodecError> {
        let submission_id = self.submission.id;
        let number = match self
            .store
            .last_review_round(submission_id, stage.id())
            .await?
        {
            Some(last) => last.round + 1,
            None => 1,
        };
        let round = match self
            .store
            .insert_review_round(submission_id, stage.id(), number)
            .await
        {
            Ok(round) => round,
            Err(StoreError::Conflict(detail)) => {
                return Err(CodecError::Sequencing(format!(
                    "review round {} of submission {} already exists ({})",
                    number, submission_id, detail
                )))
            }
            Err(e) => return Err(e.into()),
        };

        for file_node in node.children_named("file") {
            let taken = file_stage(file_node).and_then(|s| pending.take(s, round.round));
            let Some(file) = self.recover(taken)? else {
                continue;
            };
            self.store.assign_file_to_round(&file, &round).await?;
            debug!(
                "Assigned file {}-{} ({}) to review round {}",
                file.file_id,
                file.revision,
                file.stage(),
                round.round
            );
            self.report.round_files.push(ReviewRoundFile {
                submission_id,
                review_round_id: round.id,
                stage_id: round.stage_id,
                file_id: file.file_id,
                revision: file.revision,
            });
        }

        for assignment_node in node.children_named("reviewAssignment") {
            self.parse_review_assignment(assignment_node, &round).await?;
        }

        self.report.review_rounds.push(round);
        Ok(pending)
    }

    async fn parse_review_assignment(
        &mut self,
        node: &DocumentNode,
        round: &ReviewRound,
    ) -> Result<(), CodecError> {
        let reviewer = self.resolve_user(node.attr_or_empty("reviewer")).await;
        let Some(reviewer) = self.recover(reviewer)? else {
            return Ok(());
        };

        let mut answers = Vec::new();
        let review_form_id = match node.child("form") {
            None => {
                self.warn(CodecError::malformed(format!(
                    "review assignment for `{}` has no form element",
                    reviewer.email
                )));
                None
            }
            Some(form) if form.attr_or_empty("title") == DEFAULT_FORM_TITLE => {
                answers.extend(form.children_named("answer"));
                None
            }
            Some(form) => {
                let found = self.resolve_form(form.attr_or_empty("title")).await;
                self.recover(found)?
            }
        };

        let assignment = ReviewAssignment {
            id: 0,
            submission_id: self.submission.id,
            reviewer_id: reviewer.id,
            review_round_id: round.id,
            stage_id: round.stage_id,
            round: round.round,
            review_method: self.int_attr(node, "method", REVIEW_METHOD_DOUBLE_BLIND),
            review_form_id,
            unconsidered: self.int_attr(node, "unconsidered", 0),
            date_rated: self.datetime_attr(node, "date_rated"),
            last_modified: self.datetime_attr(node, "last_modified"),
            date_assigned: self.datetime_attr(node, "date_assigned"),
            date_notified: self.datetime_attr(node, "date_notified"),
            date_confirmed: self.datetime_attr(node, "date_confirmed"),
            date_completed: self.datetime_attr(node, "date_completed"),
            date_acknowledged: self.datetime_attr(node, "date_acknowledged"),
            date_reminded: self.datetime_attr(node, "date_reminded"),
            date_due: self.date_attr(node, "date_due"),
            date_response_due: self.date_attr(node, "date_response_due"),
            declined: parse_bool(node.attr_or_empty("declined")),
            cancelled: parse_bool(node.attr_or_empty("cancelled")),
            reminder_was_automatic: parse_bool(node.attr_or_empty("automatic")),
            quality: self.int_attr(node, "quality", 0),
            recommendation: match node.attr_or_empty("recommendation") {
                "" => None,
                _ => Some(self.int_attr(node, "recommendation", 0)),
            },
            competing_interests: node
                .attr("competing_interest")
                .filter(|c| !c.is_empty())
                .map(str::to_string),
        };
        let assignment = self.store.insert_review_assignment(assignment).await?;

        for answer in answers {
            let comment = SubmissionComment {
                id: 0,
                submission_id: self.submission.id,
                comment_type: COMMENT_TYPE_PEER_REVIEW,
                role_id: ROLE_ID_REVIEWER,
                assoc_id: assignment.id,
                author_id: reviewer.id,
                comment_title: String::new(),
                comments: answer.attr_or_empty("value").to_string(),
                date_posted: now(),
                viewable: answer.attr_or_empty("viewable") == "true",
            };
            let comment = self.store.insert_submission_comment(comment).await?;
            self.report.comments.push(comment);
        }

        self.report.review_assignments.push(assignment);
        Ok(())
    }

    /// First form whose title in the primary locale is `title`.
    async fn resolve_form(&mut self, title: &str) -> Result<i64, CodecError> {
        if self.review_forms.is_none() {
            let forms = self
                .store
                .review_forms(self.deployment.context.id)
                .await?;
            self.review_forms = Some(forms);
        }
        let locale = self.deployment.primary_locale();
        self.review_forms
            .iter()
            .flatten()
            .find(|f| f.title.localized(locale) == Some(title))
            .map(|f| f.id)
            .ok_or_else(|| CodecError::unresolved(EntityKind::ReviewForm, title))
    }

    fn datetime_attr(&mut self, node: &DocumentNode, name: &str) -> Option<NaiveDateTime> {
        let parsed = parse_datetime(name, node.attr_or_empty(name));
        self.or_warn(parsed, None)
    }

    fn date_attr(&mut self, node: &DocumentNode, name: &str) -> Option<NaiveDate> {
        let parsed = parse_date(name, node.attr_or_empty(name));
        self.or_warn(parsed, None)
    }

    /// Integer attribute; empty gives `default`.
    fn int_attr(&mut self, node: &DocumentNode, name: &str, default: i32) -> i32 {
        let raw = node.attr_or_empty(name).trim();
        if raw.is_empty() {
            return default;
        }
        let parsed = raw.parse().map_err(|_| {
            CodecError::malformed(format!("attribute `{}` is not a number: `{}`", name, raw))
        });
        self.or_warn(parsed, default)
    }
}

fn file_stage(node: &DocumentNode) -> Result<FileStage, CodecError> {
    let raw = node.attr_or_empty("stage");
    raw.trim()
        .parse()
        .map(FileStage::from_id)
        .map_err(|_| CodecError::malformed(format!("file node has an unreadable stage `{}`", raw)))
}

fn now() -> NaiveDateTime {
    Utc::now().naive_utc()
}

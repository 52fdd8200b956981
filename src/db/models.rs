use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::BTreeMap;
use std::fmt;

/// Comment type for reviewer comments attached to a review assignment.
pub const COMMENT_TYPE_PEER_REVIEW: i32 = 1;
/// Role id of a reviewer.
pub const ROLE_ID_REVIEWER: i32 = 4096;
pub const REVIEW_METHOD_DOUBLE_BLIND: i32 = 2;

/// Locale-keyed display strings, stored as a JSONB object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocalizedText(BTreeMap<String, String>);

impl LocalizedText {
    #[cfg(test)]
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn with(mut self, locale: &str, value: &str) -> Self {
        self.insert(locale, value);
        self
    }

    #[cfg(test)]
    pub fn insert(&mut self, locale: &str, value: &str) {
        self.0.insert(locale.to_string(), value.to_string());
    }

    pub fn get(&self, locale: &str) -> Option<&str> {
        self.0.get(locale).map(String::as_str)
    }

    /// Value for `locale`, falling back to the first stored locale.
    pub fn localized(&self, locale: &str) -> Option<&str> {
        self.get(locale)
            .or_else(|| self.0.values().next().map(String::as_str))
            .filter(|v| !v.is_empty())
    }

    /// True when any locale carries exactly `value`.
    pub fn contains_value(&self, value: &str) -> bool {
        self.0.values().any(|v| v == value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// The five fixed phases of the editorial workflow, in declared order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkflowStage {
    Submission,
    InternalReview,
    ExternalReview,
    CopyEditing,
    Production,
}

impl WorkflowStage {
    pub const ALL: [WorkflowStage; 5] = [
        WorkflowStage::Submission,
        WorkflowStage::InternalReview,
        WorkflowStage::ExternalReview,
        WorkflowStage::CopyEditing,
        WorkflowStage::Production,
    ];

    pub fn id(self) -> i32 {
        match self {
            WorkflowStage::Submission => 1,
            WorkflowStage::InternalReview => 2,
            WorkflowStage::ExternalReview => 3,
            WorkflowStage::CopyEditing => 4,
            WorkflowStage::Production => 5,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            WorkflowStage::Submission => "submission",
            WorkflowStage::InternalReview => "internalReview",
            WorkflowStage::ExternalReview => "externalReview",
            WorkflowStage::CopyEditing => "copyEditing",
            WorkflowStage::Production => "production",
        }
    }

    pub fn from_id(id: i32) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.id() == id)
    }
}

impl fmt::Display for WorkflowStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Where a file revision sits in the workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileStage {
    Submission,
    Note,
    ReviewFile,
    ReviewAttachment,
    Final,
    Copyedit,
    Proof,
    ProductionReady,
    Attachment,
    ReviewRevision,
    Dependent,
    Query,
    Other(i32),
}

impl FileStage {
    pub fn id(self) -> i32 {
        match self {
            FileStage::Submission => 2,
            FileStage::Note => 3,
            FileStage::ReviewFile => 4,
            FileStage::ReviewAttachment => 5,
            FileStage::Final => 6,
            FileStage::Copyedit => 9,
            FileStage::Proof => 10,
            FileStage::ProductionReady => 11,
            FileStage::Attachment => 13,
            FileStage::ReviewRevision => 15,
            FileStage::Dependent => 17,
            FileStage::Query => 18,
            FileStage::Other(id) => id,
        }
    }

    pub fn from_id(id: i32) -> Self {
        match id {
            2 => FileStage::Submission,
            3 => FileStage::Note,
            4 => FileStage::ReviewFile,
            5 => FileStage::ReviewAttachment,
            6 => FileStage::Final,
            9 => FileStage::Copyedit,
            10 => FileStage::Proof,
            11 => FileStage::ProductionReady,
            13 => FileStage::Attachment,
            15 => FileStage::ReviewRevision,
            17 => FileStage::Dependent,
            18 => FileStage::Query,
            other => FileStage::Other(other),
        }
    }
}

impl fmt::Display for FileStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileStage::ReviewFile => f.write_str("review file"),
            FileStage::ReviewRevision => f.write_str("review revision"),
            other => write!(f, "file stage {}", other.id()),
        }
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Context {
    pub id: i64,
    pub path: String,
    pub primary_locale: String,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Submission {
    pub id: i64,
    pub context_id: i64,
    pub locale: String,
    pub stage_id: i32,
    pub status: i32,
    pub date_submitted: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct UserGroup {
    pub id: i64,
    pub context_id: i64,
    #[sqlx(json)]
    pub name: LocalizedText,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Genre {
    pub id: i64,
    pub context_id: i64,
    #[sqlx(json)]
    pub name: LocalizedText,
}

/// A (user, user group) participant link on a submission.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct StageAssignment {
    pub id: i64,
    pub submission_id: i64,
    pub user_group_id: i64,
    pub user_id: i64,
    pub date_assigned: NaiveDateTime,
}

/// A discussion thread on one workflow stage of a submission.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct Query {
    pub id: i64,
    pub submission_id: i64,
    pub stage_id: i32,
    pub seq: i64,
    pub closed: bool,
}

#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct Note {
    pub id: i64,
    pub query_id: i64,
    pub user_id: i64,
    pub date_created: NaiveDateTime,
    pub date_modified: Option<NaiveDateTime>,
    pub title: Option<String>,
    pub contents: String,
}

#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct ReviewRound {
    pub id: i64,
    pub submission_id: i64,
    pub stage_id: i32,
    pub round: i32,
    pub status: Option<i32>,
}

/// One revision of a submission file.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct SubmissionFile {
    pub file_id: i64,
    pub revision: i32,
    pub submission_id: i64,
    pub source_file_id: Option<i64>,
    pub source_revision: Option<i32>,
    pub genre_id: Option<i64>,
    pub file_stage: i32,
    pub original_file_name: String,
    pub viewable: bool,
    pub date_uploaded: NaiveDateTime,
    pub date_modified: NaiveDateTime,
    pub file_size: i64,
    pub file_type: String,
    pub uploader_user_id: Option<i64>,
    #[sqlx(json)]
    pub name: LocalizedText,
    pub path: String,
}

impl SubmissionFile {
    pub fn stage(&self) -> FileStage {
        FileStage::from_id(self.file_stage)
    }

    /// The order in which the store returns a submission's files.
    ///
    /// Round membership is not written to the document, so decode relies on
    /// the encoder emitting round files in this same order.
    pub fn store_order_key(&self) -> (i64, i32) {
        (self.file_id, self.revision)
    }
}

#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct ReviewRoundFile {
    pub submission_id: i64,
    pub review_round_id: i64,
    pub stage_id: i32,
    pub file_id: i64,
    pub revision: i32,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ReviewForm {
    pub id: i64,
    pub context_id: i64,
    #[sqlx(json)]
    pub title: LocalizedText,
}

#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct ReviewAssignment {
    pub id: i64,
    pub submission_id: i64,
    pub reviewer_id: i64,
    pub review_round_id: i64,
    pub stage_id: i32,
    pub round: i32,
    pub review_method: i32,
    pub review_form_id: Option<i64>,
    pub unconsidered: i32,
    pub date_rated: Option<NaiveDateTime>,
    pub last_modified: Option<NaiveDateTime>,
    pub date_assigned: Option<NaiveDateTime>,
    pub date_notified: Option<NaiveDateTime>,
    pub date_confirmed: Option<NaiveDateTime>,
    pub date_completed: Option<NaiveDateTime>,
    pub date_acknowledged: Option<NaiveDateTime>,
    pub date_reminded: Option<NaiveDateTime>,
    pub date_due: Option<NaiveDate>,
    pub date_response_due: Option<NaiveDate>,
    pub declined: bool,
    pub cancelled: bool,
    pub reminder_was_automatic: bool,
    pub quality: i32,
    pub recommendation: Option<i32>,
    pub competing_interests: Option<String>,
}

/// Free-text reviewer comment on a review assignment.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct SubmissionComment {
    pub id: i64,
    pub submission_id: i64,
    pub comment_type: i32,
    pub role_id: i32,
    pub assoc_id: i64,
    pub author_id: i64,
    pub comment_title: String,
    pub comments: String,
    pub date_posted: NaiveDateTime,
    pub viewable: bool,
}

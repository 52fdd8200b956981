use serde::Serialize;
use std::fmt;
use thiserror::Error;

use super::store::StoreError;
use crate::db::FileStage;

/// Kinds of entity the codec resolves by key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    User,
    UserGroup,
    ReviewForm,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EntityKind::User => "user",
            EntityKind::UserGroup => "user group",
            EntityKind::ReviewForm => "review form",
        })
    }
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("unresolved {kind} reference `{key}`")]
    UnresolvedReference { kind: EntityKind, key: String },

    #[error("ambiguous {kind} reference `{key}`: {candidates} candidates match, using the first")]
    AmbiguousReference {
        kind: EntityKind,
        key: String,
        candidates: usize,
    },

    #[error("malformed document: {0}")]
    MalformedDocument(String),

    #[error("round {round} lists a {stage} but none is left to assign")]
    OrderingViolation { stage: FileStage, round: i32 },

    #[error("sequencing error: {0}")]
    Sequencing(String),

    #[error("xml error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("xml write error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl CodecError {
    pub fn malformed(msg: impl Into<String>) -> Self {
        CodecError::MalformedDocument(msg.into())
    }

    pub fn unresolved(kind: EntityKind, key: impl Into<String>) -> Self {
        CodecError::UnresolvedReference {
            kind,
            key: key.into(),
        }
    }

    /// Errors that abort a decode. Everything else is recorded as a warning.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CodecError::Sequencing(_) | CodecError::Xml(_) | CodecError::Io(_) | CodecError::Store(_)
        )
    }

    /// Short label used in warnings and API responses.
    pub fn kind(&self) -> &'static str {
        match self {
            CodecError::UnresolvedReference { .. } => "unresolved_reference",
            CodecError::AmbiguousReference { .. } => "ambiguous_reference",
            CodecError::MalformedDocument(_) | CodecError::Xml(_) => "malformed_document",
            CodecError::OrderingViolation { .. } => "ordering_violation",
            CodecError::Sequencing(_) => "sequencing",
            CodecError::Io(_) | CodecError::Store(_) => "store",
        }
    }
}

/// A non-fatal problem recorded against the submission during decode.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImportWarning {
    pub submission_id: i64,
    pub kind: &'static str,
    pub message: String,
}

impl ImportWarning {
    pub fn new(submission_id: i64, err: &CodecError) -> Self {
        Self {
            submission_id,
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

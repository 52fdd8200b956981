//! Capabilities the codec consumes from the surrounding system.
//!
//! Encode only reads (`EntityResolver`, `FileStore`). Decode reads by
//! natural key and appends rows (`IdentityResolver`, `EntityFactory`,
//! `SequenceService`, `SearchIndexer`). Rows passed to an insert carry
//! id 0; the returned row carries the stored id.

use async_trait::async_trait;
use thiserror::Error;

use crate::db::{
    Genre, Note, Query, ReviewAssignment, ReviewForm, ReviewRound, StageAssignment,
    SubmissionComment, SubmissionFile, User, UserGroup,
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("conflicting row: {0}")]
    Conflict(String),

    #[error("file storage error: {0}")]
    File(#[from] std::io::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait EntityResolver: Send + Sync {
    async fn user(&self, id: i64) -> StoreResult<Option<User>>;
    async fn user_group(&self, id: i64) -> StoreResult<Option<UserGroup>>;
    async fn genre(&self, id: i64) -> StoreResult<Option<Genre>>;
    async fn review_form(&self, id: i64) -> StoreResult<Option<ReviewForm>>;
}

#[async_trait]
pub trait FileStore: Send + Sync {
    async fn read_bytes(&self, path: &str) -> StoreResult<Vec<u8>>;
}

#[async_trait]
pub trait IdentityResolver: Send {
    async fn user_by_email(&mut self, email: &str) -> StoreResult<Option<User>>;
    async fn user_groups(&mut self, context_id: i64) -> StoreResult<Vec<UserGroup>>;
    async fn review_forms(&mut self, context_id: i64) -> StoreResult<Vec<ReviewForm>>;
}

#[async_trait]
pub trait EntityFactory: Send {
    /// Links a user to a submission under a group; an existing link is returned as is.
    async fn insert_stage_assignment(
        &mut self,
        submission_id: i64,
        user_group_id: i64,
        user_id: i64,
    ) -> StoreResult<StageAssignment>;

    async fn insert_query(&mut self, query: Query) -> StoreResult<Query>;
    async fn query_participant_ids(&mut self, query_id: i64) -> StoreResult<Vec<i64>>;
    async fn insert_query_participant(&mut self, query_id: i64, user_id: i64) -> StoreResult<()>;
    async fn insert_note(&mut self, note: Note) -> StoreResult<Note>;

    async fn last_review_round(
        &mut self,
        submission_id: i64,
        stage_id: i32,
    ) -> StoreResult<Option<ReviewRound>>;

    /// Fails with `StoreError::Conflict` when the round number is taken.
    async fn insert_review_round(
        &mut self,
        submission_id: i64,
        stage_id: i32,
        round: i32,
    ) -> StoreResult<ReviewRound>;

    /// Every file revision of the submission, in `SubmissionFile::store_order_key` order.
    async fn submission_files(&mut self, submission_id: i64) -> StoreResult<Vec<SubmissionFile>>;

    async fn assign_file_to_round(
        &mut self,
        file: &SubmissionFile,
        round: &ReviewRound,
    ) -> StoreResult<()>;

    async fn insert_review_assignment(
        &mut self,
        assignment: ReviewAssignment,
    ) -> StoreResult<ReviewAssignment>;

    async fn insert_submission_comment(
        &mut self,
        comment: SubmissionComment,
    ) -> StoreResult<SubmissionComment>;
}

#[async_trait]
pub trait SequenceService: Send {
    /// Renumbers the submission's queries 1..n by (seq, id) and returns them in that order.
    async fn resequence_queries(&mut self, submission_id: i64) -> StoreResult<Vec<Query>>;
}

#[async_trait]
pub trait SearchIndexer: Send {
    async fn submission_changed(&mut self, submission_id: i64) -> StoreResult<()>;
    async fn changes_finished(&mut self) -> StoreResult<()>;
}

/// Everything decode needs from the target store.
pub trait ImportStore: IdentityResolver + EntityFactory + SequenceService + SearchIndexer {}

impl<T> ImportStore for T where T: IdentityResolver + EntityFactory + SequenceService + SearchIndexer {}

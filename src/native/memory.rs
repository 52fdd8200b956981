//! In-memory store implementing every collaborator trait, for tests.

use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::HashMap;

use super::record::{AssignmentRecord, QueryRecord, RoundRecord, SubmissionRecord};
use super::store::{
    EntityFactory, EntityResolver, FileStore, IdentityResolver, SearchIndexer, SequenceService,
    StoreError, StoreResult,
};
use crate::db::{
    Context, FileStage, Genre, LocalizedText, Note, Query, ReviewAssignment, ReviewForm,
    ReviewRound, ReviewRoundFile, StageAssignment, Submission, SubmissionComment, SubmissionFile,
    User, UserGroup, WorkflowStage,
};

pub(crate) const LOCALE: &str = "en_US";

#[derive(Debug, Default, Clone)]
pub(crate) struct MemoryStore {
    pub users: Vec<User>,
    pub user_groups: Vec<UserGroup>,
    pub genres: Vec<Genre>,
    pub review_forms: Vec<ReviewForm>,
    pub stage_assignments: Vec<StageAssignment>,
    pub queries: Vec<Query>,
    pub query_participants: Vec<(i64, i64)>,
    pub notes: Vec<Note>,
    pub review_rounds: Vec<ReviewRound>,
    pub files: Vec<SubmissionFile>,
    pub round_files: Vec<ReviewRoundFile>,
    pub review_assignments: Vec<ReviewAssignment>,
    pub comments: Vec<SubmissionComment>,
    pub blobs: HashMap<String, Vec<u8>>,
    pub reindexed: Vec<i64>,
    pub finished: usize,
    /// Makes `last_review_round` answer as if no round existed yet.
    pub stale_round_numbers: bool,
    next_id: i64,
}

pub(crate) fn stamp(day: u32, hour: u32, minute: u32) -> chrono::NaiveDateTime {
    NaiveDate::from_ymd_opt(2020, 5, day)
        .unwrap()
        .and_hms_opt(hour, minute, 0)
        .unwrap()
}

pub(crate) fn context() -> Context {
    Context {
        id: 1,
        path: "journal".to_string(),
        primary_locale: LOCALE.to_string(),
    }
}

pub(crate) fn submission(id: i64) -> Submission {
    Submission {
        id,
        context_id: 1,
        locale: LOCALE.to_string(),
        stage_id: WorkflowStage::ExternalReview.id(),
        status: 1,
        date_submitted: Some(stamp(1, 10, 0)),
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    pub fn add_user(&mut self, email: &str) -> User {
        let id = self.next_id();
        let user = User {
            id,
            username: email.split('@').next().unwrap_or(email).to_string(),
            email: email.to_string(),
        };
        self.users.push(user.clone());
        user
    }

    pub fn add_group(&mut self, name: &str) -> UserGroup {
        let id = self.next_id();
        let group = UserGroup {
            id,
            context_id: 1,
            name: LocalizedText::new().with(LOCALE, name),
        };
        self.user_groups.push(group.clone());
        group
    }

    pub fn add_genre(&mut self, name: &str) -> Genre {
        let id = self.next_id();
        let genre = Genre {
            id,
            context_id: 1,
            name: LocalizedText::new().with(LOCALE, name),
        };
        self.genres.push(genre.clone());
        genre
    }

    pub fn add_form(&mut self, title: &str) -> ReviewForm {
        let id = self.next_id();
        let form = ReviewForm {
            id,
            context_id: 1,
            title: LocalizedText::new().with(LOCALE, title),
        };
        self.review_forms.push(form.clone());
        form
    }

    pub fn add_file(&mut self, submission_id: i64, stage: FileStage) -> SubmissionFile {
        let file_id = self.next_id();
        let file = SubmissionFile {
            file_id,
            revision: 1,
            submission_id,
            source_file_id: None,
            source_revision: None,
            genre_id: None,
            file_stage: stage.id(),
            original_file_name: format!("manuscript-{}.pdf", file_id),
            viewable: false,
            date_uploaded: stamp(2, 9, 30),
            date_modified: stamp(2, 9, 45),
            file_size: 2048,
            file_type: "application/pdf".to_string(),
            uploader_user_id: None,
            name: LocalizedText::new().with(LOCALE, &format!("Manuscript {}", file_id)),
            path: format!("journals/1/articles/{}/{}-1.pdf", submission_id, file_id),
        };
        self.files.push(file.clone());
        file
    }

    pub fn participant_ids(&self, query_id: i64) -> Vec<i64> {
        self.query_participants
            .iter()
            .filter(|(q, _)| *q == query_id)
            .map(|(_, u)| *u)
            .collect()
    }

    pub fn files_of_round(&self, round_id: i64) -> Vec<i64> {
        self.round_files
            .iter()
            .filter(|rf| rf.review_round_id == round_id)
            .map(|rf| rf.file_id)
            .collect()
    }

    /// The encode graph for `submission`, loaded the way the database adapter does.
    pub fn record(&self, submission: &Submission) -> SubmissionRecord {
        let mut queries: Vec<_> = self
            .queries
            .iter()
            .filter(|q| q.submission_id == submission.id)
            .cloned()
            .collect();
        queries.sort_by_key(|q| (q.seq, q.id));

        let mut rounds: Vec<_> = self
            .review_rounds
            .iter()
            .filter(|r| r.submission_id == submission.id)
            .cloned()
            .collect();
        rounds.sort_by_key(|r| (r.stage_id, r.round));

        SubmissionRecord {
            submission: submission.clone(),
            participants: self
                .stage_assignments
                .iter()
                .filter(|sa| sa.submission_id == submission.id)
                .cloned()
                .collect(),
            queries: queries
                .into_iter()
                .map(|query| QueryRecord {
                    notes: self
                        .notes
                        .iter()
                        .filter(|n| n.query_id == query.id)
                        .cloned()
                        .collect(),
                    query,
                })
                .collect(),
            rounds: rounds
                .into_iter()
                .map(|round| RoundRecord {
                    assignments: self
                        .review_assignments
                        .iter()
                        .filter(|a| a.review_round_id == round.id)
                        .map(|a| AssignmentRecord {
                            comments: self
                                .comments
                                .iter()
                                .filter(|c| c.assoc_id == a.id)
                                .cloned()
                                .collect(),
                            assignment: a.clone(),
                        })
                        .collect(),
                    files: self
                        .round_files
                        .iter()
                        .filter(|rf| rf.review_round_id == round.id)
                        .filter_map(|rf| {
                            self.files
                                .iter()
                                .find(|f| f.file_id == rf.file_id && f.revision == rf.revision)
                                .cloned()
                        })
                        .collect(),
                    round,
                })
                .collect(),
        }
    }
}

#[async_trait]
impl EntityResolver for MemoryStore {
    async fn user(&self, id: i64) -> StoreResult<Option<User>> {
        Ok(self.users.iter().find(|u| u.id == id).cloned())
    }

    async fn user_group(&self, id: i64) -> StoreResult<Option<UserGroup>> {
        Ok(self.user_groups.iter().find(|g| g.id == id).cloned())
    }

    async fn genre(&self, id: i64) -> StoreResult<Option<Genre>> {
        Ok(self.genres.iter().find(|g| g.id == id).cloned())
    }

    async fn review_form(&self, id: i64) -> StoreResult<Option<ReviewForm>> {
        Ok(self.review_forms.iter().find(|f| f.id == id).cloned())
    }
}

#[async_trait]
impl FileStore for MemoryStore {
    async fn read_bytes(&self, path: &str) -> StoreResult<Vec<u8>> {
        self.blobs.get(path).cloned().ok_or_else(|| {
            StoreError::File(std::io::Error::new(std::io::ErrorKind::NotFound, path.to_string()))
        })
    }
}

#[async_trait]
impl IdentityResolver for MemoryStore {
    async fn user_by_email(&mut self, email: &str) -> StoreResult<Option<User>> {
        Ok(self.users.iter().find(|u| u.email == email).cloned())
    }

    async fn user_groups(&mut self, context_id: i64) -> StoreResult<Vec<UserGroup>> {
        Ok(self
            .user_groups
            .iter()
            .filter(|g| g.context_id == context_id)
            .cloned()
            .collect())
    }

    async fn review_forms(&mut self, context_id: i64) -> StoreResult<Vec<ReviewForm>> {
        Ok(self
            .review_forms
            .iter()
            .filter(|f| f.context_id == context_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl EntityFactory for MemoryStore {
    async fn insert_stage_assignment(
        &mut self,
        submission_id: i64,
        user_group_id: i64,
        user_id: i64,
    ) -> StoreResult<StageAssignment> {
        if let Some(existing) = self.stage_assignments.iter().find(|sa| {
            sa.submission_id == submission_id
                && sa.user_group_id == user_group_id
                && sa.user_id == user_id
        }) {
            return Ok(existing.clone());
        }
        let link = StageAssignment {
            id: self.next_id(),
            submission_id,
            user_group_id,
            user_id,
            date_assigned: stamp(3, 12, 0),
        };
        self.stage_assignments.push(link.clone());
        Ok(link)
    }

    async fn insert_query(&mut self, mut query: Query) -> StoreResult<Query> {
        query.id = self.next_id();
        self.queries.push(query.clone());
        Ok(query)
    }

    async fn query_participant_ids(&mut self, query_id: i64) -> StoreResult<Vec<i64>> {
        Ok(self.participant_ids(query_id))
    }

    async fn insert_query_participant(&mut self, query_id: i64, user_id: i64) -> StoreResult<()> {
        self.query_participants.push((query_id, user_id));
        Ok(())
    }

    async fn insert_note(&mut self, mut note: Note) -> StoreResult<Note> {
        note.id = self.next_id();
        self.notes.push(note.clone());
        Ok(note)
    }

    async fn last_review_round(
        &mut self,
        submission_id: i64,
        stage_id: i32,
    ) -> StoreResult<Option<ReviewRound>> {
        if self.stale_round_numbers {
            return Ok(None);
        }
        Ok(self
            .review_rounds
            .iter()
            .filter(|r| r.submission_id == submission_id && r.stage_id == stage_id)
            .max_by_key(|r| r.round)
            .cloned())
    }

    async fn insert_review_round(
        &mut self,
        submission_id: i64,
        stage_id: i32,
        round: i32,
    ) -> StoreResult<ReviewRound> {
        if self.review_rounds.iter().any(|r| {
            r.submission_id == submission_id && r.stage_id == stage_id && r.round == round
        }) {
            return Err(StoreError::Conflict(format!(
                "review_rounds ({}, {}, {})",
                submission_id, stage_id, round
            )));
        }
        let row = ReviewRound {
            id: self.next_id(),
            submission_id,
            stage_id,
            round,
            status: None,
        };
        self.review_rounds.push(row.clone());
        Ok(row)
    }

    async fn submission_files(&mut self, submission_id: i64) -> StoreResult<Vec<SubmissionFile>> {
        let mut files: Vec<_> = self
            .files
            .iter()
            .filter(|f| f.submission_id == submission_id)
            .cloned()
            .collect();
        files.sort_by_key(|f| f.store_order_key());
        Ok(files)
    }

    async fn assign_file_to_round(
        &mut self,
        file: &SubmissionFile,
        round: &ReviewRound,
    ) -> StoreResult<()> {
        self.round_files.push(ReviewRoundFile {
            submission_id: round.submission_id,
            review_round_id: round.id,
            stage_id: round.stage_id,
            file_id: file.file_id,
            revision: file.revision,
        });
        Ok(())
    }

    async fn insert_review_assignment(
        &mut self,
        mut assignment: ReviewAssignment,
    ) -> StoreResult<ReviewAssignment> {
        assignment.id = self.next_id();
        self.review_assignments.push(assignment.clone());
        Ok(assignment)
    }

    async fn insert_submission_comment(
        &mut self,
        mut comment: SubmissionComment,
    ) -> StoreResult<SubmissionComment> {
        comment.id = self.next_id();
        self.comments.push(comment.clone());
        Ok(comment)
    }
}

#[async_trait]
impl SequenceService for MemoryStore {
    async fn resequence_queries(&mut self, submission_id: i64) -> StoreResult<Vec<Query>> {
        let mut ordered: Vec<&mut Query> = self
            .queries
            .iter_mut()
            .filter(|q| q.submission_id == submission_id)
            .collect();
        ordered.sort_by_key(|q| (q.seq, q.id));
        for (i, query) in ordered.iter_mut().enumerate() {
            query.seq = i as i64 + 1;
        }
        Ok(ordered.into_iter().map(|q| q.clone()).collect())
    }
}

#[async_trait]
impl SearchIndexer for MemoryStore {
    async fn submission_changed(&mut self, submission_id: i64) -> StoreResult<()> {
        self.reindexed.push(submission_id);
        Ok(())
    }

    async fn changes_finished(&mut self) -> StoreResult<()> {
        self.finished += 1;
        Ok(())
    }
}

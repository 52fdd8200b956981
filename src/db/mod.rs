mod models;

pub use models::*;

use async_trait::async_trait;
use sqlx::postgres::{PgPoolOptions, Postgres};
use sqlx::{PgPool, Transaction};
use std::sync::Arc;

use crate::native::{
    AssignmentRecord, EntityFactory, EntityResolver, IdentityResolver, QueryRecord, RoundRecord,
    SearchIndexer, SequenceService, StoreError, StoreResult, SubmissionRecord,
};

pub type DbPool = Arc<PgPool>;

pub async fn create_pool(database_url: &str) -> Result<DbPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await?;

    Ok(Arc::new(pool))
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}

pub async fn get_submission(
    pool: &PgPool,
    submission_id: i64,
) -> Result<Option<Submission>, sqlx::Error> {
    sqlx::query_as::<_, Submission>("SELECT * FROM submissions WHERE id = $1")
        .bind(submission_id)
        .fetch_optional(pool)
        .await
}

pub async fn get_context(pool: &PgPool, context_id: i64) -> Result<Option<Context>, sqlx::Error> {
    sqlx::query_as::<_, Context>("SELECT * FROM contexts WHERE id = $1")
        .bind(context_id)
        .fetch_optional(pool)
        .await
}

/// Loads everything the encoder walks for one submission.
pub async fn load_submission_record(
    pool: &PgPool,
    submission: Submission,
) -> Result<SubmissionRecord, sqlx::Error> {
    let participants = sqlx::query_as::<_, StageAssignment>(
        "SELECT * FROM stage_assignments WHERE submission_id = $1 ORDER BY id",
    )
    .bind(submission.id)
    .fetch_all(pool)
    .await?;

    let query_rows = sqlx::query_as::<_, Query>(
        "SELECT * FROM queries WHERE submission_id = $1 ORDER BY seq, id",
    )
    .bind(submission.id)
    .fetch_all(pool)
    .await?;

    let mut queries = Vec::with_capacity(query_rows.len());
    for query in query_rows {
        let notes = sqlx::query_as::<_, Note>(
            "SELECT * FROM notes WHERE query_id = $1 ORDER BY date_created, id",
        )
        .bind(query.id)
        .fetch_all(pool)
        .await?;
        queries.push(QueryRecord { query, notes });
    }

    let round_rows = sqlx::query_as::<_, ReviewRound>(
        "SELECT * FROM review_rounds WHERE submission_id = $1 AND stage_id = $2 ORDER BY round",
    )
    .bind(submission.id)
    .bind(WorkflowStage::ExternalReview.id())
    .fetch_all(pool)
    .await?;

    let mut rounds = Vec::with_capacity(round_rows.len());
    for round in round_rows {
        let assignment_rows = sqlx::query_as::<_, ReviewAssignment>(
            "SELECT * FROM review_assignments WHERE review_round_id = $1 ORDER BY id",
        )
        .bind(round.id)
        .fetch_all(pool)
        .await?;

        let mut assignments = Vec::with_capacity(assignment_rows.len());
        for assignment in assignment_rows {
            let comments = sqlx::query_as::<_, SubmissionComment>(
                r#"
                SELECT * FROM submission_comments
                WHERE assoc_id = $1 AND comment_type = $2
                ORDER BY id
                "#,
            )
            .bind(assignment.id)
            .bind(COMMENT_TYPE_PEER_REVIEW)
            .fetch_all(pool)
            .await?;
            assignments.push(AssignmentRecord {
                assignment,
                comments,
            });
        }

        let files = sqlx::query_as::<_, SubmissionFile>(
            r#"
            SELECT sf.* FROM submission_files sf
            JOIN review_round_files rrf
              ON rrf.file_id = sf.file_id AND rrf.revision = sf.revision
            WHERE rrf.review_round_id = $1
            ORDER BY sf.file_id, sf.revision
            "#,
        )
        .bind(round.id)
        .fetch_all(pool)
        .await?;

        rounds.push(RoundRecord {
            round,
            assignments,
            files,
        });
    }

    Ok(SubmissionRecord {
        submission,
        participants,
        queries,
        rounds,
    })
}

fn conflict_or_database(e: sqlx::Error) -> StoreError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            StoreError::Conflict(db.message().to_string())
        }
        _ => StoreError::Database(e),
    }
}

/// Id lookups for export, straight off the pool.
pub struct PgResolver {
    pool: PgPool,
}

impl PgResolver {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EntityResolver for PgResolver {
    async fn user(&self, id: i64) -> StoreResult<Option<User>> {
        Ok(
            sqlx::query_as::<_, User>("SELECT id, username, email FROM users WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    async fn user_group(&self, id: i64) -> StoreResult<Option<UserGroup>> {
        Ok(sqlx::query_as::<_, UserGroup>("SELECT * FROM user_groups WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn genre(&self, id: i64) -> StoreResult<Option<Genre>> {
        Ok(sqlx::query_as::<_, Genre>("SELECT * FROM genres WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn review_form(&self, id: i64) -> StoreResult<Option<ReviewForm>> {
        Ok(sqlx::query_as::<_, ReviewForm>("SELECT * FROM review_forms WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }
}

/// All writes of one import, inside a single transaction.
///
/// `begin` locks the target submission row, so a second import of the same
/// submission waits until this one commits or rolls back. Dropping the
/// session without `commit` rolls everything back.
pub struct PgImportSession {
    tx: Transaction<'static, Postgres>,
}

impl PgImportSession {
    pub async fn begin(
        pool: &PgPool,
        submission_id: i64,
    ) -> Result<Option<(Self, Submission)>, sqlx::Error> {
        let mut tx = pool.begin().await?;
        let submission =
            sqlx::query_as::<_, Submission>("SELECT * FROM submissions WHERE id = $1 FOR UPDATE")
                .bind(submission_id)
                .fetch_optional(&mut *tx)
                .await?;
        Ok(submission.map(|s| (Self { tx }, s)))
    }

    pub async fn commit(self) -> Result<(), sqlx::Error> {
        self.tx.commit().await
    }
}

#[async_trait]
impl IdentityResolver for PgImportSession {
    async fn user_by_email(&mut self, email: &str) -> StoreResult<Option<User>> {
        Ok(
            sqlx::query_as::<_, User>("SELECT id, username, email FROM users WHERE email = $1")
                .bind(email)
                .fetch_optional(&mut *self.tx)
                .await?,
        )
    }

    async fn user_groups(&mut self, context_id: i64) -> StoreResult<Vec<UserGroup>> {
        Ok(sqlx::query_as::<_, UserGroup>(
            "SELECT * FROM user_groups WHERE context_id = $1 ORDER BY id",
        )
        .bind(context_id)
        .fetch_all(&mut *self.tx)
        .await?)
    }

    async fn review_forms(&mut self, context_id: i64) -> StoreResult<Vec<ReviewForm>> {
        Ok(sqlx::query_as::<_, ReviewForm>(
            "SELECT * FROM review_forms WHERE context_id = $1 ORDER BY id",
        )
        .bind(context_id)
        .fetch_all(&mut *self.tx)
        .await?)
    }
}

#[async_trait]
impl EntityFactory for PgImportSession {
    async fn insert_stage_assignment(
        &mut self,
        submission_id: i64,
        user_group_id: i64,
        user_id: i64,
    ) -> StoreResult<StageAssignment> {
        sqlx::query(
            r#"
            INSERT INTO stage_assignments (submission_id, user_group_id, user_id, date_assigned)
            VALUES ($1, $2, $3, LOCALTIMESTAMP)
            ON CONFLICT (submission_id, user_group_id, user_id) DO NOTHING
            "#,
        )
        .bind(submission_id)
        .bind(user_group_id)
        .bind(user_id)
        .execute(&mut *self.tx)
        .await?;

        Ok(sqlx::query_as::<_, StageAssignment>(
            r#"
            SELECT * FROM stage_assignments
            WHERE submission_id = $1 AND user_group_id = $2 AND user_id = $3
            "#,
        )
        .bind(submission_id)
        .bind(user_group_id)
        .bind(user_id)
        .fetch_one(&mut *self.tx)
        .await?)
    }

    async fn insert_query(&mut self, query: Query) -> StoreResult<Query> {
        Ok(sqlx::query_as::<_, Query>(
            r#"
            INSERT INTO queries (submission_id, stage_id, seq, closed)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(query.submission_id)
        .bind(query.stage_id)
        .bind(query.seq)
        .bind(query.closed)
        .fetch_one(&mut *self.tx)
        .await?)
    }

    async fn query_participant_ids(&mut self, query_id: i64) -> StoreResult<Vec<i64>> {
        Ok(sqlx::query_scalar::<_, i64>(
            "SELECT user_id FROM query_participants WHERE query_id = $1",
        )
        .bind(query_id)
        .fetch_all(&mut *self.tx)
        .await?)
    }

    async fn insert_query_participant(&mut self, query_id: i64, user_id: i64) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO query_participants (query_id, user_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(query_id)
        .bind(user_id)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn insert_note(&mut self, note: Note) -> StoreResult<Note> {
        Ok(sqlx::query_as::<_, Note>(
            r#"
            INSERT INTO notes (query_id, user_id, date_created, date_modified, title, contents)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(note.query_id)
        .bind(note.user_id)
        .bind(note.date_created)
        .bind(note.date_modified)
        .bind(&note.title)
        .bind(&note.contents)
        .fetch_one(&mut *self.tx)
        .await?)
    }

    async fn last_review_round(
        &mut self,
        submission_id: i64,
        stage_id: i32,
    ) -> StoreResult<Option<ReviewRound>> {
        Ok(sqlx::query_as::<_, ReviewRound>(
            r#"
            SELECT * FROM review_rounds
            WHERE submission_id = $1 AND stage_id = $2
            ORDER BY round DESC
            LIMIT 1
            "#,
        )
        .bind(submission_id)
        .bind(stage_id)
        .fetch_optional(&mut *self.tx)
        .await?)
    }

    async fn insert_review_round(
        &mut self,
        submission_id: i64,
        stage_id: i32,
        round: i32,
    ) -> StoreResult<ReviewRound> {
        sqlx::query_as::<_, ReviewRound>(
            r#"
            INSERT INTO review_rounds (submission_id, stage_id, round)
            VALUES ($1, $2, $3)
            RETURNING *
            "#,
        )
        .bind(submission_id)
        .bind(stage_id)
        .bind(round)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(conflict_or_database)
    }

    async fn submission_files(&mut self, submission_id: i64) -> StoreResult<Vec<SubmissionFile>> {
        Ok(sqlx::query_as::<_, SubmissionFile>(
            "SELECT * FROM submission_files WHERE submission_id = $1 ORDER BY file_id, revision",
        )
        .bind(submission_id)
        .fetch_all(&mut *self.tx)
        .await?)
    }

    async fn assign_file_to_round(
        &mut self,
        file: &SubmissionFile,
        round: &ReviewRound,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO review_round_files (submission_id, review_round_id, stage_id, file_id, revision)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(round.submission_id)
        .bind(round.id)
        .bind(round.stage_id)
        .bind(file.file_id)
        .bind(file.revision)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn insert_review_assignment(
        &mut self,
        a: ReviewAssignment,
    ) -> StoreResult<ReviewAssignment> {
        Ok(sqlx::query_as::<_, ReviewAssignment>(
            r#"
            INSERT INTO review_assignments (
                submission_id, reviewer_id, review_round_id, stage_id, round,
                review_method, review_form_id, unconsidered,
                date_rated, last_modified, date_assigned, date_notified, date_confirmed,
                date_completed, date_acknowledged, date_reminded, date_due, date_response_due,
                declined, cancelled, reminder_was_automatic, quality, recommendation,
                competing_interests
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16,
                    $17, $18, $19, $20, $21, $22, $23, $24)
            RETURNING *
            "#,
        )
        .bind(a.submission_id)
        .bind(a.reviewer_id)
        .bind(a.review_round_id)
        .bind(a.stage_id)
        .bind(a.round)
        .bind(a.review_method)
        .bind(a.review_form_id)
        .bind(a.unconsidered)
        .bind(a.date_rated)
        .bind(a.last_modified)
        .bind(a.date_assigned)
        .bind(a.date_notified)
        .bind(a.date_confirmed)
        .bind(a.date_completed)
        .bind(a.date_acknowledged)
        .bind(a.date_reminded)
        .bind(a.date_due)
        .bind(a.date_response_due)
        .bind(a.declined)
        .bind(a.cancelled)
        .bind(a.reminder_was_automatic)
        .bind(a.quality)
        .bind(a.recommendation)
        .bind(&a.competing_interests)
        .fetch_one(&mut *self.tx)
        .await?)
    }

    async fn insert_submission_comment(
        &mut self,
        c: SubmissionComment,
    ) -> StoreResult<SubmissionComment> {
        Ok(sqlx::query_as::<_, SubmissionComment>(
            r#"
            INSERT INTO submission_comments (
                submission_id, comment_type, role_id, assoc_id, author_id,
                comment_title, comments, date_posted, viewable
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING *
            "#,
        )
        .bind(c.submission_id)
        .bind(c.comment_type)
        .bind(c.role_id)
        .bind(c.assoc_id)
        .bind(c.author_id)
        .bind(&c.comment_title)
        .bind(&c.comments)
        .bind(c.date_posted)
        .bind(c.viewable)
        .fetch_one(&mut *self.tx)
        .await?)
    }
}

#[async_trait]
impl SequenceService for PgImportSession {
    async fn resequence_queries(&mut self, submission_id: i64) -> StoreResult<Vec<Query>> {
        sqlx::query(
            r#"
            UPDATE queries q
            SET seq = ordered.position
            FROM (
                SELECT id, ROW_NUMBER() OVER (ORDER BY seq, id) AS position
                FROM queries
                WHERE submission_id = $1
            ) ordered
            WHERE q.id = ordered.id
            "#,
        )
        .bind(submission_id)
        .execute(&mut *self.tx)
        .await?;

        Ok(sqlx::query_as::<_, Query>(
            "SELECT * FROM queries WHERE submission_id = $1 ORDER BY seq, id",
        )
        .bind(submission_id)
        .fetch_all(&mut *self.tx)
        .await?)
    }
}

#[async_trait]
impl SearchIndexer for PgImportSession {
    async fn submission_changed(&mut self, submission_id: i64) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO submission_search_queue (submission_id, queued_at)
            VALUES ($1, LOCALTIMESTAMP)
            ON CONFLICT (submission_id) DO UPDATE SET queued_at = EXCLUDED.queued_at
            "#,
        )
        .bind(submission_id)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn changes_finished(&mut self) -> StoreResult<()> {
        // Delivered to listeners when the transaction commits.
        sqlx::query("NOTIFY submission_search")
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }
}

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;

use crate::db::{self, PgImportSession, PgResolver};
use crate::native::{self, CodecError, ImportReport};
use crate::state::AppState;
use crate::storage::DiskFileStore;

/// Failures surfaced to HTTP clients as `{"status": "error", "message": ..}`.
#[derive(Debug)]
pub enum ApiError {
    SubmissionNotFound(i64),
    ContextNotFound(i64),
    Codec(CodecError),
    Database(sqlx::Error),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::SubmissionNotFound(_) => StatusCode::NOT_FOUND,
            ApiError::ContextNotFound(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Codec(e) => match e {
                CodecError::MalformedDocument(_) | CodecError::Xml(_) => StatusCode::BAD_REQUEST,
                CodecError::UnresolvedReference { .. }
                | CodecError::AmbiguousReference { .. }
                | CodecError::OrderingViolation { .. } => StatusCode::UNPROCESSABLE_ENTITY,
                CodecError::Sequencing(_) => StatusCode::CONFLICT,
                CodecError::Io(_) | CodecError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::SubmissionNotFound(id) => format!("Submission {} not found.", id),
            ApiError::ContextNotFound(id) => format!("Context {} not found.", id),
            ApiError::Codec(CodecError::Io(_) | CodecError::Store(_)) => {
                "Storage error.".to_string()
            }
            ApiError::Codec(e) => e.to_string(),
            ApiError::Database(_) => "Database error.".to_string(),
        }
    }
}

impl From<CodecError> for ApiError {
    fn from(e: CodecError) -> Self {
        ApiError::Codec(e)
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(e: sqlx::Error) -> Self {
        ApiError::Database(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("Request failed: {:?}", self);
        } else {
            tracing::warn!("Request rejected: {}", self.message());
        }
        (
            status,
            Json(serde_json::json!({
                "status": "error",
                "message": self.message()
            })),
        )
            .into_response()
    }
}

pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

pub async fn export_submission(
    State(state): State<Arc<AppState>>,
    Path(submission_id): Path<i64>,
) -> Result<Response, ApiError> {
    let pool = state.pool.as_ref();

    let submission = db::get_submission(pool, submission_id)
        .await?
        .ok_or(ApiError::SubmissionNotFound(submission_id))?;
    let context = db::get_context(pool, submission.context_id)
        .await?
        .ok_or(ApiError::ContextNotFound(submission.context_id))?;
    let deployment = state.config.deployment(context);

    let record = db::load_submission_record(pool, submission).await?;
    let resolver = PgResolver::new(pool.clone());
    let files = DiskFileStore::new(&state.config.files_folder);
    let xml = native::export_xml(&record, &deployment, &resolver, &files).await?;

    Ok((
        [
            (header::CONTENT_TYPE, "application/xml".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"submission-{}.xml\"", submission_id),
            ),
        ],
        xml,
    )
        .into_response())
}

/// Appends the workflow described by the request body to the submission.
///
/// Everything runs in one transaction; any fatal error rolls the import back.
pub async fn import_submission(
    State(state): State<Arc<AppState>>,
    Path(submission_id): Path<i64>,
    body: String,
) -> Result<Json<ImportReport>, ApiError> {
    let pool = state.pool.as_ref();

    let (mut session, submission) = PgImportSession::begin(pool, submission_id)
        .await?
        .ok_or(ApiError::SubmissionNotFound(submission_id))?;
    let context = db::get_context(pool, submission.context_id)
        .await?
        .ok_or(ApiError::ContextNotFound(submission.context_id))?;
    let deployment = state.config.deployment(context);

    let report = native::import_xml(&body, &submission, &deployment, &mut session).await?;
    session.commit().await?;

    Ok(Json(report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::FileStage;
    use crate::native::StoreError;

    #[test]
    fn codec_errors_map_to_client_statuses() {
        let cases = [
            (CodecError::malformed("no root"), StatusCode::BAD_REQUEST),
            (
                CodecError::OrderingViolation {
                    stage: FileStage::ReviewFile,
                    round: 2,
                },
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (
                CodecError::Sequencing("round 1 exists".to_string()),
                StatusCode::CONFLICT,
            ),
            (
                CodecError::Store(StoreError::Conflict("dup".to_string())),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (error, expected) in cases {
            assert_eq!(ApiError::from(error).status(), expected);
        }
        assert_eq!(ApiError::SubmissionNotFound(9).status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn store_failures_do_not_leak_details() {
        let err = ApiError::from(CodecError::Store(StoreError::Conflict(
            "duplicate key value violates unique constraint".to_string(),
        )));
        assert_eq!(err.message(), "Storage error.");

        let err = ApiError::from(CodecError::malformed("expected root element"));
        assert!(err.message().contains("expected root element"));
    }
}

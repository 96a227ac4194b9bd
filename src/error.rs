use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

/// All failures surfaced by the queue engine and its HTTP front.
///
/// Each variant carries a human-readable message; the wire error code and
/// HTTP status are derived from the variant.
#[derive(Debug, Clone, Error)]
pub enum SqsError {
    #[error("{0}")]
    QueueAlreadyExists(String),
    #[error("{0}")]
    QueueDoesNotExist(String),
    #[error("{0}")]
    InvalidAttributeName(String),
    #[error("{0}")]
    InvalidParameterValue(String),
    #[error("{0}")]
    InvalidMessageContents(String),
    #[error("{0}")]
    PurgeQueueInProgress(String),
    #[error("{0}")]
    ReceiptHandleIsInvalid(String),
    #[error("{0}")]
    EmptyBatchRequest(String),
    #[error("{0}")]
    TooManyEntriesInBatchRequest(String),
    #[error("{0}")]
    BatchEntryIdsNotDistinct(String),
    #[error("{0}")]
    InvalidBatchEntryId(String),
    #[error("{0}")]
    MissingParameter(String),
    #[error("{0}")]
    InvalidAction(String),
    #[error("{0}")]
    NonExistentAccount(String),
    #[error("{0}")]
    AccessDenied(String),
}

impl SqsError {
    pub fn error_code(&self) -> &'static str {
        match self {
            SqsError::QueueAlreadyExists(_) => "QueueAlreadyExists",
            SqsError::QueueDoesNotExist(_) => "QueueDoesNotExist",
            SqsError::InvalidAttributeName(_) => "InvalidAttributeName",
            SqsError::InvalidParameterValue(_) => "InvalidParameterValue",
            SqsError::InvalidMessageContents(_) => "InvalidMessageContents",
            SqsError::PurgeQueueInProgress(_) => "PurgeQueueInProgress",
            SqsError::ReceiptHandleIsInvalid(_) => "ReceiptHandleIsInvalid",
            SqsError::EmptyBatchRequest(_) => "EmptyBatchRequest",
            SqsError::TooManyEntriesInBatchRequest(_) => "TooManyEntriesInBatchRequest",
            SqsError::BatchEntryIdsNotDistinct(_) => "BatchEntryIdsNotDistinct",
            SqsError::InvalidBatchEntryId(_) => "InvalidBatchEntryId",
            SqsError::MissingParameter(_) => "MissingParameter",
            SqsError::InvalidAction(_) => "InvalidAction",
            SqsError::NonExistentAccount(_) => "NonExistentAccount",
            SqsError::AccessDenied(_) => "AccessDenied",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            SqsError::NonExistentAccount(_) => StatusCode::NOT_FOUND,
            SqsError::AccessDenied(_) => StatusCode::FORBIDDEN,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for SqsError {
    fn into_response(self) -> Response {
        let body = json!({
            "__type": format!("com.amazonaws.sqs#{}", self.error_code()),
            "message": self.to_string(),
        });
        (self.status_code(), axum::Json(body)).into_response()
    }
}

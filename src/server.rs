use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};

use crate::error::SqsError;
use crate::state::SqsState;
use crate::types::*;

macro_rules! dispatch {
    ($state:expr, $caller:expr, $body:expr, $req_type:ty, $method:ident) => {{
        let req: $req_type = serde_json::from_slice(&$body)
            .map_err(|e| SqsError::InvalidParameterValue(e.to_string()))?;
        let resp = $state.$method(&$caller, req).await?;
        Ok(Json(serde_json::to_value(resp).unwrap()).into_response())
    }};
}

macro_rules! dispatch_empty {
    ($state:expr, $caller:expr, $body:expr, $req_type:ty, $method:ident) => {{
        let req: $req_type = serde_json::from_slice(&$body)
            .map_err(|e| SqsError::InvalidParameterValue(e.to_string()))?;
        $state.$method(&$caller, req).await?;
        Ok(Json(serde_json::json!({})).into_response())
    }};
}

async fn handle_request(
    State(state): State<Arc<SqsState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<axum::response::Response, SqsError> {
    let target = headers
        .get("x-amz-target")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| SqsError::InvalidAction("Missing X-Amz-Target header".into()))?;

    let action = target
        .strip_prefix("AmazonSQS.")
        .ok_or_else(|| SqsError::InvalidAction(format!("Invalid target: {target}")))?;

    let caller = state.default_caller();

    match action {
        "CreateQueue" => dispatch!(state, caller, body, CreateQueueRequest, create_queue),
        "DeleteQueue" => dispatch_empty!(state, caller, body, DeleteQueueRequest, delete_queue),
        "GetQueueUrl" => dispatch!(state, caller, body, GetQueueUrlRequest, get_queue_url),
        "ListQueues" => dispatch!(state, caller, body, ListQueuesRequest, list_queues),
        "GetQueueAttributes" => {
            dispatch!(
                state,
                caller,
                body,
                GetQueueAttributesRequest,
                get_queue_attributes
            )
        }
        "SetQueueAttributes" => {
            dispatch_empty!(
                state,
                caller,
                body,
                SetQueueAttributesRequest,
                set_queue_attributes
            )
        }
        "PurgeQueue" => dispatch_empty!(state, caller, body, PurgeQueueRequest, purge_queue),
        "SendMessage" => dispatch!(state, caller, body, SendMessageRequest, send_message),
        "SendMessageBatch" => {
            dispatch!(
                state,
                caller,
                body,
                SendMessageBatchRequest,
                send_message_batch
            )
        }
        "ReceiveMessage" => {
            dispatch!(state, caller, body, ReceiveMessageRequest, receive_message)
        }
        "DeleteMessage" => {
            dispatch_empty!(state, caller, body, DeleteMessageRequest, delete_message)
        }
        "DeleteMessageBatch" => {
            dispatch!(
                state,
                caller,
                body,
                DeleteMessageBatchRequest,
                delete_message_batch
            )
        }
        "ChangeMessageVisibility" => {
            dispatch_empty!(
                state,
                caller,
                body,
                ChangeMessageVisibilityRequest,
                change_message_visibility
            )
        }
        "ChangeMessageVisibilityBatch" => {
            dispatch!(
                state,
                caller,
                body,
                ChangeMessageVisibilityBatchRequest,
                change_message_visibility_batch
            )
        }
        "ListDeadLetterSourceQueues" => {
            dispatch!(
                state,
                caller,
                body,
                ListDeadLetterSourceQueuesRequest,
                list_dead_letter_source_queues
            )
        }
        _ => Err(SqsError::InvalidAction(format!("Unknown action: {action}"))),
    }
}

pub fn create_router(state: Arc<SqsState>) -> Router {
    Router::new()
        .route("/", post(handle_request))
        .with_state(state)
}

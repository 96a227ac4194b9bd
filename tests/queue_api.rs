//! HTTP-level tests driving the router with the AWS JSON protocol.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use sqs_local::server;
use sqs_local::state::SqsState;

fn app() -> Router {
    server::create_router(Arc::new(SqsState::new(
        "000000000000".into(),
        "us-east-1".into(),
        9324,
    )))
}

async fn call(app: &Router, action: &str, body: Value) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri("/")
        .header("x-amz-target", format!("AmazonSQS.{action}"))
        .header("content-type", "application/x-amz-json-1.0")
        .body(Body::from(body.to_string()))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value: Value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

fn error_type(body: &Value) -> &str {
    body["__type"].as_str().unwrap_or_default()
}

async fn create_queue(app: &Router, name: &str, attributes: Value) -> String {
    let mut body = json!({ "QueueName": name });
    if !attributes.is_null() {
        body["Attributes"] = attributes;
    }
    let (status, value) = call(app, "CreateQueue", body).await;
    assert_eq!(status, StatusCode::OK, "CreateQueue failed: {value}");
    value["QueueUrl"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn create_queue_returns_url_and_attributes() {
    let app = app();
    let url = create_queue(&app, "orders", Value::Null).await;
    assert_eq!(url, "http://localhost:9324/000000000000/orders");

    let (status, value) = call(
        &app,
        "GetQueueAttributes",
        json!({ "QueueUrl": url.as_str(), "AttributeNames": ["All"] }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let attrs = &value["Attributes"];
    assert_eq!(
        attrs["QueueArn"],
        "arn:aws:sqs:us-east-1:000000000000:orders"
    );
    assert_eq!(attrs["VisibilityTimeout"], "30");
    assert_eq!(attrs["ApproximateNumberOfMessages"], "0");
}

#[tokio::test]
async fn create_queue_conflicting_attributes_is_a_400() {
    let app = app();
    create_queue(&app, "orders", json!({ "VisibilityTimeout": "5" })).await;

    // identical attributes: idempotent
    let (status, _) = call(
        &app,
        "CreateQueue",
        json!({ "QueueName": "orders", "Attributes": { "VisibilityTimeout": "5" } }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, value) = call(
        &app,
        "CreateQueue",
        json!({ "QueueName": "orders", "Attributes": { "VisibilityTimeout": "6" } }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_type(&value), "com.amazonaws.sqs#QueueAlreadyExists");
}

#[tokio::test]
async fn unknown_attribute_is_rejected() {
    let app = app();
    let (status, value) = call(
        &app,
        "CreateQueue",
        json!({ "QueueName": "orders", "Attributes": { "NotAThing": "1" } }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_type(&value), "com.amazonaws.sqs#InvalidParameterValue");
}

#[tokio::test]
async fn send_receive_delete_round_trip() {
    let app = app();
    let url = create_queue(&app, "work", Value::Null).await;

    let (status, sent) = call(
        &app,
        "SendMessage",
        json!({ "QueueUrl": url.as_str(), "MessageBody": "hello" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        sent["MD5OfMessageBody"],
        "5d41402abc4b2a76b9719d911017c592"
    );
    assert!(sent["MessageId"].as_str().is_some());

    let (status, received) = call(
        &app,
        "ReceiveMessage",
        json!({ "QueueUrl": url.as_str(), "MaxNumberOfMessages": 10 }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let messages = received["Messages"].as_array().unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["Body"], "hello");
    let handle = messages[0]["ReceiptHandle"].as_str().unwrap();

    let (status, _) = call(
        &app,
        "DeleteMessage",
        json!({ "QueueUrl": url.as_str(), "ReceiptHandle": handle }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // queue is empty afterwards
    let (status, received) = call(&app, "ReceiveMessage", json!({ "QueueUrl": url.as_str() })).await;
    assert_eq!(status, StatusCode::OK);
    assert!(received.get("Messages").is_none());
}

#[tokio::test]
async fn receive_parameter_bounds_are_rejected() {
    let app = app();
    let url = create_queue(&app, "bounds", Value::Null).await;

    for body in [
        json!({ "QueueUrl": url.as_str(), "MaxNumberOfMessages": 0 }),
        json!({ "QueueUrl": url.as_str(), "MaxNumberOfMessages": 11 }),
        json!({ "QueueUrl": url.as_str(), "WaitTimeSeconds": 21 }),
        json!({ "QueueUrl": url.as_str(), "VisibilityTimeout": 43201 }),
    ] {
        let (status, value) = call(&app, "ReceiveMessage", body).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(
            error_type(&value),
            "com.amazonaws.sqs#InvalidParameterValue"
        );
    }
}

#[tokio::test]
async fn batch_send_reports_entries_independently() {
    let app = app();
    let url = create_queue(&app, "batch", json!({ "MaximumMessageSize": "1024" })).await;

    let (status, value) = call(
        &app,
        "SendMessageBatch",
        json!({
            "QueueUrl": url.as_str(),
            "Entries": [
                { "Id": "ok", "MessageBody": "fits" },
                { "Id": "big", "MessageBody": "x".repeat(2048) },
            ]
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(value["Successful"].as_array().unwrap().len(), 1);
    let failed = value["Failed"].as_array().unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0]["Id"], "big");
    assert_eq!(failed[0]["Code"], "InvalidParameterValue");
    assert_eq!(failed[0]["SenderFault"], true);
}

#[tokio::test]
async fn batch_envelope_violations_fail_the_call() {
    let app = app();
    let url = create_queue(&app, "batch-envelope", Value::Null).await;

    let (status, value) = call(
        &app,
        "SendMessageBatch",
        json!({
            "QueueUrl": url.as_str(),
            "Entries": [
                { "Id": "dup", "MessageBody": "a" },
                { "Id": "dup", "MessageBody": "b" },
            ]
        }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        error_type(&value),
        "com.amazonaws.sqs#BatchEntryIdsNotDistinct"
    );

    let (status, value) = call(
        &app,
        "SendMessageBatch",
        json!({ "QueueUrl": url.as_str(), "Entries": [] }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_type(&value), "com.amazonaws.sqs#EmptyBatchRequest");

    let entries: Vec<Value> = (0..11)
        .map(|i| json!({ "Id": format!("e{i}"), "MessageBody": "x" }))
        .collect();
    let (status, value) = call(
        &app,
        "SendMessageBatch",
        json!({ "QueueUrl": url.as_str(), "Entries": entries }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        error_type(&value),
        "com.amazonaws.sqs#TooManyEntriesInBatchRequest"
    );
}

#[tokio::test]
async fn garbled_receipt_handle_is_invalid() {
    let app = app();
    let url = create_queue(&app, "handles", Value::Null).await;

    let (status, value) = call(
        &app,
        "DeleteMessage",
        json!({ "QueueUrl": url.as_str(), "ReceiptHandle": "junk" }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        error_type(&value),
        "com.amazonaws.sqs#ReceiptHandleIsInvalid"
    );

    let (status, value) = call(
        &app,
        "ChangeMessageVisibility",
        json!({ "QueueUrl": url.as_str(), "ReceiptHandle": "junk", "VisibilityTimeout": 5 }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        error_type(&value),
        "com.amazonaws.sqs#ReceiptHandleIsInvalid"
    );
}

#[tokio::test]
async fn missing_queue_and_missing_account_are_distinguished() {
    let app = app();
    create_queue(&app, "exists", Value::Null).await;

    let (status, value) = call(
        &app,
        "SendMessage",
        json!({
            "QueueUrl": "http://localhost:9324/000000000000/absent",
            "MessageBody": "x"
        }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_type(&value), "com.amazonaws.sqs#QueueDoesNotExist");

    let (status, value) = call(
        &app,
        "SendMessage",
        json!({
            "QueueUrl": "http://localhost:9324/999999999999/exists",
            "MessageBody": "x"
        }),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(error_type(&value), "com.amazonaws.sqs#NonExistentAccount");
}

#[tokio::test]
async fn unknown_action_and_missing_target_are_rejected() {
    let app = app();

    let (status, value) = call(&app, "TeleportMessage", json!({})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_type(&value), "com.amazonaws.sqs#InvalidAction");

    let request = Request::builder()
        .method("POST")
        .uri("/")
        .body(Body::from("{}"))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn visibility_zero_releases_for_redelivery() {
    let app = app();
    let url = create_queue(&app, "release", Value::Null).await;
    call(
        &app,
        "SendMessage",
        json!({ "QueueUrl": url.as_str(), "MessageBody": "again" }),
    )
    .await;

    let (_, received) = call(&app, "ReceiveMessage", json!({ "QueueUrl": url.as_str() })).await;
    let handle = received["Messages"][0]["ReceiptHandle"].as_str().unwrap();

    let (status, _) = call(
        &app,
        "ChangeMessageVisibility",
        json!({ "QueueUrl": url.as_str(), "ReceiptHandle": handle, "VisibilityTimeout": 0 }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, received) = call(&app, "ReceiveMessage", json!({ "QueueUrl": url.as_str() })).await;
    let messages = received["Messages"].as_array().unwrap();
    assert_eq!(messages.len(), 1);
    // a fresh handle was issued for the new delivery
    assert_ne!(messages[0]["ReceiptHandle"].as_str().unwrap(), handle);
}

#[tokio::test]
async fn list_queues_filters_by_prefix() {
    let app = app();
    create_queue(&app, "orders-a", Value::Null).await;
    create_queue(&app, "orders-b", Value::Null).await;
    create_queue(&app, "billing", Value::Null).await;

    let (status, value) = call(
        &app,
        "ListQueues",
        json!({ "QueueNamePrefix": "orders" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let urls = value["QueueUrls"].as_array().unwrap();
    assert_eq!(urls.len(), 2);

    let (status, value) = call(&app, "ListQueues", json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(value["QueueUrls"].as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn purge_queue_empties_it() {
    let app = app();
    let url = create_queue(&app, "to-purge", Value::Null).await;
    call(
        &app,
        "SendMessage",
        json!({ "QueueUrl": url.as_str(), "MessageBody": "x" }),
    )
    .await;

    let (status, _) = call(&app, "PurgeQueue", json!({ "QueueUrl": url.as_str() })).await;
    assert_eq!(status, StatusCode::OK);

    let (_, received) = call(&app, "ReceiveMessage", json!({ "QueueUrl": url.as_str() })).await;
    assert!(received.get("Messages").is_none());
}

#[tokio::test]
async fn get_queue_url_resolves_existing_queues() {
    let app = app();
    let url = create_queue(&app, "findme", Value::Null).await;

    let (status, value) = call(&app, "GetQueueUrl", json!({ "QueueName": "findme" })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(value["QueueUrl"].as_str().unwrap(), url);

    let (status, value) = call(&app, "GetQueueUrl", json!({ "QueueName": "lost" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_type(&value), "com.amazonaws.sqs#QueueDoesNotExist");
}

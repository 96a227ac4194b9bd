//! In-memory AWS-SQS-compatible queueing service.
//!
//! The engine implements queue administration, the message visibility state
//! machine with signed receipt handles, long-poll delivery, dead-letter
//! redrive and the batched-operation protocol, served over the AWS JSON
//! protocol (`X-Amz-Target: AmazonSQS.<Action>`).

pub mod attributes;
pub mod auth;
pub mod error;
pub mod limits;
pub mod message;
pub mod metrics;
pub mod queue;
pub mod receipt;
pub mod server;
pub mod state;
pub mod types;

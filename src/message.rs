use std::collections::HashMap;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use uuid::Uuid;

use crate::attributes::{compute_md5_of_attributes, md5_hex};
use crate::types::MessageAttributeValue;

pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Lifecycle states observable for a stored message. Deleted messages are
/// removed from storage rather than kept in a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageState {
    Delayed,
    Available,
    InFlight,
}

/// A single stored message.
///
/// `generation` increments on every Available -> InFlight transition; receipt
/// handles embed the generation at issue time and stop matching once the
/// message is received again.
#[derive(Debug, Clone)]
pub struct Message {
    pub message_id: String,
    pub body: String,
    pub md5_of_body: String,
    pub message_attributes: HashMap<String, MessageAttributeValue>,
    pub md5_of_message_attributes: Option<String>,
    pub sender_id: String,
    pub sent_timestamp: u64,
    pub visible_at: Instant,
    pub receive_count: u32,
    pub generation: u64,
    pub first_receive_timestamp: Option<u64>,
    pub visibility_deadline: Option<Instant>,
}

impl Message {
    pub fn new(
        body: String,
        message_attributes: HashMap<String, MessageAttributeValue>,
        sender_id: &str,
        delay: Duration,
    ) -> Self {
        let md5_of_body = md5_hex(body.as_bytes());
        let md5_of_message_attributes = compute_md5_of_attributes(&message_attributes);
        Message {
            message_id: Uuid::new_v4().to_string(),
            body,
            md5_of_body,
            message_attributes,
            md5_of_message_attributes,
            sender_id: sender_id.to_string(),
            sent_timestamp: now_millis(),
            visible_at: Instant::now() + delay,
            receive_count: 0,
            generation: 0,
            first_receive_timestamp: None,
            visibility_deadline: None,
        }
    }

    /// Wall-clock classification; expiry is lazy, so the state is derived
    /// from the stored deadlines at observation time.
    pub fn state_at(&self, now: Instant) -> MessageState {
        match self.visibility_deadline {
            Some(deadline) if now < deadline => MessageState::InFlight,
            Some(_) => MessageState::Available,
            None if self.visible_at > now => MessageState::Delayed,
            None => MessageState::Available,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_transitions_with_the_clock() {
        let msg = Message::new("hi".into(), HashMap::new(), "acct", Duration::from_secs(5));
        let now = Instant::now();
        assert_eq!(msg.state_at(now), MessageState::Delayed);
        assert_eq!(msg.state_at(now + Duration::from_secs(6)), MessageState::Available);
    }

    #[test]
    fn inflight_until_deadline() {
        let mut msg = Message::new("hi".into(), HashMap::new(), "acct", Duration::ZERO);
        let now = Instant::now();
        msg.visibility_deadline = Some(now + Duration::from_secs(30));
        assert_eq!(msg.state_at(now), MessageState::InFlight);
        assert_eq!(
            msg.state_at(now + Duration::from_secs(31)),
            MessageState::Available
        );
    }

    #[test]
    fn body_digest_is_computed_on_construction() {
        let msg = Message::new("hello".into(), HashMap::new(), "acct", Duration::ZERO);
        assert_eq!(msg.md5_of_body, "5d41402abc4b2a76b9719d911017c592");
        assert!(msg.md5_of_message_attributes.is_none());
    }
}

//! Per-queue message storage and the message lifecycle state machine.
//!
//! A message lives either in `pending` (Delayed or Available, classified by
//! `visible_at`) or in `inflight` (keyed by message id). Expiry is lazy:
//! callers invoke [`Queue::reclaim_expired`] before selecting messages, and
//! all deadline comparisons use the wall clock at access time.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::attributes::QueueAttributes;
use crate::error::SqsError;
use crate::limits::Limits;
use crate::message::{now_millis, now_secs, Message, MessageState};
use crate::receipt::ReceiptCodec;
use crate::types::{
    MessageAttributeValue, ReceiveMessageResult, SendMessageResponse,
};

/// A message that exceeded its receive-count budget and must move to the
/// dead-letter queue named by the policy.
pub struct DlqRedrive {
    pub message: Message,
    pub dlq_arn: String,
}

pub struct Queue {
    pub account_id: String,
    pub name: String,
    pub arn: String,
    pub url: String,
    pub attributes: QueueAttributes,
    pending: VecDeque<Message>,
    inflight: HashMap<String, Message>,
    created_at: u64,
    last_modified: u64,
    last_purge: Option<Instant>,
}

impl Queue {
    pub fn new(
        account_id: String,
        name: String,
        arn: String,
        url: String,
        attributes: QueueAttributes,
    ) -> Self {
        let now = now_secs();
        Queue {
            account_id,
            name,
            arn,
            url,
            attributes,
            pending: VecDeque::new(),
            inflight: HashMap::new(),
            created_at: now,
            last_modified: now,
            last_purge: None,
        }
    }

    pub fn send_message(
        &mut self,
        body: String,
        delay_seconds: Option<i32>,
        message_attributes: HashMap<String, MessageAttributeValue>,
        sender_id: &str,
        limits: &Limits,
    ) -> Result<SendMessageResponse, SqsError> {
        if body.is_empty() {
            return Err(SqsError::InvalidMessageContents(
                "Message body must not be empty".into(),
            ));
        }
        if body.len() > self.attributes.maximum_message_size as usize {
            return Err(SqsError::InvalidParameterValue(format!(
                "Message body must be shorter than {} bytes",
                self.attributes.maximum_message_size
            )));
        }
        let delay = match delay_seconds {
            Some(d) if d < 0 || d as u32 > limits.delay_seconds_max => {
                return Err(SqsError::InvalidParameterValue(format!(
                    "DelaySeconds must be between 0 and {}",
                    limits.delay_seconds_max
                )));
            }
            Some(d) => d as u64,
            None => u64::from(self.attributes.delay_seconds),
        };
        crate::attributes::validate_message_attributes(&message_attributes, limits)?;

        let msg = Message::new(
            body,
            message_attributes,
            sender_id,
            Duration::from_secs(delay),
        );
        let response = SendMessageResponse {
            message_id: msg.message_id.clone(),
            md5_of_message_body: msg.md5_of_body.clone(),
            md5_of_message_attributes: msg.md5_of_message_attributes.clone(),
        };
        debug!(queue = %self.name, message_id = %msg.message_id, delay, "stored message");
        self.pending.push_back(msg);
        Ok(response)
    }

    /// Returns expired in-flight messages to the Available state, handing
    /// back the ones that exceeded the redrive budget. Generation is not
    /// touched; the next receive bumps it.
    pub fn reclaim_expired(&mut self, now: Instant) -> Vec<DlqRedrive> {
        let expired: Vec<String> = self
            .inflight
            .iter()
            .filter(|(_, m)| m.visibility_deadline.is_some_and(|d| now >= d))
            .map(|(id, _)| id.clone())
            .collect();

        let mut redrives = Vec::new();
        for id in expired {
            if let Some(mut msg) = self.inflight.remove(&id) {
                msg.visibility_deadline = None;
                msg.visible_at = now;

                if let Some(ref rp) = self.attributes.redrive_policy {
                    if msg.receive_count > rp.max_receive_count {
                        debug!(
                            queue = %self.name,
                            message_id = %msg.message_id,
                            receive_count = msg.receive_count,
                            "receive count exceeded, redriving"
                        );
                        redrives.push(DlqRedrive {
                            dlq_arn: rp.dead_letter_target_arn.clone(),
                            message: msg,
                        });
                        continue;
                    }
                }
                self.pending.push_back(msg);
            }
        }
        redrives
    }

    /// Accepts a message arriving from a source queue's redrive move. The
    /// original send timestamp and receive count are preserved.
    pub fn accept_redrive(&mut self, mut msg: Message, now: Instant) {
        msg.visibility_deadline = None;
        msg.visible_at = now;
        self.pending.push_back(msg);
    }

    /// Transitions up to `max_count` Available messages to InFlight and
    /// issues a receipt handle for each. Messages past their retention
    /// period are dropped instead of delivered.
    pub fn receive(
        &mut self,
        max_count: usize,
        visibility_override: Option<u32>,
        codec: &ReceiptCodec,
        now: Instant,
    ) -> Vec<ReceiveMessageResult> {
        let vis_timeout =
            u64::from(visibility_override.unwrap_or(self.attributes.visibility_timeout));
        let now_ms = now_millis();
        let retention_cutoff = now_ms
            .saturating_sub(u64::from(self.attributes.message_retention_period) * 1000);

        let mut results = Vec::new();
        let mut i = 0;
        while i < self.pending.len() && results.len() < max_count {
            if self.pending[i].sent_timestamp < retention_cutoff {
                let dropped = self.pending.remove(i);
                if let Some(dropped) = dropped {
                    debug!(
                        queue = %self.name,
                        message_id = %dropped.message_id,
                        "dropping message past retention period"
                    );
                }
                continue;
            }
            if self.pending[i].visible_at > now {
                i += 1;
                continue;
            }

            let mut msg = match self.pending.remove(i) {
                Some(msg) => msg,
                None => break,
            };
            msg.receive_count += 1;
            msg.generation += 1;
            if msg.first_receive_timestamp.is_none() {
                msg.first_receive_timestamp = Some(now_ms);
            }
            msg.visibility_deadline = Some(now + Duration::from_secs(vis_timeout));
            let receipt_handle =
                codec.issue(&self.account_id, &self.name, &msg.message_id, msg.generation);

            let mut sys_attrs = HashMap::new();
            sys_attrs.insert("SenderId".to_string(), msg.sender_id.clone());
            sys_attrs.insert("SentTimestamp".to_string(), msg.sent_timestamp.to_string());
            sys_attrs.insert(
                "ApproximateReceiveCount".to_string(),
                msg.receive_count.to_string(),
            );
            if let Some(first) = msg.first_receive_timestamp {
                sys_attrs.insert(
                    "ApproximateFirstReceiveTimestamp".to_string(),
                    first.to_string(),
                );
            }

            results.push(ReceiveMessageResult {
                message_id: msg.message_id.clone(),
                receipt_handle,
                body: msg.body.clone(),
                md5_of_body: msg.md5_of_body.clone(),
                md5_of_message_attributes: msg.md5_of_message_attributes.clone(),
                attributes: Some(sys_attrs),
                message_attributes: if msg.message_attributes.is_empty() {
                    None
                } else {
                    Some(msg.message_attributes.clone())
                },
            });
            self.inflight.insert(msg.message_id.clone(), msg);
        }
        results
    }

    /// Deletes the message if `generation` still matches, wherever it
    /// currently sits. Returns false when the message is gone or the handle
    /// generation is stale; callers treat that as a no-op success.
    pub fn delete(&mut self, message_id: &str, generation: u64) -> bool {
        if let Some(msg) = self.inflight.get(message_id) {
            if msg.generation == generation {
                self.inflight.remove(message_id);
                return true;
            }
            return false;
        }
        if let Some(pos) = self
            .pending
            .iter()
            .position(|m| m.message_id == message_id && m.generation == generation)
        {
            self.pending.remove(pos);
            return true;
        }
        false
    }

    /// Adjusts the visibility deadline of a message held under the given
    /// generation. Timeout zero returns it to Available immediately and is
    /// also accepted when the visibility already lapsed (the message sits
    /// Available with the generation still matching); a non-zero timeout
    /// requires the message to actually be in flight. The generation stays
    /// unchanged either way.
    pub fn change_visibility(
        &mut self,
        message_id: &str,
        generation: u64,
        timeout_secs: u32,
        now: Instant,
    ) -> Result<(), SqsError> {
        let not_in_flight =
            || SqsError::InvalidParameterValue("Message is not in flight".into());

        let held = self
            .inflight
            .get(message_id)
            .map(|m| (m.generation == generation, m.visibility_deadline.is_some_and(|d| d > now)));
        match held {
            Some((false, _)) => Err(not_in_flight()),
            Some((true, still_hidden)) => {
                if timeout_secs == 0 {
                    let mut msg = self.inflight.remove(message_id).expect("present above");
                    msg.visibility_deadline = None;
                    msg.visible_at = now;
                    self.pending.push_back(msg);
                    Ok(())
                } else if still_hidden {
                    let msg = self.inflight.get_mut(message_id).expect("present above");
                    msg.visibility_deadline =
                        Some(now + Duration::from_secs(u64::from(timeout_secs)));
                    Ok(())
                } else {
                    Err(not_in_flight())
                }
            }
            None => {
                let in_pending = self
                    .pending
                    .iter()
                    .any(|m| m.message_id == message_id && m.generation == generation);
                if in_pending && timeout_secs == 0 {
                    // already visible, nothing to change
                    return Ok(());
                }
                Err(not_in_flight())
            }
        }
    }

    pub fn purge(&mut self, now: Instant) -> Result<(), SqsError> {
        if let Some(last) = self.last_purge {
            if now.duration_since(last) < Duration::from_secs(60) {
                return Err(SqsError::PurgeQueueInProgress(
                    "A purge was already initiated within the last 60 seconds".into(),
                ));
            }
        }
        self.pending.clear();
        self.inflight.clear();
        self.last_purge = Some(now);
        Ok(())
    }

    /// Installs a fully validated attribute set. Validation happens in the
    /// store so the dead-letter target can be checked against the queue map
    /// before anything is committed.
    pub fn replace_attributes(&mut self, attrs: QueueAttributes) {
        self.attributes = attrs;
        self.last_modified = now_secs();
    }

    pub fn get_attributes(&self, names: &Option<Vec<String>>) -> HashMap<String, String> {
        let all = match names {
            None => true,
            Some(names) => names.is_empty() || names.iter().any(|n| n == "All"),
        };
        let include = |attr_name: &str| -> bool {
            all || names
                .as_ref()
                .map(|n| n.iter().any(|x| x == attr_name))
                .unwrap_or(false)
        };

        let mut result = HashMap::new();
        for (k, v) in self.attributes.to_map() {
            if include(&k) {
                result.insert(k, v);
            }
        }

        let now = Instant::now();
        if include("QueueArn") {
            result.insert("QueueArn".into(), self.arn.clone());
        }
        if include("CreatedTimestamp") {
            result.insert("CreatedTimestamp".into(), self.created_at.to_string());
        }
        if include("LastModifiedTimestamp") {
            result.insert(
                "LastModifiedTimestamp".into(),
                self.last_modified.to_string(),
            );
        }
        if include("ApproximateNumberOfMessages") {
            let visible = self
                .pending
                .iter()
                .filter(|m| m.visible_at <= now)
                .count();
            result.insert("ApproximateNumberOfMessages".into(), visible.to_string());
        }
        if include("ApproximateNumberOfMessagesNotVisible") {
            result.insert(
                "ApproximateNumberOfMessagesNotVisible".into(),
                self.inflight.len().to_string(),
            );
        }
        if include("ApproximateNumberOfMessagesDelayed") {
            let delayed = self
                .pending
                .iter()
                .filter(|m| m.visible_at > now)
                .count();
            result.insert(
                "ApproximateNumberOfMessagesDelayed".into(),
                delayed.to_string(),
            );
        }
        result
    }

    /// The earliest future instant at which a message changes state on its
    /// own: a delay elapsing or a visibility deadline expiring. Long-poll
    /// waiters bound their sleep by this so lazy expiry stays observable on
    /// time.
    pub fn next_transition_at(&self, now: Instant) -> Option<Instant> {
        let next_delay = self
            .pending
            .iter()
            .filter(|m| m.visible_at > now)
            .map(|m| m.visible_at)
            .min();
        let next_expiry = self
            .inflight
            .values()
            .filter_map(|m| m.visibility_deadline)
            .filter(|d| *d > now)
            .min();
        match (next_delay, next_expiry) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// (delayed, available, in-flight, oldest message sent-timestamp millis)
    pub fn depth(&self, now: Instant) -> (u64, u64, u64, Option<u64>) {
        let mut delayed = 0;
        let mut available = 0;
        let mut in_flight = 0;
        let mut oldest: Option<u64> = None;
        for msg in self.pending.iter().chain(self.inflight.values()) {
            match msg.state_at(now) {
                MessageState::Delayed => delayed += 1,
                MessageState::Available => available += 1,
                MessageState::InFlight => in_flight += 1,
            }
            oldest = Some(oldest.map_or(msg.sent_timestamp, |o| o.min(msg.sent_timestamp)));
        }
        (delayed, available, in_flight, oldest)
    }
}

//! The queue store and the operations exposed over the wire.
//!
//! All queues live behind one async mutex; mutating a message is therefore
//! atomic with respect to every other operation. The only suspension point
//! is the long-poll wait, which never holds the lock: waiters register
//! interest in the queue's `Notify` while still locked, then sleep under a
//! timeout bounded by both the wait deadline and the queue's next
//! delay/visibility transition.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, Notify};
use tracing::{debug, info};

use crate::attributes::{validate_queue_name, QueueAttributes, RedrivePolicy};
use crate::auth::{AllowAll, AuthorizationGate, CallerIdentity, Decision};
use crate::error::SqsError;
use crate::limits::Limits;
use crate::message::now_millis;
use crate::metrics::{DepthSnapshot, ServiceMetrics};
use crate::queue::Queue;
use crate::receipt::{ReceiptCodec, ReceiptToken};
use crate::types::*;

type QueueKey = (String, String);

struct QueueEntry {
    queue: Queue,
    notify: Arc<Notify>,
}

struct Inner {
    queues: HashMap<QueueKey, QueueEntry>,
    /// Accounts this store has ever seen. Receipt handles naming an account
    /// outside this set are a 404; a known-but-different account is a 403.
    accounts: HashSet<String>,
}

pub struct SqsState {
    inner: Mutex<Inner>,
    account_id: String,
    region: String,
    base_url: String,
    limits: Limits,
    codec: ReceiptCodec,
    metrics: Arc<ServiceMetrics>,
    gate: Arc<dyn AuthorizationGate>,
}

impl SqsState {
    pub fn new(account_id: String, region: String, port: u16) -> Self {
        let mut accounts = HashSet::new();
        accounts.insert(account_id.clone());
        SqsState {
            inner: Mutex::new(Inner {
                queues: HashMap::new(),
                accounts,
            }),
            account_id,
            region,
            base_url: format!("http://localhost:{port}"),
            limits: Limits::default(),
            codec: ReceiptCodec::new(),
            metrics: Arc::new(ServiceMetrics::default()),
            gate: Arc::new(AllowAll),
        }
    }

    pub fn with_gate(mut self, gate: Arc<dyn AuthorizationGate>) -> Self {
        self.gate = gate;
        self
    }

    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    pub fn metrics(&self) -> &ServiceMetrics {
        &self.metrics
    }

    /// Identity requests run under when the front end supplies none.
    pub fn default_caller(&self) -> CallerIdentity {
        CallerIdentity::new(self.account_id.clone())
    }

    fn queue_arn(&self, account: &str, name: &str) -> String {
        format!("arn:aws:sqs:{}:{}:{}", self.region, account, name)
    }

    fn resolve_queue_path(queue_url: &str) -> Result<(String, String), SqsError> {
        let mut segments = queue_url.trim_end_matches('/').rsplit('/');
        let name = segments.next().filter(|s| !s.is_empty());
        let account = segments.next().filter(|s| !s.is_empty());
        match (account, name) {
            (Some(account), Some(name)) => Ok((account.to_string(), name.to_string())),
            _ => Err(SqsError::QueueDoesNotExist("Invalid queue URL".into())),
        }
    }

    fn parse_queue_arn(arn: &str) -> Option<(String, String)> {
        let parts: Vec<&str> = arn.split(':').collect();
        if parts.len() != 6 || parts[0] != "arn" || parts[2] != "sqs" {
            return None;
        }
        Some((parts[4].to_string(), parts[5].to_string()))
    }

    /// Gate check performed before every operation. An account the store has
    /// never seen is a 404; a denial from the gate is a 403.
    fn authorize(
        &self,
        inner: &Inner,
        caller: &CallerIdentity,
        action: &str,
        account: &str,
        name: &str,
    ) -> Result<(), SqsError> {
        if !inner.accounts.contains(account) {
            return Err(SqsError::NonExistentAccount(format!(
                "The account {account} does not exist"
            )));
        }
        let arn = self.queue_arn(account, name);
        match self.gate.authorize(caller, action, &arn) {
            Decision::Allow => Ok(()),
            Decision::Deny => Err(SqsError::AccessDenied(format!(
                "Access to {arn} is denied for {}",
                caller.account_id
            ))),
        }
    }

    fn validate_redrive_target(
        inner: &Inner,
        account: &str,
        region: &str,
        policy: &RedrivePolicy,
    ) -> Result<(), SqsError> {
        let Some((dlq_account, dlq_name)) = Self::parse_queue_arn(&policy.dead_letter_target_arn)
        else {
            return Err(SqsError::InvalidParameterValue(format!(
                "Invalid dead-letter target ARN: {}",
                policy.dead_letter_target_arn
            )));
        };
        let parts: Vec<&str> = policy.dead_letter_target_arn.split(':').collect();
        if parts[3] != region {
            return Err(SqsError::InvalidParameterValue(
                "Dead-letter queue must be in the same region".into(),
            ));
        }
        if dlq_account != account {
            return Err(SqsError::InvalidParameterValue(
                "Dead-letter queue must belong to the same account".into(),
            ));
        }
        if !inner.queues.contains_key(&(dlq_account, dlq_name)) {
            return Err(SqsError::InvalidParameterValue(format!(
                "Dead-letter queue does not exist: {}",
                policy.dead_letter_target_arn
            )));
        }
        Ok(())
    }

    fn validate_batch_ids(&self, ids: &[&str]) -> Result<(), SqsError> {
        if ids.is_empty() {
            return Err(SqsError::EmptyBatchRequest(
                "Batch request must contain at least one entry".into(),
            ));
        }
        if ids.len() > self.limits.batch_entries_max {
            return Err(SqsError::TooManyEntriesInBatchRequest(format!(
                "Batch request must contain at most {} entries",
                self.limits.batch_entries_max
            )));
        }
        let mut seen = HashSet::new();
        for id in ids {
            let valid = !id.is_empty()
                && id.len() <= self.limits.batch_id_len_max
                && id
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
            if !valid {
                return Err(SqsError::InvalidBatchEntryId(format!(
                    "Invalid batch entry Id: {id}"
                )));
            }
            if !seen.insert(*id) {
                return Err(SqsError::BatchEntryIdsNotDistinct(
                    "Batch entry IDs must be distinct".into(),
                ));
            }
        }
        Ok(())
    }

    /// Moves expired in-flight messages back to Available and applies any
    /// redrive handoffs, all under the store lock so a message is never
    /// observable in both queues or neither.
    fn reclaim_and_redrive(&self, inner: &mut Inner, account: &str, name: &str) {
        let key = (account.to_string(), name.to_string());
        let now = Instant::now();
        let redrives = match inner.queues.get_mut(&key) {
            Some(entry) => entry.queue.reclaim_expired(now),
            None => return,
        };
        for redrive in redrives {
            let Some(dlq_key) = Self::parse_queue_arn(&redrive.dlq_arn) else {
                continue;
            };
            if let Some(dlq) = inner.queues.get_mut(&dlq_key) {
                debug!(
                    source = %name,
                    dlq = %dlq_key.1,
                    message_id = %redrive.message.message_id,
                    "moving message to dead-letter queue"
                );
                dlq.queue.accept_redrive(redrive.message, now);
                dlq.notify.notify_waiters();
                self.metrics.record_redriven(1);
            }
            // a deleted DLQ drops the message, as AWS does
        }
    }

    /// Checks a verified receipt token against the queue it is being used
    /// on: unknown embedded account -> 404, foreign account -> 403, wrong
    /// queue -> invalid handle.
    fn check_token_scope(
        inner: &Inner,
        token: &ReceiptToken,
        account: &str,
        name: &str,
    ) -> Result<(), SqsError> {
        if !inner.accounts.contains(&token.account_id) {
            return Err(SqsError::NonExistentAccount(format!(
                "The account {} does not exist",
                token.account_id
            )));
        }
        if token.account_id != account {
            return Err(SqsError::AccessDenied(
                "The receipt handle belongs to a different account".into(),
            ));
        }
        if token.queue_name != name {
            return Err(SqsError::ReceiptHandleIsInvalid(
                "The receipt handle was issued for a different queue".into(),
            ));
        }
        Ok(())
    }

    // --- Queue administration ---

    pub async fn create_queue(
        &self,
        caller: &CallerIdentity,
        req: CreateQueueRequest,
    ) -> Result<CreateQueueResponse, SqsError> {
        validate_queue_name(&req.queue_name, &self.limits)?;

        let mut inner = self.inner.lock().await;
        let account = caller.account_id.clone();
        inner.accounts.insert(account.clone());
        self.authorize(&inner, caller, "sqs:CreateQueue", &account, &req.queue_name)?;

        let key = (account.clone(), req.queue_name.clone());
        if let Some(entry) = inner.queues.get(&key) {
            if let Some(ref attrs) = req.attributes {
                if !attrs.is_empty() {
                    let mut candidate = entry.queue.attributes.clone();
                    candidate.apply(attrs, &self.limits)?;
                    if candidate != entry.queue.attributes {
                        return Err(SqsError::QueueAlreadyExists(format!(
                            "A queue named {} already exists with different attributes",
                            req.queue_name
                        )));
                    }
                }
            }
            return Ok(CreateQueueResponse {
                queue_url: entry.queue.url.clone(),
            });
        }

        let mut attributes = QueueAttributes::default();
        if let Some(ref attrs) = req.attributes {
            attributes.apply(attrs, &self.limits)?;
        }
        if let Some(ref rp) = attributes.redrive_policy {
            Self::validate_redrive_target(&inner, &account, &self.region, rp)?;
        }

        let url = format!("{}/{}/{}", self.base_url, account, req.queue_name);
        let arn = self.queue_arn(&account, &req.queue_name);
        info!(queue = %req.queue_name, account = %account, "creating queue");
        inner.queues.insert(
            key,
            QueueEntry {
                queue: Queue::new(account, req.queue_name, arn, url.clone(), attributes),
                notify: Arc::new(Notify::new()),
            },
        );
        Ok(CreateQueueResponse { queue_url: url })
    }

    pub async fn delete_queue(
        &self,
        caller: &CallerIdentity,
        req: DeleteQueueRequest,
    ) -> Result<(), SqsError> {
        let (account, name) = Self::resolve_queue_path(&req.queue_url)?;
        let mut inner = self.inner.lock().await;
        self.authorize(&inner, caller, "sqs:DeleteQueue", &account, &name)?;
        match inner.queues.remove(&(account.clone(), name.clone())) {
            Some(entry) => {
                info!(queue = %name, account = %account, "deleting queue");
                // wake blocked receives so they observe the deletion
                entry.notify.notify_waiters();
                Ok(())
            }
            None => Err(SqsError::QueueDoesNotExist(
                "The specified queue does not exist".into(),
            )),
        }
    }

    pub async fn get_queue_url(
        &self,
        caller: &CallerIdentity,
        req: GetQueueUrlRequest,
    ) -> Result<GetQueueUrlResponse, SqsError> {
        let account = req
            .queue_owner_a_w_s_account_id
            .clone()
            .unwrap_or_else(|| caller.account_id.clone());
        let inner = self.inner.lock().await;
        self.authorize(&inner, caller, "sqs:GetQueueUrl", &account, &req.queue_name)?;
        inner
            .queues
            .get(&(account, req.queue_name.clone()))
            .map(|e| GetQueueUrlResponse {
                queue_url: e.queue.url.clone(),
            })
            .ok_or_else(|| {
                SqsError::QueueDoesNotExist("The specified queue does not exist".into())
            })
    }

    pub async fn list_queues(
        &self,
        caller: &CallerIdentity,
        req: ListQueuesRequest,
    ) -> Result<ListQueuesResponse, SqsError> {
        let inner = self.inner.lock().await;
        self.authorize(&inner, caller, "sqs:ListQueues", &caller.account_id, "*")?;
        let max = req.max_results.unwrap_or(1000).clamp(1, 1000) as usize;

        let mut names: Vec<&String> = inner
            .queues
            .keys()
            .filter(|(account, _)| *account == caller.account_id)
            .map(|(_, name)| name)
            .collect();
        names.sort();
        if let Some(ref prefix) = req.queue_name_prefix {
            names.retain(|n| n.starts_with(prefix.as_str()));
        }

        let start = if let Some(ref token) = req.next_token {
            names
                .iter()
                .position(|n| n.as_str() > token.as_str())
                .unwrap_or(names.len())
        } else {
            0
        };

        let page: Vec<String> = names[start..]
            .iter()
            .take(max)
            .map(|n| {
                inner.queues[&(caller.account_id.clone(), (*n).clone())]
                    .queue
                    .url
                    .clone()
            })
            .collect();
        let next_token = if start + max < names.len() {
            names.get(start + max).map(|n| (*n).clone())
        } else {
            None
        };

        Ok(ListQueuesResponse {
            queue_urls: if page.is_empty() { None } else { Some(page) },
            next_token,
        })
    }

    pub async fn get_queue_attributes(
        &self,
        caller: &CallerIdentity,
        req: GetQueueAttributesRequest,
    ) -> Result<GetQueueAttributesResponse, SqsError> {
        let (account, name) = Self::resolve_queue_path(&req.queue_url)?;
        let mut inner = self.inner.lock().await;
        self.authorize(&inner, caller, "sqs:GetQueueAttributes", &account, &name)?;
        // settle expired visibility first so the approximate counts are honest
        self.reclaim_and_redrive(&mut inner, &account, &name);
        let entry = inner.queues.get(&(account, name)).ok_or_else(|| {
            SqsError::QueueDoesNotExist("The specified queue does not exist".into())
        })?;
        Ok(GetQueueAttributesResponse {
            attributes: entry.queue.get_attributes(&req.attribute_names),
        })
    }

    pub async fn set_queue_attributes(
        &self,
        caller: &CallerIdentity,
        req: SetQueueAttributesRequest,
    ) -> Result<(), SqsError> {
        let (account, name) = Self::resolve_queue_path(&req.queue_url)?;
        let mut inner = self.inner.lock().await;
        self.authorize(&inner, caller, "sqs:SetQueueAttributes", &account, &name)?;

        let key = (account.clone(), name.clone());
        let entry = inner.queues.get(&key).ok_or_else(|| {
            SqsError::QueueDoesNotExist("The specified queue does not exist".into())
        })?;
        let mut candidate = entry.queue.attributes.clone();
        candidate.apply(&req.attributes, &self.limits)?;
        if let Some(ref rp) = candidate.redrive_policy {
            Self::validate_redrive_target(&inner, &account, &self.region, rp)?;
        }
        let entry = inner.queues.get_mut(&key).expect("looked up above");
        entry.queue.replace_attributes(candidate);
        Ok(())
    }

    pub async fn purge_queue(
        &self,
        caller: &CallerIdentity,
        req: PurgeQueueRequest,
    ) -> Result<(), SqsError> {
        let (account, name) = Self::resolve_queue_path(&req.queue_url)?;
        let mut inner = self.inner.lock().await;
        self.authorize(&inner, caller, "sqs:PurgeQueue", &account, &name)?;
        let entry = inner.queues.get_mut(&(account, name)).ok_or_else(|| {
            SqsError::QueueDoesNotExist("The specified queue does not exist".into())
        })?;
        entry.queue.purge(Instant::now())?;
        self.metrics.record_purge();
        Ok(())
    }

    pub async fn list_dead_letter_source_queues(
        &self,
        caller: &CallerIdentity,
        req: ListDeadLetterSourceQueuesRequest,
    ) -> Result<ListDeadLetterSourceQueuesResponse, SqsError> {
        let (account, name) = Self::resolve_queue_path(&req.queue_url)?;
        let inner = self.inner.lock().await;
        self.authorize(
            &inner,
            caller,
            "sqs:ListDeadLetterSourceQueues",
            &account,
            &name,
        )?;
        let entry = inner
            .queues
            .get(&(account.clone(), name))
            .ok_or_else(|| {
                SqsError::QueueDoesNotExist("The specified queue does not exist".into())
            })?;
        let target_arn = entry.queue.arn.clone();

        let mut source_urls: Vec<String> = inner
            .queues
            .iter()
            .filter(|((acct, _), e)| {
                *acct == account
                    && e.queue
                        .attributes
                        .redrive_policy
                        .as_ref()
                        .is_some_and(|rp| rp.dead_letter_target_arn == target_arn)
            })
            .map(|(_, e)| e.queue.url.clone())
            .collect();
        source_urls.sort();

        let max = req.max_results.unwrap_or(1000).clamp(1, 1000) as usize;
        let start = if let Some(ref token) = req.next_token {
            source_urls
                .iter()
                .position(|u| u.as_str() > token.as_str())
                .unwrap_or(source_urls.len())
        } else {
            0
        };
        let page: Vec<String> = source_urls[start..].iter().take(max).cloned().collect();
        let next_token = if start + max < source_urls.len() {
            source_urls.get(start + max).cloned()
        } else {
            None
        };

        Ok(ListDeadLetterSourceQueuesResponse {
            queue_urls: page,
            next_token,
        })
    }

    // --- Messages ---

    pub async fn send_message(
        &self,
        caller: &CallerIdentity,
        req: SendMessageRequest,
    ) -> Result<SendMessageResponse, SqsError> {
        let (account, name) = Self::resolve_queue_path(&req.queue_url)?;
        let mut inner = self.inner.lock().await;
        self.authorize(&inner, caller, "sqs:SendMessage", &account, &name)?;
        let entry = inner.queues.get_mut(&(account, name)).ok_or_else(|| {
            SqsError::QueueDoesNotExist("The specified queue does not exist".into())
        })?;

        let result = entry.queue.send_message(
            req.message_body,
            req.delay_seconds,
            req.message_attributes.unwrap_or_default(),
            &caller.account_id,
            &self.limits,
        )?;
        self.metrics.record_sent(1);
        entry.notify.notify_waiters();
        Ok(result)
    }

    pub async fn send_message_batch(
        &self,
        caller: &CallerIdentity,
        req: SendMessageBatchRequest,
    ) -> Result<SendMessageBatchResponse, SqsError> {
        let ids: Vec<&str> = req.entries.iter().map(|e| e.id.as_str()).collect();
        self.validate_batch_ids(&ids)?;

        let (account, name) = Self::resolve_queue_path(&req.queue_url)?;
        let mut inner = self.inner.lock().await;
        self.authorize(&inner, caller, "sqs:SendMessage", &account, &name)?;
        let entry = inner.queues.get_mut(&(account, name)).ok_or_else(|| {
            SqsError::QueueDoesNotExist("The specified queue does not exist".into())
        })?;

        let mut successful = Vec::new();
        let mut failed = Vec::new();
        for e in req.entries {
            match entry.queue.send_message(
                e.message_body,
                e.delay_seconds,
                e.message_attributes.unwrap_or_default(),
                &caller.account_id,
                &self.limits,
            ) {
                Ok(resp) => successful.push(SendMessageBatchResultEntry {
                    id: e.id,
                    message_id: resp.message_id,
                    md5_of_message_body: resp.md5_of_message_body,
                    md5_of_message_attributes: resp.md5_of_message_attributes,
                }),
                Err(err) => failed.push(BatchResultErrorEntry {
                    id: e.id,
                    code: err.error_code().to_string(),
                    message: err.to_string(),
                    sender_fault: true,
                }),
            }
        }

        if !successful.is_empty() {
            self.metrics.record_sent(successful.len() as u64);
            entry.notify.notify_waiters();
        }
        Ok(SendMessageBatchResponse { successful, failed })
    }

    pub async fn receive_message(
        &self,
        caller: &CallerIdentity,
        req: ReceiveMessageRequest,
    ) -> Result<ReceiveMessageResponse, SqsError> {
        let (account, name) = Self::resolve_queue_path(&req.queue_url)?;

        // parameter bounds fail before any wait begins
        let max_count = req.max_number_of_messages.unwrap_or(1);
        if max_count < 1 || max_count > self.limits.receive_max_messages as i32 {
            return Err(SqsError::InvalidParameterValue(format!(
                "MaxNumberOfMessages must be between 1 and {}",
                self.limits.receive_max_messages
            )));
        }
        if let Some(w) = req.wait_time_seconds {
            if w < 0 || w > self.limits.receive_wait_time_max as i32 {
                return Err(SqsError::InvalidParameterValue(format!(
                    "WaitTimeSeconds must be between 0 and {}",
                    self.limits.receive_wait_time_max
                )));
            }
        }
        if let Some(v) = req.visibility_timeout {
            if v < 0 || v > self.limits.visibility_timeout_max as i32 {
                return Err(SqsError::InvalidParameterValue(format!(
                    "VisibilityTimeout must be between 0 and {}",
                    self.limits.visibility_timeout_max
                )));
            }
        }
        let vis_override = req.visibility_timeout.map(|v| v as u32);
        let key = (account.clone(), name.clone());

        let mut authorized = false;
        let mut wait_deadline: Option<Instant> = None;
        loop {
            let mut inner = self.inner.lock().await;
            if !authorized {
                self.authorize(&inner, caller, "sqs:ReceiveMessage", &account, &name)?;
                authorized = true;
            }
            self.reclaim_and_redrive(&mut inner, &account, &name);
            let entry = inner.queues.get_mut(&key).ok_or_else(|| {
                SqsError::QueueDoesNotExist("The specified queue does not exist".into())
            })?;

            let now = Instant::now();
            let results =
                entry
                    .queue
                    .receive(max_count as usize, vis_override, &self.codec, now);
            if !results.is_empty() {
                self.metrics.record_received(results.len() as u64);
                let results = filter_receive_results(
                    results,
                    &req.attribute_names,
                    &req.message_attribute_names,
                );
                return Ok(ReceiveMessageResponse {
                    messages: Some(results),
                });
            }

            let deadline = *wait_deadline.get_or_insert_with(|| {
                let wait = req.wait_time_seconds.map(|w| w as u64).unwrap_or(u64::from(
                    entry.queue.attributes.receive_message_wait_time_seconds,
                ));
                now + Duration::from_secs(wait)
            });
            if now >= deadline {
                self.metrics.record_empty_receive();
                return Ok(ReceiveMessageResponse { messages: None });
            }

            // Sleep until whichever comes first: the wait deadline, the next
            // delay/visibility transition, or a notification. Interest is
            // registered while still holding the lock, so an arrival between
            // unlock and sleep cannot be missed.
            let mut wake_at = deadline;
            if let Some(next) = entry.queue.next_transition_at(now) {
                wake_at = wake_at.min(next);
            }
            let notify = entry.notify.clone();
            let notified = notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            drop(inner);
            let _ = tokio::time::timeout(wake_at.saturating_duration_since(now), notified).await;
        }
    }

    pub async fn delete_message(
        &self,
        caller: &CallerIdentity,
        req: DeleteMessageRequest,
    ) -> Result<(), SqsError> {
        let (account, name) = Self::resolve_queue_path(&req.queue_url)?;
        let mut inner = self.inner.lock().await;
        self.authorize(&inner, caller, "sqs:DeleteMessage", &account, &name)?;
        if !inner.queues.contains_key(&(account.clone(), name.clone())) {
            return Err(SqsError::QueueDoesNotExist(
                "The specified queue does not exist".into(),
            ));
        }

        let token = self.codec.verify(&req.receipt_handle)?;
        Self::check_token_scope(&inner, &token, &account, &name)?;
        let entry = inner
            .queues
            .get_mut(&(account, name))
            .expect("checked above");
        // stale generation or vanished message: deliberate no-op
        if entry.queue.delete(&token.message_id, token.generation) {
            self.metrics.record_deleted(1);
        }
        Ok(())
    }

    pub async fn delete_message_batch(
        &self,
        caller: &CallerIdentity,
        req: DeleteMessageBatchRequest,
    ) -> Result<DeleteMessageBatchResponse, SqsError> {
        let ids: Vec<&str> = req.entries.iter().map(|e| e.id.as_str()).collect();
        self.validate_batch_ids(&ids)?;

        let (account, name) = Self::resolve_queue_path(&req.queue_url)?;
        let mut inner = self.inner.lock().await;
        self.authorize(&inner, caller, "sqs:DeleteMessage", &account, &name)?;
        if !inner.queues.contains_key(&(account.clone(), name.clone())) {
            return Err(SqsError::QueueDoesNotExist(
                "The specified queue does not exist".into(),
            ));
        }

        let mut successful = Vec::new();
        let mut failed = Vec::new();
        let mut deleted = 0u64;
        for e in req.entries {
            let outcome = self
                .codec
                .verify(&e.receipt_handle)
                .and_then(|token| {
                    Self::check_token_scope(&inner, &token, &account, &name).map(|()| token)
                });
            match outcome {
                Ok(token) => {
                    let entry = inner
                        .queues
                        .get_mut(&(account.clone(), name.clone()))
                        .expect("checked above");
                    if entry.queue.delete(&token.message_id, token.generation) {
                        deleted += 1;
                    }
                    successful.push(DeleteMessageBatchResultEntry { id: e.id });
                }
                Err(err) => failed.push(BatchResultErrorEntry {
                    id: e.id,
                    code: err.error_code().to_string(),
                    message: err.to_string(),
                    sender_fault: true,
                }),
            }
        }
        if deleted > 0 {
            self.metrics.record_deleted(deleted);
        }
        Ok(DeleteMessageBatchResponse { successful, failed })
    }

    pub async fn change_message_visibility(
        &self,
        caller: &CallerIdentity,
        req: ChangeMessageVisibilityRequest,
    ) -> Result<(), SqsError> {
        let (account, name) = Self::resolve_queue_path(&req.queue_url)?;
        let timeout = self.validate_visibility_timeout(req.visibility_timeout)?;

        let mut inner = self.inner.lock().await;
        self.authorize(
            &inner,
            caller,
            "sqs:ChangeMessageVisibility",
            &account,
            &name,
        )?;
        if !inner.queues.contains_key(&(account.clone(), name.clone())) {
            return Err(SqsError::QueueDoesNotExist(
                "The specified queue does not exist".into(),
            ));
        }

        let token = self.codec.verify(&req.receipt_handle)?;
        Self::check_token_scope(&inner, &token, &account, &name)?;
        let entry = inner
            .queues
            .get_mut(&(account, name))
            .expect("checked above");
        entry
            .queue
            .change_visibility(&token.message_id, token.generation, timeout, Instant::now())?;
        if timeout == 0 {
            entry.notify.notify_waiters();
        }
        Ok(())
    }

    pub async fn change_message_visibility_batch(
        &self,
        caller: &CallerIdentity,
        req: ChangeMessageVisibilityBatchRequest,
    ) -> Result<ChangeMessageVisibilityBatchResponse, SqsError> {
        let ids: Vec<&str> = req.entries.iter().map(|e| e.id.as_str()).collect();
        self.validate_batch_ids(&ids)?;

        let (account, name) = Self::resolve_queue_path(&req.queue_url)?;
        let mut inner = self.inner.lock().await;
        self.authorize(
            &inner,
            caller,
            "sqs:ChangeMessageVisibility",
            &account,
            &name,
        )?;
        if !inner.queues.contains_key(&(account.clone(), name.clone())) {
            return Err(SqsError::QueueDoesNotExist(
                "The specified queue does not exist".into(),
            ));
        }

        let mut successful = Vec::new();
        let mut failed = Vec::new();
        let mut any_released = false;
        for e in req.entries {
            let outcome = self
                .validate_visibility_timeout(e.visibility_timeout)
                .and_then(|timeout| {
                    let token = self.codec.verify(&e.receipt_handle)?;
                    Self::check_token_scope(&inner, &token, &account, &name)?;
                    let entry = inner
                        .queues
                        .get_mut(&(account.clone(), name.clone()))
                        .expect("checked above");
                    entry.queue.change_visibility(
                        &token.message_id,
                        token.generation,
                        timeout,
                        Instant::now(),
                    )?;
                    Ok(timeout)
                });
            match outcome {
                Ok(timeout) => {
                    any_released |= timeout == 0;
                    successful.push(ChangeMessageVisibilityBatchResultEntry { id: e.id });
                }
                Err(err) => failed.push(BatchResultErrorEntry {
                    id: e.id,
                    code: err.error_code().to_string(),
                    message: err.to_string(),
                    sender_fault: true,
                }),
            }
        }
        if any_released {
            if let Some(entry) = inner.queues.get(&(account, name)) {
                entry.notify.notify_waiters();
            }
        }
        Ok(ChangeMessageVisibilityBatchResponse { successful, failed })
    }

    fn validate_visibility_timeout(&self, timeout: i32) -> Result<u32, SqsError> {
        if timeout < 0 || timeout > self.limits.visibility_timeout_max as i32 {
            return Err(SqsError::InvalidParameterValue(format!(
                "VisibilityTimeout must be between 0 and {}",
                self.limits.visibility_timeout_max
            )));
        }
        Ok(timeout as u32)
    }

    /// Aggregate per-state message counts and the oldest message age,
    /// consumed by the metrics reporter.
    pub async fn depth_snapshot(&self) -> DepthSnapshot {
        let inner = self.inner.lock().await;
        let now = Instant::now();
        let now_ms = now_millis();
        let mut snap = DepthSnapshot::default();
        let mut oldest: Option<u64> = None;
        for entry in inner.queues.values() {
            let (delayed, available, in_flight, queue_oldest) = entry.queue.depth(now);
            snap.queues += 1;
            snap.delayed += delayed;
            snap.available += available;
            snap.in_flight += in_flight;
            if let Some(ts) = queue_oldest {
                oldest = Some(oldest.map_or(ts, |o| o.min(ts)));
            }
        }
        if let Some(ts) = oldest {
            snap.oldest_message_age_secs = now_ms.saturating_sub(ts) / 1000;
        }
        snap
    }
}

fn filter_receive_results(
    results: Vec<ReceiveMessageResult>,
    attr_names: &Option<Vec<String>>,
    msg_attr_names: &Option<Vec<String>>,
) -> Vec<ReceiveMessageResult> {
    results
        .into_iter()
        .map(|mut r| {
            if let Some(ref names) = attr_names {
                if !names.iter().any(|n| n == "All") {
                    if let Some(ref attrs) = r.attributes {
                        let filtered: HashMap<String, String> = attrs
                            .iter()
                            .filter(|(k, _)| names.contains(k))
                            .map(|(k, v)| (k.clone(), v.clone()))
                            .collect();
                        r.attributes = if filtered.is_empty() {
                            None
                        } else {
                            Some(filtered)
                        };
                    }
                }
            } else {
                r.attributes = None;
            }

            if let Some(ref names) = msg_attr_names {
                if !names.iter().any(|n| n == "All") {
                    if let Some(ref attrs) = r.message_attributes {
                        let filtered: HashMap<String, MessageAttributeValue> = attrs
                            .iter()
                            .filter(|(k, _)| {
                                names.contains(k)
                                    || names.iter().any(|n| {
                                        n.ends_with(".*") && k.starts_with(&n[..n.len() - 2])
                                    })
                            })
                            .map(|(k, v)| (k.clone(), v.clone()))
                            .collect();
                        r.message_attributes = if filtered.is_empty() {
                            None
                        } else {
                            Some(filtered)
                        };
                    }
                }
            } else {
                r.message_attributes = None;
            }

            r
        })
        .collect()
}

//! Bounds for queue attributes and request parameters.
//!
//! Every documented [min, max] range lives here so validation reads from
//! configuration instead of scattered constants. Defaults match the AWS SQS
//! quotas for standard queues.

#[derive(Debug, Clone)]
pub struct Limits {
    /// DelaySeconds, queue attribute and per-send override. [0, max]
    pub delay_seconds_max: u32,
    /// VisibilityTimeout, queue attribute and per-receive/change override. [0, max]
    pub visibility_timeout_max: u32,
    /// MessageRetentionPeriod in seconds.
    pub message_retention_min: u32,
    pub message_retention_max: u32,
    /// MaximumMessageSize in bytes.
    pub maximum_message_size_min: u32,
    pub maximum_message_size_max: u32,
    /// ReceiveMessageWaitTimeSeconds, queue attribute and per-receive override. [0, max]
    pub receive_wait_time_max: u32,
    /// RedrivePolicy maxReceiveCount.
    pub max_receive_count_min: u32,
    pub max_receive_count_max: u32,
    /// MaxNumberOfMessages on ReceiveMessage. [1, max]
    pub receive_max_messages: u32,
    /// Entries per batch request. [1, max]
    pub batch_entries_max: usize,
    /// Batch entry Id length.
    pub batch_id_len_max: usize,
    /// Queue name length.
    pub queue_name_len_max: usize,
    /// Message attributes per message.
    pub message_attributes_max: usize,
    /// Message attribute name length.
    pub attribute_name_len_max: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Limits {
            delay_seconds_max: 900,
            visibility_timeout_max: 43_200,
            message_retention_min: 60,
            message_retention_max: 1_209_600,
            maximum_message_size_min: 1024,
            maximum_message_size_max: 262_144,
            receive_wait_time_max: 20,
            max_receive_count_min: 1,
            max_receive_count_max: 1000,
            receive_max_messages: 10,
            batch_entries_max: 10,
            batch_id_len_max: 80,
            queue_name_len_max: 80,
            message_attributes_max: 10,
            attribute_name_len_max: 256,
        }
    }
}

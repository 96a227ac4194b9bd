//! Queue and message attribute validation.
//!
//! Validation is pure: it parses and range-checks values against [`Limits`]
//! and returns normalized typed values, leaving all state changes to the
//! caller.

use std::collections::HashMap;

use base64::Engine;
use md5::{Digest as Md5Digest, Md5};
use serde::Deserialize;

use crate::error::SqsError;
use crate::limits::Limits;
use crate::types::MessageAttributeValue;

/// Attributes reported by GetQueueAttributes but derived from queue state.
/// Setting any of them is rejected.
pub const READ_ONLY_ATTRIBUTES: &[&str] = &[
    "QueueArn",
    "CreatedTimestamp",
    "LastModifiedTimestamp",
    "ApproximateNumberOfMessages",
    "ApproximateNumberOfMessagesNotVisible",
    "ApproximateNumberOfMessagesDelayed",
];

pub fn md5_hex(data: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// MD5 digest over message attributes, using the SQS encoding: attributes
/// sorted by name, each contributing length-prefixed name, data type, a
/// transport byte (1 = string, 2 = binary) and the length-prefixed value.
pub fn compute_md5_of_attributes(
    attrs: &HashMap<String, MessageAttributeValue>,
) -> Option<String> {
    if attrs.is_empty() {
        return None;
    }
    let mut keys: Vec<&String> = attrs.keys().collect();
    keys.sort();

    let mut buf: Vec<u8> = Vec::new();
    for key in keys {
        let attr = &attrs[key];
        let name_bytes = key.as_bytes();
        buf.extend_from_slice(&(name_bytes.len() as u32).to_be_bytes());
        buf.extend_from_slice(name_bytes);

        let dt_bytes = attr.data_type.as_bytes();
        buf.extend_from_slice(&(dt_bytes.len() as u32).to_be_bytes());
        buf.extend_from_slice(dt_bytes);

        if attr.data_type.starts_with("Binary") {
            buf.push(2);
            if let Some(ref bv) = attr.binary_value {
                let decoded = base64::engine::general_purpose::STANDARD
                    .decode(bv)
                    .unwrap_or_default();
                buf.extend_from_slice(&(decoded.len() as u32).to_be_bytes());
                buf.extend_from_slice(&decoded);
            }
        } else {
            buf.push(1);
            if let Some(ref sv) = attr.string_value {
                let sv_bytes = sv.as_bytes();
                buf.extend_from_slice(&(sv_bytes.len() as u32).to_be_bytes());
                buf.extend_from_slice(sv_bytes);
            }
        }
    }

    Some(md5_hex(&buf))
}

/// Routing of messages that exceeded their receive-count budget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedrivePolicy {
    pub dead_letter_target_arn: String,
    pub max_receive_count: u32,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RedrivePolicyWire {
    #[serde(rename = "deadLetterTargetArn")]
    dead_letter_target_arn: String,
    #[serde(rename = "maxReceiveCount")]
    max_receive_count: serde_json::Value,
}

impl RedrivePolicy {
    /// Parses the RedrivePolicy attribute value. The JSON object must contain
    /// exactly `deadLetterTargetArn` and `maxReceiveCount`; `maxReceiveCount`
    /// may be a number or a numeric string.
    pub fn from_json(s: &str, limits: &Limits) -> Result<Self, SqsError> {
        let wire: RedrivePolicyWire = serde_json::from_str(s).map_err(|e| {
            SqsError::InvalidParameterValue(format!("Invalid RedrivePolicy: {e}"))
        })?;
        let max_count = wire
            .max_receive_count
            .as_u64()
            .or_else(|| {
                wire.max_receive_count
                    .as_str()
                    .and_then(|s| s.parse().ok())
            })
            .ok_or_else(|| {
                SqsError::InvalidParameterValue(
                    "RedrivePolicy maxReceiveCount must be an integer".into(),
                )
            })?;
        if max_count < u64::from(limits.max_receive_count_min)
            || max_count > u64::from(limits.max_receive_count_max)
        {
            return Err(SqsError::InvalidParameterValue(format!(
                "RedrivePolicy maxReceiveCount must be between {} and {}",
                limits.max_receive_count_min, limits.max_receive_count_max
            )));
        }
        Ok(RedrivePolicy {
            dead_letter_target_arn: wire.dead_letter_target_arn,
            max_receive_count: max_count as u32,
        })
    }

    pub fn to_json(&self) -> String {
        serde_json::json!({
            "deadLetterTargetArn": self.dead_letter_target_arn,
            "maxReceiveCount": self.max_receive_count,
        })
        .to_string()
    }
}

/// Mutable queue configuration. Defaults match AWS standard queues.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueAttributes {
    pub delay_seconds: u32,
    pub visibility_timeout: u32,
    pub maximum_message_size: u32,
    pub message_retention_period: u32,
    pub receive_message_wait_time_seconds: u32,
    pub redrive_policy: Option<RedrivePolicy>,
    /// Resource policy document, stored verbatim; evaluated by the
    /// authorization gate, not by the engine.
    pub policy: Option<String>,
}

impl Default for QueueAttributes {
    fn default() -> Self {
        QueueAttributes {
            delay_seconds: 0,
            visibility_timeout: 30,
            maximum_message_size: 262_144,
            message_retention_period: 345_600,
            receive_message_wait_time_seconds: 0,
            redrive_policy: None,
            policy: None,
        }
    }
}

fn parse_bounded(name: &str, value: &str, min: u32, max: u32) -> Result<u32, SqsError> {
    let v: u32 = value.parse().map_err(|_| {
        SqsError::InvalidParameterValue(format!("Invalid value for {name}: {value}"))
    })?;
    if v < min || v > max {
        return Err(SqsError::InvalidParameterValue(format!(
            "{name} must be between {min} and {max}"
        )));
    }
    Ok(v)
}

impl QueueAttributes {
    /// Applies the supplied attribute strings on top of `self`, validating
    /// each against `limits`. Only supplied keys change; an empty
    /// RedrivePolicy or Policy value clears the attribute.
    pub fn apply(
        &mut self,
        attrs: &HashMap<String, String>,
        limits: &Limits,
    ) -> Result<(), SqsError> {
        for (key, value) in attrs {
            if READ_ONLY_ATTRIBUTES.contains(&key.as_str()) {
                return Err(SqsError::InvalidAttributeName(format!(
                    "Attribute {key} is read-only"
                )));
            }
            match key.as_str() {
                "DelaySeconds" => {
                    self.delay_seconds =
                        parse_bounded(key, value, 0, limits.delay_seconds_max)?;
                }
                "VisibilityTimeout" => {
                    self.visibility_timeout =
                        parse_bounded(key, value, 0, limits.visibility_timeout_max)?;
                }
                "MaximumMessageSize" => {
                    self.maximum_message_size = parse_bounded(
                        key,
                        value,
                        limits.maximum_message_size_min,
                        limits.maximum_message_size_max,
                    )?;
                }
                "MessageRetentionPeriod" => {
                    self.message_retention_period = parse_bounded(
                        key,
                        value,
                        limits.message_retention_min,
                        limits.message_retention_max,
                    )?;
                }
                "ReceiveMessageWaitTimeSeconds" => {
                    self.receive_message_wait_time_seconds =
                        parse_bounded(key, value, 0, limits.receive_wait_time_max)?;
                }
                "RedrivePolicy" => {
                    self.redrive_policy = if value.is_empty() {
                        None
                    } else {
                        Some(RedrivePolicy::from_json(value, limits)?)
                    };
                }
                "Policy" => {
                    self.policy = if value.is_empty() {
                        None
                    } else {
                        Some(value.clone())
                    };
                }
                _ => {
                    return Err(SqsError::InvalidParameterValue(format!(
                        "Unknown attribute: {key}"
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn to_map(&self) -> HashMap<String, String> {
        let mut m = HashMap::new();
        m.insert("DelaySeconds".into(), self.delay_seconds.to_string());
        m.insert(
            "VisibilityTimeout".into(),
            self.visibility_timeout.to_string(),
        );
        m.insert(
            "MaximumMessageSize".into(),
            self.maximum_message_size.to_string(),
        );
        m.insert(
            "MessageRetentionPeriod".into(),
            self.message_retention_period.to_string(),
        );
        m.insert(
            "ReceiveMessageWaitTimeSeconds".into(),
            self.receive_message_wait_time_seconds.to_string(),
        );
        if let Some(ref rp) = self.redrive_policy {
            m.insert("RedrivePolicy".into(), rp.to_json());
        }
        if let Some(ref policy) = self.policy {
            m.insert("Policy".into(), policy.clone());
        }
        m
    }
}

pub fn validate_queue_name(name: &str, limits: &Limits) -> Result<(), SqsError> {
    if name.is_empty() || name.len() > limits.queue_name_len_max {
        return Err(SqsError::InvalidParameterValue(format!(
            "Queue name must be 1-{} characters",
            limits.queue_name_len_max
        )));
    }
    let valid = name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if !valid {
        return Err(SqsError::InvalidParameterValue(
            "Queue name can only contain alphanumeric characters, hyphens, and underscores"
                .into(),
        ));
    }
    Ok(())
}

fn valid_attribute_name(name: &str, limits: &Limits) -> bool {
    if name.is_empty() || name.len() > limits.attribute_name_len_max {
        return false;
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_')
    {
        return false;
    }
    if name.starts_with('.') || name.ends_with('.') || name.contains("..") {
        return false;
    }
    let lower = name.to_ascii_lowercase();
    !(lower.starts_with("aws.") || lower.starts_with("amazon."))
}

/// Validates typed message attributes: data type `String`, `Number` or
/// `Binary` with an optional `.subtype` suffix, and exactly one value field
/// matching the type family.
pub fn validate_message_attributes(
    attrs: &HashMap<String, MessageAttributeValue>,
    limits: &Limits,
) -> Result<(), SqsError> {
    if attrs.len() > limits.message_attributes_max {
        return Err(SqsError::InvalidParameterValue(format!(
            "A message can have at most {} attributes",
            limits.message_attributes_max
        )));
    }
    for (name, attr) in attrs {
        if !valid_attribute_name(name, limits) {
            return Err(SqsError::InvalidParameterValue(format!(
                "Invalid message attribute name: {name}"
            )));
        }
        let base = attr
            .data_type
            .split_once('.')
            .map_or(attr.data_type.as_str(), |(base, _)| base);
        match base {
            "String" | "Number" => {
                if attr.string_value.is_none() {
                    return Err(SqsError::InvalidParameterValue(format!(
                        "Attribute {name} of type {} requires a StringValue",
                        attr.data_type
                    )));
                }
                if attr.binary_value.is_some() {
                    return Err(SqsError::InvalidParameterValue(format!(
                        "Attribute {name} must carry exactly one value field"
                    )));
                }
            }
            "Binary" => {
                let Some(ref bv) = attr.binary_value else {
                    return Err(SqsError::InvalidParameterValue(format!(
                        "Attribute {name} of type {} requires a BinaryValue",
                        attr.data_type
                    )));
                };
                if attr.string_value.is_some() {
                    return Err(SqsError::InvalidParameterValue(format!(
                        "Attribute {name} must carry exactly one value field"
                    )));
                }
                if base64::engine::general_purpose::STANDARD.decode(bv).is_err() {
                    return Err(SqsError::InvalidParameterValue(format!(
                        "Attribute {name} BinaryValue is not valid base64"
                    )));
                }
            }
            _ => {
                return Err(SqsError::InvalidParameterValue(format!(
                    "Attribute {name} has unsupported data type {}",
                    attr.data_type
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> Limits {
        Limits::default()
    }

    fn string_attr(value: &str) -> MessageAttributeValue {
        MessageAttributeValue {
            data_type: "String".into(),
            string_value: Some(value.into()),
            binary_value: None,
        }
    }

    #[test]
    fn apply_rejects_out_of_range_values() {
        let mut attrs = QueueAttributes::default();
        let mut m = HashMap::new();
        m.insert("VisibilityTimeout".to_string(), "43201".to_string());
        let err = attrs.apply(&m, &limits()).unwrap_err();
        assert!(matches!(err, SqsError::InvalidParameterValue(_)));
        // state unchanged on failure
        assert_eq!(attrs.visibility_timeout, 30);
    }

    #[test]
    fn apply_rejects_non_numeric() {
        let mut attrs = QueueAttributes::default();
        let mut m = HashMap::new();
        m.insert("DelaySeconds".to_string(), "soon".to_string());
        assert!(matches!(
            attrs.apply(&m, &limits()),
            Err(SqsError::InvalidParameterValue(_))
        ));
    }

    #[test]
    fn apply_rejects_unknown_and_read_only_names() {
        let mut attrs = QueueAttributes::default();
        let mut m = HashMap::new();
        m.insert("FifoQueue".to_string(), "true".to_string());
        assert!(matches!(
            attrs.apply(&m, &limits()),
            Err(SqsError::InvalidParameterValue(_))
        ));

        let mut m = HashMap::new();
        m.insert("QueueArn".to_string(), "arn:foo".to_string());
        assert!(matches!(
            attrs.apply(&m, &limits()),
            Err(SqsError::InvalidAttributeName(_))
        ));
    }

    #[test]
    fn redrive_policy_requires_exact_fields() {
        let l = limits();
        assert!(RedrivePolicy::from_json(
            r#"{"deadLetterTargetArn":"arn:aws:sqs:us-east-1:000000000000:dlq","maxReceiveCount":3}"#,
            &l
        )
        .is_ok());
        // numeric string accepted
        assert!(RedrivePolicy::from_json(
            r#"{"deadLetterTargetArn":"arn:aws:sqs:us-east-1:000000000000:dlq","maxReceiveCount":"3"}"#,
            &l
        )
        .is_ok());
        // missing field
        assert!(RedrivePolicy::from_json(r#"{"maxReceiveCount":3}"#, &l).is_err());
        // unknown extra field
        assert!(RedrivePolicy::from_json(
            r#"{"deadLetterTargetArn":"arn:x","maxReceiveCount":3,"other":1}"#,
            &l
        )
        .is_err());
        // out of bounds
        assert!(RedrivePolicy::from_json(
            r#"{"deadLetterTargetArn":"arn:x","maxReceiveCount":0}"#,
            &l
        )
        .is_err());
    }

    #[test]
    fn message_attribute_requires_one_value_of_matching_family() {
        let l = limits();
        let mut attrs = HashMap::new();
        attrs.insert("Ok".to_string(), string_attr("v"));
        assert!(validate_message_attributes(&attrs, &l).is_ok());

        let mut attrs = HashMap::new();
        attrs.insert(
            "Both".to_string(),
            MessageAttributeValue {
                data_type: "String".into(),
                string_value: Some("v".into()),
                binary_value: Some("dg==".into()),
            },
        );
        assert!(validate_message_attributes(&attrs, &l).is_err());

        let mut attrs = HashMap::new();
        attrs.insert(
            "Neither".to_string(),
            MessageAttributeValue {
                data_type: "Number".into(),
                string_value: None,
                binary_value: None,
            },
        );
        assert!(validate_message_attributes(&attrs, &l).is_err());

        let mut attrs = HashMap::new();
        attrs.insert(
            "Bin".to_string(),
            MessageAttributeValue {
                data_type: "Binary.png".into(),
                string_value: None,
                binary_value: Some("aGVsbG8=".into()),
            },
        );
        assert!(validate_message_attributes(&attrs, &l).is_ok());
    }

    #[test]
    fn message_attribute_rejects_reserved_and_malformed_names() {
        let l = limits();
        for name in ["AWS.Trace", "amazon.foo", ".dot", "dot.", "a..b", ""] {
            let mut attrs = HashMap::new();
            attrs.insert(name.to_string(), string_attr("v"));
            assert!(
                validate_message_attributes(&attrs, &l).is_err(),
                "expected rejection for {name:?}"
            );
        }
    }

    #[test]
    fn attribute_digest_is_order_independent() {
        let mut a = HashMap::new();
        a.insert("one".to_string(), string_attr("1"));
        a.insert("two".to_string(), string_attr("2"));

        let mut b = HashMap::new();
        b.insert("two".to_string(), string_attr("2"));
        b.insert("one".to_string(), string_attr("1"));

        assert_eq!(compute_md5_of_attributes(&a), compute_md5_of_attributes(&b));

        b.insert("two".to_string(), string_attr("3"));
        assert_ne!(compute_md5_of_attributes(&a), compute_md5_of_attributes(&b));
    }

    #[test]
    fn queue_name_charset() {
        let l = limits();
        assert!(validate_queue_name("orders_2024-a", &l).is_ok());
        assert!(validate_queue_name("", &l).is_err());
        assert!(validate_queue_name("bad name", &l).is_err());
        assert!(validate_queue_name(&"q".repeat(81), &l).is_err());
    }
}

//! Receipt handles as signed capability tokens.
//!
//! A handle embeds (account, queue, message id, generation) and carries an
//! HMAC-SHA256 tag, so clients cannot forge handles for other queues or
//! accounts, and garbled or truncated handles are detected instead of being
//! looked up.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use uuid::Uuid;

use crate::error::SqsError;

type HmacSha256 = Hmac<Sha256>;

const TAG_LEN: usize = 32;

/// Fields recovered from a verified receipt handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiptToken {
    pub account_id: String,
    pub queue_name: String,
    pub message_id: String,
    pub generation: u64,
}

/// Issues and verifies receipt handles with a per-process random key.
/// Handles do not survive a restart, matching the rest of the in-memory
/// store.
pub struct ReceiptCodec {
    key: [u8; 32],
}

impl Default for ReceiptCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl ReceiptCodec {
    pub fn new() -> Self {
        let mut key = [0u8; 32];
        key[..16].copy_from_slice(Uuid::new_v4().as_bytes());
        key[16..].copy_from_slice(Uuid::new_v4().as_bytes());
        ReceiptCodec { key }
    }

    fn mac(&self, payload: &[u8]) -> HmacSha256 {
        let mut mac =
            HmacSha256::new_from_slice(&self.key).expect("HMAC accepts any key length");
        mac.update(payload);
        mac
    }

    pub fn issue(
        &self,
        account_id: &str,
        queue_name: &str,
        message_id: &str,
        generation: u64,
    ) -> String {
        let payload = format!("{account_id}:{queue_name}:{message_id}:{generation}");
        let tag = self.mac(payload.as_bytes()).finalize().into_bytes();
        let mut buf = payload.into_bytes();
        buf.extend_from_slice(&tag);
        URL_SAFE_NO_PAD.encode(buf)
    }

    /// Verifies the tag and recovers the embedded fields. Any malformation
    /// (bad base64, short token, tag mismatch, unparseable payload) yields
    /// `ReceiptHandleIsInvalid`.
    pub fn verify(&self, handle: &str) -> Result<ReceiptToken, SqsError> {
        let invalid = || {
            SqsError::ReceiptHandleIsInvalid(format!(
                "The receipt handle \"{handle}\" is not valid"
            ))
        };

        let buf = URL_SAFE_NO_PAD.decode(handle).map_err(|_| invalid())?;
        if buf.len() <= TAG_LEN {
            return Err(invalid());
        }
        let (payload, tag) = buf.split_at(buf.len() - TAG_LEN);
        self.mac(payload).verify_slice(tag).map_err(|_| invalid())?;

        let payload = std::str::from_utf8(payload).map_err(|_| invalid())?;
        let mut parts = payload.splitn(4, ':');
        let account_id = parts.next().filter(|s| !s.is_empty()).ok_or_else(invalid)?;
        let queue_name = parts.next().filter(|s| !s.is_empty()).ok_or_else(invalid)?;
        let message_id = parts.next().filter(|s| !s.is_empty()).ok_or_else(invalid)?;
        let generation: u64 = parts
            .next()
            .and_then(|s| s.parse().ok())
            .ok_or_else(invalid)?;

        Ok(ReceiptToken {
            account_id: account_id.to_string(),
            queue_name: queue_name.to_string(),
            message_id: message_id.to_string(),
            generation,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let codec = ReceiptCodec::new();
        let handle = codec.issue("000000000000", "orders", "msg-1", 3);
        let token = codec.verify(&handle).unwrap();
        assert_eq!(token.account_id, "000000000000");
        assert_eq!(token.queue_name, "orders");
        assert_eq!(token.message_id, "msg-1");
        assert_eq!(token.generation, 3);
    }

    #[test]
    fn tampered_handle_is_rejected() {
        let codec = ReceiptCodec::new();
        let handle = codec.issue("000000000000", "orders", "msg-1", 1);
        let mut chars: Vec<char> = handle.chars().collect();
        let mid = chars.len() / 2;
        chars[mid] = if chars[mid] == 'A' { 'B' } else { 'A' };
        let tampered: String = chars.into_iter().collect();
        assert!(matches!(
            codec.verify(&tampered),
            Err(SqsError::ReceiptHandleIsInvalid(_))
        ));
    }

    #[test]
    fn truncated_and_garbage_handles_are_rejected() {
        let codec = ReceiptCodec::new();
        let handle = codec.issue("000000000000", "orders", "msg-1", 1);
        assert!(codec.verify(&handle[..handle.len() / 2]).is_err());
        assert!(codec.verify("not-base64!!!").is_err());
        assert!(codec.verify("").is_err());
    }

    #[test]
    fn foreign_key_is_rejected() {
        let a = ReceiptCodec::new();
        let b = ReceiptCodec::new();
        let handle = a.issue("000000000000", "orders", "msg-1", 1);
        assert!(b.verify(&handle).is_err());
    }
}

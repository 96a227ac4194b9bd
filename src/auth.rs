//! Authorization boundary.
//!
//! The engine consults an [`AuthorizationGate`] before every operation and
//! maps a denial to 403. Policy evaluation itself lives outside this crate;
//! the default gate allows everything, which is the expected configuration
//! for a local service.

/// Identity of the requesting principal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerIdentity {
    pub account_id: String,
}

impl CallerIdentity {
    pub fn new(account_id: impl Into<String>) -> Self {
        CallerIdentity {
            account_id: account_id.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny,
}

pub trait AuthorizationGate: Send + Sync {
    fn authorize(&self, caller: &CallerIdentity, action: &str, queue_arn: &str) -> Decision;
}

/// Permits every request.
pub struct AllowAll;

impl AuthorizationGate for AllowAll {
    fn authorize(&self, _caller: &CallerIdentity, _action: &str, _queue_arn: &str) -> Decision {
        Decision::Allow
    }
}

/// Denies every request; used in tests to exercise the 403 path.
pub struct DenyAll;

impl AuthorizationGate for DenyAll {
    fn authorize(&self, _caller: &CallerIdentity, _action: &str, _queue_arn: &str) -> Decision {
        Decision::Deny
    }
}

//! Request gatekeeping: a capability check plus a single-use token bound to
//! one action (and, for per-applicant actions, one applicant).
//!
//! Token layout: `hex(nonce) "." expiry_unix "." hex(hmac_sha256(scope|nonce|expiry))`.

use chrono::Utc;
use hmac::{Hmac, Mac};
use rand::Rng;
use sha2::Sha256;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use subtle::ConstantTimeEq;
use tracing::warn;

use crate::db::Database;
use crate::error::{LifecycleError, Result};
use crate::models::{Caller, Capability, RequestContext};

type HmacSha256 = Hmac<Sha256>;

/// The action a token authorizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionScope {
    SubmitApplication,
    Approve(i64),
    Reject(i64),
    Delete(i64),
    SetStatus(i64),
    Promote(i64),
    Bulk,
    DownloadResume(i64),
    UpdateContact(i64),
}

impl ActionScope {
    pub fn key(&self) -> String {
        match self {
            ActionScope::SubmitApplication => "submit_application".to_string(),
            ActionScope::Approve(id) => format!("approve_applicant_{}", id),
            ActionScope::Reject(id) => format!("reject_applicant_{}", id),
            ActionScope::Delete(id) => format!("delete_applicant_{}", id),
            ActionScope::SetStatus(id) => format!("update_applicant_status_{}", id),
            ActionScope::Promote(id) => format!("create_employee_from_applicant_{}", id),
            ActionScope::Bulk => "bulk-applicants".to_string(),
            ActionScope::DownloadResume(id) => format!("download_resume_{}", id),
            ActionScope::UpdateContact(employee_row) => {
                format!("update_employee_contact_{}", employee_row)
            }
        }
    }

    pub fn required_capability(&self) -> Capability {
        match self {
            ActionScope::SubmitApplication => Capability::SubmitApplication,
            ActionScope::UpdateContact(_) => Capability::AccessPortal,
            _ => Capability::ManageApplicants,
        }
    }
}

impl fmt::Display for ActionScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

pub trait TokenService: Send + Sync {
    fn issue(&self, scope: &ActionScope) -> Result<String>;

    /// True when `token` was issued for `scope`, has not expired and has not
    /// been presented before. A successful check spends the token.
    fn verify(&self, token: &str, scope: &ActionScope) -> Result<bool>;
}

pub struct HmacTokenService {
    secret: Vec<u8>,
    ttl: Duration,
    db: Arc<Database>,
}

impl HmacTokenService {
    /// `secret_hex` is the hex-encoded signing key from settings.
    pub fn new(secret_hex: &str, ttl: Duration, db: Arc<Database>) -> Result<Self> {
        let secret = hex::decode(secret_hex.trim())
            .map_err(|e| LifecycleError::Configuration(format!("token secret is not hex: {}", e)))?;
        if secret.len() < 16 {
            return Err(LifecycleError::Configuration(
                "token secret must be at least 16 bytes".to_string(),
            ));
        }
        Ok(Self { secret, ttl, db })
    }

    fn mac(&self, scope: &str, nonce: &str, expires_at: i64) -> Result<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| LifecycleError::Configuration(format!("invalid token secret: {}", e)))?;
        mac.update(scope.as_bytes());
        mac.update(b"|");
        mac.update(nonce.as_bytes());
        mac.update(b"|");
        mac.update(expires_at.to_string().as_bytes());
        Ok(mac)
    }

    pub(crate) fn issue_at(&self, scope: &ActionScope, now: i64) -> Result<String> {
        let nonce = hex::encode(rand::thread_rng().r#gen::<[u8; 16]>());
        let expires_at = now + self.ttl.as_secs() as i64;
        let tag = self.mac(&scope.key(), &nonce, expires_at)?.finalize().into_bytes();
        Ok(format!("{}.{}.{}", nonce, expires_at, hex::encode(tag)))
    }

    pub(crate) fn verify_at(&self, token: &str, scope: &ActionScope, now: i64) -> Result<bool> {
        let mut parts = token.trim().splitn(3, '.');
        let (Some(nonce), Some(expiry), Some(tag)) = (parts.next(), parts.next(), parts.next())
        else {
            return Ok(false);
        };
        let Ok(expires_at) = expiry.parse::<i64>() else {
            return Ok(false);
        };
        let Ok(presented) = hex::decode(tag) else {
            return Ok(false);
        };

        let expected = self.mac(&scope.key(), nonce, expires_at)?.finalize().into_bytes();
        if presented.len() != expected.len() || !bool::from(presented.ct_eq(expected.as_slice())) {
            return Ok(false);
        }
        if expires_at < now {
            return Ok(false);
        }
        self.db.consume_token(nonce, expires_at, now)
    }
}

impl TokenService for HmacTokenService {
    fn issue(&self, scope: &ActionScope) -> Result<String> {
        self.issue_at(scope, Utc::now().timestamp())
    }

    fn verify(&self, token: &str, scope: &ActionScope) -> Result<bool> {
        self.verify_at(token, scope, Utc::now().timestamp())
    }
}

pub struct Gatekeeper {
    tokens: Arc<dyn TokenService>,
}

impl Gatekeeper {
    pub fn new(tokens: Arc<dyn TokenService>) -> Self {
        Self { tokens }
    }

    pub fn issue(&self, scope: &ActionScope) -> Result<String> {
        self.tokens.issue(scope)
    }

    /// Capability check alone, for reads that change nothing.
    pub fn authorize(&self, caller: &Caller, capability: Capability) -> Result<()> {
        if caller.role.can(capability) {
            Ok(())
        } else {
            warn!(role = caller.role.as_str(), ?capability, "capability check failed");
            Err(LifecycleError::SecurityCheckFailed)
        }
    }

    /// Fails with `SecurityCheckFailed` unless the caller holds the
    /// capability the action needs and presents a live token for it.
    pub fn verify(&self, request: &RequestContext, scope: &ActionScope) -> Result<()> {
        let role = request.caller.role;
        if !role.can(scope.required_capability()) {
            warn!(%scope, role = role.as_str(), "capability check failed");
            return Err(LifecycleError::SecurityCheckFailed);
        }
        let Some(token) = request.token.as_deref() else {
            warn!(%scope, "missing security token");
            return Err(LifecycleError::SecurityCheckFailed);
        };
        match self.tokens.verify(token, scope) {
            Ok(true) => Ok(()),
            Ok(false) => {
                warn!(%scope, "security token rejected");
                Err(LifecycleError::SecurityCheckFailed)
            }
            Err(e) => {
                warn!(%scope, error = %e, "security token could not be checked");
                Err(LifecycleError::SecurityCheckFailed)
            }
        }
    }
}

#[cfg(test)]
pub(crate) fn test_gatekeeper(db: Arc<Database>) -> Gatekeeper {
    let tokens = HmacTokenService::new(
        "00112233445566778899aabbccddeeff",
        Duration::from_secs(3600),
        db,
    )
    .unwrap();
    Gatekeeper::new(Arc::new(tokens))
}

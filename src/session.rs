use crate::crypto::Signer;
use crate::error::{ApiError, ApiResult};
use crate::models::{Account, Identity};
use anyhow::anyhow;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
struct Claims {
    sub: Uuid,
    email: String,
    username: String,
    is_admin: bool,
    iat: i64,
    exp: i64,
    jti: Uuid,
}

/// Issues and validates signed, time-bounded identity tokens.
///
/// There is no revocation list: a token stays valid until `exp`, and logging
/// out means the client throws its token away.
#[derive(Clone)]
pub struct SessionIssuer {
    signer: Signer,
    ttl: Duration,
}

impl SessionIssuer {
    pub fn new(secret: &str, ttl: Duration) -> Self {
        SessionIssuer {
            signer: Signer::new(secret.as_bytes()),
            ttl,
        }
    }

    pub fn issue(&self, account: &Account) -> ApiResult<String> {
        self.issue_at(account, Utc::now().timestamp())
    }

    pub fn issue_at(&self, account: &Account, now: i64) -> ApiResult<String> {
        let exp = i64::try_from(self.ttl.as_secs())
            .ok()
            .and_then(|ttl| now.checked_add(ttl))
            .ok_or_else(|| anyhow!("token lifetime {:?} is out of range", self.ttl))?;
        let claims = Claims {
            sub: account.id,
            email: account.email.clone(),
            username: account.username.clone(),
            is_admin: account.is_admin,
            iat: now,
            exp,
            jti: Uuid::new_v4(),
        };
        let payload = serde_json::to_vec(&claims).map_err(|e| anyhow!("encode claims: {}", e))?;
        Ok(self.signer.seal(&payload))
    }

    pub fn validate(&self, token: &str) -> ApiResult<Identity> {
        self.validate_at(token, Utc::now().timestamp())
    }

    pub fn validate_at(&self, token: &str, now: i64) -> ApiResult<Identity> {
        let token = token.trim();
        if token.is_empty() {
            return Err(ApiError::auth("Missing token"));
        }

        let payload = self.signer.open(token).map_err(|e| {
            log::debug!("token rejected: {}", e);
            ApiError::auth("Invalid token")
        })?;
        let claims: Claims =
            serde_json::from_slice(&payload).map_err(|_| ApiError::auth("Invalid token"))?;

        if claims.exp <= now {
            return Err(ApiError::auth("Token has expired"));
        }

        Ok(Identity {
            account_id: claims.sub,
            email: claims.email,
            username: claims.username,
            is_admin: claims.is_admin,
        })
    }
}

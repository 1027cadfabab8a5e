//! Bearer tokens for provider requests.
//!
//! Obtaining and refreshing tokens belongs to the identity layer; providers
//! only ask a [`TokenSource`] for a currently valid access token.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use veilvault_common::{Error, Result, SensitiveString};

/// Tokens this close to expiry are treated as expired.
const EXPIRY_MARGIN_SECS: i64 = 60;

/// An access token and its expiry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl AccessToken {
    pub fn new(token: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            token: token.into(),
            expires_at,
        }
    }

    /// Check if the token is expired or about to expire.
    pub fn is_expired(&self) -> bool {
        self.expires_at < Utc::now() + Duration::seconds(EXPIRY_MARGIN_SECS)
    }
}

/// Source of bearer tokens for one account.
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// A valid access token.
    ///
    /// # Errors
    /// - `Authentication` if no valid token is available
    async fn access_token(&self) -> Result<SensitiveString>;
}

/// A fixed token, as handed over by the identity layer.
pub struct StaticToken {
    token: SensitiveString,
    expires_at: DateTime<Utc>,
}

impl StaticToken {
    pub fn new(token: AccessToken) -> Self {
        Self {
            token: SensitiveString::new(token.token),
            expires_at: token.expires_at,
        }
    }

    /// A token that never expires, for tests and local providers.
    pub fn unbounded(token: impl Into<String>) -> Self {
        Self {
            token: SensitiveString::new(token),
            expires_at: DateTime::<Utc>::MAX_UTC,
        }
    }
}

#[async_trait]
impl TokenSource for StaticToken {
    async fn access_token(&self) -> Result<SensitiveString> {
        if self.expires_at < Utc::now() + Duration::seconds(EXPIRY_MARGIN_SECS) {
            return Err(Error::Authentication(format!(
                "Access token expired at {}",
                self.expires_at
            )));
        }
        Ok(self.token.clone())
    }
}

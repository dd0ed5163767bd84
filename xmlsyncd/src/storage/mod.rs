mod token_storage;

use serde::{Deserialize, Serialize};
use xmlsync_core::OAuthToken;

pub use token_storage::{
    FileTokenStore, KeyringTokenStore, MemoryTokenStore, StorageError, TokenStore,
    open_token_store,
};

/// Persisted session token. The engine never inspects the access token
/// itself, only its expiry and whether it can be refreshed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthState {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Unix seconds; `None` means the token does not expire.
    #[serde(default)]
    pub expires_at: Option<i64>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
}

impl OAuthState {
    pub fn from_oauth_token(token: &OAuthToken) -> Self {
        Self::from_oauth_token_at(token, now_unix())
    }

    pub fn from_oauth_token_at(token: &OAuthToken, now: i64) -> Self {
        Self {
            access_token: token.access_token.clone(),
            refresh_token: token.refresh_token.clone(),
            expires_at: token
                .expires_in
                .map(|secs| now.saturating_add(i64::try_from(secs).unwrap_or(i64::MAX))),
            scope: token.scope.clone(),
            token_type: Some(token.token_type.clone()),
        }
    }

    /// Valid when it does not expire within `skew_secs` of `now`.
    pub fn is_valid_at(&self, now: i64, skew_secs: i64) -> bool {
        if self.access_token.is_empty() {
            return false;
        }
        match self.expires_at {
            Some(expires_at) => expires_at > now.saturating_add(skew_secs),
            None => true,
        }
    }

    pub fn can_refresh(&self) -> bool {
        self.refresh_token
            .as_deref()
            .is_some_and(|token| !token.is_empty())
    }

    /// Fills fields a refresh response may omit from the previous token.
    pub fn inherit_from(mut self, previous: &OAuthState) -> Self {
        if self.refresh_token.is_none() {
            self.refresh_token = previous.refresh_token.clone();
        }
        if self.scope.is_none() {
            self.scope = previous.scope.clone();
        }
        if self.token_type.is_none() {
            self.token_type = previous.token_type.clone();
        }
        self
    }
}

pub(crate) fn now_unix() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(expires_in: Option<u64>, refresh: Option<&str>) -> OAuthToken {
        OAuthToken {
            access_token: "access".into(),
            token_type: "Bearer".into(),
            expires_in,
            refresh_token: refresh.map(str::to_string),
            scope: None,
        }
    }

    #[test]
    fn expiry_is_computed_from_expires_in() {
        let state = OAuthState::from_oauth_token_at(&token(Some(3600), None), 1_000);
        assert_eq!(state.expires_at, Some(4_600));
        assert_eq!(state.token_type.as_deref(), Some("Bearer"));
        assert!(state.is_valid_at(1_000, 60));
        assert!(!state.is_valid_at(4_550, 60));
    }

    #[test]
    fn token_without_expiry_stays_valid() {
        let state = OAuthState::from_oauth_token_at(&token(None, None), 0);
        assert!(state.is_valid_at(i64::MAX - 10, 60));
        assert!(!state.can_refresh());
    }

    #[test]
    fn refreshed_state_inherits_missing_fields() {
        let previous = OAuthState {
            access_token: "old".into(),
            refresh_token: Some("refresh-1".into()),
            expires_at: Some(0),
            scope: Some("drive.file".into()),
            token_type: Some("Bearer".into()),
        };
        let refreshed = OAuthState {
            access_token: "new".into(),
            refresh_token: None,
            expires_at: Some(100),
            scope: None,
            token_type: None,
        }
        .inherit_from(&previous);

        assert_eq!(refreshed.access_token, "new");
        assert_eq!(refreshed.refresh_token.as_deref(), Some("refresh-1"));
        assert_eq!(refreshed.scope.as_deref(), Some("drive.file"));
        assert!(refreshed.can_refresh());
    }
}

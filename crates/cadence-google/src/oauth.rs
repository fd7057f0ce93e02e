use std::collections::HashMap;
use std::sync::Mutex;

use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use tracing::{info, warn};

use cadence_core::config::GoogleConfig;
use cadence_core::error::{CadenceError, Result};
use cadence_core::types::MailAccount;

/// Which API a request belongs to; decides the error variant.
#[derive(Debug, Clone, Copy)]
pub enum Api {
    Gmail,
    Calendar,
}

impl Api {
    fn error(self, op: &str, message: String) -> CadenceError {
        match self {
            Api::Gmail => CadenceError::mail(op, message),
            Api::Calendar => CadenceError::Calendar(format!("{}: {}", op, message)),
        }
    }
}

/// Called with each freshly refreshed access token.
pub type RefreshHook = Box<dyn Fn(&MailAccount, &str) + Send + Sync>;

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// Bearer-token handling shared by the Gmail and Calendar clients.
///
/// Tokens refreshed after a 401 are cached per owner for the lifetime of
/// the process and handed to the refresh hook, if one is set.
pub struct GoogleAuth {
    http: Client,
    token_url: String,
    client_id: String,
    client_secret: String,
    cache: Mutex<HashMap<String, String>>,
    on_refresh: Option<RefreshHook>,
}

impl GoogleAuth {
    pub fn new(config: &GoogleConfig) -> Self {
        Self {
            http: Client::new(),
            token_url: config.token_url.clone(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            cache: Mutex::new(HashMap::new()),
            on_refresh: None,
        }
    }

    /// Run `hook` after every successful refresh, e.g. to persist the token.
    pub fn on_refresh<F>(mut self, hook: F) -> Self
    where
        F: Fn(&MailAccount, &str) + Send + Sync + 'static,
    {
        self.on_refresh = Some(Box::new(hook));
        self
    }

    pub(crate) fn http(&self) -> &Client {
        &self.http
    }

    /// The freshest known access token for an account.
    pub fn access_token(&self, account: &MailAccount) -> String {
        self.cache
            .lock()
            .ok()
            .and_then(|c| c.get(&account.owner_id).cloned())
            .unwrap_or_else(|| account.access_token.clone())
    }

    /// Exchange the account's refresh token for a new access token.
    pub async fn refresh(&self, account: &MailAccount) -> Result<String> {
        let refresh_token = account
            .refresh_token
            .as_deref()
            .ok_or_else(|| CadenceError::Auth(format!("no refresh token for {}", account.owner_id)))?;

        let response = self
            .http
            .post(&self.token_url)
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
            ])
            .send()
            .await
            .map_err(|e| CadenceError::Auth(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_else(|_| "unknown".to_string());
            return Err(CadenceError::Auth(format!("token refresh HTTP {}: {}", status, body)));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| CadenceError::Auth(e.to_string()))?;

        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(account.owner_id.clone(), token.access_token.clone());
        }
        info!(owner = %account.owner_id, "Refreshed Google access token");
        if let Some(hook) = &self.on_refresh {
            hook(account, &token.access_token);
        }
        Ok(token.access_token)
    }

    /// Send an authorized request, refreshing the token and retrying once on
    /// a 401. Non-success statuses become errors carrying the status code.
    pub async fn execute<F>(&self, account: &MailAccount, api: Api, op: &str, build: F) -> Result<Response>
    where
        F: Fn(&str) -> RequestBuilder,
    {
        let token = self.access_token(account);
        let response = build(&token)
            .send()
            .await
            .map_err(|e| api.error(op, e.to_string()))?;

        let response = if response.status() == StatusCode::UNAUTHORIZED {
            warn!(owner = %account.owner_id, op, "Access token rejected, refreshing");
            let token = self.refresh(account).await?;
            build(&token)
                .send()
                .await
                .map_err(|e| api.error(op, e.to_string()))?
        } else {
            response
        };

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_else(|_| "unknown".to_string());
        Err(match status {
            StatusCode::UNAUTHORIZED => CadenceError::Auth(format!("{}: {}", op, body)),
            StatusCode::TOO_MANY_REQUESTS => CadenceError::RateLimited(format!("{}: {}", op, body)),
            _ => api.error(op, format!("HTTP {}: {}", status, body)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> GoogleConfig {
        GoogleConfig {
            client_id: "cid".into(),
            client_secret: "secret".into(),
            gmail_base_url: "http://localhost/gmail".into(),
            calendar_base_url: "http://localhost/cal".into(),
            token_url: "http://localhost/token".into(),
            calendar_id: "primary".into(),
        }
    }

    #[test]
    fn test_access_token_prefers_cache() {
        let auth = GoogleAuth::new(&config());
        let account = MailAccount {
            owner_id: "u1".into(),
            address: "u1@x.io".into(),
            access_token: "stored".into(),
            refresh_token: None,
        };
        assert_eq!(auth.access_token(&account), "stored");
        auth.cache.lock().unwrap().insert("u1".into(), "cached".into());
        assert_eq!(auth.access_token(&account), "cached");
    }

    #[tokio::test]
    async fn test_refresh_without_refresh_token_fails() {
        let auth = GoogleAuth::new(&config());
        let account = MailAccount {
            owner_id: "u1".into(),
            address: "u1@x.io".into(),
            access_token: "stored".into(),
            refresh_token: None,
        };
        let err = auth.refresh(&account).await.unwrap_err();
        assert!(matches!(err, CadenceError::Auth(_)));
    }
}

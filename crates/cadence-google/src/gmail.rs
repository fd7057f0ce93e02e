use std::sync::Arc;

use futures::future::BoxFuture;
use serde::Deserialize;
use tracing::debug;

use cadence_core::config::GoogleConfig;
use cadence_core::error::{CadenceError, Result};
use cadence_core::traits::MailProvider;
use cadence_core::types::{MailAccount, OutboundMessage, ProviderMessage, SendReceipt};

use crate::mime::{build_raw, encode_raw};
use crate::oauth::{Api, GoogleAuth};
use crate::payload::{GmailMessage, GmailThread};

/// Gmail REST client.
pub struct GmailClient {
    auth: Arc<GoogleAuth>,
    base_url: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendResponse {
    id: String,
    thread_id: String,
}

#[derive(Deserialize)]
struct ListResponse {
    #[serde(default)]
    messages: Vec<MessageRef>,
}

#[derive(Deserialize)]
struct MessageRef {
    id: String,
}

#[derive(Deserialize)]
struct DraftResponse {
    id: String,
}

impl GmailClient {
    pub fn new(config: &GoogleConfig, auth: Arc<GoogleAuth>) -> Self {
        Self {
            auth,
            base_url: config.gmail_base_url.trim_end_matches('/').to_string(),
        }
    }

    fn raw_body(message: &OutboundMessage) -> serde_json::Value {
        let mut body = serde_json::json!({ "raw": encode_raw(&build_raw(message)) });
        if let Some(thread_id) = &message.thread_id {
            body["threadId"] = serde_json::Value::String(thread_id.clone());
        }
        body
    }
}

fn decode_err(op: &str, e: reqwest::Error) -> CadenceError {
    CadenceError::mail(op, format!("invalid response: {}", e))
}

impl MailProvider for GmailClient {
    fn send<'a>(
        &'a self,
        account: &'a MailAccount,
        message: &'a OutboundMessage,
    ) -> BoxFuture<'a, Result<SendReceipt>> {
        Box::pin(async move {
            let url = format!("{}/messages/send", self.base_url);
            let body = Self::raw_body(message);
            let response = self
                .auth
                .execute(account, Api::Gmail, "messages.send", |token| {
                    self.auth.http().post(&url).bearer_auth(token).json(&body)
                })
                .await?;
            let sent: SendResponse = response
                .json()
                .await
                .map_err(|e| decode_err("messages.send", e))?;
            debug!(id = %sent.id, thread_id = %sent.thread_id, "Gmail accepted message");
            Ok(SendReceipt {
                provider_message_id: sent.id,
                thread_id: sent.thread_id,
            })
        })
    }

    fn read_message<'a>(
        &'a self,
        account: &'a MailAccount,
        message_id: &'a str,
    ) -> BoxFuture<'a, Result<ProviderMessage>> {
        Box::pin(async move {
            let url = format!("{}/messages/{}", self.base_url, message_id);
            let response = self
                .auth
                .execute(account, Api::Gmail, "messages.get", |token| {
                    self.auth
                        .http()
                        .get(&url)
                        .bearer_auth(token)
                        .query(&[("format", "full")])
                })
                .await?;
            let msg: GmailMessage = response
                .json()
                .await
                .map_err(|e| decode_err("messages.get", e))?;
            Ok(msg.into())
        })
    }

    fn get_thread<'a>(
        &'a self,
        account: &'a MailAccount,
        thread_id: &'a str,
    ) -> BoxFuture<'a, Result<Vec<ProviderMessage>>> {
        Box::pin(async move {
            let url = format!("{}/threads/{}", self.base_url, thread_id);
            let response = self
                .auth
                .execute(account, Api::Gmail, "threads.get", |token| {
                    self.auth
                        .http()
                        .get(&url)
                        .bearer_auth(token)
                        .query(&[("format", "full")])
                })
                .await?;
            let thread: GmailThread = response
                .json()
                .await
                .map_err(|e| decode_err("threads.get", e))?;
            Ok(thread.messages.into_iter().map(Into::into).collect())
        })
    }

    fn search<'a>(
        &'a self,
        account: &'a MailAccount,
        query: &'a str,
    ) -> BoxFuture<'a, Result<Vec<String>>> {
        Box::pin(async move {
            let url = format!("{}/messages", self.base_url);
            let response = self
                .auth
                .execute(account, Api::Gmail, "messages.list", |token| {
                    self.auth
                        .http()
                        .get(&url)
                        .bearer_auth(token)
                        .query(&[("q", query), ("maxResults", "25")])
                })
                .await?;
            let list: ListResponse = response
                .json()
                .await
                .map_err(|e| decode_err("messages.list", e))?;
            Ok(list.messages.into_iter().map(|m| m.id).collect())
        })
    }

    fn create_draft<'a>(
        &'a self,
        account: &'a MailAccount,
        message: &'a OutboundMessage,
    ) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            let url = format!("{}/drafts", self.base_url);
            let body = serde_json::json!({ "message": Self::raw_body(message) });
            let response = self
                .auth
                .execute(account, Api::Gmail, "drafts.create", |token| {
                    self.auth.http().post(&url).bearer_auth(token).json(&body)
                })
                .await?;
            let draft: DraftResponse = response
                .json()
                .await
                .map_err(|e| decode_err("drafts.create", e))?;
            Ok(draft.id)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_body_carries_thread_id() {
        let mut msg = OutboundMessage {
            from: "a@x.io".into(),
            to: "b@y.io".into(),
            subject: "Hi".into(),
            body: "Body".into(),
            thread_id: None,
            in_reply_to: None,
            references: None,
        };
        assert!(GmailClient::raw_body(&msg).get("threadId").is_none());
        msg.thread_id = Some("t-1".into());
        assert_eq!(GmailClient::raw_body(&msg)["threadId"], "t-1");
    }
}

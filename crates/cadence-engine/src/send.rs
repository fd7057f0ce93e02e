use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use cadence_core::error::{CadenceError, Result};
use cadence_core::traits::MailProvider;
use cadence_core::types::{
    ExecutionRecord, MailAccount, OutboundMessage, SentMessageRecord, StepRecord,
};
use cadence_store::SqliteStore;

use crate::thread::confirm_message_id;

/// Result of one successful provider send.
#[derive(Debug, Clone, PartialEq)]
pub struct SendOutcome {
    pub provider_message_id: String,
    pub thread_id: String,
    /// Provider-confirmed (or degraded synthetic) `Message-ID`.
    pub message_id: String,
}

/// How an automated response left the system.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    Sent(SendOutcome),
    Draft(String),
}

/// Sends messages through the mail provider and records what was sent.
pub struct SendPipeline {
    mail: Arc<dyn MailProvider>,
    store: Arc<SqliteStore>,
}

impl SendPipeline {
    pub fn new(mail: Arc<dyn MailProvider>, store: Arc<SqliteStore>) -> Self {
        Self { mail, store }
    }

    pub fn mail(&self) -> &Arc<dyn MailProvider> {
        &self.mail
    }

    /// Send and read back the provider's `Message-ID`. Writes nothing.
    pub async fn deliver(
        &self,
        account: &MailAccount,
        message: &OutboundMessage,
    ) -> Result<SendOutcome> {
        let receipt = self.mail.send(account, message).await?;
        let message_id =
            confirm_message_id(self.mail.as_ref(), account, &receipt.provider_message_id).await;
        Ok(SendOutcome {
            provider_message_id: receipt.provider_message_id,
            thread_id: receipt.thread_id,
            message_id,
        })
    }

    /// Send one cadence step, record the sent message and mark the step sent.
    ///
    /// Callers check that the step is still pending first; this method does
    /// not guard against sending twice.
    pub async fn send_step(
        &self,
        account: &MailAccount,
        execution: &ExecutionRecord,
        step: &StepRecord,
        message: &OutboundMessage,
    ) -> Result<SendOutcome> {
        let outcome = self.deliver(account, message).await?;
        let now = Utc::now();

        let canonical = execution
            .thread
            .canonical_message_id
            .clone()
            .unwrap_or_else(|| outcome.message_id.clone());
        self.store.insert_sent_message(&SentMessageRecord {
            provider_message_id: outcome.provider_message_id.clone(),
            owner_id: execution.owner_id.clone(),
            execution_id: Some(execution.id.clone()),
            cadence_id: Some(execution.cadence_id.clone()),
            contact_id: execution.contact_id().map(str::to_string),
            node_id: Some(step.node_id.clone()),
            thread_id: outcome.thread_id.clone(),
            canonical_message_id: Some(canonical),
            subject: message.subject.clone(),
            recipient: message.to.clone(),
            sent_at: now,
        })?;

        if !self
            .store
            .mark_step_sent(&execution.id, &step.node_id, &outcome.provider_message_id, now)?
        {
            warn!(
                execution_id = %execution.id,
                node_id = %step.node_id,
                "Step was no longer pending when its send completed"
            );
        }

        info!(
            execution_id = %execution.id,
            node_id = %step.node_id,
            thread_id = %outcome.thread_id,
            provider_message_id = %outcome.provider_message_id,
            "Step sent"
        );
        Ok(outcome)
    }

    /// Send (or draft) an automated response inside an execution's thread.
    pub async fn send_reply(
        &self,
        account: &MailAccount,
        execution: Option<&ExecutionRecord>,
        message: &OutboundMessage,
        draft: bool,
    ) -> Result<Delivery> {
        if draft {
            let draft_id = self.mail.create_draft(account, message).await?;
            info!(owner = %account.owner_id, draft_id = %draft_id, "Response saved as draft");
            return Ok(Delivery::Draft(draft_id));
        }

        let outcome = self.deliver(account, message).await?;
        self.store.insert_sent_message(&SentMessageRecord {
            provider_message_id: outcome.provider_message_id.clone(),
            owner_id: account.owner_id.clone(),
            execution_id: execution.map(|e| e.id.clone()),
            cadence_id: execution.map(|e| e.cadence_id.clone()),
            contact_id: execution.and_then(|e| e.contact_id()).map(str::to_string),
            node_id: None,
            thread_id: outcome.thread_id.clone(),
            canonical_message_id: execution
                .and_then(|e| e.thread.canonical_message_id.clone())
                .or_else(|| Some(outcome.message_id.clone())),
            subject: message.subject.clone(),
            recipient: message.to.clone(),
            sent_at: Utc::now(),
        })?;
        info!(
            owner = %account.owner_id,
            thread_id = %outcome.thread_id,
            provider_message_id = %outcome.provider_message_id,
            "Response sent"
        );
        Ok(Delivery::Sent(outcome))
    }

    /// One-off send outside any execution. Provider errors go straight back
    /// to the caller and nothing is recorded.
    pub async fn send_test(
        &self,
        owner_id: &str,
        to: &str,
        subject: &str,
        body: &str,
    ) -> Result<SendOutcome> {
        let account = self
            .store
            .mail_account(owner_id)?
            .ok_or_else(|| CadenceError::NoCredentials(owner_id.to_string()))?;
        let message = OutboundMessage {
            from: account.address.clone(),
            to: to.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
            thread_id: None,
            in_reply_to: None,
            references: None,
        };
        self.deliver(&account, &message).await
    }
}

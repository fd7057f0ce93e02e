use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use cadence_core::config::PollerConfig;
use cadence_core::error::Result;
use cadence_core::event::EventBus;
use cadence_core::traits::MailProvider;
use cadence_core::types::{
    extract_address, CadenceEvent, InboundReplyRecord, MailAccount, ProviderMessage, SentMessageRecord,
};
use cadence_store::SqliteStore;

use crate::cancel::CancellationController;
use crate::filter::{excerpt, screen};
use crate::router::{InboundContext, SchedulingIntentRouter};

/// Result of scanning one owner's conversations.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PollReport {
    pub owner_id: String,
    /// Genuine replies logged this cycle.
    pub found: usize,
    pub errors: Vec<String>,
}

/// Sent messages of one conversation, oldest first.
struct ThreadGroup {
    thread_id: String,
    records: Vec<SentMessageRecord>,
}

impl ThreadGroup {
    /// The record that ties this conversation to an execution, if any.
    fn primary(&self) -> &SentMessageRecord {
        self.records
            .iter()
            .find(|r| r.execution_id.is_some())
            .unwrap_or(&self.records[0])
    }
}

/// Scans recent conversations for replies, logs them, cancels the affected
/// executions and hands the newest reply to the scheduling router.
pub struct ReplyPoller {
    store: Arc<SqliteStore>,
    mail: Arc<dyn MailProvider>,
    controller: Arc<CancellationController>,
    router: Arc<SchedulingIntentRouter>,
    events: Arc<EventBus>,
    config: PollerConfig,
    /// `owner:message` keys already reported as filtered.
    filtered: Mutex<HashSet<String>>,
}

impl ReplyPoller {
    pub fn new(
        store: Arc<SqliteStore>,
        mail: Arc<dyn MailProvider>,
        controller: Arc<CancellationController>,
        router: Arc<SchedulingIntentRouter>,
        events: Arc<EventBus>,
        config: PollerConfig,
    ) -> Self {
        Self {
            store,
            mail,
            controller,
            router,
            events,
            config,
            filtered: Mutex::new(HashSet::new()),
        }
    }

    /// Poll on the configured interval until `shutdown` fires.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let interval = Duration::from_secs(self.config.interval_secs.max(1));
        info!(interval_secs = self.config.interval_secs, "Reply poller started");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown.cancelled() => {
                    info!("Reply poller shutting down");
                    break;
                }
            }

            let reports = self.poll_all().await;
            let found: usize = reports.iter().map(|r| r.found).sum();
            let errors: usize = reports.iter().map(|r| r.errors.len()).sum();
            if found > 0 || errors > 0 {
                info!(users = reports.len(), found, errors, "Poll cycle finished");
            } else {
                debug!(users = reports.len(), "Poll cycle finished, nothing new");
            }
        }
    }

    /// Poll every owner with stored credentials.
    pub async fn poll_all(&self) -> Vec<PollReport> {
        let accounts = match self.store.mail_accounts() {
            Ok(accounts) => accounts,
            Err(e) => {
                error!(error = %e, "Failed to list mail accounts");
                return Vec::new();
            }
        };
        let mut reports = Vec::with_capacity(accounts.len());
        for account in accounts {
            reports.push(self.poll_account(&account).await);
        }
        reports
    }

    /// Poll one owner. Missing credentials yield an empty report.
    pub async fn poll_user(&self, owner_id: &str) -> PollReport {
        match self.store.mail_account(owner_id) {
            Ok(Some(account)) => self.poll_account(&account).await,
            Ok(None) => {
                warn!(owner = %owner_id, "No mail credentials, skipping poll");
                PollReport {
                    owner_id: owner_id.to_string(),
                    ..Default::default()
                }
            }
            Err(e) => PollReport {
                owner_id: owner_id.to_string(),
                found: 0,
                errors: vec![e.to_string()],
            },
        }
    }

    async fn poll_account(&self, account: &MailAccount) -> PollReport {
        let mut report = PollReport {
            owner_id: account.owner_id.clone(),
            ..Default::default()
        };
        let since = Utc::now() - chrono::Duration::days(self.config.retention_days);
        let sent = match self.store.sent_messages_since(&account.owner_id, since) {
            Ok(sent) => sent,
            Err(e) => {
                report.errors.push(e.to_string());
                return report;
            }
        };
        let own_ids: HashSet<String> = sent.iter().map(|r| r.provider_message_id.clone()).collect();

        for group in group_by_thread(sent) {
            if let Err(e) = self.scan_thread(account, &group, &own_ids, &mut report).await {
                warn!(owner = %account.owner_id, thread_id = %group.thread_id, error = %e, "Thread scan failed");
                report
                    .errors
                    .push(format!("thread {}: {}", group.thread_id, e));
            }
        }

        if report.found > 0 {
            info!(owner = %account.owner_id, found = report.found, "Replies found");
        }
        report
    }

    async fn scan_thread(
        &self,
        account: &MailAccount,
        group: &ThreadGroup,
        own_ids: &HashSet<String>,
        report: &mut PollReport,
    ) -> Result<()> {
        let primary = group.primary();
        let messages = match self.mail.get_thread(account, &group.thread_id).await {
            Ok(messages) => messages,
            Err(e) => {
                warn!(thread_id = %group.thread_id, error = %e, "Thread fetch failed, falling back to subject search");
                self.search_fallback(account, group).await?
            }
        };

        let own_address = account.address.to_lowercase();
        let mut candidates: Vec<(ProviderMessage, String)> = Vec::new();
        for message in messages {
            if own_ids.contains(&message.id) {
                continue;
            }
            if self.store.has_inbound_reply(&account.owner_id, &message.id)? {
                continue;
            }
            if message.sender_address() == own_address {
                continue;
            }
            if let Err(reason) = screen(&message, &primary.subject) {
                if self.first_filtered(&account.owner_id, &message.id) {
                    debug!(provider_message_id = %message.id, %reason, "Inbound message filtered");
                    self.events.publish(CadenceEvent::InboundFiltered {
                        owner_id: account.owner_id.clone(),
                        provider_message_id: message.id.clone(),
                        reason: reason.to_string(),
                    });
                }
                continue;
            }
            let text = excerpt(&message, self.config.excerpt_chars);
            candidates.push((message, text));
        }
        if candidates.is_empty() {
            return Ok(());
        }

        // Replies are logged only after the cancellation succeeds; a failed
        // cancel leaves them for the next cycle.
        self.cancel_for(primary)?;

        let mut genuine: Vec<(ProviderMessage, String)> = Vec::new();
        for (message, text) in candidates {
            let record = InboundReplyRecord {
                provider_message_id: message.id.clone(),
                owner_id: account.owner_id.clone(),
                execution_id: primary.execution_id.clone(),
                cadence_id: primary.cadence_id.clone(),
                contact_id: primary.contact_id.clone(),
                thread_id: group.thread_id.clone(),
                sender: message.from.clone(),
                subject: message.subject.clone(),
                body_excerpt: text.clone(),
                received_at: message.received_at.unwrap_or_else(Utc::now),
                read: false,
            };
            if !self.store.insert_inbound_reply(&record)? {
                continue;
            }
            report.found += 1;
            info!(
                owner = %account.owner_id,
                thread_id = %group.thread_id,
                provider_message_id = %message.id,
                "Reply detected"
            );
            self.events.publish(CadenceEvent::ReplyDetected {
                owner_id: account.owner_id.clone(),
                thread_id: group.thread_id.clone(),
                provider_message_id: message.id.clone(),
            });
            genuine.push((message, text));
        }

        // Several replies in one cycle: all are logged and only the newest is
        // routed.
        let Some((newest, text)) = genuine.pop() else {
            return Ok(());
        };

        let execution = match &primary.execution_id {
            Some(id) => self.store.execution(id)?,
            None => None,
        };
        let ctx = InboundContext {
            execution,
            thread_id: group.thread_id.clone(),
            message: newest,
            text,
        };
        self.router.route(account, &ctx).await;
        Ok(())
    }

    /// True the first time a message is filtered for an owner.
    fn first_filtered(&self, owner_id: &str, message_id: &str) -> bool {
        self.filtered
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(format!("{}:{}", owner_id, message_id))
    }

    fn cancel_for(&self, record: &SentMessageRecord) -> Result<()> {
        match (&record.contact_id, &record.cadence_id, &record.execution_id) {
            (Some(contact), Some(cadence), _) => {
                self.controller
                    .cancel_execution(&record.owner_id, contact, cadence)?;
            }
            (_, _, Some(id)) => {
                self.controller.cancel(id)?;
            }
            _ => debug!(thread_id = %record.thread_id, "Reply outside any execution"),
        }
        Ok(())
    }

    /// Find replies by subject when the conversation cannot be fetched.
    ///
    /// Hits are kept only when they sit in this conversation or come from
    /// one of its recipients; other contacts can share the subject.
    async fn search_fallback(
        &self,
        account: &MailAccount,
        group: &ThreadGroup,
    ) -> Result<Vec<ProviderMessage>> {
        let query = subject_query(&group.primary().subject, &account.address);
        let ids = self.mail.search(account, &query).await?;
        let recipients: HashSet<String> = group
            .records
            .iter()
            .map(|r| extract_address(&r.recipient))
            .collect();

        let mut messages = Vec::with_capacity(ids.len());
        for id in ids {
            match self.mail.read_message(account, &id).await {
                Ok(message) => {
                    if message.thread_id == group.thread_id
                        || recipients.contains(&message.sender_address())
                    {
                        messages.push(message);
                    } else {
                        debug!(provider_message_id = %id, thread_id = %message.thread_id, "Search hit belongs to another conversation");
                    }
                }
                Err(e) => warn!(provider_message_id = %id, error = %e, "Search hit could not be read"),
            }
        }
        messages.sort_by_key(|m| m.received_at);
        Ok(messages)
    }
}

/// Mail search query for replies to `subject` not sent by `address`.
/// Quotes are dropped so the subject stays one phrase.
fn subject_query(subject: &str, address: &str) -> String {
    let phrase: String = subject.chars().filter(|c| !matches!(c, '"' | '\\')).collect();
    format!("subject:\"{}\" -from:{}", phrase.trim(), address)
}

fn group_by_thread(records: Vec<SentMessageRecord>) -> Vec<ThreadGroup> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<ThreadGroup> = Vec::new();
    for record in records {
        match index.get(&record.thread_id) {
            Some(&i) => groups[i].records.push(record),
            None => {
                index.insert(record.thread_id.clone(), groups.len());
                groups.push(ThreadGroup {
                    thread_id: record.thread_id.clone(),
                    records: vec![record],
                });
            }
        }
    }
    groups
}

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use chrono::Utc;
use futures::future::BoxFuture;

use cadence_core::error::{CadenceError, Result};
use cadence_core::traits::MailProvider;
use cadence_core::types::{MailAccount, OutboundMessage, ProviderMessage, SendReceipt};

#[derive(Default)]
struct Inner {
    next_id: u64,
    sent: Vec<OutboundMessage>,
    drafts: Vec<OutboundMessage>,
    messages: HashMap<String, ProviderMessage>,
    threads: HashMap<String, Vec<String>>,
    search_results: HashMap<String, Vec<String>>,
    queries: Vec<String>,
    fail_sends: bool,
    fail_read_back: bool,
    fail_search: bool,
    failing_threads: HashSet<String>,
}

impl Inner {
    fn next(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn insert(&mut self, message: ProviderMessage) {
        self.threads
            .entry(message.thread_id.clone())
            .or_default()
            .push(message.id.clone());
        self.messages.insert(message.id.clone(), message);
    }
}

/// A mailbox that keeps every conversation in memory.
///
/// Sends are assigned ids `msg-N` and `Message-ID` headers
/// `<msg-N@mock.mail>`; messages without a thread id start `thread-N`.
#[derive(Default)]
pub struct MockMailProvider {
    inner: Mutex<Inner>,
}

impl MockMailProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every message handed to `send`, in order.
    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.inner.lock().unwrap().sent.clone()
    }

    pub fn drafts(&self) -> Vec<OutboundMessage> {
        self.inner.lock().unwrap().drafts.clone()
    }

    /// Search queries issued so far.
    pub fn queries(&self) -> Vec<String> {
        self.inner.lock().unwrap().queries.clone()
    }

    /// Make every subsequent `send` fail with a transient provider error.
    pub fn fail_sends(&self, fail: bool) {
        self.inner.lock().unwrap().fail_sends = fail;
    }

    /// Make `read_message` fail, forcing the degraded identifier path.
    pub fn fail_read_back(&self, fail: bool) {
        self.inner.lock().unwrap().fail_read_back = fail;
    }

    /// Make `get_thread` fail for one conversation.
    pub fn fail_thread(&self, thread_id: &str) {
        self.inner
            .lock()
            .unwrap()
            .failing_threads
            .insert(thread_id.to_string());
    }

    /// Make every subsequent `search` fail.
    pub fn fail_search(&self, fail: bool) {
        self.inner.lock().unwrap().fail_search = fail;
    }

    pub fn set_search_results(&self, query: &str, ids: Vec<String>) {
        self.inner
            .lock()
            .unwrap()
            .search_results
            .insert(query.to_string(), ids);
    }

    /// Append an inbound message to a conversation. Returns its provider id.
    pub fn inject_reply(&self, thread_id: &str, from: &str, subject: &str, body: &str) -> String {
        let mut inner = self.inner.lock().unwrap();
        let n = inner.next();
        let id = format!("reply-{}", n);
        inner.insert(ProviderMessage {
            id: id.clone(),
            thread_id: thread_id.to_string(),
            from: from.to_string(),
            to: String::new(),
            subject: subject.to_string(),
            message_id_header: Some(format!("<reply-{}@contact.mail>", n)),
            auto_submitted: None,
            received_at: Some(Utc::now()),
            text_body: Some(body.to_string()),
            html_body: None,
        });
        id
    }

    /// Append an arbitrary message to its conversation.
    pub fn inject_message(&self, message: ProviderMessage) {
        self.inner.lock().unwrap().insert(message);
    }

    /// Messages of a conversation as stored, oldest first.
    pub fn thread(&self, thread_id: &str) -> Vec<ProviderMessage> {
        let inner = self.inner.lock().unwrap();
        inner
            .threads
            .get(thread_id)
            .map(|ids| ids.iter().filter_map(|id| inner.messages.get(id).cloned()).collect())
            .unwrap_or_default()
    }
}

impl MailProvider for MockMailProvider {
    fn send<'a>(
        &'a self,
        _account: &'a MailAccount,
        message: &'a OutboundMessage,
    ) -> BoxFuture<'a, Result<SendReceipt>> {
        Box::pin(async move {
            let mut inner = self.inner.lock().unwrap();
            if inner.fail_sends {
                return Err(CadenceError::mail("messages.send", "HTTP 503 backend unavailable"));
            }
            let n = inner.next();
            let id = format!("msg-{}", n);
            let thread_id = message
                .thread_id
                .clone()
                .unwrap_or_else(|| format!("thread-{}", n));
            inner.sent.push(message.clone());
            inner.insert(ProviderMessage {
                id: id.clone(),
                thread_id: thread_id.clone(),
                from: message.from.clone(),
                to: message.to.clone(),
                subject: message.subject.clone(),
                message_id_header: Some(format!("<{}@mock.mail>", id)),
                auto_submitted: None,
                received_at: Some(Utc::now()),
                text_body: Some(message.body.clone()),
                html_body: None,
            });
            Ok(SendReceipt {
                provider_message_id: id,
                thread_id,
            })
        })
    }

    fn read_message<'a>(
        &'a self,
        _account: &'a MailAccount,
        message_id: &'a str,
    ) -> BoxFuture<'a, Result<ProviderMessage>> {
        Box::pin(async move {
            let inner = self.inner.lock().unwrap();
            if inner.fail_read_back {
                return Err(CadenceError::mail("messages.get", "HTTP 500 read failed"));
            }
            inner
                .messages
                .get(message_id)
                .cloned()
                .ok_or_else(|| CadenceError::mail("messages.get", "HTTP 404"))
        })
    }

    fn get_thread<'a>(
        &'a self,
        _account: &'a MailAccount,
        thread_id: &'a str,
    ) -> BoxFuture<'a, Result<Vec<ProviderMessage>>> {
        Box::pin(async move {
            if self.inner.lock().unwrap().failing_threads.contains(thread_id) {
                return Err(CadenceError::mail("threads.get", "HTTP 500"));
            }
            Ok(self.thread(thread_id))
        })
    }

    fn search<'a>(
        &'a self,
        _account: &'a MailAccount,
        query: &'a str,
    ) -> BoxFuture<'a, Result<Vec<String>>> {
        Box::pin(async move {
            let mut inner = self.inner.lock().unwrap();
            inner.queries.push(query.to_string());
            if inner.fail_search {
                return Err(CadenceError::mail("messages.list", "HTTP 500"));
            }
            Ok(inner.search_results.get(query).cloned().unwrap_or_default())
        })
    }

    fn create_draft<'a>(
        &'a self,
        _account: &'a MailAccount,
        message: &'a OutboundMessage,
    ) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            let mut inner = self.inner.lock().unwrap();
            let n = inner.next();
            inner.drafts.push(message.clone());
            Ok(format!("draft-{}", n))
        })
    }
}

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;

use crate::error::Result;
use crate::types::*;

/// Mailbox provider for one user: send, read, search and draft.
pub trait MailProvider: Send + Sync + 'static {
    /// Send a message. When `message.thread_id` is set the provider must file
    /// it into that conversation.
    fn send<'a>(
        &'a self,
        account: &'a MailAccount,
        message: &'a OutboundMessage,
    ) -> BoxFuture<'a, Result<SendReceipt>>;

    /// Read a single message, including its headers.
    fn read_message<'a>(
        &'a self,
        account: &'a MailAccount,
        message_id: &'a str,
    ) -> BoxFuture<'a, Result<ProviderMessage>>;

    /// Fetch every message of a conversation, oldest first.
    fn get_thread<'a>(
        &'a self,
        account: &'a MailAccount,
        thread_id: &'a str,
    ) -> BoxFuture<'a, Result<Vec<ProviderMessage>>>;

    /// Run a provider search query and return matching message ids.
    fn search<'a>(
        &'a self,
        account: &'a MailAccount,
        query: &'a str,
    ) -> BoxFuture<'a, Result<Vec<String>>>;

    /// Save a message as a draft. Returns the draft id.
    fn create_draft<'a>(
        &'a self,
        account: &'a MailAccount,
        message: &'a OutboundMessage,
    ) -> BoxFuture<'a, Result<String>>;
}

/// Calendar provider: availability lookup and event creation.
pub trait CalendarProvider: Send + Sync + 'static {
    fn list_events<'a>(
        &'a self,
        account: &'a MailAccount,
        range: TimeRange,
    ) -> BoxFuture<'a, Result<Vec<CalendarEvent>>>;

    /// Busy intervals inside `range`.
    fn free_busy<'a>(
        &'a self,
        account: &'a MailAccount,
        range: TimeRange,
    ) -> BoxFuture<'a, Result<Vec<TimeRange>>>;

    fn create_event<'a>(
        &'a self,
        account: &'a MailAccount,
        event: &'a NewEvent,
    ) -> BoxFuture<'a, Result<CreatedEvent>>;
}

/// Natural-language classifier for reply text.
///
/// Every call may fail or return malformed output; callers keep a
/// deterministic fallback.
pub trait IntentClassifier: Send + Sync + 'static {
    fn classify_intent<'a>(&'a self, reply_text: &'a str)
        -> BoxFuture<'a, Result<IntentClassification>>;

    fn extract_date_range<'a>(&'a self, phrase: &'a str) -> BoxFuture<'a, Result<DateRangeHint>>;

    fn parse_time<'a>(
        &'a self,
        phrase: &'a str,
        reference: DateTime<Utc>,
    ) -> BoxFuture<'a, Result<ParsedTime>>;
}

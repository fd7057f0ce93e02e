use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique execution identifier.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct ExecutionId(pub String);

impl ExecutionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_string(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Default for ExecutionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A contact bound to an execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
}

impl Contact {
    /// First and last name joined, skipping missing parts.
    pub fn full_name(&self) -> String {
        [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Send status of one step in an execution timeline.
///
/// Transitions are one-way: `Pending -> Sent` or `Pending -> Cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Sent,
    Cancelled,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Pending => "pending",
            StepStatus::Sent => "sent",
            StepStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(StepStatus::Pending),
            "sent" => Some(StepStatus::Sent),
            "cancelled" => Some(StepStatus::Cancelled),
            _ => None,
        }
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stored mailbox credentials for one owning user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailAccount {
    pub owner_id: String,
    /// The mailbox address messages are sent from.
    pub address: String,
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

/// Per-user automation settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSettings {
    pub ai_replies_enabled: bool,
    /// Save automated responses as drafts instead of sending them.
    pub draft_mode: bool,
}

impl Default for UserSettings {
    fn default() -> Self {
        Self {
            ai_replies_enabled: true,
            draft_mode: false,
        }
    }
}

/// Conversation values that every step after the first reuses.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThreadSnapshot {
    pub thread_id: Option<String>,
    pub canonical_subject: Option<String>,
    /// Provider-confirmed `Message-ID` of the first sent step.
    pub canonical_message_id: Option<String>,
}

/// One run of a cadence graph for one contact (or none, for test runs).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: ExecutionId,
    pub owner_id: String,
    pub cadence_id: String,
    pub contact: Option<Contact>,
    pub thread: ThreadSnapshot,
    pub created_at: DateTime<Utc>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ExecutionRecord {
    pub fn contact_id(&self) -> Option<&str> {
        self.contact.as_ref().map(|c| c.id.as_str())
    }
}

/// One rendered step of an execution timeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub execution_id: ExecutionId,
    pub node_id: String,
    pub position: usize,
    pub recipient: String,
    pub subject: String,
    pub body: String,
    /// Planned absolute fire time.
    pub scheduled_for: DateTime<Utc>,
    pub status: StepStatus,
    pub sent_at: Option<DateTime<Utc>>,
    pub provider_message_id: Option<String>,
}

/// A provider message produced by this system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentMessageRecord {
    pub provider_message_id: String,
    pub owner_id: String,
    pub execution_id: Option<ExecutionId>,
    pub cadence_id: Option<String>,
    pub contact_id: Option<String>,
    pub node_id: Option<String>,
    pub thread_id: String,
    pub canonical_message_id: Option<String>,
    pub subject: String,
    pub recipient: String,
    pub sent_at: DateTime<Utc>,
}

/// An inbound message matched to one of our conversations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundReplyRecord {
    pub provider_message_id: String,
    pub owner_id: String,
    pub execution_id: Option<ExecutionId>,
    pub cadence_id: Option<String>,
    pub contact_id: Option<String>,
    pub thread_id: String,
    pub sender: String,
    pub subject: String,
    pub body_excerpt: String,
    pub received_at: DateTime<Utc>,
    pub read: bool,
}

/// A fully formed message handed to the mail provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
    pub thread_id: Option<String>,
    pub in_reply_to: Option<String>,
    pub references: Option<String>,
}

/// Provider acknowledgement of a send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendReceipt {
    pub provider_message_id: String,
    pub thread_id: String,
}

/// A message as read back from the provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderMessage {
    pub id: String,
    pub thread_id: String,
    pub from: String,
    pub to: String,
    pub subject: String,
    /// RFC 5322 `Message-ID` header.
    pub message_id_header: Option<String>,
    /// RFC 3834 `Auto-Submitted` header.
    pub auto_submitted: Option<String>,
    pub received_at: Option<DateTime<Utc>>,
    pub text_body: Option<String>,
    pub html_body: Option<String>,
}

impl ProviderMessage {
    /// Lower-cased bare address of the sender.
    pub fn sender_address(&self) -> String {
        extract_address(&self.from)
    }
}

/// Pull the bare address out of a `Name <addr>` header value.
pub fn extract_address(header: &str) -> String {
    let trimmed = header.trim();
    let addr = match (trimmed.rfind('<'), trimmed.rfind('>')) {
        (Some(open), Some(close)) if open < close => &trimmed[open + 1..close],
        _ => trimmed,
    };
    addr.trim().trim_matches('"').to_lowercase()
}

/// A half-open time interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn overlaps(&self, other: &TimeRange) -> bool {
        self.start < other.end && other.start < self.end
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarEvent {
    pub id: String,
    pub summary: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewEvent {
    pub summary: String,
    pub description: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub attendees: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatedEvent {
    pub id: String,
    pub html_link: Option<String>,
}

/// Scheduling intent detected in a reply.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulingType {
    #[default]
    None,
    RequestAvailability,
    BookSpecificTime,
    GeneralScheduling,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IntentClassification {
    #[serde(default)]
    pub scheduling_type: SchedulingType,
    #[serde(default)]
    pub suggested_times: Vec<String>,
    #[serde(default)]
    pub confidence: f32,
}

/// Human date-range phrase extracted from a reply ("next week").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DateRangeHint {
    pub range_label: String,
    #[serde(default)]
    pub timezone: Option<String>,
}

/// A concrete meeting slot resolved from a time phrase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedTime {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub display: String,
}

/// Events emitted by the engine.
#[derive(Debug, Clone)]
pub enum CadenceEvent {
    ExecutionStarted {
        execution_id: ExecutionId,
        steps: usize,
    },
    StepSent {
        execution_id: ExecutionId,
        node_id: String,
        thread_id: String,
    },
    StepFailed {
        execution_id: ExecutionId,
        node_id: String,
        error: String,
    },
    StepSkipped {
        node_id: String,
        reason: String,
    },
    ExecutionCancelled {
        execution_id: ExecutionId,
        cancelled_steps: usize,
    },
    ExecutionCompleted {
        execution_id: ExecutionId,
    },
    ReplyDetected {
        owner_id: String,
        thread_id: String,
        provider_message_id: String,
    },
    InboundFiltered {
        owner_id: String,
        provider_message_id: String,
        reason: String,
    },
    SchedulingResponse {
        owner_id: String,
        thread_id: String,
        outcome: String,
    },
}

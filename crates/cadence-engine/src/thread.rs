use tracing::{debug, warn};

use cadence_core::traits::MailProvider;
use cadence_core::types::{MailAccount, OutboundMessage, ThreadSnapshot};

/// Conversation values for one execution.
///
/// The first successful send fixes the thread id, the canonical subject and
/// the canonical `Message-ID`. Every later step reuses all three.
#[derive(Debug, Clone, Default)]
pub struct ThreadContinuity {
    snapshot: ThreadSnapshot,
}

impl ThreadContinuity {
    pub fn new(snapshot: ThreadSnapshot) -> Self {
        Self { snapshot }
    }

    pub fn snapshot(&self) -> &ThreadSnapshot {
        &self.snapshot
    }

    pub fn is_established(&self) -> bool {
        self.snapshot.thread_id.is_some()
    }

    /// The subject a step is sent with: the canonical one once established.
    pub fn subject_for<'a>(&'a self, own: &'a str) -> &'a str {
        self.snapshot.canonical_subject.as_deref().unwrap_or(own)
    }

    /// Build the outbound message for a cadence step.
    pub fn outbound(&self, from: &str, to: &str, subject: &str, body: &str) -> OutboundMessage {
        let anchor = self.snapshot.canonical_message_id.clone();
        OutboundMessage {
            from: from.to_string(),
            to: to.to_string(),
            subject: self.subject_for(subject).to_string(),
            body: body.to_string(),
            thread_id: self.snapshot.thread_id.clone(),
            in_reply_to: anchor.clone(),
            references: anchor,
        }
    }

    /// Record the first send. Later calls leave the snapshot untouched and
    /// return false.
    pub fn establish(&mut self, thread_id: &str, subject: &str, message_id: &str) -> bool {
        if self.is_established() {
            return false;
        }
        self.snapshot = ThreadSnapshot {
            thread_id: Some(thread_id.to_string()),
            canonical_subject: Some(subject.to_string()),
            canonical_message_id: Some(message_id.to_string()),
        };
        true
    }
}

/// Read a just-sent message back and return the provider's `Message-ID`.
///
/// When the read fails or the header is absent a synthetic id derived from
/// the provider id is returned and the degraded path is logged.
pub async fn confirm_message_id(
    mail: &dyn MailProvider,
    account: &MailAccount,
    provider_message_id: &str,
) -> String {
    match mail.read_message(account, provider_message_id).await {
        Ok(message) => match message.message_id_header {
            Some(header) if !header.trim().is_empty() => {
                debug!(provider_message_id, message_id = %header, "Confirmed Message-ID");
                header.trim().to_string()
            }
            _ => degraded_message_id(provider_message_id, "Message-ID header missing"),
        },
        Err(e) => degraded_message_id(provider_message_id, &e.to_string()),
    }
}

fn degraded_message_id(provider_message_id: &str, reason: &str) -> String {
    let synthetic = format!("<{}@mail.gmail.com>", provider_message_id);
    warn!(
        degraded = true,
        provider_message_id,
        message_id = %synthetic,
        reason,
        "Message-ID read-back failed, using synthetic id"
    );
    synthetic
}

/// `Re: <subject>` unless the subject already carries a reply prefix.
pub fn reply_subject(subject: &str) -> String {
    let trimmed = subject.trim();
    if trimmed.get(..3).is_some_and(|p| p.eq_ignore_ascii_case("re:")) {
        trimmed.to_string()
    } else {
        format!("Re: {}", trimmed)
    }
}

/// `References` value for a response anchored on `anchor`.
pub fn reply_references(canonical: Option<&str>, anchor: &str) -> String {
    match canonical {
        Some(first) if first != anchor => format!("{} {}", first, anchor),
        _ => anchor.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_test_utils::fixtures;
    use cadence_test_utils::MockMailProvider;

    #[test]
    fn test_first_establish_wins() {
        let mut thread = ThreadContinuity::default();
        assert!(thread.establish("t-1", "Intro", "<a@x>"));
        assert!(!thread.establish("t-2", "Other", "<b@x>"));
        assert_eq!(thread.snapshot().thread_id.as_deref(), Some("t-1"));
        assert_eq!(thread.subject_for("Follow up"), "Intro");
    }

    #[test]
    fn test_outbound_before_and_after_establish() {
        let mut thread = ThreadContinuity::default();
        let first = thread.outbound("me@x.io", "you@y.io", "Intro", "hi");
        assert_eq!(first.thread_id, None);
        assert_eq!(first.in_reply_to, None);

        thread.establish("t-1", "Intro", "<a@x>");
        let next = thread.outbound("me@x.io", "you@y.io", "Bump", "again");
        assert_eq!(next.subject, "Intro");
        assert_eq!(next.thread_id.as_deref(), Some("t-1"));
        assert_eq!(next.in_reply_to.as_deref(), Some("<a@x>"));
        assert_eq!(next.references.as_deref(), Some("<a@x>"));
    }

    #[test]
    fn test_reply_subject_and_references() {
        assert_eq!(reply_subject("Intro"), "Re: Intro");
        assert_eq!(reply_subject("RE: Intro"), "RE: Intro");
        assert_eq!(reply_references(Some("<a>"), "<b>"), "<a> <b>");
        assert_eq!(reply_references(Some("<a>"), "<a>"), "<a>");
        assert_eq!(reply_references(None, "<b>"), "<b>");
    }

    #[tokio::test]
    async fn test_confirm_reads_provider_header() {
        let mail = MockMailProvider::new();
        let account = fixtures::account();
        let msg = OutboundMessage {
            from: account.address.clone(),
            to: "lee@prospect.io".into(),
            subject: "Intro".into(),
            body: "hi".into(),
            thread_id: None,
            in_reply_to: None,
            references: None,
        };
        let receipt = mail.send(&account, &msg).await.unwrap();
        let id = confirm_message_id(&mail, &account, &receipt.provider_message_id).await;
        assert_eq!(id, "<msg-1@mock.mail>");

        mail.fail_read_back(true);
        let id = confirm_message_id(&mail, &account, &receipt.provider_message_id).await;
        assert_eq!(id, "<msg-1@mail.gmail.com>");
    }
}

//! Inbound message screening and body excerpts.

use std::sync::OnceLock;

use regex::Regex;

use cadence_core::types::ProviderMessage;

const AUTO_REPLY_SUBJECTS: &[&str] = &[
    "out of office",
    "out-of-office",
    "automatic reply",
    "auto-reply",
    "autoreply",
    "auto reply",
    "vacation",
    "away from the office",
    "delivery status notification",
    "mail delivery failure",
    "mail delivery failed",
    "delivery failure",
    "undeliverable",
    "undelivered mail",
    "returned mail",
    "failure notice",
];

const AUTOMATED_SENDERS: &[&str] = &[
    "mailer-daemon",
    "postmaster",
    "no-reply",
    "noreply",
    "do-not-reply",
    "donotreply",
    "bounce",
];

/// Why an inbound message was not treated as a genuine reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterReason {
    AutoSubmitted(String),
    AutoReplySubject,
    AutomatedSender,
    NotAReply,
}

impl std::fmt::Display for FilterReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FilterReason::AutoSubmitted(v) => write!(f, "auto-submitted: {}", v),
            FilterReason::AutoReplySubject => f.write_str("auto-reply subject"),
            FilterReason::AutomatedSender => f.write_str("automated sender"),
            FilterReason::NotAReply => f.write_str("subject is not a reply"),
        }
    }
}

fn reply_prefix() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^\s*(\[[^\]]*\]\s*)*(re|fwd?|aw|sv)\s*:").expect("valid regex")
    })
}

/// Subject with every reply/forward prefix and external-mail tag removed.
pub fn normalize_subject(subject: &str) -> String {
    let mut rest = subject.trim();
    loop {
        match reply_prefix().find(rest) {
            Some(m) => rest = rest[m.end()..].trim_start(),
            None => break,
        }
    }
    rest.trim().to_lowercase()
}

/// Decide whether `message` is a genuine reply to a conversation whose
/// original subject is `original_subject`.
pub fn screen(message: &ProviderMessage, original_subject: &str) -> Result<(), FilterReason> {
    if let Some(value) = message.auto_submitted.as_deref() {
        let value = value.trim();
        if !value.is_empty() && !value.eq_ignore_ascii_case("no") {
            return Err(FilterReason::AutoSubmitted(value.to_string()));
        }
    }

    let subject = message.subject.to_lowercase();
    if AUTO_REPLY_SUBJECTS.iter().any(|k| subject.contains(k)) {
        return Err(FilterReason::AutoReplySubject);
    }

    let sender = message.from.to_lowercase();
    if AUTOMATED_SENDERS.iter().any(|k| sender.contains(k)) {
        return Err(FilterReason::AutomatedSender);
    }

    let has_prefix = reply_prefix().is_match(&message.subject);
    let same_subject = !original_subject.trim().is_empty()
        && normalize_subject(&message.subject) == normalize_subject(original_subject);
    if !(has_prefix || same_subject) {
        return Err(FilterReason::NotAReply);
    }
    Ok(())
}

/// Reply text without quoted history, plain text preferred, capped at
/// `max_chars` characters.
pub fn excerpt(message: &ProviderMessage, max_chars: usize) -> String {
    let raw = match (&message.text_body, &message.html_body) {
        (Some(text), _) if !text.trim().is_empty() => text.clone(),
        (_, Some(html)) => strip_html(html),
        _ => String::new(),
    };
    let fresh = strip_quoted(&raw);
    let collapsed = fresh.trim();
    match collapsed.char_indices().nth(max_chars) {
        Some((cut, _)) => collapsed[..cut].trim_end().to_string(),
        None => collapsed.to_string(),
    }
}

fn strip_quoted(body: &str) -> String {
    let mut lines = Vec::new();
    for line in body.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with("-----Original Message-----")
            || (trimmed.starts_with("On ") && trimmed.ends_with("wrote:"))
        {
            break;
        }
        if trimmed.starts_with('>') {
            continue;
        }
        lines.push(line.trim_end());
    }
    lines.join("\n")
}

fn strip_html(html: &str) -> String {
    static TAGS: OnceLock<Regex> = OnceLock::new();
    static BREAKS: OnceLock<Regex> = OnceLock::new();
    let breaks = BREAKS
        .get_or_init(|| Regex::new(r"(?i)<br\s*/?>|</p>|</div>").expect("valid regex"));
    let tags = TAGS.get_or_init(|| Regex::new(r"(?s)<[^>]*>").expect("valid regex"));

    let text = breaks.replace_all(html, "\n");
    let text = tags.replace_all(&text, "");
    text.replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_test_utils::fixtures::inbound;

    fn msg(from: &str, subject: &str) -> ProviderMessage {
        inbound("m1", "t1", from, subject, "Sounds good")
    }

    #[test]
    fn test_genuine_replies_pass() {
        assert!(screen(&msg("Lee <lee@prospect.io>", "Re: Intro"), "Intro").is_ok());
        assert!(screen(&msg("lee@prospect.io", "[EXTERNAL] RE: Intro"), "Intro").is_ok());
        assert!(screen(&msg("lee@prospect.io", "Intro"), "Intro").is_ok());
    }

    #[test]
    fn test_auto_replies_filtered() {
        assert_eq!(
            screen(&msg("lee@prospect.io", "Out of Office: Re: Intro"), "Intro"),
            Err(FilterReason::AutoReplySubject)
        );
        assert_eq!(
            screen(&msg("MAILER-DAEMON@mx.io", "Re: Intro"), "Intro"),
            Err(FilterReason::AutomatedSender)
        );
        assert_eq!(
            screen(&msg("lee@prospect.io", "Something else"), "Intro"),
            Err(FilterReason::NotAReply)
        );

        let mut auto = msg("lee@prospect.io", "Re: Intro");
        auto.auto_submitted = Some("auto-replied".into());
        assert!(matches!(screen(&auto, "Intro"), Err(FilterReason::AutoSubmitted(_))));
        auto.auto_submitted = Some("no".into());
        assert!(screen(&auto, "Intro").is_ok());
    }

    #[test]
    fn test_normalize_subject() {
        assert_eq!(normalize_subject("[Ext] Re: Fwd: Intro "), "intro");
        assert_eq!(normalize_subject("AW: Intro"), "intro");
    }

    #[test]
    fn test_excerpt_drops_quoted_history() {
        let m = inbound(
            "m1",
            "t1",
            "lee@prospect.io",
            "Re: Intro",
            "Tuesday works.\n\nOn Mon, Mar 2, 2026 Rep wrote:\n> Hi Lee",
        );
        assert_eq!(excerpt(&m, 500), "Tuesday works.");
    }

    #[test]
    fn test_excerpt_html_fallback_and_cap() {
        let mut m = inbound("m1", "t1", "lee@prospect.io", "Re: Intro", "");
        m.text_body = None;
        m.html_body = Some("<div>Next&nbsp;week</div><p>works</p>".into());
        assert_eq!(excerpt(&m, 500), "Next week\nworks");
        assert_eq!(excerpt(&m, 4), "Next");
    }
}

use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;

use cadence_core::types::OutboundMessage;

/// Render an RFC 5322 message with CRLF line endings.
///
/// `In-Reply-To` and `References` are only emitted when an anchor is known.
pub fn build_raw(msg: &OutboundMessage) -> String {
    let mut lines = vec![
        format!("From: {}", header_value(&msg.from)),
        format!("To: {}", header_value(&msg.to)),
        format!("Subject: {}", encode_subject(&msg.subject)),
        "MIME-Version: 1.0".to_string(),
        "Content-Type: text/plain; charset=utf-8".to_string(),
    ];
    if let Some(anchor) = msg.in_reply_to.as_deref().filter(|a| !a.is_empty()) {
        lines.push(format!("In-Reply-To: {}", header_value(anchor)));
    }
    if let Some(refs) = msg.references.as_deref().filter(|r| !r.is_empty()) {
        lines.push(format!("References: {}", header_value(refs)));
    }
    lines.push(String::new());
    lines.push(msg.body.replace("\r\n", "\n").replace('\n', "\r\n"));
    lines.join("\r\n")
}

/// Base64url without padding, as the Gmail `raw` field expects.
pub fn encode_raw(raw: &str) -> String {
    URL_SAFE_NO_PAD.encode(raw.as_bytes())
}

/// Decode a Gmail body part, tolerating trailing padding.
pub fn decode_part(data: &str) -> Option<String> {
    let bytes = URL_SAFE_NO_PAD.decode(data.trim_end_matches('=')).ok()?;
    Some(String::from_utf8_lossy(&bytes).into_owned())
}

// Header values must never carry line breaks.
fn header_value(v: &str) -> String {
    v.replace(['\r', '\n'], " ")
}

fn encode_subject(subject: &str) -> String {
    let clean = header_value(subject);
    if clean.is_ascii() {
        clean
    } else {
        format!("=?UTF-8?B?{}?=", STANDARD.encode(clean.as_bytes()))
    }
}

use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;

use cadence_core::types::ProviderMessage;

use crate::mime::decode_part;

/// A message resource from the Gmail API (`format=full`).
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GmailMessage {
    pub id: String,
    #[serde(default)]
    pub thread_id: String,
    #[serde(default)]
    pub internal_date: Option<String>,
    #[serde(default)]
    pub payload: Option<Part>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Part {
    #[serde(default)]
    pub mime_type: String,
    #[serde(default)]
    pub headers: Vec<Header>,
    #[serde(default)]
    pub body: Option<PartBody>,
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Header {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PartBody {
    #[serde(default)]
    pub data: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct GmailThread {
    #[serde(default)]
    pub messages: Vec<GmailMessage>,
}

impl Part {
    fn header(&self, name: &str) -> Option<String> {
        self.headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.clone())
    }

    fn first_body(&self, mime: &str) -> Option<String> {
        if self.mime_type.eq_ignore_ascii_case(mime) {
            if let Some(text) = self
                .body
                .as_ref()
                .and_then(|b| b.data.as_deref())
                .and_then(decode_part)
            {
                return Some(text);
            }
        }
        self.parts.iter().find_map(|p| p.first_body(mime))
    }
}

impl From<GmailMessage> for ProviderMessage {
    fn from(msg: GmailMessage) -> Self {
        let part = msg.payload.unwrap_or_default();
        let received_at = msg
            .internal_date
            .as_deref()
            .and_then(|ms| ms.parse::<i64>().ok())
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
            .or_else(|| {
                part.header("Date")
                    .and_then(|d| DateTime::parse_from_rfc2822(&d).ok())
                    .map(|d| d.with_timezone(&Utc))
            });

        ProviderMessage {
            id: msg.id,
            thread_id: msg.thread_id,
            from: part.header("From").unwrap_or_default(),
            to: part.header("To").unwrap_or_default(),
            subject: part.header("Subject").unwrap_or_default(),
            message_id_header: part.header("Message-ID"),
            auto_submitted: part.header("Auto-Submitted"),
            received_at,
            text_body: part.first_body("text/plain"),
            html_body: part.first_body("text/html"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mime::encode_raw;

    #[test]
    fn test_multipart_message_conversion() {
        let json = serde_json::json!({
            "id": "m1",
            "threadId": "t1",
            "internalDate": "1772445600000",
            "payload": {
                "mimeType": "multipart/alternative",
                "headers": [
                    {"name": "From", "value": "Lee Park <lee@prospect.io>"},
                    {"name": "Subject", "value": "Re: Quick question"},
                    {"name": "Message-Id", "value": "<CAF123@mail.gmail.com>"},
                    {"name": "Auto-Submitted", "value": "no"}
                ],
                "parts": [
                    {"mimeType": "text/plain", "body": {"data": encode_raw("Tuesday works")}},
                    {"mimeType": "text/html", "body": {"data": encode_raw("<p>Tuesday works</p>")}}
                ]
            }
        });
        let msg: GmailMessage = serde_json::from_value(json).unwrap();
        let converted = ProviderMessage::from(msg);

        assert_eq!(converted.sender_address(), "lee@prospect.io");
        assert_eq!(converted.message_id_header.as_deref(), Some("<CAF123@mail.gmail.com>"));
        assert_eq!(converted.auto_submitted.as_deref(), Some("no"));
        assert_eq!(converted.text_body.as_deref(), Some("Tuesday works"));
        assert_eq!(converted.html_body.as_deref(), Some("<p>Tuesday works</p>"));
        assert_eq!(converted.received_at.unwrap().timestamp(), 1_772_445_600);
    }

    #[test]
    fn test_message_without_payload() {
        let msg: GmailMessage = serde_json::from_value(serde_json::json!({"id": "m2"})).unwrap();
        let converted = ProviderMessage::from(msg);
        assert!(converted.subject.is_empty());
        assert!(converted.text_body.is_none());
    }
}

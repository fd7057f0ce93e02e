use chrono::{DateTime, Utc};

use cadence_core::types::{Contact, MailAccount, ProviderMessage};

pub const OWNER: &str = "owner-1";
pub const OWNER_ADDRESS: &str = "rep@sender.io";
pub const CONTACT_ADDRESS: &str = "lee@prospect.io";

pub fn account() -> MailAccount {
    MailAccount {
        owner_id: OWNER.into(),
        address: OWNER_ADDRESS.into(),
        access_token: "access-token".into(),
        refresh_token: Some("refresh-token".into()),
    }
}

pub fn contact() -> Contact {
    Contact {
        id: "contact-1".into(),
        email: CONTACT_ADDRESS.into(),
        first_name: Some("Lee".into()),
        last_name: Some("Park".into()),
        company: Some("Prospect Labs".into()),
        title: Some("CTO".into()),
    }
}

/// An inbound message with only the commonly inspected fields set.
pub fn inbound(id: &str, thread_id: &str, from: &str, subject: &str, body: &str) -> ProviderMessage {
    ProviderMessage {
        id: id.into(),
        thread_id: thread_id.into(),
        from: from.into(),
        to: OWNER_ADDRESS.into(),
        subject: subject.into(),
        message_id_header: Some(format!("<{}@contact.mail>", id)),
        auto_submitted: None,
        received_at: Some(Utc::now()),
        text_body: Some(body.into()),
        html_body: None,
    }
}

/// A start node followed by a chain of email steps, in the JSON shape the
/// graph editor saves: `(node id, subject, delayType, delayValue)`.
pub fn linear_graph_json(steps: &[(&str, &str, &str, u64)]) -> serde_json::Value {
    let mut nodes = vec![serde_json::json!({"id": "start", "type": "start"})];
    let mut connections = Vec::new();
    let mut prev = "start".to_string();
    for (id, subject, delay_type, delay_value) in steps {
        nodes.push(serde_json::json!({
            "id": id,
            "type": "email",
            "config": {
                "subject": subject,
                "template": format!("Hi {{{{firstName}}}}, note {}", id),
                "delayType": delay_type,
                "delayValue": delay_value,
            }
        }));
        connections.push(serde_json::json!({"from": prev, "to": id}));
        prev = id.to_string();
    }
    serde_json::json!({"nodes": nodes, "connections": connections})
}

/// Monday 2 March 2026 at the given UTC hour.
pub fn monday_at(hour: u32) -> DateTime<Utc> {
    use chrono::TimeZone;
    Utc.with_ymd_and_hms(2026, 3, 2, hour, 0, 0).unwrap()
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::delay::DelaySpec;

/// Node types that send an email.
const EMAIL_KINDS: &[&str] = &["email", "followup-email", "followup-email2", "new-email"];

/// One node of a cadence graph, as saved by the graph editor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepNode {
    pub id: String,
    /// `start`, one of the email kinds, or anything else (ignored).
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, alias = "data")]
    pub config: EmailConfig,
}

/// Email step settings. Every field is optional in stored graphs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailConfig {
    /// Recipient used when no contact is bound.
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default, alias = "body")]
    pub template: Option<String>,
    /// `immediate`, `seconds`, `minutes`, `days` or `absolute`.
    #[serde(default)]
    pub delay_type: Option<String>,
    #[serde(default)]
    pub delay_value: Option<f64>,
    /// Target time for `absolute` delays.
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
    /// Legacy whole-day delay from older graphs.
    #[serde(default)]
    pub delay: Option<f64>,
}

impl StepNode {
    pub fn start(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: "start".into(),
            config: EmailConfig::default(),
        }
    }

    pub fn email(id: impl Into<String>, subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: "email".into(),
            config: EmailConfig {
                subject: Some(subject.into()),
                template: Some(body.into()),
                ..Default::default()
            },
        }
    }

    pub fn with_delay(mut self, delay: DelaySpec) -> Self {
        let (kind, value, at) = delay.to_config();
        self.config.delay_type = Some(kind.to_string());
        self.config.delay_value = value;
        self.config.scheduled_at = at;
        self
    }

    pub fn with_to(mut self, to: impl Into<String>) -> Self {
        self.config.to = Some(to.into());
        self
    }

    pub fn is_start(&self) -> bool {
        self.kind == "start"
    }

    pub fn is_email(&self) -> bool {
        EMAIL_KINDS.contains(&self.kind.as_str())
    }
}

impl EmailConfig {
    pub fn delay(&self) -> DelaySpec {
        DelaySpec::from_config(
            self.delay_type.as_deref(),
            self.delay_value.or(self.delay),
            self.scheduled_at,
        )
    }
}

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;

use cadence_core::config::SchedulingConfig;
use cadence_core::error::Result;
use cadence_core::traits::IntentClassifier;
use cadence_core::types::{DateRangeHint, IntentClassification, ParsedTime, SchedulingType};

use crate::dates::{mentioned_weekday, mentions_day, mentions_time, parse_time_phrase};

const AVAILABILITY_WORDS: &[&str] = &[
    "available",
    "availability",
    "free",
    "schedule",
    "calendar",
    "a call",
    "a chat",
    "meet",
    "what times",
    "when works",
    "time to talk",
    "next week",
    "this week",
];

const RANGE_LABELS: &[&str] = &[
    "next 2 weeks",
    "next two weeks",
    "next week",
    "this week",
    "tomorrow",
    "today",
];

/// Keyword classifier used when no model is configured, and as the fallback
/// when the model fails.
#[derive(Debug, Clone, Default)]
pub struct HeuristicClassifier {
    config: SchedulingConfig,
}

impl HeuristicClassifier {
    pub fn new(config: SchedulingConfig) -> Self {
        Self { config }
    }

    pub fn classify(&self, text: &str) -> IntentClassification {
        let lower = text.to_lowercase();
        if mentions_time(&lower) && (mentions_day(&lower) || lower.contains("next week")) {
            return IntentClassification {
                scheduling_type: SchedulingType::BookSpecificTime,
                suggested_times: vec![text.trim().to_string()],
                confidence: 0.6,
            };
        }
        if AVAILABILITY_WORDS.iter().any(|w| lower.contains(w)) {
            return IntentClassification {
                scheduling_type: SchedulingType::RequestAvailability,
                suggested_times: Vec::new(),
                confidence: 0.5,
            };
        }
        IntentClassification::default()
    }

    pub fn range_label(&self, phrase: &str) -> String {
        let lower = phrase.to_lowercase();
        RANGE_LABELS
            .iter()
            .find(|label| lower.contains(*label))
            .map(|label| label.to_string())
            .or_else(|| mentioned_weekday(&lower).map(|d| d.to_string().to_lowercase()))
            .unwrap_or_else(|| format!("next {} days", self.config.lookahead_days))
    }

    pub fn time(&self, phrase: &str, reference: DateTime<Utc>) -> ParsedTime {
        parse_time_phrase(phrase, reference, &self.config)
    }
}

impl IntentClassifier for HeuristicClassifier {
    fn classify_intent<'a>(
        &'a self,
        reply_text: &'a str,
    ) -> BoxFuture<'a, Result<IntentClassification>> {
        Box::pin(async move { Ok(self.classify(reply_text)) })
    }

    fn extract_date_range<'a>(&'a self, phrase: &'a str) -> BoxFuture<'a, Result<DateRangeHint>> {
        Box::pin(async move {
            Ok(DateRangeHint {
                range_label: self.range_label(phrase),
                timezone: None,
            })
        })
    }

    fn parse_time<'a>(
        &'a self,
        phrase: &'a str,
        reference: DateTime<Utc>,
    ) -> BoxFuture<'a, Result<ParsedTime>> {
        Box::pin(async move { Ok(self.time(phrase, reference)) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify() {
        let h = HeuristicClassifier::default();
        assert_eq!(
            h.classify("How about Tuesday at 2pm?").scheduling_type,
            SchedulingType::BookSpecificTime
        );
        assert_eq!(
            h.classify("I'm available next week").scheduling_type,
            SchedulingType::RequestAvailability
        );
        assert_eq!(
            h.classify("Please remove me from your list").scheduling_type,
            SchedulingType::None
        );
    }

    #[test]
    fn test_range_label() {
        let h = HeuristicClassifier::default();
        assert_eq!(h.range_label("I'm available next week"), "next week");
        assert_eq!(h.range_label("Free on Thursday"), "thu");
        assert_eq!(h.range_label("sometime"), "next 5 days");
    }
}

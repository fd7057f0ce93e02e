use std::sync::Mutex;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;

use cadence_core::error::{CadenceError, Result};
use cadence_core::traits::IntentClassifier;
use cadence_core::types::{
    DateRangeHint, IntentClassification, ParsedTime, SchedulingType,
};

#[derive(Default)]
struct Inner {
    intent: Option<IntentClassification>,
    range: Option<DateRangeHint>,
    time: Option<ParsedTime>,
    calls: Vec<String>,
}

/// Classifier returning canned answers. Any answer left unset fails with a
/// parse error, the way a misbehaving model would.
#[derive(Default)]
pub struct MockClassifier {
    inner: Mutex<Inner>,
}

impl MockClassifier {
    /// A classifier whose every call fails.
    pub fn failing() -> Self {
        Self::default()
    }

    pub fn with_intent(scheduling_type: SchedulingType) -> Self {
        let c = Self::default();
        c.inner.lock().unwrap().intent = Some(IntentClassification {
            scheduling_type,
            suggested_times: Vec::new(),
            confidence: 0.9,
        });
        c
    }

    pub fn range(self, label: &str) -> Self {
        self.inner.lock().unwrap().range = Some(DateRangeHint {
            range_label: label.to_string(),
            timezone: None,
        });
        self
    }

    pub fn time(self, parsed: ParsedTime) -> Self {
        self.inner.lock().unwrap().time = Some(parsed);
        self
    }

    /// Names of the calls made, in order.
    pub fn calls(&self) -> Vec<String> {
        self.inner.lock().unwrap().calls.clone()
    }
}

impl IntentClassifier for MockClassifier {
    fn classify_intent<'a>(
        &'a self,
        _reply_text: &'a str,
    ) -> BoxFuture<'a, Result<IntentClassification>> {
        Box::pin(async move {
            let mut inner = self.inner.lock().unwrap();
            inner.calls.push("classify_intent".into());
            inner
                .intent
                .clone()
                .ok_or_else(|| CadenceError::ClassifierParse("no intent configured".into()))
        })
    }

    fn extract_date_range<'a>(&'a self, _phrase: &'a str) -> BoxFuture<'a, Result<DateRangeHint>> {
        Box::pin(async move {
            let mut inner = self.inner.lock().unwrap();
            inner.calls.push("extract_date_range".into());
            inner
                .range
                .clone()
                .ok_or_else(|| CadenceError::ClassifierParse("no range configured".into()))
        })
    }

    fn parse_time<'a>(
        &'a self,
        _phrase: &'a str,
        _reference: DateTime<Utc>,
    ) -> BoxFuture<'a, Result<ParsedTime>> {
        Box::pin(async move {
            let mut inner = self.inner.lock().unwrap();
            inner.calls.push("parse_time".into());
            inner
                .time
                .clone()
                .ok_or_else(|| CadenceError::ClassifierParse("no time configured".into()))
        })
    }
}

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use tracing::warn;

use cadence_core::config::ClassifierConfig;
use cadence_core::error::Result;
use cadence_core::traits::IntentClassifier;
use cadence_core::types::{DateRangeHint, IntentClassification, ParsedTime};

/// A classifier that retries transient failures with jittered backoff.
///
/// Parse failures are not retried; the caller falls back instead.
pub struct RetryingClassifier {
    inner: Box<dyn IntentClassifier>,
    config: ClassifierConfig,
}

impl RetryingClassifier {
    pub fn new(inner: Box<dyn IntentClassifier>, config: ClassifierConfig) -> Self {
        Self { inner, config }
    }

    async fn with_retry<'a, T, F, Fut>(&'a self, op: &str, call: F) -> Result<T>
    where
        F: Fn(&'a dyn IntentClassifier) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_retries = self.config.max_retries;
        let mut attempt = 0;
        loop {
            match call(self.inner.as_ref()).await {
                Ok(v) => return Ok(v),
                Err(e) if e.is_transient() && attempt < max_retries => {
                    let backoff = calculate_backoff(attempt, &self.config);
                    warn!(
                        op,
                        attempt = attempt + 1,
                        max_retries,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "Retrying classifier request"
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn calculate_backoff(attempt: u32, config: &ClassifierConfig) -> Duration {
    let ms = (config.initial_backoff_ms * 2u64.pow(attempt)).min(config.max_backoff_ms);
    // Add jitter: 0.8x to 1.2x
    let jitter = 0.8 + rand::random::<f64>() * 0.4;
    Duration::from_millis((ms as f64 * jitter) as u64)
}

impl IntentClassifier for RetryingClassifier {
    fn classify_intent<'a>(
        &'a self,
        reply_text: &'a str,
    ) -> BoxFuture<'a, Result<IntentClassification>> {
        Box::pin(self.with_retry("classify_intent", move |c| c.classify_intent(reply_text)))
    }

    fn extract_date_range<'a>(&'a self, phrase: &'a str) -> BoxFuture<'a, Result<DateRangeHint>> {
        Box::pin(self.with_retry("extract_date_range", move |c| c.extract_date_range(phrase)))
    }

    fn parse_time<'a>(
        &'a self,
        phrase: &'a str,
        reference: DateTime<Utc>,
    ) -> BoxFuture<'a, Result<ParsedTime>> {
        Box::pin(self.with_retry("parse_time", move |c| c.parse_time(phrase, reference)))
    }
}

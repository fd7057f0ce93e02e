pub mod openai;
mod prompts;
pub mod retry;

use std::sync::Arc;

use cadence_core::config::ClassifierConfig;
use cadence_core::traits::IntentClassifier;

pub use openai::OpenAiClassifier;
pub use retry::RetryingClassifier;

/// Build the configured classifier, wrapped with retry.
pub fn create_classifier(config: &ClassifierConfig) -> Arc<dyn IntentClassifier> {
    Arc::new(RetryingClassifier::new(
        Box::new(OpenAiClassifier::new(config.clone())),
        config.clone(),
    ))
}

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CadenceError {
    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // Graph errors
    #[error("Graph error: {0}")]
    Graph(String),

    #[error("Graph has no start node")]
    MissingStart,

    // Storage errors
    #[error("Database error: {0}")]
    Database(String),

    // Mail provider errors
    #[error("Mail provider error: {op}: {message}")]
    Mail { op: String, message: String },

    #[error("Mail provider rejected credentials: {0}")]
    Auth(String),

    #[error("Provider rate limit hit: {0}")]
    RateLimited(String),

    #[error("No mail credentials stored for user {0}")]
    NoCredentials(String),

    // Calendar errors
    #[error("Calendar error: {0}")]
    Calendar(String),

    // Classifier errors
    #[error("Classifier request failed: {0}")]
    Classifier(String),

    #[error("Classifier returned unusable output: {0}")]
    ClassifierParse(String),

    // Execution errors
    #[error("Execution not found: {0}")]
    ExecutionNotFound(String),

    #[error("Execution cancelled")]
    Cancelled,

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CadenceError {
    /// Build a mail provider error for the named operation.
    pub fn mail(op: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Mail {
            op: op.into(),
            message: message.into(),
        }
    }

    /// Whether retrying the same request later could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            CadenceError::RateLimited(_) => true,
            CadenceError::Mail { message, .. }
            | CadenceError::Calendar(message)
            | CadenceError::Classifier(message) => {
                message.contains("429")
                    || message.contains("500")
                    || message.contains("502")
                    || message.contains("503")
                    || message.contains("timeout")
                    || message.contains("connection")
            }
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, CadenceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(CadenceError::RateLimited("gmail".into()).is_transient());
        assert!(CadenceError::mail("send", "HTTP 503 backend").is_transient());
        assert!(CadenceError::Classifier("connection reset".into()).is_transient());
        assert!(!CadenceError::Auth("token expired".into()).is_transient());
        assert!(!CadenceError::MissingStart.is_transient());
    }

    #[test]
    fn test_mail_error_display() {
        let e = CadenceError::mail("threads.get", "HTTP 404");
        assert_eq!(e.to_string(), "Mail provider error: threads.get: HTTP 404");
    }
}

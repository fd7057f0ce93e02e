use serde::{Deserialize, Serialize};

/// A directed connection between two step nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    /// Source node id.
    #[serde(alias = "source")]
    pub from: String,
    /// Target node id.
    #[serde(alias = "target")]
    pub to: String,
}

impl Edge {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }
}

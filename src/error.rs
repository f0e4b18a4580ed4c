use crate::health::PolicyError;

/// Problems that refuse a run before it starts.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
    #[error("invalid configuration: {0}")]
    Validation(String),
    #[error("no categories are configured")]
    NoCategories,
    #[error("unknown category '{0}'")]
    UnknownCategory(String),
    #[error("category '{0}' is configured more than once")]
    DuplicateCategory(String),
    #[error("invalid threshold policy for {category}: {source}")]
    InvalidPolicy {
        category: String,
        #[source]
        source: PolicyError,
    },
    #[error("invalid setting: {0}")]
    InvalidSetting(String),
}

impl ConfigError {
    pub fn invalid_policy<S: Into<String>>(category: S, source: PolicyError) -> Self {
        Self::InvalidPolicy {
            category: category.into(),
            source,
        }
    }
}

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write file {path}: {source}")]
    WriteFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse YAML: {0}")]
    ParseYaml(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("No such method '{method}' on legacy adapter (available: {})", available.join(", "))]
    NoSuchMethod {
        method: String,
        available: Vec<&'static str>,
    },

    #[error("Invalid argument for '{method}': {reason}")]
    InvalidArgument { method: String, reason: String },

    #[error("Option store error: {0}")]
    Store(String),
}

impl ConfigError {
    #[must_use]
    pub fn is_misuse(&self) -> bool {
        matches!(self, Self::NoSuchMethod { .. } | Self::InvalidArgument { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_such_method_lists_alternatives() {
        let err = ConfigError::NoSuchMethod {
            method: "get_bukket".to_string(),
            available: vec!["get_bucket_name", "get_region"],
        };
        let msg = err.to_string();
        assert!(msg.contains("get_bukket"));
        assert!(msg.contains("get_bucket_name, get_region"));
        assert!(err.is_misuse());
    }

    #[test]
    fn store_errors_are_not_misuse() {
        assert!(!ConfigError::Store("disk full".to_string()).is_misuse());
    }
}

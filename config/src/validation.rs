//! Structural and semantic checks over resolved S3 settings.

use crate::types::{EnvironmentSettings, S3Settings};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Regions accepted by [`is_valid_region`].
pub const KNOWN_REGIONS: &[&str] = &[
    "us-east-1",
    "us-east-2",
    "us-west-1",
    "us-west-2",
    "af-south-1",
    "ap-east-1",
    "ap-south-1",
    "ap-south-2",
    "ap-northeast-1",
    "ap-northeast-2",
    "ap-northeast-3",
    "ap-southeast-1",
    "ap-southeast-2",
    "ap-southeast-3",
    "ap-southeast-4",
    "ca-central-1",
    "ca-west-1",
    "eu-central-1",
    "eu-central-2",
    "eu-west-1",
    "eu-west-2",
    "eu-west-3",
    "eu-north-1",
    "eu-south-1",
    "eu-south-2",
    "il-central-1",
    "me-central-1",
    "me-south-1",
    "sa-east-1",
    "us-gov-east-1",
    "us-gov-west-1",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub tested_at: DateTime<Utc>,
}

impl ValidationResult {
    pub(crate) fn from_findings(errors: Vec<String>, warnings: Vec<String>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
            warnings,
            tested_at: Utc::now(),
        }
    }

    /// Result for a configuration that could not be resolved at all.
    pub fn unavailable(reason: impl std::fmt::Display) -> Self {
        Self::from_findings(vec![format!("configuration unavailable: {reason}")], Vec::new())
    }
}

fn bucket_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[a-z0-9][a-z0-9.-]{1,61}[a-z0-9]$").unwrap())
}

/// Lowercase letters, digits, hyphens and dots; starts and ends with a letter
/// or digit; no `..`; 3 to 63 characters.
pub fn is_valid_bucket_name(name: &str) -> bool {
    bucket_pattern().is_match(name) && !name.contains("..")
}

pub fn is_valid_region(region: &str) -> bool {
    KNOWN_REGIONS.contains(&region)
}

/// Validate S3 settings against the environment they run in.
///
/// Missing or malformed values are errors. Running in production without TLS
/// verification, or against a plain-http custom endpoint, is only a warning.
pub fn validate_s3(s3: &S3Settings, environment: &EnvironmentSettings) -> ValidationResult {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    if s3.bucket_name.is_empty() {
        errors.push("S3 bucket name is not configured".to_string());
    } else if !is_valid_bucket_name(&s3.bucket_name) {
        errors.push(format!("Invalid S3 bucket name '{}'", s3.bucket_name));
    }

    if s3.region.is_empty() {
        errors.push("AWS region is not configured".to_string());
    } else if !is_valid_region(&s3.region) {
        errors.push(format!("Unknown AWS region '{}'", s3.region));
    }

    if s3.access_key.is_empty() {
        errors.push("AWS access key is not configured".to_string());
    }
    if s3.secret_key.is_empty() {
        errors.push("AWS secret key is not configured".to_string());
    }

    if environment.is_production() {
        if !s3.verify_ssl {
            warnings.push("TLS certificate verification is disabled in production".to_string());
        }
        if s3.endpoint.starts_with("http://") {
            warnings.push(format!(
                "Custom S3 endpoint '{}' does not use TLS in production",
                s3.endpoint
            ));
        }
    }

    if environment.debug {
        warnings.push("Debug mode is enabled".to_string());
    }

    ValidationResult::from_findings(errors, warnings)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn configured() -> S3Settings {
        S3Settings {
            bucket_name: "valid-bucket-name".to_string(),
            region: "us-east-1".to_string(),
            access_key: "AKIAEXAMPLE".to_string(),
            secret_key: "secret".to_string(),
            enabled: true,
            ..S3Settings::default()
        }
    }

    #[test]
    fn accepts_documented_bucket_names() {
        let longest = "a".repeat(63);
        for name in ["valid-bucket-name", "abc", "my.bucket.01", "0tours9", longest.as_str()] {
            assert!(is_valid_bucket_name(name), "{name} should be valid");
        }
    }

    #[test]
    fn rejects_malformed_bucket_names() {
        let too_long = "a".repeat(64);
        for name in [
            "invalid..bucket",
            "INVALID",
            "ab",
            "",
            "-leading",
            "trailing-",
            ".dot",
            "dot.",
            "under_score",
            "space bucket",
            too_long.as_str(),
        ] {
            assert!(!is_valid_bucket_name(name), "{name} should be invalid");
        }
    }

    #[test]
    fn region_allow_list() {
        assert!(is_valid_region("us-east-1"));
        assert!(is_valid_region("eu-west-2"));
        assert!(!is_valid_region("invalid-region"));
        assert!(!is_valid_region("US-EAST-1"));
        assert!(!is_valid_region(""));
    }

    #[test]
    fn complete_settings_are_valid() {
        let result = validate_s3(&configured(), &EnvironmentSettings::default());
        assert!(result.valid, "{:?}", result.errors);
        assert!(result.errors.is_empty());
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn missing_fields_are_errors() {
        let result = validate_s3(&S3Settings::default(), &EnvironmentSettings::default());
        assert!(!result.valid);
        assert_eq!(result.errors.len(), 3);
        assert!(result.errors.iter().any(|e| e.contains("bucket name")));
        assert!(result.errors.iter().any(|e| e.contains("access key")));
        assert!(result.errors.iter().any(|e| e.contains("secret key")));
    }

    #[test]
    fn production_without_tls_verification_only_warns() {
        let s3 = S3Settings {
            verify_ssl: false,
            ..configured()
        };
        let result = validate_s3(&s3, &EnvironmentSettings::default());
        assert!(result.valid);
        assert_eq!(result.warnings.len(), 1);
        assert!(result.warnings[0].contains("TLS"));

        let staging = EnvironmentSettings {
            name: "staging".to_string(),
            debug: false,
        };
        assert!(validate_s3(&s3, &staging).warnings.is_empty());
    }

    #[test]
    fn plain_http_endpoint_warns_in_production() {
        let s3 = S3Settings {
            endpoint: "http://minio.internal:9000".to_string(),
            ..configured()
        };
        let result = validate_s3(&s3, &EnvironmentSettings::default());
        assert!(result.valid);
        assert!(result.warnings.iter().any(|w| w.contains("minio.internal")));
    }

    #[test]
    fn unknown_region_is_an_error() {
        let s3 = S3Settings {
            region: "invalid-region".to_string(),
            ..configured()
        };
        let result = validate_s3(&s3, &EnvironmentSettings::default());
        assert!(!result.valid);
        assert!(result.errors[0].contains("invalid-region"));
    }
}

//! Backward-compatible access to the resolved S3 configuration.
//!
//! Older callers expect flat field names such as `bucket` or `aws_region`
//! and a handful of named accessor methods. [`LegacyAdapter`] serves both
//! from the resolver without holding any state of its own.

use crate::resolver::ConfigResolver;
use crate::types::S3Settings;
use crate::ConfigError;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;

/// Legacy alias and the current field it mirrors.
pub const ALIASES: &[(&str, &str)] = &[
    ("bucket", "bucket_name"),
    ("aws_region", "region"),
    ("aws_access_key", "access_key"),
    ("aws_secret_key", "secret_key"),
    ("s3_prefix", "prefix"),
];

/// Method names accepted by [`LegacyAdapter::call`].
pub const LEGACY_METHODS: &[&str] = &[
    "get_s3_config",
    "get_bucket_name",
    "get_region",
    "get_access_key",
    "get_secret_key",
    "is_configured",
    "get",
    "get_debug_info",
    "clear_cache",
];

/// Read-only property view over the legacy mapping.
///
/// Built by deserialising the very mapping [`LegacyAdapter::get`] reads, so
/// every field equals `get(field)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LegacyView {
    pub bucket_name: String,
    pub bucket: String,
    pub region: String,
    pub aws_region: String,
    pub access_key: String,
    pub aws_access_key: String,
    pub secret_key: String,
    pub aws_secret_key: String,
    pub endpoint: String,
    pub prefix: String,
    pub s3_prefix: String,
    pub verify_ssl: bool,
    pub enabled: bool,
    pub configured: bool,
}

/// Show the first four characters of a secret.
pub fn mask_secret(secret: &str) -> String {
    if secret.is_empty() {
        return String::new();
    }
    let visible: String = secret.chars().take(4).collect();
    format!("{visible}****")
}

#[derive(Clone)]
pub struct LegacyAdapter {
    resolver: Arc<ConfigResolver>,
}

impl LegacyAdapter {
    pub fn new(resolver: Arc<ConfigResolver>) -> Self {
        Self { resolver }
    }

    pub fn resolver(&self) -> &Arc<ConfigResolver> {
        &self.resolver
    }

    /// Flat `s3` mapping with both current and legacy names, plus
    /// `configured`. An unavailable configuration reads as unconfigured
    /// defaults.
    pub fn get_s3_config_legacy(&self) -> Map<String, Value> {
        let (s3, available) = match self.resolver.s3_settings() {
            Ok(s3) => (s3, true),
            Err(e) => {
                tracing::warn!(error = %e, "Legacy adapter could not resolve S3 settings");
                (S3Settings::default(), false)
            }
        };
        let configured = available && s3.enabled;

        let mut map = match serde_json::to_value(&s3) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        };
        for (alias, field) in ALIASES {
            if let Some(value) = map.get(*field).cloned() {
                map.insert((*alias).to_string(), value);
            }
        }
        map.insert("configured".to_string(), Value::from(configured));
        map
    }

    /// Value of one legacy or current field.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.get_s3_config_legacy().remove(key)
    }

    /// Property-style access over the same mapping as [`get`](Self::get).
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ParseJson` if the mapping and the view drift
    /// apart.
    pub fn view(&self) -> Result<LegacyView, ConfigError> {
        Ok(serde_json::from_value(Value::Object(
            self.get_s3_config_legacy(),
        ))?)
    }

    pub fn is_configured(&self) -> bool {
        self.get("configured")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    /// Dispatch a legacy method by name.
    ///
    /// # Errors
    ///
    /// `ConfigError::NoSuchMethod` for names outside [`LEGACY_METHODS`];
    /// `ConfigError::InvalidArgument` when `get` is called without a string
    /// key.
    pub fn call(&self, method: &str, args: &[Value]) -> Result<Value, ConfigError> {
        let field = |name: &str| self.get(name).unwrap_or(Value::Null);
        match method {
            "get_s3_config" => Ok(Value::Object(self.get_s3_config_legacy())),
            "get_bucket_name" => Ok(field("bucket_name")),
            "get_region" => Ok(field("region")),
            "get_access_key" => Ok(field("access_key")),
            "get_secret_key" => Ok(field("secret_key")),
            "is_configured" => Ok(Value::from(self.is_configured())),
            "get" => {
                let key = args.first().and_then(Value::as_str).ok_or_else(|| {
                    ConfigError::InvalidArgument {
                        method: method.to_string(),
                        reason: "expected a string key as the first argument".to_string(),
                    }
                })?;
                let default = args.get(1).cloned().unwrap_or(Value::Null);
                Ok(self.get(key).unwrap_or(default))
            }
            "get_debug_info" => Ok(self.get_debug_info()),
            "clear_cache" => {
                self.resolver.clear_cache()?;
                Ok(Value::Null)
            }
            _ => {
                tracing::error!(method = %method, "Unknown legacy adapter method");
                Err(ConfigError::NoSuchMethod {
                    method: method.to_string(),
                    available: LEGACY_METHODS.to_vec(),
                })
            }
        }
    }

    /// Resolver metadata plus adapter diagnostics. Secrets are masked.
    pub fn get_debug_info(&self) -> Value {
        let resolver = match self.resolver.get_configuration() {
            Ok(config) => json!({
                "available": true,
                "metadata": config.to_value()["_metadata"].clone(),
            }),
            Err(e) => json!({
                "available": false,
                "error": e.to_string(),
            }),
        };

        let mut s3 = self.get_s3_config_legacy();
        for key in ["access_key", "aws_access_key", "secret_key", "aws_secret_key"] {
            if let Some(Value::String(secret)) = s3.get(key) {
                let masked = mask_secret(secret);
                s3.insert(key.to_string(), Value::from(masked));
            }
        }
        let configured = s3
            .get("configured")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let aliases: Map<String, Value> = ALIASES
            .iter()
            .map(|(alias, field)| ((*alias).to_string(), Value::from(*field)))
            .collect();

        json!({
            "resolver": resolver,
            "cache": {
                "memory": self.resolver.is_cached(),
                "persistent": self.resolver.persistent_cache_enabled(),
            },
            "adapter": {
                "configured": configured,
                "aliases": aliases,
                "methods": LEGACY_METHODS,
            },
            "s3": s3,
        })
    }
}

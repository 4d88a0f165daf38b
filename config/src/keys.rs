//! Table of known configuration keys and the name each source uses for them.

use serde_json::Value;

/// Default value of a key, which also fixes the key's type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyDefault {
    Str(&'static str),
    Bool(bool),
    Int(i64),
}

impl KeyDefault {
    #[must_use]
    pub fn to_value(self) -> Value {
        match self {
            Self::Str(s) => Value::from(s),
            Self::Bool(b) => Value::from(b),
            Self::Int(i) => Value::from(i),
        }
    }
}

/// One resolvable configuration key.
#[derive(Debug, Clone, Copy)]
pub struct KeySpec {
    /// Dotted path inside the resolved configuration.
    pub path: &'static str,
    /// Deploy-time constant name.
    pub constant: &'static str,
    /// Environment variable names, first match wins.
    pub env: &'static [&'static str],
    /// Persisted option name.
    pub option: &'static str,
    pub default: KeyDefault,
}

pub const KEYS: &[KeySpec] = &[
    KeySpec {
        path: "s3.bucket_name",
        constant: "H3_S3_BUCKET",
        env: &["H3_S3_BUCKET"],
        option: "h3tm_s3_bucket",
        default: KeyDefault::Str(""),
    },
    KeySpec {
        path: "s3.region",
        constant: "H3_S3_REGION",
        env: &["H3_S3_REGION", "AWS_REGION"],
        option: "h3tm_aws_region",
        default: KeyDefault::Str("us-east-1"),
    },
    KeySpec {
        path: "s3.access_key",
        constant: "AWS_ACCESS_KEY_ID",
        env: &["AWS_ACCESS_KEY_ID"],
        option: "h3tm_aws_access_key",
        default: KeyDefault::Str(""),
    },
    KeySpec {
        path: "s3.secret_key",
        constant: "AWS_SECRET_ACCESS_KEY",
        env: &["AWS_SECRET_ACCESS_KEY"],
        option: "h3tm_aws_secret_key",
        default: KeyDefault::Str(""),
    },
    KeySpec {
        path: "s3.endpoint",
        constant: "H3_S3_ENDPOINT",
        env: &["H3_S3_ENDPOINT"],
        option: "h3tm_s3_endpoint",
        default: KeyDefault::Str(""),
    },
    KeySpec {
        path: "s3.prefix",
        constant: "H3_S3_PREFIX",
        env: &["H3_S3_PREFIX"],
        option: "h3tm_s3_prefix",
        default: KeyDefault::Str("tours"),
    },
    KeySpec {
        path: "s3.verify_ssl",
        constant: "H3_S3_VERIFY_SSL",
        env: &["H3_S3_VERIFY_SSL"],
        option: "h3tm_s3_verify_ssl",
        default: KeyDefault::Bool(true),
    },
    KeySpec {
        path: "uploads.s3_threshold_mb",
        constant: "H3TM_S3_THRESHOLD_MB",
        env: &["H3TM_S3_THRESHOLD_MB"],
        option: "h3tm_s3_threshold",
        default: KeyDefault::Int(50),
    },
    KeySpec {
        path: "environment.name",
        constant: "H3TM_ENVIRONMENT",
        env: &["H3TM_ENVIRONMENT"],
        option: "h3tm_environment",
        default: KeyDefault::Str("production"),
    },
    KeySpec {
        path: "environment.debug",
        constant: "H3TM_DEBUG",
        env: &["H3TM_DEBUG"],
        option: "h3tm_debug",
        default: KeyDefault::Bool(false),
    },
];

/// Look up a key by its dotted path.
#[must_use]
pub fn find(path: &str) -> Option<&'static KeySpec> {
    KEYS.iter().find(|k| k.path == path)
}

/// Coerce a raw source value to the key's type.
///
/// `Ok(None)` means "not set" (empty string or null) so the next source is
/// consulted. `Err` carries a reason for a value that cannot be coerced.
pub fn coerce(spec: &KeySpec, raw: &Value) -> Result<Option<Value>, String> {
    if raw.is_null() {
        return Ok(None);
    }
    match spec.default {
        KeyDefault::Str(_) => match raw {
            Value::String(s) if s.trim().is_empty() => Ok(None),
            Value::String(s) => Ok(Some(Value::from(s.trim()))),
            Value::Number(n) => Ok(Some(Value::from(n.to_string()))),
            Value::Bool(b) => Ok(Some(Value::from(b.to_string()))),
            _ => Err("expected a string".to_string()),
        },
        KeyDefault::Bool(_) => match raw {
            Value::Bool(b) => Ok(Some(Value::from(*b))),
            Value::Number(n) => match n.as_i64() {
                Some(0) => Ok(Some(Value::from(false))),
                Some(1) => Ok(Some(Value::from(true))),
                _ => Err(format!("expected 0 or 1, got {n}")),
            },
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "" => Ok(None),
                "1" | "true" | "yes" | "on" => Ok(Some(Value::from(true))),
                "0" | "false" | "no" | "off" => Ok(Some(Value::from(false))),
                other => Err(format!("expected a boolean, got '{other}'")),
            },
            _ => Err("expected a boolean".to_string()),
        },
        KeyDefault::Int(_) => match raw {
            Value::Number(n) => n
                .as_i64()
                .map(|i| Some(Value::from(i)))
                .ok_or_else(|| format!("expected an integer, got {n}")),
            Value::String(s) if s.trim().is_empty() => Ok(None),
            Value::String(s) => s
                .trim()
                .parse::<i64>()
                .map(|i| Some(Value::from(i)))
                .map_err(|_| format!("expected an integer, got '{s}'")),
            _ => Err("expected an integer".to_string()),
        },
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Execution mode of the request that triggered resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionContext {
    Admin,
    Ajax,
    Cron,
    Frontend,
}

impl ExecutionContext {
    pub const ALL: [Self; 4] = [Self::Admin, Self::Ajax, Self::Cron, Self::Frontend];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Ajax => "ajax",
            Self::Cron => "cron",
            Self::Frontend => "frontend",
        }
    }
}

impl fmt::Display for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionContext {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "admin" => Ok(Self::Admin),
            "ajax" => Ok(Self::Ajax),
            "cron" => Ok(Self::Cron),
            "frontend" => Ok(Self::Frontend),
            other => Err(format!(
                "unknown context '{other}' (expected admin, ajax, cron or frontend)"
            )),
        }
    }
}

/// Origin of a resolved value, ordered from highest to lowest precedence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceKind {
    Constant,
    Environment,
    PersistedOption,
    Default,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Constant => "constant",
            Self::Environment => "environment",
            Self::PersistedOption => "persisted-option",
            Self::Default => "default",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct S3Settings {
    pub bucket_name: String,
    pub region: String,
    pub access_key: String,
    pub secret_key: String,
    pub endpoint: String,
    pub prefix: String,
    pub verify_ssl: bool,
    pub enabled: bool,
}

impl Default for S3Settings {
    fn default() -> Self {
        Self {
            bucket_name: String::new(),
            region: "us-east-1".to_string(),
            access_key: String::new(),
            secret_key: String::new(),
            endpoint: String::new(),
            prefix: "tours".to_string(),
            verify_ssl: true,
            enabled: false,
        }
    }
}

impl S3Settings {
    pub fn has_credentials(&self) -> bool {
        !self.access_key.is_empty() && !self.secret_key.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvironmentSettings {
    pub name: String,
    pub debug: bool,
}

impl Default for EnvironmentSettings {
    fn default() -> Self {
        Self {
            name: "production".to_string(),
            debug: false,
        }
    }
}

impl EnvironmentSettings {
    pub fn is_production(&self) -> bool {
        self.name.eq_ignore_ascii_case("production")
    }
}

/// A raw value that a source supplied but could not be coerced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IgnoredValue {
    pub path: String,
    pub source: SourceKind,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub context: ExecutionContext,
    pub sources: Vec<SourceKind>,
    pub key_sources: BTreeMap<String, SourceKind>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ignored: Vec<IgnoredValue>,
    pub resolved_at: DateTime<Utc>,
    #[serde(default)]
    pub from_persistent_cache: bool,
}

/// Merged configuration plus metadata describing how it was built.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedConfiguration {
    settings: Map<String, Value>,
    metadata: Metadata,
}

impl ResolvedConfiguration {
    pub(crate) fn new(settings: Map<String, Value>, metadata: Metadata) -> Self {
        Self { settings, metadata }
    }

    /// Resolved sections without `_metadata`.
    pub fn settings(&self) -> &Map<String, Value> {
        &self.settings
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Canonical serialization of the settings. Keys are sorted, so two
    /// resolutions from identical sources produce identical bytes.
    pub fn settings_json(&self) -> String {
        serde_json::to_string(&self.settings).unwrap_or_default()
    }

    /// Full mapping including the `_metadata` section.
    pub fn to_value(&self) -> Value {
        let mut map = self.settings.clone();
        map.insert(
            "_metadata".to_string(),
            serde_json::to_value(&self.metadata).unwrap_or(Value::Null),
        );
        Value::Object(map)
    }

    /// Dotted-path lookup. `_metadata.*` paths are served as well.
    pub fn lookup(&self, path: &str) -> Option<Value> {
        match path.split_once('.') {
            Some(("_metadata", rest)) => {
                let meta = serde_json::to_value(&self.metadata).ok()?;
                lookup_path(&meta, rest).cloned()
            }
            _ if path == "_metadata" => serde_json::to_value(&self.metadata).ok(),
            _ => lookup_in_map(&self.settings, path).cloned(),
        }
    }

    pub fn section(&self, name: &str) -> Map<String, Value> {
        if name == "_metadata" {
            return match serde_json::to_value(&self.metadata) {
                Ok(Value::Object(map)) => map,
                _ => Map::new(),
            };
        }
        match self.settings.get(name) {
            Some(Value::Object(map)) => map.clone(),
            _ => Map::new(),
        }
    }
}

/// Walk `path` segment by segment through nested objects.
pub fn lookup_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return None;
    }
    path.split('.').try_fold(value, |node, segment| match node {
        Value::Object(map) => map.get(segment),
        _ => None,
    })
}

pub fn lookup_in_map<'a>(map: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let (head, rest) = match path.split_once('.') {
        Some((head, rest)) => (head, Some(rest)),
        None => (path, None),
    };
    let node = map.get(head)?;
    match rest {
        Some(rest) => lookup_path(node, rest),
        None => Some(node),
    }
}

/// Insert `value` at `path`, creating intermediate objects as needed.
pub(crate) fn insert_path(map: &mut Map<String, Value>, path: &str, value: Value) {
    match path.split_once('.') {
        None => {
            map.insert(path.to_string(), value);
        }
        Some((head, rest)) => {
            let child = map
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !child.is_object() {
                *child = Value::Object(Map::new());
            }
            if let Value::Object(child) = child {
                insert_path(child, rest, value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> ResolvedConfiguration {
        let mut settings = Map::new();
        insert_path(&mut settings, "s3.bucket_name", json!("tours"));
        insert_path(&mut settings, "s3.region", json!("eu-west-1"));
        insert_path(&mut settings, "environment.name", json!("staging"));
        ResolvedConfiguration::new(
            settings,
            Metadata {
                context: ExecutionContext::Admin,
                sources: vec![SourceKind::Default],
                key_sources: BTreeMap::new(),
                ignored: Vec::new(),
                resolved_at: Utc::now(),
                from_persistent_cache: false,
            },
        )
    }

    #[test]
    fn dotted_lookup_descends_sections() {
        let config = sample();
        assert_eq!(config.lookup("s3.bucket_name"), Some(json!("tours")));
        assert_eq!(config.lookup("environment.name"), Some(json!("staging")));
        assert_eq!(config.lookup("_metadata.context"), Some(json!("admin")));
    }

    #[test]
    fn missing_segments_resolve_to_none() {
        let config = sample();
        assert_eq!(config.lookup("s3.nope"), None);
        assert_eq!(config.lookup("s3.bucket_name.deeper"), None);
        assert_eq!(config.lookup("nope.bucket_name"), None);
        assert_eq!(config.lookup(""), None);
    }

    #[test]
    fn section_of_unknown_name_is_empty() {
        let config = sample();
        assert_eq!(config.section("s3").len(), 2);
        assert!(config.section("missing").is_empty());
        assert!(config.section("_metadata").contains_key("context"));
    }

    #[test]
    fn to_value_includes_metadata() {
        let value = sample().to_value();
        assert_eq!(value["_metadata"]["sources"], json!(["default"]));
        assert_eq!(value["s3"]["region"], json!("eu-west-1"));
    }

    #[test]
    fn context_round_trips_through_strings() {
        for ctx in ExecutionContext::ALL {
            assert_eq!(ctx.as_str().parse::<ExecutionContext>().unwrap(), ctx);
        }
        assert!("desktop".parse::<ExecutionContext>().is_err());
    }

    #[test]
    fn source_kinds_serialize_kebab_case() {
        assert_eq!(
            serde_json::to_value(SourceKind::PersistedOption).unwrap(),
            json!("persisted-option")
        );
        assert!(SourceKind::Constant < SourceKind::Environment);
    }
}

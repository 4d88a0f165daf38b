//! Configuration sources probed by the resolver.

use crate::keys::{KeySpec, KEYS};
use crate::store::OptionStore;
use crate::types::SourceKind;
use crate::ConfigError;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::ffi::OsString;

/// A place configuration values come from.
pub trait ConfigSource: Send + Sync {
    fn kind(&self) -> SourceKind;

    /// Raw value this source holds for `key`, before coercion.
    fn lookup(&self, key: &KeySpec) -> Result<Option<Value>, ConfigError>;
}

/// Deploy-time constants. Immutable once built.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConstantSource {
    values: BTreeMap<String, Value>,
}

impl ConstantSource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        Self {
            values: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Later values override earlier ones.
    pub(crate) fn extend(&mut self, other: BTreeMap<String, Value>) {
        self.values.extend(other);
    }

    pub(crate) fn values(&self) -> &BTreeMap<String, Value> {
        &self.values
    }
}

impl ConfigSource for ConstantSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Constant
    }

    fn lookup(&self, key: &KeySpec) -> Result<Option<Value>, ConfigError> {
        Ok(self.values.get(key.constant).cloned())
    }
}

/// Snapshot of environment variables taken at construction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvironmentSource {
    vars: BTreeMap<String, String>,
}

impl EnvironmentSource {
    /// Capture the variables of the current process that map to known keys.
    ///
    /// Unrelated variables are never decoded, so non-UTF-8 entries elsewhere
    /// in the environment are harmless.
    #[must_use]
    pub fn from_process() -> Self {
        Self::from_vars_os(std::env::vars_os())
    }

    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let vars = vars
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .filter(|(k, _)| is_known_var(k))
            .collect();
        Self { vars }
    }

    /// Like [`from_vars`](Self::from_vars) over raw OS strings. A known
    /// variable whose value is not valid UTF-8 is skipped with a warning.
    pub fn from_vars_os<I>(vars: I) -> Self
    where
        I: IntoIterator<Item = (OsString, OsString)>,
    {
        let vars = vars
            .into_iter()
            .filter_map(|(name, value)| {
                let name = name.into_string().ok().filter(|n| is_known_var(n))?;
                match value.into_string() {
                    Ok(value) => Some((name, value)),
                    Err(_) => {
                        tracing::warn!(var = %name, "Ignoring non-UTF-8 environment variable");
                        None
                    }
                }
            })
            .collect();
        Self { vars }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    pub(crate) fn vars(&self) -> &BTreeMap<String, String> {
        &self.vars
    }
}

impl ConfigSource for EnvironmentSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Environment
    }

    fn lookup(&self, key: &KeySpec) -> Result<Option<Value>, ConfigError> {
        Ok(key
            .env
            .iter()
            .filter_map(|name| self.vars.get(*name))
            .find(|v| !v.trim().is_empty())
            .map(|v| Value::from(v.as_str())))
    }
}

fn is_known_var(name: &str) -> bool {
    KEYS.iter().any(|spec| spec.env.contains(&name))
}

/// Options read through the injected store, uncached.
pub struct OptionSource<'a> {
    store: &'a dyn OptionStore,
}

impl<'a> OptionSource<'a> {
    pub fn new(store: &'a dyn OptionStore) -> Self {
        Self { store }
    }
}

impl ConfigSource for OptionSource<'_> {
    fn kind(&self) -> SourceKind {
        SourceKind::PersistedOption
    }

    fn lookup(&self, key: &KeySpec) -> Result<Option<Value>, ConfigError> {
        self.store.get(key.option)
    }
}

/// Hash of the read-only sources. Changes whenever a constant or a relevant
/// environment variable changes.
pub fn identity(constants: &ConstantSource, environment: &EnvironmentSource) -> String {
    let mut hasher = Sha256::new();
    for (name, value) in constants.values() {
        hasher.update(b"c:");
        hasher.update(name.as_bytes());
        hasher.update(b"=");
        hasher.update(value.to_string().as_bytes());
        hasher.update(b"\n");
    }
    for (name, value) in environment.vars() {
        hasher.update(b"e:");
        hasher.update(name.as_bytes());
        hasher.update(b"=");
        hasher.update(value.as_bytes());
        hasher.update(b"\n");
    }
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::find;
    use crate::store::MemoryOptionStore;
    use serde_json::json;

    #[test]
    fn environment_ignores_unrelated_variables() {
        let env = EnvironmentSource::from_vars([("PATH", "/usr/bin"), ("H3_S3_BUCKET", "tours")]);
        assert_eq!(env.get("H3_S3_BUCKET"), Some("tours"));
        assert_eq!(env.get("PATH"), None);
    }

    #[cfg(unix)]
    #[test]
    fn non_utf8_variables_are_skipped() {
        use std::os::unix::ffi::OsStringExt;

        let env = EnvironmentSource::from_vars_os([
            (OsString::from_vec(b"JUNK_\xff".to_vec()), OsString::from("x")),
            (OsString::from("LANG_EXTRA"), OsString::from_vec(b"\xff\xfe".to_vec())),
            (OsString::from("H3_S3_PREFIX"), OsString::from_vec(b"\xff".to_vec())),
            (OsString::from("H3_S3_BUCKET"), OsString::from("tours")),
        ]);
        assert_eq!(env.get("H3_S3_BUCKET"), Some("tours"));
        assert_eq!(env.get("H3_S3_PREFIX"), None);
        assert_eq!(env.vars().len(), 1);
    }

    #[test]
    fn environment_uses_first_alias_present() {
        let region = find("s3.region").unwrap();
        let env = EnvironmentSource::from_vars([("AWS_REGION", "eu-west-1")]);
        assert_eq!(env.lookup(region).unwrap(), Some(json!("eu-west-1")));

        let env = EnvironmentSource::from_vars([
            ("AWS_REGION", "eu-west-1"),
            ("H3_S3_REGION", "us-west-2"),
        ]);
        assert_eq!(env.lookup(region).unwrap(), Some(json!("us-west-2")));
    }

    #[test]
    fn blank_environment_values_fall_through() {
        let region = find("s3.region").unwrap();
        let env = EnvironmentSource::from_vars([("H3_S3_REGION", " "), ("AWS_REGION", "ap-south-1")]);
        assert_eq!(env.lookup(region).unwrap(), Some(json!("ap-south-1")));

        let env = EnvironmentSource::from_vars([("H3_S3_REGION", "")]);
        assert_eq!(env.lookup(region).unwrap(), None);
    }

    #[test]
    fn option_source_reads_store() {
        let store = MemoryOptionStore::with_options([("h3tm_s3_bucket", json!("from-option"))]);
        let source = OptionSource::new(&store);
        let bucket = find("s3.bucket_name").unwrap();
        assert_eq!(source.lookup(bucket).unwrap(), Some(json!("from-option")));
        assert_eq!(source.kind(), SourceKind::PersistedOption);
    }

    #[test]
    fn identity_tracks_source_changes() {
        let constants = ConstantSource::from_pairs([("H3_S3_BUCKET", "a")]);
        let env = EnvironmentSource::default();
        let first = identity(&constants, &env);
        assert_eq!(first, identity(&constants, &env));
        assert_eq!(first.len(), 64);

        let changed = ConstantSource::from_pairs([("H3_S3_BUCKET", "b")]);
        assert_ne!(first, identity(&changed, &env));

        let env = EnvironmentSource::from_vars([("AWS_REGION", "eu-west-1")]);
        assert_ne!(first, identity(&constants, &env));
    }
}

//! Layered configuration resolution with caching.

use crate::connection::{self, ConnectionReport, DEFAULT_CONNECT_TIMEOUT};
use crate::keys::{self, KeySpec, KEYS};
use crate::source::{self, ConfigSource, ConstantSource, EnvironmentSource, OptionSource};
use crate::store::OptionStore;
use crate::types::{
    insert_path, EnvironmentSettings, ExecutionContext, IgnoredValue, Metadata,
    ResolvedConfiguration, S3Settings, SourceKind,
};
use crate::validation::{self, ValidationResult};
use crate::ConfigError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

/// Option holding the cross-process resolution cache.
pub const CACHE_OPTION: &str = "h3tm_config_cache";
/// Option holding the token that invalidates [`CACHE_OPTION`] when changed.
pub const VERSION_OPTION: &str = "h3tm_config_version";

/// Payload stored under [`CACHE_OPTION`]. Carries no context label, so every
/// entry point reads back the same settings.
#[derive(Debug, Serialize, Deserialize)]
struct CachedResolution {
    version: String,
    identity: String,
    settings: Map<String, Value>,
    key_sources: BTreeMap<String, SourceKind>,
    #[serde(default)]
    ignored: Vec<IgnoredValue>,
    resolved_at: DateTime<Utc>,
}

/// Merges constants, environment, persisted options and defaults.
///
/// Precedence is fixed: constant, then environment, then persisted option,
/// then the key's default. The merged result is cached until
/// [`clear_cache`](Self::clear_cache).
pub struct ConfigResolver {
    context: ExecutionContext,
    constants: Arc<ConstantSource>,
    environment: Arc<EnvironmentSource>,
    store: Arc<dyn OptionStore>,
    persistent_cache: bool,
    connect_timeout: Duration,
    cache: RwLock<Option<Arc<ResolvedConfiguration>>>,
}

impl ConfigResolver {
    /// Resolver over `store` alone, labelled `admin`, with no constants and an
    /// empty environment.
    pub fn new(store: Arc<dyn OptionStore>) -> Self {
        Self {
            context: ExecutionContext::Admin,
            constants: Arc::new(ConstantSource::new()),
            environment: Arc::new(EnvironmentSource::default()),
            store,
            persistent_cache: false,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            cache: RwLock::new(None),
        }
    }

    #[must_use]
    pub fn with_constants(mut self, constants: ConstantSource) -> Self {
        self.constants = Arc::new(constants);
        self
    }

    #[must_use]
    pub fn with_environment(mut self, environment: EnvironmentSource) -> Self {
        self.environment = Arc::new(environment);
        self
    }

    #[must_use]
    pub fn with_context(mut self, context: ExecutionContext) -> Self {
        self.context = context;
        self
    }

    /// Share resolutions across processes through the option store.
    #[must_use]
    pub fn with_persistent_cache(mut self, enabled: bool) -> Self {
        self.persistent_cache = enabled;
        self
    }

    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// A resolver over the same sources and store for another entry point.
    /// Starts with an empty memory cache.
    #[must_use]
    pub fn for_context(&self, context: ExecutionContext) -> Self {
        Self {
            context,
            constants: Arc::clone(&self.constants),
            environment: Arc::clone(&self.environment),
            store: Arc::clone(&self.store),
            persistent_cache: self.persistent_cache,
            connect_timeout: self.connect_timeout,
            cache: RwLock::new(None),
        }
    }

    pub fn context(&self) -> ExecutionContext {
        self.context
    }

    pub fn persistent_cache_enabled(&self) -> bool {
        self.persistent_cache
    }

    /// Whether a resolution is currently held in memory.
    pub fn is_cached(&self) -> bool {
        self.cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// The resolved configuration, built on first use and cached afterwards.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` when the option store cannot be read. Nothing is
    /// cached in that case.
    pub fn get_configuration(&self) -> Result<Arc<ResolvedConfiguration>, ConfigError> {
        if let Some(cached) = self
            .cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            return Ok(Arc::clone(cached));
        }

        let mut slot = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(cached) = slot.as_ref() {
            return Ok(Arc::clone(cached));
        }
        let resolved = Arc::new(self.resolve()?);
        *slot = Some(Arc::clone(&resolved));
        Ok(resolved)
    }

    /// Dotted-path lookup. Absent paths and an unavailable configuration both
    /// yield `default`.
    pub fn get(&self, path: &str, default: Value) -> Value {
        match self.get_configuration() {
            Ok(config) => config.lookup(path).unwrap_or(default),
            Err(e) => {
                tracing::warn!(path = %path, error = %e, "Configuration unavailable, using default");
                default
            }
        }
    }

    /// One top-level section, or an empty mapping.
    pub fn get_section(&self, name: &str) -> Map<String, Value> {
        match self.get_configuration() {
            Ok(config) => config.section(name),
            Err(e) => {
                tracing::warn!(section = %name, error = %e, "Configuration unavailable");
                Map::new()
            }
        }
    }

    /// Typed view of the `s3` section.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` when the configuration cannot be resolved.
    pub fn s3_settings(&self) -> Result<S3Settings, ConfigError> {
        let config = self.get_configuration()?;
        Ok(serde_json::from_value(Value::Object(config.section("s3")))?)
    }

    /// Typed view of the `environment` section.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` when the configuration cannot be resolved.
    pub fn environment_settings(&self) -> Result<EnvironmentSettings, ConfigError> {
        let config = self.get_configuration()?;
        Ok(serde_json::from_value(Value::Object(
            config.section("environment"),
        ))?)
    }

    /// Drop the memory cache and, when enabled, the persistent one.
    ///
    /// The memory cache is always cleared, even if the store write fails.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` when the persistent cache cannot be invalidated.
    pub fn clear_cache(&self) -> Result<(), ConfigError> {
        *self.cache.write().unwrap_or_else(PoisonError::into_inner) = None;
        if self.persistent_cache {
            self.store.delete(CACHE_OPTION)?;
            self.bump_version()?;
        }
        tracing::info!(context = %self.context, "Configuration cache cleared");
        Ok(())
    }

    /// Fresh read of a persisted option, bypassing every cache.
    pub fn get_option_with_fallback(&self, name: &str, default: Value) -> Value {
        match self.store.get(name) {
            Ok(Some(value)) => value,
            Ok(None) => default,
            Err(e) => {
                tracing::warn!(option = %name, error = %e, "Failed to read option, using default");
                default
            }
        }
    }

    /// Persist an option and invalidate every cached resolution.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` when the store rejects the write.
    pub fn update_option(&self, name: &str, value: Value) -> Result<(), ConfigError> {
        self.store.set(name, value)?;
        self.invalidate_after_write(name)
    }

    /// Delete an option and invalidate every cached resolution.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` when the store rejects the delete.
    pub fn delete_option(&self, name: &str) -> Result<bool, ConfigError> {
        let removed = self.store.delete(name)?;
        self.invalidate_after_write(name)?;
        Ok(removed)
    }

    pub fn validate_s3_configuration(&self) -> ValidationResult {
        match (self.s3_settings(), self.environment_settings()) {
            (Ok(s3), Ok(environment)) => validation::validate_s3(&s3, &environment),
            (Err(e), _) | (_, Err(e)) => ValidationResult::unavailable(e),
        }
    }

    /// Probe the configured bucket. Fails fast, without network I/O, when the
    /// settings cannot possibly work.
    pub async fn test_connection(&self) -> ConnectionReport {
        let s3 = match self.s3_settings() {
            Ok(s3) => s3,
            Err(e) => {
                tracing::warn!(error = %e, "Configuration unavailable for connection test");
                S3Settings::default()
            }
        };
        connection::test_connection(&s3, self.connect_timeout).await
    }

    fn invalidate_after_write(&self, name: &str) -> Result<(), ConfigError> {
        *self.cache.write().unwrap_or_else(PoisonError::into_inner) = None;
        self.bump_version()?;
        tracing::info!(option = %name, "Option updated, configuration cache invalidated");
        Ok(())
    }

    fn bump_version(&self) -> Result<(), ConfigError> {
        let token = uuid::Uuid::new_v4().to_string();
        self.store.set(VERSION_OPTION, Value::from(token))
    }

    fn current_version(&self) -> Result<String, ConfigError> {
        Ok(match self.store.get(VERSION_OPTION)? {
            Some(Value::String(s)) => s,
            Some(other) => other.to_string(),
            None => String::new(),
        })
    }

    fn resolve(&self) -> Result<ResolvedConfiguration, ConfigError> {
        let identity = source::identity(&self.constants, &self.environment);
        let version = if self.persistent_cache {
            let version = self.current_version()?;
            if let Some(hit) = self.load_persistent(&version, &identity)? {
                return Ok(hit);
            }
            Some(version)
        } else {
            None
        };

        let options = OptionSource::new(self.store.as_ref());
        let sources: [&dyn ConfigSource; 3] =
            [self.constants.as_ref(), self.environment.as_ref(), &options];

        let mut settings = Map::new();
        let mut key_sources = BTreeMap::new();
        let mut ignored = Vec::new();

        for spec in KEYS {
            let (value, kind) = resolve_key(spec, &sources, &mut ignored)?;
            insert_path(&mut settings, spec.path, value);
            key_sources.insert(spec.path.to_string(), kind);
        }
        derive_enabled(&mut settings, &mut key_sources);

        let resolved_at = Utc::now();
        tracing::debug!(
            context = %self.context,
            keys = key_sources.len(),
            ignored = ignored.len(),
            "Configuration resolved from sources"
        );

        if let Some(version) = version {
            self.store_persistent(&CachedResolution {
                version,
                identity,
                settings: settings.clone(),
                key_sources: key_sources.clone(),
                ignored: ignored.clone(),
                resolved_at,
            });
        }

        Ok(ResolvedConfiguration::new(
            settings,
            self.metadata(key_sources, ignored, resolved_at, false),
        ))
    }

    fn metadata(
        &self,
        key_sources: BTreeMap<String, SourceKind>,
        ignored: Vec<IgnoredValue>,
        resolved_at: DateTime<Utc>,
        from_persistent_cache: bool,
    ) -> Metadata {
        let mut sources: Vec<SourceKind> = key_sources.values().copied().collect();
        sources.sort();
        sources.dedup();
        Metadata {
            context: self.context,
            sources,
            key_sources,
            ignored,
            resolved_at,
            from_persistent_cache,
        }
    }

    fn load_persistent(
        &self,
        version: &str,
        identity: &str,
    ) -> Result<Option<ResolvedConfiguration>, ConfigError> {
        let Some(raw) = self.store.get(CACHE_OPTION)? else {
            return Ok(None);
        };
        let cached: CachedResolution = match serde_json::from_value(raw) {
            Ok(cached) => cached,
            Err(e) => {
                tracing::debug!(error = %e, "Discarding unreadable persistent cache entry");
                return Ok(None);
            }
        };
        if cached.version != version || cached.identity != identity {
            tracing::debug!("Persistent cache entry is stale");
            return Ok(None);
        }
        tracing::debug!(context = %self.context, "Configuration served from persistent cache");
        let metadata = self.metadata(cached.key_sources, cached.ignored, cached.resolved_at, true);
        Ok(Some(ResolvedConfiguration::new(cached.settings, metadata)))
    }

    fn store_persistent(&self, entry: &CachedResolution) {
        let result = serde_json::to_value(entry)
            .map_err(ConfigError::from)
            .and_then(|value| self.store.set(CACHE_OPTION, value));
        if let Err(e) = result {
            tracing::warn!(error = %e, "Failed to write persistent configuration cache");
        }
    }
}

/// First source with a usable value wins; the key's default otherwise.
fn resolve_key(
    spec: &KeySpec,
    sources: &[&dyn ConfigSource],
    ignored: &mut Vec<IgnoredValue>,
) -> Result<(Value, SourceKind), ConfigError> {
    for source in sources {
        let Some(raw) = source.lookup(spec)? else {
            continue;
        };
        match keys::coerce(spec, &raw) {
            Ok(Some(value)) => return Ok((value, source.kind())),
            Ok(None) => {}
            Err(reason) => {
                tracing::warn!(
                    key = spec.path,
                    source = %source.kind(),
                    reason = %reason,
                    "Ignoring configuration value"
                );
                ignored.push(IgnoredValue {
                    path: spec.path.to_string(),
                    source: source.kind(),
                    reason,
                });
            }
        }
    }
    Ok((spec.default.to_value(), SourceKind::Default))
}

fn derive_enabled(settings: &mut Map<String, Value>, key_sources: &mut BTreeMap<String, SourceKind>) {
    let filled = |field: &str| {
        settings
            .get("s3")
            .and_then(|s3| s3.get(field))
            .and_then(Value::as_str)
            .is_some_and(|s| !s.is_empty())
    };
    let enabled = filled("bucket_name") && filled("access_key") && filled("secret_key");
    insert_path(settings, "s3.enabled", Value::from(enabled));
    key_sources.insert("s3.enabled".to_string(), SourceKind::Default);
}

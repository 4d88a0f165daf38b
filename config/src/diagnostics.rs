//! Diagnostic harness aggregating configuration checks into one report.

use crate::adapter::LegacyAdapter;
use crate::resolver::ConfigResolver;
use crate::types::ExecutionContext;
use crate::validation::{is_valid_bucket_name, is_valid_region};
use crate::ConfigError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    pub name: String,
    pub passed: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl TestResult {
    fn pass(name: &str, message: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            passed: true,
            message: message.into(),
            warnings: Vec::new(),
        }
    }

    fn fail(name: &str, message: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            passed: false,
            message: message.into(),
            warnings: Vec::new(),
        }
    }

    fn check(name: &str, passed: bool, ok: impl Into<String>, failed: impl Into<String>) -> Self {
        if passed {
            Self::pass(name, ok)
        } else {
            Self::fail(name, failed)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub warnings: usize,
    /// Percentage of passed checks, 0 to 100.
    pub success_rate: f64,
}

impl Summary {
    fn from_results(results: &[TestResult]) -> Self {
        let total = results.len();
        let passed = results.iter().filter(|r| r.passed).count();
        let warnings = results.iter().map(|r| r.warnings.len()).sum();
        #[allow(clippy::cast_precision_loss)]
        let success_rate = if total == 0 {
            0.0
        } else {
            (passed as f64 / total as f64 * 1000.0).round() / 10.0
        };
        Self {
            total,
            passed,
            failed: total - passed,
            warnings,
            success_rate,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub summary: Summary,
    pub test_results: Vec<TestResult>,
    /// Adapter debug info, secrets masked.
    pub configuration: Value,
    pub run_id: Uuid,
    pub generated_at: DateTime<Utc>,
}

impl ValidationReport {
    fn new(results: Vec<TestResult>, configuration: Value) -> Self {
        Self {
            summary: Summary::from_results(&results),
            test_results: results,
            configuration,
            run_id: Uuid::new_v4(),
            generated_at: Utc::now(),
        }
    }

    pub fn all_passed(&self) -> bool {
        self.summary.failed == 0
    }
}

pub struct DiagnosticSuite {
    resolver: Arc<ConfigResolver>,
    adapter: LegacyAdapter,
}

impl DiagnosticSuite {
    pub fn new(resolver: Arc<ConfigResolver>) -> Self {
        let adapter = LegacyAdapter::new(Arc::clone(&resolver));
        Self { resolver, adapter }
    }

    /// Checks that need neither network nor cache invalidation.
    pub fn run_quick_validation(&self) -> ValidationReport {
        let results = self.quick_checks();
        self.finish(results)
    }

    /// Quick checks plus cache, cross-context and connectivity checks.
    ///
    /// Clears the resolver's cache as part of the run.
    pub async fn run_comprehensive_validation(&self) -> ValidationReport {
        let mut results = self.quick_checks();
        results.push(self.check_cache_coherence());
        results.push(self.check_cache_rebuild());
        results.push(self.check_context_consistency());
        results.push(self.check_connection().await);
        self.finish(results)
    }

    fn finish(&self, results: Vec<TestResult>) -> ValidationReport {
        let report = ValidationReport::new(results, self.adapter.get_debug_info());
        tracing::info!(
            total = report.summary.total,
            passed = report.summary.passed,
            failed = report.summary.failed,
            "Configuration diagnostics finished"
        );
        report
    }

    fn quick_checks(&self) -> Vec<TestResult> {
        let mut results = vec![self.check_configuration_loads()];
        let s3 = match self.resolver.s3_settings() {
            Ok(s3) => s3,
            Err(_) => return results,
        };

        results.push(TestResult::check(
            "bucket_name_syntax",
            is_valid_bucket_name(&s3.bucket_name),
            format!("Bucket name '{}' is valid", s3.bucket_name),
            format!("Bucket name '{}' is missing or malformed", s3.bucket_name),
        ));
        results.push(TestResult::check(
            "region_allow_list",
            is_valid_region(&s3.region),
            format!("Region '{}' is a known AWS region", s3.region),
            format!("Region '{}' is not a known AWS region", s3.region),
        ));
        results.push(TestResult::check(
            "credentials_present",
            s3.has_credentials(),
            "Access key and secret key are set",
            "Access key or secret key is missing",
        ));

        let validation = self.resolver.validate_s3_configuration();
        let mut s3_check = if validation.valid {
            TestResult::pass("s3_configuration", "S3 configuration is valid")
        } else {
            TestResult::fail("s3_configuration", validation.errors.join("; "))
        };
        s3_check.warnings = validation.warnings;
        results.push(s3_check);

        results.push(self.check_adapter_equivalence());
        results
    }

    fn check_configuration_loads(&self) -> TestResult {
        const NAME: &str = "configuration_loads";
        match self.resolver.get_configuration() {
            Ok(config) => {
                let sources: Vec<&str> = config
                    .metadata()
                    .sources
                    .iter()
                    .map(|s| s.as_str())
                    .collect();
                let mut result = TestResult::pass(
                    NAME,
                    format!("Resolved from sources: {}", sources.join(", ")),
                );
                result.warnings = config
                    .metadata()
                    .ignored
                    .iter()
                    .map(|i| format!("Ignored {} value for {}: {}", i.source, i.path, i.reason))
                    .collect();
                result
            }
            Err(e) => TestResult::fail(NAME, format!("Configuration unavailable: {e}")),
        }
    }

    fn check_adapter_equivalence(&self) -> TestResult {
        const NAME: &str = "adapter_property_equivalence";
        let view = match self
            .adapter
            .view()
            .and_then(|v| serde_json::to_value(v).map_err(ConfigError::from))
        {
            Ok(view) => view,
            Err(e) => return TestResult::fail(NAME, format!("Legacy view unavailable: {e}")),
        };
        let map = self.adapter.get_s3_config_legacy();
        let mismatched: Vec<&str> = map
            .keys()
            .filter(|key| view.get(key.as_str()) != self.adapter.get(key).as_ref())
            .map(String::as_str)
            .collect();
        TestResult::check(
            NAME,
            mismatched.is_empty(),
            format!("All {} legacy properties match get()", map.len()),
            format!("Properties differ from get(): {}", mismatched.join(", ")),
        )
    }

    fn check_cache_coherence(&self) -> TestResult {
        const NAME: &str = "cache_coherence";
        match (self.resolver.get_configuration(), self.resolver.get_configuration()) {
            (Ok(first), Ok(second)) => TestResult::check(
                NAME,
                first == second,
                "Repeated reads return the same configuration",
                "Repeated reads returned different configurations",
            ),
            (Err(e), _) | (_, Err(e)) => TestResult::fail(NAME, e.to_string()),
        }
    }

    fn check_cache_rebuild(&self) -> TestResult {
        const NAME: &str = "cache_rebuild";
        let before = match self.resolver.get_configuration() {
            Ok(config) => config.settings_json(),
            Err(e) => return TestResult::fail(NAME, e.to_string()),
        };
        if let Err(e) = self.resolver.clear_cache() {
            return TestResult::fail(NAME, format!("Failed to clear cache: {e}"));
        }
        if self.resolver.is_cached() {
            return TestResult::fail(NAME, "Memory cache survived clear_cache()");
        }
        match self.resolver.get_configuration() {
            Ok(after) => TestResult::check(
                NAME,
                after.settings_json() == before,
                "Rebuild after clear_cache() matches current sources",
                "Rebuild after clear_cache() produced different settings",
            ),
            Err(e) => TestResult::fail(NAME, e.to_string()),
        }
    }

    /// Same sources must resolve to the same settings from every entry point.
    ///
    /// Each context is resolved straight from the sources, bypassing the
    /// persistent cache, and then compared with what that context is actually
    /// served (which may come from the persistent cache).
    fn check_context_consistency(&self) -> TestResult {
        const NAME: &str = "context_consistency";
        let mut fresh = Vec::new();
        let mut stale = Vec::new();
        for context in ExecutionContext::ALL {
            let derived = self
                .resolver
                .for_context(context)
                .with_persistent_cache(false)
                .get_configuration();
            let served = self.resolver.for_context(context).get_configuration();
            match (derived, served) {
                (Ok(derived), Ok(served)) => {
                    let settings = derived.settings_json();
                    if served.settings_json() != settings {
                        stale.push(context.to_string());
                    }
                    fresh.push((context, settings));
                }
                (Err(e), _) | (_, Err(e)) => {
                    return TestResult::fail(NAME, format!("{context}: {e}"));
                }
            }
        }
        let (_, reference) = &fresh[0];
        let diverging: Vec<String> = fresh
            .iter()
            .filter(|(_, settings)| settings != reference)
            .map(|(context, _)| context.to_string())
            .collect();

        if !diverging.is_empty() {
            return TestResult::fail(
                NAME,
                format!("Contexts diverge from admin: {}", diverging.join(", ")),
            );
        }
        TestResult::check(
            NAME,
            stale.is_empty(),
            "admin, ajax, cron and frontend resolve identically",
            format!("Cached configuration differs from sources for: {}", stale.join(", ")),
        )
    }

    async fn check_connection(&self) -> TestResult {
        const NAME: &str = "s3_connection";
        let report = self.resolver.test_connection().await;
        if report.success {
            TestResult::pass(
                NAME,
                format!(
                    "Bucket '{}' answered with HTTP {} in {}ms",
                    report.bucket,
                    report.status.unwrap_or_default(),
                    report.elapsed_ms
                ),
            )
        } else {
            TestResult::fail(
                NAME,
                report
                    .reason
                    .unwrap_or_else(|| "connection test failed".to_string()),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::CACHE_OPTION;
    use crate::store::{MemoryOptionStore, OptionStore};
    use serde_json::json;

    fn suite(options: &[(&str, Value)]) -> DiagnosticSuite {
        let store = MemoryOptionStore::with_options(options.iter().map(|(k, v)| (*k, v.clone())));
        DiagnosticSuite::new(Arc::new(
            ConfigResolver::new(Arc::new(store)).with_persistent_cache(true),
        ))
    }

    #[test]
    fn quick_validation_on_valid_configuration() {
        let suite = suite(&[
            ("h3tm_s3_bucket", json!("valid-bucket-name")),
            ("h3tm_aws_access_key", json!("AKIAEXAMPLE")),
            ("h3tm_aws_secret_key", json!("secret")),
        ]);
        let report = suite.run_quick_validation();
        assert!(report.all_passed(), "{:#?}", report.test_results);
        assert_eq!(report.summary.total, 6);
        assert!((report.summary.success_rate - 100.0).abs() < f64::EPSILON);
        assert_eq!(report.configuration["s3"]["secret_key"], json!("secr****"));
    }

    #[test]
    fn quick_validation_reports_failures_and_warnings() {
        let suite = suite(&[
            ("h3tm_s3_bucket", json!("invalid..bucket")),
            ("h3tm_s3_verify_ssl", json!(false)),
        ]);
        let report = suite.run_quick_validation();
        assert!(!report.all_passed());
        let failed: Vec<&str> = report
            .test_results
            .iter()
            .filter(|r| !r.passed)
            .map(|r| r.name.as_str())
            .collect();
        assert!(failed.contains(&"bucket_name_syntax"));
        assert!(failed.contains(&"credentials_present"));
        assert!(failed.contains(&"s3_configuration"));
        assert!(!failed.contains(&"adapter_property_equivalence"));
        assert_eq!(report.summary.warnings, 1);
    }

    #[tokio::test]
    async fn comprehensive_validation_fails_only_on_connection_without_bucket() {
        let suite = suite(&[]);
        let report = suite.run_comprehensive_validation().await;
        let by_name = |name: &str| {
            report
                .test_results
                .iter()
                .find(|r| r.name == name)
                .unwrap()
                .clone()
        };
        assert!(by_name("cache_coherence").passed);
        assert!(by_name("cache_rebuild").passed);
        assert!(by_name("context_consistency").passed);
        let connection = by_name("s3_connection");
        assert!(!connection.passed);
        assert_eq!(connection.message, "bucket name is empty");
    }

    #[test]
    fn context_consistency_detects_stale_persistent_cache() {
        let store = Arc::new(MemoryOptionStore::with_options([(
            "h3tm_s3_bucket",
            json!("valid-bucket-name"),
        )]));
        let resolver = ConfigResolver::new(Arc::clone(&store) as Arc<dyn OptionStore>)
            .with_persistent_cache(true);
        resolver.get_configuration().unwrap();

        let mut entry = store.get(CACHE_OPTION).unwrap().unwrap();
        entry["settings"]["s3"]["bucket_name"] = json!("stale-bucket");
        store.set(CACHE_OPTION, entry).unwrap();

        let suite = DiagnosticSuite::new(Arc::new(resolver));
        let result = suite.check_context_consistency();
        assert!(!result.passed);
        assert!(result.message.contains("Cached configuration differs"), "{}", result.message);
        assert!(result.message.contains("ajax"));
    }

    #[test]
    fn context_consistency_passes_with_fresh_persistent_cache() {
        let suite = suite(&[("h3tm_s3_bucket", json!("valid-bucket-name"))]);
        suite.resolver.get_configuration().unwrap();
        assert!(suite.check_context_consistency().passed);
    }

    #[test]
    fn summary_rounds_success_rate() {
        let results = vec![
            TestResult::pass("a", ""),
            TestResult::pass("b", ""),
            TestResult::fail("c", ""),
        ];
        let summary = Summary::from_results(&results);
        assert_eq!(summary.failed, 1);
        assert!((summary.success_rate - 66.7).abs() < 1e-9);
        assert!((Summary::from_results(&[]).success_rate).abs() < f64::EPSILON);
    }
}

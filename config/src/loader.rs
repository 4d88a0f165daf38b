use crate::{ConfigError, ConstantSource};
use regex::Regex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Loads deploy-time constants from YAML files.
///
/// Files are flat mappings of constant name to value:
///
/// ```yaml
/// H3_S3_BUCKET: "tour-uploads"
/// H3_S3_REGION: "eu-west-1"
/// AWS_SECRET_ACCESS_KEY: "${TOURS_SECRET}"
/// ```
pub struct ConstantsLoader {
    explicit_file: Option<PathBuf>,
    search_paths: Vec<PathBuf>,
}

impl Default for ConstantsLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConstantsLoader {
    pub fn new() -> Self {
        let mut search_paths = Vec::new();

        if let Some(config) = dirs::config_dir() {
            search_paths.push(config.join("h3tm/constants.yaml"));
        }
        search_paths.push(PathBuf::from("./h3tm-constants.yaml"));

        #[cfg(unix)]
        search_paths.insert(0, PathBuf::from("/etc/h3tm/constants.yaml"));

        Self {
            explicit_file: None,
            search_paths,
        }
    }

    /// Load only `path`, skipping the search locations. A leading `~` is
    /// expanded.
    #[must_use]
    pub fn with_file(mut self, path: &str) -> Self {
        self.explicit_file = Some(PathBuf::from(shellexpand::tilde(path).as_ref()));
        self
    }

    #[must_use]
    pub fn with_search_paths(mut self, paths: Vec<PathBuf>) -> Self {
        self.search_paths = paths;
        self
    }

    /// `H3TM_CONSTANTS` wins over an explicit file; otherwise every existing
    /// search path is merged, later files overriding earlier ones.
    pub fn load(&self) -> Result<ConstantSource, ConfigError> {
        self.load_with_override(std::env::var("H3TM_CONSTANTS").ok().as_deref())
    }

    fn load_with_override(&self, env_path: Option<&str>) -> Result<ConstantSource, ConfigError> {
        let mut constants = ConstantSource::new();

        if let Some(env_path) = env_path.filter(|p| !p.trim().is_empty()) {
            let path = PathBuf::from(shellexpand::tilde(env_path).as_ref());
            constants.extend(self.read_file(&path)?);
        } else if let Some(ref explicit) = self.explicit_file {
            constants.extend(self.read_file(explicit)?);
        } else {
            for path in &self.search_paths {
                if path.exists() {
                    tracing::debug!(path = %path.display(), "Loading constants");
                    constants.extend(self.read_file(path)?);
                }
            }
        }

        Ok(constants)
    }

    fn read_file(&self, path: &Path) -> Result<BTreeMap<String, Value>, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source: e,
        })?;
        self.parse_yaml(&content)
    }

    fn parse_yaml(&self, content: &str) -> Result<BTreeMap<String, Value>, ConfigError> {
        let expanded = expand_vars(content, |name| std::env::var(name).ok());
        let parsed: Option<BTreeMap<String, Value>> = serde_yaml::from_str(&expanded)?;
        Ok(parsed.unwrap_or_default())
    }

}

/// Replace each `${NAME}` with `lookup(NAME)`, or nothing when unset.
fn expand_vars(content: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let re = Regex::new(r"\$\{([^}]+)\}").unwrap();
    re.replace_all(content, |caps: &regex::Captures| {
        lookup(&caps[1]).unwrap_or_default()
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vars(name: &str) -> Option<String> {
        (name == "TOURS_SECRET").then(|| "hello".to_string())
    }

    #[test]
    fn expand_vars_substitutes_known_names() {
        let result = expand_vars("AWS_SECRET_ACCESS_KEY: ${TOURS_SECRET}", vars);
        assert_eq!(result, "AWS_SECRET_ACCESS_KEY: hello");
    }

    #[test]
    fn missing_var_becomes_empty() {
        assert_eq!(expand_vars("value: ${NONEXISTENT_VAR_XYZ}", vars), "value: ");
    }

    #[test]
    fn override_path_wins_over_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let explicit = dir.path().join("explicit.yaml");
        let env_file = dir.path().join("env.yaml");
        std::fs::write(&explicit, "H3_S3_BUCKET: explicit-bucket\n").unwrap();
        std::fs::write(&env_file, "H3_S3_BUCKET: env-bucket\n").unwrap();

        let loader = ConstantsLoader::new().with_file(explicit.to_str().unwrap());
        let constants = loader.load_with_override(env_file.to_str()).unwrap();
        assert_eq!(constants.get("H3_S3_BUCKET"), Some(&json!("env-bucket")));

        let constants = loader.load_with_override(Some("")).unwrap();
        assert_eq!(constants.get("H3_S3_BUCKET"), Some(&json!("explicit-bucket")));
    }

    #[test]
    fn later_files_override_earlier() {
        let dir = tempfile::tempdir().unwrap();
        let system = dir.path().join("system.yaml");
        let local = dir.path().join("local.yaml");
        std::fs::write(&system, "H3_S3_BUCKET: system-bucket\nH3_S3_REGION: eu-west-1\n").unwrap();
        std::fs::write(&local, "H3_S3_BUCKET: local-bucket\nH3_S3_VERIFY_SSL: false\n").unwrap();

        let constants = ConstantsLoader::new()
            .with_search_paths(vec![system, local, dir.path().join("absent.yaml")])
            .load_with_override(None)
            .unwrap();
        assert_eq!(constants.get("H3_S3_BUCKET"), Some(&json!("local-bucket")));
        assert_eq!(constants.get("H3_S3_REGION"), Some(&json!("eu-west-1")));
        assert_eq!(constants.get("H3_S3_VERIFY_SSL"), Some(&json!(false)));
    }

    #[test]
    fn empty_file_yields_no_constants() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.yaml");
        std::fs::write(&path, "").unwrap();
        let constants = ConstantsLoader::new()
            .with_file(path.to_str().unwrap())
            .load_with_override(None)
            .unwrap();
        assert!(constants.is_empty());
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let err = ConstantsLoader::new()
            .with_file("/nonexistent/h3tm/constants.yaml")
            .load_with_override(None)
            .unwrap_err();
        assert!(matches!(err, ConfigError::ReadFile { .. }));
    }
}

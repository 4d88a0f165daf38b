use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Defaults for `h3tm-diag`, saved by `h3tm-diag init`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_options")]
    pub options: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constants: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            options: default_options(),
            constants: None,
        }
    }
}

fn default_options() -> String {
    "~/.config/h3tm/options.json".to_string()
}

/// Expand a leading `~` in a configured path.
pub fn expand(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).as_ref())
}

impl Config {
    pub fn path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("h3tm")
            .join("diag.toml")
    }

    pub fn load_from(path: &Path) -> Result<Self, String> {
        if !path.exists() {
            return Err(format!(
                "Config not found at {}. Run 'h3tm-diag init' first.",
                path.display()
            ));
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config: {}", e))?;

        toml::from_str(&content).map_err(|e| format!("Failed to parse config: {}", e))
    }

    /// Defaults when no config file exists; read and parse errors are
    /// reported.
    pub fn load_or_default() -> Result<Self, String> {
        Self::load_or_default_from(&Self::path())
    }

    pub fn load_or_default_from(path: &Path) -> Result<Self, String> {
        if path.exists() {
            Self::load_from(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<(), String> {
        self.save_to(&Self::path())
    }

    pub fn save_to(&self, path: &Path) -> Result<(), String> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| format!("Failed to create config directory: {}", e))?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| format!("Failed to serialize config: {}", e))?;

        std::fs::write(path, content).map_err(|e| format!("Failed to write config: {}", e))?;

        Ok(())
    }
}

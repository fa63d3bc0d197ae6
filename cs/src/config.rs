//! Configuration for the cast tool

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

use castcore::Registry;
use castcore::registry::{CAST_HOME_ENV, DEFAULT_VAULT_LOCATION, REGISTRY_FILE};

pub const LOCAL_CONFIG: &str = ".cast.yml";
pub const CONFIG_FILE: &str = "cast.yml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    /// Directory holding the machine registry; `$CAST_HOME` wins over this
    #[serde(default)]
    pub cast_home: Option<PathBuf>,

    /// Resolve conflicts with the default policy instead of prompting
    #[serde(default)]
    pub non_interactive: bool,

    /// Follow peers of peers during hsync
    #[serde(default = "default_cascade")]
    pub cascade: bool,

    /// Vault directory used by `cast init`
    #[serde(default = "default_vault_location")]
    pub vault_location: String,
}

fn default_cascade() -> bool {
    true
}

fn default_vault_location() -> String {
    DEFAULT_VAULT_LOCATION.to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cast_home: None,
            non_interactive: false,
            cascade: default_cascade(),
            vault_location: default_vault_location(),
        }
    }
}

impl Config {
    /// Load config from file, or use defaults
    pub fn load(path: Option<&PathBuf>) -> Result<Self> {
        if let Some(config_path) = path {
            return Self::load_file(config_path);
        }

        let default_paths = [
            Some(PathBuf::from(LOCAL_CONFIG)),
            dirs::config_dir().map(|p| p.join("cast").join(CONFIG_FILE)),
        ];

        for path in default_paths.iter().flatten() {
            if path.exists() {
                return Self::load_file(path);
            }
        }

        debug!("No config file found, using defaults");
        Ok(Config::default())
    }

    fn load_file(path: &Path) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).wrap_err_with(|| format!("Failed to read config {}", path.display()))?;
        let config: Config =
            serde_yaml::from_str(&content).wrap_err_with(|| format!("Failed to parse config {}", path.display()))?;
        debug!(path = %path.display(), "Loaded config");
        Ok(config)
    }

    /// Save config to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Registry location: `$CAST_HOME`, then `cast-home`, then `~/.cast`
    pub fn registry_path(&self) -> Result<PathBuf> {
        let env_set = std::env::var(CAST_HOME_ENV).is_ok_and(|h| !h.trim().is_empty());
        match &self.cast_home {
            Some(home) if !env_set => Ok(home.join(REGISTRY_FILE)),
            _ => Ok(Registry::default_path()?),
        }
    }

    pub fn load_registry(&self) -> Result<Registry> {
        let path = self.registry_path()?;
        Registry::load(&path).wrap_err_with(|| format!("Failed to load registry {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert!(config.cascade);
        assert!(!config.non_interactive);
        assert_eq!(config.vault_location, "01 Vault");
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("cast.yml");
        std::fs::write(&path, "non-interactive: true\n").unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert!(config.non_interactive);
        assert!(config.cascade);
        assert_eq!(config.cast_home, None);
    }

    #[test]
    fn test_save_and_reload() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("cast.yml");
        let config = Config {
            cast_home: Some(temp.path().join("home")),
            cascade: false,
            ..Default::default()
        };
        config.save(&path).unwrap();
        assert_eq!(Config::load(Some(&path)).unwrap(), config);
    }

    #[test]
    fn test_explicit_missing_file_is_an_error() {
        let temp = TempDir::new().unwrap();
        assert!(Config::load(Some(&temp.path().join("nope.yml"))).is_err());
    }

    #[test]
    #[serial]
    fn test_cast_home_env_wins_over_config() {
        let temp = TempDir::new().unwrap();
        let config = Config {
            cast_home: Some(temp.path().join("configured")),
            ..Default::default()
        };

        unsafe { std::env::set_var(CAST_HOME_ENV, temp.path().join("env")) };
        let from_env = config.registry_path().unwrap();
        unsafe { std::env::remove_var(CAST_HOME_ENV) };

        assert_eq!(from_env, temp.path().join("env").join(REGISTRY_FILE));
        assert_eq!(
            config.registry_path().unwrap(),
            temp.path().join("configured").join(REGISTRY_FILE)
        );
    }
}

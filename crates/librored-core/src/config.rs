//! Configuration management for the LibroRed client.
//!
//! Loads configuration from ${LIBRORED_HOME}/config.toml with sensible defaults.

use std::fs;
use std::io::Write;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Environment variable that overrides `base_url`.
pub const BASE_URL_ENV: &str = "LIBRORED_BASE_URL";

/// Returns the default config template with comments.
///
/// This is embedded from default_config.toml at compile time.
/// To update, edit default_config.toml directly or run `cargo xtask`.
fn default_config_template() -> &'static str {
    include_str!("../default_config.toml")
}

/// Lays `defaults` over the commented template.
///
/// Values are replaced in place so the template's comments around them stay;
/// keys the template lacks are appended.
fn overlay_defaults(template: &mut toml_edit::Table, defaults: &toml_edit::Table) {
    use toml_edit::Item;

    for (key, incoming) in defaults.iter() {
        match (template.get_mut(key), incoming) {
            (_, Item::None) => {}
            (Some(Item::Table(existing)), Item::Table(incoming)) => {
                overlay_defaults(existing, incoming);
            }
            (Some(Item::Value(existing)), Item::Value(incoming)) => {
                let decor = existing.decor().clone();
                *existing = incoming.clone();
                *existing.decor_mut() = decor;
            }
            (Some(slot), incoming) => *slot = incoming.clone(),
            (None, incoming) => {
                template.insert(key, incoming.clone());
            }
        }
    }
}

pub mod paths {
    //! Path resolution for LibroRed configuration and data files.
    //!
    //! LIBRORED_HOME resolution order:
    //! 1. LIBRORED_HOME environment variable (if set)
    //! 2. ~/.config/librored (default)

    use std::path::PathBuf;

    /// Returns the LibroRed home directory.
    pub fn librored_home() -> PathBuf {
        if let Ok(home) = std::env::var("LIBRORED_HOME") {
            return PathBuf::from(home);
        }

        dirs::home_dir().map_or_else(
            || PathBuf::from(".librored"),
            |h| h.join(".config").join("librored"),
        )
    }

    /// Returns the path to the config.toml file.
    pub fn config_path() -> PathBuf {
        librored_home().join("config.toml")
    }

    /// Returns the path to the persisted session (token store).
    pub fn session_path() -> PathBuf {
        librored_home().join("session.json")
    }

    /// Returns the directory log files are written to.
    pub fn logs_dir() -> PathBuf {
        librored_home().join("logs")
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when `LIBRORED_LOG` is unset.
    pub level: String,
    /// Log to a file under `logs/` instead of stderr.
    pub file: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: true,
        }
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base URL of the REST API (the identity service lives under `/auth`)
    pub base_url: String,

    /// Timeout for a single API request in seconds (0 disables)
    pub request_timeout_secs: u64,

    /// Upper bound on a token refresh in seconds (minimum 1)
    pub refresh_timeout_secs: u64,

    /// Replays run concurrently after a refresh
    pub max_concurrent_replays: usize,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    const DEFAULT_BASE_URL: &str = "https://localhost:8443/api";
    const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
    const DEFAULT_REFRESH_TIMEOUT_SECS: u64 = 10;
    const DEFAULT_MAX_CONCURRENT_REPLAYS: usize = 4;

    /// Loads configuration from the default config path, then applies the
    /// `LIBRORED_BASE_URL` override.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&paths::config_path())?;
        if let Ok(url) = std::env::var(BASE_URL_ENV)
            && !url.trim().is_empty()
        {
            config.base_url = url.trim().to_string();
        }
        Ok(config)
    }

    /// Loads configuration from a specific path.
    /// Returns defaults if file doesn't exist.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config from {}", path.display()))?;
            toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config from {}", path.display()))
        } else {
            Ok(Config::default())
        }
    }

    /// Parses `base_url`, falling back to the default when it is blank.
    ///
    /// Trailing slashes are stripped so paths can be appended verbatim.
    ///
    /// # Errors
    /// Returns an error if the URL is not well-formed.
    pub fn effective_base_url(&self) -> Result<url::Url> {
        let candidate = match self.base_url.trim() {
            "" => Self::DEFAULT_BASE_URL,
            url => url,
        };

        let trimmed = candidate.trim_end_matches('/');
        url::Url::parse(trimmed).with_context(|| format!("Invalid API base URL: {trimmed}"))
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        if self.request_timeout_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.request_timeout_secs))
        }
    }

    /// The refresh bound is never disabled: zero is raised to one second.
    pub fn refresh_timeout(&self) -> Duration {
        Duration::from_secs(self.refresh_timeout_secs.max(1))
    }

    pub fn max_concurrent_replays(&self) -> usize {
        self.max_concurrent_replays.max(1)
    }

    /// Creates a default config file at the given path.
    ///
    /// # Errors
    /// Returns an error if the file already exists or cannot be written.
    pub fn init(path: &Path) -> Result<()> {
        if path.exists() {
            anyhow::bail!("Config file already exists at {}", path.display());
        }

        Self::write_config(path, default_config_template())
    }

    /// Generates a fresh config TOML from Rust defaults.
    ///
    /// This is used by `xtask update-default-config` to keep
    /// `default_config.toml` in sync with Rust default values.
    ///
    /// # Errors
    /// Returns an error if the template or generated values fail to parse.
    pub fn generate() -> Result<String> {
        use toml_edit::DocumentMut;

        let config = Config::default();
        let generated_toml =
            toml::to_string(&config).context("Failed to serialize default config to TOML")?;

        // Template is the base so comments survive
        let mut doc: DocumentMut = default_config_template()
            .parse()
            .context("Failed to parse default config template")?;

        let generated_doc: DocumentMut = generated_toml
            .parse()
            .context("Failed to parse generated config")?;

        overlay_defaults(doc.as_table_mut(), generated_doc.as_table());

        Ok(doc.to_string())
    }

    /// Writes config content through a temp file in the target directory, so a
    /// failed write never leaves a partial config behind.
    fn write_config(path: &Path, content: &str) -> Result<()> {
        let dir = path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create directory {}", dir.display()))?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir)
            .with_context(|| format!("Failed to create temp file in {}", dir.display()))?;
        tmp.write_all(content.as_bytes())
            .with_context(|| format!("Failed to write config to {}", tmp.path().display()))?;
        tmp.persist(path)
            .with_context(|| format!("Failed to replace {}", path.display()))?;

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: Self::DEFAULT_BASE_URL.to_string(),
            request_timeout_secs: Self::DEFAULT_REQUEST_TIMEOUT_SECS,
            refresh_timeout_secs: Self::DEFAULT_REFRESH_TIMEOUT_SECS,
            max_concurrent_replays: Self::DEFAULT_MAX_CONCURRENT_REPLAYS,
            logging: LoggingConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::tempdir;

    use super::*;

    #[test]
    fn test_load_missing_file_returns_defaults() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("nonexistent.toml");

        let config = Config::load_from(&config_path).unwrap();
        assert_eq!(config.base_url, "https://localhost:8443/api");
        assert_eq!(config.refresh_timeout_secs, 10);
        assert!(config.logging.file);
    }

    #[test]
    fn test_load_partial_config_merges_defaults() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.toml");

        fs::write(
            &config_path,
            "base_url = \"http://books.local/api\"\n[logging]\nlevel = \"debug\"\n",
        )
        .unwrap();

        let config = Config::load_from(&config_path).unwrap();
        assert_eq!(config.base_url, "http://books.local/api");
        assert_eq!(config.request_timeout_secs, 30);
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.file);
    }

    #[test]
    fn test_load_invalid_toml_is_error() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.toml");
        fs::write(&config_path, "base_url = [").unwrap();

        let err = Config::load_from(&config_path).unwrap_err();
        assert!(format!("{err:#}").contains("Failed to parse config"));
    }

    #[test]
    fn test_init_creates_config_with_defaults() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("subdir").join("config.toml");

        Config::init(&config_path).unwrap();

        let contents = fs::read_to_string(&config_path).unwrap();
        assert!(contents.contains("refresh_timeout_secs = 10"));
        assert!(contents.contains("[logging]"));

        // Template must round-trip through the loader
        let loaded = Config::load_from(&config_path).unwrap();
        assert_eq!(loaded.max_concurrent_replays, 4);
    }

    #[test]
    fn test_init_leaves_no_temp_files() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.toml");

        Config::init(&config_path).unwrap();

        let entries: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from("config.toml")]);
    }

    #[test]
    fn test_overlay_keeps_comments_and_appends_missing_keys() {
        let mut template: toml_edit::DocumentMut =
            "# top\nbase_url = \"old\"\n\n[logging]\n# level comment\nlevel = \"warn\"\n"
                .parse()
                .unwrap();
        let defaults: toml_edit::DocumentMut =
            "base_url = \"new\"\n\n[logging]\nlevel = \"info\"\nfile = \"x.log\"\n"
                .parse()
                .unwrap();

        overlay_defaults(template.as_table_mut(), defaults.as_table());

        let rendered = template.to_string();
        assert!(rendered.contains("# top"));
        assert!(rendered.contains("# level comment"));
        let parsed: toml::Value = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed["base_url"].as_str(), Some("new"));
        assert_eq!(parsed["logging"]["level"].as_str(), Some("info"));
        assert_eq!(parsed["logging"]["file"].as_str(), Some("x.log"));
    }

    #[test]
    fn test_init_fails_if_exists() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.toml");

        fs::write(&config_path, "").unwrap();

        assert!(Config::init(&config_path).is_err());
    }

    #[test]
    fn test_generate_keeps_template_comments() {
        let generated = Config::generate().unwrap();
        assert!(generated.contains("# Upper bound on a token refresh"));
        assert!(generated.contains("base_url = \"https://localhost:8443/api\""));
    }

    #[test]
    fn test_refresh_timeout_never_zero() {
        let config = Config {
            refresh_timeout_secs: 0,
            ..Default::default()
        };
        assert_eq!(config.refresh_timeout(), Duration::from_secs(1));
    }

    #[test]
    fn test_effective_base_url_trims_and_defaults() {
        let config = Config {
            base_url: "http://books.local/api/".to_string(),
            ..Default::default()
        };
        assert_eq!(
            config.effective_base_url().unwrap().as_str(),
            "http://books.local/api"
        );

        let blank = Config {
            base_url: "  ".to_string(),
            ..Default::default()
        };
        assert_eq!(
            blank.effective_base_url().unwrap().as_str(),
            "https://localhost:8443/api"
        );

        let invalid = Config {
            base_url: "not a url".to_string(),
            ..Default::default()
        };
        assert!(invalid.effective_base_url().is_err());
    }

    #[test]
    fn test_request_timeout_zero_disables() {
        let config = Config {
            request_timeout_secs: 0,
            ..Default::default()
        };
        assert!(config.request_timeout().is_none());
    }
}

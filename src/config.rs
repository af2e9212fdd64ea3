//! Configuration loader and validator for the door client.
use crate::model::CheckAction;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub backend: Backend,
    #[serde(default)]
    pub display: Display,
    #[serde(default)]
    pub scanner: Scanner,
}

/// Remote ticketing backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Backend {
    pub base_url: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

/// Rotating token display settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Display {
    pub refresh_interval_ms: u64,
    pub progress_tick_ms: u64,
    pub qr_margin: u32,
}

/// Door scanner settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Scanner {
    pub poll_interval_ms: u64,
    pub facing_mode: FacingMode,
    pub default_action: CheckAction,
}

/// Which camera the scanner asks the platform for.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FacingMode {
    #[default]
    Environment,
    User,
}

fn default_timeout_ms() -> u64 {
    10_000
}

impl Default for Display {
    fn default() -> Self {
        Self {
            refresh_interval_ms: 15_000,
            progress_tick_ms: 100,
            qr_margin: 2,
        }
    }
}

impl Default for Scanner {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1_200,
            facing_mode: FacingMode::Environment,
            default_action: CheckAction::In,
        }
    }
}

impl Display {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }

    pub fn progress_tick(&self) -> Duration {
        Duration::from_millis(self.progress_tick_ms)
    }
}

impl Scanner {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Backend {
    /// Parsed base URL, normalized to end with `/` so relative joins keep the path prefix.
    pub fn url(&self) -> Result<Url, ConfigError> {
        let mut raw = self.base_url.trim().to_string();
        if !raw.ends_with('/') {
            raw.push('/');
        }
        Url::parse(&raw).map_err(|_| ConfigError::Invalid("backend.base_url must be an absolute URL"))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    parse(&content)
}

/// Parse and validate a YAML document.
pub fn parse(content: &str) -> Result<Config, ConfigError> {
    let cfg: Config = serde_yaml::from_str(content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.backend.base_url.trim().is_empty() {
        return Err(ConfigError::Invalid("backend.base_url must be non-empty"));
    }
    let url = cfg.backend.url()?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ConfigError::Invalid("backend.base_url must use http or https"));
    }
    if cfg.backend.timeout_ms == 0 {
        return Err(ConfigError::Invalid("backend.timeout_ms must be > 0"));
    }

    if cfg.display.refresh_interval_ms == 0 {
        return Err(ConfigError::Invalid("display.refresh_interval_ms must be > 0"));
    }
    if cfg.display.progress_tick_ms == 0 {
        return Err(ConfigError::Invalid("display.progress_tick_ms must be > 0"));
    }

    if cfg.scanner.poll_interval_ms == 0 {
        return Err(ConfigError::Invalid("scanner.poll_interval_ms must be > 0"));
    }

    Ok(())
}

/// Returns an example YAML configuration.
pub fn example() -> &'static str {
    r#"backend:
  base_url: "http://localhost:8080/"
  timeout_ms: 10000

display:
  refresh_interval_ms: 15000
  progress_tick_ms: 100
  qr_margin: 2

scanner:
  poll_interval_ms: 1200
  facing_mode: environment
  default_action: in
"#
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn parse_example_ok() {
        let cfg = parse(example()).unwrap();
        assert_eq!(cfg.display.refresh_interval(), Duration::from_millis(15_000));
        assert_eq!(cfg.scanner.poll_interval(), Duration::from_millis(1_200));
        assert_eq!(cfg.scanner.default_action, CheckAction::In);
        assert_eq!(cfg.scanner.facing_mode, FacingMode::Environment);
    }

    #[test]
    fn omitted_sections_use_defaults() {
        let cfg = parse("backend:\n  base_url: \"https://tickets.example.com/api\"\n").unwrap();
        assert_eq!(cfg.display, Display::default());
        assert_eq!(cfg.scanner, Scanner::default());
        assert_eq!(cfg.backend.timeout_ms, 10_000);
        assert_eq!(
            cfg.backend.url().unwrap().as_str(),
            "https://tickets.example.com/api/"
        );
    }

    #[test]
    fn legacy_refresh_interval_is_just_config() {
        let yaml = example().replace("refresh_interval_ms: 15000", "refresh_interval_ms: 5000");
        let cfg = parse(&yaml).unwrap();
        assert_eq!(cfg.display.refresh_interval(), Duration::from_millis(5_000));
    }

    #[test]
    fn invalid_base_url() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.backend.base_url = "".into();
        let err = validate(&cfg).unwrap_err();
        match err { ConfigError::Invalid(msg) => assert!(msg.contains("backend.base_url")), _ => panic!("wrong error") }

        cfg.backend.base_url = "not a url".into();
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));

        cfg.backend.base_url = "ftp://tickets.example.com/".into();
        let err = validate(&cfg).unwrap_err();
        match err { ConfigError::Invalid(msg) => assert!(msg.contains("http")), _ => panic!("wrong error") }
    }

    #[test]
    fn invalid_zero_intervals() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.display.refresh_interval_ms = 0;
        let err = validate(&cfg).unwrap_err();
        match err { ConfigError::Invalid(msg) => assert!(msg.contains("refresh_interval_ms")), _ => panic!("wrong error") }

        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.display.progress_tick_ms = 0;
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));

        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.scanner.poll_interval_ms = 0;
        let err = validate(&cfg).unwrap_err();
        match err { ConfigError::Invalid(msg) => assert!(msg.contains("scanner.poll_interval_ms")), _ => panic!("wrong error") }

        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.backend.timeout_ms = 0;
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn unknown_action_is_parse_error() {
        let yaml = example().replace("default_action: in", "default_action: sideways");
        assert!(matches!(parse(&yaml), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn load_from_file_ok() {
        let td = tempdir().unwrap();
        let p = td.path().join("config.yaml");
        fs::write(&p, example()).unwrap();
        let cfg = load(Some(&p)).unwrap();
        assert_eq!(cfg.backend.base_url, "http://localhost:8080/");
    }

    #[test]
    fn load_missing_file_is_io_error() {
        let td = tempdir().unwrap();
        let p = td.path().join("absent.yaml");
        assert!(matches!(load(Some(&p)), Err(ConfigError::Io(_))));
    }
}

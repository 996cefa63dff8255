//! Configuration loading.
//!
//! Each setting resolves in priority order:
//! 1. Command-line flag or its environment variable (handled by clap)
//! 2. TOML config file
//! 3. Compiled default

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::backend;
use crate::error::{Error, Result};
use crate::skills::SkillWeights;

pub const DEFAULT_DATA_DIR: &str = "data";
pub const DEFAULT_AGGREGATED_DIR: &str = "data/aggregated";
pub const DEFAULT_LOG_FILTER: &str = "learner_insights=info";

/// Shape of the optional TOML file. Every key may be omitted.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub data_dir: Option<PathBuf>,
    pub aggregated_dir: Option<PathBuf>,
    pub backend_url: Option<String>,
    pub backend_timeout_ms: Option<u64>,
    pub log_filter: Option<String>,
    pub skill_weights: Option<SkillWeights>,
}

impl FileConfig {
    /// `Ok(None)` when the file does not exist; a malformed file is an error.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(Error::Io {
                    path: path.display().to_string(),
                    source,
                })
            }
        };

        toml::from_str(&content)
            .map(Some)
            .map_err(|source| Error::Toml {
                path: path.display().to_string(),
                source,
            })
    }
}

/// Values supplied on the command line or through the environment.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub data_dir: Option<PathBuf>,
    pub aggregated_dir: Option<PathBuf>,
    pub backend_url: Option<String>,
    pub backend_timeout_ms: Option<u64>,
    pub no_backend: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub data_dir: PathBuf,
    pub aggregated_dir: PathBuf,
    pub backend_url: Option<String>,
    pub backend_timeout: Duration,
    pub log_filter: String,
    pub skill_weights: SkillWeights,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            aggregated_dir: PathBuf::from(DEFAULT_AGGREGATED_DIR),
            backend_url: None,
            backend_timeout: backend::DEFAULT_TIMEOUT,
            log_filter: DEFAULT_LOG_FILTER.to_string(),
            skill_weights: SkillWeights::default(),
        }
    }
}

impl Config {
    pub fn resolve(overrides: Overrides, file: FileConfig) -> Result<Self> {
        let defaults = Config::default();

        let backend_url = if overrides.no_backend {
            None
        } else {
            overrides
                .backend_url
                .or(file.backend_url)
                .map(|url| url.trim().to_string())
                .filter(|url| !url.is_empty())
        };
        if let Some(url) = &backend_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(Error::Config(format!(
                    "backend url must be http(s), got {url}"
                )));
            }
        }

        let timeout_ms = overrides.backend_timeout_ms.or(file.backend_timeout_ms);
        if timeout_ms == Some(0) {
            return Err(Error::Config("backend timeout must be positive".to_string()));
        }

        Ok(Self {
            data_dir: overrides
                .data_dir
                .or(file.data_dir)
                .unwrap_or(defaults.data_dir),
            aggregated_dir: overrides
                .aggregated_dir
                .or(file.aggregated_dir)
                .unwrap_or(defaults.aggregated_dir),
            backend_url,
            backend_timeout: timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.backend_timeout),
            log_filter: file.log_filter.unwrap_or(defaults.log_filter),
            skill_weights: file
                .skill_weights
                .map(SkillWeights::validate)
                .transpose()?
                .unwrap_or(defaults.skill_weights),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let config = Config::resolve(Overrides::default(), FileConfig::default()).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.backend_timeout, Duration::from_secs(2));
    }

    #[test]
    fn flags_beat_file_beat_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("insights.toml");
        std::fs::write(
            &path,
            r#"
data_dir = "/srv/exports"
aggregated_dir = "/srv/exports/aggregated"
backend_url = "http://analytics.internal:8000"
backend_timeout_ms = 1500
"#,
        )
        .unwrap();
        let file = FileConfig::load(&path).unwrap().unwrap();

        let overrides = Overrides {
            data_dir: Some(PathBuf::from("/tmp/override")),
            ..Default::default()
        };
        let config = Config::resolve(overrides, file).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/tmp/override"));
        assert_eq!(config.aggregated_dir, PathBuf::from("/srv/exports/aggregated"));
        assert_eq!(
            config.backend_url.as_deref(),
            Some("http://analytics.internal:8000")
        );
        assert_eq!(config.backend_timeout, Duration::from_millis(1500));
    }

    #[test]
    fn no_backend_flag_disables_live_tier() {
        let file = FileConfig {
            backend_url: Some("http://analytics.internal".to_string()),
            ..Default::default()
        };
        let overrides = Overrides {
            no_backend: true,
            ..Default::default()
        };
        let config = Config::resolve(overrides, file).unwrap();
        assert!(config.backend_url.is_none());
    }

    #[test]
    fn missing_file_is_empty_and_malformed_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        assert!(FileConfig::load(&dir.path().join("absent.toml")).unwrap().is_none());

        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "data_dir = [").unwrap();
        assert!(matches!(FileConfig::load(&path), Err(Error::Toml { .. })));
    }

    #[test]
    fn skill_weights_must_sum_to_one_hundred() {
        let parse = |text: &str| -> FileConfig { toml::from_str(text).unwrap() };

        let valid = parse(
            "[skill_weights]\nlearning = 20\nproduct_usage = 40\ncertification = 15\nconsistency = 15\ngrowth = 10\n",
        );
        let config = Config::resolve(Overrides::default(), valid).unwrap();
        assert_eq!(config.skill_weights.product_usage, 40);

        let invalid = parse(
            "[skill_weights]\nlearning = 30\nproduct_usage = 40\ncertification = 15\nconsistency = 15\ngrowth = 10\n",
        );
        assert!(matches!(
            Config::resolve(Overrides::default(), invalid),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn rejects_non_http_backend() {
        let overrides = Overrides {
            backend_url: Some("ftp://nope".to_string()),
            ..Default::default()
        };
        assert!(Config::resolve(overrides, FileConfig::default()).is_err());
    }
}

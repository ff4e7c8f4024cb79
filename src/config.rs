use std::collections::BTreeMap;
use std::fs;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::CanopyError;
use crate::params::{DatasetBounds, GlobalMetadata};

pub const CONFIG_FILE: &str = "canopy.json";
pub const DEFAULT_API_URL: &str = "https://data-api.globalforestwatch.org";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub api_url: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub datasets: BTreeMap<String, DatasetBounds>,
}

#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub api_url: Option<String>,
    pub api_key: Option<String>,
}

impl Overrides {
    pub fn from_env() -> Self {
        let read = |name: &str| {
            std::env::var(name)
                .ok()
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        Self {
            api_url: read("CANOPY_API_URL"),
            api_key: read("CANOPY_API_KEY"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub api_url: String,
    pub timeout: Duration,
    pub api_key: Option<String>,
    pub metadata: GlobalMetadata,
    pub path: Option<Utf8PathBuf>,
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, CanopyError> {
        let (config, path) = match path {
            Some(path) => {
                let path = Utf8PathBuf::from(path);
                if !path.exists() {
                    return Err(CanopyError::MissingConfig);
                }
                (Self::load(&path)?, Some(path))
            }
            None => match Self::candidates().into_iter().find(|path| path.exists()) {
                Some(path) => (Self::load(&path)?, Some(path)),
                None => {
                    debug!("no config file found, using defaults");
                    (Config::default(), None)
                }
            },
        };
        Self::resolve_config(config, path, Overrides::from_env())
    }

    /// Search order without an explicit path: working directory, then the
    /// user config directory.
    pub fn candidates() -> Vec<Utf8PathBuf> {
        let mut candidates = vec![Utf8PathBuf::from(CONFIG_FILE)];
        if let Some(user) = BaseDirs::new().and_then(|dirs| {
            Utf8PathBuf::from_path_buf(dirs.config_dir().join("canopy").join(CONFIG_FILE)).ok()
        }) {
            candidates.push(user);
        }
        candidates
    }

    pub fn load(path: &Utf8Path) -> Result<Config, CanopyError> {
        let content =
            fs::read_to_string(path).map_err(|_| CanopyError::ConfigRead(path.to_path_buf()))?;
        serde_json::from_str(&content).map_err(|err| CanopyError::ConfigParse(err.to_string()))
    }

    pub fn resolve_config(
        config: Config,
        path: Option<Utf8PathBuf>,
        overrides: Overrides,
    ) -> Result<ResolvedConfig, CanopyError> {
        let schema_version = config.schema_version.unwrap_or(SCHEMA_VERSION);
        if schema_version != SCHEMA_VERSION {
            return Err(CanopyError::ConfigParse(format!(
                "unsupported schema_version {schema_version}"
            )));
        }

        let api_url = overrides
            .api_url
            .or(config.api_url)
            .unwrap_or_else(|| DEFAULT_API_URL.to_string());
        if !api_url.starts_with("http://") && !api_url.starts_with("https://") {
            return Err(CanopyError::ConfigParse(format!(
                "api_url must be an http(s) URL, got {api_url}"
            )));
        }

        let timeout_secs = config.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS);
        if timeout_secs == 0 {
            return Err(CanopyError::ConfigParse(
                "timeout_secs must be positive".to_string(),
            ));
        }

        Ok(ResolvedConfig {
            schema_version,
            api_url: api_url.trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(timeout_secs),
            api_key: overrides.api_key,
            metadata: GlobalMetadata {
                datasets: config.datasets,
            },
            path,
        })
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn defaults_apply_without_file() {
        let resolved =
            ConfigLoader::resolve_config(Config::default(), None, Overrides::default()).unwrap();
        assert_eq!(resolved.schema_version, 1);
        assert_eq!(resolved.api_url, DEFAULT_API_URL);
        assert_eq!(resolved.timeout, Duration::from_secs(30));
        assert!(resolved.metadata.datasets.is_empty());
    }

    #[test]
    fn environment_overrides_file_url() {
        let config = Config {
            api_url: Some("https://file.example.org/".to_string()),
            ..Config::default()
        };
        let overrides = Overrides {
            api_url: Some("http://localhost:9000".to_string()),
            api_key: Some("secret".to_string()),
        };
        let resolved = ConfigLoader::resolve_config(config, None, overrides).unwrap();
        assert_eq!(resolved.api_url, "http://localhost:9000");
        assert_eq!(resolved.api_key.as_deref(), Some("secret"));
    }

    #[test]
    fn rejects_unknown_schema() {
        let config = Config {
            schema_version: Some(2),
            ..Config::default()
        };
        assert_matches!(
            ConfigLoader::resolve_config(config, None, Overrides::default()),
            Err(CanopyError::ConfigParse(_))
        );
    }
}

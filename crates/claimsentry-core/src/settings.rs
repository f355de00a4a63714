use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::benford::BenfordConfig;
use crate::features::FeatureConfig;
use crate::model::ModelConfig;
use crate::scoring::ScoringConfig;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8000,
            cors_origins: vec![
                "http://localhost:3000".into(),
                "http://localhost:5173".into(),
            ],
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Directory holding `claims.json`; claims stay in memory when unset.
    pub data_dir: Option<PathBuf>,
}

/// Layered service configuration: defaults, then an optional file, then the environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub environment: String,
    pub rules_dir: PathBuf,
    pub server: ServerSettings,
    pub storage: StorageSettings,
    pub scoring: ScoringConfig,
    pub model: ModelConfig,
    pub benford: BenfordConfig,
    pub features: FeatureConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            environment: "development".into(),
            rules_dir: PathBuf::from("./rules"),
            server: ServerSettings::default(),
            storage: StorageSettings::default(),
            scoring: ScoringConfig::default(),
            model: ModelConfig::default(),
            benford: BenfordConfig::default(),
            features: FeatureConfig::default(),
        }
    }
}

impl Settings {
    pub const ENV_PREFIX: &'static str = "CLAIMSENTRY";
    const ENV_SEPARATOR: &'static str = "__";

    /// Load settings, e.g. `CLAIMSENTRY__SERVER__PORT=9000` overrides `server.port`.
    ///
    /// The file format follows its extension (`.toml`, `.yaml`, `.json`).
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let defaults =
            Config::try_from(&Settings::default()).context("failed to seed default settings")?;
        let mut builder = Config::builder().add_source(defaults);
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }
        let config = builder
            .add_source(
                Environment::with_prefix(Self::ENV_PREFIX)
                    .prefix_separator(Self::ENV_SEPARATOR)
                    .separator(Self::ENV_SEPARATOR)
                    .try_parsing(true),
            )
            .build()
            .with_context(|| match path {
                Some(path) => format!("failed to read settings from {}", path.display()),
                None => "failed to read settings from the environment".to_string(),
            })?;
        let settings: Settings = config
            .try_deserialize()
            .context("settings have an invalid shape")?;
        settings
            .scoring
            .validate()
            .context("invalid scoring settings")?;
        Ok(settings)
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use once_cell::sync::Lazy;
    use std::env;
    use std::fs::write;
    use std::sync::Mutex;

    static ENV_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

    const PORT_ENV: &str = "CLAIMSENTRY__SERVER__PORT";
    const RULES_ENV: &str = "CLAIMSENTRY__RULES_DIR";

    fn with_env_lock<F: FnOnce()>(func: F) {
        let _guard = ENV_LOCK.lock().unwrap();
        env::remove_var(PORT_ENV);
        env::remove_var(RULES_ENV);
        func();
        env::remove_var(PORT_ENV);
        env::remove_var(RULES_ENV);
    }

    #[test]
    fn defaults_without_file_or_env() {
        with_env_lock(|| {
            let settings = Settings::load(None).expect("defaults load");
            assert_eq!(settings, Settings::default());
            assert_eq!(settings.bind_address(), "0.0.0.0:8000");
            assert!(settings.storage.data_dir.is_none());
        });
    }

    #[test]
    fn file_then_env_overrides() {
        with_env_lock(|| {
            let file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
            write(
                file.path(),
                "server:\n  port: 9000\nscoring:\n  thresholds:\n    medium: 20\n    high: 40\n    critical: 80\n",
            )
            .unwrap();

            let settings = Settings::load(Some(file.path())).expect("file loads");
            assert_eq!(settings.server.port, 9000);
            assert_eq!(settings.server.host, "0.0.0.0");
            assert_eq!(settings.scoring.thresholds.high, 40.0);
            assert_eq!(settings.scoring.weights.ml, 0.5);

            env::set_var(PORT_ENV, "9100");
            env::set_var(RULES_ENV, "/etc/claimsentry/rules");
            let settings = Settings::load(Some(file.path())).expect("env loads");
            assert_eq!(settings.server.port, 9100);
            assert_eq!(settings.rules_dir, PathBuf::from("/etc/claimsentry/rules"));
        });
    }

    #[test]
    fn rejects_invalid_weights() {
        with_env_lock(|| {
            let file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
            write(
                file.path(),
                "[scoring.weights]\nml = 0.9\nbenford = 0.25\nrules = 0.25\n",
            )
            .unwrap();
            let err = Settings::load(Some(file.path())).expect_err("weights must sum to 1");
            assert!(err.to_string().contains("invalid scoring settings"));
        });
    }

    #[test]
    fn missing_file_is_an_error() {
        with_env_lock(|| {
            let err = Settings::load(Some(Path::new("/nonexistent/claimsentry.toml")))
                .expect_err("missing file");
            assert!(err.to_string().contains("/nonexistent/claimsentry.toml"));
        });
    }
}

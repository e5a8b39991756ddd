use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Cannot read {path:?}: {source}")]
    Io { path: PathBuf, source: std::io::Error },
    #[error("Invalid YAML in {path:?}: {source}")]
    Yaml { path: PathBuf, source: serde_yaml::Error },
    #[error("Invalid parameters for {kind} action: {source}")]
    ActionParams { kind: String, source: serde_yaml::Error },
    #[error("Unknown cluster provider type: {0}")]
    UnknownProvider(String),
    #[error("Unknown alert action type: {0}")]
    UnknownAction(String),
    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: String, reason: String },
    #[error("Cluster provider error: {0}")]
    Provider(#[from] crate::provider::ProviderError),
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Settings {
    pub app: AppConf,
    pub storage: StorageConf,
    pub collection: CollectionConf,
    pub web: WebConf,
    pub cluster_provider: ProviderConf,
    pub alerts: AlertsConf,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct AppConf {
    pub name: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConf {
    pub metrics_dir: PathBuf,
    pub retention_days: u32, // accepté, pas encore appliqué
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct CollectionConf {
    pub enabled: bool,
    pub interval_seconds: u64,
    pub timeout_seconds: u64,
    pub port: u16,
    pub metric_name: String,
    pub parallel: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct WebConf {
    pub host: String,
    pub port: u16,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ProviderConf {
    #[serde(rename = "type")]
    pub kind: String, // "file" | "env"
    pub file_path: PathBuf,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct AlertsConf {
    pub rules_file: PathBuf,
}

impl Default for AppConf {
    fn default() -> Self {
        Self { name: "healthwatch".into() }
    }
}

impl Default for StorageConf {
    fn default() -> Self {
        Self { metrics_dir: "data/metrics".into(), retention_days: 7 }
    }
}

impl Default for CollectionConf {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_seconds: 60,
            timeout_seconds: 10,
            port: 8123,
            metric_name: crate::collector::DEFAULT_METRIC.into(),
            parallel: true,
        }
    }
}

impl Default for WebConf {
    fn default() -> Self {
        Self { host: "0.0.0.0".into(), port: 5000, api_key: None }
    }
}

impl Default for ProviderConf {
    fn default() -> Self {
        Self { kind: "file".into(), file_path: "config/clusters.yaml".into() }
    }
}

impl Default for AlertsConf {
    fn default() -> Self {
        Self { rules_file: "config/alerts.yaml".into() }
    }
}

impl Settings {
    /// Surcharges par variables d'environnement (après le YAML)
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup("HEALTHWATCH_METRICS_DIR").filter(|v| !v.is_empty()) {
            self.storage.metrics_dir = dir.into();
        }
        if let Some(port) = lookup("HEALTHWATCH_WEB_PORT").filter(|v| !v.is_empty()) {
            self.web.port = port.parse().map_err(|_| ConfigError::Invalid {
                field: "HEALTHWATCH_WEB_PORT".into(),
                reason: format!("not a port number: {port}"),
            })?;
        }
        if let Some(key) = lookup("HEALTHWATCH_API_KEY").filter(|v| !v.is_empty()) {
            self.web.api_key = Some(key);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field: &str, reason: &str| ConfigError::Invalid { field: field.into(), reason: reason.into() };
        if self.collection.interval_seconds == 0 {
            return Err(invalid("collection.interval_seconds", "must be greater than 0"));
        }
        if self.collection.timeout_seconds == 0 {
            return Err(invalid("collection.timeout_seconds", "must be greater than 0"));
        }
        if self.storage.metrics_dir.as_os_str().is_empty() {
            return Err(invalid("storage.metrics_dir", "must not be empty"));
        }
        if self.collection.metric_name.is_empty() {
            return Err(invalid("collection.metric_name", "must not be empty"));
        }
        Ok(())
    }

    /// Fichier absent = défauts ; fichier illisible ou YAML invalide = erreur fatale
    pub async fn from_path(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            warn!("[config] {:?} not found, using defaults", path);
            return Ok(Self::default());
        }
        let txt = fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
        if txt.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(&txt).map_err(|source| ConfigError::Yaml { path: path.to_path_buf(), source })
    }
}

/// Charge la configuration depuis HEALTHWATCH_CONFIG (défaut: healthwatch.yaml)
pub async fn load_config() -> Result<Settings, ConfigError> {
    let path = std::env::var("HEALTHWATCH_CONFIG").unwrap_or_else(|_| "healthwatch.yaml".into());
    let mut settings = Settings::from_path(Path::new(&path)).await?;
    settings.apply_env_overrides(|key| std::env::var(key).ok())?;
    settings.validate()?;
    info!("[config] loaded settings for {}", settings.app.name);
    Ok(settings)
}

/// Lit un fichier YAML annexe (clusters, règles). None si absent.
pub fn read_optional_yaml<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>, ConfigError> {
    let txt = match std::fs::read_to_string(path) {
        Ok(txt) => txt,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => return Err(ConfigError::Io { path: path.to_path_buf(), source }),
    };
    if txt.trim().is_empty() {
        return Ok(None);
    }
    serde_yaml::from_str(&txt)
        .map(Some)
        .map_err(|source| ConfigError::Yaml { path: path.to_path_buf(), source })
}

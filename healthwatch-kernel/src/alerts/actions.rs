//! Alert actions: what happens once a rule fires.
//!
//! Every action reports success as a bool and never propagates an error,
//! so one broken webhook cannot keep the log or file actions from running.

use super::AlertEvent;
use crate::config::ConfigError;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info, warn};

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

#[async_trait]
pub trait AlertAction: Send + Sync + fmt::Debug {
    fn kind(&self) -> &'static str;

    async fn execute(&self, event: &AlertEvent) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl LogLevel {
    /// Niveau inconnu = warning
    pub fn parse(level: &str) -> Self {
        match level.to_ascii_lowercase().as_str() {
            "debug" => Self::Debug,
            "info" => Self::Info,
            "error" | "critical" => Self::Error,
            _ => Self::Warning,
        }
    }
}

#[derive(Debug)]
pub struct LogAction {
    pub level: LogLevel,
}

#[async_trait]
impl AlertAction for LogAction {
    fn kind(&self) -> &'static str {
        "log"
    }

    async fn execute(&self, event: &AlertEvent) -> bool {
        let line = format!("[alert] {} [{}] {} on {}/{}", event.rule_name, event.severity, event.message, event.cluster_name, event.node_name);
        match self.level {
            LogLevel::Debug => debug!("{line}"),
            LogLevel::Info => info!("{line}"),
            LogLevel::Warning => warn!("{line}"),
            LogLevel::Error => error!("{line}"),
        }
        true
    }
}

#[derive(Debug)]
pub struct WebhookAction {
    pub url: String,
    pub headers: HashMap<String, String>,
    client: reqwest::Client,
}

impl WebhookAction {
    pub fn new(url: &str, headers: HashMap<String, String>) -> Result<Self, ConfigError> {
        let client = reqwest::Client::builder()
            .timeout(WEBHOOK_TIMEOUT)
            .build()
            .map_err(|e| ConfigError::Invalid { field: "webhook".into(), reason: e.to_string() })?;
        Ok(Self { url: url.to_string(), headers, client })
    }
}

#[async_trait]
impl AlertAction for WebhookAction {
    fn kind(&self) -> &'static str {
        "webhook"
    }

    async fn execute(&self, event: &AlertEvent) -> bool {
        let mut request = self.client.post(&self.url).json(event);
        for (name, value) in &self.headers {
            request = request.header(name, value);
        }
        match request.send().await {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                error!("[alert] webhook {} answered {}", self.url, response.status());
                false
            }
            Err(e) => {
                error!("[alert] webhook {} failed: {}", self.url, e);
                false
            }
        }
    }
}

/// Pas d'envoi SMTP réel : l'action journalise ce qu'elle aurait envoyé
#[derive(Debug)]
pub struct EmailAction {
    pub to: Vec<String>,
    pub smtp_server: String,
    pub smtp_port: u16,
}

#[async_trait]
impl AlertAction for EmailAction {
    fn kind(&self) -> &'static str {
        "email"
    }

    async fn execute(&self, event: &AlertEvent) -> bool {
        info!(
            "[alert] email to {:?} via {}:{}: [{}] {}",
            self.to, self.smtp_server, self.smtp_port, event.severity, event.message
        );
        true
    }
}

/// Une ligne JSON par événement, en append
#[derive(Debug)]
pub struct FileAction {
    pub file_path: PathBuf,
}

impl FileAction {
    async fn append(&self, event: &AlertEvent) -> anyhow::Result<()> {
        let mut line = serde_json::to_string(event)?;
        line.push('\n');
        if let Some(parent) = self.file_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new().create(true).append(true).open(&self.file_path).await?;
        file.write_all(line.as_bytes()).await?;
        Ok(())
    }
}

#[async_trait]
impl AlertAction for FileAction {
    fn kind(&self) -> &'static str {
        "file"
    }

    async fn execute(&self, event: &AlertEvent) -> bool {
        match self.append(event).await {
            Ok(()) => true,
            Err(e) => {
                error!("[alert] cannot append to {:?}: {}", self.file_path, e);
                false
            }
        }
    }
}

pub type AlertCallback = dyn Fn(&AlertEvent) -> anyhow::Result<bool> + Send + Sync;

/// Action programmatique ; erreur ou panique du callback = échec
pub struct CallbackAction {
    callback: Arc<AlertCallback>,
}

impl CallbackAction {
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(&AlertEvent) -> anyhow::Result<bool> + Send + Sync + 'static,
    {
        Self { callback: Arc::new(callback) }
    }
}

impl fmt::Debug for CallbackAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CallbackAction")
    }
}

#[async_trait]
impl AlertAction for CallbackAction {
    fn kind(&self) -> &'static str {
        "custom"
    }

    async fn execute(&self, event: &AlertEvent) -> bool {
        match catch_unwind(AssertUnwindSafe(|| (self.callback)(event))) {
            Ok(Ok(done)) => done,
            Ok(Err(e)) => {
                error!("[alert] custom action failed for {}: {}", event.rule_name, e);
                false
            }
            Err(_) => {
                error!("[alert] custom action panicked for {}", event.rule_name);
                false
            }
        }
    }
}

/// Entrée "actions" d'une règle dans alerts.yaml
#[derive(Debug, Clone, Deserialize)]
pub struct ActionConfig {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub params: serde_yaml::Value,
}

#[derive(Deserialize)]
struct LogParams {
    #[serde(default = "default_level")]
    level: String,
}

#[derive(Deserialize)]
struct WebhookParams {
    url: String,
    #[serde(default)]
    headers: HashMap<String, String>,
}

#[derive(Deserialize)]
struct EmailParams {
    #[serde(default)]
    to: Vec<String>,
    #[serde(default = "default_smtp_server")]
    smtp_server: String,
    #[serde(default = "default_smtp_port")]
    smtp_port: u16,
}

#[derive(Deserialize)]
struct FileParams {
    #[serde(default = "default_alert_file")]
    file_path: PathBuf,
}

fn default_level() -> String { "warning".into() }
fn default_smtp_server() -> String { "localhost".into() }
fn default_smtp_port() -> u16 { 587 }
fn default_alert_file() -> PathBuf { "alerts.log".into() }

fn params<T: DeserializeOwned>(config: &ActionConfig) -> Result<T, ConfigError> {
    let value = match &config.params {
        serde_yaml::Value::Null => serde_yaml::Value::Mapping(serde_yaml::Mapping::new()),
        other => other.clone(),
    };
    serde_yaml::from_value(value).map_err(|source| ConfigError::ActionParams { kind: config.kind.clone(), source })
}

/// Construit une action depuis sa config ; type inconnu = erreur fatale
pub fn build_action(config: &ActionConfig) -> Result<Arc<dyn AlertAction>, ConfigError> {
    match config.kind.as_str() {
        "log" => {
            let p: LogParams = params(config)?;
            Ok(Arc::new(LogAction { level: LogLevel::parse(&p.level) }))
        }
        "webhook" => {
            let p: WebhookParams = params(config)?;
            if p.url.trim().is_empty() {
                return Err(ConfigError::Invalid { field: "webhook.url".into(), reason: "must not be empty".into() });
            }
            Ok(Arc::new(WebhookAction::new(&p.url, p.headers)?))
        }
        "email" => {
            let p: EmailParams = params(config)?;
            Ok(Arc::new(EmailAction { to: p.to, smtp_server: p.smtp_server, smtp_port: p.smtp_port }))
        }
        "file" => {
            let p: FileParams = params(config)?;
            Ok(Arc::new(FileAction { file_path: p.file_path }))
        }
        other => Err(ConfigError::UnknownAction(other.to_string())),
    }
}

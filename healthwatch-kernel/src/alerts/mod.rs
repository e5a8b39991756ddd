/**
 * ALERTES - Règles à seuil, cooldown par nœud et historique
 *
 * RÔLE :
 * Chaque mesure collectée passe par evaluate_metric(). Une règle qui matche
 * (métrique + opérateur + seuil) et qui n'est pas en cooldown pour ce nœud
 * produit un AlertEvent, exécute ses actions et l'ajoute à l'historique.
 *
 * FONCTIONNEMENT :
 * - Règles gardées dans l'ordre de configuration, remplacées par nom
 * - Cooldown suivi par clé "<cluster>/<node>" : un nœud qui tombe n'en masque pas un autre
 * - Décision + marquage sous verrou, actions exécutées hors verrou, l'une après l'autre
 * - Action en échec = journalisée, les suivantes s'exécutent quand même
 *
 * EXEMPLE alerts.yaml :
 * ```yaml
 * rules:
 *   - name: node_down
 *     metric: clickhouse_status
 *     operator: "=="
 *     threshold: 0
 *     severity: critical
 *     cooldown_seconds: 300
 *     actions:
 *       - type: log
 *         params: { level: error }
 * ```
 */

pub mod actions;

use crate::config::{read_optional_yaml, ConfigError};
use crate::models::node_key;
use actions::{build_action, ActionConfig, AlertAction};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use time::{Duration, OffsetDateTime};
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum Operator {
    Gt,
    Lt,
    Ge,
    Le,
    Eq,
    Ne,
    /// Opérateur non reconnu : la règle se charge mais ne déclenche jamais
    Unsupported(String),
}

impl Operator {
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            ">" => Self::Gt,
            "<" => Self::Lt,
            ">=" => Self::Ge,
            "<=" => Self::Le,
            "==" => Self::Eq,
            "!=" => Self::Ne,
            other => Self::Unsupported(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Gt => ">",
            Self::Lt => "<",
            Self::Ge => ">=",
            Self::Le => "<=",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Unsupported(raw) => raw,
        }
    }

    pub fn apply(&self, value: f64, threshold: f64) -> bool {
        match self {
            Self::Gt => value > threshold,
            Self::Lt => value < threshold,
            Self::Ge => value >= threshold,
            Self::Le => value <= threshold,
            Self::Eq => value == threshold,
            Self::Ne => value != threshold,
            Self::Unsupported(_) => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEvent {
    pub alert_id: String,
    pub rule_name: String,
    pub metric_name: String,
    pub node_name: String,
    pub cluster_name: String,
    pub current_value: f64,
    pub threshold: f64,
    pub operator: String,
    pub severity: String,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub message: String,
}

#[derive(Debug)]
pub struct AlertRule {
    pub name: String,
    pub metric: String,
    pub operator: Operator,
    pub threshold: f64,
    pub severity: String,
    pub actions: Vec<Arc<dyn AlertAction>>,
    pub enabled: bool,
    pub cooldown_seconds: u64,
    last_triggered: HashMap<String, OffsetDateTime>,
}

impl AlertRule {
    pub fn new(name: &str, metric: &str, operator: Operator, threshold: f64) -> Self {
        Self {
            name: name.to_string(),
            metric: metric.to_string(),
            operator,
            threshold,
            severity: default_severity(),
            actions: Vec::new(),
            enabled: true,
            cooldown_seconds: default_cooldown(),
            last_triggered: HashMap::new(),
        }
    }

    pub fn with_severity(mut self, severity: &str) -> Self {
        self.severity = severity.to_string();
        self
    }

    pub fn with_cooldown(mut self, seconds: u64) -> Self {
        self.cooldown_seconds = seconds;
        self
    }

    pub fn with_action(mut self, action: Arc<dyn AlertAction>) -> Self {
        self.actions.push(action);
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn evaluate(&self, value: f64) -> bool {
        self.operator.apply(value, self.threshold)
    }

    pub fn should_trigger(&self, node_key: &str, now: OffsetDateTime) -> bool {
        if !self.enabled {
            return false;
        }
        match self.last_triggered.get(node_key) {
            None => true,
            Some(last) => {
                let cooldown = i64::try_from(self.cooldown_seconds).unwrap_or(i64::MAX);
                now - *last >= Duration::seconds(cooldown)
            }
        }
    }

    pub fn mark_triggered(&mut self, node_key: &str, now: OffsetDateTime) {
        self.last_triggered.insert(node_key.to_string(), now);
    }

    pub fn last_triggered(&self, node_key: &str) -> Option<OffsetDateTime> {
        self.last_triggered.get(node_key).copied()
    }

    fn to_view(&self) -> RuleView {
        RuleView {
            name: self.name.clone(),
            metric: self.metric.clone(),
            operator: self.operator.as_str().to_string(),
            threshold: self.threshold,
            severity: self.severity.clone(),
            enabled: self.enabled,
            cooldown_seconds: self.cooldown_seconds,
            actions: self.actions.iter().map(|a| a.kind()).collect(),
        }
    }
}

/// Vue sérialisable d'une règle (API)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleView {
    pub name: String,
    pub metric: String,
    pub operator: String,
    pub threshold: f64,
    pub severity: String,
    pub enabled: bool,
    pub cooldown_seconds: u64,
    pub actions: Vec<&'static str>,
}

#[derive(Debug, Deserialize)]
struct RuleConfig {
    name: String,
    metric: String,
    operator: String,
    threshold: f64,
    #[serde(default = "default_severity")]
    severity: String,
    #[serde(default = "default_enabled")]
    enabled: bool,
    #[serde(default = "default_cooldown")]
    cooldown_seconds: u64,
    #[serde(default)]
    actions: Vec<ActionConfig>,
}

#[derive(Debug, Default, Deserialize)]
struct RulesFile {
    #[serde(default)]
    rules: Vec<RuleConfig>,
}

fn default_severity() -> String { "warning".into() }
fn default_enabled() -> bool { true }
fn default_cooldown() -> u64 { 300 }

impl RuleConfig {
    fn into_rule(self) -> Result<AlertRule, ConfigError> {
        let operator = Operator::parse(&self.operator);
        if let Operator::Unsupported(raw) = &operator {
            warn!("[alerts] rule {} uses unsupported operator {:?}, it will never fire", self.name, raw);
        }
        let actions = self.actions.iter().map(build_action).collect::<Result<Vec<_>, _>>()?;
        let mut rule = AlertRule::new(&self.name, &self.metric, operator, self.threshold)
            .with_severity(&self.severity)
            .with_cooldown(self.cooldown_seconds);
        rule.actions = actions;
        rule.enabled = self.enabled;
        Ok(rule)
    }
}

pub struct AlertManager {
    rules: Mutex<Vec<AlertRule>>,
    history: Mutex<Vec<AlertEvent>>,
}

impl Default for AlertManager {
    fn default() -> Self {
        Self::new()
    }
}

impl AlertManager {
    pub fn new() -> Self {
        Self { rules: Mutex::new(Vec::new()), history: Mutex::new(Vec::new()) }
    }

    /// Ajoute une règle ; une règle du même nom est remplacée à sa place
    pub fn add_rule(&self, rule: AlertRule) {
        let mut rules = self.rules.lock();
        match rules.iter_mut().find(|r| r.name == rule.name) {
            Some(existing) => *existing = rule,
            None => rules.push(rule),
        }
    }

    pub fn remove_rule(&self, name: &str) -> bool {
        let mut rules = self.rules.lock();
        let before = rules.len();
        rules.retain(|r| r.name != name);
        rules.len() != before
    }

    pub fn get_rule(&self, name: &str) -> Option<RuleView> {
        self.rules.lock().iter().find(|r| r.name == name).map(AlertRule::to_view)
    }

    pub fn get_all_rules(&self) -> Vec<RuleView> {
        self.rules.lock().iter().map(AlertRule::to_view).collect()
    }

    /// Évalue une mesure contre toutes les règles actives de cette métrique
    pub async fn evaluate_metric(
        &self,
        metric_name: &str,
        value: f64,
        node_name: &str,
        cluster_name: &str,
    ) -> Vec<AlertEvent> {
        let now = OffsetDateTime::now_utc();
        let key = node_key(cluster_name, node_name);

        let fired: Vec<(AlertEvent, Vec<Arc<dyn AlertAction>>)> = {
            let mut rules = self.rules.lock();
            rules
                .iter_mut()
                .filter(|rule| rule.enabled && rule.metric == metric_name)
                .filter_map(|rule| {
                    if !rule.evaluate(value) || !rule.should_trigger(&key, now) {
                        return None;
                    }
                    rule.mark_triggered(&key, now);
                    let event = AlertEvent {
                        alert_id: format!("{}-{}-{}", rule.name, key, now.unix_timestamp_nanos()),
                        rule_name: rule.name.clone(),
                        metric_name: metric_name.to_string(),
                        node_name: node_name.to_string(),
                        cluster_name: cluster_name.to_string(),
                        current_value: value,
                        threshold: rule.threshold,
                        operator: rule.operator.as_str().to_string(),
                        severity: rule.severity.clone(),
                        timestamp: now,
                        message: format!("Alert: {} = {} {} {}", metric_name, value, rule.operator.as_str(), rule.threshold),
                    };
                    Some((event, rule.actions.clone()))
                })
                .collect()
        };

        for (event, actions) in &fired {
            info!("[alerts] {} fired for {} ({})", event.rule_name, key, event.message);
            for action in actions {
                if !action.execute(event).await {
                    warn!("[alerts] {} action failed for rule {}", action.kind(), event.rule_name);
                }
            }
        }

        let events: Vec<AlertEvent> = fired.into_iter().map(|(event, _)| event).collect();
        if !events.is_empty() {
            self.history.lock().extend(events.iter().cloned());
        }
        events
    }

    /// Les `limit` événements les plus récents, du plus ancien au plus récent
    pub fn get_alert_history(&self, limit: usize) -> Vec<AlertEvent> {
        let history = self.history.lock();
        let skip = history.len().saturating_sub(limit);
        history[skip..].to_vec()
    }

    pub fn clear_alert_history(&self) {
        self.history.lock().clear();
    }

    /// Charge alerts.yaml ; fichier absent = aucune règle.
    /// Retourne le nombre de règles chargées.
    pub fn load_rules_from_file(&self, path: &Path) -> Result<usize, ConfigError> {
        let file: RulesFile = match read_optional_yaml(path)? {
            Some(file) => file,
            None => {
                info!("[alerts] no rules file at {:?}", path);
                return Ok(0);
            }
        };
        let rules = file.rules.into_iter().map(RuleConfig::into_rule).collect::<Result<Vec<_>, _>>()?;
        let count = rules.len();
        for rule in rules {
            self.add_rule(rule);
        }
        info!("[alerts] loaded {} rules from {:?}", count, path);
        Ok(count)
    }
}

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use time::OffsetDateTime;

/// Valeur d'une métrique de santé pour un nœud joignable
pub const HEALTHY: f64 = 1.0;
/// Valeur sentinelle : nœud injoignable, timeout, mauvaise réponse...
pub const UNHEALTHY: f64 = 0.0;

/// Mesure atomique produite par un collecteur, immuable une fois persistée
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    pub metric_id: String,
    pub metric_name: String,
    pub value: f64,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub node_name: String,
    pub cluster_name: String,
    #[serde(default)]
    pub unit: String,
    #[serde(default)]
    pub tags: HashMap<String, String>,
}

impl MetricRecord {
    /// Nouvelle mesure horodatée maintenant (UTC) avec un identifiant unique
    pub fn new(metric_name: &str, value: f64, node_name: &str, cluster_name: &str) -> Self {
        Self {
            metric_id: uuid::Uuid::new_v4().to_string(),
            metric_name: metric_name.to_string(),
            value,
            timestamp: OffsetDateTime::now_utc(),
            node_name: node_name.to_string(),
            cluster_name: cluster_name.to_string(),
            unit: String::new(),
            tags: HashMap::new(),
        }
    }

    pub fn at(mut self, timestamp: OffsetDateTime) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_tag(mut self, key: &str, value: &str) -> Self {
        self.tags.insert(key.to_string(), value.to_string());
        self
    }

    pub fn node_key(&self) -> String {
        node_key(&self.cluster_name, &self.node_name)
    }

    pub fn is_healthy(&self) -> bool {
        self.value == HEALTHY
    }
}

/// Clé "<cluster>/<node>" qui porte l'état de cooldown des alertes
pub fn node_key(cluster_name: &str, node_name: &str) -> String {
    format!("{cluster_name}/{node_name}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CollectionMethod {
    #[default]
    Local,
    Remote,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub name: String,
    #[serde(rename = "type", default = "default_node_type")]
    pub node_type: String,
    #[serde(default = "default_node_host")]
    pub host: String,
    #[serde(default)]
    pub collection_method: CollectionMethod,
    #[serde(default)]
    pub attributes: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub nodes: Vec<Node>,
}

impl Cluster {
    pub fn get_node(&self, node_name: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.name == node_name)
    }
}

fn default_node_type() -> String { "worker".into() }
fn default_node_host() -> String { "localhost".into() }

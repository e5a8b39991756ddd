use crate::models::{MetricRecord, HEALTHY};
use serde::Serialize;
use time::OffsetDateTime;

/// Au-delà de ce nombre de nœuds down, un cluster passe "critical"
const UNSTABLE_MAX_DOWN: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Recovered,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthTimelineEntry {
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub status: u8,
    pub status_text: &'static str,
    pub changed: bool,
    pub change_type: Option<ChangeType>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthSummary {
    pub cluster_name: String,
    pub node_name: String,
    pub total_checks: usize,
    pub healthy_count: usize,
    pub unhealthy_count: usize,
    pub availability_percent: f64,
    pub status_changes: Vec<HealthTimelineEntry>,
    pub current_status: Option<&'static str>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub first_check: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_check: Option<OffsetDateTime>,
}

pub fn status_of(value: f64) -> u8 {
    u8::from(value == HEALTHY)
}

pub fn status_text(status: u8) -> &'static str {
    if status == 1 { "healthy" } else { "down" }
}

/// Une entrée par mesure, dans l'ordre reçu (le store rend déjà trié).
/// `changed` compare au statut de l'entrée précédente ; la première ne change jamais.
pub fn build_timeline(records: &[MetricRecord]) -> Vec<HealthTimelineEntry> {
    let mut previous: Option<u8> = None;
    records
        .iter()
        .map(|record| {
            let status = status_of(record.value);
            let changed = previous.is_some_and(|p| p != status);
            previous = Some(status);
            HealthTimelineEntry {
                timestamp: record.timestamp,
                status,
                status_text: status_text(status),
                changed,
                change_type: changed.then_some(if status == 1 { ChangeType::Recovered } else { ChangeType::Failed }),
            }
        })
        .collect()
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

pub fn summarize(cluster_name: &str, node_name: &str, timeline: &[HealthTimelineEntry]) -> HealthSummary {
    let total_checks = timeline.len();
    let healthy_count = timeline.iter().filter(|e| e.status == 1).count();
    let availability_percent = if total_checks == 0 {
        0.0
    } else {
        round2(healthy_count as f64 / total_checks as f64 * 100.0)
    };

    HealthSummary {
        cluster_name: cluster_name.to_string(),
        node_name: node_name.to_string(),
        total_checks,
        healthy_count,
        unhealthy_count: total_checks - healthy_count,
        availability_percent,
        status_changes: timeline.iter().filter(|e| e.changed).cloned().collect(),
        current_status: timeline.last().map(|e| e.status_text),
        first_check: timeline.first().map(|e| e.timestamp),
        last_check: timeline.last().map(|e| e.timestamp),
    }
}

// --- Statut instantané (dashboard) ---

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeStatus {
    pub node_name: String,
    pub cluster_name: String,
    pub status: Option<u8>,
    pub status_text: &'static str,
    pub value: Option<f64>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_check: Option<OffsetDateTime>,
}

impl NodeStatus {
    /// Un nœud sans donnée récente compte comme down
    pub fn from_latest(cluster_name: &str, node_name: &str, latest: Option<&MetricRecord>) -> Self {
        let status = latest.map(|r| status_of(r.value));
        Self {
            node_name: node_name.to_string(),
            cluster_name: cluster_name.to_string(),
            status,
            status_text: status.map_or("unknown", status_text),
            value: latest.map(|r| r.value),
            last_check: latest.map(|r| r.timestamp),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status == Some(1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ClusterHealth {
    Healthy,
    Unstable,
    Critical,
}

impl ClusterHealth {
    pub fn from_down_count(down: usize) -> Self {
        match down {
            0 => Self::Healthy,
            n if n <= UNSTABLE_MAX_DOWN => Self::Unstable,
            _ => Self::Critical,
        }
    }

    pub fn color(self) -> &'static str {
        match self {
            Self::Healthy => "green",
            Self::Unstable => "yellow",
            Self::Critical => "red",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterStatus {
    pub name: String,
    pub status: ClusterHealth,
    pub color: &'static str,
    pub total_nodes: usize,
    pub healthy_nodes: usize,
    pub down_nodes: usize,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_check: Option<OffsetDateTime>,
    pub nodes: Vec<NodeStatus>,
}

impl ClusterStatus {
    pub fn from_nodes(name: &str, nodes: Vec<NodeStatus>) -> Self {
        let healthy_nodes = nodes.iter().filter(|n| n.is_healthy()).count();
        let down_nodes = nodes.len() - healthy_nodes;
        let status = ClusterHealth::from_down_count(down_nodes);
        Self {
            name: name.to_string(),
            status,
            color: status.color(),
            total_nodes: nodes.len(),
            healthy_nodes,
            down_nodes,
            last_check: nodes.iter().filter_map(|n| n.last_check).max(),
            nodes,
        }
    }
}

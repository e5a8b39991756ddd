/*!
Builders de fichiers YAML pour les tests (clusters.yaml, alerts.yaml)

Produit du YAML texte sans dépendre des types du kernel, pour tester le
chargement tel qu'un opérateur l'écrirait.
*/

/// Chaîne YAML entre guillemets doubles
fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

#[derive(Debug, Clone)]
pub struct NodeFixture {
    pub name: String,
    pub host: String,
    pub node_type: Option<String>,
    pub attributes: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct ClusterFixture {
    pub name: String,
    pub description: Option<String>,
    pub nodes: Vec<NodeFixture>,
}

impl ClusterFixture {
    pub fn new(name: &str) -> Self {
        Self { name: name.to_string(), description: None, nodes: Vec::new() }
    }

    pub fn description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    pub fn node(mut self, name: &str, host: &str) -> Self {
        self.nodes.push(NodeFixture {
            name: name.to_string(),
            host: host.to_string(),
            node_type: None,
            attributes: Vec::new(),
        });
        self
    }

    /// Type et attributs s'appliquent au dernier nœud ajouté
    pub fn node_type(mut self, node_type: &str) -> Self {
        if let Some(node) = self.nodes.last_mut() {
            node.node_type = Some(node_type.to_string());
        }
        self
    }

    pub fn attribute(mut self, key: &str, value: &str) -> Self {
        if let Some(node) = self.nodes.last_mut() {
            node.attributes.push((key.to_string(), value.to_string()));
        }
        self
    }
}

pub fn clusters_yaml(clusters: &[ClusterFixture]) -> String {
    if clusters.is_empty() {
        return "clusters: []\n".to_string();
    }
    let mut out = String::from("clusters:\n");
    for cluster in clusters {
        out.push_str(&format!("  - name: {}\n", quote(&cluster.name)));
        if let Some(description) = &cluster.description {
            out.push_str(&format!("    description: {}\n", quote(description)));
        }
        if cluster.nodes.is_empty() {
            out.push_str("    nodes: []\n");
            continue;
        }
        out.push_str("    nodes:\n");
        for node in &cluster.nodes {
            out.push_str(&format!("      - name: {}\n", quote(&node.name)));
            out.push_str(&format!("        host: {}\n", quote(&node.host)));
            if let Some(node_type) = &node.node_type {
                out.push_str(&format!("        type: {}\n", quote(node_type)));
            }
            if !node.attributes.is_empty() {
                out.push_str("        attributes:\n");
                for (k, v) in &node.attributes {
                    out.push_str(&format!("          {}: {}\n", quote(k), quote(v)));
                }
            }
        }
    }
    out
}

#[derive(Debug, Clone)]
pub struct RuleFixture {
    pub name: String,
    pub metric: String,
    pub operator: String,
    pub threshold: f64,
    pub severity: Option<String>,
    pub cooldown_seconds: Option<u64>,
    pub enabled: bool,
    /// Actions en YAML "flow", ex: `{type: log, params: {level: error}}`
    pub actions: Vec<String>,
}

impl RuleFixture {
    pub fn new(name: &str, metric: &str, operator: &str, threshold: f64) -> Self {
        Self {
            name: name.to_string(),
            metric: metric.to_string(),
            operator: operator.to_string(),
            threshold,
            severity: None,
            cooldown_seconds: None,
            enabled: true,
            actions: Vec::new(),
        }
    }

    pub fn severity(mut self, severity: &str) -> Self {
        self.severity = Some(severity.to_string());
        self
    }

    pub fn cooldown(mut self, seconds: u64) -> Self {
        self.cooldown_seconds = Some(seconds);
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn log_action(self, level: &str) -> Self {
        let raw = format!("{{type: log, params: {{level: {}}}}}", quote(level));
        self.action_raw(&raw)
    }

    pub fn action_raw(mut self, flow_yaml: &str) -> Self {
        self.actions.push(flow_yaml.to_string());
        self
    }
}

pub fn rules_yaml(rules: &[RuleFixture]) -> String {
    if rules.is_empty() {
        return "rules: []\n".to_string();
    }
    let mut out = String::from("rules:\n");
    for rule in rules {
        out.push_str(&format!("  - name: {}\n", quote(&rule.name)));
        out.push_str(&format!("    metric: {}\n", quote(&rule.metric)));
        out.push_str(&format!("    operator: {}\n", quote(&rule.operator)));
        out.push_str(&format!("    threshold: {:?}\n", rule.threshold));
        if let Some(severity) = &rule.severity {
            out.push_str(&format!("    severity: {}\n", quote(severity)));
        }
        if let Some(cooldown) = rule.cooldown_seconds {
            out.push_str(&format!("    cooldown_seconds: {}\n", cooldown));
        }
        if !rule.enabled {
            out.push_str("    enabled: false\n");
        }
        if !rule.actions.is_empty() {
            out.push_str("    actions:\n");
            for action in &rule.actions {
                out.push_str(&format!("      - {}\n", action));
            }
        }
    }
    out
}

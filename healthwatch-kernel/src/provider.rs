/**
 * CLUSTER PROVIDERS - Source de la topologie surveillée
 *
 * RÔLE :
 * Répond à "quels clusters, quels nœuds, à quelle adresse" pour le scheduler
 * et l'API. La topologie vient d'un fichier YAML ou de l'environnement.
 *
 * FONCTIONNEMENT :
 * - FileClusterProvider : lit clusters.yaml, refresh() relit le fichier
 * - EnvClusterProvider : un cluster / un nœud décrits par HEALTH_* (mode agent)
 * - État interne derrière un RwLock : lectures concurrentes, refresh exclusif
 * - create_provider() : type inconnu = erreur de configuration fatale
 *
 * EXEMPLE clusters.yaml :
 * ```yaml
 * clusters:
 *   - name: production
 *     description: Main ClickHouse cluster
 *     nodes:
 *       - name: ch-01
 *         host: 10.0.0.11
 *         type: replica
 * ```
 */

use crate::config::{ConfigError, ProviderConf};
use crate::models::{Cluster, CollectionMethod, Node};
use parking_lot::RwLock;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("Cannot read {path:?}: {source}")]
    Io { path: PathBuf, source: std::io::Error },
    #[error("Invalid cluster file {path:?}: {source}")]
    Yaml { path: PathBuf, source: serde_yaml::Error },
}

pub trait ClusterProvider: Send + Sync {
    fn kind(&self) -> &'static str;

    fn get_clusters(&self) -> Vec<Cluster>;

    fn get_cluster(&self, name: &str) -> Option<Cluster> {
        self.get_clusters().into_iter().find(|c| c.name == name)
    }

    fn refresh(&self) -> Result<(), ProviderError>;
}

#[derive(Debug, Default, Deserialize)]
struct ClustersFile {
    #[serde(default)]
    clusters: Vec<Cluster>,
}

pub struct FileClusterProvider {
    file_path: PathBuf,
    clusters: RwLock<Vec<Cluster>>,
}

impl FileClusterProvider {
    /// Charge immédiatement le fichier ; fichier absent = aucun cluster
    pub fn new<P: Into<PathBuf>>(file_path: P) -> Result<Self, ProviderError> {
        let provider = Self { file_path: file_path.into(), clusters: RwLock::new(Vec::new()) };
        provider.refresh()?;
        Ok(provider)
    }

    fn load(&self) -> Result<Vec<Cluster>, ProviderError> {
        let txt = match std::fs::read_to_string(&self.file_path) {
            Ok(txt) => txt,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("[provider] cluster file {:?} not found, no clusters", self.file_path);
                return Ok(Vec::new());
            }
            Err(source) => return Err(ProviderError::Io { path: self.file_path.clone(), source }),
        };
        if txt.trim().is_empty() {
            return Ok(Vec::new());
        }
        let file: ClustersFile = serde_yaml::from_str(&txt)
            .map_err(|source| ProviderError::Yaml { path: self.file_path.clone(), source })?;
        Ok(file.clusters)
    }
}

impl ClusterProvider for FileClusterProvider {
    fn kind(&self) -> &'static str {
        "file"
    }

    fn get_clusters(&self) -> Vec<Cluster> {
        self.clusters.read().clone()
    }

    fn refresh(&self) -> Result<(), ProviderError> {
        let clusters = self.load()?;
        let nodes: usize = clusters.iter().map(|c| c.nodes.len()).sum();
        info!("[provider] loaded {} clusters ({} nodes) from {:?}", clusters.len(), nodes, self.file_path);
        *self.clusters.write() = clusters;
        Ok(())
    }
}

/// Un seul cluster / nœud, décrit par l'environnement du processus
pub struct EnvClusterProvider {
    lookup: Box<dyn Fn(&str) -> Option<String> + Send + Sync>,
    clusters: RwLock<Vec<Cluster>>,
}

impl EnvClusterProvider {
    pub fn from_env() -> Self {
        Self::with_lookup(|key| std::env::var(key).ok())
    }

    pub fn with_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        let provider = Self { lookup: Box::new(lookup), clusters: RwLock::new(Vec::new()) };
        *provider.clusters.write() = provider.build();
        provider
    }

    fn var(&self, key: &str, default: impl FnOnce() -> String) -> String {
        (self.lookup)(key).filter(|v| !v.is_empty()).unwrap_or_else(default)
    }

    fn build(&self) -> Vec<Cluster> {
        let node = Node {
            name: self.var("HEALTH_NODE_NAME", || gethostname::gethostname().to_string_lossy().into_owned()),
            node_type: self.var("HEALTH_NODE_TYPE", || "worker".into()),
            host: self.var("HEALTH_NODE_HOST", || "localhost".into()),
            collection_method: CollectionMethod::Local,
            attributes: HashMap::new(),
        };
        vec![Cluster {
            name: self.var("HEALTH_CLUSTER_NAME", || "default-cluster".into()),
            description: "Cluster from environment".into(),
            nodes: vec![node],
        }]
    }
}

impl ClusterProvider for EnvClusterProvider {
    fn kind(&self) -> &'static str {
        "env"
    }

    fn get_clusters(&self) -> Vec<Cluster> {
        self.clusters.read().clone()
    }

    fn refresh(&self) -> Result<(), ProviderError> {
        *self.clusters.write() = self.build();
        Ok(())
    }
}

pub fn create_provider(conf: &ProviderConf) -> Result<Arc<dyn ClusterProvider>, ConfigError> {
    match conf.kind.as_str() {
        "file" => Ok(Arc::new(FileClusterProvider::new(conf.file_path.clone())?)),
        "env" => Ok(Arc::new(EnvClusterProvider::from_env())),
        other => Err(ConfigError::UnknownProvider(other.to_string())),
    }
}

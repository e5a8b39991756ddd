/*!
Test Harness pour HealthWatch

Facilite l'écriture de tests du kernel avec:
- Un répertoire temporaire par test (store, fichiers de config)
- Écriture des fixtures clusters.yaml / alerts.yaml
- Lecture et inventaire des fichiers produits (buckets, logs d'alertes)
*/

use crate::fixtures::{clusters_yaml, rules_yaml, ClusterFixture, RuleFixture};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Répertoire de travail isolé, supprimé à la fin du test
pub struct TestHarness {
    dir: TempDir,
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

impl TestHarness {
    pub fn new() -> Self {
        env_logger::builder().is_test(true).try_init().ok(); // Init logging pour tests
        let dir = tempfile::tempdir().expect("cannot create temp dir");
        log::debug!("🧪 test dir {:?}", dir.path());
        Self { dir }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Racine du MetricStore pour ce test
    pub fn metrics_dir(&self) -> PathBuf {
        self.dir.path().join("metrics")
    }

    /// Écrit un fichier (chemin relatif), crée les répertoires parents
    pub fn write_file(&self, relative: &str, contents: &str) -> PathBuf {
        let path = self.dir.path().join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("cannot create parent dir");
        }
        fs::write(&path, contents).expect("cannot write test file");
        path
    }

    pub fn read_file(&self, relative: &str) -> String {
        let path = self.dir.path().join(relative);
        fs::read_to_string(&path).unwrap_or_else(|e| panic!("cannot read {:?}: {}", path, e))
    }

    pub fn write_clusters(&self, clusters: &[ClusterFixture]) -> PathBuf {
        self.write_file("config/clusters.yaml", &clusters_yaml(clusters))
    }

    pub fn write_rules(&self, rules: &[RuleFixture]) -> PathBuf {
        self.write_file("config/alerts.yaml", &rules_yaml(rules))
    }

    /// Tous les fichiers sous `relative`, chemins relatifs triés
    pub fn list_files(&self, relative: &str) -> Vec<PathBuf> {
        let root = self.dir.path().join(relative);
        let mut found = Vec::new();
        let mut pending = vec![root.clone()];
        while let Some(dir) = pending.pop() {
            let Ok(entries) = fs::read_dir(&dir) else { continue };
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_dir() {
                    pending.push(path);
                } else if let Ok(rel) = path.strip_prefix(&root) {
                    found.push(rel.to_path_buf());
                }
            }
        }
        found.sort();
        found
    }
}

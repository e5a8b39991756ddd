/**
 * METRIC STORE - Persistance des mesures de santé en buckets horaires
 *
 * RÔLE :
 * Stockage append-only des MetricRecord, partitionné par cluster, nœud et
 * heure UTC. C'est la seule mémoire du système : dashboard, timeline et
 * statuts relisent tout depuis ici.
 *
 * FONCTIONNEMENT :
 * - write() : un verrou par bucket, une ligne complète par write_all en O_APPEND
 * - query() : parcourt les buckets heure par heure sur [start, end], trie par timestamp
 * - Lecture sans verrou : le fragment final d'un écrivain concurrent est ignoré
 * - Bucket corrompu = vide pour la requête, signalé une seule fois par chemin
 *
 * UTILITÉ DANS HEALTHWATCH :
 * ✅ Plusieurs écrivains (scheduler, collecte manuelle) sans lignes entrelacées
 * ✅ Requêtes par fenêtre temporelle et par nom de métrique
 * ✅ get_latest() pour l'état courant d'un nœud
 * ✅ Un enregistrement tronqué par un crash est coupé avant l'écriture suivante
 */

pub mod bucket;

use crate::models::MetricRecord;
use bucket::{bucket_id, bucket_path, format_line, hour_start, is_valid_metric_name, is_valid_segment, parse_bucket, BUCKET_HEADER};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use time::{Duration, OffsetDateTime};
use tracing::{debug, error, info, warn};

/// Au-delà, les verrous de buckets inutilisés sont purgés
const MAX_IDLE_LOCKS: usize = 1024;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Invalid record: {0}")]
    InvalidRecord(String),
    #[error("Timestamp format error: {0}")]
    Format(#[from] time::error::Format),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Bilan d'un write_batch : une mesure rejetée n'arrête pas les suivantes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub written: usize,
    pub failed: usize,
}

/// Coupe le fragment laissé par une écriture interrompue (disque plein, crash),
/// pour que la ligne suivante ne s'y colle pas. Retourne la taille conservée.
fn drop_torn_tail(file: &mut File, path: &Path) -> std::io::Result<u64> {
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(0);
    }
    let mut last = [0u8; 1];
    file.seek(SeekFrom::Start(len - 1))?;
    file.read_exact(&mut last)?;
    if last[0] == b'\n' {
        return Ok(len);
    }

    let mut content = Vec::with_capacity(len as usize);
    file.seek(SeekFrom::Start(0))?;
    file.read_to_end(&mut content)?;
    let keep = content.iter().rposition(|b| *b == b'\n').map_or(0, |i| i as u64 + 1);
    file.set_len(keep)?;
    warn!("[store] dropped {} bytes of torn record at the end of {:?}", len - keep, path);
    Ok(keep)
}

pub struct MetricStore {
    base_dir: PathBuf,
    bucket_locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
    reported_corrupt: Mutex<HashSet<PathBuf>>,
}

impl MetricStore {
    /// Ouvre (ou crée) le répertoire de base. La création est best-effort :
    /// un échec ici ressortira à la première écriture.
    pub fn new<P: Into<PathBuf>>(base_dir: P) -> Self {
        let base_dir = base_dir.into();
        match fs::create_dir_all(&base_dir) {
            Ok(()) => info!("[store] metrics directory ready at {:?}", base_dir),
            Err(e) => warn!("[store] cannot create {:?}: {}", base_dir, e),
        }
        Self {
            base_dir,
            bucket_locks: Mutex::new(HashMap::new()),
            reported_corrupt: Mutex::new(HashSet::new()),
        }
    }

    fn validate(record: &MetricRecord) -> Result<(), StoreError> {
        if !is_valid_segment(&record.cluster_name) {
            return Err(StoreError::InvalidRecord(format!("bad cluster name {:?}", record.cluster_name)));
        }
        if !is_valid_segment(&record.node_name) {
            return Err(StoreError::InvalidRecord(format!("bad node name {:?}", record.node_name)));
        }
        if !is_valid_metric_name(&record.metric_name) {
            return Err(StoreError::InvalidRecord(format!("bad metric name {:?}", record.metric_name)));
        }
        Ok(())
    }

    fn bucket_lock(&self, path: &Path) -> Arc<Mutex<()>> {
        let mut locks = self.bucket_locks.lock();
        if locks.len() > MAX_IDLE_LOCKS {
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        }
        locks
            .entry(path.to_path_buf())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Ajoute une mesure à son bucket horaire
    pub fn write(&self, record: &MetricRecord) -> Result<(), StoreError> {
        Self::validate(record)?;
        let line = format_line(record)?;
        let path = bucket_path(&self.base_dir, &record.cluster_name, &record.node_name, record.timestamp);

        let lock = self.bucket_lock(&path);
        let _guard = lock.lock();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().create(true).read(true).append(true).open(&path)?;
        let len = drop_torn_tail(&mut file, &path)?;

        let mut buf = String::with_capacity(BUCKET_HEADER.len() + line.len() + 1);
        if len == 0 {
            buf.push_str(BUCKET_HEADER);
            buf.push('\n');
        }
        buf.push_str(&line);
        file.write_all(buf.as_bytes())?;
        Ok(())
    }

    pub fn write_batch(&self, records: &[MetricRecord]) -> BatchReport {
        let mut report = BatchReport::default();
        for record in records {
            match self.write(record) {
                Ok(()) => report.written += 1,
                Err(e) => {
                    error!("[store] failed to write {} for {}: {}", record.metric_name, record.node_key(), e);
                    report.failed += 1;
                }
            }
        }
        debug!("[store] batch written={} failed={}", report.written, report.failed);
        report
    }

    fn report_corrupt(&self, path: &Path, reason: &str) {
        if self.reported_corrupt.lock().insert(path.to_path_buf()) {
            warn!("[store] unreadable bucket {:?} ({}), treated as empty", path, reason);
        }
    }

    fn read_bucket(&self, cluster: &str, node: &str, hour: OffsetDateTime) -> Vec<MetricRecord> {
        let path = bucket_path(&self.base_dir, cluster, node, hour);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                self.report_corrupt(&path, &e.to_string());
                return Vec::new();
            }
        };
        match parse_bucket(&content, cluster, node, &bucket_id(hour)) {
            Ok(records) => records,
            Err(line_no) => {
                self.report_corrupt(&path, &format!("malformed line {line_no}"));
                Vec::new()
            }
        }
    }

    /// Mesures d'un nœud sur [start, end], triées par timestamp croissant.
    /// Ne remonte jamais d'erreur : buckets absents ou illisibles = vides.
    pub fn query(
        &self,
        cluster: &str,
        node: &str,
        start: OffsetDateTime,
        end: OffsetDateTime,
        metric_name: Option<&str>,
    ) -> Vec<MetricRecord> {
        if start > end || !is_valid_segment(cluster) || !is_valid_segment(node) {
            return Vec::new();
        }

        let mut results = Vec::new();
        let mut hour = hour_start(start);
        while hour <= end {
            results.extend(self.read_bucket(cluster, node, hour).into_iter().filter(|r| {
                r.timestamp >= start
                    && r.timestamp <= end
                    && metric_name.map_or(true, |name| r.metric_name == name)
            }));
            hour += Duration::HOUR;
        }

        results.sort_by_key(|r| r.timestamp);
        results
    }

    /// Mesures de l'heure en cours, sinon celles de l'heure précédente.
    /// Triées : la plus récente est la dernière.
    pub fn get_latest(&self, cluster: &str, node: &str, metric_name: Option<&str>) -> Vec<MetricRecord> {
        self.get_latest_at(cluster, node, metric_name, OffsetDateTime::now_utc())
    }

    pub fn get_latest_at(
        &self,
        cluster: &str,
        node: &str,
        metric_name: Option<&str>,
        now: OffsetDateTime,
    ) -> Vec<MetricRecord> {
        let current_hour = hour_start(now);
        let current = self.query(cluster, node, current_hour, now, metric_name);
        if !current.is_empty() {
            return current;
        }
        self.query(cluster, node, current_hour - Duration::HOUR, current_hour, metric_name)
    }

    fn list_dirs(dir: &Path) -> Vec<String> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(_) => return Vec::new(),
        };
        let mut names: Vec<String> = entries
            .filter_map(Result::ok)
            .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
            .filter_map(|e| e.file_name().into_string().ok())
            .collect();
        names.sort();
        names
    }

    /// Clusters qui ont au moins un répertoire de données
    pub fn list_clusters(&self) -> Vec<String> {
        Self::list_dirs(&self.base_dir)
    }

    pub fn list_nodes(&self, cluster: &str) -> Vec<String> {
        if !is_valid_segment(cluster) {
            return Vec::new();
        }
        Self::list_dirs(&self.base_dir.join(cluster))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{HEALTHY, UNHEALTHY};
    use healthwatch_devkit::TestHarness;
    use time::macros::datetime;

    fn record(name: &str, value: f64, node: &str, ts: OffsetDateTime) -> MetricRecord {
        MetricRecord::new(name, value, node, "prod").at(ts)
    }

    #[test]
    fn test_write_then_query_round_trip() {
        let harness = TestHarness::new();
        let store = MetricStore::new(harness.metrics_dir());
        let written: Vec<MetricRecord> = (0..5)
            .map(|i| record("clickhouse_status", (i % 2) as f64, "ch-01", datetime!(2026-02-04 10:00:00.123456 UTC) + Duration::minutes(i)))
            .collect();
        assert_eq!(store.write_batch(&written), BatchReport { written: 5, failed: 0 });

        let read = store.query("prod", "ch-01", datetime!(2026-02-04 10:00 UTC), datetime!(2026-02-04 10:59 UTC), None);
        assert_eq!(read.len(), written.len());
        for (a, b) in read.iter().zip(&written) {
            assert_eq!(a.metric_name, b.metric_name);
            assert_eq!(a.value, b.value);
            assert_eq!(a.timestamp, b.timestamp);
            assert_eq!(a.node_name, b.node_name);
            assert_eq!(a.cluster_name, b.cluster_name);
        }
    }

    #[test]
    fn test_bucket_file_has_single_header() {
        let harness = TestHarness::new();
        let store = MetricStore::new(harness.metrics_dir());
        store.write(&record("clickhouse_status", HEALTHY, "ch-01", datetime!(2026-02-04 10:00 UTC))).unwrap();
        store.write(&record("clickhouse_status", UNHEALTHY, "ch-01", datetime!(2026-02-04 10:01 UTC))).unwrap();

        let content = harness.read_file("metrics/prod/ch-01/2026/02/04/10.log");
        assert_eq!(
            content,
            "# metric_name,timestamp,value\nclickhouse_status,2026-02-04T10:00:00Z,1\nclickhouse_status,2026-02-04T10:01:00Z,0\n"
        );
    }

    #[test]
    fn test_query_spans_hours_and_sorts() {
        let harness = TestHarness::new();
        let store = MetricStore::new(harness.metrics_dir());
        // écrit volontairement dans le désordre, à cheval sur minuit
        for ts in [
            datetime!(2026-02-05 00:10 UTC),
            datetime!(2026-02-04 23:50 UTC),
            datetime!(2026-02-04 22:30 UTC),
            datetime!(2026-02-05 00:05 UTC),
        ] {
            store.write(&record("clickhouse_status", HEALTHY, "ch-01", ts)).unwrap();
        }

        let read = store.query("prod", "ch-01", datetime!(2026-02-04 22:00 UTC), datetime!(2026-02-05 01:00 UTC), None);
        let stamps: Vec<_> = read.iter().map(|r| r.timestamp).collect();
        assert_eq!(
            stamps,
            vec![
                datetime!(2026-02-04 22:30 UTC),
                datetime!(2026-02-04 23:50 UTC),
                datetime!(2026-02-05 00:05 UTC),
                datetime!(2026-02-05 00:10 UTC),
            ]
        );

        // bornes inclusives, filtrage à l'intérieur du bucket
        let narrow = store.query("prod", "ch-01", datetime!(2026-02-04 23:50 UTC), datetime!(2026-02-05 00:05 UTC), None);
        assert_eq!(narrow.len(), 2);
    }

    #[test]
    fn test_query_filters_by_metric_name() {
        let harness = TestHarness::new();
        let store = MetricStore::new(harness.metrics_dir());
        let ts = datetime!(2026-02-04 10:00 UTC);
        store.write(&record("clickhouse_status", HEALTHY, "ch-01", ts)).unwrap();
        store.write(&record("cpu_usage", 42.5, "ch-01", ts + Duration::SECOND)).unwrap();

        let cpu = store.query("prod", "ch-01", ts, ts + Duration::MINUTE, Some("cpu_usage"));
        assert_eq!(cpu.len(), 1);
        assert_eq!(cpu[0].value, 42.5);
    }

    #[test]
    fn test_query_empty_window_and_unknown_node() {
        let harness = TestHarness::new();
        let store = MetricStore::new(harness.metrics_dir());
        let start = datetime!(2026-02-04 10:00 UTC);
        assert!(store.query("prod", "ghost", start, start + Duration::hours(3), None).is_empty());
        assert!(store.query("prod", "ghost", start, start - Duration::HOUR, None).is_empty());
        assert!(store.query("../etc", "x", start, start, None).is_empty());
    }

    #[test]
    fn test_corrupt_bucket_reads_as_empty() {
        let harness = TestHarness::new();
        let store = MetricStore::new(harness.metrics_dir());
        store.write(&record("clickhouse_status", HEALTHY, "ch-01", datetime!(2026-02-04 11:00 UTC))).unwrap();
        harness.write_file(
            "metrics/prod/ch-01/2026/02/04/10.log",
            "# metric_name,timestamp,value\nclickhouse_status,not-a-date,1\n",
        );

        let read = store.query("prod", "ch-01", datetime!(2026-02-04 10:00 UTC), datetime!(2026-02-04 11:30 UTC), None);
        assert_eq!(read.len(), 1);
        assert_eq!(read[0].timestamp, datetime!(2026-02-04 11:00 UTC));
        // deuxième lecture : toujours vide, sans nouvelle alerte
        assert_eq!(store.query("prod", "ch-01", datetime!(2026-02-04 10:00 UTC), datetime!(2026-02-04 10:59 UTC), None).len(), 0);
        assert_eq!(store.reported_corrupt.lock().len(), 1);
    }

    #[test]
    fn test_trailing_fragment_is_ignored() {
        let harness = TestHarness::new();
        let store = MetricStore::new(harness.metrics_dir());
        harness.write_file(
            "metrics/prod/ch-01/2026/02/04/10.log",
            "# metric_name,timestamp,value\nclickhouse_status,2026-02-04T10:00:00Z,1\nclickhouse_sta",
        );
        let read = store.query("prod", "ch-01", datetime!(2026-02-04 10:00 UTC), datetime!(2026-02-04 10:59 UTC), None);
        assert_eq!(read.len(), 1);
        assert!(store.reported_corrupt.lock().is_empty());
    }

    #[test]
    fn test_invalid_records_rejected_batch_continues() {
        let harness = TestHarness::new();
        let store = MetricStore::new(harness.metrics_dir());
        let ts = datetime!(2026-02-04 10:00 UTC);
        let batch = vec![
            record("clickhouse_status", HEALTHY, "ch-01", ts),
            record("bad,name", HEALTHY, "ch-01", ts),
            record("clickhouse_status", HEALTHY, "../escape", ts),
            record("clickhouse_status", UNHEALTHY, "ch-02", ts),
        ];
        assert_eq!(store.write_batch(&batch), BatchReport { written: 2, failed: 2 });
        assert!(matches!(store.write(&batch[1]), Err(StoreError::InvalidRecord(_))));
    }

    #[test]
    fn test_concurrent_writers_never_interleave() {
        let harness = TestHarness::new();
        let store = Arc::new(MetricStore::new(harness.metrics_dir()));
        let ts = datetime!(2026-02-04 10:00 UTC);

        let handles: Vec<_> = (0..8)
            .map(|w| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for i in 0..100 {
                        // deux nœuds : un bucket partagé par tous, un par écrivain
                        let node = if i % 2 == 0 { "shared".to_string() } else { format!("node-{w}") };
                        let r = record(&format!("metric_{w}"), i as f64, &node, ts + Duration::milliseconds(i));
                        store.write(&r).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let shared = store.query("prod", "shared", ts, ts + Duration::MINUTE, None);
        assert_eq!(shared.len(), 8 * 50);
        for w in 0..8 {
            let own = store.query("prod", &format!("node-{w}"), ts, ts + Duration::MINUTE, None);
            assert_eq!(own.len(), 50);
        }
        let content = harness.read_file("metrics/prod/shared/2026/02/04/10.log");
        assert_eq!(content.matches(BUCKET_HEADER).count(), 1);
        assert!(store.reported_corrupt.lock().is_empty());
    }

    #[test]
    fn test_get_latest_falls_back_to_previous_hour() {
        let harness = TestHarness::new();
        let store = MetricStore::new(harness.metrics_dir());
        store.write(&record("clickhouse_status", HEALTHY, "ch-01", datetime!(2026-02-04 09:10 UTC))).unwrap();
        store.write(&record("clickhouse_status", UNHEALTHY, "ch-01", datetime!(2026-02-04 09:50 UTC))).unwrap();

        let now = datetime!(2026-02-04 10:05 UTC);
        let previous = store.get_latest_at("prod", "ch-01", Some("clickhouse_status"), now);
        let stamps: Vec<_> = previous.iter().map(|r| r.timestamp).collect();
        assert_eq!(stamps, vec![datetime!(2026-02-04 09:10 UTC), datetime!(2026-02-04 09:50 UTC)]);
        assert_eq!(previous.last().map(|r| r.value), Some(UNHEALTHY));

        // dès qu'une mesure existe sur l'heure en cours, l'heure précédente est ignorée
        store.write(&record("clickhouse_status", HEALTHY, "ch-01", datetime!(2026-02-04 10:01 UTC))).unwrap();
        let current = store.get_latest_at("prod", "ch-01", None, now);
        assert_eq!(current.len(), 1);
        assert_eq!(current[0].timestamp, datetime!(2026-02-04 10:01 UTC));

        assert!(store.get_latest_at("prod", "ch-01", None, datetime!(2026-02-04 12:00 UTC)).is_empty());
    }

    #[test]
    fn test_get_latest_returns_every_metric_of_the_hour() {
        let harness = TestHarness::new();
        let store = MetricStore::new(harness.metrics_dir());
        store.write(&record("clickhouse_status", HEALTHY, "ch-01", datetime!(2026-02-04 10:01 UTC))).unwrap();
        store.write(&record("cpu_usage", 37.5, "ch-01", datetime!(2026-02-04 10:01:01 UTC))).unwrap();
        store.write(&record("clickhouse_status", UNHEALTHY, "ch-01", datetime!(2026-02-04 10:02 UTC))).unwrap();

        let now = datetime!(2026-02-04 10:30 UTC);
        let all: Vec<_> = store
            .get_latest_at("prod", "ch-01", None, now)
            .into_iter()
            .map(|r| (r.metric_name, r.value))
            .collect();
        assert_eq!(
            all,
            vec![
                ("clickhouse_status".to_string(), HEALTHY),
                ("cpu_usage".to_string(), 37.5),
                ("clickhouse_status".to_string(), UNHEALTHY),
            ]
        );
        assert_eq!(store.get_latest_at("prod", "ch-01", Some("cpu_usage"), now).len(), 1);
    }

    #[test]
    fn test_write_after_torn_record_keeps_bucket_readable() {
        let harness = TestHarness::new();
        let store = MetricStore::new(harness.metrics_dir());
        harness.write_file(
            "metrics/prod/ch-01/2026/02/04/10.log",
            "# metric_name,timestamp,value\nclickhouse_status,2026-02-04T10:00:00Z,1\nclickhouse_sta",
        );
        store.write(&record("clickhouse_status", UNHEALTHY, "ch-01", datetime!(2026-02-04 10:01 UTC))).unwrap();

        assert_eq!(
            harness.read_file("metrics/prod/ch-01/2026/02/04/10.log"),
            "# metric_name,timestamp,value\nclickhouse_status,2026-02-04T10:00:00Z,1\nclickhouse_status,2026-02-04T10:01:00Z,0\n"
        );
        let read = store.query("prod", "ch-01", datetime!(2026-02-04 10:00 UTC), datetime!(2026-02-04 10:59 UTC), None);
        assert_eq!(read.len(), 2);
        assert!(store.reported_corrupt.lock().is_empty());
    }

    #[test]
    fn test_write_after_torn_header_rewrites_header() {
        let harness = TestHarness::new();
        let store = MetricStore::new(harness.metrics_dir());
        harness.write_file("metrics/prod/ch-01/2026/02/04/10.log", "# metric_na");
        store.write(&record("clickhouse_status", HEALTHY, "ch-01", datetime!(2026-02-04 10:01 UTC))).unwrap();
        assert_eq!(
            harness.read_file("metrics/prod/ch-01/2026/02/04/10.log"),
            "# metric_name,timestamp,value\nclickhouse_status,2026-02-04T10:01:00Z,1\n"
        );
    }

    #[test]
    fn test_list_clusters_and_nodes() {
        let harness = TestHarness::new();
        let store = MetricStore::new(harness.metrics_dir());
        let ts = datetime!(2026-02-04 10:00 UTC);
        store.write(&MetricRecord::new("clickhouse_status", HEALTHY, "b", "staging").at(ts)).unwrap();
        store.write(&MetricRecord::new("clickhouse_status", HEALTHY, "a", "staging").at(ts)).unwrap();
        store.write(&MetricRecord::new("clickhouse_status", HEALTHY, "x", "prod").at(ts)).unwrap();

        assert_eq!(store.list_clusters(), vec!["prod", "staging"]);
        assert_eq!(store.list_nodes("staging"), vec!["a", "b"]);
        assert!(store.list_nodes("missing").is_empty());
    }
}

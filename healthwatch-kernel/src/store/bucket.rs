/**
 * BUCKET HORAIRE - Disposition disque et format de ligne du MetricStore
 *
 * RÔLE :
 * Un bucket = un fichier par (cluster, nœud, heure UTC), écrit en append.
 *
 * FONCTIONNEMENT :
 * - Chemin : <base>/<cluster>/<node>/<YYYY>/<MM>/<DD>/<HH>.log
 * - Première ligne : en-tête "# metric_name,timestamp,value"
 * - Une ligne par mesure : "metric_name,RFC3339,value\n"
 * - Un fragment final sans '\n' = écriture en cours, ignoré à la lecture
 *
 * EXEMPLE :
 * ```text
 * # metric_name,timestamp,value
 * clickhouse_status,2026-02-04T10:00:00Z,1
 * clickhouse_status,2026-02-04T10:01:00.5Z,0
 * ```
 */

use crate::models::MetricRecord;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Duration, OffsetDateTime, PrimitiveDateTime, UtcOffset};

pub const BUCKET_HEADER: &str = "# metric_name,timestamp,value";
pub const BUCKET_EXTENSION: &str = "log";

/// Début de l'heure UTC qui contient `ts`
pub fn hour_start(ts: OffsetDateTime) -> OffsetDateTime {
    let utc = ts.to_offset(UtcOffset::UTC);
    utc.replace_time(time::Time::MIDNIGHT) + Duration::hours(i64::from(utc.hour()))
}

pub fn bucket_path(base: &Path, cluster: &str, node: &str, ts: OffsetDateTime) -> PathBuf {
    let utc = ts.to_offset(UtcOffset::UTC);
    base.join(cluster)
        .join(node)
        .join(format!("{:04}", utc.year()))
        .join(format!("{:02}", u8::from(utc.month())))
        .join(format!("{:02}", utc.day()))
        .join(format!("{:02}.{}", utc.hour(), BUCKET_EXTENSION))
}

/// Identifiant compact du bucket, sert à dériver les metric_id relus
pub fn bucket_id(ts: OffsetDateTime) -> String {
    let utc = ts.to_offset(UtcOffset::UTC);
    format!("{:04}{:02}{:02}{:02}", utc.year(), u8::from(utc.month()), utc.day(), utc.hour())
}

/// Un segment de chemin doit rester un seul répertoire
pub fn is_valid_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment != "."
        && segment != ".."
        && !segment.contains(['/', '\\', '\0'])
}

pub fn is_valid_metric_name(name: &str) -> bool {
    !name.is_empty() && !name.starts_with('#') && !name.contains([',', '\n', '\r'])
}

pub fn format_line(record: &MetricRecord) -> Result<String, time::error::Format> {
    let ts = record.timestamp.to_offset(UtcOffset::UTC).format(&Rfc3339)?;
    Ok(format!("{},{},{}\n", record.metric_name, ts, record.value))
}

/// RFC 3339 d'abord, puis ISO naïf (sans offset) interprété en UTC
pub fn parse_timestamp(raw: &str) -> Option<OffsetDateTime> {
    if let Ok(ts) = OffsetDateTime::parse(raw, &Rfc3339) {
        return Some(ts.to_offset(UtcOffset::UTC));
    }
    let with_fraction = format_description!("[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond]");
    let without_fraction = format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]");
    PrimitiveDateTime::parse(raw, with_fraction)
        .or_else(|_| PrimitiveDateTime::parse(raw, without_fraction))
        .ok()
        .map(PrimitiveDateTime::assume_utc)
}

/// Parse le contenu complet d'un bucket.
/// Err(numéro de ligne) sur la première ligne complète illisible.
pub fn parse_bucket(content: &str, cluster: &str, node: &str, bucket: &str) -> Result<Vec<MetricRecord>, usize> {
    let complete = match content.rfind('\n') {
        Some(idx) => &content[..=idx],
        None => "",
    };

    let mut records = Vec::new();
    for (idx, raw) in complete.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw.trim_end_matches('\r');
        if line.trim().is_empty() || line.starts_with('#') {
            continue;
        }

        let mut parts = line.splitn(3, ',');
        let (name, ts, value) = match (parts.next(), parts.next(), parts.next()) {
            (Some(name), Some(ts), Some(value)) if !name.is_empty() => (name, ts, value),
            _ => return Err(line_no),
        };
        let timestamp = parse_timestamp(ts.trim()).ok_or(line_no)?;
        let value: f64 = value.trim().parse().map_err(|_| line_no)?;

        records.push(MetricRecord {
            metric_id: format!("{cluster}/{node}/{bucket}/{line_no}"),
            metric_name: name.to_string(),
            value,
            timestamp,
            node_name: node.to_string(),
            cluster_name: cluster.to_string(),
            unit: String::new(),
            tags: HashMap::new(),
        });
    }
    Ok(records)
}

// Append-only event log on SQLite.

use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection};
use std::io;
use std::path::Path;
use tracing::{debug, info};

use crate::error::StoreError;
use crate::models::Observation;

/// Column order of the event table. The export header uses the same names.
pub const COLUMNS: [&str; 10] = [
    "TYPE",
    "DATETIME",
    "STATUS",
    "DOMAIN",
    "CERT_SUBJECT",
    "CERT_ISSUER",
    "ERROR_MSG",
    "PING",
    "DOWNLOAD_SPEED_MB",
    "UPLOAD_SPEED_MB",
];

pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// Exported as decimals even where SQLite affinity stored an integer.
const MEASUREMENT_COLUMNS: [&str; 3] = ["PING", "DOWNLOAD_SPEED_MB", "UPLOAD_SPEED_MB"];

/// Anything that can durably accept observations. `append` must not return
/// `Ok` before the row would survive a crash.
pub trait EventSink {
    fn append(&mut self, event: &Observation) -> Result<(), StoreError>;
}

pub struct EventStore {
    conn: Connection,
    table: String,
    insert_sql: String,
}

impl EventStore {
    pub fn open(path: &Path, table: &str) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        info!("Event store opened at {}", path.display());
        Self::with_connection(conn, table)
    }

    pub fn open_in_memory(table: &str) -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?, table)
    }

    fn with_connection(conn: Connection, table: &str) -> Result<Self, StoreError> {
        validate_table_name(table)?;
        conn.execute_batch(&format!(
            r#"
            PRAGMA synchronous = FULL;
            CREATE TABLE IF NOT EXISTS {table} (
                TYPE TEXT,
                DATETIME TIMESTAMP,
                STATUS TEXT,
                DOMAIN TEXT,
                CERT_SUBJECT TEXT,
                CERT_ISSUER TEXT,
                ERROR_MSG TEXT,
                PING INTEGER,
                DOWNLOAD_SPEED_MB REAL,
                UPLOAD_SPEED_MB REAL
            );
            "#
        ))?;

        let placeholders = vec!["?"; COLUMNS.len()].join(", ");
        let insert_sql = format!("INSERT INTO {table} VALUES ({placeholders})");
        Ok(Self {
            conn,
            table: table.to_string(),
            insert_sql,
        })
    }

    pub fn row_count(&self) -> Result<u64, StoreError> {
        let count: i64 = self
            .conn
            .query_row(&format!("SELECT COUNT(*) FROM {}", self.table), [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Writes the whole table, header first, in insertion order. Returns the
    /// number of data rows written.
    pub fn export_csv<W: io::Write>(&self, writer: W) -> Result<u64, StoreError> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT * FROM {} ORDER BY rowid", self.table))?;
        let header: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let measurement: Vec<bool> = header
            .iter()
            .map(|name| MEASUREMENT_COLUMNS.contains(&name.as_str()))
            .collect();

        let mut out = csv::Writer::from_writer(writer);
        out.write_record(&header)?;

        let mut written = 0;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let mut record = Vec::with_capacity(measurement.len());
            for (idx, &decimal) in measurement.iter().enumerate() {
                record.push(cell_text(row.get::<_, Value>(idx)?, decimal));
            }
            out.write_record(&record)?;
            written += 1;
        }
        out.flush()?;
        Ok(written)
    }

    pub fn close(self) -> Result<(), StoreError> {
        self.conn.close().map_err(|(_, e)| StoreError::Sqlite(e))?;
        info!("Event store closed");
        Ok(())
    }
}

impl EventSink for EventStore {
    fn append(&mut self, event: &Observation) -> Result<(), StoreError> {
        self.conn.execute(&self.insert_sql, params_from_iter(row_values(event)))?;
        debug!(kind = event.kind.as_str(), outcome = %event.outcome, "event written");
        Ok(())
    }
}

fn validate_table_name(table: &str) -> Result<(), StoreError> {
    let valid = !table.is_empty()
        && table.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !table.starts_with(|c: char| c.is_ascii_digit());
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidTableName(table.to_string()))
    }
}

/// Unused fields go in as empty text rather than NULL.
fn row_values(event: &Observation) -> [Value; 10] {
    let blank = || Value::Text(String::new());
    let (ping, down, up) = match event.metrics {
        Some(m) => (
            Value::Real(m.ping_ms),
            Value::Real(m.download_mbps),
            Value::Real(m.upload_mbps),
        ),
        None => (blank(), blank(), blank()),
    };
    [
        Value::Text(event.kind.as_str().to_string()),
        Value::Text(event.timestamp.format(DATETIME_FORMAT).to_string()),
        Value::Text(event.outcome.clone()),
        Value::Text(event.target.clone()),
        Value::Text(event.certificate_subject.clone()),
        Value::Text(event.certificate_issuer.clone()),
        Value::Text(event.error_detail.clone()),
        ping,
        down,
        up,
    ]
}

fn cell_text(value: Value, decimal: bool) -> String {
    match value {
        Value::Null => String::new(),
        Value::Integer(i) if decimal => format!("{i}.0"),
        Value::Integer(i) => i.to_string(),
        Value::Real(f) => real_text(f),
        Value::Text(s) => s,
        Value::Blob(b) => String::from_utf8_lossy(&b).into_owned(),
    }
}

/// `14.0` stays `14.0`; `Display` alone would drop the fraction.
fn real_text(f: f64) -> String {
    if f.is_finite() && f.fract() == 0.0 {
        format!("{f:.1}")
    } else {
        f.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProbeError;
    use crate::models::{PeerCertificate, ThroughputSample};
    use chrono::{TimeZone, Utc};

    fn connected() -> Observation {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        Observation::connectivity(
            "1.1.1.1",
            at,
            &Ok(PeerCertificate {
                subject: "cloudflare-dns.com".into(),
                issuer: "DigiCert Global G2 TLS RSA SHA256 2020 CA1".into(),
            }),
        )
    }

    fn measured() -> Observation {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 5).unwrap();
        Observation::throughput(
            at,
            &Ok(ThroughputSample { ping_ms: 14.0, download_mbps: 95.12, upload_mbps: 20.5 }),
        )
    }

    #[test]
    fn identical_events_are_both_kept() {
        let mut store = EventStore::open_in_memory("speed").unwrap();
        let event = connected();
        store.append(&event).unwrap();
        store.append(&event).unwrap();
        assert_eq!(store.row_count().unwrap(), 2);
    }

    #[test]
    fn unused_fields_are_blank_not_null() {
        let mut store = EventStore::open_in_memory("speed").unwrap();
        store.append(&connected()).unwrap();
        store.append(&measured()).unwrap();

        let nulls: i64 = store
            .conn
            .query_row(
                "SELECT COUNT(*) FROM speed WHERE PING IS NULL OR CERT_SUBJECT IS NULL OR DOMAIN IS NULL",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(nulls, 0);

        let (kind, domain, subject, ping): (String, String, String, f64) = store
            .conn
            .query_row(
                "SELECT TYPE, DOMAIN, CERT_SUBJECT, PING FROM speed WHERE TYPE = 'speed'",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .unwrap();
        assert_eq!(kind, "speed");
        assert_eq!(domain, "");
        assert_eq!(subject, "");
        assert_eq!(ping, 14.0);
    }

    #[test]
    fn failed_throughput_row_has_sentinels() {
        let mut store = EventStore::open_in_memory("speed").unwrap();
        let event = Observation::throughput(
            Utc::now(),
            &Err(ProbeError::ThroughputMeasurement("HTTP 503".into())),
        );
        store.append(&event).unwrap();

        let (ping, down, up, msg): (f64, f64, f64, String) = store
            .conn
            .query_row(
                "SELECT PING, DOWNLOAD_SPEED_MB, UPLOAD_SPEED_MB, ERROR_MSG FROM speed",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .unwrap();
        assert_eq!((ping, down, up), (-1.0, 0.0, 0.0));
        assert_eq!(msg, "HTTP 503");
    }

    #[test]
    fn export_writes_header_and_every_row() {
        let mut store = EventStore::open_in_memory("speed").unwrap();
        store.append(&connected()).unwrap();
        store.append(&measured()).unwrap();

        let mut buf = Vec::new();
        let written = store.export_csv(&mut buf).unwrap();
        assert_eq!(written, 2);

        let text = String::from_utf8(buf).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next().unwrap(), COLUMNS.join(","));
        let first = lines.next().unwrap();
        assert!(first.starts_with("status,2024-05-01 12:00:00.000000,successful connection,1.1.1.1,"));
        let second = lines.next().unwrap();
        assert!(second.starts_with("speed,"));
        assert!(second.ends_with(",14.0,95.12,20.5"));
        assert!(lines.next().is_none());
    }

    #[test]
    fn export_keeps_a_decimal_part_on_whole_measurements() {
        let mut store = EventStore::open_in_memory("speed").unwrap();
        store
            .append(&Observation::throughput(
                Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 10).unwrap(),
                &Ok(ThroughputSample { ping_ms: 12.25, download_mbps: 95.0, upload_mbps: 20.0 }),
            ))
            .unwrap();
        store
            .append(&Observation::throughput(
                Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 20).unwrap(),
                &Err(ProbeError::ThroughputMeasurement("HTTP 503".into())),
            ))
            .unwrap();

        let mut buf = Vec::new();
        store.export_csv(&mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let rows: Vec<&str> = text.lines().skip(1).collect();
        assert!(rows[0].ends_with(",12.25,95.0,20.0"));
        assert!(rows[1].ends_with(",HTTP 503,-1.0,0.0,0.0"));
    }

    #[test]
    fn only_measurement_columns_gain_a_fraction() {
        assert_eq!(cell_text(Value::Integer(14), true), "14.0");
        assert_eq!(cell_text(Value::Integer(14), false), "14");
        assert_eq!(cell_text(Value::Real(95.0), false), "95.0");
        assert_eq!(cell_text(Value::Real(95.12), true), "95.12");
        assert_eq!(cell_text(Value::Text(String::new()), true), "");
    }

    #[test]
    fn rows_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("speeds.db");

        let mut store = EventStore::open(&path, "speed").unwrap();
        store.append(&connected()).unwrap();
        store.close().unwrap();

        let store = EventStore::open(&path, "speed").unwrap();
        assert_eq!(store.row_count().unwrap(), 1);
    }

    #[test]
    fn rejects_unsafe_table_names() {
        assert!(matches!(
            EventStore::open_in_memory("speed; DROP TABLE x"),
            Err(StoreError::InvalidTableName(_))
        ));
        assert!(EventStore::open_in_memory("9speed").is_err());
    }
}

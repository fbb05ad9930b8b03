//! Performance record queries.
//!
//! Records are append-only. Each one is keyed by the digest of the compound
//! transaction it describes, so storing the same transaction twice is
//! reported instead of duplicating the row.

use std::collections::BTreeMap;

use rusqlite::{params, Connection, OptionalExtension, Row};
use vaultkeep_types::{
    FeedId, PerformanceMetrics, PerformanceRecord, PriceSample, Timestamp, TxRef,
};

use super::vaults::conversion_error;
use crate::{map_constraint, to_sql_int, DbError, Result};

/// Result of [`store_vault_performance`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreOutcome {
    /// New row id.
    Inserted(i64),
    /// A record for this transaction already exists; nothing was written.
    Duplicate,
}

const RECORD_COLUMNS: &str = "id, vault_id, timestamp, tx_digest, tvl, tvl_quote, apy, earned";

/// Append a performance record together with its per-feed prices.
///
/// The record row and its price rows are written in one transaction.
pub fn store_vault_performance(
    conn: &Connection,
    record: &PerformanceRecord,
    now: Timestamp,
) -> Result<StoreOutcome> {
    let tx = conn.unchecked_transaction()?;

    if performance_exists(&tx, &record.tx_ref)? {
        return Ok(StoreOutcome::Duplicate);
    }

    let tvl = record
        .metrics
        .tvl
        .map(|v| to_sql_int(v, "tvl"))
        .transpose()?;
    let earned = record
        .metrics
        .earned
        .map(|v| to_sql_int(v, "earned"))
        .transpose()?;

    tx.execute(
        "INSERT INTO vault_performance
            (vault_id, timestamp, tx_digest, tvl, tvl_quote, apy, earned, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            record.vault_id,
            to_sql_int(record.timestamp, "timestamp")?,
            record.tx_ref.as_str(),
            tvl,
            record.metrics.tvl_quote,
            record.metrics.apy,
            earned,
            to_sql_int(now, "created_at")?,
        ],
    )
    .map_err(|e| map_constraint(e, "store performance"))?;
    let performance_id = tx.last_insert_rowid();

    {
        let mut stmt = tx.prepare(
            "INSERT INTO performance_prices
                (performance_id, feed_id, price, confidence, publish_time)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )?;
        for (feed, sample) in &record.prices {
            let publish_time = sample
                .as_ref()
                .map(|s| to_sql_int(s.timestamp, "publish_time"))
                .transpose()?;
            stmt.execute(params![
                performance_id,
                feed.as_str(),
                sample.as_ref().map(|s| s.price),
                sample.as_ref().map(|s| s.confidence),
                publish_time,
            ])?;
        }
    }

    tx.commit()?;
    Ok(StoreOutcome::Inserted(performance_id))
}

/// Whether a record for `tx_ref` exists.
pub fn performance_exists(conn: &Connection, tx_ref: &TxRef) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM vault_performance WHERE tx_digest = ?1",
            params![tx_ref.as_str()],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Records for a vault with `start <= timestamp <= end`, oldest first.
pub fn get_vault_performance(
    conn: &Connection,
    vault_id: i64,
    start: Timestamp,
    end: Timestamp,
) -> Result<Vec<PerformanceRecord>> {
    // Stored timestamps never exceed i64::MAX.
    if start > i64::MAX as u64 || start > end {
        return Ok(Vec::new());
    }
    let mut stmt = conn.prepare(&format!(
        "SELECT {RECORD_COLUMNS} FROM vault_performance
         WHERE vault_id = ?1 AND timestamp >= ?2 AND timestamp <= ?3
         ORDER BY timestamp ASC"
    ))?;
    let rows = stmt
        .query_map(
            params![
                vault_id,
                to_sql_int(start, "start")?,
                to_sql_int(end.min(i64::MAX as u64), "end")?,
            ],
            record_row,
        )?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(|(id, record)| attach_prices(conn, id, record))
        .collect()
}

/// Most recent record for a vault.
pub fn latest_vault_performance(
    conn: &Connection,
    vault_id: i64,
) -> Result<Option<PerformanceRecord>> {
    let row = conn
        .query_row(
            &format!(
                "SELECT {RECORD_COLUMNS} FROM vault_performance
                 WHERE vault_id = ?1 ORDER BY timestamp DESC LIMIT 1"
            ),
            params![vault_id],
            record_row,
        )
        .optional()?;

    row.map(|(id, record)| attach_prices(conn, id, record))
        .transpose()
}

fn record_row(row: &Row<'_>) -> rusqlite::Result<(i64, PerformanceRecord)> {
    Ok((
        row.get(0)?,
        PerformanceRecord {
            vault_id: row.get(1)?,
            timestamp: row.get::<_, i64>(2)? as u64,
            tx_ref: TxRef(row.get(3)?),
            metrics: PerformanceMetrics {
                tvl: row.get::<_, Option<i64>>(4)?.map(|v| v as u64),
                tvl_quote: row.get(5)?,
                apy: row.get(6)?,
                earned: row.get::<_, Option<i64>>(7)?.map(|v| v as u64),
            },
            prices: BTreeMap::new(),
        },
    ))
}

fn attach_prices(
    conn: &Connection,
    performance_id: i64,
    mut record: PerformanceRecord,
) -> Result<PerformanceRecord> {
    let mut stmt = conn.prepare_cached(
        "SELECT feed_id, price, confidence, publish_time
         FROM performance_prices WHERE performance_id = ?1",
    )?;
    let rows = stmt.query_map(params![performance_id], |row| {
        let raw: String = row.get(0)?;
        let feed = FeedId::parse(&raw).map_err(|e| conversion_error(0, e))?;
        let price: Option<f64> = row.get(1)?;
        let confidence: Option<f64> = row.get(2)?;
        let publish_time: Option<i64> = row.get(3)?;

        let sample = match (price, confidence, publish_time) {
            (Some(price), Some(confidence), Some(ts)) => Some(PriceSample {
                feed_id: feed.clone(),
                price,
                confidence,
                timestamp: ts as u64,
            }),
            _ => None,
        };
        Ok((feed, sample))
    })?;

    for row in rows {
        let (feed, sample) = row.map_err(DbError::Sqlite)?;
        record.prices.insert(feed, sample);
    }
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::open_memory;
    use crate::queries::vaults::create_vault;
    use vaultkeep_types::VaultAddress;

    fn setup() -> (Connection, i64) {
        let conn = open_memory().expect("open");
        let vault = create_vault(
            &conn,
            &VaultAddress::parse("0xabc").expect("address"),
            14_400,
            1,
        )
        .expect("create");
        (conn, vault.id)
    }

    fn feed(s: &str) -> FeedId {
        FeedId::parse(s).expect("feed")
    }

    fn record(vault_id: i64, ts: u64, digest: &str) -> PerformanceRecord {
        let mut prices = BTreeMap::new();
        prices.insert(
            feed("aa"),
            Some(PriceSample {
                feed_id: feed("aa"),
                price: 1.25,
                confidence: 0.001,
                timestamp: ts - 2,
            }),
        );
        prices.insert(feed("bb"), None);
        PerformanceRecord {
            vault_id,
            timestamp: ts,
            tx_ref: TxRef(digest.to_string()),
            metrics: PerformanceMetrics {
                tvl: Some(1_000_000),
                tvl_quote: Some(1.25),
                apy: Some(0.07),
                earned: None,
            },
            prices,
        }
    }

    #[test]
    fn test_store_and_read_back() {
        let (conn, vault_id) = setup();
        let rec = record(vault_id, 100, "D1");

        let outcome = store_vault_performance(&conn, &rec, 101).expect("store");
        assert!(matches!(outcome, StoreOutcome::Inserted(_)));

        let rows = get_vault_performance(&conn, vault_id, 0, u64::MAX).expect("query");
        assert_eq!(rows, vec![rec.clone()]);
        assert_eq!(rows[0].missing_feeds(), vec![&feed("bb")]);
    }

    #[test]
    fn test_duplicate_digest_not_rewritten() {
        let (conn, vault_id) = setup();
        store_vault_performance(&conn, &record(vault_id, 100, "D1"), 100).expect("first");

        let again = store_vault_performance(&conn, &record(vault_id, 200, "D1"), 200)
            .expect("second");
        assert_eq!(again, StoreOutcome::Duplicate);

        let rows = get_vault_performance(&conn, vault_id, 0, u64::MAX).expect("query");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].timestamp, 100);
    }

    #[test]
    fn test_range_is_inclusive_and_ascending() {
        let (conn, vault_id) = setup();
        for (ts, d) in [(300, "C"), (100, "A"), (200, "B"), (400, "D")] {
            store_vault_performance(&conn, &record(vault_id, ts, d), ts).expect("store");
        }

        let rows = get_vault_performance(&conn, vault_id, 100, 300).expect("query");
        let stamps: Vec<u64> = rows.iter().map(|r| r.timestamp).collect();
        assert_eq!(stamps, vec![100, 200, 300]);
    }

    #[test]
    fn test_empty_range() {
        let (conn, vault_id) = setup();
        store_vault_performance(&conn, &record(vault_id, 100, "A"), 100).expect("store");
        let rows = get_vault_performance(&conn, vault_id, 500, 600).expect("query");
        assert!(rows.is_empty());
    }

    #[test]
    fn test_out_of_range_bounds_are_empty() {
        let (conn, vault_id) = setup();
        store_vault_performance(&conn, &record(vault_id, 100, "A"), 100).expect("store");

        let beyond = i64::MAX as u64 + 1;
        for (start, end) in [(beyond, u64::MAX), (u64::MAX, u64::MAX), (200, 100)] {
            let rows = get_vault_performance(&conn, vault_id, start, end).expect("query");
            assert!(rows.is_empty(), "start={start} end={end}");
        }
        let rows = get_vault_performance(&conn, vault_id, 100, u64::MAX).expect("query");
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn test_same_timestamp_rejected() {
        let (conn, vault_id) = setup();
        store_vault_performance(&conn, &record(vault_id, 100, "A"), 100).expect("store");
        assert!(matches!(
            store_vault_performance(&conn, &record(vault_id, 100, "B"), 100),
            Err(DbError::Constraint(_))
        ));
    }

    #[test]
    fn test_unknown_vault_rejected() {
        let (conn, _) = setup();
        assert!(matches!(
            store_vault_performance(&conn, &record(999, 100, "A"), 100),
            Err(DbError::Constraint(_))
        ));
    }

    #[test]
    fn test_latest_and_exists() {
        let (conn, vault_id) = setup();
        assert!(latest_vault_performance(&conn, vault_id).expect("latest").is_none());

        store_vault_performance(&conn, &record(vault_id, 100, "A"), 100).expect("store");
        store_vault_performance(&conn, &record(vault_id, 200, "B"), 200).expect("store");

        let latest = latest_vault_performance(&conn, vault_id)
            .expect("latest")
            .expect("some");
        assert_eq!(latest.tx_ref, TxRef("B".into()));
        assert!(performance_exists(&conn, &TxRef("A".into())).expect("exists"));
        assert!(!performance_exists(&conn, &TxRef("Z".into())).expect("exists"));
    }
}

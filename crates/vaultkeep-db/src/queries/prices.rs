//! Price history queries.

use rusqlite::{params, Connection};
use vaultkeep_types::{FeedId, PriceSample, Timestamp};

use crate::{to_sql_int, DbError, Result};

/// Store a fetched sample. The same `(feed, publish_time)` pair is kept once.
///
/// Returns `true` when a new row was written.
pub fn store_price_sample(
    conn: &Connection,
    sample: &PriceSample,
    recorded_at: Timestamp,
) -> Result<bool> {
    let changed = conn.execute(
        "INSERT OR IGNORE INTO price_history
            (feed_id, price, confidence, publish_time, recorded_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            sample.feed_id.as_str(),
            sample.price,
            sample.confidence,
            to_sql_int(sample.timestamp, "publish_time")?,
            to_sql_int(recorded_at, "recorded_at")?,
        ],
    )?;
    Ok(changed == 1)
}

/// The newest `limit` samples for a feed, newest first.
pub fn recent_prices(conn: &Connection, feed: &FeedId, limit: u32) -> Result<Vec<PriceSample>> {
    let mut stmt = conn.prepare(
        "SELECT price, confidence, publish_time FROM price_history
         WHERE feed_id = ?1 ORDER BY publish_time DESC LIMIT ?2",
    )?;
    let rows = stmt.query_map(params![feed.as_str(), limit], |row| {
        Ok(PriceSample {
            feed_id: feed.clone(),
            price: row.get(0)?,
            confidence: row.get(1)?,
            timestamp: row.get::<_, i64>(2)? as u64,
        })
    })?;
    rows.collect::<std::result::Result<Vec<_>, _>>()
        .map_err(DbError::Sqlite)
}

//! SQL schema definitions.

/// Complete schema for the v1 database.
pub const SCHEMA_V1: &str = r#"
-- ============================================================
-- Vault registry
-- ============================================================

CREATE TABLE IF NOT EXISTS vaults (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    address TEXT NOT NULL UNIQUE,
    interval_secs INTEGER NOT NULL CHECK (interval_secs > 0),
    last_compounded_at INTEGER,
    last_attempt_at INTEGER,
    status TEXT NOT NULL DEFAULT 'idle'
        CHECK (status IN ('idle', 'in_progress', 'failed', 'degraded')),
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

-- ============================================================
-- Performance tracking (append-only)
-- ============================================================

CREATE TABLE IF NOT EXISTS vault_performance (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    vault_id INTEGER NOT NULL REFERENCES vaults(id),
    timestamp INTEGER NOT NULL,
    tx_digest TEXT NOT NULL UNIQUE,
    tvl INTEGER,
    tvl_quote REAL,
    apy REAL,
    earned INTEGER,
    created_at INTEGER NOT NULL,
    UNIQUE (vault_id, timestamp)
);

CREATE INDEX IF NOT EXISTS idx_performance_vault_time
    ON vault_performance(vault_id, timestamp);

-- One row per configured feed; NULL price columns mark an absent sample.
CREATE TABLE IF NOT EXISTS performance_prices (
    performance_id INTEGER NOT NULL REFERENCES vault_performance(id) ON DELETE CASCADE,
    feed_id TEXT NOT NULL,
    price REAL,
    confidence REAL,
    publish_time INTEGER,
    PRIMARY KEY (performance_id, feed_id)
);

-- ============================================================
-- Price history
-- ============================================================

CREATE TABLE IF NOT EXISTS price_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    feed_id TEXT NOT NULL,
    price REAL NOT NULL,
    confidence REAL NOT NULL,
    publish_time INTEGER NOT NULL,
    recorded_at INTEGER NOT NULL,
    UNIQUE (feed_id, publish_time)
);

CREATE INDEX IF NOT EXISTS idx_price_history_feed
    ON price_history(feed_id, publish_time);
"#;

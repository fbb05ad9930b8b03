//! Store service.
//!
//! Owns the shared SQLite handle and retries transient failures (busy,
//! locked, I/O) with the workspace [`Backoff`] policy before giving up.
//! Every registry and recorder access goes through here.

use std::sync::Arc;

use rusqlite::Connection;
use tokio::sync::Mutex;
use tracing::warn;
use vaultkeep_db::queries::performance::{self, StoreOutcome};
use vaultkeep_db::queries::vaults::{self, VaultUpdate};
use vaultkeep_db::queries::prices;
use vaultkeep_db::DbError;
use vaultkeep_types::{
    Backoff, FeedId, PerformanceRecord, PriceSample, Timestamp, TxRef, Vault, VaultAddress,
};

/// Store access failure after retries.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("rejected by store: {0}")]
    Constraint(String),

    #[error("{op} failed after {attempts} attempt(s): {source}")]
    Unavailable {
        op: &'static str,
        attempts: u32,
        #[source]
        source: DbError,
    },

    #[error("store task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Shared handle to the persistent store.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
    backoff: Backoff,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("backoff", &self.backoff)
            .finish_non_exhaustive()
    }
}

impl Store {
    pub fn new(conn: Connection, backoff: Backoff) -> Self {
        Self::from_shared(Arc::new(Mutex::new(conn)), backoff)
    }

    /// Wrap a connection that is also used elsewhere.
    pub fn from_shared(conn: Arc<Mutex<Connection>>, backoff: Backoff) -> Self {
        Self { conn, backoff }
    }

    /// The underlying connection handle.
    pub fn connection(&self) -> &Arc<Mutex<Connection>> {
        &self.conn
    }

    /// Run `f` against the connection, retrying transient failures.
    ///
    /// Each call runs on the blocking pool; SQLite never stalls a runtime
    /// worker.
    async fn with_retry<T, F>(&self, op: &'static str, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: Fn(&Connection) -> vaultkeep_db::Result<T> + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        let mut attempt = 1;
        loop {
            let conn = self.conn.clone();
            let call = f.clone();
            let result = tokio::task::spawn_blocking(move || {
                let conn = conn.blocking_lock();
                call(&conn)
            })
            .await?;

            match result {
                Ok(value) => return Ok(value),
                Err(DbError::NotFound(what)) => return Err(StoreError::NotFound(what)),
                Err(DbError::Constraint(what)) => return Err(StoreError::Constraint(what)),
                Err(err) if err.is_transient() && self.backoff.allows_retry(attempt) => {
                    let delay = self.backoff.delay(attempt);
                    warn!(op, attempt, error = %err, ?delay, "store operation failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(source) => {
                    return Err(StoreError::Unavailable {
                        op,
                        attempts: attempt,
                        source,
                    })
                }
            }
        }
    }

    pub async fn create_vault(
        &self,
        address: &VaultAddress,
        interval_secs: u64,
        now: Timestamp,
    ) -> Result<Vault> {
        let address = address.clone();
        self.with_retry("create_vault", move |conn| {
            vaults::create_vault(conn, &address, interval_secs, now)
        })
        .await
    }

    pub async fn get_vault(&self, address: &VaultAddress) -> Result<Vault> {
        let address = address.clone();
        self.with_retry("get_vault", move |conn| vaults::get_vault(conn, &address))
            .await
    }

    pub async fn find_vault(&self, address: &VaultAddress) -> Result<Option<Vault>> {
        let address = address.clone();
        self.with_retry("find_vault", move |conn| vaults::find_vault(conn, &address))
            .await
    }

    pub async fn list_vaults(&self) -> Result<Vec<Vault>> {
        self.with_retry("list_vaults", vaults::list_vaults).await
    }

    pub async fn update_vault(
        &self,
        id: i64,
        update: &VaultUpdate,
        now: Timestamp,
    ) -> Result<Vault> {
        let update = update.clone();
        self.with_retry("update_vault", move |conn| {
            vaults::update_vault(conn, id, &update, now)
        })
        .await
    }

    pub async fn store_vault_performance(
        &self,
        record: &PerformanceRecord,
        now: Timestamp,
    ) -> Result<StoreOutcome> {
        let record = record.clone();
        self.with_retry("store_vault_performance", move |conn| {
            performance::store_vault_performance(conn, &record, now)
        })
        .await
    }

    pub async fn get_vault_performance(
        &self,
        vault_id: i64,
        start: Timestamp,
        end: Timestamp,
    ) -> Result<Vec<PerformanceRecord>> {
        self.with_retry("get_vault_performance", move |conn| {
            performance::get_vault_performance(conn, vault_id, start, end)
        })
        .await
    }

    pub async fn latest_vault_performance(
        &self,
        vault_id: i64,
    ) -> Result<Option<PerformanceRecord>> {
        self.with_retry("latest_vault_performance", move |conn| {
            performance::latest_vault_performance(conn, vault_id)
        })
        .await
    }

    pub async fn performance_exists(&self, tx_ref: &TxRef) -> Result<bool> {
        let tx_ref = tx_ref.clone();
        self.with_retry("performance_exists", move |conn| {
            performance::performance_exists(conn, &tx_ref)
        })
        .await
    }

    pub async fn store_price_sample(&self, sample: &PriceSample, now: Timestamp) -> Result<bool> {
        let sample = sample.clone();
        self.with_retry("store_price_sample", move |conn| {
            prices::store_price_sample(conn, &sample, now)
        })
        .await
    }

    /// Newest samples of one feed first.
    pub async fn recent_prices(&self, feed: &FeedId, limit: u32) -> Result<Vec<PriceSample>> {
        let feed = feed.clone();
        self.with_retry("recent_prices", move |conn| {
            prices::recent_prices(conn, &feed, limit)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::time::Duration;

    fn store() -> Store {
        Store::new(vaultkeep_db::open_memory().expect("open"), Backoff::default())
    }

    fn busy() -> DbError {
        DbError::Sqlite(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            None,
        ))
    }

    #[tokio::test]
    async fn test_create_and_find() {
        let store = store();
        let addr = VaultAddress::parse("0x1").expect("address");
        assert!(store.find_vault(&addr).await.expect("find").is_none());

        let created = store.create_vault(&addr, 60, 10).await.expect("create");
        assert_eq!(store.get_vault(&addr).await.expect("get"), created);
    }

    #[tokio::test]
    async fn test_not_found_maps() {
        let store = store();
        let addr = VaultAddress::parse("0x1").expect("address");
        assert!(matches!(
            store.get_vault(&addr).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_retried() {
        let store = Store::new(
            vaultkeep_db::open_memory().expect("open"),
            Backoff::new(3, Duration::from_millis(100), Duration::from_secs(1)),
        );
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let value = store
            .with_retry("flaky", move |_| {
                let calls = &counter;
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(busy())
                } else {
                    Ok(7)
                }
            })
            .await
            .expect("third attempt succeeds");
        assert_eq!(value, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_are_bounded() {
        let store = Store::new(
            vaultkeep_db::open_memory().expect("open"),
            Backoff::new(2, Duration::from_millis(100), Duration::from_secs(1)),
        );
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let err = store
            .with_retry("down", move |_| -> vaultkeep_db::Result<()> {
                let calls = &counter;
                calls.fetch_add(1, Ordering::SeqCst);
                Err(busy())
            })
            .await
            .expect_err("gives up");
        assert!(matches!(err, StoreError::Unavailable { attempts: 2, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_slow_queries_leave_runtime_free() {
        let store = store();
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        tokio::spawn(async move { flag.store(true, Ordering::SeqCst) });

        // Current-thread runtime: the task above only runs if the query
        // does not occupy the worker.
        store
            .with_retry("slow", |_| {
                std::thread::sleep(Duration::from_millis(100));
                Ok(())
            })
            .await
            .expect("query");
        assert!(ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_permanent_errors_not_retried() {
        let store = store();
        {
            let conn = store.connection().lock().await;
            conn.execute_batch("PRAGMA query_only = ON;").expect("pragma");
        }
        let addr = VaultAddress::parse("0x1").expect("address");
        let err = store.create_vault(&addr, 60, 1).await.expect_err("read-only");
        assert!(matches!(err, StoreError::Unavailable { attempts: 1, .. }));
    }
}

//! Process health counters.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use serde::Serialize;
use vaultkeep_types::{ErrorKind, Timestamp, TxRef, VaultAddress};

use crate::cycle::{CycleOutcome, CycleReport};

/// Counters updated by the scheduler and read by the control socket.
#[derive(Debug)]
pub struct Health {
    started_at: Timestamp,
    ticks: AtomicU64,
    last_tick_at: AtomicU64,
    cycles: AtomicU64,
    compounded: AtomicU64,
    degraded: AtomicU64,
    failed: AtomicU64,
    attempts: AtomicU64,
    feed_failures: AtomicU64,
    aborted: AtomicU64,
    last: Mutex<Option<LastCycle>>,
}

/// The most recent finished cycle.
#[derive(Debug, Clone, Serialize)]
pub struct LastCycle {
    pub vault: VaultAddress,
    pub started_at: Timestamp,
    pub outcome: CycleOutcome,
    pub tx_ref: Option<TxRef>,
}

/// Point-in-time copy of [`Health`].
#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub started_at: Timestamp,
    pub ticks: u64,
    pub last_tick_at: Option<Timestamp>,
    pub cycles: u64,
    pub compounded: u64,
    pub degraded: u64,
    pub failed: u64,
    pub attempts: u64,
    pub feed_failures: u64,
    pub aborted: u64,
    pub last_cycle: Option<LastCycle>,
}

impl Health {
    pub fn new(started_at: Timestamp) -> Self {
        Self {
            started_at,
            ticks: AtomicU64::new(0),
            last_tick_at: AtomicU64::new(0),
            cycles: AtomicU64::new(0),
            compounded: AtomicU64::new(0),
            degraded: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            attempts: AtomicU64::new(0),
            feed_failures: AtomicU64::new(0),
            aborted: AtomicU64::new(0),
            last: Mutex::new(None),
        }
    }

    pub fn record_tick(&self, now: Timestamp) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
        self.last_tick_at.store(now, Ordering::Relaxed);
    }

    pub fn record_aborted(&self) {
        self.aborted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record(&self, report: &CycleReport) {
        self.cycles.fetch_add(1, Ordering::Relaxed);
        self.attempts
            .fetch_add(report.attempts.len() as u64, Ordering::Relaxed);
        self.feed_failures
            .fetch_add(report.failed_feeds.len() as u64, Ordering::Relaxed);
        let counter = match report.outcome {
            CycleOutcome::Compounded => &self.compounded,
            CycleOutcome::Degraded => &self.degraded,
            CycleOutcome::Failed(_) => &self.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);

        if let Ok(mut last) = self.last.lock() {
            *last = Some(LastCycle {
                vault: report.vault.clone(),
                started_at: report.started_at,
                outcome: report.outcome,
                tx_ref: report.tx_ref.clone(),
            });
        }
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        let last_tick_at = self.last_tick_at.load(Ordering::Relaxed);
        HealthSnapshot {
            started_at: self.started_at,
            ticks: self.ticks.load(Ordering::Relaxed),
            last_tick_at: (last_tick_at > 0).then_some(last_tick_at),
            cycles: self.cycles.load(Ordering::Relaxed),
            compounded: self.compounded.load(Ordering::Relaxed),
            degraded: self.degraded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            attempts: self.attempts.load(Ordering::Relaxed),
            feed_failures: self.feed_failures.load(Ordering::Relaxed),
            aborted: self.aborted.load(Ordering::Relaxed),
            last_cycle: self.last.lock().ok().and_then(|l| l.clone()),
        }
    }
}

impl HealthSnapshot {
    /// Failure kind of the last cycle, if it failed.
    pub fn last_error(&self) -> Option<ErrorKind> {
        match self.last_cycle.as_ref()?.outcome {
            CycleOutcome::Failed(kind) => Some(kind),
            _ => None,
        }
    }
}

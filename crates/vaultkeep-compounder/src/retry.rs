//! Retry/Backoff Controller.
//!
//! Runs a submission up to `max_attempts` times. Only retryable error kinds
//! (network error, timeout) are retried; every other kind ends the cycle at
//! once. Attempts for one vault are strictly sequential.

use std::future::Future;

use tokio::time::Instant;
use tracing::{info, warn};
use vaultkeep_chain::ChainError;
use vaultkeep_types::{Backoff, CompoundAttempt, Timestamp, TxRef, VaultAddress};

/// Attempt history and final result of a retried submission.
#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub attempts: Vec<CompoundAttempt>,
    /// The success value, or the last error.
    pub result: Result<T, ChainError>,
}

/// Anything that can report the transaction it produced.
pub trait Landed {
    fn tx_ref(&self) -> &TxRef;
}

impl Landed for vaultkeep_chain::CompoundReceipt {
    fn tx_ref(&self) -> &TxRef {
        &self.tx_ref
    }
}

/// Bounded retry driver.
#[derive(Debug, Clone)]
pub struct RetryController {
    backoff: Backoff,
}

impl RetryController {
    pub fn new(backoff: Backoff) -> Self {
        Self { backoff }
    }

    pub fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    /// Run `op` until it succeeds, fails fatally, or attempts run out.
    ///
    /// `op` receives the 1-based attempt number. Attempt start times are
    /// `started_at` plus the time elapsed since the first attempt.
    pub async fn run<T, F, Fut>(
        &self,
        vault: &VaultAddress,
        started_at: Timestamp,
        mut op: F,
    ) -> RetryOutcome<T>
    where
        T: Landed,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, ChainError>>,
    {
        let clock = Instant::now();
        let mut attempts = Vec::new();
        let mut number = 1;

        loop {
            let mut attempt = CompoundAttempt::pending(
                vault.clone(),
                number,
                started_at + clock.elapsed().as_secs(),
            );

            match op(number).await {
                Ok(value) => {
                    info!(
                        vault = %vault.short(),
                        attempt = number,
                        digest = %value.tx_ref(),
                        "compound succeeded"
                    );
                    attempt.succeed(value.tx_ref().clone());
                    attempts.push(attempt);
                    return RetryOutcome {
                        attempts,
                        result: Ok(value),
                    };
                }
                Err(error) => {
                    let kind = error.kind();
                    attempt.fail(kind);
                    attempts.push(attempt);

                    if !kind.is_retryable() {
                        warn!(vault = %vault.short(), attempt = number, %error, "fatal compound error");
                        return RetryOutcome {
                            attempts,
                            result: Err(error),
                        };
                    }
                    if !self.backoff.allows_retry(number) {
                        warn!(
                            vault = %vault.short(),
                            attempt = number,
                            %error,
                            "compound retries exhausted"
                        );
                        return RetryOutcome {
                            attempts,
                            result: Err(error),
                        };
                    }

                    let delay = self.backoff.delay(number);
                    warn!(
                        vault = %vault.short(),
                        attempt = number,
                        %error,
                        ?delay,
                        "compound attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    number += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;
    use vaultkeep_types::{AttemptOutcome, ErrorKind};

    struct Done(TxRef);

    impl Landed for Done {
        fn tx_ref(&self) -> &TxRef {
            &self.0
        }
    }

    fn vault() -> VaultAddress {
        VaultAddress::parse("0x5").expect("vault")
    }

    fn controller(max: u32) -> RetryController {
        RetryController::new(Backoff::new(
            max,
            Duration::from_millis(500),
            Duration::from_secs(30),
        ))
    }

    async fn drive(
        ctl: &RetryController,
        script: Vec<Result<&'static str, ChainError>>,
    ) -> (RetryOutcome<Done>, usize) {
        let script = Mutex::new(VecDeque::from(script));
        let calls = Mutex::new(0usize);
        let outcome = ctl
            .run(&vault(), 100, |_| {
                if let Ok(mut c) = calls.lock() {
                    *c += 1;
                }
                let next = script
                    .lock()
                    .ok()
                    .and_then(|mut s| s.pop_front())
                    .unwrap_or(Err(ChainError::Timeout));
                async move { next.map(|d| Done(TxRef(d.to_string()))) }
            })
            .await;
        let n = calls.lock().map(|c| *c).unwrap_or_default();
        (outcome, n)
    }

    #[tokio::test(start_paused = true)]
    async fn test_two_network_errors_then_success() {
        let (outcome, calls) = drive(
            &controller(3),
            vec![
                Err(ChainError::Network("a".into())),
                Err(ChainError::Network("b".into())),
                Ok("D"),
            ],
        )
        .await;

        assert_eq!(calls, 3);
        assert_eq!(outcome.attempts.len(), 3);
        assert_eq!(outcome.result.map(|d| d.0), Ok(TxRef("D".into())));
        assert_eq!(outcome.attempts[0].outcome, AttemptOutcome::RetryableFailure);
        assert_eq!(outcome.attempts[2].outcome, AttemptOutcome::Success);
        let numbers: Vec<u32> = outcome.attempts.iter().map(|a| a.attempt).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_error_stops_immediately() {
        let (outcome, calls) = drive(
            &controller(3),
            vec![Err(ChainError::ContractRejected("abort".into())), Ok("D")],
        )
        .await;

        assert_eq!(calls, 1);
        assert_eq!(outcome.attempts.len(), 1);
        assert_eq!(outcome.attempts[0].outcome, AttemptOutcome::FatalFailure);
        assert_eq!(
            outcome.result.map(|d| d.0).map_err(|e| e.kind()),
            Err(ErrorKind::ContractRejected)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_carries_last_error() {
        let (outcome, calls) = drive(
            &controller(3),
            vec![
                Err(ChainError::Network("a".into())),
                Err(ChainError::Network("b".into())),
                Err(ChainError::Timeout),
                Ok("never"),
            ],
        )
        .await;

        assert_eq!(calls, 3);
        assert_eq!(outcome.result.map(|d| d.0), Err(ChainError::Timeout));
        assert!(outcome
            .attempts
            .iter()
            .all(|a| a.outcome == AttemptOutcome::RetryableFailure));
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_waits_between_attempts() {
        let started = Instant::now();
        let (outcome, _) = drive(
            &controller(2),
            vec![Err(ChainError::Network("a".into())), Ok("D")],
        )
        .await;
        assert!(outcome.result.is_ok());

        // First retry waits between half and all of the 500 ms base.
        let waited = started.elapsed();
        assert!(waited >= Duration::from_millis(250));
        assert!(waited <= Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_attempt_policy() {
        let (outcome, calls) = drive(&controller(1), vec![Err(ChainError::Timeout)]).await;
        assert_eq!(calls, 1);
        assert!(outcome.result.is_err());
    }
}

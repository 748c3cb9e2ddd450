//! Parallel Op Broker
//!
//! Issues one asynchronous RPC per participant and waits for all of them:
//! - Every participant runs on its own task, bounded by a process-wide pool
//! - Each call carries its own `RetryState` with linear backoff
//! - Results land in an `OperationStatusTable` plus per-participant slots
//! - The caller polls a shared completion signal and gives up after a run
//!   of idle polls
//!
//! Fan-out state is shared with the tasks. Once the caller stops waiting it
//! seals that state, so calls finishing afterwards are dropped harmlessly.

use crate::rpc::RpcError;
use parking_lot::Mutex;
use rsfs_core::{OperationStatusTable, STATUS_FAILED, STATUS_SUCCESS};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, Semaphore};
use tokio::time::timeout;
use tracing::{debug, warn};

/// Per-call retry configuration
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Extra attempts after the first failure
    pub retry_times: u32,
    /// Backoff base; the n-th retry waits `retry_period * n`
    pub retry_period: Duration,
    /// Deadline for a single attempt
    pub call_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retry_times: 3,
            retry_period: Duration::from_secs(1),
            call_timeout: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry(Duration),
    GiveUp,
}

/// Retry state machine for one participant
#[derive(Debug, Clone)]
pub struct RetryState {
    attempts_left: u32,
    attempts_made: u32,
    base: Duration,
}

impl RetryState {
    pub fn new(policy: &RetryPolicy) -> Self {
        Self {
            attempts_left: policy.retry_times,
            attempts_made: 0,
            base: policy.retry_period,
        }
    }

    /// Decide what to do after a failed attempt
    pub fn on_failure(&mut self, err: &RpcError) -> RetryDecision {
        self.attempts_made += 1;
        if !err.is_retryable() || self.attempts_left == 0 {
            return RetryDecision::GiveUp;
        }
        self.attempts_left -= 1;
        RetryDecision::Retry(self.base * self.attempts_made)
    }

    pub fn attempts_made(&self) -> u32 {
        self.attempts_made
    }

    pub fn attempts_left(&self) -> u32 {
        self.attempts_left
    }
}

/// Collective result of one fan-out
#[derive(Debug)]
pub struct FanOutOutcome<T> {
    pub status: Arc<OperationStatusTable>,
    results: Vec<Option<std::result::Result<T, RpcError>>>,
    /// The wait budget ran out before every participant reported
    pub timed_out: bool,
}

impl<T> FanOutOutcome<T> {
    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn all_succeeded(&self) -> bool {
        self.status.count_equal(STATUS_SUCCESS) == self.results.len()
    }

    pub fn succeeded_count(&self) -> usize {
        self.status.count_equal(STATUS_SUCCESS)
    }

    /// Participants that failed or never reported
    pub fn failed_count(&self) -> usize {
        self.results.len() - self.succeeded_count()
    }

    pub fn failed_indices(&self) -> Vec<usize> {
        (0..self.results.len())
            .filter(|&i| !self.status.is_set_to(i, STATUS_SUCCESS))
            .collect()
    }

    /// Take the value produced by participant `index`
    pub fn take(&mut self, index: usize) -> Option<T> {
        match self.results.get_mut(index)?.take()? {
            Ok(value) => Some(value),
            Err(err) => {
                self.results[index] = Some(Err(err));
                None
            }
        }
    }

    pub fn error(&self, index: usize) -> Option<&RpcError> {
        match self.results.get(index)? {
            Some(Err(err)) => Some(err),
            _ => None,
        }
    }

    /// First recorded error, or a description of the missing reports
    pub fn first_error(&self) -> Option<String> {
        if let Some(err) = (0..self.results.len()).find_map(|i| self.error(i)) {
            return Some(err.to_string());
        }
        if self.timed_out {
            return Some(format!(
                "{} of {} participants did not report before the wait budget ran out",
                self.status.count_unset(),
                self.results.len()
            ));
        }
        None
    }
}

struct FanOutState<T> {
    table: Arc<OperationStatusTable>,
    slots: Mutex<Slots<T>>,
    notify: Notify,
}

struct Slots<T> {
    sealed: bool,
    results: Vec<Option<std::result::Result<T, RpcError>>>,
}

impl<T> FanOutState<T> {
    fn new(len: usize) -> Self {
        Self {
            table: Arc::new(OperationStatusTable::with_len(len)),
            slots: Mutex::new(Slots {
                sealed: false,
                results: (0..len).map(|_| None).collect(),
            }),
            notify: Notify::new(),
        }
    }

    fn complete(&self, index: usize, result: std::result::Result<T, RpcError>) {
        let mut slots = self.slots.lock();
        if slots.sealed {
            debug!(index, ok = result.is_ok(), "Late completion after fan-out was abandoned");
            return;
        }
        let status = if result.is_ok() {
            STATUS_SUCCESS
        } else {
            STATUS_FAILED
        };
        slots.results[index] = Some(result);
        self.table.set(index, status);
        drop(slots);
        self.notify.notify_one();
    }

    fn seal(&self) -> Vec<Option<std::result::Result<T, RpcError>>> {
        let mut slots = self.slots.lock();
        slots.sealed = true;
        std::mem::take(&mut slots.results)
    }
}

/// Fan-out/fan-in driver shared by every session of a client
#[derive(Debug)]
pub struct ParallelOpBroker {
    pool: Arc<Semaphore>,
    poll_interval: Duration,
    max_idle_polls: u32,
}

impl ParallelOpBroker {
    pub fn new(max_threads: usize, poll_interval: Duration, max_idle_polls: u32) -> Self {
        Self {
            pool: Arc::new(Semaphore::new(max_threads.max(1))),
            poll_interval,
            max_idle_polls,
        }
    }

    /// Run `op` once per participant and wait for the collective outcome
    pub async fn run<P, T, F, Fut>(
        &self,
        participants: Vec<P>,
        policy: RetryPolicy,
        op: F,
    ) -> FanOutOutcome<T>
    where
        P: Clone + Send + 'static,
        T: Send + 'static,
        F: Fn(P) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<T, RpcError>> + Send + 'static,
    {
        let total = participants.len();
        let state = Arc::new(FanOutState::new(total));

        for (index, participant) in participants.into_iter().enumerate() {
            let state = Arc::clone(&state);
            let pool = Arc::clone(&self.pool);
            let op = op.clone();

            tokio::spawn(async move {
                let _permit = match pool.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        state.complete(index, Err(RpcError::Other("worker pool closed".into())));
                        return;
                    }
                };
                let result = call_with_retry(index, participant, &policy, &op).await;
                state.complete(index, result);
            });
        }

        let mut idle_polls = 0;
        let mut timed_out = false;
        loop {
            let notified = state.notify.notified();
            if state.table.count_set() >= total {
                break;
            }
            match timeout(self.poll_interval, notified).await {
                Ok(()) => idle_polls = 0,
                Err(_) => {
                    idle_polls += 1;
                    debug!(idle_polls, pending = state.table.count_unset(), "Waiting on fan-out");
                    if idle_polls >= self.max_idle_polls {
                        timed_out = true;
                        warn!(
                            pending = state.table.count_unset(),
                            total, "Fan-out wait budget exhausted"
                        );
                        break;
                    }
                }
            }
        }

        let results = state.seal();
        FanOutOutcome {
            status: Arc::clone(&state.table),
            results,
            timed_out,
        }
    }
}

async fn call_with_retry<P, T, F, Fut>(
    index: usize,
    participant: P,
    policy: &RetryPolicy,
    op: &F,
) -> std::result::Result<T, RpcError>
where
    P: Clone,
    F: Fn(P) -> Fut,
    Fut: Future<Output = std::result::Result<T, RpcError>>,
{
    let mut retry = RetryState::new(policy);
    loop {
        let attempt = timeout(policy.call_timeout, op(participant.clone()))
            .await
            .unwrap_or(Err(RpcError::Timeout(policy.call_timeout)));

        let err = match attempt {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };
        match retry.on_failure(&err) {
            RetryDecision::Retry(wait) => {
                warn!(
                    index,
                    attempt = retry.attempts_made(),
                    wait_ms = wait.as_millis() as u64,
                    error = %err,
                    "RPC failed, retrying"
                );
                tokio::time::sleep(wait).await;
            }
            RetryDecision::GiveUp => {
                warn!(index, attempts = retry.attempts_made(), error = %err, "RPC failed");
                return Err(err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::ChannelErrorKind;
    use rsfs_core::StatusCode;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            retry_times: 3,
            retry_period: Duration::from_millis(1),
            call_timeout: Duration::from_secs(5),
        }
    }

    fn broker() -> ParallelOpBroker {
        ParallelOpBroker::new(4, Duration::from_millis(20), 10)
    }

    #[test]
    fn test_retry_state_linear_backoff() {
        let policy = RetryPolicy {
            retry_times: 3,
            retry_period: Duration::from_millis(100),
            call_timeout: Duration::from_secs(1),
        };
        let mut state = RetryState::new(&policy);
        let err = RpcError::channel(ChannelErrorKind::ConnectionClosed, "reset");

        assert_eq!(state.on_failure(&err), RetryDecision::Retry(Duration::from_millis(100)));
        assert_eq!(state.on_failure(&err), RetryDecision::Retry(Duration::from_millis(200)));
        assert_eq!(state.on_failure(&err), RetryDecision::Retry(Duration::from_millis(300)));
        assert_eq!(state.on_failure(&err), RetryDecision::GiveUp);
        assert_eq!(state.attempts_left(), 0);
    }

    #[test]
    fn test_retry_state_permanent_error() {
        let mut state = RetryState::new(&fast_policy());
        let decision = state.on_failure(&RpcError::Status(StatusCode::IoError));
        assert_eq!(decision, RetryDecision::GiveUp);
        assert_eq!(state.attempts_left(), 3);
    }

    #[tokio::test]
    async fn test_all_participants_succeed() {
        let mut outcome = broker()
            .run((0..14).collect::<Vec<usize>>(), fast_policy(), |i| async move {
                Ok::<_, RpcError>(i * 2)
            })
            .await;

        assert!(outcome.all_succeeded());
        assert!(!outcome.timed_out);
        assert_eq!(outcome.take(7), Some(14));
    }

    #[tokio::test]
    async fn test_partial_failure_is_reported() {
        let mut outcome = broker()
            .run(vec![0usize, 1, 2, 3], fast_policy(), |i| async move {
                if i % 2 == 1 {
                    Err(RpcError::Status(StatusCode::IoError))
                } else {
                    Ok(i)
                }
            })
            .await;

        assert!(!outcome.all_succeeded());
        assert_eq!(outcome.failed_count(), 2);
        assert_eq!(outcome.failed_indices(), vec![1, 3]);
        assert!(outcome.error(1).is_some());
        assert_eq!(outcome.take(1), None);
        assert!(outcome.error(1).is_some());
        assert!(outcome.first_error().unwrap().contains("kIOError"));
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);
        let outcome = broker()
            .run(vec![()], fast_policy(), move |_| {
                let counter = Arc::clone(&counter);
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(RpcError::channel(ChannelErrorKind::ServerUnavailable, "down"))
                    } else {
                        Ok(())
                    }
                }
            })
            .await;

        assert!(outcome.all_succeeded());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);
        let outcome = broker()
            .run(vec![()], fast_policy(), move |_| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(RpcError::channel(ChannelErrorKind::ConnectionClosed, "closed"))
                }
            })
            .await;

        assert_eq!(outcome.failed_count(), 1);
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_wait_budget_and_late_completion() {
        let broker = ParallelOpBroker::new(4, Duration::from_millis(10), 3);
        let release = Arc::new(Notify::new());
        let gate = Arc::clone(&release);
        let outcome = broker
            .run(vec![0usize, 1], fast_policy(), move |i| {
                let gate = Arc::clone(&gate);
                async move {
                    if i == 1 {
                        gate.notified().await;
                    }
                    Ok::<_, RpcError>(i)
                }
            })
            .await;

        assert!(outcome.timed_out);
        assert_eq!(outcome.failed_indices(), vec![1]);
        assert!(outcome.first_error().unwrap().contains("did not report"));

        // The straggler finishes after the caller gave up
        release.notify_one();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!outcome.status.is_set(1));
    }

    #[tokio::test]
    async fn test_empty_fan_out() {
        let outcome = broker()
            .run(Vec::<usize>::new(), fast_policy(), |i| async move {
                Ok::<_, RpcError>(i)
            })
            .await;
        assert!(outcome.all_succeeded());
        assert!(outcome.is_empty());
    }
}

//! Convergence polling
//!
//! Allocation is asynchronous on the control plane, so a successful mutation
//! says nothing about traffic readiness. [`await_convergence`] drives a two
//! state machine (`Pending` -> `Initialized`) off repeated listener reads;
//! running out of time is the only failure besides a remote error.

use crate::clock::Clock;
use crate::error::{CloudError, Result};
use crate::model::{BackendRecord, Listener, ListenerRef, Member};
use crate::provider::{LoadBalancerApi, StatusTable};
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use ulbflow_config::ReconcileSettings;

/// Timing of a convergence wait
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollConfig {
    pub timeout: Duration,
    /// Wait before the first check
    pub initial_delay: Duration,
    pub poll_interval: Duration,
    /// Floor applied to `poll_interval`
    pub min_interval: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(600),
            initial_delay: Duration::from_secs(5),
            poll_interval: Duration::from_secs(5),
            min_interval: Duration::from_secs(3),
        }
    }
}

impl From<&ReconcileSettings> for PollConfig {
    fn from(settings: &ReconcileSettings) -> Self {
        Self {
            timeout: settings.timeout(),
            initial_delay: settings.initial_delay(),
            poll_interval: settings.poll_interval(),
            min_interval: settings.min_interval(),
        }
    }
}

impl PollConfig {
    /// Sleep between two checks
    pub fn wait_between(&self) -> Duration {
        self.poll_interval.max(self.min_interval)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollState {
    /// Attachment keys (`id:port`) not yet running
    Pending { waiting: Vec<String> },
    Initialized,
}

/// One tick of the state machine: is every expected member running?
pub fn evaluate(listener: &Listener, expected: &[Member], statuses: &StatusTable) -> PollState {
    let observed: HashMap<String, String> = listener
        .backend_set
        .iter()
        .map(|b| (b.attachment_key(), statuses.transform(&b.status)))
        .collect();

    let waiting: Vec<String> = expected
        .iter()
        .map(Member::attachment_key)
        .filter(|key| {
            observed
                .get(key)
                .is_none_or(|status| status != crate::provider::NORMAL_RUNNING)
        })
        .collect();

    if waiting.is_empty() {
        PollState::Initialized
    } else {
        PollState::Pending { waiting }
    }
}

/// Block until every expected member is attached and `normalRunning`.
///
/// Returns the listener's backend set at the moment of convergence.
pub async fn await_convergence<A, C>(
    api: &A,
    clock: &C,
    listener: &ListenerRef,
    expected: &[Member],
    config: &PollConfig,
) -> Result<Vec<BackendRecord>>
where
    A: LoadBalancerApi + ?Sized,
    C: Clock + ?Sized,
{
    let statuses = api.status_table();
    let start = clock.now();

    if !config.initial_delay.is_zero() {
        clock.sleep(config.initial_delay).await;
    }

    let mut polls = 0u32;
    loop {
        polls += 1;
        let current = api
            .describe_listener(listener)
            .await
            .map_err(|e| CloudError::remote("DescribeVServer", listener.to_string(), e))?;

        let waiting = match evaluate(&current, expected, &statuses) {
            PollState::Initialized => {
                tracing::info!(
                    "{} backend(s) on {} running after {} poll(s)",
                    expected.len(),
                    listener,
                    polls
                );
                return Ok(current.backend_set);
            }
            PollState::Pending { waiting } => waiting,
        };

        let elapsed = clock.now().saturating_duration_since(start);
        if elapsed >= config.timeout {
            tracing::warn!(
                "Gave up waiting on {} after {:?}; remote changes already made stay in place",
                listener,
                elapsed
            );
            return Err(CloudError::Timeout {
                operation: format!("backends of {} to reach normalRunning", listener),
                elapsed,
                pending: waiting,
            });
        }

        tracing::debug!(
            "Poll {} on {}: {} backend(s) pending",
            polls,
            listener,
            waiting.len()
        );
        clock
            .sleep(config.wait_between().min(config.timeout - elapsed))
            .await;
    }
}

/// Outcome of one attempt inside [`retry`]
#[derive(Debug)]
pub enum RetryError {
    /// Condition not met yet; try again after the interval
    Retryable(CloudError),
    /// Stop immediately with this error
    NonRetryable(CloudError),
}

/// Re-run `attempt` until it succeeds, fails hard, or `timeout` elapses
pub async fn retry<C, F, Fut, T>(
    clock: &C,
    operation: &str,
    timeout: Duration,
    interval: Duration,
    mut attempt: F,
) -> Result<T>
where
    C: Clock + ?Sized,
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, RetryError>>,
{
    let start = clock.now();
    loop {
        let last = match attempt().await {
            Ok(value) => return Ok(value),
            Err(RetryError::NonRetryable(e)) => return Err(e),
            Err(RetryError::Retryable(e)) => e,
        };

        let elapsed = clock.now().saturating_duration_since(start);
        if elapsed >= timeout {
            return Err(CloudError::Timeout {
                operation: operation.to_string(),
                elapsed,
                pending: vec![last.to_string()],
            });
        }

        tracing::debug!("{}: {}, retrying", operation, last);
        clock.sleep(interval.min(timeout - elapsed)).await;
    }
}

//! Bounded polling of asynchronous provider operations.
//!
//! The [`StatusPoller`] repeatedly invokes a status probe until the resource
//! reaches a target status, reaches a failure status, the deadline passes,
//! or the caller cancels. Transient probe errors, authoritative failure
//! statuses and timeouts are reported as three distinct outcomes.

use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::PollingConfig;
use crate::error::{ClientError, WaitError};
use crate::resource::{PendingOperation, RemoteState, StatusTag, WaitSpec};

use super::backoff::Backoff;

/// Timing and tolerance settings for one wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitConfig {
    /// Base delay between probes.
    pub poll_interval: Duration,
    /// Overall deadline measured from the start of the wait.
    pub timeout: Duration,
    /// Delay growth between probes.
    pub backoff: Backoff,
    /// Cap on the delay between probes.
    pub max_interval: Duration,
    /// Delay before the first probe.
    pub initial_delay: Duration,
    /// Consecutive not-found probes tolerated while awaiting a non-deletion target.
    pub not_found_checks: u32,
    /// Consecutive target observations required before success.
    pub stable_observations: u32,
}

/// Result of a single status probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Probe {
    /// Observed status.
    pub status: StatusTag,
    /// Observed remote state, when the resource exists.
    pub state: Option<RemoteState>,
    /// Provider diagnostic for the status.
    pub diagnostic: Option<String>,
}

/// Successful end of a wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitOutcome {
    /// Target status reached.
    pub status: StatusTag,
    /// Remote state observed by the final probe.
    pub state: Option<RemoteState>,
    /// Number of probes issued.
    pub probes: u32,
    /// Number of sleeps between probes.
    pub sleeps: u32,
    /// Number of transient probe errors absorbed.
    pub transient_errors: u32,
    /// Time spent waiting.
    pub elapsed: Duration,
}

/// Polls a status probe until a pending operation settles.
#[derive(Debug, Clone)]
pub struct StatusPoller {
    config: WaitConfig,
    cancel: CancellationToken,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            timeout: Duration::from_secs(30 * 60),
            backoff: Backoff::Fixed,
            max_interval: Duration::from_secs(60),
            initial_delay: Duration::ZERO,
            not_found_checks: 20,
            stable_observations: 1,
        }
    }
}

impl WaitConfig {
    /// Builds wait settings from the polling section of the configuration.
    #[must_use]
    pub const fn from_polling(polling: &PollingConfig) -> Self {
        Self {
            poll_interval: Duration::from_secs(polling.interval_secs),
            timeout: Duration::from_secs(polling.timeout_secs),
            backoff: polling.backoff,
            max_interval: Duration::from_secs(polling.max_interval_secs),
            initial_delay: Duration::from_secs(polling.initial_delay_secs),
            not_found_checks: polling.not_found_checks,
            stable_observations: polling.stable_observations,
        }
    }

    /// Applies the stage-specific overrides of a resource type.
    #[must_use]
    pub fn for_spec(&self, spec: &WaitSpec) -> Self {
        let mut config = self.clone();
        if let Some(timeout) = spec.timeout {
            config.timeout = timeout;
        }
        if let Some(interval) = spec.poll_interval {
            config.poll_interval = interval;
            config.max_interval = config.max_interval.max(interval);
        }
        config
    }

    /// Sets the poll interval.
    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets the timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the backoff.
    #[must_use]
    pub const fn with_backoff(mut self, backoff: Backoff, max_interval: Duration) -> Self {
        self.backoff = backoff;
        self.max_interval = max_interval;
        self
    }

    /// Sets the delay before the first probe.
    #[must_use]
    pub const fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the not-found tolerance.
    #[must_use]
    pub const fn with_not_found_checks(mut self, checks: u32) -> Self {
        self.not_found_checks = checks;
        self
    }

    /// Sets the number of consecutive target observations required.
    #[must_use]
    pub const fn with_stable_observations(mut self, observations: u32) -> Self {
        self.stable_observations = observations;
        self
    }
}

impl Probe {
    /// A probe that observed the given status with no payload.
    #[must_use]
    pub const fn status(status: StatusTag) -> Self {
        Self {
            status,
            state: None,
            diagnostic: None,
        }
    }

    /// A probe that observed no resource.
    #[must_use]
    pub const fn not_found() -> Self {
        Self::status(StatusTag::NotFound)
    }
}

/// Mutable bookkeeping for one wait.
#[derive(Debug, Default)]
struct Progress {
    probes: u32,
    sleeps: u32,
    transient_errors: u32,
    last_status: Option<StatusTag>,
    last_error: Option<ClientError>,
    not_found_streak: u32,
    target_streak: u32,
}

impl StatusPoller {
    /// Creates a poller.
    #[must_use]
    pub fn new(config: WaitConfig) -> Self {
        Self {
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Uses the given token for cooperative cancellation.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Returns the wait settings.
    #[must_use]
    pub const fn config(&self) -> &WaitConfig {
        &self.config
    }

    /// Polls until the pending operation reaches a target or failure status.
    ///
    /// The probe is never run past the deadline, so the wait returns within
    /// `timeout + poll_interval` even when the provider hangs.
    ///
    /// # Errors
    ///
    /// Returns [`WaitError::FailureStatus`] on an authoritative failure,
    /// [`WaitError::TimedOut`] when the deadline passes,
    /// [`WaitError::ProbeFailed`] on a non-retryable probe error,
    /// [`WaitError::NotFoundExhausted`] when the resource stays invisible,
    /// and [`WaitError::Cancelled`] on cancellation.
    pub async fn wait<F, Fut>(
        &self,
        pending: &PendingOperation,
        mut probe: F,
    ) -> std::result::Result<WaitOutcome, WaitError>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = std::result::Result<Probe, ClientError>> + Send,
    {
        let id = pending.id();
        let start = Instant::now();
        let deadline = start + self.config.timeout;
        let mut progress = Progress::default();

        debug!(
            "Waiting up to {:?} for {} of {id}",
            self.config.timeout,
            pending.kind()
        );

        if !self.config.initial_delay.is_zero() {
            let wake = (start + self.config.initial_delay).min(deadline);
            self.sleep_until(wake, pending, &progress).await?;
        }

        loop {
            if self.cancel.is_cancelled() {
                return Err(Self::cancelled(pending, &progress));
            }

            progress.probes += 1;
            let result = tokio::select! {
                () = self.cancel.cancelled() => return Err(Self::cancelled(pending, &progress)),
                result = tokio::time::timeout_at(deadline, probe()) => result,
            };

            match result {
                Err(_) => {
                    warn!("Status probe for {id} did not answer before the deadline");
                    return Err(Self::timed_out(pending, progress, start));
                }
                Ok(Err(e)) if e.is_transient() => {
                    progress.transient_errors += 1;
                    warn!("Transient error probing {id}: {e}");
                    progress.last_error = Some(e);
                }
                Ok(Err(e)) if e.is_not_found() => {
                    if let Some(outcome) = self.observe(pending, Probe::not_found(), &mut progress, start)? {
                        return Ok(outcome);
                    }
                }
                Ok(Err(e)) => {
                    return Err(WaitError::ProbeFailed {
                        id: id.clone(),
                        source: e,
                    });
                }
                Ok(Ok(observed)) => {
                    if let Some(outcome) = self.observe(pending, observed, &mut progress, start)? {
                        return Ok(outcome);
                    }
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(Self::timed_out(pending, progress, start));
            }

            let delay = self.config.backoff.delay(
                self.config.poll_interval,
                progress.sleeps,
                self.config.max_interval,
            );
            progress.sleeps += 1;
            self.sleep_until((now + delay).min(deadline), pending, &progress)
                .await?;
        }
    }

    /// Folds one observation; returns the outcome when the wait is over.
    fn observe(
        &self,
        pending: &PendingOperation,
        observed: Probe,
        progress: &mut Progress,
        start: Instant,
    ) -> std::result::Result<Option<WaitOutcome>, WaitError> {
        let id = pending.id();
        debug!("Probe {} of {id}: {}", progress.probes, observed.status);
        progress.last_status = Some(observed.status.clone());

        if pending.is_target(&observed.status) {
            progress.target_streak += 1;
            if progress.target_streak >= self.config.stable_observations.max(1) {
                return Ok(Some(WaitOutcome {
                    status: observed.status,
                    state: observed.state,
                    probes: progress.probes,
                    sleeps: progress.sleeps,
                    transient_errors: progress.transient_errors,
                    elapsed: start.elapsed(),
                }));
            }
            return Ok(None);
        }
        progress.target_streak = 0;

        if pending.is_failure(&observed.status) {
            return Err(WaitError::FailureStatus {
                id: id.clone(),
                status: observed.status,
                diagnostic: observed.diagnostic,
            });
        }

        if observed.status == StatusTag::NotFound {
            progress.not_found_streak += 1;
            if progress.not_found_streak >= self.config.not_found_checks.max(1) {
                return Err(WaitError::NotFoundExhausted {
                    id: id.clone(),
                    checks: progress.not_found_streak,
                });
            }
        } else {
            progress.not_found_streak = 0;
        }

        Ok(None)
    }

    async fn sleep_until(
        &self,
        wake: Instant,
        pending: &PendingOperation,
        progress: &Progress,
    ) -> std::result::Result<(), WaitError> {
        tokio::select! {
            () = self.cancel.cancelled() => Err(Self::cancelled(pending, progress)),
            () = tokio::time::sleep_until(wake) => Ok(()),
        }
    }

    fn cancelled(pending: &PendingOperation, progress: &Progress) -> WaitError {
        WaitError::Cancelled {
            id: pending.id().clone(),
            last_status: progress.last_status.clone(),
        }
    }

    fn timed_out(pending: &PendingOperation, progress: Progress, start: Instant) -> WaitError {
        WaitError::TimedOut {
            id: pending.id().clone(),
            last_status: progress.last_status,
            last_error: progress.last_error,
            elapsed: start.elapsed(),
        }
    }
}

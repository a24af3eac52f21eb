//! Retry policy for mutating provider calls.

use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::client::{Attributes, Operation, RemoteClient};
use crate::config::RetryConfig;
use crate::error::{ClientError, ReconcileError, Result};
use crate::wait::Backoff;

/// How mutating calls are retried.
///
/// `Conflict` is retried up to a fixed number of attempts. `Throttled` and
/// `Transient` are retried until the mutation deadline, each kind of retry
/// backing off on its own counter. A provider `Retry-After` is honoured up
/// to `max_delay` and the time left before the deadline. Everything else
/// surfaces immediately.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts allowed while the provider keeps reporting conflicts.
    pub conflict_max_attempts: u32,
    /// First retry delay.
    pub base_delay: Duration,
    /// Cap on the retry delay.
    pub max_delay: Duration,
    /// Overall budget for retrying one call.
    pub deadline: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    /// Builds the policy from the retry section of the configuration.
    #[must_use]
    pub const fn from_config(config: &RetryConfig) -> Self {
        Self {
            conflict_max_attempts: config.conflict_max_attempts,
            base_delay: config.base_delay(),
            max_delay: config.max_delay(),
            deadline: config.mutation_deadline(),
        }
    }

    /// Delay before retry number `attempt` (zero-based).
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        Backoff::Exponential.delay(self.base_delay, attempt, self.max_delay)
    }

    /// Invokes a mutating call, retrying according to the policy.
    ///
    /// # Errors
    ///
    /// Returns the classified client error when it is not retryable,
    /// [`ReconcileError::MaxRetriesExceeded`] when retries run out, and
    /// [`ReconcileError::Aborted`] on cancellation.
    pub async fn invoke(
        &self,
        client: &dyn RemoteClient,
        operation: &Operation,
        request: &Attributes,
        cancel: &CancellationToken,
    ) -> Result<Attributes> {
        let start = Instant::now();
        let mut attempts: u32 = 0;
        let mut conflicts: u32 = 0;
        let mut backoffs: u32 = 0;

        loop {
            attempts += 1;
            debug!("Invoking {operation} (attempt {attempts})");

            let error = match client.invoke(operation, request.clone()).await {
                Ok(response) => return Ok(response),
                Err(e) => e,
            };

            let remaining = self.deadline.saturating_sub(start.elapsed());
            let delay = match &error {
                ClientError::Conflict { .. } => {
                    conflicts += 1;
                    if conflicts >= self.conflict_max_attempts.max(1) {
                        return Err(Self::exhausted(attempts, operation, error));
                    }
                    self.delay(conflicts - 1)
                }
                ClientError::Throttled {
                    retry_after_secs: Some(secs),
                    ..
                } => {
                    backoffs += 1;
                    Duration::from_secs(*secs).min(self.max_delay).min(remaining)
                }
                ClientError::Throttled { .. } | ClientError::Transient { .. } => {
                    backoffs += 1;
                    self.delay(backoffs - 1)
                }
                _ => return Err(error.into()),
            };

            if remaining.is_zero() || delay > remaining {
                return Err(Self::exhausted(attempts, operation, error));
            }

            warn!("{error}; retrying in {delay:?}");
            tokio::select! {
                () = cancel.cancelled() => {
                    return Err(ReconcileError::Aborted {
                        reason: format!("{operation} cancelled while retrying"),
                    }
                    .into());
                }
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    fn exhausted(attempts: u32, operation: &Operation, source: ClientError) -> crate::error::ConvergeError {
        ReconcileError::MaxRetriesExceeded {
            attempts,
            operation: operation.name.clone(),
            source,
        }
        .into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::scripted::ScriptedClient;
    use crate::client::{MockRemoteClient, OperationKind};
    use crate::error::ConvergeError;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            conflict_max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            deadline: Duration::from_secs(30),
        }
    }

    fn update() -> Operation {
        Operation::new(OperationKind::Update, "UpdateTable")
    }

    fn conflict() -> ClientError {
        ClientError::Conflict {
            operation: String::from("UpdateTable"),
            message: String::from("resource in use"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_conflict_retries_are_capped() {
        let client = ScriptedClient::new();
        client.on("UpdateTable", Err(conflict()));

        let err = policy()
            .invoke(&client, &update(), &Attributes::new(), &CancellationToken::new())
            .await
            .expect_err("conflict never clears");

        assert!(matches!(
            err,
            ConvergeError::Reconcile(ReconcileError::MaxRetriesExceeded { attempts: 3, .. })
        ));
        assert_eq!(client.count("UpdateTable"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_conflict_then_success() {
        let client = ScriptedClient::new();
        client.on("UpdateTable", Err(conflict()));
        client.ok("UpdateTable", &[]);

        let response = policy()
            .invoke(&client, &update(), &Attributes::new(), &CancellationToken::new())
            .await;

        assert!(response.is_ok());
        assert_eq!(client.count("UpdateTable"), 2);
    }

    fn throttled(retry_after_secs: u64) -> ClientError {
        ClientError::Throttled {
            operation: String::from("UpdateTable"),
            message: String::from("rate exceeded"),
            retry_after_secs: Some(retry_after_secs),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttle_honours_retry_after() {
        let client = ScriptedClient::new();
        client.on("UpdateTable", Err(throttled(7)));
        client.ok("UpdateTable", &[]);
        let policy = RetryPolicy {
            max_delay: Duration::from_secs(10),
            ..policy()
        };

        let start = Instant::now();
        policy
            .invoke(&client, &update(), &Attributes::new(), &CancellationToken::new())
            .await
            .expect("succeeds after throttle");

        assert_eq!(start.elapsed(), Duration::from_secs(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_is_capped_by_max_delay() {
        let client = ScriptedClient::new();
        client.on("UpdateTable", Err(throttled(3600)));
        client.ok("UpdateTable", &[]);

        let start = Instant::now();
        policy()
            .invoke(&client, &update(), &Attributes::new(), &CancellationToken::new())
            .await
            .expect("succeeds after throttle");

        assert_eq!(start.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_is_capped_by_deadline() {
        let client = ScriptedClient::new();
        client.on("UpdateTable", Err(throttled(60)));
        let policy = RetryPolicy {
            max_delay: Duration::from_secs(120),
            deadline: Duration::from_secs(5),
            ..policy()
        };

        let start = Instant::now();
        let err = policy
            .invoke(&client, &update(), &Attributes::new(), &CancellationToken::new())
            .await
            .expect_err("throttled past the deadline");

        assert!(matches!(
            err,
            ConvergeError::Reconcile(ReconcileError::MaxRetriesExceeded { attempts: 2, .. })
        ));
        assert_eq!(start.elapsed(), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_backoff_ignores_earlier_conflicts() {
        let client = ScriptedClient::new();
        client.on("UpdateTable", Err(conflict()));
        client.on("UpdateTable", Err(conflict()));
        client.on("UpdateTable", Err(ClientError::transient("UpdateTable", "503")));
        client.ok("UpdateTable", &[]);
        let policy = RetryPolicy {
            conflict_max_attempts: 5,
            ..policy()
        };

        let start = Instant::now();
        policy
            .invoke(&client, &update(), &Attributes::new(), &CancellationToken::new())
            .await
            .expect("recovers");

        // 100ms + 200ms for the conflicts, then a fresh 100ms for the 503.
        assert_eq!(start.elapsed(), Duration::from_millis(400));
        assert_eq!(client.count("UpdateTable"), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_stop_at_deadline() {
        let client = ScriptedClient::new();
        client.on("UpdateTable", Err(ClientError::transient("UpdateTable", "503")));
        let policy = RetryPolicy {
            deadline: Duration::from_secs(5),
            ..policy()
        };

        let start = Instant::now();
        let err = policy
            .invoke(&client, &update(), &Attributes::new(), &CancellationToken::new())
            .await
            .expect_err("never recovers");

        assert!(matches!(
            err,
            ConvergeError::Reconcile(ReconcileError::MaxRetriesExceeded { .. })
        ));
        assert!(start.elapsed() <= Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_invalid_input_is_not_retried() {
        let mut client = MockRemoteClient::new();
        client.expect_invoke().times(1).returning(|_, _| {
            Err(ClientError::InvalidInput {
                operation: String::from("UpdateTable"),
                message: String::from("bad capacity"),
            })
        });

        let err = policy()
            .invoke(&client, &update(), &Attributes::new(), &CancellationToken::new())
            .await
            .expect_err("invalid input");

        assert!(matches!(
            err,
            ConvergeError::Client(ClientError::InvalidInput { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_stops_retrying() {
        let client = ScriptedClient::new();
        client.on("UpdateTable", Err(ClientError::transient("UpdateTable", "503")));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = policy()
            .invoke(&client, &update(), &Attributes::new(), &cancel)
            .await
            .expect_err("cancelled");

        assert!(matches!(err, ConvergeError::Reconcile(ReconcileError::Aborted { .. })));
        assert_eq!(client.count("UpdateTable"), 1);
    }
}

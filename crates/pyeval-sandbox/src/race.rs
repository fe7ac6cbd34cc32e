//! Bounding how long a caller waits for one evaluation
//!
//! The evaluator runs on the blocking pool and reports into a oneshot
//! channel. Whichever comes first, the deadline or the report, decides
//! the response. A late report is dropped on the floor: `send` on a
//! closed oneshot returns immediately, so the worker never blocks.
//! Stopping the guest itself is left to the engine's epoch deadline.

use pyeval_core::{EvalError, EvalInput, EvalResult, Evaluate};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::warn;

pub struct TimeoutRace {
    evaluator: Arc<dyn Evaluate>,
    timeout: Duration,
}

impl TimeoutRace {
    pub fn new(evaluator: Arc<dyn Evaluate>, timeout: Duration) -> Self {
        Self { evaluator, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn evaluate(&self, input: EvalInput) -> EvalResult {
        let deadline = Instant::now() + self.timeout;
        let (tx, rx) = oneshot::channel();

        let evaluator = Arc::clone(&self.evaluator);
        tokio::task::spawn_blocking(move || {
            let result = evaluator.evaluate(&input, deadline);
            let _ = tx.send(result);
        });

        tokio::select! {
            biased;

            received = rx => match received {
                Ok(result) => {
                    match &result {
                        Err(EvalError::Timeout) => warn!(
                            timeout_ms = self.timeout.as_millis() as u64,
                            "Python evaluation timed out"
                        ),
                        Err(e) => warn!(kind = %e.kind(), error = %e, "Error processing code"),
                        Ok(_) => {}
                    }
                    result
                }
                Err(_) => {
                    warn!("evaluation task ended without reporting a result");
                    Err(EvalError::Internal(
                        "evaluation task ended without a result".to_string(),
                    ))
                }
            },

            _ = tokio::time::sleep_until(deadline.into()) => {
                warn!(
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Python evaluation timed out"
                );
                Err(EvalError::Timeout)
            }
        }
    }
}

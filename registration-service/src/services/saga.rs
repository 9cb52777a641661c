//! Small generic saga runner.
//!
//! A saga is an ordered list of steps, each pairing a forward action with its
//! compensation. When a step fails, every step that already completed is
//! compensated in reverse order and the original failure is returned. A step
//! that timed out may have taken effect anyway, so it is compensated too.

use async_trait::async_trait;
use std::fmt::Display;
use std::time::Duration;
use thiserror::Error;

/// A forward action on the shared context `C` and its inverse.
#[async_trait]
pub trait SagaStep<C, E>: Send + Sync
where
    C: Send + Sync,
    E: Send,
{
    fn name(&self) -> &'static str;

    async fn execute(&self, ctx: &mut C) -> Result<(), E>;

    /// Undo a completed `execute`. Errors are logged by the runner and
    /// never replace the failure that triggered compensation.
    ///
    /// Also called for a step whose `execute` timed out, in which case `ctx`
    /// may not reflect what the step managed to do.
    async fn compensate(&self, _ctx: &C) -> Result<(), E> {
        Ok(())
    }
}

/// A step or compensation ran past the per-step deadline.
#[derive(Debug, Clone, Copy, Error)]
#[error("step timed out after {0:?}")]
pub struct StepTimedOut(pub Duration);

/// The failed step and its error.
#[derive(Debug)]
pub struct SagaFailure<E> {
    pub step: &'static str,
    pub error: E,
}

pub struct Saga<C, E> {
    name: &'static str,
    steps: Vec<Box<dyn SagaStep<C, E>>>,
    step_timeout: Duration,
}

impl<C, E> Saga<C, E>
where
    C: Send + Sync,
    E: Send + Display + From<StepTimedOut>,
{
    pub fn new(name: &'static str, step_timeout: Duration) -> Self {
        Self {
            name,
            steps: Vec::new(),
            step_timeout,
        }
    }

    pub fn step(mut self, step: impl SagaStep<C, E> + 'static) -> Self {
        self.steps.push(Box::new(step));
        self
    }

    pub fn step_names(&self) -> Vec<&'static str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    /// Run every step in order, compensating on the first failure.
    pub async fn run(&self, ctx: &mut C) -> Result<(), SagaFailure<E>> {
        for (index, step) in self.steps.iter().enumerate() {
            let (outcome, timed_out) =
                match tokio::time::timeout(self.step_timeout, step.execute(ctx)).await {
                    Ok(result) => (result, false),
                    Err(_) => (Err(E::from(StepTimedOut(self.step_timeout))), true),
                };

            match outcome {
                Ok(()) => {
                    tracing::debug!(saga = self.name, step = step.name(), "Saga step completed");
                }
                Err(error) => {
                    tracing::warn!(
                        saga = self.name,
                        step = step.name(),
                        error = %error,
                        timed_out,
                        "Saga step failed, compensating"
                    );
                    let undo_through = if timed_out { index + 1 } else { index };
                    self.compensate(&self.steps[..undo_through], ctx).await;
                    return Err(SagaFailure {
                        step: step.name(),
                        error,
                    });
                }
            }
        }
        Ok(())
    }

    async fn compensate(&self, completed: &[Box<dyn SagaStep<C, E>>], ctx: &C) {
        for step in completed.iter().rev() {
            match tokio::time::timeout(self.step_timeout, step.compensate(ctx)).await {
                Ok(Ok(())) => {
                    tracing::info!(saga = self.name, step = step.name(), "Step compensated");
                }
                Ok(Err(error)) => {
                    tracing::error!(
                        saga = self.name,
                        step = step.name(),
                        error = %error,
                        "Compensation failed"
                    );
                }
                Err(_) => {
                    tracing::error!(
                        saga = self.name,
                        step = step.name(),
                        timeout = ?self.step_timeout,
                        "Compensation timed out, abandoning"
                    );
                }
            }
        }
    }
}

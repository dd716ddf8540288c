//! Timed handler execution on a worker thread.
//!
//! The handler runs on its own named thread while the dispatching thread
//! waits on a channel for at most the execution budget. When the budget
//! expires the context's cancellation flag is raised and the dispatcher
//! reports a timeout. Cancellation is cooperative: a handler that never
//! checks the flag keeps running detached until it returns, and its late
//! result is discarded.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::debug;

use crate::DISPATCH_TARGET;
use crate::envelope::Envelope;
use crate::error::HandlerError;
use crate::handler::Handler;

/// Deadline and cancellation flag handed to a running handler.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    budget: Duration,
    deadline: Instant,
    cancelled: Arc<AtomicBool>,
}

impl ExecutionContext {
    /// Creates a context whose deadline is `budget` from now.
    #[must_use]
    pub fn new(budget: Duration) -> Self {
        let started = Instant::now();
        Self {
            budget,
            deadline: started.checked_add(budget).unwrap_or(started),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Total time granted to the handler.
    #[must_use]
    pub const fn budget(&self) -> Duration {
        self.budget
    }

    /// Instant after which the result will be discarded.
    #[must_use]
    pub const fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Time left before the deadline.
    #[must_use]
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Whether the dispatcher has given up on this invocation.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst) || Instant::now() >= self.deadline
    }

    /// Raises the cancellation flag.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Returns [`HandlerError::Cancelled`] once cancellation was requested.
    ///
    /// # Errors
    ///
    /// Fails when the context is cancelled or past its deadline.
    pub fn checkpoint(&self) -> Result<(), HandlerError> {
        if self.is_cancelled() {
            Err(HandlerError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// What became of one handler invocation.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ExecutionOutcome {
    /// The handler returned a value in time.
    Completed(Value),
    /// The handler returned an error or panicked.
    Failed {
        /// Internal detail for the chronicle.
        detail: String,
    },
    /// The budget elapsed first.
    TimedOut,
}

type WorkerReport = thread::Result<Result<Value, HandlerError>>;

/// Runs `handler` on a worker thread and waits at most `budget`.
pub(crate) fn execute(
    handler: Arc<dyn Handler>,
    envelope: Arc<Envelope>,
    budget: Duration,
    worker_name: String,
) -> ExecutionOutcome {
    let context = ExecutionContext::new(budget);
    let worker_context = context.clone();
    let (sender, receiver) = mpsc::channel::<WorkerReport>();

    let spawned = thread::Builder::new()
        .name(worker_name)
        .spawn(move || {
            let report = panic::catch_unwind(AssertUnwindSafe(|| {
                handler.handle(&envelope, &worker_context)
            }));
            if sender.send(report).is_err() {
                debug!(
                    target: DISPATCH_TARGET,
                    message_id = envelope.message_id(),
                    "handler finished after its caller stopped waiting"
                );
            }
        });

    if let Err(error) = spawned {
        return ExecutionOutcome::Failed {
            detail: format!("failed to spawn handler worker: {error}"),
        };
    }

    match receiver.recv_timeout(budget) {
        Ok(Ok(Ok(value))) => ExecutionOutcome::Completed(value),
        Ok(Ok(Err(error))) => ExecutionOutcome::Failed {
            detail: error.to_string(),
        },
        Ok(Err(payload)) => ExecutionOutcome::Failed {
            detail: format!("handler panicked: {}", panic_message(payload.as_ref())),
        },
        Err(RecvTimeoutError::Timeout) => {
            context.cancel();
            ExecutionOutcome::TimedOut
        }
        Err(RecvTimeoutError::Disconnected) => ExecutionOutcome::Failed {
            detail: "handler worker exited without reporting".to_owned(),
        },
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

#[cfg(test)]
mod tests;

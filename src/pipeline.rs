//! Background submission of race completions
//!
//! The game server hands finished races to a [`SubmissionPipeline`] and moves
//! on. A dispatcher task drains the queue, submits each race to the engine
//! with a bounded number in flight, retries retryable failures with
//! exponential backoff, and publishes every outcome on a broadcast stream.

use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{Semaphore, broadcast, mpsc};
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::RetryPolicy;
use crate::engine::{ProgressionEngine, SubmissionAck};
use crate::store::Store;
use crate::types::{RaceId, RaceResult};
use crate::{ErrorKind, ProgressionError, Result};

/// A finished race as reported by the game server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RaceCompletion {
    pub race: RaceId,
    pub results: Vec<RaceResult>,
}

/// Final outcome of one queued completion.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmissionOutcome {
    Applied { ack: SubmissionAck, attempts: u32 },
    /// Every result in the batch had already been recorded by an earlier attempt.
    AlreadyApplied { race: RaceId, attempts: u32 },
    Rejected { race: RaceId, kind: ErrorKind, reason: String, attempts: u32 },
    Cancelled { race: RaceId },
}

impl SubmissionOutcome {
    pub fn race(&self) -> RaceId {
        match self {
            SubmissionOutcome::Applied { ack, .. } => ack.race,
            SubmissionOutcome::AlreadyApplied { race, .. }
            | SubmissionOutcome::Rejected { race, .. }
            | SubmissionOutcome::Cancelled { race } => *race,
        }
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, SubmissionOutcome::Applied { .. } | SubmissionOutcome::AlreadyApplied { .. })
    }
}

/// Handle to a running submission pipeline.
///
/// Dropping the handle cancels the dispatcher; completions still queued are
/// reported as [`SubmissionOutcome::Cancelled`].
pub struct SubmissionPipeline {
    queue: mpsc::Sender<RaceCompletion>,
    outcomes: broadcast::Sender<SubmissionOutcome>,
    cancel: CancellationToken,
}

impl SubmissionPipeline {
    /// Spawn the dispatcher task for `engine`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn<S: Store>(engine: Arc<ProgressionEngine<S>>) -> Self {
        let settings = engine.config().pipeline;
        let (queue_tx, queue_rx) = mpsc::channel(settings.queue_depth);
        let (outcome_tx, _) = broadcast::channel(settings.queue_depth);
        let cancel = CancellationToken::new();

        let dispatcher = Dispatcher {
            engine,
            outcomes: outcome_tx.clone(),
            permits: Arc::new(Semaphore::new(settings.max_in_flight)),
            retry: settings.retry_policy(),
            cancel: cancel.clone(),
        };
        tokio::spawn(dispatcher.run(queue_rx));

        Self { queue: queue_tx, outcomes: outcome_tx, cancel }
    }

    /// Queue a completion, waiting for room when the queue is full.
    pub async fn submit(&self, completion: RaceCompletion) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(ProgressionError::store_unavailable("submission pipeline is shut down"));
        }
        self.queue
            .send(completion)
            .await
            .map_err(|_| ProgressionError::store_unavailable("submission pipeline is shut down"))
    }

    /// Outcomes published after this call.
    ///
    /// Subscribers that fall more than the queue depth behind skip the
    /// outcomes they missed.
    pub fn outcomes(&self) -> impl Stream<Item = SubmissionOutcome> + Send + 'static {
        BroadcastStream::new(self.outcomes.subscribe()).filter_map(|item| async move { item.ok() })
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop accepting work and stop retrying in-flight submissions.
    pub fn shutdown(&self) {
        info!("Submission pipeline shutdown requested");
        self.cancel.cancel();
    }
}

impl Drop for SubmissionPipeline {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct Dispatcher<S: Store> {
    engine: Arc<ProgressionEngine<S>>,
    outcomes: broadcast::Sender<SubmissionOutcome>,
    permits: Arc<Semaphore>,
    retry: RetryPolicy,
    cancel: CancellationToken,
}

impl<S: Store> Dispatcher<S> {
    async fn run(self, mut queue: mpsc::Receiver<RaceCompletion>) {
        info!("Submission dispatcher started");
        let mut dispatched = 0u64;

        loop {
            let completion = tokio::select! {
                _ = self.cancel.cancelled() => break,
                next = queue.recv() => match next {
                    Some(completion) => completion,
                    None => {
                        debug!("Submission queue closed");
                        break;
                    }
                },
            };

            let permit = tokio::select! {
                _ = self.cancel.cancelled() => {
                    self.publish(SubmissionOutcome::Cancelled { race: completion.race });
                    break;
                }
                permit = Arc::clone(&self.permits).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => {
                        error!("Submission semaphore closed");
                        break;
                    }
                },
            };

            dispatched += 1;
            let engine = Arc::clone(&self.engine);
            let outcomes = self.outcomes.clone();
            let retry = self.retry;
            let cancel = self.cancel.clone();
            tokio::spawn(async move {
                let outcome = submit_with_retry(&engine, completion, retry, &cancel).await;
                let _ = outcomes.send(outcome);
                drop(permit);
            });
        }

        // Anything still queued will never be submitted
        queue.close();
        while let Ok(completion) = queue.try_recv() {
            self.publish(SubmissionOutcome::Cancelled { race: completion.race });
        }
        info!(dispatched, "Submission dispatcher stopped");
    }

    fn publish(&self, outcome: SubmissionOutcome) {
        // No subscribers is fine
        let _ = self.outcomes.send(outcome);
    }
}

async fn submit_with_retry<S: Store>(
    engine: &ProgressionEngine<S>,
    completion: RaceCompletion,
    retry: RetryPolicy,
    cancel: &CancellationToken,
) -> SubmissionOutcome {
    let race = completion.race;
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        let err = match engine.submit_results(race, completion.results.clone()).await {
            Ok(ack) => return SubmissionOutcome::Applied { ack, attempts: attempt },
            Err(err) => err,
        };

        if attempt > 1 && all_duplicates(&err) {
            debug!(race = %race, attempt, "Race already applied by an earlier attempt");
            return SubmissionOutcome::AlreadyApplied { race, attempts: attempt };
        }
        if !err.is_retryable() || attempt >= retry.max_attempts {
            warn!(race = %race, attempt, error = %err, "Race submission failed");
            return SubmissionOutcome::Rejected {
                race,
                kind: err.kind(),
                reason: err.to_string(),
                attempts: attempt,
            };
        }

        let backoff = retry.backoff(attempt);
        warn!(race = %race, attempt, ?backoff, error = %err, "Race submission failed, retrying");
        tokio::select! {
            _ = cancel.cancelled() => return SubmissionOutcome::Cancelled { race },
            _ = tokio::time::sleep(backoff) => {}
        }
    }
}

fn all_duplicates(err: &ProgressionError) -> bool {
    let failures = err.failures();
    !failures.is_empty()
        && failures
            .iter()
            .all(|failure| matches!(failure.error, ProgressionError::DuplicateResult { .. }))
}

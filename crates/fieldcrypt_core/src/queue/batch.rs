//! Batch and scheduled draining of the reconciliation queue.

use super::{ClaimedItem, ReconciliationQueue, UpdateRecordEncryption};
use crate::config::SharedConfig;
use crate::error::{CoreError, CoreResult};
use crate::schema::SchemaPlan;
use crate::state::StateManager;
use crate::types::RecordId;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Consecutive passes without progress after which [`QueueProcessor::run`]
/// gives up.
const MAX_STALLED_PASSES: usize = 3;

/// Error recorded when the queue reports items but none can be claimed.
pub const CANNOT_CLAIM: &str = "Cannot claim an item - unable to process the batch";

/// What a batch run accumulated across passes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchResults {
    /// Ids of the records updated.
    pub items: Vec<RecordId>,
    /// Error messages, in the order they happened.
    pub errors: Vec<String>,
}

/// Progress state carried between passes of one batch run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchContext {
    /// Items processed so far.
    pub progress: usize,
    /// Queue size when the run started.
    pub max: Option<usize>,
    /// Completion in `0.0..=1.0`; the run ends at `1.0`.
    pub finished: f64,
    /// Progress line for the last processed item.
    pub message: Option<String>,
    /// Accumulated results.
    pub results: BatchResults,
}

impl BatchContext {
    /// A context for a new run.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the run is complete.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished >= 1.0
    }
}

/// Pending work as shown to operators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueStatus {
    /// Items in the queue, claimed ones included.
    pub pending: usize,
    /// Human readable summary.
    pub message: String,
}

/// Outcome of a finished batch run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Informational messages.
    pub messages: Vec<String>,
    /// Errors collected during the run.
    pub errors: Vec<String>,
    /// The cleanup plan, when cleanup ran.
    pub cleanup: Option<SchemaPlan>,
}

/// Outcome of a scheduled run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CronReport {
    /// Items processed and deleted.
    pub processed: usize,
    /// Items left claimed after a permanent failure.
    pub failed: usize,
    /// Items whose lease ran out and were claimed by another worker
    /// before they could be deleted or released.
    pub lost_claims: usize,
    /// Whether a retryable error stopped processing.
    pub suspended: bool,
    /// The cleanup plan.
    pub cleanup: SchemaPlan,
}

/// Drives the worker over the queue.
pub struct QueueProcessor {
    queue: Arc<dyn ReconciliationQueue>,
    worker: UpdateRecordEncryption,
    state: Arc<StateManager>,
    config: SharedConfig,
}

impl QueueProcessor {
    /// Creates a processor.
    pub fn new(
        queue: Arc<dyn ReconciliationQueue>,
        worker: UpdateRecordEncryption,
        state: Arc<StateManager>,
        config: SharedConfig,
    ) -> Self {
        Self {
            queue,
            worker,
            state,
            config,
        }
    }

    /// Pending item count and its operator message.
    ///
    /// # Errors
    ///
    /// Returns queue errors.
    pub fn status(&self) -> CoreResult<QueueStatus> {
        let pending = self.queue.number_of_items()?;
        let message = if pending == 1 {
            "There is one record queued for updating to use the latest field encryption settings."
                .to_string()
        } else {
            format!(
                "There are {pending} records queued for updating to use the latest field encryption settings."
            )
        };
        Ok(QueueStatus { pending, message })
    }

    /// Runs one pass of at most `batch_size` items.
    ///
    /// Failures of single items never abort the pass: retryable ones give
    /// the item back to the queue, other ones are added to
    /// `context.results.errors` and the item stays claimed until its lease
    /// runs out. An item whose claim was lost to another worker is recorded
    /// as an error too; a record that was saved before the claim was lost
    /// still counts as processed.
    ///
    /// # Errors
    ///
    /// Returns queue errors other than a lost claim.
    pub fn process_updates(&self, context: &mut BatchContext) -> CoreResult<()> {
        let (batch_size, lease) = {
            let config = self.config.read();
            (config.batch_size, config.claim_lease())
        };
        let num_items = self.queue.number_of_items()?;
        let max = *context.max.get_or_insert(num_items);
        context.finished = 1.0;

        for _ in 0..batch_size.min(num_items) {
            let Some(claimed) = self.queue.claim_item(lease)? else {
                context.results.errors.push(CANNOT_CLAIM.to_string());
                return Ok(());
            };
            match self.worker.process_item(&claimed.data) {
                Ok(()) => {
                    if let Some(lost) = claim_lost(self.queue.delete_item(&claimed), &claimed)? {
                        context.results.errors.push(lost.to_string());
                    }
                    context.message = Some(self.worker.batch_message(&claimed.data));
                    context.results.items.push(claimed.data.record_id);
                    context.progress += 1;
                }
                Err(err) if err.is_retryable() => {
                    tracing::warn!(item = %claimed.item_id, error = %err, "queue item released for retry");
                    if let Some(lost) = claim_lost(self.queue.release_item(&claimed), &claimed)? {
                        context.results.errors.push(lost.to_string());
                    }
                }
                Err(err) => {
                    tracing::error!(
                        item = %claimed.item_id,
                        record_type = %claimed.data.record_type,
                        id = %claimed.data.record_id,
                        error = %err,
                        "queue item failed"
                    );
                    context.results.errors.push(err.to_string());
                }
            }
        }

        if context.progress != max {
            context.finished = if max == 0 {
                1.0
            } else {
                (context.progress as f64 / max as f64).min(1.0)
            };
        }
        Ok(())
    }

    /// Reports the run's outcome and, when it succeeded and updated
    /// anything, removes blob fields that are no longer needed.
    ///
    /// # Errors
    ///
    /// Returns cleanup errors.
    pub fn finish_batch(&self, success: bool, results: &BatchResults) -> CoreResult<BatchReport> {
        let mut report = BatchReport {
            errors: results.errors.clone(),
            ..BatchReport::default()
        };
        if success && !results.items.is_empty() {
            report.cleanup = Some(self.state.cleanup()?);
            report.messages.push(match results.items.len() {
                1 => "One record updated.".to_string(),
                n => format!("{n} records updated."),
            });
        }
        Ok(report)
    }

    /// Runs passes until the run completes, then finishes it.
    ///
    /// Stops early after a few consecutive passes that neither processed an
    /// item nor recorded an error, which happens while every remaining item
    /// keeps failing with retryable errors.
    ///
    /// # Errors
    ///
    /// Returns queue or cleanup errors.
    pub fn run(&self) -> CoreResult<BatchReport> {
        let mut context = BatchContext::new();
        let mut stalled = 0;
        loop {
            let before = (context.progress, context.results.errors.len());
            self.process_updates(&mut context)?;
            if context.is_finished() {
                break;
            }
            if (context.progress, context.results.errors.len()) == before {
                stalled += 1;
                if stalled >= MAX_STALLED_PASSES {
                    tracing::warn!(progress = context.progress, "batch stalled on retryable errors");
                    break;
                }
            } else {
                stalled = 0;
            }
        }
        self.finish_batch(true, &context.results)
    }

    /// Scheduled run: processes items until `budget` is spent, the queue
    /// has nothing claimable, or a retryable error suspends the queue,
    /// then runs cleanup.
    ///
    /// # Errors
    ///
    /// Returns queue or cleanup errors.
    pub fn cron(&self, budget: Duration) -> CoreResult<CronReport> {
        let lease = self.config.read().claim_lease();
        let deadline = Instant::now() + budget;
        let mut report = CronReport::default();

        while Instant::now() < deadline {
            let Some(claimed) = self.queue.claim_item(lease)? else {
                break;
            };
            match self.worker.process_item(&claimed.data) {
                Ok(()) => match claim_lost(self.queue.delete_item(&claimed), &claimed)? {
                    None => report.processed += 1,
                    Some(_) => report.lost_claims += 1,
                },
                Err(err) if err.is_retryable() => {
                    tracing::warn!(item = %claimed.item_id, error = %err, "queue suspended");
                    if claim_lost(self.queue.release_item(&claimed), &claimed)?.is_some() {
                        report.lost_claims += 1;
                    }
                    report.suspended = true;
                    break;
                }
                Err(err) => {
                    tracing::error!(item = %claimed.item_id, error = %err, "queue item failed");
                    report.failed += 1;
                }
            }
        }

        report.cleanup = self.state.cleanup()?;
        Ok(report)
    }
}

/// Turns a delete or release that failed because the claim expired and was
/// taken over into `Some(error)`; other errors propagate.
fn claim_lost(result: CoreResult<()>, claimed: &ClaimedItem) -> CoreResult<Option<CoreError>> {
    match result {
        Ok(()) => Ok(None),
        Err(err @ CoreError::InvalidOperation { .. }) => {
            tracing::warn!(
                item = %claimed.item_id,
                record_type = %claimed.data.record_type,
                id = %claimed.data.record_id,
                error = %err,
                "claim lost before the queue item was settled"
            );
            Ok(Some(err))
        }
        Err(err) => Err(err),
    }
}

impl std::fmt::Debug for QueueProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueProcessor").finish_non_exhaustive()
    }
}

//! Queue worker loop
//!
//! Long-polls the jobs queue, judges each received message in its own task,
//! publishes the result, and deletes the job message only after the result
//! has been handed off. Failed or crashed jobs are left in the queue and
//! redelivered once their visibility timeout expires.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::executor::CodeExecutor;
use crate::judger::{self, TestCase};
use crate::queue::{JobQueue, QueueMessage, VISIBILITY_TIMEOUT_SECS};
use crate::verdict::Verdict;

/// How often the lease on an in-flight message is renewed
const VISIBILITY_EXTEND_INTERVAL_SECS: u64 = 60;
/// Backoff after a failed poll
const POLL_ERROR_BACKOFF_SECS: u64 = 5;

/// Job received from the jobs queue
#[derive(Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub submission_id: String,
    pub code: String,
    pub language: String,
    pub test_cases: Vec<TestCase>,
}

/// Result published to the results queue
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultMessage {
    pub submission_id: String,
    pub status: String,
    pub output: String,
    pub error: String,
}

/// Poll for jobs until the shutdown token fires. Messages in a batch are
/// processed concurrently; the batch is joined before the next poll so a
/// termination signal never abandons in-flight work.
pub async fn run(
    queue: Arc<dyn JobQueue>,
    executor: Arc<dyn CodeExecutor>,
    shutdown: CancellationToken,
) {
    info!("Worker started. Polling for messages...");

    while !shutdown.is_cancelled() {
        let received = tokio::select! {
            _ = shutdown.cancelled() => break,
            received = queue.receive() => received,
        };

        let messages = match received {
            Ok(messages) => messages,
            Err(e) => {
                error!("Polling error: {:#}", e);
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(Duration::from_secs(POLL_ERROR_BACKOFF_SECS)) => {}
                }
                continue;
            }
        };

        if messages.is_empty() {
            continue;
        }

        info!("Received {} messages. Processing in parallel...", messages.len());
        let mut batch = JoinSet::new();
        for message in messages {
            let queue = queue.clone();
            let executor = executor.clone();
            batch.spawn(async move { process_message(queue, executor, message).await });
        }
        while let Some(joined) = batch.join_next().await {
            if let Err(e) = joined {
                error!("Job task failed: {}", e);
            }
        }
    }

    info!("Polling stopped. Worker is shutting down.");
}

/// Handle one received message end-to-end.
///
/// Settlement discipline: unprocessable messages are deleted immediately;
/// judged messages are deleted only after the result send succeeded; any
/// other failure leaves the message to be redelivered.
async fn process_message(
    queue: Arc<dyn JobQueue>,
    executor: Arc<dyn CodeExecutor>,
    message: QueueMessage,
) {
    let job: Job = match serde_json::from_str(&message.body) {
        Ok(job) => job,
        Err(e) => {
            warn!("Received unprocessable job message ({}). Deleting.", e);
            delete_message(queue.as_ref(), &message.receipt_handle).await;
            return;
        }
    };

    info!("Processing job for submission: {}", job.submission_id);

    let _extender = VisibilityExtender::spawn(
        queue.clone(),
        message.receipt_handle.clone(),
        job.submission_id.clone(),
    );

    match judger::judge(executor.as_ref(), &job.language, &job.code, &job.test_cases).await {
        Ok(judgement) => {
            // Wrong answers carry their diagnostic triad as the visible
            // output; every other verdict reports the error separately.
            let (output, error) = if judgement.verdict == Verdict::WrongAnswer {
                (judgement.error, String::new())
            } else {
                (judgement.details, judgement.error)
            };
            let result = ResultMessage {
                submission_id: job.submission_id.clone(),
                status: judgement.verdict.to_string(),
                output,
                error,
            };

            let body = match serde_json::to_string(&result) {
                Ok(body) => body,
                Err(e) => {
                    error!("Failed to serialize result for {}: {}", job.submission_id, e);
                    return;
                }
            };

            let dedup_token = Uuid::new_v4().to_string();
            if let Err(e) = queue
                .send_result(&job.submission_id, &dedup_token, &body)
                .await
            {
                error!(
                    "Failed to send result for {}: {:#}. Leaving message for redelivery.",
                    job.submission_id, e
                );
                return;
            }

            delete_message(queue.as_ref(), &message.receipt_handle).await;
            info!("Submission {} judged: {}", job.submission_id, result.status);
        }
        Err(e) => {
            error!(
                "Error processing submission {}: {:#}. Message will be redelivered.",
                job.submission_id, e
            );
        }
    }
}

/// Delete a message, best-effort; a failed delete only means an extra
/// redelivery of an already-judged job.
async fn delete_message(queue: &dyn JobQueue, receipt_handle: &str) {
    if let Err(e) = queue.delete(receipt_handle).await {
        error!("Failed to delete message from queue: {:#}", e);
    }
}

/// Renews the lease on an in-flight message every
/// `VISIBILITY_EXTEND_INTERVAL_SECS` so long judge passes are not
/// redelivered mid-flight. The background task is aborted when the guard is
/// dropped, including when the owning job panics.
struct VisibilityExtender {
    handle: JoinHandle<()>,
}

impl VisibilityExtender {
    fn spawn(queue: Arc<dyn JobQueue>, receipt_handle: String, submission_id: String) -> Self {
        let handle = tokio::spawn(async move {
            let period = Duration::from_secs(VISIBILITY_EXTEND_INTERVAL_SECS);
            loop {
                tokio::time::sleep(period).await;
                match queue
                    .extend_visibility(&receipt_handle, VISIBILITY_TIMEOUT_SECS)
                    .await
                {
                    Ok(()) => info!("Visibility extended for submission: {}", submission_id),
                    Err(e) => warn!(
                        "Failed to extend visibility for {}: {:#}",
                        submission_id, e
                    ),
                }
            }
        });
        Self { handle }
    }
}

impl Drop for VisibilityExtender {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

//! Queue abstraction over the jobs/results transport
//!
//! The transport is an at-least-once queue with a visibility timeout
//! (a lease): a received message stays invisible to other workers until it
//! is deleted or the lease expires. The worker loop only talks to the
//! `JobQueue` trait so it can be driven by an in-memory fake in tests;
//! `SqsJobQueue` is the production implementation.

use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use tracing::info;

/// Long-poll parameters for the jobs queue
const MAX_BATCH_SIZE: i32 = 10;
const POLL_WAIT_SECS: i32 = 20;

/// Lease duration granted on receive and on each extension
pub const VISIBILITY_TIMEOUT_SECS: i32 = 120;

/// A received job message and the lease handle needed to extend or settle it
#[derive(Debug, Clone)]
pub struct QueueMessage {
    pub body: String,
    pub receipt_handle: String,
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Long-poll the jobs queue for the next batch of messages
    async fn receive(&self) -> Result<Vec<QueueMessage>>;

    /// Renew the lease on an in-flight message
    async fn extend_visibility(&self, receipt_handle: &str, timeout_secs: i32) -> Result<()>;

    /// Settle a message by deleting it from the jobs queue
    async fn delete(&self, receipt_handle: &str) -> Result<()>;

    /// Publish a result message, grouped per submission and deduplicated by
    /// a caller-supplied token
    async fn send_result(&self, group_id: &str, dedup_token: &str, body: &str) -> Result<()>;
}

/// SQS-backed jobs/results queues
pub struct SqsJobQueue {
    client: aws_sdk_sqs::Client,
    jobs_queue_url: String,
    results_queue_url: String,
}

impl SqsJobQueue {
    /// Create a queue client from environment variables. Both queue URLs are
    /// required; the worker cannot start without them.
    pub async fn from_env() -> Result<Self> {
        let jobs_queue_url =
            std::env::var("SQS_QUEUE_URL").context("SQS_QUEUE_URL (for jobs) is not defined")?;
        let results_queue_url = std::env::var("SQS_RESULTS_QUEUE_URL")
            .context("SQS_RESULTS_QUEUE_URL (for results) is not defined")?;

        let config = aws_config::defaults(BehaviorVersion::latest()).load().await;
        let client = aws_sdk_sqs::Client::new(&config);

        info!("Using jobs queue {}", jobs_queue_url);
        info!("Using results queue {}", results_queue_url);

        Ok(Self {
            client,
            jobs_queue_url,
            results_queue_url,
        })
    }
}

#[async_trait]
impl JobQueue for SqsJobQueue {
    async fn receive(&self) -> Result<Vec<QueueMessage>> {
        let response = self
            .client
            .receive_message()
            .queue_url(&self.jobs_queue_url)
            .max_number_of_messages(MAX_BATCH_SIZE)
            .wait_time_seconds(POLL_WAIT_SECS)
            .visibility_timeout(VISIBILITY_TIMEOUT_SECS)
            .send()
            .await
            .context("Failed to receive messages from jobs queue")?;

        let messages = response
            .messages
            .unwrap_or_default()
            .into_iter()
            .filter_map(|message| match (message.body, message.receipt_handle) {
                (Some(body), Some(receipt_handle)) => Some(QueueMessage {
                    body,
                    receipt_handle,
                }),
                _ => None,
            })
            .collect();

        Ok(messages)
    }

    async fn extend_visibility(&self, receipt_handle: &str, timeout_secs: i32) -> Result<()> {
        self.client
            .change_message_visibility()
            .queue_url(&self.jobs_queue_url)
            .receipt_handle(receipt_handle)
            .visibility_timeout(timeout_secs)
            .send()
            .await
            .context("Failed to extend message visibility")?;
        Ok(())
    }

    async fn delete(&self, receipt_handle: &str) -> Result<()> {
        self.client
            .delete_message()
            .queue_url(&self.jobs_queue_url)
            .receipt_handle(receipt_handle)
            .send()
            .await
            .context("Failed to delete message from jobs queue")?;
        Ok(())
    }

    async fn send_result(&self, group_id: &str, dedup_token: &str, body: &str) -> Result<()> {
        self.client
            .send_message()
            .queue_url(&self.results_queue_url)
            .message_body(body)
            .message_group_id(group_id)
            .message_deduplication_id(dedup_token)
            .send()
            .await
            .context("Failed to send result message")?;
        Ok(())
    }
}

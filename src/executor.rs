//! Execution orchestrator
//!
//! Dispatches a single compile+run attempt: materializes a fresh workspace,
//! selects the runner for the submitted language, and guarantees workspace
//! cleanup on every exit path. At startup, leftover workspaces from a
//! previous (possibly crashed) run are swept from the shared temp root.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;

use crate::languages;
use crate::runner::{ProcessRunner, RunOutcome, Runner};
use crate::workspace::{self, JobWorkspace};

/// Default wall-clock limit per run, in milliseconds
const DEFAULT_EXECUTION_TIMEOUT_MS: u64 = 5000;

#[derive(Debug, Error)]
pub enum ExecuteError {
    #[error("Unsupported language: {0}")]
    UnsupportedLanguage(String),
    /// Infrastructure failure (filesystem, spawn); the attempt is retryable
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Seam for everything that judges or runs code, so callers can be tested
/// against scripted executors.
#[async_trait]
pub trait CodeExecutor: Send + Sync {
    async fn execute_code(
        &self,
        language: &str,
        code: &str,
        stdin: &str,
    ) -> Result<RunOutcome, ExecuteError>;
}

pub struct Executor {
    temp_root: PathBuf,
    time_limit: Duration,
}

impl Executor {
    pub fn new(temp_root: impl Into<PathBuf>, time_limit: Duration) -> Self {
        Self {
            temp_root: temp_root.into(),
            time_limit,
        }
    }

    /// Build an executor from `JUDGE_TEMP_DIR` and `EXECUTION_TIMEOUT_MS`,
    /// with defaults matching the production setup.
    pub fn from_env() -> Self {
        let temp_root = std::env::var("JUDGE_TEMP_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| std::env::temp_dir().join("online-judge"));
        let timeout_ms = std::env::var("EXECUTION_TIMEOUT_MS")
            .ok()
            .and_then(|value| value.parse().ok())
            .unwrap_or(DEFAULT_EXECUTION_TIMEOUT_MS);

        Self::new(temp_root, Duration::from_millis(timeout_ms))
    }

    /// Remove workspaces orphaned by a non-graceful shutdown
    pub async fn sweep_stale_workspaces(&self) -> Result<usize> {
        workspace::sweep_stale(&self.temp_root).await
    }
}

#[async_trait]
impl CodeExecutor for Executor {
    async fn execute_code(
        &self,
        language: &str,
        code: &str,
        stdin: &str,
    ) -> Result<RunOutcome, ExecuteError> {
        let config = languages::get_language_config(language)
            .ok_or_else(|| ExecuteError::UnsupportedLanguage(language.to_string()))?;

        let workspace = JobWorkspace::create(&self.temp_root, &config, code, stdin).await?;

        let runner = ProcessRunner::new(config, self.time_limit);
        let outcome = runner.run(&workspace).await?;

        // Workspace dropped here; the job directory is removed even when the
        // runner failed.
        Ok(outcome)
    }
}

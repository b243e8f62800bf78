//! Runner module - per-language compile/execute strategies
//!
//! A runner turns a materialized workspace into a `RunOutcome`: it compiles
//! the source when the language requires it and executes the program against
//! the job's stdin under a wall-clock limit.
//!
//! The runner module does NOT:
//! - Compare outputs or determine verdicts
//! - Manage workspace lifecycle (the orchestrator does)

pub mod process;

use anyhow::Result;
use async_trait::async_trait;

use crate::workspace::JobWorkspace;

/// Outcome of one compile+execute attempt, classified as tagged data.
/// Failures are part of the value, never errors thrown past the runner.
#[derive(Debug, Clone, PartialEq)]
pub enum RunStatus {
    /// Program compiled (if applicable) and exited cleanly
    Success,
    /// Compiler rejected the source; the program was never run
    CompileError(String),
    /// Program crashed, exited nonzero, or wrote to stderr
    RuntimeError(String),
    /// Wall-clock limit hit; the process group was killed
    TimeLimitExceeded,
}

impl RunStatus {
    /// User-facing error description, None on success
    pub fn error_message(&self) -> Option<String> {
        match self {
            RunStatus::Success => None,
            RunStatus::CompileError(message) => {
                Some(format!("Compilation Error: {}", message.trim()))
            }
            RunStatus::RuntimeError(message) => Some(format!("Runtime Error: {}", message.trim())),
            RunStatus::TimeLimitExceeded => Some("Time Limit Exceeded".to_string()),
        }
    }
}

/// Result of running a program against one input
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    /// Captured stdout, decoded as text, untransformed
    pub stdout: String,
    pub status: RunStatus,
}

impl RunOutcome {
    pub fn success(stdout: String) -> Self {
        Self {
            stdout,
            status: RunStatus::Success,
        }
    }

    pub fn failed(status: RunStatus) -> Self {
        Self {
            stdout: String::new(),
            status,
        }
    }
}

/// Runner trait for executing a materialized submission
#[async_trait]
pub trait Runner: Send + Sync {
    async fn run(&self, workspace: &JobWorkspace) -> Result<RunOutcome>;
}

// Re-exports
pub use process::ProcessRunner;

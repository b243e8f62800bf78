//! Process-based runner
//!
//! Compiles and executes submissions as plain subprocesses in the job
//! workspace. Containment is a wall-clock timeout plus a SIGKILL of the
//! spawned process group; there is no memory, filesystem, or network
//! restriction (see DESIGN.md).

use std::os::unix::process::ExitStatusExt;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use super::{RunOutcome, RunStatus, Runner};
use crate::languages::LanguageConfig;
use crate::workspace::JobWorkspace;

/// Wall-clock limit for the compile step
const COMPILE_TIME_LIMIT: Duration = Duration::from_secs(60);

/// Runner that compiles (when configured) and executes a submission
/// directly as subprocesses
pub struct ProcessRunner {
    config: LanguageConfig,
    time_limit: Duration,
}

impl ProcessRunner {
    pub fn new(config: LanguageConfig, time_limit: Duration) -> Self {
        Self { config, time_limit }
    }

    /// Compile (if required) and run the workspace's source file against its
    /// input file.
    pub async fn execute(&self, workspace: &JobWorkspace) -> Result<RunOutcome> {
        let source_name = workspace.source_file_name();

        if let Some(compile_command) = &self.config.compile_command {
            let command =
                materialize_command(compile_command, &self.config.source_file, source_name);
            debug!("Compiling with {:?}", command);

            let compile = run_command(&command, workspace.dir(), None, COMPILE_TIME_LIMIT).await?;
            match compile.status {
                None => {
                    return Ok(RunOutcome::failed(RunStatus::CompileError(
                        "Compilation timed out".to_string(),
                    )))
                }
                Some(status) if !status.success() => {
                    let message = if !compile.stderr.trim().is_empty() {
                        compile.stderr
                    } else if !compile.stdout.trim().is_empty() {
                        compile.stdout
                    } else {
                        format!(
                            "Compilation failed with exit code {}",
                            status.code().unwrap_or(-1)
                        )
                    };
                    return Ok(RunOutcome::failed(RunStatus::CompileError(message)));
                }
                Some(_) => {}
            }
        }

        let input = tokio::fs::read(workspace.input_path())
            .await
            .context("Failed to read input file")?;

        let command = materialize_command(&self.config.run_command, &self.config.source_file, source_name);
        debug!("Running {:?}", command);

        let run = run_command(&command, workspace.dir(), Some(input), self.time_limit).await?;
        match run.status {
            None => Ok(RunOutcome::failed(RunStatus::TimeLimitExceeded)),
            Some(status) => Ok(RunOutcome {
                status: classify_run(status, &run.stderr, &self.config.benign_stderr_prefixes),
                stdout: run.stdout,
            }),
        }
    }
}

#[async_trait]
impl Runner for ProcessRunner {
    async fn run(&self, workspace: &JobWorkspace) -> Result<RunOutcome> {
        self.execute(workspace).await
    }
}

/// Substitute the configured source filename (and its stem) with the actual
/// materialized filename. Exact token match only, so a class named `Main2`
/// is never mangled.
fn materialize_command(command: &[String], configured: &str, actual: &str) -> Vec<String> {
    let configured_stem = file_stem(configured);
    let actual_stem = file_stem(actual);

    command
        .iter()
        .map(|arg| {
            if arg == configured {
                actual.to_string()
            } else if arg == configured_stem {
                actual_stem.to_string()
            } else {
                arg.clone()
            }
        })
        .collect()
}

fn file_stem(filename: &str) -> &str {
    Path::new(filename)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or(filename)
}

/// Classify a finished (non-timed-out) run
fn classify_run(
    status: std::process::ExitStatus,
    stderr: &str,
    benign_prefixes: &[String],
) -> RunStatus {
    if !status.success() {
        let detail = if stderr.trim().is_empty() {
            match status.signal() {
                Some(signal) => format!("Process terminated by signal {}", signal),
                None => format!("Process exited with code {}", status.code().unwrap_or(-1)),
            }
        } else {
            stderr.to_string()
        };
        return RunStatus::RuntimeError(detail);
    }

    match significant_stderr(stderr, benign_prefixes) {
        Some(detail) => RunStatus::RuntimeError(detail),
        None => RunStatus::Success,
    }
}

/// Filter out benign noise (JVM startup warnings); returns the remaining
/// stderr content if any line is significant.
fn significant_stderr(stderr: &str, benign_prefixes: &[String]) -> Option<String> {
    let significant: Vec<&str> = stderr
        .lines()
        .filter(|line| {
            !line.trim().is_empty() && !benign_prefixes.iter().any(|prefix| line.starts_with(prefix))
        })
        .collect();

    if significant.is_empty() {
        None
    } else {
        Some(significant.join("\n"))
    }
}

struct ProcessOutput {
    stdout: String,
    stderr: String,
    /// None when the wall-clock limit fired
    status: Option<std::process::ExitStatus>,
}

/// Spawn a command in `work_dir`, pipe `stdin` into it, and wait for it with
/// a wall-clock limit. On timeout the whole process group is killed and
/// partial output is discarded.
async fn run_command(
    command: &[String],
    work_dir: &Path,
    stdin: Option<Vec<u8>>,
    limit: Duration,
) -> Result<ProcessOutput> {
    let (program, args) = command
        .split_first()
        .context("Empty command for execution")?;

    let mut cmd = Command::new(program);
    cmd.args(args)
        .current_dir(work_dir)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0)
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .with_context(|| format!("Failed to spawn {}", program))?;

    // The child may exit before consuming all input; a broken pipe while
    // writing stdin is not an execution failure.
    if let Some(input) = stdin {
        if let Some(mut child_stdin) = child.stdin.take() {
            tokio::spawn(async move {
                if let Err(e) = child_stdin.write_all(&input).await {
                    if e.kind() != std::io::ErrorKind::BrokenPipe {
                        debug!("stdin write failed: {}", e);
                    }
                }
            });
        }
    } else {
        drop(child.stdin.take());
    }

    let pid = child.id();

    match tokio::time::timeout(limit, child.wait_with_output()).await {
        Ok(output) => {
            let output = output.context("Failed to wait for child process")?;
            Ok(ProcessOutput {
                stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
                status: Some(output.status),
            })
        }
        Err(_) => {
            // Dropping the wait future kills the direct child; take the rest
            // of its process group (compilers, JVMs fork) down with it.
            if let Some(pid) = pid {
                let _ = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL);
            }
            Ok(ProcessOutput {
                stdout: String::new(),
                stderr: String::new(),
                status: None,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(run_command: &[&str], compile_command: Option<&[&str]>) -> LanguageConfig {
        LanguageConfig {
            source_file: "main.txt".to_string(),
            compile_command: compile_command
                .map(|cmd| cmd.iter().map(|s| s.to_string()).collect()),
            run_command: run_command.iter().map(|s| s.to_string()).collect(),
            derive_class_name: false,
            benign_stderr_prefixes: Vec::new(),
        }
    }

    async fn workspace(root: &Path, config: &LanguageConfig, input: &str) -> JobWorkspace {
        JobWorkspace::create(root, config, "source", input)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_echo_stdin_round_trips() {
        let root = tempfile::tempdir().unwrap();
        let config = config(&["cat"], None);
        let workspace = workspace(root.path(), &config, "hello\nworld\n").await;

        let runner = ProcessRunner::new(config, Duration::from_secs(5));
        let outcome = runner.execute(&workspace).await.unwrap();

        assert_eq!(outcome.status, RunStatus::Success);
        assert_eq!(outcome.stdout, "hello\nworld\n");
    }

    #[tokio::test]
    async fn test_timeout_yields_time_limit_exceeded() {
        let root = tempfile::tempdir().unwrap();
        let config = config(&["sleep", "5"], None);
        let workspace = workspace(root.path(), &config, "").await;

        let runner = ProcessRunner::new(config, Duration::from_millis(100));
        let outcome = runner.execute(&workspace).await.unwrap();

        assert_eq!(outcome.status, RunStatus::TimeLimitExceeded);
        assert!(outcome.stdout.is_empty());
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_runtime_error() {
        let root = tempfile::tempdir().unwrap();
        let config = config(&["sh", "-c", "echo boom >&2; exit 3"], None);
        let workspace = workspace(root.path(), &config, "").await;

        let runner = ProcessRunner::new(config, Duration::from_secs(5));
        let outcome = runner.execute(&workspace).await.unwrap();

        match outcome.status {
            RunStatus::RuntimeError(detail) => assert!(detail.contains("boom")),
            other => panic!("expected runtime error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_stderr_on_clean_exit_is_runtime_error() {
        let root = tempfile::tempdir().unwrap();
        let config = config(&["sh", "-c", "echo oops >&2"], None);
        let workspace = workspace(root.path(), &config, "").await;

        let runner = ProcessRunner::new(config, Duration::from_secs(5));
        let outcome = runner.execute(&workspace).await.unwrap();

        assert!(matches!(outcome.status, RunStatus::RuntimeError(_)));
    }

    #[tokio::test]
    async fn test_benign_stderr_noise_is_ignored() {
        let root = tempfile::tempdir().unwrap();
        let mut config = config(
            &["sh", "-c", "echo 'Picked up JAVA_TOOL_OPTIONS: -Xmx1g' >&2; echo ok"],
            None,
        );
        config.benign_stderr_prefixes = vec!["Picked up ".to_string()];
        let workspace = workspace(root.path(), &config, "").await;

        let runner = ProcessRunner::new(config, Duration::from_secs(5));
        let outcome = runner.execute(&workspace).await.unwrap();

        assert_eq!(outcome.status, RunStatus::Success);
        assert_eq!(outcome.stdout, "ok\n");
    }

    #[tokio::test]
    async fn test_failed_compile_is_compile_error_and_skips_run() {
        let root = tempfile::tempdir().unwrap();
        let config = config(
            &["sh", "-c", "echo should-not-run"],
            Some(&["sh", "-c", "echo 'expected ;' >&2; exit 1"]),
        );
        let workspace = workspace(root.path(), &config, "").await;

        let runner = ProcessRunner::new(config, Duration::from_secs(5));
        let outcome = runner.execute(&workspace).await.unwrap();

        match outcome.status {
            RunStatus::CompileError(detail) => assert!(detail.contains("expected ;")),
            other => panic!("expected compile error, got {:?}", other),
        }
        assert!(outcome.stdout.is_empty());
    }

    #[test]
    fn test_materialize_command_substitutes_exact_tokens() {
        let command: Vec<String> = ["javac", "Main.java"].map(String::from).to_vec();
        assert_eq!(
            materialize_command(&command, "Main.java", "Solution.java"),
            ["javac", "Solution.java"]
        );

        let run: Vec<String> = ["java", "Main"].map(String::from).to_vec();
        assert_eq!(
            materialize_command(&run, "Main.java", "Solution.java"),
            ["java", "Solution"]
        );
    }

    #[test]
    fn test_significant_stderr_filters_prefixes() {
        let benign = vec!["Picked up ".to_string()];
        assert_eq!(
            significant_stderr("Picked up JAVA_TOOL_OPTIONS\n", &benign),
            None
        );
        assert_eq!(
            significant_stderr("Picked up X\nException in thread \"main\"\n", &benign).as_deref(),
            Some("Exception in thread \"main\"")
        );
    }

    #[test]
    fn test_error_messages_carry_classification() {
        assert_eq!(
            RunStatus::CompileError("bad\n".into()).error_message().as_deref(),
            Some("Compilation Error: bad")
        );
        assert_eq!(
            RunStatus::TimeLimitExceeded.error_message().as_deref(),
            Some("Time Limit Exceeded")
        );
        assert_eq!(RunStatus::Success.error_message(), None);
    }
}

//! Judger module - verdict evaluation for submissions
//!
//! Runs a submission against a problem's test cases through a
//! `CodeExecutor`, normalizes outputs for comparison, and stops at the
//! first failing test case.

use serde::{Deserialize, Serialize};

use crate::executor::{CodeExecutor, ExecuteError};
use crate::runner::RunStatus;
use crate::verdict::Verdict;

/// Upper bound on user-visible diagnostic text
const MAX_DIAGNOSTIC_CHARS: usize = 4096;

/// One test case of a problem, as carried in the job message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    #[serde(default)]
    pub input: String,
    /// Expected output
    pub output: String,
}

/// Outcome of judging one submission
#[derive(Debug, Clone, PartialEq)]
pub struct Judgement {
    pub verdict: Verdict,
    /// 1-based index of the test case the submission failed on
    pub failing_test: Option<usize>,
    /// Human-readable summary ("All test cases passed.", "Failed on test case 2")
    pub details: String,
    /// Diagnostic detail: compiler/runtime error text, or the
    /// input/expected/actual triad for wrong answers
    pub error: String,
}

impl Judgement {
    fn accepted(details: &str) -> Self {
        Self {
            verdict: Verdict::Accepted,
            failing_test: None,
            details: details.to_string(),
            error: String::new(),
        }
    }
}

/// Judge a submission against its test cases, in order, stopping at the
/// first non-accepted outcome.
///
/// Infrastructure failures propagate as errors so the caller can leave the
/// job for redelivery; everything the submitter caused comes back as a
/// `Judgement`.
pub async fn judge(
    executor: &dyn CodeExecutor,
    language: &str,
    code: &str,
    test_cases: &[TestCase],
) -> anyhow::Result<Judgement> {
    if test_cases.is_empty() {
        // Deliberate permissive policy for problems without test data
        return Ok(Judgement::accepted("No test cases to run against."));
    }

    for (index, test_case) in test_cases.iter().enumerate() {
        let number = index + 1;

        let outcome = match executor.execute_code(language, code, &test_case.input).await {
            Ok(outcome) => outcome,
            Err(ExecuteError::UnsupportedLanguage(language)) => {
                let message = format!("Unsupported language: {}", language);
                return Ok(Judgement {
                    verdict: Verdict::RuntimeError,
                    failing_test: None,
                    details: message.clone(),
                    error: message,
                });
            }
            Err(ExecuteError::Internal(e)) => {
                return Err(e.context(format!("Execution failed on test case {}", number)))
            }
        };

        match outcome.status {
            RunStatus::Success => {
                let actual = normalize(&outcome.stdout);
                let expected = normalize(&test_case.output);
                if actual != expected {
                    return Ok(Judgement {
                        verdict: Verdict::WrongAnswer,
                        failing_test: Some(number),
                        details: format!("Failed on test case {}", number),
                        error: truncate_chars(
                            &format!(
                                "Input:\n{}\n\nExpected:\n{}\n\nGot:\n{}",
                                test_case.input, expected, actual
                            ),
                            MAX_DIAGNOSTIC_CHARS,
                        ),
                    });
                }
            }
            status => {
                let verdict = match status {
                    RunStatus::CompileError(_) => Verdict::CompilationError,
                    RunStatus::TimeLimitExceeded => Verdict::TimeLimitExceeded,
                    _ => Verdict::RuntimeError,
                };
                return Ok(Judgement {
                    verdict,
                    failing_test: Some(number),
                    details: format!("Failed on test case {}", number),
                    error: truncate_chars(
                        &status.error_message().unwrap_or_default(),
                        MAX_DIAGNOSTIC_CHARS,
                    ),
                });
            }
        }
    }

    Ok(Judgement::accepted("All test cases passed."))
}

/// Normalize program output for comparison: CRLF to LF, trailing whitespace
/// stripped per line, leading/trailing whitespace stripped overall.
pub fn normalize(text: &str) -> String {
    text.replace("\r\n", "\n")
        .lines()
        .map(|line| line.trim_end())
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

//! Procedure execution: ordered steps, captured output, overall deadline.
//!
//! Each step is spawned via `sh -c` with piped stdio. Stdout and stderr
//! are drained by background tasks into a combined transcript while the
//! parent waits for exit under the remaining share of the procedure's
//! budget. A step that exceeds the deadline is killed and the run is
//! marked timed-out; a non-zero exit from an abort-on-failure step stops
//! the run at that step.

use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{info, warn};

use crate::procedure::{ProcedureDefinition, StepDefinition};

// ---------------------------------------------------------------------------
// ExecutionRecord
// ---------------------------------------------------------------------------

/// Overall result of one procedure run. Step indices are zero-based.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Succeeded,
    FailedAtStep(usize),
    TimedOut,
}

impl Outcome {
    /// Reporting category for this outcome.
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Succeeded => "succeeded",
            Outcome::FailedAtStep(_) => "step-failed",
            Outcome::TimedOut => "timed-out",
        }
    }
}

/// One executed (or attempted) step.
#[derive(Debug, Clone)]
pub struct StepResult {
    pub command: String,
    /// Exit code; `None` when the process was killed or never spawned.
    pub exit_code: Option<i32>,
    /// Combined stdout + stderr transcript.
    pub output: String,
    pub duration: Duration,
}

impl StepResult {
    pub fn succeeded(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Everything the dispatcher needs to report one run. Not persisted;
/// lives only until the response is sent.
#[derive(Debug, Clone)]
pub struct ExecutionRecord {
    pub procedure: String,
    pub started_at: DateTime<Utc>,
    pub steps: Vec<StepResult>,
    pub outcome: Outcome,
}

impl ExecutionRecord {
    /// The step a failure or timeout is attributed to.
    ///
    /// A timeout that lands between steps (every recorded step exited 0,
    /// the budget ran out before the next could spawn) has no failing
    /// step to attribute output to.
    pub fn failed_step(&self) -> Option<&StepResult> {
        match self.outcome {
            Outcome::Succeeded => None,
            Outcome::FailedAtStep(n) => self.steps.get(n),
            Outcome::TimedOut => self.steps.last().filter(|s| !s.succeeded()),
        }
    }
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

/// Execute every step of `def` in order and report the outcome.
///
/// The procedure's timeout is a single budget consumed across steps as a
/// deadline. Failure of an abort-on-failure step skips the remaining
/// steps; failure of any other step is recorded and execution continues,
/// with the outcome attributed to the first failing step.
pub async fn run(def: &ProcedureDefinition) -> ExecutionRecord {
    let started_at = Utc::now();
    let deadline = Instant::now() + def.timeout();
    let mut steps: Vec<StepResult> = Vec::with_capacity(def.steps.len());
    let mut first_failure: Option<usize> = None;

    info!(procedure = %def.id, steps = def.steps.len(), "run started");

    for (index, step) in def.steps.iter().enumerate() {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            warn!(procedure = %def.id, step = index, "budget exhausted before step");
            return ExecutionRecord {
                procedure: def.id.clone(),
                started_at,
                steps,
                outcome: Outcome::TimedOut,
            };
        }

        match run_step(step, remaining).await {
            StepStatus::Completed(result) => {
                let failed = !result.succeeded();
                if failed {
                    warn!(
                        procedure = %def.id,
                        step = index,
                        exit_code = ?result.exit_code,
                        "step failed"
                    );
                }
                steps.push(result);
                if failed {
                    if first_failure.is_none() {
                        first_failure = Some(index);
                    }
                    if step.abort_on_failure {
                        break;
                    }
                }
            }
            StepStatus::TimedOut(result) => {
                warn!(procedure = %def.id, step = index, "step killed: budget exceeded");
                steps.push(result);
                return ExecutionRecord {
                    procedure: def.id.clone(),
                    started_at,
                    steps,
                    outcome: Outcome::TimedOut,
                };
            }
        }
    }

    let outcome = match first_failure {
        Some(n) => Outcome::FailedAtStep(n),
        None => Outcome::Succeeded,
    };
    info!(procedure = %def.id, outcome = outcome.label(), "run finished");

    ExecutionRecord {
        procedure: def.id.clone(),
        started_at,
        steps,
        outcome,
    }
}

enum StepStatus {
    Completed(StepResult),
    TimedOut(StepResult),
}

async fn run_step(step: &StepDefinition, budget: Duration) -> StepStatus {
    let start = Instant::now();

    let mut cmd = Command::new("sh");
    cmd.arg("-c")
        .arg(&step.run)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = &step.workdir {
        cmd.current_dir(dir);
    }
    for (k, v) in &step.env {
        cmd.env(k, v);
    }

    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            // A step that cannot spawn is reported as that step failing,
            // not as a server error.
            return StepStatus::Completed(StepResult {
                command: step.run.clone(),
                exit_code: None,
                output: format!("failed to spawn: {e}"),
                duration: start.elapsed(),
            });
        }
    };

    // Drain both pipes into one transcript while waiting for exit.
    let transcript = Arc::new(Mutex::new(String::new()));
    let out_task = child.stdout.take().map(|s| drain_lines(s, &transcript));
    let err_task = child.stderr.take().map(|s| drain_lines(s, &transcript));

    let waited = tokio::time::timeout(budget, child.wait()).await;

    let (exit_code, timed_out) = match waited {
        Ok(Ok(status)) => (status.code(), false),
        Ok(Err(e)) => {
            append_line(&transcript, &format!("wait failed: {e}"));
            (None, false)
        }
        Err(_) => {
            let _ = child.kill().await;
            (None, true)
        }
    };

    // Killing the child closes the pipes, so the drain tasks terminate.
    if let Some(t) = out_task {
        let _ = t.await;
    }
    if let Some(t) = err_task {
        let _ = t.await;
    }

    let output = transcript.lock().map(|b| b.clone()).unwrap_or_default();
    let result = StepResult {
        command: step.run.clone(),
        exit_code,
        output,
        duration: start.elapsed(),
    };

    if timed_out {
        StepStatus::TimedOut(result)
    } else {
        StepStatus::Completed(result)
    }
}

fn drain_lines(
    stream: impl AsyncRead + Unpin + Send + 'static,
    buf: &Arc<Mutex<String>>,
) -> tokio::task::JoinHandle<()> {
    let buf = Arc::clone(buf);
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            append_line(&buf, &line);
        }
    })
}

fn append_line(buf: &Arc<Mutex<String>>, line: &str) {
    if let Ok(mut b) = buf.lock() {
        if !b.is_empty() {
            b.push('\n');
        }
        b.push_str(line);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::procedure::BusyPolicy;

    fn proc_with(id: &str, timeout_secs: u64, steps: Vec<StepDefinition>) -> ProcedureDefinition {
        ProcedureDefinition {
            id: id.into(),
            timeout_secs,
            on_busy: BusyPolicy::Reject,
            steps,
        }
    }

    #[tokio::test]
    async fn all_steps_passing_yields_succeeded() {
        let def = proc_with(
            "deploy",
            30,
            vec![
                StepDefinition::shell("echo fetch-config"),
                StepDefinition::shell("echo restart-service"),
            ],
        );

        let record = run(&def).await;
        assert_eq!(record.outcome, Outcome::Succeeded);
        assert_eq!(record.steps.len(), 2);
        assert_eq!(record.steps[0].output, "fetch-config");
        assert_eq!(record.steps[1].output, "restart-service");
        assert!(record.failed_step().is_none());
    }

    #[tokio::test]
    async fn abort_on_failure_skips_remaining_steps() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("ran-step-2");
        let def = proc_with(
            "deploy",
            30,
            vec![
                StepDefinition::shell("echo fetch failed >&2; exit 1"),
                StepDefinition::shell(format!("touch {}", marker.display())),
            ],
        );

        let record = run(&def).await;
        assert_eq!(record.outcome, Outcome::FailedAtStep(0));
        assert_eq!(record.steps.len(), 1);
        assert_eq!(record.steps[0].exit_code, Some(1));
        assert!(record.failed_step().unwrap().output.contains("fetch failed"));
        assert!(!marker.exists(), "step 2 must not run after step 1 fails");
    }

    #[tokio::test]
    async fn non_abort_failure_continues_but_is_attributed() {
        let mut lenient = StepDefinition::shell("exit 3");
        lenient.abort_on_failure = false;
        let def = proc_with(
            "deploy",
            30,
            vec![lenient, StepDefinition::shell("echo still-ran")],
        );

        let record = run(&def).await;
        assert_eq!(record.outcome, Outcome::FailedAtStep(0));
        assert_eq!(record.steps.len(), 2);
        assert_eq!(record.steps[1].output, "still-ran");
    }

    #[tokio::test]
    async fn stderr_is_captured_in_transcript() {
        let def = proc_with(
            "deploy",
            30,
            vec![StepDefinition::shell("echo out; echo err >&2")],
        );

        let record = run(&def).await;
        assert!(record.steps[0].output.contains("out"));
        assert!(record.steps[0].output.contains("err"));
    }

    #[tokio::test]
    async fn deadline_kills_the_step_and_marks_timed_out() {
        let def = proc_with("deploy", 1, vec![StepDefinition::shell("sleep 30")]);

        let start = Instant::now();
        let record = run(&def).await;
        assert_eq!(record.outcome, Outcome::TimedOut);
        assert_eq!(record.outcome.label(), "timed-out");
        assert_eq!(record.steps[0].exit_code, None);
        assert!(
            start.elapsed() < Duration::from_secs(5),
            "the child must be killed at the deadline, not awaited"
        );
    }

    #[tokio::test]
    async fn timeout_stops_later_steps() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("ran-step-2");
        let def = proc_with(
            "deploy",
            1,
            vec![
                StepDefinition::shell("sleep 30"),
                StepDefinition::shell(format!("touch {}", marker.display())),
            ],
        );

        let record = run(&def).await;
        assert_eq!(record.outcome, Outcome::TimedOut);
        assert!(!marker.exists());
    }

    #[test]
    fn timeout_after_a_clean_step_attributes_no_step_output() {
        // A budget exhausted between steps leaves only succeeded steps in
        // the record; their output must not be reported as the failure.
        let record = ExecutionRecord {
            procedure: "deploy".into(),
            started_at: Utc::now(),
            steps: vec![StepResult {
                command: "echo fetch-config".into(),
                exit_code: Some(0),
                output: "fetch-config".into(),
                duration: Duration::from_secs(1),
            }],
            outcome: Outcome::TimedOut,
        };
        assert!(record.failed_step().is_none());
    }

    #[test]
    fn timeout_during_a_step_attributes_the_killed_step() {
        let record = ExecutionRecord {
            procedure: "deploy".into(),
            started_at: Utc::now(),
            steps: vec![StepResult {
                command: "sleep 30".into(),
                exit_code: None,
                output: "partial".into(),
                duration: Duration::from_secs(1),
            }],
            outcome: Outcome::TimedOut,
        };
        assert_eq!(record.failed_step().unwrap().output, "partial");
    }

    #[tokio::test]
    async fn unspawnable_command_reports_step_failure() {
        let mut step = StepDefinition::shell("echo unused");
        step.workdir = Some("/nonexistent/workdir".into());
        let def = proc_with("deploy", 30, vec![step]);

        let record = run(&def).await;
        assert_eq!(record.outcome, Outcome::FailedAtStep(0));
        assert!(record.steps[0].output.contains("failed to spawn"));
    }

    #[tokio::test]
    async fn step_env_and_workdir_are_applied() {
        let dir = tempfile::tempdir().unwrap();
        let mut step = StepDefinition::shell("echo \"$DEPLOY_TARGET in $(pwd)\"");
        step.workdir = Some(dir.path().to_path_buf());
        step.env.insert("DEPLOY_TARGET".into(), "staging".into());
        let def = proc_with("deploy", 30, vec![step]);

        let record = run(&def).await;
        assert_eq!(record.outcome, Outcome::Succeeded);
        assert!(record.steps[0].output.contains("staging"));
        // Canonicalized tempdir paths can differ (e.g. /private on macOS),
        // so only assert the env var made it through.
    }
}

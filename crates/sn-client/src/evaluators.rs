//! Concrete evaluation collaborators.
//!
//! The interesting one is [`ProcessEvaluator`], which runs the user's
//! training or benchmarking command as a subprocess with a one-line JSON
//! exchange: the candidate goes in on stdin, the score comes back on
//! stdout.  [`FnEvaluator`] adapts a plain closure, mainly for embedders
//! and tests.

use std::process::Stdio;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tracing::debug;

use sn_types::{Candidate, EvalError, Evaluator, ParamSet};

/// Adapts a closure into an [`Evaluator`].
pub struct FnEvaluator<F> {
    f: F,
}

impl<F> FnEvaluator<F>
where
    F: FnMut(&Candidate) -> Result<Vec<f64>, EvalError> + Send,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F> Evaluator for FnEvaluator<F>
where
    F: FnMut(&Candidate) -> Result<Vec<f64>, EvalError> + Send,
{
    async fn evaluate(&mut self, candidate: &Candidate) -> Result<Vec<f64>, EvalError> {
        (self.f)(candidate)
    }
}

/// Request line written to the objective command's stdin.
#[derive(Debug, Serialize)]
struct EvalRequest<'a> {
    id: u64,
    params: &'a ParamSet,
}

/// Response line expected on the objective command's stdout.
#[derive(Debug, Deserialize)]
struct EvalResponse {
    #[serde(default)]
    values: Option<Vec<f64>>,
    #[serde(default)]
    error: Option<String>,
}

/// Runs the user's objective command once per candidate.
///
/// The command is executed through `sh -c`, receives one JSON line on
/// stdin (`{"id":…,"params":{…}}`) and must print one JSON line on stdout:
/// either `{"values":[…]}` or `{"error":"…"}`.  A command that cannot be
/// spawned at all is a non-recoverable environment fault.
pub struct ProcessEvaluator {
    command: String,
}

impl ProcessEvaluator {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

#[async_trait]
impl Evaluator for ProcessEvaluator {
    async fn evaluate(&mut self, candidate: &Candidate) -> Result<Vec<f64>, EvalError> {
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                EvalError::fatal(
                    candidate.id,
                    format!("cannot spawn objective command `{}`: {e}", self.command),
                )
            })?;

        let request = serde_json::to_string(&EvalRequest {
            id: candidate.id,
            params: &candidate.params,
        })
        .map_err(|e| EvalError::recoverable(candidate.id, format!("request encoding: {e}")))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(format!("{request}\n").as_bytes())
                .await
                .map_err(|e| {
                    EvalError::recoverable(candidate.id, format!("objective stdin: {e}"))
                })?;
            // Closing stdin lets `read line`-style objectives proceed.
            drop(stdin);
        }

        let stdout = child.stdout.take();
        let reply = match stdout {
            Some(out) => BufReader::new(out)
                .lines()
                .next_line()
                .await
                .map_err(|e| {
                    EvalError::recoverable(candidate.id, format!("objective stdout: {e}"))
                })?,
            None => None,
        };

        let mut stderr = String::new();
        if let Some(mut pipe) = child.stderr.take() {
            let _ = pipe.read_to_string(&mut stderr).await;
        }
        let status = child.wait().await.map_err(|e| {
            EvalError::recoverable(candidate.id, format!("objective wait: {e}"))
        })?;
        debug!(candidate = candidate.id, status = ?status.code(), "objective command finished");

        let Some(line) = reply else {
            return Err(EvalError::recoverable(
                candidate.id,
                format!(
                    "objective produced no output (exit {:?}): {}",
                    status.code(),
                    stderr.trim()
                ),
            ));
        };

        let response: EvalResponse = serde_json::from_str(&line).map_err(|e| {
            EvalError::recoverable(candidate.id, format!("malformed objective reply: {e}"))
        })?;

        match (response.values, response.error) {
            (Some(values), _) if !values.is_empty() => Ok(values),
            (_, Some(error)) => Err(EvalError::recoverable(candidate.id, error)),
            _ => Err(EvalError::recoverable(
                candidate.id,
                "objective reply had neither values nor error",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sn_types::ParamValue;

    fn candidate() -> Candidate {
        let mut params = ParamSet::new();
        params.insert("lr".into(), ParamValue::Float(0.01));
        Candidate::new(42, params)
    }

    #[tokio::test]
    async fn fn_evaluator_passes_through() {
        let mut eval = FnEvaluator::new(|c: &Candidate| Ok(vec![c.id as f64]));
        let values = eval.evaluate(&candidate()).await.unwrap();
        assert_eq!(values, vec![42.0]);
    }

    #[tokio::test]
    async fn process_evaluator_reads_score_line() {
        // Objective that echoes a fixed score regardless of input.
        let mut eval = ProcessEvaluator::new(r#"read line; echo '{"values":[0.75]}'"#);
        let values = eval.evaluate(&candidate()).await.unwrap();
        assert_eq!(values, vec![0.75]);
    }

    #[tokio::test]
    async fn process_evaluator_sees_candidate_on_stdin() {
        // Objective that extracts the candidate id back out of the request.
        let mut eval = ProcessEvaluator::new(
            r#"read line; printf '{"values":[%s]}\n' "$(printf %s "$line" | sed 's/.*"id"://;s/,.*//')""#,
        );
        let values = eval.evaluate(&candidate()).await.unwrap();
        assert_eq!(values, vec![42.0]);
    }

    #[tokio::test]
    async fn objective_error_is_recoverable() {
        let mut eval = ProcessEvaluator::new(r#"read line; echo '{"error":"diverged"}'"#);
        let err = eval.evaluate(&candidate()).await.unwrap_err();
        assert!(!err.fatal);
        assert!(err.message.contains("diverged"));
    }

    #[tokio::test]
    async fn silent_objective_is_recoverable_with_stderr_context() {
        let mut eval = ProcessEvaluator::new("echo oom >&2; exit 7");
        let err = eval.evaluate(&candidate()).await.unwrap_err();
        assert!(!err.fatal);
        assert!(err.message.contains("oom"), "message: {}", err.message);
    }
}

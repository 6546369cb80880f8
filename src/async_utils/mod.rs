//! Asynchronous utilities for use with Tokio.

use std::pin::Pin;

use tokio::task::JoinHandle;

use crate::prelude::*;

/// A type alias for a boxed future. This is used to make it easier to work with
/// with complex futures.
pub type BoxedFuture<Output> = Pin<Box<dyn Future<Output = Output> + Send>>;

/// A handle for one or more background workers. This can be awaited
/// to wait for all workers to complete normally.
pub struct JoinWorker {
    /// The task handle.
    future: BoxedFuture<Result<()>>,
}

impl JoinWorker {
    /// Create a new worker handle from a [`JoinHandle`].
    pub fn from_handle(handle: JoinHandle<Result<()>>) -> Self {
        Self {
            future: Box::pin(async move { handle.await.context("could not join task")? }),
        }
    }

    /// Combine two workers into one, which completes when both have. The
    /// first error wins, but we always wait for both.
    pub fn and(self, other: JoinWorker) -> Self {
        Self {
            future: Box::pin(async move {
                let (first, second) = tokio::join!(self.join(), other.join());
                first.and(second)
            }),
        }
    }

    /// Wait for the worker to complete.
    pub async fn join(self) -> Result<()> {
        self.future.await
    }
}

/// Report any command failures, and include any error output.
///
/// The output of standard error and standard output will be logged at
/// appropriate levels. Lines of standard error may optionally be checked with
/// `is_error_line` to catch tools that report errors but exit successfully.
pub fn check_for_command_failure(
    command_name: &str,
    output: &std::process::Output,
    is_error_line: Option<fn(&str) -> bool>,
) -> Result<()> {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    trace!(
        command_name = command_name,
        output = %stdout,
        "Standard output from command"
    );
    if !stderr.trim().is_empty() {
        warn!(
            command_name = command_name,
            output = %stderr,
            "Standard error from command",
        );
    }

    if output.status.success() {
        match is_error_line {
            Some(is_error_line) if stderr.lines().any(is_error_line) => Err(anyhow!(
                "{} printed error output:\n{}",
                command_name,
                stderr,
            )),
            _ => Ok(()),
        }
    } else if let Some(exit_code) = output.status.code() {
        Err(anyhow!(
            "{} failed with exit code {} and error output:\n{}",
            command_name,
            exit_code,
            stderr,
        ))
    } else {
        Err(anyhow!(
            "{} failed with error output:\n{}",
            command_name,
            stderr,
        ))
    }
}

/// Wrapper around [`tokio::task::spawn_blocking`] that propagates panics from
/// the background task.
pub async fn spawn_blocking_propagating_panics<F, T>(f: F) -> T
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(value) => value,
        Err(err) => std::panic::resume_unwind(err.into_panic()),
    }
}

#[cfg(test)]
mod tests {
    use std::process::Command;

    use super::*;

    #[tokio::test]
    async fn join_worker_waits_for_both_and_reports_errors() {
        let ok = JoinWorker::from_handle(tokio::spawn(async { Ok(()) }));
        let failed =
            JoinWorker::from_handle(tokio::spawn(async { Err(anyhow!("worker failed")) }));
        let err = ok.and(failed).join().await.unwrap_err();
        assert_eq!(err.to_string(), "worker failed");
    }

    fn mentions_error(line: &str) -> bool {
        line.contains("Error")
    }

    #[test]
    #[cfg(unix)]
    fn command_failures_are_reported() {
        let output = Command::new("sh")
            .arg("-c")
            .arg("echo 'Syntax Error: bad' >&2")
            .output()
            .unwrap();
        assert!(check_for_command_failure("sh", &output, None).is_ok());
        assert!(check_for_command_failure("sh", &output, Some(mentions_error)).is_err());

        let output = Command::new("sh").arg("-c").arg("exit 3").output().unwrap();
        let err = check_for_command_failure("sh", &output, None).unwrap_err();
        assert!(err.to_string().contains("exit code 3"));
    }
}

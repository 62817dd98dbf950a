//! Script runner tests: timeouts, cancellation and streaming

use std::time::Duration;

use tokio::sync::{mpsc, watch};

use deployd::deploy::runner::{OutputStream, RunOptions, RunStatus, ScriptRunner};
use deployd::errors::OrchestratorError;

#[tokio::test]
async fn test_runner_times_out() {
    let runner = ScriptRunner::default();
    let output = runner
        .run("sleep 5", RunOptions::new(Duration::from_millis(200)))
        .await
        .unwrap();

    assert_eq!(output.status, RunStatus::TimedOut);
    assert_eq!(output.exit_code(), None);
    assert!(output.duration < Duration::from_secs(5));
    assert!(matches!(
        output.check("deploy script"),
        Err(OrchestratorError::Timeout(_))
    ));
}

#[tokio::test]
async fn test_runner_cancel_kills_process() {
    let runner = ScriptRunner::default();
    let (cancel_tx, cancel_rx) = watch::channel(false);

    let mut options = RunOptions::new(Duration::from_secs(30));
    options.cancel = Some(cancel_rx);

    let run = tokio::spawn(async move { runner.run("echo started; sleep 10", options).await });
    tokio::time::sleep(Duration::from_millis(200)).await;
    cancel_tx.send(true).unwrap();

    let output = run.await.unwrap().unwrap();
    assert_eq!(output.status, RunStatus::Cancelled);
    assert!(output.stdout.contains("started"));
    assert!(output.duration < Duration::from_secs(10));
    assert!(matches!(
        output.check("build script"),
        Err(OrchestratorError::Cancelled(_))
    ));
}

#[tokio::test]
async fn test_runner_streams_lines() {
    let runner = ScriptRunner::default();
    let (tx, mut rx) = mpsc::unbounded_channel();

    let mut options = RunOptions::new(Duration::from_secs(10));
    options.output = Some(tx);

    let output = runner
        .run("echo one; echo two >&2; echo three", options)
        .await
        .unwrap();
    assert!(output.success());

    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    while let Ok(line) = rx.try_recv() {
        match line.stream {
            OutputStream::Stdout => stdout.push(line.text),
            OutputStream::Stderr => stderr.push(line.text),
        }
    }
    assert_eq!(stdout, vec!["one", "three"]);
    assert_eq!(stderr, vec!["two"]);
}

#[tokio::test]
async fn test_runner_nonzero_exit_is_execution_error() {
    let runner = ScriptRunner::default();
    let output = runner
        .run("echo broken >&2; exit 7", RunOptions::new(Duration::from_secs(10)))
        .await
        .unwrap();

    assert_eq!(output.exit_code(), Some(7));
    assert!(output.combined().contains("broken"));
    let err = output.check("deploy script").unwrap_err();
    assert!(matches!(err, OrchestratorError::ExecutionError(_)));
    assert!(err.to_string().contains("code 7"));
}

#[tokio::test]
async fn test_runner_missing_shell_fails_to_start() {
    let runner = ScriptRunner::new("/nonexistent/shell");
    let result = runner
        .run("true", RunOptions::new(Duration::from_secs(1)))
        .await;
    assert!(matches!(result, Err(OrchestratorError::ExecutionError(_))));
}

use std::time::{Duration, Instant};

use coderun::types::TIMEOUT_STATUS;
use coderun::{Pipeline, PipelineResult};

use super::shell_config;

#[tokio::test]
async fn test_run_script() {
    let root = tempfile::tempdir().unwrap();
    let pipeline = Pipeline::new(shell_config(root.path()));

    let result = pipeline
        .run(b"read name\necho \"Hello, $name!\"\nexit 5\n", b"World\n")
        .await
        .expect("pipeline failed");

    assert_eq!(
        result,
        PipelineResult::Completed {
            exit_status: 5,
            timed_out: false,
            output: b"Hello, World!\n".to_vec(),
        }
    );
}

#[tokio::test]
async fn test_syntax_error_is_compile_failure() {
    let root = tempfile::tempdir().unwrap();
    let pipeline = Pipeline::new(shell_config(root.path()));

    let result = pipeline
        .run(b"echo never > ran\nif then fi (\n", b"")
        .await
        .expect("pipeline failed");

    let PipelineResult::CompileFailed { output } = result else {
        panic!("expected compile failure, got {result:?}");
    };
    assert!(!output.is_empty());
}

#[tokio::test]
async fn test_run_timeout() {
    let root = tempfile::tempdir().unwrap();
    let pipeline = Pipeline::new(shell_config(root.path()));

    let start = Instant::now();
    let result = pipeline
        .run(b"echo looping\nwhile :; do :; done\n", b"")
        .await
        .expect("pipeline failed");

    assert_eq!(
        result,
        PipelineResult::Completed {
            exit_status: TIMEOUT_STATUS,
            timed_out: true,
            output: b"looping\n".to_vec(),
        }
    );
    // Run timeout is one second
    assert!(start.elapsed() < Duration::from_secs(4));
}

#[tokio::test]
async fn test_run_environment_is_minimal() {
    let root = tempfile::tempdir().unwrap();
    let pipeline = Pipeline::new(shell_config(root.path()));

    let result = pipeline
        .run(b"echo \"$PATH|$HOME\"\n", b"")
        .await
        .expect("pipeline failed");
    assert_eq!(result.output(), b"/usr/bin:/bin|\n");
}

#[tokio::test]
async fn test_run_limits_applied() {
    let root = tempfile::tempdir().unwrap();
    let pipeline = Pipeline::new(shell_config(root.path()));

    let result = pipeline
        .run(b"ulimit -n\nulimit -t\n", b"")
        .await
        .expect("pipeline failed");
    assert_eq!(result.output(), b"64\n2\n");
}

#[tokio::test]
async fn test_workspaces_are_cleaned_up() {
    let root = tempfile::tempdir().unwrap();
    let pipeline = Pipeline::new(shell_config(root.path()));

    pipeline.run(b"echo hi\n", b"").await.unwrap();
    pipeline.run(b"if\n", b"").await.unwrap();

    let scratch = root.path().join("scratch");
    assert_eq!(std::fs::read_dir(scratch).unwrap().count(), 0);
}

#[tokio::test]
async fn test_concurrent_submissions() {
    let root = tempfile::tempdir().unwrap();
    let pipeline = Pipeline::new(shell_config(root.path()));

    let handles: Vec<_> = (0..6)
        .map(|i| {
            let pipeline = pipeline.clone();
            tokio::spawn(async move {
                let source = format!("sleep 0.1\necho {i}\n");
                pipeline.run(source.as_bytes(), b"").await
            })
        })
        .collect();

    for (i, handle) in handles.into_iter().enumerate() {
        let result = handle.await.unwrap().expect("pipeline failed");
        assert_eq!(result.output(), format!("{i}\n").as_bytes());
    }
}

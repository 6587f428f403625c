//! End-to-end runs with the default C++ toolchain

use std::path::Path;
use std::time::{Duration, Instant};

use coderun::config::Config;
use coderun::types::TIMEOUT_STATUS;
use coderun::{Pipeline, PipelineResult};

use super::fixture_source;

fn cpp_pipeline(root: &Path) -> Pipeline {
    let mut config = Config::default();
    config.scratch_dir = Some(root.to_path_buf());
    Pipeline::new(config)
}

#[tokio::test]
async fn test_hello_world() {
    let root = tempfile::tempdir().unwrap();
    let result = cpp_pipeline(root.path())
        .run(&fixture_source("hello.cpp"), b"")
        .await
        .expect("pipeline failed");

    assert_eq!(
        result,
        PipelineResult::Completed {
            exit_status: 0,
            timed_out: false,
            output: b"Hello, World!\n".to_vec(),
        }
    );
}

#[tokio::test]
async fn test_echo_stdin() {
    let root = tempfile::tempdir().unwrap();
    let result = cpp_pipeline(root.path())
        .run(&fixture_source("echo.cpp"), b"first line\nsecond line\n")
        .await
        .expect("pipeline failed");

    assert_eq!(result.output(), b"first line\nsecond line\n");
}

#[tokio::test]
async fn test_exit_code() {
    let root = tempfile::tempdir().unwrap();
    let result = cpp_pipeline(root.path())
        .run(&fixture_source("exit_code.cpp"), b"")
        .await
        .expect("pipeline failed");

    assert!(matches!(
        result,
        PipelineResult::Completed {
            exit_status: 42,
            timed_out: false,
            ..
        }
    ));
}

#[tokio::test]
async fn test_compile_error() {
    let root = tempfile::tempdir().unwrap();
    let result = cpp_pipeline(root.path())
        .run(&fixture_source("compile_error.cpp"), b"")
        .await
        .expect("pipeline failed");

    let PipelineResult::CompileFailed { output } = result else {
        panic!("expected compile failure, got {result:?}");
    };
    let output = String::from_utf8_lossy(&output);
    assert!(output.contains("error"), "{output}");
}

#[tokio::test]
async fn test_infinite_loop_times_out() {
    let root = tempfile::tempdir().unwrap();
    let pipeline = cpp_pipeline(root.path());

    let start = Instant::now();
    let result = pipeline
        .run(&fixture_source("infinite_loop.cpp"), b"")
        .await
        .expect("pipeline failed");

    assert_eq!(
        result,
        PipelineResult::Completed {
            exit_status: TIMEOUT_STATUS,
            timed_out: true,
            output: Vec::new(),
        }
    );
    // Compile time plus the two second run deadline
    assert!(start.elapsed() < Duration::from_secs(15));
}

#[tokio::test]
async fn test_memory_hog_is_stopped() {
    let root = tempfile::tempdir().unwrap();
    let result = cpp_pipeline(root.path())
        .run(&fixture_source("memory_hog.cpp"), b"")
        .await
        .expect("pipeline failed");

    let PipelineResult::Completed {
        exit_status,
        timed_out,
        output,
    } = result
    else {
        panic!("expected completion, got {result:?}");
    };

    // Either malloc fails under the address space limit, or the allocator aborts
    assert!(!timed_out);
    assert_ne!(exit_status, 0);
    assert!(!String::from_utf8_lossy(&output).contains("allocated everything"));
}

#[tokio::test]
async fn test_segfault() {
    let root = tempfile::tempdir().unwrap();
    let result = cpp_pipeline(root.path())
        .run(&fixture_source("segfault.cpp"), b"")
        .await
        .expect("pipeline failed");

    assert!(matches!(
        result,
        PipelineResult::Completed {
            exit_status: 139,
            timed_out: false,
            ..
        }
    ));
}

#[tokio::test]
async fn test_stderr_is_merged() {
    let root = tempfile::tempdir().unwrap();
    let result = cpp_pipeline(root.path())
        .run(&fixture_source("stderr_output.cpp"), b"")
        .await
        .expect("pipeline failed");

    assert_eq!(result.output(), b"out\nerr\nout again\n");
}

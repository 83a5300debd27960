//! End-to-end execution lifecycle tests against a real `python3` worker.
//!
//! Each test skips itself when `python3` is not on `PATH`.

use execbox_integration_tests::{require_python, test_config};
use execbox_sandbox::{
    ExecutionRequest, ExecutionService, ExecutionStatus, FailureKind, RetentionSweeper,
    SandboxError,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

fn service() -> ExecutionService {
    ExecutionService::new(&test_config()).unwrap()
}

async fn wait_terminal(service: &ExecutionService, id: &execbox_sandbox::ExecutionId) {
    let deadline = Instant::now() + Duration::from_secs(20);
    while !service.status(id).unwrap().completed {
        assert!(Instant::now() < deadline, "execution {} never finished", id);
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[tokio::test]
async fn test_hello_world() {
    if !require_python("test_hello_world") {
        return;
    }
    let result = service()
        .execute(ExecutionRequest::new("print('Hello, World!')"))
        .await
        .unwrap();
    assert!(result.success);
    assert_eq!(result.output, "Hello, World!\n");
    assert!(result.error.is_none());
    assert!(result.elapsed > Duration::ZERO);
}

#[tokio::test]
async fn test_runtime_error_reports_traceback() {
    if !require_python("test_runtime_error_reports_traceback") {
        return;
    }
    let result = service()
        .execute(ExecutionRequest::new(
            "print('before')\nraise ValueError('This is a test error')",
        ))
        .await
        .unwrap();
    assert!(!result.success);
    assert_eq!(result.failure, Some(FailureKind::Runtime));
    let error = result.error.unwrap();
    assert!(error.contains("ValueError: This is a test error"));
    assert!(!error.contains("bootstrap"));
}

#[tokio::test]
async fn test_timeout_names_limit() {
    if !require_python("test_timeout_names_limit") {
        return;
    }
    let started = std::time::Instant::now();
    let result = service()
        .execute(
            ExecutionRequest::new("import time\ntime.sleep(10)")
                .with_timeout(Duration::from_secs(1)),
        )
        .await
        .unwrap();
    assert!(!result.success);
    assert_eq!(result.failure, Some(FailureKind::Timeout));
    assert_eq!(
        result.error.as_deref(),
        Some("Execution timed out after 1 seconds")
    );
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_blocked_import_never_spawns() {
    let service = service();
    let result = service
        .execute(ExecutionRequest::new("import subprocess\nsubprocess.run(['ls'])"))
        .await
        .unwrap();
    assert!(!result.success);
    assert_eq!(result.failure, Some(FailureKind::Validation));
    assert_eq!(
        result.error.as_deref(),
        Some("Code validation error: Blocked import detected: subprocess")
    );
    assert!(result.elapsed < Duration::from_secs(1));
    assert_eq!(service.probe().active_executions, 0);
}

#[tokio::test]
async fn test_async_stop() {
    if !require_python("test_async_stop") {
        return;
    }
    let service = service();
    let id = service
        .submit(ExecutionRequest::new("import time\ntime.sleep(30)"))
        .unwrap();
    assert_eq!(service.status(&id).unwrap().status, ExecutionStatus::Running);
    assert!(matches!(
        service.result(&id).unwrap_err(),
        SandboxError::InProgress(_)
    ));

    tokio::time::sleep(Duration::from_millis(300)).await;
    let report = service.stop(&id).unwrap();
    assert!(report.success);
    assert_eq!(report.message, "Execution stopped");

    let status = service.status(&id).unwrap();
    assert_eq!(status.status, ExecutionStatus::Stopped);
    assert!(status.completed);

    // Stopping again still succeeds and changes nothing.
    assert!(service.stop(&id).unwrap().success);
    assert_eq!(service.status(&id).unwrap().status, ExecutionStatus::Stopped);

    let result = service.result(&id).unwrap();
    assert!(!result.success);
    assert_eq!(result.failure, Some(FailureKind::Stopped));

    // The supervisor must not overwrite the stop once it reaps the worker.
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(service.status(&id).unwrap().status, ExecutionStatus::Stopped);
    assert_eq!(service.probe().active_executions, 0);
}

#[tokio::test]
async fn test_submit_poll_result() {
    if !require_python("test_submit_poll_result") {
        return;
    }
    let service = service();
    let id = service
        .submit(ExecutionRequest::new("print(6 * 7)"))
        .unwrap();
    wait_terminal(&service, &id).await;

    let status = service.status(&id).unwrap();
    assert_eq!(status.status, ExecutionStatus::Completed);

    let result = service.result(&id).unwrap();
    assert_eq!(result.execution_id, id);
    assert_eq!(result.output, "42\n");
}

#[tokio::test]
async fn test_runs_are_isolated() {
    if !require_python("test_runs_are_isolated") {
        return;
    }
    let service = service();
    let first = service
        .execute(ExecutionRequest::new("leaked = 'secret'\nprint(leaked)"))
        .await
        .unwrap();
    assert!(first.success);

    let second = service
        .execute(ExecutionRequest::new("print(leaked)"))
        .await
        .unwrap();
    assert!(!second.success);
    assert!(second.error.unwrap().contains("NameError"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_runs_complete_independently() {
    if !require_python("test_concurrent_runs_complete_independently") {
        return;
    }
    let service = service();
    let ids: Vec<_> = (0..4)
        .map(|i| {
            service
                .submit(ExecutionRequest::new(format!(
                    "import time\ntime.sleep(0.2)\nprint({})",
                    i
                )))
                .unwrap()
        })
        .collect();

    for (i, id) in ids.iter().enumerate() {
        wait_terminal(&service, id).await;
        assert_eq!(service.result(id).unwrap().output, format!("{}\n", i));
    }
}

#[tokio::test]
async fn test_env_overrides_and_blocked_env() {
    let service = service();
    let err = service
        .submit(ExecutionRequest::new("pass").with_env("LD_PRELOAD", "/tmp/evil.so"))
        .unwrap_err();
    assert!(matches!(err, SandboxError::InvalidRequest(_)));

    if !require_python("test_env_overrides_and_blocked_env") {
        return;
    }
    let result = service
        .execute(
            ExecutionRequest::new("import os\nprint(os.environ.get('EXECBOX_MODE'))")
                .with_env("EXECBOX_MODE", "batch"),
        )
        .await
        .unwrap();
    assert_eq!(result.output, "batch\n");
}

#[tokio::test]
async fn test_unknown_id_is_not_found() {
    let service = service();
    let id = execbox_sandbox::ExecutionId::new("does-not-exist");
    assert!(service.status(&id).unwrap_err().is_not_found());
    assert!(service.result(&id).unwrap_err().is_not_found());
    assert!(service.stop(&id).unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_retention_sweep_after_real_runs() {
    if !require_python("test_retention_sweep_after_real_runs") {
        return;
    }
    let service = service();
    let done = service
        .execute(ExecutionRequest::new("print('done')"))
        .await
        .unwrap()
        .execution_id;
    let running = service
        .submit(ExecutionRequest::new("import time\ntime.sleep(30)"))
        .unwrap();

    let sweeper = RetentionSweeper::new(
        Arc::clone(service.registry()),
        Duration::from_secs(1),
        Duration::from_secs(60),
    );
    assert_eq!(sweeper.sweep_once(Instant::now()), 0);

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(sweeper.sweep_once(Instant::now()), 1);
    assert!(service.status(&done).unwrap_err().is_not_found());
    assert!(!service.status(&running).unwrap().completed);

    service.shutdown().await;
    assert_eq!(service.status(&running).unwrap().status, ExecutionStatus::Stopped);
}

#[tokio::test]
async fn test_started_service_shutdown() {
    if !require_python("test_started_service_shutdown") {
        return;
    }
    let service = ExecutionService::start(&test_config()).unwrap();
    let id = service
        .submit(ExecutionRequest::new("while True:\n    pass"))
        .unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(service.probe().active_executions, 1);

    service.shutdown().await;
    assert_eq!(service.status(&id).unwrap().status, ExecutionStatus::Stopped);
    assert_eq!(service.probe().active_executions, 0);
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_memory_limit_is_enforced() {
    if !require_python("test_memory_limit_is_enforced") {
        return;
    }
    let mut config = test_config();
    config.limits.memory_bytes = 256 * 1024 * 1024;
    let service = ExecutionService::new(&config).unwrap();
    let result = service
        .execute(ExecutionRequest::new("blob = bytearray(1024 * 1024 * 1024)"))
        .await
        .unwrap();
    assert!(!result.success);
    assert_eq!(result.failure, Some(FailureKind::ResourceLimit));
}

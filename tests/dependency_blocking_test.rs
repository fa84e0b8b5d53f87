//! Dependency Blocking Integration Test
//!
//! Seed scenario (§8 #2): `build -> deploy`, `build` exits nonzero. `deploy`
//! must never start and must carry a `dependency_failed` error.

mod common;

use tokio_util::sync::CancellationToken;

use sykli_core::target::TargetOpts;
use sykli_core::{ErrorCode, TaskStatus};

#[tokio::test]
async fn failed_build_blocks_deploy_with_dependency_failed() {
    let dir = tempfile::tempdir().unwrap();
    let g = common::graph(vec![
        serde_json::json!({ "name": "build", "command": "exit 1" }),
        serde_json::json!({ "name": "deploy", "command": "echo deployed", "depends_on": ["build"] }),
    ]);

    let scheduler = common::local_scheduler(dir.path());
    let ctx = common::run_ctx(dir.path(), 4);
    let opts = TargetOpts::default();

    let result = scheduler.run(&g, &ctx, &opts, CancellationToken::new(), None).await.unwrap();
    assert!(!result.ok);

    let build = result.tasks.iter().find(|t| t.task_name == "build").unwrap();
    let deploy = result.tasks.iter().find(|t| t.task_name == "deploy").unwrap();

    assert_eq!(build.status, TaskStatus::Failed);
    assert_eq!(build.error.as_ref().unwrap().code, ErrorCode::TaskFailed);

    assert_eq!(deploy.status, TaskStatus::Blocked);
    let deploy_error = deploy.error.as_ref().expect("blocked task carries an error");
    assert_eq!(deploy_error.code, ErrorCode::DependencyFailed);
}

#[tokio::test]
async fn on_failure_continue_only_blocks_direct_dependents() {
    let dir = tempfile::tempdir().unwrap();
    let g = common::graph(vec![
        serde_json::json!({ "name": "build", "command": "exit 1", "on_failure": "continue" }),
        serde_json::json!({ "name": "deploy", "command": "echo deployed", "depends_on": ["build"] }),
        serde_json::json!({ "name": "lint", "command": "echo lint" }),
    ]);

    let scheduler = common::local_scheduler(dir.path());
    let ctx = common::run_ctx(dir.path(), 4);
    let opts = TargetOpts::default();

    let result = scheduler.run(&g, &ctx, &opts, CancellationToken::new(), None).await.unwrap();
    let lint = result.tasks.iter().find(|t| t.task_name == "lint").unwrap();
    let deploy = result.tasks.iter().find(|t| t.task_name == "deploy").unwrap();

    assert_eq!(deploy.status, TaskStatus::Blocked);
    assert_eq!(lint.status, TaskStatus::Succeeded);
}

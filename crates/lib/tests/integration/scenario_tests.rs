//! End-to-end scan steps against local and directory-backed remote nodes.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use dynrescan_lib::console::Console;
use dynrescan_lib::node::{LocalResolver, NodeError};
use dynrescan_lib::orchestrate::{ExecutionMode, ScanError, StepStatus, Workspace};

use super::common::{CANONICAL, TestEnv, file_names, write_tool};

mod local {
  use super::*;

  #[tokio::test]
  async fn zero_exit_leaves_build_unmarked() {
    let env = TestEnv::new();
    env.stage_release("24.1.0", 0);
    let console = Console::capture();
    let step = env.orchestrator(env.config(true), LocalResolver::new("veracode"), console.clone());

    let outcome = step.perform(&Workspace::local("/ws")).await.unwrap();

    assert_eq!(outcome.status, StepStatus::Unmarked);
    assert_eq!(outcome.mode, ExecutionMode::Local);
    assert_eq!(outcome.exit_code, Some(0));
    assert!(console.contents().contains("release 24.1.0 -action DynamicRescan"));
  }

  #[tokio::test]
  async fn nonzero_exit_marks_failure() {
    let env = TestEnv::new();
    env.stage_release("24.1.0", 1);
    let console = Console::capture();
    let step = env.orchestrator(env.config(true), LocalResolver::new("veracode"), console.clone());

    let outcome = step.perform(&Workspace::local("/ws")).await.unwrap();

    assert_eq!(outcome.status, StepStatus::Failure);
    assert_eq!(outcome.exit_code, Some(1));
    assert!(console.contents().contains("Error- Returned code from wrapper:1"));
  }

  #[tokio::test]
  async fn nonzero_exit_is_advisory_without_can_fail_job() {
    let env = TestEnv::new();
    env.stage_release("24.1.0", 1);
    let step = env.orchestrator(env.config(false), LocalResolver::new("veracode"), Console::capture());

    let outcome = step.perform(&Workspace::local("/ws")).await.unwrap();

    assert_eq!(outcome.status, StepStatus::Unmarked);
  }

  #[tokio::test]
  async fn missing_engine_artifact_fails_with_can_fail_job() {
    let env = TestEnv::new();
    let step = env.orchestrator(env.config(true), LocalResolver::new("veracode"), Console::capture());

    let outcome = step.perform(&Workspace::local("/ws")).await.unwrap();

    assert_eq!(outcome.status, StepStatus::Failure);
    assert!(outcome.error.is_some());
    assert_eq!(outcome.exit_code, None);
  }
}

mod remote {
  use super::*;

  #[tokio::test]
  async fn empty_node_is_provisioned_and_scanned() {
    let env = TestEnv::new();
    env.stage_release("24.1.0", 0);
    let console = Console::capture();
    let step = env.orchestrator(env.config(true), env.resolver(&["agent-1"]), console.clone());

    let outcome = step.perform(&Workspace::remote("agent-1", "/ws")).await.unwrap();

    assert_eq!(outcome.status, StepStatus::Unmarked);
    assert_eq!(outcome.mode, ExecutionMode::Remote);
    assert_eq!(outcome.provisioned, Some(true));
    assert_eq!(outcome.exit_code, Some(0));

    let tools = env.tools_dir("agent-1");
    assert!(tools.join(CANONICAL).is_file());
    assert_eq!(
      fs::read(tools.join(CANONICAL)).unwrap(),
      fs::read(env.staging_dir().join("VeracodeJavaAPI-24.1.0.jar")).unwrap()
    );
    // Remote scans let the tool name the scan.
    let out = console.contents();
    assert!(out.contains("-autoscanname true"));
    assert!(!out.contains("-scanname"));
  }

  #[tokio::test]
  async fn offline_node_is_fatal_regardless_of_can_fail_job() {
    let env = TestEnv::new();
    env.stage_release("24.1.0", 0);
    let resolver = LocalResolver::new("veracode").with_node("agent-1", env.temp.path().join("offline"));

    for can_fail_job in [true, false] {
      let step = env.orchestrator(env.config(can_fail_job), resolver.clone(), Console::capture());

      let err = step.perform(&Workspace::remote("agent-1", "/ws")).await.unwrap_err();

      assert!(matches!(err, ScanError::NodeResolution(NodeError::Unreachable { .. })));
    }
    assert!(!env.temp.path().join("offline").exists());
  }

  #[tokio::test]
  async fn current_node_is_not_restaged_but_still_scanned() {
    let env = TestEnv::new();
    env.stage_release("24.1.0", 0);
    let tools = env.tools_dir("agent-1");
    write_tool(&tools, "VeracodeJavaAPI-24.1.0.jar", "node copy", 0);
    write_tool(&tools, CANONICAL, "node copy", 0);
    let console = Console::capture();
    let step = env.orchestrator(env.config(true), env.resolver(&["agent-1"]), console.clone());

    let outcome = step.perform(&Workspace::remote("agent-1", "/ws")).await.unwrap();

    assert_eq!(outcome.status, StepStatus::Unmarked);
    assert_eq!(outcome.provisioned, Some(true));
    assert!(console.contents().contains("node copy -action DynamicRescan"));
    assert!(!console.contents().contains("release 24.1.0"));
  }

  #[tokio::test]
  async fn older_node_copy_is_replaced() {
    let env = TestEnv::new();
    env.stage_release("24.2.0", 0);
    let tools = env.tools_dir("agent-1");
    write_tool(&tools, "VeracodeJavaAPI-23.9.1.jar", "old", 0);
    write_tool(&tools, CANONICAL, "old", 0);
    let console = Console::capture();
    let mut config = env.config(true);
    config.debug = true;
    let step = env.orchestrator(config, env.resolver(&["agent-1"]), console.clone());

    step.perform(&Workspace::remote("agent-1", "/ws")).await.unwrap();

    assert_eq!(file_names(&tools), vec!["VeracodeJavaAPI-24.2.0.jar", CANONICAL]);
    let out = console.contents();
    assert!(out.contains("Newer veracode library version, copying it to remote machine"));
    assert!(out.contains("release 24.2.0"));
  }

  #[tokio::test]
  async fn nonzero_remote_exit_marks_failure() {
    let env = TestEnv::new();
    env.stage_release("24.1.0", 2);
    let console = Console::capture();
    let step = env.orchestrator(env.config(true), env.resolver(&["agent-1"]), console.clone());

    let outcome = step.perform(&Workspace::remote("agent-1", "/ws")).await.unwrap();

    assert_eq!(outcome.status, StepStatus::Failure);
    assert_eq!(outcome.exit_code, Some(2));
    assert!(console.contents().contains("Error- Returned code from wrapper:2"));
  }

  #[tokio::test]
  async fn provisioning_failure_marks_failure_with_can_fail_job() {
    let env = TestEnv::new();
    let console = Console::capture();
    let step = env.orchestrator(env.config(true), env.resolver(&["agent-1"]), console.clone());

    let outcome = step.perform(&Workspace::remote("agent-1", "/ws")).await.unwrap();

    assert_eq!(outcome.status, StepStatus::Failure);
    assert_eq!(outcome.provisioned, Some(false));
    assert_eq!(outcome.exit_code, None);
    let out = console.contents();
    assert!(out.contains("Failed to copy the veracode java-wrapper libraries"));
    assert!(out.contains("Could not copy Veracode libs"));
  }

  #[tokio::test]
  async fn provisioning_failure_is_silent_without_can_fail_job() {
    let env = TestEnv::new();
    let console = Console::capture();
    let step = env.orchestrator(env.config(false), env.resolver(&["agent-1"]), console.clone());

    let outcome = step.perform(&Workspace::remote("agent-1", "/ws")).await.unwrap();

    assert_eq!(outcome.status, StepStatus::Unmarked);
    assert!(!console.contents().contains("Could not copy Veracode libs"));
  }

  #[tokio::test]
  async fn environment_reaches_remote_process() {
    let env = TestEnv::new();
    let staging: PathBuf = env.staging_dir();
    fs::write(staging.join("VeracodeJavaAPI-24.1.0.jar"), "echo \"job=$JOB_NAME\"\n").unwrap();
    let console = Console::capture();
    let vars = BTreeMap::from([("JOB_NAME".to_string(), "shop/storefront".to_string())]);
    let step = env
      .orchestrator(env.config(true), env.resolver(&["agent-1"]), console.clone())
      .with_env(vars);

    step.perform(&Workspace::remote("agent-1", "/ws")).await.unwrap();

    assert!(console.contents().contains("job=shop/storefront"));
  }

  #[tokio::test]
  async fn debug_echo_never_shows_credentials() {
    let env = TestEnv::new();
    env.stage_release("24.1.0", 0);
    let console = Console::capture();
    let mut config = env.config(true);
    config.debug = true;
    let step = env.orchestrator(config, env.resolver(&["agent-1"]), console.clone());

    step.perform(&Workspace::remote("agent-1", r"D:\ws\shop")).await.unwrap();

    let out = console.contents();
    assert!(out.contains("Processing files in [remote] workspace: "));
    assert!(out.contains("D:/ws/shop"));
    assert!(out.contains("Making remote dir"));
    assert!(out.contains("Invoking the following command in remote workspace:"));
    assert!(out.contains("-vkey '********'") || out.contains("-vkey ********"));
    // The tool itself prints its real arguments; only the echo is masked.
    let echo = out
      .lines()
      .skip_while(|l| !l.starts_with("Invoking the following command"))
      .nth(1)
      .unwrap();
    assert!(!echo.contains("api-key"));
  }

  #[tokio::test]
  async fn interrupt_kills_the_scan() {
    let env = TestEnv::new();
    fs::write(env.staging_dir().join("VeracodeJavaAPI-24.1.0.jar"), "sleep 30\n").unwrap();
    let step = env.orchestrator(env.config(false), env.resolver(&["agent-1"]), Console::capture());

    let started = std::time::Instant::now();
    let err = step
      .perform_until(
        &Workspace::remote("agent-1", "/ws"),
        tokio::time::sleep(std::time::Duration::from_millis(300)),
      )
      .await
      .unwrap_err();

    assert!(matches!(err, ScanError::Interrupted));
    assert!(started.elapsed() < std::time::Duration::from_secs(20));
  }
}

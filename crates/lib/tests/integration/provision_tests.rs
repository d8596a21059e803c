//! Provisioning against directory-backed nodes.

use std::fs;

use dynrescan_lib::artifact::ArtifactFilter;
use dynrescan_lib::console::Console;
use dynrescan_lib::node::{ExecutionTarget, LocalTarget};
use dynrescan_lib::provision::{Provisioned, Provisioner};
use dynrescan_lib::version::ArtifactVersion;

use super::common::{CANONICAL, TestEnv, file_names, write_tool};

fn setup(env: &TestEnv) -> (Provisioner, LocalTarget) {
  let provisioner = Provisioner::new(env.staging_dir(), ArtifactFilter::new(".jar"));
  let target = LocalTarget::mounted("agent-1", &env.tools_dir("agent-1"));
  (provisioner, target)
}

fn version(s: &str) -> ArtifactVersion {
  dynrescan_lib::version::extract_version(&format!("VeracodeJavaAPI-{}.jar", s)).unwrap()
}

#[tokio::test]
async fn second_call_is_a_no_op() {
  let env = TestEnv::new();
  env.stage_release("24.1.0", 0);
  let (provisioner, target) = setup(&env);
  let console = Console::capture();

  let first = provisioner.provision(&target, &console).await.unwrap();
  assert_eq!(
    first,
    Provisioned::Fresh {
      version: version("24.1.0")
    }
  );

  let canonical = env.tools_dir("agent-1").join(CANONICAL);
  let before = fs::metadata(&canonical).unwrap().modified().unwrap();

  let second = provisioner.provision(&target, &console).await.unwrap();
  assert_eq!(
    second,
    Provisioned::Current {
      version: version("24.1.0")
    }
  );
  assert_eq!(fs::metadata(&canonical).unwrap().modified().unwrap(), before);
  assert!(provisioner.ensure(&target, &console, true).await);
}

#[tokio::test]
async fn newer_release_removes_every_old_file() {
  let env = TestEnv::new();
  env.stage_release("24.2.0", 0);
  let tools = env.tools_dir("agent-1");
  write_tool(&tools, "VeracodeJavaAPI-23.1.0.jar", "old", 0);
  write_tool(&tools, "VeracodeJavaAPI-23.9.0.jar", "old", 0);
  fs::create_dir_all(tools.join("logs")).unwrap();
  let (provisioner, target) = setup(&env);

  let outcome = provisioner.provision(&target, &Console::capture()).await.unwrap();

  assert_eq!(
    outcome,
    Provisioned::Upgraded {
      from: version("23.9.0"),
      to: version("24.2.0"),
    }
  );
  assert_eq!(file_names(&tools), vec!["VeracodeJavaAPI-24.2.0.jar", CANONICAL]);
}

#[tokio::test]
async fn newer_node_copy_is_kept() {
  let env = TestEnv::new();
  env.stage_release("24.1.0", 0);
  let tools = env.tools_dir("agent-1");
  write_tool(&tools, "VeracodeJavaAPI-25.0.0.jar", "newer", 0);
  write_tool(&tools, CANONICAL, "newer", 0);
  let (provisioner, target) = setup(&env);

  let outcome = provisioner.provision(&target, &Console::capture()).await.unwrap();

  assert_eq!(
    outcome,
    Provisioned::Current {
      version: version("25.0.0")
    }
  );
  assert_eq!(file_names(&tools), vec!["VeracodeJavaAPI-25.0.0.jar", CANONICAL]);
}

#[tokio::test]
async fn missing_canonical_is_republished() {
  let env = TestEnv::new();
  env.stage_release("24.1.0", 0);
  let tools = env.tools_dir("agent-1");
  write_tool(&tools, "VeracodeJavaAPI-24.1.0.jar", "node copy", 0);
  let (provisioner, target) = setup(&env);
  let console = Console::capture();

  let outcome = provisioner.provision(&target, &console).await.unwrap();

  assert_eq!(
    outcome,
    Provisioned::Repaired {
      version: version("24.1.0")
    }
  );
  assert_eq!(file_names(&tools), vec!["VeracodeJavaAPI-24.1.0.jar", CANONICAL]);
  assert_eq!(
    fs::read(tools.join(CANONICAL)).unwrap(),
    fs::read(tools.join("VeracodeJavaAPI-24.1.0.jar")).unwrap()
  );

  let again = provisioner.provision(&target, &console).await.unwrap();
  assert_eq!(
    again,
    Provisioned::Current {
      version: version("24.1.0")
    }
  );
  assert!(provisioner.ensure(&target, &console, true).await);
}

#[tokio::test]
async fn unparseable_node_copy_counts_as_lowest() {
  let env = TestEnv::new();
  env.stage_release("1.0", 0);
  let tools = env.tools_dir("agent-1");
  write_tool(&tools, "wrapper.jar", "unversioned", 0);
  let (provisioner, target) = setup(&env);

  let outcome = provisioner.provision(&target, &Console::capture()).await.unwrap();

  assert!(matches!(outcome, Provisioned::Upgraded { from, .. } if from == ArtifactVersion::LOWEST));
  assert!(!tools.join("wrapper.jar").exists());
}

#[tokio::test]
async fn zero_release_replaces_unversioned_node_copy() {
  let env = TestEnv::new();
  env.stage_release("0.0.0.0", 0);
  let tools = env.tools_dir("agent-1");
  write_tool(&tools, "wrapper.jar", "unversioned", 0);
  let (provisioner, target) = setup(&env);

  let outcome = provisioner.provision(&target, &Console::capture()).await.unwrap();

  assert_eq!(
    outcome,
    Provisioned::Upgraded {
      from: ArtifactVersion::LOWEST,
      to: version("0.0.0.0"),
    }
  );
  assert_eq!(file_names(&tools), vec!["VeracodeJavaAPI-0.0.0.0.jar", CANONICAL]);
}

#[tokio::test]
async fn empty_staging_dir_fails_to_provision() {
  let env = TestEnv::new();
  let (provisioner, target) = setup(&env);
  let console = Console::capture();

  assert!(!provisioner.ensure(&target, &console, true).await);
  assert!(
    console
      .contents()
      .contains("Failed to copy the veracode java-wrapper libraries")
  );
  assert!(target.exists(target.tools_dir()).await.unwrap());
}

#[tokio::test]
async fn failures_stay_off_the_console_unless_verbose() {
  let env = TestEnv::new();
  let (provisioner, target) = setup(&env);
  let console = Console::capture();

  assert!(!provisioner.ensure(&target, &console, false).await);
  assert_eq!(console.contents(), "");
}

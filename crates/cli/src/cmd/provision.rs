//! Implementation of the `dynrescan provision` command.

use std::path::Path;

use anyhow::Result;

use dynrescan_lib::console::Console;
use dynrescan_lib::node::{NodeResolver, SshResolver};
use dynrescan_lib::provision::{ProvisionError, Provisioned, Provisioner};

use super::{block_on, load_config};
use crate::output::{OutputFormat, print_error, print_json, print_stat, print_success};

/// Provisions the scan tool onto `node`. Returns `true` on failure.
pub fn cmd_provision(config_path: Option<&Path>, node: &str, format: OutputFormat) -> Result<bool> {
  let config = load_config(config_path)?;
  let console = if format.is_json() {
    Console::writer(std::io::stderr())
  } else {
    Console::stdout()
  };
  let provisioner = Provisioner::new(config.tool.staging_dir(), config.tool.filter()).with_debug(config.debug);
  let resolver = SshResolver::new(config.ssh_options());

  let result = block_on(async {
    let target = resolver.resolve(node).await?;
    let outcome = provisioner.provision(&target, &console).await?;
    Ok::<_, anyhow::Error>((outcome, provisioner.canonical_path(&target)))
  })?;

  match result {
    Ok((outcome, canonical)) => {
      if format.is_json() {
        print_json(&serde_json::json!({
          "node": node,
          "ready": true,
          "canonical": canonical.as_str(),
          "outcome": outcome,
        }))?;
      } else {
        print_success(&format!("Scan tool ready on {}", node));
        print_stat("Action", describe(&outcome));
        print_stat("Version", &outcome.version().to_string());
        print_stat("Artifact", canonical.as_str());
      }
      Ok(false)
    }
    Err(err) => {
      if format.is_json() {
        print_json(&serde_json::json!({ "node": node, "ready": false, "error": format!("{:#}", err) }))?;
      } else {
        if err.downcast_ref::<ProvisionError>().is_some() {
          print_error("Failed to copy the veracode java-wrapper libraries");
        }
        print_error(&format!("{:#}", err));
      }
      Ok(true)
    }
  }
}

fn describe(outcome: &Provisioned) -> &'static str {
  match outcome {
    Provisioned::Fresh { .. } => "staged",
    Provisioned::Upgraded { .. } => "upgraded",
    Provisioned::Current { .. } => "already current",
    Provisioned::Repaired { .. } => "republished canonical artifact",
  }
}

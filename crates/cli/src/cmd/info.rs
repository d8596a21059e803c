use std::path::Path;

use anyhow::Result;

use dynrescan_lib::artifact::{self, canonical_name};
use dynrescan_lib::platform::OsFamily;
use dynrescan_lib::util::hash::hash_file;

use super::load_config;
use crate::output::{OutputFormat, print_info, print_json, print_stat, print_warning, truncate_hash};

pub fn cmd_info(config_path: Option<&Path>, format: OutputFormat) -> Result<()> {
  let config = load_config(config_path)?;
  let staging_dir = config.tool.staging_dir();
  let filter = config.tool.filter();
  let local = artifact::local_artifact(&staging_dir, &filter).ok();
  let digest = local.as_ref().and_then(|a| hash_file(&a.path).ok());

  if format.is_json() {
    return print_json(&serde_json::json!({
      "platform": OsFamily::current(),
      "staging_dir": staging_dir,
      "tools_dir_name": config.tool.tools_dir_name,
      "runtime": config.tool.runtime,
      "artifact": local.as_ref().map(|a| serde_json::json!({
        "name": a.name,
        "version": a.version,
        "canonical": canonical_name(&a.name),
        "sha256": digest,
      })),
    }));
  }

  print_info(&format!("dynrescan v{}", env!("CARGO_PKG_VERSION")));
  print_stat("Platform", OsFamily::current().as_str());
  print_stat("Staging dir", &staging_dir.display().to_string());
  print_stat("Runtime", &config.tool.runtime.join(" "));

  match local {
    Some(found) => {
      print_stat("Artifact", &found.name);
      print_stat("Version", &found.version.to_string());
      if let Some(canonical) = canonical_name(&found.name) {
        print_stat("Canonical", &canonical);
      }
      if let Some(digest) = &digest {
        print_stat("SHA-256", truncate_hash(&digest.0));
      }
    }
    None => print_warning(&format!("No {} artifact in {}", filter.extension(), staging_dir.display())),
  }

  Ok(())
}

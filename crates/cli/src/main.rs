mod cmd;
mod output;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use cmd::RunArgs;
use output::OutputFormat;

/// Provision and launch Veracode dynamic rescans from a build pipeline.
#[derive(Parser)]
#[command(name = "dynrescan")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Enable verbose diagnostics
  #[arg(short, long, global = true)]
  verbose: bool,

  /// Path to the TOML configuration file
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Run the dynamic rescan step for a build
  Run {
    /// Workspace path of the build
    #[arg(short, long, default_value = ".")]
    workspace: String,

    /// Node hosting the workspace (local workspace when omitted)
    #[arg(short, long)]
    node: Option<String>,

    /// Build display name (defaults to $BUILD_DISPLAY_NAME)
    #[arg(long)]
    build_name: Option<String>,

    /// Full job name (defaults to $JOB_NAME)
    #[arg(long)]
    job_name: Option<String>,

    /// Extra environment for the scan process, as KEY=VALUE
    #[arg(short, long = "env", value_name = "KEY=VALUE")]
    env: Vec<String>,

    /// Application to rescan (overrides the config file)
    #[arg(long)]
    app: Option<String>,

    /// Mark the build failed when the scan or its setup fails
    #[arg(long)]
    can_fail_job: bool,

    /// Echo diagnostics and the masked command line
    #[arg(long)]
    debug: bool,

    /// Output format of the step summary
    #[arg(short, long, value_enum, default_value_t)]
    output: OutputFormat,
  },

  /// Provision the scan tool onto a node without scanning
  Provision {
    /// Node to provision
    #[arg(short, long)]
    node: String,

    /// Output format
    #[arg(short, long, value_enum, default_value_t)]
    output: OutputFormat,
  },

  /// Show platform and staged scan tool information
  Info {
    /// Output format
    #[arg(short, long, value_enum, default_value_t)]
    output: OutputFormat,
  },
}

fn main() -> Result<()> {
  let cli = Cli::parse();

  let filter = if cli.verbose {
    EnvFilter::new("debug")
  } else {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
  };
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .without_time()
    .init();

  let config = cli.config.as_deref();

  let failed = match cli.command {
    Commands::Run {
      workspace,
      node,
      build_name,
      job_name,
      env,
      app,
      can_fail_job,
      debug,
      output,
    } => cmd::cmd_run(
      config,
      RunArgs {
        workspace,
        node,
        build_name,
        job_name,
        env,
        app,
        can_fail_job,
        debug,
      },
      output,
    )?,
    Commands::Provision { node, output } => cmd::cmd_provision(config, &node, output)?,
    Commands::Info { output } => {
      cmd::cmd_info(config, output)?;
      false
    }
  };

  if failed {
    std::process::exit(1);
  }
  Ok(())
}

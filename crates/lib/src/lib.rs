//! dynrescan-lib: provisioning and launching a Veracode dynamic rescan.
//!
//! The pieces of a scan step:
//! - `version`: version tokens of release file names
//! - `artifact`: locating and staging the scan tool under its canonical name
//! - `provision`: version-aware provisioning onto a node
//! - `invoke`: launching the tool on a node and streaming its output
//! - `orchestrate`: the local and remote branches of the step

pub mod args;
pub mod artifact;
pub mod config;
pub mod console;
pub mod consts;
pub mod engine;
pub mod invoke;
pub mod node;
pub mod orchestrate;
pub mod platform;
pub mod provision;
pub mod util;
pub mod version;

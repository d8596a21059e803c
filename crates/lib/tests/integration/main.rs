//! Integration tests for dynrescan-lib.
//!
//! Nodes are directories on the local filesystem and the scan tool is a
//! small shell script, so these only run on unix.

#![cfg(unix)]

mod common;
mod provision_tests;
mod scenario_tests;

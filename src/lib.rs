// ABOUTME: Library root for slipway - exposes the pipeline components for the binary and tests.
// ABOUTME: The main binary is in main.rs.

pub mod config;
pub mod deploy;
pub mod diagnostics;
pub mod error;
pub mod launch;
pub mod logging;
pub mod output;
pub mod provision;
pub mod proxy;
pub mod release;
pub mod remote;
pub mod source;
pub mod ssh;
pub mod template;
pub mod types;
pub mod validate;

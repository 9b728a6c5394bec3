// ABOUTME: Command module aggregator for the slipway CLI.
// ABOUTME: Re-exports the deploy and cleanup handlers.

mod cleanup;
mod deploy;

pub use cleanup::cleanup;
pub use deploy::deploy;

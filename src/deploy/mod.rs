// ABOUTME: Deployment orchestration: preflight, connection, locking and the stage pipeline.
// ABOUTME: Exports the Orchestrator, its phases and the terminal outcome record.

mod lock;
mod orchestrator;
mod outcome;
pub mod preflight;
mod teardown;

pub use lock::{DeployLock, LockError, LockInfo};
pub use orchestrator::Orchestrator;
pub use outcome::{DeploymentOutcome, DeploymentSummary, Phase};
pub use teardown::teardown;

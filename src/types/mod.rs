// ABOUTME: Validated domain types shared across the deployment pipeline.
// ABOUTME: Site identifiers, branch names and masked secrets.

mod branch;
mod secret;
mod site_id;

pub use branch::{Branch, BranchError};
pub use secret::Secret;
pub use site_id::{SiteId, SiteIdError};

//! Directory membership lookups
//!
//! The [`DirectoryClient`] trait is the seam between the authorization
//! resolver and the directory service. It never touches the membership cache;
//! caching is the resolver's job so implementations stay independently
//! testable.

mod graph;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use crate::auth::GroupIdSet;
use crate::error::Result;

pub use graph::{GraphDirectoryClient, DEFAULT_GRAPH_BASE_URL, DIRECTORY_TIMEOUT, MAX_PAGES};

/// Authoritative source of group membership
#[cfg_attr(test, automock)]
#[async_trait]
pub trait DirectoryClient: Send + Sync {
    /// All groups the subject belongs to, including through nested groups
    async fn resolve_groups(&self, subject_id: &str) -> Result<GroupIdSet>;

    /// Map a human-readable identifier (UPN/email) to a directory object id
    ///
    /// Returns `Ok(None)` when the directory has no such user.
    async fn resolve_object_id(&self, user_name: &str) -> Result<Option<String>>;
}

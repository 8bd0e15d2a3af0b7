//! Authorization resolver
//!
//! Answers "does this principal belong to any of these groups?" as cheaply as
//! possible while staying authoritative:
//!
//! ```text
//! principal ──► claim groups ──► cache ──► directory (transitive, retried)
//!               (no I/O)         (TTL)     (result written back to cache)
//! ```
//!
//! Each tier is consulted only when the previous one could not grant access.
//! A denial is only ever issued after the directory (or a fresh cached copy of
//! its answer) has been consulted, because claim groups may be truncated.

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::auth::{claim_groups, has_group_overage, object_id_claim, GroupIdSet, Principal};
use crate::cache::MembershipCache;
use crate::directory::DirectoryClient;
use crate::error::{Error, Result};

/// Group-membership authorization with claim fast path, cache and directory fallback
pub struct AuthorizationResolver {
    directory: Arc<dyn DirectoryClient>,
    cache: Arc<MembershipCache>,
}

impl AuthorizationResolver {
    /// Create a resolver over a directory client and a shared cache
    pub fn new(directory: Arc<dyn DirectoryClient>, cache: Arc<MembershipCache>) -> Self {
        Self { directory, cache }
    }

    /// Membership cache used by this resolver
    pub fn cache(&self) -> &MembershipCache {
        &self.cache
    }

    /// Authorize `principal` against `allowed` group ids
    ///
    /// An empty `allowed` set only requires authentication. Returns the
    /// principal on success, `Unauthenticated` when there is no usable
    /// identity, `Forbidden` when no tier shows membership, and directory or
    /// credential errors when no authoritative answer could be obtained.
    #[instrument(
        skip(self, principal, allowed),
        fields(user = principal.map(|p| p.user_id()).unwrap_or(""))
    )]
    pub async fn authorize<'a>(
        &self,
        principal: Option<&'a Principal>,
        allowed: &GroupIdSet,
    ) -> Result<&'a Principal> {
        let principal = principal.ok_or(Error::Unauthenticated)?;
        let subject_hint = subject_hint(principal).ok_or(Error::Unauthenticated)?;

        if allowed.is_empty() {
            debug!("No group constraint, authenticated principal accepted");
            return Ok(principal);
        }

        let from_claims = claim_groups(principal);
        if intersects(&from_claims, allowed) {
            debug!("Authorized from group claims");
            return Ok(principal);
        }
        if has_group_overage(principal) {
            debug!("Group claims truncated by identity provider");
        }

        let subject = self.canonical_subject(principal, subject_hint).await;
        let groups = self.membership(&subject).await?;

        if intersects(&groups, allowed) {
            debug!(subject = %subject, "Authorized from directory membership");
            Ok(principal)
        } else {
            info!(subject = %subject, "Principal lacks required group membership");
            Err(Error::Forbidden)
        }
    }

    /// Canonical directory id for the principal
    ///
    /// An object-id claim or a UUID-shaped user id is used as is. Anything else
    /// is looked up in the directory; if that fails the raw identifier is used.
    pub async fn canonical_subject(&self, principal: &Principal, hint: &str) -> String {
        if object_id_claim(principal).is_some() || Uuid::parse_str(hint).is_ok() {
            return hint.to_string();
        }

        if let Some(subject) = self.cache.get_alias(hint) {
            return subject;
        }

        match self.directory.resolve_object_id(hint).await {
            Ok(Some(subject)) => {
                debug!(user = %hint, subject = %subject, "Resolved user to directory object id");
                self.cache.put_alias(hint, &subject);
                subject
            }
            Ok(None) => {
                warn!(user = %hint, "User not found in directory, using identifier as given");
                hint.to_string()
            }
            Err(e) => {
                warn!(user = %hint, error = %e, "User resolution failed, using identifier as given");
                hint.to_string()
            }
        }
    }

    /// Cached membership for `subject`, fetching from the directory on miss
    async fn membership(&self, subject: &str) -> Result<GroupIdSet> {
        if let Some(groups) = self.cache.get(subject) {
            debug!(subject = %subject, "Membership cache hit");
            return Ok(groups);
        }

        let groups = self.directory.resolve_groups(subject).await?;
        info!(
            subject = %subject,
            group_count = groups.len(),
            "Refreshed membership from directory"
        );
        self.cache.put(subject, groups.clone());
        Ok(groups)
    }
}

/// Identifier to resolve the subject from: object-id claim first, then userId
fn subject_hint(principal: &Principal) -> Option<&str> {
    object_id_claim(principal).or_else(|| {
        let id = principal.user_id();
        (!id.is_empty()).then_some(id)
    })
}

fn intersects(groups: &GroupIdSet, allowed: &GroupIdSet) -> bool {
    allowed.iter().any(|g| groups.contains(g))
}

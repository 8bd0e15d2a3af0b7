//! Group and subject information carried directly in claims
//!
//! Entra ID embeds group object ids in the token as long as the user is in
//! fewer groups than the emission limit. Above the limit the claim is dropped
//! and an overage marker is emitted instead, so claim groups are a fast path
//! that may be incomplete, never a reason to deny.

use crate::auth::{GroupIdSet, Principal};

/// Claim types that carry group object ids
pub const GROUP_CLAIM_TYPES: [&str; 2] = [
    "groups",
    "http://schemas.microsoft.com/ws/2008/06/identity/claims/groups",
];

/// Claim types that carry the directory object id of the user
pub const OBJECT_ID_CLAIM_TYPES: [&str; 2] = [
    "oid",
    "http://schemas.microsoft.com/identity/claims/objectidentifier",
];

/// Claim types signalling that group claims were omitted
const GROUP_OVERAGE_CLAIM_TYPES: [&str; 2] = ["hasgroups", "_claim_names"];

fn type_matches(typ: &str, known: &[&str]) -> bool {
    known.iter().any(|k| typ.eq_ignore_ascii_case(k))
}

/// Collect every group id embedded in the principal's claims
pub fn claim_groups(principal: &Principal) -> GroupIdSet {
    principal
        .claims()
        .iter()
        .filter(|c| type_matches(&c.typ, &GROUP_CLAIM_TYPES))
        .map(|c| c.val.trim())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .collect()
}

/// Directory object id asserted by the identity provider, if any
pub fn object_id_claim(principal: &Principal) -> Option<&str> {
    principal
        .claims()
        .iter()
        .find(|c| type_matches(&c.typ, &OBJECT_ID_CLAIM_TYPES))
        .map(|c| c.val.trim())
        .filter(|v| !v.is_empty())
}

/// Whether the provider reported that group claims were truncated
pub fn has_group_overage(principal: &Principal) -> bool {
    principal
        .claims()
        .iter()
        .any(|c| type_matches(&c.typ, &GROUP_OVERAGE_CLAIM_TYPES))
}

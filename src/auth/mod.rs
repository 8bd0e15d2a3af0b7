//! Identity extraction
//!
//! Turns the platform identity header into a [`Principal`] and reads the
//! group and object-id claims it carries. No network I/O happens here.

mod claims;
mod principal;

use std::collections::HashSet;

pub use claims::{
    claim_groups, has_group_overage, object_id_claim, GROUP_CLAIM_TYPES, OBJECT_ID_CLAIM_TYPES,
};
pub use principal::{
    extract_principal, Claim, MalformedPrincipal, Principal, CLIENT_PRINCIPAL_HEADER,
};

/// Set of opaque directory group object ids
pub type GroupIdSet = HashSet<String>;

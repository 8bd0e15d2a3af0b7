//! Deployment configuration
//!
//! Populated by the binary from flags and environment variables, then
//! validated once before anything is wired up.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::cache::DEFAULT_TTL;
use crate::compute::{VmTarget, DEFAULT_MANAGEMENT_URL};
use crate::credential::{ClientSecretCredential, DEFAULT_AUTHORITY};
use crate::directory::DEFAULT_GRAPH_BASE_URL;
use crate::error::{Error, Result};
use crate::policy::GroupBindings;

/// TLS material for serving HTTPS directly
#[derive(Debug, Clone)]
pub struct TlsPaths {
    /// PEM certificate chain
    pub cert: PathBuf,
    /// PEM private key
    pub key: PathBuf,
}

/// Full gate configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Listen address
    pub addr: SocketAddr,
    /// Serve TLS when set; plain HTTP behind a terminating proxy otherwise
    pub tls: Option<TlsPaths>,
    /// Service principal used for both directory and compute calls
    pub credential: ClientSecretCredential,
    /// Managed VM
    pub vm: VmTarget,
    /// Group ids backing the policy roles
    pub groups: GroupBindings,
    /// Membership cache lifetime
    pub cache_ttl: Duration,
    /// Token authority
    pub authority: String,
    /// Directory endpoint
    pub graph_base_url: String,
    /// Management endpoint
    pub management_url: String,
}

impl Config {
    /// Configuration with default endpoints and TTL
    pub fn new(
        addr: SocketAddr,
        credential: ClientSecretCredential,
        vm: VmTarget,
        groups: GroupBindings,
    ) -> Self {
        Self {
            addr,
            tls: None,
            credential,
            vm,
            groups,
            cache_ttl: DEFAULT_TTL,
            authority: DEFAULT_AUTHORITY.to_string(),
            graph_base_url: DEFAULT_GRAPH_BASE_URL.to_string(),
            management_url: DEFAULT_MANAGEMENT_URL.to_string(),
        }
    }

    /// Reject missing required values
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("TENANT_ID", &self.credential.tenant_id),
            ("CLIENT_ID", &self.credential.client_id),
            ("CLIENT_SECRET", &self.credential.client_secret),
            ("SUBSCRIPTION_ID", &self.vm.subscription_id),
            ("RESOURCE_GROUP", &self.vm.resource_group),
            ("VM_NAME", &self.vm.vm_name),
            ("AVD_USERS_GROUP_ID", &self.groups.users),
            ("AVD_ADMINISTRATORS_GROUP_ID", &self.groups.administrators),
        ];

        let missing: Vec<&str> = required
            .iter()
            .filter(|(_, value)| value.trim().is_empty())
            .map(|(name, _)| *name)
            .collect();

        if !missing.is_empty() {
            return Err(Error::Config(format!(
                "missing required settings: {}",
                missing.join(", ")
            )));
        }

        if self.cache_ttl.is_zero() {
            return Err(Error::Config("cache TTL must be positive".into()));
        }

        Ok(())
    }
}

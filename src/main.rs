//! vmgate - group-gated control of a managed virtual machine

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vmgate::compute::{VmTarget, DEFAULT_MANAGEMENT_URL};
use vmgate::config::{Config, TlsPaths};
use vmgate::credential::{ClientSecretCredential, DEFAULT_AUTHORITY};
use vmgate::directory::DEFAULT_GRAPH_BASE_URL;
use vmgate::policy::GroupBindings;
use vmgate::server::start_server;

/// vmgate - start, stop and inspect a VM on behalf of directory group members
#[derive(Parser, Debug)]
#[command(name = "vmgate", version, about, long_about = None)]
struct Cli {
    /// Listen address
    #[arg(long, env = "VMGATE_ADDR", default_value = "0.0.0.0:8080")]
    addr: SocketAddr,

    /// Directory tenant
    #[arg(long, env = "TENANT_ID", default_value = "")]
    tenant_id: String,

    /// Service principal application id
    #[arg(long, env = "CLIENT_ID", default_value = "")]
    client_id: String,

    /// Service principal secret
    #[arg(long, env = "CLIENT_SECRET", default_value = "", hide_env_values = true)]
    client_secret: String,

    /// Subscription holding the VM
    #[arg(long, env = "SUBSCRIPTION_ID", default_value = "")]
    subscription_id: String,

    /// Resource group holding the VM
    #[arg(long, env = "RESOURCE_GROUP", default_value = "")]
    resource_group: String,

    /// Name of the managed VM
    #[arg(long, env = "VM_NAME", default_value = "")]
    vm_name: String,

    /// Group whose members may start the VM and read its status
    #[arg(long, env = "AVD_USERS_GROUP_ID", default_value = "")]
    users_group_id: String,

    /// Group whose members may additionally stop the VM
    #[arg(long, env = "AVD_ADMINISTRATORS_GROUP_ID", default_value = "")]
    administrators_group_id: String,

    /// Membership cache lifetime in seconds
    #[arg(long, env = "VMGATE_CACHE_TTL_SECS", default_value = "300")]
    cache_ttl_secs: u64,

    /// Token authority
    #[arg(long, env = "VMGATE_AUTHORITY", default_value = DEFAULT_AUTHORITY)]
    authority: String,

    /// Directory API base URL
    #[arg(long, env = "GRAPH_BASE_URL", default_value = DEFAULT_GRAPH_BASE_URL)]
    graph_base_url: String,

    /// Management API base URL
    #[arg(long, env = "MANAGEMENT_URL", default_value = DEFAULT_MANAGEMENT_URL)]
    management_url: String,

    /// PEM certificate; serves TLS together with --tls-key
    #[arg(long, env = "VMGATE_TLS_CERT", requires = "tls_key")]
    tls_cert: Option<PathBuf>,

    /// PEM private key
    #[arg(long, env = "VMGATE_TLS_KEY", requires = "tls_cert")]
    tls_key: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, env = "VMGATE_LOG_JSON")]
    log_json: bool,
}

impl Cli {
    fn into_config(self) -> Config {
        let mut config = Config::new(
            self.addr,
            ClientSecretCredential {
                tenant_id: self.tenant_id,
                client_id: self.client_id,
                client_secret: self.client_secret,
            },
            VmTarget {
                subscription_id: self.subscription_id,
                resource_group: self.resource_group,
                vm_name: self.vm_name,
            },
            GroupBindings {
                users: self.users_group_id,
                administrators: self.administrators_group_id,
            },
        );
        config.cache_ttl = Duration::from_secs(self.cache_ttl_secs);
        config.authority = self.authority;
        config.graph_base_url = self.graph_base_url;
        config.management_url = self.management_url;
        config.tls = match (self.tls_cert, self.tls_key) {
            (Some(cert), Some(key)) => Some(TlsPaths { cert, key }),
            _ => None,
        };
        config
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        eprintln!("CRITICAL: Failed to install crypto provider: {:?}", e);
        std::process::exit(1);
    }

    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if cli.log_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer())
            .with(filter)
            .init();
    }

    let config = cli.into_config();
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;

    tracing::info!(
        vm = %config.vm.vm_name,
        resource_group = %config.vm.resource_group,
        cache_ttl_secs = config.cache_ttl.as_secs(),
        "vmgate starting"
    );

    start_server(config)
        .await
        .map_err(|e| anyhow::anyhow!("{}", e))
}

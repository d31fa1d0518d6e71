//! tcpvpn
//!
//! TUN/TAP tunnel client over a framed TCP connection.
//!
//! Usage:
//!   tcpvpn --server vpn.example.com:9090 --key-file ~/.config/tcpvpn/key
//!   tcpvpn --discovery-url https://registry.example.com/access --discovery-mandatory --key s3cret
//!   tcpvpn -c ./client.toml

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use tcpvpn::vpn_common::config::{load_client_config, ClientConfigBuilder, ClientOverrides};
use tcpvpn::vpn_core::{ServerDiscovery, SystemCommandRunner, TunDevice, VpnClient};

/// Deadline for registry and route list requests.
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Parser)]
#[command(name = "tcpvpn")]
#[command(version)]
#[command(about = "TUN/TAP tunnel client over TCP")]
struct Args {
    /// Path to config file (default: ~/.config/tcpvpn/client.toml if present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Tunnel server address (host:port), used when discovery yields nothing
    #[arg(short, long)]
    server: Option<String>,

    /// Shared auth key
    #[arg(long, conflicts_with = "key_file")]
    key: Option<String>,

    /// File containing the shared auth key
    #[arg(long)]
    key_file: Option<PathBuf>,

    /// Requested interface name (OS picks one if omitted)
    #[arg(long)]
    tun_name: Option<String>,

    /// Create a layer 2 TAP device instead of TUN
    #[arg(long)]
    tap: bool,

    /// Prefix length of the tunnel network (1-30)
    #[arg(long, value_parser = clap::value_parser!(u8).range(1..=30))]
    prefix_len: Option<u8>,

    /// Registry URL whose response body is the server address
    #[arg(long)]
    discovery_url: Option<String>,

    /// Keep retrying discovery instead of falling back to --server
    #[arg(long)]
    discovery_mandatory: bool,
}

impl Args {
    fn overrides(&self) -> ClientOverrides {
        ClientOverrides {
            server_addr: self.server.clone(),
            auth_key: self.key.clone(),
            auth_key_file: self.key_file.clone(),
            tun_name: self.tun_name.clone(),
            tap: self.tap,
            prefix_len: self.prefix_len,
            discovery_url: self.discovery_url.clone(),
            discovery_mandatory: self.discovery_mandatory,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let file_config = load_client_config(args.config.as_deref())?;
    let resolved = ClientConfigBuilder::new()
        .apply_defaults()
        .apply_config(file_config.as_ref())
        .apply_cli(args.overrides())
        .build()?;
    let client_config = resolved.to_client_config()?;

    let device = TunDevice::create(resolved.tun_name.as_deref(), resolved.tap)
        .context("Failed to create tunnel interface (are you running as root?)")?;

    let http = reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .context("Failed to build HTTP client")?;
    let discovery = ServerDiscovery::from_url(
        http.clone(),
        resolved.discovery_url.as_deref(),
        resolved.discovery_mandatory,
    );

    let mut client = VpnClient::with_device(client_config, device, discovery, SystemCommandRunner)?
        .with_http_client(http);

    log::info!("tcpvpn {} started", env!("CARGO_PKG_VERSION"));
    client.run().await;
    Ok(())
}

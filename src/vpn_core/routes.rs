//! Interface addressing and route installation.
//!
//! Both operations shell out to the host's network tools. The argument
//! shapes differ per platform, so they are built by pure functions keyed on
//! [`Platform`] and executed through a [`CommandRunner`].

use crate::vpn_core::error::{VpnError, VpnResult};
use ipnet::Ipv4Net;
use std::future::Future;
use std::net::Ipv4Addr;
use tokio::process::Command;

/// Host platform profile for network commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Linux,
    /// macOS and BSD-style `ifconfig`/`route`.
    MacOs,
    Windows,
}

impl Platform {
    /// Profile for the platform this binary was built for.
    pub fn current() -> Self {
        if cfg!(target_os = "windows") {
            Platform::Windows
        } else if cfg!(any(
            target_os = "macos",
            target_os = "freebsd",
            target_os = "openbsd",
            target_os = "netbsd"
        )) {
            Platform::MacOs
        } else {
            Platform::Linux
        }
    }
}

/// One OS command with its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OsCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl OsCommand {
    fn new(program: &str, args: &[&str]) -> Self {
        Self {
            program: program.to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl std::fmt::Display for OsCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Executes OS commands.
pub trait CommandRunner: Send + Sync + 'static {
    /// Run `command` to completion and return its combined stdout+stderr.
    ///
    /// A non-zero exit status is an error carrying that output.
    fn run(&self, command: &OsCommand) -> impl Future<Output = VpnResult<String>> + Send;
}

/// Runs commands on the host via `tokio::process`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemCommandRunner;

impl CommandRunner for SystemCommandRunner {
    async fn run(&self, command: &OsCommand) -> VpnResult<String> {
        let output = Command::new(&command.program)
            .args(&command.args)
            .output()
            .await
            .map_err(|e| {
                VpnError::config_with_source(format!("Failed to execute {}", command.program), e)
            })?;

        // netsh reports errors on stdout, iproute2 on stderr.
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let combined = format!("{}{}", stdout, stderr).trim().to_string();

        if output.status.success() {
            Ok(combined)
        } else {
            Err(VpnError::config(format!(
                "{} exited with {}: {}",
                command, output.status, combined
            )))
        }
    }
}

/// Commands that bring `iface` up and assign `ip` with `gateway` as peer.
pub fn interface_commands(
    platform: Platform,
    iface: &str,
    ip: Ipv4Addr,
    gateway: Ipv4Addr,
    prefix_len: u8,
) -> VpnResult<Vec<OsCommand>> {
    let net = Ipv4Net::new(ip, prefix_len).map_err(|e| {
        VpnError::config_with_source(format!("Invalid prefix length {}", prefix_len), e)
    })?;
    let ip = ip.to_string();
    let gw = gateway.to_string();
    let mask = net.netmask().to_string();

    let commands = match platform {
        Platform::Linux => vec![
            OsCommand::new("ip", &["link", "set", "dev", iface, "up"]),
            OsCommand::new("ip", &["addr", "add", &net.to_string(), "dev", iface]),
        ],
        Platform::MacOs => vec![
            OsCommand::new("ifconfig", &[iface, "up"]),
            OsCommand::new("ifconfig", &[iface, "inet", &ip, &gw, "netmask", &mask]),
            OsCommand::new("route", &["add", "-net", &net.trunc().to_string(), &ip]),
        ],
        Platform::Windows => vec![
            OsCommand::new(
                "netsh",
                &[
                    "interface",
                    "ip",
                    "set",
                    "address",
                    &format!("name={}", iface),
                    "source=static",
                    &format!("addr={}", ip),
                    &format!("mask={}", mask),
                    &format!("gateway={}", gw),
                ],
            ),
            // netsh installs a default route through the gateway; drop it.
            OsCommand::new("route", &["delete", "0.0.0.0", &gw]),
        ],
    };

    Ok(commands)
}

/// Command that routes `entry` (an address or CIDR, passed verbatim) via the tunnel.
pub fn route_command(
    platform: Platform,
    entry: &str,
    iface: &str,
    access_ip: Ipv4Addr,
    gateway: Ipv4Addr,
) -> OsCommand {
    match platform {
        Platform::Linux => OsCommand::new("ip", &["route", "add", entry, "dev", iface]),
        Platform::MacOs => {
            OsCommand::new("route", &["add", "-net", entry, &access_ip.to_string()])
        }
        Platform::Windows => OsCommand::new(
            "netsh",
            &[
                "interface",
                "ipv4",
                "add",
                "route",
                &format!("prefix={}", entry),
                &format!("interface={}", iface),
                &format!("nexthop={}", gateway),
                "store=active",
            ],
        ),
    }
}

/// Bring the interface up and assign its address.
///
/// Stops at the first failing command. Commands already applied are not
/// rolled back.
pub async fn configure_interface<C: CommandRunner>(
    runner: &C,
    platform: Platform,
    iface: &str,
    ip: Ipv4Addr,
    gateway: Ipv4Addr,
    prefix_len: u8,
) -> VpnResult<()> {
    for command in interface_commands(platform, iface, ip, gateway, prefix_len)? {
        log::debug!("Running: {}", command);
        runner.run(&command).await.map_err(|e| {
            VpnError::config_with_source(format!("Interface setup failed at `{}`", command), e)
        })?;
    }
    log::info!("Configured {} with {} (gateway {})", iface, ip, gateway);
    Ok(())
}

/// Install every route in `routes`, best-effort.
///
/// Returns the number of entries that were added successfully.
pub async fn install_routes<C: CommandRunner>(
    runner: &C,
    platform: Platform,
    routes: &[String],
    access_ip: Ipv4Addr,
    gateway: Ipv4Addr,
    iface: &str,
) -> usize {
    log::info!("Installing {} route(s) via {}", routes.len(), iface);
    let mut added = 0;
    for entry in routes {
        let command = route_command(platform, entry, iface, access_ip, gateway);
        match runner.run(&command).await {
            Ok(_) => {
                log::debug!("Added route {} via {}", entry, iface);
                added += 1;
            }
            Err(e) => log::warn!("Failed to add route {}: {}", entry, e),
        }
    }
    log::info!("Installed {}/{} route(s)", added, routes.len());
    added
}

/// Download a route list; each non-blank line of the body is one entry.
pub async fn fetch_route_list(client: &reqwest::Client, url: &str) -> VpnResult<Vec<String>> {
    log::info!("Downloading route list from {}", url);
    let body = client
        .get(url)
        .send()
        .await
        .and_then(|resp| resp.error_for_status())
        .map_err(|e| VpnError::config_with_source(format!("Failed to fetch {}", url), e))?
        .text()
        .await
        .map_err(|e| VpnError::config_with_source(format!("Failed to read {}", url), e))?;

    let routes = parse_route_list(&body);
    log::info!("Downloaded {} route(s) from {}", routes.len(), url);
    Ok(routes)
}

fn parse_route_list(body: &str) -> Vec<String> {
    body.lines()
        .filter(|line| !line.trim().is_empty())
        .map(str::to_string)
        .collect()
}

//! Tunnel client: the reconnection supervisor.
//!
//! Each cycle resolves a server address, dials it, authorizes, configures the
//! interface if it has not been configured yet, and then runs a session until
//! the connection is lost. Any failure leads to a fixed cooldown and a fresh
//! cycle; the client retries for the life of the process.

use crate::vpn_core::config::VpnClientConfig;
use crate::vpn_core::device::{PacketRead, PacketWrite, TunDevice, TunWriter};
use crate::vpn_core::discovery::Discovery;
use crate::vpn_core::error::{VpnError, VpnResult};
use crate::vpn_core::routes::{configure_interface, fetch_route_list, install_routes, CommandRunner};
use crate::vpn_core::session::{outbound_queue, run_session, spawn_interface_reader, SharedOutbound};
use crate::vpn_core::signaling::{authorize, AuthorizeResponse};
use bytes::Bytes;
use std::net::Ipv4Addr;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

/// Whether the virtual interface has been given its address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InterfaceState {
    /// No authorization has succeeded yet.
    #[default]
    NeverConfigured,
    /// An authorization succeeded but configuring the interface failed.
    ConfigurePending,
    /// The interface is configured; later cycles skip setup.
    Configured,
}

/// State carried by the supervisor across reconnects.
#[derive(Debug, Clone, Default)]
pub struct ClientState {
    /// Address granted by the last session that reached the running state.
    /// Sent as a hint on the next authorization.
    pub access_ip: Option<Ipv4Addr>,
    pub interface: InterfaceState,
}

/// Tunnel client instance.
pub struct VpnClient<D, C, W> {
    config: VpnClientConfig,
    state: ClientState,
    discovery: D,
    runner: Arc<C>,
    http: reqwest::Client,
    tun_name: String,
    tun_writer: Arc<Mutex<W>>,
    outbound_tx: mpsc::Sender<Bytes>,
    outbound_rx: SharedOutbound,
    interface_reader: Option<JoinHandle<()>>,
}

impl<D, C> VpnClient<D, C, TunWriter>
where
    D: Discovery,
    C: CommandRunner,
{
    /// Build a client around an opened device and start its interface reader.
    pub fn with_device(
        config: VpnClientConfig,
        device: TunDevice,
        discovery: D,
        runner: C,
    ) -> VpnResult<Self> {
        let tun_name = device.name().to_string();
        let (reader, writer) = device.split()?;
        let mut client = Self::new(config, discovery, runner, tun_name, writer)?;
        client.attach_interface_reader(reader);
        Ok(client)
    }
}

impl<D, C, W> VpnClient<D, C, W>
where
    D: Discovery,
    C: CommandRunner,
    W: PacketWrite,
{
    /// Create a new client.
    pub fn new(
        config: VpnClientConfig,
        discovery: D,
        runner: C,
        tun_name: impl Into<String>,
        tun_writer: W,
    ) -> VpnResult<Self> {
        config.validate()?;
        let (outbound_tx, outbound_rx) = outbound_queue(config.outbound_queue_size);

        Ok(Self {
            config,
            state: ClientState::default(),
            discovery,
            runner: Arc::new(runner),
            http: reqwest::Client::new(),
            tun_name: tun_name.into(),
            tun_writer: Arc::new(Mutex::new(tun_writer)),
            outbound_tx,
            outbound_rx,
            interface_reader: None,
        })
    }

    /// Use a specific HTTP client for route list downloads.
    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    /// Start feeding packets from `reader` into the outbound queue.
    ///
    /// The reader outlives individual sessions. Attaching a second reader
    /// stops the first.
    pub fn attach_interface_reader<R: PacketRead>(&mut self, reader: R) {
        if let Some(previous) = self.interface_reader.take() {
            previous.abort();
        }
        self.interface_reader = Some(spawn_interface_reader(reader, self.outbound_tx.clone()));
    }

    /// Current supervisor state.
    pub fn state(&self) -> &ClientState {
        &self.state
    }

    /// Run connection cycles forever with a fixed cooldown between them.
    pub async fn run(&mut self) {
        let mut attempt = 0u64;

        loop {
            attempt = attempt.saturating_add(1);
            if attempt == 1 {
                log::info!("Connecting to VPN server...");
            } else {
                log::info!("VPN reconnection attempt #{}", attempt);
            }

            match self.run_cycle().await {
                Ok(()) => log::info!("VPN session ended"),
                Err(e) => log::warn!(
                    "Connection lost ({}), reconnecting in {:.1}s",
                    e,
                    self.config.timings.cooldown.as_secs_f64()
                ),
            }

            tokio::time::sleep(self.config.timings.cooldown).await;
        }
    }

    /// Run one cycle: resolve, connect, authorize, configure, run a session.
    ///
    /// Returns once the session ends or any earlier step fails. The cooldown
    /// is left to the caller.
    pub async fn run_cycle(&mut self) -> VpnResult<()> {
        let addr = self.resolve_server().await?;

        log::info!("Connecting to {}", addr);
        let connect_timeout = self.config.timings.connect_timeout;
        let mut stream = tokio::time::timeout(connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| {
                VpnError::Network(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("Connect to {} timed out after {:?}", addr, connect_timeout),
                ))
            })??;
        stream.set_nodelay(true)?;

        let response = authorize(&mut stream, self.state.access_ip, &self.config.auth_key).await?;
        log::info!(
            "Authorized by {}: access IP {}, gateway {}",
            addr,
            response.access_ip,
            response.gateway
        );

        if self.state.interface != InterfaceState::Configured {
            self.configure(&response).await?;
        } else if self.state.access_ip != Some(response.access_ip) {
            log::warn!(
                "Server assigned {} (was {:?}); interface keeps its original address",
                response.access_ip,
                self.state.access_ip
            );
        }

        self.state.access_ip = Some(response.access_ip);

        log::info!("VPN tunnel established via {}", self.tun_name);
        run_session(
            stream,
            self.outbound_tx.clone(),
            self.outbound_rx.clone(),
            self.tun_writer.clone(),
            self.config.timings,
        )
        .await
    }

    async fn resolve_server(&self) -> VpnResult<String> {
        let mandatory = self.discovery.is_mandatory();
        let deadline = self.config.timings.connect_timeout;

        let resolved = tokio::time::timeout(deadline, self.discovery.resolve())
            .await
            .unwrap_or_else(|_| {
                Err(VpnError::Discovery(format!(
                    "Discovery timed out after {:?}",
                    deadline
                )))
            });

        match resolved {
            Ok(Some(addr)) => {
                log::debug!("Discovered server {}", addr);
                return Ok(addr);
            }
            Ok(None) if mandatory => {
                return Err(VpnError::Discovery(
                    "Registry returned no server address".to_string(),
                ));
            }
            Err(e) if mandatory => return Err(e),
            Ok(None) => {}
            Err(e) => log::warn!("Discovery failed, using configured server address: {}", e),
        }

        self.config
            .server_addr
            .clone()
            .ok_or_else(|| VpnError::Discovery("No server address available".to_string()))
    }

    /// Assign the granted address to the interface and start route setup.
    async fn configure(&mut self, response: &AuthorizeResponse) -> VpnResult<()> {
        let result = configure_interface(
            self.runner.as_ref(),
            self.config.platform,
            &self.tun_name,
            response.access_ip,
            response.gateway,
            self.config.prefix_len,
        )
        .await;

        if let Err(e) = result {
            self.state.interface = InterfaceState::ConfigurePending;
            log::error!("Failed to configure {}: {}", self.tun_name, e);
            return Err(e);
        }
        self.state.interface = InterfaceState::Configured;

        if let Some(url) = response.route_url.clone() {
            self.spawn_route_setup(url, response.access_ip, response.gateway);
        }
        Ok(())
    }

    fn spawn_route_setup(&self, url: String, access_ip: Ipv4Addr, gateway: Ipv4Addr) {
        let runner = self.runner.clone();
        let http = self.http.clone();
        let platform = self.config.platform;
        let tun_name = self.tun_name.clone();

        tokio::spawn(async move {
            match fetch_route_list(&http, &url).await {
                Ok(routes) => {
                    install_routes(
                        runner.as_ref(),
                        platform,
                        &routes,
                        access_ip,
                        gateway,
                        &tun_name,
                    )
                    .await;
                }
                Err(e) => log::warn!("Skipping route setup: {}", e),
            }
        });
    }
}

impl<D, C, W> Drop for VpnClient<D, C, W> {
    fn drop(&mut self) {
        if let Some(reader) = self.interface_reader.take() {
            reader.abort();
        }
    }
}

//! Authorization handshake.
//!
//! The client sends one `ClientAuthorize` frame carrying a JSON
//! [`AuthorizeRequest`] and blocks on exactly one reply, which must be a
//! `ServerAuthorize` frame carrying an [`AuthorizeResponse`]. Nothing else is
//! written to the connection before this exchange completes.

use crate::vpn_core::error::{VpnError, VpnResult};
use crate::vpn_core::frame::{self, Command};
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

/// Authorization request from client to server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizeRequest {
    /// Host operating system (e.g. "linux").
    pub os: String,
    /// Client version.
    pub version: String,
    /// Previously granted access IP, sent as a hint on reconnect.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_ip: Option<Ipv4Addr>,
    /// Shared secret.
    pub key: String,
}

impl AuthorizeRequest {
    /// Build a request for this host.
    pub fn new(access_ip: Option<Ipv4Addr>, key: impl Into<String>) -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            access_ip,
            key: key.into(),
        }
    }

    /// Encode to bytes for transmission.
    pub fn encode(&self) -> VpnResult<Vec<u8>> {
        serde_json::to_vec(self)
            .map_err(|e| VpnError::Auth(format!("Failed to encode authorize request: {}", e)))
    }

    /// Decode from bytes.
    pub fn decode(data: &[u8]) -> VpnResult<Self> {
        serde_json::from_slice(data)
            .map_err(|e| VpnError::Auth(format!("Failed to decode authorize request: {}", e)))
    }
}

/// Authorization response from server to client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizeResponse {
    /// Address assigned to this client's virtual interface.
    pub access_ip: Ipv4Addr,
    /// Server side of the tunnel.
    pub gateway: Ipv4Addr,
    /// Where to download the list of routes to send through the tunnel.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route_url: Option<String>,
}

impl AuthorizeResponse {
    /// Encode to bytes for transmission.
    pub fn encode(&self) -> VpnResult<Vec<u8>> {
        serde_json::to_vec(self)
            .map_err(|e| VpnError::Auth(format!("Failed to encode authorize response: {}", e)))
    }

    /// Decode from bytes.
    pub fn decode(data: &[u8]) -> VpnResult<Self> {
        serde_json::from_slice(data)
            .map_err(|e| VpnError::Auth(format!("Failed to decode authorize response: {}", e)))
    }
}

/// Run the authorization exchange on a freshly connected stream.
///
/// Has no timeout of its own; the connect timeout and TCP-level failures bound
/// the worst case.
pub async fn authorize<S>(
    stream: &mut S,
    access_ip: Option<Ipv4Addr>,
    key: &str,
) -> VpnResult<AuthorizeResponse>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let request = AuthorizeRequest::new(access_ip, key);
    let buf = frame::encode(Command::ClientAuthorize, &request.encode()?)
        .map_err(|e| VpnError::Auth(format!("Failed to frame authorize request: {}", e)))?;

    stream
        .write_all(&buf)
        .await
        .map_err(|e| VpnError::Auth(format!("Failed to send authorize request: {}", e)))?;
    stream
        .flush()
        .await
        .map_err(|e| VpnError::Auth(format!("Failed to send authorize request: {}", e)))?;

    let reply = frame::decode(stream)
        .await
        .map_err(|e| VpnError::Auth(format!("Failed to read authorize response: {}", e)))?;

    if reply.command != Command::ServerAuthorize {
        return Err(VpnError::Auth(format!(
            "Unexpected {} frame, expected {}",
            reply.command,
            Command::ServerAuthorize
        )));
    }

    AuthorizeResponse::decode(&reply.payload)
}

//! TCP tunnel client core.
//!
//! Packets read from a TUN/TAP device are framed and written to a single TCP
//! connection to the tunnel server; frames read back are written to the
//! device. The connection is re-established forever on failure.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                        VpnClient                           │
//! │  resolve ─► connect ─► authorize ─► configure ─► session   │
//! │     ▲                                              │       │
//! │     └──────────────── cooldown ◄───────────────────┘       │
//! ├────────────────────────────────────────────────────────────┤
//! │  TUN Device ◄──► outbound queue / receiver ◄──► TCP Server │
//! └────────────────────────────────────────────────────────────┘
//! ```

#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
compile_error!("tcpvpn only supports Linux, macOS, and Windows");

pub mod client;
pub mod config;
pub mod device;
pub mod discovery;
pub mod error;
pub mod frame;
pub mod routes;
pub mod session;
pub mod signaling;

// Re-exports for convenience
pub use client::{ClientState, InterfaceState, VpnClient};
pub use config::{ClientTimings, VpnClientConfig};
pub use device::{PacketRead, PacketWrite, TunDevice};
pub use discovery::{Discovery, HttpDiscovery, NoDiscovery, ServerDiscovery};
pub use error::{VpnError, VpnResult};
pub use frame::{Command, Frame};
pub use routes::{CommandRunner, Platform, SystemCommandRunner};
pub use signaling::{AuthorizeRequest, AuthorizeResponse};

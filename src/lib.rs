//! tcpvpn library
//!
//! TUN/TAP tunnel client over a single framed TCP connection.

pub mod vpn_common;
pub mod vpn_core;

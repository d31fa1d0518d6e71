//! Virtual interface (TUN/TAP) creation and packet I/O.
//!
//! The device is opened once per process and never re-created on reconnect.
//! It is split into a read half, owned by the long-lived interface reader,
//! and a write half that successive sessions' receivers share.

use crate::vpn_core::error::{VpnError, VpnResult};
use std::future::Future;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tun::{AbstractDevice, AsyncDevice, Configuration, DeviceReader, DeviceWriter};

/// Read buffer size for one packet.
pub const PACKET_BUFFER_SIZE: usize = 65536;

/// Source of raw packets from the virtual interface.
pub trait PacketRead: Send + 'static {
    /// Read one packet into `buf`, returning its length.
    fn read_packet(&mut self, buf: &mut [u8]) -> impl Future<Output = VpnResult<usize>> + Send;
}

/// Sink for raw packets into the virtual interface.
pub trait PacketWrite: Send + 'static {
    /// Write one whole packet.
    fn write_packet(&mut self, packet: &[u8]) -> impl Future<Output = VpnResult<()>> + Send;
}

/// A TUN (layer 3) or TAP (layer 2) device with async I/O.
pub struct TunDevice {
    device: AsyncDevice,
    name: String,
}

impl TunDevice {
    /// Open a device. No address is assigned here; see
    /// [`configure_interface`](crate::vpn_core::routes::configure_interface).
    pub fn create(name: Option<&str>, tap: bool) -> VpnResult<Self> {
        let mut tun_config = Configuration::default();
        tun_config.up();

        if tap {
            tun_config.layer(tun::Layer::L2);
        }

        if let Some(name) = name {
            #[allow(deprecated)]
            tun_config.name(name);
        }

        #[cfg(target_os = "linux")]
        tun_config.platform_config(|platform_config| {
            platform_config.ensure_root_privileges(true);
        });

        let device = tun::create_as_async(&tun_config)
            .map_err(|e| VpnError::tun_device_with_source("Failed to create TUN device", e))?;

        let name = device
            .tun_name()
            .map_err(|e| VpnError::tun_device_with_source("Failed to get TUN name", e))?;

        log::info!(
            "Created {} device: {}",
            if tap { "TAP" } else { "TUN" },
            name
        );

        Ok(Self { device, name })
    }

    /// Get the device name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Split the device into read and write halves.
    /// Note: The tun crate returns (writer, reader) order from split().
    pub fn split(self) -> VpnResult<(TunReader, TunWriter)> {
        let (writer, reader) = self
            .device
            .split()
            .map_err(|e| VpnError::tun_device_with_source("Failed to split TUN device", e))?;

        Ok((TunReader { reader }, TunWriter { writer }))
    }
}

/// Read half of a split TUN device.
pub struct TunReader {
    reader: DeviceReader,
}

impl PacketRead for TunReader {
    async fn read_packet(&mut self, buf: &mut [u8]) -> VpnResult<usize> {
        self.reader.read(buf).await.map_err(VpnError::Network)
    }
}

/// Write half of a split TUN device.
pub struct TunWriter {
    writer: DeviceWriter,
}

impl PacketWrite for TunWriter {
    async fn write_packet(&mut self, packet: &[u8]) -> VpnResult<()> {
        self.writer.write_all(packet).await.map_err(VpnError::Network)
    }
}

//! Connection session: the per-connection data path workers.
//!
//! A session runs three tasks against one authorized connection:
//!
//! ```text
//!  interface reader ─┐                     ┌─► sender ──► TCP
//!  (process-long)    ├─► outbound queue ───┘
//!  heartbeat ────────┘
//!  TCP ──► receiver ──► TUN writer
//! ```
//!
//! All three share one `CancellationToken`. Whichever worker hits a terminal
//! failure first cancels it, and every worker selects on it, so the session
//! winds down as a whole. The interface reader is not part of the session;
//! it keeps feeding the queue across reconnects.

use crate::vpn_core::config::ClientTimings;
use crate::vpn_core::device::{PacketRead, PacketWrite, PACKET_BUFFER_SIZE};
use crate::vpn_core::error::{VpnError, VpnResult};
use crate::vpn_core::frame::{self, Command};
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Upper bound on the graceful write-half shutdown after the sender exits.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// Pause after a zero-length read from the interface.
const EMPTY_READ_BACKOFF: Duration = Duration::from_millis(10);

/// Consumer side of the outbound queue, handed from one session's sender to
/// the next.
pub type SharedOutbound = Arc<Mutex<mpsc::Receiver<Bytes>>>;

/// Create the outbound queue shared by the interface reader, heartbeat
/// producers and senders.
pub fn outbound_queue(capacity: usize) -> (mpsc::Sender<Bytes>, SharedOutbound) {
    let (tx, rx) = mpsc::channel(capacity);
    (tx, Arc::new(Mutex::new(rx)))
}

/// Spawn the long-lived task that frames packets read from the interface
/// and pushes them to the outbound queue.
pub fn spawn_interface_reader<R: PacketRead>(
    mut reader: R,
    outbound: mpsc::Sender<Bytes>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut buf = vec![0u8; PACKET_BUFFER_SIZE];
        loop {
            match reader.read_packet(&mut buf).await {
                Ok(0) => tokio::time::sleep(EMPTY_READ_BACKOFF).await,
                Ok(n) => {
                    let frame = match frame::encode(Command::TunnelData, &buf[..n]) {
                        Ok(frame) => frame,
                        Err(e) => {
                            log::warn!("Dropping packet from TUN: {}", e);
                            continue;
                        }
                    };
                    if outbound.send(frame).await.is_err() {
                        log::warn!("Outbound queue closed, interface reader exiting");
                        break;
                    }
                }
                Err(e) => {
                    log::error!("TUN read error: {}", e);
                    break;
                }
            }
        }
    })
}

/// Run one session on an authorized connection until it fails.
///
/// Returns only after the heartbeat producer, sender and receiver have all
/// exited. A session never ends cleanly, so the result is always
/// [`VpnError::ConnectionLost`] carrying the workers' exit reasons.
pub async fn run_session<S, W>(
    stream: S,
    outbound_tx: mpsc::Sender<Bytes>,
    outbound_rx: SharedOutbound,
    tun_writer: Arc<Mutex<W>>,
    timings: ClientTimings,
) -> VpnResult<()>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
    W: PacketWrite,
{
    let (reader, writer) = tokio::io::split(stream);
    let stop = CancellationToken::new();

    let heartbeat_handle = tokio::spawn(heartbeat(
        outbound_tx,
        stop.clone(),
        timings.heartbeat_interval,
    ));
    let sender_handle = tokio::spawn(send_loop(
        writer,
        outbound_rx,
        stop.clone(),
        timings.write_timeout,
    ));
    let receiver_handle = tokio::spawn(receive_loop(reader, tun_writer, stop.clone()));

    let (heartbeat_result, sender_result, receiver_result) =
        tokio::join!(heartbeat_handle, sender_handle, receiver_handle);

    let mut reasons = Vec::new();
    for (name, result) in [
        ("heartbeat", heartbeat_result),
        ("sender", sender_result),
        ("receiver", receiver_result),
    ] {
        match result {
            Ok(Some(reason)) => reasons.push(reason),
            Ok(None) => {}
            Err(e) if e.is_panic() => reasons.push(format!("{} task panicked: {}", name, e)),
            Err(e) => reasons.push(format!("{} task failed: {}", name, e)),
        }
    }

    let reason = if reasons.is_empty() {
        "session stopped".to_string()
    } else {
        reasons.join("; ")
    };
    log::debug!("Session ended: {}", reason);

    Err(VpnError::ConnectionLost(reason))
}

/// Push an empty heartbeat frame every `interval` until stopped.
async fn heartbeat(
    outbound: mpsc::Sender<Bytes>,
    stop: CancellationToken,
    interval: Duration,
) -> Option<String> {
    let _guard = stop.clone().drop_guard();
    let ping = match frame::encode(Command::ClientHeartbeat, &[]) {
        Ok(ping) => ping,
        Err(e) => return Some(format!("Failed to encode heartbeat: {}", e)),
    };

    loop {
        tokio::select! {
            biased;
            _ = stop.cancelled() => return None,
            _ = tokio::time::sleep(interval) => {}
        }

        tokio::select! {
            biased;
            _ = stop.cancelled() => return None,
            sent = outbound.send(ping.clone()) => {
                if sent.is_err() {
                    return Some("Outbound queue closed".to_string());
                }
            }
        }
        log::trace!("Heartbeat queued");
    }
}

/// Drain the outbound queue onto the connection.
async fn send_loop<W>(
    mut writer: W,
    outbound: SharedOutbound,
    stop: CancellationToken,
    write_timeout: Duration,
) -> Option<String>
where
    W: AsyncWrite + Unpin,
{
    let _guard = stop.clone().drop_guard();
    let mut queue = outbound.lock().await;

    let reason = loop {
        let frame = tokio::select! {
            biased;
            _ = stop.cancelled() => break None,
            frame = queue.recv() => frame,
        };
        let Some(frame) = frame else {
            break Some("Outbound queue closed".to_string());
        };

        match tokio::time::timeout(write_timeout, writer.write_all(&frame)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                log::warn!("Failed to write to server: {}", e);
                break Some(format!("Write error: {}", e));
            }
            Err(_) => {
                log::warn!("Write to server timed out after {:?}", write_timeout);
                break Some(format!("Write timed out after {:?}", write_timeout));
            }
        }
    };

    stop.cancel();
    let _ = tokio::time::timeout(SHUTDOWN_TIMEOUT, writer.shutdown()).await;
    reason
}

/// Decode frames from the connection and deliver tunnel data to the interface.
async fn receive_loop<R, W>(
    mut reader: R,
    tun_writer: Arc<Mutex<W>>,
    stop: CancellationToken,
) -> Option<String>
where
    R: AsyncRead + Unpin,
    W: PacketWrite,
{
    let _guard = stop.clone().drop_guard();

    loop {
        let result = tokio::select! {
            biased;
            _ = stop.cancelled() => return None,
            result = frame::decode(&mut reader) => result,
        };

        let frame = match result {
            Ok(frame) => frame,
            Err(VpnError::ConnectionClosed) => {
                log::info!("Server closed the connection");
                return Some("Connection closed by server".to_string());
            }
            Err(e) => {
                log::warn!("Failed to read from server: {}", e);
                return Some(format!("Read error: {}", e));
            }
        };

        match frame.command {
            Command::ServerHeartbeat => log::trace!("Heartbeat from server"),
            Command::TunnelData => {
                let mut tun = tun_writer.lock().await;
                if let Err(e) = tun.write_packet(&frame.payload).await {
                    log::warn!("Failed to write to TUN: {}", e);
                }
            }
            Command::Unknown(tag) => log::debug!(
                "Skipping frame with unknown tag 0x{:02x} ({} bytes)",
                tag,
                frame.payload.len()
            ),
            other => log::debug!("Ignoring unexpected {} frame", other),
        }
    }
}

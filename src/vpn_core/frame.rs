//! Frame codec for the tunnel transport.
//!
//! Every message on the TCP stream is one self-delimited frame:
//!
//! ```text
//! ┌────────────────┬──────────────────────────┬─────────────────────┐
//! │ Command (1 B)  │ Payload length (4 bytes) │ Payload (N bytes)   │
//! │                │      big-endian u32      │                     │
//! └────────────────┴──────────────────────────┴─────────────────────┘
//! ```
//!
//! The payload is opaque to the codec: JSON for authorization, empty for
//! heartbeats and a raw IP packet for tunnel data. Frames with a tag this
//! client does not know still decode, as [`Command::Unknown`], so callers can
//! skip them.

use crate::vpn_core::error::{VpnError, VpnResult};
use bytes::{BufMut, Bytes, BytesMut};
use std::io::ErrorKind;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Size of the frame header (command byte + length prefix).
pub const FRAME_HEADER_LEN: usize = 1 + 4;

/// Upper bound on the payload length accepted by [`encode`] and [`decode`].
pub const MAX_PAYLOAD_SIZE: usize = 65536;

/// Frame command tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// Authorization request (client -> server).
    ClientAuthorize,
    /// Authorization response (server -> client).
    ServerAuthorize,
    /// Keepalive (client -> server).
    ClientHeartbeat,
    /// Keepalive (server -> client).
    ServerHeartbeat,
    /// Raw IP packet, either direction.
    TunnelData,
    /// Any other tag, e.g. from a newer server.
    Unknown(u8),
}

impl Command {
    /// Parse a command tag from its wire byte.
    pub const fn from_byte(b: u8) -> Self {
        match b {
            0x01 => Self::ClientAuthorize,
            0x02 => Self::ServerAuthorize,
            0x03 => Self::ClientHeartbeat,
            0x04 => Self::ServerHeartbeat,
            0x05 => Self::TunnelData,
            other => Self::Unknown(other),
        }
    }

    /// Wire byte for this command.
    pub const fn as_byte(self) -> u8 {
        match self {
            Self::ClientAuthorize => 0x01,
            Self::ServerAuthorize => 0x02,
            Self::ClientHeartbeat => 0x03,
            Self::ServerHeartbeat => 0x04,
            Self::TunnelData => 0x05,
            Self::Unknown(b) => b,
        }
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::ClientAuthorize => "ClientAuthorize",
            Self::ServerAuthorize => "ServerAuthorize",
            Self::ClientHeartbeat => "ClientHeartbeat",
            Self::ServerHeartbeat => "ServerHeartbeat",
            Self::TunnelData => "TunnelData",
            Self::Unknown(b) => return write!(f, "Unknown(0x{:02x})", b),
        };
        f.write_str(name)
    }
}

impl From<u8> for Command {
    fn from(value: u8) -> Self {
        Self::from_byte(value)
    }
}

/// A decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: Command,
    pub payload: Bytes,
}

/// Encode a frame into a single contiguous buffer.
pub fn encode(command: Command, payload: &[u8]) -> VpnResult<Bytes> {
    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(VpnError::Protocol(format!(
            "Payload too large: {} bytes (max {})",
            payload.len(),
            MAX_PAYLOAD_SIZE
        )));
    }

    let mut buf = BytesMut::with_capacity(FRAME_HEADER_LEN + payload.len());
    buf.put_u8(command.as_byte());
    buf.put_u32(payload.len() as u32);
    buf.put_slice(payload);
    Ok(buf.freeze())
}

/// Read exactly one frame from `reader`.
///
/// Returns [`VpnError::ConnectionClosed`] if the stream ends before the first
/// header byte and [`VpnError::Protocol`] if it ends anywhere inside a frame
/// or declares a payload over [`MAX_PAYLOAD_SIZE`]. Unknown tags are not an
/// error; the payload is consumed so the stream stays aligned.
pub async fn decode<R: AsyncRead + Unpin>(reader: &mut R) -> VpnResult<Frame> {
    let mut tag = [0u8; 1];
    match reader.read_exact(&mut tag).await {
        Ok(_) => {}
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Err(VpnError::ConnectionClosed),
        Err(e) => return Err(VpnError::Network(e)),
    }
    let command = Command::from_byte(tag[0]);

    let mut len_buf = [0u8; 4];
    read_body(reader, &mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_PAYLOAD_SIZE {
        return Err(VpnError::Protocol(format!(
            "Declared payload length {} exceeds limit {}",
            len, MAX_PAYLOAD_SIZE
        )));
    }

    let mut payload = vec![0u8; len];
    read_body(reader, &mut payload).await?;

    Ok(Frame {
        command,
        payload: Bytes::from(payload),
    })
}

async fn read_body<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut [u8]) -> VpnResult<()> {
    match reader.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
            Err(VpnError::Protocol("Truncated frame".into()))
        }
        Err(e) => Err(VpnError::Network(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_command_byte_roundtrip() {
        for cmd in [
            Command::ClientAuthorize,
            Command::ServerAuthorize,
            Command::ClientHeartbeat,
            Command::ServerHeartbeat,
            Command::TunnelData,
        ] {
            assert_eq!(Command::from_byte(cmd.as_byte()), cmd);
        }
    }

    #[test]
    fn test_command_keeps_unknown_tags() {
        assert_eq!(Command::from_byte(0x00), Command::Unknown(0x00));
        assert_eq!(Command::from(0x06), Command::Unknown(0x06));
        assert_eq!(Command::Unknown(0xff).as_byte(), 0xff);
        assert_eq!(Command::Unknown(0x09).to_string(), "Unknown(0x09)");
    }

    #[test]
    fn test_encode_layout() {
        let frame = encode(Command::TunnelData, &[0x45, 0x00, 0x00, 0x14]).unwrap();
        assert_eq!(frame.len(), FRAME_HEADER_LEN + 4);
        assert_eq!(frame[0], 0x05);
        assert_eq!(&frame[1..5], &4u32.to_be_bytes());
        assert_eq!(&frame[5..], &[0x45, 0x00, 0x00, 0x14]);
    }

    #[test]
    fn test_encode_rejects_oversized_payload() {
        let payload = vec![0u8; MAX_PAYLOAD_SIZE + 1];
        assert!(matches!(
            encode(Command::TunnelData, &payload),
            Err(VpnError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn test_decode_roundtrip() {
        for len in [1, 20, 1400, 1500, 9000, MAX_PAYLOAD_SIZE - 1, MAX_PAYLOAD_SIZE] {
            let packet: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
            let encoded = encode(Command::TunnelData, &packet).unwrap();
            assert_eq!(encoded.len(), FRAME_HEADER_LEN + len);

            let mut cursor = Cursor::new(encoded.to_vec());
            let frame = decode(&mut cursor).await.unwrap();
            assert_eq!(frame.command, Command::TunnelData);
            assert_eq!(frame.payload.as_ref(), packet.as_slice(), "len {}", len);
        }
    }

    #[tokio::test]
    async fn test_decode_empty_payload() {
        let encoded = encode(Command::ServerHeartbeat, &[]).unwrap();
        let mut cursor = Cursor::new(encoded.to_vec());
        let frame = decode(&mut cursor).await.unwrap();
        assert_eq!(frame.command, Command::ServerHeartbeat);
        assert!(frame.payload.is_empty());
    }

    #[tokio::test]
    async fn test_decode_back_to_back_frames() {
        let mut stream = Vec::new();
        stream.extend_from_slice(&encode(Command::ServerHeartbeat, &[]).unwrap());
        stream.extend_from_slice(&encode(Command::TunnelData, b"abc").unwrap());

        let mut cursor = Cursor::new(stream);
        assert_eq!(
            decode(&mut cursor).await.unwrap().command,
            Command::ServerHeartbeat
        );
        let second = decode(&mut cursor).await.unwrap();
        assert_eq!(second.payload.as_ref(), b"abc");
        assert!(matches!(
            decode(&mut cursor).await,
            Err(VpnError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_decode_every_strict_prefix_is_truncated() {
        let encoded = encode(Command::TunnelData, b"hello tunnel").unwrap();
        for cut in 1..encoded.len() {
            let mut cursor = Cursor::new(encoded[..cut].to_vec());
            match decode(&mut cursor).await {
                Err(VpnError::Protocol(msg)) => assert_eq!(msg, "Truncated frame"),
                other => panic!("prefix of {} bytes decoded as {:?}", cut, other),
            }
        }
    }

    #[tokio::test]
    async fn test_decode_empty_stream_is_closed() {
        let mut cursor = Cursor::new(Vec::new());
        assert!(matches!(
            decode(&mut cursor).await,
            Err(VpnError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_decode_rejects_length_over_limit() {
        assert_eq!(MAX_PAYLOAD_SIZE, 65536);
        for tag in [Command::TunnelData.as_byte(), 0x7f] {
            let mut raw = vec![tag];
            raw.extend_from_slice(&65537u32.to_be_bytes());
            raw.extend_from_slice(&vec![0u8; 65537]);
            let mut cursor = Cursor::new(raw);
            match decode(&mut cursor).await {
                Err(VpnError::Protocol(msg)) => assert!(msg.contains("65537"), "{}", msg),
                other => panic!("tag 0x{:02x} decoded as {:?}", tag, other),
            }
        }
    }

    #[tokio::test]
    async fn test_decode_unknown_tag_keeps_stream_aligned() {
        let mut raw = vec![0x09, 0, 0, 0, 2, 0xaa, 0xbb];
        raw.extend_from_slice(&encode(Command::TunnelData, b"next").unwrap());

        let mut cursor = Cursor::new(raw);
        let unknown = decode(&mut cursor).await.unwrap();
        assert_eq!(unknown.command, Command::Unknown(0x09));
        assert_eq!(unknown.payload.as_ref(), &[0xaa, 0xbb]);

        let next = decode(&mut cursor).await.unwrap();
        assert_eq!(next.command, Command::TunnelData);
        assert_eq!(next.payload.as_ref(), b"next");
    }
}

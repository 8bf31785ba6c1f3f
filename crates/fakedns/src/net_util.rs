use bytes::BytesMut;
use std::io;
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};

use dns_types::protocol::types::HEADER_MASK_TC;

/// Largest message which goes over UDP without being truncated.
pub const UDP_MAX_LEN: usize = 512;

/// Size of the DNS header.  Anything shorter is not a message.
const HEADER_LEN: usize = 12;

/// Read a DNS message from a TCP stream.
///
/// A DNS TCP message is slightly different to a DNS UDP message: it
/// has a big-endian u16 prefix giving the total length of the
/// message.
///
/// # Errors
///
/// If the stream ends early or cannot be read.  The message ID is
/// included in the error when enough of the message arrived.
pub async fn read_tcp_bytes(stream: &mut TcpStream) -> Result<BytesMut, TcpError> {
    let size = stream
        .read_u16()
        .await
        .map_err(|error| TcpError::IO { id: None, error })?;

    let expected = size as usize;
    let mut bytes = BytesMut::with_capacity(expected);
    while bytes.len() < expected {
        match stream.read_buf(&mut bytes).await {
            Ok(0) => {
                return Err(TcpError::TooShort {
                    id: message_id(&bytes),
                    expected,
                    actual: bytes.len(),
                });
            }
            Err(error) => {
                return Err(TcpError::IO {
                    id: message_id(&bytes),
                    error,
                });
            }
            Ok(_) => (),
        }
    }
    bytes.truncate(expected);

    Ok(bytes)
}

fn message_id(bytes: &[u8]) -> Option<u16> {
    if bytes.len() >= 2 {
        Some(u16::from_be_bytes([bytes[0], bytes[1]]))
    } else {
        None
    }
}

/// An error that can occur when reading a DNS TCP message.
#[derive(Debug, thiserror::Error)]
pub enum TcpError {
    #[error("expected {expected} octets but got {actual}")]
    TooShort {
        id: Option<u16>,
        expected: usize,
        actual: usize,
    },

    #[error("read error: {error}")]
    IO { id: Option<u16>, error: io::Error },
}

impl TcpError {
    pub fn id(&self) -> Option<u16> {
        match self {
            TcpError::TooShort { id, .. } | TcpError::IO { id, .. } => *id,
        }
    }
}

/// Write a serialised message to a UDP channel, to the given address.
/// Messages over 512 octets are cut short and have the TC flag set.
///
/// # Errors
///
/// If the message is shorter than a header, or sending fails.
pub async fn send_udp_bytes_to(
    sock: &UdpSocket,
    target: SocketAddr,
    bytes: &mut [u8],
) -> Result<(), io::Error> {
    check_header(bytes)?;

    if bytes.len() > UDP_MAX_LEN {
        bytes[2] |= HEADER_MASK_TC;
        sock.send_to(&bytes[..UDP_MAX_LEN], target).await?;
    } else {
        bytes[2] &= !HEADER_MASK_TC;
        sock.send_to(bytes, target).await?;
    }

    Ok(())
}

/// Write a serialised message to a TCP channel.  This sends a
/// two-byte length prefix (big-endian u16) and sets or clears the TC
/// flag as appropriate.
///
/// # Errors
///
/// If the message is shorter than a header, or sending fails.
pub async fn send_tcp_bytes(stream: &mut TcpStream, bytes: &mut [u8]) -> Result<(), io::Error> {
    check_header(bytes)?;

    let len = if let Ok(len) = bytes.len().try_into() {
        bytes[2] &= !HEADER_MASK_TC;
        len
    } else {
        bytes[2] |= HEADER_MASK_TC;
        u16::MAX
    };

    stream.write_all(&len.to_be_bytes()).await?;
    stream.write_all(&bytes[..(len as usize)]).await?;

    Ok(())
}

fn check_header(bytes: &[u8]) -> Result<(), io::Error> {
    if bytes.len() < HEADER_LEN {
        Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("message too short: {} octets", bytes.len()),
        ))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tokio::net::TcpListener;

    use super::*;

    #[tokio::test]
    async fn tcp_round_trip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();

        let client = tokio::spawn(async move {
            let mut stream = TcpStream::connect(address).await.unwrap();
            let mut message = vec![0x12, 0x34, 0b0000_0010, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0xff];
            send_tcp_bytes(&mut stream, &mut message).await.unwrap();
        });

        let (mut stream, _) = listener.accept().await.unwrap();
        let bytes = read_tcp_bytes(&mut stream).await.unwrap();
        client.await.unwrap();

        assert_eq!(13, bytes.len());
        assert_eq!(0x12, bytes[0]);
        assert_eq!(0, bytes[2] & HEADER_MASK_TC);
    }

    #[tokio::test]
    async fn tcp_short_read_keeps_id() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();

        let client = tokio::spawn(async move {
            let mut stream = TcpStream::connect(address).await.unwrap();
            stream.write_all(&[0, 20, 0xab, 0xcd, 0]).await.unwrap();
        });

        let (mut stream, _) = listener.accept().await.unwrap();
        client.await.unwrap();
        let err = read_tcp_bytes(&mut stream).await.unwrap_err();

        assert_eq!(Some(0xabcd), err.id());
        assert!(matches!(
            err,
            TcpError::TooShort {
                expected: 20,
                actual: 3,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn udp_truncates_long_messages() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        let mut message = vec![0; 600];
        send_udp_bytes_to(&server, client.local_addr().unwrap(), &mut message)
            .await
            .unwrap();

        let mut buf = vec![0; 1024];
        let (size, _) = client.recv_from(&mut buf).await.unwrap();
        assert_eq!(UDP_MAX_LEN, size);
        assert_ne!(0, buf[2] & HEADER_MASK_TC);
    }

    #[tokio::test]
    async fn rejects_headerless_messages() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let mut message = vec![0; 4];

        assert!(send_udp_bytes_to(&server, "127.0.0.1:9".parse().unwrap(), &mut message)
            .await
            .is_err());
    }
}

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context as _;
use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _};
use tokio::net::{TcpStream, UdpSocket};

use crate::MAX_UDP_PAYLOAD;

/// An enum that abstracts the underlying connection, so that serving clients and talking to
/// upstream resolvers share the same framing logic
pub enum Connection {
    Tcp(TcpStream),
    /// `None` means the socket is connected to its peer
    Udp((Arc<UdpSocket>, Option<SocketAddr>)),
}

impl Connection {
    pub async fn send_encoded_packet(&mut self, src: &[u8]) -> anyhow::Result<()> {
        match self {
            Connection::Tcp(socket) => {
                let length = u16::try_from(src.len())
                    .context("TCP: packet doesn't fit into a length prefix")?
                    .to_be_bytes();
                socket
                    .write_all(&length)
                    .await
                    .context("TCP: error while sending packet's length")?;
                socket
                    .write_all(src)
                    .await
                    .context("TCP: error while sending a DNS packet")?;
            }
            Connection::Udp((socket, Some(addr))) => {
                socket
                    .send_to(src, *addr)
                    .await
                    .with_context(|| format!("UDP: error while sending a DNS packet to {}", addr))?;
            }
            Connection::Udp((socket, None)) => {
                socket
                    .send(src)
                    .await
                    .context("UDP: error while sending a DNS packet")?;
            }
        };

        Ok(())
    }

    /// Reads a single DNS message. For UDP this expects a connected socket.
    pub async fn read(&mut self) -> anyhow::Result<Vec<u8>> {
        match self {
            Connection::Tcp(socket) => {
                let length = socket
                    .read_u16()
                    .await
                    .context("TCP: error while reading packet's length")? as usize;
                let mut dst = vec![0; length];
                socket
                    .read_exact(&mut dst)
                    .await
                    .context("TCP: error while reading a packet")?;
                Ok(dst)
            }
            Connection::Udp((socket, _)) => {
                let mut dst = vec![0; MAX_UDP_PAYLOAD];
                let length = socket
                    .recv(&mut dst)
                    .await
                    .context("UDP: error while reading a packet")?;
                dst.truncate(length);
                Ok(dst)
            }
        }
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        match self {
            Connection::Tcp(socket) => socket.peer_addr().ok(),
            Connection::Udp((socket, addr)) => addr.or_else(|| socket.peer_addr().ok()),
        }
    }

    pub fn is_tcp(&self) -> bool {
        matches!(self, Connection::Tcp(_))
    }
}

use std::future::Future;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use tokio::net::{TcpSocket, UdpSocket};

use crate::{Connection, Transport};

pub const DEFAULT_UPSTREAM_TIMEOUT: Duration = Duration::from_secs(2);

/// Sends an encoded DNS query to an upstream resolver and returns its encoded response
pub trait Exchange: Send + Sync + 'static {
    /// `source` binds the outgoing socket to a specific local address
    fn exchange(
        &self,
        query: &[u8],
        upstream: SocketAddr,
        source: Option<SocketAddr>,
    ) -> impl Future<Output = anyhow::Result<Vec<u8>>> + Send;
}

#[derive(Debug, Clone)]
pub struct NetworkExchange {
    transport: Transport,
    timeout: Duration,
}

impl NetworkExchange {
    pub fn new(transport: Transport) -> Self {
        NetworkExchange {
            transport,
            timeout: DEFAULT_UPSTREAM_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn connect(&self, upstream: SocketAddr, source: Option<SocketAddr>) -> anyhow::Result<Connection> {
        let connection = match self.transport {
            Transport::Udp => {
                let bind_addr = source.map_or_else(|| unspecified_addr(&upstream), ephemeral_port);
                let socket = UdpSocket::bind(bind_addr)
                    .await
                    .with_context(|| format!("UDP: unable to bind a socket to {}", bind_addr))?;
                socket
                    .connect(upstream)
                    .await
                    .context("UDP: unable to connect to the upstream resolver")?;
                Connection::Udp((Arc::new(socket), None))
            }
            Transport::Tcp => {
                let socket = match upstream {
                    SocketAddr::V4(_) => TcpSocket::new_v4(),
                    SocketAddr::V6(_) => TcpSocket::new_v6(),
                }
                .context("TCP: unable to create a socket")?;
                if let Some(source) = source.map(ephemeral_port) {
                    socket
                        .bind(source)
                        .with_context(|| format!("TCP: unable to bind a socket to {}", source))?;
                }
                let stream = socket
                    .connect(upstream)
                    .await
                    .context("TCP: unable to connect to the upstream resolver")?;
                Connection::Tcp(stream)
            }
        };

        Ok(connection)
    }
}

impl Exchange for NetworkExchange {
    async fn exchange(
        &self,
        query: &[u8],
        upstream: SocketAddr,
        source: Option<SocketAddr>,
    ) -> anyhow::Result<Vec<u8>> {
        let exchange = async {
            let mut connection = self.connect(upstream, source).await?;
            connection
                .send_encoded_packet(query)
                .await
                .context("error while forwarding the query")?;
            connection.read().await.context("error while reading the response")
        };

        let response = tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| anyhow::anyhow!("{} didn't respond within {:?}", upstream, self.timeout))??;

        // The first two bytes of a message are its ID
        if response.len() < 2 || response.get(..2) != query.get(..2) {
            anyhow::bail!("{} responded with a mismatched ID", upstream);
        }

        Ok(response)
    }
}

/// Only the IP of a source address is kept, the port is left to the OS so that concurrent
/// queries don't fight over it
fn ephemeral_port(source: SocketAddr) -> SocketAddr {
    SocketAddr::new(source.ip(), 0)
}

fn unspecified_addr(upstream: &SocketAddr) -> SocketAddr {
    let ip: IpAddr = match upstream {
        SocketAddr::V4(_) => Ipv4Addr::UNSPECIFIED.into(),
        SocketAddr::V6(_) => Ipv6Addr::UNSPECIFIED.into(),
    };
    SocketAddr::new(ip, 0)
}

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tracing::Instrument as _;

use crate::{
    AddressSetSink, Connection, Exchange, NetworkExchange, NftSink, Resolution, Resolver, Transport, MAX_UDP_PAYLOAD,
};

/// A TCP client that stays silent this long gets disconnected
const TCP_IDLE_TIMEOUT: Duration = Duration::from_secs(10);

enum Listener {
    Udp(Arc<UdpSocket>),
    Tcp(TcpListener),
}

pub struct DnsServer<E = NetworkExchange, S = NftSink> {
    listener: Listener,
    resolver: Arc<Resolver<E, S>>,
    permits: Arc<Semaphore>,
}

impl<E: Exchange, S: AddressSetSink> DnsServer<E, S> {
    pub async fn bind(
        addr: SocketAddr,
        transport: Transport,
        resolver: Arc<Resolver<E, S>>,
        max_parallel_queries: usize,
    ) -> anyhow::Result<Self> {
        let listener = match transport {
            Transport::Udp => Listener::Udp(Arc::new(
                UdpSocket::bind(addr)
                    .await
                    .with_context(|| format!("error while binding a UDP socket to {}", addr))?,
            )),
            Transport::Tcp => Listener::Tcp(
                TcpListener::bind(addr)
                    .await
                    .with_context(|| format!("error while binding a TcpListener to {}", addr))?,
            ),
        };

        Ok(DnsServer {
            listener,
            resolver,
            permits: Arc::new(Semaphore::new(max_parallel_queries.max(1))),
        })
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        match &self.listener {
            Listener::Udp(socket) => socket.local_addr(),
            Listener::Tcp(listener) => listener.local_addr(),
        }
        .context("listening socket has no local address")
    }

    /// Serves queries until the task is cancelled. Each UDP datagram and each TCP connection
    /// is handled by its own task.
    pub async fn run(&self) -> anyhow::Result<()> {
        tracing::info!(addr = ?self.local_addr().ok(), "Listening for DNS queries");

        let mut recv = vec![0; MAX_UDP_PAYLOAD];
        let mut handlers: JoinSet<()> = JoinSet::new();
        loop {
            tokio::select! {
                incoming = self.accept(&mut recv) => {
                    let (connection, query) = match incoming {
                        Ok(incoming) => incoming,
                        Err(e) => {
                            tracing::debug!("Error while receiving a query: {}", e);
                            continue;
                        }
                    };
                    tracing::trace!(peer = ?connection.peer_addr(), tcp = connection.is_tcp(), "New connection");

                    // Waits here when too many queries are in flight
                    let permit = Arc::clone(&self.permits)
                        .acquire_owned()
                        .await
                        .context("query permits are no longer available")?;
                    handlers.spawn(
                        handle_connection(connection, query, Arc::clone(&self.resolver), permit)
                            .in_current_span(),
                    );
                }
                Some(result) = handlers.join_next() => {
                    if let Err(e) = result {
                        tracing::error!("Query handling task failed to execute: {}", e);
                    }
                }
            }
        }
    }

    /// For UDP the datagram is the query, TCP queries are read by the handler
    async fn accept(&self, recv: &mut [u8]) -> std::io::Result<(Connection, Option<Vec<u8>>)> {
        match &self.listener {
            Listener::Udp(socket) => {
                let (length, from) = socket.recv_from(recv).await?;
                Ok((
                    Connection::Udp((Arc::clone(socket), Some(from))),
                    Some(recv[..length].to_vec()),
                ))
            }
            Listener::Tcp(listener) => {
                let (stream, _) = listener.accept().await?;
                Ok((Connection::Tcp(stream), None))
            }
        }
    }
}

async fn handle_connection<E: Exchange, S: AddressSetSink>(
    mut connection: Connection,
    query: Option<Vec<u8>>,
    resolver: Arc<Resolver<E, S>>,
    _permit: OwnedSemaphorePermit,
) {
    if let Some(query) = query {
        respond(&mut connection, &resolver, &query).await;
        return;
    }

    // TCP clients may send several queries over one connection
    loop {
        let query = match tokio::time::timeout(TCP_IDLE_TIMEOUT, connection.read()).await {
            Ok(Ok(query)) => query,
            Ok(Err(e)) => {
                tracing::trace!("TCP connection is done: {:#}", e);
                break;
            }
            Err(_) => {
                tracing::trace!("Closing an idle TCP connection");
                break;
            }
        };
        respond(&mut connection, &resolver, &query).await;
    }
}

async fn respond<E: Exchange, S: AddressSetSink>(connection: &mut Connection, resolver: &Resolver<E, S>, query: &[u8]) {
    match resolver.resolve(query).await {
        Resolution::Replied(response) => {
            if let Err(e) = connection.send_encoded_packet(&response).await {
                // Do not propagate the error, as it's per-client and thus recoverable
                tracing::error!("Error while sending a DNS response: {:#}", e);
            }
        }
        Resolution::Dropped => tracing::trace!(peer = ?connection.peer_addr(), "Leaving a query unanswered"),
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use split_dns_lib::{DnsPacket, QueryType, Question, ResourceData, ResourceRecord};
    use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _};
    use tokio::net::TcpStream;

    use super::*;
    use crate::cache::tests::memory_cache;
    use crate::config::tests::SAMPLE_CONFIG;
    use crate::publisher::tests::ChannelSink;
    use crate::{Classifier, Config, Publisher};

    const ADDRESS: Ipv4Addr = Ipv4Addr::new(93, 184, 216, 34);

    fn answer(query: &[u8]) -> Vec<u8> {
        let query = DnsPacket::from_bytes(query).unwrap();
        let mut response = DnsPacket::reply_to(&query);
        response.answers.push(ResourceRecord::new(
            query.questions[0].qname.clone(),
            ResourceData::A { address: ADDRESS },
            300,
        ));
        response.to_bytes().unwrap()
    }

    fn query(id: u16) -> Vec<u8> {
        let mut packet = DnsPacket::new();
        packet.header.id = id;
        packet.questions.push(Question::new("example.org", QueryType::A));
        packet.to_bytes().unwrap()
    }

    async fn server(transport: Transport, upstream: SocketAddr) -> DnsServer<NetworkExchange, ChannelSink> {
        let mut config = Config::from_json(SAMPLE_CONFIG).unwrap();
        config.transport = transport;
        config.default_upstreams = vec![upstream];

        let (sink, _rx) = ChannelSink::new();
        let resolver = Resolver::new(
            Arc::new(config),
            Arc::new(Classifier::default()),
            memory_cache().await,
            NetworkExchange::new(transport).with_timeout(Duration::from_millis(200)),
            Publisher::new(sink, "exts", "exts6"),
        );

        DnsServer::bind("127.0.0.1:0".parse().unwrap(), transport, Arc::new(resolver), 16)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn udp_queries_are_forwarded_and_answered() {
        let upstream = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let upstream_addr = upstream.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = [0u8; 512];
            let (length, from) = upstream.recv_from(&mut buf).await.unwrap();
            upstream.send_to(&answer(&buf[..length]), from).await.unwrap();
        });

        let server = server(Transport::Udp, upstream_addr).await;
        let server_addr = server.local_addr().unwrap();
        tokio::spawn(async move { server.run().await });

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let mut buf = [0u8; 512];
        for id in [1, 2] {
            // The second answer comes from the cache, the upstream only answers once
            client.send_to(&query(id), server_addr).await.unwrap();
            let length = tokio::time::timeout(Duration::from_secs(2), client.recv(&mut buf))
                .await
                .expect("no response")
                .unwrap();

            let response = DnsPacket::from_bytes(&buf[..length]).unwrap();
            assert_eq!(response.header.id, id);
            assert_eq!(response.answers[0].resource_data, ResourceData::A { address: ADDRESS });
        }
    }

    #[tokio::test]
    async fn unanswered_query_doesnt_stop_the_server() {
        // Bound but never answering
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        let server = server(Transport::Udp, silent.local_addr().unwrap()).await;
        let server_addr = server.local_addr().unwrap();
        tokio::spawn(async move { server.run().await });

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.send_to(&query(1), server_addr).await.unwrap();
        let mut buf = [0u8; 512];
        let result = tokio::time::timeout(Duration::from_millis(500), client.recv(&mut buf)).await;
        assert!(result.is_err());

        // Garbage is dropped as well, but the server must still be around to receive it
        client.send_to(&[0xff], server_addr).await.unwrap();
        let result = tokio::time::timeout(Duration::from_millis(100), client.recv(&mut buf)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn tcp_connection_carries_several_queries() {
        let upstream = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let upstream_addr = upstream.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = upstream.accept().await.unwrap();
            let length = stream.read_u16().await.unwrap();
            let mut query = vec![0u8; length as usize];
            stream.read_exact(&mut query).await.unwrap();
            let response = answer(&query);
            stream.write_u16(response.len() as u16).await.unwrap();
            stream.write_all(&response).await.unwrap();
        });

        let server = server(Transport::Tcp, upstream_addr).await;
        let server_addr = server.local_addr().unwrap();
        tokio::spawn(async move { server.run().await });

        let mut client = TcpStream::connect(server_addr).await.unwrap();
        for id in [7, 8] {
            let query = query(id);
            client.write_u16(query.len() as u16).await.unwrap();
            client.write_all(&query).await.unwrap();

            let length = client.read_u16().await.unwrap();
            let mut response = vec![0u8; length as usize];
            client.read_exact(&mut response).await.unwrap();

            let response = DnsPacket::from_bytes(&response).unwrap();
            assert_eq!(response.header.id, id);
            assert_eq!(response.answers.len(), 1);
        }
    }
}

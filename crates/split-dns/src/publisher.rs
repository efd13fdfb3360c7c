use std::future::Future;
use std::net::IpAddr;

use futures::future::join_all;
use tokio::process::Command;

use crate::AnswerRecordSet;

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("failed to run '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{ip} was rejected by set '{set}': {reason}")]
    Rejected { set: String, ip: IpAddr, reason: String },
}

/// A named collection of addresses that steers packets, e.g. an nftables set
pub trait AddressSetSink: Send + Sync + 'static {
    /// Adding an address that is already in the set must succeed
    fn add_element(&self, set_name: &str, ip: IpAddr) -> impl Future<Output = Result<(), SinkError>> + Send;
}

/// Adds elements with `nft add element <family> <table> <set> { <ip> }`, one process per address
#[derive(Debug, Clone)]
pub struct NftSink {
    program: String,
    family: String,
    table: String,
}

impl NftSink {
    pub fn new(family: impl Into<String>, table: impl Into<String>) -> Self {
        NftSink {
            program: "nft".to_owned(),
            family: family.into(),
            table: table.into(),
        }
    }
}

impl AddressSetSink for NftSink {
    async fn add_element(&self, set_name: &str, ip: IpAddr) -> Result<(), SinkError> {
        let element = format!("{{ {} }}", ip);
        let output = Command::new(&self.program)
            .args(["add", "element", self.family.as_str(), self.table.as_str(), set_name, element.as_str()])
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| SinkError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(SinkError::Rejected {
            set: set_name.to_owned(),
            ip,
            reason: match stderr.trim() {
                "" => output.status.to_string(),
                stderr => stderr.to_owned(),
            },
        })
    }
}

/// Pushes addresses of routed domains into the IPv4 or IPv6 set
pub struct Publisher<S> {
    sink: S,
    ipv4_set: String,
    ipv6_set: String,
}

impl<S: AddressSetSink> Publisher<S> {
    pub fn new(sink: S, ipv4_set: impl Into<String>, ipv6_set: impl Into<String>) -> Self {
        Publisher {
            sink,
            ipv4_set: ipv4_set.into(),
            ipv6_set: ipv6_set.into(),
        }
    }

    pub fn set_for(&self, ip: &IpAddr) -> &str {
        match ip {
            IpAddr::V4(_) => &self.ipv4_set,
            IpAddr::V6(_) => &self.ipv6_set,
        }
    }

    /// Failures are only logged, a failed address doesn't stop the others
    pub async fn publish(&self, domain: &str, records: &AnswerRecordSet) {
        let results = join_all(records.addresses().map(|ip| async move {
            let result = self.sink.add_element(self.set_for(&ip), ip).await;
            (ip, result)
        }))
        .await;

        for (ip, result) in results {
            match result {
                Ok(()) => tracing::trace!(domain, %ip, set = self.set_for(&ip), "Published an address"),
                Err(e) => tracing::warn!(domain, %ip, "Failed to publish an address: {}", e),
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::net::{Ipv4Addr, Ipv6Addr};

    use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

    use super::*;

    /// Forwards every `(set, ip)` pair to a channel, failing for `fail_for`
    pub(crate) struct ChannelSink {
        pub(crate) tx: UnboundedSender<(String, IpAddr)>,
        pub(crate) fail_for: Option<IpAddr>,
    }

    impl ChannelSink {
        pub(crate) fn new() -> (Self, UnboundedReceiver<(String, IpAddr)>) {
            let (tx, rx) = mpsc::unbounded_channel();
            (ChannelSink { tx, fail_for: None }, rx)
        }
    }

    impl AddressSetSink for ChannelSink {
        async fn add_element(&self, set_name: &str, ip: IpAddr) -> Result<(), SinkError> {
            if self.fail_for == Some(ip) {
                return Err(SinkError::Rejected {
                    set: set_name.to_owned(),
                    ip,
                    reason: "test".to_owned(),
                });
            }
            let _ = self.tx.send((set_name.to_owned(), ip));
            Ok(())
        }
    }

    fn drain(rx: &mut UnboundedReceiver<(String, IpAddr)>) -> Vec<(String, IpAddr)> {
        let mut published = Vec::new();
        while let Ok(item) = rx.try_recv() {
            published.push(item);
        }
        published
    }

    #[tokio::test]
    async fn addresses_go_to_the_set_of_their_family() {
        let (sink, mut rx) = ChannelSink::new();
        let publisher = Publisher::new(sink, "exts", "exts6");

        publisher
            .publish(
                "example.org",
                &AnswerRecordSet {
                    ipv4: vec![Ipv4Addr::new(1, 2, 3, 4)],
                    ipv6: vec![Ipv6Addr::LOCALHOST],
                },
            )
            .await;

        assert_eq!(
            drain(&mut rx),
            vec![
                ("exts".to_owned(), IpAddr::V4(Ipv4Addr::new(1, 2, 3, 4))),
                ("exts6".to_owned(), IpAddr::V6(Ipv6Addr::LOCALHOST)),
            ]
        );
    }

    #[tokio::test]
    async fn failure_doesnt_stop_other_addresses() {
        let (mut sink, mut rx) = ChannelSink::new();
        sink.fail_for = Some(IpAddr::V4(Ipv4Addr::new(1, 1, 1, 1)));
        let publisher = Publisher::new(sink, "exts", "exts6");

        publisher
            .publish(
                "example.org",
                &AnswerRecordSet {
                    ipv4: vec![Ipv4Addr::new(1, 1, 1, 1), Ipv4Addr::new(2, 2, 2, 2)],
                    ipv6: vec![],
                },
            )
            .await;

        assert_eq!(
            drain(&mut rx),
            vec![("exts".to_owned(), IpAddr::V4(Ipv4Addr::new(2, 2, 2, 2)))]
        );
    }

    #[tokio::test]
    async fn missing_program_is_a_spawn_error() {
        let sink = NftSink {
            program: "/nonexistent/nft".to_owned(),
            ..NftSink::new("inet", "gfw")
        };

        let result = sink.add_element("exts", IpAddr::V4(Ipv4Addr::LOCALHOST)).await;
        assert!(matches!(result, Err(SinkError::Spawn { .. })));
    }

    #[tokio::test]
    async fn failing_program_is_a_rejection() {
        let sink = NftSink {
            program: "false".to_owned(),
            ..NftSink::new("inet", "gfw")
        };

        let result = sink.add_element("exts", IpAddr::V4(Ipv4Addr::LOCALHOST)).await;
        assert!(matches!(result, Err(SinkError::Rejected { .. })));
    }
}

mod exchange;

use std::net::SocketAddr;

pub use exchange::{Exchange, NetworkExchange, DEFAULT_UPSTREAM_TIMEOUT};

use crate::{Classification, Config};

/// Name used in errors and logs for the group of non-routed domains
pub const DEFAULT_GROUP: &str = "default";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SelectError {
    #[error("no upstream resolver is available for the '{0}' group")]
    NoUpstreamAvailable(String),
}

/// Picks an upstream resolver uniformly at random from the group the domain was classified into
pub fn select_upstream(classification: Classification<'_>, config: &Config) -> Result<SocketAddr, SelectError> {
    let (group, upstreams) = match classification {
        Classification::Routed { policy_group } => (
            policy_group,
            config
                .upstreams_by_policy
                .get(policy_group)
                .map(Vec::as_slice)
                .unwrap_or_default(),
        ),
        Classification::Default => (DEFAULT_GROUP, config.default_upstreams.as_slice()),
    };

    pick_random(upstreams).ok_or_else(|| SelectError::NoUpstreamAvailable(group.to_owned()))
}

fn pick_random(upstreams: &[SocketAddr]) -> Option<SocketAddr> {
    if upstreams.is_empty() {
        return None;
    }
    upstreams.get(fastrand::usize(..upstreams.len())).copied()
}

use std::collections::HashMap;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};

use serde::Deserialize;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/tinydns.json";
pub const DEFAULT_DNS_PORT: u16 = 53;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read the config file {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse the config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Validation(String),
}

/// Protocol used both for listening and for talking to the upstream resolvers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    #[default]
    Udp,
    Tcp,
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transport::Udp => f.write_str("udp"),
            Transport::Tcp => f.write_str("tcp"),
        }
    }
}

/// On-disk representation, field names follow the historical `tinydns.json` layout.
/// Keys it doesn't know about are ignored, other tools may share the file.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawConfig {
    listen_addr: String,
    #[serde(default)]
    net: Transport,
    #[serde(default)]
    local_addr: Option<String>,
    default_up_server: Vec<String>,
    #[serde(default)]
    up_server_map: HashMap<String, Vec<String>>,
    #[serde(rename = "V4set", alias = "V4Set")]
    v4_set: String,
    #[serde(rename = "V6set", alias = "V6Set")]
    v6_set: String,
    #[serde(default = "default_nft_family")]
    nft_family: String,
    #[serde(default = "default_nft_table")]
    nft_table: String,
    #[serde(default)]
    cache_path: Option<PathBuf>,
    #[serde(default)]
    servfail_on_upstream_error: bool,
}

fn default_nft_family() -> String {
    "inet".to_owned()
}

fn default_nft_table() -> String {
    "gfw".to_owned()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub transport: Transport,
    /// Source address for queries about routed domains, `None` uses the default route
    pub source_addr: Option<SocketAddr>,
    pub default_upstreams: Vec<SocketAddr>,
    pub upstreams_by_policy: HashMap<String, Vec<SocketAddr>>,
    pub ipv4_set: String,
    pub ipv6_set: String,
    pub nft_family: String,
    pub nft_table: String,
    pub cache_path: Option<PathBuf>,
    /// Answer with SERVFAIL instead of staying silent when the upstream exchange fails
    pub servfail_on_upstream_error: bool,
}

impl Config {
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let data = tokio::fs::read_to_string(path).await.map_err(|source| ConfigError::Read {
            path: path.to_owned(),
            source,
        })?;

        Config::from_json(&data)
    }

    pub fn from_json(data: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = serde_json::from_str(data)?;

        let listen_addr = parse_addr("ListenAddr", &raw.listen_addr)?;
        // "0.0.0.0:53" is how the historical config spells "no explicit source"
        let no_source = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), DEFAULT_DNS_PORT);
        let source_addr = raw
            .local_addr
            .as_deref()
            .map(|addr| parse_addr("LocalAddr", addr))
            .transpose()?
            .filter(|addr| *addr != no_source);

        if raw.default_up_server.is_empty() {
            return Err(ConfigError::Validation(
                "DefaultUpServer must contain at least one upstream resolver".to_owned(),
            ));
        }
        let default_upstreams = parse_addrs("DefaultUpServer", &raw.default_up_server)?;

        let upstreams_by_policy = raw
            .up_server_map
            .iter()
            .map(|(group, addrs)| {
                parse_addrs(&format!("UpServerMap.{}", group), addrs).map(|addrs| (group.clone(), addrs))
            })
            .collect::<Result<HashMap<_, _>, _>>()?;

        for (field, set) in [("V4set", &raw.v4_set), ("V6set", &raw.v6_set)] {
            if set.trim().is_empty() {
                return Err(ConfigError::Validation(format!("{} must not be empty", field)));
            }
        }

        Ok(Config {
            listen_addr,
            transport: raw.net,
            source_addr,
            default_upstreams,
            upstreams_by_policy,
            ipv4_set: raw.v4_set,
            ipv6_set: raw.v6_set,
            nft_family: raw.nft_family,
            nft_table: raw.nft_table,
            cache_path: raw.cache_path,
            servfail_on_upstream_error: raw.servfail_on_upstream_error,
        })
    }
}

/// Accepts `host:port` or a bare IP address, in which case port 53 is assumed
fn parse_addr(field: &str, raw: &str) -> Result<SocketAddr, ConfigError> {
    let raw = raw.trim();
    raw.parse::<SocketAddr>()
        .or_else(|_| {
            raw.parse::<IpAddr>()
                .map(|ip| SocketAddr::new(ip, DEFAULT_DNS_PORT))
        })
        .map_err(|_| ConfigError::Validation(format!("{}: '{}' is not a valid address", field, raw)))
}

fn parse_addrs(field: &str, raw: &[String]) -> Result<Vec<SocketAddr>, ConfigError> {
    raw.iter().map(|addr| parse_addr(field, addr)).collect()
}

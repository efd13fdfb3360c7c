mod app;
pub use app::App;
mod cache;
pub use cache::{AnswerRecordSet, QueryCache, SqliteDb};
mod classifier;
pub use classifier::{Classification, Classifier, Rule, DEFAULT_RULES_PATH};
mod cli;
pub use cli::Args;
mod config;
pub use config::{Config, ConfigError, Transport, DEFAULT_CONFIG_PATH};
mod connection;
pub use connection::Connection;
mod logging;
pub use logging::setup_logging;
mod publisher;
pub use publisher::{AddressSetSink, NftSink, Publisher, SinkError};
mod resolver;
pub use resolver::{Observer, Operation, QueryEvent, Resolution, Resolver};
mod server;
pub use server::DnsServer;
mod upstream;
pub use upstream::{select_upstream, Exchange, NetworkExchange, SelectError, DEFAULT_UPSTREAM_TIMEOUT};

/// Largest UDP message accepted from clients and upstreams
pub const MAX_UDP_PAYLOAD: usize = 4096;
/// TTL of answers served from the cache, cached entries themselves never expire
pub const CACHED_RECORD_TTL: u32 = 60;

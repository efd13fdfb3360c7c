use std::sync::Arc;

use anyhow::Context as _;

use crate::cache::default_cache_path;
use crate::{
    Args, Classifier, Config, DnsServer, NetworkExchange, NftSink, Publisher, QueryCache, QueryEvent, Resolver,
    SqliteDb,
};

pub struct App;

impl App {
    /// Serves until the server fails or ctrl-c is received
    pub async fn run_until_completion(args: Args) -> anyhow::Result<()> {
        let config = Arc::new(
            Config::load(&args.config)
                .await
                .context("failed to load the configuration")?,
        );

        // Without rules every domain simply uses the default upstreams
        let classifier = Classifier::load(&args.rules).await.unwrap_or_else(|e| {
            tracing::warn!("{:#}, no domain will be routed", e);
            Classifier::default()
        });
        tracing::info!(rules = classifier.len(), path = ?args.rules, "Loaded routing rules");

        let cache_path = config
            .cache_path
            .clone()
            .or_else(default_cache_path)
            .context("no CachePath is configured and the user cache directory is unknown")?;
        let sqlite_db = SqliteDb::new(&cache_path)
            .await
            .context("failed to establish an SQLite DB connection")?;
        let cache = QueryCache::open(sqlite_db)
            .await
            .context("failed to initialize the cache")?;
        tracing::info!(path = ?cache_path, "Opened the cache");

        let publisher = Publisher::new(
            NftSink::new(&config.nft_family, &config.nft_table),
            &config.ipv4_set,
            &config.ipv6_set,
        );
        let mut resolver = Resolver::new(
            Arc::clone(&config),
            Arc::new(classifier),
            cache,
            NetworkExchange::new(config.transport),
            publisher,
        );
        resolver.set_observer(log_event);
        let resolver = Arc::new(resolver);

        let server = DnsServer::bind(
            config.listen_addr,
            config.transport,
            Arc::clone(&resolver),
            args.max_parallel_queries.into(),
        )
        .await
        .context("failed to instantiate the DNS server")?;

        let result = tokio::select! {
            result = server.run() => result,
            result = tokio::signal::ctrl_c() => {
                tracing::info!("Shutting down");
                result.context("failed to listen for the shutdown signal")
            }
        };

        resolver.close().await;
        result
    }
}

fn log_event(event: &QueryEvent) {
    tracing::debug!(
        domain = %event.domain,
        operation = %event.operation,
        upstream = ?event.upstream,
        "{}",
        event.message
    );
}

mod store;

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use anyhow::Context as _;
use serde::{Deserialize, Serialize};
use split_dns_lib::{QueryType, ResourceData, ResourceRecord};
pub use store::{default_cache_path, CacheTable, SqliteDb};

/// Addresses observed in an upstream answer, in the order they appeared
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerRecordSet {
    pub ipv4: Vec<Ipv4Addr>,
    pub ipv6: Vec<Ipv6Addr>,
}

impl AnswerRecordSet {
    /// Collects A and AAAA data, ignoring every other record and repeated addresses
    pub fn from_answers(answers: &[ResourceRecord]) -> Self {
        let mut set = AnswerRecordSet::default();

        for record in answers {
            match record.resource_data {
                ResourceData::A { address } if !set.ipv4.contains(&address) => set.ipv4.push(address),
                ResourceData::AAAA { address } if !set.ipv6.contains(&address) => set.ipv6.push(address),
                _ => {}
            }
        }

        set
    }

    pub fn is_empty(&self) -> bool {
        self.ipv4.is_empty() && self.ipv6.is_empty()
    }

    /// Answer records of type `query_type` for `name`
    pub fn to_records(&self, name: &str, query_type: QueryType, ttl: u32) -> Vec<ResourceRecord> {
        match query_type {
            QueryType::A => self
                .ipv4
                .iter()
                .map(|&address| ResourceRecord::new(name, ResourceData::A { address }, ttl))
                .collect(),
            QueryType::AAAA => self
                .ipv6
                .iter()
                .map(|&address| ResourceRecord::new(name, ResourceData::AAAA { address }, ttl))
                .collect(),
            _ => Vec::new(),
        }
    }

    pub fn addresses(&self) -> impl Iterator<Item = IpAddr> + '_ {
        self.ipv4
            .iter()
            .copied()
            .map(IpAddr::V4)
            .chain(self.ipv6.iter().copied().map(IpAddr::V6))
    }
}

/// Lowercased name with a single trailing root dot
pub fn cache_key(name: &str) -> String {
    format!("{}.", name.trim_end_matches('.').to_ascii_lowercase())
}

/// Answers cached per query type. Entries never expire.
#[derive(Debug, Clone)]
pub struct QueryCache {
    db: SqliteDb,
}

impl QueryCache {
    pub async fn open(db: SqliteDb) -> anyhow::Result<Self> {
        db.init_tables().await.context("error while preparing the cache tables")?;
        Ok(QueryCache { db })
    }

    /// A broken or unreadable entry is reported as a miss
    pub async fn lookup(&self, query_type: QueryType, fqdn: &str) -> Option<AnswerRecordSet> {
        let table = CacheTable::for_query_type(query_type)?;

        let records = match self.db.get(table, fqdn).await {
            Ok(Some(records)) => records,
            Ok(None) => {
                tracing::debug!(domain = fqdn, ?query_type, "Cache miss");
                return None;
            }
            Err(e) => {
                tracing::warn!(domain = fqdn, "Failed to read the cache: {:#}", e);
                return None;
            }
        };

        match serde_json::from_str(&records) {
            Ok(set) => {
                tracing::debug!(domain = fqdn, ?query_type, "Cache hit");
                Some(set)
            }
            Err(e) => {
                tracing::debug!(domain = fqdn, ?query_type, "Discarding a corrupt cache entry: {}", e);
                None
            }
        }
    }

    /// Types other than A and AAAA aren't cached, storing them does nothing
    pub async fn store(&self, query_type: QueryType, fqdn: &str, set: &AnswerRecordSet) -> anyhow::Result<()> {
        let Some(table) = CacheTable::for_query_type(query_type) else {
            return Ok(());
        };

        let records = serde_json::to_string(set).context("error while serializing the answer")?;
        self.db.set(table, fqdn, &records).await
    }

    pub async fn close(&self) {
        self.db.close().await;
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Arc;

    use tokio::task::JoinSet;

    use super::*;

    pub(crate) async fn memory_cache() -> QueryCache {
        QueryCache::open(SqliteDb::in_memory().await.unwrap()).await.unwrap()
    }

    fn sample_set() -> AnswerRecordSet {
        AnswerRecordSet {
            ipv4: vec!["93.184.216.34".parse().unwrap()],
            ipv6: vec![],
        }
    }

    #[test]
    fn record_set_from_answers() {
        let answers = [
            ResourceRecord::new(
                "www.example.org",
                ResourceData::CNAME {
                    cname: "example.org".to_owned(),
                },
                300,
            ),
            ResourceRecord::new("example.org", ResourceData::A { address: [1, 2, 3, 4].into() }, 300),
            ResourceRecord::new("example.org", ResourceData::A { address: [5, 6, 7, 8].into() }, 300),
            ResourceRecord::new("example.org", ResourceData::A { address: [1, 2, 3, 4].into() }, 300),
            ResourceRecord::new(
                "example.org",
                ResourceData::AAAA {
                    address: Ipv6Addr::LOCALHOST,
                },
                300,
            ),
        ];

        let set = AnswerRecordSet::from_answers(&answers);
        assert_eq!(set.ipv4, vec![Ipv4Addr::new(1, 2, 3, 4), Ipv4Addr::new(5, 6, 7, 8)]);
        assert_eq!(set.ipv6, vec![Ipv6Addr::LOCALHOST]);
        assert_eq!(set.addresses().count(), 3);
    }

    #[test]
    fn records_are_built_for_the_query_type() {
        let set = sample_set();

        assert_eq!(
            set.to_records("example.org", QueryType::A, 60),
            vec![ResourceRecord::new(
                "example.org",
                ResourceData::A {
                    address: Ipv4Addr::new(93, 184, 216, 34)
                },
                60
            )]
        );
        assert!(set.to_records("example.org", QueryType::AAAA, 60).is_empty());
    }

    #[test]
    fn cache_keys_are_normalized() {
        assert_eq!(cache_key("Example.ORG"), "example.org.");
        assert_eq!(cache_key("example.org."), "example.org.");
        assert_eq!(cache_key(""), ".");
    }

    #[tokio::test]
    async fn store_then_lookup() {
        let cache = memory_cache().await;

        cache.store(QueryType::A, "example.org.", &sample_set()).await.unwrap();

        assert_eq!(cache.lookup(QueryType::A, "example.org.").await, Some(sample_set()));
        assert_eq!(cache.lookup(QueryType::AAAA, "example.org.").await, None);
    }

    #[tokio::test]
    async fn other_types_bypass_the_cache() {
        let cache = memory_cache().await;

        cache.store(QueryType::NS, "example.org.", &sample_set()).await.unwrap();

        assert_eq!(cache.lookup(QueryType::NS, "example.org.").await, None);
        assert_eq!(cache.lookup(QueryType::A, "example.org.").await, None);
    }

    #[tokio::test]
    async fn corrupt_entry_is_a_miss() {
        let cache = memory_cache().await;

        cache.db.set(CacheTable::A, "example.org.", "{not json").await.unwrap();

        assert_eq!(cache.lookup(QueryType::A, "example.org.").await, None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_stores_and_lookups_on_one_key() {
        let dir = std::env::temp_dir().join(format!("split-dns-concurrency-{}", std::process::id()));
        let db = SqliteDb::new(&dir.join("cache.db")).await.unwrap();
        let cache = Arc::new(QueryCache::open(db).await.unwrap());

        let set_for = |i: u8| AnswerRecordSet {
            ipv4: vec![Ipv4Addr::new(10, 0, 0, i)],
            ipv6: vec![],
        };
        let stored = (0..32).map(set_for).collect::<Vec<_>>();

        let mut tasks = JoinSet::new();
        for set in stored.iter().cloned() {
            let cache = Arc::clone(&cache);
            tasks.spawn(async move {
                cache.store(QueryType::A, "example.org.", &set).await?;
                anyhow::Ok(cache.lookup(QueryType::A, "example.org.").await)
            });
        }

        while let Some(result) = tasks.join_next().await {
            let found = result.unwrap().expect("store shouldn't have failed");
            let found = found.expect("a stored entry must be found");
            assert!(stored.contains(&found), "{:?} was never stored", found);
        }

        let last = cache.lookup(QueryType::A, "example.org.").await.unwrap();
        assert!(stored.contains(&last));

        cache.close().await;
        let _ = std::fs::remove_dir_all(&dir);
    }
}

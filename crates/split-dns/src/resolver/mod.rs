mod event;

use std::sync::Arc;

pub use event::{Observer, Operation, QueryEvent};
use split_dns_lib::{DnsPacket, Question, ResponseCode};

use crate::cache::{cache_key, CacheTable};
use crate::upstream::select_upstream;
use crate::{
    AddressSetSink, AnswerRecordSet, Classification, Classifier, Config, Exchange, NetworkExchange, NftSink,
    Publisher, QueryCache, CACHED_RECORD_TTL,
};

/// What the front-end should do with a query once it's been resolved
#[derive(Debug, PartialEq, Eq)]
pub enum Resolution {
    /// Send these bytes back to the client
    Replied(Vec<u8>),
    /// Stay silent, the client will retry or time out
    Dropped,
}

/// Resolves one query at a time, shared by every query handler
pub struct Resolver<E = NetworkExchange, S = NftSink> {
    config: Arc<Config>,
    classifier: Arc<Classifier>,
    cache: QueryCache,
    exchange: E,
    publisher: Arc<Publisher<S>>,
    observer: Option<Arc<Observer>>,
}

impl<E: Exchange, S: AddressSetSink> Resolver<E, S> {
    pub fn new(
        config: Arc<Config>,
        classifier: Arc<Classifier>,
        cache: QueryCache,
        exchange: E,
        publisher: Publisher<S>,
    ) -> Self {
        Resolver {
            config,
            classifier,
            cache,
            exchange,
            publisher: Arc::new(publisher),
            observer: None,
        }
    }

    /// Replaces the previous observer, if any
    pub fn set_observer(&mut self, observer: impl Fn(&QueryEvent) + Send + Sync + 'static) {
        self.observer = Some(Arc::new(observer));
    }

    fn emit(&self, event: QueryEvent) {
        if let Some(observer) = self.observer.as_ref() {
            observer(&event);
        }
    }

    /// Takes an encoded query and produces at most one encoded reply.
    ///
    /// Only the first question is looked at. Answers come from the cache when possible,
    /// otherwise the original query is forwarded to an upstream resolver picked by the
    /// domain's classification and the upstream's reply is relayed untouched.
    pub async fn resolve(&self, query: &[u8]) -> Resolution {
        let packet = match DnsPacket::from_bytes(query) {
            Ok(packet) => packet,
            Err(e) => {
                tracing::debug!("Dropping a query that can't be decoded: {:#}", e);
                return Resolution::Dropped;
            }
        };
        let Some(question) = packet.questions.first() else {
            tracing::debug!(id = packet.header.id, "Dropping a query without a question");
            return Resolution::Dropped;
        };

        let domain = question.qname.trim_end_matches('.');
        let fqdn = cache_key(domain);
        let query_type = question.query_type;

        self.emit(QueryEvent::new(
            domain,
            Operation::Request,
            format!("query {} {:?}", domain, query_type),
        ));

        if let Some(records) = self.cache.lookup(query_type, &fqdn).await {
            self.emit(QueryEvent::new(
                domain,
                Operation::Cached,
                format!("answering {} {:?} from the cache", domain, query_type),
            ));
            return match cached_reply(&packet, question, &records) {
                Ok(reply) => Resolution::Replied(reply),
                Err(e) => {
                    tracing::error!(domain, "Failed to encode a cached answer: {:#}", e);
                    Resolution::Dropped
                }
            };
        }

        let classification = self.classifier.classify(domain);
        let upstream = match select_upstream(classification, &self.config) {
            Ok(upstream) => upstream,
            Err(e) => {
                tracing::warn!(domain, "{}, falling back to the default group", e);
                match select_upstream(Classification::Default, &self.config) {
                    Ok(upstream) => upstream,
                    Err(e) => {
                        tracing::warn!(domain, "{}", e);
                        return self.upstream_failure(&packet);
                    }
                }
            }
        };
        // Routed domains leave through the configured source address
        let source = self.config.source_addr.filter(|_| classification.is_routed());

        self.emit(
            QueryEvent::new(
                domain,
                Operation::Resolving,
                format!("resolving {} {:?} via {}", domain, query_type, upstream),
            )
            .with_upstream(upstream),
        );

        let response = match self.exchange.exchange(query, upstream, source).await {
            Ok(response) => response,
            Err(e) => {
                tracing::debug!(domain, %upstream, "Error while forwarding a query to the upstream resolver: {:#}", e);
                return self.upstream_failure(&packet);
            }
        };

        // The client gets the upstream's bytes either way, decoding is only needed to cache
        // and publish the addresses
        match DnsPacket::from_bytes(&response) {
            Ok(decoded) if decoded.header.response_code == ResponseCode::Success => {
                let records = AnswerRecordSet::from_answers(&decoded.answers);
                if !records.is_empty() {
                    self.save(domain, &fqdn, question, &records).await;
                    if classification.is_routed() {
                        let publisher = Arc::clone(&self.publisher);
                        let domain = domain.to_owned();
                        tokio::spawn(async move { publisher.publish(&domain, &records).await });
                    }
                }
            }
            Ok(decoded) => {
                tracing::debug!(domain, response_code = ?decoded.header.response_code, "Not caching an unsuccessful answer");
            }
            Err(e) => {
                tracing::debug!(domain, "Upstream response can't be decoded, not caching it: {:#}", e);
            }
        }

        Resolution::Replied(response)
    }

    /// Only called for NOERROR answers carrying at least one address, so address-less and
    /// failed answers are never cached and always go upstream
    async fn save(&self, domain: &str, fqdn: &str, question: &Question, records: &AnswerRecordSet) {
        if CacheTable::for_query_type(question.query_type).is_none() {
            return;
        }

        self.emit(QueryEvent::new(
            domain,
            Operation::Saving,
            format!("saving {} {:?} into the cache", domain, question.query_type),
        ));
        if let Err(e) = self.cache.store(question.query_type, fqdn, records).await {
            tracing::warn!(domain, "Failed to cache an answer: {:#}", e);
        }
    }

    fn upstream_failure(&self, query: &DnsPacket) -> Resolution {
        if !self.config.servfail_on_upstream_error {
            return Resolution::Dropped;
        }

        let mut response = DnsPacket::reply_to(query);
        response.header.response_code = ResponseCode::ServerFailure;
        match response.to_bytes() {
            Ok(reply) => Resolution::Replied(reply),
            Err(e) => {
                tracing::error!("Failed to encode a SERVFAIL response: {:#}", e);
                Resolution::Dropped
            }
        }
    }

    pub async fn close(&self) {
        self.cache.close().await;
    }
}

/// Authoritative answer built from a cached record set, named as the client asked
fn cached_reply(query: &DnsPacket, question: &Question, records: &AnswerRecordSet) -> anyhow::Result<Vec<u8>> {
    let mut response = DnsPacket::reply_to(query);
    response.header.is_authoritative = true;
    response.answers = records.to_records(&question.qname, question.query_type, CACHED_RECORD_TTL);
    response.to_bytes()
}

use std::fmt;
use std::net::SocketAddr;

/// Stage of a resolution reported to the observer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Request,
    Cached,
    Resolving,
    Saving,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Operation::Request => "request",
            Operation::Cached => "cached",
            Operation::Resolving => "resolving",
            Operation::Saving => "saving",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryEvent {
    pub domain: String,
    pub operation: Operation,
    /// Never set, wildcard rules don't exist
    pub is_wildcard: bool,
    pub message: String,
    pub upstream: Option<SocketAddr>,
}

impl QueryEvent {
    pub fn new(domain: &str, operation: Operation, message: impl Into<String>) -> Self {
        QueryEvent {
            domain: domain.to_owned(),
            operation,
            is_wildcard: false,
            message: message.into(),
            upstream: None,
        }
    }

    pub fn with_upstream(mut self, upstream: SocketAddr) -> Self {
        self.upstream = Some(upstream);
        self
    }
}

/// Receives every [`QueryEvent`]. Called inline, so it shouldn't block.
pub type Observer = dyn Fn(&QueryEvent) + Send + Sync;

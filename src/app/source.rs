//! Seams between the adapters and the outside world
//!
//! Adapters never touch the store. They run as tasks that push
//! [`SourceEvent`]s into the session's channel, tagged with the generation of
//! the adapter run that produced them.

use futures_util::future::BoxFuture;
use futures_util::stream::BoxStream;

use crate::core::{FetchError, Filter, MarkerRecord};

/// Raw text frames of one push connection; the stream ends when the
/// connection closes.
pub type MessageStream = BoxStream<'static, Result<String, FetchError>>;

/// Snapshot and named-lookup endpoint
pub trait MarkerApi: Send + Sync + 'static {
    /// `All` fetches every marker, `ByName` looks up one entity
    fn fetch(&self, filter: &Filter) -> BoxFuture<'static, Result<Vec<MarkerRecord>, FetchError>>;
}

/// Push feed endpoint
pub trait PushTransport: Send + Sync + 'static {
    /// Open a receive-only connection scoped to `filter`
    fn open(&self, filter: &Filter) -> BoxFuture<'static, Result<MessageStream, FetchError>>;
}

/// Output of a running adapter
#[derive(Debug)]
pub enum SourceEvent {
    /// Poll adapter finished one fetch
    Fetched {
        generation: u64,
        filter: Filter,
        result: Result<Vec<MarkerRecord>, FetchError>,
    },
    /// Push connection established
    LiveOpened { generation: u64 },
    /// One inbound push frame
    LiveMessage { generation: u64, text: String },
    /// Push connection ended, with the error if it failed
    LiveClosed {
        generation: u64,
        reason: Option<FetchError>,
    },
    /// Reconnect backoff elapsed
    ReconnectDue { generation: u64 },
}

impl SourceEvent {
    pub fn generation(&self) -> u64 {
        match self {
            SourceEvent::Fetched { generation, .. }
            | SourceEvent::LiveOpened { generation }
            | SourceEvent::LiveMessage { generation, .. }
            | SourceEvent::LiveClosed { generation, .. }
            | SourceEvent::ReconnectDue { generation } => *generation,
        }
    }
}

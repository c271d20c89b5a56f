//! Native WebSocket push transport
//!
//! Uses tokio-tungstenite. The all-markers feed lives at the configured URL,
//! a single-marker feed at `<url>/<name>`. The client never sends.

use futures_util::future::{self, BoxFuture};
use futures_util::StreamExt;
use reqwest::Url;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{error, info, trace};

use crate::app::{MessageStream, PushTransport};
use crate::core::{FetchError, Filter};

pub struct WsPushTransport {
    base: Url,
}

impl WsPushTransport {
    pub fn new(base: &str) -> Result<Self, FetchError> {
        let base = Url::parse(base).map_err(|e| FetchError::Transport(format!("invalid URL {base}: {e}")))?;
        Ok(Self { base })
    }

    fn url_for(&self, filter: &Filter) -> Result<Url, FetchError> {
        let mut url = self.base.clone();
        if let Filter::ByName(name) = filter {
            url.path_segments_mut()
                .map_err(|_| FetchError::Transport(format!("cannot append to {}", self.base)))?
                .pop_if_empty()
                .push(name);
        }
        Ok(url)
    }
}

impl PushTransport for WsPushTransport {
    fn open(&self, filter: &Filter) -> BoxFuture<'static, Result<MessageStream, FetchError>> {
        let url = self.url_for(filter);

        Box::pin(async move {
            let url = url?;
            info!(url = %url, "Connecting to WebSocket");

            let (ws_stream, _) = connect_async(url.as_str()).await.map_err(|e| {
                error!(error = %e, "Failed to connect");
                FetchError::Transport(e.to_string())
            })?;
            info!("WebSocket connected");

            let messages = ws_stream.filter_map(|msg| {
                future::ready(match msg {
                    Ok(Message::Text(text)) => Some(Ok(text.to_string())),
                    Ok(Message::Close(frame)) => {
                        trace!(?frame, "WebSocket closed by server");
                        None
                    }
                    Ok(_) => None,
                    Err(e) => Some(Err(FetchError::Transport(e.to_string()))),
                })
            });
            Ok(messages.boxed())
        })
    }
}

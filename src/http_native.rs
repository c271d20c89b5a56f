//! HTTP snapshot client
//!
//! `GET <api>` returns every marker, `GET <api>/<name>` one marker (a bare
//! object or an array of one). A 404 on a named lookup is "not found".

use std::time::Duration;

use futures_util::future::BoxFuture;
use reqwest::{Client, StatusCode, Url};
use tracing::{debug, warn};

use crate::app::MarkerApi;
use crate::core::{decode_batch, FetchError, Filter, MarkerRecord};

pub struct HttpMarkerApi {
    client: Client,
    base: Url,
}

impl HttpMarkerApi {
    pub fn new(base: &str, request_timeout: Duration) -> Result<Self, FetchError> {
        let base = Url::parse(base).map_err(|e| FetchError::Transport(format!("invalid URL {base}: {e}")))?;
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| FetchError::Transport(e.to_string()))?;
        Ok(Self { client, base })
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

impl MarkerApi for HttpMarkerApi {
    fn fetch(&self, filter: &Filter) -> BoxFuture<'static, Result<Vec<MarkerRecord>, FetchError>> {
        let client = self.client.clone();
        let url = self.url_for(filter);
        let filter = filter.clone();

        Box::pin(async move {
            let url = url?;
            debug!(%url, "Fetching markers");

            let resp = client
                .get(url)
                .send()
                .await
                .map_err(|e| FetchError::Transport(e.to_string()))?;

            let status = resp.status();
            if let Filter::ByName(name) = &filter {
                if status == StatusCode::NOT_FOUND {
                    return Err(FetchError::NotFound { name: name.clone() });
                }
            }
            if !status.is_success() {
                return Err(FetchError::Status(status.as_u16()));
            }

            let body = resp
                .text()
                .await
                .map_err(|e| FetchError::Transport(e.to_string()))?;
            let batch = decode_batch(&body).map_err(|e| FetchError::Decode(e.to_string()))?;
            if batch.dropped > 0 {
                warn!(dropped = batch.dropped, kept = batch.records.len(), "Snapshot contained malformed records");
            }

            match &filter {
                Filter::ByName(name) if batch.records.is_empty() && batch.dropped == 0 => {
                    Err(FetchError::NotFound { name: name.clone() })
                }
                _ => Ok(batch.records),
            }
        })
    }
}

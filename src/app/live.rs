//! Live adapter - push connection with fixed-delay reconnection
//!
//! The connection runs as a task that forwards frames to the session. The
//! session feeds them back through the transition handlers below, which own
//! the [`ConnectionState`] machine:
//!
//! - `on_opened`: Connecting -> Connected
//! - `on_message`: decode one record for the active filter
//! - `on_closed`: -> Disconnected, schedules one reconnect unless stopped
//! - `on_reconnect_due`: Disconnected -> Connecting if still wanted

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use super::source::{PushTransport, SourceEvent};
use crate::core::{decode_message, FetchError, Filter, MarkerRecord};
use crate::ws_state::ConnectionState;

pub struct LiveAdapter {
    transport: Arc<dyn PushTransport>,
    events: UnboundedSender<SourceEvent>,
    reconnect_delay: Duration,
    state: ConnectionState,
    filter: Option<Filter>,
    generation: u64,
    intentional_close: bool,
    connection: Option<JoinHandle<()>>,
    reconnect: Option<JoinHandle<()>>,
}

impl LiveAdapter {
    pub fn new(
        transport: Arc<dyn PushTransport>,
        events: UnboundedSender<SourceEvent>,
        reconnect_delay: Duration,
    ) -> Self {
        Self {
            transport,
            events,
            reconnect_delay,
            state: ConnectionState::Disconnected,
            filter: None,
            generation: 0,
            intentional_close: false,
            connection: None,
            reconnect: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn filter(&self) -> Option<&Filter> {
        self.filter.as_ref()
    }

    pub fn is_running(&self) -> bool {
        self.filter.is_some()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn reconnect_pending(&self) -> bool {
        self.reconnect.is_some()
    }

    fn is_current(&self, generation: u64) -> bool {
        self.is_running() && generation == self.generation
    }

    pub fn start(&mut self, filter: Filter) {
        self.stop();
        self.generation += 1;
        self.intentional_close = false;

        info!(%filter, generation = self.generation, "Starting live adapter");
        self.filter = Some(filter);
        self.connect();
    }

    /// Idempotent. Marks the close as intentional before dropping the
    /// connection, then cancels any pending reconnect.
    pub fn stop(&mut self) {
        self.intentional_close = true;

        if let Some(connection) = self.connection.take() {
            connection.abort();
        }
        if let Some(timer) = self.reconnect.take() {
            timer.abort();
            debug!("Pending reconnect cancelled");
        }

        if self.filter.take().is_some() {
            self.generation += 1;
            info!("Live adapter stopped");
        }
        self.state = ConnectionState::Disconnected;
    }

    fn connect(&mut self) {
        let Some(filter) = self.filter.clone() else {
            return;
        };
        self.state = ConnectionState::Connecting;

        let generation = self.generation;
        let transport = self.transport.clone();
        let events = self.events.clone();
        debug!(%filter, generation, "Opening push connection");

        self.connection = Some(tokio::spawn(async move {
            let reason = match transport.open(&filter).await {
                Ok(mut stream) => {
                    if events.send(SourceEvent::LiveOpened { generation }).is_err() {
                        return;
                    }
                    loop {
                        match stream.next().await {
                            Some(Ok(text)) => {
                                let event = SourceEvent::LiveMessage { generation, text };
                                if events.send(event).is_err() {
                                    return;
                                }
                            }
                            Some(Err(e)) => break Some(e),
                            None => break None,
                        }
                    }
                }
                Err(e) => Some(e),
            };
            let _ = events.send(SourceEvent::LiveClosed { generation, reason });
        }));
    }

    /// Returns true if the open belongs to the current connection
    pub fn on_opened(&mut self, generation: u64) -> bool {
        if !self.is_current(generation) {
            trace!(generation, "Ignoring open from stale connection");
            return false;
        }
        info!(filter = ?self.filter, "Live connection established");
        self.state = ConnectionState::Connected;
        true
    }

    /// Decode one frame. Malformed frames and frames for another entity are
    /// dropped.
    pub fn on_message(&mut self, generation: u64, text: &str) -> Option<MarkerRecord> {
        if !self.is_current(generation) {
            trace!(generation, "Ignoring message from stale connection");
            return None;
        }

        let record = decode_message(text)
            .map_err(|e| {
                warn!(error = %e, "Dropping malformed live message");
            })
            .ok()?;

        if let Some(Filter::ByName(name)) = &self.filter {
            if &record.name != name {
                debug!(expected = %name, got = %record.name, "Dropping live message for other marker");
                return None;
            }
        }
        trace!(name = %record.name, "Live update");
        Some(record)
    }

    /// Returns true if a reconnect was scheduled
    pub fn on_closed(&mut self, generation: u64, reason: Option<&FetchError>) -> bool {
        if !self.is_current(generation) {
            trace!(generation, "Ignoring close from stale connection");
            return false;
        }
        self.connection = None;
        self.state = ConnectionState::Disconnected;

        if self.intentional_close {
            debug!("Live connection closed intentionally");
            return false;
        }
        if self.reconnect.is_some() {
            return false;
        }

        match reason {
            Some(e) => warn!(error = %e, delay_ms = self.reconnect_delay.as_millis() as u64, "Live connection failed, reconnecting"),
            None => warn!(delay_ms = self.reconnect_delay.as_millis() as u64, "Live connection closed by server, reconnecting"),
        }

        let events = self.events.clone();
        let delay = self.reconnect_delay;
        self.reconnect = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(SourceEvent::ReconnectDue { generation });
        }));
        true
    }

    /// Reconnect only if this run is still current and live mode is still
    /// selected. Returns true if a connection attempt was made.
    pub fn on_reconnect_due(&mut self, generation: u64, still_live: bool) -> bool {
        if !self.is_current(generation) {
            debug!(generation, "Suppressing reconnect from stopped adapter");
            return false;
        }
        self.reconnect = None;

        if !still_live {
            debug!("Suppressing reconnect, live mode no longer selected");
            return false;
        }
        info!("Reconnecting live feed");
        self.connect();
        true
    }
}

impl Drop for LiveAdapter {
    fn drop(&mut self) {
        self.stop();
    }
}

//! Marker session - the long-lived controller of one map view
//!
//! Owns the store, both adapters, the reconciler and the refresh scheduler.
//! Adapters only produce [`SourceEvent`]s; the session consumes them one at a
//! time in [`Session::step`], so all state changes happen on one logical
//! thread in arrival order.

mod live;
mod mode;
mod poll;
mod reconcile;
mod refresh;
mod source;

#[cfg(test)]
pub(crate) mod testing;

pub use live::LiveAdapter;
pub use mode::{ModeController, SourceAction};
pub use poll::PollAdapter;
pub use reconcile::{popup_html, ReconcileReport, Reconciler, RenderedMarker};
pub use refresh::{next_refresh_delay, RefreshScheduler, FAST_REFRESH, MIN_REFRESH};
pub use source::{MarkerApi, MessageStream, PushTransport, SourceEvent};

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::{self, UnboundedReceiver};
use tracing::{debug, info, trace, warn};

use crate::core::{
    ConfigError, Configuration, Filter, MarkerStore, StoreChange, SubscriptionId, UpdateMode,
    ViewerConfig, ZoomLevel,
};
use crate::surface::{Navigator, RenderSurface};
use crate::time::Clock;
use crate::ws_state::ConnectionState;

pub struct Session<S: RenderSurface, N: Navigator> {
    store: MarkerStore,
    modes: ModeController,
    poll: PollAdapter,
    live: LiveAdapter,
    reconciler: Reconciler<S>,
    refresh: RefreshScheduler,
    navigator: N,
    clock: Arc<dyn Clock>,
    events: UnboundedReceiver<SourceEvent>,
}

impl<S: RenderSurface, N: Navigator> Session<S, N> {
    pub fn new(
        viewer: &ViewerConfig,
        api: Arc<dyn MarkerApi>,
        transport: Arc<dyn PushTransport>,
        surface: S,
        navigator: N,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (tx, events) = mpsc::unbounded_channel();
        let filter = Filter::from_name(viewer.initial_name.as_deref());

        let config = Configuration {
            poll_interval: viewer.poll_interval(),
            ..Configuration::default()
        };
        let mut store = MarkerStore::new(config, clock.now());
        store.set_filter(filter.clone());

        Self {
            store,
            modes: ModeController::new(filter, viewer.mode, viewer.poll_interval()),
            poll: PollAdapter::new(api, tx.clone()),
            live: LiveAdapter::new(transport, tx, viewer.reconnect_delay()),
            reconciler: Reconciler::new(surface, viewer.default_center, viewer.fit_padding_px),
            refresh: RefreshScheduler::new(),
            navigator,
            clock,
            events,
        }
    }

    pub fn store(&self) -> &MarkerStore {
        &self.store
    }

    pub fn reconciler(&self) -> &Reconciler<S> {
        &self.reconciler
    }

    /// The map widget, for forwarding user interaction (opening popups)
    pub fn surface_mut(&mut self) -> &mut S {
        self.reconciler.surface_mut()
    }

    pub fn navigator(&self) -> &N {
        &self.navigator
    }

    pub fn mode(&self) -> UpdateMode {
        self.modes.mode()
    }

    pub fn is_attached(&self) -> bool {
        self.modes.is_active()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.live.state()
    }

    pub fn refresh_scheduler(&self) -> &RefreshScheduler {
        &self.refresh
    }

    pub fn subscribe<F>(&mut self, callback: F) -> SubscriptionId
    where
        F: FnMut(&StoreChange) + Send + 'static,
    {
        self.store.subscribe(callback)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.store.unsubscribe(id)
    }

    /// Start the adapter for the current filter and mode
    pub fn attach(&mut self) {
        if self.modes.is_active() {
            return;
        }
        info!(filter = %self.modes.filter(), mode = %self.modes.mode(), "Attaching marker session");
        let actions = self.modes.activate();
        self.apply(actions);
    }

    /// Stop all adapters and timers and remove rendered markers
    pub fn detach(&mut self) {
        info!("Detaching marker session");
        let actions = self.modes.deactivate();
        self.apply(actions);
        self.refresh.cancel();
        self.reconciler.clear();
        self.store.set_loading(false);
    }

    pub fn set_filter(&mut self, filter: Filter) {
        self.store.set_filter(filter.clone());
        let actions = self.modes.set_filter(filter);
        self.apply(actions);
        if self.modes.is_active() {
            self.refresh_view();
        }
    }

    /// Route to one marker (`Some`) or all markers (`None`) and follow it
    pub fn select(&mut self, name: Option<&str>) {
        self.navigator.navigate(name);
        self.set_filter(Filter::from_name(name));
    }

    pub fn set_mode(&mut self, mode: UpdateMode) {
        let actions = self.modes.set_mode(mode);
        self.apply(actions);
    }

    pub fn set_poll_interval(&mut self, interval: Duration) -> Result<(), ConfigError> {
        self.store.set_poll_interval(interval)?;
        let actions = self.modes.set_poll_interval(interval);
        self.apply(actions);
        Ok(())
    }

    pub fn set_zoom_level(&mut self, zoom_level: ZoomLevel) {
        self.store.set_zoom_level(zoom_level);
        self.refresh_view();
    }

    pub fn set_free_roam(&mut self, enabled: bool) {
        self.store.set_free_roam(enabled);
        self.refresh_view();
    }

    /// Wait for and handle one source event or refresh deadline
    pub async fn step(&mut self) {
        tokio::select! {
            Some(event) = self.events.recv() => self.handle_event(event),
            _ = self.refresh.wait() => self.on_refresh_due(),
        }
    }

    /// Run the event loop until `shutdown` completes
    pub async fn run_until<F: Future>(&mut self, shutdown: F) {
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = self.step() => {}
            }
        }
    }

    pub fn handle_event(&mut self, event: SourceEvent) {
        trace!(generation = event.generation(), "Source event");
        match event {
            SourceEvent::Fetched {
                generation,
                filter,
                result,
            } => {
                if !self.poll.accepts(generation) {
                    trace!(generation, "Discarding stale fetch result");
                    return;
                }
                match result {
                    Ok(records) => {
                        debug!(%filter, count = records.len(), "Fetched markers");
                        self.store.fetch_succeeded(&filter, records);
                    }
                    Err(e) => {
                        warn!(%filter, error = %e, "Marker fetch failed");
                        self.store.fetch_failed(&filter, &e);
                    }
                }
                self.refresh_view();
            }
            SourceEvent::LiveOpened { generation } => {
                if self.live.on_opened(generation) {
                    self.store.set_loading(false);
                    self.store.set_error(None);
                }
            }
            SourceEvent::LiveMessage { generation, text } => {
                let Some(record) = self.live.on_message(generation, &text) else {
                    return;
                };
                if let Some(filter) = self.live.filter().cloned() {
                    self.store.apply_update(&filter, record);
                    self.refresh_view();
                }
            }
            SourceEvent::LiveClosed { generation, reason } => {
                let scheduled = self.live.on_closed(generation, reason.as_ref());
                if scheduled {
                    if let Some(e) = reason {
                        self.store.set_error(Some(format!("Live connection failed: {e}")));
                        self.store.set_loading(false);
                    }
                }
            }
            SourceEvent::ReconnectDue { generation } => {
                let still_live = self.modes.live_active();
                self.live.on_reconnect_due(generation, still_live);
            }
        }
    }

    fn apply(&mut self, actions: Vec<SourceAction>) {
        for action in actions {
            match action {
                SourceAction::StopPoll => self.poll.stop(),
                SourceAction::StopLive => self.live.stop(),
                SourceAction::StartPoll { filter, interval } => {
                    self.store.set_loading(true);
                    self.poll.start(filter, interval);
                }
                SourceAction::StartLive { filter } => {
                    self.store.set_loading(true);
                    self.live.start(filter);
                }
            }
        }
    }

    /// Reconcile the surface with the store and re-arm the label refresh
    fn refresh_view(&mut self) {
        let now = self.clock.now();
        self.reconciler.reconcile(&mut self.store, now);
        self.rearm_refresh(now);
    }

    fn on_refresh_due(&mut self) {
        self.refresh.fire();
        let now = self.clock.now();
        self.store.set_now(now);
        let refreshed = self.reconciler.refresh_open_popups(now);
        trace!(refreshed, "Labels refreshed");
        self.rearm_refresh(now);
    }

    fn rearm_refresh(&mut self, now: chrono::DateTime<chrono::Utc>) {
        if !self.modes.is_active() {
            return;
        }
        let delay = next_refresh_delay(self.reconciler.rendered_timestamps(), now);
        self.refresh.rearm(delay);
    }
}

//! Poll adapter - immediate fetch, then one fetch per interval
//!
//! Fetch failures are reported as events and never stop the ticker.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace};

use super::source::{MarkerApi, SourceEvent};
use crate::core::Filter;

pub struct PollAdapter {
    api: Arc<dyn MarkerApi>,
    events: UnboundedSender<SourceEvent>,
    task: Option<JoinHandle<()>>,
    filter: Option<Filter>,
    generation: u64,
}

impl PollAdapter {
    pub fn new(api: Arc<dyn MarkerApi>, events: UnboundedSender<SourceEvent>) -> Self {
        Self {
            api,
            events,
            task: None,
            filter: None,
            generation: 0,
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.is_some()
    }

    pub fn filter(&self) -> Option<&Filter> {
        self.filter.as_ref()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Events from any earlier run are stale
    pub fn accepts(&self, generation: u64) -> bool {
        self.is_running() && generation == self.generation
    }

    pub fn start(&mut self, filter: Filter, interval: Duration) {
        self.stop();
        self.generation += 1;
        let generation = self.generation;

        info!(%filter, interval_ms = interval.as_millis() as u64, generation, "Starting poll adapter");

        let api = self.api.clone();
        let events = self.events.clone();
        let task_filter = filter.clone();
        self.task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                // first tick completes immediately
                ticker.tick().await;
                trace!(filter = %task_filter, generation, "Poll tick");
                let result = api.fetch(&task_filter).await;
                let event = SourceEvent::Fetched {
                    generation,
                    filter: task_filter.clone(),
                    result,
                };
                if events.send(event).is_err() {
                    // Session dropped
                    break;
                }
            }
        }));
        self.filter = Some(filter);
    }

    /// Idempotent. An in-flight fetch is abandoned with the task.
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            self.generation += 1;
            debug!(filter = ?self.filter, "Poll adapter stopped");
        }
        self.filter = None;
    }
}

impl Drop for PollAdapter {
    fn drop(&mut self) {
        self.stop();
    }
}

//! Update mode controller
//!
//! State is `(filter, mode)` plus the poll interval. Every transition yields
//! the full stop-then-start sequence; the session executes it in order, so a
//! new adapter never runs alongside the previous one.

use std::time::Duration;

use tracing::debug;

use crate::core::{Filter, UpdateMode};

#[derive(Clone, Debug, PartialEq)]
pub enum SourceAction {
    StopPoll,
    StopLive,
    StartPoll { filter: Filter, interval: Duration },
    StartLive { filter: Filter },
}

pub struct ModeController {
    filter: Filter,
    mode: UpdateMode,
    poll_interval: Duration,
    active: bool,
}

impl ModeController {
    pub fn new(filter: Filter, mode: UpdateMode, poll_interval: Duration) -> Self {
        Self {
            filter,
            mode,
            poll_interval,
            active: false,
        }
    }

    pub fn filter(&self) -> &Filter {
        &self.filter
    }

    pub fn mode(&self) -> UpdateMode {
        self.mode
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Live mode is selected and the controller is running
    pub fn live_active(&self) -> bool {
        self.active && self.mode == UpdateMode::Live
    }

    /// Transition out of the implicit stopped state
    pub fn activate(&mut self) -> Vec<SourceAction> {
        self.active = true;
        self.transition()
    }

    /// Stop everything. Safe to call repeatedly.
    pub fn deactivate(&mut self) -> Vec<SourceAction> {
        self.active = false;
        vec![SourceAction::StopPoll, SourceAction::StopLive]
    }

    pub fn set_filter(&mut self, filter: Filter) -> Vec<SourceAction> {
        if self.filter == filter {
            return Vec::new();
        }
        self.filter = filter;
        self.transition()
    }

    pub fn set_mode(&mut self, mode: UpdateMode) -> Vec<SourceAction> {
        if self.mode == mode {
            return Vec::new();
        }
        self.mode = mode;
        self.transition()
    }

    /// Restarts only in poll mode; live mode keeps the value for later.
    pub fn set_poll_interval(&mut self, interval: Duration) -> Vec<SourceAction> {
        if self.poll_interval == interval {
            return Vec::new();
        }
        self.poll_interval = interval;
        if self.mode != UpdateMode::Poll {
            return Vec::new();
        }
        self.transition()
    }

    fn transition(&self) -> Vec<SourceAction> {
        if !self.active {
            return Vec::new();
        }

        let start = match self.mode {
            UpdateMode::Poll => SourceAction::StartPoll {
                filter: self.filter.clone(),
                interval: self.poll_interval,
            },
            UpdateMode::Live => SourceAction::StartLive {
                filter: self.filter.clone(),
            },
        };
        debug!(filter = %self.filter, mode = %self.mode, "Update source transition");

        vec![SourceAction::StopPoll, SourceAction::StopLive, start]
    }
}

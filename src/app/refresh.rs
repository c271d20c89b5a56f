//! Adaptive refresh scheduler for "last seen" labels
//!
//! One deadline at most. Markers younger than a minute need per-second
//! labels; older ones only change when their age crosses a whole minute.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;
use tracing::trace;

/// Delay while any marker is younger than [`FRESH_AGE_MS`]
pub const FAST_REFRESH: Duration = Duration::from_millis(1000);
/// Lower bound for minute-aligned delays
pub const MIN_REFRESH: Duration = Duration::from_millis(500);
pub const FRESH_AGE_MS: i64 = 60_000;

const MINUTE_MS: i64 = 60_000;

/// Time until the next label change for the given "last seen" timestamps
pub fn next_refresh_delay<I>(timestamps: I, now: DateTime<Utc>) -> Duration
where
    I: IntoIterator<Item = DateTime<Utc>>,
{
    let mut until_minute: Option<i64> = None;
    for timestamp in timestamps {
        let age_ms = (now - timestamp).num_milliseconds();
        if age_ms < FRESH_AGE_MS {
            return FAST_REFRESH;
        }
        let remaining = MINUTE_MS - age_ms % MINUTE_MS;
        until_minute = Some(until_minute.map_or(remaining, |m| m.min(remaining)));
    }

    // nothing rendered: follow the wall-clock minute
    let ms = until_minute.unwrap_or_else(|| MINUTE_MS - now.timestamp_millis().rem_euclid(MINUTE_MS));
    Duration::from_millis(ms as u64).max(MIN_REFRESH)
}

/// Single re-armable deadline
#[derive(Debug, Default)]
pub struct RefreshScheduler {
    deadline: Option<Instant>,
    fired: u64,
}

impl RefreshScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace any armed deadline
    pub fn rearm(&mut self, delay: Duration) {
        trace!(delay_ms = delay.as_millis() as u64, "Refresh scheduled");
        self.deadline = Some(Instant::now() + delay);
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn fired(&self) -> u64 {
        self.fired
    }

    /// Completes at the armed deadline; pending forever while disarmed
    pub async fn wait(&self) {
        match self.deadline {
            Some(deadline) => tokio::time::sleep_until(deadline).await,
            None => std::future::pending::<()>().await,
        }
    }

    /// Consume the deadline after `wait` completed
    pub fn fire(&mut self) {
        self.deadline = None;
        self.fired += 1;
    }
}

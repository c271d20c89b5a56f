//! Test doubles for the session's collaborators

use std::collections::{HashMap, HashSet};
use chrono::{DateTime, TimeZone, Utc};
use futures_util::future::BoxFuture;
use futures_util::StreamExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::source::{MarkerApi, MessageStream, PushTransport};
use crate::core::{FetchError, Filter, LatLng, LatLngBounds, MarkerRecord};
use crate::surface::{Navigator, RenderSurface};
use crate::time::Clock;

/// Fixed reference time, 30 s past a minute boundary
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 30).unwrap()
}

/// Record last seen `age_secs` before [`t0`]
pub fn record(name: &str, age_secs: i64) -> MarkerRecord {
    MarkerRecord::new(name, 50.0, 10.0, t0() - chrono::Duration::seconds(age_secs))
}

pub fn record_at(name: &str, lat: f64, lng: f64) -> MarkerRecord {
    MarkerRecord::new(name, lat, lng, t0())
}

pub fn marker_json(record: &MarkerRecord) -> String {
    serde_json::to_string(record).unwrap()
}

pub struct ManualClock(Mutex<DateTime<Utc>>);

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self(Mutex::new(now))
    }

    pub fn advance(&self, by: chrono::Duration) {
        *self.0.lock() += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.0.lock()
    }
}

/// Unconfigured `All` answers with an empty list, unconfigured names with
/// "not found".
#[derive(Default)]
pub struct FakeApi {
    responses: Mutex<HashMap<Filter, Result<Vec<MarkerRecord>, FetchError>>>,
    calls: Mutex<Vec<Filter>>,
}

impl FakeApi {
    pub fn set_response(&self, filter: Filter, result: Result<Vec<MarkerRecord>, FetchError>) {
        self.responses.lock().insert(filter, result);
    }

    pub fn calls(&self) -> Vec<Filter> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

impl MarkerApi for FakeApi {
    fn fetch(&self, filter: &Filter) -> BoxFuture<'static, Result<Vec<MarkerRecord>, FetchError>> {
        self.calls.lock().push(filter.clone());
        let result = match self.responses.lock().get(filter) {
            Some(result) => result.clone(),
            None => match filter {
                Filter::All => Ok(Vec::new()),
                Filter::ByName(name) => Err(FetchError::NotFound { name: name.clone() }),
            },
        };
        Box::pin(async move { result })
    }
}

type Feed = mpsc::UnboundedSender<Result<String, FetchError>>;

/// Every successful open creates a feed; `push`/`close` act on the newest one.
#[derive(Default)]
pub struct FakeTransport {
    opens: Mutex<Vec<Filter>>,
    feeds: Mutex<Vec<Option<Feed>>>,
    failures: Mutex<usize>,
}

impl FakeTransport {
    pub fn fail_next(&self, count: usize) {
        *self.failures.lock() = count;
    }

    pub fn opens(&self) -> Vec<Filter> {
        self.opens.lock().clone()
    }

    pub fn open_count(&self) -> usize {
        self.opens.lock().len()
    }

    pub fn push(&self, text: &str) -> bool {
        match self.feeds.lock().last() {
            Some(Some(feed)) => feed.send(Ok(text.to_string())).is_ok(),
            _ => false,
        }
    }

    /// Server-side close of the newest connection
    pub fn close(&self) {
        if let Some(feed) = self.feeds.lock().last_mut() {
            feed.take();
        }
    }
}

impl PushTransport for FakeTransport {
    fn open(&self, filter: &Filter) -> BoxFuture<'static, Result<MessageStream, FetchError>> {
        self.opens.lock().push(filter.clone());

        let mut failures = self.failures.lock();
        if *failures > 0 {
            *failures -= 1;
            return Box::pin(async { Err(FetchError::Transport("connection refused".into())) });
        }

        let (tx, rx) = mpsc::unbounded_channel();
        self.feeds.lock().push(Some(tx));
        let stream = futures_util::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });
        Box::pin(async move { Ok(stream.boxed()) })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum SurfaceOp {
    Create { handle: u64, position: LatLng },
    Move { handle: u64, position: LatLng },
    Remove { handle: u64 },
    Popup { handle: u64, html: String },
    Fit { bounds: LatLngBounds, padding_px: u32 },
    View { center: LatLng, zoom: u8 },
}

#[derive(Default)]
pub struct RecordingSurface {
    next_handle: u64,
    pub points: HashMap<u64, LatLng>,
    pub popups: HashMap<u64, String>,
    pub open_popups: HashSet<u64>,
    pub ops: Vec<SurfaceOp>,
}

impl RecordingSurface {
    /// Simulates the user clicking a marker
    pub fn open_popup(&mut self, handle: u64) {
        self.open_popups.insert(handle);
    }

    pub fn clear_ops(&mut self) {
        self.ops.clear();
    }

    pub fn count(&self, pred: impl Fn(&SurfaceOp) -> bool) -> usize {
        self.ops.iter().filter(|op| pred(op)).count()
    }

    pub fn creates(&self) -> usize {
        self.count(|op| matches!(op, SurfaceOp::Create { .. }))
    }

    pub fn removes(&self) -> usize {
        self.count(|op| matches!(op, SurfaceOp::Remove { .. }))
    }

    pub fn moves(&self) -> usize {
        self.count(|op| matches!(op, SurfaceOp::Move { .. }))
    }

    pub fn last_view_op(&self) -> Option<&SurfaceOp> {
        self.ops
            .iter()
            .rev()
            .find(|op| matches!(op, SurfaceOp::Fit { .. } | SurfaceOp::View { .. }))
    }
}

impl RenderSurface for RecordingSurface {
    type Handle = u64;

    fn create_point(&mut self, position: LatLng, _icon: &str) -> u64 {
        let handle = self.next_handle;
        self.next_handle += 1;
        self.points.insert(handle, position);
        self.ops.push(SurfaceOp::Create { handle, position });
        handle
    }

    fn move_handle(&mut self, handle: &u64, position: LatLng) {
        self.points.insert(*handle, position);
        self.ops.push(SurfaceOp::Move {
            handle: *handle,
            position,
        });
    }

    fn remove_handle(&mut self, handle: u64) {
        self.points.remove(&handle);
        self.popups.remove(&handle);
        self.open_popups.remove(&handle);
        self.ops.push(SurfaceOp::Remove { handle });
    }

    fn set_popup_content(&mut self, handle: &u64, html: &str) {
        self.popups.insert(*handle, html.to_string());
        self.ops.push(SurfaceOp::Popup {
            handle: *handle,
            html: html.to_string(),
        });
    }

    fn is_popup_open(&self, handle: &u64) -> bool {
        self.open_popups.contains(handle)
    }

    fn fit_to_bounds(&mut self, bounds: LatLngBounds, padding_px: u32) {
        self.ops.push(SurfaceOp::Fit { bounds, padding_px });
    }

    fn set_view(&mut self, center: LatLng, zoom: u8) {
        self.ops.push(SurfaceOp::View { center, zoom });
    }
}

#[derive(Default)]
pub struct RecordingNavigator {
    pub targets: Vec<Option<String>>,
}

impl Navigator for RecordingNavigator {
    fn navigate(&mut self, target: Option<&str>) {
        self.targets.push(target.map(str::to_string));
    }
}

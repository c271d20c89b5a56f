//! Live marker map client
//!
//! Keeps a set of named markers on a map current, either by polling an HTTP
//! endpoint or by following a WebSocket feed:
//! - `core`: marker records, decoding, configuration, the marker store
//! - `app`: the session controller, poll/live adapters, reconciliation and
//!   the adaptive label refresh
//! - `surface`: the map widget and router seams

pub mod app;
pub mod core;
pub mod surface;
pub mod time;
pub mod ws_state;

#[cfg(feature = "cli")]
pub mod http_native;
#[cfg(feature = "cli")]
pub mod websocket_native;

pub use app::{MarkerApi, PushTransport, Session};
pub use crate::core::{Filter, MarkerRecord, MarkerStore, UpdateMode, ViewerConfig, ZoomLevel};
pub use surface::{Navigator, RenderSurface};
pub use ws_state::ConnectionState;

//! Platform-agnostic core module - marker data, decoding, configuration, store

pub mod config;
pub mod error;
pub mod marker;
pub mod parser;
pub mod store;

pub use config::{Configuration, FreeRoam, ViewerConfig, ZoomLevel};
pub use error::{ConfigError, DecodeError, FetchError};
pub use marker::{Filter, LatLng, LatLngBounds, MarkerRecord, UpdateMode};
pub use parser::{decode_batch, decode_message, DecodedBatch};
pub use store::{MarkerStore, StoreChange, SubscriptionId};

//! Runtime configuration and deployment settings

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::marker::{LatLng, UpdateMode};

/// Default polling cadence
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 5_000;
/// Fixed delay before reopening an unexpectedly closed push connection
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 1_000;
/// Padding applied when fitting the view to several markers
pub const DEFAULT_FIT_PADDING_PX: u32 = 50;
/// Default HTTP endpoint (override with MARKERS_API env var)
pub const DEFAULT_API_URL: &str = "http://127.0.0.1:8080/api/markers";
/// Default push endpoint (override with MARKERS_WS env var)
pub const DEFAULT_WS_URL: &str = "ws://127.0.0.1:8080/api/ws/markers";

/// Preferred zoom when centering on a single marker
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ZoomLevel {
    Close,
    #[default]
    Medium,
    Far,
    VeryFar,
    CountryFar,
}

impl ZoomLevel {
    pub const ALL: &'static [ZoomLevel] = &[
        ZoomLevel::Close,
        ZoomLevel::Medium,
        ZoomLevel::Far,
        ZoomLevel::VeryFar,
        ZoomLevel::CountryFar,
    ];

    /// Map zoom number handed to the rendering surface
    pub fn zoom(&self) -> u8 {
        match self {
            ZoomLevel::Close => 16,
            ZoomLevel::Medium => 13,
            ZoomLevel::Far => 10,
            ZoomLevel::VeryFar => 7,
            ZoomLevel::CountryFar => 5,
        }
    }
}

/// Free-roam flag that remembers whether `true` came from the user or was
/// forced because no markers are visible.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FreeRoam {
    user: bool,
    auto_forced: bool,
}

impl FreeRoam {
    pub fn new(user: bool) -> Self {
        Self {
            user,
            auto_forced: false,
        }
    }

    /// Effective value
    pub fn enabled(&self) -> bool {
        self.user || self.auto_forced
    }

    pub fn user_choice(&self) -> bool {
        self.user
    }

    pub fn is_auto_forced(&self) -> bool {
        self.auto_forced
    }

    /// An explicit user choice overrides any auto-force in effect.
    pub fn set_by_user(&mut self, enabled: bool) {
        self.user = enabled;
        self.auto_forced = false;
    }

    /// Returns true if the effective value changed
    pub fn force(&mut self) -> bool {
        let before = self.enabled();
        self.auto_forced = true;
        before != self.enabled()
    }

    /// Returns true if the effective value changed
    pub fn release(&mut self) -> bool {
        let before = self.enabled();
        self.auto_forced = false;
        before != self.enabled()
    }
}

/// User-adjustable settings held by the marker store
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Configuration {
    pub poll_interval: Duration,
    pub zoom_level: ZoomLevel,
    pub free_roam: FreeRoam,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            zoom_level: ZoomLevel::default(),
            free_roam: FreeRoam::default(),
        }
    }
}

/// Deployment settings: endpoints, defaults, fixed delays
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    pub api_url: String,
    pub ws_url: String,
    pub mode: UpdateMode,
    pub poll_interval_ms: u64,
    pub reconnect_delay_ms: u64,
    pub fit_padding_px: u32,
    /// View center used when no markers are visible
    pub default_center: LatLng,
    /// Initial single-entity filter
    pub initial_name: Option<String>,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            ws_url: DEFAULT_WS_URL.to_string(),
            mode: UpdateMode::Poll,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            reconnect_delay_ms: DEFAULT_RECONNECT_DELAY_MS,
            fit_padding_px: DEFAULT_FIT_PADDING_PX,
            default_center: LatLng::new(51.1657, 10.4515),
            initial_name: None,
        }
    }
}

impl ViewerConfig {
    /// Read MARKERS_* environment variables on top of the defaults
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(url) = lookup("MARKERS_API") {
            config.api_url = url.trim_end_matches('/').to_string();
        }
        if let Some(url) = lookup("MARKERS_WS") {
            config.ws_url = url.trim_end_matches('/').to_string();
        }
        if let Some(mode) = lookup("MARKERS_MODE") {
            match mode.parse() {
                Ok(mode) => config.mode = mode,
                Err(e) => warn!(error = %e, "Ignoring MARKERS_MODE"),
            }
        }
        if let Some(ms) = lookup("MARKERS_POLL_MS") {
            match ms.trim().parse::<u64>() {
                Ok(ms) if ms > 0 => config.poll_interval_ms = ms,
                _ => warn!(value = %ms, "Ignoring MARKERS_POLL_MS, expected a positive integer"),
            }
        }
        if let Some(name) = lookup("MARKERS_NAME") {
            let name = name.trim();
            if !name.is_empty() {
                config.initial_name = Some(name.to_string());
            }
        }

        config
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

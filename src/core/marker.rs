//! Marker records and the selectors that decide which of them are fetched
//!
//! A marker is identified by its name; two records with the same name are the
//! same entity seen at different times.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One named entity with its last known position
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MarkerRecord {
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp: DateTime<Utc>,
}

impl MarkerRecord {
    pub fn new(name: impl Into<String>, latitude: f64, longitude: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            latitude,
            longitude,
            timestamp,
        }
    }

    pub fn position(&self) -> LatLng {
        LatLng::new(self.latitude, self.longitude)
    }

    /// Both coordinates are finite and inside the WGS84 ranges
    pub fn has_valid_position(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

/// Which subset of the feed is requested and displayed
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum Filter {
    #[default]
    All,
    ByName(String),
}

impl Filter {
    /// `None` maps to `All`, a name to `ByName`
    pub fn from_name(name: Option<&str>) -> Self {
        match name {
            Some(name) => Filter::ByName(name.to_string()),
            None => Filter::All,
        }
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            Filter::All => None,
            Filter::ByName(name) => Some(name),
        }
    }

    pub fn is_all(&self) -> bool {
        matches!(self, Filter::All)
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::All => write!(f, "all"),
            Filter::ByName(name) => write!(f, "name={name}"),
        }
    }
}

/// Update delivery strategy
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateMode {
    #[default]
    Poll,
    Live,
}

impl UpdateMode {
    pub fn label(&self) -> &'static str {
        match self {
            UpdateMode::Poll => "poll",
            UpdateMode::Live => "live",
        }
    }
}

impl fmt::Display for UpdateMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for UpdateMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "poll" | "polling" => Ok(UpdateMode::Poll),
            "live" | "ws" | "websocket" => Ok(UpdateMode::Live),
            other => Err(format!("unknown update mode '{other}'")),
        }
    }
}

/// Geographic point
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

impl LatLng {
    pub const fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }
}

/// Axis-aligned region spanned by a set of points
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LatLngBounds {
    pub south_west: LatLng,
    pub north_east: LatLng,
}

impl LatLngBounds {
    pub fn from_point(point: LatLng) -> Self {
        Self {
            south_west: point,
            north_east: point,
        }
    }

    /// Smallest bounds containing every point, `None` for an empty input
    pub fn from_points<I>(points: I) -> Option<Self>
    where
        I: IntoIterator<Item = LatLng>,
    {
        let mut iter = points.into_iter();
        let mut bounds = Self::from_point(iter.next()?);
        for point in iter {
            bounds.extend(point);
        }
        Some(bounds)
    }

    pub fn extend(&mut self, point: LatLng) {
        self.south_west.lat = self.south_west.lat.min(point.lat);
        self.south_west.lng = self.south_west.lng.min(point.lng);
        self.north_east.lat = self.north_east.lat.max(point.lat);
        self.north_east.lng = self.north_east.lng.max(point.lng);
    }

    pub fn contains(&self, point: &LatLng) -> bool {
        (self.south_west.lat..=self.north_east.lat).contains(&point.lat)
            && (self.south_west.lng..=self.north_east.lng).contains(&point.lng)
    }

    pub fn center(&self) -> LatLng {
        LatLng::new(
            (self.south_west.lat + self.north_east.lat) / 2.0,
            (self.south_west.lng + self.north_east.lng) / 2.0,
        )
    }
}

//! Boundary to the map widget and the router
//!
//! The map itself is an external collaborator. The reconciler drives it
//! through [`RenderSurface`]; view changes requested by the user go out
//! through [`Navigator`].

use std::collections::HashMap;

use tracing::debug;

use crate::core::{LatLng, LatLngBounds};

/// Icon passed for every created point
pub const DEFAULT_ICON: &str = "marker";

/// Point-rendering capability of the map widget
pub trait RenderSurface {
    type Handle;

    fn create_point(&mut self, position: LatLng, icon: &str) -> Self::Handle;
    fn move_handle(&mut self, handle: &Self::Handle, position: LatLng);
    fn remove_handle(&mut self, handle: Self::Handle);
    fn set_popup_content(&mut self, handle: &Self::Handle, html: &str);
    fn is_popup_open(&self, handle: &Self::Handle) -> bool;
    fn fit_to_bounds(&mut self, bounds: LatLngBounds, padding_px: u32);
    fn set_view(&mut self, center: LatLng, zoom: u8);
}

/// Route change between the "all entities" and "single entity" views
pub trait Navigator {
    fn navigate(&mut self, target: Option<&str>);
}

/// Surface that only logs what it is asked to draw. Used by the CLI.
#[derive(Debug, Default)]
pub struct LogSurface {
    next_handle: u64,
    points: HashMap<u64, LatLng>,
}

impl LogSurface {
    pub fn point_count(&self) -> usize {
        self.points.len()
    }
}

impl RenderSurface for LogSurface {
    type Handle = u64;

    fn create_point(&mut self, position: LatLng, icon: &str) -> u64 {
        let handle = self.next_handle;
        self.next_handle += 1;
        self.points.insert(handle, position);
        debug!(handle, lat = position.lat, lng = position.lng, icon, "create point");
        handle
    }

    fn move_handle(&mut self, handle: &u64, position: LatLng) {
        self.points.insert(*handle, position);
        debug!(handle, lat = position.lat, lng = position.lng, "move point");
    }

    fn remove_handle(&mut self, handle: u64) {
        self.points.remove(&handle);
        debug!(handle, "remove point");
    }

    fn set_popup_content(&mut self, handle: &u64, html: &str) {
        debug!(handle, html, "popup content");
    }

    fn is_popup_open(&self, _handle: &u64) -> bool {
        false
    }

    fn fit_to_bounds(&mut self, bounds: LatLngBounds, padding_px: u32) {
        debug!(
            south = bounds.south_west.lat,
            west = bounds.south_west.lng,
            north = bounds.north_east.lat,
            east = bounds.north_east.lng,
            padding_px,
            "fit view"
        );
    }

    fn set_view(&mut self, center: LatLng, zoom: u8) {
        debug!(lat = center.lat, lng = center.lng, zoom, "set view");
    }
}

/// Navigator that logs the requested route
#[derive(Debug, Default)]
pub struct LogNavigator;

impl Navigator for LogNavigator {
    fn navigate(&mut self, target: Option<&str>) {
        match target {
            Some(name) => debug!(name, "navigate to single marker"),
            None => debug!("navigate to all markers"),
        }
    }
}

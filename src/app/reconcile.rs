//! Reconciliation engine - diffs the store's marker set onto the map
//!
//! Rendered handles are keyed by marker name. Existing handles are moved in
//! place (open popups keep their state and get fresh content), new names get
//! a handle, vanished names lose theirs. After every pass the view is fitted
//! unless free-roam is on.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use tracing::{debug, trace, warn};

use crate::core::{LatLng, LatLngBounds, MarkerRecord, MarkerStore, ZoomLevel};
use crate::surface::{RenderSurface, DEFAULT_ICON};
use crate::time::relative_time;

/// A marker as currently drawn
#[derive(Debug)]
pub struct RenderedMarker<H> {
    pub handle: H,
    pub position: LatLng,
    pub timestamp: DateTime<Utc>,
    pub popup_open: bool,
}

/// Surface operations issued by one pass
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub created: usize,
    pub moved: usize,
    pub removed: usize,
    pub refreshed_popups: usize,
    /// Records dropped for unusable coordinates
    pub skipped: usize,
}

pub struct Reconciler<S: RenderSurface> {
    surface: S,
    rendered: HashMap<String, RenderedMarker<S::Handle>>,
    default_center: LatLng,
    fit_padding_px: u32,
    /// Whether the previous pass ended with no markers
    was_empty: Option<bool>,
}

impl<S: RenderSurface> Reconciler<S> {
    pub fn new(surface: S, default_center: LatLng, fit_padding_px: u32) -> Self {
        Self {
            surface,
            rendered: HashMap::new(),
            default_center,
            fit_padding_px,
            was_empty: None,
        }
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn surface_mut(&mut self) -> &mut S {
        &mut self.surface
    }

    pub fn rendered(&self, name: &str) -> Option<&RenderedMarker<S::Handle>> {
        self.rendered.get(name)
    }

    pub fn rendered_count(&self) -> usize {
        self.rendered.len()
    }

    pub fn rendered_names(&self) -> HashSet<&str> {
        self.rendered.keys().map(String::as_str).collect()
    }

    pub fn rendered_timestamps(&self) -> impl Iterator<Item = DateTime<Utc>> + '_ {
        self.rendered.values().map(|m| m.timestamp)
    }

    /// Bring the surface in line with `store.markers()`, apply the free-roam
    /// auto-force rule on empty/non-empty transitions, then fit the view.
    pub fn reconcile(&mut self, store: &mut MarkerStore, now: DateTime<Utc>) -> ReconcileReport {
        let mut report = ReconcileReport::default();

        let mut next: HashMap<&str, &MarkerRecord> = HashMap::with_capacity(store.markers().len());
        for record in store.markers() {
            if !record.has_valid_position() {
                warn!(name = %record.name, lat = record.latitude, lng = record.longitude, "Skipping marker with invalid position");
                report.skipped += 1;
                continue;
            }
            next.insert(record.name.as_str(), record);
        }

        let stale: Vec<String> = self
            .rendered
            .keys()
            .filter(|name| !next.contains_key(name.as_str()))
            .cloned()
            .collect();
        for name in stale {
            if let Some(marker) = self.rendered.remove(&name) {
                trace!(%name, "Removing marker");
                self.surface.remove_handle(marker.handle);
                report.removed += 1;
            }
        }

        for (name, record) in &next {
            let position = record.position();
            match self.rendered.get_mut(*name) {
                Some(marker) => {
                    if marker.position != position {
                        self.surface.move_handle(&marker.handle, position);
                        marker.position = position;
                        report.moved += 1;
                    }
                    marker.timestamp = record.timestamp;
                    marker.popup_open = self.surface.is_popup_open(&marker.handle);
                    if marker.popup_open {
                        self.surface
                            .set_popup_content(&marker.handle, &popup_html(name, record.timestamp, now));
                        report.refreshed_popups += 1;
                    }
                }
                None => {
                    trace!(%name, "Creating marker");
                    let handle = self.surface.create_point(position, DEFAULT_ICON);
                    self.surface
                        .set_popup_content(&handle, &popup_html(name, record.timestamp, now));
                    self.rendered.insert(
                        name.to_string(),
                        RenderedMarker {
                            handle,
                            position,
                            timestamp: record.timestamp,
                            popup_open: false,
                        },
                    );
                    report.created += 1;
                }
            }
        }

        let positions: Vec<LatLng> = next.values().map(|r| r.position()).collect();
        drop(next);

        let is_empty = positions.is_empty();
        if self.was_empty != Some(is_empty) {
            if is_empty {
                store.force_free_roam();
            } else {
                store.release_free_roam();
            }
            self.was_empty = Some(is_empty);
        }

        if !store.config().free_roam.enabled() {
            self.fit_view(&positions, store.config().zoom_level);
        }

        if report != ReconcileReport::default() {
            debug!(
                created = report.created,
                moved = report.moved,
                removed = report.removed,
                popups = report.refreshed_popups,
                skipped = report.skipped,
                "Reconciled markers"
            );
        }
        report
    }

    /// Replace the text of every open popup in place
    pub fn refresh_open_popups(&mut self, now: DateTime<Utc>) -> usize {
        let mut refreshed = 0;
        for (name, marker) in self.rendered.iter_mut() {
            marker.popup_open = self.surface.is_popup_open(&marker.handle);
            if marker.popup_open {
                self.surface
                    .set_popup_content(&marker.handle, &popup_html(name, marker.timestamp, now));
                refreshed += 1;
            }
        }
        refreshed
    }

    /// Remove every rendered handle
    pub fn clear(&mut self) {
        for (_, marker) in self.rendered.drain() {
            self.surface.remove_handle(marker.handle);
        }
        self.was_empty = None;
    }

    fn fit_view(&mut self, positions: &[LatLng], zoom_level: ZoomLevel) {
        match positions {
            [] => self
                .surface
                .set_view(self.default_center, ZoomLevel::CountryFar.zoom()),
            [single] => self.surface.set_view(*single, zoom_level.zoom()),
            many => {
                if let Some(bounds) = LatLngBounds::from_points(many.iter().copied()) {
                    self.surface.fit_to_bounds(bounds, self.fit_padding_px);
                }
            }
        }
    }
}

/// Popup body for one marker
pub fn popup_html(name: &str, timestamp: DateTime<Utc>, now: DateTime<Utc>) -> String {
    format!(
        "<b>{}</b><br>Last seen {}",
        escape_html(name),
        relative_time(timestamp, now)
    )
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::testing::{record, record_at, t0, RecordingSurface, SurfaceOp};
    use crate::core::{Configuration, Filter};

    const CENTER: LatLng = LatLng::new(51.0, 10.0);

    fn setup() -> (Reconciler<RecordingSurface>, MarkerStore) {
        (
            Reconciler::new(RecordingSurface::default(), CENTER, 50),
            MarkerStore::new(Configuration::default(), t0()),
        )
    }

    fn set(store: &mut MarkerStore, records: Vec<MarkerRecord>) {
        store.apply_snapshot(&Filter::All, records);
    }

    #[test]
    fn test_rendered_names_follow_store() {
        let (mut rec, mut store) = setup();
        let sequences = vec![
            vec![record("a", 1), record("b", 1)],
            vec![record("b", 0), record("c", 0)],
            vec![record("c", 0)],
            vec![record("a", 0), record("b", 0), record("c", 0), record("d", 0)],
            vec![],
            vec![record("e", 0)],
        ];

        for markers in sequences {
            set(&mut store, markers);
            rec.reconcile(&mut store, t0());
            let expected: HashSet<&str> = store.markers().iter().map(|m| m.name.as_str()).collect();
            assert_eq!(rec.rendered_names(), expected);
            assert_eq!(rec.surface().points.len(), expected.len());
        }
    }

    #[test]
    fn test_upserts_keep_names_unique() {
        let (mut rec, mut store) = setup();
        for (i, name) in ["a", "b", "a", "c", "b", "a"].iter().enumerate() {
            store.apply_update(&Filter::All, record_at(name, i as f64, 0.0));
            rec.reconcile(&mut store, t0());
        }
        assert_eq!(rec.rendered_count(), 3);
        assert_eq!(rec.surface().creates(), 3);
        assert_eq!(rec.surface().removes(), 0);
    }

    #[test]
    fn test_reconcile_is_idempotent() {
        let (mut rec, mut store) = setup();
        set(&mut store, vec![record_at("a", 1.0, 1.0), record_at("b", 2.0, 2.0)]);
        let first = rec.reconcile(&mut store, t0());
        assert_eq!(first.created, 2);

        rec.surface_mut().clear_ops();
        let second = rec.reconcile(&mut store, t0());
        assert_eq!(second.created, 0);
        assert_eq!(second.removed, 0);
        assert_eq!(second.moved, 0);
        assert_eq!(rec.surface().creates() + rec.surface().removes(), 0);
    }

    #[test]
    fn test_move_preserves_open_popup() {
        let (mut rec, mut store) = setup();
        set(&mut store, vec![record_at("a", 1.0, 1.0)]);
        rec.reconcile(&mut store, t0());

        let handle = rec.rendered("a").unwrap().handle;
        rec.surface_mut().open_popup(handle);
        rec.surface_mut().clear_ops();

        set(&mut store, vec![record_at("a", 1.5, 1.5)]);
        let report = rec.reconcile(&mut store, t0());

        assert_eq!(report.moved, 1);
        assert_eq!(report.refreshed_popups, 1);
        assert_eq!(rec.rendered("a").unwrap().handle, handle);
        assert!(rec.surface().is_popup_open(&handle));
        assert!(rec.rendered("a").unwrap().popup_open);
        assert_eq!(rec.surface().points[&handle], LatLng::new(1.5, 1.5));
        assert_eq!(rec.surface().creates() + rec.surface().removes(), 0);
    }

    #[test]
    fn test_closed_popup_not_rewritten() {
        let (mut rec, mut store) = setup();
        set(&mut store, vec![record_at("a", 1.0, 1.0)]);
        rec.reconcile(&mut store, t0());
        rec.surface_mut().clear_ops();

        set(&mut store, vec![record_at("a", 2.0, 1.0)]);
        rec.reconcile(&mut store, t0());
        assert_eq!(rec.surface().count(|op| matches!(op, SurfaceOp::Popup { .. })), 0);
    }

    #[test]
    fn test_new_marker_gets_default_popup() {
        let (mut rec, mut store) = setup();
        set(&mut store, vec![record("<x>", 90)]);
        rec.reconcile(&mut store, t0());

        let handle = rec.rendered("<x>").unwrap().handle;
        assert_eq!(
            rec.surface().popups[&handle],
            "<b>&lt;x&gt;</b><br>Last seen 1 minute ago"
        );
    }

    #[test]
    fn test_invalid_positions_skipped() {
        let (mut rec, mut store) = setup();
        set(
            &mut store,
            vec![record_at("ok", 1.0, 1.0), record_at("nan", f64::NAN, 1.0)],
        );
        let report = rec.reconcile(&mut store, t0());
        assert_eq!(report.created, 1);
        assert_eq!(report.skipped, 1);
        assert!(rec.rendered("nan").is_none());
    }

    #[test]
    fn test_empty_set_forces_free_roam_then_releases() {
        let (mut rec, mut store) = setup();
        assert!(!store.config().free_roam.enabled());

        set(&mut store, vec![record("a", 0)]);
        rec.reconcile(&mut store, t0());
        set(&mut store, vec![]);
        rec.reconcile(&mut store, t0());
        assert!(store.config().free_roam.enabled());
        assert_eq!(rec.rendered_count(), 0);
        assert!(rec.surface().points.is_empty());

        set(&mut store, vec![record("b", 0)]);
        rec.reconcile(&mut store, t0());
        assert!(!store.config().free_roam.enabled());
    }

    #[test]
    fn test_user_free_roam_survives_empty_cycle() {
        let (mut rec, mut store) = setup();
        store.set_free_roam(true);
        set(&mut store, vec![]);
        rec.reconcile(&mut store, t0());
        set(&mut store, vec![record("a", 0)]);
        rec.reconcile(&mut store, t0());

        assert!(store.config().free_roam.enabled());
        assert!(rec.surface().last_view_op().is_none());
    }

    #[test]
    fn test_single_marker_centers_at_chosen_zoom() {
        let (mut rec, mut store) = setup();
        store.set_zoom_level(ZoomLevel::Close);
        set(&mut store, vec![record_at("a", 48.1, 11.6)]);
        rec.reconcile(&mut store, t0());

        assert_eq!(
            rec.surface().last_view_op(),
            Some(&SurfaceOp::View {
                center: LatLng::new(48.1, 11.6),
                zoom: ZoomLevel::Close.zoom(),
            })
        );
    }

    #[test]
    fn test_many_markers_fit_bounds_with_padding() {
        let (mut rec, mut store) = setup();
        set(
            &mut store,
            vec![
                record_at("a", 48.0, 11.0),
                record_at("b", 52.0, 13.0),
                record_at("c", 50.0, 9.0),
            ],
        );
        rec.reconcile(&mut store, t0());

        let expected = LatLngBounds {
            south_west: LatLng::new(48.0, 9.0),
            north_east: LatLng::new(52.0, 13.0),
        };
        assert_eq!(
            rec.surface().last_view_op(),
            Some(&SurfaceOp::Fit {
                bounds: expected,
                padding_px: 50,
            })
        );
    }

    #[test]
    fn test_empty_without_free_roam_centers_default() {
        let (mut rec, mut store) = setup();
        set(&mut store, vec![record("a", 0)]);
        rec.reconcile(&mut store, t0());
        set(&mut store, vec![]);
        rec.reconcile(&mut store, t0());
        // user turns free-roam off while nothing is visible
        store.set_free_roam(false);
        rec.reconcile(&mut store, t0());

        assert_eq!(
            rec.surface().last_view_op(),
            Some(&SurfaceOp::View {
                center: CENTER,
                zoom: ZoomLevel::CountryFar.zoom(),
            })
        );
    }

    #[test]
    fn test_refresh_open_popups_only() {
        let (mut rec, mut store) = setup();
        set(&mut store, vec![record("a", 10), record("b", 10)]);
        rec.reconcile(&mut store, t0());
        let a = rec.rendered("a").unwrap().handle;
        rec.surface_mut().open_popup(a);

        let later = t0() + chrono::Duration::seconds(120);
        assert_eq!(rec.refresh_open_popups(later), 1);
        assert_eq!(
            rec.surface().popups[&a],
            "<b>a</b><br>Last seen 2 minutes ago"
        );
    }

    #[test]
    fn test_clear_removes_all_handles() {
        let (mut rec, mut store) = setup();
        set(&mut store, vec![record("a", 0), record("b", 0)]);
        rec.reconcile(&mut store, t0());
        rec.clear();
        assert_eq!(rec.rendered_count(), 0);
        assert!(rec.surface().points.is_empty());
    }
}

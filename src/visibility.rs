//! Segment visibility strategies.
//!
//! Two strategies, selected by configuration flags:
//!
//! - **Zoom-triggered**: all segments become visible once the zoom level
//!   reaches a threshold. Once shown they stay visible on zoom-out; hiding
//!   happens through [`SegmentVisibilityPolicy::toggle`] or
//!   [`SegmentVisibilityPolicy::hide_all`].
//! - **Bounds-triggered**: after the segments have been shown once, panning
//!   reveals the segments whose bounding box intersects the viewport.
//!   Segments already visible are never hidden by this path.
//!
//! When both flags are set, the zoom strategy takes precedence: crossing the
//! zoom threshold reveals only the bounds-intersecting subset, and the
//! standalone bounds path runs only when zoom-based showing is off.
//!
//! Viewport intersection goes through an R-tree over the segment bounding
//! boxes, rebuilt lazily after segments change.

use log::debug;
use rstar::{RTree, RTreeObject, AABB};

use crate::config::SegmentDisplayConfig;
use crate::overlay::OverlayRegistry;
use crate::provider::MapProvider;
use crate::Bounds;

/// R-tree entry: one segment overlay slot and its bounding box.
#[derive(Debug, Clone)]
struct SegmentEnvelope {
    slot: usize,
    aabb: AABB<[f64; 2]>,
}

impl RTreeObject for SegmentEnvelope {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.aabb
    }
}

/// Decides when segment lines are shown or hidden.
pub struct SegmentVisibilityPolicy {
    show_on_zoom: bool,
    show_on_zoom_level: u8,
    show_within_bounds: bool,
    /// Sticky once the segments have been shown; afterwards it tracks the
    /// current all-shown/all-hidden state.
    pub segments_shown: bool,
    /// Guard flag set around every visibility mutation.
    pub changing: bool,
    index: RTree<SegmentEnvelope>,
    index_dirty: bool,
}

impl SegmentVisibilityPolicy {
    pub fn from_config(config: &SegmentDisplayConfig) -> Self {
        Self {
            show_on_zoom: config.show_on_zoom,
            show_on_zoom_level: config.show_on_zoom_level,
            show_within_bounds: config.show_within_bounds,
            segments_shown: false,
            changing: false,
            index: RTree::new(),
            index_dirty: true,
        }
    }

    /// Whether either strategy is active.
    pub fn enabled(&self) -> bool {
        self.show_on_zoom || self.show_within_bounds
    }

    /// Invalidate the spatial index after segments were added or removed.
    pub fn mark_dirty(&mut self) {
        self.index_dirty = true;
    }

    // ========================================================================
    // Event Triggers
    // ========================================================================

    /// Zoom changed. The zoom strategy wins when both are configured; the
    /// bounds strategy only runs here when zoom-based showing is off.
    pub fn on_zoom_changed(
        &mut self,
        zoom: u8,
        viewport: Option<Bounds>,
        registry: &mut OverlayRegistry,
        provider: &mut dyn MapProvider,
    ) {
        if self.show_on_zoom {
            if zoom >= self.show_on_zoom_level {
                self.segments_shown = true;
                if self.show_within_bounds {
                    if let Some(vp) = viewport {
                        self.show_bounded(registry, provider, &vp);
                    }
                } else {
                    self.set_all_visible(registry, provider, true);
                }
            }
            // Below the threshold the lines keep their current visibility;
            // hiding goes through toggle() or hide_all().
        } else {
            self.show_within_viewport(registry, provider, viewport);
        }
    }

    /// Center changed. No-ops while the mouse button is held so a drag in
    /// progress doesn't churn visibility.
    pub fn on_center_changed(
        &mut self,
        mouse_down: bool,
        viewport: Option<Bounds>,
        registry: &mut OverlayRegistry,
        provider: &mut dyn MapProvider,
    ) {
        if !mouse_down {
            self.show_within_viewport(registry, provider, viewport);
        }
    }

    pub fn on_drag_end(
        &mut self,
        viewport: Option<Bounds>,
        registry: &mut OverlayRegistry,
        provider: &mut dyn MapProvider,
    ) {
        self.show_within_viewport(registry, provider, viewport);
    }

    /// The bounds-strategy trigger: only acts once the segments have been
    /// shown at least once.
    fn show_within_viewport(
        &mut self,
        registry: &mut OverlayRegistry,
        provider: &mut dyn MapProvider,
        viewport: Option<Bounds>,
    ) {
        if self.show_within_bounds && self.segments_shown {
            if let Some(vp) = viewport {
                self.show_bounded(registry, provider, &vp);
            }
        }
    }

    // ========================================================================
    // Explicit Toggles
    // ========================================================================

    /// Flip between all-shown and all-hidden. In bounds mode, the first show
    /// reveals only the segments intersecting the viewport.
    ///
    /// Returns whether segments are visible afterwards.
    pub fn toggle(
        &mut self,
        registry: &mut OverlayRegistry,
        provider: &mut dyn MapProvider,
        viewport: Option<Bounds>,
    ) -> bool {
        if self.segments_shown {
            self.set_all_visible(registry, provider, false);
            false
        } else if self.show_within_bounds {
            if let Some(vp) = viewport {
                self.show_bounded(registry, provider, &vp);
            }
            self.segments_shown = true;
            true
        } else {
            self.set_all_visible(registry, provider, true);
            true
        }
    }

    /// Hide every segment line.
    pub fn hide_all(&mut self, registry: &mut OverlayRegistry, provider: &mut dyn MapProvider) {
        self.set_all_visible(registry, provider, false);
    }

    /// Show or hide every segment line and record the new state.
    pub fn set_all_visible(
        &mut self,
        registry: &mut OverlayRegistry,
        provider: &mut dyn MapProvider,
        visible: bool,
    ) {
        self.changing = true;
        registry.set_all_lines_visible(provider, visible);
        self.segments_shown = visible;
        self.changing = false;
    }

    /// Show the segments whose bounding box intersects the viewport.
    /// Already-visible segments are left alone.
    pub fn show_bounded(
        &mut self,
        registry: &mut OverlayRegistry,
        provider: &mut dyn MapProvider,
        viewport: &Bounds,
    ) {
        self.changing = true;
        self.ensure_index(registry);

        let search = AABB::from_corners(
            [viewport.min_lng, viewport.min_lat],
            [viewport.max_lng, viewport.max_lat],
        );
        let slots: Vec<usize> = self
            .index
            .locate_in_envelope_intersecting(&search)
            .map(|e| e.slot)
            .collect();
        debug!("{} of {} segments intersect viewport", slots.len(), registry.overlays().len());

        for slot in slots {
            if let Some(overlay) = registry.overlay_mut(slot) {
                provider.set_polyline_visible(overlay.base, true);
                if let Some(hover) = overlay.hover {
                    provider.set_polyline_visible(hover, true);
                }
                overlay.visible = true;
            }
        }
        self.changing = false;
    }

    /// Rebuild the spatial index when segments have changed.
    fn ensure_index(&mut self, registry: &OverlayRegistry) {
        if !self.index_dirty {
            return;
        }

        let envelopes: Vec<SegmentEnvelope> = registry
            .overlays()
            .iter()
            .enumerate()
            .filter_map(|(slot, overlay)| {
                overlay.rect.map(|rect| SegmentEnvelope {
                    slot,
                    aabb: AABB::from_corners(
                        [rect.min().x, rect.min().y],
                        [rect.max().x, rect.max().y],
                    ),
                })
            })
            .collect();
        self.index = RTree::bulk_load(envelopes);
        self.index_dirty = false;
    }
}

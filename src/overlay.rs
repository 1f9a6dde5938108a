//! Overlay collections: segment lines, markers and info boxes.
//!
//! The registry owns every provider handle the controller creates, keyed the
//! way the page needs them back: segment overlays in insertion order, markers
//! as category -> id -> handle, open info boxes as a stack. Mutation happens
//! only through the controller's event handlers, and every rebuild path
//! clears the previous collection before repopulating so duplicate overlays
//! cannot accumulate.

use std::collections::HashMap;

use geo::{BoundingRect, Coord, LineString, Rect};
use log::debug;
use rand::Rng;

use crate::provider::{InfoBoxId, MapProvider, MarkerId, PolylineId};
use crate::{GeoPoint, MapItem, Poi, PoiImage, Segment};

/// Default marker category when none is supplied.
pub const DEFAULT_MARKER_CATEGORY: &str = "point";

/// The category trail markers are registered under.
pub const TRAIL_MARKER_CATEGORY: &str = "Trail";

// ============================================================================
// Records
// ============================================================================

/// A rendered segment: the base polyline plus an optional hover overlay.
///
/// The hover line exists iff hover is enabled for the segment's category
/// (regular vs. related); both lines live and die together.
#[derive(Debug, Clone)]
pub struct SegmentOverlay {
    pub segment: Segment,
    pub base: PolylineId,
    pub hover: Option<PolylineId>,
    pub related: bool,
    /// Bounding rectangle of the path, used for viewport intersection.
    pub rect: Option<Rect<f64>>,
    /// Mirror of the provider-side visibility, for cheap queries.
    pub visible: bool,
}

/// The source data behind a marker, used to rebuild info-box content on
/// click.
#[derive(Debug, Clone)]
pub enum MarkerData {
    Item(MapItem),
    Poi(Poi),
    Image(PoiImage),
}

impl MarkerData {
    pub fn position(&self) -> GeoPoint {
        match self {
            MarkerData::Item(item) => GeoPoint::new(item.lat, item.lng),
            MarkerData::Poi(poi) => GeoPoint::new(poi.lat, poi.lng),
            MarkerData::Image(image) => GeoPoint::new(image.lat, image.lng),
        }
    }

    /// Tooltip text shown while hovering the marker.
    pub fn hover_label(&self) -> Option<&str> {
        match self {
            MarkerData::Item(item) => Some(item.name.as_str()),
            MarkerData::Poi(poi) => Some(poi.title.as_str()),
            MarkerData::Image(_) => None,
        }
    }
}

/// Registry entry for one marker.
#[derive(Debug, Clone)]
pub struct MarkerRecord {
    pub id: String,
    pub category: String,
    pub data: MarkerData,
    /// Rendered icon height, fed to the info-box offset strategy.
    pub icon_height: Option<u32>,
}

// ============================================================================
// Registry
// ============================================================================

/// Owns the mutable overlay collections for one map.
#[derive(Default)]
pub struct OverlayRegistry {
    segments: Vec<SegmentOverlay>,
    markers: HashMap<String, HashMap<String, MarkerId>>,
    marker_records: HashMap<MarkerId, MarkerRecord>,
    info_boxes: Vec<InfoBoxId>,
    has_segments: bool,
}

impl OverlayRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Segments
    // ========================================================================

    /// Register a rendered segment. Returns its slot index.
    pub fn add_segment(
        &mut self,
        segment: Segment,
        base: PolylineId,
        hover: Option<PolylineId>,
        related: bool,
        visible: bool,
    ) -> usize {
        let rect = path_rect(&segment.points);
        self.has_segments = true;
        self.segments.push(SegmentOverlay {
            segment,
            base,
            hover,
            related,
            rect,
            visible,
        });
        self.segments.len() - 1
    }

    /// Whether any segment has ever been added. Not reset by
    /// [`OverlayRegistry::remove_segments`].
    pub fn has_segments(&self) -> bool {
        self.has_segments
    }

    pub fn overlays(&self) -> &[SegmentOverlay] {
        &self.segments
    }

    pub fn overlay(&self, slot: usize) -> Option<&SegmentOverlay> {
        self.segments.get(slot)
    }

    pub fn overlay_mut(&mut self, slot: usize) -> Option<&mut SegmentOverlay> {
        self.segments.get_mut(slot)
    }

    /// Total number of rendered lines (base + hover overlays).
    pub fn line_count(&self) -> usize {
        self.segments
            .iter()
            .map(|s| 1 + usize::from(s.hover.is_some()))
            .sum()
    }

    /// Find the segment slot owning a polyline, whether the click landed on
    /// the base line or the hover overlay.
    pub fn find_by_polyline(&self, id: PolylineId) -> Option<usize> {
        self.segments
            .iter()
            .position(|s| s.base == id || s.hover == Some(id))
    }

    /// Set the provider-side visibility of every line.
    pub fn set_all_lines_visible(&mut self, provider: &mut dyn MapProvider, visible: bool) {
        for overlay in &mut self.segments {
            provider.set_polyline_visible(overlay.base, visible);
            if let Some(hover) = overlay.hover {
                provider.set_polyline_visible(hover, visible);
            }
            overlay.visible = visible;
        }
    }

    /// Detach and drop every segment line.
    pub fn remove_segments(&mut self, provider: &mut dyn MapProvider) {
        for overlay in &self.segments {
            provider.remove_polyline(overlay.base);
            if let Some(hover) = overlay.hover {
                provider.remove_polyline(hover);
            }
        }
        debug!("removed {} segment overlays", self.segments.len());
        self.segments.clear();
    }

    // ========================================================================
    // Markers
    // ========================================================================

    /// Register a marker under a category.
    ///
    /// Generates an id from two random base-36 tokens when none is supplied;
    /// an empty category falls back to [`DEFAULT_MARKER_CATEGORY`]. Returns
    /// the id the marker was stored under.
    pub fn add_marker(
        &mut self,
        marker: MarkerId,
        category: &str,
        id: Option<String>,
        data: MarkerData,
        icon_height: Option<u32>,
    ) -> String {
        let id = match id {
            Some(id) if !id.is_empty() => id,
            _ => format!("{}{}", random_token(), random_token()),
        };
        let category = if category.is_empty() {
            DEFAULT_MARKER_CATEGORY
        } else {
            category
        };

        self.markers
            .entry(category.to_string())
            .or_default()
            .insert(id.clone(), marker);
        self.marker_records.insert(
            marker,
            MarkerRecord {
                id: id.clone(),
                category: category.to_string(),
                data,
                icon_height,
            },
        );
        id
    }

    /// Track a marker for event dispatch without listing it under a category
    /// (photo markers are not part of the legend/visibility groups).
    pub fn track_unlisted_marker(&mut self, marker: MarkerId, data: MarkerData) {
        self.marker_records.insert(
            marker,
            MarkerRecord {
                id: String::new(),
                category: String::new(),
                data,
                icon_height: None,
            },
        );
    }

    /// Look up a marker handle by category and id.
    pub fn marker(&self, category: &str, id: &str) -> Option<MarkerId> {
        self.markers.get(category)?.get(id).copied()
    }

    /// Look up the registry record for a marker handle.
    pub fn record(&self, marker: MarkerId) -> Option<&MarkerRecord> {
        self.marker_records.get(&marker)
    }

    /// Whether any marker category exists.
    pub fn has_markers(&self) -> bool {
        !self.markers.is_empty()
    }

    /// Total number of categorized markers.
    pub fn marker_count(&self) -> usize {
        self.markers.values().map(|m| m.len()).sum()
    }

    /// Set visibility for every marker in one category.
    pub fn set_category_visible(
        &mut self,
        provider: &mut dyn MapProvider,
        category: &str,
        visible: bool,
    ) {
        if let Some(markers) = self.markers.get(category) {
            for marker in markers.values() {
                provider.set_marker_visible(*marker, visible);
            }
        }
    }

    /// Set visibility for every categorized marker.
    pub fn set_all_markers_visible(&mut self, provider: &mut dyn MapProvider, visible: bool) {
        for markers in self.markers.values() {
            for marker in markers.values() {
                provider.set_marker_visible(*marker, visible);
            }
        }
    }

    /// Detach and drop every categorized marker.
    pub fn remove_markers(&mut self, provider: &mut dyn MapProvider) {
        for markers in self.markers.values() {
            for marker in markers.values() {
                provider.remove_marker(*marker);
                self.marker_records.remove(marker);
            }
        }
        debug!("removed {} marker categories", self.markers.len());
        self.markers.clear();
    }

    // ========================================================================
    // Info Boxes
    // ========================================================================

    /// Close every tracked info box, newest first, and clear the stack.
    ///
    /// Every "open a new info box" path must call this first; that is what
    /// guarantees at most one box is ever visible.
    pub fn close_all_info_boxes(&mut self, provider: &mut dyn MapProvider) {
        for info_box in self.info_boxes.iter().rev() {
            provider.close_info_box(*info_box);
        }
        self.info_boxes.clear();
    }

    /// Track a newly opened info box.
    pub fn track_info_box(&mut self, id: InfoBoxId) {
        self.info_boxes.push(id);
    }

    /// Stop tracking a box the provider already closed.
    pub fn forget_info_box(&mut self, id: InfoBoxId) {
        self.info_boxes.retain(|b| *b != id);
    }

    pub fn info_box_count(&self) -> usize {
        self.info_boxes.len()
    }
}

/// Bounding rectangle of a path, in lng/lat coordinates.
fn path_rect(points: &[GeoPoint]) -> Option<Rect<f64>> {
    let coords: Vec<Coord> = points
        .iter()
        .filter(|p| p.is_valid())
        .map(|p| Coord { x: p.lng, y: p.lat })
        .collect();
    if coords.is_empty() {
        return None;
    }
    LineString::new(coords).bounding_rect()
}

/// One base-36 token, 13 characters.
fn random_token() -> String {
    const CHARSET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut rng = rand::thread_rng();
    (0..13)
        .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::fake::FakeMap;
    use crate::provider::{MapProvider, PolylineOptions};

    fn sample_segment(id: &str) -> Segment {
        Segment {
            id: id.to_string(),
            points: vec![
                GeoPoint::new(41.5104, -90.5123),
                GeoPoint::new(41.5110, -90.5130),
            ],
            ..Segment::default()
        }
    }

    fn line_options(points: &[GeoPoint]) -> PolylineOptions {
        PolylineOptions {
            path: points.to_vec(),
            clickable: true,
            attached: true,
            color: "yellow".to_string(),
            opacity: 1.0,
            weight: 2,
            z_index: 3,
            dashed: false,
            visible: true,
        }
    }

    #[test]
    fn test_segment_lines_counted_with_hover() {
        let mut provider = FakeMap::new();
        let mut registry = OverlayRegistry::new();

        let segment = sample_segment("seg-1");
        let base = provider.create_polyline(line_options(&segment.points));
        let hover = provider.create_polyline(line_options(&segment.points));
        registry.add_segment(segment, base, Some(hover), false, true);

        assert_eq!(registry.line_count(), 2);
        assert_eq!(registry.find_by_polyline(base), Some(0));
        assert_eq!(registry.find_by_polyline(hover), Some(0));

        registry.remove_segments(&mut provider);
        assert_eq!(registry.line_count(), 0);
        assert_eq!(provider.attached_polyline_count(), 0);
        // The has-segments flag is sticky.
        assert!(registry.has_segments());
    }

    #[test]
    fn test_marker_id_generated_when_absent() {
        let mut provider = FakeMap::new();
        let mut registry = OverlayRegistry::new();

        let poi = Poi {
            title: "Parking".to_string(),
            lat: 41.5,
            lng: -90.5,
            ..Poi::default()
        };
        let marker = provider.create_marker(crate::provider::MarkerOptions::at(GeoPoint::new(
            41.5, -90.5,
        )));
        let id = registry.add_marker(marker, "Parking", None, MarkerData::Poi(poi), None);

        assert_eq!(id.len(), 26);
        assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_eq!(registry.marker("Parking", &id), Some(marker));
    }

    #[test]
    fn test_marker_category_defaults_to_point() {
        let mut provider = FakeMap::new();
        let mut registry = OverlayRegistry::new();

        let marker = provider.create_marker(crate::provider::MarkerOptions::at(GeoPoint::new(
            41.5, -90.5,
        )));
        let id = registry.add_marker(
            marker,
            "",
            Some("m-1".to_string()),
            MarkerData::Poi(Poi::default()),
            None,
        );

        assert_eq!(id, "m-1");
        assert_eq!(registry.marker(DEFAULT_MARKER_CATEGORY, "m-1"), Some(marker));
    }

    #[test]
    fn test_close_all_info_boxes() {
        let mut provider = FakeMap::new();
        let mut registry = OverlayRegistry::new();

        for _ in 0..3 {
            let id = provider.open_info_box(crate::provider::InfoBoxOptions {
                content: String::new(),
                width: 250,
                position: None,
                anchor: None,
                pixel_offset: (0, 0),
                close_icon: String::new(),
            });
            registry.track_info_box(id);
        }
        assert_eq!(registry.info_box_count(), 3);

        registry.close_all_info_boxes(&mut provider);
        assert_eq!(registry.info_box_count(), 0);
        assert!(provider.open_boxes.is_empty());
    }

    #[test]
    fn test_remove_markers_clears_records() {
        let mut provider = FakeMap::new();
        let mut registry = OverlayRegistry::new();

        let marker = provider.create_marker(crate::provider::MarkerOptions::at(GeoPoint::new(
            41.5, -90.5,
        )));
        registry.add_marker(
            marker,
            TRAIL_MARKER_CATEGORY,
            Some("12".to_string()),
            MarkerData::Item(MapItem::default()),
            None,
        );

        registry.remove_markers(&mut provider);
        assert!(!registry.has_markers());
        assert!(registry.record(marker).is_none());
        assert!(provider.markers.is_empty());
    }

    #[test]
    fn test_path_rect() {
        let rect = path_rect(&[GeoPoint::new(41.0, -91.0), GeoPoint::new(42.0, -90.0)]).unwrap();
        assert_eq!(rect.min().y, 41.0);
        assert_eq!(rect.max().x, -90.0);
        assert!(path_rect(&[]).is_none());
    }
}

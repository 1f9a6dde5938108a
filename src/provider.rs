//! Map provider capability interface.
//!
//! The provider SDK (tiles, polylines, markers, info boxes, clustering) is an
//! external collaborator. Everything the state machine needs from it is
//! expressed here as a trait over opaque overlay handles, and everything the
//! provider tells us back arrives as a [`MapEvent`]. The controller
//! subscribes once and dispatches by handle, so no closure ever captures
//! mutable map state.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::geometry::ViewportSize;
use crate::{Bounds, GeoPoint};

// ============================================================================
// Overlay Handles
// ============================================================================

/// Handle to a rendered polyline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PolylineId(pub u64);

/// Handle to a rendered marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MarkerId(pub u64);

/// Handle to an open info box.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InfoBoxId(pub u64);

// ============================================================================
// Options
// ============================================================================

/// Base map rendering type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MapType {
    Hybrid,
    Roadmap,
    Satellite,
    Terrain,
    /// A provider-registered custom map type, referenced by name.
    #[serde(untagged)]
    Custom(String),
}

impl MapType {
    /// Parse a map type name. Unknown names are treated as custom types.
    pub fn from_name(name: &str) -> Self {
        match name.to_lowercase().as_str() {
            "hybrid" => MapType::Hybrid,
            "roadmap" => MapType::Roadmap,
            "satellite" => MapType::Satellite,
            "terrain" => MapType::Terrain,
            _ => MapType::Custom(name.to_string()),
        }
    }
}

impl Default for MapType {
    fn default() -> Self {
        MapType::Hybrid
    }
}

/// Placement of a map control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlPosition {
    TopLeft,
    TopRight,
    LeftTop,
    RightTop,
    LeftCenter,
    LeftBottom,
    BottomLeft,
    BottomCenter,
}

/// Options used to construct the map.
#[derive(Debug, Clone, PartialEq)]
pub struct MapOptions {
    pub center: Option<GeoPoint>,
    pub zoom: u8,
    pub map_type: MapType,
    pub full_screen_control: bool,
    pub map_type_control: bool,
    pub min_zoom: Option<u8>,
    pub scroll_wheel: bool,
    pub street_view: bool,
    pub zoom_control_position: ControlPosition,
}

/// Options for a rendered polyline.
#[derive(Debug, Clone, PartialEq)]
pub struct PolylineOptions {
    pub path: Vec<GeoPoint>,
    pub clickable: bool,
    /// Whether the polyline is attached to the map at creation. Related
    /// segments start detached.
    pub attached: bool,
    pub color: String,
    pub opacity: f64,
    pub weight: u32,
    pub z_index: i32,
    /// Render as a dashed line (opacity 0 with a repeated dash symbol).
    pub dashed: bool,
    pub visible: bool,
}

/// A marker icon descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkerIcon {
    pub url: String,
    #[serde(default)]
    pub size: Option<(u32, u32)>,
    #[serde(default)]
    pub scaled_size: Option<(u32, u32)>,
    /// Anchor point offset from the icon's top-left corner.
    #[serde(default)]
    pub anchor: Option<(i32, i32)>,
}

impl MarkerIcon {
    /// An icon referencing an image with no explicit sizing.
    pub fn from_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            size: None,
            scaled_size: None,
            anchor: None,
        }
    }

    /// The icon's rendered height, preferring the scaled size.
    pub fn height(&self) -> Option<u32> {
        self.scaled_size.or(self.size).map(|(_, h)| h)
    }
}

/// Options for a rendered marker.
#[derive(Debug, Clone, PartialEq)]
pub struct MarkerOptions {
    pub position: GeoPoint,
    pub icon: Option<MarkerIcon>,
    pub title: Option<String>,
    pub z_index: i32,
    pub attached: bool,
    pub optimized: bool,
    pub visible: bool,
}

impl MarkerOptions {
    pub fn at(position: GeoPoint) -> Self {
        Self {
            position,
            icon: None,
            title: None,
            z_index: 0,
            attached: true,
            optimized: true,
            visible: true,
        }
    }
}

/// Options for an info box overlay.
#[derive(Debug, Clone, PartialEq)]
pub struct InfoBoxOptions {
    pub content: String,
    pub width: u32,
    /// Free position on the map (segment info boxes).
    pub position: Option<GeoPoint>,
    /// Marker the box is anchored to (marker info boxes).
    pub anchor: Option<MarkerId>,
    pub pixel_offset: (i32, i32),
    pub close_icon: String,
}

/// A cluster icon style descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterStyle {
    pub url: String,
    pub width: u32,
    pub height: u32,
    pub text_size: u32,
    pub text_color: String,
}

/// Marker clustering options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterOptions {
    /// Pixel size of the grid square to collect markers in.
    pub grid_size: u32,
    /// Maximum zoom level at which clustering happens, or `None` for all.
    pub max_zoom: Option<u8>,
    /// Minimum number of markers that form a cluster.
    pub minimum_cluster_size: u32,
}

impl Default for ClusterOptions {
    fn default() -> Self {
        Self {
            grid_size: 40,
            max_zoom: None,
            minimum_cluster_size: 2,
        }
    }
}

// ============================================================================
// Events
// ============================================================================

/// Events delivered from the provider to [`crate::MapController::handle_event`].
#[derive(Debug, Clone, PartialEq)]
pub enum MapEvent {
    /// The map settled after panning/zooming. The first idle after
    /// construction completes initialization.
    Idle,
    Resize,
    ZoomChanged,
    CenterChanged,
    DragEnd,
    MouseDown,
    MouseUp,
    MarkerClick(MarkerId),
    MarkerHoverStart(MarkerId, GeoPoint),
    MarkerHoverEnd(MarkerId),
    PolylineClick(PolylineId, GeoPoint),
    PolylineHoverStart(PolylineId, GeoPoint),
    PolylineHoverEnd(PolylineId),
    /// An info box was dismissed through its close control.
    InfoBoxClosed(InfoBoxId),
}

// ============================================================================
// Capability Traits
// ============================================================================

/// The map provider SDK surface consumed by the controller.
pub trait MapProvider {
    fn create_map(&mut self, canvas_id: &str, options: MapOptions) -> Result<()>;

    // Polylines
    fn create_polyline(&mut self, options: PolylineOptions) -> PolylineId;
    fn set_polyline_attached(&mut self, id: PolylineId, attached: bool);
    fn set_polyline_visible(&mut self, id: PolylineId, visible: bool);
    fn set_polyline_opacity(&mut self, id: PolylineId, opacity: f64);
    fn remove_polyline(&mut self, id: PolylineId);

    // Markers
    fn create_marker(&mut self, options: MarkerOptions) -> MarkerId;
    fn set_marker_attached(&mut self, id: MarkerId, attached: bool);
    fn set_marker_visible(&mut self, id: MarkerId, visible: bool);
    fn set_marker_position(&mut self, id: MarkerId, position: GeoPoint);
    fn remove_marker(&mut self, id: MarkerId);

    // Info boxes
    fn open_info_box(&mut self, options: InfoBoxOptions) -> InfoBoxId;
    fn close_info_box(&mut self, id: InfoBoxId);

    // Viewport
    fn center(&self) -> GeoPoint;
    fn set_center(&mut self, center: GeoPoint);
    fn zoom(&self) -> u8;
    fn set_zoom(&mut self, zoom: u8);
    fn set_map_type(&mut self, map_type: &MapType);
    /// Current viewport bounds, `None` before the first render.
    fn viewport(&self) -> Option<Bounds>;
    fn fit_bounds(&mut self, bounds: &Bounds);
    fn is_full_screen(&self) -> bool;
    fn viewport_size(&self) -> ViewportSize;
    /// Ask the map to re-evaluate its edges after a container resize.
    fn trigger_resize(&mut self);

    // Page chrome rendered into the map
    fn add_control(&mut self, position: ControlPosition, name: &str);
    fn show_tooltip(&mut self, text: &str, x: f64, y: f64);
    fn hide_tooltip(&mut self);
    fn open_lightbox(&mut self, src: &str, title: &str);
    fn hide_street_view(&mut self);

    // Marker clustering add-on
    fn cluster_setup(&mut self, styles: &[ClusterStyle], options: &ClusterOptions);
    fn cluster_add_marker(&mut self, id: MarkerId);
    fn cluster_clear(&mut self);
    fn cluster_repaint(&mut self);
}

/// Browser geolocation capability.
///
/// Position updates flow back through
/// [`crate::MapController::handle_position_update`].
pub trait Geolocation {
    fn is_supported(&self) -> bool;
    /// Start a continuous high-accuracy position watch. Returns whether the
    /// watch was started.
    fn watch_position(&mut self) -> bool;
}

/// Browser History API capability.
pub trait HistoryApi {
    fn is_supported(&self) -> bool;
    fn push(&mut self, url: &str);
    /// The current query string (including the leading `?`, or empty).
    fn current_search(&self) -> String;
}

// ============================================================================
// Test Fake
// ============================================================================


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_type_from_name() {
        assert_eq!(MapType::from_name("Terrain"), MapType::Terrain);
        assert_eq!(MapType::from_name("roadmap"), MapType::Roadmap);
        assert_eq!(
            MapType::from_name("winter-trails"),
            MapType::Custom("winter-trails".to_string())
        );
    }

    #[test]
    fn test_marker_icon_height() {
        let mut icon = MarkerIcon::from_url("/images/marker.svg");
        assert_eq!(icon.height(), None);
        icon.size = Some((27, 42));
        assert_eq!(icon.height(), Some(42));
        icon.scaled_size = Some((25, 25));
        assert_eq!(icon.height(), Some(25));
    }

    #[test]
    fn test_control_position_names() {
        let pos: ControlPosition = serde_json::from_str("\"BOTTOM_LEFT\"").unwrap();
        assert_eq!(pos, ControlPosition::BottomLeft);
    }
}

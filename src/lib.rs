//! # Trail Map
//!
//! State management for the interactive trail / store-locator map.
//!
//! This library owns everything between the page and the map provider SDK:
//! - Map lifecycle, configuration and event dispatch ([`MapController`])
//! - Mutable collections of polylines, markers and info boxes ([`OverlayRegistry`])
//! - Zoom- and viewport-driven segment visibility ([`SegmentVisibilityPolicy`])
//! - Marker clustering configuration ([`MarkerClusterPolicy`])
//! - URL query parsing and search-form synchronization ([`query`])
//! - The store-locator page orchestration ([`ListMap`])
//!
//! The map provider SDK, the DOM and the HTTP endpoints are consumed through
//! capability traits in [`provider`] and [`list_map`], so the whole state
//! machine runs (and tests) without a browser.
//!
//! ## Features
//!
//! - **`http`** - Enable the HTTP client for fetching map items
//!
//! ## Quick Start
//!
//! ```no_run
//! use trail_map::{GeoPoint, Segment};
//!
//! let segment = Segment {
//!     id: "seg-1".to_string(),
//!     name: Some("River Loop".to_string()),
//!     points: vec![
//!         GeoPoint::new(41.5104, -90.5123),
//!         GeoPoint::new(41.5110, -90.5130),
//!     ],
//!     ..Segment::default()
//! };
//! ```

use serde::{Deserialize, Serialize};

// Unified error handling
pub mod error;
pub use error::{MapError, Result};

// Coordinate/pixel conversion and viewport sizing
pub mod geometry;
pub use geometry::{PixelPoint, ViewportSize};

// Map provider capability interface and event types
pub mod provider;
pub use provider::{
    ClusterOptions, ClusterStyle, ControlPosition, Geolocation, HistoryApi, InfoBoxId,
    InfoBoxOptions, MapEvent, MapOptions, MapProvider, MapType, MarkerIcon, MarkerId,
    MarkerOptions, PolylineId, PolylineOptions,
};

// Map configuration and strategy callbacks
pub mod config;
pub use config::{MapCallbacks, MapConfig, MapConfigPatch};

// Overlay collections (lines, markers, info boxes)
pub mod overlay;
pub use overlay::{MarkerData, OverlayRegistry, SegmentOverlay};

// Segment visibility strategies (zoom-triggered, bounds-triggered)
pub mod visibility;
pub use visibility::SegmentVisibilityPolicy;

// Marker clustering policy
pub mod cluster;
pub use cluster::{ClusterText, MarkerClusterPolicy};

// The central map state machine
pub mod controller;
pub use controller::{Lifecycle, MapController};

// URL query parsing, validation and search-URL building
pub mod query;
pub use query::{FormField, ItemIds, QueryValue, QueryValues, SearchState};

// Store-locator page orchestration
pub mod list_map;
pub use list_map::{ItemSource, ListMap, PageDom, SearchIds, SearchResponse, ViewMode};

// HTTP client for map item endpoints
#[cfg(feature = "http")]
pub mod http;
#[cfg(feature = "http")]
pub use http::ItemClient;

// ============================================================================
// Core Types
// ============================================================================

/// A latitude/longitude coordinate.
///
/// # Example
/// ```
/// use trail_map::GeoPoint;
/// let point = GeoPoint::new(45.0, -69.0);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    /// Create a new point.
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Check if the point has valid coordinates.
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && self.lat >= -90.0
            && self.lat <= 90.0
            && self.lng >= -180.0
            && self.lng <= 180.0
    }
}

/// Latitude/longitude bounds, accumulated one point at a time.
///
/// Mirrors the provider's bounds object: starts empty, grows through
/// [`Bounds::extend`], and is reset to empty when markers are removed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

impl Bounds {
    /// Create empty bounds. Extending with any point makes them non-empty.
    pub fn empty() -> Self {
        Self {
            min_lat: f64::MAX,
            max_lat: f64::MIN,
            min_lng: f64::MAX,
            max_lng: f64::MIN,
        }
    }

    /// Create bounds from a set of points.
    ///
    /// Returns `None` when `points` is empty.
    pub fn from_points(points: &[GeoPoint]) -> Option<Self> {
        if points.is_empty() {
            return None;
        }
        let mut bounds = Self::empty();
        for p in points {
            bounds.extend(*p);
        }
        Some(bounds)
    }

    /// Whether no point has been added yet.
    pub fn is_empty(&self) -> bool {
        self.min_lat > self.max_lat
    }

    /// Grow the bounds to include a point.
    pub fn extend(&mut self, p: GeoPoint) {
        self.min_lat = self.min_lat.min(p.lat);
        self.max_lat = self.max_lat.max(p.lat);
        self.min_lng = self.min_lng.min(p.lng);
        self.max_lng = self.max_lng.max(p.lng);
    }

    /// Get the center point of the bounds.
    pub fn center(&self) -> GeoPoint {
        GeoPoint::new(
            (self.min_lat + self.max_lat) / 2.0,
            (self.min_lng + self.max_lng) / 2.0,
        )
    }

    /// Whether two bounds overlap. Empty bounds intersect nothing.
    pub fn intersects(&self, other: &Bounds) -> bool {
        if self.is_empty() || other.is_empty() {
            return false;
        }
        self.min_lat <= other.max_lat
            && self.max_lat >= other.min_lat
            && self.min_lng <= other.max_lng
            && self.max_lng >= other.min_lng
    }

    /// Whether a point falls within the bounds.
    pub fn contains(&self, p: GeoPoint) -> bool {
        !self.is_empty()
            && p.lat >= self.min_lat
            && p.lat <= self.max_lat
            && p.lng >= self.min_lng
            && p.lng <= self.max_lng
    }
}

/// A named polyline (trail or path) composed of ordered points.
///
/// Owned by the caller of [`MapController::add_segments`]; the rendered
/// polylines reference it through the [`OverlayRegistry`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Segment {
    pub id: String,
    /// Display name, used for hover tooltips and info boxes.
    pub name: Option<String>,
    /// Segment type, used to show/hide specific segment categories.
    #[serde(rename = "type")]
    pub kind: Option<String>,
    /// Activity ("hiking", "paddling", ...) driving color/style strategies.
    pub activity: Option<String>,
    /// Explicit color override.
    pub color: Option<String>,
    /// Parent trail id, set on related segments so they can be toggled
    /// together.
    pub trail_id: Option<String>,
    pub points: Vec<GeoPoint>,
}

/// A map item record as returned by the `map-items` endpoints.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MapItem {
    pub id: i64,
    pub name: String,
    pub lat: f64,
    pub lng: f64,
    pub url: String,
    #[serde(default)]
    pub img: Option<String>,
    #[serde(default, rename = "imgW")]
    pub img_w: Option<u32>,
    #[serde(default, rename = "imgH")]
    pub img_h: Option<u32>,
    /// Abstract/summary text shown in the marker info box.
    #[serde(default)]
    pub abs: Option<String>,
    #[serde(default)]
    pub addr: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub zip: Option<String>,
}

/// A point of interest rendered as an icon marker.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Poi {
    pub lat: f64,
    pub lng: f64,
    #[serde(default)]
    pub icon: Option<String>,
    /// Title doubles as the marker grouping category.
    pub title: String,
    #[serde(default)]
    pub subtitle: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// A photo point of interest. Clicking opens a lightbox instead of an
/// info box.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PoiImage {
    pub lat: f64,
    pub lng: f64,
    pub src: String,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub credit: Option<String>,
}

impl PoiImage {
    /// Lightbox title: caption plus photo credit when present.
    pub fn lightbox_title(&self) -> String {
        let mut title = String::new();
        if let Some(caption) = &self.caption {
            title.push_str(caption);
        }
        if let Some(credit) = &self.credit {
            title.push_str(" - Photo courtesy: ");
            title.push_str(credit);
        }
        title
    }
}

// ============================================================================
// Tests
// ============================================================================

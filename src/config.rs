//! Map configuration.
//!
//! [`MapConfig`] holds everything data-shaped: feature flags, styling values
//! and per-feature sub-configs. It is not mutated after map construction
//! except through explicit controller setters. A nested options object
//! deep-merges over the defaults through [`MapConfigPatch`]: present fields
//! replace, absent fields keep their defaults, and unknown keys are accepted
//! and ignored.
//!
//! Strategy callbacks (info-box content, segment colors, marker icons) live
//! in [`MapCallbacks`] and are invoked with explicit arguments instead of a
//! rebound receiver.

use serde::Deserialize;

use crate::provider::{ControlPosition, MapType, MarkerIcon, PolylineOptions};
use crate::{GeoPoint, MapItem, Poi, Segment};

// ============================================================================
// Strategy Callbacks
// ============================================================================

/// Called once, after the map's first idle event.
pub type LoadedFn = Box<dyn FnMut()>;
/// Produces info-box HTML for a clicked segment.
pub type SegmentContentFn = Box<dyn Fn(&Segment) -> String>;
/// Produces info-box HTML for a clicked point of interest.
pub type PoiContentFn = Box<dyn Fn(&Poi) -> String>;
/// Produces info-box HTML for a clicked trail marker.
pub type ItemContentFn = Box<dyn Fn(&MapItem) -> String>;
/// Adjusts the trail-marker info-box pixel offset; receives the default
/// offset and the marker's icon height when known.
pub type InfoBoxOffsetFn = Box<dyn Fn(i32, i32, Option<u32>) -> (i32, i32)>;
/// Picks the stroke color for a segment.
pub type SegmentColorFn = Box<dyn Fn(&Segment) -> String>;
/// Mutates the polyline options for a segment before rendering
/// (e.g. dashed strokes). The flag is true for related segments.
pub type SegmentStyleFn = Box<dyn Fn(&mut PolylineOptions, &Segment, bool)>;
/// Picks the marker icon for a trail item.
pub type MarkerIconFn = Box<dyn Fn(&MapItem) -> MarkerIcon>;
/// Called after a fit-to-bounds completes, with the settled zoom and center.
pub type FitBoundsFn = Box<dyn FnMut(u8, GeoPoint)>;

/// Optional strategy callbacks, all off by default.
#[derive(Default)]
pub struct MapCallbacks {
    pub loaded: Option<LoadedFn>,
    pub segment_info_content: Option<SegmentContentFn>,
    pub poi_info_content: Option<PoiContentFn>,
    pub trail_info_content: Option<ItemContentFn>,
    pub trail_info_offset: Option<InfoBoxOffsetFn>,
    pub segment_color: Option<SegmentColorFn>,
    pub segment_style: Option<SegmentStyleFn>,
    pub trail_marker_icon: Option<MarkerIconFn>,
    pub fit_bounds_done: Option<FitBoundsFn>,
}

// ============================================================================
// Configuration
// ============================================================================

/// "Zoom to my location" control configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct GeoLocationIconConfig {
    pub enable: bool,
    pub position: ControlPosition,
    pub src: String,
    pub title: String,
}

impl Default for GeoLocationIconConfig {
    fn default() -> Self {
        Self {
            enable: true,
            position: ControlPosition::BottomLeft,
            src: "/theme/custom/images/gps-zoom.png".to_string(),
            title: "Zoom to location".to_string(),
        }
    }
}

/// Continuous location tracking configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct GeoLocationTrackConfig {
    pub enable: bool,
    pub icon: MarkerIcon,
    pub title: String,
}

impl Default for GeoLocationTrackConfig {
    fn default() -> Self {
        Self {
            enable: true,
            icon: MarkerIcon::from_url("/theme/custom/images/gps-dot.png"),
            title: "Your Location".to_string(),
        }
    }
}

/// Photo point-of-interest markers.
#[derive(Debug, Clone, PartialEq)]
pub struct PoiImageConfig {
    pub enable: bool,
    pub icon: String,
    pub title: String,
}

impl Default for PoiImageConfig {
    fn default() -> Self {
        Self {
            enable: false,
            icon: "/images/trails/feature-markers/photo.png".to_string(),
            title: "Photo".to_string(),
        }
    }
}

/// Trail marker icon sizing.
#[derive(Debug, Clone, PartialEq)]
pub struct TrailMarkerConfig {
    pub width: u32,
    pub height: u32,
}

impl Default for TrailMarkerConfig {
    fn default() -> Self {
        Self {
            width: 25,
            height: 35,
        }
    }
}

/// Segment rendering and interaction.
///
/// `hover_color` and the related-segment color use `"same"` to mean "use the
/// regular segment color".
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentDisplayConfig {
    pub click: bool,
    pub color: String,
    pub hover: bool,
    pub hover_color: String,
    pub hover_tooltip: bool,
    pub visible_default: bool,
    pub show_on_zoom: bool,
    /// Zoom level at and above which segments show when `show_on_zoom` is
    /// set.
    pub show_on_zoom_level: u8,
    pub show_within_bounds: bool,
    pub weight: u32,
    pub hover_weight: u32,
}

impl Default for SegmentDisplayConfig {
    fn default() -> Self {
        Self {
            click: true,
            color: "yellow".to_string(),
            hover: true,
            hover_color: "same".to_string(),
            hover_tooltip: false,
            visible_default: true,
            show_on_zoom: false,
            show_on_zoom_level: 14,
            show_within_bounds: false,
            weight: 2,
            hover_weight: 10,
        }
    }
}

/// Related (other-trail) segment rendering and interaction.
#[derive(Debug, Clone, PartialEq)]
pub struct RelatedSegmentConfig {
    pub click: bool,
    pub color: String,
    pub hover: bool,
    pub hover_tooltip: bool,
    pub weight: u32,
    pub hover_weight: u32,
}

impl Default for RelatedSegmentConfig {
    fn default() -> Self {
        Self {
            click: true,
            color: "same".to_string(),
            hover: true,
            hover_tooltip: false,
            weight: 4,
            hover_weight: 10,
        }
    }
}

/// Info box sizing per window-width breakpoint, plus the close icon.
#[derive(Debug, Clone, PartialEq)]
pub struct InfoBoxConfig {
    pub close_icon: String,
    pub poi_width: u32,
    pub segment_width: u32,
    pub segment_width_md: u32,
    pub segment_width_sm: u32,
    pub segment_width_xs: u32,
    pub trail_marker_width: u32,
    pub trail_marker_width_md: u32,
    pub trail_marker_width_sm: u32,
    pub trail_marker_width_xs: u32,
}

impl Default for InfoBoxConfig {
    fn default() -> Self {
        Self {
            close_icon: "/theme/custom/images/close.png".to_string(),
            poi_width: 250,
            segment_width: 350,
            segment_width_md: 350,
            segment_width_sm: 300,
            segment_width_xs: 250,
            trail_marker_width: 350,
            trail_marker_width_md: 350,
            trail_marker_width_sm: 300,
            trail_marker_width_xs: 250,
        }
    }
}

impl InfoBoxConfig {
    /// Width and pixel offset for a segment info box at the given window
    /// width.
    pub fn segment_box(&self, window_width: u32) -> (u32, (i32, i32)) {
        let mut offset_h = -25;
        let width = if window_width < 400 {
            self.segment_width_xs
        } else if window_width < 600 {
            self.segment_width_sm
        } else if window_width < 800 {
            offset_h = -23;
            self.segment_width_md
        } else {
            self.segment_width
        };
        (width, (-((width / 2) as i32), offset_h))
    }

    /// Width and pixel offset for a trail-marker info box at the given
    /// window width.
    pub fn trail_marker_box(&self, window_width: u32) -> (u32, (i32, i32)) {
        let mut offset_h = -58;
        let width = if window_width < 400 {
            self.trail_marker_width_xs
        } else if window_width < 600 {
            self.trail_marker_width_sm
        } else if window_width < 800 {
            offset_h = -55;
            self.trail_marker_width_md
        } else {
            self.trail_marker_width
        };
        (width, (-((width / 2) as i32), offset_h))
    }

    /// Fixed width and offset for a POI info box.
    pub fn poi_box(&self) -> (u32, (i32, i32)) {
        (self.poi_width, (-125, -65))
    }
}

/// Full map configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct MapConfig {
    /// Zoom the map to show all markers after adding them.
    pub fit_to_bounds_markers: bool,
    /// Zoom the map to show all segments after adding them.
    pub fit_to_bounds_segments: bool,
    /// Maximum zoom level when fitting to bounds.
    pub fit_to_bounds_max_zoom: u8,
    pub full_screen: bool,
    pub geo_location_icon: GeoLocationIconConfig,
    pub geo_location_track: GeoLocationTrackConfig,
    pub info_box: InfoBoxConfig,
    pub map_type: MapType,
    /// Use the provider's own map type control instead of a custom one.
    pub map_type_control: bool,
    pub min_zoom: Option<u8>,
    pub poi_click: bool,
    pub poi_image: PoiImageConfig,
    pub related_segment: RelatedSegmentConfig,
    pub scroll_wheel: bool,
    pub segment: SegmentDisplayConfig,
    pub street_view: bool,
    pub trail_marker: TrailMarkerConfig,
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            fit_to_bounds_markers: false,
            fit_to_bounds_segments: false,
            fit_to_bounds_max_zoom: 13,
            full_screen: true,
            geo_location_icon: GeoLocationIconConfig::default(),
            geo_location_track: GeoLocationTrackConfig::default(),
            info_box: InfoBoxConfig::default(),
            map_type: MapType::Hybrid,
            map_type_control: false,
            min_zoom: None,
            poi_click: true,
            poi_image: PoiImageConfig::default(),
            related_segment: RelatedSegmentConfig::default(),
            scroll_wheel: true,
            segment: SegmentDisplayConfig::default(),
            street_view: true,
            trail_marker: TrailMarkerConfig::default(),
        }
    }
}

impl MapConfig {
    /// Merge a patch over this configuration. Nested sub-configs merge
    /// key-by-key; absent fields are left untouched.
    pub fn apply(&mut self, patch: MapConfigPatch) {
        macro_rules! merge {
            ($($field:ident),* $(,)?) => {
                $(if let Some(v) = patch.$field { self.$field = v; })*
            };
        }
        merge!(
            fit_to_bounds_markers,
            fit_to_bounds_segments,
            fit_to_bounds_max_zoom,
            full_screen,
            map_type,
            map_type_control,
            min_zoom,
            poi_click,
            scroll_wheel,
            street_view,
        );
        if let Some(p) = patch.geo_location_icon {
            self.geo_location_icon.apply(p);
        }
        if let Some(p) = patch.geo_location_track {
            self.geo_location_track.apply(p);
        }
        if let Some(p) = patch.info_box {
            self.info_box.apply(p);
        }
        if let Some(p) = patch.poi_image {
            self.poi_image.apply(p);
        }
        if let Some(p) = patch.related_segment {
            self.related_segment.apply(p);
        }
        if let Some(p) = patch.segment {
            self.segment.apply(p);
        }
        if let Some(p) = patch.trail_marker {
            self.trail_marker.apply(p);
        }
    }
}

// ============================================================================
// Patches
// ============================================================================

macro_rules! patch_struct {
    (
        $(#[$meta:meta])*
        $patch:ident => $target:ty {
            $($field:ident: $ty:ty),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default, Deserialize)]
        #[serde(default, rename_all = "camelCase")]
        pub struct $patch {
            $(pub $field: Option<$ty>,)*
        }

        impl $patch {
            /// Merge the present fields over the target.
            pub fn apply(self, target: &mut $target) {
                $(if let Some(v) = self.$field { target.$field = v; })*
            }
        }

        impl $target {
            #[allow(dead_code)]
            fn apply(&mut self, patch: $patch) {
                patch.apply(self);
            }
        }
    };
}

patch_struct! {
    /// Patch for [`GeoLocationIconConfig`].
    GeoLocationIconPatch => GeoLocationIconConfig {
        enable: bool,
        position: ControlPosition,
        src: String,
        title: String,
    }
}

patch_struct! {
    /// Patch for [`GeoLocationTrackConfig`].
    GeoLocationTrackPatch => GeoLocationTrackConfig {
        enable: bool,
        icon: MarkerIcon,
        title: String,
    }
}

patch_struct! {
    /// Patch for [`PoiImageConfig`].
    PoiImagePatch => PoiImageConfig {
        enable: bool,
        icon: String,
        title: String,
    }
}

patch_struct! {
    /// Patch for [`TrailMarkerConfig`].
    TrailMarkerPatch => TrailMarkerConfig {
        width: u32,
        height: u32,
    }
}

patch_struct! {
    /// Patch for [`SegmentDisplayConfig`].
    SegmentDisplayPatch => SegmentDisplayConfig {
        click: bool,
        color: String,
        hover: bool,
        hover_color: String,
        hover_tooltip: bool,
        visible_default: bool,
        show_on_zoom: bool,
        show_on_zoom_level: u8,
        show_within_bounds: bool,
        weight: u32,
        hover_weight: u32,
    }
}

patch_struct! {
    /// Patch for [`RelatedSegmentConfig`].
    RelatedSegmentPatch => RelatedSegmentConfig {
        click: bool,
        color: String,
        hover: bool,
        hover_tooltip: bool,
        weight: u32,
        hover_weight: u32,
    }
}

patch_struct! {
    /// Patch for [`InfoBoxConfig`].
    InfoBoxPatch => InfoBoxConfig {
        close_icon: String,
        poi_width: u32,
        segment_width: u32,
        segment_width_md: u32,
        segment_width_sm: u32,
        segment_width_xs: u32,
        trail_marker_width: u32,
        trail_marker_width_md: u32,
        trail_marker_width_sm: u32,
        trail_marker_width_xs: u32,
    }
}

/// Top-level configuration patch.
///
/// Deserializes from a nested JSON options object; unknown keys are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MapConfigPatch {
    pub fit_to_bounds_markers: Option<bool>,
    pub fit_to_bounds_segments: Option<bool>,
    pub fit_to_bounds_max_zoom: Option<u8>,
    pub full_screen: Option<bool>,
    pub geo_location_icon: Option<GeoLocationIconPatch>,
    pub geo_location_track: Option<GeoLocationTrackPatch>,
    pub info_box: Option<InfoBoxPatch>,
    pub map_type: Option<MapType>,
    pub map_type_control: Option<bool>,
    pub min_zoom: Option<Option<u8>>,
    pub poi_click: Option<bool>,
    pub poi_image: Option<PoiImagePatch>,
    pub related_segment: Option<RelatedSegmentPatch>,
    pub scroll_wheel: Option<bool>,
    pub segment: Option<SegmentDisplayPatch>,
    pub street_view: Option<bool>,
    pub trail_marker: Option<TrailMarkerPatch>,
}

//! Coordinate/pixel conversion and viewport size queries.
//!
//! The provider renders in Web Mercator world coordinates (a 256x256 world
//! tile scaled by `2^zoom`). Tooltip placement needs the pixel position of a
//! lat/lng within the current viewport, which is computed here instead of
//! asking the provider.

use crate::{Bounds, GeoPoint};

/// Side length of the world tile at zoom 0, in pixels.
const WORLD_TILE_SIZE: f64 = 256.0;

/// A pixel position relative to the top-left corner of the map viewport.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelPoint {
    pub x: f64,
    pub y: f64,
}

/// The size of the browser viewport in CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewportSize {
    pub width: u32,
    pub height: u32,
}

impl ViewportSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Small-screen check used for control placement: either dimension
    /// under 600px.
    pub fn is_small_screen(&self) -> bool {
        self.width < 600 || self.height < 600
    }
}

impl Default for ViewportSize {
    fn default() -> Self {
        Self::new(1280, 800)
    }
}

/// Project a point into Web Mercator world coordinates (256-tile space).
pub fn project(point: GeoPoint) -> (f64, f64) {
    let siny = point.lat.to_radians().sin();
    // Clamp to keep the projection finite near the poles.
    let siny = siny.clamp(-0.9999, 0.9999);

    let x = WORLD_TILE_SIZE * (0.5 + point.lng / 360.0);
    let y = WORLD_TILE_SIZE * (0.5 - ((1.0 + siny) / (1.0 - siny)).ln() / (4.0 * std::f64::consts::PI));
    (x, y)
}

/// Convert a lat/lng to viewport pixels given the current viewport bounds
/// and zoom level.
///
/// Returns `None` when the viewport bounds are empty (map not yet rendered).
pub fn pixels_from_location(viewport: &Bounds, zoom: u8, point: GeoPoint) -> Option<PixelPoint> {
    if viewport.is_empty() {
        return None;
    }

    let (_, top_right_y) = project(GeoPoint::new(viewport.max_lat, viewport.max_lng));
    let (bottom_left_x, _) = project(GeoPoint::new(viewport.min_lat, viewport.min_lng));
    let (world_x, world_y) = project(point);

    let scale = f64::powi(2.0, zoom as i32);
    Some(PixelPoint {
        x: (world_x - bottom_left_x) * scale,
        y: (world_y - top_right_y) * scale,
    })
}

/// Adjust the initial zoom for small viewports.
///
/// Applies only to the zoom value used at map construction; later explicit
/// zoom calls go through unmodified.
pub fn zoom_for_viewport(default_zoom: u8, viewport_width: u32) -> u8 {
    if viewport_width <= 480 {
        13
    } else if viewport_width <= 650 {
        14
    } else {
        default_zoom
    }
}

//! Marker clustering policy.
//!
//! Thin configuration layer over the provider's clustering add-on: an
//! ordered list of icon styles, merged cluster options, and an optional
//! calculator that picks the text and style for each cluster from its
//! member count.

use log::debug;
use serde::Deserialize;

use crate::provider::{ClusterOptions, ClusterStyle, MapProvider, MarkerId};

/// What a cluster icon should display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterText {
    pub text: String,
    /// 1-based index into the style list.
    pub style_index: usize,
}

/// Picks the cluster text and style from `(marker_count, style_count)`.
pub type ClusterCalculatorFn = Box<dyn Fn(usize, usize) -> ClusterText>;

/// Partial cluster style; missing fields fall back to the medium defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ClusterStylePatch {
    pub url: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub text_size: Option<u32>,
    pub text_color: Option<String>,
}

/// Partial cluster options; missing fields fall back to the defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ClusterOptionsPatch {
    pub grid_size: Option<u32>,
    pub max_zoom: Option<u8>,
    pub minimum_cluster_size: Option<u32>,
}

/// Configurable marker clustering.
#[derive(Default)]
pub struct MarkerClusterPolicy {
    styles: Vec<ClusterStyle>,
    options: Option<ClusterOptions>,
    calculator: Option<ClusterCalculatorFn>,
    active: bool,
}

impl MarkerClusterPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a cluster icon style, defaulting missing fields.
    ///
    /// Call at least once before [`MarkerClusterPolicy::setup`].
    pub fn add_style(&mut self, patch: ClusterStylePatch) {
        self.styles.push(ClusterStyle {
            url: patch
                .url
                .unwrap_or_else(|| "/layout/images/cluster/cluster-md.png".to_string()),
            width: patch.width.unwrap_or(45),
            height: patch.height.unwrap_or(45),
            text_size: patch.text_size.unwrap_or(14),
            text_color: patch.text_color.unwrap_or_else(|| "white".to_string()),
        });
    }

    /// Configure clustering on the provider with the accumulated styles.
    ///
    /// A repaint is forced when a calculator is installed so existing
    /// clusters pick up the new icon selection.
    pub fn setup(
        &mut self,
        provider: &mut dyn MapProvider,
        calculator: Option<ClusterCalculatorFn>,
        options: ClusterOptionsPatch,
    ) {
        let mut merged = ClusterOptions::default();
        if let Some(grid_size) = options.grid_size {
            merged.grid_size = grid_size;
        }
        if let Some(max_zoom) = options.max_zoom {
            merged.max_zoom = Some(max_zoom);
        }
        if let Some(min) = options.minimum_cluster_size {
            merged.minimum_cluster_size = min;
        }

        debug!(
            "cluster setup: {} styles, grid {}, min size {}",
            self.styles.len(),
            merged.grid_size,
            merged.minimum_cluster_size
        );
        provider.cluster_setup(&self.styles, &merged);
        self.options = Some(merged);
        self.active = true;

        if calculator.is_some() {
            self.calculator = calculator;
            provider.cluster_repaint();
        }
    }

    /// Whether [`MarkerClusterPolicy::setup`] has run.
    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn styles(&self) -> &[ClusterStyle] {
        &self.styles
    }

    pub fn options(&self) -> Option<&ClusterOptions> {
        self.options.as_ref()
    }

    /// Run the calculator for a cluster of `marker_count` members.
    ///
    /// Without a calculator, the default picks the count as text and
    /// clamps the style index to the number of styles.
    pub fn calculate(&self, marker_count: usize) -> ClusterText {
        let style_count = self.styles.len();
        match &self.calculator {
            Some(calc) => calc(marker_count, style_count),
            None => ClusterText {
                text: marker_count.to_string(),
                style_index: marker_count.min(style_count.max(1)),
            },
        }
    }

    /// Add a marker to the cluster. No-op until setup has run.
    pub fn add_marker(&self, provider: &mut dyn MapProvider, id: MarkerId) {
        if self.active {
            provider.cluster_add_marker(id);
        }
    }

    /// Remove every marker from the cluster.
    pub fn clear(&self, provider: &mut dyn MapProvider) {
        if self.active {
            provider.cluster_clear();
        }
    }

    /// Reset the cluster viewport after bulk marker changes.
    pub fn repaint(&self, provider: &mut dyn MapProvider) {
        if self.active {
            provider.cluster_repaint();
        }
    }
}

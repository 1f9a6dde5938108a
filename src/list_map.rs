//! Store-locator page orchestration.
//!
//! [`ListMap`] composes the map controller, the search form, the item
//! endpoints and browser history into the list-page behavior: initial item
//! load, URL-driven searches, search submission, reset, popstate navigation
//! and map/list view toggling.
//!
//! The page's DOM and the HTTP endpoints stay behind the [`PageDom`] and
//! [`ItemSource`] traits; fetches complete last-write-wins, with a monotonic
//! request sequence dropping stale search responses.

use log::{debug, info, warn};
use serde::Deserialize;

use crate::cluster::{ClusterOptionsPatch, ClusterStylePatch};
use crate::config::{MapConfigPatch, TrailMarkerPatch};
use crate::controller::MapController;
use crate::error::Result;
use crate::provider::{
    ControlPosition, Geolocation, HistoryApi, MapEvent, MapProvider, MarkerIcon,
};
use crate::query::{
    build_search_query, FieldValue, FormField, ItemIds, QueryValues, SearchState,
};
use crate::{GeoPoint, MapItem};

/// The list page path used for history pushes.
const BASE_PATH: &str = "/store-locations";

/// The map canvas element id on the list page.
const MAP_CANVAS_ID: &str = "map-canvas";

/// Conceptual page size for the item list.
const LOAD_LIMIT: u32 = 50;

// ============================================================================
// Collaborator Traits
// ============================================================================

/// The search-form and page-region DOM contract.
///
/// Field names are the form-side names (`field[type]`, `term`, ...); the
/// allow-list in [`crate::query`] maps them to URL parameters.
pub trait PageDom {
    // Search form
    fn set_form_field(&mut self, name: &str, value: &str);
    fn set_form_checkbox(&mut self, name: &str, checked: bool);
    fn append_hidden_field(&mut self, name: &str, value: &str);
    fn form_field_value(&self, name: &str) -> String;
    fn form_fields(&self) -> Vec<FormField>;
    fn reset_form(&mut self);
    fn set_geolocation_fields(&mut self, lat: f64, lng: f64);

    // Page regions
    fn hide_map_loading(&mut self);
    fn show_loading_overlay(&mut self);
    fn hide_loading_overlay(&mut self);
    fn show_not_found(&mut self);
    fn hide_not_found(&mut self);
    fn show_search_total(&mut self, heading: &str);
    fn hide_search_total(&mut self);
    fn show_full_total(&mut self);
    fn hide_full_total(&mut self);
    fn show_search_panel(&mut self);
    fn hide_search_panel(&mut self);
    fn render_list(&mut self, items: &[MapItem]);
    fn clear_list(&mut self);
}

/// The search endpoint's id payload: a bare number for a single hit, a
/// comma-joined string otherwise.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum SearchIds {
    One(i64),
    Csv(String),
}

impl SearchIds {
    pub fn to_vec(&self) -> Vec<i64> {
        match self {
            SearchIds::One(id) => vec![*id],
            SearchIds::Csv(csv) => csv
                .split(',')
                .filter_map(|part| part.trim().parse().ok())
                .collect(),
        }
    }
}

/// A search-form POST result.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchResponse {
    pub total: u32,
    pub ids: SearchIds,
}

/// The map item endpoints.
pub trait ItemSource {
    /// `GET map-items`: every item.
    fn fetch_all(&mut self) -> Result<Vec<MapItem>>;
    /// `POST map-items` with an id list: the matching items.
    fn fetch_by_ids(&mut self, ids: &[i64]) -> Result<Vec<MapItem>>;
    /// Search-form POST.
    fn submit_search(&mut self, fields: &[FormField]) -> Result<SearchResponse>;
}

/// Whether the item set renders as map markers or a sidebar list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewMode {
    Map,
    List,
}

// ============================================================================
// Orchestrator
// ============================================================================

/// The store-locator list page.
pub struct ListMap<P: MapProvider, D: PageDom, S: ItemSource> {
    controller: MapController<P>,
    dom: D,
    source: S,
    history: Box<dyn HistoryApi>,
    geo: Box<dyn Geolocation>,

    latitude: f64,
    longitude: f64,
    zoom: u8,
    initial_zoom: u8,
    center: Option<GeoPoint>,
    fit_to_bounds: bool,
    is_search_page: bool,

    marker_icon: String,
    location_icon: String,
    cluster_small: String,
    cluster_medium: String,
    cluster_large: String,

    list_total: u32,
    pages_needed: u32,

    full_items: Vec<MapItem>,
    items_loading: bool,
    search_items: Vec<MapItem>,
    item_ids: Vec<i64>,

    search: SearchState,
    search_kind: String,
    searching: bool,
    view: ViewMode,
    location: Option<GeoPoint>,
    geo_search_pending: bool,
    request_seq: u64,
}

impl<P: MapProvider, D: PageDom, S: ItemSource> ListMap<P, D, S> {
    pub fn new(
        provider: P,
        dom: D,
        source: S,
        history: Box<dyn HistoryApi>,
        geo: Box<dyn Geolocation>,
    ) -> Self {
        Self {
            controller: MapController::new(provider),
            dom,
            source,
            history,
            geo,
            latitude: 45.0,
            longitude: -69.0,
            zoom: 8,
            initial_zoom: 8,
            center: None,
            fit_to_bounds: true,
            is_search_page: false,
            marker_icon: String::new(),
            location_icon: String::new(),
            cluster_small: String::new(),
            cluster_medium: String::new(),
            cluster_large: String::new(),
            list_total: 0,
            pages_needed: 0,
            full_items: Vec::new(),
            items_loading: false,
            search_items: Vec::new(),
            item_ids: Vec::new(),
            search: SearchState::default(),
            search_kind: String::new(),
            searching: false,
            view: ViewMode::Map,
            location: None,
            geo_search_pending: false,
            request_seq: 0,
        }
    }

    // ========================================================================
    // Setters
    // ========================================================================

    pub fn set_latitude(&mut self, latitude: f64) {
        self.latitude = latitude;
    }

    pub fn set_longitude(&mut self, longitude: f64) {
        self.longitude = longitude;
    }

    /// Focus the map on one location: turns fit-to-bounds off and zooms in.
    pub fn set_focus_location(&mut self, latitude: f64, longitude: f64) {
        self.set_latitude(latitude);
        self.set_longitude(longitude);
        self.fit_to_bounds = false;
        self.zoom = 10;
    }

    pub fn set_zoom(&mut self, zoom: u8) {
        self.zoom = zoom;
    }

    pub fn set_fit_to_bounds(&mut self, fit: bool) {
        self.fit_to_bounds = fit;
    }

    pub fn set_search_page(&mut self, is_search_page: bool) {
        self.is_search_page = is_search_page;
    }

    pub fn set_marker_icon(&mut self, icon: impl Into<String>) {
        self.marker_icon = icon.into();
    }

    pub fn set_location_icon(&mut self, icon: impl Into<String>) {
        self.location_icon = icon.into();
    }

    pub fn set_cluster_images(
        &mut self,
        small: impl Into<String>,
        medium: impl Into<String>,
        large: impl Into<String>,
    ) {
        self.cluster_small = small.into();
        self.cluster_medium = medium.into();
        self.cluster_large = large.into();
    }

    /// Record the total number of items available and derive the page
    /// count.
    pub fn set_list_total(&mut self, total: u32) {
        self.list_total = total;
        self.pages_needed = total.div_ceil(LOAD_LIMIT);
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn controller(&self) -> &MapController<P> {
        &self.controller
    }

    pub fn controller_mut(&mut self) -> &mut MapController<P> {
        &mut self.controller
    }

    pub fn search(&self) -> &SearchState {
        &self.search
    }

    pub fn is_searching(&self) -> bool {
        self.searching
    }

    pub fn view(&self) -> ViewMode {
        self.view
    }

    pub fn item_ids(&self) -> &[i64] {
        &self.item_ids
    }

    pub fn geo_search_pending(&self) -> bool {
        self.geo_search_pending
    }

    /// The service type searched for, lower-cased.
    pub fn search_kind(&self) -> &str {
        &self.search_kind
    }

    pub fn list_total(&self) -> u32 {
        self.list_total
    }

    pub fn pages_needed(&self) -> u32 {
        self.pages_needed
    }

    /// The zoom settled at startup (adjusted by the first fit-to-bounds).
    pub fn initial_zoom(&self) -> u8 {
        self.initial_zoom
    }

    pub fn center(&self) -> Option<GeoPoint> {
        self.center
    }

    // ========================================================================
    // Startup
    // ========================================================================

    /// Configure the map and bind it to the page canvas. Loading continues
    /// when the first idle event arrives through
    /// [`ListMap::handle_map_event`].
    pub fn run(&mut self) -> Result<()> {
        self.controller.set_center(self.latitude, self.longitude);
        self.controller.set_zoom(self.zoom);
        self.initial_zoom = self.zoom;

        self.controller.configure(MapConfigPatch {
            full_screen: Some(false),
            scroll_wheel: Some(true),
            fit_to_bounds_markers: Some(self.fit_to_bounds),
            trail_marker: Some(TrailMarkerPatch {
                width: Some(27),
                height: Some(35),
            }),
            ..MapConfigPatch::default()
        });

        // The location dot anchors at its bottom center so it stays put
        // when zooming out.
        self.controller.config_mut().geo_location_track.icon = MarkerIcon {
            url: self.location_icon.clone(),
            size: Some((45, 45)),
            scaled_size: Some((25, 25)),
            anchor: Some((12, 25)),
        };
        self.controller.config_mut().geo_location_icon.position = ControlPosition::LeftBottom;

        let marker_icon = self.marker_icon.clone();
        self.controller.callbacks_mut().trail_marker_icon = Some(Box::new(move |_item| {
            MarkerIcon {
                url: marker_icon.clone(),
                size: Some((27, 42)),
                scaled_size: Some((27, 42)),
                anchor: None,
            }
        }));

        // Pin the info box just above the marker icon, with a smaller gap
        // on small screens.
        self.controller.callbacks_mut().trail_info_offset =
            Some(Box::new(|offset_w, offset_h, icon_height| {
                let gap = if offset_h == -55 { 13 } else { 18 };
                match icon_height {
                    Some(height) => (offset_w, -((height + gap) as i32)),
                    None => (offset_w, offset_h),
                }
            }));

        self.controller.set_map_type("terrain");

        self.controller.initialize(MAP_CANVAS_ID, |_| {})?;
        info!("list map starting");
        Ok(())
    }

    /// Forward a provider event to the controller and run the page-level
    /// ready work on the first idle.
    pub fn handle_map_event(&mut self, event: MapEvent) {
        let was_ready = self.controller.is_ready();
        self.controller.handle_event(event);

        if let Some((zoom, center)) = self.controller.take_fit_result() {
            self.initial_zoom = zoom;
            self.center = Some(center);
        }

        if !was_ready && self.controller.is_ready() {
            self.on_map_ready();
        }
    }

    fn on_map_ready(&mut self) {
        self.dom.hide_map_loading();
        self.zoom = self.controller.zoom();
        self.center = Some(self.controller.provider().center());

        self.controller.setup_geo_location(self.geo.as_mut(), None);
        self.setup_marker_clusters();
        self.load_content();
    }

    /// A geolocation fix arrived. Keeps the map marker, the local copy and
    /// the form's hidden fields in sync.
    pub fn handle_position_update(&mut self, lat: f64, lng: f64) {
        self.controller.handle_position_update(lat, lng);
        self.location = Some(GeoPoint::new(lat, lng));
        self.dom.set_geolocation_fields(lat, lng);
    }

    fn setup_marker_clusters(&mut self) {
        self.controller.add_cluster_style(ClusterStylePatch {
            url: Some(self.cluster_small.clone()),
            width: Some(41),
            height: Some(41),
            ..ClusterStylePatch::default()
        });
        self.controller.add_cluster_style(ClusterStylePatch {
            url: Some(self.cluster_medium.clone()),
            width: Some(54),
            height: Some(54),
            ..ClusterStylePatch::default()
        });
        self.controller.add_cluster_style(ClusterStylePatch {
            url: Some(self.cluster_large.clone()),
            width: Some(67),
            height: Some(67),
            text_size: Some(16),
            ..ClusterStylePatch::default()
        });

        self.controller.setup_marker_cluster(
            None,
            ClusterOptionsPatch {
                max_zoom: Some(18),
                minimum_cluster_size: Some(2),
                ..ClusterOptionsPatch::default()
            },
        );
    }

    // ========================================================================
    // Content Loading
    // ========================================================================

    /// Decide between the full item load and a URL-driven search.
    fn load_content(&mut self) {
        let query = QueryValues::parse(&self.history.current_search());
        let state = SearchState::from_query(&query);

        if !state.from_url {
            self.search = SearchState::default();
            if self.is_search_page {
                self.load_search_items();
            } else {
                self.load_items(false, true);
            }
            return;
        }

        info!("performing search from url parameters");
        self.searching = true;
        let mut search_geo = false;

        self.dom.set_form_checkbox("field[summitSponsor]", false);
        for (key, value) in &state.fields {
            match (key.as_str(), value) {
                ("type", FieldValue::Text(v)) => self.dom.set_form_field("field[type]", v),
                ("sponsor", FieldValue::Text(v)) => {
                    if v == "Yes" {
                        self.dom.set_form_checkbox("field[summitSponsor]", true);
                    }
                }
                ("geo", FieldValue::Text(_)) => {
                    if self.geo.is_supported() {
                        search_geo = true;
                        self.dom.set_form_checkbox("x", true);
                    }
                }
                ("town", FieldValue::Int(v)) => {
                    self.dom.set_form_field("field[towns]", &v.to_string());
                }
                ("status", FieldValue::Text(v)) => {
                    self.dom.set_form_field("field[closureStatus.raw]", v);
                }
                ("distance", FieldValue::Int(v)) => {
                    self.dom
                        .set_form_field("geoDistance[geolocation][distance]", &v.to_string());
                }
                ("item", FieldValue::Items(ids)) => match ids {
                    ItemIds::One(id) => {
                        self.dom.append_hidden_field("field[appItemId]", &id.to_string());
                    }
                    ItemIds::Many(list) => {
                        for id in list {
                            self.dom
                                .append_hidden_field("field[appItemId][]", &id.to_string());
                        }
                    }
                },
                _ => {}
            }
        }
        if let Some(term) = &state.term {
            self.dom.set_form_field("term", term);
        }
        self.search = state;

        if search_geo && self.location.is_none() {
            // Wait for the geolocation fix; the host fires
            // handle_geo_retry_timeout after 500 ms.
            self.geo_search_pending = true;
        } else {
            self.submit_from_url();
        }
    }

    /// The bounded geolocation wait expired. If the fix still hasn't
    /// arrived, drop the geo filter and submit anyway.
    pub fn handle_geo_retry_timeout(&mut self) {
        if !self.geo_search_pending {
            return;
        }
        self.geo_search_pending = false;
        if self.location.is_none() {
            debug!("geolocation unresolved, dropping geo filter");
            self.dom.set_form_checkbox("x", false);
        }
        self.submit_from_url();
    }

    /// Load every item (the default, non-search view).
    pub fn load_items(&mut self, show_loading: bool, fit_to_bounds: bool) {
        if show_loading {
            self.dom.show_loading_overlay();
        }
        if self.items_loading || !self.full_items.is_empty() {
            return;
        }
        self.items_loading = true;

        match self.source.fetch_all() {
            Ok(items) => {
                self.items_loading = false;
                info!("loaded {} items", items.len());
                self.full_items = items.clone();
                self.controller.add_trail_markers(items);
                if fit_to_bounds {
                    self.controller.fit_to_bounds(true);
                }
                self.controller.repaint_cluster();
                self.dom.hide_loading_overlay();
            }
            Err(err) => {
                self.items_loading = false;
                warn!("item fetch failed: {}", err);
                self.dom.hide_loading_overlay();
            }
        }
    }

    /// Load the items matching the current search id list.
    pub fn load_search_items(&mut self) {
        self.search_items.clear();
        if self.item_ids.is_empty() {
            return;
        }
        let ids = self.item_ids.clone();

        match self.source.fetch_by_ids(&ids) {
            Ok(items) => {
                self.clear_map();
                self.dom.clear_list();
                self.search_items = items.clone();
                self.controller.add_trail_markers(items);
                self.controller.fit_to_bounds(false);
                self.controller.repaint_cluster();
                self.dom.hide_loading_overlay();
                self.dom.render_list(&self.search_items);
            }
            Err(err) => {
                warn!("search item fetch failed: {}", err);
                self.dom.hide_loading_overlay();
            }
        }
    }

    // ========================================================================
    // Search
    // ========================================================================

    /// A user-initiated form submission. Serializes the form into the URL
    /// unless this search came from the URL, in which case the flag is
    /// cleared instead.
    pub fn submit_search(&mut self) {
        if !self.search.from_url {
            self.push_search_url();
        } else {
            self.search.from_url = false;
        }
        self.run_search();
    }

    /// A URL-driven submission: the URL already holds the parameters, and
    /// `from_url` stays set until the next manual submit.
    fn submit_from_url(&mut self) {
        self.run_search();
    }

    fn run_search(&mut self) {
        self.dom.hide_search_panel();
        self.dom.show_loading_overlay();
        self.searching = true;
        self.clear_map();
        self.item_ids.clear();
        self.search_kind = self
            .dom
            .form_field_value("field[type]")
            .trim()
            .to_lowercase();

        self.request_seq += 1;
        let seq = self.request_seq;
        let fields = self.dom.form_fields();
        match self.source.submit_search(&fields) {
            Ok(response) => self.apply_search_response(seq, response),
            Err(err) => {
                warn!("search request failed: {}", err);
                self.dom.hide_loading_overlay();
            }
        }
    }

    /// Apply a search response. Responses carrying a stale sequence number
    /// lost the race against a newer submission and are dropped.
    fn apply_search_response(&mut self, seq: u64, response: SearchResponse) {
        if seq != self.request_seq {
            debug!("stale search response dropped (seq {})", seq);
            return;
        }

        self.dom.hide_search_total();
        self.dom.hide_full_total();
        self.search.total = 0;

        if response.total == 0 {
            self.show_not_found();
            return;
        }

        self.search.total = response.total;
        self.hide_not_found();

        let heading = format!(
            "{} Trailside Service{} Found",
            response.total,
            if response.total > 1 { "s" } else { "" }
        );
        self.dom.show_search_total(&heading);

        self.item_ids = response.ids.to_vec();
        self.load_search_items();
    }

    /// Reset the search view back to the full item list.
    pub fn reset_search(&mut self) {
        let was_searching = self.searching;

        if self.history.is_supported() {
            self.history.push(BASE_PATH);
        }

        self.dom.reset_form();
        self.hide_not_found();
        self.searching = false;
        self.search_kind.clear();
        self.search = SearchState::default();

        if was_searching {
            self.clear_map();
            self.show_map_view();
        }

        self.dom.show_search_panel();
        if let Some(location) = self.location {
            self.dom.set_geolocation_fields(location.lat, location.lng);
        }
    }

    /// Browser navigation changed the URL underneath us.
    pub fn handle_popstate(&mut self) {
        let query = QueryValues::parse(&self.history.current_search());
        if !query.has_values() {
            self.reset_search();
        } else {
            self.load_content();
        }
    }

    fn push_search_url(&mut self) {
        if !self.history.is_supported() {
            return;
        }
        if let Some(params) = build_search_query(&self.dom.form_fields()) {
            if params != self.history.current_search() {
                self.history.push(&format!("{}{}", BASE_PATH, params));
            }
        }
    }

    // ========================================================================
    // Views
    // ========================================================================

    /// Restore the full-item map view, reusing already-loaded markers when
    /// possible.
    fn show_map_view(&mut self) {
        self.dom.hide_search_total();
        self.dom.show_full_total();
        if self.full_items.is_empty() {
            self.load_items(true, true);
        } else {
            let items = self.full_items.clone();
            self.controller.add_trail_markers(items);
            self.controller.fit_to_bounds(false);
            self.controller.repaint_cluster();
        }
    }

    /// Switch between map and list rendering of the current item set.
    pub fn set_view(&mut self, view: ViewMode) {
        self.view = view;
        if view == ViewMode::List {
            let items = if self.searching {
                self.search_items.clone()
            } else {
                self.full_items.clone()
            };
            self.dom.render_list(&items);
        }
    }

    /// Show the no-results state.
    pub fn show_not_found(&mut self) {
        self.dom.hide_loading_overlay();
        self.dom.show_not_found();
        self.dom.hide_search_total();
        self.dom.hide_full_total();
    }

    /// Leave the no-results state.
    pub fn hide_not_found(&mut self) {
        self.dom.hide_not_found();
    }

    /// Clear info boxes and markers before rendering a new result set.
    pub fn clear_map(&mut self) {
        self.controller.remove_info_boxes();
        self.controller.remove_markers();
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MapError;
    use crate::provider::fake::FakeMap;
    use std::collections::BTreeMap;

    // ------------------------------------------------------------------
    // Fakes
    // ------------------------------------------------------------------

    #[derive(Default)]
    struct FakePage {
        fields: BTreeMap<String, String>,
        checkboxes: BTreeMap<String, bool>,
        hidden: Vec<FormField>,
        geo_fields: Option<(f64, f64)>,
        map_loading: bool,
        overlay_visible: bool,
        not_found_visible: bool,
        search_total: Option<String>,
        full_total_visible: bool,
        search_panel_visible: bool,
        listed: Vec<MapItem>,
        reset_count: u32,
    }

    impl FakePage {
        fn new() -> Self {
            Self {
                map_loading: true,
                full_total_visible: true,
                ..Self::default()
            }
        }
    }

    impl PageDom for FakePage {
        fn set_form_field(&mut self, name: &str, value: &str) {
            self.fields.insert(name.to_string(), value.to_string());
        }
        fn set_form_checkbox(&mut self, name: &str, checked: bool) {
            self.checkboxes.insert(name.to_string(), checked);
        }
        fn append_hidden_field(&mut self, name: &str, value: &str) {
            self.hidden.push(FormField::new(name, value));
        }
        fn form_field_value(&self, name: &str) -> String {
            self.fields.get(name).cloned().unwrap_or_default()
        }
        fn form_fields(&self) -> Vec<FormField> {
            let mut fields: Vec<FormField> = self
                .fields
                .iter()
                .map(|(name, value)| FormField::new(name.clone(), value.clone()))
                .collect();
            for (name, checked) in &self.checkboxes {
                if *checked {
                    let value = if name == "field[summitSponsor]" {
                        "Yes"
                    } else {
                        "on"
                    };
                    fields.push(FormField::new(name.clone(), value));
                }
            }
            fields.extend(self.hidden.clone());
            fields
        }
        fn reset_form(&mut self) {
            self.fields.clear();
            self.checkboxes.clear();
            self.hidden.clear();
            self.reset_count += 1;
        }
        fn set_geolocation_fields(&mut self, lat: f64, lng: f64) {
            self.geo_fields = Some((lat, lng));
        }

        fn hide_map_loading(&mut self) {
            self.map_loading = false;
        }
        fn show_loading_overlay(&mut self) {
            self.overlay_visible = true;
        }
        fn hide_loading_overlay(&mut self) {
            self.overlay_visible = false;
        }
        fn show_not_found(&mut self) {
            self.not_found_visible = true;
        }
        fn hide_not_found(&mut self) {
            self.not_found_visible = false;
        }
        fn show_search_total(&mut self, heading: &str) {
            self.search_total = Some(heading.to_string());
        }
        fn hide_search_total(&mut self) {
            self.search_total = None;
        }
        fn show_full_total(&mut self) {
            self.full_total_visible = true;
        }
        fn hide_full_total(&mut self) {
            self.full_total_visible = false;
        }
        fn show_search_panel(&mut self) {
            self.search_panel_visible = true;
        }
        fn hide_search_panel(&mut self) {
            self.search_panel_visible = false;
        }
        fn render_list(&mut self, items: &[MapItem]) {
            self.listed = items.to_vec();
        }
        fn clear_list(&mut self) {
            self.listed.clear();
        }
    }

    #[derive(Default)]
    struct FakeSource {
        items: Vec<MapItem>,
        response: Option<SearchResponse>,
        fail: bool,
        fetch_all_count: u32,
        fetch_by_ids_calls: Vec<Vec<i64>>,
        submitted: Vec<Vec<FormField>>,
    }

    impl ItemSource for FakeSource {
        fn fetch_all(&mut self) -> Result<Vec<MapItem>> {
            self.fetch_all_count += 1;
            if self.fail {
                return Err(MapError::fetch("boom"));
            }
            Ok(self.items.clone())
        }
        fn fetch_by_ids(&mut self, ids: &[i64]) -> Result<Vec<MapItem>> {
            self.fetch_by_ids_calls.push(ids.to_vec());
            if self.fail {
                return Err(MapError::fetch("boom"));
            }
            Ok(self
                .items
                .iter()
                .filter(|item| ids.contains(&item.id))
                .cloned()
                .collect())
        }
        fn submit_search(&mut self, fields: &[FormField]) -> Result<SearchResponse> {
            self.submitted.push(fields.to_vec());
            if self.fail {
                return Err(MapError::fetch("boom"));
            }
            Ok(self.response.clone().unwrap_or(SearchResponse {
                total: 0,
                ids: SearchIds::Csv(String::new()),
            }))
        }
    }

    struct FakeHistory {
        supported: bool,
        search: String,
        pushes: Vec<String>,
    }

    impl FakeHistory {
        fn with_search(search: &str) -> Box<Self> {
            Box::new(Self {
                supported: true,
                search: search.to_string(),
                pushes: Vec::new(),
            })
        }
    }

    impl HistoryApi for FakeHistory {
        fn is_supported(&self) -> bool {
            self.supported
        }
        fn push(&mut self, url: &str) {
            self.pushes.push(url.to_string());
            self.search = url
                .split_once('?')
                .map(|(_, q)| format!("?{}", q))
                .unwrap_or_default();
        }
        fn current_search(&self) -> String {
            self.search.clone()
        }
    }

    struct FakeGeo {
        supported: bool,
    }

    impl Geolocation for FakeGeo {
        fn is_supported(&self) -> bool {
            self.supported
        }
        fn watch_position(&mut self) -> bool {
            self.supported
        }
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn sample_item(id: i64) -> MapItem {
        MapItem {
            id,
            name: format!("Item {}", id),
            lat: 44.0 + id as f64 * 0.01,
            lng: -69.0,
            url: format!("/items/{}", id),
            ..MapItem::default()
        }
    }

    fn list_map_with(
        source: FakeSource,
        search: &str,
    ) -> ListMap<FakeMap, FakePage, FakeSource> {
        ListMap::new(
            FakeMap::new(),
            FakePage::new(),
            source,
            FakeHistory::with_search(search),
            Box::new(FakeGeo { supported: true }),
        )
    }

    fn start(list_map: &mut ListMap<FakeMap, FakePage, FakeSource>) {
        list_map.run().unwrap();
        list_map.handle_map_event(MapEvent::Idle);
    }

    // ------------------------------------------------------------------
    // Tests
    // ------------------------------------------------------------------

    #[test]
    fn test_full_load_without_url_params() {
        let source = FakeSource {
            items: vec![sample_item(1), sample_item(2)],
            ..FakeSource::default()
        };
        let mut list_map = list_map_with(source, "");
        start(&mut list_map);

        assert_eq!(list_map.source.fetch_all_count, 1);
        assert!(!list_map.is_searching());
        assert!(!list_map.search().from_url);
        assert_eq!(list_map.controller().provider().attached_marker_count(), 2);
        // Fit-to-bounds ran for the full load.
        assert_eq!(list_map.controller().provider().fit_bounds_calls.len(), 1);
        assert!(!list_map.dom.overlay_visible);
        assert!(!list_map.dom.map_loading);
        // Cluster configured with the three styles before loading.
        assert_eq!(list_map.controller().provider().cluster.styles.len(), 3);
        assert_eq!(
            list_map
                .controller()
                .provider()
                .cluster
                .options
                .as_ref()
                .unwrap()
                .max_zoom,
            Some(18)
        );
    }

    #[test]
    fn test_search_from_url_item_ids() {
        let source = FakeSource {
            items: vec![sample_item(12), sample_item(45), sample_item(99)],
            response: Some(SearchResponse {
                total: 2,
                ids: SearchIds::Csv("12,45".to_string()),
            }),
            ..FakeSource::default()
        };
        let mut list_map = list_map_with(source, "?item=12&item=45");
        start(&mut list_map);

        // The filtered fetch ran instead of the full-list fetch.
        assert_eq!(list_map.source.fetch_all_count, 0);
        assert_eq!(list_map.source.fetch_by_ids_calls, vec![vec![12, 45]]);
        assert_eq!(list_map.item_ids(), &[12, 45]);
        assert!(list_map.is_searching());
        // The flag survives the automatic submit...
        assert!(list_map.search().from_url);
        assert_eq!(list_map.controller().provider().attached_marker_count(), 2);
        assert_eq!(
            list_map.dom.search_total.as_deref(),
            Some("2 Trailside Services Found")
        );

        // ...and clears on the next manual submit.
        list_map.submit_search();
        assert!(!list_map.search().from_url);
    }

    #[test]
    fn test_search_from_url_populates_form() {
        let source = FakeSource {
            response: Some(SearchResponse {
                total: 1,
                ids: SearchIds::One(7),
            }),
            items: vec![sample_item(7)],
            ..FakeSource::default()
        };
        let mut list_map = list_map_with(source, "?type=lodging&sponsor=Yes&town=12&term=inn");
        start(&mut list_map);

        assert_eq!(list_map.dom.form_field_value("field[type]"), "lodging");
        assert_eq!(list_map.dom.checkboxes.get("field[summitSponsor]"), Some(&true));
        assert_eq!(list_map.dom.form_field_value("field[towns]"), "12");
        assert_eq!(list_map.dom.form_field_value("term"), "inn");
        // The submitted form carried the populated fields.
        assert_eq!(list_map.source.submitted.len(), 1);
        assert_eq!(
            list_map.dom.search_total.as_deref(),
            Some("1 Trailside Service Found")
        );
    }

    #[test]
    fn test_geo_search_waits_for_fix() {
        let source = FakeSource {
            response: Some(SearchResponse {
                total: 1,
                ids: SearchIds::One(7),
            }),
            items: vec![sample_item(7)],
            ..FakeSource::default()
        };
        let mut list_map = list_map_with(source, "?geo=1&type=lodging");
        start(&mut list_map);

        // No fix yet: the submit is deferred.
        assert!(list_map.geo_search_pending());
        assert!(list_map.source.submitted.is_empty());
        assert_eq!(list_map.dom.checkboxes.get("x"), Some(&true));

        // The bounded retry fires with the fix still missing: the geo
        // filter is dropped and the search submitted anyway.
        list_map.handle_geo_retry_timeout();
        assert!(!list_map.geo_search_pending());
        assert_eq!(list_map.dom.checkboxes.get("x"), Some(&false));
        assert_eq!(list_map.source.submitted.len(), 1);
    }

    #[test]
    fn test_geo_search_submits_once_location_known() {
        let source = FakeSource {
            response: Some(SearchResponse {
                total: 1,
                ids: SearchIds::One(7),
            }),
            items: vec![sample_item(7)],
            ..FakeSource::default()
        };
        let mut list_map = list_map_with(source, "?geo=1");
        list_map.run().unwrap();
        // The fix arrives before the map settles.
        list_map.handle_position_update(44.8, -68.8);
        list_map.handle_map_event(MapEvent::Idle);

        assert!(!list_map.geo_search_pending());
        assert_eq!(list_map.source.submitted.len(), 1);
        assert_eq!(list_map.dom.geo_fields, Some((44.8, -68.8)));
    }

    #[test]
    fn test_zero_results_shows_not_found_until_next_hit() {
        let source = FakeSource {
            items: vec![sample_item(7)],
            response: Some(SearchResponse {
                total: 0,
                ids: SearchIds::Csv(String::new()),
            }),
            ..FakeSource::default()
        };
        let mut list_map = list_map_with(source, "");
        start(&mut list_map);

        list_map.dom.set_form_field("field[type]", "lodging");
        list_map.submit_search();
        assert!(list_map.dom.not_found_visible);
        assert!(list_map.dom.search_total.is_none());
        assert!(!list_map.dom.overlay_visible);

        // A new search with results leaves the not-found state.
        list_map.source.response = Some(SearchResponse {
            total: 1,
            ids: SearchIds::One(7),
        });
        list_map.submit_search();
        assert!(!list_map.dom.not_found_visible);
        assert_eq!(
            list_map.dom.search_total.as_deref(),
            Some("1 Trailside Service Found")
        );
    }

    #[test]
    fn test_manual_submit_pushes_url() {
        let source = FakeSource {
            items: vec![sample_item(7)],
            response: Some(SearchResponse {
                total: 1,
                ids: SearchIds::One(7),
            }),
            ..FakeSource::default()
        };
        let mut list_map = list_map_with(source, "");
        start(&mut list_map);

        list_map.dom.set_form_field("field[type]", "lodging");
        list_map.submit_search();

        let history = &list_map.history;
        assert_eq!(history.current_search(), "?type=lodging");
        assert!(!list_map.dom.search_panel_visible);
    }

    #[test]
    fn test_popstate_with_empty_url_resets() {
        let source = FakeSource {
            items: vec![sample_item(1), sample_item(7)],
            response: Some(SearchResponse {
                total: 1,
                ids: SearchIds::One(7),
            }),
            ..FakeSource::default()
        };
        let mut list_map = list_map_with(source, "");
        start(&mut list_map);
        assert_eq!(list_map.source.fetch_all_count, 1);

        list_map.dom.set_form_field("field[type]", "lodging");
        list_map.submit_search();
        assert!(list_map.is_searching());
        assert_eq!(list_map.controller().provider().attached_marker_count(), 1);

        // Navigating back to the bare URL resets to the full view using the
        // cached items (no second fetch).
        list_map.history = FakeHistory::with_search("");
        list_map.handle_popstate();
        assert!(!list_map.is_searching());
        assert_eq!(list_map.source.fetch_all_count, 1);
        assert_eq!(list_map.controller().provider().attached_marker_count(), 2);
        assert_eq!(list_map.dom.reset_count, 1);
        assert!(list_map.dom.search_panel_visible);
        assert!(list_map.dom.full_total_visible);
    }

    #[test]
    fn test_stale_search_response_dropped() {
        let source = FakeSource {
            items: vec![sample_item(7)],
            response: Some(SearchResponse {
                total: 1,
                ids: SearchIds::One(7),
            }),
            ..FakeSource::default()
        };
        let mut list_map = list_map_with(source, "");
        start(&mut list_map);

        list_map.submit_search();
        assert_eq!(list_map.item_ids(), &[7]);

        // A response from an earlier, slower request arrives late.
        list_map.apply_search_response(
            list_map.request_seq - 1,
            SearchResponse {
                total: 1,
                ids: SearchIds::One(99),
            },
        );
        assert_eq!(list_map.item_ids(), &[7]);
    }

    #[test]
    fn test_fetch_failure_clears_overlay() {
        let source = FakeSource {
            fail: true,
            ..FakeSource::default()
        };
        let mut list_map = list_map_with(source, "");
        start(&mut list_map);

        assert!(!list_map.dom.overlay_visible);
        assert!(list_map.full_items.is_empty());

        list_map.load_items(true, true);
        assert!(!list_map.dom.overlay_visible);
    }

    #[test]
    fn test_focus_location_disables_fit() {
        let source = FakeSource::default();
        let mut list_map = list_map_with(source, "");
        list_map.set_focus_location(44.5, -68.5);
        start(&mut list_map);

        assert!(!list_map.fit_to_bounds);
        assert_eq!(list_map.zoom, 10);
        assert!(!list_map.controller().config().fit_to_bounds_markers);
    }

    #[test]
    fn test_list_total_pages() {
        let mut list_map = list_map_with(FakeSource::default(), "");
        list_map.set_list_total(120);
        assert_eq!(list_map.pages_needed, 3);
        list_map.set_list_total(50);
        assert_eq!(list_map.pages_needed, 1);
    }

    #[test]
    fn test_view_toggle_renders_current_set() {
        let source = FakeSource {
            items: vec![sample_item(1), sample_item(2)],
            ..FakeSource::default()
        };
        let mut list_map = list_map_with(source, "");
        start(&mut list_map);

        list_map.set_view(ViewMode::List);
        assert_eq!(list_map.view(), ViewMode::List);
        assert_eq!(list_map.dom.listed.len(), 2);
    }

    #[test]
    fn test_search_ids_parsing() {
        assert_eq!(SearchIds::One(7).to_vec(), vec![7]);
        assert_eq!(
            SearchIds::Csv("12, 45,abc".to_string()).to_vec(),
            vec![12, 45]
        );
        let response: SearchResponse =
            serde_json::from_str(r#"{"total": 2, "ids": "12,45"}"#).unwrap();
        assert_eq!(response.ids.to_vec(), vec![12, 45]);
        let response: SearchResponse = serde_json::from_str(r#"{"total": 1, "ids": 7}"#).unwrap();
        assert_eq!(response.ids, SearchIds::One(7));
    }
}

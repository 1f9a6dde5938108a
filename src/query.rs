//! URL query parsing and search-form synchronization.
//!
//! [`QueryValues`] parses `a=b&c[]=d&c[]=e` style query strings into an
//! ordered multimap and serializes back. Bracketed keys become sequences
//! (indexed brackets place values at that index, gaps are not validated);
//! single-entry sequences collapse to a scalar in [`QueryValues::get`], not
//! at parse time.
//!
//! The second half maps a submitted search form back into the URL through an
//! allow-list of form-field names, coalescing repeated item-id fields into a
//! single comma-joined `item=` parameter.

use std::collections::HashMap;

use log::debug;
use once_cell::sync::Lazy;

/// The query parameters recognized by the store-locator page, in the order
/// they are examined at page load.
pub const RECOGNIZED_PARAMS: [&str; 8] = [
    "type", "sponsor", "geo", "status", "town", "distance", "item", "term",
];

/// Allow-list mapping search-form field names to URL query keys. Fields not
/// listed here never reach the URL.
static FORM_FIELD_PARAMS: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("field[type]", "type"),
        ("field[summitSponsor]", "sponsor"),
        ("x", "geo"),
        ("field[towns]", "town"),
        ("field[appItemId]", "item"),
        ("field[closureStatus.raw]", "status"),
        ("geoDistance[geolocation][distance]", "distance"),
        ("term", "term"),
    ])
});

/// The form field whose repeated values are coalesced into `item=`.
const ITEM_ID_FIELD: &str = "field[appItemId]";

// ============================================================================
// Query Values
// ============================================================================

/// A query parameter value as seen by callers: a scalar, or the full
/// sequence when more than one value was parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryValue {
    Single(String),
    Many(Vec<String>),
}

impl QueryValue {
    /// The scalar value, if this is one.
    pub fn as_single(&self) -> Option<&str> {
        match self {
            QueryValue::Single(v) => Some(v),
            QueryValue::Many(_) => None,
        }
    }
}

/// Parsed URL query parameters, in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryValues {
    values: Vec<(String, Vec<String>)>,
}

impl QueryValues {
    /// Parse a query string. Accepts a leading `?`; anything after `#` is
    /// dropped. A key without `=` parses as an empty value.
    pub fn parse(search: &str) -> Self {
        let mut values: Vec<(String, Vec<String>)> = Vec::new();

        let search = search.strip_prefix('?').unwrap_or(search);
        let search = search.split('#').next().unwrap_or_default();
        if search.is_empty() {
            return Self { values };
        }

        for pair in search.split('&') {
            if pair.is_empty() {
                continue;
            }
            let (name, raw_value) = match pair.split_once('=') {
                Some((n, v)) => (n, v),
                None => (pair, ""),
            };
            let value = decode(raw_value);

            if let Some(base) = strip_bracket_suffix(name) {
                let entry = entry_mut(&mut values, base);
                if let Some(index) = bracket_index(name) {
                    if entry.len() <= index {
                        entry.resize(index + 1, String::new());
                    }
                    entry[index] = value;
                } else {
                    entry.push(value);
                }
            } else {
                entry_mut(&mut values, name).push(value);
            }
        }

        Self { values }
    }

    /// Get a parameter. A stored single-entry sequence collapses to a
    /// scalar here.
    pub fn get(&self, key: &str) -> Option<QueryValue> {
        let entry = self.values.iter().find(|(k, _)| k == key)?;
        match entry.1.as_slice() {
            [single] => Some(QueryValue::Single(single.clone())),
            many => Some(QueryValue::Many(many.to_vec())),
        }
    }

    /// Whether any parameter was parsed.
    pub fn has_values(&self) -> bool {
        !self.values.is_empty()
    }

    /// Replace (or set) a parameter.
    pub fn set(&mut self, key: &str, value: QueryValue) {
        let values = match value {
            QueryValue::Single(v) => vec![v],
            QueryValue::Many(v) => v,
        };
        match self.values.iter_mut().find(|(k, _)| k == key) {
            Some(entry) => entry.1 = values,
            None => self.values.push((key.to_string(), values)),
        }
    }

    /// Serialize back to a leading-`?` query string, URL-encoding values.
    /// Sequences serialize as `key[]=value&key[]=value2`. Returns an empty
    /// string when there is nothing to serialize.
    pub fn to_query_string(&self, skip: Option<&str>) -> String {
        let mut params: Vec<String> = Vec::new();
        for (key, values) in &self.values {
            if skip == Some(key.as_str()) {
                continue;
            }
            match values.as_slice() {
                [single] => params.push(format!("{}={}", key, encode(single))),
                many => {
                    for value in many {
                        params.push(format!("{}[]={}", key, encode(value)));
                    }
                }
            }
        }
        if params.is_empty() {
            String::new()
        } else {
            format!("?{}", params.join("&"))
        }
    }
}

fn entry_mut<'a>(values: &'a mut Vec<(String, Vec<String>)>, key: &str) -> &'a mut Vec<String> {
    let position = match values.iter().position(|(k, _)| k == key) {
        Some(position) => position,
        None => {
            values.push((key.to_string(), Vec::new()));
            values.len() - 1
        }
    };
    &mut values[position].1
}

/// Strip a trailing `[]` or `[n]` group, returning the base name.
fn strip_bracket_suffix(name: &str) -> Option<&str> {
    let without_close = name.strip_suffix(']')?;
    let open = without_close.rfind('[')?;
    let index = &without_close[open + 1..];
    if index.is_empty() || index.bytes().all(|b| b.is_ascii_digit()) {
        Some(&name[..open])
    } else {
        None
    }
}

/// The numeric index of a trailing `[n]` group, if present.
fn bracket_index(name: &str) -> Option<usize> {
    let without_close = name.strip_suffix(']')?;
    let open = without_close.rfind('[')?;
    let index = &without_close[open + 1..];
    if index.is_empty() {
        None
    } else {
        index.parse().ok()
    }
}

fn decode(value: &str) -> String {
    urlencoding::decode(value)
        .map(|v| v.into_owned())
        .unwrap_or_else(|_| value.to_string())
}

fn encode(value: &str) -> String {
    urlencoding::encode(value).into_owned()
}

// ============================================================================
// Parameter Validation
// ============================================================================

/// Validated item-id parameter: a scalar id or a list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemIds {
    One(i64),
    Many(Vec<i64>),
}

impl ItemIds {
    pub fn to_vec(&self) -> Vec<i64> {
        match self {
            ItemIds::One(id) => vec![*id],
            ItemIds::Many(ids) => ids.clone(),
        }
    }
}

/// Validate a string parameter: present, scalar and non-empty.
pub fn validate_string(value: &QueryValue) -> Option<String> {
    match value {
        QueryValue::Single(v) if !v.is_empty() => Some(v.clone()),
        _ => None,
    }
}

/// Validate a positive-integer parameter; anything else is dropped.
pub fn validate_int(value: &QueryValue) -> Option<i64> {
    let parsed: i64 = value.as_single()?.parse().ok()?;
    (parsed > 0).then_some(parsed)
}

/// Validate the item-id parameter.
///
/// A comma-joined scalar with more than one entry becomes a list with the
/// non-numeric entries dropped; a single numeric entry stays scalar. A
/// parsed sequence validates entry by entry.
pub fn validate_item_ids(value: &QueryValue) -> Option<ItemIds> {
    fn parse_id(value: &str) -> Option<i64> {
        let id: i64 = value.trim().parse().ok()?;
        (id > 0).then_some(id)
    }

    match value {
        QueryValue::Single(v) => {
            let parts: Vec<&str> = v.split(',').collect();
            if parts.len() > 1 {
                Some(ItemIds::Many(
                    parts.iter().filter_map(|p| parse_id(p)).collect(),
                ))
            } else {
                parse_id(v).map(ItemIds::One)
            }
        }
        QueryValue::Many(values) => Some(ItemIds::Many(
            values.iter().filter_map(|v| parse_id(v)).collect(),
        )),
    }
}

// ============================================================================
// Search State
// ============================================================================

/// A validated search-field value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Text(String),
    Int(i64),
    Items(ItemIds),
}

/// The search state driving the store-locator page.
///
/// Kept consistent with the URL: building it from the URL sets `from_url`,
/// and submitting the form pushes the serialized fields back into history.
#[derive(Debug, Clone, Default)]
pub struct SearchState {
    pub fields: Vec<(String, FieldValue)>,
    pub term: Option<String>,
    pub from_url: bool,
    pub total: u32,
}

impl SearchState {
    /// Build the search state from parsed query values, validating each
    /// recognized parameter and dropping the rest.
    pub fn from_query(query: &QueryValues) -> Self {
        let mut state = SearchState::default();
        if !query.has_values() {
            return state;
        }

        for key in RECOGNIZED_PARAMS {
            let Some(value) = query.get(key) else {
                continue;
            };
            let validated = match key {
                "town" | "distance" => validate_int(&value).map(FieldValue::Int),
                "item" => validate_item_ids(&value).map(FieldValue::Items),
                "term" => {
                    state.term = validate_string(&value);
                    None
                }
                _ => validate_string(&value).map(FieldValue::Text),
            };
            if let Some(validated) = validated {
                state.fields.push((key.to_string(), validated));
            }
        }

        state.from_url = !state.fields.is_empty() || state.term.is_some();
        debug!(
            "search state from url: {} fields, term {:?}",
            state.fields.len(),
            state.term
        );
        state
    }

    pub fn field(&self, key: &str) -> Option<&FieldValue> {
        self.fields.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }
}

// ============================================================================
// Search URL Building
// ============================================================================

/// One serialized form field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormField {
    pub name: String,
    pub value: String,
}

impl FormField {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Serialize submitted form fields into a query string through the
/// allow-list.
///
/// Empty values and unmapped fields are skipped; bracket-indexed fields map
/// through their base name; repeated item-id fields coalesce into a single
/// comma-joined `item=` parameter. Returns `None` when nothing mapped.
pub fn build_search_query(fields: &[FormField]) -> Option<String> {
    let mut params: Vec<String> = Vec::new();
    let mut item_ids: Vec<String> = Vec::new();

    for field in fields {
        if field.value.is_empty() {
            continue;
        }
        match strip_bracket_suffix(&field.name) {
            None => {
                if let Some(key) = FORM_FIELD_PARAMS.get(field.name.as_str()) {
                    params.push(format!("{}={}", key, encode(&field.value)));
                }
            }
            Some(base) => {
                if FORM_FIELD_PARAMS.contains_key(base) {
                    if base == ITEM_ID_FIELD {
                        item_ids.push(field.value.clone());
                    } else if let Some(key) = FORM_FIELD_PARAMS.get(base) {
                        params.push(format!("{}={}", key, encode(&field.value)));
                    }
                }
            }
        }
    }

    if !item_ids.is_empty() {
        params.push(format!("item={}", item_ids.join(",")));
    }

    if params.is_empty() {
        None
    } else {
        Some(format!("?{}", params.join("&")))
    }
}

// ============================================================================
// Tests
// ============================================================================

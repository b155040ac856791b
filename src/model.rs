/// Shared data types for catalog records.
///
/// An `EntityRecord` is one feature from an ArcGIS FeatureServer query: a bag
/// of scalar attributes plus the optional centroid the service computed for
/// it. Records are never edited after parsing; the join and code-assignment
/// steps build new values that borrow them.

use serde_json::{Map, Value};

/// Centroid in WGS84 (the reservoir query asks for `outSR=4326`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Centroid {
    pub latitude: f64,
    pub longitude: f64,
}

/// One record from a geospatial catalog.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntityRecord {
    pub attributes: Map<String, Value>,
    pub centroid: Option<Centroid>,
}

impl EntityRecord {
    pub fn new(attributes: Map<String, Value>, centroid: Option<Centroid>) -> Self {
        EntityRecord { attributes, centroid }
    }

    /// Raw attribute value; `None` when the field is absent.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.attributes.get(field)
    }

    /// Attribute as a string slice, if it is a JSON string.
    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.attributes.get(field).and_then(Value::as_str)
    }

    /// Normalized linking key for `field`. See [`normalize_key`].
    pub fn key(&self, field: &str) -> Option<String> {
        self.attributes.get(field).and_then(normalize_key)
    }
}

/// Normalizes a linking-key value: strings are trimmed, numbers are rendered
/// as text, and anything empty, null, or non-scalar yields `None`.
///
/// `None` keys never participate in a join.
pub fn normalize_key(value: &Value) -> Option<String> {
    let key = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };

    if key.is_empty() { None } else { Some(key) }
}

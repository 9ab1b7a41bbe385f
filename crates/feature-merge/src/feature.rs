//! Feature records exchanged with the classification and tile-encoding stages
//!
//! A [`Feature`] is one tagged line geometry scoped to a single tile. Tags are kept in a
//! sorted map so attribute equality is structural and does not depend on insertion order.

use crate::IdSet;
use geo::{Geometry, LineString};
use ordered_float::OrderedFloat;
use std::collections::BTreeMap;
use std::fmt;

/// A single tag value as it can be stored in a vector tile attribute
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TagValue {
    String(String),
    Int(i64),
    Float(OrderedFloat<f64>),
    Bool(bool),
}

/// Tag mapping of a feature
pub type Tags = BTreeMap<String, TagValue>;

impl From<&str> for TagValue {
    fn from(value: &str) -> Self {
        TagValue::String(value.to_string())
    }
}

impl From<String> for TagValue {
    fn from(value: String) -> Self {
        TagValue::String(value)
    }
}

impl From<i64> for TagValue {
    fn from(value: i64) -> Self {
        TagValue::Int(value)
    }
}

impl From<f64> for TagValue {
    fn from(value: f64) -> Self {
        TagValue::Float(OrderedFloat(value))
    }
}

impl From<bool> for TagValue {
    fn from(value: bool) -> Self {
        TagValue::Bool(value)
    }
}

impl fmt::Display for TagValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TagValue::String(value) => write!(f, "{value}"),
            TagValue::Int(value) => write!(f, "{value}"),
            TagValue::Float(value) => write!(f, "{}", value.0),
            TagValue::Bool(value) => write!(f, "{value}"),
        }
    }
}

/// A tagged line feature
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Feature {
    /// Identifier, unique within one input batch
    pub id: u64,
    /// Line or multi-line geometry in tile-local coordinates
    pub geometry: Geometry<f64>,
    /// Semantic attributes assigned upstream
    pub tags: Tags,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl Feature {
    /// Create a new feature
    pub fn new(id: u64, geometry: impl Into<Geometry<f64>>, tags: Tags) -> Self {
        Self {
            id,
            geometry: geometry.into(),
            tags,
        }
    }

    /// Builder-style tag setter
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<TagValue>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Whether the geometry is of line type (line, line string or multi line string)
    #[inline]
    pub fn is_line(&self) -> bool {
        matches!(
            self.geometry,
            Geometry::Line(_) | Geometry::LineString(_) | Geometry::MultiLineString(_)
        )
    }

    /// Name of the geometry type, for error reporting
    pub fn geometry_kind(&self) -> &'static str {
        match self.geometry {
            Geometry::Point(_) => "Point",
            Geometry::Line(_) => "Line",
            Geometry::LineString(_) => "LineString",
            Geometry::Polygon(_) => "Polygon",
            Geometry::MultiPoint(_) => "MultiPoint",
            Geometry::MultiLineString(_) => "MultiLineString",
            Geometry::MultiPolygon(_) => "MultiPolygon",
            Geometry::GeometryCollection(_) => "GeometryCollection",
            Geometry::Rect(_) => "Rect",
            Geometry::Triangle(_) => "Triangle",
        }
    }

    /// All line strings making up the geometry; empty for non-line geometries
    pub fn line_strings(&self) -> Vec<LineString<f64>> {
        match &self.geometry {
            Geometry::Line(line) => vec![LineString::from(vec![line.start, line.end])],
            Geometry::LineString(line) => vec![line.clone()],
            Geometry::MultiLineString(lines) => lines.0.clone(),
            _ => Vec::new(),
        }
    }

    /// Identifiers this feature stands for
    ///
    /// A previously merged feature carries its contributors in `id_list_tag`; any other
    /// feature stands for its own id. Returns `None` when the id list cannot be parsed.
    pub fn source_ids(&self, id_list_tag: &str) -> Option<IdSet> {
        match self.tags.get(id_list_tag) {
            None => Some(IdSet::from_slice(&[self.id])),
            Some(TagValue::String(list)) => {
                let ids = parse_id_list(list)?;
                Some(IdSet::from_vec(ids))
            }
            Some(TagValue::Int(id)) => u64::try_from(*id).ok().map(|id| IdSet::from_slice(&[id])),
            Some(_) => None,
        }
    }
}

/// Format identifiers as the sorted, de-duplicated, comma-joined attribute value
///
/// Vector tile attribute values cannot hold lists, so `[9, 5, 9]` becomes `"5,9"`.
pub fn format_id_list(ids: impl IntoIterator<Item = u64>) -> String {
    let mut ids: Vec<u64> = ids.into_iter().collect();
    ids.sort_unstable();
    ids.dedup();
    ids.iter()
        .map(u64::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

/// Parse an id list attribute back into sorted, de-duplicated identifiers
pub fn parse_id_list(list: &str) -> Option<Vec<u64>> {
    let mut ids = list
        .split(',')
        .map(|part| part.trim().parse::<u64>().ok())
        .collect::<Option<Vec<u64>>>()?;
    if ids.is_empty() {
        return None;
    }
    ids.sort_unstable();
    ids.dedup();
    Some(ids)
}

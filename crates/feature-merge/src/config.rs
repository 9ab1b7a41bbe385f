//! Merge configuration and the length-limit policy

use crate::{MergeError, Result, Tags, utils};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Minimum length a merged line must reach, chosen per attribute group
///
/// The merger asks the policy once per group, with the group's attribute key. A
/// dynamic policy typically derives the limit from the road class, the zoom level being
/// generated is captured by the closure.
#[derive(Clone)]
pub enum LengthLimit {
    /// The same limit for every group
    Fixed(f64),
    /// Limit computed from the group's tags
    Dynamic(Arc<dyn Fn(&Tags) -> f64 + Send + Sync>),
}

impl LengthLimit {
    /// Wrap a closure as a dynamic policy
    pub fn dynamic(policy: impl Fn(&Tags) -> f64 + Send + Sync + 'static) -> Self {
        LengthLimit::Dynamic(Arc::new(policy))
    }

    /// Evaluate the policy for one group
    ///
    /// Fails if the policy returns a negative or NaN limit.
    pub fn evaluate(&self, tags: &Tags) -> Result<f64> {
        let value = match self {
            LengthLimit::Fixed(value) => *value,
            LengthLimit::Dynamic(policy) => policy(tags),
        };
        if value.is_nan() || value < 0.0 {
            return Err(MergeError::InvalidLengthLimit {
                value,
                tags: format!("{tags:?}"),
            });
        }
        Ok(value)
    }
}

impl Default for LengthLimit {
    fn default() -> Self {
        LengthLimit::Fixed(0.0)
    }
}

impl fmt::Debug for LengthLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LengthLimit::Fixed(value) => f.debug_tuple("Fixed").field(value).finish(),
            LengthLimit::Dynamic(_) => f.write_str("Dynamic(..)"),
        }
    }
}

impl From<f64> for LengthLimit {
    fn from(value: f64) -> Self {
        LengthLimit::Fixed(value)
    }
}

/// Configuration for merging the line features of one tile
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct MergeConfig {
    /// Simplification tolerance in tile units, `0.0` disables simplification
    pub tolerance: f64,
    /// Clip margin around the tile square, negative disables clipping
    pub buffer: f64,
    /// Minimum merged line length per attribute group
    #[cfg_attr(feature = "serde", serde(skip))]
    pub length_limit: LengthLimit,
    /// Allow the single-feature shortcut to be skipped so the line is simplified again
    pub resimplify: bool,
    /// Dead-end edges shorter than this are removed at junctions (default 0.5)
    pub stub_min_length: f64,
    /// Width of the tile-local coordinate square (default 256)
    pub extent: f64,
    /// Grid coordinates are snapped to before merging (default 1/16)
    pub precision: f64,
    /// Continue lines straight through junctions after the graph is reduced
    pub merge_strokes: bool,
    /// Attribute that receives the merged id list
    pub id_list_tag: String,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            tolerance: 0.0,
            buffer: -1.0,
            length_limit: LengthLimit::default(),
            resimplify: false,
            stub_min_length: 0.5,
            extent: utils::DEFAULT_EXTENT,
            precision: utils::DEFAULT_PRECISION,
            merge_strokes: false,
            id_list_tag: "osm_way_ids".to_string(),
        }
    }
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl MergeConfig {
    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn with_buffer(mut self, buffer: f64) -> Self {
        self.buffer = buffer;
        self
    }

    pub fn with_length_limit(mut self, length_limit: impl Into<LengthLimit>) -> Self {
        self.length_limit = length_limit.into();
        self
    }

    pub fn with_resimplify(mut self, resimplify: bool) -> Self {
        self.resimplify = resimplify;
        self
    }

    pub fn with_stub_min_length(mut self, stub_min_length: f64) -> Self {
        self.stub_min_length = stub_min_length;
        self
    }

    pub fn with_extent(mut self, extent: f64) -> Self {
        self.extent = extent;
        self
    }

    pub fn with_precision(mut self, precision: f64) -> Self {
        self.precision = precision;
        self
    }

    pub fn with_merge_strokes(mut self, merge_strokes: bool) -> Self {
        self.merge_strokes = merge_strokes;
        self
    }

    pub fn with_id_list_tag(mut self, id_list_tag: impl Into<String>) -> Self {
        self.id_list_tag = id_list_tag.into();
        self
    }

    /// Whether clipping is enabled
    #[inline]
    pub fn clips(&self) -> bool {
        self.buffer >= 0.0
    }

    /// Check the numeric parameters
    ///
    /// A fixed length limit is checked here as well; dynamic limits are checked per
    /// group when the merge runs.
    pub fn validate(&self) -> Result<()> {
        if !self.tolerance.is_finite() || self.tolerance < 0.0 {
            return Err(MergeError::InvalidConfig(format!(
                "tolerance must be finite and non-negative, got {}",
                self.tolerance
            )));
        }
        if !self.buffer.is_finite() {
            return Err(MergeError::InvalidConfig(format!(
                "buffer must be finite, got {}",
                self.buffer
            )));
        }
        if !self.stub_min_length.is_finite() || self.stub_min_length < 0.0 {
            return Err(MergeError::InvalidConfig(format!(
                "stub minimum length must be finite and non-negative, got {}",
                self.stub_min_length
            )));
        }
        if !self.extent.is_finite() || self.extent <= 0.0 {
            return Err(MergeError::InvalidConfig(format!(
                "extent must be finite and positive, got {}",
                self.extent
            )));
        }
        if !self.precision.is_finite() || self.precision <= 0.0 {
            return Err(MergeError::InvalidConfig(format!(
                "precision must be finite and positive, got {}",
                self.precision
            )));
        }
        if self.id_list_tag.is_empty() {
            return Err(MergeError::InvalidConfig(
                "id list tag must not be empty".to_string(),
            ));
        }
        if let LengthLimit::Fixed(value) = self.length_limit {
            self.length_limit.evaluate(&Tags::new()).map_err(|_| {
                MergeError::InvalidConfig(format!(
                    "length limit must be non-negative, got {value}"
                ))
            })?;
        }
        Ok(())
    }
}

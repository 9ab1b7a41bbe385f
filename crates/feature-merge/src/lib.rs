//! Feature Merge - Line Merging and Clipping for Vector Map Tiles
//!
//! This library takes the linear features (road and path segments) generated for one
//! vector tile and merges every group of features sharing identical attributes into a
//! minimal, deterministic set of lines. The source identifiers of all merged inputs are
//! kept on the merged feature as a comma-separated id list.
//!
//! # Architecture
//!
//! - **[`group_by_attributes`]**: Partitions features by attribute set, first-seen order
//! - **[`LoopLineMerger`]**: Endpoint graph that fuses lines and closes loops
//! - **[`clip_to_tile`]**: Trims merged lines to the buffered tile square with hysteresis
//! - **[`spatial_key`]**: Hilbert-curve ordering key for reproducible output
//! - **[`FeatureMerger`]**: Runs the pipeline per group and assembles merged features
//!
//! # Determinism
//!
//! Output is a function of the multiset of input features: permuting the input batch
//! yields the same merged features, only the position of groups in the result follows
//! first-seen order.

mod clip;
mod config;
mod engine;
mod feature;
mod group;
mod hilbert;
mod merger;
mod trace;
pub mod utils;

// Public API exports
pub use clip::{clip_to_tile, working_area};
pub use config::{LengthLimit, MergeConfig};
pub use engine::{FeatureMerger, MergeOutcome, merge_line_features, merge_line_strings};
pub use feature::{Feature, TagValue, Tags, format_id_list, parse_id_list};
pub use group::{Group, group_by_attributes};
pub use hilbert::{HILBERT_ORDER, SpatialKey, hilbert_index, sort_by_spatial_key, spatial_key};
pub use merger::{GroupLines, LoopLineMerger, SkipReason, SkippedGeometry, collect_group_lines};
pub use trace::{IdSet, TracedLine};

/// Error types for the merge engine
///
/// Only contract violations end up here. Invalid geometries inside a group are
/// reported as [`SkippedGeometry`] and never abort a tile.
#[derive(Debug, thiserror::Error)]
pub enum MergeError {
    #[error("Invalid merge configuration: {0}")]
    InvalidConfig(String),

    #[error("Length limit policy returned {value} for tags {tags}")]
    InvalidLengthLimit { value: f64, tags: String },

    #[error("Feature {feature_id} has unsupported geometry type {kind}, expected a line")]
    UnsupportedGeometry { feature_id: u64, kind: &'static str },
}

pub type Result<T> = std::result::Result<T, MergeError>;

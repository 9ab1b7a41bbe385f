//! FeatureMerger - per-tile entry point and merged feature assembly
//!
//! Features are grouped by attributes, every group is merged, clipped and sorted on its
//! own (in parallel), and each group yields at most one output feature carrying the ids
//! of everything merged into it.

use crate::merger::{self, collect_group_lines};
use crate::{
    Feature, Group, LengthLimit, LoopLineMerger, MergeConfig, Result, SkippedGeometry,
    TagValue, Tags, TracedLine, clip_to_tile, format_id_list, group_by_attributes,
    sort_by_spatial_key,
};

use geo::{Geometry, LineString, MultiLineString};
use rayon::prelude::*;

/// Result of merging the features of one tile
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergeOutcome {
    /// Merged features, groups in first-seen order
    pub features: Vec<Feature>,
    /// Geometries excluded because they failed validation
    pub skipped: Vec<SkippedGeometry>,
}

impl MergeOutcome {
    /// Number of geometries excluded from merging
    #[inline]
    pub fn skipped_count(&self) -> usize {
        self.skipped.len()
    }
}

/// Result of merging a single group
struct GroupOutcome {
    feature: Option<Feature>,
    skipped: Vec<SkippedGeometry>,
}

/// Merges the line features of a tile according to a validated configuration
#[derive(Debug, Clone)]
pub struct FeatureMerger {
    config: MergeConfig,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl FeatureMerger {
    /// Create a merger, failing if the configuration is invalid
    pub fn new(config: MergeConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    #[inline]
    pub fn config(&self) -> &MergeConfig {
        &self.config
    }

    /// Merge all features of one tile
    ///
    /// Fails if a feature is not a line or if the length limit policy rejects a group.
    /// Both checks happen before any group is merged, so an error never leaves partial
    /// output behind.
    pub fn merge(&self, features: Vec<Feature>) -> Result<MergeOutcome> {
        #[cfg(feature = "profiling")]
        profiling::scope!("engine::merge");

        let input_count = features.len();
        let groups = group_by_attributes(features, &self.config.id_list_tag)?;
        let limits = groups
            .iter()
            .map(|group| self.config.length_limit.evaluate(&group.key))
            .collect::<Result<Vec<f64>>>()?;

        let results: Vec<GroupOutcome> = groups
            .into_par_iter()
            .zip(limits.into_par_iter())
            .map(|(group, limit)| self.merge_group(group, limit))
            .collect();

        let mut outcome = MergeOutcome::default();
        for result in results {
            outcome.features.extend(result.feature);
            outcome.skipped.extend(result.skipped);
        }

        tracing::debug!(
            "Merged {} line features into {} ({} geometries skipped)",
            input_count,
            outcome.features.len(),
            outcome.skipped_count()
        );
        Ok(outcome)
    }

    /// Whether a group can be emitted as is without running the merge
    fn is_shortcut(&self, group: &Group, limit: f64) -> bool {
        group.len() == 1
            && !self.config.clips()
            && limit == 0.0
            && (!self.config.resimplify || self.config.tolerance == 0.0)
    }

    fn merge_group(&self, group: Group, limit: f64) -> GroupOutcome {
        if self.is_shortcut(&group, limit) {
            return GroupOutcome {
                feature: group.features.into_iter().next(),
                skipped: Vec::new(),
            };
        }

        let config = &self.config;
        let collected = collect_group_lines(&group.features, config.precision, &config.id_list_tag);
        let input_lines = collected.lines.len();

        let merged = LoopLineMerger::new(config.precision)
            .with_tolerance(config.tolerance)
            .with_min_length(limit)
            .with_loop_min_length(limit)
            .with_stub_min_length(config.stub_min_length)
            .with_merge_strokes(config.merge_strokes)
            .merge(collected.lines);

        let clipped: Vec<TracedLine> = merged
            .into_iter()
            .flat_map(|line| clip_to_tile(line, config.extent, config.buffer))
            .collect();
        let lines = sort_by_spatial_key(clipped);

        tracing::debug!(
            "Group {:?}: {} features, {} lines in, {} lines out",
            group.key,
            group.len(),
            input_lines,
            lines.len()
        );

        GroupOutcome {
            feature: assemble(group.key, lines, &config.id_list_tag),
            skipped: collected.skipped,
        }
    }
}

/// Build the output feature of a group from its sorted lines
///
/// The feature takes the smallest contributing id, so its identity does not depend on
/// input order. Returns `None` when no line survived.
fn assemble(key: Tags, lines: Vec<TracedLine>, id_list_tag: &str) -> Option<Feature> {
    let ids = merger::contributing_ids(&lines);
    let id = ids.first().copied()?;

    let mut line_strings: Vec<LineString<f64>> =
        lines.into_iter().map(TracedLine::into_line_string).collect();
    let geometry = if line_strings.len() == 1 {
        Geometry::LineString(line_strings.remove(0))
    } else {
        Geometry::MultiLineString(MultiLineString::new(line_strings))
    };

    let mut tags = key;
    tags.insert(
        id_list_tag.to_string(),
        TagValue::String(format_id_list(ids)),
    );

    Some(Feature { id, geometry, tags })
}

/// Merge the line features of one tile
pub fn merge_line_features(features: Vec<Feature>, config: &MergeConfig) -> Result<MergeOutcome> {
    FeatureMerger::new(config.clone())?.merge(features)
}

/// Merge with a fixed minimum length, a simplification tolerance and a clip buffer
///
/// A negative `buffer` disables clipping.
pub fn merge_line_strings(
    features: Vec<Feature>,
    min_length: f64,
    tolerance: f64,
    buffer: f64,
) -> Result<MergeOutcome> {
    let config = MergeConfig::default()
        .with_length_limit(LengthLimit::Fixed(min_length))
        .with_tolerance(tolerance)
        .with_buffer(buffer)
        .with_resimplify(false);
    merge_line_features(features, &config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MergeError, SkipReason};
    use geo::{Coord, Point};

    fn road(id: u64, points: &[(f64, f64)]) -> Feature {
        let line: LineString<f64> = points.iter().map(|&(x, y)| Coord { x, y }).collect();
        Feature::new(id, line, Tags::new()).with_tag("highway", "track")
    }

    fn id_list(feature: &Feature) -> Option<&TagValue> {
        feature.tags.get("osm_way_ids")
    }

    fn line_points(feature: &Feature) -> Vec<Vec<(f64, f64)>> {
        feature
            .line_strings()
            .iter()
            .map(|line| line.coords().map(|c| (c.x, c.y)).collect())
            .collect()
    }

    #[test]
    fn test_lines_sharing_endpoint_are_fused() {
        let features = vec![
            road(5, &[(10.0, 10.0), (20.0, 10.0)]),
            road(9, &[(20.0, 10.0), (30.0, 10.0)]),
        ];
        let outcome = merge_line_features(features, &MergeConfig::default()).unwrap();

        assert_eq!(outcome.features.len(), 1);
        let merged = &outcome.features[0];
        assert_eq!(merged.id, 5);
        assert_eq!(
            line_points(merged),
            vec![vec![(10.0, 10.0), (20.0, 10.0), (30.0, 10.0)]]
        );
        assert!(matches!(merged.geometry, Geometry::LineString(_)));
        assert_eq!(merged.tags.get("highway"), Some(&TagValue::from("track")));
        assert_eq!(id_list(merged), Some(&TagValue::from("5,9")));
        assert_eq!(outcome.skipped_count(), 0);
    }

    #[test]
    fn test_triangle_becomes_closed_loop() {
        let features = vec![
            road(1, &[(10.0, 10.0), (20.0, 10.0)]),
            road(2, &[(20.0, 10.0), (15.0, 18.0)]),
            road(3, &[(15.0, 18.0), (10.0, 10.0)]),
        ];
        let outcome = merge_line_features(features, &MergeConfig::default()).unwrap();

        assert_eq!(outcome.features.len(), 1);
        let lines = line_points(&outcome.features[0]);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].len(), 4);
        assert_eq!(lines[0].first(), lines[0].last());
        assert_eq!(id_list(&outcome.features[0]), Some(&TagValue::from("1,2,3")));
    }

    #[test]
    fn test_line_outside_tile_emits_nothing() {
        let features = vec![road(1, &[(300.0, 300.0), (400.0, 300.0)])];
        let config = MergeConfig::default().with_buffer(4.0);
        let outcome = merge_line_features(features, &config).unwrap();
        assert!(outcome.features.is_empty());
    }

    #[test]
    fn test_short_line_is_dropped() {
        let features = vec![road(1, &[(10.0, 10.0), (50.0, 10.0)])];
        let outcome = merge_line_strings(features, 100.0, 0.0, -1.0).unwrap();
        assert!(outcome.features.is_empty());
    }

    #[test]
    fn test_short_spur_does_not_split_through_line() {
        let features = vec![
            road(1, &[(10.0, 10.0), (40.0, 10.0)]),
            road(2, &[(40.0, 10.0), (70.0, 10.0)]),
            road(3, &[(40.0, 10.0), (40.0, 12.0)]),
        ];
        let config = MergeConfig::default().with_length_limit(10.0);
        let outcome = merge_line_features(features, &config).unwrap();

        assert_eq!(outcome.features.len(), 1);
        assert_eq!(
            line_points(&outcome.features[0]),
            vec![vec![(10.0, 10.0), (40.0, 10.0), (70.0, 10.0)]]
        );
        assert_eq!(id_list(&outcome.features[0]), Some(&TagValue::from("1,2")));

        let again = merge_line_features(outcome.features.clone(), &config).unwrap();
        assert_eq!(again.features, outcome.features);
    }

    #[test]
    fn test_singleton_shortcut_returns_input() {
        // Off-grid coordinates would be snapped if the merge ran
        let feature = road(7, &[(0.03, 0.01), (12.345, 6.789)]);
        let outcome =
            merge_line_features(vec![feature.clone()], &MergeConfig::default()).unwrap();

        assert_eq!(outcome.features, vec![feature]);
        assert!(id_list(&outcome.features[0]).is_none());
    }

    #[test]
    fn test_resimplify_disables_shortcut() {
        let feature = road(7, &[(10.0, 10.0), (20.0, 10.01), (30.0, 10.0)]);
        let config = MergeConfig::default()
            .with_tolerance(0.5)
            .with_resimplify(true);
        let outcome = merge_line_features(vec![feature], &config).unwrap();

        assert_eq!(
            line_points(&outcome.features[0]),
            vec![vec![(10.0, 10.0), (30.0, 10.0)]]
        );
        assert_eq!(id_list(&outcome.features[0]), Some(&TagValue::from("7")));
    }

    #[test]
    fn test_clipped_pieces_become_multi_line() {
        let features = vec![road(
            1,
            &[
                (100.0, 10.0),
                (100.0, -40.0),
                (120.0, -40.0),
                (140.0, -40.0),
                (140.0, 10.0),
            ],
        )];
        let config = MergeConfig::default().with_buffer(4.0);
        let outcome = merge_line_features(features, &config).unwrap();

        assert_eq!(outcome.features.len(), 1);
        let merged = &outcome.features[0];
        assert!(matches!(merged.geometry, Geometry::MultiLineString(_)));
        assert_eq!(merged.line_strings().len(), 2);
        assert_eq!(id_list(merged), Some(&TagValue::from("1")));
    }

    #[test]
    fn test_groups_in_first_seen_order() {
        let features = vec![
            road(1, &[(10.0, 10.0), (20.0, 10.0)]).with_tag("highway", "path"),
            road(2, &[(10.0, 50.0), (20.0, 50.0)]),
            road(3, &[(20.0, 10.0), (30.0, 10.0)]).with_tag("highway", "path"),
        ];
        let outcome = merge_line_features(features, &MergeConfig::default()).unwrap();

        let classes: Vec<_> = outcome
            .features
            .iter()
            .map(|f| f.tags.get("highway").cloned())
            .collect();
        assert_eq!(
            classes,
            vec![Some(TagValue::from("path")), Some(TagValue::from("track"))]
        );
        assert_eq!(id_list(&outcome.features[0]), Some(&TagValue::from("1,3")));
    }

    #[test]
    fn test_previously_merged_ids_are_carried() {
        let merged = road(5, &[(10.0, 10.0), (20.0, 10.0)]).with_tag("osm_way_ids", "5,9");
        let features = vec![merged, road(12, &[(20.0, 10.0), (30.0, 20.0)])];
        let outcome = merge_line_features(features, &MergeConfig::default()).unwrap();

        assert_eq!(outcome.features.len(), 1);
        assert_eq!(outcome.features[0].id, 5);
        assert_eq!(id_list(&outcome.features[0]), Some(&TagValue::from("5,9,12")));
    }

    #[test]
    fn test_merge_is_idempotent() {
        let features = vec![
            road(5, &[(10.0, 10.0), (20.0, 10.02), (30.0, 10.0)]),
            road(9, &[(30.0, 10.0), (40.0, 30.0)]),
            road(11, &[(100.0, 100.0), (300.0, 100.0)]),
        ];
        let config = MergeConfig::default()
            .with_buffer(4.0)
            .with_tolerance(0.1);

        let once = merge_line_features(features, &config).unwrap();
        let twice = merge_line_features(once.features.clone(), &config).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_invalid_geometry_is_skipped() {
        let features = vec![
            road(1, &[(10.0, 10.0), (20.0, 10.0)]),
            road(2, &[(20.0, 10.0), (f64::NAN, 10.0)]),
            road(3, &[(20.0, 10.0), (30.0, 10.0)]),
            road(4, &[(50.0, 50.0), (50.01, 50.01)]),
        ];
        let outcome = merge_line_features(features, &MergeConfig::default()).unwrap();

        assert_eq!(outcome.features.len(), 1);
        assert_eq!(id_list(&outcome.features[0]), Some(&TagValue::from("1,3")));
        assert_eq!(outcome.skipped_count(), 2);
        assert_eq!(outcome.skipped[0].reason, SkipReason::NonFiniteCoordinate);
        assert_eq!(outcome.skipped[1].feature_id, 4);
    }

    #[test]
    fn test_invalid_length_limit_is_fatal() {
        let config = MergeConfig::default().with_length_limit(LengthLimit::dynamic(|tags| {
            if tags.get("highway") == Some(&TagValue::from("path")) {
                f64::NAN
            } else {
                1.0
            }
        }));
        let features = vec![
            road(1, &[(10.0, 10.0), (20.0, 10.0)]),
            road(2, &[(10.0, 50.0), (20.0, 50.0)]).with_tag("highway", "path"),
        ];

        let result = merge_line_features(features, &config);
        assert!(matches!(result, Err(MergeError::InvalidLengthLimit { .. })));
    }

    #[test]
    fn test_dynamic_length_limit_per_group() {
        let config = MergeConfig::default().with_length_limit(LengthLimit::dynamic(|tags| {
            if tags.get("highway") == Some(&TagValue::from("path")) {
                50.0
            } else {
                0.0
            }
        }));
        let features = vec![
            road(1, &[(10.0, 10.0), (20.0, 10.0)]),
            road(2, &[(10.0, 50.0), (20.0, 50.0)]).with_tag("highway", "path"),
        ];

        let outcome = merge_line_features(features, &config).unwrap();
        assert_eq!(outcome.features.len(), 1);
        assert_eq!(outcome.features[0].id, 1);
    }

    #[test]
    fn test_point_geometry_is_rejected() {
        let features = vec![
            road(1, &[(10.0, 10.0), (20.0, 10.0)]),
            Feature::new(2, Point::new(5.0, 5.0), Tags::new()),
        ];
        let result = merge_line_features(features, &MergeConfig::default());
        assert!(matches!(
            result,
            Err(MergeError::UnsupportedGeometry { feature_id: 2, .. })
        ));
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = MergeConfig::default().with_precision(0.0);
        assert!(matches!(
            FeatureMerger::new(config),
            Err(MergeError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_empty_input() {
        let outcome = merge_line_features(Vec::new(), &MergeConfig::default()).unwrap();
        assert_eq!(outcome, MergeOutcome::default());
    }
}

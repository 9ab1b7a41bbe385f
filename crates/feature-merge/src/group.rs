//! Attribute grouping: partitions features into sets that may be merged together

use crate::{Feature, MergeError, Result, Tags};
use indexmap::IndexMap;

/// Features sharing one attribute key, in input order
#[derive(Clone, Debug, PartialEq)]
pub struct Group {
    /// Tags of the members minus the merge-injected id list
    pub key: Tags,
    /// Members in the order they appeared in the input batch
    pub features: Vec<Feature>,
}

impl Group {
    /// Number of features in the group
    #[inline]
    pub fn len(&self) -> usize {
        self.features.len()
    }

    /// Check if the group has no features
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

/// Attribute key of a feature: its tags without the id list added by a previous merge
pub fn attribute_key(feature: &Feature, id_list_tag: &str) -> Tags {
    let mut key = feature.tags.clone();
    key.remove(id_list_tag);
    key
}

/// Partition features by attribute key
///
/// Groups are returned in order of their first member's appearance and every feature
/// lands in exactly one group. Fails if any feature does not have a line geometry.
pub fn group_by_attributes(features: Vec<Feature>, id_list_tag: &str) -> Result<Vec<Group>> {
    #[cfg(feature = "profiling")]
    profiling::scope!("group::group_by_attributes");

    let mut groups: IndexMap<Tags, Vec<Feature>> = IndexMap::new();
    for feature in features {
        if !feature.is_line() {
            return Err(MergeError::UnsupportedGeometry {
                feature_id: feature.id,
                kind: feature.geometry_kind(),
            });
        }
        let key = attribute_key(&feature, id_list_tag);
        groups.entry(key).or_default().push(feature);
    }

    Ok(groups
        .into_iter()
        .map(|(key, features)| Group { key, features })
        .collect())
}

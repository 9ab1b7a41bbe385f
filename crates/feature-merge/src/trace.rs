//! Lines with per-segment provenance
//!
//! Every segment of a [`TracedLine`] remembers the source feature ids it came from.
//! Merging concatenates these sets, simplification folds them into the surviving
//! segments, and clipping keeps only the sets of the segments that remain, so the id
//! list of a merged feature names exactly the inputs that still contribute geometry.

use crate::utils;
use geo::{Coord, LineString};
use smallvec::SmallVec;
use std::ops::RangeInclusive;

/// Sorted, de-duplicated source feature ids
pub type IdSet = SmallVec<[u64; 2]>;

/// A polyline whose segments carry the ids of the features they originate from
#[derive(Clone, Debug, PartialEq)]
pub struct TracedLine {
    /// Vertices of the line
    coords: Vec<Coord<f64>>,
    /// One id set per segment: `sources[i]` belongs to `coords[i]..coords[i + 1]`
    sources: Vec<IdSet>,
}

impl TracedLine {
    /// Create a line from vertices and one id set per segment
    pub fn new(coords: Vec<Coord<f64>>, sources: Vec<IdSet>) -> Self {
        debug_assert_eq!(coords.len().saturating_sub(1), sources.len());
        Self { coords, sources }
    }

    /// Create a line whose segments all come from the same features
    pub fn uniform(coords: Vec<Coord<f64>>, ids: &IdSet) -> Self {
        let sources = vec![ids.clone(); coords.len().saturating_sub(1)];
        Self { coords, sources }
    }

    /// Vertices of the line
    #[inline]
    pub fn coords(&self) -> &[Coord<f64>] {
        &self.coords
    }

    /// Per-segment id sets
    #[inline]
    pub fn sources(&self) -> &[IdSet] {
        &self.sources
    }

    /// Number of vertices
    #[inline]
    pub fn len(&self) -> usize {
        self.coords.len()
    }

    /// Check if the line has no vertices
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.coords.is_empty()
    }

    #[inline]
    pub fn first(&self) -> Option<Coord<f64>> {
        self.coords.first().copied()
    }

    #[inline]
    pub fn last(&self) -> Option<Coord<f64>> {
        self.coords.last().copied()
    }

    /// Whether the line ends where it starts
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.coords.len() > 2 && self.first() == self.last()
    }

    /// Euclidean length in tile units
    pub fn length(&self) -> f64 {
        utils::line_length(&self.coords)
    }

    /// Reverse the direction of the line, keeping provenance aligned
    pub fn reverse(&mut self) {
        self.coords.reverse();
        self.sources.reverse();
    }

    /// Return a reversed copy
    pub fn reversed(&self) -> Self {
        let mut line = self.clone();
        line.reverse();
        line
    }

    /// Append a line that starts at this line's last vertex
    pub fn append(&mut self, other: TracedLine) {
        debug_assert_eq!(self.last(), other.first());
        self.coords.extend(other.coords.into_iter().skip(1));
        self.sources.extend(other.sources);
    }

    /// Extract the vertices in `range` together with the segments between them
    pub fn slice(&self, range: RangeInclusive<usize>) -> TracedLine {
        let (start, end) = (*range.start(), *range.end());
        TracedLine {
            coords: self.coords[start..=end].to_vec(),
            sources: self.sources[start..end].to_vec(),
        }
    }

    /// Keep only the vertices at `kept` (sorted, first and last included)
    ///
    /// Each new segment inherits the union of the id sets of the segments it replaces.
    pub fn retain_vertices(&self, kept: &[usize]) -> TracedLine {
        let coords = kept.iter().map(|&i| self.coords[i]).collect();
        let sources = kept
            .windows(2)
            .map(|pair| {
                let mut ids = IdSet::new();
                for segment in &self.sources[pair[0]..pair[1]] {
                    union_into(&mut ids, segment);
                }
                ids
            })
            .collect();
        TracedLine { coords, sources }
    }

    /// Union this line's provenance with a line of identical geometry
    pub fn absorb_sources(&mut self, other: &TracedLine) {
        debug_assert_eq!(self.sources.len(), other.sources.len());
        for (mine, theirs) in self.sources.iter_mut().zip(other.sources.iter()) {
            union_into(mine, theirs);
        }
    }

    /// All ids contributing at least one segment, sorted and de-duplicated
    pub fn contributing_ids(&self) -> IdSet {
        let mut ids = IdSet::new();
        for segment in &self.sources {
            union_into(&mut ids, segment);
        }
        ids
    }

    /// Drop provenance and convert into a plain line string
    pub fn into_line_string(self) -> LineString<f64> {
        LineString::new(self.coords)
    }
}

/// Merge the sorted set `src` into the sorted set `dst`
pub(crate) fn union_into(dst: &mut IdSet, src: &IdSet) {
    if dst.is_empty() {
        dst.extend_from_slice(src);
        return;
    }
    for &id in src {
        if let Err(pos) = dst.binary_search(&id) {
            dst.insert(pos, id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(values: &[u64]) -> IdSet {
        IdSet::from_slice(values)
    }

    fn coords(points: &[(f64, f64)]) -> Vec<Coord<f64>> {
        points.iter().map(|&(x, y)| Coord { x, y }).collect()
    }

    #[test]
    fn test_uniform_line() {
        let line = TracedLine::uniform(coords(&[(0.0, 0.0), (1.0, 0.0), (2.0, 0.0)]), &ids(&[4]));
        assert_eq!(line.len(), 3);
        assert_eq!(line.sources().len(), 2);
        assert_eq!(line.contributing_ids().as_slice(), &[4]);
        assert!(!line.is_closed());
    }

    #[test]
    fn test_append_keeps_provenance_per_segment() {
        let mut a = TracedLine::uniform(coords(&[(0.0, 0.0), (1.0, 0.0)]), &ids(&[1]));
        let b = TracedLine::uniform(coords(&[(1.0, 0.0), (2.0, 0.0), (3.0, 0.0)]), &ids(&[2]));
        a.append(b);

        assert_eq!(a.coords(), coords(&[(0.0, 0.0), (1.0, 0.0), (2.0, 0.0), (3.0, 0.0)]));
        assert_eq!(a.sources(), &[ids(&[1]), ids(&[2]), ids(&[2])]);
        assert!((a.length() - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_reverse() {
        let mut a = TracedLine::uniform(coords(&[(0.0, 0.0), (1.0, 0.0)]), &ids(&[1]));
        a.append(TracedLine::uniform(coords(&[(1.0, 0.0), (1.0, 1.0)]), &ids(&[2])));
        a.reverse();

        assert_eq!(a.first(), Some(Coord { x: 1.0, y: 1.0 }));
        assert_eq!(a.sources(), &[ids(&[2]), ids(&[1])]);
    }

    #[test]
    fn test_slice() {
        let mut line = TracedLine::uniform(coords(&[(0.0, 0.0), (1.0, 0.0)]), &ids(&[1]));
        line.append(TracedLine::uniform(coords(&[(1.0, 0.0), (2.0, 0.0), (3.0, 0.0)]), &ids(&[2])));

        let tail = line.slice(1..=3);
        assert_eq!(tail.len(), 3);
        assert_eq!(tail.contributing_ids().as_slice(), &[2]);

        let head = line.slice(0..=1);
        assert_eq!(head.contributing_ids().as_slice(), &[1]);
    }

    #[test]
    fn test_retain_vertices_unions_removed_segments() {
        let mut line = TracedLine::uniform(coords(&[(0.0, 0.0), (1.0, 0.0)]), &ids(&[3]));
        line.append(TracedLine::uniform(coords(&[(1.0, 0.0), (2.0, 0.0)]), &ids(&[1])));
        line.append(TracedLine::uniform(coords(&[(2.0, 0.0), (3.0, 1.0)]), &ids(&[2])));

        let simplified = line.retain_vertices(&[0, 2, 3]);
        assert_eq!(simplified.len(), 3);
        assert_eq!(simplified.sources(), &[ids(&[1, 3]), ids(&[2])]);
    }

    #[test]
    fn test_absorb_sources() {
        let mut a = TracedLine::uniform(coords(&[(0.0, 0.0), (1.0, 0.0)]), &ids(&[7]));
        let b = TracedLine::uniform(coords(&[(0.0, 0.0), (1.0, 0.0)]), &ids(&[2]));
        a.absorb_sources(&b);
        assert_eq!(a.contributing_ids().as_slice(), &[2, 7]);
    }

    #[test]
    fn test_closed_line() {
        let ring = TracedLine::uniform(
            coords(&[(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 0.0)]),
            &ids(&[1]),
        );
        assert!(ring.is_closed());

        let out_and_back = TracedLine::uniform(coords(&[(0.0, 0.0), (0.0, 0.0)]), &ids(&[1]));
        assert!(!out_and_back.is_closed());
    }

    #[test]
    fn test_union_into() {
        let mut dst = ids(&[2, 5]);
        union_into(&mut dst, &ids(&[1, 5, 9]));
        assert_eq!(dst.as_slice(), &[1, 2, 5, 9]);
    }
}

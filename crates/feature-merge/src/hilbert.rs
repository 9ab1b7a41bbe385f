//! Deterministic output ordering along a Hilbert curve
//!
//! Lines are ordered by the Hilbert index of their first vertex, so neighbouring lines
//! end up next to each other in the encoded tile. Ties are broken by the full vertex
//! sequence, which makes the order total.

use crate::TracedLine;
use geo::Coord;
use ordered_float::OrderedFloat;

/// Order of the curve: the grid has `2^HILBERT_ORDER` cells per side
pub const HILBERT_ORDER: u32 = 16;

const SIDE: u32 = 1 << HILBERT_ORDER;

/// Cells added to coordinates so that buffered regions left of and above the tile map
/// onto the curve as well
const OFFSET: i64 = 1 << (HILBERT_ORDER - 1);

/// Index of a grid cell along the Hilbert curve of order [`HILBERT_ORDER`]
pub fn hilbert_index(x: u32, y: u32) -> u64 {
    let (mut x, mut y) = (x as u64, y as u64);
    let n = SIDE as u64;
    let mut d = 0u64;
    let mut s = n / 2;
    while s > 0 {
        let rx = u64::from((x & s) > 0);
        let ry = u64::from((y & s) > 0);
        d += s * s * ((3 * rx) ^ ry);
        // Rotate the quadrant
        if ry == 0 {
            if rx == 1 {
                x = n - 1 - x;
                y = n - 1 - y;
            }
            std::mem::swap(&mut x, &mut y);
        }
        s /= 2;
    }
    d
}

/// Grid cell of a tile coordinate, clamped to the curve's domain
#[inline]
fn cell(value: f64) -> u32 {
    let shifted = (value.floor() as i64).saturating_add(OFFSET);
    shifted.clamp(0, i64::from(SIDE - 1)) as u32
}

/// Total ordering key of an output line
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct SpatialKey {
    /// Hilbert index of the first vertex
    pub hilbert: u64,
    /// All vertices, compared lexicographically to break ties
    pub coords: Vec<(OrderedFloat<f64>, OrderedFloat<f64>)>,
}

/// Compute the ordering key of a line
pub fn spatial_key(line: &TracedLine) -> SpatialKey {
    let start = line.first().unwrap_or(Coord { x: 0.0, y: 0.0 });
    SpatialKey {
        hilbert: hilbert_index(cell(start.x), cell(start.y)),
        coords: line
            .coords()
            .iter()
            .map(|c| (OrderedFloat(c.x), OrderedFloat(c.y)))
            .collect(),
    }
}

/// Sort lines by their spatial key
pub fn sort_by_spatial_key(mut lines: Vec<TracedLine>) -> Vec<TracedLine> {
    #[cfg(feature = "profiling")]
    profiling::scope!("hilbert::sort_by_spatial_key");

    lines.sort_by_cached_key(spatial_key);
    lines
}

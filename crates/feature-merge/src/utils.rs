//! Utility functions for coordinate snapping, lengths and ordering in tile space

use geo::Coord;
use std::cmp::Ordering;

/// Width of the tile-local coordinate square
pub const DEFAULT_EXTENT: f64 = 256.0;

/// Grid size coordinates are snapped to before merging (1/16 of a tile unit)
pub const DEFAULT_PRECISION: f64 = 1.0 / 16.0;

/// Integer cell of the precision grid, used as the identity of graph nodes
pub type GridKey = (i64, i64);

/// Compute the precision-grid cell containing a coordinate
#[inline(always)]
pub fn grid_key(coord: Coord<f64>, precision: f64) -> GridKey {
    (
        (coord.x / precision).round() as i64,
        (coord.y / precision).round() as i64,
    )
}

/// Snap a coordinate to the precision grid
///
/// The result is rebuilt from the integer cell so that two coordinates in the same
/// cell snap to bit-identical values (and `-0.0` never appears).
#[inline(always)]
pub fn snap(coord: Coord<f64>, precision: f64) -> Coord<f64> {
    let (x, y) = grid_key(coord, precision);
    Coord {
        x: x as f64 * precision,
        y: y as f64 * precision,
    }
}

/// Snap all coordinates and drop consecutive duplicates
pub fn snap_line(coords: &[Coord<f64>], precision: f64) -> Vec<Coord<f64>> {
    let mut snapped: Vec<Coord<f64>> = Vec::with_capacity(coords.len());
    for &coord in coords {
        let coord = snap(coord, precision);
        if snapped.last() != Some(&coord) {
            snapped.push(coord);
        }
    }
    snapped
}

/// Check that both ordinates are finite
#[inline(always)]
pub fn is_finite(coord: &Coord<f64>) -> bool {
    coord.x.is_finite() && coord.y.is_finite()
}

/// Euclidean length of a polyline in tile units
pub fn line_length(coords: &[Coord<f64>]) -> f64 {
    coords
        .windows(2)
        .map(|pair| {
            let delta = pair[1] - pair[0];
            delta.x.hypot(delta.y)
        })
        .sum()
}

/// Total order on coordinates: x first, then y
#[inline]
pub fn compare_coords(a: &Coord<f64>, b: &Coord<f64>) -> Ordering {
    a.x.total_cmp(&b.x).then_with(|| a.y.total_cmp(&b.y))
}

/// Lexicographic total order on coordinate sequences
pub fn compare_coord_slices(a: &[Coord<f64>], b: &[Coord<f64>]) -> Ordering {
    for (ca, cb) in a.iter().zip(b.iter()) {
        let ordering = compare_coords(ca, cb);
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    a.len().cmp(&b.len())
}

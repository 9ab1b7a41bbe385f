//! Tile boundary clipping with hysteresis
//!
//! Clipping runs after merging, so connectivity decisions never see tile edges. A
//! vertex is kept while the segment it starts, or the segment before it, touches the
//! buffered tile square. A line has to stay outside for two consecutive segments before
//! it is cut, which avoids gaps where a line grazes the tile seam.

use crate::TracedLine;
use geo::{Coord, Intersects, Rect};

/// The buffered tile square `[-buffer, extent + buffer]²`
pub fn working_area(extent: f64, buffer: f64) -> Rect<f64> {
    Rect::new(
        Coord {
            x: -buffer,
            y: -buffer,
        },
        Coord {
            x: extent + buffer,
            y: extent + buffer,
        },
    )
}

/// Remove detail outside the buffered tile square
///
/// Returns the runs of the line that stay in or near the working area, each with at
/// least two vertices. A negative `buffer` disables clipping and returns the line as is.
pub fn clip_to_tile(line: TracedLine, extent: f64, buffer: f64) -> Vec<TracedLine> {
    if buffer < 0.0 {
        return vec![line];
    }
    if line.len() < 2 {
        return Vec::new();
    }

    let area = working_area(extent, buffer);
    let coords = line.coords();
    let last = coords.len() - 1;

    // Check if the bounding box of a segment touches the working area
    let segment_touches = |a: Coord<f64>, b: Coord<f64>| Rect::new(a, b).intersects(&area);

    let mut pieces = Vec::new();
    // Inclusive vertex range of the run being collected
    let mut run: Option<(usize, usize)> = None;
    let mut was_in = false;

    for i in 0..last {
        let now_in = segment_touches(coords[i], coords[i + 1]);
        if now_in || was_in {
            run = Some(match run {
                Some((start, _)) => (start, i),
                None => (i, i),
            });
        } else if let Some((start, end)) = run.take() {
            // Second segment in a row outside: flush the run
            if end > start {
                pieces.push(line.slice(start..=end));
            }
        }
        was_in = now_in;
    }

    if was_in || area.intersects(&coords[last]) {
        run = Some(match run {
            Some((start, _)) => (start, last),
            None => (last, last),
        });
    }
    if let Some((start, end)) = run.filter(|(start, end)| end > start) {
        pieces.push(line.slice(start..=end));
    }

    pieces
}

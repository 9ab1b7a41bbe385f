//! Loop-aware line merging over an endpoint graph
//!
//! Lines are cut at every shared node and inserted into an arena-backed graph whose
//! nodes are precision-grid cells. The merge passes then operate on that graph:
//!
//! 0. duplicate removal: ways drawn twice collapse into one edge
//! 1. degree-2 merge: fuse the two edges meeting at every node of degree 2 (rings end
//!    up as one closed edge)
//! 2. loop breaking: remove the longer side of loops shorter than the loop limit
//! 3. stub removal: drop short dead-end spurs hanging off junctions
//! 4. simplification: Ramer–Douglas–Peucker per edge, then collapse duplicated edges
//! 5. length filter: drop edges shorter than the minimum length
//! 6. stroke merging (optional): continue the straightest pair through a junction
//!
//! Every pass that removes an edge or a vertex is followed by a degree-2 merge, and
//! passes 2 to 5 repeat until none of them changes the graph. The result has no node of
//! degree 2, so merging it again reproduces it.
//!
//! Lines are inserted in a canonical order, so the graph and every pass over it are
//! independent of the order in which features arrived.

use crate::trace::union_into;
use crate::utils::{self, GridKey};
use crate::{Feature, IdSet, TracedLine};
use geo::{Coord, LineString, SimplifyIdx};
use ordered_float::OrderedFloat;
use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap, HashSet};

/// Maximum deviation from a straight continuation for stroke merging, in degrees
const STROKE_MAX_DEVIATION_DEG: f64 = 30.0;

type NodeId = usize;
type EdgeId = usize;

/// Why a geometry was excluded from its group
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SkipReason {
    #[error("geometry has a non-finite coordinate")]
    NonFiniteCoordinate,

    #[error("line has {count} distinct point(s) after snapping, need at least 2")]
    TooFewPoints { count: usize },

    #[error("id list tag could not be parsed")]
    MalformedIdList,
}

/// A geometry excluded from a group, with the reason
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedGeometry {
    pub feature_id: u64,
    pub reason: SkipReason,
}

/// Valid lines of a group plus everything that had to be skipped
#[derive(Debug, Default)]
pub struct GroupLines {
    pub lines: Vec<TracedLine>,
    pub skipped: Vec<SkippedGeometry>,
}

/// Decode and validate the geometries of a group
///
/// Each line string is snapped to the precision grid and tagged with the ids of its
/// feature. A bad line is skipped and logged; the rest of the group is unaffected.
pub fn collect_group_lines(features: &[Feature], precision: f64, id_list_tag: &str) -> GroupLines {
    let mut result = GroupLines::default();

    for feature in features {
        let Some(ids) = feature.source_ids(id_list_tag) else {
            skip(&mut result, feature.id, SkipReason::MalformedIdList);
            continue;
        };

        for line in feature.line_strings() {
            match prepare_line(&line, precision) {
                Ok(coords) => result.lines.push(TracedLine::uniform(coords, &ids)),
                Err(reason) => skip(&mut result, feature.id, reason),
            }
        }
    }

    result
}

fn prepare_line(
    line: &LineString<f64>,
    precision: f64,
) -> std::result::Result<Vec<Coord<f64>>, SkipReason> {
    if !line.0.iter().all(utils::is_finite) {
        return Err(SkipReason::NonFiniteCoordinate);
    }
    let coords = utils::snap_line(&line.0, precision);
    if coords.len() < 2 {
        return Err(SkipReason::TooFewPoints {
            count: coords.len(),
        });
    }
    Ok(coords)
}

fn skip(result: &mut GroupLines, feature_id: u64, reason: SkipReason) {
    tracing::warn!(
        "Excluding geometry of feature {} from line merge: {}",
        feature_id,
        reason
    );
    result.skipped.push(SkippedGeometry { feature_id, reason });
}

/// Merges the lines of one attribute group into a minimal set of maximal lines
#[derive(Debug, Clone)]
pub struct LoopLineMerger {
    precision: f64,
    tolerance: f64,
    min_length: f64,
    loop_min_length: f64,
    stub_min_length: f64,
    merge_strokes: bool,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl LoopLineMerger {
    /// Create a merger that only fuses lines (no simplification, no pruning)
    pub fn new(precision: f64) -> Self {
        Self {
            precision,
            tolerance: 0.0,
            min_length: 0.0,
            loop_min_length: 0.0,
            stub_min_length: 0.0,
            merge_strokes: false,
        }
    }

    /// Simplification distance; 0 disables simplification
    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Output lines shorter than this are dropped
    pub fn with_min_length(mut self, min_length: f64) -> Self {
        self.min_length = min_length;
        self
    }

    /// Loops shorter than this are broken by removing their longer side
    pub fn with_loop_min_length(mut self, loop_min_length: f64) -> Self {
        self.loop_min_length = loop_min_length;
        self
    }

    /// Dead-end spurs at junctions shorter than this are removed
    pub fn with_stub_min_length(mut self, stub_min_length: f64) -> Self {
        self.stub_min_length = stub_min_length;
        self
    }

    /// Also continue lines through junctions along the straightest path
    pub fn with_merge_strokes(mut self, merge_strokes: bool) -> Self {
        self.merge_strokes = merge_strokes;
        self
    }

    /// Merge lines; output order is the graph's edge order, not yet spatially sorted
    pub fn merge(&self, lines: Vec<TracedLine>) -> Vec<TracedLine> {
        let mut graph = LineGraph::build(lines, self.precision);
        graph.remove_duplicate_edges();
        graph.merge_degree_two();

        let mut rounds = 0;
        loop {
            rounds += 1;
            let mut changed = false;

            if self.loop_min_length > 0.0 {
                changed |= graph.break_loops(self.loop_min_length);
                graph.merge_degree_two();
            }

            if self.stub_min_length > 0.0 {
                changed |= graph.remove_short_stubs(self.stub_min_length);
                graph.merge_degree_two();
            }

            if self.tolerance > 0.0 {
                changed |= graph.simplify(self.tolerance);
                changed |= graph.remove_duplicate_edges();
                graph.merge_degree_two();
            }

            if self.min_length > 0.0 {
                changed |= graph.remove_short_edges(self.min_length);
                graph.merge_degree_two();
            }

            if !changed {
                break;
            }
        }
        tracing::trace!(rounds, "Line graph reached a fixpoint");

        // Fusing only makes lines longer, so nothing can fall below the limit again
        if self.merge_strokes {
            graph.merge_strokes();
            graph.merge_degree_two();
        }

        graph.into_lines()
    }
}

#[derive(Debug)]
struct Node {
    /// Incident edges; a self-loop appears twice
    edges: Vec<EdgeId>,
}

#[derive(Debug)]
struct Edge {
    from: NodeId,
    to: NodeId,
    line: TracedLine,
    length: f64,
    removed: bool,
}

impl Edge {
    #[inline]
    fn is_loop(&self) -> bool {
        self.from == self.to
    }

    /// The node at the other end of the edge, seen from `node`
    #[inline]
    fn opposite(&self, node: NodeId) -> NodeId {
        if self.from == node { self.to } else { self.from }
    }

    /// Unit-less direction of the edge leaving `node`
    fn direction_from(&self, node: NodeId) -> Coord<f64> {
        let coords = self.line.coords();
        let n = coords.len();
        if self.from == node {
            coords[1] - coords[0]
        } else {
            coords[n - 2] - coords[n - 1]
        }
    }
}

/// Arena-backed endpoint graph
#[derive(Debug, Default)]
struct LineGraph {
    nodes: Vec<Node>,
    edges: Vec<Edge>,
}

impl LineGraph {
    /// Cut lines at shared nodes and insert the pieces as edges
    ///
    /// Nodes are all line endpoints plus every vertex visited more than once, whether
    /// by two lines or by one line touching itself.
    fn build(mut lines: Vec<TracedLine>, precision: f64) -> Self {
        lines.sort_by(compare_lines);

        let mut endpoints: HashSet<GridKey> = HashSet::new();
        let mut visits: HashMap<GridKey, usize> = HashMap::new();
        for line in &lines {
            let coords = line.coords();
            endpoints.insert(utils::grid_key(coords[0], precision));
            endpoints.insert(utils::grid_key(coords[coords.len() - 1], precision));
            for &coord in coords {
                *visits.entry(utils::grid_key(coord, precision)).or_default() += 1;
            }
        }
        let is_node = |key: &GridKey| {
            endpoints.contains(key) || visits.get(key).is_some_and(|&count| count > 1)
        };

        let mut graph = LineGraph::default();
        let mut node_ids: HashMap<GridKey, NodeId> = HashMap::new();
        for line in &lines {
            let coords = line.coords();
            let last = coords.len() - 1;
            let mut start = 0;
            for i in 1..=last {
                let key = utils::grid_key(coords[i], precision);
                if i != last && !is_node(&key) {
                    continue;
                }
                let from = graph.node_for(&mut node_ids, utils::grid_key(coords[start], precision));
                let to = graph.node_for(&mut node_ids, key);
                graph.add_edge(from, to, line.slice(start..=i));
                start = i;
            }
        }

        tracing::trace!(
            nodes = graph.nodes.len(),
            edges = graph.edges.len(),
            "Built line graph"
        );
        graph
    }

    fn node_for(&mut self, node_ids: &mut HashMap<GridKey, NodeId>, key: GridKey) -> NodeId {
        *node_ids.entry(key).or_insert_with(|| {
            self.nodes.push(Node { edges: Vec::new() });
            self.nodes.len() - 1
        })
    }

    fn add_edge(&mut self, from: NodeId, to: NodeId, line: TracedLine) -> EdgeId {
        let id = self.edges.len();
        let length = line.length();
        self.edges.push(Edge {
            from,
            to,
            line,
            length,
            removed: false,
        });
        self.nodes[from].edges.push(id);
        self.nodes[to].edges.push(id);
        id
    }

    fn remove_edge(&mut self, id: EdgeId) {
        let edge = &mut self.edges[id];
        edge.removed = true;
        let (from, to) = (edge.from, edge.to);
        self.nodes[from].edges.retain(|&e| e != id);
        self.nodes[to].edges.retain(|&e| e != id);
    }

    #[inline]
    fn degree(&self, node: NodeId) -> usize {
        self.nodes[node].edges.len()
    }

    fn live_edges(&self) -> Vec<EdgeId> {
        (0..self.edges.len())
            .filter(|&id| !self.edges[id].removed)
            .collect()
    }

    /// Fuse edges `a` and `b` through `node`, keeping the direction of `a`
    fn fuse(&mut self, node: NodeId, a: EdgeId, b: EdgeId) -> EdgeId {
        let (edge_a, edge_b) = (&self.edges[a], &self.edges[b]);
        let (from, to, line) = if edge_a.to == node {
            let tail = if edge_b.from == node {
                edge_b.line.clone()
            } else {
                edge_b.line.reversed()
            };
            let mut line = edge_a.line.clone();
            line.append(tail);
            (edge_a.from, edge_b.opposite(node), line)
        } else {
            let mut line = if edge_b.to == node {
                edge_b.line.clone()
            } else {
                edge_b.line.reversed()
            };
            line.append(edge_a.line.clone());
            (edge_b.opposite(node), edge_a.to, line)
        };

        self.remove_edge(a);
        self.remove_edge(b);
        self.add_edge(from, to, line)
    }

    /// Fuse the edges at every node where exactly two distinct edges meet
    ///
    /// Fusing never changes the degree of any other node, so one pass in node order
    /// reaches a fixpoint. A ring collapses into one closed edge whose two ends share a
    /// node, which then has the same edge twice and is left alone.
    fn merge_degree_two(&mut self) {
        for node in 0..self.nodes.len() {
            let edges = &self.nodes[node].edges;
            if edges.len() == 2 && edges[0] != edges[1] {
                let (a, b) = (edges[0].min(edges[1]), edges[0].max(edges[1]));
                self.fuse(node, a, b);
            }
        }
    }

    /// Remove the longer side of every loop shorter than `loop_min_length`
    fn break_loops(&mut self, loop_min_length: f64) -> bool {
        let mut changed = false;
        for id in self.live_edges() {
            if self.edges[id].removed {
                continue;
            }
            let edge = &self.edges[id];
            if edge.is_loop() {
                if edge.length < loop_min_length {
                    tracing::trace!(edge = id, length = edge.length, "Removing short loop");
                    self.remove_edge(id);
                    changed = true;
                }
                continue;
            }

            let bound = loop_min_length - edge.length;
            if bound <= 0.0 {
                continue;
            }
            let shortcut = self.shortest_alternative(id, bound);
            if shortcut.is_some_and(|path| path <= self.edges[id].length) {
                tracing::trace!(edge = id, ?shortcut, "Breaking short loop");
                self.remove_edge(id);
                changed = true;
            }
        }
        changed
    }

    /// Length of the shortest path between the ends of `edge_id` that avoids it,
    /// if one exists that is shorter than `bound`
    fn shortest_alternative(&self, edge_id: EdgeId, bound: f64) -> Option<f64> {
        let start = self.edges[edge_id].from;
        let goal = self.edges[edge_id].to;

        let mut best: HashMap<NodeId, f64> = HashMap::from([(start, 0.0)]);
        let mut queue = BinaryHeap::from([Reverse((OrderedFloat(0.0), start))]);

        while let Some(Reverse((OrderedFloat(distance), node))) = queue.pop() {
            if node == goal {
                return Some(distance);
            }
            if best.get(&node).is_some_and(|&d| distance > d) {
                continue;
            }
            for &other in &self.nodes[node].edges {
                let edge = &self.edges[other];
                if other == edge_id || edge.is_loop() {
                    continue;
                }
                let next = edge.opposite(node);
                let candidate = distance + edge.length;
                if candidate >= bound {
                    continue;
                }
                if best.get(&next).is_none_or(|&d| candidate < d) {
                    best.insert(next, candidate);
                    queue.push(Reverse((OrderedFloat(candidate), next)));
                }
            }
        }

        None
    }

    /// Remove dead-end edges shorter than `stub_min_length` hanging off a junction
    fn remove_short_stubs(&mut self, stub_min_length: f64) -> bool {
        let mut changed = false;
        for id in self.live_edges() {
            let edge = &self.edges[id];
            if edge.removed || edge.is_loop() || edge.length >= stub_min_length {
                continue;
            }
            let (from_degree, to_degree) = (self.degree(edge.from), self.degree(edge.to));
            let is_stub =
                (from_degree == 1 && to_degree >= 3) || (to_degree == 1 && from_degree >= 3);
            if is_stub {
                tracing::trace!(edge = id, length = edge.length, "Removing short stub");
                self.remove_edge(id);
                changed = true;
            }
        }
        changed
    }

    /// Remove every edge shorter than `min_length`
    fn remove_short_edges(&mut self, min_length: f64) -> bool {
        let mut changed = false;
        for id in self.live_edges() {
            if self.edges[id].length < min_length {
                self.remove_edge(id);
                changed = true;
            }
        }
        changed
    }

    /// Simplify every edge in place; edge endpoints never move
    fn simplify(&mut self, tolerance: f64) -> bool {
        let mut changed = false;
        for edge in self.edges.iter_mut().filter(|e| !e.removed) {
            if edge.line.len() <= 2 {
                continue;
            }
            let kept = LineString::new(edge.line.coords().to_vec()).simplify_idx(tolerance);
            if kept.len() < edge.line.len() {
                edge.line = edge.line.retain_vertices(&kept);
                edge.length = edge.line.length();
                changed = true;
            }
        }
        changed
    }

    /// Collapse edges with identical geometry (in either direction) into one
    fn remove_duplicate_edges(&mut self) -> bool {
        let mut changed = false;
        let mut seen: HashMap<(NodeId, NodeId), Vec<EdgeId>> = HashMap::new();
        for id in self.live_edges() {
            let edge = &self.edges[id];
            let key = (edge.from.min(edge.to), edge.from.max(edge.to));
            let candidates = seen.entry(key).or_default();

            let duplicate_of = candidates.iter().copied().find(|&kept| {
                let kept_line = &self.edges[kept].line;
                kept_line.coords() == edge.line.coords()
                    || kept_line.reversed().coords() == edge.line.coords()
            });

            match duplicate_of {
                Some(kept) => {
                    let mut line = self.edges[id].line.clone();
                    if line.coords() != self.edges[kept].line.coords() {
                        line.reverse();
                    }
                    self.edges[kept].line.absorb_sources(&line);
                    self.remove_edge(id);
                    changed = true;
                }
                None => candidates.push(id),
            }
        }
        changed
    }

    /// Fuse pairs of edges through junctions when they continue almost straight
    fn merge_strokes(&mut self) {
        let max_deviation = STROKE_MAX_DEVIATION_DEG.to_radians();
        for node in 0..self.nodes.len() {
            loop {
                if self.degree(node) < 3 {
                    break;
                }
                let Some((a, b)) = self.straightest_pair(node, max_deviation) else {
                    break;
                };
                self.fuse(node, a, b);
            }
        }
    }

    /// The pair of edges at `node` closest to a straight continuation
    fn straightest_pair(&self, node: NodeId, max_deviation: f64) -> Option<(EdgeId, EdgeId)> {
        let edges: Vec<EdgeId> = self.nodes[node]
            .edges
            .iter()
            .copied()
            .filter(|&e| !self.edges[e].is_loop())
            .collect();

        let mut best: Option<(f64, EdgeId, EdgeId)> = None;
        for (i, &a) in edges.iter().enumerate() {
            for &b in &edges[i + 1..] {
                let u = self.edges[a].direction_from(node);
                let v = self.edges[b].direction_from(node);
                let cos = (u.x * v.x + u.y * v.y) / (u.x.hypot(u.y) * v.x.hypot(v.y));
                let deviation = std::f64::consts::PI - cos.clamp(-1.0, 1.0).acos();
                if deviation <= max_deviation && best.is_none_or(|(d, _, _)| deviation < d) {
                    best = Some((deviation, a.min(b), a.max(b)));
                }
            }
        }
        best.map(|(_, a, b)| (a, b))
    }

    /// Surviving lines in edge order
    fn into_lines(self) -> Vec<TracedLine> {
        self.edges
            .into_iter()
            .filter(|edge| !edge.removed)
            .map(|edge| edge.line)
            .collect()
    }
}

/// Canonical order used to insert lines into the graph
fn compare_lines(a: &TracedLine, b: &TracedLine) -> Ordering {
    utils::compare_coord_slices(a.coords(), b.coords())
        .then_with(|| a.sources().cmp(b.sources()))
}

/// Union of the ids of all lines
pub(crate) fn contributing_ids<'a>(lines: impl IntoIterator<Item = &'a TracedLine>) -> IdSet {
    let mut ids = IdSet::new();
    for line in lines {
        union_into(&mut ids, &line.contributing_ids());
    }
    ids
}

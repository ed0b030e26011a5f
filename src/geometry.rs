//! Planar geometry helpers used by the optimizer and the upstream extractor.
//!
//! Everything operates on `geo` types in a single projected reference system;
//! distances and lengths are in map units.

use geo::{
    Coord, EuclideanDistance, EuclideanLength, Line, LineInterpolatePoint, LineLocatePoint, LineString, MultiLineString,
    Point, Polygon,
};
use rstar::{RTree, AABB};
use std::collections::{HashMap, HashSet};

/// Distance under which a vertex is considered to lie on an edge when noding.
const NODE_TOLERANCE: f64 = 1e-9;

/// Exact identity of a coordinate, used wherever geometries must be matched bit for bit.
pub type CoordKey = (u64, u64);

pub fn coord_key(c: Coord<f64>) -> CoordKey {
    // -0.0 and 0.0 must collapse to the same key
    ((c.x + 0.0).to_bits(), (c.y + 0.0).to_bits())
}

/// Approximates the buffer of a point by a regular polygon with `segments` vertices.
pub fn buffer_point(center: Point<f64>, radius: f64, segments: usize) -> Polygon<f64> {
    let segments = segments.max(3);
    let ring: Vec<Coord<f64>> = (0..segments)
        .map(|i| {
            let angle = 2.0 * std::f64::consts::PI * i as f64 / segments as f64;
            Coord {
                x: center.x() + radius * angle.cos(),
                y: center.y() + radius * angle.sin(),
            }
        })
        .collect();
    Polygon::new(LineString::new(ring), vec![])
}

/// Distance along `line` of the point of `line` nearest to `point`.
pub fn project(line: &LineString<f64>, point: &Point<f64>) -> f64 {
    let length = line.euclidean_length();
    if length == 0.0 {
        return 0.0;
    }
    line.line_locate_point(point)
        .map(|fraction| fraction * length)
        .unwrap_or(0.0)
}

/// Point located `distance` units along `line`, clamped to its ends.
pub fn interpolate(line: &LineString<f64>, distance: f64) -> Option<Point<f64>> {
    let length = line.euclidean_length();
    if length == 0.0 {
        return line.0.first().map(|c| (*c).into());
    }
    line.line_interpolate_point((distance / length).clamp(0.0, 1.0))
}

fn lerp(segment: &Line<f64>, t: f64) -> Coord<f64> {
    let t = t.clamp(0.0, 1.0);
    Coord {
        x: segment.start.x + (segment.end.x - segment.start.x) * t,
        y: segment.start.y + (segment.end.y - segment.start.y) * t,
    }
}

/// Part of `line` between the distances `start` and `end` (measured from its first vertex).
///
/// Distances are clamped to the line; an empty line string is returned when the
/// requested range has no extent.
pub fn substring(line: &LineString<f64>, start: f64, end: f64) -> LineString<f64> {
    let total = line.euclidean_length();
    let start = start.clamp(0.0, total);
    let end = end.clamp(0.0, total);
    if line.0.len() < 2 || end <= start {
        return LineString::new(vec![]);
    }

    let mut coords: Vec<Coord<f64>> = Vec::new();
    let mut travelled = 0.0;
    for segment in line.lines() {
        let len = segment.euclidean_length();
        let seg_start = travelled;
        let seg_end = travelled + len;
        travelled = seg_end;
        if len == 0.0 || seg_end < start {
            continue;
        }
        if coords.is_empty() {
            coords.push(lerp(&segment, (start - seg_start) / len));
        }
        if seg_end < end {
            coords.push(segment.end);
        } else {
            coords.push(lerp(&segment, (end - seg_start) / len));
            break;
        }
    }
    coords.dedup();

    if coords.len() < 2 {
        LineString::new(vec![])
    } else {
        LineString::new(coords)
    }
}

/// Unions a set of polylines: overlapping pieces are kept once and touching
/// pieces are merged into maximal chains.
///
/// Edges are first split at every input vertex lying on them, so a piece
/// extracted twice, or a part of a line next to the whole line, is counted once.
pub fn merge_lines(segments: &[LineString<f64>]) -> MultiLineString<f64> {
    let mut edges: Vec<(Coord<f64>, Coord<f64>)> = Vec::new();
    let mut seen: HashSet<(CoordKey, CoordKey)> = HashSet::new();
    for (a, b) in node_edges(segments) {
        let (ka, kb) = (coord_key(a), coord_key(b));
        let key = if ka <= kb { (ka, kb) } else { (kb, ka) };
        if seen.insert(key) {
            edges.push((a, b));
        }
    }

    let mut incident: HashMap<CoordKey, Vec<usize>> = HashMap::new();
    for (i, (a, b)) in edges.iter().enumerate() {
        incident.entry(coord_key(*a)).or_default().push(i);
        incident.entry(coord_key(*b)).or_default().push(i);
    }

    let mut used = vec![false; edges.len()];
    let mut chains: Vec<LineString<f64>> = Vec::new();

    for i in 0..edges.len() {
        if used[i] {
            continue;
        }
        used[i] = true;
        let mut chain: Vec<Coord<f64>> = vec![edges[i].0, edges[i].1];

        // forward from the chain tail, then backward from its head
        extend_chain(&mut chain, &edges, &incident, &mut used);
        chain.reverse();
        extend_chain(&mut chain, &edges, &incident, &mut used);
        chain.reverse();

        chains.push(LineString::new(chain));
    }

    MultiLineString::new(chains)
}

// Splits every non-degenerate edge at the input vertices lying on it.
fn node_edges(segments: &[LineString<f64>]) -> Vec<(Coord<f64>, Coord<f64>)> {
    let mut keys: HashSet<CoordKey> = HashSet::new();
    let vertices: Vec<[f64; 2]> = segments
        .iter()
        .flat_map(|s| s.0.iter())
        .filter(|c| keys.insert(coord_key(**c)))
        .map(|c| [c.x, c.y])
        .collect();
    let tree = RTree::bulk_load(vertices);

    let mut edges = Vec::new();
    for line in segments.iter().flat_map(|s| s.lines()) {
        let (a, b) = (line.start, line.end);
        let (ka, kb) = (coord_key(a), coord_key(b));
        if ka == kb {
            continue;
        }
        let envelope = AABB::from_corners(
            [a.x.min(b.x) - NODE_TOLERANCE, a.y.min(b.y) - NODE_TOLERANCE],
            [a.x.max(b.x) + NODE_TOLERANCE, a.y.max(b.y) + NODE_TOLERANCE],
        );
        let (dx, dy) = (b.x - a.x, b.y - a.y);
        let squared = dx * dx + dy * dy;

        let mut cuts: Vec<(f64, Coord<f64>)> = tree
            .locate_in_envelope(&envelope)
            .map(|p| Coord { x: p[0], y: p[1] })
            .filter(|c| {
                let k = coord_key(*c);
                k != ka && k != kb && Point::from(*c).euclidean_distance(&line) <= NODE_TOLERANCE
            })
            .map(|c| (((c.x - a.x) * dx + (c.y - a.y) * dy) / squared, c))
            .collect();
        cuts.sort_by(|x, y| x.0.total_cmp(&y.0));

        let mut from = a;
        for (_, c) in cuts {
            edges.push((from, c));
            from = c;
        }
        edges.push((from, b));
    }
    edges
}

fn extend_chain(
    chain: &mut Vec<Coord<f64>>,
    edges: &[(Coord<f64>, Coord<f64>)],
    incident: &HashMap<CoordKey, Vec<usize>>,
    used: &mut [bool],
) {
    loop {
        let tail = match chain.last() {
            Some(c) => *c,
            None => return,
        };
        let around = match incident.get(&coord_key(tail)) {
            Some(around) if around.len() == 2 => around,
            _ => return,
        };
        let next = match around.iter().find(|e| !used[**e]) {
            Some(e) => *e,
            None => return,
        };
        used[next] = true;
        let (a, b) = edges[next];
        chain.push(if coord_key(a) == coord_key(tail) { b } else { a });
    }
}

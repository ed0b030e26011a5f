use geo::{BoundingRect, EuclideanDistance, EuclideanLength, LineString, Point};
use rstar::primitives::GeomWithData;
use rstar::{RTree, RTreeObject, AABB};

/// Envelope of one river line, remembering its position in the network.
#[derive(Clone, Debug)]
struct IndexedLine {
    idx: usize,
    envelope: AABB<[f64; 2]>,
}

impl RTreeObject for IndexedLine {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

fn padded_envelope(min: [f64; 2], max: [f64; 2], pad: f64) -> AABB<[f64; 2]> {
    AABB::from_corners([min[0] - pad, min[1] - pad], [max[0] + pad, max[1] + pad])
}

/// Immutable river network: polylines digitised in flow direction plus an R-tree over their extents.
#[derive(Clone)]
pub struct RiverNetwork {
    lines: Vec<LineString<f64>>,
    index: RTree<IndexedLine>,
}

impl RiverNetwork {
    pub fn new(lines: Vec<LineString<f64>>) -> RiverNetwork {
        let entries = lines
            .iter()
            .enumerate()
            .filter_map(|(idx, line)| {
                line.bounding_rect().map(|rect| IndexedLine {
                    idx,
                    envelope: AABB::from_corners(
                        [rect.min().x, rect.min().y],
                        [rect.max().x, rect.max().y],
                    ),
                })
            })
            .collect();

        RiverNetwork {
            lines,
            index: RTree::bulk_load(entries),
        }
    }

    pub fn lines(&self) -> &[LineString<f64>] {
        &self.lines
    }

    pub fn line(&self, idx: usize) -> &LineString<f64> {
        &self.lines[idx]
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn total_length(&self) -> f64 {
        self.lines.iter().map(|l| l.euclidean_length()).sum()
    }

    /// Indices, in network order, of the lines within `radius` of `point`.
    pub fn lines_near(&self, point: &Point<f64>, radius: f64) -> Vec<usize> {
        let query = padded_envelope([point.x(), point.y()], [point.x(), point.y()], radius);
        let mut found: Vec<usize> = self
            .index
            .locate_in_envelope_intersecting(&query)
            .map(|entry| entry.idx)
            .filter(|idx| point.euclidean_distance(&self.lines[*idx]) <= radius)
            .collect();
        found.sort_unstable();
        found
    }
}

/// Confluence points with a point R-tree.
#[derive(Clone)]
pub struct ConfluenceSet {
    points: Vec<Point<f64>>,
    index: RTree<GeomWithData<[f64; 2], usize>>,
}

impl ConfluenceSet {
    pub fn new(points: Vec<Point<f64>>) -> ConfluenceSet {
        let entries = points
            .iter()
            .enumerate()
            .map(|(idx, p)| GeomWithData::new([p.x(), p.y()], idx))
            .collect();
        ConfluenceSet {
            points,
            index: RTree::bulk_load(entries),
        }
    }

    pub fn points(&self) -> &[Point<f64>] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// True when some confluence lies strictly closer than `tolerance` to `point`.
    pub fn any_near(&self, point: &Point<f64>, tolerance: f64) -> bool {
        let query = padded_envelope([point.x(), point.y()], [point.x(), point.y()], tolerance);
        self.index
            .locate_in_envelope(&query)
            .any(|entry| point.euclidean_distance(&self.points[entry.data]) < tolerance)
    }

    /// Indices, in input order, of the confluences within `tolerance` of `line`.
    pub fn on_line(&self, line: &LineString<f64>, tolerance: f64) -> Vec<usize> {
        let rect = match line.bounding_rect() {
            Some(rect) => rect,
            None => return Vec::new(),
        };
        let query = padded_envelope(
            [rect.min().x, rect.min().y],
            [rect.max().x, rect.max().y],
            tolerance,
        );
        let mut found: Vec<usize> = self
            .index
            .locate_in_envelope(&query)
            .map(|entry| entry.data)
            .filter(|idx| self.points[*idx].euclidean_distance(line) <= tolerance)
            .collect();
        found.sort_unstable();
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_network() -> RiverNetwork {
        RiverNetwork::new(vec![
            LineString::from(vec![(0.0, 0.0), (100.0, 0.0)]),
            LineString::from(vec![(100.0, 0.0), (200.0, 0.0)]),
            LineString::from(vec![(0.0, 500.0), (100.0, 500.0)]),
        ])
    }

    #[test]
    fn test_lines_near_filters_on_true_distance() {
        let network = create_test_network();
        assert_eq!(network.lines_near(&Point::new(100.0, 10.0), 50.0), vec![0, 1]);
        assert_eq!(network.lines_near(&Point::new(50.0, 470.0), 50.0), vec![2]);
        // inside the padded envelope of line 0 but farther than the radius
        assert!(network.lines_near(&Point::new(-40.0, -40.0), 50.0).is_empty());
        assert_eq!(network.total_length(), 300.0);
    }

    #[test]
    fn test_confluences_on_line_and_near() {
        let confluences = ConfluenceSet::new(vec![
            Point::new(100.0, 0.0),
            Point::new(50.0, 0.0),
            Point::new(50.0, 1.0),
        ]);
        let line = LineString::from(vec![(0.0, 0.0), (100.0, 0.0)]);
        assert_eq!(confluences.on_line(&line, 1e-6), vec![0, 1]);
        assert!(confluences.any_near(&Point::new(100.0, 0.0), 1e-6));
        assert!(!confluences.any_near(&Point::new(100.0, 0.1), 1e-6));
    }
}

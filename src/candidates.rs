use crate::data::{CandidatePoint, MonitoringSection};
use crate::geometry::interpolate;
use crate::network::RiverNetwork;
use geo::{EuclideanLength, LineString, Point};
use log::{info, warn};
use std::collections::HashSet;

// Coordinates rounded to 6 decimals.
type RoundedKey = (i64, i64);

fn rounded_key(p: &Point<f64>) -> RoundedKey {
    ((p.x() * 1e6).round() as i64, (p.y() * 1e6).round() as i64)
}

/// Points every `interval` units along `line`, starting from its downstream end.
/// Locations already in `existing` are skipped, new ones are added to it.
pub fn points_along(line: &LineString<f64>, interval: f64, existing: &mut HashSet<RoundedKey>) -> Vec<Point<f64>> {
    let mut points = Vec::new();
    if interval <= 0.0 {
        return points;
    }
    let total = line.euclidean_length();
    let mut distance = 0.0;
    while distance <= total {
        if let Some(point) = interpolate(line, total - distance) {
            if existing.insert(rounded_key(&point)) {
                points.push(point);
            }
        }
        distance += interval;
    }
    points
}

/// Candidate points along every river line, numbered from `start_id`.
pub fn generate_candidates(network: &RiverNetwork, interval: f64, start_id: u64) -> Vec<CandidatePoint> {
    let mut existing = HashSet::new();
    let candidates: Vec<CandidatePoint> = network
        .lines()
        .iter()
        .flat_map(|line| points_along(line, interval, &mut existing))
        .zip(start_id..)
        .map(|(p, id)| CandidatePoint {
            id,
            x: p.x(),
            y: p.y(),
            fixed: false,
        })
        .collect();

    info!(
        "Generated {} candidate points every {} units along {} river lines",
        candidates.len(),
        interval,
        network.len()
    );
    candidates
}

/// Retained sections first, as fixed points keeping their section id, then the
/// generated candidates with their own ids. Pool position gives the 1-based FID.
pub fn merge_with_retained(retained: &[MonitoringSection], generated: &[CandidatePoint]) -> Vec<CandidatePoint> {
    let merged: Vec<CandidatePoint> = retained
        .iter()
        .map(|s| CandidatePoint {
            id: s.id,
            x: s.x,
            y: s.y,
            fixed: true,
        })
        .chain(generated.iter().cloned())
        .collect();

    let mut ids = HashSet::new();
    let duplicated = merged.iter().filter(|c| !ids.insert(c.id)).count();
    if duplicated > 0 {
        warn!(
            "{} merged candidate points reuse an id already taken: raise candidates.start_id above the section ids",
            duplicated
        );
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_points_along_start_downstream() {
        let line = LineString::from(vec![(0.0, 0.0), (25.0, 0.0)]);
        let mut existing = HashSet::new();
        let points = points_along(&line, 10.0, &mut existing);
        assert_eq!(points.len(), 3);
        for (p, x) in points.iter().zip([25.0, 15.0, 5.0]) {
            assert!((p.x() - x).abs() < 1e-9);
        }
    }

    #[test]
    fn test_shared_endpoints_are_generated_once() {
        let network = RiverNetwork::new(vec![
            LineString::from(vec![(0.0, 0.0), (20.0, 0.0)]),
            LineString::from(vec![(20.0, 0.0), (20.0, 20.0)]),
        ]);
        let candidates = generate_candidates(&network, 20.0, 7);
        // (20, 0), (0, 0) then (20, 20); the second line's (20, 0) is a duplicate
        assert_eq!(candidates.len(), 3);
        assert_eq!(candidates.iter().map(|c| c.id).collect::<Vec<_>>(), vec![7, 8, 9]);
        assert_eq!((candidates[2].x, candidates[2].y), (20.0, 20.0));
        assert!(candidates.iter().all(|c| !c.fixed));
    }

    #[test]
    fn test_merge_with_retained_puts_sections_first() {
        let retained = vec![MonitoringSection { id: 40, x: 1.0, y: 1.0 }];
        let generated = vec![
            CandidatePoint { id: 7, x: 2.0, y: 2.0, fixed: false },
            CandidatePoint { id: 8, x: 3.0, y: 3.0, fixed: false },
        ];
        let merged = merge_with_retained(&retained, &generated);
        assert_eq!(merged.len(), 3);
        assert_eq!(merged[0], CandidatePoint { id: 40, x: 1.0, y: 1.0, fixed: true });
        assert_eq!(merged.iter().map(|c| c.id).collect::<Vec<_>>(), vec![40, 7, 8]);
        assert!(!merged[2].fixed);
    }

    #[test]
    fn test_generated_ids_start_at_start_id_after_merge() {
        let network = RiverNetwork::new(vec![LineString::from(vec![(0.0, 0.0), (30.0, 0.0)])]);
        let generated = generate_candidates(&network, 10.0, 7);
        let merged = merge_with_retained(&[MonitoringSection { id: 42, x: 3.0, y: 1.0 }], &generated);
        assert_eq!(merged.iter().map(|c| c.id).collect::<Vec<_>>(), vec![42, 7, 8, 9, 10]);
        assert_eq!(merged.iter().filter(|c| c.fixed).count(), 1);
    }
}

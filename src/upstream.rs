//! Upstream catchment extraction.
//!
//! From a monitoring section, the river lines near the section are walked
//! backward (river lines are digitised downstream) for at most a length budget.
//! Each confluence met on an extracted piece opens a new walk with what is
//! left of the budget; a confluence is entered at most once per section.

use crate::data::MonitoringSection;
use crate::geometry::{coord_key, merge_lines, project, substring, CoordKey};
use crate::network::{ConfluenceSet, RiverNetwork};
use crate::param::Upstream;
use geo::{EuclideanLength, LineString, MultiLineString, Point};
use log::{debug, info};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Instant;

/// Raw result of one traversal.
#[derive(Clone, Debug, Default)]
pub struct Extraction {
    /// Extracted pieces in traversal order
    pub segments: Vec<LineString<f64>>,
    /// Confluences entered, in the order they were entered
    pub visited: Vec<Point<f64>>,
}

/// Union of the upstream pieces of one section; empty when nothing was found.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SectionUpstream {
    pub section_id: u64,
    pub geometry: MultiLineString<f64>,
    pub segment_count: usize,
    /// The section sits on a confluence and was not traversed
    pub junction: bool,
}

impl SectionUpstream {
    pub fn length(&self) -> f64 {
        self.geometry.euclidean_length()
    }

    pub fn is_empty(&self) -> bool {
        self.geometry.0.is_empty()
    }
}

// One pending walk: the lines around `point` still to extract, and the
// confluences of the last extracted piece still to enter.
struct Frame {
    point: Point<f64>,
    budget: f64,
    lines: Vec<usize>,
    next_line: usize,
    confluences: Vec<usize>,
    next_confluence: usize,
    segment_length: f64,
}

enum Step {
    Enter(Point<f64>, f64),
    Extracted,
    Done,
}

fn open_frame(point: Point<f64>, budget: f64, network: &RiverNetwork, cfg: &Upstream) -> Option<Frame> {
    if budget <= cfg.min_budget {
        return None;
    }
    let lines = network.lines_near(&point, cfg.search_radius);
    if lines.is_empty() {
        return None;
    }
    Some(Frame {
        point,
        budget,
        lines,
        next_line: 0,
        confluences: Vec::new(),
        next_confluence: 0,
        segment_length: 0.0,
    })
}

/// Walks the network upstream of `start` and returns every extracted piece.
///
/// The walk is depth first: the confluences of a piece are fully explored, in
/// input order, before the next line around the same point. The set of entered
/// confluences is shared by the whole walk, which keeps loops finite.
pub fn extract_upstream(
    start: Point<f64>,
    budget: f64,
    network: &RiverNetwork,
    confluences: &ConfluenceSet,
    cfg: &Upstream,
) -> Extraction {
    let mut extraction = Extraction::default();
    let mut visited: HashSet<CoordKey> = HashSet::new();
    let mut stack: Vec<Frame> = open_frame(start, budget, network, cfg).into_iter().collect();

    while let Some(frame) = stack.last_mut() {
        let step = if frame.next_confluence < frame.confluences.len() {
            let c = frame.confluences[frame.next_confluence];
            frame.next_confluence += 1;
            let point = confluences.points()[c];
            if visited.insert(coord_key(point.0)) {
                Step::Enter(point, frame.budget - frame.segment_length)
            } else {
                Step::Extracted
            }
        } else if frame.next_line < frame.lines.len() {
            let line = network.line(frame.lines[frame.next_line]);
            frame.next_line += 1;

            let start_distance = project(line, &frame.point);
            let end_distance = (start_distance - frame.budget).max(0.0);
            let segment = substring(line, end_distance, start_distance);
            let length = segment.euclidean_length();

            if segment.0.is_empty() || length < cfg.min_segment_length {
                debug!("Skipping degenerate piece of length {:.3}", length);
            } else {
                frame.confluences = confluences.on_line(&segment, cfg.snap_tolerance);
                frame.next_confluence = 0;
                frame.segment_length = length;
                extraction.segments.push(segment);
            }
            Step::Extracted
        } else {
            Step::Done
        };

        match step {
            Step::Enter(point, remaining) => {
                extraction.visited.push(point);
                if let Some(next) = open_frame(point, remaining, network, cfg) {
                    stack.push(next);
                }
            }
            Step::Extracted => {}
            Step::Done => {
                stack.pop();
            }
        }
    }

    extraction
}

/// Upstream geometry of one section. A section lying on a confluence has none.
pub fn section_upstream(
    section: &MonitoringSection,
    network: &RiverNetwork,
    confluences: &ConfluenceSet,
    cfg: &Upstream,
) -> SectionUpstream {
    let start = section.point();
    if confluences.any_near(&start, cfg.junction_tolerance) {
        debug!("Section {} lies on a confluence: no upstream segment", section.id);
        return SectionUpstream {
            section_id: section.id,
            geometry: MultiLineString::new(vec![]),
            segment_count: 0,
            junction: true,
        };
    }

    let extraction = extract_upstream(start, cfg.budget, network, confluences, cfg);
    debug!(
        "Section {}: {} pieces, {} confluences entered",
        section.id,
        extraction.segments.len(),
        extraction.visited.len()
    );

    SectionUpstream {
        section_id: section.id,
        geometry: merge_lines(&extraction.segments),
        segment_count: extraction.segments.len(),
        junction: false,
    }
}

/// Upstream geometry of every section, in section order.
pub fn extract_all(
    sections: &[MonitoringSection],
    network: &RiverNetwork,
    confluences: &ConfluenceSet,
    cfg: &Upstream,
) -> Vec<SectionUpstream> {
    let time = Instant::now();
    let results: Vec<SectionUpstream> = sections
        .par_iter()
        .map(|s| section_upstream(s, network, confluences, cfg))
        .collect();

    info!(
        "Upstream segments extracted for {}/{} sections ({} on confluences) in {:.2?}",
        results.iter().filter(|r| !r.is_empty()).count(),
        results.len(),
        results.iter().filter(|r| r.junction).count(),
        time.elapsed()
    );
    results
}

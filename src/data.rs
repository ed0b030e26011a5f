use crate::candidates::{generate_candidates, merge_with_retained};
use crate::geometry::buffer_point;
use crate::network::{ConfluenceSet, RiverNetwork};
use crate::param::Param;
use crate::raster::ActivityRaster;
use geo::{LineString, MultiPolygon, Point, Polygon};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::error::Error;
use std::fmt;

/// A location eligible for monitoring; fixed points must be part of every selection.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CandidatePoint {
    pub id: u64,
    pub x: f64,
    pub y: f64,
    pub fixed: bool,
}

impl CandidatePoint {
    pub fn point(&self) -> Point<f64> {
        Point::new(self.x, self.y)
    }
}

/// An existing monitoring section, origin of one upstream extraction.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct MonitoringSection {
    pub id: u64,
    pub x: f64,
    pub y: f64,
}

impl MonitoringSection {
    pub fn point(&self) -> Point<f64> {
        Point::new(self.x, self.y)
    }
}

#[derive(Deserialize)]
struct PointRecord {
    point_id: Option<u64>,
    x: f64,
    y: f64,
    #[serde(default)]
    fixed: Option<String>,
}

#[derive(Deserialize)]
struct VertexRecord {
    line_id: String,
    x: f64,
    y: f64,
}

fn parse_flag(value: &Option<String>) -> bool {
    match value {
        Some(v) => matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "y"),
        None => false,
    }
}

/// In-memory inputs of both subsystems, already reconciled to one reference system.
#[derive(Clone)]
pub struct Data {
    pub candidates: Vec<CandidatePoint>,
    /// Influence zone of each candidate, same order as `candidates`
    pub zones: Vec<Polygon<f64>>,
    pub raster: ActivityRaster,
    pub rivers: RiverNetwork,
    pub confluences: ConfluenceSet,
    pub sections: Vec<MonitoringSection>,
}

impl Data {
    pub fn new() -> Data {
        Data {
            candidates: Vec::new(),
            zones: Vec::new(),
            raster: ActivityRaster::empty(),
            rivers: RiverNetwork::new(Vec::new()),
            confluences: ConfluenceSet::new(Vec::new()),
            sections: Vec::new(),
        }
    }

    pub fn candidate_len(&self) -> usize {
        self.candidates.len()
    }

    /// Positions of the fixed candidates in the pool.
    pub fn fixed_indices(&self) -> Vec<usize> {
        self.candidates
            .iter()
            .enumerate()
            .filter(|(_, c)| c.fixed)
            .map(|(i, _)| i)
            .collect()
    }

    /// Loads every input named in the parameters; empty paths are skipped.
    pub fn load_data(&mut self, param: &Param) -> Result<(), Box<dyn Error>> {
        if !param.data.rivers.is_empty() {
            self.rivers = RiverNetwork::new(load_lines(&param.data.rivers)?);
        }
        if !param.data.confluences.is_empty() {
            let points = load_points(&param.data.confluences)?
                .into_iter()
                .map(|r| Point::new(r.x, r.y))
                .collect();
            self.confluences = ConfluenceSet::new(points);
        }
        if !param.data.sections.is_empty() {
            self.sections = load_sections(&param.data.sections)?;
        }
        if param.candidates.generate {
            if !param.data.candidates.is_empty() {
                warn!("candidates.generate is set: ignoring {}", param.data.candidates);
            }
            let generated = generate_candidates(&self.rivers, param.candidates.interval, param.candidates.start_id);
            self.candidates = merge_with_retained(&self.sections, &generated);
        } else if !param.data.candidates.is_empty() {
            self.candidates = load_candidates(&param.data.candidates)?;
        }
        if !param.data.raster.is_empty() {
            self.raster = ActivityRaster::load_ascii_grid(&param.data.raster)?;
        }

        let explicit_zones = if param.data.zones.is_empty() {
            HashMap::new()
        } else {
            load_zones(&param.data.zones)?
        };
        self.build_zones(&explicit_zones, param.data.zone_radius, param.data.zone_segments);

        if param.data.clip_raster_to_zones && self.raster.cell_count() > 0 {
            let union = MultiPolygon::new(self.zones.clone());
            self.raster = self.raster.clip(&union);
        }

        Ok(())
    }

    /// Assigns one influence zone per candidate: the explicit polygon when one is
    /// provided for its id, a circular buffer otherwise.
    pub fn build_zones(&mut self, explicit: &HashMap<u64, Polygon<f64>>, radius: f64, segments: usize) {
        let mut buffered = 0;
        self.zones = self
            .candidates
            .iter()
            .map(|c| match explicit.get(&c.id) {
                Some(zone) => zone.clone(),
                None => {
                    buffered += 1;
                    buffer_point(c.point(), radius, segments)
                }
            })
            .collect();
        if !explicit.is_empty() && buffered > 0 {
            warn!(
                "{} candidates have no explicit zone: using a {} unit buffer for them.",
                buffered, radius
            );
        }
    }
}

impl fmt::Debug for Data {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fixed = self.candidates.iter().filter(|c| c.fixed).count();
        writeln!(
            f,
            "Data: {} candidate points ({} fixed), {} river lines ({:.1} units), {} confluences, {} sections",
            self.candidates.len(),
            fixed,
            self.rivers.len(),
            self.rivers.total_length(),
            self.confluences.len(),
            self.sections.len()
        )?;
        write!(f, "{:?}", self.raster)
    }
}

fn open_csv(path: &str) -> Result<csv::Reader<std::fs::File>, Box<dyn Error>> {
    info!("Loading file {}...", path);
    let reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_path(path)?;
    Ok(reader)
}

fn load_points(path: &str) -> Result<Vec<PointRecord>, Box<dyn Error>> {
    let mut reader = open_csv(path)?;
    let mut records = Vec::new();
    for record in reader.deserialize() {
        let record: PointRecord = record?;
        records.push(record);
    }
    Ok(records)
}

/// Candidates CSV: `point_id,x,y[,fixed]`. Missing ids get their 1-based row number.
pub fn load_candidates(path: &str) -> Result<Vec<CandidatePoint>, Box<dyn Error>> {
    let candidates: Vec<CandidatePoint> = load_points(path)?
        .into_iter()
        .enumerate()
        .map(|(row, r)| CandidatePoint {
            id: r.point_id.unwrap_or(row as u64 + 1),
            x: r.x,
            y: r.y,
            fixed: parse_flag(&r.fixed),
        })
        .collect();
    if candidates.is_empty() {
        warn!("No candidate point found in {}", path);
    }
    Ok(candidates)
}

pub fn load_sections(path: &str) -> Result<Vec<MonitoringSection>, Box<dyn Error>> {
    Ok(load_points(path)?
        .into_iter()
        .enumerate()
        .map(|(row, r)| MonitoringSection {
            id: r.point_id.unwrap_or(row as u64 + 1),
            x: r.x,
            y: r.y,
        })
        .collect())
}

/// River CSV: `line_id,x,y`, one row per vertex, vertices of a line on consecutive rows.
pub fn load_lines(path: &str) -> Result<Vec<LineString<f64>>, Box<dyn Error>> {
    let mut reader = open_csv(path)?;
    let mut lines: Vec<LineString<f64>> = Vec::new();
    let mut current_id: Option<String> = None;
    let mut coords: Vec<(f64, f64)> = Vec::new();

    for record in reader.deserialize() {
        let record: VertexRecord = record?;
        if current_id.as_deref() != Some(record.line_id.as_str()) {
            if coords.len() >= 2 {
                lines.push(LineString::from(std::mem::take(&mut coords)));
            } else if !coords.is_empty() {
                warn!("Ignoring river line {:?} with a single vertex", current_id);
                coords.clear();
            }
            current_id = Some(record.line_id.clone());
        }
        coords.push((record.x, record.y));
    }
    if coords.len() >= 2 {
        lines.push(LineString::from(coords));
    } else if !coords.is_empty() {
        warn!("Ignoring river line {:?} with a single vertex", current_id);
    }

    Ok(lines)
}

/// Zones CSV: `point_id,x,y` ring vertices, grouped by candidate id.
pub fn load_zones(path: &str) -> Result<HashMap<u64, Polygon<f64>>, Box<dyn Error>> {
    let mut rings: HashMap<u64, Vec<(f64, f64)>> = HashMap::new();
    for r in load_points(path)? {
        let id = r.point_id.ok_or("Zone vertex without point_id")?;
        rings.entry(id).or_default().push((r.x, r.y));
    }

    let mut zones = HashMap::new();
    for (id, ring) in rings {
        if ring.len() < 3 {
            warn!("Ignoring zone of point {} with fewer than 3 vertices", id);
            continue;
        }
        zones.insert(id, Polygon::new(LineString::from(ring), vec![]));
    }
    Ok(zones)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{}", content).unwrap();
        file
    }

    #[test]
    fn test_load_candidates_reads_fixed_flags() {
        let file = write_temp("point_id,x,y,fixed\n1,0,0,true\n2,10,0,\n3,20,0,0\n4,30,0,1\n");
        let candidates = load_candidates(&file.path().to_string_lossy()).unwrap();
        assert_eq!(candidates.len(), 4);
        assert_eq!(
            candidates.iter().map(|c| c.fixed).collect::<Vec<_>>(),
            vec![true, false, false, true]
        );
        assert_eq!(candidates[2].id, 3);
    }

    #[test]
    fn test_load_lines_groups_consecutive_vertices() {
        let file = write_temp("line_id,x,y\na,0,0\na,10,0\nb,10,0\nb,10,10\nb,20,10\nc,5,5\n");
        let lines = load_lines(&file.path().to_string_lossy()).unwrap();
        assert_eq!(lines.len(), 2, "single-vertex line c must be dropped");
        assert_eq!(lines[1].0.len(), 3);
    }

    #[test]
    fn test_build_zones_prefers_explicit_polygons() {
        let mut data = Data::new();
        data.candidates = vec![
            CandidatePoint { id: 1, x: 0.0, y: 0.0, fixed: true },
            CandidatePoint { id: 2, x: 50.0, y: 0.0, fixed: false },
        ];
        let square = Polygon::new(
            LineString::from(vec![(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0)]),
            vec![],
        );
        let mut explicit = HashMap::new();
        explicit.insert(2, square.clone());
        data.build_zones(&explicit, 10.0, 16);

        assert_eq!(data.zones.len(), 2);
        assert_eq!(data.zones[0].exterior().0.len(), 17);
        assert_eq!(data.zones[1], square);
        assert_eq!(data.fixed_indices(), vec![0]);
    }

    #[test]
    fn test_load_data_with_all_inputs() {
        let rivers = write_temp("line_id,x,y\n1,0,0\n1,100,0\n");
        let candidates = write_temp("point_id,x,y,fixed\n1,10,0,true\n2,60,0,false\n");
        let raster = write_temp("ncols 2\nnrows 1\nxllcorner 0\nyllcorner -50\ncellsize 50\n3 4\n");

        let mut param = Param::default();
        param.data.rivers = rivers.path().to_string_lossy().to_string();
        param.data.candidates = candidates.path().to_string_lossy().to_string();
        param.data.raster = raster.path().to_string_lossy().to_string();
        param.data.zone_radius = 20.0;

        let mut data = Data::new();
        data.load_data(&param).unwrap();
        assert_eq!(data.rivers.len(), 1);
        assert_eq!(data.candidate_len(), 2);
        assert_eq!(data.zones.len(), 2);
        assert_eq!(data.raster.total_intensity(), 7.0);
        assert!(format!("{:?}", data).contains("2 candidate points (1 fixed)"));
    }

    #[test]
    fn test_load_data_generates_candidates_after_sections() {
        let rivers = write_temp("line_id,x,y\n1,0,0\n1,30,0\n");
        let sections = write_temp("point_id,x,y\n12,3,1\n");

        let mut param = Param::default();
        param.data.rivers = rivers.path().to_string_lossy().to_string();
        param.data.sections = sections.path().to_string_lossy().to_string();
        param.candidates.generate = true;
        param.candidates.interval = 10.0;

        let mut data = Data::new();
        data.load_data(&param).unwrap();
        // the retained section, then points at 30, 20, 10 and 0 along the line
        assert_eq!(data.candidate_len(), 5);
        assert_eq!(data.fixed_indices(), vec![0]);
        // section id kept, generated ids from the default start_id
        assert_eq!(data.candidates.iter().map(|c| c.id).collect::<Vec<_>>(), vec![12, 7, 8, 9, 10]);
        assert_eq!(data.candidates[1].x, 30.0);
        assert_eq!(data.zones.len(), 5);
    }
}

use crate::data::CandidatePoint;
use crate::param::Param;
use crate::sweep::SweepResult;
use crate::upstream::SectionUpstream;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::path::{Path, PathBuf};

/// Complete experiment data and results
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Experiment {
    /// Experiment ID, i.e., timestamp and algorithm
    pub id: String,
    pub timestamp: String,
    /// Crate version and git hash used
    pub gmonitor_version: String,
    pub parameters: Param,
    /// SHA-256 of the input files
    pub input_fingerprint: String,

    /// Candidate pool the selections refer to
    pub candidates: Vec<CandidatePoint>,
    /// Total intensity of the activity raster
    pub total_intensity: f64,

    pub sweep: Option<SweepResult>,
    pub upstream: Option<Vec<SectionUpstream>>,

    /// Execution time in seconds
    pub execution_time: f64,
}

impl Experiment {
    /// Candidate points of the winning selection for cardinality `k`; none when
    /// that cardinality was rejected.
    pub fn selected_points(&self, k: usize) -> Vec<CandidatePoint> {
        self.sweep
            .as_ref()
            .and_then(|s| s.step(k))
            .filter(|step| step.succeeded())
            .map(|step| {
                step.selected
                    .iter()
                    .filter_map(|i| self.candidates.get(*i).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn display_results(&self) -> String {
        let mut text = format!(
            "\x1b[1;93mExperiment {}\x1b[0m ({} | fingerprint {:.12})\n",
            self.id, self.gmonitor_version, self.input_fingerprint
        );

        if let Some(sweep) = &self.sweep {
            text.push_str(&format!(
                "Coverage curve over {} candidate points (total intensity {:.3}):\n",
                self.candidates.len(),
                self.total_intensity
            ));
            for step in &sweep.steps {
                match &step.error {
                    None => text.push_str(&format!(
                        "  k={:<5} coverage \x1b[1;92m{:>7.3}%\x1b[0m  fit {:.3}  ({} runs, {} generations)\n",
                        step.k,
                        step.coverage * 100.0,
                        step.fitness,
                        step.runs,
                        step.generations
                    )),
                    Some(e) => text.push_str(&format!("  k={:<5} \x1b[1;91mfailed\x1b[0m: {}\n", step.k, e)),
                }
            }
        }

        if let Some(upstream) = &self.upstream {
            let found = upstream.iter().filter(|u| !u.is_empty()).count();
            text.push_str(&format!(
                "Upstream segments: {}/{} sections, {:.1} units in total\n",
                found,
                upstream.len(),
                upstream.iter().map(|u| u.length()).sum::<f64>()
            ));
        }

        text.push_str(&format!("Computed in {:.2}s", self.execution_time));
        text
    }

    /// Writes the tabular outputs into `dir` and returns the written paths.
    ///
    /// * `best_monitoring_points_<k>_points.csv` for every successful cardinality
    /// * `coverage_curve.csv`
    /// * `upstream_segments.csv`, one row per vertex
    /// * `candidate_points.csv` when the pool was generated
    pub fn export_outputs<P: AsRef<Path>>(&self, dir: P) -> Result<Vec<PathBuf>, Box<dyn Error>> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        let mut written = Vec::new();

        if let Some(sweep) = &self.sweep {
            for step in sweep.steps.iter().filter(|s| s.succeeded()) {
                let path = dir.join(format!("best_monitoring_points_{}_points.csv", step.k));
                write_points(&path, &self.selected_points(step.k))?;
                written.push(path);
            }

            let path = dir.join("coverage_curve.csv");
            let mut writer = csv::Writer::from_path(&path)?;
            writer.write_record([
                "num_points",
                "coverage",
                "fitness",
                "generations",
                "runs",
                "coverage_mean",
                "coverage_std",
            ])?;
            for step in sweep.steps.iter().filter(|s| s.succeeded()) {
                writer.write_record(&[
                    step.k.to_string(),
                    step.coverage.to_string(),
                    step.fitness.to_string(),
                    step.generations.to_string(),
                    step.runs.to_string(),
                    step.coverage_mean.to_string(),
                    step.coverage_std.to_string(),
                ])?;
            }
            writer.flush()?;
            written.push(path);
        }

        if let Some(upstream) = &self.upstream {
            let path = dir.join("upstream_segments.csv");
            let mut writer = csv::Writer::from_path(&path)?;
            writer.write_record(["section_id", "part", "x", "y"])?;
            for section in upstream {
                for (part, line) in section.geometry.0.iter().enumerate() {
                    for c in &line.0 {
                        writer.write_record(&[
                            section.section_id.to_string(),
                            part.to_string(),
                            c.x.to_string(),
                            c.y.to_string(),
                        ])?;
                    }
                }
            }
            writer.flush()?;
            written.push(path);
        }

        if self.parameters.candidates.generate {
            let path = dir.join("candidate_points.csv");
            write_points(&path, &self.candidates)?;
            written.push(path);
        }

        info!("{} output files written to {}", written.len(), dir.display());
        Ok(written)
    }

    /// Saves the experiment, the format following the extension (`json`, `bin`/`bincode`).
    pub fn save_auto<P: AsRef<Path>>(&self, path: P) -> Result<(), Box<dyn Error>> {
        let path = path.as_ref();
        match extension(path).as_str() {
            "json" => self.save_json(path),
            "bin" | "bincode" => self.save_bincode(path),
            _ => {
                warn!("Unknown format. Saving experiment in JSON.");
                self.save_json(path.with_extension("json"))
            }
        }
    }

    fn save_json<P: AsRef<Path>>(&self, path: P) -> Result<(), Box<dyn Error>> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Saves as Bincode (compact binary, Rust-only)
    fn save_bincode<P: AsRef<Path>>(&self, path: P) -> Result<(), Box<dyn Error>> {
        let encoded = bincode::serialize(self)?;
        std::fs::write(path, encoded)?;
        Ok(())
    }

    /// Loads an experiment; unknown extensions try Bincode then JSON.
    pub fn load_auto<P: AsRef<Path>>(path: P) -> Result<Self, Box<dyn Error>> {
        let path = path.as_ref();
        match extension(path).as_str() {
            "json" => Self::load_json(path),
            "bin" | "bincode" => Self::load_bincode(path),
            _ => Self::load_bincode(path)
                .or_else(|_| Self::load_json(path))
                .map_err(|_| Box::<dyn Error>::from("Unable to load the experiment")),
        }
    }

    fn load_json<P: AsRef<Path>>(path: P) -> Result<Self, Box<dyn Error>> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    fn load_bincode<P: AsRef<Path>>(path: P) -> Result<Self, Box<dyn Error>> {
        let bytes = std::fs::read(path)?;
        Ok(bincode::deserialize(&bytes)?)
    }
}

fn extension(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase()
}

fn write_points(path: &Path, points: &[CandidatePoint]) -> Result<(), Box<dyn Error>> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(["point_id", "x", "y", "fixed"])?;
    for p in points {
        writer.write_record(&[p.id.to_string(), p.x.to_string(), p.y.to_string(), p.fixed.to_string()])?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sweep::SweepStep;
    use geo::{LineString, MultiLineString};

    impl Experiment {
        pub fn test() -> Experiment {
            let step = SweepStep {
                k: 2,
                generations: 50,
                runs: 2,
                best_run: 1,
                fitness: 30.0,
                coverage: 0.75,
                selected: vec![0, 2],
                run_fitness: vec![20.0, 30.0],
                coverage_mean: 0.625,
                coverage_std: 0.176,
                best_fit_trace: vec![20.0, 30.0],
                populations: vec![],
                error: None,
            };
            let mut failed = step.clone();
            failed.k = 1;
            failed.selected = vec![];
            failed.run_fitness = vec![];
            failed.error = Some("target cardinality 1 is lower than the number of fixed points (2)".to_string());

            Experiment {
                id: "2026-01-01_00-00-00_ga".to_string(),
                timestamp: "2026-01-01_00-00-00".to_string(),
                gmonitor_version: "0.3.0#abc1234".to_string(),
                parameters: Param::default(),
                input_fingerprint: "00".repeat(32),
                candidates: vec![
                    CandidatePoint { id: 1, x: 0.0, y: 0.0, fixed: true },
                    CandidatePoint { id: 2, x: 10.0, y: 0.0, fixed: false },
                    CandidatePoint { id: 3, x: 20.0, y: 0.0, fixed: false },
                ],
                total_intensity: 40.0,
                sweep: Some(SweepResult {
                    min_points: 1,
                    max_points: 2,
                    steps: vec![failed, step],
                }),
                upstream: Some(vec![SectionUpstream {
                    section_id: 9,
                    geometry: MultiLineString::new(vec![LineString::from(vec![(0.0, 0.0), (0.0, 5.0)])]),
                    segment_count: 1,
                    junction: false,
                }]),
                execution_time: 1.5,
            }
        }
    }

    #[test]
    fn test_selected_points_maps_indices_to_candidates() {
        let exp = Experiment::test();
        let ids: Vec<u64> = exp.selected_points(2).iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![1, 3]);
        assert!(exp.selected_points(1).is_empty());
        assert!(exp.selected_points(7).is_empty());
    }

    #[test]
    fn test_selected_points_ignores_rejected_cardinality() {
        let mut exp = Experiment::test();
        if let Some(sweep) = exp.sweep.as_mut() {
            sweep.steps[0].selected = vec![0, 1];
        }
        assert!(exp.selected_points(1).is_empty());
        assert_eq!(exp.selected_points(2).len(), 2);
    }

    #[test]
    fn test_save_and_load_json_and_bincode() {
        let exp = Experiment::test();
        let dir = tempfile::tempdir().unwrap();
        for name in ["exp.json", "exp.bin"] {
            let path = dir.path().join(name);
            exp.save_auto(&path).unwrap();
            assert_eq!(Experiment::load_auto(&path).unwrap(), exp);
        }
    }

    #[test]
    fn test_unknown_extension_saves_json() {
        let exp = Experiment::test();
        let dir = tempfile::tempdir().unwrap();
        exp.save_auto(dir.path().join("exp.data")).unwrap();
        let loaded = Experiment::load_auto(dir.path().join("exp.json")).unwrap();
        assert_eq!(loaded.id, exp.id);
    }

    #[test]
    fn test_export_outputs() {
        let exp = Experiment::test();
        let dir = tempfile::tempdir().unwrap();
        let written = exp.export_outputs(dir.path()).unwrap();
        assert_eq!(written.len(), 3);

        let points = std::fs::read_to_string(dir.path().join("best_monitoring_points_2_points.csv")).unwrap();
        assert_eq!(points, "point_id,x,y,fixed\n1,0,0,true\n3,20,0,false\n");

        let curve = std::fs::read_to_string(dir.path().join("coverage_curve.csv")).unwrap();
        assert_eq!(curve.lines().count(), 2, "the failed cardinality is not part of the curve");
        assert!(curve.lines().nth(1).unwrap().starts_with("2,0.75,30,"));

        let upstream = std::fs::read_to_string(dir.path().join("upstream_segments.csv")).unwrap();
        assert_eq!(upstream, "section_id,part,x,y\n9,0,0,0\n9,0,0,5\n");
    }

    #[test]
    fn test_display_results_mentions_failures() {
        let text = crate::utils::strip_ansi(&Experiment::test().display_results());
        assert!(text.contains("k=1"));
        assert!(text.contains("failed"));
        assert!(text.contains("75.000%"));
        assert!(text.contains("1/1 sections"));
    }
}

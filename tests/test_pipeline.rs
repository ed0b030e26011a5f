/// Full pipeline on files: loading, sweep, upstream extraction, exports and
/// experiment persistence.
///
/// Run with: cargo test --test test_pipeline -- --nocapture
use gmonitor::experiment::Experiment;
use gmonitor::param::Param;
use gmonitor::run;
use std::fs;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

fn write(dir: &Path, name: &str, content: &str) -> String {
    let path = dir.join(name);
    fs::write(&path, content).unwrap();
    path.to_string_lossy().into_owned()
}

/// Ten candidates on a row of ten cells holding 1..=10; the first and last are fixed.
/// A straight 5000-unit river runs below them with a section at x=4000.
fn create_test_params(dir: &Path) -> Param {
    let mut candidates = String::from("point_id,x,y,fixed\n");
    for i in 0..10 {
        let fixed = if i == 0 || i == 9 { "true" } else { "false" };
        candidates.push_str(&format!("{},{},5,{}\n", i + 1, 5 + 10 * i, fixed));
    }
    let raster = "ncols 10\nnrows 1\nxllcorner 0\nyllcorner 0\ncellsize 10\nNODATA_value -9999\n1 2 3 4 5 6 7 8 9 10\n";

    let mut param = Param::default();
    param.general.algo = "both".to_string();
    param.general.seed = 42;
    param.general.display_colorful = false;
    param.data.candidates = write(dir, "candidates.csv", &candidates);
    param.data.raster = write(dir, "activity.asc", raster);
    param.data.rivers = write(dir, "rivers.csv", "line_id,x,y\nmain,0,-100\nmain,5000,-100\n");
    param.data.sections = write(dir, "sections.csv", "point_id,x,y\n31,4000,-100\n");
    param.data.zone_radius = 4.0;
    param.data.zone_segments = 16;
    param.ga.population_size = 20;
    param.sweep.increment = 1;
    param.sweep.max_points = 4;
    param.sweep.base_generations = 20;
    param.sweep.generations_step = 5;
    param.sweep.runs_per_point_count = 2;
    param
}

#[test]
fn test_run_sweeps_and_extracts_from_files() {
    let dir = tempfile::tempdir().unwrap();
    let param = create_test_params(dir.path());

    let experiment = run(&param, Arc::new(AtomicBool::new(true))).unwrap();
    assert_eq!(experiment.input_fingerprint.len(), 64);
    assert_eq!(experiment.candidates.len(), 10);
    assert!((experiment.total_intensity - 55.0).abs() < 1e-9);

    let sweep = experiment.sweep.as_ref().unwrap();
    assert_eq!((sweep.min_points, sweep.max_points), (2, 4));
    assert_eq!(sweep.steps.iter().map(|s| s.k).collect::<Vec<_>>(), vec![2, 3, 4]);
    assert_eq!(
        sweep.steps.iter().map(|s| s.generations).collect::<Vec<_>>(),
        vec![20, 25, 30]
    );
    for step in &sweep.steps {
        assert!(step.succeeded());
        assert_eq!(step.selected.len(), step.k);
        assert!(step.selected.contains(&0) && step.selected.contains(&9));
    }
    assert!((sweep.steps[0].fitness - 11.0).abs() < 1e-9);
    assert!((sweep.steps[1].fitness - 20.0).abs() < 1e-9);
    let curve = sweep.curve();
    assert!(curve.windows(2).all(|w| w[1].1 >= w[0].1));

    let upstream = experiment.upstream.as_ref().unwrap();
    assert_eq!(upstream.len(), 1);
    assert_eq!(upstream[0].section_id, 31);
    assert!((upstream[0].length() - 2000.0).abs() < 1e-6);

    let ids: Vec<u64> = experiment.selected_points(2).iter().map(|p| p.id).collect();
    assert_eq!(ids, vec![1, 10]);
}

#[test]
fn test_outputs_and_saved_experiment() {
    let dir = tempfile::tempdir().unwrap();
    let mut param = create_test_params(dir.path());
    param.general.algo = "ga".to_string();
    param.sweep.max_points = 3;

    let experiment = run(&param, Arc::new(AtomicBool::new(true))).unwrap();
    assert!(experiment.upstream.is_none());

    let out = dir.path().join("out");
    let written = experiment.export_outputs(&out).unwrap();
    assert_eq!(written.len(), 3);
    assert!(out.join("best_monitoring_points_2_points.csv").exists());
    assert!(out.join("best_monitoring_points_3_points.csv").exists());
    let curve = fs::read_to_string(out.join("coverage_curve.csv")).unwrap();
    assert!(curve.starts_with("num_points,coverage,fitness,"));
    assert!(curve.lines().nth(1).unwrap().starts_with("2,0.2,11,"));

    let saved = dir.path().join("experiment.bin");
    experiment.save_auto(&saved).unwrap();
    assert_eq!(Experiment::load_auto(&saved).unwrap(), experiment);
}

#[test]
fn test_generated_candidates_keep_sections_fixed() {
    let dir = tempfile::tempdir().unwrap();
    let mut param = create_test_params(dir.path());
    param.general.algo = "ga".to_string();
    param.candidates.generate = true;
    param.candidates.interval = 1000.0;
    param.data.zone_radius = 100.0;
    param.sweep.min_points = 0;
    param.sweep.max_points = 2;

    let experiment = run(&param, Arc::new(AtomicBool::new(true))).unwrap();
    // the section, then x = 5000, 4000, ..., 0 along the river
    assert_eq!(experiment.candidates.len(), 7);
    assert!(experiment.candidates[0].fixed);
    assert_eq!(experiment.candidates[0].x, 4000.0);
    assert_eq!(experiment.candidates[0].id, 31);
    assert_eq!(
        experiment.candidates[1..].iter().map(|c| c.id).collect::<Vec<_>>(),
        (7..13).collect::<Vec<u64>>()
    );
    assert!(experiment.candidates[1..].iter().all(|c| !c.fixed));

    let sweep = experiment.sweep.as_ref().unwrap();
    assert_eq!(sweep.steps.iter().map(|s| s.k).collect::<Vec<_>>(), vec![1, 2]);
    assert_eq!(sweep.steps[0].selected, vec![0]);
    assert_eq!(experiment.selected_points(1)[0].id, 31, "the section id reaches the exported selection");
}

#[test]
fn test_missing_input_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let mut param = create_test_params(dir.path());
    param.data.raster = dir.path().join("missing.asc").to_string_lossy().into_owned();
    assert!(run(&param, Arc::new(AtomicBool::new(true))).is_err());
}

pub mod candidates;
pub mod coverage;
pub mod data;
pub mod experiment;
pub mod ga;
pub mod geometry;
pub mod individual;
pub mod network;
pub mod param;
pub mod population;
pub mod raster;
pub mod sweep;
pub mod upstream;
pub mod utils;

use crate::coverage::{CoverageModel, Fitness};
use crate::experiment::Experiment;
use crate::sweep::SweepResult;
use crate::upstream::SectionUpstream;
use chrono::Local;
use data::Data;
use log::{debug, info, warn};
use param::Param;
use std::error::Error;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

/// Crate version followed by the git hash of the build when known.
pub fn version() -> String {
    format!(
        "{}#{}",
        env!("CARGO_PKG_VERSION"),
        option_env!("GMONITOR_GIT_SHA").unwrap_or("unknown")
    )
}

/// Loads the inputs named in `param` and runs the requested algorithms.
pub fn run(param: &Param, running: Arc<AtomicBool>) -> Result<Experiment, Box<dyn Error>> {
    let mut data = Data::new();
    data.load_data(param)?;
    cinfo!(param.general.display_colorful, "\x1b[2;97m{:?}\x1b[0m", data);

    let d = &param.data;
    let fingerprint = utils::fingerprint(&[
        d.rivers.as_str(),
        d.candidates.as_str(),
        d.confluences.as_str(),
        d.sections.as_str(),
        d.raster.as_str(),
        d.zones.as_str(),
    ])?;

    let mut experiment = run_on_data(&data, param, running);
    experiment.input_fingerprint = fingerprint;
    Ok(experiment)
}

/// Runs the sweep and/or the upstream extraction on already loaded data.
pub fn run_on_data(data: &Data, param: &Param, running: Arc<AtomicBool>) -> Experiment {
    let start = std::time::Instant::now();
    let timestamp = Local::now().format("%Y-%m-%d_%H-%M-%S").to_string();

    let (sweep, upstream) = match param.general.algo.as_str() {
        "ga" => (Some(run_sweep(data, param, &running)), None),
        "upstream" => (None, Some(run_upstream(data, param))),
        "both" => (Some(run_sweep(data, param, &running)), Some(run_upstream(data, param))),
        other => {
            warn!("Unknown algo '{}': nothing to run", other);
            (None, None)
        }
    };

    Experiment {
        id: format!("{}_{}", timestamp, param.general.algo),
        timestamp,
        gmonitor_version: version(),
        parameters: param.clone(),
        input_fingerprint: String::new(),
        candidates: data.candidates.clone(),
        total_intensity: data.raster.total_intensity(),
        sweep,
        upstream,
        execution_time: start.elapsed().as_secs_f64(),
    }
}

/// Cardinality sweep over the candidate pool of `data`.
pub fn run_sweep(data: &Data, param: &Param, running: &AtomicBool) -> SweepResult {
    let model = CoverageModel::new(&data.raster, &data.zones);
    if model.total() <= 0.0 {
        warn!("The raster holds no intensity: every selection will have a zero coverage.");
    }
    let fixed = data.fixed_indices();
    debug!("Fixed candidates: {:?}", fixed);

    sweep::sweep(&model, data.candidate_len(), &fixed, param, running)
}

/// Upstream segments of every monitoring section of `data`.
pub fn run_upstream(data: &Data, param: &Param) -> Vec<SectionUpstream> {
    if data.sections.is_empty() {
        warn!("No monitoring section loaded: nothing to extract upstream.");
    }
    info!(
        "Extracting upstream segments with a {} unit budget for {} sections",
        param.upstream.budget,
        data.sections.len()
    );
    upstream::extract_all(&data.sections, &data.rivers, &data.confluences, &param.upstream)
}

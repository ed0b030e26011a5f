use crate::cinfo;
use crate::coverage::Fitness;
use crate::ga::{GaConfig, GaError, GeneticAlgorithm, RunOutcome};
use crate::param::Param;
use crate::population::Population;
use crate::utils::mean_and_std;
use log::{error, info, warn};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

/// Outcome of all the restarts for one target cardinality.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SweepStep {
    pub k: usize,
    pub generations: usize,
    pub runs: usize,
    /// Index of the winning restart
    pub best_run: usize,
    pub fitness: f64,
    pub coverage: f64,
    /// Pool indices of the winning selection
    pub selected: Vec<usize>,
    pub run_fitness: Vec<f64>,
    pub coverage_mean: f64,
    pub coverage_std: f64,
    pub best_fit_trace: Vec<f64>,
    /// Generations of the winning run, kept only with `keep_trace`
    #[serde(default)]
    pub populations: Vec<Population>,
    /// Set when the configuration of this cardinality was rejected
    pub error: Option<String>,
}

impl SweepStep {
    fn failed(k: usize, generations: usize, runs: usize, err: &GaError) -> SweepStep {
        SweepStep {
            k,
            generations,
            runs,
            best_run: 0,
            fitness: 0.0,
            coverage: 0.0,
            selected: Vec::new(),
            run_fitness: Vec::new(),
            coverage_mean: 0.0,
            coverage_std: 0.0,
            best_fit_trace: Vec::new(),
            populations: Vec::new(),
            error: Some(err.to_string()),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct SweepResult {
    pub min_points: usize,
    pub max_points: usize,
    pub steps: Vec<SweepStep>,
}

impl SweepResult {
    /// `k -> coverage ratio` for the cardinalities that ran.
    pub fn curve(&self) -> Vec<(usize, f64)> {
        self.steps
            .iter()
            .filter(|s| s.succeeded())
            .map(|s| (s.k, s.coverage))
            .collect()
    }

    pub fn step(&self, k: usize) -> Option<&SweepStep> {
        self.steps.iter().find(|s| s.k == k)
    }

    pub fn failures(&self) -> usize {
        self.steps.iter().filter(|s| !s.succeeded()).count()
    }
}

/// Sweep bounds: `min_points` 0 means the fixed count, `max_points` 0 means
/// `min + increment`, and the upper bound never exceeds the pool.
pub fn resolve_bounds(param: &Param, pool_size: usize, fixed_count: usize) -> (usize, usize) {
    let min = if param.sweep.min_points == 0 {
        fixed_count
    } else {
        param.sweep.min_points
    };
    let mut max = if param.sweep.max_points == 0 {
        min + param.sweep.increment
    } else {
        param.sweep.max_points
    };
    if max > pool_size {
        warn!(
            "max_points={} exceeds the {} candidate points: sweep clamped to {}",
            max, pool_size, pool_size
        );
        max = pool_size;
    }
    (min, max)
}

pub fn cardinalities(min: usize, max: usize, increment: usize) -> Vec<usize> {
    if min > max {
        return Vec::new();
    }
    (min..=max).step_by(increment.max(1)).collect()
}

/// Base budget plus `step` generations per increment above the minimum.
pub fn generation_budget(k: usize, min: usize, increment: usize, base: usize, step: usize) -> usize {
    base + k.saturating_sub(min) / increment.max(1) * step
}

/// Runs the optimizer for every cardinality of the sweep, `runs_per_point_count`
/// times each, and keeps the best run per cardinality (lowest run index on ties).
///
/// Run seeds are drawn in order from the master seed before any run starts, so
/// results do not depend on the number of threads.
pub fn sweep(
    fitness: &dyn Fitness,
    pool_size: usize,
    fixed: &[usize],
    param: &Param,
    running: &AtomicBool,
) -> SweepResult {
    let time = Instant::now();
    let (min, max) = resolve_bounds(param, pool_size, fixed.len());
    let ks = cardinalities(min, max, param.sweep.increment);
    let runs = param.sweep.runs_per_point_count.max(1);
    let mut rng = ChaCha8Rng::seed_from_u64(param.general.seed);

    info!(
        "Sweeping k from {} to {} by {} ({} cardinalities, {} runs each)",
        min,
        max,
        param.sweep.increment,
        ks.len(),
        runs
    );
    if ks.is_empty() {
        warn!("Empty sweep: min_points={} is above max_points={}", min, max);
    }

    let mut result = SweepResult {
        min_points: min,
        max_points: max,
        steps: Vec::new(),
    };

    for k in ks {
        if !running.load(Ordering::Relaxed) {
            info!("Signal received: sweep stopped before k={}", k);
            break;
        }

        let generations = generation_budget(
            k,
            min,
            param.sweep.increment,
            param.sweep.base_generations,
            param.sweep.generations_step,
        );
        let seeds: Vec<u64> = (0..runs).map(|_| rng.next_u64()).collect();

        match run_cardinality(fitness, pool_size, fixed, param, k, generations, &seeds, running) {
            Ok(step) => {
                cinfo!(
                    param.general.display_colorful,
                    "k={:<4} | \x1b[1;92mcoverage {:.2}%\x1b[0m | fit {:.3} | {} generations | runs mean {:.2}% ± {:.2}%",
                    k,
                    step.coverage * 100.0,
                    step.fitness,
                    generations,
                    step.coverage_mean * 100.0,
                    step.coverage_std * 100.0
                );
                result.steps.push(step);
            }
            Err(e) => {
                error!("Sweep step k={} failed: {}", k, e);
                result.steps.push(SweepStep::failed(k, generations, runs, &e));
            }
        }
    }

    info!(
        "Sweep computed {} cardinalities ({} failed) in {:.2?}",
        result.steps.len(),
        result.failures(),
        time.elapsed()
    );
    result
}

#[allow(clippy::too_many_arguments)]
fn run_cardinality(
    fitness: &dyn Fitness,
    pool_size: usize,
    fixed: &[usize],
    param: &Param,
    k: usize,
    generations: usize,
    seeds: &[u64],
    running: &AtomicBool,
) -> Result<SweepStep, GaError> {
    let algorithms = seeds
        .iter()
        .map(|seed| {
            GeneticAlgorithm::new(GaConfig::from_param(
                param,
                pool_size,
                k,
                fixed,
                generations,
                *seed,
            ))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut outcomes: Vec<RunOutcome> = algorithms
        .par_iter()
        .map(|ga| ga.run(fitness, running))
        .collect();

    let mut best_run = 0;
    for (i, outcome) in outcomes.iter().enumerate() {
        if outcome.best.fit > outcomes[best_run].best.fit {
            best_run = i;
        }
    }

    let run_fitness: Vec<f64> = outcomes.iter().map(|o| o.best.fit).collect();
    let coverages: Vec<f64> = outcomes.iter().map(|o| o.best.coverage).collect();
    let (coverage_mean, coverage_std) = mean_and_std(&coverages);

    let winner = outcomes.swap_remove(best_run);

    Ok(SweepStep {
        k,
        generations,
        runs: seeds.len(),
        best_run,
        fitness: winner.best.fit,
        coverage: winner.best.coverage,
        selected: winner.best.selected_indices(),
        run_fitness,
        coverage_mean,
        coverage_std,
        best_fit_trace: winner.best_fit_trace,
        populations: winner.populations,
        error: None,
    })
}

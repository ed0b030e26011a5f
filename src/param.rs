use log::warn;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

// Field definitions and associated default values

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Param {
    #[serde(default)]
    pub general: General,
    #[serde(default)]
    pub data: Data,
    #[serde(default)]
    pub ga: GA,
    #[serde(default)]
    pub sweep: Sweep,
    #[serde(default)]
    pub upstream: Upstream,
    #[serde(default)]
    pub candidates: Candidates,
    #[serde(skip)]
    pub tag: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct General {
    #[serde(default = "seed_default")]
    pub seed: u64,
    #[serde(default = "algorithm_default")]
    pub algo: String,
    #[serde(default = "one_default")]
    pub thread_number: usize,
    #[serde(default = "empty_string")]
    pub log_base: String,
    #[serde(default = "log_suffix_default")]
    pub log_suffix: String,
    #[serde(default = "log_level_default")]
    pub log_level: String,
    #[serde(default = "true_default")]
    pub display_colorful: bool,
    #[serde(default = "false_default")]
    pub keep_trace: bool,
    #[serde(default = "empty_string")]
    pub save_exp: String,
    #[serde(default = "empty_string")]
    pub output_dir: String,
}

/// Input locations and influence-zone construction.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Data {
    #[serde(default = "empty_string")]
    pub rivers: String,
    #[serde(default = "empty_string")]
    pub candidates: String,
    #[serde(default = "empty_string")]
    pub confluences: String,
    #[serde(default = "empty_string")]
    pub sections: String,
    #[serde(default = "empty_string")]
    pub raster: String,
    #[serde(default = "empty_string")]
    pub zones: String,
    #[serde(default = "zone_radius_default")]
    pub zone_radius: f64,
    #[serde(default = "zone_segments_default")]
    pub zone_segments: usize,
    #[serde(default = "false_default")]
    pub clip_raster_to_zones: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct GA {
    #[serde(default = "pop_size_default")]
    pub population_size: usize,
    #[serde(default = "crossover_rate_default")]
    pub crossover_rate: f64,
    #[serde(default = "mutation_rate_default")]
    pub mutation_rate: f64,
    #[serde(default = "ga_elite_pct_default")]
    pub select_elite_pct: f64,
    #[serde(default = "tournament_size_default")]
    pub tournament_size: usize,
    #[serde(default = "uzero_default")]
    pub max_seconds: u64,
}

/// Cardinality sweep driving repeated GA runs.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Sweep {
    #[serde(default = "uzero_default_usize")]
    pub min_points: usize,
    #[serde(default = "increment_default")]
    pub increment: usize,
    #[serde(default = "uzero_default_usize")]
    pub max_points: usize,
    #[serde(default = "base_generations_default")]
    pub base_generations: usize,
    #[serde(default = "generations_step_default")]
    pub generations_step: usize,
    #[serde(default = "runs_per_point_count_default")]
    pub runs_per_point_count: usize,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Upstream {
    #[serde(default = "budget_default")]
    pub budget: f64,
    #[serde(default = "search_radius_default")]
    pub search_radius: f64,
    #[serde(default = "unit_default")]
    pub min_segment_length: f64,
    #[serde(default = "unit_default")]
    pub min_budget: f64,
    #[serde(default = "tolerance_default")]
    pub junction_tolerance: f64,
    #[serde(default = "tolerance_default")]
    pub snap_tolerance: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Candidates {
    #[serde(default = "false_default")]
    pub generate: bool,
    #[serde(default = "interval_default")]
    pub interval: f64,
    #[serde(default = "start_id_default")]
    pub start_id: u64,
}

// Default section definitions

impl Default for General {
    fn default() -> Self {
        serde_json::from_value(serde_json::json!({})).unwrap()
    }
}

impl Default for Data {
    fn default() -> Self {
        serde_json::from_value(serde_json::json!({})).unwrap()
    }
}

impl Default for GA {
    fn default() -> Self {
        serde_json::from_value(serde_json::json!({})).unwrap()
    }
}

impl Default for Sweep {
    fn default() -> Self {
        serde_json::from_value(serde_json::json!({})).unwrap()
    }
}

impl Default for Upstream {
    fn default() -> Self {
        serde_json::from_value(serde_json::json!({})).unwrap()
    }
}

impl Default for Candidates {
    fn default() -> Self {
        serde_json::from_value(serde_json::json!({})).unwrap()
    }
}

impl Default for Param {
    fn default() -> Self {
        serde_json::from_value(serde_json::json!({})).unwrap()
    }
}

/// Reads a parameter file (YAML, or TOML when the extension is `.toml`) and validates it.
pub fn get(param_file: String) -> Result<Param, Box<dyn Error>> {
    let is_toml = Path::new(&param_file)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("toml"))
        .unwrap_or(false);

    let mut param_reader = BufReader::new(File::open(&param_file)?);

    let mut config: Param = if is_toml {
        let mut content = String::new();
        param_reader.read_to_string(&mut content)?;
        toml::from_str(&content)?
    } else {
        serde_yaml::from_reader(param_reader)?
    };
    config.tag = param_file;

    validate(&mut config)?;

    Ok(config)
}

pub fn validate(param: &mut Param) -> Result<(), String> {
    if !param.general.log_base.is_empty() {
        param.general.display_colorful = false;
    }

    match param.general.algo.as_str() {
        "ga" | "upstream" | "both" => {}
        other => {
            return Err(format!(
                "Unknown algo '{}'. Expected one of: ga, upstream, both.",
                other
            ))
        }
    }

    if param.general.thread_number == 0 {
        return Err("thread_number must be at least 1.".to_string());
    }

    validate_ga(param)?;
    validate_sweep(param)?;
    validate_geometry(param)?;

    if param.general.algo != "upstream" && param.data.raster.is_empty() {
        warn!("No raster provided: every selection will capture zero intensity.");
    }

    Ok(())
}

fn validate_ga(param: &Param) -> Result<(), String> {
    if param.ga.population_size < 2 {
        return Err(format!(
            "Invalid population_size={}. At least 2 individuals are required.",
            param.ga.population_size
        ));
    }

    for (name, rate) in [
        ("crossover_rate", param.ga.crossover_rate),
        ("mutation_rate", param.ga.mutation_rate),
    ] {
        if !(0.0..=1.0).contains(&rate) {
            return Err(format!("Invalid {}={:.3}. Must be in range [0, 1].", name, rate));
        }
    }

    if !(0.0..=100.0).contains(&param.ga.select_elite_pct) {
        return Err(format!(
            "Invalid select_elite_pct={:.3}. Must be in range [0, 100].",
            param.ga.select_elite_pct
        ));
    }

    if param.ga.tournament_size == 0 {
        return Err("tournament_size must be at least 1.".to_string());
    }

    if param.ga.mutation_rate > 0.5 {
        warn!(
            "mutation_rate={:.2} flips most free genes every generation; the search will behave close to random sampling.",
            param.ga.mutation_rate
        );
    }

    Ok(())
}

fn validate_sweep(param: &Param) -> Result<(), String> {
    if param.sweep.increment == 0 {
        return Err("sweep.increment must be at least 1.".to_string());
    }
    if param.sweep.runs_per_point_count == 0 {
        return Err("sweep.runs_per_point_count must be at least 1.".to_string());
    }
    if param.sweep.max_points > 0 && param.sweep.max_points < param.sweep.min_points {
        return Err(format!(
            "sweep.max_points={} is lower than sweep.min_points={}.",
            param.sweep.max_points, param.sweep.min_points
        ));
    }
    if param.sweep.base_generations == 0 {
        warn!("sweep.base_generations=0: the first cardinality will only evaluate its initial population.");
    }
    Ok(())
}

fn validate_geometry(param: &Param) -> Result<(), String> {
    if param.data.zone_radius <= 0.0 {
        return Err(format!(
            "Invalid zone_radius={:.3}. Must be > 0.",
            param.data.zone_radius
        ));
    }
    if param.data.zone_segments < 3 {
        return Err(format!(
            "Invalid zone_segments={}. A buffer needs at least 3 vertices.",
            param.data.zone_segments
        ));
    }

    let u = &param.upstream;
    for (name, value) in [
        ("upstream.budget", u.budget),
        ("upstream.search_radius", u.search_radius),
        ("upstream.min_segment_length", u.min_segment_length),
        ("upstream.min_budget", u.min_budget),
        ("upstream.junction_tolerance", u.junction_tolerance),
        ("upstream.snap_tolerance", u.snap_tolerance),
    ] {
        if value < 0.0 || value.is_nan() {
            return Err(format!("Invalid {}={}. Must be >= 0.", name, value));
        }
    }

    if param.candidates.generate && param.candidates.interval <= 0.0 {
        return Err(format!(
            "Invalid candidates.interval={:.3}. Must be > 0.",
            param.candidates.interval
        ));
    }

    Ok(())
}

// Default value definitions

fn seed_default() -> u64 {
    4815162342
}
fn empty_string() -> String {
    "".to_string()
}
fn algorithm_default() -> String {
    "ga".to_string()
}
fn log_suffix_default() -> String {
    "log".to_string()
}
fn log_level_default() -> String {
    "info".to_string()
}
fn false_default() -> bool {
    false
}
fn true_default() -> bool {
    true
}
fn one_default() -> usize {
    1
}
fn uzero_default() -> u64 {
    0
}
fn uzero_default_usize() -> usize {
    0
}
fn zone_radius_default() -> f64 {
    1000.0
}
fn zone_segments_default() -> usize {
    32
}
fn pop_size_default() -> usize {
    50
}
fn crossover_rate_default() -> f64 {
    0.8
}
fn mutation_rate_default() -> f64 {
    0.08
}
fn ga_elite_pct_default() -> f64 {
    2.0
}
fn tournament_size_default() -> usize {
    3
}
fn increment_default() -> usize {
    22
}
fn base_generations_default() -> usize {
    50
}
fn generations_step_default() -> usize {
    10
}
fn runs_per_point_count_default() -> usize {
    2
}
fn budget_default() -> f64 {
    2000.0
}
fn search_radius_default() -> f64 {
    50.0
}
fn unit_default() -> f64 {
    1.0
}
fn tolerance_default() -> f64 {
    1e-6
}
fn interval_default() -> f64 {
    10000.0
}
fn start_id_default() -> u64 {
    7
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_follow_reference_schedule() {
        let param = Param::default();
        assert_eq!(param.ga.population_size, 50);
        assert_eq!(param.ga.crossover_rate, 0.8);
        assert_eq!(param.ga.mutation_rate, 0.08);
        assert_eq!(param.sweep.increment, 22);
        assert_eq!(param.sweep.base_generations, 50);
        assert_eq!(param.sweep.generations_step, 10);
        assert_eq!(param.sweep.runs_per_point_count, 2);
        assert_eq!(param.upstream.budget, 2000.0);
        assert_eq!(param.upstream.search_radius, 50.0);
    }

    #[test]
    fn test_validate_rejects_bad_rates() {
        let mut param = Param::default();
        param.ga.crossover_rate = 1.5;
        assert!(validate(&mut param).is_err());

        let mut param = Param::default();
        param.ga.mutation_rate = -0.1;
        assert!(validate(&mut param).is_err());
    }

    #[test]
    fn test_validate_rejects_unknown_algo() {
        let mut param = Param::default();
        param.general.algo = "beam".to_string();
        let err = validate(&mut param).unwrap_err();
        assert!(err.contains("beam"));
    }

    #[test]
    fn test_validate_rejects_zero_increment() {
        let mut param = Param::default();
        param.sweep.increment = 0;
        assert!(validate(&mut param).is_err());
    }

    #[test]
    fn test_log_base_disables_colors() {
        let mut param = Param::default();
        param.general.log_base = "run".to_string();
        validate(&mut param).unwrap();
        assert!(!param.general.display_colorful);
    }

    #[test]
    fn test_get_reads_partial_yaml() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "general:\n  seed: 42\n  algo: both\nga:\n  population_size: 20\nsweep:\n  increment: 2").unwrap();

        let param = get(file.path().to_string_lossy().to_string()).unwrap();
        assert_eq!(param.general.seed, 42);
        assert_eq!(param.general.algo, "both");
        assert_eq!(param.ga.population_size, 20);
        assert_eq!(param.sweep.increment, 2);
        // untouched sections keep their defaults
        assert_eq!(param.ga.mutation_rate, 0.08);
        assert_eq!(param.upstream.min_budget, 1.0);
    }

    #[test]
    fn test_get_reads_toml() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[upstream]\nbudget = 500.0\n\n[ga]\nmutation_rate = 0.1").unwrap();

        let param = get(file.path().to_string_lossy().to_string()).unwrap();
        assert_eq!(param.upstream.budget, 500.0);
        assert_eq!(param.ga.mutation_rate, 0.1);
    }
}

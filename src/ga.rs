use crate::coverage::Fitness;
use crate::individual::{Cardinality, Individual};
use crate::param::Param;
use crate::population::Population;
use crate::utils::display_generation;
use log::{debug, info};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use thiserror::Error;

/// Configuration problems detected before a run starts.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GaError {
    #[error("the candidate pool is empty")]
    EmptyPool,
    #[error("fixed index {index} is outside the candidate pool of {n} points")]
    FixedIndexOutOfRange { index: usize, n: usize },
    #[error("target cardinality {k} is lower than the number of fixed points ({fixed})")]
    CardinalityBelowFixed { k: usize, fixed: usize },
    #[error("target cardinality {k} exceeds the candidate pool of {n} points")]
    CardinalityAbovePool { k: usize, n: usize },
    #[error("population size {0} is too small: at least 2 individuals are required")]
    PopulationTooSmall(usize),
    #[error("invalid {name}={value}: must be in range [0, 1]")]
    InvalidRate { name: &'static str, value: f64 },
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct GaConfig {
    pub population_size: usize,
    pub num_candidates: usize,
    pub crossover_rate: f64,
    pub mutation_rate: f64,
    pub max_generations: usize,
    /// Target cardinality k, fixed points included
    pub num_selected_points: usize,
    pub fixed_indices: Vec<usize>,
    pub elite_pct: f64,
    pub tournament_size: usize,
    pub seed: u64,
    /// Wall-clock limit of one run, 0 for none
    pub max_seconds: u64,
    pub keep_trace: bool,
}

impl GaConfig {
    pub fn from_param(
        param: &Param,
        num_candidates: usize,
        num_selected_points: usize,
        fixed_indices: &[usize],
        max_generations: usize,
        seed: u64,
    ) -> GaConfig {
        GaConfig {
            population_size: param.ga.population_size,
            num_candidates,
            crossover_rate: param.ga.crossover_rate,
            mutation_rate: param.ga.mutation_rate,
            max_generations,
            num_selected_points,
            fixed_indices: fixed_indices.to_vec(),
            elite_pct: param.ga.select_elite_pct,
            tournament_size: param.ga.tournament_size,
            seed,
            max_seconds: param.ga.max_seconds,
            keep_trace: param.general.keep_trace,
        }
    }
}

/// Everything a run produces besides its best individual.
#[derive(Clone, Debug)]
pub struct RunOutcome {
    pub best: Individual,
    /// Best fitness seen after the initial population and after each generation
    pub best_fit_trace: Vec<f64>,
    pub generations: usize,
    /// One population per generation, only when `keep_trace` is set
    pub populations: Vec<Population>,
}

pub struct GeneticAlgorithm {
    config: GaConfig,
    constraint: Cardinality,
}

impl GeneticAlgorithm {
    /// Checks the configuration; nothing runs when it is invalid.
    pub fn new(config: GaConfig) -> Result<GeneticAlgorithm, GaError> {
        if config.population_size < 2 {
            return Err(GaError::PopulationTooSmall(config.population_size));
        }
        for (name, value) in [
            ("crossover_rate", config.crossover_rate),
            ("mutation_rate", config.mutation_rate),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(GaError::InvalidRate { name, value });
            }
        }
        let constraint = Cardinality::new(
            config.num_candidates,
            config.num_selected_points,
            &config.fixed_indices,
        )?;
        Ok(GeneticAlgorithm { config, constraint })
    }

    pub fn config(&self) -> &GaConfig {
        &self.config
    }

    pub fn constraint(&self) -> &Cardinality {
        &self.constraint
    }

    /// Runs the search and returns its best individual.
    pub fn evolve(&self, fitness: &dyn Fitness, running: &AtomicBool) -> Individual {
        self.run(fitness, running).best
    }

    /// Runs the search until `max_generations`, a cleared `running` flag or the
    /// wall-clock limit; an interrupted run still returns its best individual.
    pub fn run(&self, fitness: &dyn Fitness, running: &AtomicBool) -> RunOutcome {
        let time = Instant::now();
        let config = &self.config;
        let mut rng = ChaCha8Rng::seed_from_u64(config.seed);

        let mut pop = generate_pop(&self.constraint, config.population_size, &mut rng);
        pop.fit(fitness);
        pop = pop.sort();

        let mut best = pop.individuals[0].clone();
        let mut best_fit_trace = vec![best.fit];
        let mut populations = Vec::new();
        if config.keep_trace {
            populations.push(pop.clone());
        }

        let mut generation = 0;
        while generation < config.max_generations {
            if !running.load(Ordering::Relaxed) {
                info!("Signal received: stopping run after {} generations", generation);
                break;
            }
            if config.max_seconds > 0 && time.elapsed().as_secs() >= config.max_seconds {
                info!("Time limit of {}s reached after {} generations", config.max_seconds, generation);
                break;
            }

            generation += 1;
            pop = next_generation(pop, &self.constraint, config, fitness, generation, &mut rng);

            // strict improvement only: ties keep the first individual found
            if pop.individuals[0].fit > best.fit {
                best = pop.individuals[0].clone();
            }
            best_fit_trace.push(best.fit);

            debug!("{}", display_generation(&pop, generation, config.max_generations));

            if config.keep_trace {
                populations.push(pop.clone());
            }
        }

        debug!(
            "Run k={} seed={} computed {} generations in {:.2?}: best fit {:.3}",
            config.num_selected_points,
            config.seed,
            generation,
            time.elapsed(),
            best.fit
        );

        RunOutcome {
            best,
            best_fit_trace,
            generations: generation,
            populations,
        }
    }
}

/// Random valid initial population
pub fn generate_pop(constraint: &Cardinality, population_size: usize, rng: &mut ChaCha8Rng) -> Population {
    let mut pop = Population::new();
    pop.generate(population_size, constraint, rng);
    pop
}

/// Run one evolution step: elitism, tournament selection, cross-over, mutation, repair, fitting
///
/// # Arguments
///
/// * `pop` - The current population, sorted by decreasing fitness.
/// * `constraint` - Cardinality rule every child is repaired to.
/// * `config` - Rates and sizes of the run.
/// * `fitness` - Objective used to score children whose genes changed.
/// * `epoch` - The current generation number.
/// * `rng` - Random number generator of the run.
///
/// # Returns
///
/// The next generation, same size, sorted by decreasing fitness, elites first on ties.
pub fn next_generation(
    pop: Population,
    constraint: &Cardinality,
    config: &GaConfig,
    fitness: &dyn Fitness,
    epoch: usize,
    rng: &mut ChaCha8Rng,
) -> Population {
    let (mut new_pop, n_elite) = pop.select_first_pct(config.elite_pct);
    let children_to_create = config.population_size.saturating_sub(n_elite);

    let mut children = Population::new();
    while children.individuals.len() < children_to_create {
        let p1 = select_parent(&pop, config.tournament_size, rng);
        let p2 = select_parent(&pop, config.tournament_size, rng);
        let (c1, c2) = cross_over(p1, p2, config.crossover_rate, rng);

        for (mut child, origin) in [(c1, p1), (c2, p2)] {
            if children.individuals.len() == children_to_create {
                break;
            }
            child.repair(constraint, rng);
            mutate(&mut child, constraint, config.mutation_rate, rng);
            child.repair(constraint, rng);

            child.epoch = epoch;
            child.compute_hash();
            if child.genes == origin.genes {
                child.inherit_fit(origin);
            }
            children.individuals.push(child);
        }
    }

    debug!(
        "Generation {}: {} children, {} to evaluate",
        epoch,
        children.individuals.len(),
        children.individuals.iter().filter(|i| !i.fitted).count()
    );
    children.fit(fitness);

    new_pop.add(children);
    new_pop.sort()
}

/// Tournament among `size` individuals drawn with replacement.
///
/// The population being sorted, the winner is the lowest drawn rank, so a
/// fitter individual is never less likely to be picked and ties go to the
/// earlier one.
pub fn select_parent<'a>(pop: &'a Population, size: usize, rng: &mut ChaCha8Rng) -> &'a Individual {
    let len = pop.individuals.len();
    let winner = (0..size.max(1))
        .map(|_| rng.gen_range(0..len))
        .min()
        .unwrap_or(0);
    &pop.individuals[winner]
}

/// Two-point crossover applied with probability `rate`; otherwise both parents are copied.
pub fn cross_over(
    p1: &Individual,
    p2: &Individual,
    rate: f64,
    rng: &mut ChaCha8Rng,
) -> (Individual, Individual) {
    let mut c1 = Individual::child(p1);
    let mut c2 = Individual::child(p2);
    let n = c1.genes.len();

    if n >= 2 && rng.gen_bool(rate) {
        let a = rng.gen_range(0..n);
        let b = rng.gen_range(0..n);
        let (start, end) = if a <= b { (a, b + 1) } else { (b, a + 1) };
        for i in start..end {
            std::mem::swap(&mut c1.genes[i], &mut c2.genes[i]);
        }
    }

    c1.parents = Some(vec![p1.hash, p2.hash]);
    c2.parents = Some(vec![p2.hash, p1.hash]);
    (c1, c2)
}

/// Flips each free gene with probability `rate`; fixed genes are never touched.
pub fn mutate(individual: &mut Individual, constraint: &Cardinality, rate: f64, rng: &mut ChaCha8Rng) {
    if rate <= 0.0 {
        return;
    }
    for &i in &constraint.free {
        if rng.gen_bool(rate) {
            individual.genes[i] = 1 - individual.genes[i];
        }
    }
    individual.count_k();
}

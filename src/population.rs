use crate::coverage::Fitness;
use crate::individual::{Cardinality, Individual};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

#[derive(Clone, Serialize, Deserialize, PartialEq)]
pub struct Population {
    pub individuals: Vec<Individual>,
}

impl Population {
    pub fn new() -> Population {
        Population {
            individuals: Vec::new(),
        }
    }

    /// populate the population with random valid selections
    pub fn generate(&mut self, population_size: usize, constraint: &Cardinality, rng: &mut ChaCha8Rng) {
        for _ in 0..population_size {
            self.individuals
                .push(Individual::random_select_k(constraint, rng))
        }
    }

    /// Evaluates, in parallel, the individuals whose fitness is stale.
    pub fn fit(&mut self, fitness: &dyn Fitness) {
        self.individuals
            .par_iter_mut()
            .filter(|i| !i.fitted)
            .for_each(|i| i.fit(fitness));
    }

    /// Stable sort by decreasing fitness: equal fitness keeps the current order.
    pub fn sort(mut self) -> Self {
        self.individuals
            .sort_by(|i, j| j.fit.partial_cmp(&i.fit).unwrap_or(Ordering::Equal));
        self
    }

    /// add some individuals in the population
    pub fn add(&mut self, population: Population) {
        self.individuals.extend(population.individuals);
    }

    /// select first element of a (sorted) population, at least one when not empty
    pub fn select_first_pct(&self, pct: f64) -> (Population, usize) {
        let n = ((self.individuals.len() as f64 * pct / 100.0) as usize)
            .max(1)
            .min(self.individuals.len());

        (
            Population {
                individuals: self.individuals.iter().take(n).cloned().collect(),
            },
            n,
        )
    }
}

impl fmt::Debug for Population {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Population")
            .field("individuals", &self.individuals)
            .finish()
    }
}

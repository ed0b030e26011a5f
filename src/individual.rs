use crate::coverage::Fitness;
use crate::ga::GaError;
use rand::seq::index::sample;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Cardinality and fixed-inclusion rule shared by every individual of a run.
#[derive(Clone, Debug, PartialEq)]
pub struct Cardinality {
    /// Size of the candidate pool
    pub n: usize,
    /// Target number of selected points, fixed ones included
    pub k: usize,
    /// Sorted, deduplicated fixed indices
    pub fixed: Vec<usize>,
    /// Sorted indices of the non-fixed candidates
    pub free: Vec<usize>,
    fixed_mask: Vec<bool>,
}

impl Cardinality {
    pub fn new(n: usize, k: usize, fixed: &[usize]) -> Result<Cardinality, GaError> {
        if n == 0 {
            return Err(GaError::EmptyPool);
        }
        if let Some(&index) = fixed.iter().find(|i| **i >= n) {
            return Err(GaError::FixedIndexOutOfRange { index, n });
        }

        let mut fixed = fixed.to_vec();
        fixed.sort_unstable();
        fixed.dedup();

        if k < fixed.len() {
            return Err(GaError::CardinalityBelowFixed {
                k,
                fixed: fixed.len(),
            });
        }
        if k > n {
            return Err(GaError::CardinalityAbovePool { k, n });
        }

        let mut fixed_mask = vec![false; n];
        for &i in &fixed {
            fixed_mask[i] = true;
        }
        let free = (0..n).filter(|i| !fixed_mask[*i]).collect();

        Ok(Cardinality {
            n,
            k,
            fixed,
            free,
            fixed_mask,
        })
    }

    /// Number of free genes that must be set.
    pub fn free_target(&self) -> usize {
        self.k - self.fixed.len()
    }

    pub fn is_fixed(&self, idx: usize) -> bool {
        self.fixed_mask[idx]
    }

    pub fn satisfied_by(&self, genes: &[u8]) -> bool {
        genes.len() == self.n
            && self.fixed.iter().all(|i| genes[*i] == 1)
            && genes.iter().filter(|g| **g == 1).count() == self.k
    }
}

#[derive(Clone, Serialize, Deserialize, PartialEq)]
pub struct Individual {
    /// One binary gene per candidate point, 1 meaning selected
    pub genes: Vec<u8>,
    /// Number of selected points
    pub k: usize,
    /// Captured intensity
    pub fit: f64,
    /// Captured intensity divided by the total intensity of the raster
    pub coverage: f64,
    /// Generation that produced this selection
    pub epoch: usize,
    pub parents: Option<Vec<u64>>,
    pub hash: u64,
    /// Whether `fit` matches `genes`
    #[serde(skip)]
    pub fitted: bool,
}

impl Individual {
    pub fn new(n: usize) -> Individual {
        Individual {
            genes: vec![0; n],
            k: 0,
            fit: 0.0,
            coverage: 0.0,
            epoch: 0,
            parents: None,
            hash: 0,
            fitted: false,
        }
    }

    /// Fixed genes set, plus `k - |fixed|` free genes drawn uniformly.
    pub fn random_select_k(constraint: &Cardinality, rng: &mut ChaCha8Rng) -> Individual {
        let mut i = Individual::new(constraint.n);
        for &f in &constraint.fixed {
            i.genes[f] = 1;
        }
        for pos in sample(rng, constraint.free.len(), constraint.free_target()) {
            i.genes[constraint.free[pos]] = 1;
        }
        i.count_k();
        i.compute_hash();
        i
    }

    /// Offspring template: same genes, no fitness yet.
    pub fn child(main_parent: &Individual) -> Individual {
        let mut i = Individual::new(main_parent.genes.len());
        i.genes = main_parent.genes.clone();
        i.k = main_parent.k;
        i
    }

    /// Restores the cardinality rule: fixed genes back to 1, then free genes
    /// cleared or set at random until exactly `k - |fixed|` of them are selected.
    /// Every eligible free gene has the same chance of being flipped.
    pub fn repair(&mut self, constraint: &Cardinality, rng: &mut ChaCha8Rng) {
        for &f in &constraint.fixed {
            self.genes[f] = 1;
        }

        let (selected, unselected): (Vec<usize>, Vec<usize>) = constraint
            .free
            .iter()
            .copied()
            .partition(|i| self.genes[*i] == 1);
        let target = constraint.free_target();

        if selected.len() > target {
            for pos in sample(rng, selected.len(), selected.len() - target) {
                self.genes[selected[pos]] = 0;
            }
        } else if selected.len() < target {
            for pos in sample(rng, unselected.len(), target - selected.len()) {
                self.genes[unselected[pos]] = 1;
            }
        }
        self.count_k();
    }

    pub fn count_k(&mut self) {
        self.k = self.genes.iter().filter(|g| **g == 1).count();
    }

    pub fn compute_hash(&mut self) {
        let mut hasher = DefaultHasher::new();
        self.genes.hash(&mut hasher);
        self.hash = hasher.finish();
    }

    pub fn fit(&mut self, fitness: &dyn Fitness) {
        self.fit = fitness.captured(&self.genes);
        self.coverage = fitness.coverage(self.fit);
        self.fitted = true;
    }

    /// Takes over the score of an individual carrying the same genes.
    pub fn inherit_fit(&mut self, other: &Individual) {
        self.fit = other.fit;
        self.coverage = other.coverage;
        self.fitted = other.fitted;
    }

    pub fn selected_indices(&self) -> Vec<usize> {
        self.genes
            .iter()
            .enumerate()
            .filter(|(_, g)| **g == 1)
            .map(|(i, _)| i)
            .collect()
    }
}

impl fmt::Debug for Individual {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Individual(k={}, fit={:.3}, coverage={:.4}, epoch={}, selected={:?})",
            self.k,
            self.fit,
            self.coverage,
            self.epoch,
            self.selected_indices()
        )
    }
}

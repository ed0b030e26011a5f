use crate::raster::ActivityRaster;
use geo::Polygon;
use log::debug;
use rayon::prelude::*;

/// Objective evaluated by the optimizer on a selection vector.
pub trait Fitness: Sync {
    /// Intensity captured by the genes set to 1.
    fn captured(&self, genes: &[u8]) -> f64;

    /// Reference intensity used to turn a fitness into a coverage ratio.
    fn total(&self) -> f64;

    fn coverage(&self, fit: f64) -> f64 {
        let total = self.total();
        if total > 0.0 && total.is_finite() {
            (fit / total).clamp(0.0, 1.0)
        } else {
            0.0
        }
    }
}

/// Precomputed cell membership of every influence zone.
///
/// Fitness is the sum of the intensity of the union of the selected zones'
/// cells: a cell covered by several selected zones is counted once.
pub struct CoverageModel {
    zone_cells: Vec<Vec<usize>>,
    values: Vec<f64>,
    total: f64,
}

impl CoverageModel {
    pub fn new(raster: &ActivityRaster, zones: &[Polygon<f64>]) -> CoverageModel {
        let zone_cells: Vec<Vec<usize>> = zones.par_iter().map(|z| raster.cells_within(z)).collect();
        let values = (0..raster.cell_count()).map(|c| raster.intensity(c)).collect();
        let total = raster.total_intensity();

        debug!(
            "Coverage model: {} zones, {} cells referenced, total intensity {:.3}",
            zone_cells.len(),
            zone_cells.iter().map(|c| c.len()).sum::<usize>(),
            total
        );

        CoverageModel {
            zone_cells,
            values,
            total,
        }
    }

    pub fn zone_len(&self) -> usize {
        self.zone_cells.len()
    }

    /// Cells of the raster inside the zone of candidate `idx`.
    pub fn zone_cells(&self, idx: usize) -> &[usize] {
        &self.zone_cells[idx]
    }
}

impl Fitness for CoverageModel {
    fn captured(&self, genes: &[u8]) -> f64 {
        let mut cells: Vec<usize> = genes
            .iter()
            .zip(self.zone_cells.iter())
            .filter(|(g, _)| **g == 1)
            .flat_map(|(_, cells)| cells.iter().copied())
            .collect();
        cells.sort_unstable();
        cells.dedup();
        cells.iter().map(|c| self.values[*c]).sum()
    }

    fn total(&self) -> f64 {
        self.total
    }
}

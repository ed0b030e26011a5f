use geo::{BoundingRect, Contains, Coord, MultiPolygon, Polygon, Rect};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader};

/// Human-activity intensity grid.
///
/// Cells are stored row-major starting from the upper-left corner. A cell
/// belongs to a zone when its center falls inside the zone.
#[derive(Clone, Serialize, Deserialize, PartialEq)]
pub struct ActivityRaster {
    pub width: usize,
    pub height: usize,
    /// x of the left edge of the grid
    pub origin_x: f64,
    /// y of the top edge of the grid
    pub origin_y: f64,
    pub cell_size: f64,
    pub nodata: Option<f64>,
    pub values: Vec<f64>,
}

impl ActivityRaster {
    pub fn new(
        width: usize,
        height: usize,
        origin_x: f64,
        origin_y: f64,
        cell_size: f64,
        nodata: Option<f64>,
        values: Vec<f64>,
    ) -> Result<ActivityRaster, String> {
        if values.len() != width * height {
            return Err(format!(
                "Raster of {}x{} cells needs {} values, got {}",
                width,
                height,
                width * height,
                values.len()
            ));
        }
        if cell_size <= 0.0 {
            return Err(format!("Invalid cell size {}", cell_size));
        }
        Ok(ActivityRaster {
            width,
            height,
            origin_x,
            origin_y,
            cell_size,
            nodata,
            values,
        })
    }

    /// An empty raster: every lookup yields zero intensity.
    pub fn empty() -> ActivityRaster {
        ActivityRaster {
            width: 0,
            height: 0,
            origin_x: 0.0,
            origin_y: 0.0,
            cell_size: 1.0,
            nodata: None,
            values: Vec::new(),
        }
    }

    pub fn cell_count(&self) -> usize {
        self.values.len()
    }

    pub fn is_nodata(&self, value: f64) -> bool {
        value.is_nan() || self.nodata.map_or(false, |nd| value == nd)
    }

    /// Intensity of one cell, no-data counting as zero.
    pub fn intensity(&self, cell: usize) -> f64 {
        match self.values.get(cell) {
            Some(&v) if !self.is_nodata(v) => v,
            _ => 0.0,
        }
    }

    /// Sum of every valid cell.
    pub fn total_intensity(&self) -> f64 {
        self.values
            .iter()
            .filter(|v| !self.is_nodata(**v))
            .sum()
    }

    pub fn cell_center(&self, col: usize, row: usize) -> Coord<f64> {
        Coord {
            x: self.origin_x + (col as f64 + 0.5) * self.cell_size,
            y: self.origin_y - (row as f64 + 0.5) * self.cell_size,
        }
    }

    // Column/row window of cells whose centers may fall inside `rect`.
    fn window(&self, rect: &Rect<f64>) -> Option<(usize, usize, usize, usize)> {
        if self.width == 0 || self.height == 0 {
            return None;
        }
        let col_min = ((rect.min().x - self.origin_x) / self.cell_size - 0.5).ceil().max(0.0);
        let col_max = ((rect.max().x - self.origin_x) / self.cell_size - 0.5).floor();
        let row_min = ((self.origin_y - rect.max().y) / self.cell_size - 0.5).ceil().max(0.0);
        let row_max = ((self.origin_y - rect.min().y) / self.cell_size - 0.5).floor();
        if col_max < 0.0 || row_max < 0.0 {
            return None;
        }
        let col_max = (col_max as usize).min(self.width - 1);
        let row_max = (row_max as usize).min(self.height - 1);
        let (col_min, row_min) = (col_min as usize, row_min as usize);
        if col_min > col_max || row_min > row_max {
            return None;
        }
        Some((col_min, col_max, row_min, row_max))
    }

    /// Indices of the valid cells whose centers lie inside `zone`.
    pub fn cells_within(&self, zone: &Polygon<f64>) -> Vec<usize> {
        let rect = match zone.bounding_rect() {
            Some(rect) => rect,
            None => return Vec::new(),
        };
        let (col_min, col_max, row_min, row_max) = match self.window(&rect) {
            Some(w) => w,
            None => return Vec::new(),
        };

        let mut cells = Vec::new();
        for row in row_min..=row_max {
            for col in col_min..=col_max {
                let idx = row * self.width + col;
                if self.is_nodata(self.values[idx]) {
                    continue;
                }
                if zone.contains(&self.cell_center(col, row)) {
                    cells.push(idx);
                }
            }
        }
        cells
    }

    /// Crops the raster to the extent of `zones` and masks every cell outside them to no-data.
    pub fn clip(&self, zones: &MultiPolygon<f64>) -> ActivityRaster {
        let rect = match zones.bounding_rect() {
            Some(rect) => rect,
            None => return ActivityRaster::empty(),
        };
        let (col_min, col_max, row_min, row_max) = match self.window(&rect) {
            Some(w) => w,
            None => return ActivityRaster::empty(),
        };

        let nodata = self.nodata.unwrap_or(f64::NAN);
        let width = col_max - col_min + 1;
        let height = row_max - row_min + 1;
        let mut values = Vec::with_capacity(width * height);
        for row in row_min..=row_max {
            for col in col_min..=col_max {
                let center = self.cell_center(col, row);
                if zones.iter().any(|zone| zone.contains(&center)) {
                    values.push(self.values[row * self.width + col]);
                } else {
                    values.push(nodata);
                }
            }
        }
        debug!("Clipped raster to {}x{} cells", width, height);

        ActivityRaster {
            width,
            height,
            origin_x: self.origin_x + col_min as f64 * self.cell_size,
            origin_y: self.origin_y - row_min as f64 * self.cell_size,
            cell_size: self.cell_size,
            nodata: Some(nodata),
            values,
        }
    }

    /// Loads an ESRI ASCII grid.
    pub fn load_ascii_grid(path: &str) -> Result<ActivityRaster, Box<dyn Error>> {
        info!("Loading raster {}...", path);
        let reader = BufReader::new(File::open(path)?);

        let mut ncols: Option<usize> = None;
        let mut nrows: Option<usize> = None;
        let mut x_corner: Option<f64> = None;
        let mut y_corner: Option<f64> = None;
        let mut centered = false;
        let mut cell_size: Option<f64> = None;
        let mut nodata: Option<f64> = None;
        let mut values: Vec<f64> = Vec::new();

        for line in reader.lines() {
            let line = line?;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let first = trimmed.split_whitespace().next().unwrap_or("");
            if values.is_empty() && first.chars().next().map_or(false, |c| c.is_ascii_alphabetic()) {
                let value = trimmed
                    .split_whitespace()
                    .nth(1)
                    .ok_or_else(|| format!("Missing value for header {}", first))?;
                match first.to_ascii_lowercase().as_str() {
                    "ncols" => ncols = Some(value.parse()?),
                    "nrows" => nrows = Some(value.parse()?),
                    "xllcorner" => x_corner = Some(value.parse()?),
                    "yllcorner" => y_corner = Some(value.parse()?),
                    "xllcenter" => {
                        x_corner = Some(value.parse()?);
                        centered = true;
                    }
                    "yllcenter" => {
                        y_corner = Some(value.parse()?);
                        centered = true;
                    }
                    "cellsize" => cell_size = Some(value.parse()?),
                    "nodata_value" => nodata = Some(value.parse()?),
                    other => return Err(format!("Unknown raster header {}", other).into()),
                }
                continue;
            }
            for field in trimmed.split_whitespace() {
                values.push(field.parse()?);
            }
        }

        let width = ncols.ok_or("Missing ncols header")?;
        let height = nrows.ok_or("Missing nrows header")?;
        let cell_size = cell_size.ok_or("Missing cellsize header")?;
        let mut x_ll = x_corner.ok_or("Missing xllcorner header")?;
        let mut y_ll = y_corner.ok_or("Missing yllcorner header")?;
        if centered {
            x_ll -= cell_size / 2.0;
            y_ll -= cell_size / 2.0;
        }

        let raster = ActivityRaster::new(
            width,
            height,
            x_ll,
            y_ll + height as f64 * cell_size,
            cell_size,
            nodata,
            values,
        )?;
        Ok(raster)
    }
}

impl fmt::Debug for ActivityRaster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let valid = self.values.iter().filter(|v| !self.is_nodata(**v)).count();
        write!(
            f,
            "ActivityRaster {}x{} (cell {}, origin {:.1},{:.1}): {} valid cells, total intensity {:.3}",
            self.width,
            self.height,
            self.cell_size,
            self.origin_x,
            self.origin_y,
            valid,
            self.total_intensity()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::LineString;
    use std::io::Write;

    // 4x4 grid of unit cells, upper-left corner at (0, 4), value = index
    fn create_test_raster() -> ActivityRaster {
        ActivityRaster::new(4, 4, 0.0, 4.0, 1.0, Some(-9999.0), (0..16).map(|v| v as f64).collect()).unwrap()
    }

    fn square(x0: f64, y0: f64, x1: f64, y1: f64) -> Polygon<f64> {
        Polygon::new(
            LineString::from(vec![(x0, y0), (x1, y0), (x1, y1), (x0, y1), (x0, y0)]),
            vec![],
        )
    }

    #[test]
    fn test_total_intensity_skips_nodata() {
        let mut raster = create_test_raster();
        assert_eq!(raster.total_intensity(), 120.0);
        raster.values[15] = -9999.0;
        assert_eq!(raster.total_intensity(), 105.0);
        raster.values[14] = f64::NAN;
        assert_eq!(raster.total_intensity(), 91.0);
    }

    #[test]
    fn test_cells_within_uses_cell_centers() {
        let raster = create_test_raster();
        // upper-left 2x2 block: rows 0-1, cols 0-1
        let cells = raster.cells_within(&square(0.0, 2.0, 2.0, 4.0));
        assert_eq!(cells, vec![0, 1, 4, 5]);
        // a zone that touches no center
        assert!(raster.cells_within(&square(0.1, 0.1, 0.4, 0.4)).is_empty());
        // a zone outside the grid
        assert!(raster.cells_within(&square(10.0, 10.0, 12.0, 12.0)).is_empty());
    }

    #[test]
    fn test_clip_masks_outside_and_crops() {
        let raster = create_test_raster();
        let zones = MultiPolygon::new(vec![square(1.0, 1.0, 3.0, 3.0)]);
        let clipped = raster.clip(&zones);
        assert_eq!((clipped.width, clipped.height), (2, 2));
        assert_eq!(clipped.origin_x, 1.0);
        assert_eq!(clipped.origin_y, 3.0);
        assert_eq!(clipped.total_intensity(), 5.0 + 6.0 + 9.0 + 10.0);

        let far = MultiPolygon::new(vec![square(20.0, 20.0, 21.0, 21.0)]);
        assert_eq!(raster.clip(&far).cell_count(), 0);
    }

    #[test]
    fn test_load_ascii_grid() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "ncols 3\nnrows 2\nxllcorner 100.0\nyllcorner 200.0\ncellsize 10\nNODATA_value -1\n1 2 -1\n4 5 6"
        )
        .unwrap();
        let raster = ActivityRaster::load_ascii_grid(&file.path().to_string_lossy()).unwrap();
        assert_eq!((raster.width, raster.height), (3, 2));
        assert_eq!(raster.origin_y, 220.0);
        assert_eq!(raster.total_intensity(), 18.0);
        assert_eq!(raster.values, vec![1.0, 2.0, -1.0, 4.0, 5.0, 6.0]);
        assert!(raster.is_nodata(raster.values[2]));
        assert_eq!(raster.intensity(2), 0.0);
    }

    #[test]
    fn test_all_nodata_raster_has_zero_total() {
        let raster = ActivityRaster::new(2, 2, 0.0, 2.0, 1.0, Some(0.0), vec![0.0; 4]).unwrap();
        assert_eq!(raster.total_intensity(), 0.0);
        assert!(raster.cells_within(&square(0.0, 0.0, 2.0, 2.0)).is_empty());
    }
}

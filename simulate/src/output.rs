//! Simulation output: concentration statistics and pictures

use colorous::Gradient;
use data::{grid::Grid, Precision};
use eyre::{Result, WrapErr};
use image::{Rgb, RgbImage};
use ndarray::s;
use std::path::Path;

/// Color gradient of the pictures
pub const GRADIENT: Gradient = colorous::INFERNO;

/// Concentration that maps to the brightest color of [`GRADIENT`]
pub const MAX_AMPLITUDE: Precision = 0.6;

/// Amplitude scale factor associated with MAX_AMPLITUDE
pub const AMPLITUDE_SCALE: Precision = 1.0 / MAX_AMPLITUDE;

/// Summary of the values taken by one chemical species across the grid
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Stats {
    pub min: Precision,
    pub max: Precision,
    pub mean: Precision,
}
//
impl Stats {
    /// Compute statistics for one component of a grid
    pub fn of(grid: &Grid, component: usize) -> Self {
        let values = grid.view();
        let values = values.slice(s![.., .., .., component]);
        let (min, max, sum) = values.iter().fold(
            (Precision::INFINITY, Precision::NEG_INFINITY, 0.0f64),
            |(min, max, sum), &value| (min.min(value), max.max(value), sum + f64::from(value)),
        );
        Self {
            min,
            max,
            mean: (sum / values.len() as f64) as Precision,
        }
    }
}

/// Render one component of the first layer of a grid
pub fn render(grid: &Grid, component: usize) -> Result<RgbImage> {
    let [cols, rows, _layers] = grid.shape();
    let mut image = RgbImage::new(
        u32::try_from(cols).wrap_err("Too many columns for a picture")?,
        u32::try_from(rows).wrap_err("Too many rows for a picture")?,
    );
    let values = grid.view();
    let values = values.slice(s![0, .., .., component]);
    for (value, pixel) in values.iter().zip(image.pixels_mut()) {
        let color = GRADIENT.eval_continuous((AMPLITUDE_SCALE * value).clamp(0.0, 1.0).into());
        *pixel = Rgb([color.r, color.g, color.b]);
    }
    Ok(image)
}

/// Render one component of the first layer of a grid to a PNG file
pub fn save_png(grid: &Grid, component: usize, path: &Path) -> Result<()> {
    render(grid, component)?
        .save(path)
        .wrap_err_with(|| format!("Failed to save picture to {}", path.display()))
}

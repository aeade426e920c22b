//! Initial simulation state

use crate::stencil;
use data::{array3, grid::Grid, Precision, U, V};
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};
use ndarray::{Axis, Zip};
use rand::Rng;
use std::ops::RangeInclusive;

/// Range from which the radius of the initial blob is drawn
pub const RADIUS_RANGE: RangeInclusive<Precision> = 2.0..=5.0;

/// Elongation of the initial blob along the Y axis
pub const Y_STRETCH: Precision = 1.5;

/// Draw the radius of the initial blob
pub fn random_radius<R: Rng + ?Sized>(rng: &mut R) -> Precision {
    rng.gen_range(RADIUS_RANGE)
}

/// Fill a grid with a U background and a V blob at its center
///
/// Cells whose distance to the grid center `[X/2, Y/2, Z/2]` is at most
/// `radius` get `(u, v) = (0, 1)`, all other cells get `(1, 0)`. Distances
/// along Y are shrunk by [`Y_STRETCH`], which elongates the blob.
///
/// Returns the number of cells that belong to the blob.
pub fn fill_blob(grid: &mut Grid, radius: Precision) -> usize {
    let shape = grid.shape();
    let dimensionality = grid.dimensionality();
    let center = array3(|i| (shape[i] / 2) as Precision);
    let scale = [1.0, Y_STRETCH, 1.0];
    let mut values = grid.view_mut();
    let mut blob_cells = 0;
    Zip::indexed(values.lanes_mut(Axis(3))).for_each(|(z, y, x), mut cell| {
        let pos = [x, y, z];
        let delta = array3(|i| pos[i] as Precision - center[i]);
        let inside = stencil::anisotropic_distance(delta, scale, dimensionality) <= radius;
        blob_cells += usize::from(inside);
        let [u, v] = if inside { [0.0, 1.0] } else { [1.0, 0.0] };
        cell[U] = u;
        cell[V] = v;
    });
    debug!("Seeded a blob of radius {radius} covering {blob_cells} cell(s) of a {shape:?} grid");
    blob_cells
}

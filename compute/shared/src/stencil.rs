//! Stencil math shared by all compute backends
//!
//! Grids are treated as periodic: the neighbor of a cell on one face of the
//! grid is the cell on the opposite face.

use data::{
    grid::{Dimensionality, Position},
    parameters::Parameters,
    Precision, NUM_SPECIES,
};
use ndarray::ArrayView4;

/// Index of the previous cell along an axis of length `len`
#[inline(always)]
pub fn wrap_prev(idx: usize, len: usize) -> usize {
    (idx + len - 1) % len
}

/// Index of the next cell along an axis of length `len`
#[inline(always)]
pub fn wrap_next(idx: usize, len: usize) -> usize {
    (idx + 1) % len
}

/// Discrete Laplacian of one component of a (z, y, x, component) field
///
/// Sums the axis-aligned neighbors of `pos` (4 of them in single-layer grids,
/// 6 in volumetric grids) and subtracts the center value as many times.
#[inline]
pub fn laplacian(
    field: &ArrayView4<'_, Precision>,
    [x, y, z]: Position,
    component: usize,
) -> Precision {
    let (depth, height, width, _) = field.dim();
    let value = |[x, y, z]: Position| field[[z, y, x, component]];
    let center = value([x, y, z]);
    let planar = value([wrap_prev(x, width), y, z])
        + value([wrap_next(x, width), y, z])
        + value([x, wrap_prev(y, height), z])
        + value([x, wrap_next(y, height), z]);
    match Dimensionality::of([width, height, depth]) {
        Dimensionality::Two => planar - 4.0 * center,
        Dimensionality::Three => {
            planar + value([x, y, wrap_prev(z, depth)]) + value([x, y, wrap_next(z, depth)])
                - 6.0 * center
        }
    }
}

/// Forward Euler update of a cell's (u, v) concentrations
#[inline(always)]
pub fn react(
    params: &Parameters,
    [u, v]: [Precision; NUM_SPECIES],
    [laplacian_u, laplacian_v]: [Precision; NUM_SPECIES],
) -> [Precision; NUM_SPECIES] {
    // Deduce change in u and v
    let uv_square = u * v * v;
    let du = params.diffusion_rate_u * laplacian_u - uv_square + params.feed_rate * (1.0 - u);
    let dv = params.diffusion_rate_v * laplacian_v + uv_square
        - (params.feed_rate + params.kill_rate) * v;

    // Update u and v accordingly
    [u + du * params.time_step, v + dv * params.time_step]
}

/// Euclidean norm of a 2D vector
pub fn distance2([dx, dy]: [Precision; 2]) -> Precision {
    dx.hypot(dy)
}

/// Euclidean norm of a 3D vector
pub fn distance3([dx, dy, dz]: [Precision; 3]) -> Precision {
    (dx * dx + dy * dy + dz * dz).sqrt()
}

/// Norm of a vector whose components are first divided by per-axis scales
///
/// A scale above 1 stretches the unit ball along that axis. The Z component
/// is ignored for single-layer grids.
pub fn anisotropic_distance(
    delta: [Precision; 3],
    scale: [Precision; 3],
    dimensionality: Dimensionality,
) -> Precision {
    let [dx, dy, dz] = data::array3(|i| delta[i] / scale[i]);
    match dimensionality {
        Dimensionality::Two => distance2([dx, dy]),
        Dimensionality::Three => distance3([dx, dy, dz]),
    }
}

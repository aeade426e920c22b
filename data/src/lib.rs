//! Data format used by the reaction-diffusion simulation

pub mod evolving;
pub mod grid;
pub mod parameters;

/// Computation precision
pub type Precision = f32;

/// Number of chemical species (U and V) stored in each grid cell
pub const NUM_SPECIES: usize = 2;

/// Component index of species U (also known as `a`)
pub const U: usize = 0;

/// Component index of species V (also known as `b`)
pub const V: usize = 1;

/// Generate an array of 3 elements from an index-dependent generator
///
/// Handy for per-axis computations on `[x, y, z]` positions and shapes.
pub fn array3<T>(f: impl FnMut(usize) -> T) -> [T; 3] {
    std::array::from_fn(f)
}

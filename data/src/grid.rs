//! Grid storage
//!
//! A grid is a regular 3D array of cells, each holding a fixed number of
//! interleaved scalar components. Cells are stored in row-major order, so the
//! component `c` of cell `[x, y, z]` lives at linear index
//! `((z·Y + y)·X + x)·C + c` of the raw buffer.

use crate::Precision;
#[allow(unused_imports)]
use log::{debug, error, info, log, trace, warn};
use ndarray::{Array4, ArrayView4, ArrayViewMut4, Axis};
use thiserror::Error;

/// Position of a cell within a grid, as `[x, y, z]`
pub type Position = [usize; 3];

/// Number of spatial dimensions that a grid actually uses
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
pub enum Dimensionality {
    /// Single-layer grid (Z = 1), using 4-neighbor stencils
    Two,

    /// Volumetric grid, using 6-neighbor stencils
    Three,
}
//
impl Dimensionality {
    /// Dimensionality of a grid with a certain `[X, Y, Z]` shape
    pub fn of(shape: [usize; 3]) -> Self {
        if shape[2] == 1 {
            Self::Two
        } else {
            Self::Three
        }
    }
}

/// Regular 3D grid of multi-component scalar values
#[derive(Clone, Debug, PartialEq)]
pub struct Grid {
    /// Values, with axes ordered as (z, y, x, component)
    values: Array4<Precision>,

    /// Number of times the grid was marked as modified
    generation: u64,
}
//
impl Grid {
    /// Allocate a zero-filled grid with a certain `[X, Y, Z]` shape
    pub fn new(shape: [usize; 3], components: usize) -> Result<Self> {
        if shape.contains(&0) || components == 0 {
            return Err(Error::InvalidDimensions { shape, components });
        }
        let allocation_failure = || Error::AllocationFailure { shape, components };

        // ndarray requires the allocation size to fit in an isize
        let len = shape
            .iter()
            .try_fold(components, |acc, &extent| acc.checked_mul(extent))
            .ok_or_else(allocation_failure)?;
        let too_large = len
            .checked_mul(std::mem::size_of::<Precision>())
            .map_or(true, |bytes| bytes > isize::MAX as usize);
        if too_large {
            return Err(allocation_failure());
        }

        // Report memory exhaustion instead of aborting
        let mut values = Vec::new();
        values
            .try_reserve_exact(len)
            .map_err(|_| allocation_failure())?;
        values.resize(len, 0.0);
        let [x, y, z] = shape;
        let values = Array4::from_shape_vec((z, y, x, components), values)
            .expect("buffer length was computed from the shape");
        debug!("Allocated a {x}x{y}x{z} grid with {components} components per cell");
        Ok(Self {
            values,
            generation: 0,
        })
    }

    /// Grid shape, as `[X, Y, Z]`
    pub fn shape(&self) -> [usize; 3] {
        let (z, y, x, _) = self.values.dim();
        [x, y, z]
    }

    /// Number of scalar components per cell
    pub fn components(&self) -> usize {
        self.values.dim().3
    }

    /// Number of cells
    pub fn num_cells(&self) -> usize {
        self.shape().iter().product()
    }

    /// Number of spatial dimensions in use
    pub fn dimensionality(&self) -> Dimensionality {
        Dimensionality::of(self.shape())
    }

    /// Linear index of a cell component within the raw buffer
    pub fn linear_index(&self, [x, y, z]: Position, component: usize) -> usize {
        let [width, height, _] = self.shape();
        ((z * height + y) * width + x) * self.components() + component
    }

    /// Read a cell component
    pub fn get(&self, [x, y, z]: Position, component: usize) -> Precision {
        self.values[[z, y, x, component]]
    }

    /// Write a cell component
    pub fn set(&mut self, [x, y, z]: Position, component: usize, value: Precision) {
        self.values[[z, y, x, component]] = value;
    }

    /// View the values as a (z, y, x, component) array
    pub fn view(&self) -> ArrayView4<'_, Precision> {
        self.values.view()
    }

    /// Mutably view the values as a (z, y, x, component) array
    pub fn view_mut(&mut self) -> ArrayViewMut4<'_, Precision> {
        self.values.view_mut()
    }

    /// Raw row-major, component-interleaved buffer
    pub fn as_slice(&self) -> &[Precision] {
        self.values
            .as_slice()
            .expect("grids are always allocated in standard layout")
    }

    /// Mutable raw row-major, component-interleaved buffer
    pub fn as_slice_mut(&mut self) -> &mut [Precision] {
        self.values
            .as_slice_mut()
            .expect("grids are always allocated in standard layout")
    }

    /// Set one component of every cell to the same value
    pub fn fill_component(&mut self, component: usize, value: Precision) {
        self.values
            .index_axis_mut(Axis(3), component)
            .fill(value);
    }

    /// Signal observers that the grid contents changed
    pub fn mark_modified(&mut self) {
        self.generation += 1;
        trace!("Grid is now at generation {}", self.generation);
    }

    /// Number of times [`Grid::mark_modified()`] was called
    ///
    /// Observers can poll this to tell when a new frame is ready.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Things that can go wrong when allocating a grid
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum Error {
    #[error("grid extents {shape:?} with {components} component(s) are not all positive")]
    InvalidDimensions { shape: [usize; 3], components: usize },

    #[error("failed to allocate a grid of extents {shape:?} with {components} component(s)")]
    AllocationFailure { shape: [usize; 3], components: usize },
}
//
/// Result type associated with grid allocation
pub type Result<T> = std::result::Result<T, Error>;

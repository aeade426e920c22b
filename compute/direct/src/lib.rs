//! Direct implementation of the reaction-diffusion simulation
//!
//! Each half-step reads the current grid and writes the scratch grid, visiting
//! every cell in turn on the calling thread, then the two grids swap roles.

use compute::{seed, stencil, NoArgs, Simulate, SimulateBase, SimulateCreate};
use data::{
    evolving::Evolving,
    grid::{self, Grid},
    parameters::Parameters,
    Precision, NUM_SPECIES, U, V,
};
#[allow(unused_imports)]
use log::{debug, error, info, log, trace, warn};
use ndarray::{Axis, Zip};
use thiserror::Error;

/// Reaction-diffusion simulation
#[derive(Debug)]
pub struct Simulation {
    /// Simulation parameters
    params: Parameters,

    /// Current and scratch grids, once allocated
    grids: Option<Evolving<Grid>>,

    /// Steps performed since the last allocation or initialization
    steps_taken: u64,
}
//
impl SimulateBase for Simulation {
    type CliArgs = NoArgs;

    type Error = Error;

    fn grid(&self) -> Option<&Grid> {
        self.grids.as_ref().map(Evolving::input)
    }

    fn grid_mut(&mut self) -> Option<&mut Grid> {
        self.grids.as_mut().map(Evolving::input_mut)
    }

    fn parameters(&self) -> &Parameters {
        &self.params
    }

    fn set_parameters(&mut self, parameters: Parameters) {
        self.params = parameters;
    }

    fn steps_taken(&self) -> u64 {
        self.steps_taken
    }
}
//
impl SimulateCreate for Simulation {
    fn new(params: Parameters, _args: NoArgs) -> Result<Self> {
        Ok(Self {
            params,
            grids: None,
            steps_taken: 0,
        })
    }
}
//
impl Simulate for Simulation {
    fn allocate(&mut self, shape: [usize; 3]) -> Result<()> {
        let current = Grid::new(shape, NUM_SPECIES)?;
        let scratch = Grid::new(shape, NUM_SPECIES)?;
        self.grids = Some(Evolving::new(current, scratch));
        self.steps_taken = 0;
        Ok(())
    }

    fn initialize_with_radius(&mut self, radius: Precision) -> Result<()> {
        let grid = self
            .grids
            .as_mut()
            .ok_or(Error::NotAllocated)?
            .input_mut();
        seed::fill_blob(grid, radius);
        grid.mark_modified();
        self.steps_taken = 0;
        Ok(())
    }

    fn advance(&mut self, steps: usize) -> Result<()> {
        let grids = self.grids.as_mut().ok_or(Error::NotAllocated)?;
        if steps == 0 {
            return Ok(());
        }

        let num_pairs = compute::num_step_pairs(steps);
        debug!("Performing {num_pairs} pair(s) of half-steps");
        for _ in 0..num_pairs {
            for _ in 0..2 {
                let (input, output) = grids.in_out();
                half_step(&self.params, input, output);
                grids.flip();
            }
            self.steps_taken += 2;
        }
        debug_assert_eq!(grids.input_idx(), 0);
        grids.input_mut().mark_modified();
        Ok(())
    }
}

/// Perform one half-step, reading `input` and writing `output`
fn half_step(params: &Parameters, input: &Grid, output: &mut Grid) {
    debug_assert_eq!(input.shape(), output.shape());
    let input = input.view();
    let mut output = output.view_mut();
    Zip::indexed(output.lanes_mut(Axis(3))).for_each(|(z, y, x), mut out| {
        // Compute diffusion gradient for u and v
        let pos = [x, y, z];
        let laplacians = [U, V].map(|component| stencil::laplacian(&input, pos, component));

        // Apply the reaction and diffusion
        let uv = [input[[z, y, x, U]], input[[z, y, x, V]]];
        let [u, v] = stencil::react(params, uv, laplacians);
        out[U] = u;
        out[V] = v;
    });
}

/// Things that can go wrong in the direct backend
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum Error {
    #[error("failed to allocate the simulation grid")]
    Grid(#[from] grid::Error),

    #[error("the simulation grid must be allocated first")]
    NotAllocated,
}
//
/// Result type associated with the direct backend
pub type Result<T> = std::result::Result<T, Error>;

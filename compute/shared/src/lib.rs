//! Common facilities shared by all compute backends

#[cfg(feature = "criterion")]
#[doc(hidden)]
pub mod benchmark;
pub mod seed;
pub mod stencil;

use clap::Args;
use data::{grid::Grid, parameters::Parameters, Precision};
use rand::Rng;
use std::{error::Error, fmt::Debug};

/// Common interface shared by all compute backends
pub trait SimulateBase: Sized {
    /// Supplementary CLI arguments allowing fine-tuning of this backend
    ///
    /// To honor the principle of least surprise and make criterion
    /// microbenchmarks work smoothly, any argument you add must have a default
    /// value and should also be configurable through environment variables.
    type CliArgs: Args + Debug;

    /// Simulation error type
    type Error: Error + Send + Sync + 'static;

    /// Current simulation grid, if one was allocated
    fn grid(&self) -> Option<&Grid>;

    /// Mutable access to the current simulation grid
    ///
    /// Backends which mirror the grid elsewhere must assume that the host copy
    /// was modified whenever this is called.
    fn grid_mut(&mut self) -> Option<&mut Grid>;

    /// Model parameters
    fn parameters(&self) -> &Parameters;

    /// Change the model parameters
    ///
    /// The new parameters take effect at the next call to
    /// [`Simulate::advance()`].
    fn set_parameters(&mut self, parameters: Parameters);

    /// Number of steps performed since the last allocation or initialization
    fn steps_taken(&self) -> u64;
}

/// Simulation construction
///
/// This is where the compute backend gets selected.
pub trait SimulateCreate: SimulateBase {
    /// Set up the simulation
    ///
    /// No grid is allocated at this point, call [`Simulate::allocate()`] next.
    fn new(params: Parameters, args: Self::CliArgs) -> Result<Self, Self::Error>;
}

/// Time-stepping interface exposed by every compute backend
pub trait Simulate: SimulateBase {
    /// (Re)allocate the simulation grid with a certain `[X, Y, Z]` shape
    ///
    /// The grid starts zero-filled, and the step counter is reset.
    fn allocate(&mut self, shape: [usize; 3]) -> Result<(), Self::Error>;

    /// Fill the grid with a uniform background and a blob of a certain radius
    /// at its center, then reset the step counter
    ///
    /// See [`seed::fill_blob()`] for the exact pattern.
    fn initialize_with_radius(&mut self, radius: Precision) -> Result<(), Self::Error>;

    /// Like [`Simulate::initialize_with_radius()`], with a random radius
    fn initialize_seed<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Result<(), Self::Error> {
        self.initialize_with_radius(seed::random_radius(rng))
    }

    /// Advance the simulation by at least `steps` steps
    ///
    /// Steps are performed in pairs, so that the grid ends up holding the
    /// latest state without any buffer juggling. The step counter thus grows
    /// by `2 * steps.div_ceil(2)`, and `advance(0)` does nothing. If an error
    /// occurs, neither the grid nor the step counter are modified.
    fn advance(&mut self, steps: usize) -> Result<(), Self::Error>;
}

/// Number of half-step pairs that [`Simulate::advance()`] performs
pub fn num_step_pairs(steps: usize) -> usize {
    steps.div_ceil(2)
}

/// Placeholder for backends that have no CLI arguments
#[derive(Args, Copy, Clone, Debug, Default, Eq, Hash, PartialEq)]
pub struct NoArgs {}

/// Macro that generates a complete criterion benchmark harness for you
#[macro_export]
#[cfg(feature = "criterion")]
macro_rules! criterion_benchmark {
    ($backend:ident) => {
        fn criterion_benchmark(c: &mut $crate::benchmark::criterion::Criterion) {
            $crate::benchmark::criterion_benchmark::<$backend::Simulation>(
                c,
                stringify!($backend),
            )
        }
        $crate::benchmark::criterion::criterion_group!(benches, criterion_benchmark);
        $crate::benchmark::criterion::criterion_main!(benches);
    };
}

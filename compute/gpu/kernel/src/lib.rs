//! Device-kernel implementation of the reaction-diffusion simulation
//!
//! Half-steps are performed by a kernel program, which is assembled from a
//! reaction formula (see [`source`]), compiled and run by a compute device
//! (see [`device`]). The simulation state lives in a pair of device buffers
//! which take turns acting as the kernel's input and output, and is only read
//! back into the host grid at the end of each [`Simulate::advance()`] call.
//!
//! Device resources are provisioned lazily: the compute context, kernel
//! program and device buffers are only (re)built when a batch of steps is
//! requested after something they depend on changed.

#![allow(clippy::result_large_err)]

mod args;
pub mod device;
pub mod source;
#[cfg(feature = "vulkan")]
pub mod vulkan;

pub use args::KernelArgs;

use self::{
    device::{BoxError, ComputeDevice, DeviceBuilder},
    source::KernelSource,
};
use compute::{seed, Simulate, SimulateBase, SimulateCreate};
use data::{
    array3,
    evolving::Evolving,
    grid::{self, Grid},
    parameters::Parameters,
    Precision, NUM_SPECIES,
};
#[allow(unused_imports)]
use log::{debug, error, info, log, trace, warn};
use thiserror::Error;

/// State of the device resources
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
pub enum Provisioning {
    /// Device resources were never successfully built
    Unbuilt,

    /// Device resources match the current configuration
    Valid,

    /// Device resources were built, but the configuration changed since
    Stale,
}

/// Reaction-diffusion simulation
pub struct Simulation<Builder: DeviceBuilder> {
    /// Source of the compute context
    builder: Builder,

    /// Simulation parameters
    params: Parameters,

    /// Reaction formula and work-group shape
    source: KernelSource,

    /// Host copy of the simulation state, once allocated
    grid: Option<Grid>,

    /// Steps performed since the last allocation or initialization
    steps_taken: u64,

    /// Compute context, built by the first provisioning attempt that needs it
    device: Option<Builder::Device>,

    /// Resources from the last successful provisioning
    resources: Option<Resources<Builder::Device>>,

    /// Truth that `resources` match the current configuration
    provisioning: Provisioning,

    /// Truth that the host grid must be uploaded before the next batch
    upload_pending: bool,
}
//
impl<Builder: DeviceBuilder> Simulation<Builder> {
    /// Set up a simulation that gets its compute context from `builder`
    pub fn with_builder(params: Parameters, source: KernelSource, builder: Builder) -> Self {
        Self {
            builder,
            params,
            source,
            grid: None,
            steps_taken: 0,
            device: None,
            resources: None,
            provisioning: Provisioning::Unbuilt,
            upload_pending: false,
        }
    }

    /// Reaction formula and work-group shape
    pub fn kernel_source(&self) -> &KernelSource {
        &self.source
    }

    /// Change the reaction formula
    ///
    /// The formula is only checked when the kernel gets compiled, on the next
    /// call to [`Simulate::advance()`].
    pub fn set_formula(&mut self, formula: impl Into<String>) {
        if self.source.set_formula(formula.into()) {
            self.invalidate("reaction formula changed");
        }
    }

    /// Change the work-group shape
    ///
    /// Grid extents must be multiples of the work-group extents, which is only
    /// checked on the next call to [`Simulate::advance()`].
    pub fn set_block_shape(&mut self, block_shape: [u32; 3]) {
        if self.source.set_block_shape(block_shape) {
            self.invalidate("work-group shape changed");
        }
    }

    /// State of the device resources
    pub fn provisioning(&self) -> Provisioning {
        self.provisioning
    }

    /// Rebuild the device resources if they don't match the configuration
    ///
    /// This is done automatically by [`Simulate::advance()`]. If it fails, the
    /// resources from the last successful provisioning (if any) are kept
    /// around, but will not be used until a later call succeeds.
    pub fn reload_if_needed(&mut self) -> Result<()> {
        if self.provisioning == Provisioning::Valid {
            return Ok(());
        }
        let grid = self.grid.as_ref().ok_or(Error::NotAllocated)?;
        let shape = grid.shape();
        let block_shape = self.source.block_shape();
        if device::dispatch_size(global_shape(shape), block_shape).is_none() {
            return Err(Error::InvalidBlockShape { shape, block_shape });
        }

        // The compute context does not depend on the configuration
        if self.device.is_none() {
            info!("Building the compute context");
            let device = self
                .builder
                .build_context()
                .map_err(|e| Error::Context(e.into()))?;
            self.device = Some(device);
        }
        let device = self
            .device
            .as_mut()
            .expect("compute context was built above");

        // Build the kernel program
        let source = self.source.assemble(&self.params, grid.dimensionality());
        trace!("Assembled kernel source:\n{source}");
        let program = device
            .compile_program(&source)
            .map_err(|e| Error::Build(e.into()))?;
        debug!("Compiled the kernel program");

        // Set up device buffers and upload the simulation state
        let len = grid.as_slice().len();
        let mut allocate = || {
            device
                .allocate_buffer(len)
                .map_err(|e| Error::Allocation(e.into()))
        };
        let (mut first, second) = (allocate()?, allocate()?);
        device
            .copy_host_to_device(grid.as_slice(), &mut first)
            .map_err(|e| Error::Execution(e.into()))?;

        // Buffers swap roles after each half-step, so two bindings suffice
        let mut bind = |input: &_, output: &_| {
            device
                .bind_buffers(&program, input, output)
                .map_err(|e| Error::Allocation(e.into()))
        };
        let bindings = [bind(&first, &second)?, bind(&second, &first)?];
        debug!("Bound the kernel program to the device buffers");

        self.resources = Some(Resources {
            buffers: Evolving::new(first, second),
            bindings,
        });
        self.provisioning = Provisioning::Valid;
        self.upload_pending = false;
        info!("Device resources are ready for a {shape:?} grid");
        Ok(())
    }

    /// Record that the device resources don't match the configuration anymore
    fn invalidate(&mut self, reason: &str) {
        if self.provisioning == Provisioning::Valid {
            debug!("Device resources are now stale: {reason}");
            self.provisioning = Provisioning::Stale;
        }
    }
}
//
impl<Builder: DeviceBuilder> SimulateBase for Simulation<Builder> {
    type CliArgs = KernelArgs;

    type Error = Error;

    fn grid(&self) -> Option<&Grid> {
        self.grid.as_ref()
    }

    fn grid_mut(&mut self) -> Option<&mut Grid> {
        self.upload_pending = true;
        self.grid.as_mut()
    }

    fn parameters(&self) -> &Parameters {
        &self.params
    }

    fn set_parameters(&mut self, parameters: Parameters) {
        if parameters != self.params {
            self.params = parameters;
            self.invalidate("model parameters changed");
        }
    }

    fn steps_taken(&self) -> u64 {
        self.steps_taken
    }
}
//
impl<Builder: DeviceBuilder + Default> SimulateCreate for Simulation<Builder> {
    fn new(params: Parameters, args: KernelArgs) -> Result<Self> {
        Ok(Self::with_builder(
            params,
            args.kernel_source()?,
            Builder::default(),
        ))
    }
}
//
impl<Builder: DeviceBuilder> Simulate for Simulation<Builder> {
    fn allocate(&mut self, shape: [usize; 3]) -> Result<()> {
        let addressable = shape
            .iter()
            .all(|&extent| extent.is_power_of_two() && u32::try_from(extent).is_ok());
        if !addressable {
            return Err(Error::InvalidDimensions(shape));
        }
        self.grid = Some(Grid::new(shape, NUM_SPECIES)?);
        self.steps_taken = 0;
        self.upload_pending = true;
        self.invalidate("grid was reallocated");
        Ok(())
    }

    fn initialize_with_radius(&mut self, radius: Precision) -> Result<()> {
        let grid = self.grid.as_mut().ok_or(Error::NotAllocated)?;
        seed::fill_blob(grid, radius);
        grid.mark_modified();
        self.steps_taken = 0;
        self.upload_pending = true;
        Ok(())
    }

    fn advance(&mut self, steps: usize) -> Result<()> {
        if self.grid.is_none() {
            return Err(Error::NotAllocated);
        }
        if steps == 0 {
            return Ok(());
        }
        self.reload_if_needed()?;

        let device = self.device.as_mut().expect("provisioning succeeded");
        let resources = self.resources.as_mut().expect("provisioning succeeded");
        let grid = self.grid.as_mut().expect("checked above");
        let num_pairs = compute::num_step_pairs(steps);
        debug!("Performing {num_pairs} pair(s) of half-steps on the device");

        // Until the batch succeeds, device buffers may hold partial results
        let upload = std::mem::replace(&mut self.upload_pending, true);
        run_batch(
            device,
            resources,
            grid,
            upload,
            self.source.block_shape(),
            num_pairs,
        )?;
        self.upload_pending = false;
        self.steps_taken += 2 * num_pairs as u64;
        grid.mark_modified();
        Ok(())
    }
}

/// Device resources that depend on the configuration
struct Resources<Device: ComputeDevice> {
    /// Simulation state
    buffers: Evolving<Device::Buffer>,

    /// Compiled kernel, bound to each input/output buffer configuration and
    /// indexed by the position of the input buffer
    bindings: [Device::Binding; 2],
}

/// Run `num_pairs` pairs of half-steps, then read back the result into `grid`
fn run_batch<Device: ComputeDevice>(
    device: &mut Device,
    Resources { buffers, bindings }: &mut Resources<Device>,
    grid: &mut Grid,
    upload: bool,
    block_shape: [u32; 3],
    num_pairs: usize,
) -> Result<()> {
    let execution = |e: Device::Error| Error::Execution(e.into());
    if upload {
        device
            .copy_host_to_device(grid.as_slice(), buffers.input_mut())
            .map_err(execution)?;
    }
    let global_shape = global_shape(grid.shape());
    for _ in 0..num_pairs {
        for _ in 0..2 {
            device
                .enqueue_kernel(&bindings[buffers.input_idx()], global_shape, block_shape)
                .map_err(execution)?;
            buffers.flip();
        }
    }
    device.finish_queue().map_err(execution)?;
    device
        .copy_device_to_host(buffers.input(), grid.as_slice_mut())
        .map_err(execution)
}

/// Number of kernel work items needed to cover a grid
fn global_shape(shape: [usize; 3]) -> [u32; 3] {
    array3(|i| u32::try_from(shape[i]).expect("checked at allocation time"))
}

/// Things that can go wrong in the device-kernel backend
#[derive(Debug, Error)]
pub enum Error {
    #[error("grid extents {0:?} must all be powers of two that fit in 32 bits")]
    InvalidDimensions([usize; 3]),

    #[error("failed to allocate the host-side simulation grid")]
    Grid(#[from] grid::Error),

    #[error("the simulation grid must be allocated first")]
    NotAllocated,

    #[error("work-group shape {block_shape:?} does not evenly divide grid extents {shape:?}")]
    InvalidBlockShape {
        shape: [usize; 3],
        block_shape: [u32; 3],
    },

    #[error("failed to read the reaction formula")]
    FormulaIo(#[from] std::io::Error),

    #[error("failed to build the compute context")]
    Context(#[source] BoxError),

    #[error("failed to build the kernel program")]
    Build(#[source] BoxError),

    #[error("failed to allocate device buffers")]
    Allocation(#[source] BoxError),

    #[error("failed to run the simulation on the device")]
    Execution(#[source] BoxError),
}
//
/// Result type associated with the device-kernel backend
pub type Result<T> = std::result::Result<T, Error>;

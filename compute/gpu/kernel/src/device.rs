//! Compute device interface
//!
//! The simulation does not talk to a GPU API directly, but to a compute device
//! through this narrow interface. The `vulkan` module provides an
//! implementation based on Vulkan, and tests use a host-side emulation.

use data::Precision;
use std::error::Error;

/// Type-erased error emitted by a compute device
pub type BoxError = Box<dyn Error + Send + Sync + 'static>;

/// Compute context factory
///
/// Building a compute context is expensive, so the simulation only does it
/// once it actually needs to run something.
pub trait DeviceBuilder {
    /// Kind of compute device that is built
    type Device: ComputeDevice;

    /// Set up a compute context (pick a device, set up queues, ...)
    fn build_context(
        &mut self,
    ) -> Result<Self::Device, <Self::Device as ComputeDevice>::Error>;
}

/// Compute device that can run kernel programs over buffers
pub trait ComputeDevice {
    /// Compiled kernel program
    type Program;

    /// Device-resident buffer of scalars
    type Buffer;

    /// Association of a kernel program with its input and output buffers
    type Binding;

    /// Error type
    type Error: Error + Send + Sync + 'static;

    /// Compile a kernel program from its source text
    fn compile_program(&mut self, source: &str) -> Result<Self::Program, Self::Error>;

    /// Allocate a buffer of `len` scalars
    fn allocate_buffer(&mut self, len: usize) -> Result<Self::Buffer, Self::Error>;

    /// Copy host data into a device buffer of the same length
    fn copy_host_to_device(
        &mut self,
        host: &[Precision],
        device: &mut Self::Buffer,
    ) -> Result<(), Self::Error>;

    /// Copy a device buffer into host storage of the same length
    ///
    /// Must only be called after [`ComputeDevice::finish_queue()`], and must
    /// leave `host` untouched if an error occurs.
    fn copy_device_to_host(
        &mut self,
        device: &Self::Buffer,
        host: &mut [Precision],
    ) -> Result<(), Self::Error>;

    /// Prepare runs of `program` that read `input` and write `output`
    ///
    /// Bindings are meant to be set up once per buffer configuration and
    /// reused by every subsequent kernel run.
    fn bind_buffers(
        &mut self,
        program: &Self::Program,
        input: &Self::Buffer,
        output: &Self::Buffer,
    ) -> Result<Self::Binding, Self::Error>;

    /// Schedule a run of a bound program over a grid of `global_shape` work
    /// items, grouped in blocks of `block_shape`
    ///
    /// `global_shape` must be a multiple of `block_shape` along every axis.
    /// Kernels enqueued in a row execute in order. If this fails, all work
    /// that was enqueued since the last call to `finish_queue()` is discarded.
    fn enqueue_kernel(
        &mut self,
        binding: &Self::Binding,
        global_shape: [u32; 3],
        block_shape: [u32; 3],
    ) -> Result<(), Self::Error>;

    /// Run all enqueued work and wait for it to complete
    fn finish_queue(&mut self) -> Result<(), Self::Error>;
}

/// Number of work groups needed to cover `global_shape` with blocks of
/// `block_shape`, if the former is an exact multiple of the latter
pub fn dispatch_size(global_shape: [u32; 3], block_shape: [u32; 3]) -> Option<[u32; 3]> {
    let mut dispatch_size = [0; 3];
    for ((size, global), block) in dispatch_size.iter_mut().zip(global_shape).zip(block_shape) {
        if block == 0 || global % block != 0 {
            return None;
        }
        *size = global / block;
    }
    Some(dispatch_size)
}

//! Host-side emulation of a compute device
//!
//! Kernel programs are "compiled" by the interpreter from the [`kernel`]
//! module. Enqueued kernel runs are deferred until the queue is finished, then
//! interpreted one after the other.

pub mod kernel;

use self::kernel::Kernel;
use compute_gpu_kernel::device::{self, ComputeDevice, DeviceBuilder};
use data::Precision;
use std::{
    cell::{Cell, RefCell},
    rc::Rc,
    sync::Once,
};
use thiserror::Error;

pub fn init_logger() {
    static INIT_LOGGER: Once = Once::new();
    INIT_LOGGER.call_once(env_logger::init);
}

/// Activity counters and failure injection knobs, shared between a test and
/// the devices it builds
#[derive(Debug, Default)]
pub struct Activity {
    pub contexts: Cell<usize>,
    pub compilations: Cell<usize>,
    pub allocations: Cell<usize>,
    pub uploads: Cell<usize>,
    pub downloads: Cell<usize>,
    pub bindings: Cell<usize>,
    pub dispatches: Cell<usize>,
    pub submissions: Cell<usize>,

    /// Make context creation fail
    pub fail_context: Cell<bool>,

    /// Number of kernel runs that can be enqueued before one fails
    ///
    /// Goes back to `None` once the failure has occurred.
    pub dispatch_budget: Cell<Option<usize>>,
}
//
impl Activity {
    fn bump(counter: &Cell<usize>) {
        counter.set(counter.get() + 1);
    }
}

/// Builder of emulated devices
#[derive(Clone, Debug, Default)]
pub struct HostBuilder {
    pub activity: Rc<Activity>,
}
//
impl HostBuilder {
    /// Set up a builder along with a handle to its activity counters
    pub fn new() -> (Self, Rc<Activity>) {
        let builder = Self::default();
        let activity = builder.activity.clone();
        (builder, activity)
    }
}
//
impl DeviceBuilder for HostBuilder {
    type Device = HostDevice;

    fn build_context(&mut self) -> Result<HostDevice, HostError> {
        if self.activity.fail_context.get() {
            return Err(HostError::Context);
        }
        Activity::bump(&self.activity.contexts);
        Ok(HostDevice {
            activity: self.activity.clone(),
            pending: Vec::new(),
        })
    }
}

/// Device buffer, shared with the deferred kernel runs that use it
pub type HostBuffer = Rc<RefCell<Vec<Precision>>>;

/// Kernel program bound to its input and output buffers
#[derive(Clone)]
pub struct HostBinding {
    kernel: Rc<Kernel>,
    input: HostBuffer,
    output: HostBuffer,
}

/// Kernel run that was enqueued but not executed yet
struct Dispatch {
    binding: HostBinding,
    global_shape: [u32; 3],
}

/// Emulated compute device
pub struct HostDevice {
    activity: Rc<Activity>,
    pending: Vec<Dispatch>,
}
//
impl ComputeDevice for HostDevice {
    type Program = Kernel;
    type Buffer = HostBuffer;
    type Binding = HostBinding;
    type Error = HostError;

    fn compile_program(&mut self, source: &str) -> Result<Kernel, HostError> {
        let program = Kernel::parse(source)?;
        Activity::bump(&self.activity.compilations);
        Ok(program)
    }

    fn allocate_buffer(&mut self, len: usize) -> Result<HostBuffer, HostError> {
        Activity::bump(&self.activity.allocations);
        Ok(Rc::new(RefCell::new(vec![Precision::NAN; len])))
    }

    fn copy_host_to_device(
        &mut self,
        host: &[Precision],
        device: &mut HostBuffer,
    ) -> Result<(), HostError> {
        let mut device = device.borrow_mut();
        if device.len() != host.len() {
            return Err(HostError::LengthMismatch);
        }
        device.copy_from_slice(host);
        Activity::bump(&self.activity.uploads);
        Ok(())
    }

    fn copy_device_to_host(
        &mut self,
        device: &HostBuffer,
        host: &mut [Precision],
    ) -> Result<(), HostError> {
        let device = device.borrow();
        if device.len() != host.len() {
            return Err(HostError::LengthMismatch);
        }
        host.copy_from_slice(&device);
        Activity::bump(&self.activity.downloads);
        Ok(())
    }

    fn bind_buffers(
        &mut self,
        kernel: &Kernel,
        input: &HostBuffer,
        output: &HostBuffer,
    ) -> Result<HostBinding, HostError> {
        Activity::bump(&self.activity.bindings);
        Ok(HostBinding {
            kernel: Rc::new(kernel.clone()),
            input: input.clone(),
            output: output.clone(),
        })
    }

    fn enqueue_kernel(
        &mut self,
        binding: &HostBinding,
        global_shape: [u32; 3],
        block_shape: [u32; 3],
    ) -> Result<(), HostError> {
        let failure = match self.activity.dispatch_budget.get() {
            Some(0) => {
                self.activity.dispatch_budget.set(None);
                Some(HostError::Dispatch)
            }
            budget => {
                self.activity.dispatch_budget.set(budget.map(|b| b - 1));
                if device::dispatch_size(global_shape, block_shape).is_none() {
                    Some(HostError::PartialWorkGroup)
                } else {
                    (block_shape != binding.kernel.block_shape())
                        .then_some(HostError::BlockShapeMismatch)
                }
            }
        };
        if let Some(error) = failure {
            self.pending.clear();
            return Err(error);
        }
        self.pending.push(Dispatch {
            binding: binding.clone(),
            global_shape,
        });
        Activity::bump(&self.activity.dispatches);
        Ok(())
    }

    fn finish_queue(&mut self) -> Result<(), HostError> {
        for Dispatch {
            binding,
            global_shape,
        } in std::mem::take(&mut self.pending)
        {
            let input = binding.input.borrow();
            let mut output = binding.output.borrow_mut();
            binding.kernel.run(&input, &mut output, global_shape)?;
        }
        Activity::bump(&self.activity.submissions);
        Ok(())
    }
}

/// Emulated device failures
#[derive(Debug, Error)]
pub enum HostError {
    #[error("context creation failed on purpose")]
    Context,

    #[error("kernel does not implement the Gray-Scott reaction")]
    UnsupportedFormula,

    #[error("kernel statement is not understood: {0}")]
    UnsupportedStatement(String),

    #[error("kernel lacks {0}")]
    MissingStatement(&'static str),

    #[error("kernel index expression is not understood: {0}")]
    InvalidExpression(String),

    #[error("kernel does not define constant {0}")]
    MissingConstant(&'static str),

    #[error("kernel run failed on purpose")]
    Dispatch,

    #[error("work-group shape does not divide the global shape")]
    PartialWorkGroup,

    #[error("work-group shape differs from the one the kernel was compiled for")]
    BlockShapeMismatch,

    #[error("kernel accessed element #{0}, which is out of bounds")]
    OutOfBounds(usize),

    #[error("host and device storage lengths differ")]
    LengthMismatch,
}

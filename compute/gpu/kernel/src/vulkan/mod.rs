//! Vulkan compute device
//!
//! Kernels are compiled from GLSL to SPIR-V at run time with shaderc. The
//! simulation state lives in host-visible storage buffers, so uploads and
//! readbacks are plain memory copies, and all kernel runs from a batch are
//! recorded into a single command buffer that is submitted by
//! [`ComputeDevice::finish_queue()`].

mod context;

pub use context::PREFER_DEVICE_VAR;

use crate::device::{self, ComputeDevice, DeviceBuilder};
use data::Precision;
#[allow(unused_imports)]
use log::{debug, error, info, log, trace, warn};
use std::sync::Arc;
use thiserror::Error;
use vulkano::{
    buffer::{AllocateBufferError, Buffer, BufferCreateInfo, BufferUsage, Subbuffer},
    command_buffer::{
        allocator::StandardCommandBufferAllocator, AutoCommandBufferBuilder,
        CommandBufferExecError, CommandBufferUsage, PrimaryAutoCommandBuffer,
    },
    descriptor_set::{
        allocator::StandardDescriptorSetAllocator, PersistentDescriptorSet, WriteDescriptorSet,
    },
    device::{Device, Queue},
    instance::debug::DebugUtilsMessenger,
    memory::allocator::{AllocationCreateInfo, MemoryTypeFilter, StandardMemoryAllocator},
    pipeline::{
        compute::ComputePipelineCreateInfo, layout::PipelineDescriptorSetLayoutCreateInfo,
        ComputePipeline, Pipeline, PipelineBindPoint, PipelineLayout,
        PipelineShaderStageCreateInfo,
    },
    shader::{ShaderModule, ShaderModuleCreateInfo},
    sync::{GpuFuture, HostAccessError},
    DeviceSize, LoadingError, Validated, ValidationError, VulkanError,
};

/// Builder of [`VulkanDevice`]s
#[derive(Clone, Debug, Default, Eq, Hash, PartialEq)]
pub struct VulkanBuilder {
    /// Also consider devices that do not fully conform to the Vulkan
    /// specification, like MoltenVK on macOS
    pub enumerate_portability: bool,
}
//
impl DeviceBuilder for VulkanBuilder {
    type Device = VulkanDevice;

    fn build_context(&mut self) -> Result<VulkanDevice> {
        VulkanDevice::new(self.enumerate_portability)
    }
}

/// Vulkan compute context
pub struct VulkanDevice {
    /// Commands recorded since the last submission
    pending: Option<AutoCommandBufferBuilder<PrimaryAutoCommandBuffer>>,

    /// GLSL compiler
    compiler: shaderc::Compiler,

    /// Descriptor set allocator
    descriptor_set_allocator: StandardDescriptorSetAllocator,

    /// Command buffer allocator
    command_allocator: StandardCommandBufferAllocator,

    /// Buffer memory allocator
    memory_allocator: Arc<StandardMemoryAllocator>,

    /// Compute queue
    queue: Arc<Queue>,

    /// Logical device
    device: Arc<Device>,

    /// Messenger that forwards Vulkan debug messages to the log, if enabled
    _messenger: Option<DebugUtilsMessenger>,
}
//
impl VulkanDevice {
    /// Set up a compute context on the preferred device
    pub fn new(enumerate_portability: bool) -> Result<Self> {
        let library = context::load_library()?;
        let (instance, messenger) = context::create_instance(library, enumerate_portability)?;
        let (physical_device, queue_family_index) = context::select_physical(&instance)?;
        let (device, queue) = context::create_logical(physical_device, queue_family_index)?;

        let memory_allocator = Arc::new(StandardMemoryAllocator::new_default(device.clone()));
        let command_allocator =
            StandardCommandBufferAllocator::new(device.clone(), Default::default());
        let descriptor_set_allocator =
            StandardDescriptorSetAllocator::new(device.clone(), Default::default());
        let compiler = shaderc::Compiler::new().ok_or(Error::CompilerInit)?;
        Ok(Self {
            pending: None,
            compiler,
            descriptor_set_allocator,
            command_allocator,
            memory_allocator,
            queue,
            device,
            _messenger: messenger,
        })
    }

    /// Record a kernel run into the pending command buffer
    fn record_dispatch(
        &mut self,
        binding: &KernelBinding,
        global_shape: [u32; 3],
        block_shape: [u32; 3],
    ) -> Result<()> {
        let dispatch_size = device::dispatch_size(global_shape, block_shape).ok_or(
            Error::PartialWorkGroup {
                global_shape,
                block_shape,
            },
        )?;
        let builder = match &mut self.pending {
            Some(builder) => builder,
            pending @ None => pending.insert(AutoCommandBufferBuilder::primary(
                &self.command_allocator,
                self.queue.queue_family_index(),
                CommandBufferUsage::OneTimeSubmit,
            )?),
        };
        let KernelBinding {
            pipeline,
            descriptor_set,
        } = binding;
        builder
            .bind_pipeline_compute(pipeline.clone())?
            .bind_descriptor_sets(
                PipelineBindPoint::Compute,
                pipeline.layout().clone(),
                0,
                descriptor_set.clone(),
            )?
            .dispatch(dispatch_size)?;
        Ok(())
    }
}
//
impl ComputeDevice for VulkanDevice {
    type Program = Arc<ComputePipeline>;
    type Buffer = Subbuffer<[Precision]>;
    type Binding = KernelBinding;
    type Error = Error;

    fn compile_program(&mut self, source: &str) -> Result<Arc<ComputePipeline>> {
        let mut options = shaderc::CompileOptions::new().ok_or(Error::CompilerInit)?;
        options.set_target_env(
            shaderc::TargetEnv::Vulkan,
            shaderc::EnvVersion::Vulkan1_0 as u32,
        );
        let artifact = self.compiler.compile_into_spirv(
            source,
            shaderc::ShaderKind::Compute,
            "reaction.comp",
            "main",
            Some(&options),
        )?;
        if artifact.get_num_warnings() > 0 {
            warn!(
                "Kernel compiled with warnings:\n{}",
                artifact.get_warning_messages()
            );
        }

        // SAFETY: The SPIR-V comes straight out of shaderc
        let module = unsafe {
            ShaderModule::new(
                self.device.clone(),
                ShaderModuleCreateInfo::new(artifact.as_binary()),
            )
        }?;
        let entry_point = module.entry_point("main").ok_or(Error::NoEntryPoint)?;
        let stage = PipelineShaderStageCreateInfo::new(entry_point);
        let layout_info = PipelineDescriptorSetLayoutCreateInfo::from_stages([&stage])
            .into_pipeline_layout_create_info(self.device.clone())
            .map_err(|e| Error::PipelineLayout(format!("{e:?}")))?;
        let layout = PipelineLayout::new(self.device.clone(), layout_info)?;
        let pipeline = ComputePipeline::new(
            self.device.clone(),
            None,
            ComputePipelineCreateInfo::stage_layout(stage, layout),
        )?;
        Ok(pipeline)
    }

    fn allocate_buffer(&mut self, len: usize) -> Result<Subbuffer<[Precision]>> {
        let buffer = Buffer::new_slice::<Precision>(
            self.memory_allocator.clone(),
            BufferCreateInfo {
                usage: BufferUsage::STORAGE_BUFFER,
                ..Default::default()
            },
            AllocationCreateInfo {
                memory_type_filter: MemoryTypeFilter::PREFER_DEVICE
                    | MemoryTypeFilter::HOST_RANDOM_ACCESS,
                ..Default::default()
            },
            len as DeviceSize,
        )?;
        if cfg!(feature = "gpu-debug-utils") {
            self.device
                .set_debug_utils_object_name(buffer.buffer(), Some("Simulation state"))?;
        }
        Ok(buffer)
    }

    fn copy_host_to_device(
        &mut self,
        host: &[Precision],
        device: &mut Subbuffer<[Precision]>,
    ) -> Result<()> {
        let mut contents = device.write()?;
        check_lengths(host.len(), contents.len())?;
        contents.copy_from_slice(host);
        Ok(())
    }

    fn copy_device_to_host(
        &mut self,
        device: &Subbuffer<[Precision]>,
        host: &mut [Precision],
    ) -> Result<()> {
        let contents = device.read()?;
        check_lengths(host.len(), contents.len())?;
        host.copy_from_slice(&contents);
        Ok(())
    }

    fn bind_buffers(
        &mut self,
        pipeline: &Arc<ComputePipeline>,
        input: &Subbuffer<[Precision]>,
        output: &Subbuffer<[Precision]>,
    ) -> Result<KernelBinding> {
        let descriptor_set = PersistentDescriptorSet::new(
            &self.descriptor_set_allocator,
            pipeline.layout().set_layouts()[0].clone(),
            [
                WriteDescriptorSet::buffer(0, input.clone()),
                WriteDescriptorSet::buffer(1, output.clone()),
            ],
            [],
        )?;
        Ok(KernelBinding {
            pipeline: pipeline.clone(),
            descriptor_set,
        })
    }

    fn enqueue_kernel(
        &mut self,
        binding: &KernelBinding,
        global_shape: [u32; 3],
        block_shape: [u32; 3],
    ) -> Result<()> {
        let result = self.record_dispatch(binding, global_shape, block_shape);
        if result.is_err() {
            self.pending = None;
        }
        result
    }

    fn finish_queue(&mut self) -> Result<()> {
        let Some(builder) = self.pending.take() else {
            return Ok(());
        };
        let commands = builder.build()?;
        vulkano::sync::now(self.device.clone())
            .then_execute(self.queue.clone(), commands)?
            .then_signal_fence_and_flush()?
            .wait(None)?;
        Ok(())
    }
}

/// Compute pipeline along with the descriptor set of one input/output buffer
/// configuration
pub struct KernelBinding {
    pipeline: Arc<ComputePipeline>,
    descriptor_set: Arc<PersistentDescriptorSet>,
}

/// Check that host and device storage have the same length
fn check_lengths(host: usize, device: usize) -> Result<()> {
    if host == device {
        Ok(())
    } else {
        Err(Error::LengthMismatch { host, device })
    }
}

/// Errors that can occur while using the Vulkan device
#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to load the Vulkan library")]
    Loading(#[from] LoadingError),

    #[error("no physical device supports compute")]
    NoMatchingDevice,

    #[error("REACTION_PREFER_DEVICE names unknown device type {0:?}")]
    UnknownDeviceType(String),

    #[error("a Vulkan API call errored out or failed validation ({0})")]
    Vulkan(#[from] Validated<VulkanError>),

    #[error("failed to set up the GLSL compiler")]
    CompilerInit,

    #[error("failed to compile the kernel")]
    Compile(#[from] shaderc::Error),

    #[error("the compiled kernel has no main() entry point")]
    NoEntryPoint,

    #[error("failed to deduce the kernel's pipeline layout ({0})")]
    PipelineLayout(String),

    #[error("failed to allocate a device buffer")]
    AllocateBuffer(#[from] Validated<AllocateBufferError>),

    #[error("failed to access a device buffer from the host")]
    HostAccess(#[from] HostAccessError),

    #[error("failed to submit commands to the device")]
    CommandBufferExec(#[from] CommandBufferExecError),

    #[error("host storage has {host} elements, but the device buffer has {device}")]
    LengthMismatch { host: usize, device: usize },

    #[error("global shape {global_shape:?} is not a multiple of work-group shape {block_shape:?}")]
    PartialWorkGroup {
        global_shape: [u32; 3],
        block_shape: [u32; 3],
    },
}
//
impl From<VulkanError> for Error {
    fn from(value: VulkanError) -> Self {
        Self::Vulkan(value.into())
    }
}
//
impl From<Box<ValidationError>> for Error {
    fn from(value: Box<ValidationError>) -> Self {
        Self::Vulkan(value.into())
    }
}
//
/// Result type associated with the Vulkan device
pub type Result<T> = std::result::Result<T, Error>;

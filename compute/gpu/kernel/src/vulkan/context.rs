//! Vulkan context setup

use super::{Error, Result};
#[allow(unused_imports)]
use log::{debug, error, info, log, trace, warn};
use std::{cmp::Ordering, env::VarError, sync::Arc};
use vulkano::{
    device::{
        physical::{PhysicalDevice, PhysicalDeviceType},
        Device, DeviceCreateInfo, DeviceExtensions, Queue, QueueCreateInfo, QueueFlags,
    },
    instance::{
        debug::{
            DebugUtilsMessageSeverity, DebugUtilsMessageType, DebugUtilsMessenger,
            DebugUtilsMessengerCallback, DebugUtilsMessengerCreateInfo,
        },
        Instance, InstanceCreateFlags, InstanceCreateInfo, InstanceExtensions,
    },
    VulkanLibrary,
};

/// Environment variable that selects the preferred kind of device
///
/// Can be set to `discrete`, `integrated`, `virtual`, `cpu` or `other`.
/// Discrete GPUs are preferred by default.
pub const PREFER_DEVICE_VAR: &str = "REACTION_PREFER_DEVICE";

/// Validation layer, enabled in debug builds when available
const VALIDATION_LAYER: &str = "VK_LAYER_KHRONOS_validation";

/// Load the Vulkan library
pub fn load_library() -> Result<Arc<VulkanLibrary>> {
    let library = VulkanLibrary::new()?;
    info!("Loaded Vulkan library");
    trace!("- Supports Vulkan v{}", library.api_version());
    trace!(
        "- Supports instance extensions {:#?}",
        library.supported_extensions()
    );
    Ok(library)
}

/// Set up a Vulkan instance, with debug messages forwarded to the log crate
/// when the implementation allows for it
pub fn create_instance(
    library: Arc<VulkanLibrary>,
    enumerate_portability: bool,
) -> Result<(Arc<Instance>, Option<DebugUtilsMessenger>)> {
    let mut enabled_layers = Vec::new();
    if cfg!(debug_assertions)
        && library
            .layer_properties()?
            .any(|layer| layer.name() == VALIDATION_LAYER)
    {
        enabled_layers.push(VALIDATION_LAYER.to_owned());
    }
    let enabled_extensions = InstanceExtensions {
        ext_debug_utils: library.supported_extensions().ext_debug_utils,
        ..Default::default()
    };
    let debug_messenger_cfg = enabled_extensions
        .ext_debug_utils
        .then(debug_messenger_info);

    let mut flags = InstanceCreateFlags::default();
    if enumerate_portability {
        flags |= InstanceCreateFlags::ENUMERATE_PORTABILITY;
    }
    let create_info = InstanceCreateInfo {
        flags,
        enabled_extensions,
        enabled_layers,
        debug_utils_messengers: debug_messenger_cfg.clone().into_iter().collect(),
        ..InstanceCreateInfo::application_from_cargo_toml()
    };
    info!("Will now create a Vulkan instance with {create_info:#?}");
    let instance = Instance::new(library, create_info)?;

    let messenger = debug_messenger_cfg
        .map(|cfg| DebugUtilsMessenger::new(instance.clone(), cfg))
        .transpose()?;
    Ok((instance, messenger))
}

/// Forward Vulkan errors and warnings to the log crate
fn debug_messenger_info() -> DebugUtilsMessengerCreateInfo {
    // SAFETY: This callback does not call into Vulkan APIs
    let callback = unsafe {
        DebugUtilsMessengerCallback::new(|severity, ty, data| {
            let level = if severity.intersects(DebugUtilsMessageSeverity::ERROR) {
                log::Level::Error
            } else {
                log::Level::Warn
            };
            log!(level, "Vulkan {ty:?} message: {}", data.message);
        })
    };
    DebugUtilsMessengerCreateInfo {
        message_severity: DebugUtilsMessageSeverity::ERROR | DebugUtilsMessageSeverity::WARNING,
        message_type: DebugUtilsMessageType::VALIDATION | DebugUtilsMessageType::PERFORMANCE,
        ..DebugUtilsMessengerCreateInfo::user_callback(callback)
    }
}

/// Pick the physical device to run on, along with a compute queue family
///
/// If several devices are equally preferred, the first one is picked.
pub fn select_physical(instance: &Arc<Instance>) -> Result<(Arc<PhysicalDevice>, u32)> {
    let preferred_type = preferred_device_type()?;
    instance
        .enumerate_physical_devices()?
        .filter_map(|device| {
            info!("Found physical device {}", device.properties().device_name);
            trace!("- With {:#?}", device.properties());
            let Some(queue_family_index) = compute_queue_family(&device) else {
                info!("=> Device does NOT support compute");
                return None;
            };
            info!("=> Device can run the simulation");
            Some((device, queue_family_index))
        })
        // Using minimum ensures we pick the first device given equal preference
        .min_by(|(device1, _), (device2, _)| {
            device_preference(device1, device2, preferred_type).reverse()
        })
        .inspect(|(device, _)| info!("Selected device {}", device.properties().device_name))
        .ok_or(Error::NoMatchingDevice)
}

/// Kind of device requested through [`PREFER_DEVICE_VAR`]
fn preferred_device_type() -> Result<PhysicalDeviceType> {
    match std::env::var(PREFER_DEVICE_VAR) {
        Ok(string) => match string.as_str() {
            "" | "discrete" => Ok(PhysicalDeviceType::DiscreteGpu),
            "integrated" => Ok(PhysicalDeviceType::IntegratedGpu),
            "virtual" => Ok(PhysicalDeviceType::VirtualGpu),
            "cpu" => Ok(PhysicalDeviceType::Cpu),
            "other" => Ok(PhysicalDeviceType::Other),
            _ => Err(Error::UnknownDeviceType(string)),
        },
        Err(VarError::NotPresent) => Ok(PhysicalDeviceType::DiscreteGpu),
        Err(VarError::NotUnicode(s)) => Err(Error::UnknownDeviceType(
            s.to_string_lossy().into_owned(),
        )),
    }
}

/// Device preference, given a preferred device type
fn device_preference(
    device1: &PhysicalDevice,
    device2: &PhysicalDevice,
    preferred_type: PhysicalDeviceType,
) -> Ordering {
    let device_type_score = |device: &PhysicalDevice| match device.properties().device_type {
        x if x == preferred_type => 6,
        PhysicalDeviceType::DiscreteGpu => 5,
        PhysicalDeviceType::VirtualGpu => 4,
        PhysicalDeviceType::IntegratedGpu => 3,
        PhysicalDeviceType::Cpu => 2,
        PhysicalDeviceType::Other => 1,
        _ => 0,
    };
    device_type_score(device1).cmp(&device_type_score(device2))
}

/// Index of the first queue family with compute support
fn compute_queue_family(device: &PhysicalDevice) -> Option<u32> {
    device
        .queue_family_properties()
        .iter()
        .position(|family| family.queue_flags.intersects(QueueFlags::COMPUTE))
        .map(|idx| idx as u32)
}

/// Create a logical device with a single compute queue
pub fn create_logical(
    physical_device: Arc<PhysicalDevice>,
    queue_family_index: u32,
) -> Result<(Arc<Device>, Arc<Queue>)> {
    let enabled_extensions = DeviceExtensions {
        khr_portability_subset: physical_device.supported_extensions().khr_portability_subset,
        ..Default::default()
    };
    let create_info = DeviceCreateInfo {
        enabled_extensions,
        queue_create_infos: vec![QueueCreateInfo {
            queue_family_index,
            ..Default::default()
        }],
        ..Default::default()
    };
    info!("Will now create a logical device with {create_info:#?}");
    let (device, mut queues) = Device::new(physical_device, create_info)?;
    let queue = queues.next().expect("a single queue was requested");
    if cfg!(feature = "gpu-debug-utils") {
        device.set_debug_utils_object_name(&queue, Some("Compute queue"))?;
    }
    Ok((device, queue))
}

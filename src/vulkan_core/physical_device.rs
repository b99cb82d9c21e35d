use std::collections::HashSet;
use std::ffi::CStr;
use std::fmt::{Debug, Display};

use ash::vk;
use bytesize::ByteSize;

use super::{vk_try, Result};

/// One GPU as reported by the driver, with the capabilities the runner
/// checks before creating a device on it.
#[derive(Clone)]
pub struct Adapter {
    pub physical_device: vk::PhysicalDevice,
    pub index: usize,

    pub properties: vk::PhysicalDeviceProperties,
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,

    pub queue_family_index: Option<u32>,

    pub supports_push_descriptor: bool,
    pub supports_timeline_semaphore: bool,
}

impl Debug for Adapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{index}: {name:?}", index = self.index, name = self.description())
    }
}

impl Display for Adapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{name} ({memory})",
            name = self.description(),
            memory = ByteSize(self.dedicated_memory())
        )
    }
}

impl Adapter {
    pub fn new(
        instance: &ash::Instance,
        instance_api_version: u32,
        physical_device: vk::PhysicalDevice,
        index: usize,
    ) -> Result<Self> {
        let properties = unsafe { instance.get_physical_device_properties(physical_device) };
        let memory_properties =
            unsafe { instance.get_physical_device_memory_properties(physical_device) };

        let extensions =
            unsafe { vk_try!(instance.enumerate_device_extension_properties(physical_device))? };

        unsafe {
            log::trace!(
                "Found Physical Device {physical_device:?} {name:?}:",
                name = CStr::from_ptr(properties.device_name.as_ptr())
            );
            log::trace!("Extensions:");
            for extension in extensions.iter() {
                log::trace!(
                    "    {name:?}: {version} ",
                    name = CStr::from_ptr(extension.extension_name.as_ptr()),
                    version = extension.spec_version
                );
            }
        }

        let extension_names = extensions
            .iter()
            .map(|extension| unsafe { CStr::from_ptr(extension.extension_name.as_ptr()) })
            .collect::<HashSet<_>>();
        let supports_push_descriptor = extension_names.contains(ash::khr::push_descriptor::NAME);

        let supports_timeline_semaphore = queries_vulkan12_features(
            instance_api_version,
            properties.api_version,
        ) && {
            let mut features_v1_2 = vk::PhysicalDeviceVulkan12Features::default();
            {
                let mut features2 =
                    vk::PhysicalDeviceFeatures2::default().push_next(&mut features_v1_2);
                unsafe { instance.get_physical_device_features2(physical_device, &mut features2) };
            }
            features_v1_2.timeline_semaphore == vk::TRUE
        };

        let queue_family_index = unsafe {
            instance
                .get_physical_device_queue_family_properties(physical_device)
                .iter()
                .position(|info| info.queue_flags.contains(vk::QueueFlags::COMPUTE))
                .map(|index| index as u32)
        };

        Ok(Self {
            physical_device,
            index,
            properties,
            memory_properties,
            queue_family_index,
            supports_push_descriptor,
            supports_timeline_semaphore,
        })
    }

    pub fn description(&self) -> String {
        unsafe { CStr::from_ptr(self.properties.device_name.as_ptr()) }
            .to_string_lossy()
            .into_owned()
    }

    /// Bytes of device-local memory.
    pub fn dedicated_memory(&self) -> u64 {
        dedicated_memory(&self.memory_properties)
    }

    pub fn api_version(&self) -> u32 {
        self.properties.api_version
    }
}

/// `vkGetPhysicalDeviceFeatures2` is core only in 1.1 instances, and the
/// Vulkan 1.2 feature struct needs a 1.2 device as well as a 1.2 instance.
fn queries_vulkan12_features(instance_api_version: u32, device_api_version: u32) -> bool {
    instance_api_version.min(device_api_version) >= vk::API_VERSION_1_2
}

pub fn dedicated_memory(memory_properties: &vk::PhysicalDeviceMemoryProperties) -> u64 {
    memory_properties.memory_heaps[..memory_properties.memory_heap_count as usize]
        .iter()
        .filter(|heap| heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL))
        .map(|heap| heap.size)
        .sum()
}

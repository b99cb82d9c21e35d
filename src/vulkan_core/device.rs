use std::fmt::{Debug, Display};
use std::mem::ManuallyDrop;
use std::ops::Deref;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use ash::vk;
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use gpu_allocator::AllocatorDebugSettings;

use super::instance::Instance;
use super::physical_device::Adapter;
use super::{vk_try, Error, Result};

/// Minimum API version a device must expose, expressed as `major.minor`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FeatureLevel {
    pub major: u32,
    pub minor: u32,
}

impl FeatureLevel {
    pub const V1_0: Self = Self::new(1, 0);
    pub const V1_1: Self = Self::new(1, 1);
    pub const V1_2: Self = Self::new(1, 2);
    pub const V1_3: Self = Self::new(1, 3);

    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }
    pub fn from_api_version(version: u32) -> Self {
        Self::new(vk::api_version_major(version), vk::api_version_minor(version))
    }
    pub fn api_version(&self) -> u32 {
        vk::make_api_version(0, self.major, self.minor, 0)
    }
    /// Whether a driver reporting `api_version` can serve this level.
    pub fn is_supported_by(&self, api_version: u32) -> bool {
        Self::from_api_version(api_version) >= *self
    }
}

impl Default for FeatureLevel {
    fn default() -> Self {
        Self::V1_2
    }
}

impl Display for FeatureLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
#[error("Invalid feature level {0:?}, expected `major.minor`")]
pub struct ParseFeatureLevelError(String);

impl FromStr for FeatureLevel {
    type Err = ParseFeatureLevelError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let err = || ParseFeatureLevelError(s.to_owned());
        let (major, minor) = s.trim().split_once('.').ok_or_else(err)?;
        let major = major.parse::<u32>().map_err(|_| err())?;
        let minor = minor.parse::<u32>().map_err(|_| err())?;
        // Version fields are 7 and 10 bits wide.
        if major == 0 || major > 0x7f || minor > 0x3ff {
            return Err(err());
        }
        Ok(Self::new(major, minor))
    }
}

/// Logical device on one adapter, with its compute queue family and the
/// memory allocator every resource of the run is carved from.
pub struct Device {
    _instance: Arc<Instance>,
    device: ash::Device,
    pub adapter: Adapter,
    pub queue_family_index: u32,
    pub push_descriptor: ash::khr::push_descriptor::Device,
    allocator: ManuallyDrop<Mutex<Allocator>>,
    abandoned: AtomicBool,
}

impl Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("adapter", &self.adapter)
            .field("queue_family_index", &self.queue_family_index)
            .finish()
    }
}

/// Checks everything device creation depends on, before any driver object exists.
pub fn check_adapter(
    adapter: &Adapter,
    instance_api_version: u32,
    feature_level: FeatureLevel,
) -> Result<u32> {
    let supported = adapter.api_version().min(instance_api_version);
    if !feature_level.is_supported_by(supported) {
        return Err(Error::UnsupportedFeatureLevel {
            adapter: adapter.description(),
            supported: FeatureLevel::from_api_version(supported),
            requested: feature_level,
        });
    }
    if !FeatureLevel::V1_2.is_supported_by(supported) || !adapter.supports_timeline_semaphore {
        return Err(Error::MissingFeature {
            adapter: adapter.description(),
            feature: "timeline semaphores",
        });
    }
    if !adapter.supports_push_descriptor {
        return Err(Error::MissingFeature {
            adapter: adapter.description(),
            feature: "VK_KHR_push_descriptor",
        });
    }
    adapter.queue_family_index.ok_or(Error::QueueFamilyNotFound)
}

impl Device {
    #[profiling::function]
    pub fn create(
        instance: &Arc<Instance>,
        adapter: &Adapter,
        feature_level: FeatureLevel,
    ) -> Result<Arc<Self>> {
        let queue_family_index = check_adapter(adapter, instance.api_version(), feature_level)?;
        log::info!("Creating device on {adapter} at feature level {feature_level}");

        let device_extension_names = [ash::khr::push_descriptor::NAME.as_ptr()];

        let mut features_v1_2 =
            vk::PhysicalDeviceVulkan12Features::default().timeline_semaphore(true);

        let priorities = [1.0];
        let queue_info = vk::DeviceQueueCreateInfo::default()
            .queue_family_index(queue_family_index)
            .queue_priorities(&priorities);

        let device_create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(std::slice::from_ref(&queue_info))
            .enabled_extension_names(&device_extension_names)
            .push_next(&mut features_v1_2);

        let device = unsafe {
            vk_try!(instance.create_device(adapter.physical_device, &device_create_info, None))?
        };

        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: ash::Instance::clone(instance),
            device: device.clone(),
            physical_device: adapter.physical_device,
            debug_settings: AllocatorDebugSettings {
                log_leaks_on_shutdown: true,
                log_memory_information: log::log_enabled!(log::Level::Trace),
                log_allocations: log::log_enabled!(log::Level::Trace),
                ..Default::default()
            },
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        });
        let allocator = match allocator {
            Ok(allocator) => allocator,
            Err(err) => {
                unsafe { device.destroy_device(None) };
                return Err(err.into());
            }
        };

        let push_descriptor = ash::khr::push_descriptor::Device::new(instance, &device);

        Ok(Arc::new(Self {
            _instance: instance.clone(),
            device,
            adapter: adapter.clone(),
            queue_family_index,
            push_descriptor,
            allocator: ManuallyDrop::new(Mutex::new(allocator)),
            abandoned: AtomicBool::new(false),
        }))
    }

    /// Marks the device as running work that will not be waited for again.
    pub(crate) fn abandon_in_flight_work(&self) {
        self.abandoned.store(true, Ordering::Release);
    }
    /// Whether some submission timed out. Resources its work may touch are
    /// leaked rather than destroyed from then on.
    pub fn has_abandoned_work(&self) -> bool {
        self.abandoned.load(Ordering::Acquire)
    }

    pub(crate) fn allocator(&self) -> std::sync::MutexGuard<'_, Allocator> {
        self.allocator
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Deref for Device {
    type Target = ash::Device;

    fn deref(&self) -> &Self::Target {
        &self.device
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        if self.has_abandoned_work() {
            log::warn!("Leaking a device with abandoned work in flight");
            return;
        }
        unsafe {
            if let Err(result) = self.device.device_wait_idle() {
                log::warn!("Waiting for device idle failed with {result:?}");
            }
            // Frees the allocator's memory blocks, which must happen before the device goes.
            ManuallyDrop::drop(&mut self.allocator);
            self.device.destroy_device(None);
        }
    }
}

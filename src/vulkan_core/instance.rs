use std::borrow::Cow;
use std::ffi::CStr;
use std::fmt::Debug;
use std::ops::Deref;

use ash::vk;

use super::physical_device::Adapter;
use super::{vk_try, Result};

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";
const APP_NAME: &CStr = c"dispatch-runner";

/// Newest API version the runner asks the loader for.
const MAX_API_VERSION: u32 = vk::API_VERSION_1_3;

unsafe extern "system" fn vulkan_debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut std::os::raw::c_void,
) -> vk::Bool32 {
    let callback_data = *p_callback_data;
    let message_id_number = callback_data.message_id_number;

    let message_id_name = if callback_data.p_message_id_name.is_null() {
        Cow::from("")
    } else {
        CStr::from_ptr(callback_data.p_message_id_name).to_string_lossy()
    };

    let message = if callback_data.p_message.is_null() {
        Cow::from("")
    } else {
        CStr::from_ptr(callback_data.p_message).to_string_lossy()
    };

    let level = match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE => log::Level::Trace,
        vk::DebugUtilsMessageSeverityFlagsEXT::INFO => log::Level::Info,
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => log::Level::Warn,
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => log::Level::Error,
        _ => return vk::FALSE,
    };
    log::log!(
        level,
        "{message_type:?} [{message_id_name} ({message_id_number})] : {message}"
    );

    vk::FALSE
}

struct DebugMessenger {
    loader: ash::ext::debug_utils::Instance,
    messenger: vk::DebugUtilsMessengerEXT,
}

/// Loaded driver entry points plus the `VkInstance`, optionally with the
/// validation layer and a messenger forwarding its output into `log`.
pub struct Instance {
    _entry: ash::Entry,
    instance: ash::Instance,
    api_version: u32,
    debug: Option<DebugMessenger>,
}

impl Debug for Instance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instance")
            .field("api_version", &self.api_version)
            .field("validation", &self.validation_enabled())
            .finish()
    }
}

impl Instance {
    pub fn create(validation: bool) -> Result<Self> {
        unsafe {
            let entry = ash::Entry::load()?;

            let loader_version =
                vk_try!(entry.try_enumerate_instance_version())?.unwrap_or(vk::API_VERSION_1_0);
            let api_version = loader_version.min(MAX_API_VERSION);
            log::trace!(
                "Loader supports Vulkan {}.{}",
                vk::api_version_major(loader_version),
                vk::api_version_minor(loader_version)
            );

            let validation = validation && Self::validation_available(&entry)?;

            let mut layer_names = vec![];
            let mut extension_names = vec![];
            if validation {
                layer_names.push(VALIDATION_LAYER.as_ptr());
                extension_names.push(ash::ext::debug_utils::NAME.as_ptr());
            }

            let appinfo = vk::ApplicationInfo::default()
                .application_name(APP_NAME)
                .application_version(0)
                .engine_name(APP_NAME)
                .engine_version(0)
                .api_version(api_version);

            let create_info = vk::InstanceCreateInfo::default()
                .application_info(&appinfo)
                .enabled_layer_names(&layer_names)
                .enabled_extension_names(&extension_names);

            let instance = vk_try!(entry.create_instance(&create_info, None))?;

            let debug = if validation {
                let debug_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
                    .message_severity(
                        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                            | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                            | vk::DebugUtilsMessageSeverityFlagsEXT::INFO,
                    )
                    .message_type(
                        vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                            | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                            | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
                    )
                    .pfn_user_callback(Some(vulkan_debug_callback));

                let loader = ash::ext::debug_utils::Instance::new(&entry, &instance);
                match loader.create_debug_utils_messenger(&debug_info, None) {
                    Ok(messenger) => Some(DebugMessenger { loader, messenger }),
                    Err(result) => {
                        instance.destroy_instance(None);
                        return Err(super::Error::Driver {
                            call: "loader.create_debug_utils_messenger(&debug_info, None)",
                            result,
                        });
                    }
                }
            } else {
                None
            };

            log::debug!("Created instance with validation: {validation}");

            Ok(Self {
                _entry: entry,
                instance,
                api_version,
                debug,
            })
        }
    }

    fn validation_available(entry: &ash::Entry) -> Result<bool> {
        let layers = unsafe { vk_try!(entry.enumerate_instance_layer_properties())? };
        let found = layers
            .iter()
            .any(|layer| unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) } == VALIDATION_LAYER);
        if !found {
            log::warn!("Validation was requested, but {VALIDATION_LAYER:?} is not installed!");
        }
        Ok(found)
    }

    /// Lists all adapters in the order the driver reports them.
    #[profiling::function]
    pub fn enumerate_adapters(&self) -> Result<Vec<Adapter>> {
        let physical_devices = unsafe { vk_try!(self.instance.enumerate_physical_devices())? };
        physical_devices
            .into_iter()
            .enumerate()
            .map(|(index, physical_device)| {
                Adapter::new(&self.instance, self.api_version, physical_device, index)
            })
            .collect()
    }

    pub fn api_version(&self) -> u32 {
        self.api_version
    }
    pub fn validation_enabled(&self) -> bool {
        self.debug.is_some()
    }
}

impl Deref for Instance {
    type Target = ash::Instance;

    fn deref(&self) -> &Self::Target {
        &self.instance
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        unsafe {
            if let Some(debug) = self.debug.take() {
                debug
                    .loader
                    .destroy_debug_utils_messenger(debug.messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

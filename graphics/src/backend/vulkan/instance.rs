//! Vulkan instance creation and configuration.

use std::ffi::{CStr, CString, c_char};

use ash::vk;

use crate::error::GraphicsError;
use crate::instance::InstanceParameters;

use super::debug;

/// Required Vulkan API version: timeline semaphores, buffer device
/// addresses, dynamic rendering and synchronization2 are all core.
pub const REQUIRED_API_VERSION: u32 = vk::make_api_version(0, 1, 3, 0);

/// Validation layer name.
const VALIDATION_LAYER_NAME: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Surface extensions enabled whenever the loader offers them, so any
/// window handed in later can get a surface.
const SURFACE_EXTENSIONS: &[&CStr] = &[
    ash::khr::surface::NAME,
    ash::khr::win32_surface::NAME,
    ash::khr::xlib_surface::NAME,
    ash::khr::xcb_surface::NAME,
    ash::khr::wayland_surface::NAME,
    ash::khr::android_surface::NAME,
    ash::ext::metal_surface::NAME,
];

/// A created instance plus its optional validation messenger.
pub struct CreatedInstance {
    pub instance: ash::Instance,
    pub debug_utils: Option<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
    /// Whether `VK_KHR_surface` was enabled.
    pub surface_enabled: bool,
}

/// Create a Vulkan instance, with the validation layer if requested and present.
pub fn create_instance(
    entry: &ash::Entry,
    params: &InstanceParameters,
) -> Result<CreatedInstance, GraphicsError> {
    let version = unsafe { entry.try_enumerate_instance_version() }
        .ok()
        .flatten()
        .unwrap_or(vk::API_VERSION_1_0);
    if version < REQUIRED_API_VERSION {
        return Err(GraphicsError::InitializationFailed(format!(
            "Vulkan {}.{} loader found, 1.3 required",
            vk::api_version_major(version),
            vk::api_version_minor(version)
        )));
    }

    let validation_available = params.validation && check_validation_layer_support(entry);
    if params.validation && !validation_available {
        log::warn!("Validation layers requested but not available");
    }

    let app_name = CString::new(params.app_name.as_str())
        .map_err(|e| GraphicsError::InvalidParameter(format!("application name: {e}")))?;

    let app_info = vk::ApplicationInfo::default()
        .application_name(&app_name)
        .application_version(vk::make_api_version(0, 0, 1, 0))
        .engine_name(c"Lumen")
        .engine_version(vk::make_api_version(0, 0, 1, 0))
        .api_version(REQUIRED_API_VERSION);

    let available = available_extensions(entry);
    let mut extensions: Vec<*const c_char> = SURFACE_EXTENSIONS
        .iter()
        .filter(|name| available.iter().any(|a| a.as_c_str() == **name))
        .map(|name| name.as_ptr())
        .collect();

    let surface_enabled = available
        .iter()
        .any(|a| a.as_c_str() == ash::khr::surface::NAME);

    if validation_available {
        extensions.push(ash::ext::debug_utils::NAME.as_ptr());
    }

    #[allow(unused_mut)]
    let mut create_flags = vk::InstanceCreateFlags::empty();

    #[cfg(target_os = "macos")]
    {
        extensions.push(ash::khr::portability_enumeration::NAME.as_ptr());
        create_flags |= vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR;
    }

    let layer_names: Vec<*const c_char> = if validation_available {
        vec![VALIDATION_LAYER_NAME.as_ptr()]
    } else {
        vec![]
    };

    let create_info = vk::InstanceCreateInfo::default()
        .flags(create_flags)
        .application_info(&app_info)
        .enabled_extension_names(&extensions)
        .enabled_layer_names(&layer_names);

    let instance = unsafe { entry.create_instance(&create_info, None) }.map_err(|e| {
        GraphicsError::InitializationFailed(format!("Failed to create Vulkan instance: {e:?}"))
    })?;
    log::trace!(
        "Created Vulkan instance with {} extensions (validation: {validation_available})",
        extensions.len()
    );

    let debug_utils = if validation_available {
        let debug_utils = ash::ext::debug_utils::Instance::new(entry, &instance);
        match debug::create_debug_messenger(&debug_utils) {
            Ok(messenger) => Some((debug_utils, messenger)),
            Err(e) => {
                log::warn!("{e}");
                None
            }
        }
    } else {
        None
    };

    Ok(CreatedInstance {
        instance,
        debug_utils,
        surface_enabled,
    })
}

fn available_extensions(entry: &ash::Entry) -> Vec<CString> {
    unsafe { entry.enumerate_instance_extension_properties(None) }
        .unwrap_or_default()
        .iter()
        .filter_map(|ext| ext.extension_name_as_c_str().ok().map(CStr::to_owned))
        .collect()
}

/// Check if the validation layer is available.
fn check_validation_layer_support(entry: &ash::Entry) -> bool {
    let Ok(available_layers) = (unsafe { entry.enumerate_instance_layer_properties() }) else {
        return false;
    };

    available_layers
        .iter()
        .any(|layer| layer.layer_name_as_c_str().is_ok_and(|name| name == VALIDATION_LAYER_NAME))
}

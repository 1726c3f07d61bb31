//! Vulkan validation layer debug messenger.

use std::ffi::CStr;

use ash::vk;

use crate::error::GraphicsError;

/// Message ids raised by patterns the renderer uses on purpose: clearing
/// with a value other than the fast-clear value, and keeping upload memory
/// persistently mapped.
const BENIGN_MESSAGE_IDS: &[&str] = &[
    "BestPractices-ClearColor-NotCompressed",
    "BestPractices-vkCmdClearAttachments-clear-after-load",
    "BestPractices-AllocateMemory-SetPriority",
];

/// Whether a message with this id name is dropped.
pub fn is_benign(id_name: &str) -> bool {
    BENIGN_MESSAGE_IDS.iter().any(|benign| id_name.ends_with(benign))
}

/// Create a debug messenger for validation layer output.
///
/// Info and verbose messages are not requested.
pub fn create_debug_messenger(
    debug_utils: &ash::ext::debug_utils::Instance,
) -> Result<vk::DebugUtilsMessengerEXT, GraphicsError> {
    let create_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
        .message_severity(
            vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING,
        )
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .pfn_user_callback(Some(debug_callback));

    let messenger = unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }
        .map_err(|e| {
            GraphicsError::InitializationFailed(format!("Failed to create debug messenger: {e:?}"))
        })?;

    Ok(messenger)
}

/// # Safety
///
/// `ptr` must be null or point to a valid null-terminated string.
unsafe fn lossy(ptr: *const std::ffi::c_char) -> String {
    if ptr.is_null() {
        String::new()
    } else {
        unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned()
    }
}

/// Debug callback function for validation layer messages.
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if callback_data.is_null() {
        return vk::FALSE;
    }
    // SAFETY: callback_data is guaranteed to be valid by the Vulkan driver
    let data = unsafe { *callback_data };
    let id_name = unsafe { lossy(data.p_message_id_name) };
    if is_benign(&id_name) {
        return vk::FALSE;
    }
    let message = unsafe { lossy(data.p_message) };

    let type_str = match message_type {
        vk::DebugUtilsMessageTypeFlagsEXT::GENERAL => "General",
        vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION => "Validation",
        vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE => "Performance",
        _ => "Unknown",
    };

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            log::error!("[Vulkan {type_str}] {message}");
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            log::warn!("[Vulkan {type_str}] {message}");
        }
        _ => {
            log::debug!("[Vulkan {type_str}] {message}");
        }
    }

    vk::FALSE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_benign_ids_match_with_prefix() {
        assert!(is_benign("UNASSIGNED-BestPractices-ClearColor-NotCompressed"));
        assert!(is_benign("BestPractices-ClearColor-NotCompressed"));
        assert!(!is_benign("VUID-vkCmdDraw-None-02859"));
        assert!(!is_benign(""));
    }
}

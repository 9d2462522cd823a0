// SPDX-License-Identifier: CEPL-1.0
use std::ffi::CStr;
use std::os::raw::c_void;

use ash::ext::debug_utils;
use ash::{vk, Entry, Instance};
use raw_window_handle::RawDisplayHandle;
use tracing::{debug, error, info, trace, warn};

use crate::error::{Result, VkResultExt};

pub const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _types: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user: *mut c_void,
) -> vk::Bool32 {
    if data.is_null() {
        return vk::FALSE;
    }
    let message = unsafe {
        let p_message = (*data).p_message;
        if p_message.is_null() {
            return vk::FALSE;
        }
        CStr::from_ptr(p_message).to_string_lossy()
    };
    use vk::DebugUtilsMessageSeverityFlagsEXT as Severity;
    if severity.contains(Severity::ERROR) {
        error!("[Vulkan] {message}");
    } else if severity.contains(Severity::WARNING) {
        warn!("[Vulkan] {message}");
    } else if severity.contains(Severity::INFO) {
        debug!("[Vulkan] {message}");
    } else {
        trace!("[Vulkan] {message}");
    }
    vk::FALSE
}

/// The validation messenger, present only when the layer was enabled.
pub struct DebugMessenger {
    loader: debug_utils::Instance,
    messenger: vk::DebugUtilsMessengerEXT,
}

impl DebugMessenger {
    pub unsafe fn new(entry: &Entry, instance: &Instance) -> Result<Self> {
        let loader = debug_utils::Instance::new(entry, instance);
        let ci = vk::DebugUtilsMessengerCreateInfoEXT {
            s_type: vk::StructureType::DEBUG_UTILS_MESSENGER_CREATE_INFO_EXT,
            message_severity: vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            message_type: vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            pfn_user_callback: Some(debug_callback),
            ..Default::default()
        };
        let messenger = unsafe { loader.create_debug_utils_messenger(&ci, None) }
            .creating("debug messenger")?;
        Ok(DebugMessenger { loader, messenger })
    }

    pub unsafe fn destroy(self) {
        unsafe { self.loader.destroy_debug_utils_messenger(self.messenger, None) };
    }
}

fn layer_available(entry: &Entry, layer: &CStr) -> Result<bool> {
    let layers = unsafe { entry.enumerate_instance_layer_properties() }
        .calling("vkEnumerateInstanceLayerProperties")?;
    Ok(layers
        .iter()
        .any(|l| unsafe { CStr::from_ptr(l.layer_name.as_ptr()) } == layer))
}

/// Creates a Vulkan 1.1 instance with the window-system extensions, plus the
/// validation layer and debug utils when requested and installed.
/// Returns whether validation ended up enabled.
pub unsafe fn create_instance(
    entry: &Entry,
    display: RawDisplayHandle,
    validation: bool,
) -> Result<(Instance, bool)> {
    let app = c"Stereo Viewer";
    let app_info = vk::ApplicationInfo {
        s_type: vk::StructureType::APPLICATION_INFO,
        p_application_name: app.as_ptr(),
        application_version: 0,
        p_engine_name: app.as_ptr(),
        engine_version: 0,
        // multiview and properties2 are core from here on
        api_version: vk::API_VERSION_1_1,
        ..Default::default()
    };

    let mut extensions = ash_window::enumerate_required_extensions(display)
        .calling("enumerate_required_extensions")?
        .to_vec();

    let validation = if validation && !layer_available(entry, VALIDATION_LAYER)? {
        warn!("vk: validation requested but VK_LAYER_KHRONOS_validation is not installed");
        false
    } else {
        validation
    };
    let layers = [VALIDATION_LAYER.as_ptr()];
    let (enabled_layer_count, pp_enabled_layer_names) = if validation {
        extensions.push(debug_utils::NAME.as_ptr());
        (layers.len() as u32, layers.as_ptr())
    } else {
        (0u32, std::ptr::null())
    };

    let create_info = vk::InstanceCreateInfo {
        s_type: vk::StructureType::INSTANCE_CREATE_INFO,
        p_application_info: &app_info,
        enabled_extension_count: extensions.len() as u32,
        pp_enabled_extension_names: extensions.as_ptr(),
        enabled_layer_count,
        pp_enabled_layer_names,
        ..Default::default()
    };
    let instance = unsafe { entry.create_instance(&create_info, None) }.creating("instance")?;
    info!(
        "vk: instance created (api 1.1, {} extension(s), validation={validation})",
        extensions.len()
    );
    Ok((instance, validation))
}

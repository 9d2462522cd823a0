// SPDX-License-Identifier: CEPL-1.0
use std::ffi::{CStr, CString};
use std::os::raw::c_void;

use ash::khr::{multiview, surface, swapchain};
use ash::{vk, Device, Instance};
use tracing::{debug, info};

use crate::alloc::TEXTURE_FORMAT;
use crate::error::{Result, VkResultExt};
use crate::gpu::DeviceCaps;
use crate::negotiate::{pick_depth_format, select_adapter, AdapterInfo, QueueFamilyInfo};

#[derive(Clone, Copy, Debug)]
pub struct Queues {
    pub graphics: vk::Queue,
    pub present: vk::Queue,
    pub transfer: vk::Queue,
}

/// The logical device and what was learned about its physical device.
pub struct DeviceBundle {
    pub phys: vk::PhysicalDevice,
    pub memory: vk::PhysicalDeviceMemoryProperties,
    pub device: Device,
    pub queues: Queues,
    pub caps: DeviceCaps,
}

unsafe fn inspect_adapter(
    instance: &Instance,
    surface_loader: &surface::Instance,
    surface: vk::SurfaceKHR,
    phys: vk::PhysicalDevice,
) -> Result<AdapterInfo> {
    let props = unsafe { instance.get_physical_device_properties(phys) };
    let name = unsafe { CStr::from_ptr(props.device_name.as_ptr()) }
        .to_string_lossy()
        .into_owned();

    // features2 is only callable on 1.1 devices; older ones are rejected by selection
    let (features, multiview_feature) = if props.api_version >= vk::API_VERSION_1_1 {
        let mut mv = vk::PhysicalDeviceMultiviewFeatures {
            s_type: vk::StructureType::PHYSICAL_DEVICE_MULTIVIEW_FEATURES,
            ..Default::default()
        };
        let mut features2 = vk::PhysicalDeviceFeatures2 {
            s_type: vk::StructureType::PHYSICAL_DEVICE_FEATURES_2,
            p_next: (&mut mv as *mut vk::PhysicalDeviceMultiviewFeatures).cast::<c_void>(),
            ..Default::default()
        };
        unsafe { instance.get_physical_device_features2(phys, &mut features2) };
        let features = features2.features;
        (features, mv.multiview == vk::TRUE)
    } else {
        (unsafe { instance.get_physical_device_features(phys) }, false)
    };

    let extensions = unsafe { instance.enumerate_device_extension_properties(phys) }
        .calling("vkEnumerateDeviceExtensionProperties")?
        .iter()
        .map(|e| unsafe { CStr::from_ptr(e.extension_name.as_ptr()) }.to_owned())
        .collect::<Vec<CString>>();

    let family_props = unsafe { instance.get_physical_device_queue_family_properties(phys) };
    let mut queue_families = Vec::with_capacity(family_props.len());
    for (index, family) in family_props.iter().enumerate() {
        let present = unsafe {
            surface_loader.get_physical_device_surface_support(phys, index as u32, surface)
        }
        .calling("vkGetPhysicalDeviceSurfaceSupportKHR")?;
        queue_families.push(QueueFamilyInfo {
            flags: family.queue_flags,
            count: family.queue_count,
            present,
        });
    }

    let surface_formats = unsafe { surface_loader.get_physical_device_surface_formats(phys, surface) }
        .calling("vkGetPhysicalDeviceSurfaceFormatsKHR")?
        .len();
    let present_modes =
        unsafe { surface_loader.get_physical_device_surface_present_modes(phys, surface) }
            .calling("vkGetPhysicalDeviceSurfacePresentModesKHR")?
            .len();

    let optimal = |format| unsafe {
        instance
            .get_physical_device_format_properties(phys, format)
            .optimal_tiling_features
    };
    let depth_format = pick_depth_format(|f| {
        optimal(f).contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
    });
    let linear_blit =
        optimal(TEXTURE_FORMAT).contains(vk::FormatFeatureFlags::SAMPLED_IMAGE_FILTER_LINEAR);

    debug!(
        "vk: adapter {name} type={:?} api={}.{} families={}",
        props.device_type,
        vk::api_version_major(props.api_version),
        vk::api_version_minor(props.api_version),
        queue_families.len()
    );
    Ok(AdapterInfo {
        name,
        device_type: props.device_type,
        api_version: props.api_version,
        extensions,
        geometry_shader: features.geometry_shader == vk::TRUE,
        sampler_anisotropy: features.sampler_anisotropy == vk::TRUE,
        multiview: multiview_feature,
        queue_families,
        surface_formats,
        present_modes,
        color_samples: props.limits.framebuffer_color_sample_counts,
        depth_samples: props.limits.framebuffer_depth_sample_counts,
        max_anisotropy: props.limits.max_sampler_anisotropy,
        depth_format,
        linear_blit,
    })
}

/// Picks the physical device and creates the logical device with one queue per family.
pub unsafe fn create_device(
    instance: &Instance,
    surface_loader: &surface::Instance,
    surface: vk::SurfaceKHR,
) -> Result<DeviceBundle> {
    let physical = unsafe { instance.enumerate_physical_devices() }
        .calling("vkEnumeratePhysicalDevices")?;
    let mut adapters = Vec::with_capacity(physical.len());
    for &phys in &physical {
        adapters.push(unsafe { inspect_adapter(instance, surface_loader, surface, phys)? });
    }
    let (index, caps) = select_adapter(&adapters)?;
    let phys = physical[index];
    let adapter = &adapters[index];

    let mut families = vec![
        caps.families.graphics,
        caps.families.present,
        caps.families.transfer,
    ];
    families.sort_unstable();
    families.dedup();
    let priorities = [1.0_f32];
    let queue_infos: Vec<vk::DeviceQueueCreateInfo> = families
        .iter()
        .map(|&family| vk::DeviceQueueCreateInfo {
            s_type: vk::StructureType::DEVICE_QUEUE_CREATE_INFO,
            queue_family_index: family,
            queue_count: 1,
            p_queue_priorities: priorities.as_ptr(),
            ..Default::default()
        })
        .collect();

    let mut extensions = vec![swapchain::NAME.as_ptr()];
    if adapter.extensions.iter().any(|e| e.as_c_str() == multiview::NAME) {
        extensions.push(multiview::NAME.as_ptr());
    }

    let mut mv = vk::PhysicalDeviceMultiviewFeatures {
        s_type: vk::StructureType::PHYSICAL_DEVICE_MULTIVIEW_FEATURES,
        multiview: vk::TRUE,
        ..Default::default()
    };
    let mut features2 = vk::PhysicalDeviceFeatures2 {
        s_type: vk::StructureType::PHYSICAL_DEVICE_FEATURES_2,
        p_next: (&mut mv as *mut vk::PhysicalDeviceMultiviewFeatures).cast::<c_void>(),
        features: vk::PhysicalDeviceFeatures {
            geometry_shader: vk::TRUE,
            sampler_anisotropy: vk::TRUE,
            ..Default::default()
        },
        ..Default::default()
    };
    // pEnabledFeatures stays null: the features travel in the pNext chain.
    let create_info = vk::DeviceCreateInfo {
        s_type: vk::StructureType::DEVICE_CREATE_INFO,
        p_next: (&mut features2 as *mut vk::PhysicalDeviceFeatures2).cast::<c_void>(),
        queue_create_info_count: queue_infos.len() as u32,
        p_queue_create_infos: queue_infos.as_ptr(),
        enabled_extension_count: extensions.len() as u32,
        pp_enabled_extension_names: extensions.as_ptr(),
        ..Default::default()
    };
    let device = unsafe { instance.create_device(phys, &create_info, None) }
        .creating("logical device")?;

    let queues = unsafe {
        Queues {
            graphics: device.get_device_queue(caps.families.graphics, 0),
            present: device.get_device_queue(caps.families.present, 0),
            transfer: device.get_device_queue(caps.families.transfer, 0),
        }
    };
    let memory = unsafe { instance.get_physical_device_memory_properties(phys) };
    info!(
        "vk: device created ({} queue famil{}, {} extension(s))",
        families.len(),
        if families.len() == 1 { "y" } else { "ies" },
        extensions.len()
    );
    Ok(DeviceBundle {
        phys,
        memory,
        device,
        queues,
        caps,
    })
}

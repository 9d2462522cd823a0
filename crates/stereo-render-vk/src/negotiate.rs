// SPDX-License-Identifier: CEPL-1.0
//! Device and surface negotiation. Pure functions over queried properties.
use std::ffi::CString;

use ash::vk;
use stereo_render::RenderSize;
use tracing::{debug, info};

use crate::error::{RenderError, Result};
use crate::gpu::{DeviceCaps, QueueFamilies};

/// Depth formats in order of preference.
pub const DEPTH_CANDIDATES: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D32_SFLOAT,
    vk::Format::D24_UNORM_S8_UINT,
];

pub const PREFERRED_SURFACE_FORMAT: vk::SurfaceFormatKHR = vk::SurfaceFormatKHR {
    format: vk::Format::B8G8R8A8_UNORM,
    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueFamilyInfo {
    pub flags: vk::QueueFlags,
    pub count: u32,
    pub present: bool,
}

/// What the backend learned about one physical device.
#[derive(Clone, Debug)]
pub struct AdapterInfo {
    pub name: String,
    pub device_type: vk::PhysicalDeviceType,
    pub api_version: u32,
    pub extensions: Vec<CString>,
    pub geometry_shader: bool,
    pub sampler_anisotropy: bool,
    pub multiview: bool,
    pub queue_families: Vec<QueueFamilyInfo>,
    pub surface_formats: usize,
    pub present_modes: usize,
    pub color_samples: vk::SampleCountFlags,
    pub depth_samples: vk::SampleCountFlags,
    pub max_anisotropy: f32,
    pub depth_format: Option<vk::Format>,
    pub linear_blit: bool,
}

impl AdapterInfo {
    fn has_extension(&self, name: &std::ffi::CStr) -> bool {
        self.extensions.iter().any(|e| e.as_c_str() == name)
    }

    /// Features2 and multiview are only queried on 1.1 devices.
    fn is_vulkan_1_1(&self) -> bool {
        vk::api_version_major(self.api_version) > 1 || vk::api_version_minor(self.api_version) >= 1
    }
}

pub fn find_queue_families(families: &[QueueFamilyInfo]) -> Option<QueueFamilies> {
    let usable = |f: &&QueueFamilyInfo| f.count > 0;
    let graphics = families
        .iter()
        .position(|f| usable(&f) && f.flags.contains(vk::QueueFlags::GRAPHICS))?;
    // Prefer presenting from the graphics family; fall back to any presenting family.
    let present = if families[graphics].present {
        graphics
    } else {
        families.iter().position(|f| usable(&f) && f.present)?
    };
    let transfer = families
        .iter()
        .position(|f| {
            usable(&f)
                && f.flags.contains(vk::QueueFlags::TRANSFER)
                && !f.flags.contains(vk::QueueFlags::GRAPHICS)
        })
        .unwrap_or(graphics);
    Some(QueueFamilies {
        graphics: graphics as u32,
        present: present as u32,
        transfer: transfer as u32,
    })
}

/// Why an adapter cannot run the renderer, or `None` if it can.
pub fn rejection_reason(adapter: &AdapterInfo) -> Option<String> {
    if adapter.device_type != vk::PhysicalDeviceType::DISCRETE_GPU {
        return Some(format!("not a discrete GPU ({:?})", adapter.device_type));
    }
    if !adapter.geometry_shader {
        return Some("geometry shaders unsupported".into());
    }
    if !adapter.sampler_anisotropy {
        return Some("anisotropic sampling unsupported".into());
    }
    if !adapter.has_extension(ash::khr::swapchain::NAME) {
        return Some("VK_KHR_swapchain missing".into());
    }
    if !adapter.is_vulkan_1_1() {
        return Some(format!(
            "Vulkan {}.{} device, 1.1 required",
            vk::api_version_major(adapter.api_version),
            vk::api_version_minor(adapter.api_version)
        ));
    }
    if !adapter.multiview {
        return Some("multiview unsupported".into());
    }
    if adapter.surface_formats == 0 || adapter.present_modes == 0 {
        return Some("surface exposes no formats or present modes".into());
    }
    if find_queue_families(&adapter.queue_families).is_none() {
        return Some("no graphics + present queue families".into());
    }
    if adapter.depth_format.is_none() {
        return Some("no usable depth attachment format".into());
    }
    None
}

/// Picks the first suitable adapter and derives the capabilities the renderer runs with.
pub fn select_adapter(adapters: &[AdapterInfo]) -> Result<(usize, DeviceCaps)> {
    for (index, adapter) in adapters.iter().enumerate() {
        if let Some(reason) = rejection_reason(adapter) {
            debug!("skipping {}: {reason}", adapter.name);
            continue;
        }
        let (Some(families), Some(depth_format)) = (
            find_queue_families(&adapter.queue_families),
            adapter.depth_format,
        ) else {
            continue;
        };
        let caps = DeviceCaps {
            device_name: adapter.name.clone(),
            families,
            samples: max_usable_sample_count(adapter.color_samples, adapter.depth_samples),
            depth_format,
            max_anisotropy: adapter.max_anisotropy.min(16.0),
            linear_blit: adapter.linear_blit,
        };
        info!(
            "vk: using {} (samples={:?}, depth={}, queues g={} p={} t={})",
            caps.device_name,
            caps.samples,
            fmt_name(caps.depth_format),
            families.graphics,
            families.present,
            families.transfer
        );
        return Ok((index, caps));
    }
    Err(RenderError::Capability(format!(
        "none of {} physical device(s) can run the stereo renderer",
        adapters.len()
    )))
}

pub fn max_usable_sample_count(
    color: vk::SampleCountFlags,
    depth: vk::SampleCountFlags,
) -> vk::SampleCountFlags {
    let both = color & depth;
    [
        vk::SampleCountFlags::TYPE_64,
        vk::SampleCountFlags::TYPE_32,
        vk::SampleCountFlags::TYPE_16,
        vk::SampleCountFlags::TYPE_8,
        vk::SampleCountFlags::TYPE_4,
        vk::SampleCountFlags::TYPE_2,
    ]
    .into_iter()
    .find(|s| both.contains(*s))
    .unwrap_or(vk::SampleCountFlags::TYPE_1)
}

/// First candidate the device can use as an optimal-tiling depth attachment.
pub fn pick_depth_format(supports: impl Fn(vk::Format) -> bool) -> Option<vk::Format> {
    DEPTH_CANDIDATES.into_iter().find(|f| supports(*f))
}

pub fn has_stencil(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D32_SFLOAT_S8_UINT | vk::Format::D24_UNORM_S8_UINT
    )
}

pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> vk::SurfaceFormatKHR {
    match formats {
        // A lone UNDEFINED entry means the surface has no preference.
        [only] if only.format == vk::Format::UNDEFINED => PREFERRED_SURFACE_FORMAT,
        _ => formats
            .iter()
            .copied()
            .find(|f| {
                f.format == PREFERRED_SURFACE_FORMAT.format
                    && f.color_space == PREFERRED_SURFACE_FORMAT.color_space
            })
            .or_else(|| formats.first().copied())
            .unwrap_or(PREFERRED_SURFACE_FORMAT),
    }
}

pub fn choose_present_mode(modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    [vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::IMMEDIATE]
        .into_iter()
        .find(|m| modes.contains(m))
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

/// The surface's current extent when it dictates one, else the window size clamped.
pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, want: RenderSize) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        caps.current_extent
    } else {
        vk::Extent2D {
            width: want
                .width
                .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            height: want
                .height
                .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        }
    }
}

/// One more than the minimum, capped by the maximum (0 means unbounded).
pub fn swapchain_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let wanted = caps.min_image_count + 1;
    if caps.max_image_count > 0 {
        wanted.min(caps.max_image_count)
    } else {
        wanted
    }
}

// Info only
pub fn fmt_name(f: vk::Format) -> &'static str {
    match f {
        vk::Format::B8G8R8A8_UNORM => "B8G8R8A8_UNORM",
        vk::Format::B8G8R8A8_SRGB => "B8G8R8A8_SRGB",
        vk::Format::R8G8B8A8_UNORM => "R8G8B8A8_UNORM",
        vk::Format::R8G8B8A8_SRGB => "R8G8B8A8_SRGB",
        vk::Format::D32_SFLOAT_S8_UINT => "D32_SFLOAT_S8_UINT",
        vk::Format::D32_SFLOAT => "D32_SFLOAT",
        vk::Format::D24_UNORM_S8_UINT => "D24_UNORM_S8_UINT",
        _ => "OTHER",
    }
}

pub fn pm_name(m: vk::PresentModeKHR) -> &'static str {
    match m {
        vk::PresentModeKHR::FIFO => "FIFO",
        vk::PresentModeKHR::MAILBOX => "MAILBOX",
        vk::PresentModeKHR::IMMEDIATE => "IMMEDIATE",
        vk::PresentModeKHR::FIFO_RELAXED => "FIFO_RELAXED",
        _ => "OTHER",
    }
}

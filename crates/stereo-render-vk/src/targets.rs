// SPDX-License-Identifier: CEPL-1.0
//! Swapchain and everything whose size or format follows it.
use ash::vk;
use stereo_math::EYE_COUNT;
use stereo_render::RenderSize;
use tracing::info;

use crate::alloc::{aspect_for, transition_image, upload_sharing};
use crate::commands::CommandPools;
use crate::descriptors::DescriptorLayouts;
use crate::error::Result;
use crate::gpu::{FramebufferDesc, Gpu, GpuImage, ImageBinding, ImageDesc, Sharing, SwapchainDesc, ViewDesc};
use crate::negotiate::{
    choose_extent, choose_present_mode, choose_surface_format, fmt_name, pm_name,
    swapchain_image_count,
};
use crate::pipeline::{Pipelines, RenderPasses, ShaderSet};

#[derive(Clone, Debug)]
pub struct SwapchainState {
    pub handle: vk::SwapchainKHR,
    pub format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub images: Vec<vk::Image>,
    pub views: Vec<vk::ImageView>,
}

impl SwapchainState {
    pub fn create<G: Gpu>(gpu: &mut G, size: RenderSize, reason: &str) -> Result<Self> {
        let surface = gpu.surface_info()?;
        let format = choose_surface_format(&surface.formats);
        let present_mode = choose_present_mode(&surface.present_modes);
        let extent = choose_extent(&surface.capabilities, size);
        let min_image_count = swapchain_image_count(&surface.capabilities);
        let families = gpu.caps().families;

        let handle = gpu.create_swapchain(&SwapchainDesc {
            surface_format: format,
            present_mode,
            extent,
            min_image_count,
            pre_transform: surface.capabilities.current_transform,
            sharing: Sharing::between(families.graphics, families.present),
        })?;
        let images = gpu.swapchain_images(handle)?;

        // View format MUST match swapchain image format.
        let mut views = Vec::with_capacity(images.len());
        for &image in &images {
            views.push(gpu.create_image_view(&ViewDesc {
                image,
                view_type: vk::ImageViewType::TYPE_2D,
                format: format.format,
                aspect: vk::ImageAspectFlags::COLOR,
                mip_levels: 1,
                array_layers: 1,
            })?);
        }

        info!(
            "vk: swapchain ({reason}) format={} color_space={:?} present_mode={} extent={}x{} images(min={} -> got={})",
            fmt_name(format.format),
            format.color_space,
            pm_name(present_mode),
            extent.width,
            extent.height,
            min_image_count,
            images.len()
        );
        Ok(SwapchainState {
            handle,
            format,
            present_mode,
            extent,
            images,
            views,
        })
    }

    /// Views first: they are created from the swapchain's images.
    pub fn destroy<G: Gpu>(self, gpu: &mut G) {
        for view in self.views {
            gpu.destroy_image_view(view);
        }
        gpu.destroy_swapchain(self.handle);
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ImageTarget {
    pub image: GpuImage,
    pub view: vk::ImageView,
}

impl ImageTarget {
    fn create<G: Gpu>(
        gpu: &mut G,
        pools: &CommandPools,
        desc: &ImageDesc,
        layout: vk::ImageLayout,
    ) -> Result<Self> {
        let image = gpu.create_image(desc)?;
        let view = gpu.create_image_view(&ViewDesc {
            image: image.image,
            view_type: if desc.array_layers > 1 {
                vk::ImageViewType::TYPE_2D_ARRAY
            } else {
                vk::ImageViewType::TYPE_2D
            },
            format: desc.format,
            aspect: aspect_for(desc.format),
            mip_levels: 1,
            array_layers: desc.array_layers,
        })?;
        transition_image(gpu, pools, &image, vk::ImageLayout::UNDEFINED, layout)?;
        Ok(ImageTarget { image, view })
    }

    pub fn destroy<G: Gpu>(self, gpu: &mut G) {
        gpu.destroy_image_view(self.view);
        gpu.destroy_image(self.image);
    }
}

/// Color and depth attachments for both passes.
#[derive(Clone, Copy, Debug)]
pub struct RenderTargets {
    /// Absent when the device cannot multisample.
    pub msaa_color: Option<ImageTarget>,
    pub msaa_depth: ImageTarget,
    /// One layer per eye; sampled by the composite pass.
    pub offscreen_color: ImageTarget,
    pub offscreen_depth: ImageTarget,
}

impl RenderTargets {
    pub fn create<G: Gpu>(
        gpu: &mut G,
        pools: &CommandPools,
        color_format: vk::Format,
        extent: vk::Extent2D,
    ) -> Result<Self> {
        let caps = gpu.caps().clone();
        let color_sharing = upload_sharing(&caps);
        let color = |samples, layers, usage| ImageDesc {
            extent,
            format: color_format,
            mip_levels: 1,
            array_layers: layers,
            samples,
            usage,
            sharing: color_sharing,
            memory: vk::MemoryPropertyFlags::DEVICE_LOCAL,
        };
        // Depth never leaves the graphics queue.
        let depth = |samples, layers| ImageDesc {
            extent,
            format: caps.depth_format,
            mip_levels: 1,
            array_layers: layers,
            samples,
            usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            sharing: Sharing::Exclusive,
            memory: vk::MemoryPropertyFlags::DEVICE_LOCAL,
        };
        let color_layout = vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL;
        let depth_layout = vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL;
        let layers = EYE_COUNT as u32;

        // Color targets
        let msaa_color = if caps.samples != vk::SampleCountFlags::TYPE_1 {
            let usage = vk::ImageUsageFlags::TRANSIENT_ATTACHMENT
                | vk::ImageUsageFlags::COLOR_ATTACHMENT;
            Some(ImageTarget::create(gpu, pools, &color(caps.samples, 1, usage), color_layout)?)
        } else {
            None
        };
        let offscreen_usage =
            vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::SAMPLED;
        let offscreen_color = ImageTarget::create(
            gpu,
            pools,
            &color(vk::SampleCountFlags::TYPE_1, layers, offscreen_usage),
            color_layout,
        )?;

        // Depth targets
        let msaa_depth = ImageTarget::create(gpu, pools, &depth(caps.samples, 1), depth_layout)?;
        let offscreen_depth = ImageTarget::create(
            gpu,
            pools,
            &depth(vk::SampleCountFlags::TYPE_1, layers),
            depth_layout,
        )?;

        Ok(RenderTargets {
            msaa_color,
            msaa_depth,
            offscreen_color,
            offscreen_depth,
        })
    }

    pub fn destroy<G: Gpu>(self, gpu: &mut G) {
        self.offscreen_depth.destroy(gpu);
        self.msaa_depth.destroy(gpu);
        self.offscreen_color.destroy(gpu);
        if let Some(target) = self.msaa_color {
            target.destroy(gpu);
        }
    }
}

#[derive(Clone, Debug)]
pub struct Framebuffers {
    /// One per swapchain image.
    pub composite: Vec<vk::Framebuffer>,
    pub offscreen: vk::Framebuffer,
}

impl Framebuffers {
    pub fn create<G: Gpu>(
        gpu: &mut G,
        passes: &RenderPasses,
        swapchain: &SwapchainState,
        targets: &RenderTargets,
    ) -> Result<Self> {
        let mut composite = Vec::with_capacity(swapchain.views.len());
        for &view in &swapchain.views {
            let attachments = match targets.msaa_color {
                Some(msaa) => vec![msaa.view, targets.msaa_depth.view, view],
                None => vec![view, targets.msaa_depth.view],
            };
            composite.push(gpu.create_framebuffer(&FramebufferDesc {
                render_pass: passes.composite,
                attachments,
                extent: swapchain.extent,
            })?);
        }
        // Multiview framebuffers keep one layer; the view mask selects array layers.
        let offscreen = gpu.create_framebuffer(&FramebufferDesc {
            render_pass: passes.offscreen,
            attachments: vec![targets.offscreen_color.view, targets.offscreen_depth.view],
            extent: swapchain.extent,
        })?;
        Ok(Framebuffers {
            composite,
            offscreen,
        })
    }

    pub fn destroy<G: Gpu>(self, gpu: &mut G) {
        gpu.destroy_framebuffer(self.offscreen);
        for framebuffer in self.composite {
            gpu.destroy_framebuffer(framebuffer);
        }
    }
}

/// Every object rebuilt when the swapchain is recreated.
#[derive(Clone, Debug)]
pub struct SurfaceGraph {
    pub swapchain: SwapchainState,
    pub passes: RenderPasses,
    pub pipelines: Pipelines,
    pub targets: RenderTargets,
    pub framebuffers: Framebuffers,
}

impl SurfaceGraph {
    // STRICT ORDER (build):
    // swapchain -> views -> render passes -> pipelines -> color targets -> depth targets -> framebuffers
    pub fn create<G: Gpu>(
        gpu: &mut G,
        pools: &CommandPools,
        shaders: &ShaderSet,
        layouts: &DescriptorLayouts,
        size: RenderSize,
        reason: &str,
    ) -> Result<Self> {
        let swapchain = SwapchainState::create(gpu, size, reason)?;
        let passes = RenderPasses::create(gpu, swapchain.format.format)?;
        let pipelines = Pipelines::create(gpu, shaders, layouts, &passes, swapchain.extent)?;
        let targets = RenderTargets::create(gpu, pools, swapchain.format.format, swapchain.extent)?;
        let framebuffers = Framebuffers::create(gpu, &passes, &swapchain, &targets)?;
        Ok(SurfaceGraph {
            swapchain,
            passes,
            pipelines,
            targets,
            framebuffers,
        })
    }

    pub fn image_count(&self) -> usize {
        self.swapchain.images.len()
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.swapchain.extent
    }

    /// How the composite pass reads the offscreen color layers.
    pub fn offscreen_binding(&self, sampler: vk::Sampler) -> ImageBinding {
        ImageBinding {
            view: self.targets.offscreen_color.view,
            sampler,
            layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        }
    }

    // STRICT ORDER (release):
    // framebuffers -> render targets -> pipelines -> pipeline layouts -> render passes
    // -> image views -> swapchain
    pub fn destroy<G: Gpu>(self, gpu: &mut G) {
        self.framebuffers.destroy(gpu);
        self.targets.destroy(gpu);
        self.pipelines.destroy(gpu);
        self.passes.destroy(gpu);
        self.swapchain.destroy(gpu);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TrackingGpu;

    #[test]
    fn stencil_depth_views_cover_both_aspects() {
        let mut gpu = TrackingGpu::new(800, 600);
        let depth_format = gpu.caps().depth_format;
        assert!(crate::negotiate::has_stencil(depth_format));
        let pools = CommandPools::create(&mut gpu).unwrap();
        let extent = vk::Extent2D {
            width: 800,
            height: 600,
        };
        let targets =
            RenderTargets::create(&mut gpu, &pools, vk::Format::B8G8R8A8_UNORM, extent).unwrap();

        let depth_views: Vec<_> = gpu.views.iter().filter(|v| v.format == depth_format).collect();
        assert_eq!(depth_views.len(), 2);
        for view in depth_views {
            assert_eq!(
                view.aspect,
                vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
            );
        }
        let offscreen = gpu.views.iter().find(|v| v.image == targets.offscreen_color.image.image);
        assert_eq!(offscreen.map(|v| v.aspect), Some(vk::ImageAspectFlags::COLOR));
    }
}

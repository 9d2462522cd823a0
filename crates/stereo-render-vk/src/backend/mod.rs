// SPDX-License-Identifier: CEPL-1.0
//! The ash-backed [`Gpu`].
mod device;
mod instance;

use std::mem::size_of;
use std::os::raw::c_void;
use std::ptr;

use ash::khr::{surface, swapchain};
use ash::{vk, Device, Entry, Instance};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use tracing::{info, warn};

use crate::alloc::find_memory_type;
use crate::error::{RenderError, Result, VkResultExt};
use crate::gpu::{
    AcquireOutcome, BufferDesc, ClearValue, DescriptorData, DescriptorWrite, DeviceCaps,
    FramebufferDesc, Gpu, GpuBuffer, GpuCommand, GpuImage, ImageDesc, LayoutBinding,
    PipelineDesc, PoolDesc, PresentOutcome, QueueKind, RenderPassDesc, SamplerDesc, Submission,
    SurfaceInfo, SwapchainDesc, ViewDesc,
};
use device::{create_device, Queues};
use instance::{create_instance, DebugMessenger};

const ENTRY_POINT: &std::ffi::CStr = c"main";

pub struct AshGpu {
    _entry: Entry,
    instance: Instance,
    debug: Option<DebugMessenger>,
    surface_loader: surface::Instance,
    surface: vk::SurfaceKHR,
    phys: vk::PhysicalDevice,
    memory: vk::PhysicalDeviceMemoryProperties,
    device: Device,
    swapchain_loader: swapchain::Device,
    queues: Queues,
    caps: DeviceCaps,
}

impl AshGpu {
    // STRICT ORDER:
    // instance -> debug messenger -> surface -> physical device (present checked
    // against this surface) -> logical device + queues -> swapchain loader
    pub fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        validation: bool,
    ) -> Result<Self> {
        let display_handle = display.display_handle()?.as_raw();
        let window_handle = window.window_handle()?.as_raw();

        let entry = unsafe { Entry::load()? };
        let (instance, validation) = unsafe { create_instance(&entry, display_handle, validation)? };
        let debug = if validation {
            Some(unsafe { DebugMessenger::new(&entry, &instance)? })
        } else {
            None
        };

        let surface_loader = surface::Instance::new(&entry, &instance);
        let surface = unsafe {
            ash_window::create_surface(&entry, &instance, display_handle, window_handle, None)
        }
        .creating("window surface")?;

        let bundle = unsafe { create_device(&instance, &surface_loader, surface)? };
        let swapchain_loader = swapchain::Device::new(&instance, &bundle.device);

        Ok(AshGpu {
            _entry: entry,
            instance,
            debug,
            surface_loader,
            surface,
            phys: bundle.phys,
            memory: bundle.memory,
            device: bundle.device,
            swapchain_loader,
            queues: bundle.queues,
            caps: bundle.caps,
        })
    }

    fn queue(&self, kind: QueueKind) -> vk::Queue {
        match kind {
            QueueKind::Graphics => self.queues.graphics,
            QueueKind::Transfer => self.queues.transfer,
        }
    }

    fn allocate(
        &self,
        requirements: vk::MemoryRequirements,
        wanted: vk::MemoryPropertyFlags,
        what: &'static str,
    ) -> Result<vk::DeviceMemory> {
        let memory_type_index =
            find_memory_type(&self.memory, requirements.memory_type_bits, wanted)?;
        let info = vk::MemoryAllocateInfo {
            s_type: vk::StructureType::MEMORY_ALLOCATE_INFO,
            allocation_size: requirements.size,
            memory_type_index,
            ..Default::default()
        };
        unsafe { self.device.allocate_memory(&info, None) }.creating(what)
    }

    fn record_with(
        &self,
        buffer: vk::CommandBuffer,
        flags: vk::CommandBufferUsageFlags,
        commands: &[GpuCommand],
    ) -> Result<()> {
        let begin = vk::CommandBufferBeginInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
            flags,
            ..Default::default()
        };
        unsafe {
            self.device
                .begin_command_buffer(buffer, &begin)
                .calling("vkBeginCommandBuffer")?;
            for command in commands {
                self.encode(buffer, command);
            }
            self.device
                .end_command_buffer(buffer)
                .calling("vkEndCommandBuffer")
        }
    }

    unsafe fn encode(&self, cmd: vk::CommandBuffer, command: &GpuCommand) {
        let d = &self.device;
        match command {
            GpuCommand::BeginRenderPass {
                render_pass,
                framebuffer,
                extent,
                clear,
            } => {
                let clear_values: Vec<vk::ClearValue> = clear
                    .iter()
                    .map(|value| match *value {
                        ClearValue::Color(rgba) => vk::ClearValue {
                            color: vk::ClearColorValue { float32: rgba },
                        },
                        ClearValue::DepthStencil { depth, stencil } => vk::ClearValue {
                            depth_stencil: vk::ClearDepthStencilValue { depth, stencil },
                        },
                    })
                    .collect();
                let begin = vk::RenderPassBeginInfo {
                    s_type: vk::StructureType::RENDER_PASS_BEGIN_INFO,
                    render_pass: *render_pass,
                    framebuffer: *framebuffer,
                    render_area: vk::Rect2D {
                        offset: vk::Offset2D::default(),
                        extent: *extent,
                    },
                    clear_value_count: clear_values.len() as u32,
                    p_clear_values: clear_values.as_ptr(),
                    ..Default::default()
                };
                unsafe { d.cmd_begin_render_pass(cmd, &begin, vk::SubpassContents::INLINE) };
            }
            GpuCommand::EndRenderPass => unsafe { d.cmd_end_render_pass(cmd) },
            GpuCommand::BindPipeline(pipeline) => unsafe {
                d.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, *pipeline)
            },
            GpuCommand::BindDescriptorSets {
                layout,
                first_set,
                sets,
            } => unsafe {
                d.cmd_bind_descriptor_sets(
                    cmd,
                    vk::PipelineBindPoint::GRAPHICS,
                    *layout,
                    *first_set,
                    sets,
                    &[],
                )
            },
            GpuCommand::BindVertexBuffer(buffer) => unsafe {
                d.cmd_bind_vertex_buffers(cmd, 0, &[*buffer], &[0])
            },
            GpuCommand::BindIndexBuffer(buffer) => unsafe {
                d.cmd_bind_index_buffer(cmd, *buffer, 0, vk::IndexType::UINT32)
            },
            GpuCommand::SetViewport(v) => {
                let viewport = vk::Viewport {
                    x: v.x,
                    y: v.y,
                    width: v.width,
                    height: v.height,
                    min_depth: 0.0,
                    max_depth: 1.0,
                };
                unsafe { d.cmd_set_viewport(cmd, 0, &[viewport]) };
            }
            GpuCommand::SetScissor {
                x,
                y,
                width,
                height,
            } => {
                let scissor = vk::Rect2D {
                    offset: vk::Offset2D { x: *x, y: *y },
                    extent: vk::Extent2D {
                        width: *width,
                        height: *height,
                    },
                };
                unsafe { d.cmd_set_scissor(cmd, 0, &[scissor]) };
            }
            GpuCommand::Draw { vertex_count } => unsafe { d.cmd_draw(cmd, *vertex_count, 1, 0, 0) },
            GpuCommand::DrawIndexed { index_count } => unsafe {
                d.cmd_draw_indexed(cmd, *index_count, 1, 0, 0, 0)
            },
            GpuCommand::CopyBuffer { src, dst, size } => {
                let region = vk::BufferCopy {
                    src_offset: 0,
                    dst_offset: 0,
                    size: *size,
                };
                unsafe { d.cmd_copy_buffer(cmd, *src, *dst, &[region]) };
            }
            GpuCommand::CopyBufferToImage { src, dst, extent } => {
                let region = vk::BufferImageCopy {
                    buffer_offset: 0,
                    buffer_row_length: 0,
                    buffer_image_height: 0,
                    image_subresource: color_layers(0),
                    image_offset: vk::Offset3D::default(),
                    image_extent: vk::Extent3D {
                        width: extent.width,
                        height: extent.height,
                        depth: 1,
                    },
                };
                unsafe {
                    d.cmd_copy_buffer_to_image(
                        cmd,
                        *src,
                        *dst,
                        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                        &[region],
                    )
                };
            }
            GpuCommand::Barrier(b) => {
                let barrier = vk::ImageMemoryBarrier {
                    s_type: vk::StructureType::IMAGE_MEMORY_BARRIER,
                    src_access_mask: b.src_access,
                    dst_access_mask: b.dst_access,
                    old_layout: b.old_layout,
                    new_layout: b.new_layout,
                    src_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
                    dst_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
                    image: b.image,
                    subresource_range: vk::ImageSubresourceRange {
                        aspect_mask: b.aspect,
                        base_mip_level: b.base_mip,
                        level_count: b.mip_count,
                        base_array_layer: 0,
                        layer_count: b.layer_count,
                    },
                    ..Default::default()
                };
                unsafe {
                    d.cmd_pipeline_barrier(
                        cmd,
                        b.src_stage,
                        b.dst_stage,
                        vk::DependencyFlags::empty(),
                        &[],
                        &[],
                        &[barrier],
                    )
                };
            }
            GpuCommand::BlitMip {
                image,
                src_level,
                src_extent,
            } => {
                let corner = |extent: vk::Extent2D| vk::Offset3D {
                    x: extent.width as i32,
                    y: extent.height as i32,
                    z: 1,
                };
                let dst_extent = vk::Extent2D {
                    width: (src_extent.width / 2).max(1),
                    height: (src_extent.height / 2).max(1),
                };
                let blit = vk::ImageBlit {
                    src_subresource: color_layers(*src_level),
                    src_offsets: [vk::Offset3D::default(), corner(*src_extent)],
                    dst_subresource: color_layers(src_level + 1),
                    dst_offsets: [vk::Offset3D::default(), corner(dst_extent)],
                };
                unsafe {
                    d.cmd_blit_image(
                        cmd,
                        *image,
                        vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                        *image,
                        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                        &[blit],
                        vk::Filter::LINEAR,
                    )
                };
            }
        }
    }
}

fn color_layers(mip_level: u32) -> vk::ImageSubresourceLayers {
    vk::ImageSubresourceLayers {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        mip_level,
        base_array_layer: 0,
        layer_count: 1,
    }
}

impl Gpu for AshGpu {
    fn caps(&self) -> &DeviceCaps {
        &self.caps
    }

    fn surface_info(&self) -> Result<SurfaceInfo> {
        unsafe {
            Ok(SurfaceInfo {
                capabilities: self
                    .surface_loader
                    .get_physical_device_surface_capabilities(self.phys, self.surface)
                    .calling("vkGetPhysicalDeviceSurfaceCapabilitiesKHR")?,
                formats: self
                    .surface_loader
                    .get_physical_device_surface_formats(self.phys, self.surface)
                    .calling("vkGetPhysicalDeviceSurfaceFormatsKHR")?,
                present_modes: self
                    .surface_loader
                    .get_physical_device_surface_present_modes(self.phys, self.surface)
                    .calling("vkGetPhysicalDeviceSurfacePresentModesKHR")?,
            })
        }
    }

    fn create_swapchain(&mut self, desc: &SwapchainDesc) -> Result<vk::SwapchainKHR> {
        let families = desc.sharing.families();
        let create_info = vk::SwapchainCreateInfoKHR {
            s_type: vk::StructureType::SWAPCHAIN_CREATE_INFO_KHR,
            surface: self.surface,
            min_image_count: desc.min_image_count,
            image_format: desc.surface_format.format,
            image_color_space: desc.surface_format.color_space,
            image_extent: desc.extent,
            image_array_layers: 1,
            image_usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
            image_sharing_mode: desc.sharing.mode(),
            queue_family_index_count: families.len() as u32,
            p_queue_family_indices: families.as_ptr(),
            pre_transform: desc.pre_transform,
            composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
            present_mode: desc.present_mode,
            clipped: vk::TRUE,
            old_swapchain: vk::SwapchainKHR::null(),
            ..Default::default()
        };
        unsafe { self.swapchain_loader.create_swapchain(&create_info, None) }.creating("swapchain")
    }

    fn swapchain_images(&mut self, swapchain: vk::SwapchainKHR) -> Result<Vec<vk::Image>> {
        unsafe { self.swapchain_loader.get_swapchain_images(swapchain) }
            .calling("vkGetSwapchainImagesKHR")
    }

    fn destroy_swapchain(&mut self, swapchain: vk::SwapchainKHR) {
        unsafe { self.swapchain_loader.destroy_swapchain(swapchain, None) };
    }

    fn create_image(&mut self, desc: &ImageDesc) -> Result<GpuImage> {
        let families = desc.sharing.families();
        let create_info = vk::ImageCreateInfo {
            s_type: vk::StructureType::IMAGE_CREATE_INFO,
            image_type: vk::ImageType::TYPE_2D,
            format: desc.format,
            extent: vk::Extent3D {
                width: desc.extent.width,
                height: desc.extent.height,
                depth: 1,
            },
            mip_levels: desc.mip_levels,
            array_layers: desc.array_layers,
            samples: desc.samples,
            tiling: vk::ImageTiling::OPTIMAL,
            usage: desc.usage,
            sharing_mode: desc.sharing.mode(),
            queue_family_index_count: families.len() as u32,
            p_queue_family_indices: families.as_ptr(),
            initial_layout: vk::ImageLayout::UNDEFINED,
            ..Default::default()
        };
        let image = unsafe { self.device.create_image(&create_info, None) }.creating("image")?;
        let requirements = unsafe { self.device.get_image_memory_requirements(image) };
        let memory = match self.allocate(requirements, desc.memory, "image memory") {
            Ok(memory) => memory,
            Err(err) => {
                unsafe { self.device.destroy_image(image, None) };
                return Err(err);
            }
        };
        unsafe { self.device.bind_image_memory(image, memory, 0) }.calling("vkBindImageMemory")?;
        Ok(GpuImage {
            image,
            memory,
            format: desc.format,
            extent: desc.extent,
            mip_levels: desc.mip_levels,
            array_layers: desc.array_layers,
        })
    }

    fn destroy_image(&mut self, image: GpuImage) {
        unsafe {
            self.device.destroy_image(image.image, None);
            self.device.free_memory(image.memory, None);
        }
    }

    fn create_image_view(&mut self, desc: &ViewDesc) -> Result<vk::ImageView> {
        let create_info = vk::ImageViewCreateInfo {
            s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
            image: desc.image,
            view_type: desc.view_type,
            format: desc.format,
            subresource_range: vk::ImageSubresourceRange {
                aspect_mask: desc.aspect,
                base_mip_level: 0,
                level_count: desc.mip_levels,
                base_array_layer: 0,
                layer_count: desc.array_layers,
            },
            ..Default::default()
        };
        unsafe { self.device.create_image_view(&create_info, None) }.creating("image view")
    }

    fn destroy_image_view(&mut self, view: vk::ImageView) {
        unsafe { self.device.destroy_image_view(view, None) };
    }

    fn create_sampler(&mut self, desc: &SamplerDesc) -> Result<vk::Sampler> {
        let create_info = vk::SamplerCreateInfo {
            s_type: vk::StructureType::SAMPLER_CREATE_INFO,
            mag_filter: vk::Filter::LINEAR,
            min_filter: vk::Filter::LINEAR,
            mipmap_mode: vk::SamplerMipmapMode::LINEAR,
            address_mode_u: desc.address_mode,
            address_mode_v: desc.address_mode,
            address_mode_w: desc.address_mode,
            mip_lod_bias: 0.0,
            anisotropy_enable: vk::TRUE,
            max_anisotropy: desc.max_anisotropy,
            compare_enable: vk::FALSE,
            compare_op: vk::CompareOp::ALWAYS,
            min_lod: 0.0,
            max_lod: desc.max_lod,
            border_color: vk::BorderColor::INT_OPAQUE_BLACK,
            unnormalized_coordinates: vk::FALSE,
            ..Default::default()
        };
        unsafe { self.device.create_sampler(&create_info, None) }.creating("sampler")
    }

    fn destroy_sampler(&mut self, sampler: vk::Sampler) {
        unsafe { self.device.destroy_sampler(sampler, None) };
    }

    fn create_buffer(&mut self, desc: &BufferDesc) -> Result<GpuBuffer> {
        let families = desc.sharing.families();
        let create_info = vk::BufferCreateInfo {
            s_type: vk::StructureType::BUFFER_CREATE_INFO,
            size: desc.size,
            usage: desc.usage,
            sharing_mode: desc.sharing.mode(),
            queue_family_index_count: families.len() as u32,
            p_queue_family_indices: families.as_ptr(),
            ..Default::default()
        };
        let buffer = unsafe { self.device.create_buffer(&create_info, None) }.creating("buffer")?;
        let requirements = unsafe { self.device.get_buffer_memory_requirements(buffer) };
        let memory = match self.allocate(requirements, desc.memory, "buffer memory") {
            Ok(memory) => memory,
            Err(err) => {
                unsafe { self.device.destroy_buffer(buffer, None) };
                return Err(err);
            }
        };
        unsafe { self.device.bind_buffer_memory(buffer, memory, 0) }
            .calling("vkBindBufferMemory")?;
        Ok(GpuBuffer {
            buffer,
            memory,
            size: desc.size,
        })
    }

    fn destroy_buffer(&mut self, buffer: GpuBuffer) {
        unsafe {
            self.device.destroy_buffer(buffer.buffer, None);
            self.device.free_memory(buffer.memory, None);
        }
    }

    fn write_buffer(&mut self, buffer: &GpuBuffer, bytes: &[u8]) -> Result<()> {
        if bytes.len() as vk::DeviceSize > buffer.size {
            return Err(RenderError::Vulkan {
                call: "vkMapMemory",
                result: vk::Result::ERROR_MEMORY_MAP_FAILED,
            });
        }
        unsafe {
            let mapped = self
                .device
                .map_memory(
                    buffer.memory,
                    0,
                    bytes.len() as vk::DeviceSize,
                    vk::MemoryMapFlags::empty(),
                )
                .calling("vkMapMemory")?;
            ptr::copy_nonoverlapping(bytes.as_ptr(), mapped.cast::<u8>(), bytes.len());
            self.device.unmap_memory(buffer.memory);
        }
        Ok(())
    }

    fn create_render_pass(&mut self, desc: &RenderPassDesc) -> Result<vk::RenderPass> {
        let attachments: Vec<vk::AttachmentDescription> = desc
            .attachments
            .iter()
            .map(|a| vk::AttachmentDescription {
                format: a.format,
                samples: a.samples,
                load_op: a.load_op,
                store_op: a.store_op,
                stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
                stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
                initial_layout: vk::ImageLayout::UNDEFINED,
                final_layout: a.final_layout,
                ..Default::default()
            })
            .collect();

        let color_ref = vk::AttachmentReference {
            attachment: desc.color,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        };
        let depth_ref = desc.depth.map(|attachment| vk::AttachmentReference {
            attachment,
            layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        });
        let resolve_ref = desc.resolve.map(|attachment| vk::AttachmentReference {
            attachment,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        });
        let subpass = vk::SubpassDescription {
            pipeline_bind_point: vk::PipelineBindPoint::GRAPHICS,
            color_attachment_count: 1,
            p_color_attachments: &color_ref,
            p_resolve_attachments: resolve_ref
                .as_ref()
                .map_or(ptr::null(), |r| r as *const vk::AttachmentReference),
            p_depth_stencil_attachment: depth_ref
                .as_ref()
                .map_or(ptr::null(), |r| r as *const vk::AttachmentReference),
            ..Default::default()
        };

        let dependency = desc.dependency.map(|dep| vk::SubpassDependency {
            src_subpass: vk::SUBPASS_EXTERNAL,
            dst_subpass: 0,
            src_stage_mask: dep.src_stage,
            dst_stage_mask: dep.dst_stage,
            src_access_mask: dep.src_access,
            dst_access_mask: dep.dst_access,
            dependency_flags: vk::DependencyFlags::empty(),
        });

        // View mask and correlation mask are the same eye set.
        let view_mask = desc.views.map_or(0, |views| views.bits());
        let multiview = vk::RenderPassMultiviewCreateInfo {
            s_type: vk::StructureType::RENDER_PASS_MULTIVIEW_CREATE_INFO,
            subpass_count: 1,
            p_view_masks: &view_mask,
            correlation_mask_count: 1,
            p_correlation_masks: &view_mask,
            ..Default::default()
        };
        let create_info = vk::RenderPassCreateInfo {
            s_type: vk::StructureType::RENDER_PASS_CREATE_INFO,
            p_next: if desc.views.is_some() {
                (&multiview as *const vk::RenderPassMultiviewCreateInfo).cast::<c_void>()
            } else {
                ptr::null()
            },
            attachment_count: attachments.len() as u32,
            p_attachments: attachments.as_ptr(),
            subpass_count: 1,
            p_subpasses: &subpass,
            dependency_count: u32::from(dependency.is_some()),
            p_dependencies: dependency
                .as_ref()
                .map_or(ptr::null(), |d| d as *const vk::SubpassDependency),
            ..Default::default()
        };
        unsafe { self.device.create_render_pass(&create_info, None) }.creating("render pass")
    }

    fn destroy_render_pass(&mut self, render_pass: vk::RenderPass) {
        unsafe { self.device.destroy_render_pass(render_pass, None) };
    }

    fn create_framebuffer(&mut self, desc: &FramebufferDesc) -> Result<vk::Framebuffer> {
        let create_info = vk::FramebufferCreateInfo {
            s_type: vk::StructureType::FRAMEBUFFER_CREATE_INFO,
            render_pass: desc.render_pass,
            attachment_count: desc.attachments.len() as u32,
            p_attachments: desc.attachments.as_ptr(),
            width: desc.extent.width,
            height: desc.extent.height,
            layers: 1,
            ..Default::default()
        };
        unsafe { self.device.create_framebuffer(&create_info, None) }.creating("framebuffer")
    }

    fn destroy_framebuffer(&mut self, framebuffer: vk::Framebuffer) {
        unsafe { self.device.destroy_framebuffer(framebuffer, None) };
    }

    fn create_shader_module(&mut self, code: &[u32]) -> Result<vk::ShaderModule> {
        let create_info = vk::ShaderModuleCreateInfo {
            s_type: vk::StructureType::SHADER_MODULE_CREATE_INFO,
            code_size: code.len() * size_of::<u32>(),
            p_code: code.as_ptr(),
            ..Default::default()
        };
        unsafe { self.device.create_shader_module(&create_info, None) }.creating("shader module")
    }

    fn destroy_shader_module(&mut self, module: vk::ShaderModule) {
        unsafe { self.device.destroy_shader_module(module, None) };
    }

    fn create_pipeline_layout(
        &mut self,
        set_layouts: &[vk::DescriptorSetLayout],
    ) -> Result<vk::PipelineLayout> {
        let create_info = vk::PipelineLayoutCreateInfo {
            s_type: vk::StructureType::PIPELINE_LAYOUT_CREATE_INFO,
            set_layout_count: set_layouts.len() as u32,
            p_set_layouts: set_layouts.as_ptr(),
            ..Default::default()
        };
        unsafe { self.device.create_pipeline_layout(&create_info, None) }
            .creating("pipeline layout")
    }

    fn destroy_pipeline_layout(&mut self, layout: vk::PipelineLayout) {
        unsafe { self.device.destroy_pipeline_layout(layout, None) };
    }

    fn create_graphics_pipeline(&mut self, desc: &PipelineDesc) -> Result<vk::Pipeline> {
        let constant_entry = vk::SpecializationMapEntry {
            constant_id: 0,
            offset: 0,
            size: size_of::<f32>(),
        };
        let constant = desc.fragment_constant.unwrap_or_default();
        let specialization = vk::SpecializationInfo {
            map_entry_count: 1,
            p_map_entries: &constant_entry,
            data_size: size_of::<f32>(),
            p_data: (&constant as *const f32).cast::<c_void>(),
            ..Default::default()
        };
        let stages = [
            vk::PipelineShaderStageCreateInfo {
                s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
                stage: vk::ShaderStageFlags::VERTEX,
                module: desc.vertex,
                p_name: ENTRY_POINT.as_ptr(),
                ..Default::default()
            },
            vk::PipelineShaderStageCreateInfo {
                s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
                stage: vk::ShaderStageFlags::FRAGMENT,
                module: desc.fragment,
                p_name: ENTRY_POINT.as_ptr(),
                p_specialization_info: if desc.fragment_constant.is_some() {
                    &specialization as *const vk::SpecializationInfo
                } else {
                    ptr::null()
                },
                ..Default::default()
            },
        ];

        let (bindings, attributes) = match &desc.vertex_input {
            Some(input) => (
                vec![vk::VertexInputBindingDescription {
                    binding: 0,
                    stride: input.stride,
                    input_rate: vk::VertexInputRate::VERTEX,
                }],
                input
                    .attributes
                    .iter()
                    .map(|a| vk::VertexInputAttributeDescription {
                        location: a.location,
                        binding: 0,
                        format: a.format,
                        offset: a.offset,
                    })
                    .collect::<Vec<_>>(),
            ),
            None => (Vec::new(), Vec::new()),
        };
        let vertex_input = vk::PipelineVertexInputStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_VERTEX_INPUT_STATE_CREATE_INFO,
            vertex_binding_description_count: bindings.len() as u32,
            p_vertex_binding_descriptions: bindings.as_ptr(),
            vertex_attribute_description_count: attributes.len() as u32,
            p_vertex_attribute_descriptions: attributes.as_ptr(),
            ..Default::default()
        };
        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_INPUT_ASSEMBLY_STATE_CREATE_INFO,
            topology: desc.topology,
            primitive_restart_enable: vk::FALSE,
            ..Default::default()
        };

        // Ignored when viewport and scissor are dynamic.
        let extent = desc.static_extent.unwrap_or_default();
        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        let scissor = vk::Rect2D {
            offset: vk::Offset2D::default(),
            extent,
        };
        let viewport_state = vk::PipelineViewportStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_VIEWPORT_STATE_CREATE_INFO,
            viewport_count: 1,
            p_viewports: &viewport,
            scissor_count: 1,
            p_scissors: &scissor,
            ..Default::default()
        };
        let rasterization = vk::PipelineRasterizationStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_RASTERIZATION_STATE_CREATE_INFO,
            depth_clamp_enable: vk::FALSE,
            rasterizer_discard_enable: vk::FALSE,
            polygon_mode: vk::PolygonMode::FILL,
            cull_mode: desc.cull_mode,
            front_face: desc.front_face,
            depth_bias_enable: vk::FALSE,
            line_width: 1.0,
            ..Default::default()
        };
        let multisample = vk::PipelineMultisampleStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_MULTISAMPLE_STATE_CREATE_INFO,
            rasterization_samples: desc.samples,
            sample_shading_enable: vk::FALSE,
            min_sample_shading: 1.0,
            ..Default::default()
        };
        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_DEPTH_STENCIL_STATE_CREATE_INFO,
            depth_test_enable: vk::TRUE,
            depth_write_enable: vk::TRUE,
            depth_compare_op: desc.depth_compare,
            depth_bounds_test_enable: vk::FALSE,
            stencil_test_enable: vk::FALSE,
            ..Default::default()
        };
        let blend_attachment = vk::PipelineColorBlendAttachmentState {
            blend_enable: vk::FALSE,
            color_write_mask: vk::ColorComponentFlags::RGBA,
            ..Default::default()
        };
        let color_blend = vk::PipelineColorBlendStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_COLOR_BLEND_STATE_CREATE_INFO,
            logic_op_enable: vk::FALSE,
            attachment_count: 1,
            p_attachments: &blend_attachment,
            ..Default::default()
        };
        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic = vk::PipelineDynamicStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_DYNAMIC_STATE_CREATE_INFO,
            dynamic_state_count: if desc.static_extent.is_some() {
                0
            } else {
                dynamic_states.len() as u32
            },
            p_dynamic_states: dynamic_states.as_ptr(),
            ..Default::default()
        };

        let create_info = vk::GraphicsPipelineCreateInfo {
            s_type: vk::StructureType::GRAPHICS_PIPELINE_CREATE_INFO,
            stage_count: stages.len() as u32,
            p_stages: stages.as_ptr(),
            p_vertex_input_state: &vertex_input,
            p_input_assembly_state: &input_assembly,
            p_viewport_state: &viewport_state,
            p_rasterization_state: &rasterization,
            p_multisample_state: &multisample,
            p_depth_stencil_state: &depth_stencil,
            p_color_blend_state: &color_blend,
            p_dynamic_state: &dynamic,
            layout: desc.layout,
            render_pass: desc.render_pass,
            subpass: 0,
            ..Default::default()
        };
        let pipelines = unsafe {
            self.device.create_graphics_pipelines(
                vk::PipelineCache::null(),
                std::slice::from_ref(&create_info),
                None,
            )
        }
        .map_err(|(_, result)| RenderError::Resource {
            what: "graphics pipeline",
            result,
        })?;
        pipelines.first().copied().ok_or(RenderError::Resource {
            what: "graphics pipeline",
            result: vk::Result::ERROR_UNKNOWN,
        })
    }

    fn destroy_pipeline(&mut self, pipeline: vk::Pipeline) {
        unsafe { self.device.destroy_pipeline(pipeline, None) };
    }

    fn create_descriptor_set_layout(
        &mut self,
        bindings: &[LayoutBinding],
    ) -> Result<vk::DescriptorSetLayout> {
        let bindings: Vec<vk::DescriptorSetLayoutBinding> = bindings
            .iter()
            .map(|b| vk::DescriptorSetLayoutBinding {
                binding: b.binding,
                descriptor_type: b.descriptor_type,
                descriptor_count: b.count,
                stage_flags: b.stages,
                ..Default::default()
            })
            .collect();
        let create_info = vk::DescriptorSetLayoutCreateInfo {
            s_type: vk::StructureType::DESCRIPTOR_SET_LAYOUT_CREATE_INFO,
            binding_count: bindings.len() as u32,
            p_bindings: bindings.as_ptr(),
            ..Default::default()
        };
        unsafe { self.device.create_descriptor_set_layout(&create_info, None) }
            .creating("descriptor set layout")
    }

    fn destroy_descriptor_set_layout(&mut self, layout: vk::DescriptorSetLayout) {
        unsafe { self.device.destroy_descriptor_set_layout(layout, None) };
    }

    fn create_descriptor_pool(&mut self, desc: &PoolDesc) -> Result<vk::DescriptorPool> {
        let sizes: Vec<vk::DescriptorPoolSize> = desc
            .sizes
            .iter()
            .map(|&(ty, descriptor_count)| vk::DescriptorPoolSize {
                ty,
                descriptor_count,
            })
            .collect();
        let create_info = vk::DescriptorPoolCreateInfo {
            s_type: vk::StructureType::DESCRIPTOR_POOL_CREATE_INFO,
            flags: if desc.free_individual {
                vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET
            } else {
                vk::DescriptorPoolCreateFlags::empty()
            },
            max_sets: desc.max_sets,
            pool_size_count: sizes.len() as u32,
            p_pool_sizes: sizes.as_ptr(),
            ..Default::default()
        };
        unsafe { self.device.create_descriptor_pool(&create_info, None) }
            .creating("descriptor pool")
    }

    fn destroy_descriptor_pool(&mut self, pool: vk::DescriptorPool) {
        unsafe { self.device.destroy_descriptor_pool(pool, None) };
    }

    fn allocate_descriptor_sets(
        &mut self,
        pool: vk::DescriptorPool,
        layouts: &[vk::DescriptorSetLayout],
    ) -> Result<Vec<vk::DescriptorSet>> {
        let allocate_info = vk::DescriptorSetAllocateInfo {
            s_type: vk::StructureType::DESCRIPTOR_SET_ALLOCATE_INFO,
            descriptor_pool: pool,
            descriptor_set_count: layouts.len() as u32,
            p_set_layouts: layouts.as_ptr(),
            ..Default::default()
        };
        unsafe { self.device.allocate_descriptor_sets(&allocate_info) }.creating("descriptor sets")
    }

    fn free_descriptor_sets(
        &mut self,
        pool: vk::DescriptorPool,
        sets: &[vk::DescriptorSet],
    ) -> Result<()> {
        unsafe { self.device.free_descriptor_sets(pool, sets) }.calling("vkFreeDescriptorSets")
    }

    fn update_descriptor_sets(&mut self, writes: &[DescriptorWrite]) {
        enum Info {
            Buffer([vk::DescriptorBufferInfo; 1]),
            Images(Vec<vk::DescriptorImageInfo>),
        }
        // Infos must outlive the write structs pointing into them.
        let infos: Vec<Info> = writes
            .iter()
            .map(|write| match &write.data {
                DescriptorData::UniformBuffer { buffer, range } => {
                    Info::Buffer([vk::DescriptorBufferInfo {
                        buffer: *buffer,
                        offset: 0,
                        range: *range,
                    }])
                }
                DescriptorData::CombinedImageSamplers(images) => Info::Images(
                    images
                        .iter()
                        .map(|image| vk::DescriptorImageInfo {
                            sampler: image.sampler,
                            image_view: image.view,
                            image_layout: image.layout,
                        })
                        .collect(),
                ),
            })
            .collect();
        let vk_writes: Vec<vk::WriteDescriptorSet> = writes
            .iter()
            .zip(&infos)
            .map(|(write, info)| {
                let mut out = vk::WriteDescriptorSet {
                    s_type: vk::StructureType::WRITE_DESCRIPTOR_SET,
                    dst_set: write.set,
                    dst_binding: write.binding,
                    dst_array_element: 0,
                    ..Default::default()
                };
                match info {
                    Info::Buffer(buffer) => {
                        out.descriptor_type = vk::DescriptorType::UNIFORM_BUFFER;
                        out.descriptor_count = 1;
                        out.p_buffer_info = buffer.as_ptr();
                    }
                    Info::Images(images) => {
                        out.descriptor_type = vk::DescriptorType::COMBINED_IMAGE_SAMPLER;
                        out.descriptor_count = images.len() as u32;
                        out.p_image_info = images.as_ptr();
                    }
                }
                out
            })
            .collect();
        unsafe { self.device.update_descriptor_sets(&vk_writes, &[]) };
    }

    fn create_command_pool(&mut self, queue: QueueKind) -> Result<vk::CommandPool> {
        let create_info = vk::CommandPoolCreateInfo {
            s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO,
            flags: vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
            queue_family_index: self.caps.families.for_queue(queue),
            ..Default::default()
        };
        unsafe { self.device.create_command_pool(&create_info, None) }.creating("command pool")
    }

    fn destroy_command_pool(&mut self, pool: vk::CommandPool) {
        unsafe { self.device.destroy_command_pool(pool, None) };
    }

    fn allocate_command_buffers(
        &mut self,
        pool: vk::CommandPool,
        count: u32,
    ) -> Result<Vec<vk::CommandBuffer>> {
        let allocate_info = vk::CommandBufferAllocateInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
            command_pool: pool,
            level: vk::CommandBufferLevel::PRIMARY,
            command_buffer_count: count,
            ..Default::default()
        };
        unsafe { self.device.allocate_command_buffers(&allocate_info) }
            .creating("command buffers")
    }

    fn free_command_buffers(&mut self, pool: vk::CommandPool, buffers: &[vk::CommandBuffer]) {
        if !buffers.is_empty() {
            unsafe { self.device.free_command_buffers(pool, buffers) };
        }
    }

    fn record(&mut self, buffer: vk::CommandBuffer, commands: &[GpuCommand]) -> Result<()> {
        self.record_with(
            buffer,
            vk::CommandBufferUsageFlags::SIMULTANEOUS_USE,
            commands,
        )
    }

    fn one_shot(
        &mut self,
        pool: vk::CommandPool,
        queue: QueueKind,
        commands: &[GpuCommand],
    ) -> Result<()> {
        let buffers = self.allocate_command_buffers(pool, 1)?;
        let result = self
            .record_with(
                buffers[0],
                vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
                commands,
            )
            .and_then(|()| {
                let submit = vk::SubmitInfo {
                    s_type: vk::StructureType::SUBMIT_INFO,
                    command_buffer_count: 1,
                    p_command_buffers: buffers.as_ptr(),
                    ..Default::default()
                };
                let target = self.queue(queue);
                unsafe {
                    self.device
                        .queue_submit(target, &[submit], vk::Fence::null())
                        .calling("vkQueueSubmit")?;
                    self.device
                        .queue_wait_idle(target)
                        .calling("vkQueueWaitIdle")
                }
            });
        self.free_command_buffers(pool, &buffers);
        result
    }

    fn create_semaphore(&mut self) -> Result<vk::Semaphore> {
        let create_info = vk::SemaphoreCreateInfo {
            s_type: vk::StructureType::SEMAPHORE_CREATE_INFO,
            ..Default::default()
        };
        unsafe { self.device.create_semaphore(&create_info, None) }.creating("semaphore")
    }

    fn destroy_semaphore(&mut self, semaphore: vk::Semaphore) {
        unsafe { self.device.destroy_semaphore(semaphore, None) };
    }

    fn create_fence(&mut self, signaled: bool) -> Result<vk::Fence> {
        let create_info = vk::FenceCreateInfo {
            s_type: vk::StructureType::FENCE_CREATE_INFO,
            flags: if signaled {
                vk::FenceCreateFlags::SIGNALED
            } else {
                vk::FenceCreateFlags::empty()
            },
            ..Default::default()
        };
        unsafe { self.device.create_fence(&create_info, None) }.creating("fence")
    }

    fn destroy_fence(&mut self, fence: vk::Fence) {
        unsafe { self.device.destroy_fence(fence, None) };
    }

    fn wait_for_fence(&mut self, fence: vk::Fence) -> Result<()> {
        unsafe { self.device.wait_for_fences(&[fence], true, u64::MAX) }
            .calling("vkWaitForFences")
    }

    fn reset_fence(&mut self, fence: vk::Fence) -> Result<()> {
        unsafe { self.device.reset_fences(&[fence]) }.calling("vkResetFences")
    }

    fn acquire_next_image(
        &mut self,
        swapchain: vk::SwapchainKHR,
        signal: vk::Semaphore,
    ) -> Result<AcquireOutcome> {
        let acquired = unsafe {
            self.swapchain_loader
                .acquire_next_image(swapchain, u64::MAX, signal, vk::Fence::null())
        };
        match acquired {
            Ok((index, suboptimal)) => Ok(AcquireOutcome::Acquired { index, suboptimal }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
            Err(result) => Err(RenderError::Vulkan {
                call: "vkAcquireNextImageKHR",
                result,
            }),
        }
    }

    fn submit(&mut self, submission: &Submission) -> Result<()> {
        let (wait_semaphores, wait_stages): (Vec<_>, Vec<_>) = submission.wait.into_iter().unzip();
        let signal: Vec<vk::Semaphore> = submission.signal.into_iter().collect();
        let submit = vk::SubmitInfo {
            s_type: vk::StructureType::SUBMIT_INFO,
            wait_semaphore_count: wait_semaphores.len() as u32,
            p_wait_semaphores: wait_semaphores.as_ptr(),
            p_wait_dst_stage_mask: wait_stages.as_ptr(),
            command_buffer_count: 1,
            p_command_buffers: &submission.command_buffer,
            signal_semaphore_count: signal.len() as u32,
            p_signal_semaphores: signal.as_ptr(),
            ..Default::default()
        };
        unsafe {
            self.device.queue_submit(
                self.queues.graphics,
                &[submit],
                submission.fence.unwrap_or_default(),
            )
        }
        .calling("vkQueueSubmit")
    }

    fn present(
        &mut self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> Result<PresentOutcome> {
        let present_info = vk::PresentInfoKHR {
            s_type: vk::StructureType::PRESENT_INFO_KHR,
            wait_semaphore_count: 1,
            p_wait_semaphores: &wait,
            swapchain_count: 1,
            p_swapchains: &swapchain,
            p_image_indices: &image_index,
            ..Default::default()
        };
        match unsafe {
            self.swapchain_loader
                .queue_present(self.queues.present, &present_info)
        } {
            Ok(false) => Ok(PresentOutcome::Presented),
            Ok(true) => Ok(PresentOutcome::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::OutOfDate),
            Err(result) => Err(RenderError::Vulkan {
                call: "vkQueuePresentKHR",
                result,
            }),
        }
    }

    fn wait_idle(&mut self) -> Result<()> {
        unsafe { self.device.device_wait_idle() }.calling("vkDeviceWaitIdle")
    }
}

impl Drop for AshGpu {
    // STRICT TEARDOWN ORDER:
    // 1) device (every child object is already gone)
    // 2) debug messenger
    // 3) surface
    // 4) instance
    fn drop(&mut self) {
        unsafe {
            if let Err(err) = self.device.device_wait_idle() {
                warn!("vk: device_wait_idle during teardown failed: {err:?}");
            }
            self.device.destroy_device(None);
            if let Some(debug) = self.debug.take() {
                debug.destroy();
            }
            self.surface_loader.destroy_surface(self.surface, None);
            self.instance.destroy_instance(None);
        }
        info!("vk: instance destroyed");
    }
}

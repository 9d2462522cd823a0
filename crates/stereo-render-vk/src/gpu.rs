// SPDX-License-Identifier: CEPL-1.0
//! The device seam.
//!
//! Everything above this trait (swapchain management, pipelines, descriptors,
//! frame scheduling) talks to the GPU through [`Gpu`] using plain descriptor
//! structs and recorded [`GpuCommand`] lists. `AshGpu` drives a real Vulkan
//! device; tests drive a tracking double that counts live objects.
use ash::vk;
use stereo_math::EyeMask;

use crate::error::Result;

/// Queues the renderer submits to. Presentation has its own entry point.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum QueueKind {
    Graphics,
    Transfer,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueFamilies {
    pub graphics: u32,
    pub present: u32,
    /// A transfer-only family when the device has one, otherwise `graphics`.
    pub transfer: u32,
}

impl QueueFamilies {
    pub fn for_queue(&self, queue: QueueKind) -> u32 {
        match queue {
            QueueKind::Graphics => self.graphics,
            QueueKind::Transfer => self.transfer,
        }
    }
}

/// Capabilities negotiated once at device selection.
#[derive(Clone, Debug)]
pub struct DeviceCaps {
    pub device_name: String,
    pub families: QueueFamilies,
    /// Highest sample count usable for both color and depth attachments.
    pub samples: vk::SampleCountFlags,
    pub depth_format: vk::Format,
    pub max_anisotropy: f32,
    /// Whether RGBA8 optimal tiling supports linear-filtered blits (mip generation).
    pub linear_blit: bool,
}

#[derive(Clone, Debug, Default)]
pub struct SurfaceInfo {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Sharing {
    Exclusive,
    Concurrent([u32; 2]),
}

impl Sharing {
    /// Concurrent only when the two families actually differ.
    pub fn between(a: u32, b: u32) -> Self {
        if a == b {
            Sharing::Exclusive
        } else {
            Sharing::Concurrent([a, b])
        }
    }

    pub fn mode(&self) -> vk::SharingMode {
        match self {
            Sharing::Exclusive => vk::SharingMode::EXCLUSIVE,
            Sharing::Concurrent(_) => vk::SharingMode::CONCURRENT,
        }
    }

    pub fn families(&self) -> &[u32] {
        match self {
            Sharing::Exclusive => &[],
            Sharing::Concurrent(families) => families,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct SwapchainDesc {
    pub surface_format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub min_image_count: u32,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
    pub sharing: Sharing,
}

#[derive(Clone, Copy, Debug)]
pub struct ImageDesc {
    pub extent: vk::Extent2D,
    pub format: vk::Format,
    pub mip_levels: u32,
    pub array_layers: u32,
    pub samples: vk::SampleCountFlags,
    pub usage: vk::ImageUsageFlags,
    pub sharing: Sharing,
    pub memory: vk::MemoryPropertyFlags,
}

/// An image together with the memory bound to it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GpuImage {
    pub image: vk::Image,
    pub memory: vk::DeviceMemory,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    pub mip_levels: u32,
    pub array_layers: u32,
}

#[derive(Clone, Copy, Debug)]
pub struct ViewDesc {
    pub image: vk::Image,
    pub view_type: vk::ImageViewType,
    pub format: vk::Format,
    pub aspect: vk::ImageAspectFlags,
    pub mip_levels: u32,
    pub array_layers: u32,
}

/// Linear min/mag/mip filtering is implied; the border, when sampled, is opaque black.
#[derive(Clone, Copy, Debug)]
pub struct SamplerDesc {
    pub address_mode: vk::SamplerAddressMode,
    pub max_anisotropy: f32,
    pub max_lod: f32,
}

#[derive(Clone, Copy, Debug)]
pub struct BufferDesc {
    pub size: vk::DeviceSize,
    pub usage: vk::BufferUsageFlags,
    pub sharing: Sharing,
    pub memory: vk::MemoryPropertyFlags,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GpuBuffer {
    pub buffer: vk::Buffer,
    pub memory: vk::DeviceMemory,
    pub size: vk::DeviceSize,
}

/// One attachment; the initial layout is always `UNDEFINED` and stencil is never kept.
#[derive(Clone, Copy, Debug)]
pub struct AttachmentDesc {
    pub format: vk::Format,
    pub samples: vk::SampleCountFlags,
    pub load_op: vk::AttachmentLoadOp,
    pub store_op: vk::AttachmentStoreOp,
    pub final_layout: vk::ImageLayout,
}

#[derive(Clone, Copy, Debug)]
pub struct ExternalDependency {
    pub src_stage: vk::PipelineStageFlags,
    pub dst_stage: vk::PipelineStageFlags,
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
}

/// A single-subpass render pass. Indices refer into `attachments`.
#[derive(Clone, Debug)]
pub struct RenderPassDesc {
    pub attachments: Vec<AttachmentDesc>,
    pub color: u32,
    pub depth: Option<u32>,
    pub resolve: Option<u32>,
    pub dependency: Option<ExternalDependency>,
    /// Multiview masks: one bit per view rendered by the subpass.
    pub views: Option<EyeMask>,
}

#[derive(Clone, Debug)]
pub struct FramebufferDesc {
    pub render_pass: vk::RenderPass,
    pub attachments: Vec<vk::ImageView>,
    pub extent: vk::Extent2D,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VertexAttribute {
    pub location: u32,
    pub format: vk::Format,
    pub offset: u32,
}

#[derive(Clone, Debug)]
pub struct VertexInput {
    pub stride: u32,
    pub attributes: Vec<VertexAttribute>,
}

#[derive(Clone, Debug)]
pub struct PipelineDesc {
    pub render_pass: vk::RenderPass,
    pub layout: vk::PipelineLayout,
    pub vertex: vk::ShaderModule,
    pub fragment: vk::ShaderModule,
    /// Value for fragment specialization constant 0.
    pub fragment_constant: Option<f32>,
    pub vertex_input: Option<VertexInput>,
    pub topology: vk::PrimitiveTopology,
    pub cull_mode: vk::CullModeFlags,
    pub front_face: vk::FrontFace,
    pub samples: vk::SampleCountFlags,
    pub depth_compare: vk::CompareOp,
    /// `None` leaves viewport and scissor dynamic.
    pub static_extent: Option<vk::Extent2D>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LayoutBinding {
    pub binding: u32,
    pub descriptor_type: vk::DescriptorType,
    pub count: u32,
    pub stages: vk::ShaderStageFlags,
}

#[derive(Clone, Debug)]
pub struct PoolDesc {
    pub max_sets: u32,
    pub sizes: Vec<(vk::DescriptorType, u32)>,
    /// Sets may be returned to the pool one by one.
    pub free_individual: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImageBinding {
    pub view: vk::ImageView,
    pub sampler: vk::Sampler,
    pub layout: vk::ImageLayout,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DescriptorData {
    UniformBuffer {
        buffer: vk::Buffer,
        range: vk::DeviceSize,
    },
    CombinedImageSamplers(Vec<ImageBinding>),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DescriptorWrite {
    pub set: vk::DescriptorSet,
    pub binding: u32,
    pub data: DescriptorData,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ClearValue {
    Color([f32; 4]),
    DepthStencil { depth: f32, stencil: u32 },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImageBarrier {
    pub image: vk::Image,
    pub aspect: vk::ImageAspectFlags,
    pub base_mip: u32,
    pub mip_count: u32,
    pub layer_count: u32,
    pub old_layout: vk::ImageLayout,
    pub new_layout: vk::ImageLayout,
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
    pub src_stage: vk::PipelineStageFlags,
    pub dst_stage: vk::PipelineStageFlags,
}

/// Recorded GPU work. Backends translate these into their native command stream.
#[derive(Clone, Debug, PartialEq)]
pub enum GpuCommand {
    BeginRenderPass {
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
        clear: Vec<ClearValue>,
    },
    EndRenderPass,
    BindPipeline(vk::Pipeline),
    BindDescriptorSets {
        layout: vk::PipelineLayout,
        first_set: u32,
        sets: Vec<vk::DescriptorSet>,
    },
    BindVertexBuffer(vk::Buffer),
    BindIndexBuffer(vk::Buffer),
    SetViewport(Viewport),
    SetScissor {
        x: i32,
        y: i32,
        width: u32,
        height: u32,
    },
    Draw {
        vertex_count: u32,
    },
    DrawIndexed {
        index_count: u32,
    },
    CopyBuffer {
        src: vk::Buffer,
        dst: vk::Buffer,
        size: vk::DeviceSize,
    },
    CopyBufferToImage {
        src: vk::Buffer,
        dst: vk::Image,
        extent: vk::Extent2D,
    },
    Barrier(ImageBarrier),
    /// Linear-filtered blit from `src_level` into `src_level + 1`, halving each side.
    BlitMip {
        image: vk::Image,
        src_level: u32,
        src_extent: vk::Extent2D,
    },
}

/// Work handed to the graphics queue.
#[derive(Clone, Copy, Debug)]
pub struct Submission {
    pub command_buffer: vk::CommandBuffer,
    pub wait: Option<(vk::Semaphore, vk::PipelineStageFlags)>,
    pub signal: Option<vk::Semaphore>,
    pub fence: Option<vk::Fence>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AcquireOutcome {
    Acquired { index: u32, suboptimal: bool },
    OutOfDate,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    Suboptimal,
    OutOfDate,
}

/// Device operations the renderer needs, expressed without raw create-info structs.
///
/// Destruction of a handle the device never produced is a caller bug; the
/// tracking double treats it as a test failure.
pub trait Gpu {
    fn caps(&self) -> &DeviceCaps;
    fn surface_info(&self) -> Result<SurfaceInfo>;

    fn create_swapchain(&mut self, desc: &SwapchainDesc) -> Result<vk::SwapchainKHR>;
    fn swapchain_images(&mut self, swapchain: vk::SwapchainKHR) -> Result<Vec<vk::Image>>;
    fn destroy_swapchain(&mut self, swapchain: vk::SwapchainKHR);

    fn create_image(&mut self, desc: &ImageDesc) -> Result<GpuImage>;
    fn destroy_image(&mut self, image: GpuImage);
    fn create_image_view(&mut self, desc: &ViewDesc) -> Result<vk::ImageView>;
    fn destroy_image_view(&mut self, view: vk::ImageView);
    fn create_sampler(&mut self, desc: &SamplerDesc) -> Result<vk::Sampler>;
    fn destroy_sampler(&mut self, sampler: vk::Sampler);

    fn create_buffer(&mut self, desc: &BufferDesc) -> Result<GpuBuffer>;
    fn destroy_buffer(&mut self, buffer: GpuBuffer);
    /// Copies `bytes` to the start of a host-visible buffer.
    fn write_buffer(&mut self, buffer: &GpuBuffer, bytes: &[u8]) -> Result<()>;

    fn create_render_pass(&mut self, desc: &RenderPassDesc) -> Result<vk::RenderPass>;
    fn destroy_render_pass(&mut self, render_pass: vk::RenderPass);
    fn create_framebuffer(&mut self, desc: &FramebufferDesc) -> Result<vk::Framebuffer>;
    fn destroy_framebuffer(&mut self, framebuffer: vk::Framebuffer);

    fn create_shader_module(&mut self, code: &[u32]) -> Result<vk::ShaderModule>;
    fn destroy_shader_module(&mut self, module: vk::ShaderModule);
    fn create_pipeline_layout(
        &mut self,
        set_layouts: &[vk::DescriptorSetLayout],
    ) -> Result<vk::PipelineLayout>;
    fn destroy_pipeline_layout(&mut self, layout: vk::PipelineLayout);
    fn create_graphics_pipeline(&mut self, desc: &PipelineDesc) -> Result<vk::Pipeline>;
    fn destroy_pipeline(&mut self, pipeline: vk::Pipeline);

    fn create_descriptor_set_layout(
        &mut self,
        bindings: &[LayoutBinding],
    ) -> Result<vk::DescriptorSetLayout>;
    fn destroy_descriptor_set_layout(&mut self, layout: vk::DescriptorSetLayout);
    fn create_descriptor_pool(&mut self, desc: &PoolDesc) -> Result<vk::DescriptorPool>;
    /// Also releases every set still allocated from the pool.
    fn destroy_descriptor_pool(&mut self, pool: vk::DescriptorPool);
    fn allocate_descriptor_sets(
        &mut self,
        pool: vk::DescriptorPool,
        layouts: &[vk::DescriptorSetLayout],
    ) -> Result<Vec<vk::DescriptorSet>>;
    fn free_descriptor_sets(
        &mut self,
        pool: vk::DescriptorPool,
        sets: &[vk::DescriptorSet],
    ) -> Result<()>;
    fn update_descriptor_sets(&mut self, writes: &[DescriptorWrite]);

    fn create_command_pool(&mut self, queue: QueueKind) -> Result<vk::CommandPool>;
    fn destroy_command_pool(&mut self, pool: vk::CommandPool);
    fn allocate_command_buffers(
        &mut self,
        pool: vk::CommandPool,
        count: u32,
    ) -> Result<Vec<vk::CommandBuffer>>;
    fn free_command_buffers(&mut self, pool: vk::CommandPool, buffers: &[vk::CommandBuffer]);
    /// Records `commands` into a reusable buffer that may be pending more than once.
    fn record(&mut self, buffer: vk::CommandBuffer, commands: &[GpuCommand]) -> Result<()>;
    /// Records, submits and waits for a throwaway buffer allocated from `pool`.
    fn one_shot(
        &mut self,
        pool: vk::CommandPool,
        queue: QueueKind,
        commands: &[GpuCommand],
    ) -> Result<()>;

    fn create_semaphore(&mut self) -> Result<vk::Semaphore>;
    fn destroy_semaphore(&mut self, semaphore: vk::Semaphore);
    fn create_fence(&mut self, signaled: bool) -> Result<vk::Fence>;
    fn destroy_fence(&mut self, fence: vk::Fence);
    fn wait_for_fence(&mut self, fence: vk::Fence) -> Result<()>;
    fn reset_fence(&mut self, fence: vk::Fence) -> Result<()>;

    fn acquire_next_image(
        &mut self,
        swapchain: vk::SwapchainKHR,
        signal: vk::Semaphore,
    ) -> Result<AcquireOutcome>;
    fn submit(&mut self, submission: &Submission) -> Result<()>;
    fn present(
        &mut self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> Result<PresentOutcome>;
    fn wait_idle(&mut self) -> Result<()>;
}

// SPDX-License-Identifier: CEPL-1.0
//! `TrackingGpu`: an in-memory device that hands out fake handles, counts what
//! is alive per object kind and models fence/semaphore states closely enough to
//! catch protocol mistakes in the scheduler.
use std::collections::{BTreeMap, HashMap, VecDeque};

use ash::vk::{self, Handle};

use crate::error::{RenderError, Result};
use crate::gpu::*;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Kind {
    Swapchain,
    Image,
    ImageView,
    Sampler,
    Buffer,
    Memory,
    RenderPass,
    Framebuffer,
    ShaderModule,
    PipelineLayout,
    Pipeline,
    DescriptorSetLayout,
    DescriptorPool,
    DescriptorSet,
    CommandPool,
    CommandBuffer,
    Semaphore,
    Fence,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FenceState {
    Signaled,
    Unsignaled,
    /// Submitted; signals once the CPU waits on it or the device idles.
    Pending,
}

fn protocol(call: &'static str) -> RenderError {
    RenderError::Vulkan {
        call,
        result: vk::Result::ERROR_VALIDATION_FAILED_EXT,
    }
}

pub fn test_caps() -> DeviceCaps {
    DeviceCaps {
        device_name: "tracking".into(),
        families: QueueFamilies {
            graphics: 0,
            present: 0,
            transfer: 1,
        },
        samples: vk::SampleCountFlags::TYPE_4,
        depth_format: vk::Format::D32_SFLOAT_S8_UINT,
        max_anisotropy: 16.0,
        linear_blit: true,
    }
}

pub struct TrackingGpu {
    caps: DeviceCaps,
    surface: SurfaceInfo,
    next_handle: u64,
    live: HashMap<u64, Kind>,
    created: BTreeMap<Kind, usize>,
    fences: HashMap<u64, FenceState>,
    /// Binary semaphores: true once a signal operation is queued.
    semaphores: HashMap<u64, bool>,
    swapchain_images: HashMap<u64, Vec<vk::Image>>,
    owned_by_pool: HashMap<u64, u64>,
    next_image: u32,
    pub acquire_script: VecDeque<AcquireOutcome>,
    pub present_script: VecDeque<PresentOutcome>,
    pub swapchains: Vec<SwapchainDesc>,
    pub framebuffers: Vec<FramebufferDesc>,
    pub views: Vec<ViewDesc>,
    pub pipelines: Vec<PipelineDesc>,
    pub submissions: Vec<Submission>,
    pub one_shots: Vec<(QueueKind, Vec<GpuCommand>)>,
    pub recorded: HashMap<u64, Vec<GpuCommand>>,
    pub uploads: Vec<(vk::Buffer, Vec<u8>)>,
    pub presents: Vec<u32>,
    pub wait_idle_calls: usize,
}

impl TrackingGpu {
    pub fn new(width: u32, height: u32) -> Self {
        Self::with_caps(test_caps(), width, height)
    }

    pub fn with_caps(caps: DeviceCaps, width: u32, height: u32) -> Self {
        let extent = vk::Extent2D { width, height };
        let capabilities = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 3,
            current_extent: extent,
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 4096,
            },
            max_image_array_layers: 1,
            supported_transforms: vk::SurfaceTransformFlagsKHR::IDENTITY,
            current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
            ..Default::default()
        };
        TrackingGpu {
            caps,
            surface: SurfaceInfo {
                capabilities,
                formats: vec![vk::SurfaceFormatKHR {
                    format: vk::Format::B8G8R8A8_UNORM,
                    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
                }],
                present_modes: vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX],
            },
            next_handle: 0x1000,
            live: HashMap::new(),
            created: BTreeMap::new(),
            fences: HashMap::new(),
            semaphores: HashMap::new(),
            swapchain_images: HashMap::new(),
            owned_by_pool: HashMap::new(),
            next_image: 0,
            acquire_script: VecDeque::new(),
            present_script: VecDeque::new(),
            swapchains: Vec::new(),
            framebuffers: Vec::new(),
            views: Vec::new(),
            pipelines: Vec::new(),
            submissions: Vec::new(),
            one_shots: Vec::new(),
            recorded: HashMap::new(),
            uploads: Vec::new(),
            presents: Vec::new(),
            wait_idle_calls: 0,
        }
    }

    /// What the surface reports from now on, as after a window resize.
    pub fn set_surface_extent(&mut self, width: u32, height: u32) {
        self.surface.capabilities.current_extent = vk::Extent2D { width, height };
    }

    pub fn set_image_bounds(&mut self, min: u32, max: u32) {
        self.surface.capabilities.min_image_count = min;
        self.surface.capabilities.max_image_count = max;
    }

    pub fn live(&self, kind: Kind) -> usize {
        self.live.values().filter(|k| **k == kind).count()
    }

    pub fn live_total(&self) -> usize {
        self.live.len()
    }

    pub fn created(&self, kind: Kind) -> usize {
        self.created.get(&kind).copied().unwrap_or(0)
    }

    pub fn live_counts(&self) -> BTreeMap<Kind, usize> {
        let mut counts = BTreeMap::new();
        for kind in self.live.values() {
            *counts.entry(*kind).or_insert(0) += 1;
        }
        counts
    }

    pub fn fence_state(&self, fence: vk::Fence) -> Option<FenceState> {
        self.fences.get(&fence.as_raw()).copied()
    }

    pub fn pending_fences(&self) -> usize {
        self.fences
            .values()
            .filter(|s| **s == FenceState::Pending)
            .count()
    }

    pub fn is_live<H: Handle>(&self, handle: H) -> bool {
        self.live.contains_key(&handle.as_raw())
    }

    fn make(&mut self, kind: Kind) -> u64 {
        self.next_handle += 1;
        self.live.insert(self.next_handle, kind);
        *self.created.entry(kind).or_insert(0) += 1;
        self.next_handle
    }

    fn handle<H: Handle>(&mut self, kind: Kind) -> H {
        H::from_raw(self.make(kind))
    }

    fn release<H: Handle>(&mut self, handle: H, kind: Kind) {
        let raw = handle.as_raw();
        match self.live.remove(&raw) {
            Some(found) if found == kind => {}
            Some(found) => panic!("destroyed {found:?} {raw:#x} as {kind:?}"),
            None => panic!("destroyed unknown or already destroyed {kind:?} {raw:#x}"),
        }
    }

    fn require<H: Handle>(&self, handle: H, kind: Kind, call: &'static str) -> Result<()> {
        match self.live.get(&handle.as_raw()) {
            Some(found) if *found == kind => Ok(()),
            _ => Err(protocol(call)),
        }
    }

    fn release_children(&mut self, pool: u64, kind: Kind) {
        let children: Vec<u64> = self
            .owned_by_pool
            .iter()
            .filter(|(_, owner)| **owner == pool)
            .map(|(child, _)| *child)
            .collect();
        for child in children {
            self.owned_by_pool.remove(&child);
            if self.live.get(&child) == Some(&kind) {
                self.live.remove(&child);
            }
        }
    }

    fn signal(&mut self, semaphore: vk::Semaphore, call: &'static str) -> Result<()> {
        match self.semaphores.get_mut(&semaphore.as_raw()) {
            Some(signaled) if !*signaled => {
                *signaled = true;
                Ok(())
            }
            _ => Err(protocol(call)),
        }
    }

    fn consume(&mut self, semaphore: vk::Semaphore, call: &'static str) -> Result<()> {
        match self.semaphores.get_mut(&semaphore.as_raw()) {
            Some(signaled) if *signaled => {
                *signaled = false;
                Ok(())
            }
            _ => Err(protocol(call)),
        }
    }
}

impl Gpu for TrackingGpu {
    fn caps(&self) -> &DeviceCaps {
        &self.caps
    }

    fn surface_info(&self) -> Result<SurfaceInfo> {
        Ok(self.surface.clone())
    }

    fn create_swapchain(&mut self, desc: &SwapchainDesc) -> Result<vk::SwapchainKHR> {
        let extent = desc.extent;
        if extent.width == 0 || extent.height == 0 {
            return Err(RenderError::Resource {
                what: "swapchain",
                result: vk::Result::ERROR_INITIALIZATION_FAILED,
            });
        }
        let swapchain: vk::SwapchainKHR = self.handle(Kind::Swapchain);
        let images = (0..desc.min_image_count)
            .map(|_| {
                self.next_handle += 1;
                vk::Image::from_raw(self.next_handle)
            })
            .collect();
        self.swapchain_images.insert(swapchain.as_raw(), images);
        self.swapchains.push(*desc);
        self.next_image = 0;
        Ok(swapchain)
    }

    fn swapchain_images(&mut self, swapchain: vk::SwapchainKHR) -> Result<Vec<vk::Image>> {
        self.swapchain_images
            .get(&swapchain.as_raw())
            .cloned()
            .ok_or_else(|| protocol("vkGetSwapchainImagesKHR"))
    }

    fn destroy_swapchain(&mut self, swapchain: vk::SwapchainKHR) {
        self.release(swapchain, Kind::Swapchain);
        self.swapchain_images.remove(&swapchain.as_raw());
    }

    fn create_image(&mut self, desc: &ImageDesc) -> Result<GpuImage> {
        Ok(GpuImage {
            image: self.handle(Kind::Image),
            memory: self.handle(Kind::Memory),
            format: desc.format,
            extent: desc.extent,
            mip_levels: desc.mip_levels,
            array_layers: desc.array_layers,
        })
    }

    fn destroy_image(&mut self, image: GpuImage) {
        self.release(image.image, Kind::Image);
        self.release(image.memory, Kind::Memory);
    }

    fn create_image_view(&mut self, desc: &ViewDesc) -> Result<vk::ImageView> {
        self.views.push(*desc);
        Ok(self.handle(Kind::ImageView))
    }

    fn destroy_image_view(&mut self, view: vk::ImageView) {
        self.release(view, Kind::ImageView);
    }

    fn create_sampler(&mut self, _desc: &SamplerDesc) -> Result<vk::Sampler> {
        Ok(self.handle(Kind::Sampler))
    }

    fn destroy_sampler(&mut self, sampler: vk::Sampler) {
        self.release(sampler, Kind::Sampler);
    }

    fn create_buffer(&mut self, desc: &BufferDesc) -> Result<GpuBuffer> {
        Ok(GpuBuffer {
            buffer: self.handle(Kind::Buffer),
            memory: self.handle(Kind::Memory),
            size: desc.size,
        })
    }

    fn destroy_buffer(&mut self, buffer: GpuBuffer) {
        self.release(buffer.buffer, Kind::Buffer);
        self.release(buffer.memory, Kind::Memory);
    }

    fn write_buffer(&mut self, buffer: &GpuBuffer, bytes: &[u8]) -> Result<()> {
        self.require(buffer.buffer, Kind::Buffer, "vkMapMemory")?;
        if bytes.len() as vk::DeviceSize > buffer.size {
            return Err(protocol("vkMapMemory"));
        }
        self.uploads.push((buffer.buffer, bytes.to_vec()));
        Ok(())
    }

    fn create_render_pass(&mut self, _desc: &RenderPassDesc) -> Result<vk::RenderPass> {
        Ok(self.handle(Kind::RenderPass))
    }

    fn destroy_render_pass(&mut self, render_pass: vk::RenderPass) {
        self.release(render_pass, Kind::RenderPass);
    }

    fn create_framebuffer(&mut self, desc: &FramebufferDesc) -> Result<vk::Framebuffer> {
        self.require(desc.render_pass, Kind::RenderPass, "vkCreateFramebuffer")?;
        for view in &desc.attachments {
            self.require(*view, Kind::ImageView, "vkCreateFramebuffer")?;
        }
        self.framebuffers.push(desc.clone());
        Ok(self.handle(Kind::Framebuffer))
    }

    fn destroy_framebuffer(&mut self, framebuffer: vk::Framebuffer) {
        self.release(framebuffer, Kind::Framebuffer);
    }

    fn create_shader_module(&mut self, code: &[u32]) -> Result<vk::ShaderModule> {
        if code.is_empty() {
            return Err(RenderError::Resource {
                what: "shader module",
                result: vk::Result::ERROR_INVALID_SHADER_NV,
            });
        }
        Ok(self.handle(Kind::ShaderModule))
    }

    fn destroy_shader_module(&mut self, module: vk::ShaderModule) {
        self.release(module, Kind::ShaderModule);
    }

    fn create_pipeline_layout(
        &mut self,
        set_layouts: &[vk::DescriptorSetLayout],
    ) -> Result<vk::PipelineLayout> {
        for layout in set_layouts {
            self.require(*layout, Kind::DescriptorSetLayout, "vkCreatePipelineLayout")?;
        }
        Ok(self.handle(Kind::PipelineLayout))
    }

    fn destroy_pipeline_layout(&mut self, layout: vk::PipelineLayout) {
        self.release(layout, Kind::PipelineLayout);
    }

    fn create_graphics_pipeline(&mut self, desc: &PipelineDesc) -> Result<vk::Pipeline> {
        self.require(desc.render_pass, Kind::RenderPass, "vkCreateGraphicsPipelines")?;
        self.require(desc.layout, Kind::PipelineLayout, "vkCreateGraphicsPipelines")?;
        self.require(desc.vertex, Kind::ShaderModule, "vkCreateGraphicsPipelines")?;
        self.require(desc.fragment, Kind::ShaderModule, "vkCreateGraphicsPipelines")?;
        self.pipelines.push(desc.clone());
        Ok(self.handle(Kind::Pipeline))
    }

    fn destroy_pipeline(&mut self, pipeline: vk::Pipeline) {
        self.release(pipeline, Kind::Pipeline);
    }

    fn create_descriptor_set_layout(
        &mut self,
        _bindings: &[LayoutBinding],
    ) -> Result<vk::DescriptorSetLayout> {
        Ok(self.handle(Kind::DescriptorSetLayout))
    }

    fn destroy_descriptor_set_layout(&mut self, layout: vk::DescriptorSetLayout) {
        self.release(layout, Kind::DescriptorSetLayout);
    }

    fn create_descriptor_pool(&mut self, _desc: &PoolDesc) -> Result<vk::DescriptorPool> {
        Ok(self.handle(Kind::DescriptorPool))
    }

    fn destroy_descriptor_pool(&mut self, pool: vk::DescriptorPool) {
        self.release(pool, Kind::DescriptorPool);
        self.release_children(pool.as_raw(), Kind::DescriptorSet);
    }

    fn allocate_descriptor_sets(
        &mut self,
        pool: vk::DescriptorPool,
        layouts: &[vk::DescriptorSetLayout],
    ) -> Result<Vec<vk::DescriptorSet>> {
        self.require(pool, Kind::DescriptorPool, "vkAllocateDescriptorSets")?;
        let mut sets = Vec::with_capacity(layouts.len());
        for layout in layouts {
            self.require(*layout, Kind::DescriptorSetLayout, "vkAllocateDescriptorSets")?;
            let set = self.make(Kind::DescriptorSet);
            self.owned_by_pool.insert(set, pool.as_raw());
            sets.push(vk::DescriptorSet::from_raw(set));
        }
        Ok(sets)
    }

    fn free_descriptor_sets(
        &mut self,
        pool: vk::DescriptorPool,
        sets: &[vk::DescriptorSet],
    ) -> Result<()> {
        for set in sets {
            if self.owned_by_pool.remove(&set.as_raw()) != Some(pool.as_raw()) {
                return Err(protocol("vkFreeDescriptorSets"));
            }
            self.release(*set, Kind::DescriptorSet);
        }
        Ok(())
    }

    fn update_descriptor_sets(&mut self, writes: &[DescriptorWrite]) {
        for write in writes {
            assert!(self.is_live(write.set), "write to dead set {:?}", write.set);
        }
    }

    fn create_command_pool(&mut self, _queue: QueueKind) -> Result<vk::CommandPool> {
        Ok(self.handle(Kind::CommandPool))
    }

    fn destroy_command_pool(&mut self, pool: vk::CommandPool) {
        self.release(pool, Kind::CommandPool);
        self.release_children(pool.as_raw(), Kind::CommandBuffer);
    }

    fn allocate_command_buffers(
        &mut self,
        pool: vk::CommandPool,
        count: u32,
    ) -> Result<Vec<vk::CommandBuffer>> {
        self.require(pool, Kind::CommandPool, "vkAllocateCommandBuffers")?;
        Ok((0..count)
            .map(|_| {
                let buffer = self.make(Kind::CommandBuffer);
                self.owned_by_pool.insert(buffer, pool.as_raw());
                vk::CommandBuffer::from_raw(buffer)
            })
            .collect())
    }

    fn free_command_buffers(&mut self, pool: vk::CommandPool, buffers: &[vk::CommandBuffer]) {
        for buffer in buffers {
            let owner = self.owned_by_pool.remove(&buffer.as_raw());
            assert_eq!(owner, Some(pool.as_raw()), "buffer freed to the wrong pool");
            self.recorded.remove(&buffer.as_raw());
            self.release(*buffer, Kind::CommandBuffer);
        }
    }

    fn record(&mut self, buffer: vk::CommandBuffer, commands: &[GpuCommand]) -> Result<()> {
        self.require(buffer, Kind::CommandBuffer, "vkBeginCommandBuffer")?;
        self.recorded.insert(buffer.as_raw(), commands.to_vec());
        Ok(())
    }

    fn one_shot(
        &mut self,
        pool: vk::CommandPool,
        queue: QueueKind,
        commands: &[GpuCommand],
    ) -> Result<()> {
        self.require(pool, Kind::CommandPool, "vkAllocateCommandBuffers")?;
        self.one_shots.push((queue, commands.to_vec()));
        Ok(())
    }

    fn create_semaphore(&mut self) -> Result<vk::Semaphore> {
        let semaphore: vk::Semaphore = self.handle(Kind::Semaphore);
        self.semaphores.insert(semaphore.as_raw(), false);
        Ok(semaphore)
    }

    fn destroy_semaphore(&mut self, semaphore: vk::Semaphore) {
        self.release(semaphore, Kind::Semaphore);
        self.semaphores.remove(&semaphore.as_raw());
    }

    fn create_fence(&mut self, signaled: bool) -> Result<vk::Fence> {
        let fence: vk::Fence = self.handle(Kind::Fence);
        let state = if signaled {
            FenceState::Signaled
        } else {
            FenceState::Unsignaled
        };
        self.fences.insert(fence.as_raw(), state);
        Ok(fence)
    }

    fn destroy_fence(&mut self, fence: vk::Fence) {
        assert_ne!(
            self.fence_state(fence),
            Some(FenceState::Pending),
            "fence destroyed while in use"
        );
        self.release(fence, Kind::Fence);
        self.fences.remove(&fence.as_raw());
    }

    fn wait_for_fence(&mut self, fence: vk::Fence) -> Result<()> {
        match self.fences.get_mut(&fence.as_raw()) {
            // Nothing would ever signal it: a real device would hang here.
            Some(FenceState::Unsignaled) | None => Err(protocol("vkWaitForFences")),
            Some(state) => {
                *state = FenceState::Signaled;
                Ok(())
            }
        }
    }

    fn reset_fence(&mut self, fence: vk::Fence) -> Result<()> {
        match self.fences.get_mut(&fence.as_raw()) {
            Some(FenceState::Pending) | None => Err(protocol("vkResetFences")),
            Some(state) => {
                *state = FenceState::Unsignaled;
                Ok(())
            }
        }
    }

    fn acquire_next_image(
        &mut self,
        swapchain: vk::SwapchainKHR,
        signal: vk::Semaphore,
    ) -> Result<AcquireOutcome> {
        self.require(swapchain, Kind::Swapchain, "vkAcquireNextImageKHR")?;
        let outcome = match self.acquire_script.pop_front() {
            Some(scripted) => scripted,
            None => {
                let count = self.swapchain_images[&swapchain.as_raw()].len() as u32;
                let index = self.next_image % count;
                self.next_image = self.next_image.wrapping_add(1);
                AcquireOutcome::Acquired {
                    index,
                    suboptimal: false,
                }
            }
        };
        if let AcquireOutcome::Acquired { .. } = outcome {
            self.signal(signal, "vkAcquireNextImageKHR")?;
        }
        Ok(outcome)
    }

    fn submit(&mut self, submission: &Submission) -> Result<()> {
        self.require(submission.command_buffer, Kind::CommandBuffer, "vkQueueSubmit")?;
        if !self.recorded.contains_key(&submission.command_buffer.as_raw()) {
            return Err(protocol("vkQueueSubmit"));
        }
        if let Some((wait, _)) = submission.wait {
            self.consume(wait, "vkQueueSubmit")?;
        }
        if let Some(signal) = submission.signal {
            self.signal(signal, "vkQueueSubmit")?;
        }
        if let Some(fence) = submission.fence {
            match self.fences.get_mut(&fence.as_raw()) {
                Some(state) if *state == FenceState::Unsignaled => *state = FenceState::Pending,
                _ => return Err(protocol("vkQueueSubmit")),
            }
        }
        self.submissions.push(*submission);
        Ok(())
    }

    fn present(
        &mut self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> Result<PresentOutcome> {
        self.require(swapchain, Kind::Swapchain, "vkQueuePresentKHR")?;
        self.consume(wait, "vkQueuePresentKHR")?;
        self.presents.push(image_index);
        Ok(self
            .present_script
            .pop_front()
            .unwrap_or(PresentOutcome::Presented))
    }

    fn wait_idle(&mut self) -> Result<()> {
        self.wait_idle_calls += 1;
        for state in self.fences.values_mut() {
            if *state == FenceState::Pending {
                *state = FenceState::Signaled;
            }
        }
        Ok(())
    }
}

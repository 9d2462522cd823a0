// SPDX-License-Identifier: CEPL-1.0
//! Command pools and the per-image command streams for both passes.
use ash::vk;
use stereo_math::{Eye, EyePair};

use crate::descriptors::Descriptors;
use crate::error::Result;
use crate::gpu::{ClearValue, Gpu, GpuCommand, QueueKind, Viewport};
use crate::scene::MeshBuffers;
use crate::targets::SurfaceGraph;

pub const CLEAR_COLOR: [f32; 4] = [0.0, 0.0, 0.0, 1.0];
pub const CLEAR_DEPTH: ClearValue = ClearValue::DepthStencil {
    depth: 1.0,
    stencil: 0,
};
/// The composite pass draws a full-screen strip per eye.
pub const FULLSCREEN_STRIP_VERTICES: u32 = 4;

#[derive(Clone, Copy, Debug)]
pub struct CommandPools {
    pub graphics: vk::CommandPool,
    pub transfer: vk::CommandPool,
}

impl CommandPools {
    pub fn create<G: Gpu>(gpu: &mut G) -> Result<Self> {
        Ok(CommandPools {
            graphics: gpu.create_command_pool(QueueKind::Graphics)?,
            transfer: gpu.create_command_pool(QueueKind::Transfer)?,
        })
    }

    pub fn for_queue(&self, queue: QueueKind) -> vk::CommandPool {
        match queue {
            QueueKind::Graphics => self.graphics,
            QueueKind::Transfer => self.transfer,
        }
    }

    pub fn destroy<G: Gpu>(self, gpu: &mut G) {
        gpu.destroy_command_pool(self.transfer);
        gpu.destroy_command_pool(self.graphics);
    }
}

/// Left eye on the left half of the window, right eye on the right half.
pub fn eye_viewport(eye: Eye, extent: vk::Extent2D) -> (Viewport, [i32; 2], [u32; 2]) {
    let half = extent.width / 2;
    let x = match eye {
        Eye::Left => 0,
        Eye::Right => half,
    };
    let viewport = Viewport {
        x: x as f32,
        y: 0.0,
        width: half as f32,
        height: extent.height as f32,
    };
    (viewport, [x as i32, 0], [half, extent.height])
}

/// Both eyes in one multiview draw into the layered offscreen target.
#[allow(clippy::too_many_arguments)]
pub fn offscreen_commands(
    render_pass: vk::RenderPass,
    framebuffer: vk::Framebuffer,
    extent: vk::Extent2D,
    pipeline: vk::Pipeline,
    layout: vk::PipelineLayout,
    sets: [vk::DescriptorSet; 2],
    mesh: &MeshBuffers,
) -> Vec<GpuCommand> {
    vec![
        GpuCommand::BeginRenderPass {
            render_pass,
            framebuffer,
            extent,
            clear: vec![ClearValue::Color(CLEAR_COLOR), CLEAR_DEPTH],
        },
        GpuCommand::BindPipeline(pipeline),
        GpuCommand::BindVertexBuffer(mesh.vertices.buffer),
        GpuCommand::BindIndexBuffer(mesh.indices.buffer),
        GpuCommand::BindDescriptorSets {
            layout,
            first_set: 0,
            sets: sets.to_vec(),
        },
        GpuCommand::DrawIndexed {
            index_count: mesh.index_count,
        },
        GpuCommand::EndRenderPass,
    ]
}

/// Samples one offscreen layer per half of the swapchain image.
pub fn composite_commands(
    render_pass: vk::RenderPass,
    framebuffer: vk::Framebuffer,
    extent: vk::Extent2D,
    clear: Vec<ClearValue>,
    pipelines: &EyePair<vk::Pipeline>,
    layout: vk::PipelineLayout,
    set: vk::DescriptorSet,
) -> Vec<GpuCommand> {
    let mut cmds = vec![
        GpuCommand::BeginRenderPass {
            render_pass,
            framebuffer,
            extent,
            clear,
        },
        GpuCommand::BindDescriptorSets {
            layout,
            first_set: 0,
            sets: vec![set],
        },
    ];
    for (eye, &pipeline) in pipelines.iter() {
        let (viewport, [x, y], [width, height]) = eye_viewport(eye, extent);
        cmds.extend([
            GpuCommand::SetViewport(viewport),
            GpuCommand::SetScissor {
                x,
                y,
                width,
                height,
            },
            GpuCommand::BindPipeline(pipeline),
            GpuCommand::Draw {
                vertex_count: FULLSCREEN_STRIP_VERTICES,
            },
        ]);
    }
    cmds.push(GpuCommand::EndRenderPass);
    cmds
}

/// Pre-recorded command buffers, one pair per swapchain image.
#[derive(Clone, Debug, Default)]
pub struct FrameCommands {
    pub offscreen: Vec<vk::CommandBuffer>,
    pub composite: Vec<vk::CommandBuffer>,
}

impl FrameCommands {
    pub fn record<G: Gpu>(
        gpu: &mut G,
        pools: &CommandPools,
        graph: &SurfaceGraph,
        descriptors: &Descriptors,
        mesh: &MeshBuffers,
    ) -> Result<Self> {
        let count = graph.image_count() as u32;
        let offscreen = gpu.allocate_command_buffers(pools.graphics, count)?;
        let composite = gpu.allocate_command_buffers(pools.graphics, count)?;
        let extent = graph.swapchain.extent;

        for (i, (&off, &comp)) in offscreen.iter().zip(&composite).enumerate() {
            let image_set = descriptors.per_image[i];
            gpu.record(
                off,
                &offscreen_commands(
                    graph.passes.offscreen,
                    graph.framebuffers.offscreen,
                    extent,
                    graph.pipelines.offscreen,
                    graph.pipelines.offscreen_layout,
                    [image_set, descriptors.eye_textures],
                    mesh,
                ),
            )?;
            gpu.record(
                comp,
                &composite_commands(
                    graph.passes.composite,
                    graph.framebuffers.composite[i],
                    extent,
                    graph.passes.composite_clear(),
                    &graph.pipelines.composite,
                    graph.pipelines.composite_layout,
                    image_set,
                ),
            )?;
        }
        Ok(FrameCommands {
            offscreen,
            composite,
        })
    }

    pub fn free<G: Gpu>(self, gpu: &mut G, pools: &CommandPools) {
        if !self.offscreen.is_empty() {
            gpu.free_command_buffers(pools.graphics, &self.offscreen);
        }
        if !self.composite.is_empty() {
            gpu.free_command_buffers(pools.graphics, &self.composite);
        }
    }
}

// SPDX-License-Identifier: CEPL-1.0
//! The stereo renderer proper, generic over the device seam.
use std::time::Instant;

use ash::vk;
use stereo_assets::{Mesh, Pixels};
use stereo_math::{EyePair, ProjectionData, StereoRig, DEFAULT_DISTORTION};
use stereo_render::{FrameStatus, RenderSize};
use tracing::{debug, info, warn};

use crate::commands::{CommandPools, FrameCommands};
use crate::descriptors::{DescriptorLayouts, Descriptors};
use crate::error::Result;
use crate::gpu::Gpu;
use crate::pipeline::ShaderSet;
use crate::scene::SceneResources;
use crate::scheduler::{FrameOutcome, FrameScheduler, FrameTargets};
use crate::targets::SurfaceGraph;

/// Decoded inputs handed to the renderer at startup.
#[derive(Clone, Debug)]
pub struct SceneInputs {
    pub shaders: ShaderSet,
    pub eye_images: EyePair<Pixels>,
    pub mesh: Mesh,
}

/// Objects that outlive any one swapchain.
struct Core {
    pools: CommandPools,
    layouts: DescriptorLayouts,
    scene: SceneResources,
    descriptors: Descriptors,
    commands: FrameCommands,
    scheduler: FrameScheduler,
}

pub struct StereoRenderer<G: Gpu> {
    gpu: G,
    shaders: ShaderSet,
    core: Option<Core>,
    graph: Option<SurfaceGraph>,
    rig: StereoRig,
    distortion: f32,
    size: RenderSize,
    /// Set when a rebuild was requested while the window had zero area.
    pending_recreate: bool,
    started: Instant,
}

impl<G: Gpu> StereoRenderer<G> {
    pub fn new(mut gpu: G, size: RenderSize, inputs: SceneInputs) -> Result<Self> {
        let SceneInputs {
            shaders,
            eye_images,
            mesh,
        } = inputs;

        let pools = CommandPools::create(&mut gpu)?;
        let layouts = DescriptorLayouts::create(&mut gpu)?;
        let scene = SceneResources::create(&mut gpu, &pools, &mesh, &eye_images)?;
        let graph = SurfaceGraph::create(&mut gpu, &pools, &shaders, &layouts, size, "startup")?;
        let descriptors = Descriptors::create(
            &mut gpu,
            &layouts,
            graph.image_count(),
            graph.offscreen_binding(scene.offscreen_sampler),
            &scene,
        )?;
        let commands = FrameCommands::record(&mut gpu, &pools, &graph, &descriptors, &scene.mesh)?;
        let scheduler = FrameScheduler::new(&mut gpu)?;
        info!(
            "vk: renderer ready on {} ({:?} MSAA)",
            gpu.caps().device_name,
            gpu.caps().samples
        );

        Ok(StereoRenderer {
            gpu,
            shaders,
            core: Some(Core {
                pools,
                layouts,
                scene,
                descriptors,
                commands,
                scheduler,
            }),
            graph: Some(graph),
            rig: StereoRig::default(),
            distortion: DEFAULT_DISTORTION,
            size,
            pending_recreate: false,
            started: Instant::now(),
        })
    }

    pub fn gpu(&self) -> &G {
        &self.gpu
    }

    pub fn gpu_mut(&mut self) -> &mut G {
        &mut self.gpu
    }

    /// Current swapchain extent, if a swapchain exists.
    pub fn extent(&self) -> Option<vk::Extent2D> {
        self.graph.as_ref().map(SurfaceGraph::extent)
    }

    pub fn distortion(&self) -> f32 {
        self.distortion
    }

    /// Takes `alpha` as given; [`stereo_math::Distortion`] owns the range.
    pub fn set_distortion(&mut self, alpha: f32) {
        self.distortion = alpha;
    }

    pub fn is_recreate_pending(&self) -> bool {
        self.pending_recreate
    }

    pub fn scheduler(&self) -> Option<&FrameScheduler> {
        self.core.as_ref().map(|core| &core.scheduler)
    }

    /// Only records the request; the rebuild happens on the render thread's next frame.
    pub fn resize(&mut self, size: RenderSize) {
        self.size = size;
        if size.is_zero_area() {
            self.pending_recreate = true;
        } else if let Some(core) = self.core.as_mut() {
            core.scheduler.request_resize();
        }
    }

    pub fn render(&mut self) -> Result<FrameStatus> {
        if self.size.is_zero_area() {
            return Ok(FrameStatus::Skipped);
        }
        if self.pending_recreate || self.graph.is_none() {
            self.recreate("resize")?;
            return Ok(FrameStatus::Recreated);
        }
        let (Some(core), Some(graph)) = (self.core.as_mut(), self.graph.as_ref()) else {
            return Ok(FrameStatus::Skipped);
        };

        let extent = graph.extent();
        let elapsed = self.started.elapsed().as_secs_f32();
        let projection =
            ProjectionData::compute(&self.rig, extent.width, extent.height, self.distortion, elapsed);
        let descriptors = &core.descriptors;
        let targets = FrameTargets {
            swapchain: graph.swapchain.handle,
            offscreen: &core.commands.offscreen,
            composite: &core.commands.composite,
        };
        let outcome = core.scheduler.draw_frame(&mut self.gpu, targets, |gpu, image| {
            descriptors.write_projection(gpu, image, &projection)
        })?;

        match outcome {
            FrameOutcome::Presented => Ok(FrameStatus::Presented),
            FrameOutcome::Stale(reason) => {
                self.recreate(reason.describe())?;
                Ok(FrameStatus::Recreated)
            }
        }
    }

    // STRICT ORDER (recreate):
    // wait idle
    // release: command buffers -> per-image sets -> framebuffers -> targets -> pipelines
    //          -> render passes -> views -> swapchain
    // rebuild: swapchain -> views -> passes -> pipelines -> targets -> framebuffers
    //          -> descriptor sets -> command buffers
    fn recreate(&mut self, reason: &str) -> Result<()> {
        if self.size.is_zero_area() {
            info!("vk: recreation ({reason}) deferred until the window has a nonzero size");
            self.pending_recreate = true;
            return Ok(());
        }
        let Some(core) = self.core.as_mut() else {
            return Ok(());
        };
        debug!(
            "vk: recreating swapchain ({reason}) at {}x{}",
            self.size.width, self.size.height
        );
        self.gpu.wait_idle()?;

        // 1) Release
        std::mem::take(&mut core.commands).free(&mut self.gpu, &core.pools);
        core.descriptors.release_sets(&mut self.gpu)?;
        if let Some(graph) = self.graph.take() {
            graph.destroy(&mut self.gpu);
        }

        // 2) Rebuild
        let graph = SurfaceGraph::create(
            &mut self.gpu,
            &core.pools,
            &self.shaders,
            &core.layouts,
            self.size,
            reason,
        )?;
        core.descriptors.rebind(
            &mut self.gpu,
            &core.layouts,
            graph.image_count(),
            graph.offscreen_binding(core.scene.offscreen_sampler),
            &core.scene,
        )?;
        core.commands = FrameCommands::record(
            &mut self.gpu,
            &core.pools,
            &graph,
            &core.descriptors,
            &core.scene.mesh,
        )?;
        core.scheduler.acknowledge_resize();
        self.graph = Some(graph);
        self.pending_recreate = false;
        Ok(())
    }

    /// Releases every device object the renderer created. Runs on drop; safe to call twice.
    pub fn shutdown(&mut self) {
        // STRICT TEARDOWN ORDER:
        // 0) Wait for the GPU to finish using everything below
        if let Err(err) = self.gpu.wait_idle() {
            warn!("vk: wait_idle during teardown failed: {err}");
        }
        let Some(core) = self.core.take() else {
            return;
        };
        // 1) Sync objects
        core.scheduler.destroy(&mut self.gpu);
        // 2) Command buffers, then their pools
        core.commands.free(&mut self.gpu, &core.pools);
        core.pools.destroy(&mut self.gpu);
        // 3) Descriptor pool (frees its sets) and uniform buffers
        core.descriptors.destroy(&mut self.gpu);
        // 4) Samplers, textures, mesh buffers
        core.scene.destroy(&mut self.gpu);
        // 5) Swapchain-scoped graph
        if let Some(graph) = self.graph.take() {
            graph.destroy(&mut self.gpu);
        }
        // 6) Set layouts last: pipeline layouts referencing them are gone
        core.layouts.destroy(&mut self.gpu);
        // The device, surface and instance go when `gpu` drops.
    }
}

impl<G: Gpu> Drop for StereoRenderer<G> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

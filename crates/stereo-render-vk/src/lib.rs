// SPDX-License-Identifier: CEPL-1.0
//! Vulkan stereo renderer: a multiview offscreen pass into a two-layer target,
//! composited side by side onto the swapchain with barrel distortion.
#![deny(unsafe_op_in_unsafe_fn)]

pub mod alloc;
mod backend;
pub mod commands;
pub mod descriptors;
pub mod error;
pub mod gpu;
pub mod negotiate;
pub mod pipeline;
pub mod renderer;
pub mod scene;
pub mod scheduler;
pub mod targets;

#[cfg(test)]
mod testing;

use anyhow::{Context, Result};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use stereo_assets::{cylinder, load_obj, load_rgba8, CylinderParams};
use stereo_render::{FrameStatus, RenderSettings, RenderSize, Renderer};
use tracing::info;

pub use backend::AshGpu;
pub use error::RenderError;
pub use gpu::Gpu;
pub use renderer::{SceneInputs, StereoRenderer};

/// Where the build script put compiled SPIR-V, when built with `compile-shaders`.
pub const BUILT_SHADER_DIR: Option<&str> = option_env!("STEREO_SHADER_DIR");

fn load_inputs(settings: &RenderSettings) -> Result<SceneInputs> {
    let shaders = pipeline::ShaderSet::load(&settings.shader_dir)
        .with_context(|| format!("loading shaders from {}", settings.shader_dir.display()))?;
    let eye_images = settings
        .eye_textures
        .clone()
        .try_map(|eye, path| {
            load_rgba8(&path).with_context(|| format!("loading {eye:?} eye texture"))
        })?;
    let mesh = match &settings.model {
        Some(path) => {
            let mesh = load_obj(path).context("loading model")?;
            info!(
                "loaded {} ({} vertices, {} indices)",
                path.display(),
                mesh.vertices.len(),
                mesh.indices.len()
            );
            mesh
        }
        None => cylinder(&CylinderParams::default()),
    };
    Ok(SceneInputs {
        shaders,
        eye_images,
        mesh,
    })
}

pub struct VkRenderer(StereoRenderer<AshGpu>);

impl Renderer for VkRenderer {
    fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        settings: &RenderSettings,
    ) -> Result<Self> {
        let inputs = load_inputs(settings)?;
        let gpu = AshGpu::new(window, display, settings.validation)
            .context("initialising Vulkan")?;
        let renderer = StereoRenderer::new(gpu, size, inputs).context("building the renderer")?;
        Ok(VkRenderer(renderer))
    }

    fn resize(&mut self, size: RenderSize) {
        self.0.resize(size);
    }

    fn render(&mut self) -> Result<FrameStatus> {
        Ok(self.0.render()?)
    }

    fn set_distortion(&mut self, alpha: f32) {
        self.0.set_distortion(alpha);
    }
}

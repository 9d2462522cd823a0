// SPDX-License-Identifier: CEPL-1.0
use anyhow::Result;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::path::{Path, PathBuf};
use stereo_math::{Eye, EyePair};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

impl RenderSize {
    pub const fn new(width: u32, height: u32) -> Self {
        RenderSize { width, height }
    }

    /// Minimised windows report a zero extent; nothing can be presented then.
    pub const fn is_zero_area(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Where the renderer finds its inputs.
#[derive(Clone, Debug, PartialEq)]
pub struct RenderSettings {
    pub shader_dir: PathBuf,
    pub eye_textures: EyePair<PathBuf>,
    /// OBJ file to draw instead of the procedural cylinder.
    pub model: Option<PathBuf>,
    pub validation: bool,
}

impl RenderSettings {
    pub fn from_asset_root(root: &Path) -> Self {
        RenderSettings {
            shader_dir: root.join("shaders"),
            eye_textures: EyePair::from_fn(|eye| match eye {
                Eye::Left => root.join("textures").join("left.jpg"),
                Eye::Right => root.join("textures").join("right.jpg"),
            }),
            model: None,
            validation: cfg!(debug_assertions),
        }
    }
}

/// What happened to the frame the caller asked for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameStatus {
    Presented,
    /// The swapchain went stale; it has been rebuilt and the next frame will present.
    Recreated,
    /// Zero-area window; nothing was submitted.
    Skipped,
}

pub trait Renderer {
    fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        settings: &RenderSettings,
    ) -> Result<Self>
    where
        Self: Sized;

    /// Records the new framebuffer size; the swapchain is rebuilt during the next frame.
    fn resize(&mut self, size: RenderSize);
    fn render(&mut self) -> Result<FrameStatus>;
    /// `alpha` is expected to come from [`stereo_math::Distortion`], already in range.
    fn set_distortion(&mut self, alpha: f32);
}

// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use std::path::PathBuf;

pub type Result<T, E = RenderError> = std::result::Result<T, E>;

/// Everything that can stop the renderer. All of these are fatal to the caller.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    /// The machine cannot run the renderer at all (no device, no format, no memory type).
    #[error("unsupported hardware: {0}")]
    Capability(String),

    #[error("failed to create {what}: {result}")]
    Resource {
        what: &'static str,
        result: vk::Result,
    },

    #[error("unsupported image layout transition {old:?} -> {new:?}")]
    UnsupportedTransition {
        old: vk::ImageLayout,
        new: vk::ImageLayout,
    },

    #[error("{}: {reason}", path.display())]
    Asset { path: PathBuf, reason: String },

    #[error("{call} failed: {result}")]
    Vulkan {
        call: &'static str,
        result: vk::Result,
    },

    #[error("presentation engine returned image {index} but the swapchain holds {count}")]
    ImageIndex { index: u32, count: usize },

    #[error("failed to load the Vulkan library: {0}")]
    Loader(#[from] ash::LoadingError),

    #[error("window handle unavailable: {0}")]
    Window(#[from] raw_window_handle::HandleError),
}

/// Tags a raw `VkResult` with what was being attempted.
pub(crate) trait VkResultExt<T> {
    fn creating(self, what: &'static str) -> Result<T>;
    fn calling(self, call: &'static str) -> Result<T>;
}

impl<T> VkResultExt<T> for ash::prelude::VkResult<T> {
    fn creating(self, what: &'static str) -> Result<T> {
        self.map_err(|result| RenderError::Resource { what, result })
    }

    fn calling(self, call: &'static str) -> Result<T> {
        self.map_err(|result| RenderError::Vulkan { call, result })
    }
}

impl From<stereo_assets::AssetError> for RenderError {
    fn from(err: stereo_assets::AssetError) -> Self {
        use stereo_assets::AssetError;
        match err {
            AssetError::Image { path, source } => RenderError::Asset {
                path,
                reason: source.to_string(),
            },
            AssetError::Mesh { path, source } => RenderError::Asset {
                path,
                reason: source.to_string(),
            },
            AssetError::EmptyMesh { path } => RenderError::Asset {
                path,
                reason: "contains no geometry".into(),
            },
            AssetError::TooManyVertices { path, count } => RenderError::Asset {
                path,
                reason: format!("{count} vertices do not fit a 32-bit index"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn vk_results_carry_context() {
        let r: ash::prelude::VkResult<()> = Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
        let err = r.creating("offscreen color image").unwrap_err();
        assert!(matches!(
            err,
            RenderError::Resource {
                what: "offscreen color image",
                result: vk::Result::ERROR_OUT_OF_DEVICE_MEMORY
            }
        ));
        assert!(err.to_string().starts_with("failed to create offscreen color image"));
    }

    #[test]
    fn asset_errors_keep_their_path() {
        let err: RenderError = stereo_assets::AssetError::EmptyMesh {
            path: Path::new("models/empty.obj").to_path_buf(),
        }
        .into();
        match err {
            RenderError::Asset { path, .. } => assert_eq!(path, Path::new("models/empty.obj")),
            other => panic!("unexpected: {other}"),
        }
    }
}

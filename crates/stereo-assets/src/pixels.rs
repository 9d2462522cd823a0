// SPDX-License-Identifier: CEPL-1.0
use std::path::Path;

use crate::AssetError;

/// Tightly packed RGBA8 pixels, row-major, top row first.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Pixels {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl Pixels {
    pub fn byte_len(&self) -> usize {
        self.data.len()
    }

    /// Length of the longer side; drives the mip chain length.
    pub fn max_dimension(&self) -> u32 {
        self.width.max(self.height)
    }
}

/// Decodes any supported image file into 4-channel 8-bit pixels.
pub fn load_rgba8(path: &Path) -> Result<Pixels, AssetError> {
    let img = image::open(path)
        .map_err(|source| AssetError::Image {
            path: path.to_path_buf(),
            source,
        })?
        .into_rgba8();
    let (width, height) = img.dimensions();
    tracing::debug!("decoded {} ({width}x{height})", path.display());
    Ok(Pixels {
        width,
        height,
        data: img.into_raw(),
    })
}

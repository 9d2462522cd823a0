// SPDX-License-Identifier: CEPL-1.0
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum AssetError {
    #[error("failed to decode image {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("failed to load mesh {path}: {source}")]
    Mesh {
        path: PathBuf,
        #[source]
        source: tobj::LoadError,
    },
    #[error("mesh {path} contains no geometry")]
    EmptyMesh { path: PathBuf },
    #[error("mesh {path} has {count} vertices, more than a u32 index can address")]
    TooManyVertices { path: PathBuf, count: usize },
}

// SPDX-License-Identifier: CEPL-1.0
//! CPU-side scene inputs: procedural and file meshes, decoded textures.
mod error;
pub mod geometry;
pub mod obj;
pub mod pixels;

pub use error::AssetError;
pub use geometry::{cylinder, CylinderParams, Mesh, MeshBuilder, Vertex};
pub use obj::load_obj;
pub use pixels::{load_rgba8, Pixels};

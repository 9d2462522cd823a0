// SPDX-License-Identifier: CEPL-1.0
use std::path::Path;

use crate::geometry::{Mesh, MeshBuilder, Vertex};
use crate::AssetError;

/// Loads every model in a Wavefront OBJ file into one de-duplicated mesh.
///
/// Texture `v` is flipped so image row 0 maps to the top of the surface.
pub fn load_obj(path: &Path) -> Result<Mesh, AssetError> {
    let options = tobj::LoadOptions {
        triangulate: true,
        single_index: true,
        ..Default::default()
    };
    let (models, _materials) =
        tobj::load_obj(path, &options).map_err(|source| AssetError::Mesh {
            path: path.to_path_buf(),
            source,
        })?;

    let mut builder = MeshBuilder::new();
    for model in &models {
        let mesh = &model.mesh;
        for &index in &mesh.indices {
            let i = index as usize;
            let position = [
                mesh.positions[3 * i],
                mesh.positions[3 * i + 1],
                mesh.positions[3 * i + 2],
            ];
            let tex_coord = if mesh.texcoords.len() >= 2 * i + 2 {
                [mesh.texcoords[2 * i], 1.0 - mesh.texcoords[2 * i + 1]]
            } else {
                [0.0, 0.0]
            };
            builder.push(Vertex::new(position, tex_coord));
        }
    }

    if builder.vertex_count() > u32::MAX as usize {
        return Err(AssetError::TooManyVertices {
            path: path.to_path_buf(),
            count: builder.vertex_count(),
        });
    }
    let mesh = builder.build();
    if mesh.is_empty() {
        return Err(AssetError::EmptyMesh {
            path: path.to_path_buf(),
        });
    }
    tracing::info!(
        "loaded {}: {} vertices, {} indices",
        path.display(),
        mesh.vertices.len(),
        mesh.indices.len()
    );
    Ok(mesh)
}

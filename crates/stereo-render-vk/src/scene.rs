// SPDX-License-Identifier: CEPL-1.0
//! Swapchain-independent scene data: geometry, eye textures and samplers.
use ash::vk;
use stereo_assets::{Mesh, Pixels};
use stereo_math::EyePair;
use tracing::info;

use crate::alloc::{upload_buffer, upload_texture, Texture};
use crate::commands::CommandPools;
use crate::error::Result;
use crate::gpu::{Gpu, GpuBuffer, SamplerDesc};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MeshBuffers {
    pub vertices: GpuBuffer,
    pub indices: GpuBuffer,
    pub index_count: u32,
}

impl MeshBuffers {
    pub fn upload<G: Gpu>(gpu: &mut G, pools: &CommandPools, mesh: &Mesh) -> Result<Self> {
        let vertices = upload_buffer(
            gpu,
            pools,
            vk::BufferUsageFlags::VERTEX_BUFFER,
            bytemuck::cast_slice(&mesh.vertices),
        )?;
        let indices = upload_buffer(
            gpu,
            pools,
            vk::BufferUsageFlags::INDEX_BUFFER,
            bytemuck::cast_slice(&mesh.indices),
        )?;
        Ok(MeshBuffers {
            vertices,
            indices,
            index_count: mesh.index_count(),
        })
    }

    pub fn destroy<G: Gpu>(self, gpu: &mut G) {
        gpu.destroy_buffer(self.indices);
        gpu.destroy_buffer(self.vertices);
    }
}

/// Everything the offscreen pass samples or draws that survives swapchain recreation.
#[derive(Clone, Copy, Debug)]
pub struct SceneResources {
    pub mesh: MeshBuffers,
    pub eye_textures: EyePair<Texture>,
    /// Reads the layered offscreen color target in the composite pass.
    pub offscreen_sampler: vk::Sampler,
}

impl SceneResources {
    pub fn create<G: Gpu>(
        gpu: &mut G,
        pools: &CommandPools,
        mesh: &Mesh,
        eye_images: &EyePair<Pixels>,
    ) -> Result<Self> {
        let mesh_buffers = MeshBuffers::upload(gpu, pools, mesh)?;
        info!(
            "vk: mesh uploaded ({} vertices, {} indices)",
            mesh.vertices.len(),
            mesh.indices.len()
        );
        let left = upload_texture(gpu, pools, eye_images.left())?;
        let right = upload_texture(gpu, pools, eye_images.right())?;
        let max_anisotropy = gpu.caps().max_anisotropy;
        let offscreen_sampler = gpu.create_sampler(&SamplerDesc {
            address_mode: vk::SamplerAddressMode::CLAMP_TO_BORDER,
            max_anisotropy,
            max_lod: 1.0,
        })?;
        Ok(SceneResources {
            mesh: mesh_buffers,
            eye_textures: EyePair::new(left, right),
            offscreen_sampler,
        })
    }

    pub fn destroy<G: Gpu>(self, gpu: &mut G) {
        gpu.destroy_sampler(self.offscreen_sampler);
        for texture in self.eye_textures {
            texture.destroy(gpu);
        }
        self.mesh.destroy(gpu);
    }
}

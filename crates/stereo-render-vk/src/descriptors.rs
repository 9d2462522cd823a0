// SPDX-License-Identifier: CEPL-1.0
//! Descriptor layouts, the pool, per-image uniform buffers and their sets.
use ash::vk;
use stereo_math::ProjectionData;
use tracing::debug;

use crate::error::Result;
use crate::gpu::{
    BufferDesc, DescriptorData, DescriptorWrite, Gpu, GpuBuffer, ImageBinding, LayoutBinding,
    PoolDesc, Sharing,
};
use crate::scene::SceneResources;

pub const PROJECTION_SIZE: vk::DeviceSize = std::mem::size_of::<ProjectionData>() as vk::DeviceSize;

/// Set 0: binding 0 uniforms, binding 1 the layered offscreen color target.
pub fn per_image_bindings() -> [LayoutBinding; 2] {
    [
        LayoutBinding {
            binding: 0,
            descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
            count: 1,
            stages: vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
        },
        LayoutBinding {
            binding: 1,
            descriptor_type: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            count: 1,
            stages: vk::ShaderStageFlags::FRAGMENT,
        },
    ]
}

/// Set 1 of the offscreen pipeline: one sampled texture per eye.
pub fn eye_texture_bindings() -> [LayoutBinding; 1] {
    [LayoutBinding {
        binding: 0,
        descriptor_type: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
        count: 2,
        stages: vk::ShaderStageFlags::FRAGMENT,
    }]
}

/// Room for every per-image set plus the eye texture set.
pub fn pool_desc(image_count: u32) -> PoolDesc {
    PoolDesc {
        max_sets: image_count + 1,
        sizes: vec![
            (vk::DescriptorType::UNIFORM_BUFFER, image_count),
            (vk::DescriptorType::COMBINED_IMAGE_SAMPLER, image_count),
            (vk::DescriptorType::COMBINED_IMAGE_SAMPLER, 2),
        ],
        free_individual: true,
    }
}

/// Swapchain-independent; lives from startup to shutdown.
#[derive(Clone, Copy, Debug)]
pub struct DescriptorLayouts {
    pub per_image: vk::DescriptorSetLayout,
    pub eye_textures: vk::DescriptorSetLayout,
}

impl DescriptorLayouts {
    pub fn create<G: Gpu>(gpu: &mut G) -> Result<Self> {
        Ok(DescriptorLayouts {
            per_image: gpu.create_descriptor_set_layout(&per_image_bindings())?,
            eye_textures: gpu.create_descriptor_set_layout(&eye_texture_bindings())?,
        })
    }

    pub fn destroy<G: Gpu>(self, gpu: &mut G) {
        gpu.destroy_descriptor_set_layout(self.eye_textures);
        gpu.destroy_descriptor_set_layout(self.per_image);
    }
}

#[derive(Clone, Debug, Default)]
pub struct Descriptors {
    pub pool: vk::DescriptorPool,
    /// Host-visible, one per swapchain image.
    pub uniforms: Vec<GpuBuffer>,
    pub per_image: Vec<vk::DescriptorSet>,
    pub eye_textures: vk::DescriptorSet,
}

impl Descriptors {
    pub fn create<G: Gpu>(
        gpu: &mut G,
        layouts: &DescriptorLayouts,
        image_count: usize,
        offscreen: ImageBinding,
        scene: &SceneResources,
    ) -> Result<Self> {
        // 1) Make UBOs
        let mut uniforms = Vec::with_capacity(image_count);
        for _ in 0..image_count {
            uniforms.push(gpu.create_buffer(&BufferDesc {
                size: PROJECTION_SIZE,
                usage: vk::BufferUsageFlags::UNIFORM_BUFFER,
                sharing: Sharing::Exclusive,
                memory: vk::MemoryPropertyFlags::HOST_VISIBLE
                    | vk::MemoryPropertyFlags::HOST_COHERENT,
            })?);
        }

        // 2) Pool
        let pool = gpu.create_descriptor_pool(&pool_desc(image_count as u32))?;

        // 3) Eye textures, written once
        let eye_textures = gpu.allocate_descriptor_sets(pool, &[layouts.eye_textures])?[0];
        let images = scene
            .eye_textures
            .iter()
            .map(|(_, t)| ImageBinding {
                view: t.view,
                sampler: t.sampler,
                layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            })
            .collect();
        gpu.update_descriptor_sets(&[DescriptorWrite {
            set: eye_textures,
            binding: 0,
            data: DescriptorData::CombinedImageSamplers(images),
        }]);

        // 4) Per-image sets
        let mut descriptors = Descriptors {
            pool,
            uniforms,
            per_image: Vec::new(),
            eye_textures,
        };
        descriptors.allocate_per_image(gpu, layouts, offscreen)?;
        Ok(descriptors)
    }

    fn allocate_per_image<G: Gpu>(
        &mut self,
        gpu: &mut G,
        layouts: &DescriptorLayouts,
        offscreen: ImageBinding,
    ) -> Result<()> {
        let layouts = vec![layouts.per_image; self.uniforms.len()];
        let sets = gpu.allocate_descriptor_sets(self.pool, &layouts)?;
        let writes: Vec<_> = sets
            .iter()
            .zip(&self.uniforms)
            .flat_map(|(&set, uniform)| {
                [
                    DescriptorWrite {
                        set,
                        binding: 0,
                        data: DescriptorData::UniformBuffer {
                            buffer: uniform.buffer,
                            range: PROJECTION_SIZE,
                        },
                    },
                    DescriptorWrite {
                        set,
                        binding: 1,
                        data: DescriptorData::CombinedImageSamplers(vec![offscreen]),
                    },
                ]
            })
            .collect();
        gpu.update_descriptor_sets(&writes);
        self.per_image = sets;
        Ok(())
    }

    /// Returns the per-image sets to the pool; they reference the old offscreen target.
    pub fn release_sets<G: Gpu>(&mut self, gpu: &mut G) -> Result<()> {
        let sets = std::mem::take(&mut self.per_image);
        if sets.is_empty() {
            return Ok(());
        }
        gpu.free_descriptor_sets(self.pool, &sets)
    }

    /// Points fresh per-image sets at the new offscreen target. The pool and the
    /// uniform buffers are rebuilt only if the swapchain image count changed.
    pub fn rebind<G: Gpu>(
        &mut self,
        gpu: &mut G,
        layouts: &DescriptorLayouts,
        image_count: usize,
        offscreen: ImageBinding,
        scene: &SceneResources,
    ) -> Result<()> {
        if image_count == self.uniforms.len() {
            return self.allocate_per_image(gpu, layouts, offscreen);
        }
        debug!(
            "vk: swapchain image count {} -> {image_count}, rebuilding descriptor pool",
            self.uniforms.len()
        );
        std::mem::take(self).destroy(gpu);
        *self = Descriptors::create(gpu, layouts, image_count, offscreen, scene)?;
        Ok(())
    }

    pub fn write_projection<G: Gpu>(
        &self,
        gpu: &mut G,
        image_index: usize,
        data: &ProjectionData,
    ) -> Result<()> {
        gpu.write_buffer(&self.uniforms[image_index], bytemuck::bytes_of(data))
    }

    pub fn destroy<G: Gpu>(self, gpu: &mut G) {
        // Destroying the pool frees every set allocated from it.
        gpu.destroy_descriptor_pool(self.pool);
        for uniform in self.uniforms {
            gpu.destroy_buffer(uniform);
        }
    }
}

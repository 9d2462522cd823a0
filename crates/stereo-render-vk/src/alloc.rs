// SPDX-License-Identifier: CEPL-1.0
//! Memory, layout transitions, staging uploads and sampled textures.
use ash::vk;
use stereo_assets::Pixels;
use tracing::{debug, warn};

use crate::commands::CommandPools;
use crate::error::{RenderError, Result};
use crate::gpu::{
    BufferDesc, DeviceCaps, Gpu, GpuBuffer, GpuCommand, GpuImage, ImageBarrier, ImageDesc,
    QueueKind, SamplerDesc, Sharing, ViewDesc,
};
use crate::negotiate::has_stencil;

pub const TEXTURE_FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;

pub fn find_memory_type(
    props: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    wanted: vk::MemoryPropertyFlags,
) -> Result<u32> {
    (0..props.memory_type_count)
        .find(|&i| {
            type_bits & (1 << i) != 0
                && props.memory_types[i as usize].property_flags.contains(wanted)
        })
        .ok_or_else(|| {
            RenderError::Capability(format!(
                "no memory type in mask {type_bits:#b} with {wanted:?}"
            ))
        })
}

/// Full chain down to 1x1, or a single level when linear blits are unavailable.
pub fn mip_level_count(width: u32, height: u32, linear_blit: bool) -> u32 {
    if !linear_blit {
        return 1;
    }
    let largest = width.max(height).max(1);
    u32::BITS - largest.leading_zeros()
}

/// Buffers and sampled images are touched by both the graphics and the transfer family.
pub fn upload_sharing(caps: &DeviceCaps) -> Sharing {
    Sharing::between(caps.families.graphics, caps.families.transfer)
}

pub fn aspect_for(format: vk::Format) -> vk::ImageAspectFlags {
    match format {
        vk::Format::D32_SFLOAT => vk::ImageAspectFlags::DEPTH,
        f if has_stencil(f) => vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL,
        _ => vk::ImageAspectFlags::COLOR,
    }
}

/// Access and stage masks for one supported whole-image transition, and the queue it runs on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Transition {
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
    pub src_stage: vk::PipelineStageFlags,
    pub dst_stage: vk::PipelineStageFlags,
    pub queue: QueueKind,
}

/// The closed set of layout transitions the renderer performs.
pub fn transition(old: vk::ImageLayout, new: vk::ImageLayout) -> Result<Transition> {
    use vk::AccessFlags as A;
    use vk::ImageLayout as L;
    use vk::PipelineStageFlags as S;
    let t = match (old, new) {
        (L::UNDEFINED, L::TRANSFER_DST_OPTIMAL) => Transition {
            src_access: A::empty(),
            dst_access: A::TRANSFER_WRITE,
            src_stage: S::TOP_OF_PIPE,
            dst_stage: S::TRANSFER,
            queue: QueueKind::Transfer,
        },
        (L::TRANSFER_DST_OPTIMAL, L::SHADER_READ_ONLY_OPTIMAL) => Transition {
            src_access: A::TRANSFER_WRITE,
            dst_access: A::SHADER_READ,
            src_stage: S::TRANSFER,
            dst_stage: S::FRAGMENT_SHADER,
            queue: QueueKind::Graphics,
        },
        (L::UNDEFINED, L::DEPTH_STENCIL_ATTACHMENT_OPTIMAL) => Transition {
            src_access: A::empty(),
            dst_access: A::DEPTH_STENCIL_ATTACHMENT_READ | A::DEPTH_STENCIL_ATTACHMENT_WRITE,
            src_stage: S::TOP_OF_PIPE,
            dst_stage: S::EARLY_FRAGMENT_TESTS,
            queue: QueueKind::Graphics,
        },
        (L::UNDEFINED, L::COLOR_ATTACHMENT_OPTIMAL) => Transition {
            src_access: A::empty(),
            dst_access: A::COLOR_ATTACHMENT_READ | A::COLOR_ATTACHMENT_WRITE,
            src_stage: S::TOP_OF_PIPE,
            dst_stage: S::COLOR_ATTACHMENT_OUTPUT,
            queue: QueueKind::Graphics,
        },
        _ => return Err(RenderError::UnsupportedTransition { old, new }),
    };
    Ok(t)
}

fn barrier(
    image: &GpuImage,
    base_mip: u32,
    mip_count: u32,
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
    t: Transition,
) -> ImageBarrier {
    ImageBarrier {
        image: image.image,
        aspect: aspect_for(image.format),
        base_mip,
        mip_count,
        layer_count: image.array_layers,
        old_layout,
        new_layout,
        src_access: t.src_access,
        dst_access: t.dst_access,
        src_stage: t.src_stage,
        dst_stage: t.dst_stage,
    }
}

/// Moves every mip and layer of `image` to `new`, blocking until the queue is done.
pub fn transition_image<G: Gpu>(
    gpu: &mut G,
    pools: &CommandPools,
    image: &GpuImage,
    old: vk::ImageLayout,
    new: vk::ImageLayout,
) -> Result<()> {
    let t = transition(old, new)?;
    let cmd = GpuCommand::Barrier(barrier(image, 0, image.mip_levels, old, new, t));
    gpu.one_shot(pools.for_queue(t.queue), t.queue, &[cmd])
}

fn staging_buffer<G: Gpu>(gpu: &mut G, bytes: &[u8]) -> Result<GpuBuffer> {
    let staging = gpu.create_buffer(&BufferDesc {
        size: bytes.len() as vk::DeviceSize,
        usage: vk::BufferUsageFlags::TRANSFER_SRC,
        sharing: Sharing::Exclusive,
        memory: vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
    })?;
    gpu.write_buffer(&staging, bytes)?;
    Ok(staging)
}

/// One-shot staging upload: host -> staging, then staging -> a new device-local buffer.
pub fn upload_buffer<G: Gpu>(
    gpu: &mut G,
    pools: &CommandPools,
    usage: vk::BufferUsageFlags,
    bytes: &[u8],
) -> Result<GpuBuffer> {
    // 1) staging buffer (HOST_VISIBLE|COHERENT)
    let staging = staging_buffer(gpu, bytes)?;

    // 2) device-local destination
    let sharing = upload_sharing(gpu.caps());
    let dst = gpu.create_buffer(&BufferDesc {
        size: staging.size,
        usage: usage | vk::BufferUsageFlags::TRANSFER_DST,
        sharing,
        memory: vk::MemoryPropertyFlags::DEVICE_LOCAL,
    })?;

    // 3) copy on the transfer queue and wait
    gpu.one_shot(
        pools.transfer,
        QueueKind::Transfer,
        &[GpuCommand::CopyBuffer {
            src: staging.buffer,
            dst: dst.buffer,
            size: staging.size,
        }],
    )?;

    // 4) staging is no longer referenced
    gpu.destroy_buffer(staging);
    Ok(dst)
}

/// Blit chain filling levels 1.. from level 0, leaving every level shader-readable.
/// Expects the whole image in `TRANSFER_DST_OPTIMAL`.
pub fn mip_chain(image: &GpuImage) -> Result<Vec<GpuCommand>> {
    use vk::AccessFlags as A;
    use vk::ImageLayout as L;
    use vk::PipelineStageFlags as S;

    let to_src = Transition {
        src_access: A::TRANSFER_WRITE,
        dst_access: A::TRANSFER_READ,
        src_stage: S::TRANSFER,
        dst_stage: S::TRANSFER,
        queue: QueueKind::Graphics,
    };
    let src_to_read = Transition {
        src_access: A::TRANSFER_READ,
        dst_access: A::SHADER_READ,
        src_stage: S::TRANSFER,
        dst_stage: S::FRAGMENT_SHADER,
        queue: QueueKind::Graphics,
    };
    let dst_to_read = transition(L::TRANSFER_DST_OPTIMAL, L::SHADER_READ_ONLY_OPTIMAL)?;

    let mut cmds = Vec::with_capacity(image.mip_levels as usize * 3 + 1);
    let mut extent = image.extent;
    for level in 1..image.mip_levels {
        let src = level - 1;
        cmds.push(GpuCommand::Barrier(barrier(
            image,
            src,
            1,
            L::TRANSFER_DST_OPTIMAL,
            L::TRANSFER_SRC_OPTIMAL,
            to_src,
        )));
        cmds.push(GpuCommand::BlitMip {
            image: image.image,
            src_level: src,
            src_extent: extent,
        });
        cmds.push(GpuCommand::Barrier(barrier(
            image,
            src,
            1,
            L::TRANSFER_SRC_OPTIMAL,
            L::SHADER_READ_ONLY_OPTIMAL,
            src_to_read,
        )));
        extent = vk::Extent2D {
            width: (extent.width / 2).max(1),
            height: (extent.height / 2).max(1),
        };
    }
    cmds.push(GpuCommand::Barrier(barrier(
        image,
        image.mip_levels.saturating_sub(1),
        1,
        L::TRANSFER_DST_OPTIMAL,
        L::SHADER_READ_ONLY_OPTIMAL,
        dst_to_read,
    )));
    Ok(cmds)
}

/// A sampled, mipmapped image.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Texture {
    pub image: GpuImage,
    pub view: vk::ImageView,
    pub sampler: vk::Sampler,
}

impl Texture {
    pub fn destroy<G: Gpu>(self, gpu: &mut G) {
        gpu.destroy_sampler(self.sampler);
        gpu.destroy_image_view(self.view);
        gpu.destroy_image(self.image);
    }
}

pub fn upload_texture<G: Gpu>(gpu: &mut G, pools: &CommandPools, pixels: &Pixels) -> Result<Texture> {
    let caps = gpu.caps().clone();
    let mip_levels = mip_level_count(pixels.width, pixels.height, caps.linear_blit);
    if !caps.linear_blit {
        warn!("vk: RGBA8 linear blits unsupported, textures get a single mip level");
    }
    debug!(
        "vk: uploading {}x{} texture with {mip_levels} mip level(s)",
        pixels.width, pixels.height
    );

    let staging = staging_buffer(gpu, &pixels.data)?;
    let image = gpu.create_image(&ImageDesc {
        extent: vk::Extent2D {
            width: pixels.width,
            height: pixels.height,
        },
        format: TEXTURE_FORMAT,
        mip_levels,
        array_layers: 1,
        samples: vk::SampleCountFlags::TYPE_1,
        usage: vk::ImageUsageFlags::TRANSFER_SRC
            | vk::ImageUsageFlags::TRANSFER_DST
            | vk::ImageUsageFlags::SAMPLED,
        sharing: upload_sharing(&caps),
        memory: vk::MemoryPropertyFlags::DEVICE_LOCAL,
    })?;

    transition_image(
        gpu,
        pools,
        &image,
        vk::ImageLayout::UNDEFINED,
        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
    )?;
    gpu.one_shot(
        pools.transfer,
        QueueKind::Transfer,
        &[GpuCommand::CopyBufferToImage {
            src: staging.buffer,
            dst: image.image,
            extent: image.extent,
        }],
    )?;
    // Blits need a graphics-capable queue.
    gpu.one_shot(pools.graphics, QueueKind::Graphics, &mip_chain(&image)?)?;
    gpu.destroy_buffer(staging);

    let view = gpu.create_image_view(&ViewDesc {
        image: image.image,
        view_type: vk::ImageViewType::TYPE_2D,
        format: TEXTURE_FORMAT,
        aspect: vk::ImageAspectFlags::COLOR,
        mip_levels,
        array_layers: 1,
    })?;
    let sampler = gpu.create_sampler(&SamplerDesc {
        address_mode: vk::SamplerAddressMode::REPEAT,
        max_anisotropy: caps.max_anisotropy,
        max_lod: mip_levels as f32,
    })?;
    Ok(Texture {
        image,
        view,
        sampler,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_props(flags: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut props = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: flags.len() as u32,
            ..Default::default()
        };
        for (i, f) in flags.iter().enumerate() {
            props.memory_types[i].property_flags = *f;
        }
        props
    }

    #[test]
    fn memory_type_respects_mask_and_flags() {
        use vk::MemoryPropertyFlags as M;
        let props = memory_props(&[
            M::DEVICE_LOCAL,
            M::HOST_VISIBLE,
            M::HOST_VISIBLE | M::HOST_COHERENT,
        ]);
        let host = M::HOST_VISIBLE | M::HOST_COHERENT;
        assert_eq!(find_memory_type(&props, 0b111, host).unwrap(), 2);
        assert_eq!(find_memory_type(&props, 0b111, M::HOST_VISIBLE).unwrap(), 1);
        assert_eq!(find_memory_type(&props, 0b101, M::HOST_VISIBLE).unwrap(), 2);
        assert_eq!(find_memory_type(&props, 0b001, M::DEVICE_LOCAL).unwrap(), 0);
    }

    #[test]
    fn missing_memory_type_is_a_capability_error() {
        use vk::MemoryPropertyFlags as M;
        let props = memory_props(&[M::DEVICE_LOCAL]);
        let err = find_memory_type(&props, 0b1, M::HOST_VISIBLE).unwrap_err();
        assert!(matches!(err, RenderError::Capability(_)));
        assert!(find_memory_type(&props, 0b10, M::DEVICE_LOCAL).is_err());
    }

    #[test]
    fn mip_levels_follow_the_longest_side() {
        assert_eq!(mip_level_count(1, 1, true), 1);
        assert_eq!(mip_level_count(2, 1, true), 2);
        assert_eq!(mip_level_count(1024, 1024, true), 11);
        assert_eq!(mip_level_count(1920, 1080, true), 11);
        assert_eq!(mip_level_count(3, 5, true), 3);
        assert_eq!(mip_level_count(4096, 2048, false), 1);
    }

    #[test]
    fn supported_transitions() {
        use vk::ImageLayout as L;
        let upload = transition(L::UNDEFINED, L::TRANSFER_DST_OPTIMAL).unwrap();
        assert_eq!(upload.queue, QueueKind::Transfer);
        assert_eq!(upload.dst_stage, vk::PipelineStageFlags::TRANSFER);

        let sample = transition(L::TRANSFER_DST_OPTIMAL, L::SHADER_READ_ONLY_OPTIMAL).unwrap();
        assert_eq!(sample.queue, QueueKind::Graphics);
        assert_eq!(sample.dst_access, vk::AccessFlags::SHADER_READ);

        let depth = transition(L::UNDEFINED, L::DEPTH_STENCIL_ATTACHMENT_OPTIMAL).unwrap();
        assert_eq!(depth.dst_stage, vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS);

        let color = transition(L::UNDEFINED, L::COLOR_ATTACHMENT_OPTIMAL).unwrap();
        assert_eq!(color.dst_stage, vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT);
    }

    #[test]
    fn other_transitions_are_rejected() {
        use vk::ImageLayout as L;
        for (old, new) in [
            (L::SHADER_READ_ONLY_OPTIMAL, L::TRANSFER_DST_OPTIMAL),
            (L::UNDEFINED, L::PRESENT_SRC_KHR),
            (L::COLOR_ATTACHMENT_OPTIMAL, L::UNDEFINED),
        ] {
            match transition(old, new) {
                Err(RenderError::UnsupportedTransition { old: o, new: n }) => {
                    assert_eq!((o, n), (old, new))
                }
                other => panic!("{old:?} -> {new:?} gave {other:?}"),
            }
        }
    }

    #[test]
    fn aspects_per_format() {
        assert_eq!(aspect_for(vk::Format::D32_SFLOAT), vk::ImageAspectFlags::DEPTH);
        assert_eq!(
            aspect_for(vk::Format::D32_SFLOAT_S8_UINT),
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        );
        assert_eq!(aspect_for(TEXTURE_FORMAT), vk::ImageAspectFlags::COLOR);
    }

    #[test]
    fn mip_chain_walks_every_level() {
        let image = GpuImage {
            image: vk::Handle::from_raw(7),
            format: TEXTURE_FORMAT,
            extent: vk::Extent2D {
                width: 8,
                height: 4,
            },
            mip_levels: mip_level_count(8, 4, true),
            array_layers: 1,
            ..Default::default()
        };
        let cmds = mip_chain(&image).unwrap();
        // three commands per generated level plus the final barrier
        assert_eq!(cmds.len(), 3 * 3 + 1);

        let blits: Vec<_> = cmds
            .iter()
            .filter_map(|c| match c {
                GpuCommand::BlitMip {
                    src_level,
                    src_extent,
                    ..
                } => Some((*src_level, src_extent.width, src_extent.height)),
                _ => None,
            })
            .collect();
        assert_eq!(blits, vec![(0, 8, 4), (1, 4, 2), (2, 2, 1)]);

        match cmds.last() {
            Some(GpuCommand::Barrier(b)) => {
                assert_eq!(b.base_mip, 3);
                assert_eq!(b.new_layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
            }
            other => panic!("unexpected tail {other:?}"),
        }
    }

    #[test]
    fn single_level_chain_is_one_barrier() {
        let image = GpuImage {
            format: TEXTURE_FORMAT,
            mip_levels: 1,
            array_layers: 1,
            ..Default::default()
        };
        let cmds = mip_chain(&image).unwrap();
        assert_eq!(cmds.len(), 1);
    }
}

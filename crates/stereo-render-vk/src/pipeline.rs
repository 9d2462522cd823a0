// SPDX-License-Identifier: CEPL-1.0
//! Render passes, shader loading and the graphics pipelines of both passes.
use std::fs;
use std::io::Cursor;
use std::path::Path;

use ash::util::read_spv;
use ash::vk;
use stereo_assets::Vertex;
use stereo_math::{Eye, EyeMask, EyePair};
use tracing::debug;

use crate::descriptors::DescriptorLayouts;
use crate::error::{RenderError, Result};
use crate::gpu::{
    AttachmentDesc, ClearValue, ExternalDependency, Gpu, PipelineDesc, RenderPassDesc,
    VertexAttribute, VertexInput,
};
use crate::commands::{CLEAR_COLOR, CLEAR_DEPTH};

pub const OFFSCREEN_VERTEX_SHADER: &str = "eye.vert.spv";
pub const OFFSCREEN_FRAGMENT_SHADER: &str = "eye.frag.spv";
pub const COMPOSITE_VERTEX_SHADER: &str = "frame.vert.spv";
pub const COMPOSITE_FRAGMENT_SHADER: &str = "frame.frag.spv";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShaderStages {
    pub vertex: Vec<u32>,
    pub fragment: Vec<u32>,
}

/// SPIR-V for both passes, loaded once and reused on every pipeline rebuild.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShaderSet {
    pub offscreen: ShaderStages,
    pub composite: ShaderStages,
}

impl ShaderSet {
    pub fn load(dir: &Path) -> Result<Self> {
        let set = ShaderSet {
            offscreen: ShaderStages {
                vertex: read_shader(&dir.join(OFFSCREEN_VERTEX_SHADER))?,
                fragment: read_shader(&dir.join(OFFSCREEN_FRAGMENT_SHADER))?,
            },
            composite: ShaderStages {
                vertex: read_shader(&dir.join(COMPOSITE_VERTEX_SHADER))?,
                fragment: read_shader(&dir.join(COMPOSITE_FRAGMENT_SHADER))?,
            },
        };
        debug!("vk: shaders loaded from {}", dir.display());
        Ok(set)
    }
}

pub fn read_shader(path: &Path) -> Result<Vec<u32>> {
    let bytes = fs::read(path).map_err(|e| RenderError::Asset {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    read_spv(&mut Cursor::new(&bytes[..])).map_err(|e| RenderError::Asset {
        path: path.to_path_buf(),
        reason: format!("not SPIR-V: {e}"),
    })
}

/// MSAA color + depth, resolved into the swapchain image. Without MSAA the
/// swapchain image is the color attachment itself.
pub fn composite_pass_desc(
    color_format: vk::Format,
    depth_format: vk::Format,
    samples: vk::SampleCountFlags,
) -> RenderPassDesc {
    let multisampled = samples != vk::SampleCountFlags::TYPE_1;
    let color = AttachmentDesc {
        format: color_format,
        samples,
        load_op: vk::AttachmentLoadOp::CLEAR,
        store_op: if multisampled {
            vk::AttachmentStoreOp::DONT_CARE
        } else {
            vk::AttachmentStoreOp::STORE
        },
        final_layout: if multisampled {
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
        } else {
            vk::ImageLayout::PRESENT_SRC_KHR
        },
    };
    let depth = AttachmentDesc {
        format: depth_format,
        samples,
        load_op: vk::AttachmentLoadOp::CLEAR,
        store_op: vk::AttachmentStoreOp::DONT_CARE,
        final_layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
    };
    let mut attachments = vec![color, depth];
    let resolve = multisampled.then(|| {
        attachments.push(AttachmentDesc {
            format: color_format,
            samples: vk::SampleCountFlags::TYPE_1,
            load_op: vk::AttachmentLoadOp::DONT_CARE,
            store_op: vk::AttachmentStoreOp::STORE,
            final_layout: vk::ImageLayout::PRESENT_SRC_KHR,
        });
        2
    });
    RenderPassDesc {
        attachments,
        color: 0,
        depth: Some(1),
        resolve,
        dependency: Some(ExternalDependency {
            src_stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            dst_stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            src_access: vk::AccessFlags::empty(),
            dst_access: vk::AccessFlags::COLOR_ATTACHMENT_READ
                | vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        }),
        views: None,
    }
}

/// Single-sample layered color + depth, both eyes per draw. Color ends shader-readable.
pub fn offscreen_pass_desc(color_format: vk::Format, depth_format: vk::Format) -> RenderPassDesc {
    RenderPassDesc {
        attachments: vec![
            AttachmentDesc {
                format: color_format,
                samples: vk::SampleCountFlags::TYPE_1,
                load_op: vk::AttachmentLoadOp::CLEAR,
                store_op: vk::AttachmentStoreOp::STORE,
                final_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            },
            AttachmentDesc {
                format: depth_format,
                samples: vk::SampleCountFlags::TYPE_1,
                load_op: vk::AttachmentLoadOp::CLEAR,
                store_op: vk::AttachmentStoreOp::DONT_CARE,
                final_layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            },
        ],
        color: 0,
        depth: Some(1),
        resolve: None,
        // The previous frame's composite may still be sampling the layers.
        dependency: Some(ExternalDependency {
            src_stage: vk::PipelineStageFlags::FRAGMENT_SHADER
                | vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            dst_stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
            src_access: vk::AccessFlags::empty(),
            dst_access: vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        }),
        views: Some(EyeMask::BOTH),
    }
}

#[derive(Clone, Copy, Debug)]
pub struct RenderPasses {
    pub composite: vk::RenderPass,
    pub offscreen: vk::RenderPass,
    pub multisampled: bool,
}

impl RenderPasses {
    pub fn create<G: Gpu>(gpu: &mut G, color_format: vk::Format) -> Result<Self> {
        let caps = gpu.caps();
        let (depth_format, samples) = (caps.depth_format, caps.samples);
        let composite =
            gpu.create_render_pass(&composite_pass_desc(color_format, depth_format, samples))?;
        let offscreen = gpu.create_render_pass(&offscreen_pass_desc(color_format, depth_format))?;
        Ok(RenderPasses {
            composite,
            offscreen,
            multisampled: samples != vk::SampleCountFlags::TYPE_1,
        })
    }

    /// One clear value per composite attachment.
    pub fn composite_clear(&self) -> Vec<ClearValue> {
        let mut clear = vec![ClearValue::Color(CLEAR_COLOR), CLEAR_DEPTH];
        if self.multisampled {
            clear.push(ClearValue::Color(CLEAR_COLOR));
        }
        clear
    }

    pub fn destroy<G: Gpu>(self, gpu: &mut G) {
        gpu.destroy_render_pass(self.offscreen);
        gpu.destroy_render_pass(self.composite);
    }
}

pub fn vertex_input() -> VertexInput {
    VertexInput {
        stride: Vertex::STRIDE,
        attributes: vec![
            VertexAttribute {
                location: 0,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: Vertex::POSITION_OFFSET,
            },
            VertexAttribute {
                location: 1,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: Vertex::COLOR_OFFSET,
            },
            VertexAttribute {
                location: 2,
                format: vk::Format::R32G32_SFLOAT,
                offset: Vertex::TEX_COORD_OFFSET,
            },
        ],
    }
}

pub fn offscreen_pipeline_desc(
    render_pass: vk::RenderPass,
    layout: vk::PipelineLayout,
    (vertex, fragment): (vk::ShaderModule, vk::ShaderModule),
    extent: vk::Extent2D,
) -> PipelineDesc {
    PipelineDesc {
        render_pass,
        layout,
        vertex,
        fragment,
        fragment_constant: None,
        vertex_input: Some(vertex_input()),
        topology: vk::PrimitiveTopology::TRIANGLE_LIST,
        cull_mode: vk::CullModeFlags::BACK,
        front_face: vk::FrontFace::COUNTER_CLOCKWISE,
        samples: vk::SampleCountFlags::TYPE_1,
        depth_compare: vk::CompareOp::LESS,
        static_extent: Some(extent),
    }
}

/// The eye's layer index is baked in as fragment specialization constant 0.
pub fn composite_pipeline_desc(
    eye: Eye,
    render_pass: vk::RenderPass,
    layout: vk::PipelineLayout,
    (vertex, fragment): (vk::ShaderModule, vk::ShaderModule),
    samples: vk::SampleCountFlags,
) -> PipelineDesc {
    PipelineDesc {
        render_pass,
        layout,
        vertex,
        fragment,
        fragment_constant: Some(eye.layer()),
        vertex_input: None,
        topology: vk::PrimitiveTopology::TRIANGLE_STRIP,
        cull_mode: vk::CullModeFlags::BACK,
        front_face: vk::FrontFace::CLOCKWISE,
        samples,
        depth_compare: vk::CompareOp::LESS,
        static_extent: None,
    }
}

/// Creates the stage modules, runs `build`, then destroys the modules whatever the outcome.
fn with_modules<G: Gpu, T>(
    gpu: &mut G,
    stages: &ShaderStages,
    build: impl FnOnce(&mut G, (vk::ShaderModule, vk::ShaderModule)) -> Result<T>,
) -> Result<T> {
    let vertex = gpu.create_shader_module(&stages.vertex)?;
    let fragment = match gpu.create_shader_module(&stages.fragment) {
        Ok(module) => module,
        Err(err) => {
            gpu.destroy_shader_module(vertex);
            return Err(err);
        }
    };
    let built = build(gpu, (vertex, fragment));
    gpu.destroy_shader_module(fragment);
    gpu.destroy_shader_module(vertex);
    built
}

#[derive(Clone, Copy, Debug)]
pub struct Pipelines {
    pub offscreen_layout: vk::PipelineLayout,
    pub offscreen: vk::Pipeline,
    pub composite_layout: vk::PipelineLayout,
    pub composite: EyePair<vk::Pipeline>,
}

impl Pipelines {
    pub fn create<G: Gpu>(
        gpu: &mut G,
        shaders: &ShaderSet,
        layouts: &DescriptorLayouts,
        passes: &RenderPasses,
        extent: vk::Extent2D,
    ) -> Result<Self> {
        // Offscreen: set 0 = per-image uniforms, set 1 = eye textures.
        let offscreen_layout =
            gpu.create_pipeline_layout(&[layouts.per_image, layouts.eye_textures])?;
        let offscreen = with_modules(gpu, &shaders.offscreen, |gpu, modules| {
            gpu.create_graphics_pipeline(&offscreen_pipeline_desc(
                passes.offscreen,
                offscreen_layout,
                modules,
                extent,
            ))
        })?;

        // Composite: only the per-image set (uniforms + offscreen layers).
        let composite_layout = gpu.create_pipeline_layout(&[layouts.per_image])?;
        let samples = gpu.caps().samples;
        let composite = with_modules(gpu, &shaders.composite, |gpu, modules| {
            let left = gpu.create_graphics_pipeline(&composite_pipeline_desc(
                Eye::Left,
                passes.composite,
                composite_layout,
                modules,
                samples,
            ))?;
            let right = gpu.create_graphics_pipeline(&composite_pipeline_desc(
                Eye::Right,
                passes.composite,
                composite_layout,
                modules,
                samples,
            ))?;
            Ok(EyePair::new(left, right))
        })?;

        Ok(Pipelines {
            offscreen_layout,
            offscreen,
            composite_layout,
            composite,
        })
    }

    pub fn destroy<G: Gpu>(self, gpu: &mut G) {
        for pipeline in self.composite {
            gpu.destroy_pipeline(pipeline);
        }
        gpu.destroy_pipeline(self.offscreen);
        gpu.destroy_pipeline_layout(self.composite_layout);
        gpu.destroy_pipeline_layout(self.offscreen_layout);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const COLOR: vk::Format = vk::Format::B8G8R8A8_UNORM;
    const DEPTH: vk::Format = vk::Format::D32_SFLOAT;

    #[test]
    fn composite_pass_resolves_into_the_swapchain() {
        let desc = composite_pass_desc(COLOR, DEPTH, vk::SampleCountFlags::TYPE_4);
        assert_eq!(desc.attachments.len(), 3);
        assert_eq!(desc.resolve, Some(2));
        assert_eq!(desc.attachments[0].samples, vk::SampleCountFlags::TYPE_4);
        assert_eq!(desc.attachments[1].samples, vk::SampleCountFlags::TYPE_4);
        assert_eq!(desc.attachments[2].samples, vk::SampleCountFlags::TYPE_1);
        assert_eq!(desc.attachments[2].final_layout, vk::ImageLayout::PRESENT_SRC_KHR);
        assert!(desc.views.is_none());
        let dep = desc.dependency.unwrap();
        assert_eq!(dep.dst_stage, vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT);
    }

    #[test]
    fn single_sample_composite_presents_directly() {
        let desc = composite_pass_desc(COLOR, DEPTH, vk::SampleCountFlags::TYPE_1);
        assert_eq!(desc.attachments.len(), 2);
        assert_eq!(desc.resolve, None);
        assert_eq!(desc.attachments[0].final_layout, vk::ImageLayout::PRESENT_SRC_KHR);
        assert_eq!(desc.attachments[0].store_op, vk::AttachmentStoreOp::STORE);
    }

    #[test]
    fn offscreen_pass_renders_both_views() {
        let desc = offscreen_pass_desc(COLOR, DEPTH);
        assert_eq!(desc.views, Some(EyeMask::BOTH));
        assert_eq!(desc.views.unwrap().view_count(), 2);
        assert!(desc
            .attachments
            .iter()
            .all(|a| a.samples == vk::SampleCountFlags::TYPE_1));
        assert_eq!(
            desc.attachments[0].final_layout,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
        );
        assert_eq!(desc.attachments[0].store_op, vk::AttachmentStoreOp::STORE);
    }

    #[test]
    fn offscreen_pass_waits_for_the_previous_composite() {
        let dep = offscreen_pass_desc(COLOR, DEPTH).dependency.unwrap();
        assert!(dep.src_stage.contains(vk::PipelineStageFlags::FRAGMENT_SHADER));
        assert!(dep.src_stage.contains(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT));
        assert_eq!(
            dep.dst_stage,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
        );
        assert_eq!(
            dep.dst_access,
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE
        );
    }

    #[test]
    fn composite_pipelines_differ_only_in_layer() {
        let modules = (vk::ShaderModule::null(), vk::ShaderModule::null());
        let left = composite_pipeline_desc(
            Eye::Left,
            vk::RenderPass::null(),
            vk::PipelineLayout::null(),
            modules,
            vk::SampleCountFlags::TYPE_4,
        );
        let right = composite_pipeline_desc(
            Eye::Right,
            vk::RenderPass::null(),
            vk::PipelineLayout::null(),
            modules,
            vk::SampleCountFlags::TYPE_4,
        );
        assert_eq!(left.fragment_constant, Some(0.0));
        assert_eq!(right.fragment_constant, Some(1.0));
        assert_eq!(left.topology, vk::PrimitiveTopology::TRIANGLE_STRIP);
        assert!(left.vertex_input.is_none());
        assert!(left.static_extent.is_none());
        assert_eq!(left.samples, vk::SampleCountFlags::TYPE_4);
    }

    #[test]
    fn offscreen_vertex_layout_matches_vertex() {
        let input = vertex_input();
        assert_eq!(input.stride, 32);
        let offsets: Vec<_> = input.attributes.iter().map(|a| a.offset).collect();
        assert_eq!(offsets, vec![0, 12, 24]);
        assert_eq!(input.attributes[2].format, vk::Format::R32G32_SFLOAT);
    }

    #[test]
    fn missing_shader_is_an_asset_error() {
        let err = ShaderSet::load(Path::new("no/such/shader/dir")).unwrap_err();
        match err {
            RenderError::Asset { path, .. } => {
                assert!(path.ends_with(OFFSCREEN_VERTEX_SHADER))
            }
            other => panic!("unexpected {other}"),
        }
    }

    #[test]
    fn truncated_spirv_is_rejected() {
        let dir = std::env::temp_dir().join(format!("stereo-vk-spv-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("broken.spv");
        std::fs::write(&path, [0x03, 0x02, 0x23]).unwrap();
        assert!(matches!(read_shader(&path), Err(RenderError::Asset { .. })));

        let words: [u32; 2] = [0x0723_0203, 0];
        let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
        std::fs::write(&path, bytes).unwrap();
        assert_eq!(read_shader(&path).unwrap(), words.to_vec());
        let _ = std::fs::remove_dir_all(&dir);
    }
}

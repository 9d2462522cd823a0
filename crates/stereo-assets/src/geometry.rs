// SPDX-License-Identifier: CEPL-1.0
use bytemuck::{Pod, Zeroable};
use std::collections::HashMap;

pub const WHITE: [f32; 3] = [1.0, 1.0, 1.0];

/// Vertex layout shared with the offscreen vertex shader (locations 0, 1, 2).
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub color: [f32; 3],
    pub tex_coord: [f32; 2],
}

impl Vertex {
    pub const fn new(position: [f32; 3], tex_coord: [f32; 2]) -> Self {
        Vertex {
            position,
            color: WHITE,
            tex_coord,
        }
    }

    pub const POSITION_OFFSET: u32 = 0;
    pub const COLOR_OFFSET: u32 = 12;
    pub const TEX_COORD_OFFSET: u32 = 24;
    pub const STRIDE: u32 = std::mem::size_of::<Vertex>() as u32;

    /// Exact bit pattern of every component; two vertices share a key iff they are identical.
    fn key(&self) -> [u32; 8] {
        let [px, py, pz] = self.position;
        let [r, g, b] = self.color;
        let [u, v] = self.tex_coord;
        [px, py, pz, r, g, b, u, v].map(f32::to_bits)
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Mesh {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
}

impl Mesh {
    pub fn index_count(&self) -> u32 {
        self.indices.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

/// Builds an indexed mesh, storing each distinct vertex once.
#[derive(Debug, Default)]
pub struct MeshBuilder {
    mesh: Mesh,
    lookup: HashMap<[u32; 8], u32>,
}

impl MeshBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one index, reusing a stored vertex when an identical one exists.
    pub fn push(&mut self, vertex: Vertex) -> u32 {
        let next = self.mesh.vertices.len() as u32;
        let index = *self.lookup.entry(vertex.key()).or_insert_with(|| {
            self.mesh.vertices.push(vertex);
            next
        });
        self.mesh.indices.push(index);
        index
    }

    pub fn triangle(&mut self, a: Vertex, b: Vertex, c: Vertex) {
        self.push(a);
        self.push(b);
        self.push(c);
    }

    pub fn vertex_count(&self) -> usize {
        self.mesh.vertices.len()
    }

    pub fn build(self) -> Mesh {
        self.mesh
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CylinderParams {
    pub height: f32,
    pub radius: f32,
    /// Swept angle in degrees, centred on +X.
    pub angle_degrees: f32,
    pub slices: u32,
}

impl Default for CylinderParams {
    fn default() -> Self {
        CylinderParams {
            height: 600.0,
            radius: 300.0,
            angle_degrees: 180.0,
            slices: 45,
        }
    }
}

/// Open cylinder segment with capped ends; `u` runs along the sweep, `v` bottom to top.
pub fn cylinder(params: &CylinderParams) -> Mesh {
    let CylinderParams {
        height,
        radius,
        angle_degrees,
        slices,
    } = *params;
    let half = height * 0.5;
    let sweep = angle_degrees.to_radians();
    let start = -sweep * 0.5;

    let rim = |i: u32, z: f32, v: f32| {
        let ratio = i as f32 / slices as f32;
        let theta = start + sweep * ratio;
        Vertex::new([radius * theta.cos(), radius * theta.sin(), z], [ratio, v])
    };

    let top_centre = Vertex::new([0.0, 0.0, half], [0.0, 1.0]);
    let bottom_centre = Vertex::new([0.0, 0.0, -half], [0.0, 0.0]);

    let mut builder = MeshBuilder::new();
    for i in 0..slices {
        let top = rim(i, half, 1.0);
        let bottom = rim(i, -half, 0.0);
        let next_top = rim(i + 1, half, 1.0);
        let next_bottom = rim(i + 1, -half, 0.0);

        // Counter-clockwise seen from inside the sweep.
        builder.triangle(next_top, bottom, top);
        builder.triangle(next_top, next_bottom, bottom);
        builder.triangle(top_centre, next_top, top);
        builder.triangle(bottom_centre, bottom, next_bottom);
    }
    builder.build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use stereo_math::glam::{Vec2, Vec3};
    use stereo_math::rig::eye_aspect;
    use stereo_math::{model_transform, Eye, StereoRig};

    #[test]
    fn vertex_layout_matches_shader_offsets() {
        assert_eq!(Vertex::STRIDE, 32);
        assert_eq!(std::mem::offset_of!(Vertex, color) as u32, Vertex::COLOR_OFFSET);
        assert_eq!(std::mem::offset_of!(Vertex, tex_coord) as u32, Vertex::TEX_COORD_OFFSET);
    }

    #[test]
    fn identical_vertex_is_stored_once() {
        let mut builder = MeshBuilder::new();
        let v = Vertex::new([1.0, 2.0, 3.0], [0.25, 0.75]);
        let a = builder.push(v);
        let b = builder.push(v);
        let mesh = builder.build();
        assert_eq!(mesh.vertices.len(), 1);
        assert_eq!(mesh.indices, vec![a, b]);
        assert_eq!(a, b);
    }

    #[test]
    fn any_differing_component_makes_a_new_vertex() {
        let mut builder = MeshBuilder::new();
        let base = Vertex::new([1.0, 2.0, 3.0], [0.25, 0.75]);
        builder.push(base);
        builder.push(Vertex { tex_coord: [0.25, 0.5], ..base });
        builder.push(Vertex { color: [1.0, 0.0, 0.0], ..base });
        builder.push(Vertex { position: [1.0, 2.0, 3.5], ..base });
        assert_eq!(builder.vertex_count(), 4);
    }

    #[test]
    fn signed_zero_is_not_merged() {
        let mut builder = MeshBuilder::new();
        builder.push(Vertex::new([0.0, 0.0, 0.0], [0.0, 0.0]));
        builder.push(Vertex::new([-0.0, 0.0, 0.0], [0.0, 0.0]));
        assert_eq!(builder.vertex_count(), 2);
    }

    #[test]
    fn cylinder_counts() {
        let params = CylinderParams::default();
        let mesh = cylinder(&params);
        let slices = params.slices as usize;
        // four triangles per slice
        assert_eq!(mesh.indices.len(), slices * 12);
        // two cap centres plus a top and bottom rim vertex per edge
        assert_eq!(mesh.vertices.len(), 2 + 2 * (slices + 1));
        assert!(mesh.indices.iter().all(|&i| (i as usize) < mesh.vertices.len()));
    }

    #[test]
    fn cylinder_spans_height_and_radius() {
        let params = CylinderParams::default();
        let mesh = cylinder(&params);
        for v in &mesh.vertices {
            let [x, y, z] = v.position;
            assert!((z.abs() - params.height * 0.5).abs() < 1e-3);
            let r = (x * x + y * y).sqrt();
            assert!(r < 1e-3 || (r - params.radius).abs() < 1e-2);
            assert!((0.0..=1.0).contains(&v.tex_coord[0]));
            assert_eq!(v.color, WHITE);
        }
    }

    #[test]
    fn cylinder_first_slice_order() {
        let mesh = cylinder(&CylinderParams::default());
        // slice 0 side triangle: rim 1 top, rim 0 bottom, rim 0 top are new vertices 0, 1, 2
        assert_eq!(&mesh.indices[..3], &[0, 1, 2]);
        // second side triangle starts at rim 1 top and ends at rim 0 bottom
        assert_eq!(mesh.indices[3], 0);
        assert_eq!(mesh.indices[5], 1);
        assert_eq!(mesh.vertices[2].tex_coord, [0.0, 1.0]);
        assert!((mesh.vertices[2].position[1] + 300.0).abs() < 1e-2);
    }

    #[test]
    fn visible_inner_wall_faces_the_camera() {
        let rig = StereoRig::default();
        let mesh = cylinder(&CylinderParams::default());
        let aspect = eye_aspect(1280, 720);

        for eye in Eye::ALL {
            let clip_from_model = rig.projection(aspect) * rig.view(eye) * model_transform();
            let to_ndc = |index: u32| {
                let p = clip_from_model * Vec3::from(mesh.vertices[index as usize].position).extend(1.0);
                (p.w > 0.0).then(|| Vec2::new(p.x / p.w, p.y / p.w))
            };

            let mut visible = 0;
            // side triangles are the first two of every four
            for slice in mesh.indices.chunks_exact(12) {
                for tri in slice[..6].chunks_exact(3) {
                    let Some(corners) = tri.iter().map(|&i| to_ndc(i)).collect::<Option<Vec<_>>>() else {
                        continue;
                    };
                    let centroid = (corners[0] + corners[1] + corners[2]) / 3.0;
                    if centroid.abs().max_element() > 1.0 {
                        continue;
                    }
                    // Vulkan's signed area in framebuffer space; positive is counter-clockwise.
                    let area = -0.5
                        * (0..3)
                            .map(|k| {
                                let (a, b) = (corners[k], corners[(k + 1) % 3]);
                                a.x * b.y - b.x * a.y
                            })
                            .sum::<f32>();
                    assert!(area > 0.0, "{eye:?}: side triangle {tri:?} is back-facing");
                    visible += 1;
                }
            }
            assert!(visible > 60, "{eye:?}: only {visible} side triangles on screen");
        }
    }
}

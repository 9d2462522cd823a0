// SPDX-License-Identifier: CEPL-1.0
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};

use crate::eye::{Eye, EyePair};

pub const CAMERA_POSITION: Vec3 = Vec3::new(1.0, 400.0, 1.0);
pub const CAMERA_TARGET: Vec3 = Vec3::ZERO;
pub const CAMERA_UP: Vec3 = Vec3::Z;
pub const EYE_SEPARATION: f32 = 0.064;
pub const NEAR_CLIP: f32 = 0.1;
pub const FAR_CLIP: f32 = 10_000.0;
pub const FOV_Y_DEGREES: f32 = 80.0;

/// Fixed camera with two horizontally offset eyes.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StereoRig {
    pub position: Vec3,
    pub target: Vec3,
    pub up: Vec3,
    pub eye_separation: f32,
    /// Vertical field of view in radians.
    pub fov_y: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for StereoRig {
    fn default() -> Self {
        StereoRig {
            position: CAMERA_POSITION,
            target: CAMERA_TARGET,
            up: CAMERA_UP,
            eye_separation: EYE_SEPARATION,
            fov_y: FOV_Y_DEGREES.to_radians(),
            near: NEAR_CLIP,
            far: FAR_CLIP,
        }
    }
}

impl StereoRig {
    /// Unit vector pointing from the left eye to the right eye.
    pub fn right(&self) -> Vec3 {
        self.up.cross(self.target - self.position).normalize_or_zero()
    }

    pub fn eye_offset(&self, eye: Eye) -> Vec3 {
        self.right() * (eye.sign() * self.eye_separation * 0.5)
    }

    pub fn eye_position(&self, eye: Eye) -> Vec3 {
        self.position + self.eye_offset(eye)
    }

    /// Parallel look-at: the target shifts with the eye so the axes stay parallel.
    pub fn view(&self, eye: Eye) -> Mat4 {
        let offset = self.eye_offset(eye);
        Mat4::look_at_rh(self.position + offset, self.target + offset, self.up)
    }

    /// Right-handed perspective with a 0..1 depth range, before the Y flip.
    pub fn unflipped_projection(&self, aspect: f32) -> Mat4 {
        Mat4::perspective_rh(self.fov_y, aspect, self.near, self.far)
    }

    /// Projection with clip-space Y pointing down.
    pub fn projection(&self, aspect: f32) -> Mat4 {
        let mut proj = self.unflipped_projection(aspect);
        proj.y_axis.y *= -1.0;
        proj
    }
}

/// Rotation applied to the mesh: 270 degrees about Z, then 180 about X.
pub fn model_transform() -> Mat4 {
    Mat4::from_rotation_z(270.0_f32.to_radians()) * Mat4::from_rotation_x(180.0_f32.to_radians())
}

/// Per-eye aspect ratio: each eye gets half of the window width.
pub fn eye_aspect(width: u32, height: u32) -> f32 {
    if height == 0 {
        return 1.0;
    }
    (width as f32 * 0.5) / height as f32
}

/// Uniform block consumed by both passes (std140 layout).
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct ProjectionData {
    pub model: [[f32; 4]; 4],
    pub view: [[[f32; 4]; 4]; 2],
    pub proj: [[[f32; 4]; 4]; 2],
    pub distortion: f32,
    pub time: f32,
    pub _pad: [f32; 2],
}

impl ProjectionData {
    pub fn compute(rig: &StereoRig, width: u32, height: u32, distortion: f32, time: f32) -> Self {
        let aspect = eye_aspect(width, height);
        let views = EyePair::from_fn(|eye| rig.view(eye).to_cols_array_2d());
        let projs = EyePair::from_fn(|_| rig.projection(aspect).to_cols_array_2d());
        ProjectionData {
            model: model_transform().to_cols_array_2d(),
            view: views.into_array(),
            proj: projs.into_array(),
            distortion,
            time,
            _pad: [0.0; 2],
        }
    }

    pub fn view(&self, eye: Eye) -> Mat4 {
        Mat4::from_cols_array_2d(&self.view[eye.index()])
    }

    pub fn proj(&self, eye: Eye) -> Mat4 {
        Mat4::from_cols_array_2d(&self.proj[eye.index()])
    }

    pub fn model(&self) -> Mat4 {
        Mat4::from_cols_array_2d(&self.model)
    }
}

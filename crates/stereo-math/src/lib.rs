// SPDX-License-Identifier: CEPL-1.0
//! Stereo camera math shared by the renderer and the app.
pub mod distortion;
pub mod eye;
pub mod rig;

pub use distortion::{Distortion, DistortionAdjust, DEFAULT_DISTORTION, DISTORTION_STEP};
pub use eye::{Eye, EyeMask, EyePair, EYE_COUNT};
pub use rig::{model_transform, ProjectionData, StereoRig};

pub use glam;

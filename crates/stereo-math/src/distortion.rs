// SPDX-License-Identifier: CEPL-1.0
use std::ops::RangeInclusive;

pub const DEFAULT_DISTORTION: f32 = 0.5;
pub const DISTORTION_STEP: f32 = 0.1;
pub const DISTORTION_RANGE: RangeInclusive<f32> = -1.0..=1.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DistortionAdjust {
    Increase,
    Decrease,
    Toggle,
}

/// Barrel/pincushion coefficient fed to the composite shader.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Distortion {
    value: f32,
    default: f32,
}

impl Default for Distortion {
    fn default() -> Self {
        Distortion::new(DEFAULT_DISTORTION)
    }
}

fn clamp(v: f32) -> f32 {
    v.clamp(*DISTORTION_RANGE.start(), *DISTORTION_RANGE.end())
}

impl Distortion {
    pub fn new(default: f32) -> Self {
        let default = clamp(default);
        Distortion {
            value: default,
            default,
        }
    }

    pub fn value(&self) -> f32 {
        self.value
    }

    pub fn default_value(&self) -> f32 {
        self.default
    }

    pub fn increase(&mut self) {
        self.value = clamp(self.value + DISTORTION_STEP);
    }

    pub fn decrease(&mut self) {
        self.value = clamp(self.value - DISTORTION_STEP);
    }

    /// Switches between off (exactly 0.0) and the configured default.
    pub fn toggle(&mut self) {
        self.value = if self.value == 0.0 { self.default } else { 0.0 };
    }

    pub fn apply(&mut self, adjust: DistortionAdjust) -> f32 {
        match adjust {
            DistortionAdjust::Increase => self.increase(),
            DistortionAdjust::Decrease => self.decrease(),
            DistortionAdjust::Toggle => self.toggle(),
        }
        self.value
    }
}

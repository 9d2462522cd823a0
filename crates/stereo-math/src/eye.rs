// SPDX-License-Identifier: CEPL-1.0
use bitflags::bitflags;
use std::ops::{Index, IndexMut};

/// Number of views rendered by the multiview pass.
pub const EYE_COUNT: usize = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Eye {
    Left,
    Right,
}

impl Eye {
    pub const ALL: [Eye; EYE_COUNT] = [Eye::Left, Eye::Right];

    #[inline]
    pub const fn index(self) -> usize {
        match self {
            Eye::Left => 0,
            Eye::Right => 1,
        }
    }

    /// Array layer in the offscreen target, as the composite shader expects it.
    #[inline]
    pub const fn layer(self) -> f32 {
        self.index() as f32
    }

    /// -1 for the left eye, +1 for the right one.
    #[inline]
    pub const fn sign(self) -> f32 {
        match self {
            Eye::Left => -1.0,
            Eye::Right => 1.0,
        }
    }

    #[inline]
    pub const fn mask(self) -> EyeMask {
        match self {
            Eye::Left => EyeMask::LEFT,
            Eye::Right => EyeMask::RIGHT,
        }
    }
}

bitflags! {
    /// One bit per view; used for the multiview view and correlation masks.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct EyeMask: u32 {
        const LEFT = 1 << 0;
        const RIGHT = 1 << 1;
    }
}

impl EyeMask {
    pub const BOTH: EyeMask = EyeMask::LEFT.union(EyeMask::RIGHT);

    /// Number of views (and array layers) the mask covers.
    #[inline]
    pub const fn view_count(self) -> u32 {
        self.bits().count_ones()
    }
}

/// Fixed-size per-eye storage.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct EyePair<T>([T; EYE_COUNT]);

impl<T> EyePair<T> {
    pub const fn new(left: T, right: T) -> Self {
        EyePair([left, right])
    }

    pub fn from_fn(mut f: impl FnMut(Eye) -> T) -> Self {
        EyePair(std::array::from_fn(|i| f(Eye::ALL[i])))
    }

    pub fn map<U>(self, mut f: impl FnMut(Eye, T) -> U) -> EyePair<U> {
        let [left, right] = self.0;
        EyePair([f(Eye::Left, left), f(Eye::Right, right)])
    }

    pub fn try_map<U, E>(self, mut f: impl FnMut(Eye, T) -> Result<U, E>) -> Result<EyePair<U>, E> {
        let [left, right] = self.0;
        Ok(EyePair([f(Eye::Left, left)?, f(Eye::Right, right)?]))
    }

    pub fn iter(&self) -> impl Iterator<Item = (Eye, &T)> {
        Eye::ALL.into_iter().zip(self.0.iter())
    }

    pub fn as_array(&self) -> &[T; EYE_COUNT] {
        &self.0
    }

    pub fn into_array(self) -> [T; EYE_COUNT] {
        self.0
    }

    pub fn left(&self) -> &T {
        &self.0[0]
    }

    pub fn right(&self) -> &T {
        &self.0[1]
    }
}

impl<T> Index<Eye> for EyePair<T> {
    type Output = T;

    fn index(&self, eye: Eye) -> &T {
        &self.0[eye.index()]
    }
}

impl<T> IndexMut<Eye> for EyePair<T> {
    fn index_mut(&mut self, eye: Eye) -> &mut T {
        &mut self.0[eye.index()]
    }
}

impl<T> IntoIterator for EyePair<T> {
    type Item = T;
    type IntoIter = std::array::IntoIter<T, EYE_COUNT>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

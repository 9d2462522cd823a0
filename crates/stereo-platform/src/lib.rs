// SPDX-License-Identifier: CEPL-1.0
//! Window-system glue: winit re-export and the event queue the main loop drains.
use std::collections::VecDeque;

pub use winit;

use stereo_math::DistortionAdjust;
use winit::event::{ElementState, WindowEvent};
use winit::keyboard::{KeyCode, PhysicalKey};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    Distortion(DistortionAdjust),
    Quit,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AppEvent {
    /// New framebuffer size in physical pixels; may be 0x0 when minimised.
    Resized { width: u32, height: u32 },
    Action(Action),
    CloseRequested,
}

/// Keys act on release, so holding a key applies it once.
pub fn action_for(key: PhysicalKey, state: ElementState) -> Option<Action> {
    if state != ElementState::Released {
        return None;
    }
    let PhysicalKey::Code(code) = key else {
        return None;
    };
    match code {
        KeyCode::KeyW => Some(Action::Distortion(DistortionAdjust::Increase)),
        KeyCode::KeyS => Some(Action::Distortion(DistortionAdjust::Decrease)),
        KeyCode::KeyT => Some(Action::Distortion(DistortionAdjust::Toggle)),
        KeyCode::Escape => Some(Action::Quit),
        _ => None,
    }
}

/// Window callbacks only enqueue; the loop applies events between frames.
#[derive(Debug, Default)]
pub struct EventQueue {
    events: VecDeque<AppEvent>,
    close_requested: bool,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: AppEvent) {
        match event {
            AppEvent::CloseRequested | AppEvent::Action(Action::Quit) => {
                self.close_requested = true;
            }
            _ => {}
        }
        self.events.push_back(event);
    }

    /// Translates the window events the app cares about; returns false for ignored ones.
    pub fn push_window_event(&mut self, event: &WindowEvent) -> bool {
        let translated = match event {
            WindowEvent::CloseRequested => Some(AppEvent::CloseRequested),
            WindowEvent::Resized(size) => Some(AppEvent::Resized {
                width: size.width,
                height: size.height,
            }),
            WindowEvent::KeyboardInput { event, .. } if !event.repeat => {
                action_for(event.physical_key, event.state).map(AppEvent::Action)
            }
            _ => None,
        };
        match translated {
            Some(ev) => {
                tracing::trace!("queued {ev:?}");
                self.push(ev);
                true
            }
            None => false,
        }
    }

    pub fn drain(&mut self) -> std::collections::vec_deque::Drain<'_, AppEvent> {
        self.events.drain(..)
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// "Keep running?" query for the main loop.
    pub fn should_close(&self) -> bool {
        self.close_requested
    }
}

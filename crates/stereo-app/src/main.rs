// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use stereo_core::{init_tracing, report_fatal};
use stereo_math::Distortion;
use stereo_platform::winit::{
    application::ApplicationHandler,
    dpi::LogicalSize,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    window::{Window, WindowId},
};
use stereo_platform::{Action, AppEvent, EventQueue};
use stereo_render::{FrameStatus, RenderSettings, RenderSize, Renderer};
use stereo_render_vk::{VkRenderer, BUILT_SHADER_DIR};
use tracing::{debug, info};

const WINDOW_TITLE: &str = "Stereo Viewer";
const WINDOW_WIDTH: u32 = 1280;
const WINDOW_HEIGHT: u32 = 720;

#[derive(Parser, Debug)]
#[command(author, version, about = "Side-by-side stereo viewer", long_about = None)]
struct Args {
    /// Root directory holding shaders/, textures/ and models/
    #[arg(long, default_value = ".")]
    assets: PathBuf,
    /// Directory with the compiled .spv shaders
    #[arg(long)]
    shaders: Option<PathBuf>,
    /// Wavefront OBJ to draw instead of the procedural cylinder
    #[arg(long)]
    model: Option<PathBuf>,
    /// Enable the Khronos validation layer in release builds too
    #[arg(long)]
    validation: bool,
}

impl Args {
    fn settings(&self) -> RenderSettings {
        let mut settings = RenderSettings::from_asset_root(&self.assets);
        if let Some(dir) = self.shaders.clone().or_else(|| BUILT_SHADER_DIR.map(PathBuf::from)) {
            settings.shader_dir = dir;
        }
        settings.model = self.model.clone();
        settings.validation |= self.validation;
        settings
    }
}

// Field order matters: the renderer must drop before the window it draws into.
struct App {
    settings: RenderSettings,
    renderer: Option<VkRenderer>,
    window: Option<Window>,
    events: EventQueue,
    distortion: Distortion,
    size: RenderSize,
    frames: u64,
    fatal: Option<anyhow::Error>,
}

impl App {
    fn new(settings: RenderSettings) -> Self {
        App {
            settings,
            renderer: None,
            window: None,
            events: EventQueue::new(),
            distortion: Distortion::default(),
            size: RenderSize::new(WINDOW_WIDTH, WINDOW_HEIGHT),
            frames: 0,
            fatal: None,
        }
    }

    fn open(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let attributes = Window::default_attributes()
            .with_title(WINDOW_TITLE)
            .with_inner_size(LogicalSize::new(WINDOW_WIDTH, WINDOW_HEIGHT))
            .with_resizable(true);
        let window = event_loop
            .create_window(attributes)
            .context("creating the window")?;
        let inner = window.inner_size();
        self.size = RenderSize::new(inner.width, inner.height);

        let mut renderer = VkRenderer::new(&window, &window, self.size, &self.settings)?;
        renderer.set_distortion(self.distortion.value());
        info!(
            "window {}x{}, distortion {:.1}",
            self.size.width,
            self.size.height,
            self.distortion.value()
        );
        self.renderer = Some(renderer);
        self.window = Some(window);
        Ok(())
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, err: anyhow::Error) {
        self.fatal = Some(err);
        self.shutdown(event_loop);
    }

    fn shutdown(&mut self, event_loop: &ActiveEventLoop) {
        // STRICT TEARDOWN ORDER: renderer (waits for the device) -> window
        self.renderer = None;
        self.window = None;
        event_loop.exit();
    }

    fn apply_events(&mut self) {
        for event in self.events.drain() {
            match event {
                AppEvent::Resized { width, height } => {
                    self.size = RenderSize::new(width, height);
                    if let Some(renderer) = &mut self.renderer {
                        renderer.resize(self.size);
                    }
                }
                AppEvent::Action(Action::Distortion(adjust)) => {
                    let value = self.distortion.apply(adjust);
                    info!("distortion {adjust:?} -> {value:.1}");
                    if let Some(renderer) = &mut self.renderer {
                        renderer.set_distortion(value);
                    }
                }
                // Handled through should_close.
                AppEvent::Action(Action::Quit) | AppEvent::CloseRequested => {}
            }
        }
    }

    fn draw(&mut self) -> Result<()> {
        let Some(renderer) = &mut self.renderer else {
            return Ok(());
        };
        match renderer.render().context("rendering a frame")? {
            FrameStatus::Presented => self.frames += 1,
            FrameStatus::Recreated => debug!("swapchain rebuilt before frame {}", self.frames),
            FrameStatus::Skipped => {}
        }
        Ok(())
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        if let Err(err) = self.open(event_loop) {
            self.fail(event_loop, err);
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, window_id: WindowId, event: WindowEvent) {
        if self.window.as_ref().map(Window::id) != Some(window_id) {
            return;
        }
        if let WindowEvent::RedrawRequested = event {
            if let Err(err) = self.draw() {
                self.fail(event_loop, err);
            }
            return;
        }
        self.events.push_window_event(&event);
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.renderer.is_none() {
            return;
        }
        self.apply_events();
        if self.events.should_close() {
            info!("closing after {} presented frames", self.frames);
            self.shutdown(event_loop);
            return;
        }

        // Minimised: sleep until the next event instead of spinning.
        if self.size.is_zero_area() {
            event_loop.set_control_flow(ControlFlow::Wait);
            return;
        }
        event_loop.set_control_flow(ControlFlow::Poll);
        if let Some(window) = &self.window {
            window.request_redraw();
        }
    }
}

fn run(args: Args) -> Result<()> {
    let event_loop = EventLoop::new().context("creating the event loop")?;
    let mut app = App::new(args.settings());
    event_loop.run_app(&mut app)?;
    match app.fatal.take() {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

fn main() -> ExitCode {
    init_tracing();
    let args = Args::parse();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => report_fatal(&err),
    }
}

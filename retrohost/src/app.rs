use std::path::PathBuf;
use std::rc::Rc;
use std::time::Instant;

use anyhow::Context;
use retrohost_core::audio::{AudioSink, NullAudio};
use retrohost_core::autosave::{AutosaveTimer, autosave_path, state_path};
use retrohost_core::config::{Config, Profile};
use retrohost_core::hacks::MouseHackProfile;
use retrohost_core::video::GraphicsContext;
use retrohost_core::CoreRuntime;
use winit::application::ApplicationHandler;
use winit::dpi::LogicalSize;
use winit::event::{DeviceEvent, DeviceId, ElementState, KeyEvent, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::{CursorGrabMode, Fullscreen, Window, WindowId};

use crate::audio::CpalSink;
use crate::display::GlutinSurface;
use crate::keymap::joypad_button;
use crate::pacing::FramePacer;

pub struct App {
    profile: Rc<Profile>,
    session: Option<Session>,
    error: Option<anyhow::Error>,
}

impl App {
    pub fn new(profile: Rc<Profile>) -> Self {
        Self {
            profile,
            session: None,
            error: None,
        }
    }

    /// Outcome of the event loop.
    pub fn finish(mut self) -> anyhow::Result<()> {
        self.session = None;
        match self.error.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// A running core and the window it draws into.
struct Session {
    runtime: CoreRuntime,
    window: Rc<Window>,
    pacer: FramePacer,
    autosave: Option<(AutosaveTimer, PathBuf)>,
    state_slot: PathBuf,
}

impl Session {
    fn start(event_loop: &ActiveEventLoop, profile: &Rc<Profile>) -> anyhow::Result<Self> {
        let attributes = Window::default_attributes()
            .with_title("retrohost")
            .with_inner_size(LogicalSize::new(960, 720))
            .with_visible(false);
        let surface = GlutinSurface::new(event_loop, attributes)?;
        let window = surface.window();

        let audio: Box<dyn AudioSink> = match CpalSink::new() {
            Ok(sink) => Box::new(sink),
            Err(err) => {
                log::warn!("audio disabled: {err:#}");
                Box::new(NullAudio)
            }
        };

        let config: Rc<dyn Config> = profile.clone();
        let mut runtime =
            CoreRuntime::new(config, Box::new(GraphicsContext::new(surface)), audio);
        runtime
            .load(profile.core_path())
            .with_context(|| format!("failed to load core \"{}\"", profile.core_path().display()))?;
        runtime
            .load_game(profile.game_path())
            .with_context(|| format!("failed to load game \"{}\"", profile.game_path().display()))?;

        if let Some(region) = runtime.region() {
            log::debug!("game region {region}");
        }

        let size = window.inner_size();
        runtime.resize_display(size.width, size.height);
        window.set_visible(true);
        if profile.fullscreen() {
            window.set_fullscreen(Some(Fullscreen::Borderless(None)));
        }
        if profile.mouse_hack() != MouseHackProfile::None {
            grab_cursor(&window);
        }

        let game = profile.game_path();
        let autosave = profile.autosave_dir().map(|dir| autosave_path(dir, game));
        if let Some(path) = &autosave
            && path.exists()
        {
            match runtime.load_state(path) {
                Ok(()) => log::info!("resumed from \"{}\"", path.display()),
                Err(err) => log::warn!("ignoring autosave: {err}"),
            }
        }

        let now = Instant::now();
        let autosave = match (autosave, profile.autosave_period()) {
            (Some(path), Some(period)) => Some((AutosaveTimer::new(period, now), path)),
            _ => None,
        };

        Ok(Self {
            pacer: FramePacer::new(runtime.target_fps(), now),
            runtime,
            window,
            autosave,
            state_slot: state_path(profile.save_dir(), game, ".state0"),
        })
    }

    fn save_to(&mut self, path: PathBuf) {
        if let Err(err) = self.runtime.save_state(&path) {
            log::error!("{err}");
        }
    }

    fn on_key(&mut self, event_loop: &ActiveEventLoop, event: &KeyEvent) {
        let PhysicalKey::Code(code) = event.physical_key else {
            return;
        };
        let pressed = event.state == ElementState::Pressed;
        if let Some(button) = joypad_button(code) {
            self.runtime.set_joypad_axis(button.slot(), i16::from(pressed));
            return;
        }
        if !pressed || event.repeat {
            return;
        }

        match code {
            KeyCode::Escape => event_loop.exit(),
            KeyCode::F5 => self.save_to(self.state_slot.clone()),
            KeyCode::F7 => {
                if let Err(err) = self.runtime.load_state(&self.state_slot) {
                    log::error!("{err}");
                }
            }
            KeyCode::F11 => {
                let fullscreen = match self.window.fullscreen() {
                    Some(_) => None,
                    None => Some(Fullscreen::Borderless(None)),
                };
                self.window.set_fullscreen(fullscreen);
            }
            _ => {}
        }
    }

    fn step(&mut self, now: Instant) {
        let frames = self.pacer.due(now);
        for _ in 0..frames {
            self.runtime.run_frame();
        }
        if frames > 0 {
            self.window.request_redraw();
        }

        if let Some((timer, path)) = &mut self.autosave
            && timer.tick(now)
        {
            let path = path.clone();
            self.save_to(path);
        }
    }

    fn close(mut self) {
        if let Some((_, path)) = self.autosave.take() {
            self.save_to(path);
        }
        self.runtime.free();
    }
}

fn grab_cursor(window: &Window) {
    let grabbed = window
        .set_cursor_grab(CursorGrabMode::Locked)
        .or_else(|_| window.set_cursor_grab(CursorGrabMode::Confined));
    match grabbed {
        Ok(()) => window.set_cursor_visible(false),
        Err(err) => log::warn!("cannot grab the cursor: {err}"),
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.session.is_some() {
            return;
        }
        match Session::start(event_loop, &self.profile) {
            Ok(session) => self.session = Some(session),
            Err(err) => {
                self.error = Some(err);
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, window_id: WindowId, event: WindowEvent) {
        let Some(session) = &mut self.session else {
            return;
        };
        if session.window.id() != window_id {
            return;
        }

        match event {
            WindowEvent::CloseRequested => event_loop.exit(),
            WindowEvent::Resized(size) => {
                session.runtime.resize_display(size.width, size.height);
                session.window.request_redraw();
            }
            WindowEvent::KeyboardInput { event, .. } => session.on_key(event_loop, &event),
            WindowEvent::RedrawRequested => session.runtime.present(),
            _ => {}
        }
    }

    fn device_event(&mut self, _event_loop: &ActiveEventLoop, _device_id: DeviceId, event: DeviceEvent) {
        if let (Some(session), DeviceEvent::MouseMotion { delta: (dx, dy) }) = (&mut self.session, event) {
            session.runtime.set_mouse_move(dx as f32, dy as f32);
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        let Some(session) = &mut self.session else {
            return;
        };
        if session.runtime.shutdown_requested() {
            event_loop.exit();
            return;
        }
        session.step(Instant::now());
        event_loop.set_control_flow(ControlFlow::WaitUntil(session.pacer.deadline()));
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(session) = self.session.take() {
            session.close();
        }
    }
}

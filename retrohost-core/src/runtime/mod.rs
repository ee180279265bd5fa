//! Core lifecycle.
//!
//! [`CoreRuntime`] owns one plugin at a time and moves it through
//! `Unloaded → Loaded → GameLoaded → Running`. Every call into the plugin happens inside an
//! [`ActiveHost`] scope so the plugin's callbacks reach this runtime's [`HostEnvironment`].

use std::ffi::{CStr, CString};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::ptr;
use std::rc::Rc;

use tempfile::NamedTempFile;

use crate::abi::{API_VERSION, GameInfo, MEMORY_SYSTEM_RAM, PixelFormat};
use crate::audio::AudioSink;
use crate::config::Config;
use crate::error::CoreError;
use crate::hacks::MemoryHook;
use crate::host::{self, ActiveHost, HostEnvironment, HwRenderNegotiation};
use crate::plugin::{AvInfo, CoreInfo, DynamicPlugin, Plugin};
use crate::video::VideoBackend;

#[cfg(test)]
mod tests;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeState {
    Unloaded,
    Loaded,
    GameLoaded,
    Running,
}

impl RuntimeState {
    fn has_game(self) -> bool {
        matches!(self, Self::GameLoaded | Self::Running)
    }
}

pub struct CoreRuntime {
    state: RuntimeState,
    plugin: Option<Box<dyn Plugin>>,
    host: HostEnvironment,
    system_info: Option<CoreInfo>,
    av_info: Option<AvInfo>,
    game_path: Option<CString>,
    memory_hook: Option<Box<dyn MemoryHook>>,
    mouse_sensitivity: (f32, f32),
}

impl CoreRuntime {
    pub fn new(
        config: Rc<dyn Config>,
        video: Box<dyn VideoBackend>,
        audio: Box<dyn AudioSink>,
    ) -> Self {
        let memory_hook = config.mouse_hack().hook();
        if let Some(hook) = &memory_hook {
            log::info!("using mouse hack {}", hook.name());
        }
        Self {
            state: RuntimeState::Unloaded,
            plugin: None,
            mouse_sensitivity: config.mouse_sensitivity(),
            host: HostEnvironment::new(config, video, audio),
            system_info: None,
            av_info: None,
            game_path: None,
            memory_hook,
        }
    }

    /// Opens the core at `path` and initialises it, replacing any loaded core.
    pub fn load(&mut self, path: impl AsRef<Path>) -> Result<(), CoreError> {
        self.free();
        let plugin = DynamicPlugin::open(path.as_ref())?;
        log::info!("opened core \"{}\"", plugin.path().display());
        self.attach(Box::new(plugin))
    }

    /// Initialises an already-bound plugin, replacing any loaded core.
    pub fn attach(&mut self, plugin: Box<dyn Plugin>) -> Result<(), CoreError> {
        self.free();

        let plugin = self.plugin.insert(plugin);
        if let Some(version) = plugin.api_version()
            && version != API_VERSION
        {
            log::warn!("core reports libretro API version {version}, host speaks {API_VERSION}");
        }

        {
            let _active = ActiveHost::enter(&mut self.host);
            plugin.register_hooks(&host::hooks());
            plugin.init();
        }
        self.state = RuntimeState::Loaded;

        if let Some(err) = self.host.take_graphics_error() {
            self.free();
            return Err(err.into());
        }

        let (info, av) = self.with_plugin(|plugin| (plugin.system_info(), plugin.system_av_info()));
        self.apply_av_info(av);
        log::info!(
            "loaded core {} {} ({:.2} fps, {} Hz, max {}x{})",
            info.library_name,
            info.library_version,
            av.fps,
            av.sample_rate,
            av.max_width,
            av.max_height
        );
        self.system_info = Some(info);
        Ok(())
    }

    /// Loads the game at `path`. A core that did not negotiate a HW context gets the software
    /// render path.
    pub fn load_game(&mut self, path: impl AsRef<Path>) -> Result<(), CoreError> {
        if self.state != RuntimeState::Loaded {
            return Err(CoreError::NotInitialized);
        }
        let path = path.as_ref();
        let rejected = || CoreError::GameRejected {
            path: path.to_path_buf(),
        };
        let c_path = CString::new(path.to_string_lossy().into_owned()).map_err(|_| rejected())?;
        let game = GameInfo {
            path: c_path.as_ptr(),
            data: ptr::null(),
            size: 0,
            meta: ptr::null(),
        };

        let accepted = self.with_plugin(|plugin| plugin.load_game(&game));
        if let Some(err) = self.host.take_graphics_error() {
            if accepted {
                self.with_plugin(|plugin| plugin.unload_game());
            }
            return Err(err.into());
        }
        if !accepted {
            log::error!("core rejected \"{}\"", path.display());
            return Err(rejected());
        }

        let av = self.with_plugin(|plugin| plugin.system_av_info());
        let grew = self.apply_av_info(av);
        if let Err(err) = self.prepare_video(grew) {
            self.with_plugin(|plugin| plugin.unload_game());
            return Err(err);
        }

        log::info!("loaded game \"{}\"", path.display());
        self.game_path = Some(c_path);
        self.state = RuntimeState::GameLoaded;
        Ok(())
    }

    fn prepare_video(&mut self, geometry_grew: bool) -> Result<(), CoreError> {
        let Some(negotiation) = self.host.hw_render().copied() else {
            self.host.configure_software()?;
            return Ok(());
        };
        if !geometry_grew {
            return Ok(());
        }

        // The target was sized before the game reported its real max geometry.
        log::info!("max geometry grew after load_game; rebuilding the HW render target");
        if let Some(destroy) = negotiation.context_destroy {
            let _active = ActiveHost::enter(&mut self.host);
            unsafe { destroy() };
        }
        self.host.reconfigure_hw()?;
        if let Some(reset) = negotiation.context_reset {
            let _active = ActiveHost::enter(&mut self.host);
            unsafe { reset() };
        }
        Ok(())
    }

    fn apply_av_info(&mut self, av: AvInfo) -> bool {
        let grew = self.host.update_av_info(&av);
        if self.av_info.is_none_or(|old| old.sample_rate != av.sample_rate) && av.sample_rate > 0.0 {
            self.host.audio().configure(av.sample_rate);
        }
        self.av_info = Some(av);
        grew
    }

    /// Runs the core for one frame.
    ///
    /// # Panics
    /// Without a loaded game.
    pub fn run_frame(&mut self) {
        assert!(
            self.state.has_game(),
            "run_frame called in state {:?}",
            self.state
        );
        self.with_plugin(|plugin| plugin.run());
        self.host.audio().flush();
        self.state = RuntimeState::Running;
    }

    /// Serialises the core into `path`, replacing it atomically.
    pub fn save_state(&mut self, path: impl AsRef<Path>) -> Result<(), CoreError> {
        let path = path.as_ref();
        if !self.state.has_game() {
            return Err(CoreError::NotInitialized);
        }

        let (saved, buffer) = self.with_plugin(|plugin| {
            let mut buffer = vec![0u8; plugin.serialize_size()];
            (plugin.serialize(&mut buffer), buffer)
        });
        if !saved {
            return Err(CoreError::StateFormat {
                path: path.to_path_buf(),
            });
        }

        write_atomically(path, &buffer).map_err(|source| CoreError::StateIo {
            path: path.to_path_buf(),
            source,
        })?;
        log::info!("saved state \"{}\" ({} bytes)", path.display(), buffer.len());
        Ok(())
    }

    pub fn load_state(&mut self, path: impl AsRef<Path>) -> Result<(), CoreError> {
        let path = path.as_ref();
        if !self.state.has_game() {
            return Err(CoreError::NotInitialized);
        }

        let buffer = std::fs::read(path).map_err(|source| CoreError::StateIo {
            path: path.to_path_buf(),
            source,
        })?;
        if !self.with_plugin(|plugin| plugin.unserialize(&buffer)) {
            return Err(CoreError::StateFormat {
                path: path.to_path_buf(),
            });
        }
        log::info!("loaded state \"{}\"", path.display());
        Ok(())
    }

    /// Unloads the game and the core. Does nothing when no core is loaded.
    pub fn free(&mut self) {
        if self.state == RuntimeState::Unloaded && self.plugin.is_none() {
            return;
        }

        let has_game = self.state.has_game();
        let destroy = self
            .host
            .hw_render()
            .and_then(|negotiation| negotiation.context_destroy);
        if let Some(plugin) = self.plugin.as_mut() {
            let _active = ActiveHost::enter(&mut self.host);
            if let Some(destroy) = destroy {
                unsafe { destroy() };
            }
            if has_game {
                plugin.unload_game();
            }
            plugin.deinit();
        }

        self.plugin = None;
        self.host.reset();
        self.system_info = None;
        self.av_info = None;
        self.game_path = None;
        self.state = RuntimeState::Unloaded;
        log::debug!("core unloaded");
    }

    /// Runs `f` against the plugin with this runtime's host active.
    ///
    /// # Panics
    /// Without a plugin; callers check the state first.
    fn with_plugin<R>(&mut self, f: impl FnOnce(&mut dyn Plugin) -> R) -> R {
        let plugin = self
            .plugin
            .as_mut()
            .expect("plugin present in every state but Unloaded");
        let _active = ActiveHost::enter(&mut self.host);
        f(plugin.as_mut())
    }

    pub fn state(&self) -> RuntimeState {
        self.state
    }

    pub fn system_info(&self) -> Option<&CoreInfo> {
        self.system_info.as_ref()
    }

    pub fn av_info(&self) -> Option<&AvInfo> {
        self.av_info.as_ref()
    }

    pub fn render_width(&self) -> u32 {
        self.host.geometry().width
    }

    pub fn render_height(&self) -> u32 {
        self.host.geometry().height
    }

    pub fn target_fps(&self) -> f64 {
        self.av_info.map_or(0.0, |av| av.fps)
    }

    pub fn sample_rate(&self) -> f64 {
        self.av_info.map_or(0.0, |av| av.sample_rate)
    }

    pub fn pixel_format(&self) -> PixelFormat {
        self.host.pixel_format()
    }

    pub fn hw_render(&self) -> Option<&HwRenderNegotiation> {
        self.host.hw_render()
    }

    pub fn shutdown_requested(&self) -> bool {
        self.host.shutdown_requested()
    }

    /// Path of the loaded game.
    pub fn game_path(&self) -> Option<PathBuf> {
        self.game_path
            .as_ref()
            .map(|path| PathBuf::from(path.to_string_lossy().into_owned()))
    }

    /// # Panics
    /// If `slot` is not a joypad slot (0..16).
    pub fn set_joypad_axis(&mut self, slot: usize, value: i16) {
        self.host.joypad.set(slot, value);
    }

    /// Feeds relative mouse motion to the installed memory hook.
    pub fn set_mouse_move(&mut self, dx: f32, dy: f32) {
        let Some(hook) = self.memory_hook.as_mut() else {
            return;
        };
        if !self.state.has_game() {
            return;
        }
        let Some(plugin) = self.plugin.as_mut() else {
            return;
        };
        let (sx, sy) = self.mouse_sensitivity;
        if let Some(ram) = plugin.memory(MEMORY_SYSTEM_RAM) {
            hook.on_mouse_move(ram, dx * sx, dy * sy);
        }
    }

    pub fn set_memory_hook(&mut self, hook: Option<Box<dyn MemoryHook>>) {
        self.memory_hook = hook;
    }

    pub fn reset(&mut self) {
        if self.plugin.is_some() {
            self.with_plugin(|plugin| plugin.reset());
        }
    }

    pub fn set_controller_port_device(&mut self, port: u32, device: u32) {
        if self.plugin.is_some() {
            self.with_plugin(|plugin| plugin.set_controller_port_device(port, device));
        }
    }

    /// Video region of the loaded game, `None` without one.
    pub fn region(&mut self) -> Option<u32> {
        self.state
            .has_game()
            .then(|| self.with_plugin(|plugin| plugin.region()))
    }

    pub fn cheat_reset(&mut self) {
        if self.state.has_game() {
            self.with_plugin(|plugin| plugin.cheat_reset());
        }
    }

    /// Does nothing without a loaded game.
    pub fn cheat_set(&mut self, index: u32, enabled: bool, code: &CStr) {
        if self.state.has_game() {
            self.with_plugin(|plugin| plugin.cheat_set(index, enabled, code));
        }
    }

    /// Draws the last frame into the display.
    pub fn present(&mut self) {
        self.host.present();
    }

    pub fn resize_display(&mut self, width: u32, height: u32) {
        self.host.video().resize_display(width, height);
    }
}

impl Drop for CoreRuntime {
    fn drop(&mut self) {
        self.free();
    }
}

fn write_atomically(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut file = NamedTempFile::new_in(dir)?;
    file.write_all(bytes)?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|err| err.error)?;
    Ok(())
}

//! Plugin binding.
//!
//! [`Plugin`] is the capability surface the runtime drives. [`DynamicPlugin`] implements it
//! over a core shared library opened with `libloading`; tests implement it in-process.

use std::ffi::CStr;
use std::os::raw::{c_char, c_uint};
use std::path::{Path, PathBuf};
use std::ptr;

use libloading::Library;

use crate::abi::{
    AudioSampleBatchFn, AudioSampleFn, EnvironmentFn, GameInfo, InputPollFn, InputStateFn,
    SystemAvInfo, SystemInfo, VideoRefreshFn, entry,
};
use crate::error::CoreError;

/// The six callbacks a core is given before `init`.
#[derive(Clone, Copy)]
pub struct HostHooks {
    pub environment: EnvironmentFn,
    pub video_refresh: VideoRefreshFn,
    pub audio_sample: AudioSampleFn,
    pub audio_sample_batch: AudioSampleBatchFn,
    pub input_poll: InputPollFn,
    pub input_state: InputStateFn,
}

/// Static information about a core.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoreInfo {
    pub library_name: String,
    pub library_version: String,
    pub valid_extensions: String,
    pub need_fullpath: bool,
    pub block_extract: bool,
}

/// Geometry and timing reported by a core.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AvInfo {
    pub base_width: u32,
    pub base_height: u32,
    pub max_width: u32,
    pub max_height: u32,
    pub aspect_ratio: f32,
    pub fps: f64,
    pub sample_rate: f64,
}

impl From<&SystemAvInfo> for AvInfo {
    fn from(raw: &SystemAvInfo) -> Self {
        Self {
            base_width: raw.geometry.base_width,
            base_height: raw.geometry.base_height,
            max_width: raw.geometry.max_width,
            max_height: raw.geometry.max_height,
            aspect_ratio: raw.geometry.aspect_ratio,
            fps: raw.timing.fps,
            sample_rate: raw.timing.sample_rate,
        }
    }
}

/// Operations a loaded core exposes to the host.
///
/// Every method maps onto one libretro export. The runtime guarantees the libretro call order
/// (hooks, then `init`, then games); implementations don't need to re-check it.
pub trait Plugin {
    /// Installs the host callbacks, environment first.
    fn register_hooks(&mut self, hooks: &HostHooks);
    fn init(&mut self);
    fn deinit(&mut self);
    /// `None` when the core does not export `retro_api_version`.
    fn api_version(&self) -> Option<u32>;
    fn system_info(&mut self) -> CoreInfo;
    fn system_av_info(&mut self) -> AvInfo;
    fn set_controller_port_device(&mut self, port: u32, device: u32);
    fn reset(&mut self);
    fn run(&mut self);
    fn serialize_size(&mut self) -> usize;
    fn serialize(&mut self, buf: &mut [u8]) -> bool;
    fn unserialize(&mut self, buf: &[u8]) -> bool;
    fn cheat_reset(&mut self);
    fn cheat_set(&mut self, index: u32, enabled: bool, code: &CStr);
    fn load_game(&mut self, game: &GameInfo) -> bool;
    fn load_game_special(&mut self, game_type: u32, games: &[GameInfo]) -> bool;
    fn unload_game(&mut self);
    fn region(&mut self) -> u32;
    /// Memory region `id` (e.g. `MEMORY_SYSTEM_RAM`), if the core exposes one.
    fn memory(&mut self, id: u32) -> Option<&mut [u8]>;
}

fn symbol<T: Copy>(library: &Library, name: &'static str) -> Result<T, CoreError> {
    // SAFETY: `T` is the libretro signature of `name`; the core is trusted to export it with
    // that signature.
    unsafe { library.get::<T>(name.as_bytes()) }
        .map(|sym| *sym)
        .map_err(|_| CoreError::PluginBind { symbol: name })
}

macro_rules! core_exports {
    ($($name:ident: $ty:ty),* $(,)?) => {
        /// Exports every core must provide, in resolution order.
        pub const REQUIRED_SYMBOLS: &[&str] = &[$(stringify!($name)),*];

        struct Exports {
            $($name: $ty,)*
        }

        impl Exports {
            /// Fields resolve in declaration order, so the error names the first missing one.
            fn resolve(library: &Library) -> Result<Self, CoreError> {
                Ok(Self {
                    $($name: symbol(library, stringify!($name))?,)*
                })
            }
        }
    };
}

core_exports! {
    retro_get_system_info: entry::GetSystemInfo,
    retro_set_environment: entry::SetEnvironment,
    retro_set_video_refresh: entry::SetVideoRefresh,
    retro_set_audio_sample: entry::SetAudioSample,
    retro_set_audio_sample_batch: entry::SetAudioSampleBatch,
    retro_set_input_poll: entry::SetInputPoll,
    retro_set_input_state: entry::SetInputState,
    retro_init: entry::Init,
    retro_deinit: entry::Deinit,
    retro_get_system_av_info: entry::GetSystemAvInfo,
    retro_set_controller_port_device: entry::SetControllerPortDevice,
    retro_reset: entry::Reset,
    retro_run: entry::Run,
    retro_serialize_size: entry::SerializeSize,
    retro_serialize: entry::Serialize,
    retro_unserialize: entry::Unserialize,
    retro_cheat_reset: entry::CheatReset,
    retro_cheat_set: entry::CheatSet,
    retro_load_game: entry::LoadGame,
    retro_load_game_special: entry::LoadGameSpecial,
    retro_unload_game: entry::UnloadGame,
    retro_get_region: entry::GetRegion,
    retro_get_memory_data: entry::GetMemoryData,
    retro_get_memory_size: entry::GetMemorySize,
}

/// A core loaded from a shared library.
pub struct DynamicPlugin {
    exports: Exports,
    api_version: Option<entry::ApiVersion>,
    path: PathBuf,
    // Dropped last: every function pointer above points into it.
    _library: Library,
}

impl DynamicPlugin {
    /// Opens `path` and resolves all required exports.
    ///
    /// Nothing in the core is called here; a module with a missing export is closed again
    /// before returning.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let path = path.as_ref();

        // SAFETY: loading a core runs its static initialisers. Cores are trusted with full host
        // privileges.
        let library = unsafe { Library::new(path) }.map_err(|source| CoreError::ModuleLoad {
            path: path.to_path_buf(),
            source,
        })?;

        let exports = Exports::resolve(&library)?;
        let api_version = symbol::<entry::ApiVersion>(&library, "retro_api_version").ok();

        log::debug!("resolved {} core exports from \"{}\"", REQUIRED_SYMBOLS.len(), path.display());

        Ok(Self {
            exports,
            api_version,
            path: path.to_path_buf(),
            _library: library,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn owned_c_string(ptr: *const c_char) -> String {
    if ptr.is_null() {
        return String::new();
    }
    // SAFETY: libretro strings in `retro_system_info` are NUL-terminated and static.
    unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned()
}

impl Plugin for DynamicPlugin {
    fn register_hooks(&mut self, hooks: &HostHooks) {
        unsafe {
            (self.exports.retro_set_environment)(hooks.environment);
            (self.exports.retro_set_video_refresh)(hooks.video_refresh);
            (self.exports.retro_set_audio_sample)(hooks.audio_sample);
            (self.exports.retro_set_audio_sample_batch)(hooks.audio_sample_batch);
            (self.exports.retro_set_input_poll)(hooks.input_poll);
            (self.exports.retro_set_input_state)(hooks.input_state);
        }
    }

    fn init(&mut self) {
        unsafe { (self.exports.retro_init)() }
    }

    fn deinit(&mut self) {
        unsafe { (self.exports.retro_deinit)() }
    }

    fn api_version(&self) -> Option<u32> {
        self.api_version.map(|f| unsafe { f() })
    }

    fn system_info(&mut self) -> CoreInfo {
        // SAFETY: an all-zero `retro_system_info` is valid (null strings, false flags).
        let mut raw: SystemInfo = unsafe { std::mem::zeroed() };
        unsafe { (self.exports.retro_get_system_info)(&mut raw) };
        CoreInfo {
            library_name: owned_c_string(raw.library_name),
            library_version: owned_c_string(raw.library_version),
            valid_extensions: owned_c_string(raw.valid_extensions),
            need_fullpath: raw.need_fullpath,
            block_extract: raw.block_extract,
        }
    }

    fn system_av_info(&mut self) -> AvInfo {
        let mut raw: SystemAvInfo = unsafe { std::mem::zeroed() };
        unsafe { (self.exports.retro_get_system_av_info)(&mut raw) };
        AvInfo::from(&raw)
    }

    fn set_controller_port_device(&mut self, port: u32, device: u32) {
        unsafe { (self.exports.retro_set_controller_port_device)(port as c_uint, device as c_uint) }
    }

    fn reset(&mut self) {
        unsafe { (self.exports.retro_reset)() }
    }

    fn run(&mut self) {
        unsafe { (self.exports.retro_run)() }
    }

    fn serialize_size(&mut self) -> usize {
        unsafe { (self.exports.retro_serialize_size)() }
    }

    fn serialize(&mut self, buf: &mut [u8]) -> bool {
        unsafe { (self.exports.retro_serialize)(buf.as_mut_ptr().cast(), buf.len()) }
    }

    fn unserialize(&mut self, buf: &[u8]) -> bool {
        unsafe { (self.exports.retro_unserialize)(buf.as_ptr().cast(), buf.len()) }
    }

    fn cheat_reset(&mut self) {
        unsafe { (self.exports.retro_cheat_reset)() }
    }

    fn cheat_set(&mut self, index: u32, enabled: bool, code: &CStr) {
        unsafe { (self.exports.retro_cheat_set)(index as c_uint, enabled, code.as_ptr()) }
    }

    fn load_game(&mut self, game: &GameInfo) -> bool {
        unsafe { (self.exports.retro_load_game)(game) }
    }

    fn load_game_special(&mut self, game_type: u32, games: &[GameInfo]) -> bool {
        let info = if games.is_empty() { ptr::null() } else { games.as_ptr() };
        unsafe { (self.exports.retro_load_game_special)(game_type as c_uint, info, games.len()) }
    }

    fn unload_game(&mut self) {
        unsafe { (self.exports.retro_unload_game)() }
    }

    fn region(&mut self) -> u32 {
        unsafe { (self.exports.retro_get_region)() }
    }

    fn memory(&mut self, id: u32) -> Option<&mut [u8]> {
        unsafe {
            let size = (self.exports.retro_get_memory_size)(id as c_uint);
            let data = (self.exports.retro_get_memory_data)(id as c_uint).cast::<u8>();
            if data.is_null() || size == 0 {
                return None;
            }
            // SAFETY: the core owns `size` bytes at `data` for as long as the game is loaded,
            // and the returned borrow is tied to `&mut self`.
            Some(std::slice::from_raw_parts_mut(data, size))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn required_symbols_are_the_libretro_exports() {
        assert_eq!(REQUIRED_SYMBOLS.len(), 24);
        assert_eq!(REQUIRED_SYMBOLS[0], "retro_get_system_info");
        assert_eq!(REQUIRED_SYMBOLS[23], "retro_get_memory_size");
        assert!(!REQUIRED_SYMBOLS.contains(&"retro_api_version"));
    }

    #[test]
    fn open_missing_module_is_module_load() {
        let err = DynamicPlugin::open("/nonexistent/retrohost/core.so")
            .err()
            .expect("open must fail");
        assert!(matches!(err, CoreError::ModuleLoad { .. }), "{err}");
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn open_reports_first_missing_symbol() {
        // libc is always loadable and exports none of the libretro symbols.
        let err = DynamicPlugin::open("libc.so.6").err().expect("libc is not a core");
        match err {
            CoreError::PluginBind { symbol } => assert_eq!(symbol, "retro_get_system_info"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn av_info_copies_geometry_and_timing() {
        let mut raw: SystemAvInfo = unsafe { std::mem::zeroed() };
        raw.geometry.base_width = 320;
        raw.geometry.base_height = 240;
        raw.geometry.max_width = 640;
        raw.geometry.max_height = 480;
        raw.geometry.aspect_ratio = 4.0 / 3.0;
        raw.timing.fps = 59.94;
        raw.timing.sample_rate = 44_100.0;

        let info = AvInfo::from(&raw);
        assert_eq!((info.max_width, info.max_height), (640, 480));
        assert_eq!(info.fps, 59.94);
        assert_eq!(info.sample_rate, 44_100.0);
    }
}

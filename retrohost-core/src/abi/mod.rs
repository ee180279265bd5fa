//! retrohost-core ABI module
//!
//! This module defines the parts of the libretro contract between:
//! - **Host**: `retrohost-core` (the frontend)
//! - **Core**: the dynamically loaded emulation library
//!
//! The plain structs and callback typedefs come from `libretro-sys` and are re-exported here.
//! What follows is what `libretro-sys` does not cover, or does not cover in a form the host can
//! read safely:
//! - environment command codes newer than the crate (`GET_INPUT_BITMASKS`,
//!   `GET_PREFERRED_HW_RENDER`),
//! - `retro_hw_render_callback` with nullable hooks,
//! - the variadic log interface,
//! - entry point signatures for resolving the core's exports.
//!
//! Enum-typed fields (pixel format, context type) are read as raw `c_uint` and converted with
//! `from_raw`, since a core can hand over any value.

use std::os::raw::{c_char, c_uint, c_void};

pub use libretro_sys::{
    API_VERSION, AudioSampleBatchFn, AudioSampleFn, DEVICE_JOYPAD, EnvironmentFn, GameInfo,
    InputPollFn, InputStateFn, MEMORY_SYSTEM_RAM, SystemAvInfo, SystemInfo, VideoRefreshFn,
};

/// Environment command codes understood by the host.
pub mod env {
    use std::os::raw::c_uint;

    /// Set on commands that are not yet part of the stable API.
    pub const EXPERIMENTAL: c_uint = 0x10000;

    pub const GET_CAN_DUPE: c_uint = 3;
    pub const SET_MESSAGE: c_uint = 6;
    pub const SHUTDOWN: c_uint = 7;
    pub const GET_SYSTEM_DIRECTORY: c_uint = 9;
    pub const SET_PIXEL_FORMAT: c_uint = 10;
    pub const SET_HW_RENDER: c_uint = 14;
    pub const GET_VARIABLE: c_uint = 15;
    pub const GET_VARIABLE_UPDATE: c_uint = 17;
    pub const GET_LOG_INTERFACE: c_uint = 27;
    pub const GET_SAVE_DIRECTORY: c_uint = 31;
    pub const GET_INPUT_BITMASKS: c_uint = 51 | EXPERIMENTAL;
    pub const GET_PREFERRED_HW_RENDER: c_uint = 56;
}

/// `input_state` id asking for all joypad buttons as a bitmask.
pub const DEVICE_ID_JOYPAD_MASK: c_uint = 256;

/// Frame pointer a HW-rendering core passes to `video_refresh` when the frame lives in the
/// host framebuffer (`RETRO_HW_FRAME_BUFFER_VALID`).
pub const HW_FRAME_BUFFER_VALID: *const c_void = usize::MAX as *const c_void;

/// `enum retro_pixel_format`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u32)]
pub enum PixelFormat {
    /// libretro's implicit default until the core negotiates.
    #[default]
    Argb1555 = 0,
    Xrgb8888 = 1,
    Rgb565 = 2,
}

impl PixelFormat {
    pub fn from_raw(raw: c_uint) -> Option<Self> {
        match raw {
            0 => Some(Self::Argb1555),
            1 => Some(Self::Xrgb8888),
            2 => Some(Self::Rgb565),
            _ => None,
        }
    }
}

/// `enum retro_hw_context_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum HwContextType {
    None = 0,
    OpenGl = 1,
    OpenGlEs2 = 2,
    OpenGlCore = 3,
    OpenGlEs3 = 4,
    OpenGlEsVersion = 5,
    Vulkan = 6,
}

impl HwContextType {
    pub fn from_raw(raw: c_uint) -> Option<Self> {
        match raw {
            0 => Some(Self::None),
            1 => Some(Self::OpenGl),
            2 => Some(Self::OpenGlEs2),
            3 => Some(Self::OpenGlCore),
            4 => Some(Self::OpenGlEs3),
            5 => Some(Self::OpenGlEsVersion),
            6 => Some(Self::Vulkan),
            _ => None,
        }
    }
}

pub type HwContextResetFn = unsafe extern "C" fn();
pub type HwGetCurrentFramebufferFn = unsafe extern "C" fn() -> usize;
pub type ProcAddressFn = unsafe extern "C" fn();
pub type HwGetProcAddressFn = unsafe extern "C" fn(sym: *const c_char) -> Option<ProcAddressFn>;

/// `struct retro_hw_render_callback`.
///
/// The core fills in the request fields and the two context hooks; the host writes
/// `get_current_framebuffer` and `get_proc_address` back on success.
#[repr(C)]
pub struct HwRenderCallback {
    pub context_type: c_uint,
    pub context_reset: Option<HwContextResetFn>,
    pub get_current_framebuffer: Option<HwGetCurrentFramebufferFn>,
    pub get_proc_address: Option<HwGetProcAddressFn>,
    pub depth: bool,
    pub stencil: bool,
    pub bottom_left_origin: bool,
    pub version_major: c_uint,
    pub version_minor: c_uint,
    pub cache_context: bool,
    pub context_destroy: Option<HwContextResetFn>,
    pub debug_context: bool,
}

/// `enum retro_log_level`.
pub mod log_level {
    use std::os::raw::c_uint;

    pub const DEBUG: c_uint = 0;
    pub const INFO: c_uint = 1;
    pub const WARN: c_uint = 2;
    pub const ERROR: c_uint = 3;
}

pub type LogPrintfFn = unsafe extern "C" fn(level: c_uint, fmt: *const c_char, ...);

/// `struct retro_log_callback`.
#[repr(C)]
pub struct LogCallback {
    pub log: Option<LogPrintfFn>,
}

/// `struct retro_variable`.
#[repr(C)]
pub struct Variable {
    pub key: *const c_char,
    pub value: *const c_char,
}

/// `struct retro_message`.
#[repr(C)]
pub struct Message {
    pub msg: *const c_char,
    pub frames: c_uint,
}

/// Signatures of the exports every core must provide.
pub mod entry {
    use std::os::raw::{c_char, c_uint, c_void};

    use super::{
        AudioSampleBatchFn, AudioSampleFn, EnvironmentFn, GameInfo, InputPollFn, InputStateFn,
        SystemAvInfo, SystemInfo, VideoRefreshFn,
    };

    pub type GetSystemInfo = unsafe extern "C" fn(info: *mut SystemInfo);
    pub type SetEnvironment = unsafe extern "C" fn(cb: EnvironmentFn);
    pub type SetVideoRefresh = unsafe extern "C" fn(cb: VideoRefreshFn);
    pub type SetAudioSample = unsafe extern "C" fn(cb: AudioSampleFn);
    pub type SetAudioSampleBatch = unsafe extern "C" fn(cb: AudioSampleBatchFn);
    pub type SetInputPoll = unsafe extern "C" fn(cb: InputPollFn);
    pub type SetInputState = unsafe extern "C" fn(cb: InputStateFn);
    pub type Init = unsafe extern "C" fn();
    pub type Deinit = unsafe extern "C" fn();
    pub type ApiVersion = unsafe extern "C" fn() -> c_uint;
    pub type GetSystemAvInfo = unsafe extern "C" fn(info: *mut SystemAvInfo);
    pub type SetControllerPortDevice = unsafe extern "C" fn(port: c_uint, device: c_uint);
    pub type Reset = unsafe extern "C" fn();
    pub type Run = unsafe extern "C" fn();
    pub type SerializeSize = unsafe extern "C" fn() -> usize;
    pub type Serialize = unsafe extern "C" fn(data: *mut c_void, size: usize) -> bool;
    pub type Unserialize = unsafe extern "C" fn(data: *const c_void, size: usize) -> bool;
    pub type CheatReset = unsafe extern "C" fn();
    pub type CheatSet = unsafe extern "C" fn(index: c_uint, enabled: bool, code: *const c_char);
    pub type LoadGame = unsafe extern "C" fn(game: *const GameInfo) -> bool;
    pub type LoadGameSpecial =
        unsafe extern "C" fn(game_type: c_uint, info: *const GameInfo, num_info: usize) -> bool;
    pub type UnloadGame = unsafe extern "C" fn();
    pub type GetRegion = unsafe extern "C" fn() -> c_uint;
    pub type GetMemoryData = unsafe extern "C" fn(id: c_uint) -> *mut c_void;
    pub type GetMemorySize = unsafe extern "C" fn(id: c_uint) -> usize;
}

//! Host side of the libretro callbacks.
//!
//! Cores get plain C function pointers with no user data, so every trampoline here finds the
//! live [`HostEnvironment`] through a thread-local installed by [`ActiveHost`] around each
//! plugin call. A callback that arrives outside such a scope gets a neutral answer.

use std::cell::Cell;
use std::collections::HashMap;
use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_uint, c_void};
use std::ptr::{self, NonNull};
use std::rc::Rc;

use crate::abi::{
    HW_FRAME_BUFFER_VALID, HwContextResetFn, HwContextType, HwRenderCallback, LogCallback,
    Message, PixelFormat, ProcAddressFn, Variable, env,
};
use crate::audio::AudioSink;
use crate::config::Config;
use crate::error::GraphicsError;
use crate::input::JoypadState;
use crate::plugin::{AvInfo, HostHooks};
use crate::video::{
    ContextRequest, FALLBACK_GEOMETRY, GlProfile, Origin, SoftwareFrame, VideoBackend,
};

pub(crate) mod logging;

thread_local! {
    static ACTIVE: Cell<Option<NonNull<HostEnvironment>>> = const { Cell::new(None) };
}

/// Scope during which the trampolines on this thread reach one host.
pub(crate) struct ActiveHost {
    _not_send: std::marker::PhantomData<*const ()>,
}

impl ActiveHost {
    /// # Panics
    /// If another host is already active on this thread.
    pub(crate) fn enter(host: &mut HostEnvironment) -> Self {
        ACTIVE.with(|active| {
            assert!(
                active.get().is_none(),
                "a core host is already active on this thread"
            );
            active.set(Some(NonNull::from(host)));
        });
        Self {
            _not_send: std::marker::PhantomData,
        }
    }
}

impl Drop for ActiveHost {
    fn drop(&mut self) {
        ACTIVE.with(|active| active.set(None));
    }
}

fn with_host<R>(f: impl FnOnce(&mut HostEnvironment) -> R) -> Option<R> {
    let host = ACTIVE.with(Cell::get)?;
    // SAFETY: installed by `ActiveHost::enter` from a `&mut HostEnvironment` that the runtime
    // does not touch until the scope ends. The borrow below ends before this returns, and
    // trampolines never nest while holding it.
    Some(f(unsafe { &mut *host.as_ptr() }))
}

/// The callbacks handed to every core.
pub(crate) fn hooks() -> HostHooks {
    HostHooks {
        environment,
        video_refresh,
        audio_sample,
        audio_sample_batch,
        input_poll,
        input_state,
    }
}

/// What the environment trampoline does once the host borrow is released.
enum EnvReply {
    Done(bool),
    /// HW context is ready; run the core's `context_reset`, then answer true.
    ContextReady(HwContextResetFn),
}

/// Result of a successful `SET_HW_RENDER`.
#[derive(Debug, Clone, Copy)]
pub struct HwRenderNegotiation {
    pub context_type: HwContextType,
    pub request: ContextRequest,
    pub context_reset: Option<HwContextResetFn>,
    pub context_destroy: Option<HwContextResetFn>,
}

/// Size of the last frame the core produced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameGeometry {
    pub width: u32,
    pub height: u32,
}

/// Everything the core's callbacks read or write.
pub struct HostEnvironment {
    config: Rc<dyn Config>,
    video: Box<dyn VideoBackend>,
    audio: Box<dyn AudioSink>,
    system_dir: CString,
    save_dir: CString,
    variables: HashMap<String, CString>,
    pub(crate) joypad: JoypadState,
    pixel_format: PixelFormat,
    warned_pixel_format: bool,
    max_geometry: (u32, u32),
    geometry: FrameGeometry,
    hw_render: Option<HwRenderNegotiation>,
    graphics_error: Option<GraphicsError>,
    shutdown_requested: bool,
}

fn path_c_string(path: &std::path::Path) -> CString {
    CString::new(path.to_string_lossy().into_owned()).unwrap_or_default()
}

impl HostEnvironment {
    pub fn new(
        config: Rc<dyn Config>,
        video: Box<dyn VideoBackend>,
        audio: Box<dyn AudioSink>,
    ) -> Self {
        Self {
            system_dir: path_c_string(config.system_dir()),
            save_dir: path_c_string(config.save_dir()),
            config,
            video,
            audio,
            variables: HashMap::new(),
            joypad: JoypadState::default(),
            pixel_format: PixelFormat::default(),
            warned_pixel_format: false,
            max_geometry: (0, 0),
            geometry: FrameGeometry::default(),
            hw_render: None,
            graphics_error: None,
            shutdown_requested: false,
        }
    }

    pub fn pixel_format(&self) -> PixelFormat {
        self.pixel_format
    }

    pub fn geometry(&self) -> FrameGeometry {
        self.geometry
    }

    pub fn hw_render(&self) -> Option<&HwRenderNegotiation> {
        self.hw_render.as_ref()
    }

    pub fn shutdown_requested(&self) -> bool {
        self.shutdown_requested
    }

    pub(crate) fn video(&mut self) -> &mut dyn VideoBackend {
        self.video.as_mut()
    }

    pub(crate) fn audio(&mut self) -> &mut dyn AudioSink {
        self.audio.as_mut()
    }

    pub(crate) fn take_graphics_error(&mut self) -> Option<GraphicsError> {
        self.graphics_error.take()
    }

    /// Records the core's max geometry. Returns whether it grew past the current target.
    pub(crate) fn update_av_info(&mut self, av: &AvInfo) -> bool {
        self.max_geometry = (av.max_width, av.max_height);
        match self.video.current_request() {
            Some(current) => av.max_width > current.max_width || av.max_height > current.max_height,
            None => false,
        }
    }

    /// Software path: a core 3.3 target at max geometry for XRGB8888 uploads.
    pub(crate) fn configure_software(&mut self) -> Result<(), GraphicsError> {
        let (width, height) = self.target_geometry();
        self.video.configure(&ContextRequest::software(width, height))
    }

    /// Rebuilds the negotiated HW target at the current max geometry.
    ///
    /// On failure the negotiation is dropped: the core has already released its context and
    /// must not see `context_destroy` again.
    pub(crate) fn reconfigure_hw(&mut self) -> Result<(), GraphicsError> {
        let Some(mut negotiation) = self.hw_render.take() else {
            return Ok(());
        };
        let (width, height) = self.target_geometry();
        negotiation.request.max_width = width;
        negotiation.request.max_height = height;
        self.video.configure(&negotiation.request)?;
        self.hw_render = Some(negotiation);
        Ok(())
    }

    /// Forgets the current negotiation, returning its `context_destroy` for the caller to run
    /// once the host borrow is released.
    fn take_hw_render(&mut self) -> Option<HwContextResetFn> {
        self.hw_render.take().and_then(|negotiation| negotiation.context_destroy)
    }

    fn target_geometry(&self) -> (u32, u32) {
        match self.max_geometry {
            (0, _) | (_, 0) => FALLBACK_GEOMETRY,
            geometry => geometry,
        }
    }

    pub(crate) fn present(&mut self) {
        self.video.present(self.geometry.width, self.geometry.height);
    }

    /// Back to the state of a freshly constructed host. The video backend keeps its context.
    pub(crate) fn reset(&mut self) {
        self.joypad.clear();
        self.pixel_format = PixelFormat::default();
        self.warned_pixel_format = false;
        self.max_geometry = (0, 0);
        self.geometry = FrameGeometry::default();
        self.hw_render = None;
        self.graphics_error = None;
        self.shutdown_requested = false;
    }

    fn variable(&mut self, key: &str) -> Option<*const c_char> {
        if let Some(value) = self.variables.get(key) {
            return Some(value.as_ptr());
        }
        let value = CString::new(self.config.variable(key)?).ok()?;
        let ptr = value.as_ptr();
        self.variables.insert(key.to_owned(), value);
        Some(ptr)
    }

    unsafe fn environment(&mut self, cmd: c_uint, data: *mut c_void) -> EnvReply {
        match cmd {
            env::GET_LOG_INTERFACE => {
                if data.is_null() {
                    return EnvReply::Done(false);
                }
                unsafe { (*data.cast::<LogCallback>()).log = Some(logging::printf_entry()) };
                EnvReply::Done(true)
            }
            env::GET_SYSTEM_DIRECTORY | env::GET_SAVE_DIRECTORY => {
                if data.is_null() {
                    return EnvReply::Done(false);
                }
                let dir = if cmd == env::GET_SYSTEM_DIRECTORY {
                    &self.system_dir
                } else {
                    &self.save_dir
                };
                unsafe { *data.cast::<*const c_char>() = dir.as_ptr() };
                EnvReply::Done(true)
            }
            env::SET_PIXEL_FORMAT => {
                if data.is_null() {
                    return EnvReply::Done(false);
                }
                let raw = unsafe { *data.cast::<c_uint>() };
                match PixelFormat::from_raw(raw) {
                    Some(PixelFormat::Xrgb8888) => {
                        self.pixel_format = PixelFormat::Xrgb8888;
                        EnvReply::Done(true)
                    }
                    _ => {
                        log::warn!("core asked for unsupported pixel format {raw}");
                        EnvReply::Done(false)
                    }
                }
            }
            env::GET_PREFERRED_HW_RENDER => {
                if data.is_null() {
                    return EnvReply::Done(false);
                }
                unsafe { *data.cast::<c_uint>() = HwContextType::OpenGlCore as c_uint };
                EnvReply::Done(true)
            }
            env::SET_HW_RENDER => {
                if data.is_null() {
                    return EnvReply::Done(false);
                }
                self.negotiate_hw_render(unsafe { &mut *data.cast::<HwRenderCallback>() })
            }
            env::GET_VARIABLE => {
                if data.is_null() {
                    return EnvReply::Done(false);
                }
                let var = unsafe { &mut *data.cast::<Variable>() };
                if var.key.is_null() {
                    return EnvReply::Done(false);
                }
                let key = unsafe { CStr::from_ptr(var.key) }.to_string_lossy();
                match self.variable(&key) {
                    Some(value) => {
                        var.value = value;
                        EnvReply::Done(true)
                    }
                    None => EnvReply::Done(false),
                }
            }
            env::GET_VARIABLE_UPDATE => {
                if !data.is_null() {
                    unsafe { *data.cast::<bool>() = false };
                }
                EnvReply::Done(false)
            }
            env::GET_CAN_DUPE => {
                if data.is_null() {
                    return EnvReply::Done(false);
                }
                unsafe { *data.cast::<bool>() = true };
                EnvReply::Done(true)
            }
            env::SET_MESSAGE => {
                if data.is_null() {
                    return EnvReply::Done(false);
                }
                let message = unsafe { &*data.cast::<Message>() };
                if !message.msg.is_null() {
                    let text = unsafe { CStr::from_ptr(message.msg) }.to_bytes();
                    log::info!(target: "core", "{}", logging::sanitize(text));
                }
                EnvReply::Done(true)
            }
            env::SHUTDOWN => {
                log::info!("core requested shutdown");
                self.shutdown_requested = true;
                EnvReply::Done(true)
            }
            env::GET_INPUT_BITMASKS => EnvReply::Done(true),
            _ => {
                log::debug!(
                    "unhandled environment command {} (0x{cmd:X})",
                    cmd & !env::EXPERIMENTAL
                );
                EnvReply::Done(false)
            }
        }
    }

    fn negotiate_hw_render(&mut self, hw: &mut HwRenderCallback) -> EnvReply {
        let context_type = HwContextType::from_raw(hw.context_type);
        let (profile, major, minor) = match context_type {
            Some(HwContextType::OpenGl) => (GlProfile::Compatibility, hw.version_major, hw.version_minor),
            Some(HwContextType::OpenGlCore) => (GlProfile::Core, hw.version_major, hw.version_minor),
            Some(HwContextType::OpenGlEs2) => (GlProfile::Es, 2, 0),
            Some(HwContextType::OpenGlEs3) => (GlProfile::Es, 3, 0),
            Some(HwContextType::OpenGlEsVersion) => (GlProfile::Es, hw.version_major, hw.version_minor),
            _ => {
                let err = GraphicsError::UnsupportedContext(hw.context_type);
                log::error!("{err}");
                self.graphics_error = Some(err);
                return EnvReply::Done(false);
            }
        };
        // libretro leaves the version at 0.0 when any version will do.
        let (major, minor) = match (profile, major) {
            (GlProfile::Compatibility, 0) => (2, 1),
            (GlProfile::Core, 0) => (3, 3),
            (GlProfile::Es, 0) => (2, 0),
            _ => (major, minor),
        };

        let (max_width, max_height) = self.target_geometry();
        let request = ContextRequest {
            profile,
            major,
            minor,
            max_width,
            max_height,
            depth: hw.depth,
            stencil: hw.stencil,
            debug: hw.debug_context,
            origin: if hw.bottom_left_origin {
                Origin::BottomLeft
            } else {
                Origin::TopLeft
            },
        };

        if let Err(err) = self.video.configure(&request) {
            self.graphics_error = Some(err);
            return EnvReply::Done(false);
        }

        hw.get_current_framebuffer = Some(hw_get_current_framebuffer);
        hw.get_proc_address = Some(hw_get_proc_address);
        self.hw_render = Some(HwRenderNegotiation {
            // Checked above.
            context_type: context_type.unwrap_or(HwContextType::OpenGlCore),
            request,
            context_reset: hw.context_reset,
            context_destroy: hw.context_destroy,
        });

        match hw.context_reset {
            Some(reset) => EnvReply::ContextReady(reset),
            None => EnvReply::Done(true),
        }
    }

    unsafe fn video_refresh(&mut self, data: *const c_void, width: c_uint, height: c_uint, pitch: usize) {
        self.geometry = FrameGeometry {
            width: clamp_dimension(width, self.max_geometry.0),
            height: clamp_dimension(height, self.max_geometry.1),
        };

        if data.is_null() || data == HW_FRAME_BUFFER_VALID || height == 0 {
            return;
        }
        if self.pixel_format != PixelFormat::Xrgb8888 {
            if !self.warned_pixel_format {
                log::warn!("ignoring software frames in {:?}", self.pixel_format);
                self.warned_pixel_format = true;
            }
            return;
        }

        let len = pitch * (height as usize - 1) + width as usize * 4;
        // SAFETY: the core hands over `height` rows of `pitch` bytes; the last row only needs
        // `width` pixels.
        let pixels = unsafe { std::slice::from_raw_parts(data.cast::<u8>(), len) };
        self.video.upload_frame(&SoftwareFrame {
            pixels,
            width: self.geometry.width,
            height: self.geometry.height,
            pitch,
        });
    }
}

/// Unknown max geometry (0) leaves the dimension as reported.
fn clamp_dimension(value: c_uint, max: u32) -> u32 {
    if max == 0 { value } else { value.min(max) }
}

unsafe extern "C" fn environment(cmd: c_uint, data: *mut c_void) -> bool {
    // A repeated SET_HW_RENDER replaces the target, so the core lets go of the old one first.
    if cmd == env::SET_HW_RENDER
        && !data.is_null()
        && let Some(Some(destroy)) = with_host(HostEnvironment::take_hw_render)
    {
        unsafe { destroy() };
    }
    let reply = with_host(|host| unsafe { host.environment(cmd, data) });
    match reply {
        Some(EnvReply::Done(handled)) => handled,
        Some(EnvReply::ContextReady(reset)) => {
            // The core may call back into the host from here.
            unsafe { reset() };
            true
        }
        None => false,
    }
}

unsafe extern "C" fn video_refresh(data: *const c_void, width: c_uint, height: c_uint, pitch: usize) {
    with_host(|host| unsafe { host.video_refresh(data, width, height, pitch) });
}

unsafe extern "C" fn audio_sample(left: i16, right: i16) {
    with_host(|host| host.audio.push(&[left, right]));
}

unsafe extern "C" fn audio_sample_batch(data: *const i16, frames: usize) -> usize {
    if data.is_null() || frames == 0 {
        return 0;
    }
    // SAFETY: `frames` interleaved stereo frames.
    let samples = unsafe { std::slice::from_raw_parts(data, frames * 2) };
    with_host(|host| host.audio.push(samples));
    frames
}

unsafe extern "C" fn input_poll() {}

unsafe extern "C" fn input_state(port: c_uint, device: c_uint, index: c_uint, id: c_uint) -> i16 {
    with_host(|host| host.joypad.query(port, device, index, id)).unwrap_or(0)
}

unsafe extern "C" fn hw_get_current_framebuffer() -> usize {
    with_host(|host| host.video.framebuffer()).unwrap_or(0)
}

unsafe extern "C" fn hw_get_proc_address(sym: *const c_char) -> Option<ProcAddressFn> {
    if sym.is_null() {
        return None;
    }
    let name = unsafe { CStr::from_ptr(sym) };
    let address = with_host(|host| host.video.proc_address(name)).unwrap_or(ptr::null());
    if address.is_null() {
        return None;
    }
    // SAFETY: non-null GL entry point; the core casts it to the real signature.
    Some(unsafe { std::mem::transmute::<*const c_void, ProcAddressFn>(address) })
}

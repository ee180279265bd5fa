use std::cell::{Cell, RefCell};
use std::ffi::{CStr, c_void};
use std::os::raw::{c_char, c_uint};
use std::ptr;
use std::rc::Rc;

use super::*;
use crate::abi::{
    DEVICE_ID_JOYPAD_MASK, DEVICE_JOYPAD, HW_FRAME_BUFFER_VALID, HwContextType, HwRenderCallback,
    LogCallback, Variable, env,
};
use crate::config::Profile;
use crate::error::GraphicsError;
use crate::plugin::HostHooks;
use crate::video::{ContextRequest, FALLBACK_GEOMETRY, GlProfile, Origin, SoftwareFrame};

const PROFILE: &str = r#"{
    "general": { "core": "fake_libretro.so", "game": "games/fake.bin" },
    "dirs": { "save": "saves", "system": "bios" },
    "mouse": { "sensitivity_x": 2.0, "sensitivity_y": 0.5 },
    "vars": { "fake_renderer": "hardware" }
}"#;

/// What the fake core observed, shared with the test.
#[derive(Default)]
struct CoreLog {
    calls: Vec<&'static str>,
    env_replies: Vec<(c_uint, bool)>,
    variables: Vec<(String, Option<String>)>,
    system_dir: Option<String>,
    log_installed: bool,
    preferred_hw: Option<c_uint>,
    can_dupe: Option<bool>,
    input_seen: Vec<i16>,
    context_resets: usize,
    context_destroys: usize,
    fbo_in_reset: Option<usize>,
    proc_in_reset: bool,
}

impl CoreLog {
    fn count(&self, call: &str) -> usize {
        self.calls.iter().filter(|c| **c == call).count()
    }

    fn reply(&self, cmd: c_uint) -> Option<bool> {
        self.env_replies
            .iter()
            .rev()
            .find(|(c, _)| *c == cmd)
            .map(|(_, ok)| *ok)
    }
}

thread_local! {
    static HW_CALLBACK: Cell<*mut HwRenderCallback> = const { Cell::new(ptr::null_mut()) };
    static HW_CORE_LOG: RefCell<Option<Rc<RefCell<CoreLog>>>> = const { RefCell::new(None) };
}

fn with_hw_core_log(f: impl FnOnce(&mut CoreLog)) {
    HW_CORE_LOG.with(|seen| {
        if let Some(seen) = seen.borrow().as_ref() {
            f(&mut seen.borrow_mut());
        }
    });
}

unsafe extern "C" fn fake_context_reset() {
    let hw = HW_CALLBACK.with(Cell::get);
    let (fbo, proc_found) = unsafe {
        let get_fbo = (*hw).get_current_framebuffer.expect("framebuffer hook installed");
        let get_proc = (*hw).get_proc_address.expect("proc address hook installed");
        (get_fbo(), get_proc(c"glClear".as_ptr()).is_some())
    };
    with_hw_core_log(|seen| {
        seen.context_resets += 1;
        seen.fbo_in_reset = Some(fbo);
        seen.proc_in_reset = proc_found;
    });
}

unsafe extern "C" fn fake_context_destroy() {
    with_hw_core_log(|seen| seen.context_destroys += 1);
}

#[derive(Clone)]
struct Behavior {
    pixel_format: Option<c_uint>,
    /// `(context type, major, minor)` requested through `SET_HW_RENDER`.
    hw_context: Option<(c_uint, c_uint, c_uint)>,
    hw_during_load_game: bool,
    variables: Vec<&'static str>,
    query_misc_commands: bool,
    request_shutdown: bool,
    reject_game: bool,
    software_frames: bool,
    max_geometry: (u32, u32),
    game_max_geometry: Option<(u32, u32)>,
}

impl Default for Behavior {
    fn default() -> Self {
        Self {
            pixel_format: Some(1),
            hw_context: None,
            hw_during_load_game: false,
            variables: Vec::new(),
            query_misc_commands: false,
            request_shutdown: false,
            reject_game: false,
            software_frames: false,
            max_geometry: (640, 480),
            game_max_geometry: None,
        }
    }
}

/// In-process core speaking to the host through the real callbacks.
struct FakeCore {
    seen: Rc<RefCell<CoreLog>>,
    behavior: Behavior,
    hooks: Option<HostHooks>,
    hw: Box<HwRenderCallback>,
    game_loaded: bool,
    frames: u64,
    ram: Vec<u8>,
}

impl FakeCore {
    fn new(behavior: Behavior) -> (Box<Self>, Rc<RefCell<CoreLog>>) {
        let seen = Rc::new(RefCell::new(CoreLog::default()));
        let core = Box::new(Self {
            seen: seen.clone(),
            behavior,
            hooks: None,
            hw: Box::new(HwRenderCallback {
                context_type: 0,
                context_reset: None,
                get_current_framebuffer: None,
                get_proc_address: None,
                depth: false,
                stencil: false,
                bottom_left_origin: false,
                version_major: 0,
                version_minor: 0,
                cache_context: false,
                context_destroy: None,
                debug_context: false,
            }),
            game_loaded: false,
            frames: 0,
            ram: vec![0; 64],
        });
        (core, seen)
    }

    fn hooks(&self) -> HostHooks {
        self.hooks.expect("hooks registered before use")
    }

    fn env(&self, cmd: c_uint, data: *mut c_void) -> bool {
        let ok = unsafe { (self.hooks().environment)(cmd, data) };
        self.seen.borrow_mut().env_replies.push((cmd, ok));
        ok
    }

    fn negotiate_hw(&mut self) {
        let Some((context_type, major, minor)) = self.behavior.hw_context else {
            return;
        };
        *self.hw = HwRenderCallback {
            context_type,
            context_reset: Some(fake_context_reset),
            get_current_framebuffer: None,
            get_proc_address: None,
            depth: true,
            stencil: false,
            bottom_left_origin: true,
            version_major: major,
            version_minor: minor,
            cache_context: false,
            context_destroy: Some(fake_context_destroy),
            debug_context: false,
        };
        let hw: *mut HwRenderCallback = &mut *self.hw;
        HW_CALLBACK.with(|cell| cell.set(hw));
        HW_CORE_LOG.with(|seen| *seen.borrow_mut() = Some(self.seen.clone()));
        self.env(env::SET_HW_RENDER, hw.cast());
    }

    fn query_variable(&self, key: &'static str) {
        let key_c = std::ffi::CString::new(key).unwrap();
        let mut var = Variable {
            key: key_c.as_ptr(),
            value: c"untouched".as_ptr(),
        };
        self.env(env::GET_VARIABLE, (&mut var as *mut Variable).cast());
        let value = (!var.value.is_null())
            .then(|| unsafe { CStr::from_ptr(var.value) }.to_string_lossy().into_owned());
        self.seen
            .borrow_mut()
            .variables
            .push((key.to_owned(), value));
    }

    fn query_misc_commands(&self) {
        let mut preferred: c_uint = 0;
        if self.env(env::GET_PREFERRED_HW_RENDER, (&mut preferred as *mut c_uint).cast()) {
            self.seen.borrow_mut().preferred_hw = Some(preferred);
        }
        let mut dupe = false;
        if self.env(env::GET_CAN_DUPE, (&mut dupe as *mut bool).cast()) {
            self.seen.borrow_mut().can_dupe = Some(dupe);
        }
        let mut updated = true;
        self.env(env::GET_VARIABLE_UPDATE, (&mut updated as *mut bool).cast());
        self.env(env::GET_INPUT_BITMASKS, ptr::null_mut());
        self.env(9999, ptr::null_mut());
    }

    fn state_bytes(&self) -> Vec<u8> {
        let mut bytes = self.frames.to_le_bytes().to_vec();
        bytes.extend_from_slice(&self.ram[..8]);
        bytes
    }

    fn geometry(&self) -> (u32, u32) {
        let mode = (self.frames / 30) as u32;
        ([256, 320, 384][mode as usize % 3], 224 + mode * 8)
    }
}

impl Plugin for FakeCore {
    fn register_hooks(&mut self, hooks: &HostHooks) {
        self.seen.borrow_mut().calls.push("register_hooks");
        self.hooks = Some(*hooks);

        // Real cores query these from retro_set_environment.
        let mut log = LogCallback { log: None };
        if self.env(env::GET_LOG_INTERFACE, (&mut log as *mut LogCallback).cast()) {
            self.seen.borrow_mut().log_installed = log.log.is_some();
        }
        let mut dir: *const c_char = ptr::null();
        if self.env(env::GET_SYSTEM_DIRECTORY, (&mut dir as *mut *const c_char).cast()) {
            let dir = unsafe { CStr::from_ptr(dir) }.to_string_lossy().into_owned();
            self.seen.borrow_mut().system_dir = Some(dir);
        }
    }

    fn init(&mut self) {
        self.seen.borrow_mut().calls.push("init");
        if let Some(mut format) = self.behavior.pixel_format {
            self.env(env::SET_PIXEL_FORMAT, (&mut format as *mut c_uint).cast());
        }
        for key in self.behavior.variables.clone() {
            self.query_variable(key);
        }
        if self.behavior.query_misc_commands {
            self.query_misc_commands();
        }
        if self.behavior.request_shutdown {
            self.env(env::SHUTDOWN, ptr::null_mut());
        }
        if !self.behavior.hw_during_load_game {
            self.negotiate_hw();
        }
    }

    fn deinit(&mut self) {
        self.seen.borrow_mut().calls.push("deinit");
    }

    fn api_version(&self) -> Option<u32> {
        Some(API_VERSION)
    }

    fn system_info(&mut self) -> CoreInfo {
        self.seen.borrow_mut().calls.push("system_info");
        CoreInfo {
            library_name: "fake".to_owned(),
            library_version: "1.0".to_owned(),
            valid_extensions: "bin".to_owned(),
            need_fullpath: true,
            block_extract: false,
        }
    }

    fn system_av_info(&mut self) -> AvInfo {
        self.seen.borrow_mut().calls.push("system_av_info");
        let (max_width, max_height) = match self.behavior.game_max_geometry {
            Some(geometry) if self.game_loaded => geometry,
            _ => self.behavior.max_geometry,
        };
        AvInfo {
            base_width: 320,
            base_height: 240,
            max_width,
            max_height,
            aspect_ratio: 4.0 / 3.0,
            fps: 60.0,
            sample_rate: 44_100.0,
        }
    }

    fn set_controller_port_device(&mut self, _port: u32, _device: u32) {
        self.seen.borrow_mut().calls.push("set_controller_port_device");
    }

    fn reset(&mut self) {
        self.seen.borrow_mut().calls.push("reset");
        self.frames = 0;
    }

    fn run(&mut self) {
        self.frames += 1;
        let hooks = self.hooks();
        let (width, height) = self.geometry();

        unsafe {
            (hooks.input_poll)();
            let pressed = (hooks.input_state)(0, DEVICE_JOYPAD, 0, 4);
            let mask = (hooks.input_state)(0, DEVICE_JOYPAD, 0, DEVICE_ID_JOYPAD_MASK);
            self.seen.borrow_mut().input_seen = vec![pressed, mask];

            if self.behavior.software_frames {
                let pitch = width as usize * 4 + 64;
                let pixels = vec![0x40u8; pitch * height as usize];
                (hooks.video_refresh)(pixels.as_ptr().cast(), width, height, pitch);
            } else {
                (hooks.video_refresh)(HW_FRAME_BUFFER_VALID, width, height, 0);
            }

            let samples = [1i16, -1, 2, -2];
            (hooks.audio_sample_batch)(samples.as_ptr(), 2);
            (hooks.audio_sample)(3, -3);
        }
    }

    fn serialize_size(&mut self) -> usize {
        16
    }

    fn serialize(&mut self, buf: &mut [u8]) -> bool {
        if buf.len() != 16 {
            return false;
        }
        buf.copy_from_slice(&self.state_bytes());
        true
    }

    fn unserialize(&mut self, buf: &[u8]) -> bool {
        if buf.len() != 16 {
            return false;
        }
        let mut frames = [0u8; 8];
        frames.copy_from_slice(&buf[..8]);
        self.frames = u64::from_le_bytes(frames);
        self.ram[..8].copy_from_slice(&buf[8..]);
        true
    }

    fn cheat_reset(&mut self) {
        self.seen.borrow_mut().calls.push("cheat_reset");
    }

    fn cheat_set(&mut self, index: u32, enabled: bool, code: &CStr) {
        assert_eq!((index, enabled, code), (3, true, c"ABCD-1234"));
        self.seen.borrow_mut().calls.push("cheat_set");
    }

    fn load_game(&mut self, game: &GameInfo) -> bool {
        self.seen.borrow_mut().calls.push("load_game");
        let path = unsafe { CStr::from_ptr(game.path) }.to_string_lossy().into_owned();
        assert!(game.data.is_null() && game.size == 0);
        if self.behavior.hw_during_load_game {
            self.negotiate_hw();
        }
        if self.behavior.reject_game || path.contains("bad") {
            return false;
        }
        self.game_loaded = true;
        self.ram[0] = 0xAC;
        true
    }

    fn load_game_special(&mut self, _game_type: u32, _games: &[GameInfo]) -> bool {
        false
    }

    fn unload_game(&mut self) {
        self.seen.borrow_mut().calls.push("unload_game");
        self.game_loaded = false;
    }

    fn region(&mut self) -> u32 {
        // PAL
        1
    }

    fn memory(&mut self, id: u32) -> Option<&mut [u8]> {
        (id == MEMORY_SYSTEM_RAM && self.game_loaded).then_some(self.ram.as_mut_slice())
    }
}

extern "C" fn fake_gl_function() {}

struct VideoLog {
    max_version: (u32, u32),
    max_target_width: u32,
    configured: Vec<ContextRequest>,
    current: Option<ContextRequest>,
    uploads: Vec<(u32, u32, usize, u8)>,
    presents: Vec<(u32, u32)>,
    resized: Option<(u32, u32)>,
}

impl Default for VideoLog {
    fn default() -> Self {
        Self {
            max_version: (4, 6),
            max_target_width: u32::MAX,
            configured: Vec::new(),
            current: None,
            uploads: Vec::new(),
            presents: Vec::new(),
            resized: None,
        }
    }
}

struct FakeVideo(Rc<RefCell<VideoLog>>);

impl VideoBackend for FakeVideo {
    fn configure(&mut self, request: &ContextRequest) -> Result<(), GraphicsError> {
        let mut video = self.0.borrow_mut();
        video.configured.push(*request);
        video.current = None;
        if (request.major, request.minor) > video.max_version {
            return Err(GraphicsError::ContextCreation {
                profile: request.profile,
                major: request.major,
                minor: request.minor,
                reason: "no such version".to_owned(),
            });
        }
        if request.max_width > video.max_target_width {
            return Err(GraphicsError::TextureAllocation {
                step: "texture allocation",
                code: 0x0505,
            });
        }
        video.current = Some(*request);
        Ok(())
    }

    fn is_configured(&self) -> bool {
        self.0.borrow().current.is_some()
    }

    fn current_request(&self) -> Option<ContextRequest> {
        self.0.borrow().current
    }

    fn framebuffer(&self) -> usize {
        if self.is_configured() { 7 } else { 0 }
    }

    fn proc_address(&self, _name: &CStr) -> *const c_void {
        if self.is_configured() {
            fake_gl_function as *const c_void
        } else {
            ptr::null()
        }
    }

    fn upload_frame(&mut self, frame: &SoftwareFrame<'_>) {
        self.0.borrow_mut().uploads.push((
            frame.width,
            frame.height,
            frame.pitch,
            frame.pixels[0],
        ));
    }

    fn present(&mut self, render_width: u32, render_height: u32) {
        self.0.borrow_mut().presents.push((render_width, render_height));
    }

    fn resize_display(&mut self, width: u32, height: u32) {
        self.0.borrow_mut().resized = Some((width, height));
    }
}

#[derive(Default)]
struct AudioLog {
    rates: Vec<f64>,
    samples: Vec<i16>,
    flushes: usize,
}

struct FakeAudio(Rc<RefCell<AudioLog>>);

impl AudioSink for FakeAudio {
    fn configure(&mut self, sample_rate: f64) {
        self.0.borrow_mut().rates.push(sample_rate);
    }

    fn push(&mut self, samples: &[i16]) {
        self.0.borrow_mut().samples.extend_from_slice(samples);
    }

    fn flush(&mut self) {
        self.0.borrow_mut().flushes += 1;
    }
}

struct Harness {
    runtime: CoreRuntime,
    video: Rc<RefCell<VideoLog>>,
    audio: Rc<RefCell<AudioLog>>,
}

fn harness() -> Harness {
    let video = Rc::new(RefCell::new(VideoLog::default()));
    let audio = Rc::new(RefCell::new(AudioLog::default()));
    let config: Rc<dyn Config> = Rc::new(Profile::from_json(PROFILE).unwrap());
    let runtime = CoreRuntime::new(
        config,
        Box::new(FakeVideo(video.clone())),
        Box::new(FakeAudio(audio.clone())),
    );
    Harness {
        runtime,
        video,
        audio,
    }
}

fn attach(runtime: &mut CoreRuntime, behavior: Behavior) -> Rc<RefCell<CoreLog>> {
    let (core, seen) = FakeCore::new(behavior);
    runtime.attach(core).unwrap();
    seen
}

fn hw_core(major: c_uint, minor: c_uint) -> Behavior {
    Behavior {
        hw_context: Some((HwContextType::OpenGlCore as c_uint, major, minor)),
        ..Behavior::default()
    }
}

#[cfg(target_os = "linux")]
#[test]
fn module_without_libretro_exports_stays_unloaded() {
    let mut h = harness();
    let err = h.runtime.load("libc.so.6").unwrap_err();

    assert!(matches!(err, CoreError::PluginBind { symbol: "retro_get_system_info" }));
    assert_eq!(h.runtime.state(), RuntimeState::Unloaded);
    assert!(h.runtime.system_info().is_none());
    assert!(h.video.borrow().configured.is_empty());
}

#[test]
fn attach_registers_hooks_before_init() {
    let mut h = harness();
    let seen = attach(&mut h.runtime, Behavior::default());

    let seen = seen.borrow();
    assert_eq!(
        seen.calls,
        ["register_hooks", "init", "system_info", "system_av_info"]
    );
    assert!(seen.log_installed);
    assert_eq!(seen.system_dir.as_deref(), Some("bios"));
    assert_eq!(h.runtime.state(), RuntimeState::Loaded);
    assert_eq!(h.runtime.system_info().unwrap().library_name, "fake");
    assert_eq!(h.runtime.target_fps(), 60.0);
    assert_eq!(h.audio.borrow().rates, [44_100.0]);
}

#[test]
fn second_attach_replaces_the_first_core() {
    let mut h = harness();
    let first = attach(&mut h.runtime, Behavior::default());
    let second = attach(&mut h.runtime, Behavior::default());

    assert_eq!(first.borrow().count("init"), 1);
    assert_eq!(first.borrow().count("deinit"), 1);
    assert_eq!(second.borrow().count("init"), 1);
    assert_eq!(second.borrow().count("deinit"), 0);
    assert_eq!(h.runtime.state(), RuntimeState::Loaded);

    drop(h);
    assert_eq!(second.borrow().count("deinit"), 1);
}

#[test]
fn only_xrgb8888_is_accepted() {
    let mut h = harness();
    let seen = attach(
        &mut h.runtime,
        Behavior {
            pixel_format: Some(2),
            ..Behavior::default()
        },
    );
    assert_eq!(seen.borrow().reply(env::SET_PIXEL_FORMAT), Some(false));
    assert_eq!(h.runtime.pixel_format(), PixelFormat::Argb1555);

    let seen = attach(&mut h.runtime, Behavior::default());
    assert_eq!(seen.borrow().reply(env::SET_PIXEL_FORMAT), Some(true));
    assert_eq!(h.runtime.pixel_format(), PixelFormat::Xrgb8888);
}

#[test]
fn unsupported_gl_version_aborts_load() {
    let mut h = harness();
    let (core, seen) = FakeCore::new(hw_core(9, 9));

    let err = h.runtime.attach(core).unwrap_err();
    assert!(matches!(
        err,
        CoreError::GraphicsConfig(GraphicsError::ContextCreation { major: 9, minor: 9, .. })
    ));
    assert_eq!(h.runtime.state(), RuntimeState::Unloaded);

    let seen = seen.borrow();
    assert_eq!(seen.reply(env::SET_HW_RENDER), Some(false));
    assert_eq!(seen.context_resets, 0);
    assert_eq!(seen.count("deinit"), 1);
    assert_eq!(seen.count("unload_game"), 0);
    assert!(h.video.borrow().current.is_none());
    assert!(h.runtime.hw_render().is_none());
}

#[test]
fn vulkan_context_is_rejected() {
    let mut h = harness();
    let (core, _seen) = FakeCore::new(Behavior {
        hw_context: Some((HwContextType::Vulkan as c_uint, 1, 0)),
        ..Behavior::default()
    });

    let err = h.runtime.attach(core).unwrap_err();
    assert!(matches!(
        err,
        CoreError::GraphicsConfig(GraphicsError::UnsupportedContext(6))
    ));
    assert!(h.video.borrow().configured.is_empty());
}

#[test]
fn hw_negotiation_hands_host_hooks_to_context_reset() {
    let mut h = harness();
    let seen = attach(&mut h.runtime, hw_core(3, 3));

    let seen = seen.borrow();
    assert_eq!(seen.reply(env::SET_HW_RENDER), Some(true));
    assert_eq!(seen.context_resets, 1);
    assert_eq!(seen.fbo_in_reset, Some(7));
    assert!(seen.proc_in_reset);

    // AV info is only queried after init, so the target uses the fallback size.
    let request = h.video.borrow().current.unwrap();
    assert_eq!(request.profile, GlProfile::Core);
    assert_eq!((request.major, request.minor), (3, 3));
    assert_eq!((request.max_width, request.max_height), FALLBACK_GEOMETRY);
    assert_eq!(request.origin, Origin::BottomLeft);
    assert!(request.depth && !request.stencil);

    let negotiation = h.runtime.hw_render().unwrap();
    assert_eq!(negotiation.context_type, HwContextType::OpenGlCore);
}

#[test]
fn gles_requests_map_to_es_profile() {
    let mut h = harness();
    attach(
        &mut h.runtime,
        Behavior {
            hw_context: Some((HwContextType::OpenGlEs3 as c_uint, 0, 0)),
            ..Behavior::default()
        },
    );
    let request = h.video.borrow().current.unwrap();
    assert_eq!(request.profile, GlProfile::Es);
    assert_eq!((request.major, request.minor), (3, 0));
}

#[test]
fn larger_game_geometry_rebuilds_hw_target() {
    let mut h = harness();
    let seen = attach(
        &mut h.runtime,
        Behavior {
            game_max_geometry: Some((1024, 768)),
            ..hw_core(3, 3)
        },
    );

    h.runtime.load_game("games/fake.bin").unwrap();

    assert_eq!(seen.borrow().context_destroys, 1);
    assert_eq!(seen.borrow().context_resets, 2);
    let request = h.video.borrow().current.unwrap();
    assert_eq!((request.max_width, request.max_height), (1024, 768));
    assert_eq!(request.origin, Origin::BottomLeft);
}

#[test]
fn failed_rebuild_drops_the_negotiation() {
    let mut h = harness();
    h.video.borrow_mut().max_target_width = 800;
    let seen = attach(
        &mut h.runtime,
        Behavior {
            game_max_geometry: Some((1024, 768)),
            ..hw_core(3, 3)
        },
    );

    let err = h.runtime.load_game("games/fake.bin").unwrap_err();
    assert!(matches!(
        err,
        CoreError::GraphicsConfig(GraphicsError::TextureAllocation { .. })
    ));
    assert_eq!(h.runtime.state(), RuntimeState::Loaded);
    assert!(h.runtime.hw_render().is_none());
    assert!(h.video.borrow().current.is_none());
    assert_eq!(seen.borrow().count("unload_game"), 1);

    h.runtime.free();
    let seen = seen.borrow();
    assert_eq!(seen.context_resets, 1);
    assert_eq!(seen.context_destroys, 1);
}

#[test]
fn retried_load_game_releases_the_first_hw_context() {
    let mut h = harness();
    let seen = attach(
        &mut h.runtime,
        Behavior {
            hw_during_load_game: true,
            ..hw_core(3, 3)
        },
    );

    assert!(matches!(
        h.runtime.load_game("games/bad.bin"),
        Err(CoreError::GameRejected { .. })
    ));
    assert_eq!(seen.borrow().context_resets, 1);
    assert_eq!(seen.borrow().context_destroys, 0);

    h.runtime.load_game("games/fake.bin").unwrap();
    assert_eq!(seen.borrow().context_resets, 2);
    assert_eq!(seen.borrow().context_destroys, 1);
    assert_eq!(h.video.borrow().configured.len(), 2);
    assert!(h.runtime.hw_render().is_some());

    h.runtime.free();
    assert_eq!(seen.borrow().context_destroys, 2);
}

#[test]
fn hw_negotiated_during_load_game_skips_software_path() {
    let mut h = harness();
    attach(
        &mut h.runtime,
        Behavior {
            hw_during_load_game: true,
            ..hw_core(3, 3)
        },
    );
    assert!(h.video.borrow().configured.is_empty());

    h.runtime.load_game("games/fake.bin").unwrap();

    let video = h.video.borrow();
    assert_eq!(video.configured.len(), 1);
    assert_eq!(video.current.unwrap().max_width, 640);
}

#[test]
fn get_variable_reads_config_without_touching_absent_keys() {
    let mut h = harness();
    let seen = attach(
        &mut h.runtime,
        Behavior {
            variables: vec!["fake_renderer", "fake_missing", "fake_renderer"],
            ..Behavior::default()
        },
    );

    let seen = seen.borrow();
    assert_eq!(
        seen.variables,
        [
            ("fake_renderer".to_owned(), Some("hardware".to_owned())),
            ("fake_missing".to_owned(), Some("untouched".to_owned())),
            ("fake_renderer".to_owned(), Some("hardware".to_owned())),
        ]
    );
    let replies: Vec<bool> = seen
        .env_replies
        .iter()
        .filter(|(cmd, _)| *cmd == env::GET_VARIABLE)
        .map(|(_, ok)| *ok)
        .collect();
    assert_eq!(replies, [true, false, true]);
}

#[test]
fn auxiliary_commands() {
    let mut h = harness();
    let seen = attach(
        &mut h.runtime,
        Behavior {
            query_misc_commands: true,
            ..Behavior::default()
        },
    );

    let seen = seen.borrow();
    assert_eq!(seen.preferred_hw, Some(HwContextType::OpenGlCore as c_uint));
    assert_eq!(seen.can_dupe, Some(true));
    assert_eq!(seen.reply(env::GET_VARIABLE_UPDATE), Some(false));
    assert_eq!(seen.reply(env::GET_INPUT_BITMASKS), Some(true));
    assert_eq!(seen.reply(9999), Some(false));
    assert!(!h.runtime.shutdown_requested());
}

#[test]
fn shutdown_command_sets_flag() {
    let mut h = harness();
    attach(
        &mut h.runtime,
        Behavior {
            request_shutdown: true,
            ..Behavior::default()
        },
    );
    assert!(h.runtime.shutdown_requested());

    h.runtime.free();
    assert!(!h.runtime.shutdown_requested());
}

#[test]
fn load_game_needs_a_loaded_core() {
    let mut h = harness();
    assert!(matches!(
        h.runtime.load_game("games/fake.bin"),
        Err(CoreError::NotInitialized)
    ));
}

#[test]
fn rejected_game_keeps_core_loaded() {
    let mut h = harness();
    attach(&mut h.runtime, Behavior::default());

    let err = h.runtime.load_game("games/bad.bin").unwrap_err();
    assert!(matches!(err, CoreError::GameRejected { .. }));
    assert_eq!(h.runtime.state(), RuntimeState::Loaded);
    assert!(h.video.borrow().configured.is_empty());
}

#[test]
fn software_core_gets_core_33_target_and_uploads() {
    let mut h = harness();
    attach(
        &mut h.runtime,
        Behavior {
            software_frames: true,
            ..Behavior::default()
        },
    );
    h.runtime.load_game("games/fake.bin").unwrap();
    assert_eq!(h.runtime.state(), RuntimeState::GameLoaded);
    assert_eq!(
        h.video.borrow().current,
        Some(ContextRequest::software(640, 480))
    );

    h.runtime.run_frame();
    h.runtime.present();

    assert_eq!(h.runtime.state(), RuntimeState::Running);
    assert_eq!((h.runtime.render_width(), h.runtime.render_height()), (256, 224));
    let video = h.video.borrow();
    assert_eq!(video.uploads, [(256, 224, 256 * 4 + 64, 0x40)]);
    assert_eq!(video.presents, [(256, 224)]);
}

#[test]
fn run_frame_forwards_input_and_audio() {
    let mut h = harness();
    attach(&mut h.runtime, Behavior::default());
    h.runtime.load_game("games/fake.bin").unwrap();

    h.runtime.set_joypad_axis(4, 1);
    h.runtime.run_frame();

    let audio = h.audio.borrow();
    assert_eq!(audio.samples, [1, -1, 2, -2, 3, -3]);
    assert_eq!(audio.flushes, 1);
    // HW sentinel frames are never uploaded.
    assert!(h.video.borrow().uploads.is_empty());
}

#[test]
fn input_state_reports_slot_and_bitmask() {
    let mut h = harness();
    let seen = attach(&mut h.runtime, Behavior::default());
    h.runtime.load_game("games/fake.bin").unwrap();

    h.runtime.set_joypad_axis(4, 1);
    h.runtime.run_frame();
    assert_eq!(seen.borrow().input_seen, [1, 1 << 4]);

    h.runtime.set_joypad_axis(4, 0);
    h.runtime.run_frame();
    assert_eq!(seen.borrow().input_seen, [0, 0]);
}

#[test]
#[should_panic(expected = "run_frame called in state Loaded")]
fn run_frame_without_game_panics() {
    let mut h = harness();
    attach(&mut h.runtime, Behavior::default());
    h.runtime.run_frame();
}

#[test]
#[should_panic(expected = "out of range")]
fn joypad_slot_sixteen_panics() {
    let mut h = harness();
    h.runtime.set_joypad_axis(16, 1);
}

#[test]
fn save_then_load_restores_identical_state() {
    let dir = tempfile::tempdir().unwrap();
    let first = dir.path().join("first.state");
    let second = dir.path().join("second.state");

    let mut h = harness();
    attach(&mut h.runtime, Behavior::default());
    h.runtime.load_game("games/fake.bin").unwrap();
    for _ in 0..10 {
        h.runtime.run_frame();
    }
    h.runtime.save_state(&first).unwrap();

    for _ in 0..5 {
        h.runtime.run_frame();
    }
    h.runtime.load_state(&first).unwrap();
    h.runtime.save_state(&second).unwrap();

    let saved = std::fs::read(&first).unwrap();
    assert_eq!(saved.len(), 16);
    assert_eq!(saved, std::fs::read(&second).unwrap());
    assert_eq!(&saved[..8], &10u64.to_le_bytes());
}

#[test]
fn reload_and_restore_reproduces_render_geometry() {
    let dir = tempfile::tempdir().unwrap();
    let state = dir.path().join("fake.state0");

    let mut h = harness();
    attach(&mut h.runtime, Behavior::default());
    h.runtime.load_game("games/fake.bin").unwrap();
    for _ in 0..60 {
        h.runtime.run_frame();
    }
    let geometry = (h.runtime.render_width(), h.runtime.render_height());
    assert_eq!(geometry, (384, 240));
    h.runtime.save_state(&state).unwrap();

    h.runtime.free();
    assert_eq!(h.runtime.render_width(), 0);

    attach(&mut h.runtime, Behavior::default());
    h.runtime.load_game("games/fake.bin").unwrap();
    h.runtime.load_state(&state).unwrap();
    h.runtime.run_frame();

    assert_eq!(
        (h.runtime.render_width(), h.runtime.render_height()),
        geometry
    );
}

#[test]
fn state_errors() {
    let dir = tempfile::tempdir().unwrap();
    let mut h = harness();

    assert!(matches!(
        h.runtime.save_state(dir.path().join("early.state")),
        Err(CoreError::NotInitialized)
    ));

    attach(&mut h.runtime, Behavior::default());
    h.runtime.load_game("games/fake.bin").unwrap();

    let missing = h.runtime.load_state(dir.path().join("missing.state"));
    assert!(matches!(missing, Err(CoreError::StateIo { .. })));

    let truncated = dir.path().join("truncated.state");
    std::fs::write(&truncated, [1, 2, 3]).unwrap();
    assert!(matches!(
        h.runtime.load_state(&truncated),
        Err(CoreError::StateFormat { .. })
    ));

    let no_dir = dir.path().join("no/such/dir/slot.state");
    assert!(matches!(
        h.runtime.save_state(&no_dir),
        Err(CoreError::StateIo { .. })
    ));
}

#[test]
fn free_tears_down_in_order_and_is_idempotent() {
    let mut h = harness();
    let seen = attach(&mut h.runtime, hw_core(3, 3));
    h.runtime.load_game("games/fake.bin").unwrap();
    h.runtime.run_frame();

    h.runtime.free();
    {
        let seen = seen.borrow();
        assert_eq!(seen.context_destroys, 1);
        assert_eq!(&seen.calls[seen.calls.len() - 2..], ["unload_game", "deinit"]);
    }
    assert_eq!(h.runtime.state(), RuntimeState::Unloaded);
    assert!(h.runtime.av_info().is_none());
    assert!(h.runtime.hw_render().is_none());

    let calls = seen.borrow().calls.len();
    h.runtime.free();
    assert_eq!(seen.borrow().calls.len(), calls);
    assert_eq!(seen.borrow().context_destroys, 1);
}

struct RecordingHook(Rc<RefCell<Vec<(f32, f32, u8)>>>);

impl MemoryHook for RecordingHook {
    fn name(&self) -> &str {
        "recording"
    }

    fn on_mouse_move(&mut self, ram: &mut [u8], dx: f32, dy: f32) {
        self.0.borrow_mut().push((dx, dy, ram[0]));
    }
}

#[test]
fn mouse_motion_reaches_memory_hook_scaled() {
    let moves = Rc::new(RefCell::new(Vec::new()));
    let mut h = harness();
    h.runtime
        .set_memory_hook(Some(Box::new(RecordingHook(moves.clone()))));

    attach(&mut h.runtime, Behavior::default());
    h.runtime.set_mouse_move(1.0, 1.0);
    assert!(moves.borrow().is_empty());

    h.runtime.load_game("games/fake.bin").unwrap();
    h.runtime.set_mouse_move(3.0, 4.0);
    assert_eq!(*moves.borrow(), [(6.0, 2.0, 0xAC)]);
}

#[test]
fn forwarding_operations_reach_the_core() {
    let mut h = harness();
    let seen = attach(&mut h.runtime, Behavior::default());

    h.runtime.reset();
    h.runtime.set_controller_port_device(0, DEVICE_JOYPAD);
    h.runtime.resize_display(1280, 720);

    assert_eq!(seen.borrow().count("reset"), 1);
    assert_eq!(seen.borrow().count("set_controller_port_device"), 1);
    assert_eq!(h.video.borrow().resized, Some((1280, 720)));
}

#[test]
fn cheats_and_region_need_a_game() {
    let mut h = harness();
    let seen = attach(&mut h.runtime, Behavior::default());

    h.runtime.cheat_reset();
    h.runtime.cheat_set(3, true, c"ABCD-1234");
    assert_eq!(h.runtime.region(), None);
    assert_eq!(seen.borrow().count("cheat_reset"), 0);

    h.runtime.load_game("games/fake.bin").unwrap();
    h.runtime.cheat_reset();
    h.runtime.cheat_set(3, true, c"ABCD-1234");
    assert_eq!(h.runtime.region(), Some(1));
    assert_eq!(seen.borrow().count("cheat_reset"), 1);
    assert_eq!(seen.borrow().count("cheat_set"), 1);
}

#[test]
#[should_panic(expected = "already active")]
fn one_active_host_per_thread() {
    let video = Rc::new(RefCell::new(VideoLog::default()));
    let audio = Rc::new(RefCell::new(AudioLog::default()));
    let config: Rc<dyn Config> = Rc::new(Profile::from_json(PROFILE).unwrap());
    let mut first = HostEnvironment::new(
        config.clone(),
        Box::new(FakeVideo(video.clone())),
        Box::new(FakeAudio(audio.clone())),
    );
    let mut second = HostEnvironment::new(
        config,
        Box::new(FakeVideo(video)),
        Box::new(FakeAudio(audio)),
    );

    let _first = ActiveHost::enter(&mut first);
    let _second = ActiveHost::enter(&mut second);
}

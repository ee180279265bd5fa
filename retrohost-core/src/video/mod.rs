//! Video output.
//!
//! - [`VideoBackend`] is what the host environment drives: context negotiation, the render
//!   target the core draws into, software frame upload and presentation.
//! - [`gl::GraphicsContext`] implements it with OpenGL on top of a [`surface::DisplaySurface`].
//! - [`surface`] holds the letterbox math and the per-frame draw.

use std::ffi::CStr;
use std::fmt;
use std::os::raw::c_void;

use crate::error::GraphicsError;

pub mod gl;
pub mod surface;

pub use self::gl::GraphicsContext;
pub use self::surface::{DisplaySurface, Viewport};

/// Geometry used when a core asks for a HW context before reporting its max geometry.
pub const FALLBACK_GEOMETRY: (u32, u32) = (640, 480);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GlProfile {
    Core,
    Compatibility,
    Es,
}

impl fmt::Display for GlProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            GlProfile::Core => "OpenGL core",
            GlProfile::Compatibility => "OpenGL compatibility",
            GlProfile::Es => "OpenGL ES",
        })
    }
}

/// Which texture row holds the top of the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// GL convention; HW-rendered frames.
    BottomLeft,
    /// Memory order; software frames.
    TopLeft,
}

/// Everything needed to (re)build the context and render target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextRequest {
    pub profile: GlProfile,
    pub major: u32,
    pub minor: u32,
    pub max_width: u32,
    pub max_height: u32,
    pub depth: bool,
    pub stencil: bool,
    pub debug: bool,
    pub origin: Origin,
}

impl ContextRequest {
    /// Core 3.3 target for cores that render in software.
    pub fn software(max_width: u32, max_height: u32) -> Self {
        Self {
            profile: GlProfile::Core,
            major: 3,
            minor: 3,
            max_width,
            max_height,
            depth: false,
            stencil: false,
            debug: false,
            origin: Origin::TopLeft,
        }
    }
}

/// An XRGB8888 frame handed over by `video_refresh`.
#[derive(Debug, Clone, Copy)]
pub struct SoftwareFrame<'a> {
    pub pixels: &'a [u8],
    pub width: u32,
    pub height: u32,
    /// Bytes per row in `pixels`.
    pub pitch: usize,
}

pub trait VideoBackend {
    /// Tears down whatever exists and builds a context and render target for `request`.
    ///
    /// On error nothing is left configured.
    fn configure(&mut self, request: &ContextRequest) -> Result<(), GraphicsError>;

    fn is_configured(&self) -> bool;

    /// The request the current target was built from.
    fn current_request(&self) -> Option<ContextRequest>;

    /// Render target FBO, 0 when unconfigured.
    fn framebuffer(&self) -> usize;

    /// GL entry point `name`, null when unknown.
    fn proc_address(&self, name: &CStr) -> *const c_void;

    fn upload_frame(&mut self, frame: &SoftwareFrame<'_>);

    /// Draws the `render_width × render_height` region of the target into the display.
    fn present(&mut self, render_width: u32, render_height: u32);

    fn resize_display(&mut self, width: u32, height: u32);
}

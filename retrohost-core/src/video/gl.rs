//! OpenGL implementation of [`VideoBackend`].
//!
//! The context is owned through a [`DisplaySurface`]. Every `configure` rebuilds the whole
//! pipeline: context, blit program, vertex stream, target texture and FBO. Nothing survives
//! a failed step.

use std::ffi::{CStr, CString};
use std::mem::size_of;
use std::os::raw::c_void;
use std::ptr;

use super::surface::{ATTRIB_POSITION, ATTRIB_TEXCOORD, Blit, DisplaySurface, bind_vertex_attribs};
use super::{ContextRequest, GlProfile, SoftwareFrame, VideoBackend};
use crate::error::GraphicsError;

/// Every GL entry point the pipeline calls, checked after loading.
const GL_FUNCTIONS: &[(&str, fn() -> bool)] = &[
    ("glGetError", gl::GetError::is_loaded),
    ("glGetString", gl::GetString::is_loaded),
    ("glViewport", gl::Viewport::is_loaded),
    ("glClearColor", gl::ClearColor::is_loaded),
    ("glClear", gl::Clear::is_loaded),
    ("glDisable", gl::Disable::is_loaded),
    ("glCreateShader", gl::CreateShader::is_loaded),
    ("glShaderSource", gl::ShaderSource::is_loaded),
    ("glCompileShader", gl::CompileShader::is_loaded),
    ("glGetShaderiv", gl::GetShaderiv::is_loaded),
    ("glGetShaderInfoLog", gl::GetShaderInfoLog::is_loaded),
    ("glDeleteShader", gl::DeleteShader::is_loaded),
    ("glCreateProgram", gl::CreateProgram::is_loaded),
    ("glAttachShader", gl::AttachShader::is_loaded),
    ("glBindAttribLocation", gl::BindAttribLocation::is_loaded),
    ("glLinkProgram", gl::LinkProgram::is_loaded),
    ("glGetProgramiv", gl::GetProgramiv::is_loaded),
    ("glGetProgramInfoLog", gl::GetProgramInfoLog::is_loaded),
    ("glUseProgram", gl::UseProgram::is_loaded),
    ("glGetUniformLocation", gl::GetUniformLocation::is_loaded),
    ("glUniform1i", gl::Uniform1i::is_loaded),
    ("glDeleteProgram", gl::DeleteProgram::is_loaded),
    ("glGenBuffers", gl::GenBuffers::is_loaded),
    ("glBindBuffer", gl::BindBuffer::is_loaded),
    ("glBufferData", gl::BufferData::is_loaded),
    ("glDeleteBuffers", gl::DeleteBuffers::is_loaded),
    ("glEnableVertexAttribArray", gl::EnableVertexAttribArray::is_loaded),
    ("glVertexAttribPointer", gl::VertexAttribPointer::is_loaded),
    ("glGenTextures", gl::GenTextures::is_loaded),
    ("glBindTexture", gl::BindTexture::is_loaded),
    ("glActiveTexture", gl::ActiveTexture::is_loaded),
    ("glTexParameteri", gl::TexParameteri::is_loaded),
    ("glTexImage2D", gl::TexImage2D::is_loaded),
    ("glTexSubImage2D", gl::TexSubImage2D::is_loaded),
    ("glPixelStorei", gl::PixelStorei::is_loaded),
    ("glDeleteTextures", gl::DeleteTextures::is_loaded),
    ("glGenFramebuffers", gl::GenFramebuffers::is_loaded),
    ("glBindFramebuffer", gl::BindFramebuffer::is_loaded),
    ("glFramebufferTexture2D", gl::FramebufferTexture2D::is_loaded),
    ("glCheckFramebufferStatus", gl::CheckFramebufferStatus::is_loaded),
    ("glDeleteFramebuffers", gl::DeleteFramebuffers::is_loaded),
    ("glGenRenderbuffers", gl::GenRenderbuffers::is_loaded),
    ("glBindRenderbuffer", gl::BindRenderbuffer::is_loaded),
    ("glRenderbufferStorage", gl::RenderbufferStorage::is_loaded),
    ("glFramebufferRenderbuffer", gl::FramebufferRenderbuffer::is_loaded),
    ("glDeleteRenderbuffers", gl::DeleteRenderbuffers::is_loaded),
    ("glDrawArrays", gl::DrawArrays::is_loaded),
];

/// Only resolved for GL 3.0+ and GLES3, where vertex array objects are core.
const VERTEX_ARRAY_FUNCTIONS: &[(&str, fn() -> bool)] = &[
    ("glGenVertexArrays", gl::GenVertexArrays::is_loaded),
    ("glBindVertexArray", gl::BindVertexArray::is_loaded),
    ("glDeleteVertexArrays", gl::DeleteVertexArrays::is_loaded),
];

/// GLSL flavour of the blit shaders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ShaderDialect {
    Glsl330,
    Glsl150,
    Glsl130,
    Glsl120,
    Essl300,
    Essl100,
}

const VS_MODERN: &str = "in vec2 position;
in vec2 texcoord;
out vec2 uv;
void main() {
    uv = texcoord;
    gl_Position = vec4(position, 0.0, 1.0);
}
";

const FS_MODERN: &str = "in vec2 uv;
out vec4 color;
uniform sampler2D frame;
void main() {
    color = vec4(texture(frame, uv).rgb, 1.0);
}
";

const VS_LEGACY: &str = "attribute vec2 position;
attribute vec2 texcoord;
varying vec2 uv;
void main() {
    uv = texcoord;
    gl_Position = vec4(position, 0.0, 1.0);
}
";

const FS_LEGACY: &str = "varying vec2 uv;
uniform sampler2D frame;
void main() {
    gl_FragColor = vec4(texture2D(frame, uv).rgb, 1.0);
}
";

impl ShaderDialect {
    fn for_request(profile: GlProfile, major: u32, minor: u32) -> Self {
        match profile {
            GlProfile::Es if major >= 3 => Self::Essl300,
            GlProfile::Es => Self::Essl100,
            _ if (major, minor) >= (3, 3) => Self::Glsl330,
            _ if (major, minor) == (3, 2) => Self::Glsl150,
            _ if major == 3 => Self::Glsl130,
            _ => Self::Glsl120,
        }
    }

    fn header(self) -> &'static str {
        match self {
            Self::Glsl330 => "#version 330 core\n",
            Self::Glsl150 => "#version 150 core\n",
            Self::Glsl130 => "#version 130\n",
            Self::Glsl120 => "#version 120\n",
            Self::Essl300 => "#version 300 es\n",
            Self::Essl100 => "#version 100\n",
        }
    }

    fn legacy(self) -> bool {
        matches!(self, Self::Glsl120 | Self::Essl100)
    }

    /// GL 2.1 and GLES2 draw from plain buffers.
    fn uses_vertex_arrays(self) -> bool {
        !self.legacy()
    }

    fn sources(self) -> (String, String) {
        let precision = match self {
            Self::Essl300 | Self::Essl100 => "precision mediump float;\n",
            _ => "",
        };
        let (vs, fs) = if self.legacy() {
            (VS_LEGACY, FS_LEGACY)
        } else {
            (VS_MODERN, FS_MODERN)
        };
        (
            format!("{}{vs}", self.header()),
            format!("{}{precision}{fs}", self.header()),
        )
    }
}

/// Texture + FBO the core renders into, plus the objects that blit it.
#[derive(Debug, Default)]
struct RenderTarget {
    blit: Blit,
    fbo: u32,
    renderbuffers: Vec<u32>,
}

impl RenderTarget {
    /// Deletes every object created so far. Needs the owning context current.
    unsafe fn release(&mut self) {
        unsafe {
            if self.fbo != 0 {
                gl::DeleteFramebuffers(1, &self.fbo);
            }
            for renderbuffer in &self.renderbuffers {
                gl::DeleteRenderbuffers(1, renderbuffer);
            }
            if self.blit.texture != 0 {
                gl::DeleteTextures(1, &self.blit.texture);
            }
            if self.blit.vbo != 0 {
                gl::DeleteBuffers(1, &self.blit.vbo);
            }
            if self.blit.vao != 0 {
                gl::DeleteVertexArrays(1, &self.blit.vao);
            }
            if self.blit.program != 0 {
                gl::DeleteProgram(self.blit.program);
            }
        }
        *self = Self::default();
    }
}

/// GL context, render target and presentation for one display.
pub struct GraphicsContext<S: DisplaySurface> {
    surface: S,
    target: Option<RenderTarget>,
    request: Option<ContextRequest>,
    has_context: bool,
}

impl<S: DisplaySurface> GraphicsContext<S> {
    pub fn new(surface: S) -> Self {
        Self {
            surface,
            target: None,
            request: None,
            has_context: false,
        }
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    fn teardown(&mut self) {
        if let Some(mut target) = self.target.take() {
            unsafe { target.release() };
        }
        self.request = None;
        if self.has_context {
            self.surface.destroy_context();
            self.has_context = false;
        }
    }

    fn build(
        &mut self,
        request: &ContextRequest,
        target: &mut RenderTarget,
    ) -> Result<(), GraphicsError> {
        self.surface
            .create_context(request.profile, request.major, request.minor, request.debug)
            .map_err(|err| GraphicsError::ContextCreation {
                profile: request.profile,
                major: request.major,
                minor: request.minor,
                reason: format!("{err:#}"),
            })?;
        self.has_context = true;

        let surface = &self.surface;
        gl::load_with(|name| match CString::new(name) {
            Ok(name) => surface.proc_address(&name),
            Err(_) => ptr::null(),
        });
        let dialect = ShaderDialect::for_request(request.profile, request.major, request.minor);
        let optional: &[_] = if dialect.uses_vertex_arrays() {
            VERTEX_ARRAY_FUNCTIONS
        } else {
            &[]
        };
        if let Some((name, _)) = GL_FUNCTIONS
            .iter()
            .chain(optional)
            .find(|(_, is_loaded)| !is_loaded())
        {
            return Err(GraphicsError::FunctionResolution(name));
        }

        unsafe {
            drain_gl_errors();
            build_program(dialect, &mut target.blit)?;
            build_vertex_stream(dialect, &mut target.blit)?;
            build_texture(request, &mut target.blit)?;
            build_framebuffer(request, target)?;
        }

        target.blit.max_width = request.max_width;
        target.blit.max_height = request.max_height;
        target.blit.origin = Some(request.origin);
        Ok(())
    }
}

impl<S: DisplaySurface> VideoBackend for GraphicsContext<S> {
    fn configure(&mut self, request: &ContextRequest) -> Result<(), GraphicsError> {
        self.teardown();

        let mut target = RenderTarget::default();
        match self.build(request, &mut target) {
            Ok(()) => {
                log::info!(
                    "configured OpenGL {} on {} ({}x{})",
                    gl_string(gl::VERSION),
                    gl_string(gl::RENDERER),
                    request.max_width,
                    request.max_height
                );
                self.target = Some(target);
                self.request = Some(*request);
                Ok(())
            }
            Err(err) => {
                log::error!("OpenGL configuration failed: {err}");
                unsafe {
                    target.release();
                    if gl::BindFramebuffer::is_loaded() && self.has_context {
                        gl::BindFramebuffer(gl::FRAMEBUFFER, 0);
                    }
                }
                self.teardown();
                Err(err)
            }
        }
    }

    fn is_configured(&self) -> bool {
        self.target.is_some()
    }

    fn current_request(&self) -> Option<ContextRequest> {
        self.request
    }

    fn framebuffer(&self) -> usize {
        self.target.as_ref().map_or(0, |target| target.fbo as usize)
    }

    fn proc_address(&self, name: &CStr) -> *const c_void {
        if !self.has_context {
            return ptr::null();
        }
        self.surface.proc_address(name)
    }

    fn upload_frame(&mut self, frame: &SoftwareFrame<'_>) {
        let Some(target) = &self.target else {
            return;
        };
        let width = frame.width.min(target.blit.max_width);
        let height = frame.height.min(target.blit.max_height);
        if width == 0 || height == 0 || frame.pitch % 4 != 0 {
            return;
        }
        let needed = frame.pitch * (height as usize - 1) + width as usize * 4;
        if frame.pixels.len() < needed {
            log::warn!(
                "dropping {}x{} frame: {} bytes, need {needed}",
                frame.width,
                frame.height,
                frame.pixels.len()
            );
            return;
        }

        unsafe {
            gl::BindTexture(gl::TEXTURE_2D, target.blit.texture);
            gl::PixelStorei(gl::UNPACK_ALIGNMENT, 4);
            gl::PixelStorei(gl::UNPACK_ROW_LENGTH, (frame.pitch / 4) as i32);
            gl::TexSubImage2D(
                gl::TEXTURE_2D,
                0,
                0,
                0,
                width as i32,
                height as i32,
                gl::BGRA,
                gl::UNSIGNED_INT_8_8_8_8_REV,
                frame.pixels.as_ptr().cast(),
            );
            gl::PixelStorei(gl::UNPACK_ROW_LENGTH, 0);
            gl::BindTexture(gl::TEXTURE_2D, 0);
        }
    }

    fn present(&mut self, render_width: u32, render_height: u32) {
        if let Some(target) = &self.target {
            target.blit.present(&mut self.surface, render_width, render_height);
        }
    }

    fn resize_display(&mut self, width: u32, height: u32) {
        self.surface.resize(width, height);
    }
}

impl<S: DisplaySurface> Drop for GraphicsContext<S> {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn gl_string(name: u32) -> String {
    unsafe {
        let ptr = gl::GetString(name);
        if ptr.is_null() {
            return "unknown".to_owned();
        }
        CStr::from_ptr(ptr.cast()).to_string_lossy().into_owned()
    }
}

unsafe fn drain_gl_errors() {
    // Bounded: a lost context can report errors forever.
    for _ in 0..32 {
        if unsafe { gl::GetError() } == gl::NO_ERROR {
            break;
        }
    }
}

fn gl_error() -> Option<u32> {
    match unsafe { gl::GetError() } {
        gl::NO_ERROR => None,
        code => Some(code),
    }
}

unsafe fn shader_log(shader: u32) -> String {
    unsafe {
        let mut len = 0;
        gl::GetShaderiv(shader, gl::INFO_LOG_LENGTH, &mut len);
        let mut buffer = vec![0u8; len.max(1) as usize];
        let mut written = 0;
        gl::GetShaderInfoLog(shader, len, &mut written, buffer.as_mut_ptr().cast());
        buffer.truncate(written.max(0) as usize);
        String::from_utf8_lossy(&buffer).trim_end().to_owned()
    }
}

unsafe fn program_log(program: u32) -> String {
    unsafe {
        let mut len = 0;
        gl::GetProgramiv(program, gl::INFO_LOG_LENGTH, &mut len);
        let mut buffer = vec![0u8; len.max(1) as usize];
        let mut written = 0;
        gl::GetProgramInfoLog(program, len, &mut written, buffer.as_mut_ptr().cast());
        buffer.truncate(written.max(0) as usize);
        String::from_utf8_lossy(&buffer).trim_end().to_owned()
    }
}

unsafe fn compile_shader(kind: u32, stage: &'static str, src: &str) -> Result<u32, GraphicsError> {
    let source = CString::new(src).map_err(|_| GraphicsError::ShaderCompile {
        stage,
        log: "source contains a NUL byte".to_owned(),
    })?;
    unsafe {
        let shader = gl::CreateShader(kind);
        gl::ShaderSource(shader, 1, &source.as_ptr(), ptr::null());
        gl::CompileShader(shader);

        let mut success = 0;
        gl::GetShaderiv(shader, gl::COMPILE_STATUS, &mut success);
        if success == 0 {
            let log = shader_log(shader);
            gl::DeleteShader(shader);
            return Err(GraphicsError::ShaderCompile { stage, log });
        }
        Ok(shader)
    }
}

unsafe fn build_program(dialect: ShaderDialect, blit: &mut Blit) -> Result<(), GraphicsError> {
    let (vs_src, fs_src) = dialect.sources();
    unsafe {
        let vs = compile_shader(gl::VERTEX_SHADER, "vertex", &vs_src)?;
        let fs = match compile_shader(gl::FRAGMENT_SHADER, "fragment", &fs_src) {
            Ok(fs) => fs,
            Err(err) => {
                gl::DeleteShader(vs);
                return Err(err);
            }
        };

        let program = gl::CreateProgram();
        blit.program = program;
        gl::AttachShader(program, vs);
        gl::AttachShader(program, fs);
        gl::BindAttribLocation(program, ATTRIB_POSITION, c"position".as_ptr());
        gl::BindAttribLocation(program, ATTRIB_TEXCOORD, c"texcoord".as_ptr());
        gl::LinkProgram(program);
        gl::DeleteShader(vs);
        gl::DeleteShader(fs);

        let mut success = 0;
        gl::GetProgramiv(program, gl::LINK_STATUS, &mut success);
        if success == 0 {
            return Err(GraphicsError::ProgramLink(program_log(program)));
        }

        gl::UseProgram(program);
        gl::Uniform1i(gl::GetUniformLocation(program, c"frame".as_ptr()), 0);
        gl::UseProgram(0);
    }
    Ok(())
}

unsafe fn build_vertex_stream(dialect: ShaderDialect, blit: &mut Blit) -> Result<(), GraphicsError> {
    unsafe {
        if dialect.uses_vertex_arrays() {
            gl::GenVertexArrays(1, &mut blit.vao);
            gl::BindVertexArray(blit.vao);
        }
        gl::GenBuffers(1, &mut blit.vbo);
        gl::BindBuffer(gl::ARRAY_BUFFER, blit.vbo);
        gl::BufferData(
            gl::ARRAY_BUFFER,
            (24 * size_of::<f32>()) as isize,
            ptr::null(),
            gl::STREAM_DRAW,
        );
        if blit.vao != 0 {
            bind_vertex_attribs();
            gl::BindVertexArray(0);
        }
        gl::BindBuffer(gl::ARRAY_BUFFER, 0);
    }
    match gl_error() {
        Some(code) => Err(GraphicsError::BufferSetup(code)),
        None => Ok(()),
    }
}

/// Upscaled frames stay sharp.
const TARGET_SAMPLING: [(u32, u32); 4] = [
    (gl::TEXTURE_MIN_FILTER, gl::LINEAR),
    (gl::TEXTURE_MAG_FILTER, gl::NEAREST),
    (gl::TEXTURE_WRAP_S, gl::CLAMP_TO_EDGE),
    (gl::TEXTURE_WRAP_T, gl::CLAMP_TO_EDGE),
];

unsafe fn build_texture(request: &ContextRequest, blit: &mut Blit) -> Result<(), GraphicsError> {
    // GLES2 requires internal format == format.
    let internal_format = if request.profile == GlProfile::Es && request.major < 3 {
        gl::RGBA
    } else {
        gl::RGBA8
    };
    unsafe {
        gl::GenTextures(1, &mut blit.texture);
        gl::BindTexture(gl::TEXTURE_2D, blit.texture);
        for (name, value) in TARGET_SAMPLING {
            gl::TexParameteri(gl::TEXTURE_2D, name, value as i32);
        }
        gl::TexImage2D(
            gl::TEXTURE_2D,
            0,
            internal_format as i32,
            request.max_width as i32,
            request.max_height as i32,
            0,
            gl::RGBA,
            gl::UNSIGNED_BYTE,
            ptr::null(),
        );
        gl::BindTexture(gl::TEXTURE_2D, 0);
    }
    match gl_error() {
        Some(code) => Err(GraphicsError::TextureAllocation {
            step: "texture allocation",
            code,
        }),
        None => Ok(()),
    }
}

/// `(internal format, attachment)` of each renderbuffer behind the core's depth/stencil
/// request. GLES2 has neither 24-bit depth nor packed depth-stencil in core.
fn depth_stencil_storage(request: &ContextRequest) -> &'static [(u32, u32)] {
    let es2 = request.profile == GlProfile::Es && request.major < 3;
    match (request.depth, request.stencil, es2) {
        (_, true, false) => &[(gl::DEPTH24_STENCIL8, gl::DEPTH_STENCIL_ATTACHMENT)],
        (true, false, false) => &[(gl::DEPTH_COMPONENT24, gl::DEPTH_ATTACHMENT)],
        (true, true, true) => &[
            (gl::DEPTH_COMPONENT16, gl::DEPTH_ATTACHMENT),
            (gl::STENCIL_INDEX8, gl::STENCIL_ATTACHMENT),
        ],
        (true, false, true) => &[(gl::DEPTH_COMPONENT16, gl::DEPTH_ATTACHMENT)],
        (false, true, true) => &[(gl::STENCIL_INDEX8, gl::STENCIL_ATTACHMENT)],
        (false, false, _) => &[],
    }
}

unsafe fn build_framebuffer(
    request: &ContextRequest,
    target: &mut RenderTarget,
) -> Result<(), GraphicsError> {
    unsafe {
        gl::GenFramebuffers(1, &mut target.fbo);
        gl::BindFramebuffer(gl::FRAMEBUFFER, target.fbo);
        gl::FramebufferTexture2D(
            gl::FRAMEBUFFER,
            gl::COLOR_ATTACHMENT0,
            gl::TEXTURE_2D,
            target.blit.texture,
            0,
        );

        for &(format, attachment) in depth_stencil_storage(request) {
            let mut renderbuffer = 0;
            gl::GenRenderbuffers(1, &mut renderbuffer);
            target.renderbuffers.push(renderbuffer);
            gl::BindRenderbuffer(gl::RENDERBUFFER, renderbuffer);
            gl::RenderbufferStorage(
                gl::RENDERBUFFER,
                format,
                request.max_width as i32,
                request.max_height as i32,
            );
            gl::FramebufferRenderbuffer(gl::FRAMEBUFFER, attachment, gl::RENDERBUFFER, renderbuffer);
            gl::BindRenderbuffer(gl::RENDERBUFFER, 0);
            if let Some(code) = gl_error() {
                gl::BindFramebuffer(gl::FRAMEBUFFER, 0);
                return Err(GraphicsError::TextureAllocation {
                    step: "depth/stencil allocation",
                    code,
                });
            }
        }

        let status = gl::CheckFramebufferStatus(gl::FRAMEBUFFER);
        if status != gl::FRAMEBUFFER_COMPLETE {
            gl::BindFramebuffer(gl::FRAMEBUFFER, 0);
            return Err(GraphicsError::FramebufferIncomplete(status));
        }

        gl::ClearColor(0.0, 0.0, 0.0, 1.0);
        gl::Clear(gl::COLOR_BUFFER_BIT);
        gl::BindFramebuffer(gl::FRAMEBUFFER, 0);
    }
    Ok(())
}

//! Presentation: letterboxing the render target into the display.

use std::ffi::CStr;
use std::os::raw::c_void;

use super::{GlProfile, Origin};

/// The window-system side of the GL context.
pub trait DisplaySurface {
    /// Creates a context and makes it current on the display.
    fn create_context(
        &mut self,
        profile: GlProfile,
        major: u32,
        minor: u32,
        debug: bool,
    ) -> anyhow::Result<()>;

    fn destroy_context(&mut self);

    fn proc_address(&self, name: &CStr) -> *const c_void;

    /// Drawable size in pixels.
    fn size(&self) -> (u32, u32);

    fn resize(&mut self, width: u32, height: u32);

    fn swap_buffers(&mut self) -> anyhow::Result<()>;
}

/// Destination rectangle in window pixels, origin top-left.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// Largest rectangle with the render aspect ratio that fits the display, centred.
pub fn letterbox(
    display_width: u32,
    display_height: u32,
    render_width: u32,
    render_height: u32,
) -> Viewport {
    let (ww, wh) = (display_width as f32, display_height as f32);
    let window_ratio = ww / wh;
    let render_ratio = render_width as f32 / render_height as f32;

    if window_ratio > render_ratio {
        let width = wh * render_ratio;
        Viewport {
            x: (ww - width) / 2.0,
            y: 0.0,
            width,
            height: wh,
        }
    } else {
        let height = ww / render_ratio;
        Viewport {
            x: 0.0,
            y: (wh - height) / 2.0,
            width: ww,
            height,
        }
    }
}

/// Two triangles of `(x, y, u, v)` covering `view` in clip space.
///
/// `u`/`v` is the used fraction of the target texture. With a bottom-left origin the top edge
/// samples at `v`; with a top-left origin it samples at 0.
pub fn quad(
    display: (u32, u32),
    view: Viewport,
    u: f32,
    v: f32,
    origin: Origin,
) -> [f32; 24] {
    let (ww, wh) = (display.0 as f32, display.1 as f32);
    let l = view.x / ww * 2.0 - 1.0;
    let t = 1.0 - view.y / wh * 2.0;
    let r = l + view.width / ww * 2.0;
    let b = t - view.height / wh * 2.0;

    let (vt, vb) = match origin {
        Origin::BottomLeft => (v, 0.0),
        Origin::TopLeft => (0.0, v),
    };

    #[rustfmt::skip]
    let vertices = [
        l, t, 0.0, vt,
        r, t, u,   vt,
        r, b, u,   vb,
        l, t, 0.0, vt,
        r, b, u,   vb,
        l, b, 0.0, vb,
    ];
    vertices
}

pub(crate) const ATTRIB_POSITION: u32 = 0;
pub(crate) const ATTRIB_TEXCOORD: u32 = 1;

/// Points the blit attributes at the bound `ARRAY_BUFFER` of interleaved `[x, y, u, v]`.
pub(crate) unsafe fn bind_vertex_attribs() {
    let stride = (4 * std::mem::size_of::<f32>()) as i32;
    unsafe {
        gl::EnableVertexAttribArray(ATTRIB_POSITION);
        gl::VertexAttribPointer(ATTRIB_POSITION, 2, gl::FLOAT, gl::FALSE, stride, std::ptr::null());
        gl::EnableVertexAttribArray(ATTRIB_TEXCOORD);
        gl::VertexAttribPointer(
            ATTRIB_TEXCOORD,
            2,
            gl::FLOAT,
            gl::FALSE,
            stride,
            (2 * std::mem::size_of::<f32>()) as *const c_void,
        );
    }
}

/// GL objects used to draw the target into the default framebuffer.
#[derive(Debug, Default)]
pub(crate) struct Blit {
    pub program: u32,
    /// 0 on GL 2.1 and GLES2, which have no core vertex array objects.
    pub vao: u32,
    pub vbo: u32,
    pub texture: u32,
    pub max_width: u32,
    pub max_height: u32,
    pub origin: Option<Origin>,
}

impl Blit {
    /// Clears the display, draws the letterboxed frame and swaps.
    ///
    /// With nothing to draw (zero render or display size) the display is still cleared and
    /// swapped.
    pub fn present<S: DisplaySurface>(&self, surface: &mut S, render_width: u32, render_height: u32) {
        let (dw, dh) = surface.size();

        unsafe {
            gl::BindFramebuffer(gl::FRAMEBUFFER, 0);
            gl::Disable(gl::DEPTH_TEST);
            gl::Disable(gl::STENCIL_TEST);
            gl::Disable(gl::SCISSOR_TEST);
            gl::Disable(gl::BLEND);
            gl::Disable(gl::CULL_FACE);
            gl::Viewport(0, 0, dw as i32, dh as i32);
            gl::ClearColor(0.0, 0.0, 0.0, 1.0);
            gl::Clear(gl::COLOR_BUFFER_BIT);
        }

        let drawable = render_width > 0
            && render_height > 0
            && dw > 0
            && dh > 0
            && self.max_width > 0
            && self.max_height > 0;

        if drawable {
            let view = letterbox(dw, dh, render_width, render_height);
            let u = render_width as f32 / self.max_width as f32;
            let v = render_height as f32 / self.max_height as f32;
            let vertices = quad(
                (dw, dh),
                view,
                u,
                v,
                self.origin.unwrap_or(Origin::TopLeft),
            );

            unsafe {
                gl::UseProgram(self.program);
                if self.vao != 0 {
                    gl::BindVertexArray(self.vao);
                }
                gl::BindBuffer(gl::ARRAY_BUFFER, self.vbo);
                gl::BufferData(
                    gl::ARRAY_BUFFER,
                    std::mem::size_of_val(&vertices) as isize,
                    vertices.as_ptr().cast(),
                    gl::STREAM_DRAW,
                );
                if self.vao == 0 {
                    bind_vertex_attribs();
                }
                gl::ActiveTexture(gl::TEXTURE0);
                gl::BindTexture(gl::TEXTURE_2D, self.texture);
                gl::DrawArrays(gl::TRIANGLES, 0, 6);
                if self.vao != 0 {
                    gl::BindVertexArray(0);
                }
                gl::BindBuffer(gl::ARRAY_BUFFER, 0);
                gl::UseProgram(0);
            }
        }

        if let Err(err) = surface.swap_buffers() {
            log::warn!("failed to swap display buffers: {err:#}");
        }
    }
}

//! glutin display for the core's GL context.

use std::ffi::CStr;
use std::num::NonZeroU32;
use std::os::raw::c_void;
use std::rc::Rc;

use anyhow::{Context, anyhow};
use glutin::config::{Config, ConfigTemplateBuilder};
use glutin::context::{ContextApi, ContextAttributesBuilder, PossiblyCurrentContext, Version};
use glutin::display::GetGlDisplay;
use glutin::prelude::*;
use glutin::surface::{Surface, SurfaceAttributesBuilder, SwapInterval, WindowSurface};
use glutin_winit::DisplayBuilder;
use retrohost_core::video::{DisplaySurface, GlProfile};
use winit::event_loop::ActiveEventLoop;
use winit::raw_window_handle::HasWindowHandle;
use winit::window::{Window, WindowAttributes};

fn non_zero(value: u32) -> NonZeroU32 {
    NonZeroU32::new(value).unwrap_or(NonZeroU32::MIN)
}

/// A window surface whose context is created on demand, at the version the core asks for.
pub struct GlutinSurface {
    context: Option<PossiblyCurrentContext>,
    surface: Surface<WindowSurface>,
    config: Config,
    window: Rc<Window>,
}

impl GlutinSurface {
    pub fn new(event_loop: &ActiveEventLoop, attributes: WindowAttributes) -> anyhow::Result<Self> {
        let template = ConfigTemplateBuilder::new()
            .with_depth_size(24)
            .with_stencil_size(8);
        let (window, config) = DisplayBuilder::new()
            .with_window_attributes(Some(attributes))
            .build(event_loop, template, |configs| {
                configs
                    .reduce(|best, config| {
                        if config.num_samples() < best.num_samples() {
                            config
                        } else {
                            best
                        }
                    })
                    .expect("glutin offers at least one config")
            })
            .map_err(|err| anyhow!("failed to create window: {err}"))?;
        let window = Rc::new(window.context("display builder returned no window")?);

        let size = window.inner_size();
        let attrs = SurfaceAttributesBuilder::<WindowSurface>::new().build(
            window.window_handle()?.as_raw(),
            non_zero(size.width),
            non_zero(size.height),
        );
        let surface = unsafe { config.display().create_window_surface(&config, &attrs)? };

        Ok(Self {
            context: None,
            surface,
            config,
            window,
        })
    }

    pub fn window(&self) -> Rc<Window> {
        self.window.clone()
    }
}

impl DisplaySurface for GlutinSurface {
    fn create_context(
        &mut self,
        profile: GlProfile,
        major: u32,
        minor: u32,
        debug: bool,
    ) -> anyhow::Result<()> {
        let version = Version::new(u8::try_from(major)?, u8::try_from(minor)?);
        let mut builder = ContextAttributesBuilder::new().with_debug(debug);
        builder = match profile {
            GlProfile::Core => builder
                .with_context_api(ContextApi::OpenGl(Some(version)))
                .with_profile(glutin::context::GlProfile::Core),
            GlProfile::Compatibility => builder
                .with_context_api(ContextApi::OpenGl(Some(version)))
                .with_profile(glutin::context::GlProfile::Compatibility),
            GlProfile::Es => builder.with_context_api(ContextApi::Gles(Some(version))),
        };
        let attributes = builder.build(Some(self.window.window_handle()?.as_raw()));

        let context = unsafe {
            self.config
                .display()
                .create_context(&self.config, &attributes)?
        };
        let context = context.make_current(&self.surface)?;
        if let Err(err) = self
            .surface
            .set_swap_interval(&context, SwapInterval::Wait(NonZeroU32::MIN))
        {
            log::warn!("vsync unavailable: {err}");
        }
        self.context = Some(context);
        Ok(())
    }

    fn destroy_context(&mut self) {
        if let Some(context) = self.context.take()
            && let Err(err) = context.make_not_current()
        {
            log::warn!("failed to release GL context: {err}");
        }
    }

    fn proc_address(&self, name: &CStr) -> *const c_void {
        self.config.display().get_proc_address(name)
    }

    fn size(&self) -> (u32, u32) {
        let size = self.window.inner_size();
        (size.width, size.height)
    }

    fn resize(&mut self, width: u32, height: u32) {
        if let Some(context) = &self.context {
            self.surface
                .resize(context, non_zero(width), non_zero(height));
        }
    }

    fn swap_buffers(&mut self) -> anyhow::Result<()> {
        let context = self.context.as_ref().context("no GL context")?;
        self.surface.swap_buffers(context)?;
        Ok(())
    }
}

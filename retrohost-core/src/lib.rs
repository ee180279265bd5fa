//! retrohost-core: the host side of libretro.
//!
//! This crate loads a libretro core from a shared library and drives it:
//! - The core's exports are bound once by [`plugin::DynamicPlugin`].
//! - The core calls back into the host through the trampolines in `host`.
//! - Frames land in an OpenGL render target owned by [`video::GraphicsContext`], which is
//!   generic over the windowing layer ([`video::DisplaySurface`]).
//! - [`CoreRuntime`] ties it together and owns the load/run/save/free lifecycle.
//!
//! Windowing, audio output and key mapping live in the `retrohost` binary.

pub mod abi;
pub mod audio;
pub mod autosave;
pub mod config;
mod error;
pub mod hacks;
mod host;
pub mod input;
pub mod plugin;
mod runtime;
pub mod video;

pub use error::{CoreError, GraphicsError};
pub use host::{FrameGeometry, HostEnvironment, HwRenderNegotiation};
pub use runtime::{CoreRuntime, RuntimeState};

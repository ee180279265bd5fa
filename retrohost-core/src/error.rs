use std::path::PathBuf;

use thiserror::Error;

use crate::video::GlProfile;

/// Errors returned by [`CoreRuntime`](crate::CoreRuntime) operations.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("failed to load core module \"{}\": {source}", path.display())]
    ModuleLoad {
        path: PathBuf,
        #[source]
        source: libloading::Error,
    },

    #[error("core does not implement {symbol}()")]
    PluginBind { symbol: &'static str },

    #[error("no core loaded")]
    NotInitialized,

    #[error("core rejected game \"{}\"", path.display())]
    GameRejected { path: PathBuf },

    #[error("graphics configuration failed: {0}")]
    GraphicsConfig(#[from] GraphicsError),

    #[error("state file \"{}\": {source}", path.display())]
    StateIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("core rejected state data for \"{}\"", path.display())]
    StateFormat { path: PathBuf },
}

/// A failed step of GL context negotiation or render-target setup.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphicsError {
    #[error("unsupported hardware context type {0}")]
    UnsupportedContext(u32),

    #[error("could not create {profile} {major}.{minor} context: {reason}")]
    ContextCreation {
        profile: GlProfile,
        major: u32,
        minor: u32,
        reason: String,
    },

    #[error("OpenGL function {0} is not available")]
    FunctionResolution(&'static str),

    #[error("{stage} shader failed to compile: {log}")]
    ShaderCompile { stage: &'static str, log: String },

    #[error("shader program failed to link: {0}")]
    ProgramLink(String),

    #[error("GL error 0x{0:04X} during vertex buffer setup")]
    BufferSetup(u32),

    #[error("GL error 0x{code:04X} during {step}")]
    TextureAllocation { step: &'static str, code: u32 },

    #[error("framebuffer incomplete (status 0x{0:04X})")]
    FramebufferIncomplete(u32),
}

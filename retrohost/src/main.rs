//! retrohost: run one libretro core and game from a JSON profile.
//!
//! Keys: arrows = d-pad, Z/X/A/S = B/A/Y/X, Q/W = L/R, Enter = Start, right Shift = Select,
//! F5/F7 = save/load state, F11 = fullscreen, Esc = quit.

mod app;
mod audio;
mod display;
mod keymap;
mod pacing;

use std::path::PathBuf;
use std::rc::Rc;

use anyhow::Context;
use clap::Parser;
use retrohost_core::config::Profile;
use winit::event_loop::EventLoop;

#[derive(Debug, Parser)]
#[command(version, about = "Minimal libretro frontend")]
struct Args {
    /// JSON profile naming the core, the game and the directories to use.
    profile: PathBuf,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let profile = Profile::load(&args.profile)
        .with_context(|| format!("cannot start with profile \"{}\"", args.profile.display()))?;

    let event_loop = EventLoop::new().context("failed to create the event loop")?;
    let mut app = app::App::new(Rc::new(profile));
    event_loop.run_app(&mut app)?;
    app.finish()
}

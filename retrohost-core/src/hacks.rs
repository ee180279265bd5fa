//! Mouse-look memory hooks.
//!
//! Some games have no analog camera input worth using with a mouse. A [`MemoryHook`] patches
//! the game's camera angles in system RAM directly from relative mouse motion. Offsets are
//! tied to one specific game build.

use serde::Deserialize;

pub trait MemoryHook {
    fn name(&self) -> &str;

    /// `dx`/`dy` are already scaled by the configured sensitivity.
    fn on_mouse_move(&mut self, ram: &mut [u8], dx: f32, dy: f32);
}

/// Built-in hooks selectable from the profile (`mouse.hack`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MouseHackProfile {
    #[default]
    None,
    /// Armored Core (NTSC-U).
    Ac1,
    /// Armored Core: Project Phantasma (NTSC-U).
    AcProjectPhantasma,
}

impl MouseHackProfile {
    pub fn hook(self) -> Option<Box<dyn MemoryHook>> {
        match self {
            Self::None => None,
            Self::Ac1 => Some(Box::new(Ac1)),
            Self::AcProjectPhantasma => Some(Box::new(AcProjectPhantasma)),
        }
    }
}

fn read_u16(ram: &[u8], offset: usize) -> Option<u16> {
    let bytes = ram.get(offset..offset + 2)?;
    Some(u16::from_le_bytes([bytes[0], bytes[1]]))
}

fn read_u32(ram: &[u8], offset: usize) -> Option<u32> {
    let bytes = ram.get(offset..offset + 4)?;
    Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Adds `delta` to the `u16` at `offset`, wrapping. Out-of-range offsets are ignored.
fn nudge_u16(ram: &mut [u8], offset: usize, delta: f32) {
    let Some(value) = read_u16(ram, offset) else {
        return;
    };
    let updated = (f32::from(value) + delta) as i32 as u16;
    ram[offset..offset + 2].copy_from_slice(&updated.to_le_bytes());
}

struct Ac1;

impl Ac1 {
    const YAW: usize = 0x1A_26CA;
    const PITCH: usize = 0x4_11C0;
}

impl MemoryHook for Ac1 {
    fn name(&self) -> &str {
        "ac1"
    }

    fn on_mouse_move(&mut self, ram: &mut [u8], dx: f32, dy: f32) {
        nudge_u16(ram, Self::YAW, -dx);
        nudge_u16(ram, Self::PITCH, dy);
    }
}

struct AcProjectPhantasma;

impl AcProjectPhantasma {
    /// Holds `MODE_MARKER` while the mission camera is active.
    const MODE: usize = 0x1D_1D20;
    const MODE_MARKER: u32 = 0x801D_1CC8;
    const MISSION_YAW: usize = 0x1D_1D32;
    const ARENA_YAW: usize = 0x1E_2DF2;
    const PITCH: usize = 0x4_2708;
}

impl MemoryHook for AcProjectPhantasma {
    fn name(&self) -> &str {
        "ac_project_phantasma"
    }

    fn on_mouse_move(&mut self, ram: &mut [u8], dx: f32, dy: f32) {
        let yaw = if read_u32(ram, Self::MODE) == Some(Self::MODE_MARKER) {
            Self::MISSION_YAW
        } else {
            Self::ARENA_YAW
        };
        nudge_u16(ram, yaw, -dx);
        nudge_u16(ram, Self::PITCH, dy);
    }
}

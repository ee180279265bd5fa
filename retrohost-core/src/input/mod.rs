//! Joypad input.
//!
//! Input is pushed by the frontend (`set_joypad_axis`) and read back by the core through the
//! `input_state` callback. Only port 0 / index 0 of the joypad device is backed.

use std::os::raw::c_uint;

use crate::abi::{DEVICE_ID_JOYPAD_MASK, DEVICE_JOYPAD};

/// Number of joypad slots (libretro joypad button ids 0..16).
pub const JOYPAD_SLOTS: usize = 16;

/// Joypad button ids (libretro `RETRO_DEVICE_ID_JOYPAD_*`).
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Button {
    B = 0,
    Y = 1,
    Select = 2,
    Start = 3,
    Up = 4,
    Down = 5,
    Left = 6,
    Right = 7,
    A = 8,
    X = 9,
    L1 = 10,
    R1 = 11,
    L2 = 12,
    R2 = 13,
    L3 = 14,
    R3 = 15,
}

impl Button {
    pub fn slot(self) -> usize {
        self as usize
    }
}

/// Values of the 16 joypad slots. Last writer wins.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JoypadState {
    slots: [i16; JOYPAD_SLOTS],
}

impl JoypadState {
    /// # Panics
    /// If `slot >= JOYPAD_SLOTS`.
    pub fn set(&mut self, slot: usize, value: i16) {
        assert!(slot < JOYPAD_SLOTS, "joypad slot {slot} out of range");
        self.slots[slot] = value;
    }

    /// One bit per non-zero slot.
    pub fn bitmask(&self) -> i16 {
        let mask = self
            .slots
            .iter()
            .enumerate()
            .filter(|(_, value)| **value != 0)
            .fold(0u16, |mask, (slot, _)| mask | (1 << slot));
        mask as i16
    }

    /// Answers an `input_state` query.
    pub fn query(&self, port: c_uint, device: c_uint, index: c_uint, id: c_uint) -> i16 {
        if port != 0 || device != DEVICE_JOYPAD || index != 0 {
            return 0;
        }
        match id {
            DEVICE_ID_JOYPAD_MASK => self.bitmask(),
            id if (id as usize) < JOYPAD_SLOTS => self.slots[id as usize],
            _ => 0,
        }
    }

    pub fn clear(&mut self) {
        self.slots = [0; JOYPAD_SLOTS];
    }
}

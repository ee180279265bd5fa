use retrohost_core::input::Button;
use winit::keyboard::KeyCode;

/// Fixed keyboard layout for the joypad.
pub fn joypad_button(key: KeyCode) -> Option<Button> {
    let button = match key {
        KeyCode::ArrowUp => Button::Up,
        KeyCode::ArrowDown => Button::Down,
        KeyCode::ArrowLeft => Button::Left,
        KeyCode::ArrowRight => Button::Right,
        KeyCode::KeyZ => Button::B,
        KeyCode::KeyX => Button::A,
        KeyCode::KeyA => Button::Y,
        KeyCode::KeyS => Button::X,
        KeyCode::KeyQ => Button::L1,
        KeyCode::KeyW => Button::R1,
        KeyCode::Enter => Button::Start,
        KeyCode::ShiftRight => Button::Select,
        _ => return None,
    };
    Some(button)
}

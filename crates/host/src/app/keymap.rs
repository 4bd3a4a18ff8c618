use bridge::{KeyAction, ModifierState, RawKeyEvent, KEYCODE_BACK, KEYCODE_UNKNOWN};
use winit::keyboard::{KeyCode, ModifiersState};

/// Engine key numbering for a physical key. Escape stands in for Back.
pub(crate) fn engine_key_code(code: KeyCode) -> i32 {
    if let Some(offset) = letter_offset(code) {
        return 29 + offset as i32;
    }
    if let Some(digit) = digit_value(code) {
        return 7 + digit as i32;
    }
    match code {
        KeyCode::Escape => KEYCODE_BACK,
        KeyCode::ArrowUp => 19,
        KeyCode::ArrowDown => 20,
        KeyCode::ArrowLeft => 21,
        KeyCode::ArrowRight => 22,
        KeyCode::Comma => 55,
        KeyCode::Period => 56,
        KeyCode::AltLeft => 57,
        KeyCode::AltRight => 58,
        KeyCode::ShiftLeft => 59,
        KeyCode::ShiftRight => 60,
        KeyCode::Tab => 61,
        KeyCode::Space => 62,
        KeyCode::Enter | KeyCode::NumpadEnter => 66,
        KeyCode::Backspace => 67,
        KeyCode::Backquote => 68,
        KeyCode::Minus => 69,
        KeyCode::Equal => 70,
        KeyCode::BracketLeft => 71,
        KeyCode::BracketRight => 72,
        KeyCode::Backslash => 73,
        KeyCode::Semicolon => 74,
        KeyCode::Quote => 75,
        KeyCode::Slash => 76,
        KeyCode::PageUp => 92,
        KeyCode::PageDown => 93,
        KeyCode::Delete => 112,
        KeyCode::ControlLeft => 113,
        KeyCode::ControlRight => 114,
        KeyCode::CapsLock => 115,
        KeyCode::SuperLeft => 117,
        KeyCode::SuperRight => 118,
        KeyCode::Home => 122,
        KeyCode::End => 123,
        KeyCode::F1 => 131,
        KeyCode::F2 => 132,
        KeyCode::F3 => 133,
        KeyCode::F4 => 134,
        KeyCode::F5 => 135,
        KeyCode::F6 => 136,
        KeyCode::F7 => 137,
        KeyCode::F8 => 138,
        KeyCode::F9 => 139,
        KeyCode::F10 => 140,
        KeyCode::F11 => 141,
        KeyCode::F12 => 142,
        KeyCode::NumLock => 143,
        _ => KEYCODE_UNKNOWN,
    }
}

fn letter_offset(code: KeyCode) -> Option<u8> {
    const LETTERS: [KeyCode; 26] = [
        KeyCode::KeyA,
        KeyCode::KeyB,
        KeyCode::KeyC,
        KeyCode::KeyD,
        KeyCode::KeyE,
        KeyCode::KeyF,
        KeyCode::KeyG,
        KeyCode::KeyH,
        KeyCode::KeyI,
        KeyCode::KeyJ,
        KeyCode::KeyK,
        KeyCode::KeyL,
        KeyCode::KeyM,
        KeyCode::KeyN,
        KeyCode::KeyO,
        KeyCode::KeyP,
        KeyCode::KeyQ,
        KeyCode::KeyR,
        KeyCode::KeyS,
        KeyCode::KeyT,
        KeyCode::KeyU,
        KeyCode::KeyV,
        KeyCode::KeyW,
        KeyCode::KeyX,
        KeyCode::KeyY,
        KeyCode::KeyZ,
    ];
    LETTERS
        .iter()
        .position(|letter| *letter == code)
        .map(|index| index as u8)
}

fn digit_value(code: KeyCode) -> Option<u8> {
    match code {
        KeyCode::Digit0 | KeyCode::Numpad0 => Some(0),
        KeyCode::Digit1 | KeyCode::Numpad1 => Some(1),
        KeyCode::Digit2 | KeyCode::Numpad2 => Some(2),
        KeyCode::Digit3 | KeyCode::Numpad3 => Some(3),
        KeyCode::Digit4 | KeyCode::Numpad4 => Some(4),
        KeyCode::Digit5 | KeyCode::Numpad5 => Some(5),
        KeyCode::Digit6 | KeyCode::Numpad6 => Some(6),
        KeyCode::Digit7 | KeyCode::Numpad7 => Some(7),
        KeyCode::Digit8 | KeyCode::Numpad8 => Some(8),
        KeyCode::Digit9 | KeyCode::Numpad9 => Some(9),
        _ => None,
    }
}

/// Modifier flags that winit does not report directly. Caps and Num Lock are
/// toggled by their key presses; Shift/Ctrl/Alt/Super follow winit.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct ModifierTracker {
    held: ModifiersState,
    caps_lock: bool,
    num_lock: bool,
}

impl ModifierTracker {
    pub(crate) fn set_held(&mut self, held: ModifiersState) {
        self.held = held;
    }

    pub(crate) fn observe_press(&mut self, code: KeyCode) {
        match code {
            KeyCode::CapsLock => self.caps_lock = !self.caps_lock,
            KeyCode::NumLock => self.num_lock = !self.num_lock,
            _ => {}
        }
    }

    pub(crate) fn state(&self, long_press: bool) -> ModifierState {
        ModifierState {
            shift: self.held.shift_key(),
            ctrl: self.held.control_key(),
            alt: self.held.alt_key(),
            meta: self.held.super_key(),
            caps_lock: self.caps_lock,
            num_lock: self.num_lock,
            long_press,
        }
    }
}

/// Builds the raw event for a physical key. The code point mirrors what the
/// platform reports for the key and meta state: printable `text` if present,
/// else a value derived from the key itself.
pub(crate) fn raw_key_event(
    code: KeyCode,
    text: Option<&str>,
    pressed: bool,
    repeat: bool,
    tracker: &ModifierTracker,
) -> RawKeyEvent {
    let modifiers = tracker.state(pressed && repeat);
    let unicode_char = text
        .and_then(|text| text.chars().next())
        .filter(|ch| !ch.is_control())
        .map(u32::from)
        .unwrap_or_else(|| code_point_for(code, &modifiers));

    RawKeyEvent {
        action: if pressed { KeyAction::Down } else { KeyAction::Up },
        key_code: engine_key_code(code),
        characters: None,
        unicode_char,
        modifiers,
    }
}

/// Committed IME text arrives as a multi-character burst with no key code.
pub(crate) fn committed_text_event(text: &str, tracker: &ModifierTracker) -> Option<RawKeyEvent> {
    let first = text.chars().next()?;
    Some(RawKeyEvent {
        action: KeyAction::Multiple,
        key_code: KEYCODE_UNKNOWN,
        characters: Some(text.to_string()),
        unicode_char: u32::from(first),
        modifiers: tracker.state(false),
    })
}

fn code_point_for(code: KeyCode, modifiers: &ModifierState) -> u32 {
    if let Some(offset) = letter_offset(code) {
        let base = if modifiers.shift != modifiers.caps_lock {
            b'A'
        } else {
            b'a'
        };
        return u32::from(base + offset);
    }
    if let Some(digit) = digit_value(code) {
        return u32::from(b'0' + digit);
    }
    match code {
        KeyCode::Space => u32::from(' '),
        KeyCode::Enter | KeyCode::NumpadEnter => u32::from('\n'),
        KeyCode::Tab => u32::from('\t'),
        _ => 0,
    }
}

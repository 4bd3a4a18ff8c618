use bitflags::bitflags;
use serde::Deserialize;
use tracing::trace;

/// Engine key code for the platform back action. Key codes follow the
/// Android `KeyEvent` numbering the engine was built against.
pub const KEYCODE_BACK: i32 = 4;
pub const KEYCODE_UNKNOWN: i32 = 0;

const ACTION_MASK: i32 = 0xff;
const ACTION_POINTER_INDEX_MASK: i32 = 0xff00;
const ACTION_POINTER_INDEX_SHIFT: i32 = 8;

bitflags! {
    /// Shift-state bits handed to the engine with every key call. Bit values
    /// are part of the engine wire contract.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Modifiers: u32 {
        const SHIFT = 1;
        const CTRL = 2;
        const ALT = 4;
        const META = 8;
        const CAPS_LOCK = 16;
        const NUM_LOCK = 32;
        const LONG_PRESS = 64;
    }
}

impl Modifiers {
    pub fn wire_bits(self) -> i32 {
        self.bits() as i32
    }
}

/// Touch phase as the engine sees it. `wire_code` is the stable numbering
/// used across the engine boundary: Down=0, Up=1, Move=2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TouchPhase {
    Down,
    Up,
    Move,
}

impl TouchPhase {
    pub const fn wire_code(self) -> i32 {
        match self {
            TouchPhase::Down => 0,
            TouchPhase::Up => 1,
            TouchPhase::Move => 2,
        }
    }
}

/// Pointer action as reported by the platform for a whole multi-touch event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PointerAction {
    Down,
    Up,
    Move,
    Cancel,
    /// A secondary pointer joined the gesture; `index` is its position in
    /// the event's pointer list, not its id.
    PointerDown { index: usize },
    /// A secondary pointer left the gesture.
    PointerUp { index: usize },
    Other { code: i32 },
}

impl PointerAction {
    /// Decodes a packed platform action: the low byte selects the action and
    /// bits 8..16 carry the pointer index for secondary pointer changes.
    pub fn from_packed(packed: i32) -> Self {
        let index = ((packed & ACTION_POINTER_INDEX_MASK) >> ACTION_POINTER_INDEX_SHIFT) as usize;
        match packed & ACTION_MASK {
            0 => PointerAction::Down,
            1 => PointerAction::Up,
            2 => PointerAction::Move,
            3 => PointerAction::Cancel,
            5 => PointerAction::PointerDown { index },
            6 => PointerAction::PointerUp { index },
            code => PointerAction::Other { code },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct PointerSample {
    pub id: i32,
    pub x: f32,
    pub y: f32,
    #[serde(default)]
    pub pressure: f32,
}

/// One platform motion event: the action plus every pointer currently down,
/// in the platform's index order.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawPointerEvent {
    pub action: PointerAction,
    pub pointers: Vec<PointerSample>,
}

impl RawPointerEvent {
    pub fn new(action: PointerAction, pointers: Vec<PointerSample>) -> Self {
        Self { action, pointers }
    }
}

/// Normalized single-pointer tuple passed to the engine's touch entry point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TouchSample {
    pub phase: TouchPhase,
    pub pointer_id: i32,
    pub x: f32,
    pub y: f32,
    pub pressure: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(default)]
pub struct ModifierState {
    pub shift: bool,
    pub ctrl: bool,
    pub alt: bool,
    pub meta: bool,
    pub caps_lock: bool,
    pub num_lock: bool,
    pub long_press: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyAction {
    Down,
    Up,
    /// A burst of repeated or composed input delivered as one event.
    Multiple,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RawKeyEvent {
    pub action: KeyAction,
    pub key_code: i32,
    /// Pre-composed text supplied by the platform, if any.
    #[serde(default)]
    pub characters: Option<String>,
    /// Unicode point the platform derives from the key code and meta state.
    #[serde(default)]
    pub unicode_char: u32,
    #[serde(default)]
    pub modifiers: ModifierState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyStroke {
    pub character: char,
    pub key_code: i32,
    pub modifiers: Modifiers,
}

/// Host-delivered input, consumed once by the bridge.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputEvent {
    Pointer(RawPointerEvent),
    Key(RawKeyEvent),
}

pub fn encode_pointer(event: &RawPointerEvent) -> Vec<TouchSample> {
    match event.action {
        PointerAction::Down => every_pointer(event, TouchPhase::Down, false),
        PointerAction::Move => every_pointer(event, TouchPhase::Move, false),
        // Up events can carry a stale pressure from the last move.
        PointerAction::Up => every_pointer(event, TouchPhase::Up, true),
        PointerAction::PointerDown { index } => {
            pointer_at_index(event, index, TouchPhase::Down, false)
                .into_iter()
                .collect()
        }
        PointerAction::PointerUp { index } => pointer_at_index(event, index, TouchPhase::Up, true)
            .into_iter()
            .collect(),
        PointerAction::Cancel | PointerAction::Other { .. } => {
            trace!(action = ?event.action, "pointer_action_ignored");
            Vec::new()
        }
    }
}

fn every_pointer(event: &RawPointerEvent, phase: TouchPhase, zero_pressure: bool) -> Vec<TouchSample> {
    event
        .pointers
        .iter()
        .map(|pointer| sample_from(pointer, phase, zero_pressure))
        .collect()
}

fn pointer_at_index(
    event: &RawPointerEvent,
    index: usize,
    phase: TouchPhase,
    zero_pressure: bool,
) -> Option<TouchSample> {
    if index >= event.pointers.len() {
        trace!(
            index,
            pointer_count = event.pointers.len(),
            "pointer_index_out_of_range"
        );
        return None;
    }
    Some(sample_from(&event.pointers[index], phase, zero_pressure))
}

fn sample_from(pointer: &PointerSample, phase: TouchPhase, zero_pressure: bool) -> TouchSample {
    TouchSample {
        phase,
        pointer_id: pointer.id,
        x: pointer.x,
        y: pointer.y,
        pressure: if zero_pressure { 0.0 } else { pointer.pressure },
    }
}

pub fn encode_key(event: &RawKeyEvent) -> KeyStroke {
    KeyStroke {
        character: derive_key_char(event),
        key_code: event.key_code,
        modifiers: encode_modifiers(&event.modifiers),
    }
}

/// Composed text wins verbatim. Otherwise the code-point path is used and
/// lower-cased unless Shift is held, even when Caps Lock produced the
/// upper-case point.
pub fn derive_key_char(event: &RawKeyEvent) -> char {
    if let Some(first) = event.characters.as_deref().and_then(|text| text.chars().next()) {
        return first;
    }

    let derived = char::from_u32(event.unicode_char).unwrap_or('\0');
    if event.modifiers.shift {
        derived
    } else {
        derived.to_lowercase().next().unwrap_or(derived)
    }
}

pub fn encode_modifiers(state: &ModifierState) -> Modifiers {
    let mut bits = Modifiers::empty();
    bits.set(Modifiers::SHIFT, state.shift);
    bits.set(Modifiers::CTRL, state.ctrl);
    bits.set(Modifiers::ALT, state.alt);
    bits.set(Modifiers::META, state.meta);
    bits.set(Modifiers::CAPS_LOCK, state.caps_lock);
    bits.set(Modifiers::NUM_LOCK, state.num_lock);
    bits.set(Modifiers::LONG_PRESS, state.long_press);
    bits
}

pub fn decode_modifiers(bits: Modifiers) -> ModifierState {
    ModifierState {
        shift: bits.contains(Modifiers::SHIFT),
        ctrl: bits.contains(Modifiers::CTRL),
        alt: bits.contains(Modifiers::ALT),
        meta: bits.contains(Modifiers::META),
        caps_lock: bits.contains(Modifiers::CAPS_LOCK),
        num_lock: bits.contains(Modifiers::NUM_LOCK),
        long_press: bits.contains(Modifiers::LONG_PRESS),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pointer(id: i32, x: f32, y: f32, pressure: f32) -> PointerSample {
        PointerSample { id, x, y, pressure }
    }

    fn three_fingers(action: PointerAction) -> RawPointerEvent {
        RawPointerEvent::new(
            action,
            vec![
                pointer(4, 10.0, 20.0, 0.5),
                pointer(7, 30.0, 40.0, 0.6),
                pointer(2, 50.0, 60.0, 0.7),
            ],
        )
    }

    fn key(action: KeyAction, unicode_char: u32, shift: bool) -> RawKeyEvent {
        RawKeyEvent {
            action,
            key_code: 29,
            characters: None,
            unicode_char,
            modifiers: ModifierState {
                shift,
                ..ModifierState::default()
            },
        }
    }

    #[test]
    fn multi_touch_down_emits_one_sample_per_pointer_in_index_order() {
        let samples = encode_pointer(&three_fingers(PointerAction::Down));

        assert_eq!(samples.len(), 3);
        assert_eq!(samples[0].pointer_id, 4);
        assert_eq!(samples[1].pointer_id, 7);
        assert_eq!(samples[2].pointer_id, 2);
        assert_eq!((samples[1].x, samples[1].y), (30.0, 40.0));
        assert!((samples[2].pressure - 0.7).abs() < f32::EPSILON);
        assert!(samples.iter().all(|sample| sample.phase == TouchPhase::Down));
    }

    #[test]
    fn move_keeps_reported_pressure() {
        let samples = encode_pointer(&three_fingers(PointerAction::Move));
        assert_eq!(samples.len(), 3);
        assert!(samples.iter().all(|sample| sample.phase == TouchPhase::Move));
        assert!((samples[0].pressure - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn up_forces_zero_pressure() {
        let samples = encode_pointer(&three_fingers(PointerAction::Up));
        assert_eq!(samples.len(), 3);
        assert!(samples
            .iter()
            .all(|sample| sample.phase == TouchPhase::Up && sample.pressure == 0.0));
    }

    #[test]
    fn secondary_pointer_down_translates_index_to_id() {
        let samples = encode_pointer(&three_fingers(PointerAction::PointerDown { index: 1 }));

        assert_eq!(
            samples,
            vec![TouchSample {
                phase: TouchPhase::Down,
                pointer_id: 7,
                x: 30.0,
                y: 40.0,
                pressure: 0.6,
            }]
        );
    }

    #[test]
    fn secondary_pointer_up_reports_up_with_zero_pressure() {
        let samples = encode_pointer(&three_fingers(PointerAction::PointerUp { index: 2 }));
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].phase, TouchPhase::Up);
        assert_eq!(samples[0].pointer_id, 2);
        assert_eq!(samples[0].pressure, 0.0);
    }

    #[test]
    fn out_of_range_secondary_index_is_dropped() {
        assert!(encode_pointer(&three_fingers(PointerAction::PointerDown { index: 5 })).is_empty());
        assert!(encode_pointer(&three_fingers(PointerAction::PointerUp { index: 3 })).is_empty());
    }

    #[test]
    fn cancel_and_unknown_actions_produce_nothing() {
        assert!(encode_pointer(&three_fingers(PointerAction::Cancel)).is_empty());
        assert!(encode_pointer(&three_fingers(PointerAction::Other { code: 7 })).is_empty());
    }

    #[test]
    fn packed_actions_decode_index_from_id_field() {
        assert_eq!(PointerAction::from_packed(0), PointerAction::Down);
        assert_eq!(PointerAction::from_packed(1), PointerAction::Up);
        assert_eq!(PointerAction::from_packed(2), PointerAction::Move);
        assert_eq!(
            PointerAction::from_packed(0x0205),
            PointerAction::PointerDown { index: 2 }
        );
        assert_eq!(
            PointerAction::from_packed(0x0106),
            PointerAction::PointerUp { index: 1 }
        );
        assert_eq!(
            PointerAction::from_packed(9),
            PointerAction::Other { code: 9 }
        );
    }

    #[test]
    fn phase_wire_codes_are_stable() {
        assert_eq!(TouchPhase::Down.wire_code(), 0);
        assert_eq!(TouchPhase::Up.wire_code(), 1);
        assert_eq!(TouchPhase::Move.wire_code(), 2);
    }

    #[test]
    fn composed_text_wins_over_key_code() {
        let mut event = key(KeyAction::Down, 'q' as u32, false);
        event.characters = Some("Éa".to_string());
        assert_eq!(derive_key_char(&event), 'É');
    }

    #[test]
    fn empty_composed_text_falls_back_to_code_point() {
        let mut event = key(KeyAction::Down, 'Q' as u32, false);
        event.characters = Some(String::new());
        assert_eq!(derive_key_char(&event), 'q');
    }

    #[test]
    fn derived_char_is_lowercased_without_shift() {
        assert_eq!(derive_key_char(&key(KeyAction::Down, 'A' as u32, false)), 'a');
        assert_eq!(derive_key_char(&key(KeyAction::Down, 'A' as u32, true)), 'A');
    }

    #[test]
    fn caps_lock_alone_still_lowercases_derived_char() {
        let mut event = key(KeyAction::Down, 'A' as u32, false);
        event.modifiers.caps_lock = true;
        assert_eq!(derive_key_char(&event), 'a');
    }

    #[test]
    fn invalid_code_point_derives_nul() {
        assert_eq!(derive_key_char(&key(KeyAction::Up, 0xD800, false)), '\0');
        assert_eq!(derive_key_char(&key(KeyAction::Up, 0, false)), '\0');
    }

    #[test]
    fn shift_and_ctrl_pack_to_three() {
        let state = ModifierState {
            shift: true,
            ctrl: true,
            ..ModifierState::default()
        };
        let bits = encode_modifiers(&state);
        assert_eq!(bits.wire_bits(), 3);
        assert_eq!(decode_modifiers(Modifiers::from_bits_truncate(3)), state);
    }

    #[test]
    fn every_modifier_combination_round_trips() {
        for raw in 0..128u32 {
            let bits = Modifiers::from_bits_truncate(raw);
            assert_eq!(bits.bits(), raw);
            assert_eq!(encode_modifiers(&decode_modifiers(bits)), bits);
        }
    }

    #[test]
    fn modifier_bits_match_wire_contract() {
        let cases = [
            (ModifierState { shift: true, ..Default::default() }, 1),
            (ModifierState { ctrl: true, ..Default::default() }, 2),
            (ModifierState { alt: true, ..Default::default() }, 4),
            (ModifierState { meta: true, ..Default::default() }, 8),
            (ModifierState { caps_lock: true, ..Default::default() }, 16),
            (ModifierState { num_lock: true, ..Default::default() }, 32),
            (ModifierState { long_press: true, ..Default::default() }, 64),
        ];
        for (state, expected) in cases {
            assert_eq!(encode_modifiers(&state).wire_bits(), expected);
        }
    }

    #[test]
    fn encode_key_carries_code_char_and_bits() {
        let mut event = key(KeyAction::Down, 'b' as u32, false);
        event.key_code = 30;
        event.modifiers.alt = true;
        let stroke = encode_key(&event);
        assert_eq!(stroke.character, 'b');
        assert_eq!(stroke.key_code, 30);
        assert_eq!(stroke.modifiers, Modifiers::ALT);
    }

    #[test]
    fn input_events_deserialize_from_json() {
        let json = r#"{"type":"pointer","action":{"kind":"pointer_down","index":1},
            "pointers":[{"id":0,"x":1.0,"y":2.0,"pressure":0.5},{"id":3,"x":4.0,"y":5.0}]}"#;
        let event: InputEvent = serde_json::from_str(json).expect("pointer json");
        let InputEvent::Pointer(pointer_event) = event else {
            panic!("expected pointer event");
        };
        assert_eq!(pointer_event.action, PointerAction::PointerDown { index: 1 });
        assert_eq!(pointer_event.pointers[1].pressure, 0.0);

        let json = r#"{"type":"key","action":"down","key_code":4,"modifiers":{"shift":true}}"#;
        let event: InputEvent = serde_json::from_str(json).expect("key json");
        let InputEvent::Key(key_event) = event else {
            panic!("expected key event");
        };
        assert_eq!(key_event.key_code, KEYCODE_BACK);
        assert!(key_event.modifiers.shift);
        assert_eq!(key_event.characters, None);
    }
}

use bridge::{PointerAction, PointerSample, RawPointerEvent};
use winit::event::TouchPhase as WinitTouchPhase;

const MOUSE_POINTER_ID: i32 = 0;
const MOUSE_PRESSURE: f32 = 1.0;
const DEFAULT_TOUCH_PRESSURE: f32 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq)]
struct ActiveTouch {
    device_touch_id: u64,
    sample: PointerSample,
}

/// Rebuilds multi-pointer events from winit's one-finger-at-a-time touch
/// stream. Pointer ids handed to the engine are the smallest free ids, so the
/// first finger is always 0.
#[derive(Debug, Default)]
pub(crate) struct TouchTracker {
    active: Vec<ActiveTouch>,
}

impl TouchTracker {
    #[cfg(test)]
    pub(crate) fn active_count(&self) -> usize {
        self.active.len()
    }

    pub(crate) fn handle(
        &mut self,
        phase: WinitTouchPhase,
        device_touch_id: u64,
        x: f32,
        y: f32,
        pressure: Option<f32>,
    ) -> Option<RawPointerEvent> {
        let pressure = pressure.unwrap_or(DEFAULT_TOUCH_PRESSURE);
        match phase {
            WinitTouchPhase::Started => Some(self.start(device_touch_id, x, y, pressure)),
            WinitTouchPhase::Moved => {
                let touch = self.find_mut(device_touch_id)?;
                touch.sample.x = x;
                touch.sample.y = y;
                touch.sample.pressure = pressure;
                Some(self.snapshot(PointerAction::Move))
            }
            WinitTouchPhase::Ended | WinitTouchPhase::Cancelled => {
                self.lift(device_touch_id, x, y)
            }
        }
    }

    fn start(&mut self, device_touch_id: u64, x: f32, y: f32, pressure: f32) -> RawPointerEvent {
        if let Some(index) = self.index_of(device_touch_id) {
            // A repeated start for a live finger is treated as movement.
            let touch = &mut self.active[index];
            touch.sample.x = x;
            touch.sample.y = y;
            return self.snapshot(PointerAction::Move);
        }

        self.active.push(ActiveTouch {
            device_touch_id,
            sample: PointerSample {
                id: self.lowest_free_id(),
                x,
                y,
                pressure,
            },
        });
        if self.active.len() == 1 {
            self.snapshot(PointerAction::Down)
        } else {
            let index = self.active.len() - 1;
            self.snapshot(PointerAction::PointerDown { index })
        }
    }

    fn lift(&mut self, device_touch_id: u64, x: f32, y: f32) -> Option<RawPointerEvent> {
        let index = self.index_of(device_touch_id)?;
        self.active[index].sample.x = x;
        self.active[index].sample.y = y;

        let event = if self.active.len() == 1 {
            self.snapshot(PointerAction::Up)
        } else {
            self.snapshot(PointerAction::PointerUp { index })
        };
        self.active.remove(index);
        Some(event)
    }

    fn snapshot(&self, action: PointerAction) -> RawPointerEvent {
        RawPointerEvent::new(action, self.active.iter().map(|touch| touch.sample).collect())
    }

    fn index_of(&self, device_touch_id: u64) -> Option<usize> {
        self.active
            .iter()
            .position(|touch| touch.device_touch_id == device_touch_id)
    }

    fn find_mut(&mut self, device_touch_id: u64) -> Option<&mut ActiveTouch> {
        self.active
            .iter_mut()
            .find(|touch| touch.device_touch_id == device_touch_id)
    }

    fn lowest_free_id(&self) -> i32 {
        (0..)
            .find(|candidate| !self.active.iter().any(|touch| touch.sample.id == *candidate))
            .unwrap_or(0)
    }
}

/// Left mouse button as a single touch pointer.
#[derive(Debug, Default)]
pub(crate) struct MousePointer {
    pressed: bool,
    x: f32,
    y: f32,
}

impl MousePointer {
    pub(crate) fn moved(&mut self, x: f32, y: f32) -> Option<RawPointerEvent> {
        self.x = x;
        self.y = y;
        self.pressed.then(|| self.event(PointerAction::Move))
    }

    pub(crate) fn button(&mut self, pressed: bool) -> Option<RawPointerEvent> {
        if pressed == self.pressed {
            return None;
        }
        self.pressed = pressed;
        Some(self.event(if pressed {
            PointerAction::Down
        } else {
            PointerAction::Up
        }))
    }

    /// Synthesizes a lift when the cursor leaves mid-drag.
    pub(crate) fn left_window(&mut self) -> Option<RawPointerEvent> {
        self.button(false)
    }

    fn event(&self, action: PointerAction) -> RawPointerEvent {
        RawPointerEvent::new(
            action,
            vec![PointerSample {
                id: MOUSE_POINTER_ID,
                x: self.x,
                y: self.y,
                pressure: MOUSE_PRESSURE,
            }],
        )
    }
}

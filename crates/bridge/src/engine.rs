use std::path::Path;

use crate::input::{KeyStroke, TouchPhase};
use crate::opcode::Opcode;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewGeometry {
    pub width: u32,
    pub height: u32,
    pub dpi_x: f32,
    pub dpi_y: f32,
}

/// Screen orientation the engine asks for from `init`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
    Landscape,
    Portrait,
    DeviceDefault,
}

impl Orientation {
    pub fn from_init_value(value: i32) -> Self {
        match value {
            0 => Orientation::Landscape,
            1 => Orientation::Portrait,
            _ => Orientation::DeviceDefault,
        }
    }
}

/// Synchronous call contract of the native engine.
///
/// Every method blocks until the engine is done, and the bridge never calls
/// into the engine while a previous call is still running. Implementations
/// live on the control thread and need not be `Send`.
///
/// Calls that return an [`Opcode`] report whether the engine consumed the
/// input and which host side effect, if any, it wants next.
pub trait EngineBoundary {
    /// Native handle for the drawing surface (a window, a layer, ...).
    type Surface;

    /// Called once at startup. The return value is an orientation
    /// preference, see [`Orientation::from_init_value`].
    fn init(&mut self, bundle_path: &Path, data_path: &Path) -> i32;
    fn on_surface_ready(&mut self, surface: &Self::Surface, geometry: ViewGeometry);
    fn on_surface_resized(&mut self, width: u32, height: u32);
    fn on_draw_frame(&mut self) -> Opcode;
    fn on_focus_changed(&mut self, surface: &Self::Surface, focused: bool);
    fn on_touch(
        &mut self,
        phase: TouchPhase,
        pointer_id: i32,
        x: f32,
        y: f32,
        pressure: f32,
    ) -> Opcode;
    fn on_key_down(&mut self, stroke: KeyStroke) -> Opcode;
    fn on_key_up(&mut self, stroke: KeyStroke);
    /// Pops the next deferred action. A non-positive value ends the queue.
    fn next_queued_action(&mut self) -> Opcode;
    fn on_surface_destroyed(&mut self);

    fn bool_attribute(&mut self, _name: &str, default: bool) -> bool {
        default
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_value_maps_to_orientation() {
        assert_eq!(Orientation::from_init_value(0), Orientation::Landscape);
        assert_eq!(Orientation::from_init_value(1), Orientation::Portrait);
        assert_eq!(Orientation::from_init_value(2), Orientation::DeviceDefault);
        assert_eq!(Orientation::from_init_value(-1), Orientation::DeviceDefault);
    }
}

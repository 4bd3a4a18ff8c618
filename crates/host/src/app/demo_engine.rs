use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;

use bridge::{EngineBoundary, KeyStroke, Opcode, TouchPhase, ViewGeometry, KEYCODE_BACK};
use pixels::{Error as PixelsError, Pixels, SurfaceTexture};
use tracing::{debug, info, warn};
use winit::window::Window;

const RIPPLE_LIFETIME_FRAMES: u32 = 90;
const RIPPLE_MAX_RADIUS_PX: f32 = 120.0;
const CONTACT_HALF_SIZE_PX: i32 = 10;
const MAX_TYPED_CHARS: usize = 64;
const TYPED_CELL_PX: i32 = 12;
const CLEAR_COLOR: [u8; 4] = [18, 20, 26, 255];
const CONTACT_COLOR: [u8; 4] = [240, 196, 92, 255];
const RIPPLE_COLOR: [u8; 4] = [96, 180, 240, 255];
const TYPED_COLOR: [u8; 4] = [200, 220, 200, 255];
const MAX_FPS_ATTRIBUTE: &str = "MaxFps";

#[derive(Debug, Clone, Copy, PartialEq)]
struct Ripple {
    x: f32,
    y: f32,
    strength: f32,
    age: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Contact {
    id: i32,
    x: f32,
    y: f32,
}

/// Opcode-producing behaviour of the demo engine, independent of any window.
///
/// A touch starts an animation that runs until every ripple has faded and no
/// finger is down. `k`/`h` show and hide the keyboard, `l` queues deferred
/// actions, Back asks to exit, and other printable keys are echoed.
#[derive(Debug, Default)]
pub(crate) struct DemoPolicy {
    max_fps: bool,
    animating: bool,
    ripples: Vec<Ripple>,
    contacts: Vec<Contact>,
    typed: String,
    queued: VecDeque<Opcode>,
    frames: u64,
    width: u32,
    height: u32,
}

impl DemoPolicy {
    pub(crate) fn new(max_fps: bool) -> Self {
        Self {
            max_fps,
            ..Self::default()
        }
    }

    pub(crate) fn resize(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
    }

    pub(crate) fn max_fps(&self) -> bool {
        self.max_fps
    }

    #[cfg(test)]
    pub(crate) fn is_animating(&self) -> bool {
        self.animating
    }

    pub(crate) fn typed(&self) -> &str {
        &self.typed
    }

    pub(crate) fn frames(&self) -> u64 {
        self.frames
    }

    pub(crate) fn touch(
        &mut self,
        phase: TouchPhase,
        id: i32,
        x: f32,
        y: f32,
        pressure: f32,
    ) -> Opcode {
        match phase {
            TouchPhase::Down => {
                self.upsert_contact(id, x, y);
                self.ripples.push(Ripple {
                    x,
                    y,
                    strength: pressure.clamp(0.1, 1.0),
                    age: 0,
                });
                self.begin_animation()
            }
            TouchPhase::Move => {
                self.upsert_contact(id, x, y);
                Opcode::HANDLED
            }
            TouchPhase::Up => {
                self.contacts.retain(|contact| contact.id != id);
                Opcode::HANDLED
            }
        }
    }

    pub(crate) fn key_down(&mut self, stroke: KeyStroke) -> Opcode {
        if stroke.key_code == KEYCODE_BACK {
            return Opcode::EXIT;
        }
        match stroke.character {
            'k' => Opcode::SHOW_KEYBOARD,
            'h' => Opcode::HIDE_KEYBOARD,
            'l' => {
                self.ripples.push(Ripple {
                    x: self.width as f32 / 2.0,
                    y: self.height as f32 / 2.0,
                    strength: 1.0,
                    age: 0,
                });
                self.queued.push_back(Opcode::SHOW_KEYBOARD);
                self.queued.push_back(Opcode::ANIMATION_RUN);
                Opcode::LIST_ACTIONS
            }
            ch if ch != '\0' && !ch.is_control() => {
                if self.typed.chars().count() >= MAX_TYPED_CHARS {
                    self.typed.clear();
                }
                self.typed.push(ch);
                Opcode::HANDLED
            }
            _ => Opcode::NOT_HANDLED,
        }
    }

    pub(crate) fn next_queued(&mut self) -> Opcode {
        match self.queued.pop_front() {
            Some(opcode) => {
                if opcode == Opcode::ANIMATION_RUN {
                    self.animating = true;
                }
                opcode
            }
            None => Opcode::NOT_HANDLED,
        }
    }

    /// Advances one frame and reports whether the animation just finished.
    pub(crate) fn advance(&mut self) -> Opcode {
        self.frames += 1;
        for ripple in &mut self.ripples {
            ripple.age += 1;
        }
        self.ripples
            .retain(|ripple| ripple.age < RIPPLE_LIFETIME_FRAMES);

        if self.animating && self.ripples.is_empty() && self.contacts.is_empty() {
            self.animating = false;
            return Opcode::ANIMATION_STOP;
        }
        Opcode::HANDLED
    }

    fn begin_animation(&mut self) -> Opcode {
        if self.animating {
            Opcode::HANDLED
        } else {
            self.animating = true;
            Opcode::ANIMATION_RUN
        }
    }

    fn upsert_contact(&mut self, id: i32, x: f32, y: f32) {
        match self.contacts.iter_mut().find(|contact| contact.id == id) {
            Some(contact) => {
                contact.x = x;
                contact.y = y;
            }
            None => self.contacts.push(Contact { id, x, y }),
        }
    }

    pub(crate) fn paint(&self, frame: &mut [u8], width: u32, height: u32) {
        for pixel in frame.chunks_exact_mut(4) {
            pixel.copy_from_slice(&CLEAR_COLOR);
        }

        for ripple in &self.ripples {
            let progress = ripple.age as f32 / RIPPLE_LIFETIME_FRAMES as f32;
            let radius = (progress * RIPPLE_MAX_RADIUS_PX * ripple.strength).max(1.0) as i32;
            draw_square_outline(
                frame,
                width,
                height,
                ripple.x as i32,
                ripple.y as i32,
                radius,
                RIPPLE_COLOR,
            );
        }

        for contact in &self.contacts {
            draw_square(
                frame,
                width,
                height,
                contact.x as i32,
                contact.y as i32,
                CONTACT_HALF_SIZE_PX,
                CONTACT_COLOR,
            );
        }

        let baseline = height as i32 - TYPED_CELL_PX;
        for (index, _) in self.typed.chars().enumerate() {
            let cx = TYPED_CELL_PX + index as i32 * TYPED_CELL_PX;
            draw_square(frame, width, height, cx, baseline, TYPED_CELL_PX / 3, TYPED_COLOR);
        }
    }
}

/// Window-backed engine that renders the demo policy with `pixels`.
pub(crate) struct DemoEngine {
    policy: DemoPolicy,
    window: Option<Arc<Window>>,
    pixels: Option<Pixels<'static>>,
    buffer_size: (u32, u32),
}

impl DemoEngine {
    pub(crate) fn new(max_fps: bool) -> Self {
        Self {
            policy: DemoPolicy::new(max_fps),
            window: None,
            pixels: None,
            buffer_size: (0, 0),
        }
    }

    fn build_pixels(
        window: Arc<Window>,
        width: u32,
        height: u32,
    ) -> Result<Pixels<'static>, PixelsError> {
        let surface = SurfaceTexture::new(width, height, window);
        Pixels::new(width, height, surface)
    }

    fn rebuild_pixels(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        let Some(window) = self.window.as_ref() else {
            return;
        };
        match Self::build_pixels(Arc::clone(window), width, height) {
            Ok(pixels) => {
                self.pixels = Some(pixels);
                self.buffer_size = (width, height);
            }
            Err(error) => {
                warn!(error = %error, width, height, "demo_surface_build_failed");
                self.pixels = None;
            }
        }
    }
}

impl EngineBoundary for DemoEngine {
    type Surface = Arc<Window>;

    fn init(&mut self, bundle_path: &Path, data_path: &Path) -> i32 {
        info!(
            bundle = %bundle_path.display(),
            data = %data_path.display(),
            max_fps = self.policy.max_fps(),
            "demo_engine_init"
        );
        0
    }

    fn on_surface_ready(&mut self, surface: &Arc<Window>, geometry: ViewGeometry) {
        self.window = Some(Arc::clone(surface));
        self.policy.resize(geometry.width, geometry.height);
        self.rebuild_pixels(geometry.width, geometry.height);
    }

    fn on_surface_resized(&mut self, width: u32, height: u32) {
        self.policy.resize(width, height);
        self.rebuild_pixels(width, height);
    }

    fn on_draw_frame(&mut self) -> Opcode {
        let opcode = self.policy.advance();
        if let Some(pixels) = self.pixels.as_mut() {
            let (width, height) = self.buffer_size;
            self.policy.paint(pixels.frame_mut(), width, height);
            if let Err(error) = pixels.render() {
                warn!(error = %error, "demo_render_failed");
            }
        }
        opcode
    }

    fn on_focus_changed(&mut self, _surface: &Arc<Window>, focused: bool) {
        debug!(focused, "demo_focus_changed");
    }

    fn on_touch(
        &mut self,
        phase: TouchPhase,
        pointer_id: i32,
        x: f32,
        y: f32,
        pressure: f32,
    ) -> Opcode {
        self.policy.touch(phase, pointer_id, x, y, pressure)
    }

    fn on_key_down(&mut self, stroke: KeyStroke) -> Opcode {
        self.policy.key_down(stroke)
    }

    fn on_key_up(&mut self, _stroke: KeyStroke) {}

    fn next_queued_action(&mut self) -> Opcode {
        self.policy.next_queued()
    }

    fn on_surface_destroyed(&mut self) {
        self.pixels = None;
        self.window = None;
        debug!(
            frames = self.policy.frames(),
            typed = self.policy.typed(),
            "demo_surface_released"
        );
    }

    fn bool_attribute(&mut self, name: &str, default: bool) -> bool {
        if name == MAX_FPS_ATTRIBUTE {
            self.policy.max_fps()
        } else {
            default
        }
    }
}

fn write_pixel_rgba_clipped(frame: &mut [u8], width: usize, x: i32, y: i32, color: [u8; 4]) {
    if x < 0 || y < 0 || x as usize >= width {
        return;
    }
    let Some(pixel_offset) = (y as usize)
        .checked_mul(width)
        .and_then(|row| row.checked_add(x as usize))
    else {
        return;
    };
    let Some(byte_offset) = pixel_offset.checked_mul(4) else {
        return;
    };
    let Some(end) = byte_offset.checked_add(4) else {
        return;
    };
    if end > frame.len() {
        return;
    }
    frame[byte_offset..end].copy_from_slice(&color);
}

fn draw_square(
    frame: &mut [u8],
    width: u32,
    height: u32,
    cx: i32,
    cy: i32,
    half_size: i32,
    color: [u8; 4],
) {
    for y in (cy - half_size)..=(cy + half_size) {
        for x in (cx - half_size)..=(cx + half_size) {
            if x < 0 || y < 0 || x >= width as i32 || y >= height as i32 {
                continue;
            }
            write_pixel_rgba_clipped(frame, width as usize, x, y, color);
        }
    }
}

fn draw_square_outline(
    frame: &mut [u8],
    width: u32,
    height: u32,
    cx: i32,
    cy: i32,
    half_size: i32,
    color: [u8; 4],
) {
    let left = cx - half_size;
    let right = cx + half_size;
    let top = cy - half_size;
    let bottom = cy + half_size;

    for x in left..=right {
        if x >= 0 && x < width as i32 {
            write_pixel_rgba_clipped(frame, width as usize, x, top, color);
            write_pixel_rgba_clipped(frame, width as usize, x, bottom, color);
        }
    }
    for y in top..=bottom {
        if y >= 0 && y < height as i32 {
            write_pixel_rgba_clipped(frame, width as usize, left, y, color);
            write_pixel_rgba_clipped(frame, width as usize, right, y, color);
        }
    }
}

use std::mem;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, trace};

use crate::config::BridgeConfig;
use crate::effects::{HostEffects, RedrawSink, TimerTick};
use crate::engine::{EngineBoundary, Orientation, ViewGeometry};
use crate::input::{
    encode_key, encode_pointer, InputEvent, KeyAction, RawKeyEvent, RawPointerEvent, KEYCODE_BACK,
};
use crate::metrics::{LoopMetrics, LoopTotals};
use crate::opcode::{Opcode, OpcodeDispatcher};
use crate::render_loop::{RenderLoopController, RenderLoopState};
use crate::AppPaths;

/// Whether the host should run its own default handling for a key event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyDisposition {
    Consumed,
    Propagate,
}

impl KeyDisposition {
    pub fn is_consumed(self) -> bool {
        self == KeyDisposition::Consumed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawSource {
    /// The surface's own draw callback, including redraws the timer asked for.
    Surface,
    /// The explicit frame that follows an input event in timer mode.
    Input,
}

/// What the engine made of one [`InputEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputOutcome {
    Pointer { delivered: usize },
    Key(KeyDisposition),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BridgeStatus {
    pub render_state: RenderLoopState,
    pub paused: bool,
    pub surface_live: bool,
    pub geometry: Option<ViewGeometry>,
}

/// Control-thread state tying the engine, the host and the frame loop
/// together. Every method must be called from the single control thread;
/// `&mut self` keeps engine calls strictly sequential.
pub struct Bridge<E: EngineBoundary, H: HostEffects> {
    engine: E,
    host: H,
    render_loop: RenderLoopController,
    dispatcher: OpcodeDispatcher,
    max_fps_attribute: String,
    geometry: Option<ViewGeometry>,
    surface: Option<E::Surface>,
    /// Set while a host redraw is outstanding; further requests fold into it.
    redraw_pending: bool,
    metrics: LoopMetrics,
}

impl<E: EngineBoundary, H: HostEffects> Bridge<E, H> {
    pub fn new(engine: E, host: H, sink: Arc<dyn RedrawSink>, config: BridgeConfig) -> Self {
        let config = config.normalized();
        Self {
            engine,
            host,
            render_loop: RenderLoopController::new(config.timer_interval, sink),
            dispatcher: OpcodeDispatcher::new(config.max_drained_actions),
            max_fps_attribute: config.max_fps_attribute,
            geometry: None,
            surface: None,
            redraw_pending: false,
            metrics: LoopMetrics::new(config.metrics_log_interval),
        }
    }

    pub fn initialize(&mut self, paths: &AppPaths) -> Orientation {
        let raw = self.engine.init(&paths.bundle_dir, &paths.data_dir);
        let orientation = Orientation::from_init_value(raw);
        info!(
            bundle_dir = %paths.bundle_dir.display(),
            data_dir = %paths.data_dir.display(),
            raw,
            ?orientation,
            "engine_initialized"
        );
        orientation
    }

    pub fn surface_created(&mut self, surface: E::Surface, geometry: ViewGeometry) {
        self.engine.on_surface_ready(&surface, geometry);
        self.surface = Some(surface);
        self.geometry = Some(geometry);
        self.redraw_pending = false;

        let max_fps = self.engine.bool_attribute(&self.max_fps_attribute, false);
        self.render_loop.set_max_fps(max_fps);
        info!(
            width = geometry.width,
            height = geometry.height,
            dpi_x = geometry.dpi_x,
            dpi_y = geometry.dpi_y,
            max_fps,
            "surface_created"
        );
        if max_fps {
            self.render_loop.enter_surface_driven();
            self.request_surface_redraw();
        }
    }

    pub fn surface_resized(&mut self, width: u32, height: u32) {
        if let Some(geometry) = self.geometry.as_mut() {
            geometry.width = width;
            geometry.height = height;
        }
        debug!(width, height, "surface_resized");
        self.engine.on_surface_resized(width, height);
    }

    pub fn focus_changed(&mut self, focused: bool) {
        match self.surface.as_ref() {
            Some(surface) => {
                debug!(focused, "focus_changed");
                self.engine.on_focus_changed(surface, focused);
            }
            None => debug!(focused, "focus_changed_without_surface"),
        }
    }

    /// Stops the loop. The `MaxFps` answer is kept, so the timer stays off
    /// until a new surface says otherwise.
    pub fn surface_destroyed(&mut self) {
        self.render_loop.stop();
        self.redraw_pending = false;
        if self.surface.take().is_some() {
            self.engine.on_surface_destroyed();
            info!("surface_destroyed");
        }
    }

    /// Routes a host event to the pointer or key path.
    pub fn handle_input(&mut self, event: &InputEvent) -> InputOutcome {
        match event {
            InputEvent::Pointer(pointer) => InputOutcome::Pointer {
                delivered: self.handle_pointer(pointer),
            },
            InputEvent::Key(key) => InputOutcome::Key(self.handle_key(key)),
        }
    }

    /// Returns the number of touch samples delivered to the engine.
    pub fn handle_pointer(&mut self, event: &RawPointerEvent) -> usize {
        let samples = encode_pointer(event);
        if samples.is_empty() {
            trace!(action = ?event.action, "pointer_event_dropped");
            return 0;
        }

        self.metrics.record_input();
        for sample in &samples {
            let opcode = self.engine.on_touch(
                sample.phase,
                sample.pointer_id,
                sample.x,
                sample.y,
                sample.pressure,
            );
            if opcode.is_handled() {
                self.dispatch(opcode);
            }
        }
        self.draw_after_input();
        samples.len()
    }

    pub fn handle_key(&mut self, event: &RawKeyEvent) -> KeyDisposition {
        self.metrics.record_input();
        let disposition = match event.action {
            KeyAction::Down => self.key_down(event),
            KeyAction::Up => self.key_up(event),
            KeyAction::Multiple => {
                let down = self.key_down(event);
                let up = self.key_up(event);
                if down.is_consumed() || up.is_consumed() {
                    KeyDisposition::Consumed
                } else {
                    KeyDisposition::Propagate
                }
            }
        };
        self.draw_after_input();
        disposition
    }

    fn key_down(&mut self, event: &RawKeyEvent) -> KeyDisposition {
        let stroke = encode_key(event);
        let opcode = self.engine.on_key_down(stroke);
        trace!(
            key_code = stroke.key_code,
            modifiers = stroke.modifiers.wire_bits(),
            opcode = opcode.0,
            "key_down"
        );

        if stroke.key_code == KEYCODE_BACK {
            // Back falls through to the host only when the engine asks to exit.
            if opcode == Opcode::EXIT {
                info!("engine_requested_exit");
                return KeyDisposition::Propagate;
            }
            return KeyDisposition::Consumed;
        }

        if opcode.is_handled() {
            self.dispatch(opcode);
            KeyDisposition::Consumed
        } else {
            KeyDisposition::Propagate
        }
    }

    fn key_up(&mut self, event: &RawKeyEvent) -> KeyDisposition {
        self.engine.on_key_up(encode_key(event));
        KeyDisposition::Consumed
    }

    /// Runs one engine frame and dispatches the opcode it returns. Returns
    /// `None` when no frame ran: there is no surface, or the redraw this
    /// surface draw answers was requested by a loop that has since stopped.
    pub fn draw_frame(&mut self, source: DrawSource) -> Option<Opcode> {
        if self.surface.is_none() {
            trace!(?source, "draw_without_surface_skipped");
            return None;
        }
        if source == DrawSource::Surface {
            let answered = mem::take(&mut self.redraw_pending);
            if answered && self.render_loop.state() == RenderLoopState::Stopped {
                self.metrics.record_stale_redraw();
                trace!("stale_redraw_dropped");
                return None;
            }
        }

        let started = Instant::now();
        let opcode = self.engine.on_draw_frame();
        self.metrics.record_draw(source, started.elapsed());
        if opcode.0 > 0 {
            self.dispatch(opcode);
        }
        if source == DrawSource::Surface {
            self.request_surface_redraw();
        }
        self.log_metrics();
        Some(opcode)
    }

    /// Handles a tick posted by the render timer. Stale or paused ticks are
    /// dropped; accepted ones invalidate the surface.
    pub fn timer_tick(&mut self, tick: TimerTick) -> bool {
        let accepted = self.render_loop.accept_tick(tick);
        self.metrics.record_tick(accepted);
        if accepted {
            self.request_redraw();
        } else {
            trace!(
                generation = tick.generation,
                sequence = tick.sequence,
                "timer_tick_suppressed"
            );
        }
        accepted
    }

    pub fn set_paused(&mut self, paused: bool) {
        self.render_loop.set_paused(paused);
        if !paused {
            // Hosts may drop redraws while hidden.
            self.redraw_pending = false;
            self.request_surface_redraw();
        }
    }

    pub fn shutdown(&mut self) {
        self.render_loop.teardown();
        if self.surface.take().is_some() {
            self.engine.on_surface_destroyed();
        }
        info!("bridge_shutdown");
    }

    pub fn status(&self) -> BridgeStatus {
        BridgeStatus {
            render_state: self.render_loop.state(),
            paused: self.render_loop.is_paused(),
            surface_live: self.surface.is_some(),
            geometry: self.geometry,
        }
    }

    pub fn render_state(&self) -> RenderLoopState {
        self.render_loop.state()
    }

    pub fn render_loop(&self) -> &RenderLoopController {
        &self.render_loop
    }

    pub fn geometry(&self) -> Option<ViewGeometry> {
        self.geometry
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn loop_totals(&self) -> LoopTotals {
        self.metrics.totals()
    }

    fn dispatch(&mut self, opcode: Opcode) {
        let report = self.dispatcher.dispatch(
            opcode,
            &mut self.engine,
            &mut self.host,
            &mut self.render_loop,
        );
        trace!(
            opcode = opcode.0,
            effects = report.effects,
            drained = report.drained,
            "opcode_dispatched"
        );
    }

    fn draw_after_input(&mut self) {
        if self.surface.is_some() && !self.render_loop.is_surface_driven() {
            self.draw_frame(DrawSource::Input);
        }
    }

    fn request_surface_redraw(&mut self) {
        if self.render_loop.is_surface_driven() && !self.render_loop.is_paused() {
            self.request_redraw();
        }
    }

    fn request_redraw(&mut self) {
        if self.redraw_pending {
            self.metrics.record_coalesced_redraw();
            return;
        }
        self.redraw_pending = true;
        self.host.request_redraw();
    }

    fn log_metrics(&mut self) {
        if let Some(window) = self.metrics.take_window(Instant::now()) {
            info!(
                draws_per_second = window.draws_per_second,
                slowest_draw_ms = window.slowest_draw_ms,
                accepted_ticks = window.totals.accepted_ticks,
                suppressed_ticks = window.totals.suppressed_ticks,
                coalesced_redraws = window.totals.coalesced_redraws,
                stale_redraws = window.totals.stale_redraws,
                input_events = window.totals.input_events,
                render_state = ?self.render_loop.state(),
                "loop_metrics"
            );
        }
    }
}

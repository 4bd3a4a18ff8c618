use std::process::ExitCode;
use std::sync::{Arc, Mutex, PoisonError};

use bridge::{
    resolve_app_paths, AssetError, Bridge, DrawSource, HostEffects, KeyDisposition, Orientation,
    RawPointerEvent, RedrawSink, StartupError, TimerTick, ViewGeometry, KEYCODE_BACK,
};
use thiserror::Error;
use tracing::{debug, error, info, trace};
use winit::dpi::{LogicalSize, PhysicalSize};
use winit::error::{EventLoopError, OsError};
use winit::event::{ElementState, Event, Ime, MouseButton, WindowEvent};
use winit::event_loop::{ControlFlow, EventLoopBuilder, EventLoopProxy};
use winit::keyboard::PhysicalKey;
use winit::window::{Window, WindowBuilder};

use super::bootstrap::{stage_assets, AppWiring, HostConfig, HostMode};
use super::demo_engine::DemoEngine;
use super::keymap::{committed_text_event, raw_key_event, ModifierTracker};
use super::replay::{replay_script, ReplayError};
use super::touch::{MousePointer, TouchTracker};

const BASE_DPI: f64 = 96.0;

#[derive(Debug, Clone, Copy)]
enum HostEvent {
    TimerTick(TimerTick),
}

#[derive(Debug, Error)]
pub(crate) enum AppError {
    #[error(transparent)]
    Startup(#[from] StartupError),
    #[error(transparent)]
    Assets(#[from] AssetError),
    #[error(transparent)]
    Replay(#[from] ReplayError),
    #[error("failed to create event loop: {0}")]
    CreateEventLoop(#[source] EventLoopError),
    #[error("failed to create application window: {0}")]
    CreateWindow(#[source] OsError),
    #[error("event loop failed: {0}")]
    EventLoopRun(#[source] EventLoopError),
}

pub(crate) fn run(app: AppWiring) -> ExitCode {
    let result = match &app.mode {
        HostMode::Window => run_window(&app.config),
        HostMode::Replay { script } => replay_script(&app.config, script)
            .map(|summary| summary.print())
            .map_err(AppError::from),
    };

    if let Err(err) = result {
        error!(error = %err, "startup_failed");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

/// Posts timer ticks onto the winit loop, which is the control thread in the
/// windowed host.
struct ProxyRedrawSink {
    proxy: Mutex<EventLoopProxy<HostEvent>>,
}

impl RedrawSink for ProxyRedrawSink {
    fn request_timer_redraw(&self, tick: TimerTick) {
        let proxy = self.proxy.lock().unwrap_or_else(PoisonError::into_inner);
        if proxy.send_event(HostEvent::TimerTick(tick)).is_err() {
            trace!(generation = tick.generation, "timer_tick_after_loop_exit");
        }
    }
}

/// IME permission stands in for the soft keyboard on desktop.
struct WindowHostEffects {
    window: Arc<Window>,
}

impl HostEffects for WindowHostEffects {
    fn show_keyboard(&mut self) {
        info!("soft_keyboard_shown");
        self.window.set_ime_allowed(true);
    }

    fn hide_keyboard(&mut self) {
        info!("soft_keyboard_hidden");
        self.window.set_ime_allowed(false);
    }

    fn request_redraw(&mut self) {
        self.window.request_redraw();
    }
}

#[derive(Debug, Default)]
struct Visibility {
    occluded: bool,
    unfocused: bool,
}

impl Visibility {
    fn paused(&self) -> bool {
        self.occluded || self.unfocused
    }
}

fn geometry_for(window: &Window) -> ViewGeometry {
    let size = window.inner_size();
    let dpi = (window.scale_factor() * BASE_DPI) as f32;
    ViewGeometry {
        width: size.width,
        height: size.height,
        dpi_x: dpi,
        dpi_y: dpi,
    }
}

fn run_window(config: &HostConfig) -> Result<(), AppError> {
    let app_paths = resolve_app_paths()?;
    info!(
        bundle_dir = %app_paths.bundle_dir.display(),
        data_dir = %app_paths.data_dir.display(),
        "startup"
    );
    if config.stage_assets {
        stage_assets(&app_paths)?;
    }

    let event_loop = EventLoopBuilder::<HostEvent>::with_user_event()
        .build()
        .map_err(AppError::CreateEventLoop)?;
    let window = Arc::new(
        WindowBuilder::new()
            .with_title(config.window_title.clone())
            .with_inner_size(LogicalSize::new(
                config.window_width as f64,
                config.window_height as f64,
            ))
            .build(&event_loop)
            .map_err(AppError::CreateWindow)?,
    );
    window.set_ime_allowed(false);

    let sink = Arc::new(ProxyRedrawSink {
        proxy: Mutex::new(event_loop.create_proxy()),
    });
    let host = WindowHostEffects {
        window: Arc::clone(&window),
    };
    let mut bridge = Bridge::new(
        DemoEngine::new(config.demo_max_fps),
        host,
        sink,
        config.bridge_config(),
    );

    let orientation = bridge.initialize(&app_paths);
    apply_orientation(&window, orientation);

    event_loop.set_control_flow(ControlFlow::Wait);

    let mut touches = TouchTracker::default();
    let mut mouse = MousePointer::default();
    let mut modifiers = ModifierTracker::default();
    let mut visibility = Visibility::default();

    event_loop
        .run(move |event, window_target| match event {
            Event::Resumed => {
                if !bridge.status().surface_live {
                    bridge.surface_created(Arc::clone(&window), geometry_for(&window));
                }
            }
            Event::Suspended => bridge.surface_destroyed(),
            Event::UserEvent(HostEvent::TimerTick(tick)) => {
                bridge.timer_tick(tick);
            }
            Event::WindowEvent { window_id, event } if window_id == window.id() => match event {
                WindowEvent::CloseRequested => {
                    info!(reason = "window_close", "shutdown_requested");
                    window_target.exit();
                }
                WindowEvent::Resized(size) => bridge.surface_resized(size.width, size.height),
                WindowEvent::ScaleFactorChanged { .. } => {
                    let size = window.inner_size();
                    bridge.surface_resized(size.width, size.height);
                }
                WindowEvent::Focused(focused) => {
                    visibility.unfocused = !focused;
                    bridge.focus_changed(focused);
                    bridge.set_paused(visibility.paused());
                }
                WindowEvent::Occluded(occluded) => {
                    visibility.occluded = occluded;
                    bridge.set_paused(visibility.paused());
                }
                WindowEvent::Touch(touch) => {
                    let pressure = touch.force.map(|force| force.normalized() as f32);
                    if let Some(raw) = touches.handle(
                        touch.phase,
                        touch.id,
                        touch.location.x as f32,
                        touch.location.y as f32,
                        pressure,
                    ) {
                        deliver_pointer(&mut bridge, &raw);
                    }
                }
                WindowEvent::CursorMoved { position, .. } => {
                    if let Some(raw) = mouse.moved(position.x as f32, position.y as f32) {
                        deliver_pointer(&mut bridge, &raw);
                    }
                }
                WindowEvent::CursorLeft { .. } => {
                    if let Some(raw) = mouse.left_window() {
                        deliver_pointer(&mut bridge, &raw);
                    }
                }
                WindowEvent::MouseInput {
                    state,
                    button: MouseButton::Left,
                    ..
                } => {
                    if let Some(raw) = mouse.button(state == ElementState::Pressed) {
                        deliver_pointer(&mut bridge, &raw);
                    }
                }
                WindowEvent::ModifiersChanged(state) => modifiers.set_held(state.state()),
                WindowEvent::KeyboardInput {
                    event,
                    is_synthetic: false,
                    ..
                } => {
                    let PhysicalKey::Code(code) = event.physical_key else {
                        debug!("unidentified_key_ignored");
                        return;
                    };
                    let pressed = event.state == ElementState::Pressed;
                    if pressed && !event.repeat {
                        modifiers.observe_press(code);
                    }
                    let raw = raw_key_event(
                        code,
                        event.text.as_deref(),
                        pressed,
                        event.repeat,
                        &modifiers,
                    );
                    let disposition = bridge.handle_key(&raw);
                    if pressed
                        && raw.key_code == KEYCODE_BACK
                        && disposition == KeyDisposition::Propagate
                    {
                        info!(reason = "back_key", "shutdown_requested");
                        window_target.exit();
                    }
                }
                WindowEvent::Ime(Ime::Commit(text)) => {
                    if let Some(raw) = committed_text_event(&text, &modifiers) {
                        bridge.handle_key(&raw);
                    }
                }
                WindowEvent::RedrawRequested => {
                    if bridge.status().surface_live {
                        bridge.draw_frame(DrawSource::Surface);
                    }
                }
                _ => {}
            },
            Event::LoopExiting => {
                bridge.shutdown();
                info!("shutdown");
            }
            _ => {}
        })
        .map_err(AppError::EventLoopRun)
}

fn deliver_pointer(bridge: &mut Bridge<DemoEngine, WindowHostEffects>, raw: &RawPointerEvent) {
    let delivered = bridge.handle_pointer(raw);
    trace!(action = ?raw.action, delivered, "pointer_delivered");
}

/// Desktop windows cannot rotate, so a portrait request swaps a landscape
/// window's dimensions instead.
fn apply_orientation(window: &Window, orientation: Orientation) {
    let size = window.inner_size();
    let wants_swap = match orientation {
        Orientation::Portrait => size.width > size.height,
        Orientation::Landscape => size.height > size.width,
        Orientation::DeviceDefault => false,
    };
    info!(?orientation, swapped = wants_swap, "orientation_applied");
    if wants_swap {
        let _ = window.request_inner_size(PhysicalSize::new(size.height, size.width));
    }
}

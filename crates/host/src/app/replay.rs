use std::collections::{BTreeMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use bridge::{
    resolve_app_paths, AppPaths, AssetError, Bridge, BridgeConfig, ChannelRedrawSink,
    ControlError, ControlHandle, ControlRequest, ControlSummary, ControlThread, DrawSource,
    EngineBoundary, HostEffects, InputEvent, KeyStroke, Opcode, Orientation, RenderLoopState,
    StartupError, TouchPhase, ViewGeometry,
};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

use super::bootstrap::{stage_assets, HostConfig};

const DEFAULT_DPI: f32 = 160.0;
const MAX_FPS_ATTRIBUTE: &str = "MaxFps";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub(crate) enum ReplayStep {
    SurfaceCreated {
        width: u32,
        height: u32,
        #[serde(default = "default_dpi")]
        dpi: f32,
        #[serde(default)]
        max_fps: bool,
    },
    SurfaceResized {
        width: u32,
        height: u32,
    },
    SurfaceDestroyed,
    Focus {
        focused: bool,
    },
    Paused {
        paused: bool,
    },
    /// Opcodes the engine answers with, consumed in order per entry point.
    Replies {
        #[serde(default)]
        touch: Vec<Opcode>,
        #[serde(default)]
        key: Vec<Opcode>,
        #[serde(default)]
        draw: Vec<Opcode>,
        #[serde(default)]
        queued: Vec<Opcode>,
    },
    Input {
        event: InputEvent,
    },
    Draw {
        #[serde(default = "default_draw_count")]
        count: u32,
    },
    Wait {
        ms: u64,
    },
    ExpectState {
        state: ExpectedState,
    },
}

fn default_dpi() -> f32 {
    DEFAULT_DPI
}

fn default_draw_count() -> u32 {
    1
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum ExpectedState {
    Stopped,
    TimerDriven,
    SurfaceDriven,
}

impl ExpectedState {
    fn matches(self, state: RenderLoopState) -> bool {
        matches!(
            (self, state),
            (ExpectedState::Stopped, RenderLoopState::Stopped)
                | (ExpectedState::TimerDriven, RenderLoopState::RunningTimerDriven)
                | (ExpectedState::SurfaceDriven, RenderLoopState::RunningSurfaceDriven)
        )
    }
}

#[derive(Debug, Error)]
pub(crate) enum ReplayError {
    #[error("failed to read replay script {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid replay step on line {line} at {field}: {source}")]
    Parse {
        line: usize,
        field: String,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Startup(#[from] StartupError),
    #[error(transparent)]
    Assets(#[from] AssetError),
    #[error(transparent)]
    Control(#[from] ControlError),
    #[error("line {line}: expected render loop {expected:?}, found {actual:?}")]
    Expectation {
        line: usize,
        expected: ExpectedState,
        actual: RenderLoopState,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ReplaySummary {
    pub orientation: Orientation,
    pub control: ControlSummary,
    pub calls: BTreeMap<&'static str, u64>,
    pub keyboard_shows: u32,
    pub keyboard_hides: u32,
    pub keyboard_visible: bool,
    pub key_dispositions: Vec<bool>,
}

impl ReplaySummary {
    pub(crate) fn print(&self) {
        println!("orientation={:?}", self.orientation);
        println!("requests={}", self.control.requests);
        println!("draws={}", self.control.draws);
        println!("accepted_ticks={}", self.control.loop_totals.accepted_ticks);
        println!("suppressed_ticks={}", self.control.loop_totals.suppressed_ticks);
        println!("coalesced_redraws={}", self.control.loop_totals.coalesced_redraws);
        println!("stale_redraws={}", self.control.loop_totals.stale_redraws);
        println!("pointer_samples={}", self.control.pointer_samples);
        println!("final_state={:?}", self.control.final_state);
        println!(
            "keyboard shows={} hides={} visible={}",
            self.keyboard_shows, self.keyboard_hides, self.keyboard_visible
        );
        for (call, count) in &self.calls {
            println!("engine.{call}={count}");
        }
    }
}

/// Script-controlled state shared between the replay driver and the engine
/// running on the control thread.
#[derive(Debug, Default)]
struct TraceState {
    max_fps: bool,
    touch_replies: VecDeque<Opcode>,
    key_replies: VecDeque<Opcode>,
    draw_replies: VecDeque<Opcode>,
    queued: VecDeque<Opcode>,
    calls: BTreeMap<&'static str, u64>,
    keyboard_shows: u32,
    keyboard_hides: u32,
    keyboard_visible: bool,
}

type SharedTrace = Arc<Mutex<TraceState>>;

fn lock(shared: &SharedTrace) -> MutexGuard<'_, TraceState> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

struct TraceEngine {
    shared: SharedTrace,
}

impl TraceEngine {
    fn record(&self, call: &'static str) -> MutexGuard<'_, TraceState> {
        let mut state = lock(&self.shared);
        *state.calls.entry(call).or_default() += 1;
        state
    }
}

impl EngineBoundary for TraceEngine {
    type Surface = ();

    fn init(&mut self, _bundle_path: &Path, _data_path: &Path) -> i32 {
        self.record("init");
        0
    }

    fn on_surface_ready(&mut self, _surface: &(), _geometry: ViewGeometry) {
        self.record("surface_ready");
    }

    fn on_surface_resized(&mut self, _width: u32, _height: u32) {
        self.record("surface_resized");
    }

    fn on_draw_frame(&mut self) -> Opcode {
        self.record("draw")
            .draw_replies
            .pop_front()
            .unwrap_or(Opcode::HANDLED)
    }

    fn on_focus_changed(&mut self, _surface: &(), _focused: bool) {
        self.record("focus");
    }

    fn on_touch(
        &mut self,
        phase: TouchPhase,
        pointer_id: i32,
        _x: f32,
        _y: f32,
        _pressure: f32,
    ) -> Opcode {
        debug!(?phase, pointer_id, "trace_touch");
        self.record("touch")
            .touch_replies
            .pop_front()
            .unwrap_or(Opcode::HANDLED)
    }

    fn on_key_down(&mut self, stroke: KeyStroke) -> Opcode {
        debug!(
            character = %stroke.character.escape_debug(),
            key_code = stroke.key_code,
            modifiers = stroke.modifiers.wire_bits(),
            "trace_key_down"
        );
        self.record("key_down")
            .key_replies
            .pop_front()
            .unwrap_or(Opcode::HANDLED)
    }

    fn on_key_up(&mut self, _stroke: KeyStroke) {
        self.record("key_up");
    }

    fn next_queued_action(&mut self) -> Opcode {
        self.record("next_queued_action")
            .queued
            .pop_front()
            .unwrap_or(Opcode::NOT_HANDLED)
    }

    fn on_surface_destroyed(&mut self) {
        self.record("surface_destroyed");
    }

    fn bool_attribute(&mut self, name: &str, default: bool) -> bool {
        if name == MAX_FPS_ATTRIBUTE {
            lock(&self.shared).max_fps
        } else {
            default
        }
    }
}

/// Headless host: keyboard requests are counted and redraws go straight back
/// onto the control queue.
struct ReplayHost {
    sink: ChannelRedrawSink<()>,
    shared: SharedTrace,
}

impl HostEffects for ReplayHost {
    fn show_keyboard(&mut self) {
        let mut state = lock(&self.shared);
        state.keyboard_shows += 1;
        state.keyboard_visible = true;
    }

    fn hide_keyboard(&mut self) {
        let mut state = lock(&self.shared);
        state.keyboard_hides += 1;
        state.keyboard_visible = false;
    }

    fn request_redraw(&mut self) {
        self.sink.request_draw();
    }
}

pub(crate) fn load_script(path: &Path) -> Result<Vec<(usize, ReplayStep)>, ReplayError> {
    let raw = fs::read_to_string(path).map_err(|source| ReplayError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_script(&raw)
}

/// One JSON step per line. Blank lines and lines starting with `#` are skipped.
pub(crate) fn parse_script(raw: &str) -> Result<Vec<(usize, ReplayStep)>, ReplayError> {
    let mut steps = Vec::new();
    for (index, line) in raw.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let line_number = index + 1;
        let mut deserializer = serde_json::Deserializer::from_str(trimmed);
        let step = serde_path_to_error::deserialize::<_, ReplayStep>(&mut deserializer).map_err(
            |error| ReplayError::Parse {
                line: line_number,
                field: error.path().to_string(),
                source: error.into_inner(),
            },
        )?;
        steps.push((line_number, step));
    }
    Ok(steps)
}

/// Headless entry point: resolves paths, stages assets and runs the script.
pub(crate) fn replay_script(
    config: &HostConfig,
    script: &Path,
) -> Result<ReplaySummary, ReplayError> {
    let steps = load_script(script)?;
    let paths = resolve_app_paths()?;
    if config.stage_assets {
        stage_assets(&paths)?;
    }
    run_replay(steps, paths, config.bridge_config())
}

pub(crate) fn run_replay(
    steps: Vec<(usize, ReplayStep)>,
    paths: AppPaths,
    config: BridgeConfig,
) -> Result<ReplaySummary, ReplayError> {
    let shared: SharedTrace = Arc::default();
    let engine_shared = Arc::clone(&shared);
    let control = ControlThread::spawn(move |sink: ChannelRedrawSink<()>| {
        let host = ReplayHost {
            sink: sink.clone(),
            shared: Arc::clone(&engine_shared),
        };
        let engine = TraceEngine {
            shared: engine_shared,
        };
        Bridge::new(engine, host, Arc::new(sink), config)
    })?;
    let handle = control.handle();

    let orientation = handle.initialize(paths)?;
    info!(?orientation, steps = steps.len(), "replay_started");

    let mut key_dispositions = Vec::new();
    for (line, step) in steps {
        apply_step(&handle, &shared, line, step, &mut key_dispositions)?;
    }

    let control_summary = control.shutdown()?;
    let state = lock(&shared);
    Ok(ReplaySummary {
        orientation,
        control: control_summary,
        calls: state.calls.clone(),
        keyboard_shows: state.keyboard_shows,
        keyboard_hides: state.keyboard_hides,
        keyboard_visible: state.keyboard_visible,
        key_dispositions,
    })
}

fn apply_step(
    handle: &ControlHandle<()>,
    shared: &SharedTrace,
    line: usize,
    step: ReplayStep,
    key_dispositions: &mut Vec<bool>,
) -> Result<(), ReplayError> {
    match step {
        ReplayStep::SurfaceCreated {
            width,
            height,
            dpi,
            max_fps,
        } => {
            handle.status()?;
            lock(shared).max_fps = max_fps;
            handle.send(ControlRequest::SurfaceCreated {
                surface: (),
                geometry: ViewGeometry {
                    width,
                    height,
                    dpi_x: dpi,
                    dpi_y: dpi,
                },
            })?;
        }
        ReplayStep::SurfaceResized { width, height } => {
            handle.send(ControlRequest::SurfaceResized { width, height })?;
        }
        ReplayStep::SurfaceDestroyed => handle.send(ControlRequest::SurfaceDestroyed)?,
        ReplayStep::Focus { focused } => handle.send(ControlRequest::FocusChanged(focused))?,
        ReplayStep::Paused { paused } => handle.send(ControlRequest::SetPaused(paused))?,
        ReplayStep::Replies {
            touch,
            key,
            draw,
            queued,
        } => {
            // Earlier requests must not consume replies meant for later ones.
            handle.status()?;
            let mut state = lock(shared);
            state.touch_replies.extend(touch);
            state.key_replies.extend(key);
            state.draw_replies.extend(draw);
            state.queued.extend(queued);
        }
        ReplayStep::Input { event } => match event {
            InputEvent::Pointer(pointer) => handle.input(InputEvent::Pointer(pointer))?,
            InputEvent::Key(key) => {
                let disposition = handle.key(key)?;
                key_dispositions.push(disposition.is_consumed());
            }
        },
        ReplayStep::Draw { count } => {
            for _ in 0..count {
                handle.send(ControlRequest::DrawFrame(DrawSource::Surface))?;
            }
        }
        ReplayStep::Wait { ms } => thread::sleep(Duration::from_millis(ms)),
        ReplayStep::ExpectState { state: expected } => {
            let actual = handle.status()?.render_state;
            if !expected.matches(actual) {
                return Err(ReplayError::Expectation {
                    line,
                    expected,
                    actual,
                });
            }
        }
    }
    Ok(())
}

//! Control thread that owns the [`Bridge`].
//!
//! Host threads and the render timer never touch the engine directly. They
//! post [`ControlRequest`]s to a single worker, which applies them in arrival
//! order. Engine calls therefore never overlap and never re-enter.

use std::io;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};

use thiserror::Error;
use tracing::{debug, info, trace, warn};

use crate::bridge::{Bridge, BridgeStatus, DrawSource, InputOutcome, KeyDisposition};
use crate::effects::{HostEffects, RedrawSink, TimerTick};
use crate::engine::{EngineBoundary, Orientation, ViewGeometry};
use crate::input::{InputEvent, RawKeyEvent};
use crate::metrics::LoopTotals;
use crate::render_loop::RenderLoopState;
use crate::AppPaths;

const CONTROL_THREAD_NAME: &str = "bridge-control";

pub enum ControlRequest<S> {
    Initialize {
        paths: AppPaths,
        reply: Option<Sender<Orientation>>,
    },
    SurfaceCreated {
        surface: S,
        geometry: ViewGeometry,
    },
    SurfaceResized {
        width: u32,
        height: u32,
    },
    SurfaceDestroyed,
    FocusChanged(bool),
    /// `reply` receives the disposition of key events; pointer events
    /// never answer.
    Input {
        event: InputEvent,
        reply: Option<Sender<KeyDisposition>>,
    },
    DrawFrame(DrawSource),
    TimerTick(TimerTick),
    SetPaused(bool),
    Status(Sender<BridgeStatus>),
    Shutdown,
}

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("control thread is no longer accepting requests")]
    Disconnected,
    #[error("failed to spawn control thread: {0}")]
    Spawn(#[source] io::Error),
    #[error("control thread panicked")]
    WorkerPanicked,
}

/// Counters reported when the control thread exits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlSummary {
    pub requests: u64,
    /// `DrawFrame` requests that actually ran a frame.
    pub draws: u64,
    pub pointer_samples: u64,
    pub loop_totals: LoopTotals,
    pub final_state: RenderLoopState,
}

impl ControlSummary {
    fn new() -> Self {
        Self {
            requests: 0,
            draws: 0,
            pointer_samples: 0,
            loop_totals: LoopTotals::default(),
            final_state: RenderLoopState::Stopped,
        }
    }
}

/// Cloneable sender for posting requests to the control thread.
pub struct ControlHandle<S> {
    sender: Sender<ControlRequest<S>>,
}

impl<S> Clone for ControlHandle<S> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl<S> ControlHandle<S> {
    pub fn send(&self, request: ControlRequest<S>) -> Result<(), ControlError> {
        self.sender
            .send(request)
            .map_err(|_| ControlError::Disconnected)
    }

    pub fn initialize(&self, paths: AppPaths) -> Result<Orientation, ControlError> {
        let (reply, response) = mpsc::channel();
        self.send(ControlRequest::Initialize {
            paths,
            reply: Some(reply),
        })?;
        response.recv().map_err(|_| ControlError::Disconnected)
    }

    /// Posts an input event without waiting for it to be handled.
    pub fn input(&self, event: InputEvent) -> Result<(), ControlError> {
        self.send(ControlRequest::Input { event, reply: None })
    }

    /// Posts a key event and waits for the engine's verdict.
    pub fn key(&self, event: RawKeyEvent) -> Result<KeyDisposition, ControlError> {
        let (reply, response) = mpsc::channel();
        self.send(ControlRequest::Input {
            event: InputEvent::Key(event),
            reply: Some(reply),
        })?;
        response.recv().map_err(|_| ControlError::Disconnected)
    }

    pub fn status(&self) -> Result<BridgeStatus, ControlError> {
        let (reply, response) = mpsc::channel();
        self.send(ControlRequest::Status(reply))?;
        response.recv().map_err(|_| ControlError::Disconnected)
    }
}

/// [`RedrawSink`] that turns timer ticks into control requests.
pub struct ChannelRedrawSink<S> {
    sender: Sender<ControlRequest<S>>,
}

impl<S> Clone for ChannelRedrawSink<S> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl<S> ChannelRedrawSink<S> {
    /// Queues a surface draw behind whatever is already pending. Used by
    /// hosts that have no surface of their own to invalidate.
    pub fn request_draw(&self) {
        if self
            .sender
            .send(ControlRequest::DrawFrame(DrawSource::Surface))
            .is_err()
        {
            trace!("draw_request_after_shutdown");
        }
    }
}

impl<S: Send + 'static> RedrawSink for ChannelRedrawSink<S> {
    fn request_timer_redraw(&self, tick: TimerTick) {
        if self.sender.send(ControlRequest::TimerTick(tick)).is_err() {
            trace!(generation = tick.generation, "timer_tick_after_shutdown");
        }
    }
}

pub struct ControlThread<S> {
    handle: ControlHandle<S>,
    worker: Option<JoinHandle<ControlSummary>>,
}

impl<S: Send + 'static> ControlThread<S> {
    /// Spawns the worker. `factory` runs on the worker thread, so the engine
    /// itself never has to be `Send`.
    pub fn spawn<E, H, F>(factory: F) -> Result<Self, ControlError>
    where
        E: EngineBoundary<Surface = S> + 'static,
        H: HostEffects + 'static,
        F: FnOnce(ChannelRedrawSink<S>) -> Bridge<E, H> + Send + 'static,
    {
        let (sender, receiver) = mpsc::channel();
        let sink = ChannelRedrawSink {
            sender: sender.clone(),
        };
        let worker = thread::Builder::new()
            .name(CONTROL_THREAD_NAME.to_string())
            .spawn(move || {
                let bridge = factory(sink);
                run_worker(bridge, receiver)
            })
            .map_err(ControlError::Spawn)?;
        info!(thread = CONTROL_THREAD_NAME, "control_thread_spawned");

        Ok(Self {
            handle: ControlHandle { sender },
            worker: Some(worker),
        })
    }

    pub fn handle(&self) -> ControlHandle<S> {
        self.handle.clone()
    }

    /// Tears the bridge down after every request queued so far and waits for
    /// the worker to exit.
    pub fn shutdown(mut self) -> Result<ControlSummary, ControlError> {
        self.finish()
    }

    fn finish(&mut self) -> Result<ControlSummary, ControlError> {
        let Some(worker) = self.worker.take() else {
            return Err(ControlError::Disconnected);
        };
        if self.handle.send(ControlRequest::Shutdown).is_err() {
            trace!("shutdown_request_after_worker_exit");
        }
        worker.join().map_err(|_| ControlError::WorkerPanicked)
    }
}

impl<S> Drop for ControlThread<S> {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            if self.handle.send(ControlRequest::Shutdown).is_err() {
                trace!("shutdown_request_after_worker_exit");
            }
            if worker.join().is_err() {
                warn!("control_thread_panicked");
            }
        }
    }
}

fn run_worker<E, H>(
    mut bridge: Bridge<E, H>,
    receiver: Receiver<ControlRequest<E::Surface>>,
) -> ControlSummary
where
    E: EngineBoundary,
    H: HostEffects,
{
    let mut summary = ControlSummary::new();
    debug!("control_thread_started");

    while let Ok(request) = receiver.recv() {
        summary.requests += 1;
        match request {
            ControlRequest::Initialize { paths, reply } => {
                let orientation = bridge.initialize(&paths);
                if let Some(reply) = reply {
                    let _ = reply.send(orientation);
                }
            }
            ControlRequest::SurfaceCreated { surface, geometry } => {
                bridge.surface_created(surface, geometry);
            }
            ControlRequest::SurfaceResized { width, height } => {
                bridge.surface_resized(width, height);
            }
            ControlRequest::SurfaceDestroyed => bridge.surface_destroyed(),
            ControlRequest::FocusChanged(focused) => bridge.focus_changed(focused),
            ControlRequest::Input { event, reply } => match bridge.handle_input(&event) {
                InputOutcome::Pointer { delivered } => {
                    summary.pointer_samples += delivered as u64;
                }
                InputOutcome::Key(disposition) => {
                    if let Some(reply) = reply {
                        let _ = reply.send(disposition);
                    }
                }
            },
            ControlRequest::DrawFrame(source) => {
                if bridge.draw_frame(source).is_some() {
                    summary.draws += 1;
                }
            }
            ControlRequest::TimerTick(tick) => {
                bridge.timer_tick(tick);
            }
            ControlRequest::SetPaused(paused) => bridge.set_paused(paused),
            ControlRequest::Status(reply) => {
                let _ = reply.send(bridge.status());
            }
            ControlRequest::Shutdown => break,
        }
    }

    bridge.shutdown();
    summary.final_state = bridge.render_state();
    summary.loop_totals = bridge.loop_totals();
    info!(
        requests = summary.requests,
        draws = summary.draws,
        accepted_ticks = summary.loop_totals.accepted_ticks,
        suppressed_ticks = summary.loop_totals.suppressed_ticks,
        coalesced_redraws = summary.loop_totals.coalesced_redraws,
        stale_redraws = summary.loop_totals.stale_redraws,
        pointer_samples = summary.pointer_samples,
        "control_thread_stopped"
    );
    summary
}

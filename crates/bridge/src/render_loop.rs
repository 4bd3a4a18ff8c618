use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::effects::{RedrawSink, TimerTick};

const TIMER_THREAD_NAME: &str = "render-timer";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderLoopState {
    Stopped,
    RunningTimerDriven,
    RunningSurfaceDriven,
}

/// Owns the frame cadence. In timer-driven mode a single background thread
/// posts ticks to a [`RedrawSink`]; in surface-driven mode the host's
/// surface refresh drives frames and no timer exists.
pub struct RenderLoopController {
    state: RenderLoopState,
    interval: Duration,
    paused: Arc<AtomicBool>,
    sink: Arc<dyn RedrawSink>,
    timer: Option<FrameTimer>,
    generation: u64,
    timers_started: u64,
    max_fps: bool,
}

impl RenderLoopController {
    pub fn new(interval: Duration, sink: Arc<dyn RedrawSink>) -> Self {
        Self {
            state: RenderLoopState::Stopped,
            interval,
            paused: Arc::new(AtomicBool::new(false)),
            sink,
            timer: None,
            generation: 0,
            timers_started: 0,
            max_fps: false,
        }
    }

    pub fn state(&self) -> RenderLoopState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state != RenderLoopState::Stopped
    }

    pub fn is_timer_driven(&self) -> bool {
        self.state == RenderLoopState::RunningTimerDriven
    }

    pub fn is_surface_driven(&self) -> bool {
        self.state == RenderLoopState::RunningSurfaceDriven
    }

    pub fn has_active_timer(&self) -> bool {
        self.timer.is_some()
    }

    /// Number of timer threads spawned over the controller's lifetime.
    pub fn timers_started(&self) -> u64 {
        self.timers_started
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Records the engine's `MaxFps` answer. It outlives the surface that
    /// asked for it, so a later `start` cannot fall back to the timer.
    pub fn set_max_fps(&mut self, max_fps: bool) {
        if self.max_fps != max_fps {
            info!(max_fps, "render_loop_max_fps_changed");
        }
        self.max_fps = max_fps;
    }

    pub fn max_fps(&self) -> bool {
        self.max_fps
    }

    /// Starts the timer-driven loop. Returns `false` without side effects
    /// when any loop is already running or the surface owns the cadence.
    pub fn start(&mut self) -> bool {
        if self.is_running() {
            debug!(state = ?self.state, "render_loop_already_running");
            return false;
        }
        if self.max_fps {
            debug!("render_loop_start_refused_max_fps");
            return false;
        }

        let generation = self.generation.wrapping_add(1);
        match FrameTimer::spawn(
            self.interval,
            generation,
            Arc::clone(&self.paused),
            Arc::clone(&self.sink),
        ) {
            Ok(timer) => {
                self.generation = generation;
                self.timer = Some(timer);
                self.timers_started = self.timers_started.saturating_add(1);
                self.state = RenderLoopState::RunningTimerDriven;
                info!(
                    generation,
                    interval_us = self.interval.as_micros() as u64,
                    "render_loop_started"
                );
                true
            }
            Err(error) => {
                warn!(error = %error, "render_loop_timer_spawn_failed");
                false
            }
        }
    }

    /// Stops whichever loop is running. Once this returns the timer thread
    /// has exited; ticks it already posted are rejected by `accept_tick`.
    pub fn stop(&mut self) -> bool {
        if let Some(timer) = self.timer.take() {
            timer.cancel();
        }
        if self.state == RenderLoopState::Stopped {
            return false;
        }
        info!(from = ?self.state, generation = self.generation, "render_loop_stopped");
        self.state = RenderLoopState::Stopped;
        true
    }

    /// Switches to surface-driven cadence, retiring any timer first.
    pub fn enter_surface_driven(&mut self) {
        if self.is_surface_driven() {
            return;
        }
        self.stop();
        self.state = RenderLoopState::RunningSurfaceDriven;
        info!("render_loop_surface_driven");
    }

    pub fn set_paused(&self, paused: bool) {
        let was_paused = self.paused.swap(paused, Ordering::AcqRel);
        if was_paused != paused {
            info!(paused, "render_loop_pause_changed");
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    /// Whether a tick that reached the control thread should still redraw.
    /// A tick of the live generation also releases the timer to post the
    /// next one, so at most one tick per timer is ever queued.
    pub fn accept_tick(&self, tick: TimerTick) -> bool {
        if tick.generation != self.generation {
            return false;
        }
        if let Some(timer) = &self.timer {
            timer.in_flight.store(false, Ordering::Release);
        }
        self.is_timer_driven() && !self.is_paused()
    }

    pub fn teardown(&mut self) {
        self.stop();
        debug!("render_loop_teardown");
    }
}

impl Drop for RenderLoopController {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.cancel();
        }
    }
}

struct FrameTimer {
    stop: Arc<AtomicBool>,
    in_flight: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl FrameTimer {
    fn spawn(
        interval: Duration,
        generation: u64,
        paused: Arc<AtomicBool>,
        sink: Arc<dyn RedrawSink>,
    ) -> io::Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_for_thread = Arc::clone(&stop);
        let in_flight = Arc::new(AtomicBool::new(false));
        let in_flight_for_thread = Arc::clone(&in_flight);
        let handle = thread::Builder::new()
            .name(TIMER_THREAD_NAME.to_string())
            .spawn(move || {
                let mut sequence = 0u64;
                loop {
                    thread::park_timeout(interval);
                    if stop_for_thread.load(Ordering::Acquire) {
                        break;
                    }
                    if paused.load(Ordering::Acquire) {
                        continue;
                    }
                    if in_flight_for_thread.swap(true, Ordering::AcqRel) {
                        continue;
                    }
                    sequence = sequence.wrapping_add(1);
                    sink.request_timer_redraw(TimerTick {
                        generation,
                        sequence,
                    });
                }
            })?;
        Ok(Self {
            stop,
            in_flight,
            handle,
        })
    }

    fn cancel(self) {
        self.stop.store(true, Ordering::Release);
        self.handle.thread().unpark();
        if self.handle.join().is_err() {
            warn!("render_timer_thread_panicked");
        }
    }
}

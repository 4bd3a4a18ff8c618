/// Side effects the bridge asks of the host environment. Called on the
/// control thread only.
pub trait HostEffects {
    fn show_keyboard(&mut self);
    fn hide_keyboard(&mut self);
    /// Invalidate the drawing surface so its draw callback runs again.
    fn request_redraw(&mut self);
}

/// Periodic tick posted by the render timer thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerTick {
    /// Identifies the timer that produced the tick; retired on stop.
    pub generation: u64,
    pub sequence: u64,
}

/// Thread-safe entry point used by the render timer to get a tick onto the
/// control thread. Implementations must not block.
pub trait RedrawSink: Send + Sync + 'static {
    fn request_timer_redraw(&self, tick: TimerTick);
}

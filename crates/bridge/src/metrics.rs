use std::time::{Duration, Instant};

use crate::bridge::DrawSource;

/// Lifetime counters for the frame loop, reported when the control thread
/// exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopTotals {
    pub surface_draws: u64,
    pub input_draws: u64,
    pub accepted_ticks: u64,
    pub suppressed_ticks: u64,
    /// Redraw requests folded into one that was already pending.
    pub coalesced_redraws: u64,
    /// Pending surface redraws dropped because the loop stopped first.
    pub stale_redraws: u64,
    pub input_events: u64,
}

impl LoopTotals {
    pub fn draws(&self) -> u64 {
        self.surface_draws + self.input_draws
    }
}

/// One logging window worth of loop activity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct LoopWindow {
    pub draws_per_second: f32,
    pub slowest_draw_ms: f32,
    pub totals: LoopTotals,
}

#[derive(Debug)]
pub(crate) struct LoopMetrics {
    window_start: Instant,
    interval: Duration,
    window_draws: u32,
    slowest_draw: Duration,
    totals: LoopTotals,
}

impl LoopMetrics {
    pub(crate) fn new(interval: Duration) -> Self {
        Self {
            window_start: Instant::now(),
            interval,
            window_draws: 0,
            slowest_draw: Duration::ZERO,
            totals: LoopTotals::default(),
        }
    }

    pub(crate) fn record_draw(&mut self, source: DrawSource, elapsed: Duration) {
        match source {
            DrawSource::Surface => self.totals.surface_draws += 1,
            DrawSource::Input => self.totals.input_draws += 1,
        }
        self.window_draws = self.window_draws.saturating_add(1);
        self.slowest_draw = self.slowest_draw.max(elapsed);
    }

    pub(crate) fn record_tick(&mut self, accepted: bool) {
        if accepted {
            self.totals.accepted_ticks += 1;
        } else {
            self.totals.suppressed_ticks += 1;
        }
    }

    pub(crate) fn record_coalesced_redraw(&mut self) {
        self.totals.coalesced_redraws += 1;
    }

    pub(crate) fn record_stale_redraw(&mut self) {
        self.totals.stale_redraws += 1;
    }

    pub(crate) fn record_input(&mut self) {
        self.totals.input_events += 1;
    }

    pub(crate) fn totals(&self) -> LoopTotals {
        self.totals
    }

    /// Closes the current window once `interval` has elapsed.
    pub(crate) fn take_window(&mut self, now: Instant) -> Option<LoopWindow> {
        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed < self.interval {
            return None;
        }

        let elapsed_seconds = elapsed.as_secs_f32().max(f32::EPSILON);
        let window = LoopWindow {
            draws_per_second: self.window_draws as f32 / elapsed_seconds,
            slowest_draw_ms: self.slowest_draw.as_secs_f32() * 1000.0,
            totals: self.totals,
        };

        self.window_start = now;
        self.window_draws = 0;
        self.slowest_draw = Duration::ZERO;

        Some(window)
    }
}

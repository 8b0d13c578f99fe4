//! Frame-rate measurement and the cosmetic load/memory gauges.

use std::time::Duration;
use tokio::time::Instant;

pub const INITIAL_PROCESSING_LOAD: f64 = 75.0;
pub const INITIAL_MEMORY_USAGE: f64 = 60.0;

const LOAD_JITTER: f64 = 5.0;
const MEMORY_JITTER: f64 = 3.0;

/// Counts frames and publishes the count once per window.
#[derive(Debug, Clone)]
pub struct FrameRateMeter {
    frames: u32,
    window_start: Instant,
    window: Duration,
}

impl FrameRateMeter {
    pub fn new(now: Instant, window: Duration) -> Self {
        Self {
            frames: 0,
            window_start: now,
            window,
        }
    }

    /// Record one delivered frame. Returns the count when a window closes,
    /// after which counting starts again from zero.
    pub fn record_frame(&mut self, now: Instant) -> Option<u32> {
        self.frames += 1;
        self.poll(now)
    }

    /// Close the window if it has elapsed without a frame arriving to close
    /// it. Returns the count, possibly zero, when it does.
    pub fn poll(&mut self, now: Instant) -> Option<u32> {
        if now.saturating_duration_since(self.window_start) >= self.window {
            let published = self.frames;
            self.frames = 0;
            self.window_start = now;
            Some(published)
        } else {
            None
        }
    }

    /// Frames counted in the still-open window.
    pub fn pending(&self) -> u32 {
        self.frames
    }
}

/// Synthetic gauges in percent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PerformanceGauges {
    pub processing_load: f64,
    pub memory_usage: f64,
}

impl Default for PerformanceGauges {
    fn default() -> Self {
        Self {
            processing_load: INITIAL_PROCESSING_LOAD,
            memory_usage: INITIAL_MEMORY_USAGE,
        }
    }
}

impl PerformanceGauges {
    pub fn perturb(&mut self, load_delta: f64, memory_delta: f64) {
        self.processing_load = (self.processing_load + load_delta).clamp(0.0, 100.0);
        self.memory_usage = (self.memory_usage + memory_delta).clamp(0.0, 100.0);
    }

    pub fn jitter(&mut self) {
        self.perturb(
            rand::random_range(-LOAD_JITTER..LOAD_JITTER),
            rand::random_range(-MEMORY_JITTER..MEMORY_JITTER),
        );
    }
}

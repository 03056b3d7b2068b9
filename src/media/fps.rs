use std::time::{Duration, Instant};

const WINDOW: Duration = Duration::from_secs(1);

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FpsReading {
    /// Frames per second over the last window.
    pub current: f64,
    /// Frames per second since the first frame.
    pub average: f64,
    pub total: u64,
}

/// Counts delivered frames and reports a rate about once a second.
#[derive(Debug)]
pub struct FpsMeter {
    started: Option<Instant>,
    window_start: Instant,
    window_frames: u64,
    total: u64,
}

impl FpsMeter {
    pub fn new() -> Self {
        Self {
            started: None,
            window_start: Instant::now(),
            window_frames: 0,
            total: 0,
        }
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    /// Records one frame seen at `now`. Returns a reading when a full
    /// window has elapsed since the previous one.
    pub fn tick(&mut self, now: Instant) -> Option<FpsReading> {
        let started = match self.started {
            Some(started) => started,
            None => {
                self.started = Some(now);
                self.window_start = now;
                now
            }
        };
        self.total += 1;
        self.window_frames += 1;

        let window = now.saturating_duration_since(self.window_start);
        if window < WINDOW {
            return None;
        }

        let current = self.window_frames as f64 / window.as_secs_f64();
        let elapsed = now.saturating_duration_since(started).as_secs_f64();
        let reading = FpsReading {
            current,
            average: self.total as f64 / elapsed,
            total: self.total,
        };
        self.window_start = now;
        self.window_frames = 0;
        Some(reading)
    }
}

impl Default for FpsMeter {
    fn default() -> Self {
        Self::new()
    }
}

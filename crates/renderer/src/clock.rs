use std::time::{Duration, Instant};

/// Time handed to the stages for one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeSample {
    /// Elapsed wall-clock or simulated time in seconds.
    pub seconds: f32,
    /// Monotonic frame counter for the running session.
    pub frame_index: u64,
}

/// Produces the elapsed time for each frame.
#[derive(Debug, Clone, Copy)]
pub enum FrameClock {
    /// Seconds since the clock was created, read from the monotonic clock.
    Realtime { origin: Instant, frame: u64 },
    /// `frame * step` seconds, independent of how long frames take.
    FixedStep { step: f32, frame: u64 },
}

impl FrameClock {
    pub fn realtime() -> Self {
        FrameClock::Realtime {
            origin: Instant::now(),
            frame: 0,
        }
    }

    /// Fixed-step clock advancing `1 / fps` seconds per frame. The first
    /// sample is at time zero.
    pub fn fixed(fps: f32) -> Self {
        let step = if fps.is_finite() && fps > 0.0 { 1.0 / fps } else { 0.0 };
        FrameClock::FixedStep { step, frame: 0 }
    }

    pub fn reset(&mut self) {
        match self {
            FrameClock::Realtime { origin, frame } => {
                *origin = Instant::now();
                *frame = 0;
            }
            FrameClock::FixedStep { frame, .. } => *frame = 0,
        }
    }

    /// Samples the time for the next frame and advances the frame counter.
    pub fn tick(&mut self) -> TimeSample {
        let (seconds, frame) = match self {
            FrameClock::Realtime { origin, frame } => (origin.elapsed().as_secs_f32(), frame),
            FrameClock::FixedStep { step, frame } => (*step * *frame as f32, frame),
        };
        let sample = TimeSample {
            seconds,
            frame_index: *frame,
        };
        *frame = frame.saturating_add(1);
        sample
    }
}

/// Decides when the windowed driver should issue the next redraw.
#[derive(Debug, Clone)]
pub struct FramePacer {
    interval: Option<Duration>,
    last_frame: Option<Instant>,
}

impl FramePacer {
    /// `None` or a non-positive cap renders as fast as redraws are delivered.
    pub fn new(target_fps: Option<f32>) -> Self {
        let interval = target_fps
            .filter(|fps| fps.is_finite() && *fps > 0.0)
            .map(|fps| Duration::from_nanos((1e9 / f64::from(fps)).round() as u64));
        Self {
            interval,
            last_frame: None,
        }
    }

    pub fn ready_for_frame(&self, now: Instant) -> bool {
        match (self.interval, self.last_frame) {
            (Some(interval), Some(last)) => now.saturating_duration_since(last) >= interval,
            _ => true,
        }
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        Some(self.last_frame? + self.interval?)
    }

    pub fn mark_rendered(&mut self, now: Instant) {
        self.last_frame = Some(now);
    }
}

/// Counts frames and reports the rate once per reporting window.
#[derive(Debug, Clone)]
pub struct RenderStats {
    window_start: Instant,
    frames: u32,
    report_every: Duration,
}

impl RenderStats {
    pub fn new(now: Instant) -> Self {
        Self {
            window_start: now,
            frames: 0,
            report_every: Duration::from_secs(1),
        }
    }

    /// Records a frame; returns the measured frames per second whenever a
    /// reporting window closes.
    pub fn record_frame(&mut self, now: Instant) -> Option<f32> {
        self.frames += 1;
        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed < self.report_every {
            return None;
        }
        let fps = self.frames as f32 / elapsed.as_secs_f32();
        self.window_start = now;
        self.frames = 0;
        Some(fps)
    }
}

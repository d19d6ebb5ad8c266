use std::time::Instant;

/// Wall-clock frame timer. `tick` once per frame; everything else reads.
pub struct Timer {
    start: Instant,
    prev_frame: Instant,
    delta: f32,
}

impl Timer {
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            start: now,
            prev_frame: now,
            delta: 0.0,
        }
    }

    /// Advances to now and records the frame delta.
    pub fn tick(&mut self) {
        let now = Instant::now();
        self.delta = now.duration_since(self.prev_frame).as_secs_f32();
        self.prev_frame = now;
    }

    pub fn delta(&self) -> f32 {
        self.delta
    }

    /// Seconds from timer creation to the last tick.
    pub fn total(&self) -> f32 {
        self.prev_frame.duration_since(self.start).as_secs_f32()
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

/// Frame counter that emits an fps / frame-time line roughly once per
/// second of total time.
pub struct FrameStats {
    frame_count: u32,
    window_start: f32,
}

impl FrameStats {
    pub fn new() -> Self {
        Self {
            frame_count: 0,
            window_start: 0.0,
        }
    }

    /// Counts one frame; returns the stats line when a second has elapsed
    /// since the last one.
    pub fn tick(&mut self, total_time: f32) -> Option<String> {
        self.frame_count += 1;
        if total_time - self.window_start < 1.0 {
            return None;
        }

        let fps = self.frame_count as f32;
        let ms = 1000.0 / fps;
        self.frame_count = 0;
        self.window_start += 1.0;
        Some(format!("fps: {fps:.0}, ms: {ms:.2}"))
    }
}

impl Default for FrameStats {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_timer_reads_zero() {
        let timer = Timer::new();
        assert_eq!(timer.delta(), 0.0);
        assert!(timer.total() >= 0.0);
    }

    #[test]
    fn ticking_never_goes_backwards() {
        let mut timer = Timer::new();
        timer.tick();
        let first_total = timer.total();
        assert!(timer.delta() >= 0.0);

        timer.tick();
        assert!(timer.total() >= first_total);
    }

    #[test]
    fn stats_emit_once_per_second() {
        let mut stats = FrameStats::new();

        // 59 frames inside the first second stay quiet.
        for frame in 1..60 {
            assert_eq!(stats.tick(frame as f32 / 60.0), None);
        }

        let line = stats.tick(1.0).expect("a full second has elapsed");
        assert!(line.contains("fps: 60"), "unexpected stats line: {line}");

        // The counter restarts for the next window.
        assert_eq!(stats.tick(1.5), None);
    }
}

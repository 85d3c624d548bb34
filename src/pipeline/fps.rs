use std::time::{Duration, Instant};

/// Frames-per-second estimate over fixed wall-clock windows.
#[derive(Debug, Clone)]
pub struct FpsCounter {
    window: Duration,
    window_start: Option<Instant>,
    frames: u32,
    current: f64,
}

impl FpsCounter {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            window_start: None,
            frames: 0,
            current: 0.0,
        }
    }

    /// Count one frame seen at `now`. Returns the new estimate whenever a
    /// window closes.
    pub fn record(&mut self, now: Instant) -> Option<f64> {
        self.frames += 1;
        let start = *self.window_start.get_or_insert(now);

        let elapsed = now.saturating_duration_since(start);
        if elapsed.is_zero() || elapsed < self.window {
            return None;
        }

        self.current = f64::from(self.frames) / elapsed.as_secs_f64();
        self.frames = 0;
        self.window_start = Some(now);
        metrics::gauge!("delivery_fps").set(self.current);
        Some(self.current)
    }

    /// Most recent estimate, `0.0` until the first window closes.
    pub fn current(&self) -> f64 {
        self.current
    }
}

impl Default for FpsCounter {
    fn default() -> Self {
        Self::new(Duration::from_millis(1000))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimate_appears_once_window_closes() {
        let mut fps = FpsCounter::default();
        let t0 = Instant::now();

        for i in 0..10 {
            assert_eq!(fps.record(t0 + Duration::from_millis(i * 100)), None);
        }
        assert_eq!(fps.current(), 0.0);

        // Frame at the window edge closes it; the opening frame counts too
        let first = fps.record(t0 + Duration::from_millis(1000)).unwrap();
        assert!((first - 11.0).abs() < 1e-9);

        let mut second = None;
        for i in 11..=20 {
            second = fps.record(t0 + Duration::from_millis(i * 100));
        }
        assert!((second.unwrap() - 10.0).abs() < 1e-9);
        assert!((fps.current() - 10.0).abs() < 1e-9);
    }

    #[test]
    fn slow_stream_reports_fractional_rate() {
        let mut fps = FpsCounter::new(Duration::from_secs(1));
        let t0 = Instant::now();
        fps.record(t0);
        let rate = fps.record(t0 + Duration::from_secs(2)).unwrap();
        assert!((rate - 1.0).abs() < 1e-9);
    }
}

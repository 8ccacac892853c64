use std::time::Instant;

/// Weight of the history in the moving average.
const HISTORY_WEIGHT: f64 = 0.9;

/// One frame interval and the average after including it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameSample {
    pub interval: f64,
    pub moving_average: f64,
}

/// Seconds-per-frame tracking for one job.
#[derive(Debug, Clone, Default)]
pub struct PerformanceState {
    last_sample_time: Option<Instant>,
    moving_average: Option<f64>,
}

impl PerformanceState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a frame observed at `at`. Returns nothing for the very first
    /// frame, since there is no interval to measure yet.
    pub fn record_frame(&mut self, at: Instant) -> Option<FrameSample> {
        let previous = self.last_sample_time.replace(at)?;
        let interval = at.saturating_duration_since(previous).as_secs_f64();
        Some(FrameSample {
            interval,
            moving_average: self.observe(interval),
        })
    }

    /// Fold one sample into the moving average. The first sample seeds it.
    pub fn observe(&mut self, sample: f64) -> f64 {
        let average = match self.moving_average {
            Some(avg) => HISTORY_WEIGHT * avg + (1.0 - HISTORY_WEIGHT) * sample,
            None => sample,
        };
        self.moving_average = Some(average);
        average
    }

    pub fn moving_average(&self) -> Option<f64> {
        self.moving_average
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn first_sample_seeds_average() {
        let mut perf = PerformanceState::new();
        assert_eq!(perf.moving_average(), None);
        assert_eq!(perf.observe(2.5), 2.5);
        assert_eq!(perf.moving_average(), Some(2.5));
    }

    #[test]
    fn converges_to_repeated_sample() {
        let mut perf = PerformanceState::new();
        perf.observe(10.0);
        let mut avg = 0.0;
        for _ in 0..200 {
            avg = perf.observe(1.0);
        }
        assert!((avg - 1.0).abs() < 1e-6, "got {avg}");
    }

    #[test]
    fn weights_history() {
        let mut perf = PerformanceState::new();
        perf.observe(1.0);
        let avg = perf.observe(2.0);
        assert!((avg - 1.1).abs() < 1e-12);
    }

    #[test]
    fn frames_produce_intervals() {
        let mut perf = PerformanceState::new();
        let start = Instant::now();
        assert!(perf.record_frame(start).is_none());

        let sample = perf.record_frame(start + Duration::from_millis(1500)).unwrap();
        assert!((sample.interval - 1.5).abs() < 1e-9);
        assert!((sample.moving_average - 1.5).abs() < 1e-9);

        let sample = perf.record_frame(start + Duration::from_millis(2500)).unwrap();
        assert!((sample.interval - 1.0).abs() < 1e-9);
        assert!((sample.moving_average - 1.45).abs() < 1e-9);
    }
}

//! Rolling latency statistics for the headless client

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// One latency sample, taken from a snapshot timestamp.
#[derive(Debug, Clone)]
pub struct LatencySample {
    pub ping_ms: f32,
    pub timestamp: Instant,
}

pub struct NetStats {
    history: VecDeque<LatencySample>,
    max_samples: usize,
    sample_interval: Duration,
    last_sample_time: Option<Instant>,
    snapshots_received: u64,
}

impl NetStats {
    pub fn new() -> Self {
        Self::with_window(100, Duration::from_millis(100))
    }

    pub fn with_window(max_samples: usize, sample_interval: Duration) -> Self {
        Self {
            history: VecDeque::with_capacity(max_samples),
            max_samples: max_samples.max(1),
            sample_interval,
            last_sample_time: None,
            snapshots_received: 0,
        }
    }

    /// Records a snapshot arrival. Latency is sampled at a fixed interval so
    /// the window covers a stable span of time.
    pub fn record(&mut self, ping_ms: f32) {
        self.snapshots_received += 1;

        let now = Instant::now();
        let due = self
            .last_sample_time
            .map_or(true, |last| now.duration_since(last) >= self.sample_interval);
        if !due {
            return;
        }
        self.last_sample_time = Some(now);

        self.history.push_back(LatencySample {
            ping_ms,
            timestamp: now,
        });
        while self.history.len() > self.max_samples {
            self.history.pop_front();
        }
    }

    pub fn latest(&self) -> Option<f32> {
        self.history.back().map(|sample| sample.ping_ms)
    }

    pub fn average(&self) -> Option<f32> {
        if self.history.is_empty() {
            return None;
        }
        let total: f32 = self.history.iter().map(|sample| sample.ping_ms).sum();
        Some(total / self.history.len() as f32)
    }

    pub fn max(&self) -> Option<f32> {
        self.history
            .iter()
            .map(|sample| sample.ping_ms)
            .reduce(f32::max)
    }

    pub fn snapshots_received(&self) -> u64 {
        self.snapshots_received
    }

    pub fn samples(&self) -> usize {
        self.history.len()
    }
}

impl Default for NetStats {
    fn default() -> Self {
        Self::new()
    }
}

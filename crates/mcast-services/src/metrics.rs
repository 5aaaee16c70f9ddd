//! Server metrics: round-trip latency and jitter per content server.
//!
//! Score weights:
//!   latency: 60%
//!   jitter:  40%
//!
//! Lower is better. Packet loss is not tracked.

use std::collections::VecDeque;
use std::time::Duration;

use serde::Serialize;

/// Latency samples kept per server.
pub const SAMPLE_WINDOW: usize = 32;

const LATENCY_WEIGHT: f64 = 0.6;
const JITTER_WEIGHT: f64 = 0.4;

#[derive(Debug, Clone, Default)]
pub struct ServerMetrics {
    samples: VecDeque<f64>,
    jitter: f64,
}

/// Status view of a server's metrics, in milliseconds.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct MetricsSnapshot {
    pub latency_ms: f64,
    pub jitter_ms: f64,
    pub score: f64,
    pub samples: usize,
}

impl ServerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one PING/PONG round trip.
    pub fn record(&mut self, rtt: Duration) {
        let sample = rtt.as_secs_f64() * 1000.0;
        if let Some(previous) = self.samples.back() {
            // RFC 3550 interarrival jitter estimator
            let d = (sample - previous).abs();
            self.jitter += (d - self.jitter) / 16.0;
        }
        if self.samples.len() == SAMPLE_WINDOW {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    /// Mean of the sample window. 0 before the first probe.
    pub fn latency_ms(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().sum::<f64>() / self.samples.len() as f64
    }

    pub fn jitter_ms(&self) -> f64 {
        self.jitter
    }

    pub fn score(&self) -> f64 {
        LATENCY_WEIGHT * self.latency_ms() + JITTER_WEIGHT * self.jitter_ms()
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            latency_ms: self.latency_ms(),
            jitter_ms: self.jitter_ms(),
            score: self.score(),
            samples: self.sample_count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn unprobed_server_scores_zero() {
        let m = ServerMetrics::new();
        assert_eq!(m.latency_ms(), 0.0);
        assert_eq!(m.jitter_ms(), 0.0);
        assert_eq!(m.score(), 0.0);
    }

    #[test]
    fn steady_latency_has_no_jitter() {
        let mut m = ServerMetrics::new();
        for _ in 0..5 {
            m.record(ms(10));
        }
        assert!((m.latency_ms() - 10.0).abs() < 1e-9);
        assert_eq!(m.jitter_ms(), 0.0);
        assert!((m.score() - 6.0).abs() < 1e-9);
    }

    #[test]
    fn jitter_follows_the_smoothed_difference() {
        let mut m = ServerMetrics::new();
        m.record(ms(10));
        assert_eq!(m.jitter_ms(), 0.0);
        m.record(ms(26));
        // J = 0 + (16 - 0) / 16
        assert!((m.jitter_ms() - 1.0).abs() < 1e-9);
        m.record(ms(10));
        // J = 1 + (16 - 1) / 16
        assert!((m.jitter_ms() - 1.9375).abs() < 1e-9);
    }

    #[test]
    fn window_keeps_only_recent_samples() {
        let mut m = ServerMetrics::new();
        for _ in 0..SAMPLE_WINDOW {
            m.record(ms(100));
        }
        for _ in 0..SAMPLE_WINDOW {
            m.record(ms(20));
        }
        assert_eq!(m.sample_count(), SAMPLE_WINDOW);
        assert!((m.latency_ms() - 20.0).abs() < 1e-9);
    }
}

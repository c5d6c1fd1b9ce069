//! Server clock estimation from heartbeat round trips.
//!
//! Each pong gives one offset sample: the server stamped its reply roughly
//! half an RTT after our ping left, so
//! `offset ≈ server_time - client_send - rtt / 2`. Offset, RTT and jitter are
//! smoothed with exponentially weighted moving averages. The jitter estimate
//! drives the interpolation delay: a noisier link renders further in the past.

use std::collections::VecDeque;

use lumen_net::PongSample;

/// Smoothing and delay parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeSyncConfig {
    /// EWMA factor for offset and RTT.
    pub offset_alpha: f64,
    /// EWMA factor for jitter.
    pub jitter_alpha: f64,
    /// Raw samples retained for the median.
    pub max_samples: usize,
    /// Delay before jitter is added.
    pub base_delay_ms: f64,
    /// Lower clamp for the interpolation delay.
    pub min_delay_ms: f64,
    /// Upper clamp for the interpolation delay.
    pub max_delay_ms: f64,
    /// Jitter weight in the delay.
    pub jitter_multiplier: f64,
}

impl Default for TimeSyncConfig {
    fn default() -> Self {
        Self {
            offset_alpha: 0.2,
            jitter_alpha: 0.1,
            max_samples: 20,
            base_delay_ms: 120.0,
            min_delay_ms: 80.0,
            max_delay_ms: 250.0,
            jitter_multiplier: 2.5,
        }
    }
}

/// One ping/pong measurement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClockSample {
    /// Client time the ping left.
    pub client_send_ms: i64,
    /// Client time the pong arrived.
    pub client_receive_ms: i64,
    /// Server time in the pong.
    pub server_time_ms: i64,
    /// Round trip.
    pub rtt_ms: f64,
    /// Raw offset estimate from this sample alone.
    pub offset_ms: f64,
}

/// Rounded snapshot for overlays and logs.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TimeSyncMetrics {
    /// Smoothed RTT.
    pub rtt_ms: f64,
    /// Smoothed jitter.
    pub jitter_ms: f64,
    /// Smoothed server-minus-client offset.
    pub offset_ms: f64,
    /// Current interpolation delay.
    pub interpolation_delay_ms: f64,
    /// Median RTT of the retained samples.
    pub median_rtt_ms: Option<f64>,
    /// Raw samples held.
    pub sample_count: usize,
}

/// Smoothed estimate of the server clock.
#[derive(Debug, Clone)]
pub struct TimeSync {
    config: TimeSyncConfig,
    samples: VecDeque<ClockSample>,
    offset_ms: f64,
    rtt_ms: f64,
    jitter_ms: f64,
    last_rtt_ms: f64,
    initialized: bool,
}

impl Default for TimeSync {
    fn default() -> Self {
        Self::new(TimeSyncConfig::default())
    }
}

impl TimeSync {
    /// Create an uninitialised estimator.
    pub fn new(config: TimeSyncConfig) -> Self {
        Self {
            samples: VecDeque::with_capacity(config.max_samples),
            config,
            offset_ms: 0.0,
            rtt_ms: 0.0,
            jitter_ms: 0.0,
            last_rtt_ms: 0.0,
            initialized: false,
        }
    }

    /// Fold in a completed round trip reported by the connection.
    pub fn on_pong_sample(&mut self, sample: &PongSample) {
        self.on_pong(
            sample.client_time_ms,
            sample.server_time_ms,
            sample.received_at_ms,
        );
    }

    /// Fold in a pong for a ping sent at `client_send_ms`, stamped
    /// `server_time_ms` by the server, received at `client_receive_ms`.
    pub fn on_pong(&mut self, client_send_ms: i64, server_time_ms: i64, client_receive_ms: i64) {
        let rtt_ms = (client_receive_ms - client_send_ms).max(0) as f64;
        let offset_ms = (server_time_ms - client_send_ms) as f64 - rtt_ms / 2.0;

        if self.samples.len() >= self.config.max_samples {
            self.samples.pop_front();
        }
        self.samples.push_back(ClockSample {
            client_send_ms,
            client_receive_ms,
            server_time_ms,
            rtt_ms,
            offset_ms,
        });

        if self.initialized {
            let jitter = (rtt_ms - self.rtt_ms).abs();
            let a = self.config.offset_alpha;
            let j = self.config.jitter_alpha;
            self.offset_ms = a * offset_ms + (1.0 - a) * self.offset_ms;
            self.rtt_ms = a * rtt_ms + (1.0 - a) * self.rtt_ms;
            self.jitter_ms = j * jitter + (1.0 - j) * self.jitter_ms;
        } else {
            // No history to deviate from yet.
            self.offset_ms = offset_ms;
            self.rtt_ms = rtt_ms;
            self.jitter_ms = 0.0;
            self.initialized = true;
        }
        self.last_rtt_ms = rtt_ms;

        tracing::trace!(
            rtt_ms,
            offset_ms = self.offset_ms,
            jitter_ms = self.jitter_ms,
            "clock sample"
        );
    }

    /// Estimated server time at client time `client_now_ms`.
    pub fn estimate_server_now_ms(&self, client_now_ms: i64) -> f64 {
        client_now_ms as f64 + self.offset_ms
    }

    /// How far behind the estimated server time entities are rendered.
    pub fn interpolation_delay_ms(&self) -> f64 {
        let delay = self.config.base_delay_ms + self.jitter_ms * self.config.jitter_multiplier;
        delay.clamp(self.config.min_delay_ms, self.config.max_delay_ms)
    }

    /// Smoothed RTT.
    pub fn rtt_ms(&self) -> f64 {
        self.rtt_ms
    }

    /// Most recent raw RTT.
    pub fn last_rtt_ms(&self) -> f64 {
        self.last_rtt_ms
    }

    /// Median RTT of the retained samples, robust against single spikes.
    pub fn median_rtt_ms(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        let mut sorted: Vec<f64> = self.samples.iter().map(|s| s.rtt_ms).collect();
        sorted.sort_by(f64::total_cmp);
        Some(sorted[sorted.len() / 2])
    }

    /// Smoothed jitter.
    pub fn jitter_ms(&self) -> f64 {
        self.jitter_ms
    }

    /// Smoothed offset.
    pub fn offset_ms(&self) -> f64 {
        self.offset_ms
    }

    /// Whether at least one sample has been folded in.
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Retained raw samples, oldest first.
    pub fn samples(&self) -> impl Iterator<Item = &ClockSample> {
        self.samples.iter()
    }

    /// Snapshot, rounded to whole milliseconds.
    pub fn metrics(&self) -> TimeSyncMetrics {
        TimeSyncMetrics {
            rtt_ms: self.rtt_ms.round(),
            jitter_ms: self.jitter_ms.round(),
            offset_ms: self.offset_ms.round(),
            interpolation_delay_ms: self.interpolation_delay_ms().round(),
            median_rtt_ms: self.median_rtt_ms().map(f64::round),
            sample_count: self.samples.len(),
        }
    }

    /// Forget everything; the next sample initialises directly.
    pub fn reset(&mut self) {
        *self = Self::new(self.config);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_sample_initialises_directly() {
        let mut sync = TimeSync::default();
        assert!(!sync.is_initialized());

        // Ping at 1000, server stamps 6030, pong back at 1060.
        sync.on_pong(1_000, 6_030, 1_060);
        assert!(sync.is_initialized());
        assert_eq!(sync.rtt_ms(), 60.0);
        assert_eq!(sync.offset_ms(), 5_000.0);
        assert_eq!(sync.jitter_ms(), 0.0);
        assert_eq!(sync.estimate_server_now_ms(2_000), 7_000.0);
    }

    #[test]
    fn test_offset_converges_under_steady_link() {
        let mut sync = TimeSync::default();
        for i in 0..30 {
            let send = i * 5_000;
            sync.on_pong(send, send + 40 + 250, send + 80);
        }
        assert!((sync.offset_ms() - 250.0).abs() < 1e-6);
        assert!((sync.rtt_ms() - 80.0).abs() < 1e-6);
        assert!(sync.jitter_ms() < 1e-6);
        assert_eq!(sync.interpolation_delay_ms(), 120.0);
    }

    #[test]
    fn test_jitter_raises_delay_within_bounds() {
        let mut sync = TimeSync::default();
        for i in 0..50 {
            let send = i * 1_000;
            let rtt = if i % 2 == 0 { 20 } else { 400 };
            sync.on_pong(send, send, send + rtt);
        }
        let delay = sync.interpolation_delay_ms();
        assert!(sync.jitter_ms() > 0.0);
        assert!(delay > 120.0);
        assert!(delay <= 250.0, "delay {delay} above the upper clamp");
    }

    #[test]
    fn test_delay_clamped_to_minimum() {
        let sync = TimeSync::new(TimeSyncConfig {
            base_delay_ms: 10.0,
            ..TimeSyncConfig::default()
        });
        assert_eq!(sync.interpolation_delay_ms(), 80.0);
    }

    #[test]
    fn test_sample_window_is_bounded() {
        let mut sync = TimeSync::default();
        for i in 0..25 {
            sync.on_pong(i, i, i + 10);
        }
        assert_eq!(sync.metrics().sample_count, 20);
        assert_eq!(sync.samples().next().map(|s| s.client_send_ms), Some(5));
    }

    #[test]
    fn test_median_ignores_outliers() {
        let mut sync = TimeSync::default();
        for i in 0..14 {
            sync.on_pong(i * 100, 0, i * 100 + 50);
        }
        sync.on_pong(2_000, 0, 2_200);
        sync.on_pong(3_000, 0, 3_200);
        assert_eq!(sync.median_rtt_ms(), Some(50.0));
        assert_eq!(sync.metrics().median_rtt_ms, Some(50.0));
    }

    #[test]
    fn test_pong_sample_feeds_estimator() {
        let mut sync = TimeSync::default();
        sync.on_pong_sample(&PongSample {
            client_time_ms: 100,
            server_time_ms: 1_120,
            received_at_ms: 140,
            rtt_ms: 40.0,
        });
        assert_eq!(sync.rtt_ms(), 40.0);
        assert_eq!(sync.offset_ms(), 1_000.0);
    }

    #[test]
    fn test_reset_forgets_state() {
        let mut sync = TimeSync::default();
        sync.on_pong(0, 500, 100);
        sync.reset();
        assert!(!sync.is_initialized());
        assert_eq!(sync.metrics(), TimeSyncMetrics {
            interpolation_delay_ms: 120.0,
            ..TimeSyncMetrics::default()
        });
    }
}

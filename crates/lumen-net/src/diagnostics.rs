//! Connection diagnostics: heartbeat RTT, loss, and traffic counters.
//!
//! Purely informational. Nothing here influences connection state; a ping
//! that never gets its pong only shows up as loss.

use std::collections::VecDeque;

/// Configuration for the diagnostics tracker.
#[derive(Debug, Clone, Copy)]
pub struct DiagnosticsConfig {
    /// Number of RTT samples kept in the rolling window.
    pub window_size: usize,
    /// Age after which an unanswered ping counts as lost.
    pub ping_timeout_ms: i64,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            window_size: 100,
            ping_timeout_ms: 10_000,
        }
    }
}

/// Rolling heartbeat statistics plus lifetime traffic counters for one
/// [`GameConnection`](crate::GameConnection).
#[derive(Debug)]
pub struct DiagnosticsTracker {
    config: DiagnosticsConfig,
    rtt_samples: VecDeque<f64>,
    /// Send times of pings still waiting for a pong.
    pending_pings: VecDeque<i64>,
    last_rtt_ms: Option<f64>,
    pings_sent: u64,
    pongs_received: u64,
    pings_lost: u64,
    frames_sent: u64,
    frames_received: u64,
    bytes_sent: u64,
    bytes_received: u64,
    malformed_frames: u64,
}

impl Default for DiagnosticsTracker {
    fn default() -> Self {
        Self::new(DiagnosticsConfig::default())
    }
}

impl DiagnosticsTracker {
    /// Create an empty tracker.
    pub fn new(config: DiagnosticsConfig) -> Self {
        Self {
            rtt_samples: VecDeque::with_capacity(config.window_size),
            pending_pings: VecDeque::new(),
            last_rtt_ms: None,
            pings_sent: 0,
            pongs_received: 0,
            pings_lost: 0,
            frames_sent: 0,
            frames_received: 0,
            bytes_sent: 0,
            bytes_received: 0,
            malformed_frames: 0,
            config,
        }
    }

    /// A ping stamped with `client_time_ms` went out.
    pub fn on_ping_sent(&mut self, client_time_ms: i64) {
        self.expire_pending(client_time_ms);
        self.pending_pings.push_back(client_time_ms);
        self.pings_sent += 1;
    }

    /// A pong echoing `client_time_ms` arrived at `now_ms`. Returns the RTT
    /// sample, or `None` for an echo that matches no outstanding ping.
    pub fn on_pong_received(&mut self, client_time_ms: i64, now_ms: i64) -> Option<f64> {
        let pos = self
            .pending_pings
            .iter()
            .position(|&sent| sent == client_time_ms)?;
        self.pending_pings.remove(pos);

        let rtt = (now_ms - client_time_ms).max(0) as f64;
        if self.rtt_samples.len() >= self.config.window_size {
            self.rtt_samples.pop_front();
        }
        self.rtt_samples.push_back(rtt);
        self.last_rtt_ms = Some(rtt);
        self.pongs_received += 1;
        Some(rtt)
    }

    /// Count pings older than the timeout as lost.
    pub fn expire_pending(&mut self, now_ms: i64) {
        let timeout = self.config.ping_timeout_ms;
        while let Some(&sent) = self.pending_pings.front() {
            if now_ms - sent > timeout {
                self.pending_pings.pop_front();
                self.pings_lost += 1;
            } else {
                break;
            }
        }
    }

    /// Record an outbound frame of `bytes` payload bytes.
    pub fn record_send(&mut self, bytes: usize) {
        self.frames_sent += 1;
        self.bytes_sent += bytes as u64;
    }

    /// Record an inbound frame of `bytes` payload bytes.
    pub fn record_receive(&mut self, bytes: usize) {
        self.frames_received += 1;
        self.bytes_received += bytes as u64;
    }

    /// Record a frame that failed to decode.
    pub fn record_malformed(&mut self) {
        self.malformed_frames += 1;
    }

    /// Forget outstanding pings; used when the transport is replaced.
    pub fn clear_pending(&mut self) {
        self.pending_pings.clear();
    }

    /// Mean RTT over the window.
    pub fn average_rtt_ms(&self) -> Option<f64> {
        if self.rtt_samples.is_empty() {
            return None;
        }
        Some(self.rtt_samples.iter().sum::<f64>() / self.rtt_samples.len() as f64)
    }

    /// Sample standard deviation of RTT over the window.
    pub fn rtt_stddev_ms(&self) -> Option<f64> {
        if self.rtt_samples.len() < 2 {
            return None;
        }
        let avg = self.average_rtt_ms()?;
        let variance = self
            .rtt_samples
            .iter()
            .map(|s| (s - avg).powi(2))
            .sum::<f64>()
            / (self.rtt_samples.len() - 1) as f64;
        Some(variance.sqrt())
    }

    /// Fraction of resolved pings that were lost.
    pub fn loss_rate(&self) -> f64 {
        let resolved = self.pongs_received + self.pings_lost;
        if resolved == 0 {
            return 0.0;
        }
        self.pings_lost as f64 / resolved as f64
    }

    /// Immutable snapshot for overlays and logs.
    pub fn snapshot(&self) -> NetworkDiagnostics {
        NetworkDiagnostics {
            last_rtt_ms: self.last_rtt_ms,
            average_rtt_ms: self.average_rtt_ms(),
            min_rtt_ms: self.rtt_samples.iter().copied().reduce(f64::min),
            max_rtt_ms: self.rtt_samples.iter().copied().reduce(f64::max),
            rtt_stddev_ms: self.rtt_stddev_ms(),
            loss_rate: self.loss_rate(),
            pings_sent: self.pings_sent,
            pongs_received: self.pongs_received,
            frames_sent: self.frames_sent,
            frames_received: self.frames_received,
            bytes_sent: self.bytes_sent,
            bytes_received: self.bytes_received,
            malformed_frames: self.malformed_frames,
        }
    }
}

/// Point-in-time copy of [`DiagnosticsTracker`] state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NetworkDiagnostics {
    /// Most recent RTT sample.
    pub last_rtt_ms: Option<f64>,
    /// Mean RTT over the window.
    pub average_rtt_ms: Option<f64>,
    /// Smallest RTT in the window.
    pub min_rtt_ms: Option<f64>,
    /// Largest RTT in the window.
    pub max_rtt_ms: Option<f64>,
    /// RTT standard deviation.
    pub rtt_stddev_ms: Option<f64>,
    /// Lost / resolved pings.
    pub loss_rate: f64,
    /// Lifetime pings sent.
    pub pings_sent: u64,
    /// Lifetime matching pongs.
    pub pongs_received: u64,
    /// Lifetime frames written.
    pub frames_sent: u64,
    /// Lifetime frames read.
    pub frames_received: u64,
    /// Lifetime payload bytes written.
    pub bytes_sent: u64,
    /// Lifetime payload bytes read.
    pub bytes_received: u64,
    /// Frames that failed to decode.
    pub malformed_frames: u64,
}

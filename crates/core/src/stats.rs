//! Stream statistics.
//!
//! [`StreamStats`] holds monotonically increasing counters plus bounded
//! windows of latency and jitter samples. Every derived figure (loss rate,
//! bandwidth, means) is computed inside [`StreamStats::snapshot`] under the
//! same lock that guards the counters, so one snapshot is always internally
//! consistent.
//!
//! ## Latency and jitter
//!
//! Packet timestamps are sender wall-clock milliseconds truncated to 32 bits
//! (see [`wall_clock_millis`]).
//!
//! - **Latency** = local receive time − embedded send timestamp.
//! - **Jitter** = |arrival delta − departure delta| between consecutive
//!   timestamped packets, a simplified RFC 3550 §6.4.1 estimate. The first
//!   timestamped packet only seeds the previous-sample state.

use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

/// Default number of latency/jitter samples retained.
pub const DEFAULT_SAMPLE_WINDOW: usize = 1000;

/// Current wall-clock time in milliseconds, truncated to the 32-bit RTP timestamp width.
pub fn wall_clock_millis() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u32)
        .unwrap_or(0)
}

#[derive(Debug)]
struct Counters {
    packets_sent: u64,
    packets_received: u64,
    packets_lost: u64,
    bytes_sent: u64,
    bytes_received: u64,
    frames_sent: u64,
    frames_received: u64,
    frames_lost: u64,
    fragments_sent: u64,
    fragments_received: u64,
    started: Instant,
    latencies: VecDeque<f64>,
    jitters: VecDeque<f64>,
    /// (local arrival ms, sender timestamp ms) of the previous timestamped packet.
    previous: Option<(u32, u32)>,
}

impl Counters {
    fn new() -> Self {
        Self {
            packets_sent: 0,
            packets_received: 0,
            packets_lost: 0,
            bytes_sent: 0,
            bytes_received: 0,
            frames_sent: 0,
            frames_received: 0,
            frames_lost: 0,
            fragments_sent: 0,
            fragments_received: 0,
            started: Instant::now(),
            latencies: VecDeque::new(),
            jitters: VecDeque::new(),
            previous: None,
        }
    }
}

fn push_bounded(window: &mut VecDeque<f64>, sample: f64, cap: usize) {
    if window.len() == cap {
        window.pop_front();
    }
    window.push_back(sample);
}

fn mean(samples: &VecDeque<f64>) -> f64 {
    if samples.is_empty() {
        0.0
    } else {
        samples.iter().sum::<f64>() / samples.len() as f64
    }
}

/// Signed distance `later - earlier` on the wrapping 32-bit millisecond clock.
fn clock_delta(later: u32, earlier: u32) -> f64 {
    later.wrapping_sub(earlier) as i32 as f64
}

/// Thread-safe counter set shared between the data-plane and whoever displays it.
#[derive(Debug)]
pub struct StreamStats {
    inner: Mutex<Counters>,
    sample_window: usize,
}

impl StreamStats {
    pub fn new() -> Self {
        Self::with_sample_window(DEFAULT_SAMPLE_WINDOW)
    }

    /// Keep at most `sample_window` latency and jitter samples (minimum 1).
    pub fn with_sample_window(sample_window: usize) -> Self {
        Self {
            inner: Mutex::new(Counters::new()),
            sample_window: sample_window.max(1),
        }
    }

    /// Zero every counter and restart the elapsed-time clock.
    pub fn reset(&self) {
        *self.inner.lock() = Counters::new();
        tracing::debug!("stats reset");
    }

    pub fn record_packet_sent(&self, size: usize) {
        let mut c = self.inner.lock();
        c.packets_sent += 1;
        c.bytes_sent += size as u64;
    }

    pub fn record_fragment_sent(&self) {
        self.inner.lock().fragments_sent += 1;
    }

    pub fn record_frame_sent(&self) {
        self.inner.lock().frames_sent += 1;
    }

    /// Record a received packet, sampling latency/jitter against the local clock.
    pub fn record_packet_received(&self, size: usize, timestamp: Option<u32>) {
        self.record_packet_received_at(size, timestamp, wall_clock_millis());
    }

    /// As [`record_packet_received`](Self::record_packet_received) with an explicit
    /// local arrival time in wall-clock milliseconds.
    pub fn record_packet_received_at(&self, size: usize, timestamp: Option<u32>, now_ms: u32) {
        let mut c = self.inner.lock();
        c.packets_received += 1;
        c.bytes_received += size as u64;

        let Some(sent_ms) = timestamp else {
            return;
        };

        let cap = self.sample_window;
        push_bounded(&mut c.latencies, clock_delta(now_ms, sent_ms), cap);

        if let Some((prev_arrival, prev_sent)) = c.previous {
            let arrival_delta = clock_delta(now_ms, prev_arrival);
            let departure_delta = clock_delta(sent_ms, prev_sent);
            push_bounded(&mut c.jitters, (arrival_delta - departure_delta).abs(), cap);
        }
        c.previous = Some((now_ms, sent_ms));
    }

    pub fn record_fragment_received(&self) {
        self.inner.lock().fragments_received += 1;
    }

    pub fn record_frame_received(&self) {
        self.inner.lock().frames_received += 1;
    }

    pub fn record_packet_lost(&self) {
        self.inner.lock().packets_lost += 1;
    }

    pub fn record_frame_lost(&self) {
        self.inner.lock().frames_lost += 1;
    }

    /// Consistent read of all counters and derived metrics.
    pub fn snapshot(&self) -> StatsSnapshot {
        let c = self.inner.lock();
        let elapsed = c.started.elapsed();
        let secs = elapsed.as_secs_f64();
        let kbps = |bytes: u64| {
            if secs > 0.0 {
                bytes as f64 * 8.0 / 1024.0 / secs
            } else {
                0.0
            }
        };

        StatsSnapshot {
            packets_sent: c.packets_sent,
            packets_received: c.packets_received,
            packets_lost: c.packets_lost,
            bytes_sent: c.bytes_sent,
            bytes_received: c.bytes_received,
            frames_sent: c.frames_sent,
            frames_received: c.frames_received,
            frames_lost: c.frames_lost,
            fragments_sent: c.fragments_sent,
            fragments_received: c.fragments_received,
            elapsed,
            bandwidth_sent_kbps: kbps(c.bytes_sent),
            bandwidth_received_kbps: kbps(c.bytes_received),
            packet_loss_rate: loss_rate(c.packets_lost, c.packets_sent, c.packets_received),
            frame_loss_rate: loss_rate(c.frames_lost, c.frames_sent, c.frames_received),
            avg_latency_ms: mean(&c.latencies),
            avg_jitter_ms: mean(&c.jitters),
        }
    }
}

impl Default for StreamStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Percentage of `lost` over the expected total.
///
/// A sender knows how many it sent; a receiver only sees received + lost.
fn loss_rate(lost: u64, sent: u64, received: u64) -> f64 {
    let expected = if sent > 0 { sent } else { received + lost };
    if expected == 0 {
        0.0
    } else {
        lost as f64 / expected as f64 * 100.0
    }
}

/// Point-in-time view of [`StreamStats`].
#[derive(Debug, Clone, PartialEq)]
pub struct StatsSnapshot {
    pub packets_sent: u64,
    pub packets_received: u64,
    pub packets_lost: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub frames_sent: u64,
    pub frames_received: u64,
    pub frames_lost: u64,
    pub fragments_sent: u64,
    pub fragments_received: u64,
    pub elapsed: Duration,
    pub bandwidth_sent_kbps: f64,
    pub bandwidth_received_kbps: f64,
    /// Percent.
    pub packet_loss_rate: f64,
    /// Percent.
    pub frame_loss_rate: f64,
    pub avg_latency_ms: f64,
    pub avg_jitter_ms: f64,
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "frames {}/{:.1}s | loss {:.1}% | bw {:.0} kbps | latency {:.1} ms | jitter {:.1} ms",
            self.frames_received,
            self.elapsed.as_secs_f64(),
            self.frame_loss_rate,
            self.bandwidth_received_kbps,
            self.avg_latency_ms,
            self.avg_jitter_ms,
        )
    }
}

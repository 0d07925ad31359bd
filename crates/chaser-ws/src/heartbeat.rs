//! Liveness tracking for one socket.
//!
//! Any inbound frame counts as activity. A protocol ping is only sent after
//! `interval` of silence, and the socket is declared dead if no pong follows
//! within `timeout`.

use parking_lot::Mutex;
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug)]
struct Beat {
    last_message: Instant,
    ping_sent_at: Option<Instant>,
}

/// Heartbeat state for one connection cycle.
#[derive(Debug)]
pub struct HeartbeatManager {
    interval: Duration,
    timeout: Duration,
    beat: Mutex<Beat>,
}

impl HeartbeatManager {
    pub fn new(interval_ms: u64, timeout_ms: u64) -> Self {
        Self {
            interval: Duration::from_millis(interval_ms.max(1)),
            timeout: Duration::from_millis(timeout_ms),
            beat: Mutex::new(Beat {
                last_message: Instant::now(),
                ping_sent_at: None,
            }),
        }
    }

    /// Called on every (re)connect.
    pub fn reset(&self) {
        let mut beat = self.beat.lock();
        beat.last_message = Instant::now();
        beat.ping_sent_at = None;
    }

    pub fn record_ping(&self) {
        self.beat.lock().ping_sent_at = Some(Instant::now());
    }

    pub fn record_pong(&self) {
        let mut beat = self.beat.lock();
        if let Some(sent) = beat.ping_sent_at.take() {
            debug!(rtt_ms = sent.elapsed().as_millis() as u64, "Received pong");
        }
        beat.last_message = Instant::now();
    }

    pub fn record_message(&self) {
        self.beat.lock().last_message = Instant::now();
    }

    pub fn is_timed_out(&self) -> bool {
        self.beat
            .lock()
            .ping_sent_at
            .map(|sent| sent.elapsed() > self.timeout)
            .unwrap_or(false)
    }

    /// Idle for a full interval and not already waiting on a pong.
    pub fn should_send_heartbeat(&self) -> bool {
        let beat = self.beat.lock();
        beat.ping_sent_at.is_none() && beat.last_message.elapsed() >= self.interval
    }

    pub fn idle_for(&self) -> Duration {
        self.beat.lock().last_message.elapsed()
    }

    /// Sleep until the next liveness check.
    pub async fn wait_for_check(&self) {
        tokio::time::sleep(self.interval / 2).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_connection_needs_no_ping() {
        let hb = HeartbeatManager::new(10_000, 1_000);
        assert!(!hb.should_send_heartbeat());
        assert!(!hb.is_timed_out());
    }

    #[test]
    fn test_idle_connection_pings_once() {
        let hb = HeartbeatManager::new(1, 10_000);
        std::thread::sleep(Duration::from_millis(5));
        assert!(hb.should_send_heartbeat());
        hb.record_ping();
        assert!(!hb.should_send_heartbeat());
        hb.record_pong();
        assert!(!hb.is_timed_out());
    }

    #[test]
    fn test_missing_pong_times_out() {
        let hb = HeartbeatManager::new(1, 1);
        hb.record_ping();
        std::thread::sleep(Duration::from_millis(5));
        assert!(hb.is_timed_out());
        hb.reset();
        assert!(!hb.is_timed_out());
    }
}

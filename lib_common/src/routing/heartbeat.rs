//! Resettable idle timer for outbound writers.
//!
//! A real write calls `reset`, pushing the deadline a full interval into the
//! future, so a tick that would have fired right after a write is absorbed
//! instead of producing a second frame.

use std::pin::Pin;
use std::time::Duration;

use tokio::time::{sleep, Instant, Sleep};

/// The synthetic keep-alive frame: one zero byte.
pub const HEARTBEAT_FRAME: &[u8] = &[0];

#[derive(Debug)]
pub struct Heartbeat {
    interval: Duration,
    sleep: Pin<Box<Sleep>>,
}

impl Heartbeat {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            sleep: Box::pin(sleep(interval)),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn reset(&mut self) {
        let deadline = Instant::now() + self.interval;
        self.sleep.as_mut().reset(deadline);
    }

    /// Completes once the connection has been idle for a full interval, then
    /// re-arms. Cancel-safe: dropping the future leaves the deadline intact.
    pub async fn tick(&mut self) {
        self.sleep.as_mut().await;
        self.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn fires_after_idle_interval() {
        let start = Instant::now();
        let mut hb = Heartbeat::new(Duration::from_millis(500));
        hb.tick().await;
        assert_eq!(start.elapsed(), Duration::from_millis(500));
        hb.tick().await;
        assert_eq!(start.elapsed(), Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn reset_postpones_the_tick() {
        let start = Instant::now();
        let mut hb = Heartbeat::new(Duration::from_millis(500));

        tokio::time::advance(Duration::from_millis(400)).await;
        hb.reset();
        hb.tick().await;
        assert_eq!(start.elapsed(), Duration::from_millis(900));
    }
}

//! Fixed inter-call pacing for the extraction API.
//!
//! Not a token bucket: the pacer only guarantees a minimum gap between the
//! end of one call and the start of the next. A slow API response therefore
//! never adds throttling on top of itself, and a burst is impossible.

use tokio::time::{sleep, sleep_until, Duration, Instant};
use tracing::debug;

#[derive(Debug)]
pub struct Pacer {
    interval: Duration,
    last: Option<Instant>,
}

impl Pacer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Block until `interval` has passed since the last mark.
    ///
    /// The first call returns immediately. Marks on return, so back-to-back
    /// `wait()` calls are spaced by `interval` even without [`mark`](Self::mark).
    pub async fn wait(&mut self) {
        if let Some(last) = self.last {
            match last.checked_add(self.interval) {
                Some(ready) if ready > Instant::now() => {
                    debug!("Pacing: waiting {:?}", ready.saturating_duration_since(Instant::now()));
                    sleep_until(ready).await;
                }
                Some(_) => {}
                // Past the clock's range; tokio caps this at its far-future deadline.
                None => {
                    debug!("Pacing: waiting {:?}", self.interval);
                    sleep(self.interval).await;
                }
            }
        }
        self.last = Some(Instant::now());
    }

    /// Record that the paced call has just finished; the next `wait()` is
    /// measured from here.
    pub fn mark(&mut self) {
        self.last = Some(Instant::now());
    }
}

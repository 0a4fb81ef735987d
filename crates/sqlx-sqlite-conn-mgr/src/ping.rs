//! Time-windowed suppression of redundant liveness checks

use std::time::{Duration, Instant};

/// Window used when no ping frequency is configured
pub const DEFAULT_PING_WINDOW: Duration = Duration::from_secs(30);

/// Effective cache window for a configured ping frequency.
///
/// Positive values are seconds, zero selects [`DEFAULT_PING_WINDOW`], and negative
/// values disable caching so every ping reaches the database.
pub fn ping_window(frequency_secs: i64) -> Duration {
   match frequency_secs {
      0 => DEFAULT_PING_WINDOW,
      secs if secs < 0 => Duration::ZERO,
      secs => Duration::from_secs(secs.unsigned_abs()),
   }
}

/// Last successful ping plus the window during which it is trusted.
///
/// This is a latency optimization for high-frequency callers, not a health
/// guarantee: a connection that dies inside the window is only noticed by the
/// next query that touches it.
#[derive(Debug, Clone)]
pub struct PingCache {
   window: Duration,
   last_success: Option<Instant>,
   native_pings: u64,
}

impl PingCache {
   pub fn new(frequency_secs: i64) -> Self {
      Self {
         window: ping_window(frequency_secs),
         last_success: None,
         native_pings: 0,
      }
   }

   pub fn window(&self) -> Duration {
      self.window
   }

   pub fn last_success(&self) -> Option<Instant> {
      self.last_success
   }

   /// Number of pings that went to the database
   pub fn native_pings(&self) -> u64 {
      self.native_pings
   }

   /// Whether a ping at `now` can be answered from the cache
   pub fn is_fresh(&self, now: Instant) -> bool {
      match self.last_success {
         Some(last) => now.saturating_duration_since(last) < self.window,
         None => false,
      }
   }

   /// Count a round trip to the database
   pub fn record_native(&mut self) {
      self.native_pings += 1;
   }

   pub fn record_success(&mut self, now: Instant) {
      self.last_success = Some(now);
   }

   /// Forget the last success, e.g. after the handle is closed
   pub fn reset(&mut self) {
      self.last_success = None;
   }
}

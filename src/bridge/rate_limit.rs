//! Per-patient sliding-window rate limiting for the AI bridge.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use uuid::Uuid;

/// Sliding-window limiter: at most `max` admissions per `window` per
/// patient. Single-writer; the bridge owns the only instance.
pub struct SlidingWindowLimiter {
    windows: HashMap<Uuid, Vec<Instant>>,
    window: Duration,
    max: u32,
}

impl SlidingWindowLimiter {
    pub fn new(window_secs: u64, max: u32) -> Self {
        Self {
            windows: HashMap::new(),
            window: Duration::from_secs(window_secs),
            max,
        }
    }

    /// Admit one request for `patient_id`, or return the number of
    /// seconds until a slot frees up.
    pub fn check(&mut self, patient_id: Uuid) -> Result<(), u64> {
        let now = Instant::now();
        let entries = self.windows.entry(patient_id).or_default();
        entries.retain(|ts| now.duration_since(*ts) < self.window);

        if entries.len() as u32 >= self.max {
            let retry_after = entries
                .iter()
                .min()
                .map(|oldest| {
                    self.window
                        .saturating_sub(now.duration_since(*oldest))
                        .as_secs()
                        .max(1)
                })
                .unwrap_or(1);
            return Err(retry_after);
        }

        entries.push(now);
        Ok(())
    }
}

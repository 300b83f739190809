// SPDX-License-Identifier: MIT OR Apache-2.0

//! Enforces the ≥3.5 character-time silence Modbus RTU requires between
//! frames (spec.md §4.1, "Silence / turn-around").

use std::time::{Duration, Instant};

/// Character time = (11 bit-times)/baud for baud ≥ 19200, otherwise a fixed
/// 750 µs, per the Modbus over Serial Line specification.
fn char_time(baud_rate: u32) -> Duration {
    if baud_rate >= 19200 {
        Duration::from_secs_f64(11.0 / f64::from(baud_rate))
    } else {
        Duration::from_micros(750)
    }
}

/// 3.5 character times, the minimum silence Modbus RTU requires both to
/// detect the end of an incoming frame and before transmitting the next
/// outgoing one.
fn inter_frame_silence(baud_rate: u32) -> Duration {
    char_time(baud_rate).mul_f64(3.5)
}

/// Tracks the last time a frame boundary was observed on a serial line and
/// lets the caller wait out the mandatory silence before sending again.
#[derive(Debug)]
pub(crate) struct SilenceGuard {
    silence: Duration,
    last_activity: Option<Instant>,
}

impl SilenceGuard {
    pub(crate) fn new(baud_rate: u32) -> Self {
        Self {
            silence: inter_frame_silence(baud_rate),
            last_activity: None,
        }
    }

    /// Blocks, if necessary, until the inter-frame silence has elapsed
    /// since the last recorded activity.
    pub(crate) async fn wait(&mut self) {
        if let Some(last) = self.last_activity {
            let elapsed = last.elapsed();
            if elapsed < self.silence {
                tokio::time::sleep(self.silence - elapsed).await;
            }
        }
    }

    pub(crate) fn mark_activity(&mut self) {
        self.last_activity = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn char_time_scales_with_high_baud() {
        let t9600 = char_time(9600);
        let t19200 = char_time(19200);
        assert!(t19200 < t9600);
    }

    #[test]
    fn char_time_is_fixed_below_19200() {
        assert_eq!(char_time(1200), Duration::from_micros(750));
        assert_eq!(char_time(9600), Duration::from_micros(750));
    }

    #[test]
    fn inter_frame_silence_is_three_and_a_half_char_times() {
        let baud = 19200;
        let expected = char_time(baud).mul_f64(3.5);
        assert_eq!(inter_frame_silence(baud), expected);
    }

    #[tokio::test]
    async fn first_wait_does_not_block() {
        let mut guard = SilenceGuard::new(9600);
        let start = Instant::now();
        guard.wait().await;
        assert!(start.elapsed() < Duration::from_millis(50));
    }
}

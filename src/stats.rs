//! Running estimators and statistics for an endpoint: exponentially smoothed
//!  scalars (RTT, jitter, packet loss) and windowed bandwidth rates, plus
//!  the event counters.

use std::time::Duration;

use crate::safe_converter::SafeCast;

/// An exponentially smoothed scalar. The first sample is adopted directly,
///  later samples are folded in with the configured factor.
#[derive(Clone, Debug)]
pub(crate) struct Ewma {
    factor: f64,
    value: Option<f64>,
}

impl Ewma {
    pub fn new(factor: f64) -> Ewma {
        Ewma {
            factor,
            value: None,
        }
    }

    pub fn fold(&mut self, sample: f64) {
        self.value = match self.value {
            None => Some(sample),
            Some(value) => Some(value + (sample - value) * self.factor),
        };
    }

    pub fn get(&self) -> f64 {
        self.value.unwrap_or(0.0)
    }

    pub fn reset(&mut self) {
        self.value = None;
    }
}

/// Byte counter over a fixed time window. On rollover the window's kbit/s
///  rate is folded into a smoothed estimate that is queryable at any time.
#[derive(Clone, Debug)]
pub(crate) struct RateWindow {
    window: Duration,
    window_start: Option<Duration>,
    bytes_in_window: u64,
    smoothed_kbps: Ewma,
}

impl RateWindow {
    pub fn new(window: Duration, smoothing_factor: f64) -> RateWindow {
        RateWindow {
            window,
            window_start: None,
            bytes_in_window: 0,
            smoothed_kbps: Ewma::new(smoothing_factor),
        }
    }

    pub fn add(&mut self, now: Duration, bytes: u32) {
        if self.window_start.is_none() {
            self.window_start = Some(now);
        }
        self.bytes_in_window += <u32 as SafeCast<u64>>::safe_cast(bytes);
    }

    pub fn update(&mut self, now: Duration) {
        let Some(start) = self.window_start else {
            return;
        };
        let elapsed = now.saturating_sub(start);
        if elapsed < self.window {
            return;
        }

        let kbps = self.bytes_in_window as f64 * 8.0 / 1000.0 / elapsed.as_secs_f64();
        self.smoothed_kbps.fold(kbps);
        self.bytes_in_window = 0;
        self.window_start = Some(now);
    }

    pub fn rate_kbps(&self) -> f64 {
        self.smoothed_kbps.get()
    }

    pub fn reset(&mut self) {
        self.window_start = None;
        self.bytes_in_window = 0;
        self.smoothed_kbps.reset();
    }
}

/// Point-in-time view of an endpoint's estimators.
#[derive(Clone, Debug, PartialEq)]
pub struct EndpointStats {
    pub rtt: Duration,
    pub jitter: Duration,
    /// smoothed percentage in [0, 100]
    pub packet_loss_pct: f64,
    pub sent_bandwidth_kbps: f64,
    pub received_bandwidth_kbps: f64,
    pub acked_bandwidth_kbps: f64,
}

/// Lifetime event counters. `packets_stale` counts duplicates and packets
///  outside the receive window, `packets_invalid` counts malformed headers -
///  both classes are dropped without ever surfacing an error to the caller.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct EndpointCounters {
    pub packets_sent: u64,
    pub packets_received: u64,
    pub packets_acked: u64,
    pub packets_lost: u64,
    pub packets_stale: u64,
    pub packets_invalid: u64,
    pub packets_too_large_to_send: u64,
    pub fragments_sent: u64,
    pub fragments_received: u64,
    pub fragments_invalid: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_ewma_adopts_first_sample() {
        let mut ewma = Ewma::new(0.1);
        assert_eq!(ewma.get(), 0.0);

        ewma.fold(40.0);
        assert_eq!(ewma.get(), 40.0);
    }

    #[rstest]
    #[case::toward_larger(40.0, 60.0, 42.0)]
    #[case::toward_smaller(40.0, 20.0, 38.0)]
    #[case::same(40.0, 40.0, 40.0)]
    fn test_ewma_folds_later_samples(#[case] first: f64, #[case] second: f64, #[case] expected: f64) {
        let mut ewma = Ewma::new(0.1);
        ewma.fold(first);
        ewma.fold(second);

        assert!((ewma.get() - expected).abs() < 1e-9);
    }

    #[test]
    fn test_ewma_reset() {
        let mut ewma = Ewma::new(0.1);
        ewma.fold(40.0);

        ewma.reset();
        assert_eq!(ewma.get(), 0.0);

        ewma.fold(7.0);
        assert_eq!(ewma.get(), 7.0);
    }

    #[test]
    fn test_rate_window_rolls_over() {
        let mut rate = RateWindow::new(Duration::from_secs(1), 0.1);

        // 1000 bytes in the first second -> 8 kbit/s
        rate.add(Duration::from_millis(0), 600);
        rate.add(Duration::from_millis(500), 400);
        assert_eq!(rate.rate_kbps(), 0.0);

        rate.update(Duration::from_millis(999));
        assert_eq!(rate.rate_kbps(), 0.0);

        rate.update(Duration::from_millis(1000));
        assert!((rate.rate_kbps() - 8.0).abs() < 1e-9);
    }

    #[test]
    fn test_rate_window_second_window_is_smoothed() {
        let mut rate = RateWindow::new(Duration::from_secs(1), 0.5);

        rate.add(Duration::from_millis(0), 1000);
        rate.update(Duration::from_secs(1));
        assert!((rate.rate_kbps() - 8.0).abs() < 1e-9);

        // an idle second folds a zero rate in with factor 0.5
        rate.update(Duration::from_secs(2));
        assert!((rate.rate_kbps() - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_rate_window_without_traffic_stays_zero() {
        let mut rate = RateWindow::new(Duration::from_secs(1), 0.1);

        rate.update(Duration::from_secs(5));
        assert_eq!(rate.rate_kbps(), 0.0);
    }
}

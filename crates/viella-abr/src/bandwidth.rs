use crate::ewma::Ewma;

/// Network throughput estimation, as consumed by the decision engine.
///
/// The trait exists so the orchestrator can be exercised against a mocked
/// source in tests; `BandwidthEstimator` is the production implementation.
#[cfg_attr(test, unimock::unimock(api = BandwidthSourceMock))]
pub trait BandwidthSource {
    /// Current estimated throughput in bits per second, or `None` while not
    /// enough data has been sampled.
    fn estimate(&self) -> Option<f64>;

    /// Record the metrics of a completed download.
    fn add_sample(&mut self, duration_ms: f64, size_bytes: u64);

    /// Discard all history, restoring pre-warmup behavior.
    fn reset(&mut self);
}

/// Mean-bandwidth calculator based on the bytes downloaded and the time
/// needed to do so.
///
/// Two moving averages run in parallel: a fast one reacting quickly to
/// throughput drops and a slow one adopting rises conservatively. The
/// reported estimate is the minimum of the two, deliberately biasing the
/// engine toward avoiding rebuffering.
#[derive(Clone, Debug)]
pub struct BandwidthEstimator {
    fast_ewma: Ewma,
    slow_ewma: Ewma,
    bytes_sampled: u64,
}

impl BandwidthEstimator {
    const FAST_HALF_LIFE_SECS: f64 = 2.0;
    const SLOW_HALF_LIFE_SECS: f64 = 10.0;
    /// Samples smaller than this are pure noise (init segments, tiny
    /// chunks) and are ignored.
    const MIN_CHUNK_BYTES: u64 = 16_000;
    /// No estimate is produced before this many bytes have been sampled.
    const MIN_TOTAL_BYTES: u64 = 150_000;
    const MIN_DURATION_MS: f64 = 0.5;

    pub fn new() -> Self {
        Self {
            fast_ewma: Ewma::new(Self::FAST_HALF_LIFE_SECS),
            slow_ewma: Ewma::new(Self::SLOW_HALF_LIFE_SECS),
            bytes_sampled: 0,
        }
    }

    pub fn add_sample(&mut self, duration_ms: f64, size_bytes: u64) {
        if size_bytes < Self::MIN_CHUNK_BYTES {
            return;
        }
        let duration_ms = duration_ms.max(Self::MIN_DURATION_MS);
        #[expect(clippy::cast_precision_loss)] // sizes are far below 2^52
        let bandwidth = size_bytes as f64 * 8000.0 / duration_ms;
        let weight = duration_ms / 1000.0;

        self.fast_ewma.add_sample(weight, bandwidth);
        self.slow_ewma.add_sample(weight, bandwidth);
        self.bytes_sampled = self.bytes_sampled.saturating_add(size_bytes);
    }

    /// Estimated bandwidth in bits per second, or `None` while the sampled
    /// volume is still under the warmup threshold.
    pub fn estimate(&self) -> Option<f64> {
        if self.bytes_sampled < Self::MIN_TOTAL_BYTES {
            return None;
        }
        Some(self.fast_ewma.estimate().min(self.slow_ewma.estimate()))
    }

    pub fn reset(&mut self) {
        tracing::debug!("bandwidth estimator reset");
        self.fast_ewma = Ewma::new(Self::FAST_HALF_LIFE_SECS);
        self.slow_ewma = Ewma::new(Self::SLOW_HALF_LIFE_SECS);
        self.bytes_sampled = 0;
    }
}

impl Default for BandwidthEstimator {
    fn default() -> Self {
        Self::new()
    }
}

impl BandwidthSource for BandwidthEstimator {
    fn estimate(&self) -> Option<f64> {
        self.estimate()
    }

    fn add_sample(&mut self, duration_ms: f64, size_bytes: u64) {
        self.add_sample(duration_ms, size_bytes);
    }

    fn reset(&mut self) {
        self.reset();
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn no_estimate_before_warmup_threshold() {
        let mut est = BandwidthEstimator::new();
        est.add_sample(1000.0, 100_000);
        assert_eq!(est.estimate(), None, "100kB is under the 150kB warmup");

        est.add_sample(1000.0, 60_000);
        assert!(est.estimate().is_some(), "160kB total crosses the warmup");
    }

    #[rstest]
    #[case(10_000)]
    #[case(15_999)]
    fn small_chunks_are_ignored(#[case] size_bytes: u64) {
        let mut est = BandwidthEstimator::new();
        for _ in 0..20 {
            est.add_sample(100.0, size_bytes);
        }
        assert_eq!(est.estimate(), None);
    }

    #[test]
    fn stable_throughput_is_estimated_exactly() {
        let mut est = BandwidthEstimator::new();
        // 200kB in 1s => 1.6Mbps
        for _ in 0..5 {
            est.add_sample(1000.0, 200_000);
        }
        let bps = est.estimate().unwrap();
        assert!((bps - 1_600_000.0).abs() < 1.0);
    }

    #[test]
    fn estimate_is_min_of_fast_and_slow() {
        let mut est = BandwidthEstimator::new();
        for _ in 0..10 {
            est.add_sample(1000.0, 1_000_000); // 8Mbps
        }
        let before_drop = est.estimate().unwrap();

        // Sudden drop to 800kbps: the fast average must pull the estimate
        // down well below the pre-drop level.
        for _ in 0..3 {
            est.add_sample(1000.0, 100_000);
        }
        let after_drop = est.estimate().unwrap();
        assert!(after_drop < before_drop * 0.5);

        // Sudden rise: adopted conservatively, the slow average caps it.
        let mut rising = BandwidthEstimator::new();
        for _ in 0..10 {
            rising.add_sample(1000.0, 100_000); // 800kbps
        }
        rising.add_sample(1000.0, 1_000_000); // one 8Mbps sample
        let after_rise = rising.estimate().unwrap();
        assert!(after_rise < 3_000_000.0, "rises must not be adopted eagerly");
    }

    #[test]
    fn reset_restores_prewarmup_behavior() {
        let mut est = BandwidthEstimator::new();
        for _ in 0..5 {
            est.add_sample(1000.0, 200_000);
        }
        assert!(est.estimate().is_some());

        est.reset();
        assert_eq!(est.estimate(), None);

        est.add_sample(1000.0, 100_000);
        assert_eq!(est.estimate(), None, "warmup starts over after reset");
    }

    #[test]
    fn zero_duration_is_clamped() {
        let mut est = BandwidthEstimator::new();
        est.add_sample(0.0, 200_000);
        let bps = est.estimate().unwrap();
        assert!(bps.is_finite());
        assert!(bps > 1_000_000.0);
    }
}

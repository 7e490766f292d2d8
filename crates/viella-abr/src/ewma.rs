/// Exponentially weighted moving average with warmup bias correction.
///
/// Samples carry an explicit weight (seconds of download time for bandwidth
/// samples). The decay constant is derived from a half-life: a sample loses
/// half its influence once `half_life` units of weight have been added after
/// it.
#[derive(Clone, Debug)]
pub(crate) struct Ewma {
    alpha: f64,
    last_estimate: f64,
    total_weight: f64,
}

impl Ewma {
    pub(crate) fn new(half_life: f64) -> Self {
        Self {
            alpha: f64::exp(0.5_f64.ln() / half_life.max(0.001)),
            last_estimate: 0.0,
            total_weight: 0.0,
        }
    }

    pub(crate) fn add_sample(&mut self, weight: f64, value: f64) {
        let adj_alpha = self.alpha.powf(weight.max(0.0));
        let new_estimate = value * (1.0 - adj_alpha) + adj_alpha * self.last_estimate;
        if new_estimate.is_nan() {
            return;
        }
        self.last_estimate = new_estimate;
        self.total_weight += weight.max(0.0);
    }

    /// Current estimate, corrected for the startup bias towards zero.
    pub(crate) fn estimate(&self) -> f64 {
        if self.total_weight <= 0.0 {
            return 0.0;
        }
        let zero_factor = 1.0 - self.alpha.powf(self.total_weight);
        self.last_estimate / zero_factor.max(1e-6)
    }
}

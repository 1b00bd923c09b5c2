//! StageEWMA: exponentially-weighted moving average of stage latencies.

/// Smoothing factor matching the original Python agent's `alpha=0.2`.
const ALPHA: f64 = 0.2;

#[derive(Debug, Clone, Copy)]
pub struct Ewma {
    value_ms: f64,
    initialized: bool,
}

impl Ewma {
    pub fn new() -> Self {
        Self {
            value_ms: 0.0,
            initialized: false,
        }
    }

    /// Folds in a new sample. The first sample initializes the average
    /// without smoothing; every subsequent sample applies the standard
    /// `alpha * sample + (1 - alpha) * previous` update. Negative samples
    /// clamp to zero — a stage call can never take negative time.
    pub fn update(&mut self, sample_ms: f64) -> f64 {
        let sample = sample_ms.max(0.0);
        if !self.initialized {
            self.value_ms = sample;
            self.initialized = true;
        } else {
            self.value_ms = ALPHA * sample + (1.0 - ALPHA) * self.value_ms;
        }
        self.value_ms
    }

    pub fn value(&self) -> f64 {
        self.value_ms
    }
}

impl Default for Ewma {
    fn default() -> Self {
        Self::new()
    }
}

/// Policy deciding the maximum word distance at which two texts are "close".
pub trait ThresholdSetter: Send + Sync {
    fn threshold(&self, len_a: usize, len_b: usize) -> usize;
}

impl<F> ThresholdSetter for F
where
    F: Fn(usize, usize) -> usize + Send + Sync,
{
    fn threshold(&self, len_a: usize, len_b: usize) -> usize {
        self(len_a, len_b)
    }
}

/// `round(max(0, (min(len_a, len_b) - delta) / factor))`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearThreshold {
    pub delta: f64,
    pub factor: f64,
}

impl LinearThreshold {
    pub fn new(delta: f64, factor: f64) -> Self {
        Self { delta, factor }
    }
}

impl Default for LinearThreshold {
    fn default() -> Self {
        Self {
            delta: 1.0,
            factor: 3.0,
        }
    }
}

impl ThresholdSetter for LinearThreshold {
    fn threshold(&self, len_a: usize, len_b: usize) -> usize {
        let shortest = len_a.min(len_b) as f64;
        ((shortest - self.delta).max(0.0) / self.factor).round() as usize
    }
}

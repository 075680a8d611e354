//! Fixed-capacity rolling window of closes

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::error::EngineError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceWindow {
    capacity: usize,
    closes: VecDeque<f64>,
}

impl PriceWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            closes: VecDeque::with_capacity(capacity),
        }
    }

    /// Append a close, evicting the oldest on overflow
    pub fn push(&mut self, close: f64) {
        if self.capacity == 0 {
            return;
        }
        if self.closes.len() == self.capacity {
            self.closes.pop_front();
        }
        self.closes.push_back(close);
    }

    pub fn len(&self) -> usize {
        self.closes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.closes.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.capacity > 0 && self.closes.len() >= self.capacity
    }

    pub fn latest(&self) -> Option<f64> {
        self.closes.back().copied()
    }

    pub fn closes(&self) -> impl Iterator<Item = f64> + '_ {
        self.closes.iter().copied()
    }

    pub fn mean(&self) -> Option<f64> {
        if self.closes.is_empty() {
            return None;
        }
        Some(self.closes.iter().sum::<f64>() / self.closes.len() as f64)
    }

    /// Sample standard deviation (divisor n - 1)
    pub fn sample_std(&self) -> Option<f64> {
        let n = self.closes.len();
        if n < 2 {
            return None;
        }
        let mean = self.mean()?;
        let ss: f64 = self.closes.iter().map(|c| (c - mean).powi(2)).sum();
        Some((ss / (n - 1) as f64).sqrt())
    }

    /// `(latest - mean) / stddev` over the window
    pub fn z_score(&self) -> Result<f64, EngineError> {
        let samples = self.closes.len();
        let (latest, mean, std) = match (self.latest(), self.mean(), self.sample_std()) {
            (Some(l), Some(m), Some(s)) => (l, m, s),
            _ => {
                return Err(EngineError::InsufficientVariance {
                    samples,
                    stddev: 0.0,
                })
            }
        };
        if !std.is_finite() || std <= f64::EPSILON * mean.abs().max(1.0) {
            return Err(EngineError::InsufficientVariance {
                samples,
                stddev: std,
            });
        }
        Ok((latest - mean) / std)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window_of(capacity: usize, closes: &[f64]) -> PriceWindow {
        let mut w = PriceWindow::new(capacity);
        for c in closes {
            w.push(*c);
        }
        w
    }

    #[test]
    fn evicts_oldest_on_overflow() {
        let w = window_of(3, &[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(w.len(), 3);
        assert_eq!(w.closes().collect::<Vec<_>>(), vec![2.0, 3.0, 4.0]);
        assert!(w.is_full());
    }

    #[test]
    fn sample_std_uses_bessel_correction() {
        let w = window_of(3, &[100.0, 101.0, 99.0]);
        assert_eq!(w.mean(), Some(100.0));
        assert!((w.sample_std().unwrap() - 1.0).abs() < 1e-12);
        assert!((w.z_score().unwrap() - (-1.0)).abs() < 1e-12);
    }

    #[test]
    fn z_score_sign_follows_close_minus_mean() {
        for closes in [
            vec![10.0, 11.0, 12.5, 9.0, 14.0],
            vec![10.0, 11.0, 12.5, 9.0, 7.0],
            vec![5.0, 5.5, 4.5, 6.0, 5.1],
        ] {
            let w = window_of(closes.len(), &closes);
            let z = w.z_score().unwrap();
            let diff = w.latest().unwrap() - w.mean().unwrap();
            assert_eq!(z.signum(), diff.signum());
        }
    }

    #[test]
    fn flat_window_is_insufficient_variance() {
        let w = window_of(4, &[50.0, 50.0, 50.0, 50.0]);
        assert!(matches!(
            w.z_score(),
            Err(EngineError::InsufficientVariance { samples: 4, .. })
        ));
    }
}

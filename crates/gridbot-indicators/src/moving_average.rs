//! Moving average indicators.

use gridbot_core::traits::Indicator;

/// Exponential Moving Average (EMA).
///
/// Gives more weight to recent prices using an exponential decay.
#[derive(Debug, Clone)]
pub struct Ema {
    period: usize,
    multiplier: f64,
}

impl Ema {
    /// Create a new EMA with the specified period.
    pub fn new(period: usize) -> Self {
        assert!(period > 0, "Period must be greater than 0");
        let multiplier = 2.0 / (period as f64 + 1.0);
        Self { period, multiplier }
    }
}

impl Indicator for Ema {
    type Output = f64;

    fn calculate(&self, data: &[f64]) -> Vec<f64> {
        if data.len() < self.period {
            return vec![];
        }

        let mut result = Vec::with_capacity(data.len() - self.period + 1);

        // Initialize with SMA
        let initial_sma: f64 = data[..self.period].iter().sum::<f64>() / self.period as f64;
        result.push(initial_sma);

        let mut ema = initial_sma;
        let one_minus_mult = 1.0 - self.multiplier;

        for &price in &data[self.period..] {
            ema = price * self.multiplier + ema * one_minus_mult;
            result.push(ema);
        }

        result
    }

    fn period(&self) -> usize {
        self.period
    }

    fn name(&self) -> &str {
        "EMA"
    }
}

/// EMA over volume, with the surge predicate used by the volume-filter
/// strategy.
#[derive(Debug, Clone)]
pub struct VolumeEma {
    ema: Ema,
}

impl VolumeEma {
    /// Create a new volume EMA with the specified period.
    pub fn new(period: usize) -> Self {
        Self {
            ema: Ema::new(period),
        }
    }

    /// Latest EMA of the volume series, if defined.
    pub fn latest(&self, volumes: &[f64]) -> Option<f64> {
        self.ema.calculate(volumes).last().copied()
    }

    /// Whether `volume` exceeds `multiplier` times the EMA baseline.
    pub fn is_surge(volume: f64, baseline: f64, multiplier: f64) -> bool {
        volume > baseline * multiplier
    }
}

impl Indicator for VolumeEma {
    type Output = f64;

    fn calculate(&self, data: &[f64]) -> Vec<f64> {
        self.ema.calculate(data)
    }

    fn period(&self) -> usize {
        self.ema.period()
    }

    fn name(&self) -> &str {
        "VolumeEMA"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ema() {
        let ema = Ema::new(3);
        let data = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let result = ema.calculate(&data);

        assert_eq!(result.len(), 3);
        assert!((result[0] - 2.0).abs() < 1e-10); // Initial SMA
        // mult = 2/(3+1) = 0.5; result[1] = 4 * 0.5 + 2 * 0.5 = 3.0
        assert!((result[1] - 3.0).abs() < 1e-10);
    }

    #[test]
    fn test_ema_insufficient_data() {
        let ema = Ema::new(5);
        assert!(ema.calculate(&[1.0, 2.0, 3.0]).is_empty());
    }

    #[test]
    fn test_volume_surge() {
        let volumes = vec![50.0, 50.0, 50.0, 50.0, 50.0];
        let vema = VolumeEma::new(5);
        let baseline = vema.latest(&volumes).unwrap();
        assert!((baseline - 50.0).abs() < 1e-10);

        assert!(VolumeEma::is_surge(100.0, baseline, 1.5));
        assert!(!VolumeEma::is_surge(60.0, baseline, 1.5));
        // Exactly at the threshold is not a surge.
        assert!(!VolumeEma::is_surge(75.0, baseline, 1.5));
    }
}

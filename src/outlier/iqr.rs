//! Interquartile range rule
//!
//! Flags values outside `[Q1 - k * IQR, Q3 + k * IQR]`, with quartiles computed by linear
//! interpolation over every present value in the window.

use super::{DetectionError, OutlierStrategy};
use crate::types::{AnomalyFlag, Measurement};

use ndarray::Array1;
use ndarray_stats::{interpolate::Linear, Quantile1dExt};
use noisy_float::types::{n64, N64};

const NAME: &str = "IQR rule";

/// Smallest number of present values for which quartiles are meaningful, exclusive.
pub const MIN_VALUES: usize = 10;

/// Default multiple of the interquartile range.
pub const DEFAULT_MULTIPLIER: f64 = 1.5;

/// [OutlierStrategy] applying the interquartile range rule
#[derive(Clone, Copy, Debug)]
pub struct IqrRule {
    multiplier: f64,
}

impl Default for IqrRule {
    fn default() -> Self {
        Self::new(DEFAULT_MULTIPLIER)
    }
}

impl IqrRule {
    /// Returns an IqrRule flagging values further than `multiplier` interquartile ranges outside
    /// the quartiles.
    pub fn new(multiplier: f64) -> Self {
        Self { multiplier }
    }

    /// Returns the inclusive range of normal values for `values`.
    fn bounds(&self, values: Vec<N64>) -> Result<(f64, f64), DetectionError> {
        let mut values = Array1::from(values);
        let mut quantile = |q: f64| {
            values
                .quantile_mut(n64(q), &Linear)
                .map(|value| value.raw())
                .map_err(|err| DetectionError::Computation(err.to_string()))
        };
        let q1 = quantile(0.25)?;
        let q3 = quantile(0.75)?;
        let spread = self.multiplier * (q3 - q1);
        Ok((q1 - spread, q3 + spread))
    }
}

impl OutlierStrategy for IqrRule {
    fn name(&self) -> &'static str {
        NAME
    }

    fn classify(&self, data: &[Measurement]) -> Result<Vec<AnomalyFlag>, DetectionError> {
        let values: Vec<N64> = data
            .iter()
            .filter_map(|m| m.value)
            .filter(|v| v.is_finite())
            .map(n64)
            .collect();
        if values.len() <= MIN_VALUES {
            return Err(DetectionError::InsufficientData {
                required: MIN_VALUES,
                actual: values.len(),
            });
        }
        let (lower, upper) = self.bounds(values)?;
        Ok(data
            .iter()
            .map(|m| match m.value {
                Some(value) if value.is_finite() => {
                    if value < lower || value > upper {
                        AnomalyFlag::Outlier
                    } else {
                        AnomalyFlag::Normal
                    }
                }
                _ => AnomalyFlag::Unknown,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils;
    use chrono::{Duration, TimeZone, Utc};

    fn data(n: usize, f: impl Fn(usize) -> f64) -> Vec<Measurement> {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        test_utils::series("Haifa", start, Duration::minutes(1), n, f)
    }

    #[test]
    fn bounds_linear() {
        // Quartiles of 1..=11 are 3.5 and 8.5.
        let values = (1..=11).map(|v| n64(v as f64)).collect();
        let (lower, upper) = IqrRule::default().bounds(values).unwrap();
        assert_eq!(-4.0, lower);
        assert_eq!(16.0, upper);
    }

    #[test]
    fn flags_spike() {
        let mut data = data(30, |i| 0.1 + (i % 3) as f64 * 0.01);
        data[17].value = Some(3.0);
        let flags = IqrRule::default().classify(&data).unwrap();
        assert_eq!(AnomalyFlag::Outlier, flags[17]);
        assert_eq!(1, flags.iter().filter(|f| **f == AnomalyFlag::Outlier).count());
    }

    #[test]
    fn absent_values_unknown() {
        let mut data = data(20, |i| i as f64);
        data[3].value = None;
        let flags = IqrRule::default().classify(&data).unwrap();
        assert_eq!(AnomalyFlag::Unknown, flags[3]);
        assert_eq!(AnomalyFlag::Normal, flags[4]);
    }

    #[test]
    fn insufficient_data() {
        let mut data = data(12, |i| i as f64);
        data[0].value = None;
        data[1].value = Some(f64::NAN);
        assert_eq!(
            Err(DetectionError::InsufficientData {
                required: MIN_VALUES,
                actual: 10
            }),
            IqrRule::default().classify(&data)
        );
    }

    #[test]
    fn eleven_values_enough() {
        assert!(IqrRule::default().classify(&data(11, |i| i as f64)).is_ok());
    }
}

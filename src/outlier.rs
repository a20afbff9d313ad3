//! Outlier detection with graceful degradation
//!
//! The detector tries a primary strategy, then a fallback strategy, and if both fail marks every
//! measurement as unclassified. Detection failure never fails a request.

pub mod iqr;
pub mod southern_baseline;

use crate::metrics::OUTLIER_DETECTIONS;
use crate::types::{AnomalyFlag, Measurement};

use std::sync::atomic::{AtomicUsize, Ordering};
use strum_macros::{Display, IntoStaticStr};
use thiserror::Error;
use tracing::{event, Level};

/// Reasons an [OutlierStrategy] could not classify a window
#[derive(Debug, Error, PartialEq)]
pub enum DetectionError {
    /// The strategy's prerequisites are missing for this window
    #[error("{strategy} unavailable: {reason}")]
    Unavailable {
        strategy: &'static str,
        reason: String,
    },

    /// Too few values to estimate a distribution
    #[error("insufficient data: need more than {required} values, got {actual}")]
    InsufficientData { required: usize, actual: usize },

    /// Numerical failure while classifying
    #[error("computation failed: {0}")]
    Computation(String),
}

/// A method of classifying a window of measurements.
pub trait OutlierStrategy: std::fmt::Debug + Send + Sync {
    /// Returns the name of the strategy, for logging.
    fn name(&self) -> &'static str;

    /// Classify every measurement in `data`.
    ///
    /// On success returns one flag per measurement, in the same order.
    fn classify(&self, data: &[Measurement]) -> Result<Vec<AnomalyFlag>, DetectionError>;
}

/// Terminal state of a detection run
#[derive(Clone, Copy, Debug, Display, Eq, IntoStaticStr, PartialEq)]
#[strum(serialize_all = "snake_case")]
pub enum DetectionState {
    /// Detection was not requested
    NotRequested,
    /// The primary strategy classified the window
    PrimarySucceeded,
    /// The primary strategy failed and the fallback classified the window
    FallbackSucceeded,
    /// Every strategy failed, all flags are unknown
    AllFailed,
}

/// Detects outliers using a primary strategy with a fallback.
#[derive(Debug)]
pub struct OutlierDetector {
    primary: Option<Box<dyn OutlierStrategy>>,
    fallback: Box<dyn OutlierStrategy>,
    invocations: AtomicUsize,
}

impl OutlierDetector {
    /// Returns a new OutlierDetector.
    ///
    /// # Arguments
    ///
    /// * `primary`: Optional primary strategy. When `None` the fallback is used directly.
    /// * `fallback`: Strategy used when the primary is absent or fails
    pub fn new(
        primary: Option<Box<dyn OutlierStrategy>>,
        fallback: Box<dyn OutlierStrategy>,
    ) -> Self {
        Self {
            primary,
            fallback,
            invocations: AtomicUsize::new(0),
        }
    }

    /// Returns the number of times detection has run.
    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::Relaxed)
    }

    /// Classify every measurement in `data`, setting its anomaly flag.
    ///
    /// Returns the terminal state. Only values are read; stations and timestamps are untouched.
    #[tracing::instrument(level = "DEBUG", skip_all, fields(len = data.len()))]
    pub fn detect(&self, data: &mut [Measurement]) -> DetectionState {
        self.invocations.fetch_add(1, Ordering::Relaxed);
        let state = self.run(data);
        let label: &'static str = state.into();
        OUTLIER_DETECTIONS.with_label_values(&[label]).inc();
        state
    }

    fn run(&self, data: &mut [Measurement]) -> DetectionState {
        if let Some(primary) = &self.primary {
            match primary.classify(data) {
                Ok(flags) => {
                    apply(data, flags);
                    return DetectionState::PrimarySucceeded;
                }
                Err(err) => event!(
                    Level::WARN,
                    "Outlier detection with {} failed, falling back to {}: {}",
                    primary.name(),
                    self.fallback.name(),
                    err
                ),
            }
        }
        match self.fallback.classify(data) {
            Ok(flags) => {
                apply(data, flags);
                DetectionState::FallbackSucceeded
            }
            Err(err) => {
                event!(
                    Level::WARN,
                    "Outlier detection with {} failed, leaving data unclassified: {}",
                    self.fallback.name(),
                    err
                );
                for measurement in data.iter_mut() {
                    measurement.anomaly = AnomalyFlag::Unknown;
                }
                DetectionState::AllFailed
            }
        }
    }
}

fn apply(data: &mut [Measurement], flags: Vec<AnomalyFlag>) {
    for (measurement, flag) in data.iter_mut().zip(flags) {
        measurement.anomaly = flag;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils;
    use chrono::{Duration, TimeZone, Utc};

    #[derive(Debug)]
    struct Fixed(Result<AnomalyFlag, DetectionError>);

    impl OutlierStrategy for Fixed {
        fn name(&self) -> &'static str {
            "fixed"
        }

        fn classify(&self, data: &[Measurement]) -> Result<Vec<AnomalyFlag>, DetectionError> {
            match &self.0 {
                Ok(flag) => Ok(vec![*flag; data.len()]),
                Err(_) => Err(DetectionError::Computation("boom".to_string())),
            }
        }
    }

    fn ok(flag: AnomalyFlag) -> Box<dyn OutlierStrategy> {
        Box::new(Fixed(Ok(flag)))
    }

    fn failing() -> Box<dyn OutlierStrategy> {
        Box::new(Fixed(Err(DetectionError::Computation(String::new()))))
    }

    fn data() -> Vec<Measurement> {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        test_utils::series("Haifa", start, Duration::minutes(1), 5, |_| 0.1)
    }

    #[test]
    fn primary_succeeds() {
        let detector = OutlierDetector::new(Some(ok(AnomalyFlag::Outlier)), ok(AnomalyFlag::Normal));
        let mut data = data();
        assert_eq!(DetectionState::PrimarySucceeded, detector.detect(&mut data));
        assert!(data.iter().all(|m| m.anomaly == AnomalyFlag::Outlier));
        assert_eq!(1, detector.invocations());
    }

    #[test]
    fn fallback_succeeds() {
        let detector = OutlierDetector::new(Some(failing()), ok(AnomalyFlag::Normal));
        let mut data = data();
        assert_eq!(DetectionState::FallbackSucceeded, detector.detect(&mut data));
        assert!(data.iter().all(|m| m.anomaly == AnomalyFlag::Normal));
    }

    #[test]
    fn no_primary() {
        let detector = OutlierDetector::new(None, ok(AnomalyFlag::Normal));
        let mut data = data();
        assert_eq!(DetectionState::FallbackSucceeded, detector.detect(&mut data));
    }

    #[test]
    fn all_failed() {
        let detector = OutlierDetector::new(Some(failing()), failing());
        let mut data = data();
        data[0].anomaly = AnomalyFlag::Outlier;
        let before = data.clone();
        assert_eq!(DetectionState::AllFailed, detector.detect(&mut data));
        assert!(data.iter().all(|m| m.anomaly == AnomalyFlag::Unknown));
        for (a, b) in before.iter().zip(&data) {
            assert_eq!((&a.station, a.timestamp, a.value), (&b.station, b.timestamp, b.value));
        }
    }

    #[test]
    fn state_names() {
        assert_eq!("primary_succeeded", DetectionState::PrimarySucceeded.to_string());
        assert_eq!("all_failed", DetectionState::AllFailed.to_string());
    }

    #[test]
    fn error_messages() {
        let err = DetectionError::InsufficientData {
            required: 10,
            actual: 3,
        };
        assert_eq!(
            "insufficient data: need more than 10 values, got 3",
            err.to_string()
        );
    }
}

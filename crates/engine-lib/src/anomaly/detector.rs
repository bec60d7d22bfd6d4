//! Sliding-window z-score classification
//!
//! A value is compared against the mean and population standard deviation of
//! the values that preceded it. The band `mean ± sensitivity * std` is normal
//! including its edges; anything strictly outside is anomalous.

use super::window::{degenerate_tolerance, WindowStats, WindowStore, DEFAULT_WINDOW_SIZE};
use crate::models::{Anomaly, DetectionStatus, ExpectedRange, MetricKey, Severity};
use chrono::{DateTime, Utc};

/// Default number of standard deviations treated as normal
pub const DEFAULT_SENSITIVITY: f64 = 2.5;

/// z-score reported when the window has no spread but the value moved
pub const DEGENERATE_Z_SCORE: f64 = 1000.0;

/// Width of the info band above the sensitivity when not configured
const DEFAULT_INFO_BAND: f64 = 0.5;

/// Width of the info plus warning bands when not configured
const DEFAULT_CRITICAL_OFFSET: f64 = 1.0;

/// Configuration for the anomaly detector
#[derive(Debug, Clone)]
pub struct DetectorConfig {
    /// Values kept per key
    pub window_size: usize,
    /// Prior values required before a verdict is given
    pub min_samples: usize,
    /// Standard deviations treated as normal
    pub sensitivity: f64,
    /// z-score at which an anomaly becomes a warning (default sensitivity + 0.5)
    pub warning_z: Option<f64>,
    /// z-score at which an anomaly becomes critical (default sensitivity + 1)
    pub critical_z: Option<f64>,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            window_size: DEFAULT_WINDOW_SIZE,
            min_samples: DEFAULT_WINDOW_SIZE,
            sensitivity: DEFAULT_SENSITIVITY,
            warning_z: None,
            critical_z: None,
        }
    }
}

impl DetectorConfig {
    /// Reject settings under which no value could ever be classified
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.window_size == 0 {
            anyhow::bail!("window size must be at least 1");
        }
        if self.min_samples > self.window_size {
            anyhow::bail!(
                "min_samples ({}) cannot exceed the window size ({})",
                self.min_samples,
                self.window_size
            );
        }
        if !self.sensitivity.is_finite() || self.sensitivity < 0.0 {
            anyhow::bail!("sensitivity must be a non-negative number, got {}", self.sensitivity);
        }
        for (name, z) in [("warning_z", self.warning_z), ("critical_z", self.critical_z)] {
            if let Some(z) = z.filter(|z| !z.is_finite()) {
                anyhow::bail!("{} must be finite, got {}", name, z);
            }
        }
        Ok(())
    }
}

/// z-score cut points for the anomalous severity tiers
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeverityThresholds {
    pub warning_z: f64,
    pub critical_z: f64,
}

impl SeverityThresholds {
    pub fn for_sensitivity(sensitivity: f64) -> Self {
        Self {
            warning_z: sensitivity + DEFAULT_INFO_BAND,
            critical_z: sensitivity + DEFAULT_CRITICAL_OFFSET,
        }
    }

    /// Severity of an anomalous value. Monotonic in `z`.
    pub fn classify(&self, z: f64) -> Severity {
        if z >= self.critical_z {
            Severity::Critical
        } else if z >= self.warning_z {
            Severity::Warning
        } else {
            Severity::Info
        }
    }
}

/// Stateless classifier over a window of prior values
#[derive(Debug, Clone)]
pub struct AnomalyDetector {
    config: DetectorConfig,
}

impl AnomalyDetector {
    pub fn new(mut config: DetectorConfig) -> Self {
        config.window_size = config.window_size.max(1);
        config.min_samples = config.min_samples.max(1);
        Self { config }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    pub fn sensitivity(&self) -> f64 {
        self.config.sensitivity
    }

    /// Severity thresholds for a given sensitivity, honouring configured overrides
    pub fn thresholds(&self, sensitivity: f64) -> SeverityThresholds {
        let derived = SeverityThresholds::for_sensitivity(sensitivity);
        let critical_z = self.config.critical_z.unwrap_or(derived.critical_z);
        let warning_z = self.config.warning_z.unwrap_or(derived.warning_z).min(critical_z);
        SeverityThresholds {
            warning_z,
            critical_z,
        }
    }

    /// Classify `current` against `window`, which must hold only prior values
    pub fn detect(
        &self,
        key: &MetricKey,
        window: &[f64],
        current: f64,
        sensitivity: f64,
        now: DateTime<Utc>,
    ) -> Anomaly {
        let stats = match WindowStats::compute(window) {
            Some(stats) if window.len() >= self.config.min_samples => stats,
            _ => return self.insufficient_history(key, window.len(), current, now),
        };

        let lower = stats.mean - sensitivity * stats.std_dev;
        let upper = stats.mean + sensitivity * stats.std_dev;
        let deviation = (current - stats.mean).abs();

        let (z_score, is_anomaly) = if stats.is_degenerate() {
            if deviation <= degenerate_tolerance(stats.mean) {
                (0.0, false)
            } else {
                (DEGENERATE_Z_SCORE, true)
            }
        } else {
            (
                (deviation / stats.std_dev).min(DEGENERATE_Z_SCORE),
                current < lower || current > upper,
            )
        };

        let confidence = (0.5 + z_score / 10.0).clamp(0.0, 1.0);
        let severity = if is_anomaly {
            self.thresholds(sensitivity).classify(z_score)
        } else {
            Severity::Normal
        };

        Anomaly {
            service: key.service.clone(),
            metric: key.metric.clone(),
            current_value: current,
            expected_range: ExpectedRange {
                min: lower,
                max: upper,
                mean: stats.mean,
            },
            is_anomaly,
            confidence,
            z_score,
            severity,
            status: DetectionStatus::Evaluated,
            samples: stats.count,
            timestamp: now,
        }
    }

    /// Classify `current` against the key's stored window, then append it.
    ///
    /// Runs under the key's window lock so the verdict always reflects prior
    /// history only, and concurrent observations of the same key serialize.
    pub fn observe(
        &self,
        store: &WindowStore,
        key: &MetricKey,
        current: f64,
        now: DateTime<Utc>,
    ) -> Anomaly {
        store.with_window(key, |window| {
            let record = self.detect(key, window.as_slice(), current, self.config.sensitivity, now);
            window.push(current);
            record
        })
    }

    fn insufficient_history(
        &self,
        key: &MetricKey,
        samples: usize,
        current: f64,
        now: DateTime<Utc>,
    ) -> Anomaly {
        Anomaly {
            service: key.service.clone(),
            metric: key.metric.clone(),
            current_value: current,
            expected_range: ExpectedRange {
                min: 0.0,
                max: 0.0,
                mean: 0.0,
            },
            is_anomaly: false,
            confidence: 0.0,
            z_score: 0.0,
            severity: Severity::Normal,
            status: DetectionStatus::InsufficientHistory,
            samples,
            timestamp: now,
        }
    }
}

impl Default for AnomalyDetector {
    fn default() -> Self {
        Self::new(DetectorConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> MetricKey {
        MetricKey::new("orders", "latency")
    }

    /// 10 x 45 and 10 x 55: mean 50, population std 5
    fn spread_window() -> Vec<f64> {
        let mut values = vec![45.0; 10];
        values.extend(vec![55.0; 10]);
        values
    }

    #[test]
    fn test_config_validation() {
        assert!(DetectorConfig::default().validate().is_ok());

        let unreachable = DetectorConfig {
            window_size: 5,
            min_samples: 10,
            ..Default::default()
        };
        let err = unreachable.validate().unwrap_err();
        assert!(err.to_string().contains("min_samples"));

        for sensitivity in [-1.0, f64::NAN, f64::INFINITY] {
            let config = DetectorConfig {
                sensitivity,
                ..Default::default()
            };
            assert!(config.validate().is_err(), "sensitivity {} accepted", sensitivity);
        }

        let config = DetectorConfig {
            critical_z: Some(f64::NAN),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_constant_window_same_value_is_normal() {
        let detector = AnomalyDetector::default();

        for v in [0.0, 0.1, 10.0, 123.456, -7.5] {
            let result = detector.detect(&key(), &[v; 20], v, 2.5, Utc::now());
            assert!(!result.is_anomaly, "value {} flagged", v);
            assert!((result.confidence - 0.5).abs() < 1e-9);
            assert_eq!(result.severity, Severity::Normal);
            assert_eq!(result.status, DetectionStatus::Evaluated);
        }
    }

    #[test]
    fn test_constant_window_any_deviation_is_critical() {
        let detector = AnomalyDetector::default();
        let result = detector.detect(&key(), &[10.0; 20], 50.0, 2.5, Utc::now());

        assert!(result.is_anomaly);
        assert_eq!(result.severity, Severity::Critical);
        assert_eq!(result.z_score, DEGENERATE_Z_SCORE);
        assert_eq!(result.confidence, 1.0);
    }

    #[test]
    fn test_value_on_bound_is_normal() {
        let detector = AnomalyDetector::default();
        let window = spread_window();

        // 50 - 2.5 * 5
        let on_lower = detector.detect(&key(), &window, 37.5, 2.5, Utc::now());
        assert!(!on_lower.is_anomaly);
        assert_eq!(on_lower.expected_range.min, 37.5);
        assert_eq!(on_lower.expected_range.max, 62.5);

        let on_upper = detector.detect(&key(), &window, 62.5, 2.5, Utc::now());
        assert!(!on_upper.is_anomaly);

        // sensitivity 2 puts the lower bound at 40
        let at_forty = detector.detect(&key(), &window, 40.0, 2.0, Utc::now());
        assert!(!at_forty.is_anomaly);
    }

    #[test]
    fn test_value_just_outside_bound_is_anomalous() {
        let detector = AnomalyDetector::default();
        let window = spread_window();

        let below = detector.detect(&key(), &window, 37.49, 2.5, Utc::now());
        assert!(below.is_anomaly);
        assert_eq!(below.severity, Severity::Info);

        let above = detector.detect(&key(), &window, 62.51, 2.5, Utc::now());
        assert!(above.is_anomaly);

        let below_forty = detector.detect(&key(), &window, 39.99, 2.0, Utc::now());
        assert!(below_forty.is_anomaly);
    }

    #[test]
    fn test_severity_tiers() {
        let detector = AnomalyDetector::default();
        let window = spread_window();

        // z = 2.8 -> info (2.5 < z < 3.0)
        let info = detector.detect(&key(), &window, 64.0, 2.5, Utc::now());
        assert_eq!(info.severity, Severity::Info);

        // z = 3.0 -> warning (3.0 <= z < 3.5)
        let warning = detector.detect(&key(), &window, 65.0, 2.5, Utc::now());
        assert_eq!(warning.severity, Severity::Warning);

        // z = 3.4 -> still warning
        let warning_edge = detector.detect(&key(), &window, 67.0, 2.5, Utc::now());
        assert_eq!(warning_edge.severity, Severity::Warning);

        // z = 3.5 -> critical
        let critical = detector.detect(&key(), &window, 67.5, 2.5, Utc::now());
        assert_eq!(critical.severity, Severity::Critical);
    }

    #[test]
    fn test_configured_thresholds_override_defaults() {
        let detector = AnomalyDetector::new(DetectorConfig {
            warning_z: Some(4.0),
            critical_z: Some(6.0),
            ..Default::default()
        });
        let window = spread_window();

        // z = 5
        let result = detector.detect(&key(), &window, 75.0, 2.5, Utc::now());
        assert_eq!(result.severity, Severity::Warning);

        // z = 3
        let result = detector.detect(&key(), &window, 65.0, 2.5, Utc::now());
        assert_eq!(result.severity, Severity::Info);
    }

    #[test]
    fn test_confidence_is_monotonic_and_clamped() {
        let detector = AnomalyDetector::default();
        let window = spread_window();

        let mut previous = 0.0;
        for step in 0..200 {
            let current = 50.0 + step as f64 * 0.5;
            let result = detector.detect(&key(), &window, current, 2.5, Utc::now());
            assert!(result.confidence >= previous);
            assert!((0.0..=1.0).contains(&result.confidence));
            previous = result.confidence;
        }
        assert_eq!(previous, 1.0);
    }

    #[test]
    fn test_insufficient_history_has_no_verdict() {
        let detector = AnomalyDetector::default();
        let result = detector.detect(&key(), &[10.0; 19], 500.0, 2.5, Utc::now());

        assert!(!result.is_anomaly);
        assert_eq!(result.confidence, 0.0);
        assert_eq!(result.status, DetectionStatus::InsufficientHistory);
        assert!(!result.has_verdict());
        assert_eq!(result.samples, 19);

        let empty = detector.detect(&key(), &[], 1.0, 2.5, Utc::now());
        assert_eq!(empty.status, DetectionStatus::InsufficientHistory);
    }

    #[test]
    fn test_observe_appends_after_verdict() {
        let detector = AnomalyDetector::new(DetectorConfig {
            window_size: 5,
            min_samples: 5,
            ..Default::default()
        });
        let store = WindowStore::new(5);
        let key = key();

        for _ in 0..5 {
            let record = detector.observe(&store, &key, 10.0, Utc::now());
            assert_eq!(record.status, DetectionStatus::InsufficientHistory);
        }

        let spike = detector.observe(&store, &key, 99.0, Utc::now());
        assert!(spike.is_anomaly);
        assert_eq!(spike.samples, 5);
        assert_eq!(spike.expected_range.mean, 10.0);

        assert_eq!(store.snapshot(&key), Some(vec![10.0, 10.0, 10.0, 10.0, 99.0]));
    }
}

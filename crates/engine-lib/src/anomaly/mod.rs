//! Statistical anomaly detection over service metrics
//!
//! This module provides:
//! - Per-key sliding windows of recent values
//! - Z-score classification with severity tiers
//! - A board of the latest results for display and policy evaluation

mod board;
mod detector;
mod window;

pub use board::{CycleScope, PredictionBoard, ServiceHealth, ServiceStatus, DEFAULT_HISTORY_LIMIT};
pub use detector::{
    AnomalyDetector, DetectorConfig, SeverityThresholds, DEFAULT_SENSITIVITY, DEGENERATE_Z_SCORE,
};
pub use window::{SlidingWindow, WindowStats, WindowStore, DEFAULT_WINDOW_SIZE};

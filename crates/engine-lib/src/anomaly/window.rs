//! Sliding windows of recent metric values
//!
//! One fixed-capacity FIFO window is kept per (service, metric) key. Windows
//! live in a sharded map so that mutations are serialized per key while
//! unrelated keys proceed in parallel.

use crate::models::MetricKey;
use dashmap::DashMap;
use std::collections::VecDeque;

/// Default number of values kept per key
pub const DEFAULT_WINDOW_SIZE: usize = 20;

/// Fixed-capacity FIFO buffer of the most recent values for one key
#[derive(Debug, Clone)]
pub struct SlidingWindow {
    values: VecDeque<f64>,
    capacity: usize,
}

impl SlidingWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            values: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a value, returning the evicted oldest value if the window was full
    pub fn push(&mut self, value: f64) -> Option<f64> {
        let evicted = if self.values.len() == self.capacity {
            self.values.pop_front()
        } else {
            None
        };
        self.values.push_back(value);
        evicted
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.values.len() == self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Values oldest first, as one slice
    pub fn as_slice(&mut self) -> &[f64] {
        self.values.make_contiguous()
    }

    pub fn to_vec(&self) -> Vec<f64> {
        self.values.iter().copied().collect()
    }
}

/// Mean and population standard deviation of a window
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowStats {
    pub mean: f64,
    pub std_dev: f64,
    pub count: usize,
}

impl WindowStats {
    /// Two-pass computation for numerical stability. Returns `None` for an
    /// empty slice.
    pub fn compute(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }

        let count = values.len();
        let mean = values.iter().sum::<f64>() / count as f64;
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / count as f64;

        Some(Self {
            mean,
            std_dev: variance.sqrt(),
            count,
        })
    }

    /// Deviation too small to divide by (constant window up to rounding)
    pub fn is_degenerate(&self) -> bool {
        self.std_dev <= degenerate_tolerance(self.mean)
    }
}

/// Absolute tolerance used when comparing against a degenerate window's mean
pub(crate) fn degenerate_tolerance(mean: f64) -> f64 {
    1e-9 * mean.abs().max(1.0)
}

/// Owner of every per-key window
#[derive(Debug)]
pub struct WindowStore {
    capacity: usize,
    windows: DashMap<MetricKey, SlidingWindow>,
}

impl WindowStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            windows: DashMap::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of keys with a window
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    /// Run `f` with exclusive access to the key's window, creating it if absent.
    ///
    /// The shard lock is held for the duration of `f`, so read-classify-append
    /// sequences for the same key never interleave.
    pub fn with_window<R>(&self, key: &MetricKey, f: impl FnOnce(&mut SlidingWindow) -> R) -> R {
        let mut window = self
            .windows
            .entry(key.clone())
            .or_insert_with(|| SlidingWindow::new(self.capacity));
        f(window.value_mut())
    }

    /// Append a value to the key's window
    pub fn push(&self, key: &MetricKey, value: f64) {
        self.with_window(key, |window| {
            window.push(value);
        });
    }

    /// Consistent copy of the key's values, oldest first
    pub fn snapshot(&self, key: &MetricKey) -> Option<Vec<f64>> {
        self.windows.get(key).map(|window| window.to_vec())
    }

    pub fn keys(&self) -> Vec<MetricKey> {
        let mut keys: Vec<MetricKey> = self.windows.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    /// Drop the history of a key
    pub fn reset(&self, key: &MetricKey) -> bool {
        self.windows.remove(key).is_some()
    }
}

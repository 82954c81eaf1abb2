//! Fixed-depth sliding windows for display smoothing.

use std::collections::VecDeque;

/// Window depth for cadence RPM averaging.
pub const CADENCE_WINDOW: usize = 4;

/// Window depth for the power history trace.
pub const POWER_HISTORY_WINDOW: usize = 10;

/// Fixed-capacity FIFO buffer of recent samples.
///
/// Once full, every push evicts the oldest sample before appending, so the
/// length never exceeds the capacity.
#[derive(Debug, Clone)]
pub struct SmoothingWindow<T> {
    /// Samples, oldest first
    buffer: VecDeque<T>,
    /// Maximum number of samples
    capacity: usize,
}

/// View of a window's contents right after a push.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowSnapshot<T> {
    /// Samples, oldest first
    pub values: Vec<T>,
    /// Whether the window has reached capacity
    pub is_full: bool,
}

impl<T: Copy> SmoothingWindow<T> {
    /// Create an empty window with the given capacity.
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Create a window already filled with `capacity` copies of `value`.
    pub fn seeded(capacity: usize, value: T) -> Self {
        Self {
            buffer: std::iter::repeat(value).take(capacity).collect(),
            capacity,
        }
    }

    /// Add a sample, evicting the oldest one when at capacity.
    pub fn push(&mut self, value: T) -> WindowSnapshot<T> {
        if self.capacity == 0 {
            return self.snapshot();
        }
        if self.buffer.len() == self.capacity {
            self.buffer.pop_front();
        }
        self.buffer.push_back(value);

        self.snapshot()
    }

    /// Current contents without modifying the window.
    pub fn snapshot(&self) -> WindowSnapshot<T> {
        WindowSnapshot {
            values: self.values(),
            is_full: self.is_full(),
        }
    }

    /// Samples, oldest first.
    pub fn values(&self) -> Vec<T> {
        self.buffer.iter().copied().collect()
    }

    /// Check if the buffer has reached capacity.
    pub fn is_full(&self) -> bool {
        self.buffer.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

impl<T: Copy + Into<f64>> SmoothingWindow<T> {
    /// Arithmetic mean rounded to the nearest integer, `None` when empty.
    pub fn mean(&self) -> Option<i64> {
        rounded_mean(self.buffer.iter().copied())
    }
}

impl<T: Copy + Into<f64>> WindowSnapshot<T> {
    /// Arithmetic mean rounded to the nearest integer, `None` when empty.
    pub fn mean(&self) -> Option<i64> {
        rounded_mean(self.values.iter().copied())
    }
}

fn rounded_mean<T: Into<f64>>(values: impl Iterator<Item = T>) -> Option<i64> {
    let (sum, count) = values.fold((0.0f64, 0usize), |(sum, count), v| {
        (sum + v.into(), count + 1)
    });
    if count == 0 {
        return None;
    }
    Some((sum / count as f64).round() as i64)
}

/// Empty window used for cadence averaging.
pub fn cadence_window() -> SmoothingWindow<f64> {
    SmoothingWindow::new(CADENCE_WINDOW)
}

/// Power history pre-seeded with zero watts so the trace is always full length.
pub fn power_history_window() -> SmoothingWindow<i16> {
    SmoothingWindow::seeded(POWER_HISTORY_WINDOW, 0)
}

use std::collections::VecDeque;

use pumpwatch_core::CoreError;

/// Fixed-capacity FIFO of feature vectors, oldest first.
///
/// Every row has exactly `width` columns. Once `capacity` rows are held,
/// each push evicts exactly one row from the front.
#[derive(Debug, Clone)]
pub struct WindowBuffer {
    rows: VecDeque<Vec<f64>>,
    capacity: usize,
    width: usize,
}

impl WindowBuffer {
    pub fn new(capacity: usize, width: usize) -> Result<Self, CoreError> {
        if capacity == 0 {
            return Err(CoreError::Config("window size must be at least 1".to_string()));
        }
        if width == 0 {
            return Err(CoreError::Config("window width must be at least 1".to_string()));
        }
        Ok(Self {
            rows: VecDeque::with_capacity(capacity),
            capacity,
            width,
        })
    }

    /// Append a row, evicting the oldest when full.
    ///
    /// Rows of the wrong width are padded with `0.0` or truncated.
    pub fn push(&mut self, mut row: Vec<f64>) {
        row.resize(self.width, 0.0);
        if self.rows.len() == self.capacity {
            self.rows.pop_front();
        }
        self.rows.push_back(row);
    }

    /// Whether the window holds `capacity` rows.
    pub fn is_ready(&self) -> bool {
        self.rows.len() == self.capacity
    }

    /// Owned copy of the rows, oldest first.
    pub fn snapshot(&self) -> Vec<Vec<f64>> {
        self.rows.iter().cloned().collect()
    }

    pub fn rows(&self) -> impl Iterator<Item = &[f64]> {
        self.rows.iter().map(Vec::as_slice)
    }

    /// Most recently pushed row.
    pub fn latest(&self) -> Option<&[f64]> {
        self.rows.back().map(Vec::as_slice)
    }

    /// Values of one column, oldest first.
    pub fn column(&self, index: usize) -> impl Iterator<Item = f64> + '_ {
        self.rows.iter().map(move |row| row[index])
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn clear(&mut self) {
        self.rows.clear();
    }
}

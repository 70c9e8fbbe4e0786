use std::collections::VecDeque;

use crate::types::Point2;

/// Smallest window the tracker accepts; shorter windows are raised to this
pub const MIN_WINDOW: usize = 5;

/// Trailing moving average over tracker landmarks
/// Oldest sample is evicted once the window is full, then the mean of what remains is returned
pub struct PointSmoother {
    window: VecDeque<Point2>,
    window_size: usize,
}

impl PointSmoother {
    /// Create a new smoother; sizes below MIN_WINDOW are raised with a warning
    pub fn new(window_size: usize) -> Self {
        let window_size = if window_size < MIN_WINDOW {
            log::warn!(
                "Moving average window {} below minimum, using {}",
                window_size,
                MIN_WINDOW
            );
            MIN_WINDOW
        } else {
            window_size
        };
        PointSmoother {
            window: VecDeque::with_capacity(window_size),
            window_size,
        }
    }

    /// Push a sample and return the average of the window
    pub fn apply(&mut self, point: Point2) -> Point2 {
        if self.window.len() >= self.window_size {
            self.window.pop_front();
        }
        self.window.push_back(point);

        let sum = self
            .window
            .iter()
            .fold(Point2::zeros(), |acc, p| acc + p);
        sum / self.window.len() as f64
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    /// Get current window fill (actual, not max)
    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    pub fn clear(&mut self) {
        self.window.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_single_value() {
        let mut smoother = PointSmoother::new(5);
        let result = smoother.apply(Point2::new(4.0, -2.0));
        assert_eq!(result, Point2::new(4.0, -2.0));
    }

    #[test]
    fn test_partial_window_averages_what_it_has() {
        let mut smoother = PointSmoother::new(5);
        smoother.apply(Point2::new(2.0, 2.0));
        let result = smoother.apply(Point2::new(4.0, 6.0));
        assert_abs_diff_eq!(result, Point2::new(3.0, 4.0), epsilon = 1e-12);
    }

    #[test]
    fn test_window_wrapping() {
        // Sixth sample evicts the first: mean of 1..=5
        let mut smoother = PointSmoother::new(5);
        let mut last = Point2::zeros();
        for i in 0..6 {
            last = smoother.apply(Point2::new(i as f64, i as f64));
        }
        assert_eq!(smoother.len(), 5);
        assert_abs_diff_eq!(last, Point2::new(3.0, 3.0), epsilon = 1e-12);
    }

    #[test]
    fn test_minimum_window() {
        let smoother = PointSmoother::new(2);
        assert_eq!(smoother.window_size(), MIN_WINDOW);
        assert!(smoother.is_empty());
    }
}

//! Downstream time series fed once per frame.

use std::collections::VecDeque;

use crate::pipeline::FrameOutcome;

/// Consumer of per-frame outcomes.
pub trait MeasurementSink {
    fn record(&mut self, timestamp: f64, outcome: &FrameOutcome);
}

/// Bounded columns of `t`, `min`, `max` and `mean`.
///
/// "No data" frames append NaN so the time axis stays aligned without ever
/// recording a zero sample. Dropped and skipped frames append nothing.
#[derive(Debug, Clone)]
pub struct SeriesBuffer {
    capacity: usize,
    pub t: VecDeque<f64>,
    pub min: VecDeque<f32>,
    pub max: VecDeque<f32>,
    pub mean: VecDeque<f32>,
}

impl SeriesBuffer {
    /// `capacity == 0` keeps every sample.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            t: VecDeque::new(),
            min: VecDeque::new(),
            max: VecDeque::new(),
            mean: VecDeque::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.t.len()
    }

    pub fn is_empty(&self) -> bool {
        self.t.is_empty()
    }

    pub fn clear(&mut self) {
        self.t.clear();
        self.min.clear();
        self.max.clear();
        self.mean.clear();
    }

    fn push(&mut self, t: f64, min: f32, max: f32, mean: f32) {
        if self.capacity > 0 && self.t.len() == self.capacity {
            self.t.pop_front();
            self.min.pop_front();
            self.max.pop_front();
            self.mean.pop_front();
        }
        self.t.push_back(t);
        self.min.push_back(min);
        self.max.push_back(max);
        self.mean.push_back(mean);
    }
}

impl MeasurementSink for SeriesBuffer {
    fn record(&mut self, timestamp: f64, outcome: &FrameOutcome) {
        match outcome {
            FrameOutcome::Measured(stats) | FrameOutcome::Reused(stats) => {
                self.push(timestamp, stats.min_max.min, stats.min_max.max, stats.mean);
            }
            FrameOutcome::NoData => self.push(timestamp, f32::NAN, f32::NAN, f32::NAN),
            FrameOutcome::Skipped | FrameOutcome::Dropped => {}
        }
    }
}

//! Wing kinematics: landmarks in, folded wing-beat angles out.
//!
//! Six tracker landmarks are expected per packet. The longitudinal body
//! axis comes from the two thorax points (smoothed) or from a fixed manual
//! pair; each wing angle is the hinge-to-distal slope folded against that
//! axis into [0, 180] degrees.

use serde::{Deserialize, Serialize};

use crate::packet::LandmarkFrame;
use crate::smoothing::{PointSmoother, MIN_WINDOW};
use crate::types::Point2;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Landmark {
    RightHinge,
    RightDistal,
    LeftHinge,
    LeftDistal,
    ThoraxUpper,
    ThoraxLower,
}

impl Landmark {
    pub fn from_id(id: u32) -> Option<Self> {
        match id {
            0 => Some(Landmark::RightHinge),
            1 => Some(Landmark::RightDistal),
            2 => Some(Landmark::LeftHinge),
            3 => Some(Landmark::LeftDistal),
            4 => Some(Landmark::ThoraxUpper),
            5 => Some(Landmark::ThoraxLower),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Video frame height in pixels; incoming y is flipped against it
    pub frame_height: f64,
    pub smoothing_window: usize,
    pub manual_axis: bool,
    pub axis_upper: Point2,
    pub axis_lower: Point2,
    pub manual_hinges: bool,
    pub right_hinge: Point2,
    pub left_hinge: Point2,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            frame_height: 240.0,
            smoothing_window: MIN_WINDOW,
            manual_axis: false,
            axis_upper: Point2::new(160.0, 200.0),
            axis_lower: Point2::new(160.0, 100.0),
            manual_hinges: false,
            right_hinge: Point2::zeros(),
            left_hinge: Point2::zeros(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WingAngles {
    pub right: f64,
    pub left: f64,
}

/// Axis angle in degrees from the (smoothed) thorax points
pub fn axis_angle(upper: &Point2, lower: &Point2) -> f64 {
    ((upper.x - lower.x) / (upper.y - lower.y)).atan().to_degrees()
}

/// Axis angle for an operator-fixed pair of points
pub fn manual_axis_angle(upper: &Point2, lower: &Point2) -> f64 {
    ((lower.x - upper.x) / (lower.y - upper.y))
        .atan()
        .to_degrees()
        .abs()
}

/// Raw hinge-to-distal angle folded against the body axis
pub fn fold_wing_angle(hinge: &Point2, distal: &Point2, axis_deg: f64) -> f64 {
    let width = distal.x - hinge.x;
    let height = distal.y - hinge.y;
    let raw = (width / height).atan().to_degrees();
    if height >= 0.0 {
        180.0 - (raw - axis_deg).abs()
    } else {
        (raw - axis_deg).abs()
    }
}

pub struct WingKinematicsProcessor {
    frame_height: f64,
    manual_axis: bool,
    manual_hinges: bool,

    right_hinge: Point2,
    right_distal: Point2,
    left_hinge: Point2,
    left_distal: Point2,
    thorax_upper: Point2,
    thorax_lower: Point2,

    upper_smoother: PointSmoother,
    lower_smoother: PointSmoother,
    axis_deg: f64,

    warned_extra_labels: bool,
}

impl WingKinematicsProcessor {
    pub fn new(config: &TrackerConfig) -> Self {
        let axis_deg = if config.manual_axis {
            manual_axis_angle(&config.axis_upper, &config.axis_lower)
        } else {
            0.0
        };
        Self {
            frame_height: config.frame_height,
            manual_axis: config.manual_axis,
            manual_hinges: config.manual_hinges,
            right_hinge: config.right_hinge,
            right_distal: Point2::zeros(),
            left_hinge: config.left_hinge,
            left_distal: Point2::zeros(),
            thorax_upper: config.axis_upper,
            thorax_lower: config.axis_lower,
            upper_smoother: PointSmoother::new(config.smoothing_window),
            lower_smoother: PointSmoother::new(config.smoothing_window),
            axis_deg,
            warned_extra_labels: false,
        }
    }

    /// Update landmark state from a decoded frame and, if the loop is
    /// closed, return the folded angles.
    pub fn process(&mut self, frame: &LandmarkFrame, loop_closed: bool) -> Option<WingAngles> {
        self.ingest(frame);
        if loop_closed {
            Some(self.compute())
        } else {
            None
        }
    }

    pub fn ingest(&mut self, frame: &LandmarkFrame) {
        for record in &frame.records {
            let point = Point2::new(record.x, self.frame_height - record.y);
            match Landmark::from_id(record.id) {
                Some(Landmark::RightHinge) => {
                    if !self.manual_hinges {
                        self.right_hinge = point;
                    }
                }
                Some(Landmark::RightDistal) => self.right_distal = point,
                Some(Landmark::LeftHinge) => {
                    if !self.manual_hinges {
                        self.left_hinge = point;
                    }
                }
                Some(Landmark::LeftDistal) => self.left_distal = point,
                Some(Landmark::ThoraxUpper) => {
                    if !self.manual_axis {
                        self.thorax_upper = self.upper_smoother.apply(point);
                    }
                }
                Some(Landmark::ThoraxLower) => {
                    if !self.manual_axis {
                        self.thorax_lower = self.lower_smoother.apply(point);
                    }
                }
                None => {
                    if !self.warned_extra_labels {
                        log::warn!(
                            "Ignoring extra labels (first was ID {}), only the first 6 labels close the loop",
                            record.id
                        );
                        self.warned_extra_labels = true;
                    }
                }
            }
        }
    }

    pub fn compute(&mut self) -> WingAngles {
        if !self.manual_axis {
            self.axis_deg = axis_angle(&self.thorax_upper, &self.thorax_lower);
        }
        WingAngles {
            right: fold_wing_angle(&self.right_hinge, &self.right_distal, self.axis_deg),
            left: fold_wing_angle(&self.left_hinge, &self.left_distal, self.axis_deg),
        }
    }

    pub fn axis_deg(&self) -> f64 {
        self.axis_deg
    }

    pub fn thorax_upper(&self) -> Point2 {
        self.thorax_upper
    }

    pub fn thorax_lower(&self) -> Point2 {
        self.thorax_lower
    }

    pub fn axis_points(&self) -> (Point2, Point2) {
        (self.thorax_upper, self.thorax_lower)
    }

    pub fn is_manual_axis(&self) -> bool {
        self.manual_axis
    }
}

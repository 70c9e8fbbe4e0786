//! Wing-beat amplitudes to avatar motion.
//!
//! WBAD (left - right, or right - left when turning is inverted) drives yaw in
//! deg/s and WBAS (left + right) drives thrust in m/s, each through a
//! configurable response curve. While the loop is closed the avatar is turned
//! and moved forward every fixed tick with its height pinned.

use serde::{Deserialize, Serialize};

use crate::kinematics::WingAngles;
use crate::types::{wrap_degrees, Pose};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method")]
pub enum ResponseCurve {
    /// Fixed output, wing input ignored
    Constant { value: f64 },
    Linear {
        min_in: f64,
        max_in: f64,
        min_out: f64,
        max_out: f64,
    },
    /// Two linear segments meeting at (mid_in, mid_out)
    Variable {
        min_in: f64,
        mid_in: f64,
        max_in: f64,
        min_out: f64,
        mid_out: f64,
        max_out: f64,
    },
}

impl ResponseCurve {
    pub fn default_yaw_linear() -> Self {
        ResponseCurve::Linear {
            min_in: 0.0,
            max_in: 180.0,
            min_out: 0.0,
            max_out: 1080.0,
        }
    }

    pub fn default_thrust_linear() -> Self {
        ResponseCurve::Linear {
            min_in: 0.0,
            max_in: 360.0,
            min_out: 0.0,
            max_out: 3.0,
        }
    }

    pub fn is_constant(&self) -> bool {
        matches!(self, ResponseCurve::Constant { .. })
    }

    /// Single CSV cell form, e.g. `Linear|0|180|0|1080`
    pub fn to_field(&self) -> String {
        let (method, values): (&str, Vec<f64>) = match *self {
            ResponseCurve::Constant { value } => ("Constant", vec![value]),
            ResponseCurve::Linear { min_in, max_in, min_out, max_out } => {
                ("Linear", vec![min_in, max_in, min_out, max_out])
            }
            ResponseCurve::Variable { min_in, mid_in, max_in, min_out, mid_out, max_out } => {
                ("Variable", vec![min_in, mid_in, max_in, min_out, mid_out, max_out])
            }
        };
        let mut field = method.to_string();
        for v in values {
            field.push('|');
            field.push_str(&v.to_string());
        }
        field
    }

    pub fn from_field(field: &str) -> Option<Self> {
        let mut parts = field.trim().split('|');
        let method = parts.next()?;
        let values: Vec<f64> = parts.map(|p| p.parse().ok()).collect::<Option<_>>()?;
        match (method, values.as_slice()) {
            ("Constant", [value]) => Some(ResponseCurve::Constant { value: *value }),
            ("Linear", [min_in, max_in, min_out, max_out]) => Some(ResponseCurve::Linear {
                min_in: *min_in,
                max_in: *max_in,
                min_out: *min_out,
                max_out: *max_out,
            }),
            ("Variable", [min_in, mid_in, max_in, min_out, mid_out, max_out]) => {
                Some(ResponseCurve::Variable {
                    min_in: *min_in,
                    mid_in: *mid_in,
                    max_in: *max_in,
                    min_out: *min_out,
                    mid_out: *mid_out,
                    max_out: *max_out,
                })
            }
            _ => None,
        }
    }

    /// Output for the magnitude of `input`. Inputs outside [min_in, max_in]
    /// map to the end outputs, and the result is clamped to the output range.
    pub fn evaluate(&self, input: f64) -> f64 {
        let m = input.abs();
        match *self {
            ResponseCurve::Constant { value } => value,
            ResponseCurve::Linear {
                min_in,
                max_in,
                min_out,
                max_out,
            } => {
                if m < min_in {
                    return min_out;
                }
                if m > max_in {
                    return max_out;
                }
                let out = segment(m, min_in, max_in, min_out, max_out);
                clamp_between(out, min_out, max_out)
            }
            ResponseCurve::Variable {
                min_in,
                mid_in,
                max_in,
                min_out,
                mid_out,
                max_out,
            } => {
                if m < min_in {
                    return min_out;
                }
                if m > max_in {
                    return max_out;
                }
                let out = if m <= mid_in {
                    segment(m, min_in, mid_in, min_out, mid_out)
                } else {
                    segment(m, mid_in, max_in, mid_out, max_out)
                };
                clamp_between(out, min_out, max_out)
            }
        }
    }
}

fn segment(x: f64, x0: f64, x1: f64, y0: f64, y1: f64) -> f64 {
    let span = x1 - x0;
    if span.abs() < f64::EPSILON {
        return y0;
    }
    y0 + (x - x0) * (y1 - y0) / span
}

fn clamp_between(value: f64, a: f64, b: f64) -> f64 {
    value.clamp(a.min(b), a.max(b))
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionConfig {
    pub yaw: ResponseCurve,
    pub thrust: ResponseCurve,
    pub invert_turn: bool,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            yaw: ResponseCurve::Constant { value: 36.0 },
            thrust: ResponseCurve::Constant { value: 2.0 },
            invert_turn: false,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MotionStats {
    pub unique_packets: u64,
    pub duplicate_packets: u64,
    pub frames: u64,
}

pub struct MotionModel {
    config: MotionConfig,
    closed: bool,
    yaw_dps: f64,
    thrust_mps: f64,
    pinned_height: f64,
    last_angles: Option<WingAngles>,
    stats: MotionStats,
    scene_rotation_dps: f64,
    scene_angle: f64,
}

impl MotionModel {
    pub fn new(config: MotionConfig) -> Self {
        let yaw_dps = match config.yaw {
            ResponseCurve::Constant { value } => value,
            _ => 0.0,
        };
        let thrust_mps = match config.thrust {
            ResponseCurve::Constant { value } => value,
            _ => 0.0,
        };
        Self {
            config,
            closed: false,
            yaw_dps,
            thrust_mps,
            pinned_height: 0.0,
            last_angles: None,
            stats: MotionStats::default(),
            scene_rotation_dps: 0.0,
            scene_angle: 0.0,
        }
    }

    pub fn set_closed(&mut self, closed: bool) {
        self.closed = closed;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn wbad(&self, angles: &WingAngles) -> f64 {
        if self.config.invert_turn {
            angles.right - angles.left
        } else {
            angles.left - angles.right
        }
    }

    pub fn wbas(angles: &WingAngles) -> f64 {
        angles.left + angles.right
    }

    /// New wing angles from the processor; ignored unless the loop is closed
    pub fn update(&mut self, angles: WingAngles) {
        if !self.closed {
            return;
        }
        if !angles.right.is_finite() || !angles.left.is_finite() {
            log::warn!("Ignoring non-finite wing angles {:?}", angles);
            return;
        }

        if self.last_angles == Some(angles) {
            self.stats.duplicate_packets += 1;
        } else {
            self.stats.unique_packets += 1;
        }
        self.last_angles = Some(angles);

        let wbad = self.wbad(&angles);
        let wbas = Self::wbas(&angles);

        let yaw = self.config.yaw.evaluate(wbad);
        self.yaw_dps = if !self.config.yaw.is_constant() && wbad < 0.0 {
            -yaw
        } else {
            yaw
        };
        self.thrust_mps = self.config.thrust.evaluate(wbas);
    }

    /// One fixed tick of closed-loop motion
    pub fn advance(&mut self, pose: &mut Pose, dt: f64) {
        if !self.closed {
            return;
        }
        self.stats.frames += 1;
        pose.rotation.y = wrap_degrees(pose.rotation.y + self.yaw_dps * dt);
        pose.position += pose.forward() * self.thrust_mps * dt;
        pose.position.y = self.pinned_height;
    }

    pub fn pin_height(&mut self, height: f64) {
        self.pinned_height = height;
    }

    /// Shift the pinned height (additive)
    pub fn set_y_pos(&mut self, delta: f64) {
        self.pinned_height += delta;
    }

    pub fn pinned_height(&self) -> f64 {
        self.pinned_height
    }

    pub fn yaw_dps(&self) -> f64 {
        self.yaw_dps
    }

    pub fn thrust_mps(&self) -> f64 {
        self.thrust_mps
    }

    pub fn stats(&self) -> MotionStats {
        self.stats
    }

    pub fn reset_stats(&mut self) {
        self.stats = MotionStats::default();
        self.last_angles = None;
    }

    // ─── Rotating-scene stimulus ─────────────────────────────────────────

    pub fn start_rotation(&mut self, revolutions: f64, duration: f64) {
        if duration <= 0.0 {
            log::warn!("Rotating scene with non-positive duration {}, not rotating", duration);
            self.scene_rotation_dps = 0.0;
            return;
        }
        self.scene_rotation_dps = 360.0 * revolutions / duration;
    }

    pub fn stop_rotation(&mut self) {
        self.scene_rotation_dps = 0.0;
    }

    /// Advance the scene spin; returns the scene yaw in degrees
    pub fn advance_scene_rotation(&mut self, dt: f64) -> f64 {
        if self.scene_rotation_dps != 0.0 {
            self.scene_angle = wrap_degrees(self.scene_angle + self.scene_rotation_dps * dt);
        }
        self.scene_angle
    }

    pub fn scene_rotation_dps(&self) -> f64 {
        self.scene_rotation_dps
    }
}

pub mod linalg;

pub use linalg::*;

use chrono::Local;
use serde::{Deserialize, Serialize};

/// Position, Euler rotation (degrees) and local scale of a scene entity
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub position: Vec3,
    pub rotation: Vec3,
    pub scale: Vec3,
}

impl Default for Pose {
    fn default() -> Self {
        Self {
            position: Vec3::zeros(),
            rotation: Vec3::zeros(),
            scale: Vec3::new(1.0, 1.0, 1.0),
        }
    }
}

impl Pose {
    pub fn at(position: Vec3) -> Self {
        Self {
            position,
            ..Self::default()
        }
    }

    pub fn forward(&self) -> Vec3 {
        linalg::forward(&self.rotation)
    }

    /// Additive edit; rotation is re-wrapped afterwards
    pub fn apply(&mut self, delta: &PoseDelta) {
        self.position += delta.position;
        self.rotation = wrap_euler(&(self.rotation + delta.rotation));
        self.scale += delta.scale;
    }

    /// Turn to face `target`, keeping roll
    pub fn look_at(&mut self, target: &Vec3) {
        if let Some(rotation) = look_rotation(&(target - self.position), self.rotation.z) {
            self.rotation = rotation;
        }
    }
}

/// Additive change to a pose. A zero delta leaves the pose untouched.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PoseDelta {
    pub position: Vec3,
    pub rotation: Vec3,
    pub scale: Vec3,
}

impl PoseDelta {
    pub fn translation(position: Vec3) -> Self {
        Self {
            position,
            ..Self::default()
        }
    }

    pub fn scaled(&self, factor: f64) -> Self {
        Self {
            position: self.position * factor,
            rotation: self.rotation * factor,
            scale: self.scale * factor,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Color32 {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color32 {
    pub const BLACK: Color32 = Color32 { r: 0, g: 0, b: 0, a: 255 };
}

/// Wall-clock timestamp as written into every log file (yyyyMMdd_Hmmss.ffffff)
pub fn wall_timestamp() -> String {
    Local::now().format("%Y%m%d_%-H%M%S%.6f").to_string()
}

/// Date/time prefix used in output file names
pub fn file_stamp() -> String {
    Local::now().format("%d-%m-%Y_%-H-%M-%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_apply_delta_wraps_rotation() {
        let mut pose = Pose::default();
        pose.rotation.y = 350.0;
        pose.apply(&PoseDelta {
            position: Vec3::new(1.0, 2.0, 3.0),
            rotation: Vec3::new(0.0, 20.0, 0.0),
            scale: Vec3::new(0.5, 0.0, 0.0),
        });
        assert_abs_diff_eq!(pose.position, Vec3::new(1.0, 2.0, 3.0));
        assert_abs_diff_eq!(pose.rotation.y, 10.0, epsilon = 1e-9);
        assert_abs_diff_eq!(pose.scale, Vec3::new(1.5, 1.0, 1.0));
    }

    #[test]
    fn test_look_at_faces_target() {
        let mut pose = Pose::at(Vec3::new(0.0, 0.0, 0.0));
        pose.look_at(&Vec3::new(-3.0, 0.0, 0.0));
        assert_abs_diff_eq!(pose.forward(), Vec3::new(-1.0, 0.0, 0.0), epsilon = 1e-9);
    }

    #[test]
    fn test_wall_timestamp_shape() {
        let ts = wall_timestamp();
        let (date, rest) = ts.split_once('_').unwrap();
        assert_eq!(date.len(), 8);
        assert_eq!(rest.split('.').nth(1).map(str::len), Some(6));
    }
}

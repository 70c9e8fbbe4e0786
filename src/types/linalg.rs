//! Geometry type system for the pose pipeline
//!
//! World frame is Y-up and left-handed: +Z is forward at zero rotation,
//! +X is right. Rotations are Euler angles in degrees (x = pitch, y = yaw,
//! z = roll), wrapped to [0, 360) the way they are logged.

use nalgebra::{Vector2, Vector3};

// ===== Aliases =====
pub type Vec3 = Vector3<f64>;
pub type Point2 = Vector2<f64>;

pub const FULL_TURN_DEG: f64 = 360.0;

/// Wrap an angle in degrees into [0, 360)
pub fn wrap_degrees(angle: f64) -> f64 {
    let wrapped = angle.rem_euclid(FULL_TURN_DEG);
    // rem_euclid can round up to exactly 360 for tiny negative inputs
    if wrapped >= FULL_TURN_DEG {
        0.0
    } else {
        wrapped
    }
}

pub fn wrap_euler(rotation: &Vec3) -> Vec3 {
    Vec3::new(
        wrap_degrees(rotation.x),
        wrap_degrees(rotation.y),
        wrap_degrees(rotation.z),
    )
}

/// Unit forward vector for a pitch/yaw rotation (roll does not move forward)
pub fn forward(rotation_deg: &Vec3) -> Vec3 {
    let pitch = rotation_deg.x.to_radians();
    let yaw = rotation_deg.y.to_radians();
    Vec3::new(yaw.sin() * pitch.cos(), -pitch.sin(), yaw.cos() * pitch.cos())
}

/// Euler rotation (degrees) that points forward along `direction`, keeping `roll_deg`.
///
/// Returns None for a zero-length direction, where any heading is valid and
/// callers keep their current rotation.
pub fn look_rotation(direction: &Vec3, roll_deg: f64) -> Option<Vec3> {
    let horizontal = (direction.x * direction.x + direction.z * direction.z).sqrt();
    if horizontal < 1e-12 && direction.y.abs() < 1e-12 {
        return None;
    }
    let yaw = direction.x.atan2(direction.z).to_degrees();
    let pitch = (-direction.y).atan2(horizontal).to_degrees();
    Some(wrap_euler(&Vec3::new(pitch, yaw, roll_deg)))
}

//! Values that change across the trials of a sequence.

use serde::{Deserialize, Serialize};

use crate::entity::EntityId;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum InterpolationMethod {
    #[default]
    Linear,
    Log10,
}

impl InterpolationMethod {
    pub fn name(&self) -> &'static str {
        match self {
            InterpolationMethod::Linear => "Linear",
            InterpolationMethod::Log10 => "Log10",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim() {
            "Linear" => Some(InterpolationMethod::Linear),
            "Log10" => Some(InterpolationMethod::Log10),
            _ => None,
        }
    }
}

/// Entity attribute an interpolation overrides
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjectOption {
    PositionX,
    PositionY,
    PositionZ,
    RotationX,
    RotationY,
    RotationZ,
    ScaleX,
    ScaleY,
    ScaleZ,
    DynamicSpeed,
}

const OBJECT_OPTIONS: [(ObjectOption, &str); 10] = [
    (ObjectOption::PositionX, "Position_X"),
    (ObjectOption::PositionY, "Position_Y"),
    (ObjectOption::PositionZ, "Position_Z"),
    (ObjectOption::RotationX, "Rotation_X"),
    (ObjectOption::RotationY, "Rotation_Y"),
    (ObjectOption::RotationZ, "Rotation_Z"),
    (ObjectOption::ScaleX, "Scale_X"),
    (ObjectOption::ScaleY, "Scale_Y"),
    (ObjectOption::ScaleZ, "Scale_Z"),
    (ObjectOption::DynamicSpeed, "Dynamic_OOI_Speed"),
];

impl ObjectOption {
    pub fn name(&self) -> &'static str {
        OBJECT_OPTIONS
            .iter()
            .find(|(o, _)| o == self)
            .map(|(_, n)| *n)
            .unwrap_or("Unknown")
    }

    pub fn from_name(name: &str) -> Option<Self> {
        OBJECT_OPTIONS
            .iter()
            .find(|(_, n)| *n == name.trim())
            .map(|(o, _)| *o)
    }

    /// Whether this option moves the entity
    pub fn is_position(&self) -> bool {
        matches!(
            self,
            ObjectOption::PositionX | ObjectOption::PositionY | ObjectOption::PositionZ
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SettingOption {
    TrialDuration,
}

impl SettingOption {
    pub fn name(&self) -> &'static str {
        match self {
            SettingOption::TrialDuration => "Trial_Duration",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim() {
            "Trial_Duration" => Some(SettingOption::TrialDuration),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum InterpolationTarget {
    Object { entity: EntityId, option: ObjectOption },
    Setting(SettingOption),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Interpolation {
    pub name: String,
    pub target: InterpolationTarget,
    pub start: f64,
    pub end: f64,
    #[serde(default)]
    pub method: InterpolationMethod,
}

impl Interpolation {
    /// Value for trial `index` of a sequence of `total` trials
    pub fn value_at(&self, total: usize, index: usize) -> f64 {
        interpolate(total, index, self.start, self.end, self.method)
    }

    pub fn entity(&self) -> Option<EntityId> {
        match self.target {
            InterpolationTarget::Object { entity, .. } => Some(entity),
            InterpolationTarget::Setting(_) => None,
        }
    }
}

/// Interpolated value for trial `index` of `total`.
///
/// The first and last trial get exactly `start` and `end`. Fewer than two
/// trials leave nothing to interpolate, so `start` is used.
pub fn interpolate(
    total: usize,
    index: usize,
    start: f64,
    end: f64,
    method: InterpolationMethod,
) -> f64 {
    if total < 2 {
        log::warn!(
            "Interpolation needs at least 2 trials (got {}), using start value {}",
            total,
            start
        );
        return start;
    }
    let last = total - 1;
    let k = if index > last {
        log::warn!("Trial index {} past sequence end, clamping to {}", index, last);
        last
    } else {
        index
    };
    if k == 0 {
        return start;
    }
    if k == last {
        return end;
    }
    let fraction = k as f64 / last as f64;
    match method {
        InterpolationMethod::Linear => linear(start, end, fraction),
        InterpolationMethod::Log10 => {
            let value = log10_scaled(start, end, fraction);
            if value.is_finite() {
                value
            } else {
                log::warn!(
                    "Log10 interpolation undefined for {}..{}, using linear",
                    start,
                    end
                );
                linear(start, end, fraction)
            }
        }
    }
}

fn linear(start: f64, end: f64, fraction: f64) -> f64 {
    start + (end - start) * fraction
}

/// Equal steps in log10 space. A negative start shifts the range up to zero
/// and back; log of zero is taken as zero.
fn log10_scaled(start: f64, end: f64, fraction: f64) -> f64 {
    let shift = if start < 0.0 { start.abs() } else { 0.0 };
    let (a, b) = (start + shift, end + shift);
    let log_a = if a == 0.0 { 0.0 } else { a.log10() };
    let log_b = if b == 0.0 { 0.0 } else { b.log10() };
    10f64.powf(log_a + (log_b - log_a) * fraction) - shift
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_linear_endpoints_and_midpoint() {
        let m = InterpolationMethod::Linear;
        assert_eq!(interpolate(5, 0, 2.0, 10.0, m), 2.0);
        assert_eq!(interpolate(5, 4, 2.0, 10.0, m), 10.0);
        assert_relative_eq!(interpolate(5, 2, 2.0, 10.0, m), 6.0);
    }

    #[test]
    fn test_linear_monotonic() {
        let values: Vec<f64> = (0..7)
            .map(|k| interpolate(7, k, -1.5, 3.25, InterpolationMethod::Linear))
            .collect();
        assert!(values.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_linear_descending_range() {
        assert_relative_eq!(interpolate(3, 1, 10.0, 0.0, InterpolationMethod::Linear), 5.0);
    }

    #[test]
    fn test_log10_endpoints_exact() {
        for (a, b) in [(0.5, 80.0), (3.0, 7.0), (100.0, 1.0)] {
            assert_eq!(interpolate(6, 0, a, b, InterpolationMethod::Log10), a);
            assert_eq!(interpolate(6, 5, a, b, InterpolationMethod::Log10), b);
        }
    }

    #[test]
    fn test_log10_geometric_steps() {
        assert_relative_eq!(interpolate(3, 1, 1.0, 100.0, InterpolationMethod::Log10), 10.0);
        assert_relative_eq!(
            interpolate(4, 1, 1.0, 1000.0, InterpolationMethod::Log10),
            10.0,
            max_relative = 1e-12
        );
    }

    #[test]
    fn test_log10_negative_start_is_shifted() {
        // -1..99 shifts to 0..100: log(0) is treated as 0, midpoint is 10^1 - 1
        assert_relative_eq!(interpolate(3, 1, -1.0, 99.0, InterpolationMethod::Log10), 9.0);
    }

    #[test]
    fn test_single_trial_uses_start() {
        assert_eq!(interpolate(1, 0, 4.0, 9.0, InterpolationMethod::Linear), 4.0);
        assert_eq!(interpolate(0, 3, 4.0, 9.0, InterpolationMethod::Log10), 4.0);
    }

    #[test]
    fn test_index_past_end_clamps() {
        assert_eq!(interpolate(3, 8, 1.0, 2.0, InterpolationMethod::Linear), 2.0);
    }
}

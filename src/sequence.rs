use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::entity::EntityId;
use crate::interpolation::{Interpolation, InterpolationTarget, SettingOption};
use crate::stimulus::DefaultStimulus;
use crate::trial::Trial;

/// Ordered trials run back to back, with values interpolated across them
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Sequence {
    pub name: String,
    pub trials: Vec<Trial>,
    #[serde(default)]
    pub default_stimulus: DefaultStimulus,
    #[serde(default)]
    pub interpolations: Vec<Interpolation>,
}

impl Sequence {
    pub fn new(name: &str, trials: Vec<Trial>) -> Self {
        Self {
            name: name.to_string(),
            trials,
            default_stimulus: DefaultStimulus::default(),
            interpolations: Vec::new(),
        }
    }

    /// Entities whose placement comes from an interpolation instead of the trial
    pub fn interpolated_entities(&self) -> BTreeSet<EntityId> {
        self.interpolations.iter().filter_map(|i| i.entity()).collect()
    }

    /// Trial `index` with every setting interpolation applied
    pub fn trial_with_settings(&self, index: usize) -> Option<Trial> {
        let mut trial = self.trials.get(index)?.clone();
        for interpolation in &self.interpolations {
            if let InterpolationTarget::Setting(option) = interpolation.target {
                let value = interpolation.value_at(self.trials.len(), index);
                match option {
                    SettingOption::TrialDuration => {
                        log::info!(
                            "{}: trial duration {:.3}s (was {:.3}s)",
                            interpolation.name,
                            value,
                            trial.duration
                        );
                        trial.duration = value;
                    }
                }
            }
        }
        Some(trial)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpolation::{InterpolationMethod, ObjectOption};

    #[test]
    fn test_duration_interpolated_per_trial() {
        let mut sequence = Sequence::new(
            "seq",
            vec![
                Trial::new("a", "s", 1.0),
                Trial::new("b", "s", 1.0),
                Trial::new("c", "s", 1.0),
            ],
        );
        sequence.interpolations.push(Interpolation {
            name: "longer".to_string(),
            target: InterpolationTarget::Setting(SettingOption::TrialDuration),
            start: 2.0,
            end: 6.0,
            method: InterpolationMethod::Linear,
        });
        sequence.interpolations.push(Interpolation {
            name: "closer".to_string(),
            target: InterpolationTarget::Object {
                entity: EntityId(3),
                option: ObjectOption::PositionZ,
            },
            start: 5.0,
            end: 1.0,
            method: InterpolationMethod::Linear,
        });

        let durations: Vec<f64> = (0..3)
            .map(|k| sequence.trial_with_settings(k).unwrap().duration)
            .collect();
        assert_eq!(durations, vec![2.0, 4.0, 6.0]);
        assert!(sequence.trial_with_settings(3).is_none());
        assert!(sequence.interpolated_entities().contains(&EntityId(3)));
    }
}

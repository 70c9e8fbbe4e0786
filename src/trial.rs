use std::fmt;

use serde::{Deserialize, Serialize};

use crate::entity::EntityId;
use crate::intervention::Intervention;
use crate::stimulus::StimulusSpec;
use crate::types::Vec3;

/// Phase of the running trial, mirrored into the packet log and live status
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoopStatus {
    #[default]
    BetweenTrials,
    PreStim,
    LoopClosed,
    PostStim,
}

impl fmt::Display for LoopStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LoopStatus::BetweenTrials => "BetweenTrials",
            LoopStatus::PreStim => "PreStim",
            LoopStatus::LoopClosed => "LoopClosed",
            LoopStatus::PostStim => "PostStim",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompletionPolicy {
    #[default]
    Duration,
    DurationOrProximity,
}

impl CompletionPolicy {
    pub fn name(&self) -> &'static str {
        match self {
            CompletionPolicy::Duration => "Duration",
            CompletionPolicy::DurationOrProximity => "Duration_Or_Proximity",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim() {
            "Duration" => Some(CompletionPolicy::Duration),
            "Duration_Or_Proximity" => Some(CompletionPolicy::DurationOrProximity),
            _ => None,
        }
    }
}

/// Why the closed-loop phase ended
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompletedBy {
    #[default]
    Unknown,
    Duration,
    Proximity,
    Skip,
    Stop,
}

impl fmt::Display for CompletedBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CompletedBy::Unknown => "Unknown",
            CompletedBy::Duration => "Duration",
            CompletedBy::Proximity => "Proximity",
            CompletedBy::Skip => "Skip",
            CompletedBy::Stop => "Stop",
        };
        f.write_str(name)
    }
}

/// Per-trial placement of one entity, plus optional completion tracking
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EntityChange {
    pub entity: EntityId,
    #[serde(default = "Vec3::zeros")]
    pub position_delta: Vec3,
    /// Radius for proximity completion; 0 disables tracking
    #[serde(default)]
    pub proximity: f64,
    #[serde(default)]
    pub proximity_duration: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Trial {
    pub name: String,
    pub scene: String,
    #[serde(default)]
    pub completion: CompletionPolicy,
    /// Closed-loop seconds
    pub duration: f64,
    #[serde(default)]
    pub pre_stimulus: StimulusSpec,
    #[serde(default)]
    pub post_stimulus: StimulusSpec,
    #[serde(default)]
    pub interventions: Vec<Intervention>,
    #[serde(default)]
    pub entity_changes: Vec<EntityChange>,
}

impl Trial {
    pub fn new(name: &str, scene: &str, duration: f64) -> Self {
        Self {
            name: name.to_string(),
            scene: scene.to_string(),
            completion: CompletionPolicy::Duration,
            duration,
            pre_stimulus: StimulusSpec::default(),
            post_stimulus: StimulusSpec::default(),
            interventions: Vec::new(),
            entity_changes: Vec::new(),
        }
    }

    /// Entities that end the trial when the avatar reaches them
    pub fn proximity_targets(&self) -> impl Iterator<Item = &EntityChange> {
        let active = self.completion == CompletionPolicy::DurationOrProximity;
        self.entity_changes
            .iter()
            .filter(move |c| active && c.proximity > 0.0)
    }
}

/// Timer events of one trial
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrialEvent {
    PreStimulusElapsed,
    TrialDurationElapsed,
    PostStimulusElapsed,
    InterventionDue(usize),
    EncounterDue(EntityId),
}

/// What a proximity firing means
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProximityKey {
    TrialCompletion(EntityId),
    Intervention(usize),
    Encounter(EntityId),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proximity_targets_need_policy_and_radius() {
        let mut trial = Trial::new("t", "s", 10.0);
        trial.entity_changes = vec![
            EntityChange {
                entity: EntityId(1),
                position_delta: Vec3::zeros(),
                proximity: 1.0,
                proximity_duration: 0.5,
            },
            EntityChange {
                entity: EntityId(2),
                position_delta: Vec3::zeros(),
                proximity: 0.0,
                proximity_duration: 0.5,
            },
        ];
        assert_eq!(trial.proximity_targets().count(), 0);
        trial.completion = CompletionPolicy::DurationOrProximity;
        let ids: Vec<_> = trial.proximity_targets().map(|c| c.entity).collect();
        assert_eq!(ids, vec![EntityId(1)]);
    }

    #[test]
    fn test_status_names() {
        assert_eq!(LoopStatus::LoopClosed.to_string(), "LoopClosed");
        assert_eq!(CompletedBy::Proximity.to_string(), "Proximity");
    }
}

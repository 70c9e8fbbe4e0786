//! Tracked scene entities ("objects of interest").

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::approach::ApproachRun;
use crate::behaviour::BehaviourState;
use crate::error::{ExperimentError, Result};
use crate::types::{Pose, Vec3};

/// Registry-assigned identity, immutable once assigned
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub u32);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Behaviour {
    Hover,
    Patrol,
    Chase,
    Flee,
    StayRelative,
    None,
}

impl Behaviour {
    pub fn name(&self) -> &'static str {
        match self {
            Behaviour::Hover => "Hover",
            Behaviour::Patrol => "Patrol",
            Behaviour::Chase => "Chase",
            Behaviour::Flee => "Flee",
            Behaviour::StayRelative => "StayRelative",
            Behaviour::None => "None",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim() {
            "Hover" => Some(Behaviour::Hover),
            "Patrol" => Some(Behaviour::Patrol),
            "Chase" => Some(Behaviour::Chase),
            "Flee" => Some(Behaviour::Flee),
            "StayRelative" => Some(Behaviour::StayRelative),
            "None" => Some(Behaviour::None),
            _ => None,
        }
    }

    /// Behaviours that steer relative to another entity
    pub fn needs_target(&self) -> bool {
        matches!(self, Behaviour::Chase | Behaviour::Flee | Behaviour::StayRelative)
    }
}

/// What switches a dynamic entity to its encounter behaviour
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum EncounterTrigger {
    Duration { delay: f64 },
    Proximity {
        entity: EntityId,
        radius: f64,
        dwell: f64,
    },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DynamicSpec {
    /// Metres per second
    pub speed: f64,
    pub initial_behaviour: Behaviour,
    pub encounter_behaviour: Behaviour,
    pub initial_target: Option<EntityId>,
    pub encounter_target: Option<EntityId>,
    pub encounter: Option<EncounterTrigger>,
    pub patrol_points: Vec<Vec3>,
    pub patrol_repeats: bool,
    /// Chase stops this far from its target
    pub min_approach_distance: f64,
}

impl Default for DynamicSpec {
    fn default() -> Self {
        Self {
            speed: 1.0,
            initial_behaviour: Behaviour::Patrol,
            encounter_behaviour: Behaviour::None,
            initial_target: None,
            encounter_target: None,
            encounter: None,
            patrol_points: Vec::new(),
            patrol_repeats: true,
            min_approach_distance: 0.2,
        }
    }
}

/// Static entities never move on their own; dynamic ones carry behaviour data
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum EntityKind {
    Static,
    Dynamic(DynamicSpec),
}

impl EntityKind {
    pub fn is_dynamic(&self) -> bool {
        matches!(self, EntityKind::Dynamic(_))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            EntityKind::Static => "StaticOOI",
            EntityKind::Dynamic(_) => "DynamicOOI",
        }
    }
}

/// Which subsystem currently owns continuous pose updates.
/// At most one at a time; discrete intervention edits are not an authority.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MotionAuthority {
    Unowned,
    MotionModel,
    Behaviour,
    Approach,
    Replay,
}

#[derive(Clone, Debug)]
pub struct TrackedEntity {
    id: EntityId,
    pub name: String,
    pub pose: Pose,
    pub visible: bool,
    pub kind: EntityKind,
    authority: MotionAuthority,
    pub behaviour: Option<BehaviourState>,
    pub approach: Option<ApproachRun>,
}

impl TrackedEntity {
    pub fn new(id: EntityId, name: impl Into<String>, pose: Pose, kind: EntityKind) -> Self {
        let behaviour = match &kind {
            EntityKind::Dynamic(spec) => Some(BehaviourState::new(id, spec)),
            EntityKind::Static => None,
        };
        Self {
            id,
            name: name.into(),
            pose,
            visible: true,
            kind,
            authority: MotionAuthority::Unowned,
            behaviour,
            approach: None,
        }
    }

    pub fn id(&self) -> EntityId {
        self.id
    }

    pub fn is_dynamic(&self) -> bool {
        self.kind.is_dynamic()
    }

    pub fn speed(&self) -> f64 {
        match &self.kind {
            EntityKind::Dynamic(spec) => spec.speed,
            EntityKind::Static => 0.0,
        }
    }

    pub fn authority(&self) -> MotionAuthority {
        self.authority
    }

    /// Take the motion authority. Fails if a different authority holds it.
    pub fn claim(&mut self, who: MotionAuthority) -> Result<()> {
        if self.authority == MotionAuthority::Unowned || self.authority == who {
            self.authority = who;
            Ok(())
        } else {
            Err(ExperimentError::InvariantViolation(format!(
                "entity {} is driven by {:?}, refusing {:?}",
                self.id, self.authority, who
            )))
        }
    }

    /// Give up the authority if `who` holds it
    pub fn release(&mut self, who: MotionAuthority) {
        if self.authority == who {
            self.authority = MotionAuthority::Unowned;
        }
    }

    pub fn release_all(&mut self) {
        self.authority = MotionAuthority::Unowned;
    }

    /// Pose access for continuous motion; None unless `who` holds the authority
    pub fn pose_for(&mut self, who: MotionAuthority) -> Option<&mut Pose> {
        if self.authority == who {
            Some(&mut self.pose)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authority_is_exclusive() {
        let mut entity = TrackedEntity::new(EntityId(3), "moth", Pose::default(), EntityKind::Static);
        entity.claim(MotionAuthority::MotionModel).unwrap();
        // re-claim by the holder is fine
        entity.claim(MotionAuthority::MotionModel).unwrap();
        assert!(matches!(
            entity.claim(MotionAuthority::Replay),
            Err(ExperimentError::InvariantViolation(_))
        ));
        assert!(entity.pose_for(MotionAuthority::Replay).is_none());
        assert!(entity.pose_for(MotionAuthority::MotionModel).is_some());

        entity.release(MotionAuthority::Replay);
        assert_eq!(entity.authority(), MotionAuthority::MotionModel);
        entity.release(MotionAuthority::MotionModel);
        entity.claim(MotionAuthority::Replay).unwrap();
    }

    #[test]
    fn test_dynamic_gets_behaviour_state() {
        let entity = TrackedEntity::new(
            EntityId(1),
            "fly",
            Pose::default(),
            EntityKind::Dynamic(DynamicSpec::default()),
        );
        assert!(entity.is_dynamic());
        assert!(entity.behaviour.is_some());
        assert_eq!(entity.speed(), 1.0);
    }
}

//! Autonomous steering for dynamic entities
//!
//! Each dynamic entity runs one behaviour at a time and may switch once to
//! its encounter behaviour. Steering reads other entities from a pose
//! snapshot taken at the start of the tick, so update order does not matter.

use std::collections::BTreeMap;

use crate::entity::{Behaviour, DynamicSpec, EntityId, EntityKind, MotionAuthority};
use crate::error::{ExperimentError, Result};
use crate::registry::EntityRegistry;
use crate::types::{look_rotation, Pose, Vec3};

/// A patrol waypoint counts as reached within this distance (metres)
pub const WAYPOINT_REACHED: f64 = 0.05;

#[derive(Clone, Debug, PartialEq)]
pub struct BehaviourState {
    current: Behaviour,
    target: Option<EntityId>,
    patrol_index: usize,
    patrol_done: bool,
    relative_offset: Option<Vec3>,
    encounter_fired: bool,
}

impl BehaviourState {
    pub fn new(id: EntityId, spec: &DynamicSpec) -> Self {
        let current = if spec.initial_behaviour == Behaviour::None {
            log::warn!("Entity {} has no initial behaviour, using Hover", id);
            Behaviour::Hover
        } else {
            spec.initial_behaviour
        };
        if current.needs_target() && spec.initial_target.is_none() {
            log::warn!("Entity {} behaviour {} has no target", id, current.name());
        }
        Self {
            current,
            target: spec.initial_target,
            patrol_index: 0,
            patrol_done: false,
            relative_offset: None,
            encounter_fired: false,
        }
    }

    pub fn current(&self) -> Behaviour {
        self.current
    }

    pub fn target(&self) -> Option<EntityId> {
        self.target
    }

    pub fn encounter_fired(&self) -> bool {
        self.encounter_fired
    }

    /// Switch to the encounter behaviour. Returns false if it already happened.
    pub fn trigger_encounter(&mut self, spec: &DynamicSpec) -> bool {
        if self.encounter_fired {
            return false;
        }
        self.encounter_fired = true;
        self.current = spec.encounter_behaviour;
        self.target = spec.encounter_target;
        self.relative_offset = None;
        self.patrol_index = 0;
        self.patrol_done = false;
        true
    }

    /// Move `pose` one tick according to the current behaviour
    pub fn step(
        &mut self,
        spec: &DynamicSpec,
        pose: &mut Pose,
        others: &BTreeMap<EntityId, Pose>,
        dt: f64,
    ) {
        let step = spec.speed * dt;
        let target = self.target.and_then(|id| others.get(&id)).map(|p| p.position);
        match self.current {
            Behaviour::Hover | Behaviour::None => {}
            Behaviour::Patrol => {
                if self.patrol_done || spec.patrol_points.is_empty() {
                    return;
                }
                let waypoint = spec.patrol_points[self.patrol_index % spec.patrol_points.len()];
                pose.look_at(&waypoint);
                move_towards(pose, &waypoint, step, 0.0);
                if (waypoint - pose.position).norm() <= WAYPOINT_REACHED {
                    self.patrol_index += 1;
                    if self.patrol_index >= spec.patrol_points.len() {
                        if spec.patrol_repeats {
                            self.patrol_index = 0;
                        } else {
                            self.patrol_done = true;
                        }
                    }
                }
            }
            Behaviour::Chase => {
                let Some(target) = target else { return };
                pose.look_at(&target);
                move_towards(pose, &target, step, spec.min_approach_distance);
            }
            Behaviour::Flee => {
                let Some(target) = target else { return };
                let away = pose.position - target;
                if let Some(rotation) = look_rotation(&away, pose.rotation.z) {
                    pose.rotation = rotation;
                }
                pose.position += pose.forward() * step;
            }
            Behaviour::StayRelative => {
                let Some(target) = target else { return };
                let offset = *self.relative_offset.get_or_insert(pose.position - target);
                pose.position = target + offset;
            }
        }
    }
}

/// Step towards `goal` by at most `step`, stopping `stop_short` away from it
fn move_towards(pose: &mut Pose, goal: &Vec3, step: f64, stop_short: f64) {
    let to_goal = goal - pose.position;
    let distance = to_goal.norm();
    let room = distance - stop_short;
    if room <= 0.0 || distance <= 0.0 {
        return;
    }
    pose.position += to_goal / distance * step.min(room);
}

/// Give every dynamic entity without another authority to its behaviour
pub fn claim_behaviours(registry: &mut EntityRegistry) {
    for entity in registry.iter_mut() {
        if entity.behaviour.is_some() && entity.authority() == MotionAuthority::Unowned {
            if let Err(e) = entity.claim(MotionAuthority::Behaviour) {
                log::warn!("{}", e);
            }
        }
    }
}

pub fn release_behaviours(registry: &mut EntityRegistry) {
    for entity in registry.iter_mut() {
        entity.release(MotionAuthority::Behaviour);
    }
}

/// One tick of every behaviour that holds its entity's motion authority
pub fn tick_behaviours(registry: &mut EntityRegistry, dt: f64) {
    let poses = registry.poses();
    for entity in registry.iter_mut() {
        if entity.authority() != MotionAuthority::Behaviour {
            continue;
        }
        let EntityKind::Dynamic(spec) = &entity.kind else {
            continue;
        };
        if let Some(state) = entity.behaviour.as_mut() {
            state.step(spec, &mut entity.pose, &poses, dt);
        }
    }
}

/// Switch entity `id` to its encounter behaviour; false if already switched
pub fn trigger_encounter(registry: &mut EntityRegistry, id: EntityId) -> Result<bool> {
    let entity = registry.require_mut(id)?;
    let EntityKind::Dynamic(spec) = &entity.kind else {
        return Err(ExperimentError::InvariantViolation(format!(
            "encounter on static entity {}",
            id
        )));
    };
    let Some(state) = entity.behaviour.as_mut() else {
        return Ok(false);
    };
    let switched = state.trigger_encounter(spec);
    if switched {
        log::info!(
            "Entity {} ({}) encounter: now {}",
            id,
            entity.name,
            state.current().name()
        );
    }
    Ok(switched)
}

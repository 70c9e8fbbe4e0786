//! Approach behaviour: an entity flies in towards another, holds, then
//! returns to where it was before the approach started.

use serde::{Deserialize, Serialize};

use crate::entity::{EntityId, MotionAuthority};
use crate::registry::EntityRegistry;
use crate::types::{forward, Pose, Vec3};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApproachSpec {
    /// Entity being approached
    pub target: EntityId,
    /// Re-read the target position (and re-aim) every tick
    pub tracking: bool,
    /// Metres per second
    pub speed: f64,
    /// Spawn distance from the target
    pub distance: f64,
    /// Euler offset (degrees) added to the target rotation to pick the spawn side
    pub direction: Vec3,
    /// Added to the aim point
    pub offset: Vec3,
    pub success_distance: f64,
    /// Seconds held at the target before restoring
    pub success_delay: f64,
}

impl Default for ApproachSpec {
    fn default() -> Self {
        Self {
            target: EntityId(0),
            tracking: false,
            speed: 2.5,
            distance: 5.0,
            direction: Vec3::zeros(),
            offset: Vec3::zeros(),
            success_distance: 0.1,
            success_delay: 1.0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ApproachPhase {
    Moving,
    Holding { remaining: f64 },
}

#[derive(Clone, Debug)]
pub struct ApproachRun {
    pub spec: ApproachSpec,
    anchor: Vec3,
    pre_pose: Pose,
    phase: ApproachPhase,
}

impl ApproachRun {
    /// Remember where the mover was, then place it at the spawn point facing the aim
    pub fn begin(spec: ApproachSpec, mover: &mut Pose, target: &Pose) -> Self {
        let pre_pose = *mover;
        let anchor = target.position;
        mover.position = anchor + forward(&(target.rotation + spec.direction)) * spec.distance;
        mover.look_at(&(anchor + spec.offset));
        Self {
            spec,
            anchor,
            pre_pose,
            phase: ApproachPhase::Moving,
        }
    }

    pub fn phase(&self) -> ApproachPhase {
        self.phase
    }

    pub fn pre_pose(&self) -> &Pose {
        &self.pre_pose
    }

    /// One fixed tick. Returns true once the mover has been restored.
    /// `target_position` is the live target position, None if it left the scene.
    pub fn tick(&mut self, mover: &mut Pose, target_position: Option<Vec3>, dt: f64) -> bool {
        match self.phase {
            ApproachPhase::Moving => {
                let base = match (self.spec.tracking, target_position) {
                    (true, Some(p)) => p,
                    _ => self.anchor,
                };
                let aim = base + self.spec.offset;
                if self.spec.tracking {
                    mover.look_at(&aim);
                }
                let to_aim = aim - mover.position;
                let remaining = to_aim.norm();
                if remaining > self.spec.success_distance {
                    let step = (self.spec.speed * dt).min(remaining);
                    mover.position += to_aim / remaining * step;
                    false
                } else {
                    self.phase = ApproachPhase::Holding {
                        remaining: self.spec.success_delay,
                    };
                    self.finish_if_held(mover)
                }
            }
            ApproachPhase::Holding { remaining } => {
                self.phase = ApproachPhase::Holding {
                    remaining: remaining - dt,
                };
                self.finish_if_held(mover)
            }
        }
    }

    fn finish_if_held(&mut self, mover: &mut Pose) -> bool {
        match self.phase {
            ApproachPhase::Holding { remaining } if remaining <= 1e-9 => {
                mover.position = self.pre_pose.position;
                mover.rotation = self.pre_pose.rotation;
                true
            }
            _ => false,
        }
    }
}

/// Start an approach of `mover` towards `spec.target`.
/// The mover's autonomous behaviour is suspended while the approach runs.
pub fn start_approach(
    registry: &mut EntityRegistry,
    mover: EntityId,
    spec: ApproachSpec,
) -> crate::error::Result<()> {
    let target = registry
        .get(spec.target)
        .map(|e| e.pose)
        .ok_or(crate::error::ExperimentError::UnknownEntity(spec.target))?;
    let entity = registry.require_mut(mover)?;
    if entity.approach.is_some() {
        log::warn!("Entity {} is already approaching, restarting", mover);
    }
    entity.release(MotionAuthority::Behaviour);
    entity.claim(MotionAuthority::Approach)?;
    let run = ApproachRun::begin(spec, &mut entity.pose, &target);
    entity.approach = Some(run);
    Ok(())
}

/// Tick every running approach; returns the movers that finished this tick
pub fn tick_approaches(registry: &mut EntityRegistry, dt: f64) -> Vec<EntityId> {
    let positions: Vec<(EntityId, Option<Vec3>)> = registry
        .iter()
        .filter_map(|e| e.approach.as_ref().map(|run| (e.id(), registry.position(run.spec.target))))
        .collect();

    let mut finished = Vec::new();
    for (id, target_position) in positions {
        let Some(entity) = registry.get_mut(id) else {
            continue;
        };
        let Some(mut run) = entity.approach.take() else {
            continue;
        };
        let done = match entity.pose_for(MotionAuthority::Approach) {
            Some(pose) => run.tick(pose, target_position, dt),
            None => {
                log::warn!("Entity {} lost approach authority, dropping approach", id);
                continue;
            }
        };
        if done {
            entity.release(MotionAuthority::Approach);
            resume_behaviour(entity);
            finished.push(id);
        } else {
            entity.approach = Some(run);
        }
    }
    finished
}

/// Drop running approaches where they are (trial ended)
pub fn cancel_approaches(registry: &mut EntityRegistry) {
    for entity in registry.iter_mut() {
        if entity.approach.take().is_some() {
            entity.release(MotionAuthority::Approach);
            log::debug!("Cancelled approach of entity {}", entity.id());
        }
    }
}

fn resume_behaviour(entity: &mut crate::entity::TrackedEntity) {
    if entity.behaviour.is_some() {
        if let Err(e) = entity.claim(MotionAuthority::Behaviour) {
            log::warn!("{}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{DynamicSpec, EntityKind};
    use crate::registry::{EntitySpec, SceneDescription};
    use approx::assert_abs_diff_eq;

    fn spec(tracking: bool) -> ApproachSpec {
        ApproachSpec {
            target: EntityId(0),
            tracking,
            speed: 2.0,
            distance: 4.0,
            success_delay: 0.5,
            ..ApproachSpec::default()
        }
    }

    #[test]
    fn test_spawns_along_target_forward() {
        let mut mover = Pose::at(Vec3::new(10.0, 0.0, 10.0));
        let target = Pose::at(Vec3::new(1.0, 0.0, 1.0));
        let mut s = spec(false);
        s.direction = Vec3::new(0.0, 90.0, 0.0);
        let run = ApproachRun::begin(s, &mut mover, &target);
        assert_abs_diff_eq!(mover.position, Vec3::new(5.0, 0.0, 1.0), epsilon = 1e-9);
        // facing back towards the target
        assert_abs_diff_eq!(mover.forward(), Vec3::new(-1.0, 0.0, 0.0), epsilon = 1e-9);
        assert_eq!(run.pre_pose().position, Vec3::new(10.0, 0.0, 10.0));
    }

    #[test]
    fn test_moves_holds_and_restores() {
        let mut mover = Pose::at(Vec3::new(-3.0, 0.0, 0.0));
        mover.rotation.y = 45.0;
        let target = Pose::at(Vec3::zeros());
        let mut run = ApproachRun::begin(spec(false), &mut mover, &target);

        let dt = 0.1;
        let mut ticks = 0;
        while run.phase() == ApproachPhase::Moving {
            assert!(!run.tick(&mut mover, Some(Vec3::zeros()), dt));
            ticks += 1;
            assert!(ticks < 100);
        }
        // 4m at 2m/s in 0.1s steps, then one tick to notice arrival
        assert_eq!(ticks, 21);
        assert!(mover.position.norm() <= 0.1);

        let mut done = false;
        for _ in 0..5 {
            done = run.tick(&mut mover, Some(Vec3::zeros()), dt);
        }
        assert!(done);
        assert_abs_diff_eq!(mover.position, Vec3::new(-3.0, 0.0, 0.0));
        assert_abs_diff_eq!(mover.rotation.y, 45.0);
    }

    #[test]
    fn test_tracking_follows_moving_target() {
        let mut mover = Pose::default();
        let target = Pose::at(Vec3::new(0.0, 0.0, 0.0));
        let mut run = ApproachRun::begin(spec(true), &mut mover, &target);
        let moved_target = Vec3::new(2.0, 0.0, 0.0);
        for _ in 0..50 {
            if run.phase() != ApproachPhase::Moving {
                break;
            }
            run.tick(&mut mover, Some(moved_target), 0.1);
        }
        assert!((mover.position - moved_target).norm() <= 0.1);
    }

    #[test]
    fn test_registry_approach_suspends_behaviour() {
        let mut registry = EntityRegistry::new();
        registry
            .load_scene(&SceneDescription {
                name: "s".to_string(),
                avatar: EntitySpec::new(0, "avatar", Vec3::zeros()),
                entities: vec![EntitySpec::new(1, "wasp", Vec3::new(0.0, 0.0, 9.0))
                    .with_kind(EntityKind::Dynamic(DynamicSpec::default()))],
            })
            .unwrap();
        registry
            .get_mut(EntityId(1))
            .unwrap()
            .claim(MotionAuthority::Behaviour)
            .unwrap();

        start_approach(&mut registry, EntityId(1), spec(false)).unwrap();
        assert_eq!(
            registry.get(EntityId(1)).unwrap().authority(),
            MotionAuthority::Approach
        );

        let mut finished = Vec::new();
        for _ in 0..200 {
            finished.extend(tick_approaches(&mut registry, 0.05));
        }
        assert_eq!(finished, vec![EntityId(1)]);
        let wasp = registry.get(EntityId(1)).unwrap();
        assert_eq!(wasp.authority(), MotionAuthority::Behaviour);
        assert_abs_diff_eq!(wasp.pose.position, Vec3::new(0.0, 0.0, 9.0));
    }
}

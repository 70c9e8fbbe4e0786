//! Dwell-based proximity between pairs of entities.
//!
//! One tracker serves trial completion, intervention triggers and
//! encounters; the key says what a firing means to the caller.

use crate::entity::EntityId;
use crate::error::{ExperimentError, Result};
use crate::registry::EntityRegistry;

const DWELL_EPSILON: f64 = 1e-9;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ProximityState {
    NotInRange,
    /// Inside the radius, dwell clock running
    InRange { elapsed: f64 },
    /// Fired; terminal for non-repeatable pairs
    Triggered,
}

#[derive(Clone, Debug)]
struct TrackedPair<K> {
    key: K,
    reference: EntityId,
    target: EntityId,
    radius: f64,
    dwell: f64,
    repeatable: bool,
    state: ProximityState,
}

pub struct ProximityTracker<K> {
    pairs: Vec<TrackedPair<K>>,
}

impl<K> Default for ProximityTracker<K> {
    fn default() -> Self {
        Self { pairs: Vec::new() }
    }
}

impl<K: Clone + PartialEq> ProximityTracker<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Watch `target` coming within `radius` of `reference` for `dwell` seconds.
    /// Tracking an entity against itself is refused.
    pub fn track(
        &mut self,
        key: K,
        reference: EntityId,
        target: EntityId,
        radius: f64,
        dwell: f64,
        repeatable: bool,
    ) -> Result<()> {
        if reference == target {
            return Err(ExperimentError::InvariantViolation(format!(
                "proximity of entity {} to itself",
                reference
            )));
        }
        self.pairs.push(TrackedPair {
            key,
            reference,
            target,
            radius,
            dwell: dwell.max(0.0),
            repeatable,
            state: ProximityState::NotInRange,
        });
        Ok(())
    }

    /// Advance every pair by `dt` and return the keys that fired this tick
    pub fn poll(&mut self, registry: &EntityRegistry, dt: f64) -> Vec<K> {
        let mut fired = Vec::new();
        for pair in &mut self.pairs {
            if pair.state == ProximityState::Triggered {
                continue;
            }
            let Some(distance) = registry.distance(pair.reference, pair.target) else {
                continue;
            };
            let in_range = distance <= pair.radius;
            let next = match (pair.state, in_range) {
                (_, false) => ProximityState::NotInRange,
                (ProximityState::NotInRange, true) => ProximityState::InRange { elapsed: 0.0 },
                (ProximityState::InRange { elapsed }, true) => ProximityState::InRange {
                    elapsed: elapsed + dt,
                },
                (ProximityState::Triggered, true) => ProximityState::Triggered,
            };
            pair.state = match next {
                ProximityState::InRange { elapsed } if elapsed + DWELL_EPSILON >= pair.dwell => {
                    log::debug!(
                        "Proximity {} -> {} held {:.2}s within {}m",
                        pair.reference,
                        pair.target,
                        elapsed,
                        pair.radius
                    );
                    fired.push(pair.key.clone());
                    if pair.repeatable {
                        ProximityState::NotInRange
                    } else {
                        ProximityState::Triggered
                    }
                }
                other => other,
            };
        }
        fired
    }

    pub fn state_of(&self, key: &K) -> Option<ProximityState> {
        self.pairs.iter().find(|p| &p.key == key).map(|p| p.state)
    }

    pub fn untrack(&mut self, key: &K) {
        self.pairs.retain(|p| &p.key != key);
    }

    pub fn clear(&mut self) {
        self.pairs.clear();
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{EntitySpec, SceneDescription};
    use crate::types::Vec3;

    fn registry() -> EntityRegistry {
        let mut registry = EntityRegistry::new();
        registry
            .load_scene(&SceneDescription {
                name: "test".to_string(),
                avatar: EntitySpec::new(0, "avatar", Vec3::zeros()),
                entities: vec![EntitySpec::new(1, "target", Vec3::new(0.0, 0.0, 5.0))],
            })
            .unwrap();
        registry
    }

    fn move_target(registry: &mut EntityRegistry, z: f64) {
        registry.get_mut(EntityId(1)).unwrap().pose.position.z = z;
    }

    #[test]
    fn test_leaving_before_dwell_never_fires() {
        let mut registry = registry();
        let mut tracker = ProximityTracker::new();
        tracker.track("pair", EntityId(0), EntityId(1), 1.0, 0.5, false).unwrap();

        move_target(&mut registry, 0.5);
        for _ in 0..10 {
            assert!(tracker.poll(&registry, 0.02).is_empty());
        }
        move_target(&mut registry, 3.0);
        assert!(tracker.poll(&registry, 0.02).is_empty());
        assert_eq!(tracker.state_of(&"pair"), Some(ProximityState::NotInRange));

        // re-entering starts the dwell again from zero
        move_target(&mut registry, 0.5);
        for _ in 0..20 {
            assert!(tracker.poll(&registry, 0.02).is_empty());
        }
    }

    #[test]
    fn test_holding_fires_exactly_once() {
        let mut registry = registry();
        let mut tracker = ProximityTracker::new();
        tracker.track("pair", EntityId(0), EntityId(1), 1.0, 0.5, false).unwrap();
        move_target(&mut registry, 1.0);

        let mut fired_ticks = Vec::new();
        for tick in 0..100 {
            if !tracker.poll(&registry, 0.02).is_empty() {
                fired_ticks.push(tick);
            }
        }
        // entry tick plus 25 ticks of 20ms
        assert_eq!(fired_ticks, vec![25]);
        assert_eq!(tracker.state_of(&"pair"), Some(ProximityState::Triggered));
    }

    #[test]
    fn test_repeatable_rearms() {
        let mut registry = registry();
        let mut tracker = ProximityTracker::new();
        tracker.track("pair", EntityId(0), EntityId(1), 1.0, 0.1, true).unwrap();
        move_target(&mut registry, 0.2);

        let fired: usize = (0..30).map(|_| tracker.poll(&registry, 0.05).len()).sum();
        assert!(fired >= 2);
    }

    #[test]
    fn test_zero_dwell_fires_on_entry() {
        let mut registry = registry();
        let mut tracker = ProximityTracker::new();
        tracker.track(7u32, EntityId(0), EntityId(1), 1.0, 0.0, false).unwrap();
        assert!(tracker.poll(&registry, 0.02).is_empty());
        move_target(&mut registry, 0.9);
        assert_eq!(tracker.poll(&registry, 0.02), vec![7]);
    }

    #[test]
    fn test_self_tracking_refused() {
        let mut tracker: ProximityTracker<u8> = ProximityTracker::new();
        assert!(tracker.track(0, EntityId(2), EntityId(2), 1.0, 0.0, false).is_err());
        assert!(tracker.is_empty());
    }
}

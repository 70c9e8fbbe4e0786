//! Scripted, triggered actions within a trial
//!
//! Interventions are armed when the loop closes. Duration triggers become
//! timers in the trial's task group; proximity triggers become pairs in the
//! shared proximity tracker (avatar against the trigger entity). Either way
//! the experiment hands the firing back here to execute.

use serde::{Deserialize, Serialize};

use crate::approach::{start_approach, ApproachSpec};
use crate::entity::EntityId;
use crate::error::Result;
use crate::proximity::ProximityTracker;
use crate::recorder::{Recorder, ReplayAction};
use crate::registry::EntityRegistry;
use crate::scheduler::{Scheduler, TaskGroup};
use crate::trial::{ProximityKey, TrialEvent};
use crate::types::PoseDelta;

pub const MIN_EDIT_FRAMES: u32 = 2;
pub const DEFAULT_EDIT_FRAMES: u32 = 10;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum EditMode {
    Instant,
    /// Spread the delta evenly over this many fixed ticks
    OverFrames { frames: u32 },
}

impl EditMode {
    pub fn name(&self) -> &'static str {
        match self {
            EditMode::Instant => "Instant",
            EditMode::OverFrames { .. } => "Over_Frames",
        }
    }

    pub fn frames(&self) -> u32 {
        match self {
            EditMode::Instant => DEFAULT_EDIT_FRAMES,
            EditMode::OverFrames { frames } => *frames,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum InterventionAction {
    EditTransform { delta: PoseDelta, mode: EditMode },
    Hide,
    Show,
    /// `mover` approaches the intervention's entity
    Approach { mover: EntityId, spec: ApproachSpec },
}

impl InterventionAction {
    pub fn name(&self) -> &'static str {
        self.replay_action().name()
    }

    pub fn replay_action(&self) -> ReplayAction {
        match self {
            InterventionAction::EditTransform { .. } => ReplayAction::EditTransform,
            InterventionAction::Hide => ReplayAction::HideEntity,
            InterventionAction::Show => ReplayAction::ShowEntity,
            InterventionAction::Approach { .. } => ReplayAction::Approaching,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum InterventionTrigger {
    /// Seconds after the loop closes
    Duration { delay: f64 },
    /// Avatar within `radius` of `entity` for `dwell` seconds
    Proximity { entity: EntityId, radius: f64, dwell: f64 },
}

impl InterventionTrigger {
    pub fn name(&self) -> &'static str {
        match self {
            InterventionTrigger::Duration { .. } => "Duration",
            InterventionTrigger::Proximity { .. } => "Proximity",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Intervention {
    pub name: String,
    /// Entity edited, hidden, shown, or approached
    pub entity: EntityId,
    pub action: InterventionAction,
    pub trigger: InterventionTrigger,
    #[serde(default)]
    pub repeatable: bool,
}

#[derive(Clone, Debug)]
struct FrameEdit {
    entity: EntityId,
    per_frame: PoseDelta,
    frames_left: u32,
}

#[derive(Default)]
pub struct InterventionEngine {
    armed: Vec<Intervention>,
    group: Option<TaskGroup>,
    edits: Vec<FrameEdit>,
    fired: usize,
}

impl InterventionEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm the trial's interventions. Called once when the loop closes.
    pub fn setup(
        &mut self,
        interventions: &[Intervention],
        trial_duration: f64,
        avatar: EntityId,
        scheduler: &mut Scheduler<TrialEvent>,
        group: TaskGroup,
        proximity: &mut ProximityTracker<ProximityKey>,
    ) {
        self.stop();
        self.armed = interventions.to_vec();
        self.group = Some(group);

        let mut movers = Vec::new();
        for (idx, intervention) in self.armed.iter().enumerate() {
            if let InterventionAction::Approach { mover, .. } = intervention.action {
                if movers.contains(&mover) {
                    log::warn!(
                        "{}: entity {} already has an approach in this trial",
                        intervention.name,
                        mover
                    );
                }
                movers.push(mover);
            }
            match intervention.trigger {
                InterventionTrigger::Duration { delay } => {
                    if delay > trial_duration {
                        log::warn!(
                            "{}: delay {}s is longer than the trial ({}s), it will not fire",
                            intervention.name,
                            delay,
                            trial_duration
                        );
                    }
                    scheduler.schedule(group, delay, TrialEvent::InterventionDue(idx));
                }
                InterventionTrigger::Proximity { entity, radius, dwell } => {
                    if let Err(e) = proximity.track(
                        ProximityKey::Intervention(idx),
                        avatar,
                        entity,
                        radius,
                        dwell,
                        intervention.repeatable,
                    ) {
                        log::warn!("{}: {}", intervention.name, e);
                    }
                }
            }
        }
        log::info!("Armed {} interventions", self.armed.len());
    }

    /// A duration trigger came due; repeatable ones are re-armed with the same delay
    pub fn on_timer(
        &mut self,
        idx: usize,
        registry: &mut EntityRegistry,
        recorder: &mut Recorder,
        scheduler: &mut Scheduler<TrialEvent>,
    ) {
        self.fire(idx, registry, recorder);
        let Some(intervention) = self.armed.get(idx) else {
            return;
        };
        if let (true, InterventionTrigger::Duration { delay }, Some(group)) =
            (intervention.repeatable, &intervention.trigger, self.group)
        {
            scheduler.schedule(group, *delay, TrialEvent::InterventionDue(idx));
        }
    }

    /// Run intervention `idx`, logging rather than propagating failures
    pub fn fire(&mut self, idx: usize, registry: &mut EntityRegistry, recorder: &mut Recorder) {
        if let Err(e) = self.execute(idx, registry, recorder) {
            let name = self.armed.get(idx).map(|i| i.name.as_str()).unwrap_or("?");
            log::warn!("Intervention {} failed: {}", name, e);
        }
    }

    fn execute(
        &mut self,
        idx: usize,
        registry: &mut EntityRegistry,
        recorder: &mut Recorder,
    ) -> Result<()> {
        let Some(intervention) = self.armed.get(idx) else {
            return Ok(());
        };
        log::info!(
            "Intervention {}: {} on entity {}",
            intervention.name,
            intervention.action.name(),
            intervention.entity
        );
        match &intervention.action {
            InterventionAction::EditTransform { delta, mode } => {
                let entity = registry.require_mut(intervention.entity)?;
                match mode {
                    EditMode::Instant => entity.pose.apply(delta),
                    EditMode::OverFrames { frames } => {
                        let frames = (*frames).max(MIN_EDIT_FRAMES);
                        self.edits.push(FrameEdit {
                            entity: intervention.entity,
                            per_frame: delta.scaled(1.0 / frames as f64),
                            frames_left: frames,
                        });
                    }
                }
                recorder.command(intervention.entity, ReplayAction::EditTransform);
            }
            InterventionAction::Hide | InterventionAction::Show => {
                let visible = intervention.action == InterventionAction::Show;
                registry.require_mut(intervention.entity)?.visible = visible;
                recorder.command(intervention.entity, intervention.action.replay_action());
            }
            InterventionAction::Approach { mover, spec } => {
                let spec = ApproachSpec {
                    target: intervention.entity,
                    ..spec.clone()
                };
                start_approach(registry, *mover, spec)?;
                recorder.command(*mover, ReplayAction::Approaching);
            }
        }
        self.fired += 1;
        Ok(())
    }

    /// Apply one tick of every gradual edit
    pub fn tick(&mut self, registry: &mut EntityRegistry) {
        for edit in &mut self.edits {
            match registry.get_mut(edit.entity) {
                Some(entity) => entity.pose.apply(&edit.per_frame),
                None => {
                    edit.frames_left = 0;
                    continue;
                }
            }
            edit.frames_left -= 1;
        }
        self.edits.retain(|e| e.frames_left > 0);
    }

    pub fn stop(&mut self) {
        self.armed.clear();
        self.edits.clear();
        self.group = None;
    }

    pub fn fired(&self) -> usize {
        self.fired
    }

    pub fn active_edits(&self) -> usize {
        self.edits.len()
    }
}

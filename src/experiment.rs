//! Trial and sequence state machine
//!
//! `Experiment` owns every collaborator of a live session and is driven from
//! outside by three calls: `handle_packet` for each received datagram,
//! `fixed_update` at the fixed tick rate and `render_frame` at the render
//! rate. Phase changes never return errors; sub-step failures are logged and
//! the transition completes.

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::approach::{cancel_approaches, tick_approaches};
use crate::behaviour::{claim_behaviours, release_behaviours, tick_behaviours, trigger_encounter};
use crate::config::ExperimentConfig;
use crate::entity::{EncounterTrigger, EntityId, EntityKind, MotionAuthority};
use crate::error::{ExperimentError, Result};
use crate::ingest::IngestGate;
use crate::intervention::InterventionEngine;
use crate::interpolation::{InterpolationTarget, ObjectOption};
use crate::kinematics::WingKinematicsProcessor;
use crate::motion_model::MotionModel;
use crate::packet::{self, Packet};
use crate::packet_log::PacketLog;
use crate::proximity::ProximityTracker;
use crate::recorder::{Recorder, ReplayAction, LOOP_CLOSED, LOOP_OPENED};
use crate::registry::EntityRegistry;
use crate::scheduler::{Scheduler, TaskGroup};
use crate::sequence::Sequence;
use crate::stimulus::{DefaultStimulus, StimulusDisplay, StimulusRole, StimulusSpec, StimulusType};
use crate::trial::{CompletedBy, LoopStatus, ProximityKey, Trial, TrialEvent};
use crate::trial_log::{
    append_trial_outcome, write_sequence_log, write_trial_settings, PhaseTimestamps,
    ProfileSnapshot, SequenceLog, TrialOutcome,
};
use crate::types::{file_stamp, wall_timestamp, wrap_euler};

/// Operator commands, typed on stdin or sent by a front end
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    Start,
    Skip,
    Stop,
    PrintData,
}

impl FromStr for Command {
    type Err = ExperimentError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "start" => Ok(Command::Start),
            "skip" => Ok(Command::Skip),
            "stop" => Ok(Command::Stop),
            "print" | "print_data" | "printdata" => Ok(Command::PrintData),
            other => Err(ExperimentError::InvalidState(format!(
                "unknown command {:?} (start, skip, stop, print)",
                other
            ))),
        }
    }
}

/// Milestones reported to whoever drives the experiment
#[derive(Clone, Debug, PartialEq)]
pub enum ExperimentEvent {
    SequenceStarted { name: String },
    TrialStarted { sequence: String, index: usize, name: String },
    LoopClosed { trial: String },
    TrialCompleted { trial: String, by: CompletedBy },
    TrialSaved { dir: PathBuf },
    SequenceFinished { name: String, trials_run: usize },
    SequenceAborted { name: String, reason: String },
    AwaitingNextSequence { name: String },
    AllSequencesFinished,
}

struct SequenceRun {
    sequence: Sequence,
    trial_index: usize,
    dir: PathBuf,
    log_path: PathBuf,
    log: SequenceLog,
    stop_requested: bool,
}

struct TrialRun {
    trial: Trial,
    index: usize,
    group: TaskGroup,
    dir: PathBuf,
    stamp: String,
    completed_by: CompletedBy,
    completed_at: Option<(String, EntityId)>,
    timestamps: PhaseTimestamps,
}

impl TrialRun {
    fn log_path(&self) -> PathBuf {
        self.dir.join(format!("{}_{}.Trial.csv", self.stamp, self.trial.name))
    }
}

pub struct Experiment {
    config: ExperimentConfig,
    registry: EntityRegistry,
    processor: WingKinematicsProcessor,
    motion: MotionModel,
    scheduler: Scheduler<TrialEvent>,
    proximity: ProximityTracker<ProximityKey>,
    interventions: InterventionEngine,
    recorder: Recorder,
    packet_log: PacketLog,
    display: Box<dyn StimulusDisplay>,
    gate: IngestGate,
    status: LoopStatus,
    next_sequence: usize,
    run: Option<SequenceRun>,
    trial: Option<TrialRun>,
    scene_yaw: f64,
    last_completion: Option<CompletedBy>,
    events: Vec<ExperimentEvent>,
}

impl Experiment {
    pub fn new(config: ExperimentConfig, display: Box<dyn StimulusDisplay>) -> Self {
        let config = config.validated();
        Self {
            registry: EntityRegistry::new(),
            processor: WingKinematicsProcessor::new(&config.tracker),
            motion: MotionModel::new(config.motion.clone()),
            scheduler: Scheduler::new(),
            proximity: ProximityTracker::new(),
            interventions: InterventionEngine::new(),
            recorder: Recorder::new(),
            packet_log: PacketLog::new(config.save_data),
            display,
            gate: IngestGate::new(),
            status: LoopStatus::BetweenTrials,
            next_sequence: 0,
            run: None,
            trial: None,
            scene_yaw: 0.0,
            last_completion: None,
            events: Vec::new(),
            config,
        }
    }

    // ─── Accessors ───────────────────────────────────────────────────────

    /// Shared with the receiver thread; open from pre-stimulus start to post-stimulus end
    pub fn gate(&self) -> IngestGate {
        self.gate.clone()
    }

    pub fn config(&self) -> &ExperimentConfig {
        &self.config
    }

    pub fn status(&self) -> LoopStatus {
        self.status
    }

    pub fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut EntityRegistry {
        &mut self.registry
    }

    pub fn motion(&self) -> &MotionModel {
        &self.motion
    }

    pub fn interventions(&self) -> &InterventionEngine {
        &self.interventions
    }

    pub fn now(&self) -> f64 {
        self.scheduler.now()
    }

    pub fn scene_yaw(&self) -> f64 {
        self.scene_yaw
    }

    pub fn is_running(&self) -> bool {
        self.run.is_some()
    }

    /// (sequence name, trial index, trial name) of the trial in progress
    pub fn current_trial(&self) -> Option<(&str, usize, &str)> {
        let run = self.run.as_ref()?;
        let trial = self.trial.as_ref()?;
        Some((run.sequence.name.as_str(), trial.index, trial.trial.name.as_str()))
    }

    /// Cause of the running trial's end, or of the last finished trial
    pub fn completed_by(&self) -> Option<CompletedBy> {
        match &self.trial {
            Some(trial) if trial.completed_by != CompletedBy::Unknown => Some(trial.completed_by),
            _ => self.last_completion,
        }
    }

    pub fn packets_this_trial(&self) -> u64 {
        self.packet_log.packets_this_trial()
    }

    pub fn take_events(&mut self) -> Vec<ExperimentEvent> {
        std::mem::take(&mut self.events)
    }

    // ─── Inputs ──────────────────────────────────────────────────────────

    pub fn command(&mut self, command: Command) {
        log::info!("Command {:?} while {}", command, self.status);
        match command {
            Command::Start => {
                if self.run.is_some() {
                    log::warn!("A sequence is already running");
                } else {
                    self.start_next_sequence();
                }
            }
            Command::Skip => match self.status {
                LoopStatus::PreStim | LoopStatus::LoopClosed => {
                    self.complete_trial(CompletedBy::Skip)
                }
                _ => log::warn!("Skip only applies during pre-stimulus or closed loop"),
            },
            Command::Stop => match self.status {
                LoopStatus::PreStim | LoopStatus::LoopClosed => {
                    if let Some(run) = self.run.as_mut() {
                        run.stop_requested = true;
                    }
                    self.complete_trial(CompletedBy::Stop);
                }
                _ => log::warn!("Stop only applies during pre-stimulus or closed loop"),
            },
            Command::PrintData => self.print_data(),
        }
    }

    /// One datagram from the receiver
    pub fn handle_packet(&mut self, raw: &str) {
        match packet::decode(raw) {
            Ok(Packet::Command(text)) => log::debug!("Ignoring command packet {:?}", text),
            Ok(Packet::Landmarks(frame)) => {
                let closed = self.status == LoopStatus::LoopClosed;
                let angles = self.processor.process(&frame, closed);
                if let Some(angles) = angles {
                    self.motion.update(angles);
                }
                self.packet_log.record(raw, self.status, angles.is_some());
            }
            Err(e) => log::warn!("{}", e),
        }
    }

    /// One fixed-rate tick of `dt` seconds
    pub fn fixed_update(&mut self, dt: f64) {
        self.scheduler.advance(dt);
        while let Some(event) = self.scheduler.pop_due() {
            self.on_timer(event);
        }

        match self.status {
            LoopStatus::LoopClosed => {
                if let Some(pose) = self
                    .registry
                    .avatar_mut()
                    .and_then(|a| a.pose_for(MotionAuthority::MotionModel))
                {
                    self.motion.advance(pose, dt);
                }
                tick_behaviours(&mut self.registry, dt);
                for id in tick_approaches(&mut self.registry, dt) {
                    log::info!("Entity {} finished its approach", id);
                }
                self.interventions.tick(&mut self.registry);

                for key in self.proximity.poll(&self.registry, dt) {
                    if self.status != LoopStatus::LoopClosed {
                        break;
                    }
                    self.on_proximity(key);
                }
            }
            LoopStatus::PreStim | LoopStatus::PostStim | LoopStatus::BetweenTrials => {
                if self.motion.scene_rotation_dps() != 0.0 {
                    self.scene_yaw = self.motion.advance_scene_rotation(dt);
                    self.display.rotate_scene(self.scene_yaw);
                }
            }
        }
    }

    /// One rendered frame of `dt` seconds
    pub fn render_frame(&mut self, dt: f64) {
        self.packet_log.frame_rendered();
        self.recorder.capture_frame(&self.registry, dt);
    }

    // ─── Sequence ────────────────────────────────────────────────────────

    fn start_next_sequence(&mut self) {
        let Some(sequence) = self.config.sequences.get(self.next_sequence).cloned() else {
            log::warn!("No sequences left to run");
            return;
        };
        self.next_sequence += 1;

        if sequence.trials.is_empty() {
            let e = ExperimentError::Configuration(format!("sequence {} has no trials", sequence.name));
            log::error!("{}", e);
            self.events.push(ExperimentEvent::SequenceAborted {
                name: sequence.name.clone(),
                reason: e.to_string(),
            });
            self.after_sequence(&sequence.name);
            return;
        }

        let dir = self.config.output_dir.join(&sequence.name);
        let log_path = dir.join(format!("{}_{}.Sequence.csv", file_stamp(), sequence.name));
        let log = SequenceLog {
            profile: ProfileSnapshot {
                name: self.config.profile_name.clone(),
                tracker: self.config.tracker.clone(),
                motion: self.config.motion.clone(),
            },
            sequence_name: sequence.name.clone(),
            trial_count: sequence.trials.len(),
            start: wall_timestamp(),
            finish: String::new(),
            default_stimulus: sequence.default_stimulus.clone(),
            interpolations: sequence.interpolations.clone(),
        };
        if self.config.save_data {
            if let Err(e) = write_log_in(&dir, &log_path, |p| write_sequence_log(p, &log)) {
                log::error!("Could not write sequence log {}: {}", log_path.display(), e);
            }
        }

        log::info!(
            "Starting sequence {} ({} trials)",
            sequence.name,
            sequence.trials.len()
        );
        self.events.push(ExperimentEvent::SequenceStarted {
            name: sequence.name.clone(),
        });
        self.run = Some(SequenceRun {
            sequence,
            trial_index: 0,
            dir,
            log_path,
            log,
            stop_requested: false,
        });
        self.initialise_trial();
    }

    fn finish_sequence(&mut self) {
        let Some(mut run) = self.run.take() else {
            return;
        };
        self.status = LoopStatus::BetweenTrials;
        self.gate.close();
        run.log.finish = wall_timestamp();
        if self.config.save_data {
            if let Err(e) = write_sequence_log(&run.log_path, &run.log) {
                log::error!("Could not rewrite sequence log {}: {}", run.log_path.display(), e);
            }
        }
        self.show_default_stimulus(&run.sequence.default_stimulus);
        log::info!(
            "Sequence {} finished after {} of {} trials",
            run.sequence.name,
            run.trial_index,
            run.sequence.trials.len()
        );
        self.events.push(ExperimentEvent::SequenceFinished {
            name: run.sequence.name.clone(),
            trials_run: run.trial_index,
        });
        self.after_sequence(&run.sequence.name);
    }

    /// Configuration failure mid-sequence: drop back to idle
    fn abort_sequence(&mut self, reason: ExperimentError) {
        log::error!("{}", reason);
        self.scheduler_reset();
        self.trial = None;
        self.status = LoopStatus::BetweenTrials;
        self.gate.close();
        self.motion.set_closed(false);
        if let Some(run) = self.run.take() {
            self.events.push(ExperimentEvent::SequenceAborted {
                name: run.sequence.name.clone(),
                reason: reason.to_string(),
            });
            self.show_default_stimulus(&run.sequence.default_stimulus);
            self.after_sequence(&run.sequence.name);
        }
    }

    fn after_sequence(&mut self, finished: &str) {
        match self.config.sequences.get(self.next_sequence) {
            Some(next) => {
                log::info!("{} done; enter start for sequence {}", finished, next.name);
                self.events.push(ExperimentEvent::AwaitingNextSequence {
                    name: next.name.clone(),
                });
            }
            None => {
                log::info!("All sequences finished");
                self.events.push(ExperimentEvent::AllSequencesFinished);
            }
        }
    }

    // ─── Trial phases ────────────────────────────────────────────────────

    fn initialise_trial(&mut self) {
        let Some(run) = self.run.as_ref() else {
            return;
        };
        let index = run.trial_index;
        let Some(trial) = run.sequence.trial_with_settings(index) else {
            self.finish_sequence();
            return;
        };
        let sequence_name = run.sequence.name.clone();
        let dir = run.dir.join(format!("{}_{}", index, trial.name));

        let Some(scene) = self.config.scene(&trial.scene).cloned() else {
            self.abort_sequence(ExperimentError::Configuration(format!(
                "trial {} uses unknown scene {}",
                trial.name, trial.scene
            )));
            return;
        };
        if let Err(e) = self.registry.load_scene(&scene) {
            self.abort_sequence(e);
            return;
        }
        self.display.load_scene(&scene.name);

        self.packet_log.reset();
        self.motion.reset_stats();
        let run = TrialRun {
            index,
            group: self.scheduler.new_group(),
            dir,
            stamp: file_stamp(),
            completed_by: CompletedBy::Unknown,
            completed_at: None,
            timestamps: PhaseTimestamps::default(),
            trial,
        };
        if self.config.save_data {
            let path = run.log_path();
            if let Err(e) = write_log_in(&run.dir, &path, |p| write_trial_settings(p, &run.trial, index)) {
                log::error!("Could not write trial log {}: {}", path.display(), e);
            }
        }

        log::info!("Trial {} ({}) of {}", index, run.trial.name, sequence_name);
        self.events.push(ExperimentEvent::TrialStarted {
            sequence: sequence_name,
            index,
            name: run.trial.name.clone(),
        });
        self.trial = Some(run);
        self.start_pre_stimulus();
    }

    fn start_pre_stimulus(&mut self) {
        let Some(trial) = self.trial.as_mut() else {
            return;
        };
        trial.timestamps.prestim_start = wall_timestamp();
        let settings = trial.trial.clone();
        let (group, index) = (trial.group, trial.index);
        self.status = LoopStatus::PreStim;
        self.gate.open();

        self.position_and_track(&settings);
        if let Some(y) = self.registry.avatar_mut().map(|a| a.pose.position.y) {
            self.motion.pin_height(y);
        }
        self.apply_object_interpolations(index);

        self.recorder.begin(&self.registry);
        self.show_phase_stimulus(StimulusRole::PreStimulus, &settings.pre_stimulus);
        self.scheduler
            .schedule(group, settings.pre_stimulus.duration, TrialEvent::PreStimulusElapsed);
    }

    fn start_trial(&mut self) {
        let Some(trial) = self.trial.as_mut() else {
            return;
        };
        trial.timestamps.closed_loop_start = wall_timestamp();
        let (group, duration, name) = (trial.group, trial.trial.duration, trial.trial.name.clone());
        let interventions = trial.trial.interventions.clone();
        self.motion.stop_rotation();

        let Some(avatar) = self.registry.avatar_id() else {
            self.abort_sequence(ExperimentError::Configuration("scene has no avatar".to_string()));
            return;
        };
        self.interventions.setup(
            &interventions,
            duration,
            avatar,
            &mut self.scheduler,
            group,
            &mut self.proximity,
        );
        self.arm_encounters(group);

        self.status = LoopStatus::LoopClosed;
        self.motion.set_closed(true);
        if let Some(entity) = self.registry.avatar_mut() {
            if let Err(e) = entity.claim(MotionAuthority::MotionModel) {
                log::warn!("{}", e);
            }
        }
        claim_behaviours(&mut self.registry);
        self.recorder.notify_all(LOOP_CLOSED);

        log::info!("Loop closed for {:.2}s", duration);
        self.events.push(ExperimentEvent::LoopClosed { trial: name });
        self.scheduler
            .schedule(group, duration, TrialEvent::TrialDurationElapsed);
    }

    /// End the pre-stimulus or closed-loop phase and run the post-stimulus
    fn complete_trial(&mut self, by: CompletedBy) {
        let Some(trial) = self.trial.as_mut() else {
            return;
        };
        trial.completed_by = by;
        trial.timestamps.poststim_start = wall_timestamp();
        let old_group = trial.group;
        let name = trial.trial.name.clone();
        let post = trial.trial.post_stimulus.clone();

        self.scheduler.cancel_group(old_group);
        self.proximity.clear();
        self.interventions.stop();
        cancel_approaches(&mut self.registry);
        release_behaviours(&mut self.registry);
        if let Some(entity) = self.registry.avatar_mut() {
            entity.release(MotionAuthority::MotionModel);
        }
        self.motion.set_closed(false);
        self.motion.stop_rotation();
        if self.status == LoopStatus::LoopClosed {
            self.recorder.notify_all(LOOP_OPENED);
        }

        log::info!("Trial {} completed by {}", name, by);
        self.events.push(ExperimentEvent::TrialCompleted { trial: name, by });

        let group = self.scheduler.new_group();
        if let Some(trial) = self.trial.as_mut() {
            trial.group = group;
        }
        self.status = LoopStatus::PostStim;
        self.show_phase_stimulus(StimulusRole::PostStimulus, &post);
        self.scheduler
            .schedule(group, post.duration, TrialEvent::PostStimulusElapsed);
    }

    fn post_stim_complete(&mut self) {
        let Some(mut trial) = self.trial.take() else {
            return;
        };
        trial.timestamps.poststim_finish = wall_timestamp();
        self.recorder.finish();
        self.gate.close();
        self.status = LoopStatus::BetweenTrials;
        self.scheduler.cancel_group(trial.group);
        self.display.hide_stimulus();
        self.last_completion = Some(trial.completed_by);

        if self.config.save_data {
            match self.save_trial(&trial) {
                Ok(()) => self.events.push(ExperimentEvent::TrialSaved {
                    dir: trial.dir.clone(),
                }),
                Err(e) => log::error!("Saving trial {} failed: {}", trial.trial.name, e),
            }
        }

        let Some(run) = self.run.as_mut() else {
            return;
        };
        run.trial_index += 1;
        if run.stop_requested || run.trial_index >= run.sequence.trials.len() {
            self.finish_sequence();
        } else {
            self.initialise_trial();
        }
    }

    fn save_trial(&self, trial: &TrialRun) -> Result<()> {
        fs::create_dir_all(&trial.dir)?;
        let outcome = TrialOutcome {
            entities: self
                .registry
                .iter()
                .map(|e| (e.id(), e.name.clone(), e.is_dynamic()))
                .collect(),
            completed_by: trial.completed_by,
            completed_at: trial.completed_at.clone(),
            timestamps: trial.timestamps.clone(),
            packets: self.packet_log.packets_this_trial(),
        };
        append_trial_outcome(&trial.log_path(), &outcome)?;
        let written = self.recorder.write_all(&trial.dir, &trial.stamp)?;
        self.packet_log
            .write_csv(&trial.dir.join(format!("{}_DLC-Data.csv", trial.stamp)))?;
        log::info!(
            "Saved trial {} to {} ({} transform logs)",
            trial.trial.name,
            trial.dir.display(),
            written.len()
        );
        Ok(())
    }

    // ─── Trial setup helpers ─────────────────────────────────────────────

    fn position_and_track(&mut self, trial: &Trial) {
        let interpolated = self
            .run
            .as_ref()
            .map(|r| r.sequence.interpolated_entities())
            .unwrap_or_default();
        for change in &trial.entity_changes {
            if interpolated.contains(&change.entity) {
                continue;
            }
            match self.registry.get_mut(change.entity) {
                Some(entity) => entity.pose.position += change.position_delta,
                None => log::warn!(
                    "Trial {}: {}",
                    trial.name,
                    ExperimentError::UnknownEntity(change.entity)
                ),
            }
        }

        let Some(avatar) = self.registry.avatar_id() else {
            return;
        };
        for change in trial.proximity_targets() {
            if let Err(e) = self.proximity.track(
                ProximityKey::TrialCompletion(change.entity),
                avatar,
                change.entity,
                change.proximity,
                change.proximity_duration,
                false,
            ) {
                log::warn!("Trial {}: {}", trial.name, e);
            }
        }
    }

    fn apply_object_interpolations(&mut self, index: usize) {
        let Some(run) = self.run.as_ref() else {
            return;
        };
        let total = run.sequence.trials.len();
        let interpolations = run.sequence.interpolations.clone();
        let avatar = self.registry.avatar_id();

        for interpolation in &interpolations {
            let InterpolationTarget::Object { entity, option } = interpolation.target else {
                continue;
            };
            let value = interpolation.value_at(total, index);
            let Some(target) = self.registry.get_mut(entity) else {
                log::warn!("{}: {}", interpolation.name, ExperimentError::UnknownEntity(entity));
                continue;
            };
            log::debug!("{}: {} {:+.4}", interpolation.name, option.name(), value);
            let pose = &mut target.pose;
            match option {
                ObjectOption::PositionX => pose.position.x += value,
                ObjectOption::PositionY => {
                    if Some(entity) == avatar {
                        self.motion.set_y_pos(value);
                    }
                    pose.position.y += value;
                }
                ObjectOption::PositionZ => pose.position.z += value,
                ObjectOption::RotationX => pose.rotation.x += value,
                ObjectOption::RotationY => pose.rotation.y += value,
                ObjectOption::RotationZ => pose.rotation.z += value,
                ObjectOption::ScaleX => pose.scale.x += value,
                ObjectOption::ScaleY => pose.scale.y += value,
                ObjectOption::ScaleZ => pose.scale.z += value,
                ObjectOption::DynamicSpeed => match &mut target.kind {
                    EntityKind::Dynamic(spec) => spec.speed = value,
                    EntityKind::Static => {
                        log::warn!("{}: entity {} is not dynamic", interpolation.name, entity)
                    }
                },
            }
            target.pose.rotation = wrap_euler(&target.pose.rotation);
        }
    }

    fn arm_encounters(&mut self, group: TaskGroup) {
        let triggers: Vec<(EntityId, EncounterTrigger)> = self
            .registry
            .iter()
            .filter_map(|e| match &e.kind {
                EntityKind::Dynamic(spec) => spec.encounter.clone().map(|t| (e.id(), t)),
                EntityKind::Static => None,
            })
            .collect();
        for (id, trigger) in triggers {
            match trigger {
                EncounterTrigger::Duration { delay } => {
                    self.scheduler.schedule(group, delay, TrialEvent::EncounterDue(id));
                }
                EncounterTrigger::Proximity { entity, radius, dwell } => {
                    if let Err(e) =
                        self.proximity
                            .track(ProximityKey::Encounter(id), id, entity, radius, dwell, false)
                    {
                        log::warn!("Encounter of entity {}: {}", id, e);
                    }
                }
            }
        }
    }

    fn show_phase_stimulus(&mut self, role: StimulusRole, spec: &StimulusSpec) {
        self.display.show_stimulus(role, spec);
        if spec.kind == StimulusType::RotatingScene {
            self.motion.start_rotation(spec.revolutions, spec.duration);
        } else {
            self.motion.stop_rotation();
        }
    }

    /// Between trials; a rotating default keeps turning until the next trial
    fn show_default_stimulus(&mut self, stimulus: &DefaultStimulus) {
        self.display.show_default(stimulus);
        if stimulus.kind == StimulusType::RotatingScene {
            self.motion.start_rotation(1.0, stimulus.seconds_per_revolution);
        } else {
            self.motion.stop_rotation();
        }
    }

    fn scheduler_reset(&mut self) {
        if let Some(trial) = self.trial.as_ref() {
            self.scheduler.cancel_group(trial.group);
        }
        self.proximity.clear();
        self.interventions.stop();
        self.recorder.finish();
    }

    // ─── Event dispatch ──────────────────────────────────────────────────

    fn on_timer(&mut self, event: TrialEvent) {
        log::debug!("Timer {:?} at {:.3}s", event, self.scheduler.now());
        match event {
            TrialEvent::PreStimulusElapsed => self.start_trial(),
            TrialEvent::TrialDurationElapsed => self.complete_trial(CompletedBy::Duration),
            TrialEvent::PostStimulusElapsed => self.post_stim_complete(),
            TrialEvent::InterventionDue(idx) => self.interventions.on_timer(
                idx,
                &mut self.registry,
                &mut self.recorder,
                &mut self.scheduler,
            ),
            TrialEvent::EncounterDue(id) => self.fire_encounter(id),
        }
    }

    fn on_proximity(&mut self, key: ProximityKey) {
        match key {
            ProximityKey::TrialCompletion(id) => {
                let name = self
                    .registry
                    .get(id)
                    .map(|e| e.name.clone())
                    .unwrap_or_default();
                if let Some(trial) = self.trial.as_mut() {
                    trial.completed_at = Some((name, id));
                }
                self.complete_trial(CompletedBy::Proximity);
            }
            ProximityKey::Intervention(idx) => {
                self.interventions
                    .fire(idx, &mut self.registry, &mut self.recorder)
            }
            ProximityKey::Encounter(id) => self.fire_encounter(id),
        }
    }

    fn fire_encounter(&mut self, id: EntityId) {
        match trigger_encounter(&mut self.registry, id) {
            Ok(true) => self
                .recorder
                .notify(id, ReplayAction::EncounterTriggered.name()),
            Ok(false) => {}
            Err(e) => log::warn!("{}", e),
        }
    }

    fn print_data(&self) {
        let stats = self.motion.stats();
        println!("status:            {}", self.status);
        match self.current_trial() {
            Some((sequence, index, name)) => {
                println!("trial:             {} #{} ({})", sequence, index, name)
            }
            None => println!("trial:             -"),
        }
        println!("sim time:          {:.3}s", self.scheduler.now());
        println!("packets (trial):   {}", self.packet_log.packets_this_trial());
        println!("unique updates:    {}", stats.unique_packets);
        println!("duplicate updates: {}", stats.duplicate_packets);
        println!("closed-loop ticks: {}", stats.frames);
        println!(
            "yaw / thrust:      {:.2} deg/s / {:.3} m/s",
            self.motion.yaw_dps(),
            self.motion.thrust_mps()
        );
        if let Some(avatar) = self.registry.avatar_id().and_then(|id| self.registry.get(id)) {
            let p = avatar.pose.position;
            println!(
                "avatar:            ({:.3}, {:.3}, {:.3}) yaw {:.2}",
                p.x, p.y, p.z, avatar.pose.rotation.y
            );
        }
        println!("interventions:     {} fired", self.interventions.fired());
    }
}

/// Create `dir` and write one log file into it
fn write_log_in(dir: &Path, path: &Path, write: impl FnOnce(&Path) -> Result<()>) -> Result<()> {
    fs::create_dir_all(dir)?;
    write(path)
}

//! Per-trial and per-sequence CSV logs
//!
//! Both files are a run of blocks separated by blank lines. Each block is
//! a header row followed by value rows, and is recognised on read by the
//! first cell of its header, so readers tolerate extra blocks.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::approach::ApproachSpec;
use crate::entity::EntityId;
use crate::error::{ExperimentError, Result};
use crate::intervention::{
    EditMode, Intervention, InterventionAction, InterventionTrigger, DEFAULT_EDIT_FRAMES,
};
use crate::interpolation::{
    Interpolation, InterpolationMethod, InterpolationTarget, ObjectOption, SettingOption,
};
use crate::kinematics::TrackerConfig;
use crate::motion_model::{MotionConfig, ResponseCurve};
use crate::stimulus::{DefaultStimulus, StimulusPattern, StimulusSpec, StimulusType};
use crate::trial::{CompletedBy, CompletionPolicy, EntityChange, Trial};
use crate::types::{Color32, Point2, PoseDelta, Vec3};

const END_OF_FILE: &str = "End of File";

// ─── Headers ───────────────────────────────────────────────────────────────

pub const TRIAL_HEADER: &str = "Trial Name, Scene Name, Position in Sequence, Completion Type, Trial Duration, Pre Stimulus Duration, Post Stimulus Duration";
pub const STIMULUS_HEADER: &str = "Stimulus Type, Stimulus Duration, Stimulus, Stim R value, stim G value, stim B value, stim A value, number of revolutions";
pub const INTERVENTION_HEADER: &str = "Intervention Name, Action, OOI ID, Position x, Position y, Position z, Rotation x , Rotation y, Rotation z, Scale x, Scale y, Scale z, Approaching OOI ID, isTrackingTarget, Approach Speed, Approach Distance, Approach Direction x, Approach Direction y, Approach Direction z, Approach Offset x, Approach Offset y, Approach Offset z, Success Distance, Success Delay, Target OOI ID, Intervention Type, Number of Frames, Trigger, Trigger Delay, Proximity, Proximity Delay, isRepeatable";
pub const CHANGE_HEADER: &str = "ID of Changed OOI, Change to x position, Change to y position, Change to z position, Proximity, Proximity Duration";
pub const ENTITIES_HEADER: &str = "ID of OOI in scene, Name, Dynamic";
pub const COMPLETION_HEADER: &str = "Trial Completed by,Name,ID";
pub const TIMESTAMPS_HEADER: &str = "Prestim Start Timestamp, Closedloop Start Timestamp, Poststim Start Timestamp, Poststim Finish Timestamp, No of packets received";

pub const PROFILE_HEADER: &str = "Profile Name, Frame Height, Smoothing Window, Invert Turn, Yaw Curve, Thrust Curve";
pub const AXIS_HEADER: &str = "isManualAxis, Upper point X, Upper point Y, Lower point X, Lower point Y";
pub const SEQUENCE_HEADER: &str = "Sequence Name, Number of Trials, Start Timestamp, Finish Timestamp";
pub const DEFAULT_STIMULUS_HEADER: &str = "Default Stim name, Default Stim type, Stimulus, Default Stim R value, Default Stim G value, Default Stim B value, Default Stim A value, Scene Name, Seconds per revolution";
pub const INTERPOLATION_HEADER: &str = "Interpolation Name, Interpolating Object, OOI ID, Object Interpolation Option, Setting Interpolation Option, Start Value, Final Value , Interpolation method";

const INTERVENTION_COLUMNS: usize = 32;
/// Defaults written for trigger fields an intervention does not use
const UNUSED_TRIGGER_DELAY: f64 = 15.0;
const UNUSED_TRIGGER_RADIUS: f64 = 3.0;
const UNUSED_TRIGGER_DWELL: f64 = 0.5;

// ─── Trial log ────────────────────────────────────────────────────────────

#[derive(Clone, Debug, Default, PartialEq)]
pub struct PhaseTimestamps {
    pub prestim_start: String,
    pub closed_loop_start: String,
    pub poststim_start: String,
    pub poststim_finish: String,
}

/// Appended to the trial log once post-stimulus finishes
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TrialOutcome {
    /// (ID, name, dynamic) of each entity in the scene
    pub entities: Vec<(EntityId, String, bool)>,
    pub completed_by: CompletedBy,
    /// Entity reached when completed by proximity
    pub completed_at: Option<(String, EntityId)>,
    pub timestamps: PhaseTimestamps,
    pub packets: u64,
}

/// Everything read back from a trial log
#[derive(Clone, Debug, PartialEq)]
pub struct TrialRecord {
    pub trial: Trial,
    pub position_in_sequence: usize,
    pub completed_by: Option<CompletedBy>,
}

/// Create the trial log with the trial's settings (written when the trial starts)
pub fn write_trial_settings(path: &Path, trial: &Trial, position: usize) -> Result<()> {
    let mut w = BufWriter::new(File::create(path)?);
    writeln!(w, "{}", TRIAL_HEADER)?;
    writeln!(
        w,
        "{},{},{},{},{},{},{}",
        trial.name,
        trial.scene,
        position,
        trial.completion.name(),
        trial.duration,
        trial.pre_stimulus.duration,
        trial.post_stimulus.duration
    )?;
    writeln!(w)?;
    writeln!(w, "{}", STIMULUS_HEADER)?;
    writeln!(w, "{}", stimulus_row(&trial.pre_stimulus))?;
    writeln!(w, "{}", stimulus_row(&trial.post_stimulus))?;
    writeln!(w)?;
    writeln!(w, "{}", INTERVENTION_HEADER)?;
    for intervention in &trial.interventions {
        writeln!(w, "{}", intervention_row(intervention))?;
    }
    writeln!(w)?;
    writeln!(w, "{}", CHANGE_HEADER)?;
    for change in &trial.entity_changes {
        let d = change.position_delta;
        writeln!(
            w,
            "{},{},{},{},{},{}",
            change.entity, d.x, d.y, d.z, change.proximity, change.proximity_duration
        )?;
    }
    w.flush()?;
    Ok(())
}

pub fn append_trial_outcome(path: &Path, outcome: &TrialOutcome) -> Result<()> {
    let file = OpenOptions::new().append(true).open(path)?;
    let mut w = BufWriter::new(file);
    writeln!(w)?;
    writeln!(w, "{}", ENTITIES_HEADER)?;
    for (id, name, dynamic) in &outcome.entities {
        writeln!(w, "{},{},{}", id, name, fmt_bool(*dynamic))?;
    }
    writeln!(w)?;
    writeln!(w, "{}", COMPLETION_HEADER)?;
    match (&outcome.completed_by, &outcome.completed_at) {
        (CompletedBy::Proximity, Some((name, id))) => {
            writeln!(w, "{},{},{}", outcome.completed_by, name, id)?
        }
        _ => writeln!(w, "{}", outcome.completed_by)?,
    }
    writeln!(w)?;
    writeln!(w, "{}", TIMESTAMPS_HEADER)?;
    let t = &outcome.timestamps;
    writeln!(
        w,
        "{},{},{},{},{}",
        t.prestim_start, t.closed_loop_start, t.poststim_start, t.poststim_finish, outcome.packets
    )?;
    writeln!(w)?;
    writeln!(w, "{}", END_OF_FILE)?;
    w.flush()?;
    Ok(())
}

pub fn read_trial_log(path: &Path) -> Result<TrialRecord> {
    let blocks = read_blocks(path)?;
    let settings = find_block(&blocks, "Trial Name", path)?;
    let row = settings.first_row(path, 7)?;
    let mut trial = Trial::new(&row.text(0), &row.text(1), row.float(4)?);
    let position = row.get(2)?.parse().map_err(|_| row.error("bad position in sequence"))?;
    trial.completion = CompletionPolicy::from_name(row.get(3)?)
        .ok_or_else(|| row.error("unknown completion type"))?;

    let stimuli = find_block(&blocks, "Stimulus Type", path)?;
    if stimuli.rows.len() < 2 {
        return Err(ExperimentError::malformed_file(
            path,
            stimuli.line,
            "expected pre and post stimulus rows",
        ));
    }
    trial.pre_stimulus = parse_stimulus(&stimuli.rows[0])?;
    trial.post_stimulus = parse_stimulus(&stimuli.rows[1])?;

    if let Some(block) = blocks.iter().find(|b| b.is("Intervention Name")) {
        for row in &block.rows {
            trial.interventions.push(parse_intervention(row)?);
        }
    }
    if let Some(block) = blocks.iter().find(|b| b.is("ID of Changed OOI")) {
        for row in &block.rows {
            row.require(6)?;
            trial.entity_changes.push(EntityChange {
                entity: row.entity(0)?,
                position_delta: row.vec3(1)?,
                proximity: row.float(4)?,
                proximity_duration: row.float(5)?,
            });
        }
    }
    let completed_by = blocks
        .iter()
        .find(|b| b.is("Trial Completed by"))
        .and_then(|b| b.rows.first())
        .map(|r| parse_completed_by(&r.text(0)));

    Ok(TrialRecord {
        trial,
        position_in_sequence: position,
        completed_by,
    })
}

fn parse_completed_by(name: &str) -> CompletedBy {
    match name.trim() {
        "Duration" => CompletedBy::Duration,
        "Proximity" => CompletedBy::Proximity,
        "Skip" => CompletedBy::Skip,
        "Stop" => CompletedBy::Stop,
        _ => CompletedBy::Unknown,
    }
}

fn stimulus_row(spec: &StimulusSpec) -> String {
    let c = spec.color;
    format!(
        "{},{},{},{},{},{},{},{}",
        spec.kind.name(),
        spec.duration,
        spec.pattern.name(),
        c.r,
        c.g,
        c.b,
        c.a,
        spec.revolutions
    )
}

fn parse_stimulus(row: &Row) -> Result<StimulusSpec> {
    row.require(8)?;
    Ok(StimulusSpec {
        kind: StimulusType::from_name(row.get(0)?).ok_or_else(|| row.error("unknown stimulus type"))?,
        duration: row.float(1)?,
        pattern: StimulusPattern::from_name(row.get(2)?)
            .ok_or_else(|| row.error("unknown stimulus"))?,
        color: row.color(3)?,
        revolutions: row.float(7)?,
    })
}

/// The 32-column intervention row
pub fn intervention_row(intervention: &Intervention) -> String {
    let (delta, mode) = match &intervention.action {
        InterventionAction::EditTransform { delta, mode } => (*delta, *mode),
        _ => (PoseDelta::default(), EditMode::Instant),
    };
    let unused = ApproachSpec::default();
    let (mover, approach) = match &intervention.action {
        InterventionAction::Approach { mover, spec } => (mover.0 as i64, spec),
        _ => (-1, &unused),
    };
    let (trigger_entity, delay, radius, dwell) = match intervention.trigger {
        InterventionTrigger::Duration { delay } => {
            (-1, delay, UNUSED_TRIGGER_RADIUS, UNUSED_TRIGGER_DWELL)
        }
        InterventionTrigger::Proximity { entity, radius, dwell } => {
            (entity.0 as i64, UNUSED_TRIGGER_DELAY, radius, dwell)
        }
    };
    [
        intervention.name.clone(),
        intervention.action.name().to_string(),
        intervention.entity.to_string(),
        vec3_cells(&delta.position),
        vec3_cells(&delta.rotation),
        vec3_cells(&delta.scale),
        mover.to_string(),
        fmt_bool(approach.tracking).to_string(),
        approach.speed.to_string(),
        approach.distance.to_string(),
        vec3_cells(&approach.direction),
        vec3_cells(&approach.offset),
        approach.success_distance.to_string(),
        approach.success_delay.to_string(),
        trigger_entity.to_string(),
        mode.name().to_string(),
        mode.frames().to_string(),
        intervention.trigger.name().to_string(),
        delay.to_string(),
        radius.to_string(),
        dwell.to_string(),
        fmt_bool(intervention.repeatable).to_string(),
    ]
    .join(",")
}

fn parse_intervention(row: &Row) -> Result<Intervention> {
    row.require(INTERVENTION_COLUMNS)?;
    let entity = row.entity(2)?;
    let action = match row.get(1)? {
        "Edit_OOI_Transform" => {
            let delta = PoseDelta {
                position: row.vec3(3)?,
                rotation: row.vec3(6)?,
                scale: row.vec3(9)?,
            };
            let mode = match row.get(25)? {
                "Over_Frames" => EditMode::OverFrames {
                    frames: row.get(26)?.parse().unwrap_or(DEFAULT_EDIT_FRAMES),
                },
                _ => EditMode::Instant,
            };
            InterventionAction::EditTransform { delta, mode }
        }
        "Hide_OOI" => InterventionAction::Hide,
        "Show_OOI" => InterventionAction::Show,
        "ApproachingObject" => InterventionAction::Approach {
            mover: row.entity(12)?,
            spec: ApproachSpec {
                target: entity,
                tracking: row.boolean(13)?,
                speed: row.float(14)?,
                distance: row.float(15)?,
                direction: row.vec3(16)?,
                offset: row.vec3(19)?,
                success_distance: row.float(22)?,
                success_delay: row.float(23)?,
            },
        },
        other => return Err(row.error(&format!("unknown intervention action {:?}", other))),
    };
    let trigger = match row.get(27)? {
        "Proximity" => InterventionTrigger::Proximity {
            entity: row.entity(24)?,
            radius: row.float(29)?,
            dwell: row.float(30)?,
        },
        _ => InterventionTrigger::Duration {
            delay: row.float(28)?,
        },
    };
    Ok(Intervention {
        name: row.text(0),
        entity,
        action,
        trigger,
        repeatable: row.boolean(31)?,
    })
}

// ─── Sequence log ─────────────────────────────────────────────────────────

/// Profile values that affect how a trial played out
#[derive(Clone, Debug, PartialEq)]
pub struct ProfileSnapshot {
    pub name: String,
    pub tracker: TrackerConfig,
    pub motion: MotionConfig,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SequenceLog {
    pub profile: ProfileSnapshot,
    pub sequence_name: String,
    pub trial_count: usize,
    pub start: String,
    pub finish: String,
    pub default_stimulus: DefaultStimulus,
    pub interpolations: Vec<Interpolation>,
}

pub fn write_sequence_log(path: &Path, log: &SequenceLog) -> Result<()> {
    let mut w = BufWriter::new(File::create(path)?);
    let p = &log.profile;
    writeln!(w, "{}", PROFILE_HEADER)?;
    writeln!(
        w,
        "{},{},{},{},{},{}",
        p.name,
        p.tracker.frame_height,
        p.tracker.smoothing_window,
        fmt_bool(p.motion.invert_turn),
        p.motion.yaw.to_field(),
        p.motion.thrust.to_field()
    )?;
    writeln!(w)?;
    writeln!(w, "{}", AXIS_HEADER)?;
    let (u, l) = (p.tracker.axis_upper, p.tracker.axis_lower);
    writeln!(
        w,
        "{}, {}, {}, {}, {}",
        fmt_bool(p.tracker.manual_axis),
        u.x,
        u.y,
        l.x,
        l.y
    )?;
    writeln!(w)?;
    writeln!(w, "{}", SEQUENCE_HEADER)?;
    writeln!(w, "{},{},{},{}", log.sequence_name, log.trial_count, log.start, log.finish)?;
    writeln!(w)?;
    writeln!(w, "{}", DEFAULT_STIMULUS_HEADER)?;
    let d = &log.default_stimulus;
    writeln!(
        w,
        "{},{},{},{},{},{},{},{},{}",
        d.name,
        d.kind.name(),
        d.pattern.name(),
        d.color.r,
        d.color.g,
        d.color.b,
        d.color.a,
        d.scene.as_deref().unwrap_or(""),
        d.seconds_per_revolution
    )?;
    writeln!(w)?;
    writeln!(w, "{}", INTERPOLATION_HEADER)?;
    for i in &log.interpolations {
        let (is_object, entity, option, setting) = match i.target {
            InterpolationTarget::Object { entity, option } => {
                (true, entity.0 as i64, option, SettingOption::TrialDuration)
            }
            InterpolationTarget::Setting(setting) => (false, -1, ObjectOption::PositionX, setting),
        };
        writeln!(
            w,
            "{},{},{},{},{},{},{},{}",
            i.name,
            fmt_bool(is_object),
            entity,
            option.name(),
            setting.name(),
            i.start,
            i.end,
            i.method.name()
        )?;
    }
    writeln!(w)?;
    writeln!(w, "{}", END_OF_FILE)?;
    w.flush()?;
    Ok(())
}

pub fn read_sequence_log(path: &Path) -> Result<SequenceLog> {
    let blocks = read_blocks(path)?;

    let row = find_block(&blocks, "Profile Name", path)?.first_row(path, 6)?;
    let mut tracker = TrackerConfig {
        frame_height: row.float(1)?,
        smoothing_window: row.get(2)?.parse().map_err(|_| row.error("bad smoothing window"))?,
        ..TrackerConfig::default()
    };
    let motion = MotionConfig {
        invert_turn: row.boolean(3)?,
        yaw: ResponseCurve::from_field(row.get(4)?).ok_or_else(|| row.error("bad yaw curve"))?,
        thrust: ResponseCurve::from_field(row.get(5)?)
            .ok_or_else(|| row.error("bad thrust curve"))?,
    };
    let profile_name = row.text(0);

    let axis = find_block(&blocks, "isManualAxis", path)?.first_row(path, 5)?;
    tracker.manual_axis = axis.boolean(0)?;
    tracker.axis_upper = Point2::new(axis.float(1)?, axis.float(2)?);
    tracker.axis_lower = Point2::new(axis.float(3)?, axis.float(4)?);

    let seq = find_block(&blocks, "Sequence Name", path)?.first_row(path, 2)?;
    let trial_count = seq.get(1)?.parse().map_err(|_| seq.error("bad trial count"))?;

    let stim = find_block(&blocks, "Default Stim name", path)?.first_row(path, 9)?;
    let scene = stim.text(7);
    let default_stimulus = DefaultStimulus {
        name: stim.text(0),
        kind: StimulusType::from_name(stim.get(1)?)
            .ok_or_else(|| stim.error("unknown stimulus type"))?,
        pattern: StimulusPattern::from_name(stim.get(2)?)
            .ok_or_else(|| stim.error("unknown stimulus"))?,
        color: stim.color(3)?,
        scene: (!scene.is_empty()).then_some(scene),
        seconds_per_revolution: stim.float(8)?,
    };

    let mut interpolations = Vec::new();
    if let Some(block) = blocks.iter().find(|b| b.is("Interpolation Name")) {
        for row in &block.rows {
            row.require(8)?;
            let target = if row.boolean(1)? {
                InterpolationTarget::Object {
                    entity: row.entity(2)?,
                    option: ObjectOption::from_name(row.get(3)?)
                        .ok_or_else(|| row.error("unknown object option"))?,
                }
            } else {
                InterpolationTarget::Setting(
                    SettingOption::from_name(row.get(4)?)
                        .ok_or_else(|| row.error("unknown setting option"))?,
                )
            };
            interpolations.push(Interpolation {
                name: row.text(0),
                target,
                start: row.float(5)?,
                end: row.float(6)?,
                method: InterpolationMethod::from_name(row.get(7)?)
                    .ok_or_else(|| row.error("unknown interpolation method"))?,
            });
        }
    }

    Ok(SequenceLog {
        profile: ProfileSnapshot {
            name: profile_name,
            tracker,
            motion,
        },
        sequence_name: seq.text(0),
        trial_count,
        start: seq.text(2),
        finish: seq.text(3),
        default_stimulus,
        interpolations,
    })
}

// ─── Block reader ─────────────────────────────────────────────────────────

pub fn fmt_bool(value: bool) -> &'static str {
    if value {
        "True"
    } else {
        "False"
    }
}

fn vec3_cells(v: &Vec3) -> String {
    format!("{},{},{}", v.x, v.y, v.z)
}

struct Row<'a> {
    path: &'a Path,
    line: usize,
    cells: Vec<String>,
}

impl Row<'_> {
    fn error(&self, reason: &str) -> ExperimentError {
        ExperimentError::malformed_file(self.path, self.line, reason)
    }

    fn require(&self, columns: usize) -> Result<()> {
        if self.cells.len() < columns {
            return Err(self.error(&format!(
                "expected {} columns, found {}",
                columns,
                self.cells.len()
            )));
        }
        Ok(())
    }

    fn get(&self, idx: usize) -> Result<&str> {
        self.cells
            .get(idx)
            .map(String::as_str)
            .ok_or_else(|| self.error(&format!("missing column {}", idx + 1)))
    }

    fn text(&self, idx: usize) -> String {
        self.cells.get(idx).cloned().unwrap_or_default()
    }

    fn float(&self, idx: usize) -> Result<f64> {
        let cell = self.get(idx)?;
        cell.parse()
            .map_err(|_| self.error(&format!("column {}: not a number: {:?}", idx + 1, cell)))
    }

    fn boolean(&self, idx: usize) -> Result<bool> {
        match self.get(idx)?.to_ascii_lowercase().as_str() {
            "true" => Ok(true),
            "false" => Ok(false),
            other => Err(self.error(&format!("column {}: not a bool: {:?}", idx + 1, other))),
        }
    }

    fn entity(&self, idx: usize) -> Result<EntityId> {
        let cell = self.get(idx)?;
        cell.parse()
            .map(EntityId)
            .map_err(|_| self.error(&format!("column {}: not an entity ID: {:?}", idx + 1, cell)))
    }

    fn vec3(&self, idx: usize) -> Result<Vec3> {
        Ok(Vec3::new(self.float(idx)?, self.float(idx + 1)?, self.float(idx + 2)?))
    }

    fn color(&self, idx: usize) -> Result<Color32> {
        let channel = |i: usize| -> Result<u8> {
            self.get(idx + i)?
                .parse()
                .map_err(|_| self.error(&format!("column {}: bad colour channel", idx + i + 1)))
        };
        Ok(Color32 {
            r: channel(0)?,
            g: channel(1)?,
            b: channel(2)?,
            a: channel(3)?,
        })
    }
}

struct Block<'a> {
    line: usize,
    header: String,
    rows: Vec<Row<'a>>,
}

impl<'a> Block<'a> {
    fn is(&self, first_cell: &str) -> bool {
        self.header == first_cell
    }

    fn first_row(&self, path: &Path, columns: usize) -> Result<&Row<'a>> {
        let row = self
            .rows
            .first()
            .ok_or_else(|| ExperimentError::malformed_file(path, self.line, "block has no rows"))?;
        row.require(columns)?;
        Ok(row)
    }
}

fn read_blocks(path: &Path) -> Result<Vec<Block<'_>>> {
    let text = std::fs::read_to_string(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => ExperimentError::MissingFile(path.to_path_buf()),
        _ => ExperimentError::Io(e),
    })?;
    let mut blocks: Vec<Block> = Vec::new();
    let mut current: Option<Block> = None;
    for (idx, line) in text.lines().enumerate() {
        let line_no = idx + 1;
        if line.trim().is_empty() || line.trim() == END_OF_FILE {
            blocks.extend(current.take());
            continue;
        }
        let cells: Vec<String> = line.split(',').map(|c| c.trim().to_string()).collect();
        match current.as_mut() {
            None => {
                current = Some(Block {
                    line: line_no,
                    header: cells.first().cloned().unwrap_or_default(),
                    rows: Vec::new(),
                })
            }
            Some(block) => block.rows.push(Row {
                path,
                line: line_no,
                cells,
            }),
        }
    }
    blocks.extend(current);
    Ok(blocks)
}

fn find_block<'b, 'a>(blocks: &'b [Block<'a>], first_cell: &str, path: &Path) -> Result<&'b Block<'a>> {
    blocks
        .iter()
        .find(|b| b.is(first_cell))
        .ok_or_else(|| ExperimentError::malformed_file(path, 0, format!("no {:?} section", first_cell)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir(name: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("tethered_flight_{}_{}", name, std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn sample_trial() -> Trial {
        let mut trial = Trial::new("approach_1", "meadow", 12.5);
        trial.completion = CompletionPolicy::DurationOrProximity;
        trial.pre_stimulus = StimulusSpec {
            kind: StimulusType::RotatingScene,
            duration: 3.0,
            revolutions: 2.0,
            ..StimulusSpec::default()
        };
        trial.interventions = vec![
            Intervention {
                name: "slide".to_string(),
                entity: EntityId(2),
                action: InterventionAction::EditTransform {
                    delta: PoseDelta::translation(Vec3::new(0.5, 0.0, -1.25)),
                    mode: EditMode::OverFrames { frames: 20 },
                },
                trigger: InterventionTrigger::Duration { delay: 2.0 },
                repeatable: false,
            },
            Intervention {
                name: "swoop".to_string(),
                entity: EntityId(0),
                action: InterventionAction::Approach {
                    mover: EntityId(3),
                    spec: ApproachSpec {
                        target: EntityId(0),
                        tracking: true,
                        direction: Vec3::new(0.0, 45.0, 0.0),
                        ..ApproachSpec::default()
                    },
                },
                trigger: InterventionTrigger::Proximity {
                    entity: EntityId(2),
                    radius: 1.5,
                    dwell: 0.25,
                },
                repeatable: true,
            },
        ];
        trial.entity_changes = vec![EntityChange {
            entity: EntityId(2),
            position_delta: Vec3::new(0.0, 0.0, 5.0),
            proximity: 1.0,
            proximity_duration: 0.5,
        }];
        trial
    }

    #[test]
    fn test_intervention_row_has_32_columns() {
        for intervention in &sample_trial().interventions {
            assert_eq!(intervention_row(intervention).split(',').count(), INTERVENTION_COLUMNS);
        }
    }

    #[test]
    fn test_trial_log_reads_back_settings() {
        let dir = temp_dir("trial_log");
        let path = dir.join("approach_1.Trial.csv");
        let trial = sample_trial();
        write_trial_settings(&path, &trial, 3).unwrap();
        append_trial_outcome(
            &path,
            &TrialOutcome {
                entities: vec![(EntityId(2), "flower".to_string(), false)],
                completed_by: CompletedBy::Proximity,
                completed_at: Some(("flower".to_string(), EntityId(2))),
                timestamps: PhaseTimestamps::default(),
                packets: 120,
            },
        )
        .unwrap();

        let record = read_trial_log(&path).unwrap();
        assert_eq!(record.trial, trial);
        assert_eq!(record.position_in_sequence, 3);
        assert_eq!(record.completed_by, Some(CompletedBy::Proximity));
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("Proximity,flower,2"));
        assert!(text.trim_end().ends_with(END_OF_FILE));
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_sequence_log_reads_back_profile() {
        let dir = temp_dir("sequence_log");
        let path = dir.join("seq.Sequence.csv");
        let log = SequenceLog {
            profile: ProfileSnapshot {
                name: "lab".to_string(),
                tracker: TrackerConfig {
                    manual_axis: true,
                    smoothing_window: 7,
                    ..TrackerConfig::default()
                },
                motion: MotionConfig {
                    yaw: ResponseCurve::default_yaw_linear(),
                    thrust: ResponseCurve::Constant { value: 0.75 },
                    invert_turn: true,
                },
            },
            sequence_name: "seq".to_string(),
            trial_count: 4,
            start: "20240101_93015.000001".to_string(),
            finish: String::new(),
            default_stimulus: DefaultStimulus::default(),
            interpolations: vec![Interpolation {
                name: "closer".to_string(),
                target: InterpolationTarget::Object {
                    entity: EntityId(2),
                    option: ObjectOption::PositionZ,
                },
                start: 5.0,
                end: 1.0,
                method: InterpolationMethod::Log10,
            }],
        };
        write_sequence_log(&path, &log).unwrap();
        assert_eq!(read_sequence_log(&path).unwrap(), log);
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_missing_section_is_malformed() {
        let dir = temp_dir("broken_log");
        let path = dir.join("broken.Trial.csv");
        std::fs::write(&path, "Something Else\n1,2,3\n").unwrap();
        assert!(matches!(
            read_trial_log(&path),
            Err(ExperimentError::MalformedFile { .. })
        ));
        assert!(matches!(
            read_trial_log(&dir.join("nope.Trial.csv")),
            Err(ExperimentError::MissingFile(_))
        ));
        std::fs::remove_dir_all(dir).ok();
    }
}

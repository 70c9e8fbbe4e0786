//! Per-entity frame capture and the transform log codec
//!
//! Pose samples and discrete events share one ordered stream per entity.
//! On disk the events become `C:`/`N:` rows padded to the sample width.

use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::entity::{EntityId, EntityKind, TrackedEntity};
use crate::error::{ExperimentError, Result};
use crate::registry::EntityRegistry;
use crate::types::{wall_timestamp, Pose, Vec3};

pub const IDENTITY_HEADER: &str = "OOI ID,Name,Object Type,Speed,Initial Behaviour,EncounterBehaviour";
pub const FRAME_HEADER: &str = "X position, Y position, Z position, X rotation, Y rotation, Z rotation, X scale, Y scale, Z scale, TimeSinceLastUpdate";
/// Identity header, identity row, blank, frame header
const PREAMBLE_LINES: usize = 4;
const COLUMNS: usize = 10;

pub const PRESTIM_STARTED: &str = "PreStim Started";
pub const LOOP_CLOSED: &str = "Loop Closed";
pub const LOOP_OPENED: &str = "Loop Opened";
pub const POST_STIM_FINISHED: &str = "Post Stim Finished";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReplayAction {
    EditTransform,
    HideEntity,
    ShowEntity,
    Approaching,
    EncounterTriggered,
}

impl ReplayAction {
    pub fn name(&self) -> &'static str {
        match self {
            ReplayAction::EditTransform => "Edit_OOI_Transform",
            ReplayAction::HideEntity => "Hide_OOI",
            ReplayAction::ShowEntity => "Show_OOI",
            ReplayAction::Approaching => "ApproachingObject",
            ReplayAction::EncounterTriggered => "OOI_Encounter_Triggered",
        }
    }
}

impl fmt::Display for ReplayAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ReplayAction {
    type Err = ExperimentError;

    fn from_str(s: &str) -> Result<Self> {
        [
            ReplayAction::EditTransform,
            ReplayAction::HideEntity,
            ReplayAction::ShowEntity,
            ReplayAction::Approaching,
            ReplayAction::EncounterTriggered,
        ]
        .into_iter()
        .find(|a| a.name() == s.trim())
        .ok_or_else(|| ExperimentError::InvalidState(format!("unknown replay action {:?}", s)))
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum RecordedRow {
    Sample { pose: Pose, dt: f64 },
    Command { action: ReplayAction, timestamp: String },
    Notification { text: String, timestamp: String },
}

impl RecordedRow {
    pub fn to_line(&self) -> String {
        match self {
            RecordedRow::Sample { pose, dt } => {
                let (p, r, s) = (pose.position, pose.rotation, pose.scale);
                format!(
                    "{},{},{},{},{},{},{},{},{},{}",
                    p.x, p.y, p.z, r.x, r.y, r.z, s.x, s.y, s.z, dt
                )
            }
            RecordedRow::Command { action, timestamp } => {
                format!("C:{}{}{}", action, ",".repeat(COLUMNS - 1), timestamp)
            }
            RecordedRow::Notification { text, timestamp } => {
                format!("N:{}{}{}", text, ",".repeat(COLUMNS - 1), timestamp)
            }
        }
    }

    /// Parse one data row; `line` is only used in error messages
    pub fn parse(text: &str, path: &Path, line: usize) -> Result<Self> {
        let fields: Vec<&str> = text.split(',').collect();
        let first = fields.first().copied().unwrap_or("");
        let timestamp = || fields.last().map(|t| t.trim().to_string()).unwrap_or_default();

        if let Some(action) = first.strip_prefix("C:") {
            let action = action
                .parse()
                .map_err(|e: ExperimentError| ExperimentError::malformed_file(path, line, e.to_string()))?;
            return Ok(RecordedRow::Command {
                action,
                timestamp: timestamp(),
            });
        }
        if let Some(text) = first.strip_prefix("N:") {
            return Ok(RecordedRow::Notification {
                text: text.to_string(),
                timestamp: timestamp(),
            });
        }
        if fields.len() < COLUMNS {
            return Err(ExperimentError::malformed_file(
                path,
                line,
                format!("expected {} columns, found {}", COLUMNS, fields.len()),
            ));
        }
        let mut values = [0.0f64; COLUMNS];
        for (slot, field) in values.iter_mut().zip(&fields) {
            *slot = field.trim().parse().map_err(|_| {
                ExperimentError::malformed_file(path, line, format!("not a number: {:?}", field))
            })?;
        }
        Ok(RecordedRow::Sample {
            pose: Pose {
                position: Vec3::new(values[0], values[1], values[2]),
                rotation: Vec3::new(values[3], values[4], values[5]),
                scale: Vec3::new(values[6], values[7], values[8]),
            },
            dt: values[9],
        })
    }

    pub fn is_sample(&self) -> bool {
        matches!(self, RecordedRow::Sample { .. })
    }
}

/// Identity row at the top of a transform log
#[derive(Clone, Debug, PartialEq)]
pub struct TransformHeader {
    pub id: EntityId,
    pub name: String,
    pub object_type: String,
    pub speed: f64,
    pub initial_behaviour: String,
    pub encounter_behaviour: String,
}

impl TransformHeader {
    pub fn for_entity(entity: &TrackedEntity) -> Self {
        let (initial, encounter) = match &entity.kind {
            EntityKind::Dynamic(spec) => (
                spec.initial_behaviour.name().to_string(),
                spec.encounter_behaviour.name().to_string(),
            ),
            EntityKind::Static => ("None".to_string(), "None".to_string()),
        };
        Self {
            id: entity.id(),
            name: entity.name.clone(),
            object_type: entity.kind.type_name().to_string(),
            speed: entity.speed(),
            initial_behaviour: initial,
            encounter_behaviour: encounter,
        }
    }

    fn to_line(&self) -> String {
        format!(
            "{},{},{},{},{},{}",
            self.id,
            self.name,
            self.object_type,
            self.speed,
            self.initial_behaviour,
            self.encounter_behaviour
        )
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct TransformLog {
    pub header: TransformHeader,
    pub rows: Vec<RecordedRow>,
}

impl TransformLog {
    pub fn new(header: TransformHeader) -> Self {
        Self {
            header,
            rows: Vec::new(),
        }
    }

    /// `<prefix>_<name>_<id>.Transform.csv`
    pub fn file_name(&self, prefix: &str) -> String {
        format!("{}_{}_{}.Transform.csv", prefix, self.header.name, self.header.id)
    }

    pub fn samples(&self) -> impl Iterator<Item = (&Pose, f64)> {
        self.rows.iter().filter_map(|r| match r {
            RecordedRow::Sample { pose, dt } => Some((pose, *dt)),
            _ => None,
        })
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        writeln!(writer, "{}", IDENTITY_HEADER)?;
        writeln!(writer, "{}", self.header.to_line())?;
        writeln!(writer)?;
        writeln!(writer, "{}", FRAME_HEADER)?;
        for row in &self.rows {
            writeln!(writer, "{}", row.to_line())?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Read the rows of a transform log. Only the entity ID of the header is
    /// interpreted; the replayer takes identity from the live registry.
    pub fn read(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ExperimentError::MissingFile(path.to_path_buf()),
            _ => ExperimentError::Io(e),
        })?;
        let mut header = None;
        let mut rows = Vec::new();
        for (idx, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if idx == 1 {
                header = Some(parse_header(&line, path)?);
            }
            if idx < PREAMBLE_LINES || line.trim().is_empty() {
                continue;
            }
            rows.push(RecordedRow::parse(&line, path, idx + 1)?);
        }
        let header =
            header.ok_or_else(|| ExperimentError::malformed_file(path, 2, "missing identity row"))?;
        Ok(Self { header, rows })
    }
}

fn parse_header(line: &str, path: &Path) -> Result<TransformHeader> {
    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    if fields.len() < 6 {
        return Err(ExperimentError::malformed_file(path, 2, "identity row needs 6 columns"));
    }
    let id = fields[0]
        .parse()
        .map_err(|_| ExperimentError::malformed_file(path, 2, "bad entity ID"))?;
    let speed = fields[3]
        .parse()
        .map_err(|_| ExperimentError::malformed_file(path, 2, "bad speed"))?;
    Ok(TransformHeader {
        id: EntityId(id),
        name: fields[1].to_string(),
        object_type: fields[2].to_string(),
        speed,
        initial_behaviour: fields[4].to_string(),
        encounter_behaviour: fields[5].to_string(),
    })
}

/// Buffers one transform log per entity while a trial is being captured
#[derive(Default)]
pub struct Recorder {
    capturing: bool,
    logs: BTreeMap<EntityId, TransformLog>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_capturing(&self) -> bool {
        self.capturing
    }

    /// Start capturing every entity currently in the registry
    pub fn begin(&mut self, registry: &EntityRegistry) {
        self.logs = registry
            .iter()
            .map(|e| (e.id(), TransformLog::new(TransformHeader::for_entity(e))))
            .collect();
        self.capturing = true;
        self.notify_all(PRESTIM_STARTED);
    }

    pub fn notify_all(&mut self, text: &str) {
        let timestamp = wall_timestamp();
        for log in self.logs.values_mut() {
            log.rows.push(RecordedRow::Notification {
                text: text.to_string(),
                timestamp: timestamp.clone(),
            });
        }
    }

    pub fn command(&mut self, entity: EntityId, action: ReplayAction) {
        self.push(entity, RecordedRow::Command {
            action,
            timestamp: wall_timestamp(),
        });
    }

    pub fn notify(&mut self, entity: EntityId, text: &str) {
        self.push(entity, RecordedRow::Notification {
            text: text.to_string(),
            timestamp: wall_timestamp(),
        });
    }

    fn push(&mut self, entity: EntityId, row: RecordedRow) {
        if !self.capturing {
            return;
        }
        match self.logs.get_mut(&entity) {
            Some(log) => log.rows.push(row),
            None => log::warn!("No transform log for entity {}", entity),
        }
    }

    /// Append the current pose of every captured entity
    pub fn capture_frame(&mut self, registry: &EntityRegistry, dt: f64) {
        if !self.capturing {
            return;
        }
        for (id, log) in self.logs.iter_mut() {
            if let Some(entity) = registry.get(*id) {
                log.rows.push(RecordedRow::Sample {
                    pose: entity.pose,
                    dt,
                });
            }
        }
    }

    /// Stop capturing; the buffers stay until the next `begin` or `take_logs`
    pub fn finish(&mut self) {
        if self.capturing {
            self.notify_all(POST_STIM_FINISHED);
        }
        self.capturing = false;
    }

    pub fn logs(&self) -> &BTreeMap<EntityId, TransformLog> {
        &self.logs
    }

    pub fn take_logs(&mut self) -> BTreeMap<EntityId, TransformLog> {
        std::mem::take(&mut self.logs)
    }

    /// Write every buffered log into `dir`; returns the files written
    pub fn write_all(&self, dir: &Path, prefix: &str) -> Result<Vec<PathBuf>> {
        let mut written = Vec::with_capacity(self.logs.len());
        for log in self.logs.values() {
            let path = dir.join(log.file_name(prefix));
            log.write(&path)?;
            written.push(path);
        }
        Ok(written)
    }
}

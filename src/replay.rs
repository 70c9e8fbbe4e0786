//! Loading a recorded trial and driving its entities back through it.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::entity::{EntityId, MotionAuthority};
use crate::error::{ExperimentError, Result};
use crate::recorder::{RecordedRow, ReplayAction, TransformLog};
use crate::registry::EntityRegistry;
use crate::trial_log::{read_sequence_log, read_trial_log, SequenceLog, TrialRecord};

/// The sequence and trial logs of one recorded trial folder
#[derive(Clone, Debug)]
pub struct ReplaySession {
    pub trial_dir: PathBuf,
    pub sequence: SequenceLog,
    pub record: TrialRecord,
}

impl ReplaySession {
    /// Trial folder layout: `<sequence dir>/<idx>_<trial>/`, sequence log in the parent
    pub fn load(trial_dir: &Path) -> Result<Self> {
        if !trial_dir.is_dir() {
            return Err(ExperimentError::MissingFile(trial_dir.to_path_buf()));
        }
        let sequence_dir = trial_dir
            .parent()
            .ok_or_else(|| ExperimentError::MissingFile(trial_dir.join("..")))?;
        let sequence_path = find_by_suffix(sequence_dir, ".Sequence.csv")?;
        let trial_path = find_by_suffix(trial_dir, ".Trial.csv")?;
        log::info!(
            "Replay: sequence log {}, trial log {}",
            sequence_path.display(),
            trial_path.display()
        );
        Ok(Self {
            trial_dir: trial_dir.to_path_buf(),
            sequence: read_sequence_log(&sequence_path)?,
            record: read_trial_log(&trial_path)?,
        })
    }

    /// Load one transform log for every entity in the registry
    pub fn load_streams(&self, registry: &EntityRegistry) -> Result<Replayer> {
        let mut streams = BTreeMap::new();
        for id in registry.ids() {
            let path = find_by_suffix(&self.trial_dir, &format!("_{}.Transform.csv", id))?;
            let log = TransformLog::read(&path)?;
            if log.header.id != id {
                log::warn!(
                    "{} claims entity {}, expected {}",
                    path.display(),
                    log.header.id,
                    id
                );
            }
            streams.insert(id, Stream { rows: log.rows, cursor: 0 });
        }
        Ok(Replayer::new(streams))
    }
}

/// First file in `dir` whose name ends with `suffix`
pub fn find_by_suffix(dir: &Path, suffix: &str) -> Result<PathBuf> {
    let entries = fs::read_dir(dir).map_err(|_| ExperimentError::MissingFile(dir.to_path_buf()))?;
    let mut matches: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(suffix))
        })
        .collect();
    matches.sort();
    matches
        .into_iter()
        .next()
        .ok_or_else(|| ExperimentError::MissingFile(dir.join(format!("*{}", suffix))))
}

#[derive(Clone, Debug)]
struct Stream {
    rows: Vec<RecordedRow>,
    cursor: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReplayTick {
    Playing,
    /// First tick on which a stream ran out
    Ended,
    /// Already ended; nothing moved
    Finished,
}

pub struct Replayer {
    streams: BTreeMap<EntityId, Stream>,
    ended: bool,
    ticks: usize,
}

impl Replayer {
    fn new(streams: BTreeMap<EntityId, Stream>) -> Self {
        Self {
            streams,
            ended: false,
            ticks: 0,
        }
    }

    /// Take replay authority over every streamed entity
    pub fn begin(&mut self, registry: &mut EntityRegistry) -> Result<()> {
        for id in self.streams.keys() {
            let entity = registry.require_mut(*id)?;
            entity.release_all();
            entity.approach = None;
            entity.claim(MotionAuthority::Replay)?;
        }
        for stream in self.streams.values_mut() {
            stream.cursor = 0;
        }
        self.ended = false;
        self.ticks = 0;
        Ok(())
    }

    /// Consume one row per entity
    pub fn tick(&mut self, registry: &mut EntityRegistry) -> ReplayTick {
        if self.ended {
            return ReplayTick::Finished;
        }
        self.ticks += 1;
        let mut exhausted = false;
        for (id, stream) in self.streams.iter_mut() {
            let Some(row) = stream.rows.get(stream.cursor) else {
                exhausted = true;
                continue;
            };
            stream.cursor += 1;
            let Some(entity) = registry.get_mut(*id) else {
                continue;
            };
            match row {
                RecordedRow::Sample { pose, .. } => {
                    if let Some(target) = entity.pose_for(MotionAuthority::Replay) {
                        *target = *pose;
                    }
                }
                RecordedRow::Command { action, .. } => match action {
                    ReplayAction::HideEntity => entity.visible = false,
                    ReplayAction::ShowEntity => entity.visible = true,
                    // motion of these is already in the samples
                    _ => log::debug!("Replay entity {}: {}", id, action),
                },
                RecordedRow::Notification { text, .. } => {
                    log::debug!("Replay entity {}: {}", id, text)
                }
            }
        }
        if exhausted {
            self.ended = true;
            log::info!("End of replay after {} ticks", self.ticks);
            ReplayTick::Ended
        } else {
            ReplayTick::Playing
        }
    }

    pub fn is_ended(&self) -> bool {
        self.ended
    }

    pub fn ticks(&self) -> usize {
        self.ticks
    }

    pub fn stream_len(&self, id: EntityId) -> Option<usize> {
        self.streams.get(&id).map(|s| s.rows.len())
    }

    /// Hand the entities back
    pub fn release(&mut self, registry: &mut EntityRegistry) {
        for id in self.streams.keys() {
            if let Some(entity) = registry.get_mut(*id) {
                entity.release(MotionAuthority::Replay);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recorder::Recorder;
    use crate::registry::{EntitySpec, SceneDescription};
    use crate::types::Vec3;

    #[test]
    fn test_missing_transform_log_is_error() {
        let dir = std::env::temp_dir().join(format!("tethered_flight_replay_{}", std::process::id()));
        let trial_dir = dir.join("0_trial");
        fs::create_dir_all(&trial_dir).unwrap();

        let mut registry = EntityRegistry::new();
        registry
            .load_scene(&SceneDescription {
                name: "s".to_string(),
                avatar: EntitySpec::new(0, "avatar", Vec3::zeros()),
                entities: vec![EntitySpec::new(7, "rock", Vec3::new(1.0, 0.0, 1.0))],
            })
            .unwrap();
        let mut recorder = Recorder::new();
        recorder.begin(&registry);
        recorder.capture_frame(&registry, 0.02);
        recorder.finish();
        let written = recorder.write_all(&trial_dir, "stamp").unwrap();
        fs::remove_file(written.iter().find(|p| p.to_string_lossy().ends_with("_7.Transform.csv")).unwrap())
            .unwrap();

        assert!(matches!(
            find_by_suffix(&trial_dir, "_7.Transform.csv"),
            Err(ExperimentError::MissingFile(_))
        ));
        assert!(find_by_suffix(&trial_dir, "_0.Transform.csv").is_ok());
        fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_end_signalled_once() {
        let rows = vec![RecordedRow::Notification {
            text: "Loop Closed".to_string(),
            timestamp: String::new(),
        }];
        let mut streams = BTreeMap::new();
        streams.insert(EntityId(0), Stream { rows, cursor: 0 });
        let mut replayer = Replayer::new(streams);
        let mut registry = EntityRegistry::new();
        registry
            .load_scene(&SceneDescription {
                name: "s".to_string(),
                avatar: EntitySpec::new(0, "avatar", Vec3::zeros()),
                entities: vec![],
            })
            .unwrap();
        replayer.begin(&mut registry).unwrap();
        assert_eq!(replayer.tick(&mut registry), ReplayTick::Playing);
        assert_eq!(replayer.tick(&mut registry), ReplayTick::Ended);
        assert_eq!(replayer.tick(&mut registry), ReplayTick::Finished);
        assert_eq!(replayer.tick(&mut registry), ReplayTick::Finished);
    }
}

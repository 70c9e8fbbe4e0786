use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};

use crate::error::{ExperimentError, Result};
use crate::intervention::{EditMode, InterventionAction, InterventionTrigger, MIN_EDIT_FRAMES};
use crate::kinematics::TrackerConfig;
use crate::motion_model::MotionConfig;
use crate::registry::{is_safe_name, sanitize_name, SceneDescription};
use crate::sequence::Sequence;
use crate::smoothing::MIN_WINDOW;

/// Everything one rig session needs: profile, timing, scenes and sequences
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentConfig {
    pub profile_name: String,

    // ─── Network ───
    pub udp_port: u16,
    /// Decoded packets buffered between receiver and tick loop
    pub channel_capacity: usize,

    // ─── Tracking and motion ───
    pub tracker: TrackerConfig,
    pub motion: MotionConfig,

    // ─── Timing (seconds) ───
    pub fixed_dt: f64,
    pub render_dt: f64,

    // ─── Output ───
    pub output_dir: PathBuf,
    pub save_data: bool,

    pub scenes: Vec<SceneDescription>,
    pub sequences: Vec<Sequence>,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            profile_name: "Default".to_string(),
            udp_port: 8051,
            channel_capacity: 256,
            tracker: TrackerConfig::default(),
            motion: MotionConfig::default(),
            fixed_dt: 0.02,
            render_dt: 1.0 / 60.0,
            output_dir: PathBuf::from("data"),
            save_data: true,
            scenes: Vec::new(),
            sequences: Vec::new(),
        }
    }
}

impl ExperimentConfig {
    /// Read a JSON config, gzip-compressed when the file ends in `.gz`
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ExperimentError::MissingFile(path.to_path_buf()),
            _ => ExperimentError::Io(e),
        })?;
        let config: Self = if path.extension().map(|e| e == "gz").unwrap_or(false) {
            serde_json::from_reader(BufReader::new(GzDecoder::new(file)))?
        } else {
            serde_json::from_reader(BufReader::new(file))?
        };
        log::info!(
            "Loaded profile {} from {} ({} scenes, {} sequences)",
            config.profile_name,
            path.display(),
            config.scenes.len(),
            config.sequences.len()
        );
        Ok(config.validated())
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }

    /// Raise values below their minimums, warning for each
    pub fn validated(mut self) -> Self {
        if self.tracker.smoothing_window < MIN_WINDOW {
            log::warn!(
                "Smoothing window {} below minimum, using {}",
                self.tracker.smoothing_window,
                MIN_WINDOW
            );
            self.tracker.smoothing_window = MIN_WINDOW;
        }
        if !(self.fixed_dt > 0.0) {
            log::warn!("Fixed dt {} is not positive, using 0.02", self.fixed_dt);
            self.fixed_dt = 0.02;
        }
        if !(self.render_dt > 0.0) {
            log::warn!("Render dt {} is not positive, using 1/60", self.render_dt);
            self.render_dt = 1.0 / 60.0;
        }
        if self.channel_capacity == 0 {
            log::warn!("Channel capacity 0, using 1");
            self.channel_capacity = 1;
        }
        sanitize(&mut self.profile_name);
        for scene in &mut self.scenes {
            sanitize(&mut scene.name);
            sanitize(&mut scene.avatar.name);
            for entity in &mut scene.entities {
                sanitize(&mut entity.name);
            }
        }
        for sequence in &mut self.sequences {
            sanitize(&mut sequence.name);
            if let Some(scene) = sequence.default_stimulus.scene.as_mut() {
                sanitize(scene);
            }
            for trial in &mut sequence.trials {
                sanitize(&mut trial.name);
                sanitize(&mut trial.scene);
                for intervention in &mut trial.interventions {
                    sanitize(&mut intervention.name);
                    if let (true, InterventionTrigger::Duration { delay }) =
                        (intervention.repeatable, &intervention.trigger)
                    {
                        if *delay <= 0.0 {
                            log::warn!(
                                "{}: repeatable with delay {}, it will fire every tick",
                                intervention.name,
                                delay
                            );
                        }
                    }
                    if let InterventionAction::EditTransform {
                        mode: EditMode::OverFrames { frames },
                        ..
                    } = &mut intervention.action
                    {
                        if *frames < MIN_EDIT_FRAMES {
                            log::warn!(
                                "{}: {} frames below minimum, using {}",
                                intervention.name,
                                frames,
                                MIN_EDIT_FRAMES
                            );
                            *frames = MIN_EDIT_FRAMES;
                        }
                    }
                }
            }
        }
        self
    }

    pub fn scene(&self, name: &str) -> Option<&SceneDescription> {
        self.scenes.iter().find(|s| s.name == name)
    }
}

fn sanitize(name: &mut String) {
    if !is_safe_name(name) {
        let clean = sanitize_name(name);
        log::warn!("Name {:?} contains reserved characters, using {:?}", name, clean);
        *name = clean;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityId;
    use crate::intervention::Intervention;
    use crate::registry::EntitySpec;
    use crate::trial::Trial;
    use crate::types::{PoseDelta, Vec3};

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: ExperimentConfig =
            serde_json::from_str(r#"{ "profile_name": "rig2", "udp_port": 9000 }"#).unwrap();
        assert_eq!(config.udp_port, 9000);
        assert_eq!(config.tracker.frame_height, 240.0);
        assert_eq!(config.fixed_dt, 0.02);
    }

    #[test]
    fn test_validated_raises_minimums() {
        let mut config = ExperimentConfig::default();
        config.tracker.smoothing_window = 2;
        let mut trial = Trial::new("t", "s", 1.0);
        trial.interventions.push(Intervention {
            name: "jump".to_string(),
            entity: EntityId(1),
            action: InterventionAction::EditTransform {
                delta: PoseDelta::default(),
                mode: EditMode::OverFrames { frames: 1 },
            },
            trigger: InterventionTrigger::Duration { delay: 0.0 },
            repeatable: false,
        });
        config.sequences.push(Sequence::new("seq", vec![trial]));

        let config = config.validated();
        assert_eq!(config.tracker.smoothing_window, MIN_WINDOW);
        assert_eq!(
            config.sequences[0].trials[0].interventions[0].action,
            InterventionAction::EditTransform {
                delta: PoseDelta::default(),
                mode: EditMode::OverFrames { frames: MIN_EDIT_FRAMES },
            }
        );
    }

    #[test]
    fn test_validated_sanitizes_names() {
        let mut config = ExperimentConfig::default();
        config.scenes.push(SceneDescription {
            name: "field/a".to_string(),
            avatar: EntitySpec::new(0, "avatar", Vec3::zeros()),
            entities: vec![EntitySpec::new(1, "red,flower", Vec3::zeros())],
        });
        config
            .sequences
            .push(Sequence::new("day 1/2", vec![Trial::new("near,far", "field/a", 1.0)]));

        let config = config.validated();
        assert_eq!(config.scenes[0].name, "field_a");
        assert_eq!(config.scenes[0].entities[0].name, "red_flower");
        assert_eq!(config.sequences[0].name, "day 1_2");
        let trial = &config.sequences[0].trials[0];
        assert_eq!(trial.name, "near_far");
        assert!(config.scene(&trial.scene).is_some());
    }

    #[test]
    fn test_save_then_load() {
        let path = std::env::temp_dir().join(format!("tethered_flight_cfg_{}.json", std::process::id()));
        let config = ExperimentConfig {
            profile_name: "saved".to_string(),
            ..ExperimentConfig::default()
        };
        config.save(&path).unwrap();
        assert_eq!(ExperimentConfig::load(&path).unwrap(), config);
        std::fs::remove_file(path).ok();
    }
}

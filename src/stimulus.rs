//! Stimulus descriptions and the display collaborator
//!
//! Drawing is somebody else's job: the experiment only tells a
//! `StimulusDisplay` what should be on screen.

use serde::{Deserialize, Serialize};

use crate::types::Color32;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum StimulusType {
    #[default]
    Stimulus2D,
    Scene,
    RotatingScene,
}

impl StimulusType {
    pub fn name(&self) -> &'static str {
        match self {
            StimulusType::Stimulus2D => "Stimulus2D",
            StimulusType::Scene => "Scene",
            StimulusType::RotatingScene => "RotatingScene",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim() {
            "Stimulus2D" => Some(StimulusType::Stimulus2D),
            "Scene" => Some(StimulusType::Scene),
            "RotatingScene" => Some(StimulusType::RotatingScene),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum StimulusPattern {
    #[default]
    Blank,
    SineGrating,
}

impl StimulusPattern {
    pub fn name(&self) -> &'static str {
        match self {
            StimulusPattern::Blank => "Blank",
            StimulusPattern::SineGrating => "SineGrating",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim() {
            "Blank" => Some(StimulusPattern::Blank),
            "SineGrating" => Some(StimulusPattern::SineGrating),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StimulusRole {
    Default,
    PreStimulus,
    PostStimulus,
}

/// Pre- or post-stimulus phase of a trial
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StimulusSpec {
    pub kind: StimulusType,
    /// Seconds
    pub duration: f64,
    pub pattern: StimulusPattern,
    pub color: Color32,
    /// Full turns of a rotating scene over the phase
    pub revolutions: f64,
}

impl Default for StimulusSpec {
    fn default() -> Self {
        Self {
            kind: StimulusType::Stimulus2D,
            duration: 1.0,
            pattern: StimulusPattern::Blank,
            color: Color32::BLACK,
            revolutions: 0.0,
        }
    }
}

impl StimulusSpec {
    pub fn blank(duration: f64) -> Self {
        Self {
            duration,
            ..Self::default()
        }
    }
}

/// What is shown between trials and after a sequence
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DefaultStimulus {
    pub name: String,
    pub kind: StimulusType,
    pub pattern: StimulusPattern,
    pub color: Color32,
    pub scene: Option<String>,
    /// Spin period of a `RotatingScene` default
    pub seconds_per_revolution: f64,
}

impl Default for DefaultStimulus {
    fn default() -> Self {
        Self {
            name: "Default".to_string(),
            kind: StimulusType::Stimulus2D,
            pattern: StimulusPattern::Blank,
            color: Color32::BLACK,
            scene: None,
            seconds_per_revolution: 0.0,
        }
    }
}

pub trait StimulusDisplay: Send {
    fn show_stimulus(&mut self, role: StimulusRole, spec: &StimulusSpec);
    fn show_default(&mut self, stimulus: &DefaultStimulus);
    fn load_scene(&mut self, scene: &str);
    fn hide_stimulus(&mut self);
    /// Current yaw of a rotating scene, in degrees
    fn rotate_scene(&mut self, yaw_deg: f64);
}

/// Display that only logs what it was asked to show
#[derive(Debug, Default)]
pub struct LoggingDisplay {
    pub shown: Vec<String>,
    pub scene_yaw: f64,
}

impl StimulusDisplay for LoggingDisplay {
    fn show_stimulus(&mut self, role: StimulusRole, spec: &StimulusSpec) {
        log::info!(
            "Display {:?}: {} {} for {:.2}s",
            role,
            spec.kind.name(),
            spec.pattern.name(),
            spec.duration
        );
        self.shown.push(format!("{:?}", role));
    }

    fn show_default(&mut self, stimulus: &DefaultStimulus) {
        log::info!("Display default stimulus {}", stimulus.name);
        self.shown.push("Default".to_string());
    }

    fn load_scene(&mut self, scene: &str) {
        log::info!("Display scene {}", scene);
        self.shown.push(format!("Scene:{}", scene));
    }

    fn hide_stimulus(&mut self) {
        log::debug!("Display stimulus hidden");
        self.shown.push("Hidden".to_string());
    }

    fn rotate_scene(&mut self, yaw_deg: f64) {
        log::trace!("Display scene yaw {:.2}", yaw_deg);
        self.scene_yaw = yaw_deg;
    }
}

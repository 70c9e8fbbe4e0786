//! Closed-loop virtual reality for a tethered flying animal.
//!
//! Tracked wing landmarks arrive as UDP text, become wing-beat angles, and
//! steer an avatar through a scene while a trial/sequence state machine runs
//! stimuli, scripted interventions and proximity checks. Every trial is
//! recorded per entity and can be replayed frame for frame.

pub mod approach;
pub mod behaviour;
pub mod config;
pub mod entity;
pub mod error;
pub mod experiment;
pub mod ingest;
pub mod interpolation;
pub mod intervention;
pub mod kinematics;
pub mod live_status;
pub mod motion_model;
pub mod packet;
pub mod packet_log;
pub mod proximity;
pub mod recorder;
pub mod registry;
pub mod replay;
pub mod scheduler;
pub mod sequence;
pub mod smoothing;
pub mod stimulus;
pub mod trial;
pub mod trial_log;
pub mod types;

pub use config::ExperimentConfig;
pub use error::{ExperimentError, Result};
pub use experiment::{Command, Experiment, ExperimentEvent};

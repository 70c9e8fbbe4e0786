//! Record a live trial to disk, then replay the files back through the registry.

use std::fs;
use std::path::PathBuf;

use tethered_flight::entity::{EntityId, MotionAuthority};
use tethered_flight::motion_model::{MotionConfig, ResponseCurve};
use tethered_flight::recorder::{RecordedRow, TransformLog};
use tethered_flight::registry::{EntityRegistry, EntitySpec, SceneDescription};
use tethered_flight::replay::{find_by_suffix, ReplaySession, ReplayTick};
use tethered_flight::sequence::Sequence;
use tethered_flight::stimulus::{LoggingDisplay, StimulusSpec};
use tethered_flight::trial::{CompletedBy, LoopStatus, Trial};
use tethered_flight::types::{Pose, Vec3};
use tethered_flight::{Command, Experiment, ExperimentConfig};

const DT: f64 = 0.02;
const AVATAR: EntityId = EntityId(0);

const PACKET: &str =
    "0,100,120;1,40,80;2,220,120;3,270,60;4,160,200;5,160,100;20240101_120000.000001;20240101_120000.000900;";

fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("tethered_flight_{}_{}", name, std::process::id()));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).unwrap();
    dir
}

fn scene() -> SceneDescription {
    SceneDescription {
        name: "meadow".to_string(),
        avatar: EntitySpec::new(0, "avatar", Vec3::new(0.0, 1.5, 0.0)),
        entities: vec![
            EntitySpec::new(3, "flower", Vec3::new(2.0, 0.0, 6.0)),
            EntitySpec::new(4, "stone", Vec3::new(-1.0, 0.0, 3.0)).hidden(),
        ],
    }
}

fn config(output_dir: PathBuf) -> ExperimentConfig {
    let mut trial = Trial::new("glide", "meadow", 1.0);
    trial.pre_stimulus = StimulusSpec::blank(0.2);
    trial.post_stimulus = StimulusSpec::blank(0.2);
    ExperimentConfig {
        output_dir,
        save_data: true,
        motion: MotionConfig {
            yaw: ResponseCurve::Constant { value: 30.0 },
            thrust: ResponseCurve::Constant { value: 0.7 },
            invert_turn: false,
        },
        scenes: vec![scene()],
        sequences: vec![Sequence::new("roundtrip", vec![trial])],
        ..ExperimentConfig::default()
    }
}

/// Run the single trial, returning the avatar pose after every captured frame
fn record(experiment: &mut Experiment) -> Vec<Pose> {
    experiment.command(Command::Start);
    let mut poses = Vec::new();
    for _ in 0..500 {
        if experiment.status() == LoopStatus::LoopClosed {
            experiment.handle_packet(PACKET);
        }
        experiment.fixed_update(DT);
        let capturing = experiment.status() != LoopStatus::BetweenTrials;
        experiment.render_frame(DT);
        if capturing {
            poses.push(experiment.registry().get(AVATAR).unwrap().pose);
        }
        if !experiment.is_running() {
            break;
        }
    }
    poses
}

#[test]
fn test_record_then_replay_reproduces_poses() {
    let _ = env_logger::builder().is_test(true).try_init();
    let out = scratch_dir("roundtrip");
    let mut experiment = Experiment::new(config(out.clone()), Box::new(LoggingDisplay::default()));
    let live = record(&mut experiment);
    assert!(!experiment.is_running());
    assert!(live.len() > 50);

    let trial_dir = out.join("roundtrip").join("0_glide");
    assert!(find_by_suffix(&trial_dir, "_DLC-Data.csv").is_ok());

    // The avatar file holds exactly the live samples, text for text
    let avatar_log = TransformLog::read(&find_by_suffix(&trial_dir, "_0.Transform.csv").unwrap()).unwrap();
    let recorded: Vec<String> = avatar_log
        .rows
        .iter()
        .filter(|r| r.is_sample())
        .map(|r| r.to_line())
        .collect();
    let expected: Vec<String> = live
        .iter()
        .map(|pose| RecordedRow::Sample { pose: *pose, dt: DT }.to_line())
        .collect();
    assert_eq!(recorded, expected);

    let session = ReplaySession::load(&trial_dir).unwrap();
    assert_eq!(session.sequence.sequence_name, "roundtrip");
    assert_eq!(session.record.trial.name, "glide");
    assert_eq!(session.record.completed_by, Some(CompletedBy::Duration));

    let mut registry = EntityRegistry::new();
    registry.load_scene(&scene()).unwrap();
    let mut replayer = session.load_streams(&registry).unwrap();
    replayer.begin(&mut registry).unwrap();
    assert_eq!(registry.get(AVATAR).unwrap().authority(), MotionAuthority::Replay);

    let rows = avatar_log.rows.len();
    assert_eq!(replayer.stream_len(AVATAR), Some(rows));
    let mut replayed = Vec::new();
    for row in &avatar_log.rows {
        assert_eq!(replayer.tick(&mut registry), ReplayTick::Playing);
        if row.is_sample() {
            replayed.push(registry.get(AVATAR).unwrap().pose);
        }
    }
    assert_eq!(replayed, live);

    assert_eq!(replayer.tick(&mut registry), ReplayTick::Ended);
    assert_eq!(replayer.tick(&mut registry), ReplayTick::Finished);
    assert_eq!(replayer.ticks(), rows + 1);

    // The hidden stone stays hidden; nothing in the trial showed it
    assert!(!registry.get(EntityId(4)).unwrap().visible);
    replayer.release(&mut registry);
    assert_eq!(registry.get(AVATAR).unwrap().authority(), MotionAuthority::Unowned);

    fs::remove_dir_all(out).ok();
}

#[test]
fn test_missing_trial_folder_is_reported() {
    let out = scratch_dir("missing");
    let result = ReplaySession::load(&out.join("roundtrip").join("0_nothing"));
    assert!(result.is_err());
    fs::remove_dir_all(out).ok();
}

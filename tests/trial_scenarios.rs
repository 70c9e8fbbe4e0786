//! Whole-trial runs against `Experiment` with a scripted avatar.
//!
//! The avatar flies straight along +Z at a constant thrust, so the time it
//! reaches an entity is known in advance.

use approx::assert_abs_diff_eq;
use tethered_flight::entity::EntityId;
use tethered_flight::interpolation::{
    Interpolation, InterpolationMethod, InterpolationTarget, ObjectOption, SettingOption,
};
use tethered_flight::intervention::{Intervention, InterventionAction, InterventionTrigger};
use tethered_flight::motion_model::{MotionConfig, ResponseCurve};
use tethered_flight::registry::{EntitySpec, SceneDescription};
use tethered_flight::sequence::Sequence;
use tethered_flight::stimulus::{LoggingDisplay, StimulusSpec};
use tethered_flight::trial::{CompletedBy, CompletionPolicy, EntityChange, LoopStatus, Trial};
use tethered_flight::types::Vec3;
use tethered_flight::{Command, Experiment, ExperimentConfig, ExperimentEvent};

const DT: f64 = 0.02;
const TARGET: EntityId = EntityId(1);

fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn config(thrust: f64, sequence: Sequence) -> ExperimentConfig {
    ExperimentConfig {
        save_data: false,
        fixed_dt: DT,
        motion: MotionConfig {
            yaw: ResponseCurve::Constant { value: 0.0 },
            thrust: ResponseCurve::Constant { value: thrust },
            invert_turn: false,
        },
        scenes: vec![SceneDescription {
            name: "corridor".to_string(),
            avatar: EntitySpec::new(0, "avatar", Vec3::zeros()),
            entities: vec![EntitySpec::new(TARGET.0, "landmark", Vec3::new(0.0, 0.0, 5.0))],
        }],
        sequences: vec![sequence],
        ..ExperimentConfig::default()
    }
}

/// Ten second trial that may end when the avatar holds within 1 m of the landmark for 0.5 s
fn proximity_trial(name: &str) -> Trial {
    let mut trial = Trial::new(name, "corridor", 10.0);
    trial.completion = CompletionPolicy::DurationOrProximity;
    trial.pre_stimulus = StimulusSpec::blank(0.1);
    trial.post_stimulus = StimulusSpec::blank(0.1);
    trial.entity_changes.push(EntityChange {
        entity: TARGET,
        position_delta: Vec3::zeros(),
        proximity: 1.0,
        proximity_duration: 0.5,
    });
    trial
}

fn start(config: ExperimentConfig) -> Experiment {
    let mut experiment = Experiment::new(config, Box::new(LoggingDisplay::default()));
    experiment.command(Command::Start);
    experiment
}

/// Run until `done` or the time limit; returns every event seen
fn run_until(
    experiment: &mut Experiment,
    limit: f64,
    mut done: impl FnMut(&Experiment) -> bool,
) -> Vec<ExperimentEvent> {
    let mut events = experiment.take_events();
    let steps = (limit / DT).ceil() as usize;
    for _ in 0..steps {
        experiment.fixed_update(DT);
        experiment.render_frame(DT);
        events.extend(experiment.take_events());
        if done(experiment) {
            break;
        }
    }
    events
}

fn completions(events: &[ExperimentEvent]) -> Vec<CompletedBy> {
    events
        .iter()
        .filter_map(|e| match e {
            ExperimentEvent::TrialCompleted { by, .. } => Some(*by),
            _ => None,
        })
        .collect()
}

#[test]
fn test_slow_avatar_completes_by_duration() {
    init_logs();
    let mut experiment = start(config(0.3, Sequence::new("slow", vec![proximity_trial("t0")])));

    let events = run_until(&mut experiment, 12.0, |_| false);
    assert_eq!(completions(&events), vec![CompletedBy::Duration]);

    // 10 s at 0.3 m/s leaves the avatar 2 m short; it only moves while the loop is closed
    let distance = experiment.registry().distance(EntityId(0), TARGET).unwrap();
    assert_abs_diff_eq!(distance, 2.0, epsilon = 0.05);
    assert!(events.contains(&ExperimentEvent::AllSequencesFinished));
}

#[test]
fn test_fast_avatar_completes_by_proximity() {
    init_logs();
    let mut experiment = start(config(1.0, Sequence::new("fast", vec![proximity_trial("t0")])));

    let mut closed_at = None;
    let mut completed_at = None;
    let mut events = experiment.take_events();
    for _ in 0..(12.0 / DT) as usize {
        experiment.fixed_update(DT);
        let new_events = experiment.take_events();
        for event in &new_events {
            match event {
                ExperimentEvent::LoopClosed { .. } => closed_at = Some(experiment.now()),
                ExperimentEvent::TrialCompleted { .. } => completed_at = Some(experiment.now()),
                _ => {}
            }
        }
        events.extend(new_events);
        if experiment.status() == LoopStatus::BetweenTrials {
            break;
        }
    }

    assert_eq!(completions(&events), vec![CompletedBy::Proximity]);
    // 4 m to close at 1 m/s, then the 0.5 s dwell
    let loop_time = completed_at.unwrap() - closed_at.unwrap();
    assert_abs_diff_eq!(loop_time, 4.5, epsilon = 3.0 * DT);
    assert_eq!(experiment.completed_by(), Some(CompletedBy::Proximity));
}

#[test]
fn test_proximity_ignored_under_duration_policy() {
    init_logs();
    let mut trial = proximity_trial("t0");
    trial.completion = CompletionPolicy::Duration;
    trial.duration = 6.0;
    let mut experiment = start(config(1.0, Sequence::new("policy", vec![trial])));

    let events = run_until(&mut experiment, 8.0, |e| e.status() == LoopStatus::BetweenTrials);
    assert_eq!(completions(&events), vec![CompletedBy::Duration]);
}

#[test]
fn test_skip_moves_to_next_trial() {
    init_logs();
    let sequence = Sequence::new("skips", vec![proximity_trial("a"), proximity_trial("b")]);
    let mut experiment = start(config(0.0, sequence));
    run_until(&mut experiment, 1.0, |e| e.status() == LoopStatus::LoopClosed);
    assert_eq!(experiment.status(), LoopStatus::LoopClosed);

    experiment.command(Command::Skip);
    assert_eq!(experiment.status(), LoopStatus::PostStim);
    let events = run_until(&mut experiment, 1.0, |e| e.status() == LoopStatus::PreStim);

    assert_eq!(experiment.current_trial().map(|(_, idx, name)| (idx, name.to_string())), Some((1, "b".to_string())));
    assert!(events.iter().any(|e| matches!(
        e,
        ExperimentEvent::TrialStarted { index: 1, .. }
    )));
}

#[test]
fn test_stop_abandons_rest_of_sequence() {
    init_logs();
    let trials = vec![proximity_trial("a"), proximity_trial("b"), proximity_trial("c")];
    let mut experiment = start(config(0.0, Sequence::new("stops", trials)));
    run_until(&mut experiment, 1.0, |e| e.status() == LoopStatus::LoopClosed);

    experiment.command(Command::Stop);
    let mut events = experiment.take_events();
    events.extend(run_until(&mut experiment, 2.0, |e| !e.is_running()));

    assert_eq!(completions(&events), vec![CompletedBy::Stop]);
    assert!(events.contains(&ExperimentEvent::SequenceFinished {
        name: "stops".to_string(),
        trials_run: 1,
    }));
    assert!(!experiment.is_running());
}

#[test]
fn test_interpolations_across_trials() {
    init_logs();
    let mut sequence = Sequence::new(
        "interp",
        vec![proximity_trial("a"), proximity_trial("b"), proximity_trial("c")],
    );
    sequence.interpolations = vec![
        Interpolation {
            name: "slide".to_string(),
            target: InterpolationTarget::Object {
                entity: TARGET,
                option: ObjectOption::PositionX,
            },
            start: 0.0,
            end: 2.0,
            method: InterpolationMethod::Linear,
        },
        Interpolation {
            name: "shorten".to_string(),
            target: InterpolationTarget::Setting(SettingOption::TrialDuration),
            start: 0.5,
            end: 0.1,
            method: InterpolationMethod::Linear,
        },
    ];
    let mut experiment = start(config(0.0, sequence));

    let mut offsets = Vec::new();
    let mut seen = None;
    for _ in 0..(10.0 / DT) as usize {
        if let Some((_, idx, _)) = experiment.current_trial() {
            if seen != Some(idx) && experiment.status() == LoopStatus::PreStim {
                seen = Some(idx);
                let x = experiment.registry().get(TARGET).unwrap().pose.position.x;
                offsets.push(x);
            }
        }
        experiment.fixed_update(DT);
        if !experiment.is_running() {
            break;
        }
    }

    assert_eq!(offsets.len(), 3);
    assert_abs_diff_eq!(offsets[0], 0.0, epsilon = 1e-12);
    assert_abs_diff_eq!(offsets[1], 1.0, epsilon = 1e-12);
    assert_abs_diff_eq!(offsets[2], 2.0, epsilon = 1e-12);
}

#[test]
fn test_hide_intervention_fires_after_delay() {
    init_logs();
    let mut trial = proximity_trial("t0");
    trial.completion = CompletionPolicy::Duration;
    trial.duration = 2.0;
    trial.interventions.push(Intervention {
        name: "vanish".to_string(),
        entity: TARGET,
        action: InterventionAction::Hide,
        trigger: InterventionTrigger::Duration { delay: 0.5 },
        repeatable: false,
    });
    let mut experiment = start(config(0.0, Sequence::new("hide", vec![trial])));

    run_until(&mut experiment, 1.0, |e| e.status() == LoopStatus::LoopClosed);
    assert!(experiment.registry().get(TARGET).unwrap().visible);
    run_until(&mut experiment, 0.4, |_| false);
    assert!(experiment.registry().get(TARGET).unwrap().visible);
    run_until(&mut experiment, 0.2, |_| false);
    assert!(!experiment.registry().get(TARGET).unwrap().visible);
    assert_eq!(experiment.interventions().fired(), 1);
}

//! End-to-end tuning scenarios.

use at_tuner::{Tuner, TuningState};
use at_types::{Dataset, ExecutionMode, Problem, SamplerKind, SearchKind, Space, TuningOptions};

fn shifted_bowls() -> Problem {
    Problem::new(
        "shifted_bowls",
        Space::new().add_real("shift", 0.2, 0.6),
        Space::new().add_real("x", 0.0, 1.0),
        |t, x| (x[0] - t[0]).powi(2),
    )
}

#[test]
fn two_tasks_on_shared_memory_pool() {
    let options = TuningOptions::default()
        .with_execution(ExecutionMode::SharedMemory)
        .with_threads(2)
        .with_restarts(4)
        .with_max_iters(300)
        .with_seed(21);
    let mut tuner = Tuner::new(shifted_bowls(), options).unwrap();
    let (data, model) = tuner.run(8, Some(2), None).unwrap();

    assert_eq!(data.task_count(), 2);
    for task in 0..2 {
        assert_eq!(data.sample_count(task), 8);
        let prediction = model.predict(&[0.5], task).unwrap();
        assert!(prediction.mean.is_finite());
    }
    assert_eq!(tuner.status().state, TuningState::Completed);
    assert_eq!(tuner.status().rounds_completed, 5);
}

#[test]
fn constrained_problem_only_samples_feasible_points() {
    let problem = shifted_bowls().with_constraint(|_, x| x.map_or(true, |x| x[0] <= 0.5));
    let options = TuningOptions::default()
        .with_sampler(SamplerKind::Random)
        .with_restarts(2)
        .with_max_iters(200)
        .with_seed(3);
    let mut tuner = Tuner::new(problem, options).unwrap();
    let (data, _) = tuner.run(6, Some(1), Some(3)).unwrap();

    assert!(data.parameters()[0].iter().all(|x| x[0] <= 0.5));
}

#[test]
fn resumed_run_keeps_history_in_order() {
    let options = TuningOptions::default()
        .with_search(SearchKind::Random)
        .with_restarts(1)
        .with_max_iters(200)
        .with_seed(5);
    let mut first = Tuner::new(shifted_bowls(), options.clone()).unwrap();
    let (history, _) = first.run(4, Some(1), Some(2)).unwrap();

    let mut second = Tuner::new(shifted_bowls(), options).unwrap().with_data(history.clone());
    let (extended, _) = second.run(6, None, None).unwrap();

    assert_eq!(extended.sample_count(0), 6);
    assert!((extended.tasks()[0][0] - history.tasks()[0][0]).abs() < 1e-12);
    for (old, new) in history.parameters()[0].iter().zip(&extended.parameters()[0]) {
        assert!((old[0] - new[0]).abs() < 1e-12);
    }
    assert_eq!(&extended.objectives()[0][..4], &history.objectives()[0][..]);
}

#[test]
fn saved_results_reload() {
    let options = TuningOptions::default().with_restarts(1).with_max_iters(200).with_seed(8);
    let mut tuner = Tuner::new(shifted_bowls(), options).unwrap();
    let (data, _) = tuner.run(4, Some(1), Some(2)).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("history.json");
    data.save(&path).unwrap();
    assert_eq!(Dataset::load(&path).unwrap(), data);
}

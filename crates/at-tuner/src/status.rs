//! Run status tracking for a tuning session.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique tuning run identifier.
pub type RunId = Uuid;

/// Lifecycle state for a tuning run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TuningState {
    Pending,
    Running,
    Completed,
    Failed,
}

/// Lowest objective seen so far for one task, in user space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BestSample {
    pub task: usize,
    pub parameters: Vec<f64>,
    pub objective: f64,
    pub found_in_round: usize,
}

/// Aggregate status of a tuning run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TuningStatus {
    pub id: RunId,
    pub problem: String,
    pub state: TuningState,
    /// Total samples per task the run is asked to reach.
    pub budget: usize,
    pub rounds_completed: usize,
    pub samples_evaluated: usize,
    /// Best sample per task, indexed by task.
    pub best: Vec<Option<BestSample>>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl TuningStatus {
    pub fn new(problem: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            problem: problem.into(),
            state: TuningState::Pending,
            budget: 0,
            rounds_completed: 0,
            samples_evaluated: 0,
            best: Vec::new(),
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            error: None,
        }
    }

    pub fn mark_running(&mut self, budget: usize) {
        self.state = TuningState::Running;
        self.budget = budget;
        self.started_at = Some(Utc::now());
        self.finished_at = None;
        self.error = None;
    }

    pub fn mark_completed(&mut self) {
        self.state = TuningState::Completed;
        self.finished_at = Some(Utc::now());
    }

    pub fn mark_failed(&mut self, error: String) {
        self.state = TuningState::Failed;
        self.finished_at = Some(Utc::now());
        self.error = Some(error);
    }

    pub fn record_round(&mut self) {
        self.rounds_completed += 1;
    }

    /// Count one evaluated sample and keep it if it improves on the task's
    /// best. Non-finite objectives are counted but never kept.
    pub fn record_sample(&mut self, task: usize, parameters: &[f64], objective: f64) {
        self.samples_evaluated += 1;
        if !objective.is_finite() {
            return;
        }
        if self.best.len() <= task {
            self.best.resize(task + 1, None);
        }
        let improves = match &self.best[task] {
            None => true,
            Some(current) => objective < current.objective,
        };
        if improves {
            self.best[task] = Some(BestSample {
                task,
                parameters: parameters.to_vec(),
                objective,
                found_in_round: self.rounds_completed,
            });
        }
    }

    pub fn best_for(&self, task: usize) -> Option<&BestSample> {
        self.best.get(task).and_then(Option::as_ref)
    }

    /// Wall-clock duration of the run, if it has started.
    pub fn elapsed(&self) -> Option<chrono::Duration> {
        let start = self.started_at?;
        Some(self.finished_at.unwrap_or_else(Utc::now) - start)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tuning_status_lifecycle() {
        let mut status = TuningStatus::new("gemm");
        assert_eq!(status.state, TuningState::Pending);
        assert!(status.started_at.is_none());

        status.mark_running(20);
        assert_eq!(status.state, TuningState::Running);
        assert_eq!(status.budget, 20);
        assert!(status.started_at.is_some());

        status.mark_completed();
        assert_eq!(status.state, TuningState::Completed);
        assert!(status.finished_at.is_some());
        assert!(status.elapsed().unwrap() >= chrono::Duration::zero());
    }

    #[test]
    fn best_tracking_minimizes_per_task() {
        let mut status = TuningStatus::new("gemm");
        status.record_sample(1, &[0.5], 0.15);
        assert!(status.best_for(0).is_none());
        assert_eq!(status.best_for(1).unwrap().objective, 0.15);

        status.record_round();
        status.record_sample(1, &[0.4], 0.05);
        let best = status.best_for(1).unwrap();
        assert_eq!(best.objective, 0.05);
        assert_eq!(best.parameters, vec![0.4]);
        assert_eq!(best.found_in_round, 1);

        // Worse result should not replace
        status.record_sample(1, &[0.9], 0.5);
        assert_eq!(status.best_for(1).unwrap().objective, 0.05);
        assert_eq!(status.samples_evaluated, 3);
    }

    #[test]
    fn non_finite_objectives_are_counted_not_kept() {
        let mut status = TuningStatus::new("gemm");
        status.record_sample(0, &[0.1], f64::INFINITY);
        assert_eq!(status.samples_evaluated, 1);
        assert!(status.best_for(0).is_none());
    }

    #[test]
    fn status_serializes_for_reporting() {
        let mut status = TuningStatus::new("gemm");
        status.mark_running(4);
        status.record_sample(0, &[64.0, 8.0], 1.25);
        let json = serde_json::to_string(&status).unwrap();
        let back: TuningStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(back, status);
    }

    #[test]
    fn failure_records_error() {
        let mut status = TuningStatus::new("gemm");
        status.mark_running(10);
        status.mark_failed("all restarts failed".into());
        assert_eq!(status.state, TuningState::Failed);
        assert_eq!(status.error.as_deref(), Some("all restarts failed"));
    }
}

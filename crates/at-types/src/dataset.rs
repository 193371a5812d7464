//! Per-task sample history: tasks `T`, parameter vectors `X[i]` and objective
//! values `Y[i]`.
//!
//! The three sequences are indexed by task. A dataset is built in stages
//! (tasks, then parameters, then objectives) and afterwards only grows
//! through [`Dataset::merge`].

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::errors::{DatasetError, TuneResult};

/// A point in the input (task) or parameter space.
pub type Point = Vec<f64>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    tasks: Vec<Point>,
    parameters: Vec<Vec<Point>>,
    objectives: Vec<Vec<f64>>,
}

impl Dataset {
    /// An empty dataset with no tasks.
    pub fn new() -> Self {
        Self::default()
    }

    /// A dataset holding only tasks, no samples yet.
    pub fn with_tasks(tasks: Vec<Point>) -> Self {
        Self {
            tasks,
            parameters: Vec::new(),
            objectives: Vec::new(),
        }
    }

    /// A fully populated dataset; shapes are validated.
    pub fn from_parts(
        tasks: Vec<Point>,
        parameters: Vec<Vec<Point>>,
        objectives: Vec<Vec<f64>>,
    ) -> Result<Self, DatasetError> {
        let data = Self {
            tasks,
            parameters,
            objectives,
        };
        data.validate()?;
        Ok(data)
    }

    pub fn tasks(&self) -> &[Point] {
        &self.tasks
    }

    pub fn parameters(&self) -> &[Vec<Point>] {
        &self.parameters
    }

    pub fn objectives(&self) -> &[Vec<f64>] {
        &self.objectives
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    pub fn has_tasks(&self) -> bool {
        !self.tasks.is_empty()
    }

    pub fn has_parameters(&self) -> bool {
        !self.parameters.is_empty()
    }

    pub fn has_objectives(&self) -> bool {
        !self.objectives.is_empty()
    }

    /// Number of parameter vectors recorded for `task` (0 if none).
    pub fn sample_count(&self, task: usize) -> usize {
        self.parameters.get(task).map_or(0, Vec::len)
    }

    /// Combined number of parameter vectors across all tasks.
    pub fn total_samples(&self) -> usize {
        self.parameters.iter().map(Vec::len).sum()
    }

    pub fn set_tasks(&mut self, tasks: Vec<Point>) -> Result<(), DatasetError> {
        if self.has_parameters() && tasks.len() != self.parameters.len() {
            return Err(DatasetError::TaskCountMismatch {
                expected: self.parameters.len(),
                actual: tasks.len(),
            });
        }
        self.tasks = tasks;
        Ok(())
    }

    /// Install the per-task parameter sequences. One sequence per task.
    pub fn set_parameters(&mut self, parameters: Vec<Vec<Point>>) -> Result<(), DatasetError> {
        if parameters.len() != self.tasks.len() {
            return Err(DatasetError::TaskCountMismatch {
                expected: self.tasks.len(),
                actual: parameters.len(),
            });
        }
        self.parameters = parameters;
        Ok(())
    }

    /// Install the per-task objective sequences, matching the parameter
    /// sequences one to one.
    pub fn set_objectives(&mut self, objectives: Vec<Vec<f64>>) -> Result<(), DatasetError> {
        if objectives.len() != self.parameters.len() {
            return Err(DatasetError::TaskCountMismatch {
                expected: self.parameters.len(),
                actual: objectives.len(),
            });
        }
        for (task, (x, y)) in self.parameters.iter().zip(&objectives).enumerate() {
            if x.len() != y.len() {
                return Err(DatasetError::SampleCountMismatch {
                    task,
                    parameters: x.len(),
                    objectives: y.len(),
                });
            }
        }
        self.objectives = objectives;
        Ok(())
    }

    /// Check `len(T) == len(X) == len(Y)` and `len(X[i]) == len(Y[i])`.
    pub fn validate(&self) -> Result<(), DatasetError> {
        if self.parameters.len() != self.tasks.len() {
            return Err(DatasetError::TaskCountMismatch {
                expected: self.tasks.len(),
                actual: self.parameters.len(),
            });
        }
        if self.objectives.len() != self.tasks.len() {
            return Err(DatasetError::TaskCountMismatch {
                expected: self.tasks.len(),
                actual: self.objectives.len(),
            });
        }
        for (task, (x, y)) in self.parameters.iter().zip(&self.objectives).enumerate() {
            if x.len() != y.len() {
                return Err(DatasetError::SampleCountMismatch {
                    task,
                    parameters: x.len(),
                    objectives: y.len(),
                });
            }
        }
        Ok(())
    }

    /// Append `delta`'s samples onto this dataset.
    ///
    /// Tasks are matched by index: for every index present in both, the
    /// delta's parameter/objective entries are appended in arrival order.
    /// Tasks beyond this dataset's length are appended as new tasks.
    pub fn merge(&mut self, delta: &Dataset) -> Result<(), DatasetError> {
        self.validate()?;
        delta.validate()?;

        let shared = self.tasks.len().min(delta.tasks.len());
        for task in 0..shared {
            self.parameters[task].extend(delta.parameters[task].iter().cloned());
            self.objectives[task].extend(delta.objectives[task].iter().copied());
        }
        for task in shared..delta.tasks.len() {
            self.tasks.push(delta.tasks[task].clone());
            self.parameters.push(delta.parameters[task].clone());
            self.objectives.push(delta.objectives[task].clone());
        }
        Ok(())
    }

    /// Lowest objective recorded for `task`, with its parameter vector.
    pub fn best(&self, task: usize) -> Option<(&[f64], f64)> {
        let x = self.parameters.get(task)?;
        let y = self.objectives.get(task)?;
        x.iter()
            .zip(y)
            .filter(|(_, value)| value.is_finite())
            .min_by(|a, b| a.1.total_cmp(b.1))
            .map(|(point, &value)| (point.as_slice(), value))
    }

    /// Rewrite every task and parameter vector in place.
    ///
    /// Used at the loop boundary to move between user and normalized space.
    pub fn map_points<T, P>(&mut self, task_map: T, parameter_map: P)
    where
        T: Fn(&[f64]) -> Point,
        P: Fn(&[f64]) -> Point,
    {
        for task in &mut self.tasks {
            *task = task_map(task);
        }
        for sequence in &mut self.parameters {
            for point in sequence.iter_mut() {
                *point = parameter_map(point);
            }
        }
    }

    /// Persist as JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> TuneResult<()> {
        let file = std::fs::File::create(path)?;
        serde_json::to_writer_pretty(std::io::BufWriter::new(file), self)?;
        Ok(())
    }

    /// Load a dataset previously written by [`Dataset::save`].
    pub fn load(path: impl AsRef<Path>) -> TuneResult<Self> {
        let file = std::fs::File::open(path)?;
        let data: Self = serde_json::from_reader(std::io::BufReader::new(file))?;
        if data.has_objectives() {
            data.validate()?;
        }
        Ok(data)
    }
}

//! Interfaces the tuning loop drives: samplers, search engines, the
//! evaluator and the coordinate transform.
//!
//! Samplers and search engines work in the normalized unit hypercube. The
//! computer receives normalized points and maps them back to user space
//! before calling into the problem.

use tracing::debug;

use at_model::SurrogateModel;
use at_types::{Dataset, Point, Problem, Space, TuneError, TuneResult};

/// Feasibility of a normalized task vector.
pub type TaskCheck<'a> = dyn Fn(&[f64]) -> bool + 'a;

/// Feasibility of a normalized `(task, parameters)` pair.
pub type ParameterCheck<'a> = dyn Fn(&[f64], &[f64]) -> bool + 'a;

/// Mapping between user space and the normalized modeling space.
pub trait Transformer {
    fn normalize(&self, point: &[f64]) -> Point;

    fn denormalize(&self, point: &[f64]) -> Point;
}

impl Transformer for Space {
    fn normalize(&self, point: &[f64]) -> Point {
        Space::normalize(self, point)
    }

    fn denormalize(&self, point: &[f64]) -> Point {
        Space::denormalize(self, point)
    }
}

/// Proposes initial tasks and parameter vectors.
pub trait Sampler: Send + Sync {
    fn name(&self) -> &'static str;

    /// `n` feasible tasks in the normalized input space.
    fn sample_tasks(
        &self,
        n: usize,
        input_space: &Space,
        check: &TaskCheck<'_>,
    ) -> TuneResult<Vec<Point>>;

    /// `n` feasible parameter vectors for each of `tasks`.
    fn sample_parameters(
        &self,
        n: usize,
        tasks: &[Point],
        parameter_space: &Space,
        check: &ParameterCheck<'_>,
    ) -> TuneResult<Vec<Vec<Point>>>;
}

/// Proposes the next candidate for every task given a trained model.
pub trait SearchEngine: Send + Sync {
    fn name(&self) -> &'static str;

    /// Exactly one feasible candidate per task, in task order.
    fn propose(
        &self,
        data: &Dataset,
        model: &dyn SurrogateModel,
        check: &ParameterCheck<'_>,
    ) -> TuneResult<Vec<Point>>;
}

/// Evaluates objectives and constraints.
pub trait Computer: Send + Sync {
    /// Objective values for `parameters[i]` under `tasks[i]`, both normalized.
    fn evaluate(
        &self,
        problem: &Problem,
        tasks: &[Point],
        parameters: &[Vec<Point>],
    ) -> TuneResult<Vec<Vec<f64>>>;

    /// Constraint check on a normalized task, optionally with parameters.
    fn evaluate_constraints(
        &self,
        problem: &Problem,
        task: &[f64],
        parameters: Option<&[f64]>,
    ) -> bool;
}

/// Evaluates the problem's objective in-process, one point at a time.
#[derive(Debug, Clone, Default)]
pub struct LocalComputer;

impl LocalComputer {
    pub fn new() -> Self {
        Self
    }
}

impl Computer for LocalComputer {
    fn evaluate(
        &self,
        problem: &Problem,
        tasks: &[Point],
        parameters: &[Vec<Point>],
    ) -> TuneResult<Vec<Vec<f64>>> {
        if tasks.len() != parameters.len() {
            return Err(TuneError::Evaluation(format!(
                "{} tasks but {} parameter sequences",
                tasks.len(),
                parameters.len()
            )));
        }

        let mut objectives = Vec::with_capacity(tasks.len());
        for (index, (task, points)) in tasks.iter().zip(parameters).enumerate() {
            let task = problem.input_space.denormalize(task);
            let mut values = Vec::with_capacity(points.len());
            for point in points {
                let point = problem.parameter_space.denormalize(point);
                let value = problem.objective(&task, &point);
                if value.is_nan() {
                    return Err(TuneError::Evaluation(format!(
                        "objective returned NaN for task {index} at {point:?}"
                    )));
                }
                values.push(value);
            }
            debug!(task = index, samples = values.len(), "objective evaluated");
            objectives.push(values);
        }
        Ok(objectives)
    }

    fn evaluate_constraints(
        &self,
        problem: &Problem,
        task: &[f64],
        parameters: Option<&[f64]>,
    ) -> bool {
        let task = problem.input_space.denormalize(task);
        match parameters {
            Some(point) => {
                let point = problem.parameter_space.denormalize(point);
                problem.satisfiable(&task, Some(&point))
            }
            None => problem.satisfiable(&task, None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn problem() -> Problem {
        let input = Space::new().add_integer("n", 100, 200);
        let params = Space::new().add_real("x", -1.0, 1.0);
        Problem::new("shifted", input, params, |t, x| t[0] + x[0])
            .with_constraint(|t, x| t[0] < 190.0 && x.map_or(true, |x| x[0] <= 0.5))
    }

    #[test]
    fn space_is_a_transformer() {
        let space = Space::new().add_real("x", 2.0, 4.0);
        let t: &dyn Transformer = &space;
        assert_eq!(t.normalize(&[3.0]), vec![0.5]);
        assert_eq!(t.denormalize(&[0.5]), vec![3.0]);
    }

    #[test]
    fn local_computer_evaluates_in_user_space() {
        let problem = problem();
        let values = LocalComputer::new()
            .evaluate(
                &problem,
                &[vec![0.0], vec![1.0]],
                &[vec![vec![0.5]], vec![vec![1.0], vec![0.0]]],
            )
            .unwrap();
        assert_eq!(values, vec![vec![100.0], vec![201.0, 199.0]]);
    }

    #[test]
    fn local_computer_checks_constraints() {
        let problem = problem();
        let computer = LocalComputer::new();
        assert!(computer.evaluate_constraints(&problem, &[0.5], None));
        assert!(!computer.evaluate_constraints(&problem, &[1.0], None));
        assert!(computer.evaluate_constraints(&problem, &[0.0], Some(&[0.75])));
        assert!(!computer.evaluate_constraints(&problem, &[0.0], Some(&[0.8])));
    }

    #[test]
    fn nan_objective_is_an_evaluation_error() {
        let problem = Problem::new(
            "nan",
            Space::new().add_real("t", 0.0, 1.0),
            Space::new().add_real("x", 0.0, 1.0),
            |_, _| f64::NAN,
        );
        let err = LocalComputer::new()
            .evaluate(&problem, &[vec![0.0]], &[vec![vec![0.5]]])
            .unwrap_err();
        assert!(matches!(err, TuneError::Evaluation(_)));
    }
}

//! Problem definition: input/parameter spaces, objective and constraints.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// A single dimension of an input or parameter space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dimension {
    /// Human-readable name (e.g. "block_size").
    pub name: String,
    /// The kind of range.
    pub kind: DimensionKind,
}

/// Describes the range of a dimension and how it maps onto `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DimensionKind {
    /// Continuous range [low, high].
    Real { low: f64, high: f64 },
    /// Integer range [low, high] inclusive.
    Integer { low: i64, high: i64 },
    /// Positive continuous range, normalized in log-space.
    LogReal { low: f64, high: f64 },
}

impl Dimension {
    fn normalize(&self, value: f64) -> f64 {
        match self.kind {
            DimensionKind::Real { low, high } => unit(value, low, high),
            DimensionKind::Integer { low, high } => unit(value, low as f64, high as f64),
            DimensionKind::LogReal { low, high } => unit(value.ln(), low.ln(), high.ln()),
        }
    }

    fn denormalize(&self, value: f64) -> f64 {
        match self.kind {
            DimensionKind::Real { low, high } => low + value * (high - low),
            DimensionKind::Integer { low, high } => {
                let raw = low as f64 + value * (high - low) as f64;
                raw.round().clamp(low as f64, high as f64)
            }
            DimensionKind::LogReal { low, high } => {
                (low.ln() + value * (high.ln() - low.ln())).exp()
            }
        }
    }

    fn contains(&self, value: f64) -> bool {
        match self.kind {
            DimensionKind::Real { low, high } | DimensionKind::LogReal { low, high } => {
                value >= low && value <= high
            }
            DimensionKind::Integer { low, high } => {
                value.fract() == 0.0 && value >= low as f64 && value <= high as f64
            }
        }
    }
}

fn unit(value: f64, low: f64, high: f64) -> f64 {
    if high == low {
        0.0
    } else {
        (value - low) / (high - low)
    }
}

/// An ordered list of dimensions. Points in the space are `Vec<f64>` with one
/// coordinate per dimension.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Space {
    pub dimensions: Vec<Dimension>,
}

impl Space {
    pub fn new() -> Self {
        Self {
            dimensions: Vec::new(),
        }
    }

    pub fn add_real(mut self, name: impl Into<String>, low: f64, high: f64) -> Self {
        self.dimensions.push(Dimension {
            name: name.into(),
            kind: DimensionKind::Real { low, high },
        });
        self
    }

    pub fn add_integer(mut self, name: impl Into<String>, low: i64, high: i64) -> Self {
        self.dimensions.push(Dimension {
            name: name.into(),
            kind: DimensionKind::Integer { low, high },
        });
        self
    }

    pub fn add_log_real(mut self, name: impl Into<String>, low: f64, high: f64) -> Self {
        self.dimensions.push(Dimension {
            name: name.into(),
            kind: DimensionKind::LogReal { low, high },
        });
        self
    }

    /// Number of dimensions.
    pub fn dim(&self) -> usize {
        self.dimensions.len()
    }

    /// Whether `point` lies inside the declared bounds.
    pub fn contains(&self, point: &[f64]) -> bool {
        point.len() == self.dim()
            && self
                .dimensions
                .iter()
                .zip(point)
                .all(|(dim, &value)| dim.contains(value))
    }

    /// Map a user-space point into the unit hypercube.
    pub fn normalize(&self, point: &[f64]) -> Vec<f64> {
        self.dimensions
            .iter()
            .zip(point)
            .map(|(dim, &value)| dim.normalize(value))
            .collect()
    }

    /// Map a unit-hypercube point back into user space.
    pub fn denormalize(&self, point: &[f64]) -> Vec<f64> {
        self.dimensions
            .iter()
            .zip(point)
            .map(|(dim, &value)| dim.denormalize(value.clamp(0.0, 1.0)))
            .collect()
    }
}

/// Objective: `(task, parameters) -> value`, both in user space. Lower is better.
pub type ObjectiveFn = Arc<dyn Fn(&[f64], &[f64]) -> f64 + Send + Sync>;

/// Constraint predicate: `(task, parameters)`; `parameters` is `None` when only
/// the task itself is being checked.
pub type ConstraintFn = Arc<dyn Fn(&[f64], Option<&[f64]>) -> bool + Send + Sync>;

/// A tuning problem: what is tuned, over which tasks, and how it is scored.
#[derive(Clone)]
pub struct Problem {
    pub name: String,
    pub input_space: Space,
    pub parameter_space: Space,
    objective: ObjectiveFn,
    constraint: Option<ConstraintFn>,
}

impl Problem {
    pub fn new<F>(
        name: impl Into<String>,
        input_space: Space,
        parameter_space: Space,
        objective: F,
    ) -> Self
    where
        F: Fn(&[f64], &[f64]) -> f64 + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            input_space,
            parameter_space,
            objective: Arc::new(objective),
            constraint: None,
        }
    }

    pub fn with_constraint<C>(mut self, constraint: C) -> Self
    where
        C: Fn(&[f64], Option<&[f64]>) -> bool + Send + Sync + 'static,
    {
        self.constraint = Some(Arc::new(constraint));
        self
    }

    /// Dimensionality of the task (input) space.
    pub fn input_dim(&self) -> usize {
        self.input_space.dim()
    }

    /// Dimensionality of the parameter space.
    pub fn parameter_dim(&self) -> usize {
        self.parameter_space.dim()
    }

    /// Evaluate the objective at a user-space point.
    pub fn objective(&self, task: &[f64], parameters: &[f64]) -> f64 {
        (self.objective)(task, parameters)
    }

    /// Whether a user-space point satisfies the problem's constraints.
    pub fn satisfiable(&self, task: &[f64], parameters: Option<&[f64]>) -> bool {
        match &self.constraint {
            Some(check) => check(task, parameters),
            None => true,
        }
    }
}

impl fmt::Debug for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Problem")
            .field("name", &self.name)
            .field("input_space", &self.input_space)
            .field("parameter_space", &self.parameter_space)
            .field("constrained", &self.constraint.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    fn sample_space() -> Space {
        Space::new()
            .add_real("alpha", -2.0, 5.0)
            .add_integer("block", 8, 256)
            .add_log_real("tolerance", 1e-6, 1e-1)
    }

    #[test]
    fn normalize_round_trip_within_bounds() {
        let space = sample_space();
        let mut rng = ChaCha8Rng::seed_from_u64(7);

        for _ in 0..500 {
            let point = vec![
                rng.random_range(-2.0..=5.0),
                rng.random_range(8..=256) as f64,
                rng.random_range(1e-6_f64.ln()..=1e-1_f64.ln()).exp(),
            ];
            assert!(space.contains(&point));

            let unit = space.normalize(&point);
            assert!(unit.iter().all(|v| (0.0..=1.0 + 1e-12).contains(v)));

            let back = space.denormalize(&unit);
            for (a, b) in point.iter().zip(&back) {
                assert!((a - b).abs() <= 1e-9 * a.abs().max(1.0), "{a} vs {b}");
            }
        }
    }

    #[test]
    fn integer_dimension_rounds_on_the_way_out() {
        let space = Space::new().add_integer("n", 0, 10);
        assert_eq!(space.denormalize(&[0.26]), vec![3.0]);
        assert_eq!(space.denormalize(&[1.4]), vec![10.0]);
    }

    #[test]
    fn degenerate_dimension_maps_to_zero() {
        let space = Space::new().add_real("fixed", 3.0, 3.0);
        assert_eq!(space.normalize(&[3.0]), vec![0.0]);
        assert_eq!(space.denormalize(&[0.0]), vec![3.0]);
    }

    #[test]
    fn contains_checks_bounds_and_arity() {
        let space = sample_space();
        assert!(!space.contains(&[0.0, 16.0]));
        assert!(!space.contains(&[6.0, 16.0, 1e-3]));
        assert!(!space.contains(&[0.0, 16.5, 1e-3]));
        assert!(space.contains(&[0.0, 16.0, 1e-3]));
    }

    #[test]
    fn problem_constraint_defaults_to_satisfiable() {
        let problem = Problem::new(
            "quad",
            Space::new().add_real("size", 1.0, 2.0),
            Space::new().add_real("x", 0.0, 1.0),
            |_, x| x[0] * x[0],
        );
        assert!(problem.satisfiable(&[1.0], Some(&[0.5])));
        assert_eq!(problem.objective(&[1.0], &[0.5]), 0.25);

        let constrained = problem.with_constraint(|_, x| x.map_or(true, |x| x[0] < 0.5));
        assert!(constrained.satisfiable(&[1.0], None));
        assert!(!constrained.satisfiable(&[1.0], Some(&[0.7])));
    }

    #[test]
    fn space_builder_chain() {
        let space = sample_space();
        assert_eq!(space.dim(), 3);
        let json = serde_json::to_string(&space).unwrap();
        let back: Space = serde_json::from_str(&json).unwrap();
        assert_eq!(space, back);
    }
}

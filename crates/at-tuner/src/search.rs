//! Initial-design samplers and next-candidate search strategies.
//!
//! Everything here works in the normalized unit hypercube.

use parking_lot::Mutex;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::debug;

use at_model::SurrogateModel;
use at_types::{Dataset, Point, Space, TuneError, TuneResult};

use crate::collaborators::{ParameterCheck, Sampler, SearchEngine, TaskCheck};

fn seeded_rng(seed: Option<u64>) -> Mutex<ChaCha8Rng> {
    let seed = seed.unwrap_or_else(rand::random);
    Mutex::new(ChaCha8Rng::seed_from_u64(seed))
}

fn uniform_point<R: Rng>(rng: &mut R, dim: usize) -> Point {
    (0..dim).map(|_| rng.random_range(0.0..=1.0)).collect()
}

/// Keep each proposed point that passes `accept`; redraw the others
/// uniformly, giving up after `max_attempts` draws for one point.
fn feasible<R, F>(
    proposed: Vec<Point>,
    dim: usize,
    rng: &mut R,
    max_attempts: usize,
    accept: F,
) -> TuneResult<Vec<Point>>
where
    R: Rng,
    F: Fn(&[f64]) -> bool,
{
    proposed
        .into_iter()
        .map(|point| {
            if accept(&point) {
                return Ok(point);
            }
            for _ in 0..max_attempts {
                let candidate = uniform_point(rng, dim);
                if accept(&candidate) {
                    return Ok(candidate);
                }
            }
            Err(TuneError::Search(format!(
                "no feasible point found after {max_attempts} attempts"
            )))
        })
        .collect()
}

// ---- Random sampling ----

/// Independent uniform sampling.
#[derive(Debug)]
pub struct RandomSampler {
    rng: Mutex<ChaCha8Rng>,
    max_attempts: usize,
}

impl RandomSampler {
    pub fn new(seed: Option<u64>, max_attempts: usize) -> Self {
        Self {
            rng: seeded_rng(seed),
            max_attempts,
        }
    }

    fn draw(
        &self,
        n: usize,
        dim: usize,
        accept: &dyn Fn(&[f64]) -> bool,
    ) -> TuneResult<Vec<Point>> {
        let mut rng = self.rng.lock();
        let proposed = (0..n).map(|_| uniform_point(&mut *rng, dim)).collect();
        feasible(proposed, dim, &mut *rng, self.max_attempts, accept)
    }
}

impl Sampler for RandomSampler {
    fn name(&self) -> &'static str {
        "random"
    }

    fn sample_tasks(
        &self,
        n: usize,
        input_space: &Space,
        check: &TaskCheck<'_>,
    ) -> TuneResult<Vec<Point>> {
        self.draw(n, input_space.dim(), check)
    }

    fn sample_parameters(
        &self,
        n: usize,
        tasks: &[Point],
        parameter_space: &Space,
        check: &ParameterCheck<'_>,
    ) -> TuneResult<Vec<Vec<Point>>> {
        tasks
            .iter()
            .map(|task| self.draw(n, parameter_space.dim(), &|x: &[f64]| check(task, x)))
            .collect()
    }
}

// ---- Latin hypercube sampling ----

/// Stratified sampling: every dimension is cut into `n` equal bins and each
/// bin receives exactly one point. Infeasible points are redrawn uniformly.
#[derive(Debug)]
pub struct LatinHypercubeSampler {
    rng: Mutex<ChaCha8Rng>,
    max_attempts: usize,
}

impl LatinHypercubeSampler {
    pub fn new(seed: Option<u64>, max_attempts: usize) -> Self {
        Self {
            rng: seeded_rng(seed),
            max_attempts,
        }
    }

    fn design<R: Rng>(rng: &mut R, n: usize, dim: usize) -> Vec<Point> {
        let mut points = vec![vec![0.0; dim]; n];
        for d in 0..dim {
            let mut bins: Vec<usize> = (0..n).collect();
            bins.shuffle(rng);
            for (point, bin) in points.iter_mut().zip(bins) {
                point[d] = (bin as f64 + rng.random::<f64>()) / n as f64;
            }
        }
        points
    }

    fn draw(
        &self,
        n: usize,
        dim: usize,
        accept: &dyn Fn(&[f64]) -> bool,
    ) -> TuneResult<Vec<Point>> {
        let mut rng = self.rng.lock();
        let proposed = Self::design(&mut *rng, n, dim);
        feasible(proposed, dim, &mut *rng, self.max_attempts, accept)
    }
}

impl Sampler for LatinHypercubeSampler {
    fn name(&self) -> &'static str {
        "latin_hypercube"
    }

    fn sample_tasks(
        &self,
        n: usize,
        input_space: &Space,
        check: &TaskCheck<'_>,
    ) -> TuneResult<Vec<Point>> {
        self.draw(n, input_space.dim(), check)
    }

    fn sample_parameters(
        &self,
        n: usize,
        tasks: &[Point],
        parameter_space: &Space,
        check: &ParameterCheck<'_>,
    ) -> TuneResult<Vec<Vec<Point>>> {
        tasks
            .iter()
            .map(|task| self.draw(n, parameter_space.dim(), &|x: &[f64]| check(task, x)))
            .collect()
    }
}

// ---- Search strategies ----

/// Standard normal CDF (Abramowitz-Stegun 7.1.26).
fn norm_cdf(x: f64) -> f64 {
    if x >= 8.0 {
        return 1.0;
    }
    if x <= -8.0 {
        return 0.0;
    }

    let a1 = 0.254829592_f64;
    let a2 = -0.284496736_f64;
    let a3 = 1.421413741_f64;
    let a4 = -1.453152027_f64;
    let a5 = 1.061405429_f64;
    let p = 0.3275911_f64;

    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let z = x.abs() / std::f64::consts::SQRT_2;
    let t = 1.0 / (1.0 + p * z);
    let erf = 1.0 - (((((a5 * t + a4) * t) + a3) * t + a2) * t + a1) * t * (-z * z).exp();
    0.5 * (1.0 + sign * erf)
}

fn norm_pdf(x: f64) -> f64 {
    const INV_SQRT_2PI: f64 = 0.398_942_280_401_432_7;
    INV_SQRT_2PI * (-0.5 * x * x).exp()
}

/// Expected improvement over `best` for a minimization problem.
pub fn expected_improvement(mean: f64, variance: f64, best: f64) -> f64 {
    let std = variance.max(0.0).sqrt();
    if std < 1e-12 {
        return (best - mean).max(0.0);
    }
    let z = (best - mean) / std;
    ((best - mean) * norm_cdf(z) + std * norm_pdf(z)).max(0.0)
}

/// Expected-improvement acquisition maximized over a random candidate set.
///
/// Each candidate is either a uniform draw (with probability `exploration`)
/// or a perturbation of the task's incumbent.
#[derive(Debug)]
pub struct ExpectedImprovementSearch {
    dim: usize,
    candidates: usize,
    exploration: f64,
    rng: Mutex<ChaCha8Rng>,
}

impl ExpectedImprovementSearch {
    pub fn new(dim: usize, candidates: usize, exploration: f64, seed: Option<u64>) -> Self {
        Self {
            dim,
            candidates: candidates.max(1),
            exploration,
            rng: seeded_rng(seed),
        }
    }

    fn candidate<R: Rng>(&self, rng: &mut R, incumbent: Option<&[f64]>) -> Point {
        match incumbent {
            Some(base) if rng.random::<f64>() >= self.exploration => base
                .iter()
                .map(|v| (v + rng.random_range(-0.1..0.1)).clamp(0.0, 1.0))
                .collect(),
            _ => uniform_point(rng, self.dim),
        }
    }
}

impl SearchEngine for ExpectedImprovementSearch {
    fn name(&self) -> &'static str {
        "expected_improvement"
    }

    fn propose(
        &self,
        data: &Dataset,
        model: &dyn SurrogateModel,
        check: &ParameterCheck<'_>,
    ) -> TuneResult<Vec<Point>> {
        let mut rng = self.rng.lock();
        let mut proposals = Vec::with_capacity(data.task_count());

        for (task, task_point) in data.tasks().iter().enumerate() {
            let incumbent = data.best(task);
            let best_value = incumbent.map_or(f64::INFINITY, |(_, value)| value);

            let mut chosen: Option<(Point, f64)> = None;
            for _ in 0..self.candidates {
                let x = self.candidate(&mut *rng, incumbent.map(|(point, _)| point));
                if !check(task_point, &x) {
                    continue;
                }
                let prediction = model.predict(&x, task)?;
                let score = if best_value.is_finite() {
                    expected_improvement(prediction.mean, prediction.variance, best_value)
                } else {
                    prediction.variance
                };
                if chosen.as_ref().map_or(true, |(_, best)| score > *best) {
                    chosen = Some((x, score));
                }
            }

            let (point, score) = chosen.ok_or_else(|| {
                TuneError::Search(format!(
                    "no feasible candidate for task {task} among {} draws",
                    self.candidates
                ))
            })?;
            debug!(task, score, "candidate selected");
            proposals.push(point);
        }
        Ok(proposals)
    }
}

/// Uniform random proposals; ignores the model.
#[derive(Debug)]
pub struct RandomSearch {
    dim: usize,
    max_attempts: usize,
    rng: Mutex<ChaCha8Rng>,
}

impl RandomSearch {
    pub fn new(dim: usize, max_attempts: usize, seed: Option<u64>) -> Self {
        Self {
            dim,
            max_attempts,
            rng: seeded_rng(seed),
        }
    }
}

impl SearchEngine for RandomSearch {
    fn name(&self) -> &'static str {
        "random"
    }

    fn propose(
        &self,
        data: &Dataset,
        _model: &dyn SurrogateModel,
        check: &ParameterCheck<'_>,
    ) -> TuneResult<Vec<Point>> {
        let mut rng = self.rng.lock();
        let mut proposals = Vec::with_capacity(data.task_count());
        for task in data.tasks() {
            let first = uniform_point(&mut *rng, self.dim);
            let mut point = feasible(vec![first], self.dim, &mut *rng, self.max_attempts, |x| {
                check(task, x)
            })?;
            proposals.extend(point.pop());
        }
        Ok(proposals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use at_model::Prediction;

    /// Quadratic bowl centred on 0.3 with constant variance.
    #[derive(Debug)]
    struct Bowl;

    impl SurrogateModel for Bowl {
        fn name(&self) -> &'static str {
            "bowl"
        }

        fn train(&mut self, _data: &Dataset) -> TuneResult<()> {
            Ok(())
        }

        fn update(&mut self, _delta: &Dataset, _retrain: bool) -> TuneResult<()> {
            Ok(())
        }

        fn predict(&self, point: &[f64], _task: usize) -> TuneResult<Prediction> {
            Ok(Prediction {
                mean: (point[0] - 0.3).powi(2),
                variance: 1e-4,
            })
        }

        fn is_trained(&self) -> bool {
            true
        }
    }

    fn space(dim: usize) -> Space {
        (0..dim).fold(Space::new(), |space, d| space.add_real(format!("x{d}"), 0.0, 1.0))
    }

    fn observed() -> Dataset {
        Dataset::from_parts(
            vec![vec![0.0], vec![1.0]],
            vec![vec![vec![0.9], vec![0.6]], vec![vec![0.1]]],
            vec![vec![0.36, 0.09], vec![0.04]],
        )
        .unwrap()
    }

    #[test]
    fn random_sampler_respects_bounds_and_count() {
        let sampler = RandomSampler::new(Some(1), 100);
        let samples = sampler
            .sample_parameters(20, &[vec![0.0], vec![1.0]], &space(3), &|_, _| true)
            .unwrap();
        assert_eq!(samples.len(), 2);
        for points in &samples {
            assert_eq!(points.len(), 20);
            assert!(points
                .iter()
                .all(|p| p.len() == 3 && p.iter().all(|v| (0.0..=1.0).contains(v))));
        }
    }

    #[test]
    fn latin_hypercube_fills_every_bin() {
        let sampler = LatinHypercubeSampler::new(Some(3), 100);
        let tasks = sampler.sample_tasks(10, &space(2), &|_| true).unwrap();
        assert_eq!(tasks.len(), 10);
        for d in 0..2 {
            let mut bins: Vec<usize> = tasks.iter().map(|t| (t[d] * 10.0) as usize).collect();
            bins.sort_unstable();
            assert_eq!(bins, (0..10).collect::<Vec<_>>());
        }
    }

    #[test]
    fn samplers_reject_infeasible_points() {
        let check = |_: &[f64], x: &[f64]| x[0] < 0.25;
        let lhs = LatinHypercubeSampler::new(Some(5), 1_000);
        let points = lhs.sample_parameters(8, &[vec![0.5]], &space(1), &check).unwrap();
        assert!(points[0].iter().all(|x| x[0] < 0.25));

        let random = RandomSampler::new(Some(5), 1_000);
        let points = random.sample_parameters(8, &[vec![0.5]], &space(1), &check).unwrap();
        assert!(points[0].iter().all(|x| x[0] < 0.25));
    }

    #[test]
    fn sampler_gives_up_on_empty_feasible_set() {
        let sampler = RandomSampler::new(Some(2), 10);
        let err = sampler.sample_tasks(3, &space(1), &|_| false).unwrap_err();
        assert!(matches!(err, TuneError::Search(_)));
    }

    #[test]
    fn seeded_samplers_are_reproducible() {
        let a = LatinHypercubeSampler::new(Some(42), 10).sample_tasks(5, &space(2), &|_| true);
        let b = LatinHypercubeSampler::new(Some(42), 10).sample_tasks(5, &space(2), &|_| true);
        assert_eq!(a.unwrap(), b.unwrap());
    }

    #[test]
    fn expected_improvement_properties() {
        assert_eq!(expected_improvement(1.0, 0.0, 0.5), 0.0);
        assert!((expected_improvement(0.2, 0.0, 0.5) - 0.3).abs() < 1e-12);
        assert!(expected_improvement(0.5, 1.0, 0.5) > expected_improvement(0.5, 0.01, 0.5));
        assert!(expected_improvement(0.0, 0.01, 0.5) > expected_improvement(1.0, 0.01, 0.5));
    }

    #[test]
    fn norm_cdf_matches_known_values() {
        assert!((norm_cdf(0.0) - 0.5).abs() < 1e-7);
        assert!((norm_cdf(1.96) - 0.975).abs() < 1e-3);
        assert!((norm_cdf(-1.0) - 0.158_655).abs() < 1e-4);
    }

    #[test]
    fn expected_improvement_search_moves_toward_minimum() {
        let search = ExpectedImprovementSearch::new(1, 512, 0.3, Some(9));
        let proposals = search.propose(&observed(), &Bowl, &|_, _| true).unwrap();
        assert_eq!(proposals.len(), 2);
        for x in &proposals {
            assert!((x[0] - 0.3).abs() < 0.1, "proposal {x:?} far from the minimum");
        }
    }

    #[test]
    fn search_honours_constraints() {
        let search = ExpectedImprovementSearch::new(1, 256, 0.5, Some(4));
        let proposals = search
            .propose(&observed(), &Bowl, &|_, x| x[0] > 0.5)
            .unwrap();
        assert!(proposals.iter().all(|x| x[0] > 0.5));

        let err = search.propose(&observed(), &Bowl, &|_, _| false).unwrap_err();
        assert!(matches!(err, TuneError::Search(_)));
    }

    #[test]
    fn random_search_proposes_one_point_per_task() {
        let search = RandomSearch::new(2, 100, Some(8));
        let proposals = search.propose(&observed(), &Bowl, &|_, _| true).unwrap();
        assert_eq!(proposals.len(), 2);
        assert!(proposals.iter().all(|p| p.len() == 2));
    }
}

//! Wire format exchanged with restart worker processes.
//!
//! Everything here is plain data. The engine travels as an [`EngineKind`] tag
//! and is resolved on the worker side; no pool handle or engine object is
//! ever part of a bundle.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use at_types::{Dataset, EngineKind, RestartFailure};

use crate::engine::FitOptions;
use crate::kernel::KernelSpec;

/// How restart indices map to RNG seeds.
///
/// `seed(i) = global * stride + i` when a global seed is set, `i` otherwise.
/// `stride` is the configured thread count, identical in every execution
/// mode, so the seeds do not depend on how restarts are fanned out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedPolicy {
    pub global: Option<u64>,
    pub stride: usize,
}

impl SeedPolicy {
    pub fn new(global: Option<u64>, stride: usize) -> Self {
        Self { global, stride }
    }

    pub fn seed_for(&self, restart: usize) -> u64 {
        match self.global {
            Some(global) => global
                .wrapping_mul(self.stride as u64)
                .wrapping_add(restart as u64),
            None => restart as u64,
        }
    }
}

impl Default for SeedPolicy {
    fn default() -> Self {
        Self {
            global: None,
            stride: 1,
        }
    }
}

/// Everything a restart needs besides the data: which engine, the kernel
/// shape, an optional warm start for restart 0, seeding and fit settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDefinition {
    pub engine: EngineKind,
    pub kernel: KernelSpec,
    pub warm_start: Option<Vec<f64>>,
    pub seed_policy: SeedPolicy,
    pub fit: FitOptions,
}

/// One successful restart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestartResult {
    pub restart: usize,
    pub seed: u64,
    pub params: Vec<f64>,
    pub nll: f64,
    pub iterations: usize,
}

pub type RestartOutcome = Result<RestartResult, RestartFailure>;

/// Snapshot sent to one pool member.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestartBundle {
    pub call_id: Uuid,
    pub rank: usize,
    pub size: usize,
    pub definition: ModelDefinition,
    pub dataset: Dataset,
    /// Restart indices assigned to this member.
    pub restarts: Vec<usize>,
}

/// A member's partial result list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerReply {
    pub call_id: Uuid,
    pub rank: usize,
    pub outcomes: Vec<RestartOutcome>,
}

/// Round-robin assignment of restart indices to `size` pool members by rank.
pub fn partition(restarts: &[usize], size: usize) -> Vec<Vec<usize>> {
    let size = size.max(1);
    (0..size)
        .map(|rank| restarts.iter().skip(rank).step_by(size).copied().collect())
        .collect()
}

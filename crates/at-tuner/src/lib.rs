//! # at-tuner
//!
//! Multi-task active-learning autotuner: samples an initial design, then
//! repeatedly trains a surrogate, proposes one candidate per task, evaluates
//! it and merges the result until the sample budget is reached.

pub mod collaborators;
pub mod registry;
pub mod search;
pub mod status;
pub mod tuner;

pub use collaborators::{Computer, LocalComputer, Sampler, SearchEngine, Transformer};
pub use registry::{build_sampler, build_search};
pub use search::{
    expected_improvement, ExpectedImprovementSearch, LatinHypercubeSampler, RandomSampler,
    RandomSearch,
};
pub use status::{BestSample, TuningState, TuningStatus};
pub use tuner::Tuner;

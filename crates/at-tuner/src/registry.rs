//! Construction of collaborators from their configured variant tags.

use at_types::{SamplerKind, SearchKind, TuningOptions};

use crate::collaborators::{Sampler, SearchEngine};
use crate::search::{ExpectedImprovementSearch, LatinHypercubeSampler, RandomSampler, RandomSearch};

/// Offset separating the search RNG stream from the sampler's.
const SEARCH_SEED_OFFSET: u64 = 0x5eed;

pub fn build_sampler(options: &TuningOptions) -> Box<dyn Sampler> {
    match options.sampler {
        SamplerKind::Random => {
            Box::new(RandomSampler::new(options.seed, options.sample_max_attempts))
        }
        SamplerKind::LatinHypercube => Box::new(LatinHypercubeSampler::new(
            options.seed,
            options.sample_max_attempts,
        )),
    }
}

/// Search engine over a parameter space of dimension `parameter_dim`.
pub fn build_search(options: &TuningOptions, parameter_dim: usize) -> Box<dyn SearchEngine> {
    let seed = options.seed.map(|seed| seed.wrapping_add(SEARCH_SEED_OFFSET));
    match options.search {
        SearchKind::ExpectedImprovement => Box::new(ExpectedImprovementSearch::new(
            parameter_dim,
            options.search_candidates,
            options.search_exploration,
            seed,
        )),
        SearchKind::Random => Box::new(RandomSearch::new(
            parameter_dim,
            options.sample_max_attempts,
            seed,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_resolves_every_tag() {
        let options = TuningOptions::default();
        assert_eq!(build_sampler(&options).name(), "latin_hypercube");
        assert_eq!(build_search(&options, 2).name(), "expected_improvement");

        let options = options
            .with_sampler(SamplerKind::Random)
            .with_search(SearchKind::Random);
        assert_eq!(build_sampler(&options).name(), "random");
        assert_eq!(build_search(&options, 2).name(), "random");
    }
}

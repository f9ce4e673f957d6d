#![allow(dead_code)]
/// this file is essentially a workaround for #[cfg(test)] like behaviour for the benchmarks
/// The dev-depencies are only available in benchmarks or tests
use std::{collections::HashMap, hint::black_box, time::Duration};

use criterion::Criterion;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use gpmsm::fixation::FixationModel;
use gpmsm::landscape::LandscapeGraph;
use gpmsm::markov_model::{MarkovStateModel, MsmConfig};
use gpmsm::transition_model::{NeighbourWeighting, TransitionModelBuilder};

/// Number of sites of the benchmarked hypercubes, keyed by a readable size label.
pub type HypercubeSizes = HashMap<&'static str, u32>;

pub const SITES_4: u32 = 4;
pub const SITES_6: u32 = 6;
pub const SITES_8: u32 = 8;
pub const SITES_10: u32 = 10;

pub const BENCH_SEED: u64 = 0x5eed;

pub fn black_box_hypercube(sites: u32) -> LandscapeGraph {
    let mut rng = StdRng::seed_from_u64(BENCH_SEED);
    let fitness = (0..2_usize.pow(sites))
        .map(|_| rng.gen_range(0.8..1.2))
        .collect::<Vec<f64>>();
    black_box(
        LandscapeGraph::hypercube(&fitness).expect("hypercube should be built from 2^k values"),
    )
}

pub fn black_box_msm(sites: u32) -> MarkovStateModel {
    let landscape = black_box_hypercube(sites);
    let builder = TransitionModelBuilder::new(FixationModel::Moran {
        population_size: 100.0,
    })
    .weighting(NeighbourWeighting::MutationRate(0.01));
    black_box(
        MarkovStateModel::from_landscape(&landscape, &builder, MsmConfig::default())
            .expect("hypercube model should be valid"),
    )
}

pub fn setup_suite() -> Criterion {
    Criterion::default()
        .measurement_time(Duration::from_secs(60))
        .with_profiler(pprof::criterion::PProfProfiler::new(
            997, // taken from the flamegraph repo's default
            pprof::criterion::Output::Flamegraph(None),
        ))
}

/// empty on purpose, there are no benches here but the crate still needs
/// to be runnable otherwise criterion crashes
fn main() {}

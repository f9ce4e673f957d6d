use std::{hint::black_box, time::Duration};

use criterion::{criterion_group, criterion_main, Criterion};
use gpmsm::flux::FluxAnalyzer;
use gpmsm::markov_model::MarkovStateModel;
use gpmsm::simulation::TrajectorySimulator;

mod helpers;
use helpers::{black_box_msm, HypercubeSizes, BENCH_SEED, SITES_10, SITES_4, SITES_6, SITES_8};

fn sizes() -> HypercubeSizes {
    HypercubeSizes::from([
        ("16", SITES_4),
        ("64", SITES_6),
        ("256", SITES_8),
        ("1024", SITES_10),
    ])
}

fn run_for_sizes(
    group_name: &'static str,
    criterion: &mut Criterion,
    routine: impl Fn(&MarkovStateModel),
) {
    let mut bench_group = criterion.benchmark_group(group_name);
    for (key, sites) in sizes() {
        let msm = black_box_msm(sites);
        bench_group.bench_function(key, |bench| {
            // fresh clone so the cached stationary distribution is recomputed
            bench.iter_batched(
                || black_box(msm.clone()),
                |msm| routine(&msm),
                criterion::BatchSize::LargeInput,
            );
        });
    }
    bench_group.finish();
}

fn stationary_distribution(criterion: &mut Criterion) {
    run_for_sizes("Stationary distribution", criterion, |msm| {
        black_box(msm.stationary_distribution().expect("chain is irreducible"));
    });
}

fn flux_analysis(criterion: &mut Criterion) {
    run_for_sizes("Flux analysis", criterion, |msm| {
        let last = msm.len() - 1;
        let result = FluxAnalyzer::new(msm, &[0], &[last])
            .and_then(|analyzer| analyzer.dominant_pathways(10, 0.9))
            .expect("flux analysis should succeed");
        black_box(result);
    });
}

fn ensemble_simulation(criterion: &mut Criterion) {
    run_for_sizes("Ensemble simulation", criterion, |msm| {
        let last = msm.len() - 1;
        let trajectories = TrajectorySimulator::new(msm)
            .and_then(|simulator| {
                simulator.simulate_ensemble(100, 0, 10_000, Some(BENCH_SEED), Some(&[last][..]))
            })
            .expect("simulation should succeed");
        black_box(trajectories);
    });
}

criterion_group! {
name = msm_analysis;
config = helpers::setup_suite().measurement_time(Duration::from_secs(10));
targets = stationary_distribution, flux_analysis,
}
criterion_group! {
name = msm_simulation;
config = helpers::setup_suite().measurement_time(Duration::from_secs(10));
targets = ensemble_simulation,
}
criterion_main!(msm_analysis, msm_simulation);

use anyhow::{bail, Error};
use clap::Parser;
use ftail::Ftail;
use log::{info, warn};

use gpmsm::flux::FluxAnalyzer;
use gpmsm::landscape::LandscapeGraph;
use gpmsm::markov_model::MarkovStateModel;
use gpmsm::simulation::{EnsembleSummary, TrajectorySimulator};
use gpmsm::transition_model::TransitionModelBuilder;

mod cli;
use crate::cli::{Cli, Config};

type Result<T> = std::result::Result<T, Error>;

fn main() -> Result<()> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(error) => {
            bail!("Unable to parse command line arguments: \n {}", error)
        }
    };
    if let Err(error) = Ftail::new().console(cli.log_level()).init() {
        eprintln!("Unable to set up logging: {}", error);
    }
    let cfg = Config::try_from(cli)?;
    info!("Run started.");
    info!("{}", cfg);

    let landscape = LandscapeGraph::hypercube(&cfg.fitness)?;
    let builder = TransitionModelBuilder::new(cfg.fixation)
        .weighting(cfg.weighting)
        .row_overflow(cfg.overflow);
    let msm = MarkovStateModel::from_landscape(&landscape, &builder, cfg.msm)?;
    msm.check_stochastic()?;

    let label = |i: usize| landscape.genotype(i).to_string();
    if msm.is_irreducible() {
        let pi = msm.stationary_distribution()?;
        println!("Stationary distribution:");
        for (i, p) in pi.iter().enumerate() {
            println!("  {} {:.6e}", label(i), p);
        }
        let k = cfg.timescales.min(msm.relaxation_eigenvalues().len());
        println!("Relaxation timescales: {:?}", msm.timescales(k)?);
    } else {
        warn!(
            "The chain has {} communicating classes, no unique stationary distribution.",
            msm.communicating_classes().len()
        );
    }

    let flux = FluxAnalyzer::new(&msm, &cfg.source, &cfg.target)?
        .dominant_pathways(cfg.max_paths, cfg.max_fraction)?;
    println!(
        "Total flux {:.6e}, rate {:.6e}, mean first passage time {:.6e}",
        flux.total_flux, flux.rate, flux.mfpt
    );
    for pathway in &flux.pathways {
        println!(
            "  {} | {}",
            pathway,
            pathway.states.iter().map(|&i| label(i)).collect::<Vec<_>>().join(" -> ")
        );
    }
    println!("Unresolved flux {:.6e}", flux.unresolved_flux);

    if cfg.trajectories > 0 {
        let simulator = TrajectorySimulator::new(&msm)?;
        let trajectories = simulator.simulate_ensemble(
            cfg.trajectories,
            cfg.source[0],
            cfg.steps,
            cfg.seed,
            Some(cfg.target.as_slice()),
        )?;
        let summary = EnsembleSummary::new(&trajectories, msm.len())?;
        println!(
            "Simulated {} trajectories, {:.2}% reached the target",
            summary.trajectories,
            summary.hit_fraction * 100.0
        );
        if let Some(steps) = summary.mean_steps_to_stop {
            println!("Mean steps to the target {:.2}", steps);
        }
        for (path, count) in summary.most_common_paths(cfg.max_paths) {
            println!("  {:?} x {}", path, count);
        }
    }
    info!("Run done.");
    Ok(())
}

use std::fmt::Display;

use anyhow::bail;
use clap::{ArgAction, Parser};
use log::LevelFilter;

use gpmsm::fixation::{FixationModel, FixationType};
use gpmsm::markov_model::{MsmConfig, StationaryMethod};
use gpmsm::transition_model::{NeighbourWeighting, RowOverflow};

use crate::Result;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub(super) struct Cli {
    /// Fitness of every genotype of a binary hypercube, genotype i is the binary representation of i
    #[arg(short, long, value_name = "FITNESS", num_args = 1.., required = true)]
    pub(super) fitness: Vec<f64>,

    /// Fixation rule: neutral, moran, mccandlish (kimura), metropolis or sswm
    #[arg(short = 'x', long, value_name = "RULE", default_value = "moran")]
    pub(super) fixation: String,

    /// Effective population size of the fixation rule
    #[arg(short = 'N', long, value_name = "N")]
    pub(super) population_size: Option<f64>,

    /// Per-site mutation rate, neighbours are weighted uniformly if not given
    #[arg(short = 'u', long, value_name = "RATE")]
    pub(super) mutation_rate: Option<f64>,

    /// Rescale genotypes whose outgoing probabilities exceed one instead of failing
    #[arg(long)]
    pub(super) renormalise: bool,

    /// Source genotype indices
    #[arg(short, long, value_name = "SOURCE", num_args = 1.., required = true)]
    pub(super) source: Vec<usize>,

    /// Target genotype indices
    #[arg(short, long, value_name = "TARGET", num_args = 1.., required = true)]
    pub(super) target: Vec<usize>,

    /// Maximum number of pathways to extract
    #[arg(long, default_value_t = 10)]
    pub(super) max_paths: usize,

    /// Stop extracting pathways once they cover this fraction of the total flux
    #[arg(long, default_value_t = 0.95)]
    pub(super) max_fraction: f64,

    /// Number of relaxation timescales to report
    #[arg(long, default_value_t = 3)]
    pub(super) timescales: usize,

    /// Number of trajectories to simulate from the first source genotype
    #[arg(long, default_value_t = 0)]
    pub(super) trajectories: usize,

    /// Maximum number of steps per trajectory
    #[arg(long, default_value_t = 10_000)]
    pub(super) steps: usize,

    /// Simulation seed, drawn at random if not given
    #[arg(long)]
    pub(super) seed: Option<u64>,

    /// Tolerance of the stochasticity checks and iterative solvers
    #[arg(short, long, default_value_t = gpmsm::transition_model::DEFAULT_EPSILON)]
    pub(super) epsilon: f64,

    /// Compute the stationary distribution by power iteration
    #[arg(long)]
    pub(super) power_iteration: bool,

    /// Log verbosity, repeat for more detail
    #[arg(short, long, action = ArgAction::Count)]
    pub(super) verbose: u8,
}

pub(super) struct Config {
    pub(super) fitness: Vec<f64>,
    pub(super) fixation: FixationModel,
    pub(super) weighting: NeighbourWeighting,
    pub(super) overflow: RowOverflow,
    pub(super) msm: MsmConfig,
    pub(super) source: Vec<usize>,
    pub(super) target: Vec<usize>,
    pub(super) max_paths: usize,
    pub(super) max_fraction: f64,
    pub(super) timescales: usize,
    pub(super) trajectories: usize,
    pub(super) steps: usize,
    pub(super) seed: Option<u64>,
}

impl Cli {
    pub(super) fn log_level(&self) -> LevelFilter {
        match self.verbose {
            0 => LevelFilter::Warn,
            1 => LevelFilter::Info,
            2 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    }
}

impl TryFrom<Cli> for Config {
    type Error = anyhow::Error;

    fn try_from(cli: Cli) -> Result<Self> {
        let fixation_type = FixationType::from(cli.fixation.as_str());
        if fixation_type == FixationType::Undef {
            bail!("Unknown fixation rule: {}", cli.fixation);
        }
        let params = cli.population_size.map(|n| vec![n]).unwrap_or_default();
        let fixation = FixationModel::new(fixation_type, &params)?;
        let method = if cli.power_iteration {
            StationaryMethod::PowerIteration
        } else {
            StationaryMethod::Direct
        };
        Ok(Config {
            fitness: cli.fitness,
            fixation,
            weighting: match cli.mutation_rate {
                Some(rate) => NeighbourWeighting::MutationRate(rate),
                None => NeighbourWeighting::Uniform,
            },
            overflow: if cli.renormalise {
                RowOverflow::Renormalise
            } else {
                RowOverflow::Fail
            },
            msm: MsmConfig::default().epsilon(cli.epsilon).method(method),
            source: cli.source,
            target: cli.target,
            max_paths: cli.max_paths,
            max_fraction: cli.max_fraction,
            timescales: cli.timescales,
            trajectories: cli.trajectories,
            steps: cli.steps,
            seed: cli.seed,
        })
    }
}

impl Display for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Genotypes: {}", self.fitness.len())?;
        writeln!(f, "Fixation: {}", self.fixation)?;
        writeln!(f, "Weighting: {:?}, overflow: {:?}", self.weighting, self.overflow)?;
        writeln!(
            f,
            "Epsilon: {}, stationary method: {:?}",
            self.msm.epsilon, self.msm.method
        )?;
        write!(f, "Source: {:?}, target: {:?}", self.source, self.target)
    }
}

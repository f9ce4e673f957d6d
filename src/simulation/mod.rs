use std::fmt::Display;

use anyhow::{anyhow, bail};
use fixedbitset::FixedBitSet;
use hashbrown::HashMap;
use itertools::Itertools;
use log::{debug, info};
use rand::distributions::Distribution as _;
use rand::distributions::WeightedIndex;
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::errors::MsmError;
use crate::markov_model::connectivity::as_bitset;
use crate::markov_model::{Distribution, MarkovStateModel};
use crate::Result;

/// One sampled walk over the genotypes, starting state included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trajectory {
    pub states: Vec<usize>,
    /// Whether the walk ended because it entered the stop set.
    pub reached_stop: bool,
}

impl Trajectory {
    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Number of transitions taken, self-transitions included.
    pub fn steps(&self) -> usize {
        self.states.len().saturating_sub(1)
    }

    /// Visited states with consecutive repeats collapsed.
    pub fn path(&self) -> Vec<usize> {
        self.states.iter().copied().dedup().collect()
    }
}

impl Display for Trajectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.path().iter().join(" -> "))
    }
}

/// Samples trajectories directly from the rows of the transition matrix of a model.
///
/// # Example
/// ```
/// use gpmsm::markov_model::MarkovStateModel;
/// use gpmsm::simulation::TrajectorySimulator;
/// use gpmsm::transition_model::TransitionMatrix;
/// let t = TransitionMatrix::from_row_slice(2, 2, &[0.9, 0.1, 0.3, 0.7]);
/// let msm = MarkovStateModel::new(t).unwrap();
/// let simulator = TrajectorySimulator::new(&msm).unwrap();
/// let first = simulator.simulate(0, 100, Some(7), None).unwrap();
/// let second = simulator.simulate(0, 100, Some(7), None).unwrap();
/// assert_eq!(first, second);
/// assert_eq!(first.len(), 101);
/// ```
#[derive(Debug, Clone)]
pub struct TrajectorySimulator<'a> {
    msm: &'a MarkovStateModel,
    rows: Vec<WeightedIndex<f64>>,
}

impl<'a> TrajectorySimulator<'a> {
    /// Bails if the transition matrix of the model is not stochastic.
    pub fn new(msm: &'a MarkovStateModel) -> Result<Self> {
        msm.check_stochastic()?;
        let rows = msm
            .transition_matrix()
            .row_iter()
            .enumerate()
            .map(|(i, row)| {
                WeightedIndex::new(row.iter().map(|&p| p.max(0.0)))
                    .map_err(|e| anyhow!("Row {} of the transition matrix cannot be sampled: {}", i, e))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { msm, rows })
    }

    pub fn model(&self) -> &MarkovStateModel {
        self.msm
    }

    /// Draws a single trajectory of at most `max_steps` transitions from `start`.
    ///
    /// The walk ends early once it is in a state of `stop_set`, a start inside the stop set gives
    /// a trajectory with the start only. The same seed always yields the same trajectory, without
    /// a seed one is drawn from process entropy and logged.
    pub fn simulate(
        &self,
        start: usize,
        max_steps: usize,
        seed: Option<u64>,
        stop_set: Option<&[usize]>,
    ) -> Result<Trajectory> {
        let stop = self.stop_bitset(start, stop_set)?;
        let seed = resolve_seed(seed);
        Ok(self.walk(start, max_steps, &stop, seed))
    }

    /// Draws `n` independent trajectories, trajectory `k` uses a seed derived from `(seed, k)`.
    pub fn simulate_ensemble(
        &self,
        n: usize,
        start: usize,
        max_steps: usize,
        seed: Option<u64>,
        stop_set: Option<&[usize]>,
    ) -> Result<Vec<Trajectory>> {
        let stop = self.stop_bitset(start, stop_set)?;
        let seed = resolve_seed(seed);
        info!(
            "Simulating {} trajectories of at most {} steps from state {}.",
            n, max_steps, start
        );
        Ok(walk_ensemble(self, n, start, max_steps, &stop, seed))
    }

    fn stop_bitset(&self, start: usize, stop_set: Option<&[usize]>) -> Result<FixedBitSet> {
        let n = self.msm.len();
        if start >= n {
            bail!("Start state {} is outside of the {} model states.", start, n);
        }
        let stop_set = stop_set.unwrap_or_default();
        if stop_set.iter().any(|&i| i >= n) {
            bail!(MsmError::InvalidSet {
                reason: String::from("stop states must be within the state space"),
                source_set: vec![start],
                target_set: stop_set.to_vec(),
            });
        }
        Ok(as_bitset(stop_set, n))
    }

    fn walk(&self, start: usize, max_steps: usize, stop: &FixedBitSet, seed: u64) -> Trajectory {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut states = Vec::with_capacity(max_steps + 1);
        let mut current = start;
        states.push(current);
        for _ in 0..max_steps {
            if stop.contains(current) {
                break;
            }
            current = self.rows[current].sample(&mut rng);
            states.push(current);
        }
        Trajectory {
            states,
            reached_stop: stop.contains(current),
        }
    }
}

cfg_if::cfg_if! {
if #[cfg(feature = "par-ensemble")] {
fn walk_ensemble(
    simulator: &TrajectorySimulator,
    n: usize,
    start: usize,
    max_steps: usize,
    stop: &FixedBitSet,
    seed: u64,
) -> Vec<Trajectory> {
    use rayon::prelude::*;
    (0..n)
        .into_par_iter()
        .map(|k| simulator.walk(start, max_steps, stop, sub_seed(seed, k as u64)))
        .collect()
}
} else {
fn walk_ensemble(
    simulator: &TrajectorySimulator,
    n: usize,
    start: usize,
    max_steps: usize,
    stop: &FixedBitSet,
    seed: u64,
) -> Vec<Trajectory> {
    (0..n)
        .map(|k| simulator.walk(start, max_steps, stop, sub_seed(seed, k as u64)))
        .collect()
}
}
}

fn resolve_seed(seed: Option<u64>) -> u64 {
    seed.unwrap_or_else(|| {
        let seed = rand::random();
        info!("No seed given, simulating with seed {}.", seed);
        seed
    })
}

/// Seed of the `index`-th trajectory of an ensemble (splitmix64 finaliser).
pub(crate) fn sub_seed(seed: u64, index: u64) -> u64 {
    let mut z = seed
        .wrapping_add(index.wrapping_add(1).wrapping_mul(0x9E37_79B9_7F4A_7C15));
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Empirical statistics over an ensemble of trajectories.
#[derive(Debug, Clone, PartialEq)]
pub struct EnsembleSummary {
    pub trajectories: usize,
    /// Fraction of all visited states (starting states included) spent in each state.
    pub occupancy: Distribution,
    /// Fraction of trajectories that ended in the stop set.
    pub hit_fraction: f64,
    /// Mean number of steps of the trajectories that ended in the stop set.
    pub mean_steps_to_stop: Option<f64>,
    /// Number of trajectories per distinct path, consecutive repeats collapsed.
    pub path_counts: HashMap<Vec<usize>, usize>,
}

impl EnsembleSummary {
    pub fn new(trajectories: &[Trajectory], num_states: usize) -> Result<Self> {
        let mut visits = vec![0_usize; num_states];
        let mut path_counts = HashMap::new();
        let mut stopped = 0;
        let mut stopped_steps = 0;
        for trajectory in trajectories {
            for &state in &trajectory.states {
                match visits.get_mut(state) {
                    Some(count) => *count += 1,
                    None => bail!(
                        "Trajectory visits state {} outside of {} states.",
                        state,
                        num_states
                    ),
                }
            }
            if trajectory.reached_stop {
                stopped += 1;
                stopped_steps += trajectory.steps();
            }
            *path_counts.entry(trajectory.path()).or_insert(0) += 1;
        }
        let total_visits = visits.iter().sum::<usize>();
        let occupancy = Distribution::from_fn(num_states, |i, _| {
            if total_visits == 0 {
                0.0
            } else {
                visits[i] as f64 / total_visits as f64
            }
        });
        let hit_fraction = if trajectories.is_empty() {
            0.0
        } else {
            stopped as f64 / trajectories.len() as f64
        };
        debug!(
            "Ensemble of {} trajectories, {} distinct paths.",
            trajectories.len(),
            path_counts.len()
        );
        Ok(Self {
            trajectories: trajectories.len(),
            occupancy,
            hit_fraction,
            mean_steps_to_stop: (stopped > 0).then(|| stopped_steps as f64 / stopped as f64),
            path_counts,
        })
    }

    /// Paths sorted by decreasing count, ties by path.
    pub fn most_common_paths(&self, k: usize) -> Vec<(&[usize], usize)> {
        self.path_counts
            .iter()
            .map(|(path, &count)| (path.as_slice(), count))
            .sorted_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)))
            .take(k)
            .collect()
    }
}

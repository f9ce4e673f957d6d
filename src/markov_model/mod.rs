use std::sync::OnceLock;

use anyhow::{anyhow, bail};
use fixedbitset::FixedBitSet;
use log::{debug, info};
use nalgebra::{Complex, DVector, Normed};

use crate::errors::MsmError;
use crate::f64_h;
use crate::landscape::{GenotypeIndex, LandscapeGraph};
use crate::transition_model::{TransitionMatrix, TransitionModelBuilder, DEFAULT_EPSILON};
use crate::Result;

pub(crate) mod connectivity;
use connectivity::{
    as_bitset, predecessors, reachable, strongly_connected_components, successors,
};

pub type Distribution = DVector<f64>;

pub const DEFAULT_MAX_ITERATIONS: usize = 10_000;

#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub enum StationaryMethod {
    /// LU solve of `(T' - I) pi = 0` with one equation replaced by `sum(pi) = 1`.
    #[default]
    Direct,
    /// Repeated `pi <- pi T` from the uniform distribution until the L1 change drops below
    /// epsilon.
    PowerIteration,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MsmConfig {
    pub epsilon: f64,
    pub max_iterations: usize,
    pub method: StationaryMethod,
}

impl Default for MsmConfig {
    fn default() -> Self {
        Self {
            epsilon: DEFAULT_EPSILON,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            method: StationaryMethod::default(),
        }
    }
}

impl MsmConfig {
    pub fn epsilon(mut self, epsilon: f64) -> Self {
        self.epsilon = epsilon;
        self
    }

    pub fn max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn method(mut self, method: StationaryMethod) -> Self {
        self.method = method;
        self
    }
}

/// Discrete-time Markov chain over the genotypes of a landscape.
///
/// The transition matrix is fixed at construction. The stationary distribution and the
/// eigenvalues are computed on first access and then kept for the lifetime of the model, so the
/// model can be shared between threads for read-only queries.
#[derive(Debug, Clone)]
pub struct MarkovStateModel {
    t: TransitionMatrix,
    config: MsmConfig,
    index: Option<GenotypeIndex>,
    stationary: OnceLock<Distribution>,
    eigenvalues: OnceLock<Vec<Complex<f64>>>,
}

impl MarkovStateModel {
    /// Wraps a transition matrix using the default configuration.
    /// Bails if the matrix is empty or not square, stochasticity and irreducibility are only
    /// checked by [`MarkovStateModel::validate`].
    ///
    /// # Example
    /// ```
    /// use gpmsm::markov_model::MarkovStateModel;
    /// use gpmsm::transition_model::TransitionMatrix;
    /// let t = TransitionMatrix::from_row_slice(2, 2, &[0.9, 0.1, 0.3, 0.7]);
    /// let msm = MarkovStateModel::new(t).unwrap();
    /// let pi = msm.stationary_distribution().unwrap();
    /// assert!((pi[0] - 0.75).abs() < 1e-10);
    /// assert!((pi[1] - 0.25).abs() < 1e-10);
    /// ```
    pub fn new(t: TransitionMatrix) -> Result<Self> {
        Self::with_config(t, MsmConfig::default())
    }

    pub fn with_config(t: TransitionMatrix, config: MsmConfig) -> Result<Self> {
        if t.is_empty() || !t.is_square() {
            bail!(
                "Transition matrix must be square and non-empty, got {}x{}.",
                t.nrows(),
                t.ncols()
            );
        }
        info!(
            "Setting up a Markov state model with {} states, epsilon {}.",
            t.nrows(),
            config.epsilon
        );
        Ok(Self {
            t,
            config,
            index: None,
            stationary: OnceLock::new(),
            eigenvalues: OnceLock::new(),
        })
    }

    /// Builds the transition matrix of the landscape and keeps the genotype index of the
    /// landscape. The tolerance of the builder is replaced by the one of the configuration.
    ///
    /// # Example
    /// ```
    /// use gpmsm::fixation::FixationModel;
    /// use gpmsm::landscape::LandscapeGraph;
    /// use gpmsm::markov_model::{MarkovStateModel, MsmConfig};
    /// use gpmsm::transition_model::TransitionModelBuilder;
    /// let landscape = LandscapeGraph::hypercube(&[1.0, 1.1, 1.2, 1.5]).unwrap();
    /// let builder = TransitionModelBuilder::new(FixationModel::Moran { population_size: 10.0 });
    /// let msm = MarkovStateModel::from_landscape(&landscape, &builder, MsmConfig::default()).unwrap();
    /// assert_eq!(msm.index_of(b"11"), Some(3));
    /// assert!(msm.validate().is_ok());
    /// ```
    pub fn from_landscape(
        landscape: &LandscapeGraph,
        builder: &TransitionModelBuilder,
        config: MsmConfig,
    ) -> Result<Self> {
        let t = builder.clone().epsilon(config.epsilon).build(landscape)?;
        let mut msm = Self::with_config(t, config)?;
        msm.index = Some(landscape.index().clone());
        Ok(msm)
    }

    pub fn transition_matrix(&self) -> &TransitionMatrix {
        &self.t
    }

    pub fn config(&self) -> &MsmConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.t.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.t.is_empty()
    }

    pub fn genotype_index(&self) -> Option<&GenotypeIndex> {
        self.index.as_ref()
    }

    pub fn index_of(&self, sequence: &[u8]) -> Option<usize> {
        self.index.as_ref().and_then(|index| index.get(sequence))
    }

    /// Sequence of the genotype at state `idx`, only known for models built from a landscape.
    pub fn genotype(&self, idx: usize) -> Option<&[u8]> {
        self.index.as_ref().and_then(|index| index.sequence(idx))
    }

    /// Checks that every entry lies in [0, 1] and every row sums to one, both within epsilon,
    /// and that every state can be reached from every other state.
    pub fn validate(&self) -> Result<()> {
        self.check_stochastic()?;
        self.check_irreducible()
    }

    pub fn check_stochastic(&self) -> Result<()> {
        let eps = self.config.epsilon;
        for (row, values) in self.t.row_iter().enumerate() {
            let row_sum = values.sum();
            let entries_valid = values
                .iter()
                .all(|&p| p.is_finite() && p >= -eps && p <= 1.0 + eps);
            if !entries_valid || (row_sum - 1.0).abs() > eps {
                bail!(MsmError::NonStochasticMatrix { row, row_sum });
            }
        }
        Ok(())
    }

    /// Communicating classes of the chain, ordered by their smallest state.
    pub fn communicating_classes(&self) -> Vec<Vec<usize>> {
        strongly_connected_components(&successors(&self.t))
    }

    pub fn is_irreducible(&self) -> bool {
        self.communicating_classes().len() == 1
    }

    pub fn check_irreducible(&self) -> Result<()> {
        let classes = self.communicating_classes();
        if classes.len() > 1 {
            let first = as_bitset(&classes[0], self.len());
            let unreachable = (0..self.len())
                .filter(|&i| !first.contains(i))
                .collect::<Vec<_>>();
            bail!(MsmError::ReducibleChain {
                components: classes.len(),
                unreachable
            });
        }
        Ok(())
    }

    /// Stationary distribution `pi` with `pi T = pi` and `sum(pi) = 1`.
    ///
    /// Computed on the first call and cached, later calls return the same vector.
    /// Bails if the matrix is not stochastic or the chain is reducible (the stationary
    /// distribution would not be unique), and with `MsmError::Convergence` if power iteration
    /// does not converge within the configured number of iterations.
    pub fn stationary_distribution(&self) -> Result<&Distribution> {
        if let Some(pi) = self.stationary.get() {
            return Ok(pi);
        }
        self.validate()?;
        let pi = match self.config.method {
            StationaryMethod::Direct => self.stationary_direct()?,
            StationaryMethod::PowerIteration => self.stationary_power_iteration()?,
        };
        Ok(self.stationary.get_or_init(|| pi))
    }

    fn stationary_direct(&self) -> Result<Distribution> {
        let n = self.len();
        let mut a = self.t.transpose() - TransitionMatrix::identity(n, n);
        a.row_mut(n - 1).fill(1.0);
        let mut b = Distribution::zeros(n);
        b[n - 1] = 1.0;
        let pi = a
            .lu()
            .solve(&b)
            .ok_or_else(|| anyhow!("Singular system while solving for the stationary distribution."))?;
        let pi = pi.map(|p| p.max(0.0));
        let total = pi.sum();
        debug!("Direct stationary solve, total mass before normalisation {}.", total);
        Ok(pi / total)
    }

    fn stationary_power_iteration(&self) -> Result<Distribution> {
        let n = self.len();
        let mut pi = Distribution::from_element(n, 1.0 / n as f64);
        let mut residual = f64::INFINITY;
        for iteration in 1..=self.config.max_iterations {
            let mut next = self.t.tr_mul(&pi);
            next /= next.sum();
            residual = (&next - &pi).lp_norm(1);
            pi = next;
            if residual < self.config.epsilon {
                debug!(
                    "Power iteration converged after {} iterations, residual {}.",
                    iteration, residual
                );
                return Ok(pi);
            }
        }
        bail!(MsmError::Convergence {
            iterations: self.config.max_iterations,
            residual
        })
    }

    /// Eigenvalues of the transition matrix sorted by decreasing magnitude, cached after the
    /// first call.
    pub fn eigenvalues(&self) -> &[Complex<f64>] {
        self.eigenvalues.get_or_init(|| {
            let mut values = self
                .t
                .complex_eigenvalues()
                .iter()
                .copied()
                .collect::<Vec<_>>();
            values.sort_by_key(|v| std::cmp::Reverse(f64_h::from(v.norm())));
            values
        })
    }

    /// Eigenvalues of magnitude below `1 - epsilon`, in the order of
    /// [`MarkovStateModel::eigenvalues`]. One is left out for every closed class and every
    /// periodic cycle of the chain.
    pub fn relaxation_eigenvalues(&self) -> Vec<Complex<f64>> {
        let threshold = 1.0 - self.config.epsilon;
        self.eigenvalues()
            .iter()
            .filter(|lambda| lambda.norm() < threshold)
            .copied()
            .collect()
    }

    /// Relaxation timescales `-1 / ln|lambda|` of the `k` largest non-unit eigenvalues, in units
    /// of steps. Bails with `MsmError::InsufficientStates` if fewer than `k` non-unit eigenvalues
    /// exist.
    pub fn timescales(&self, k: usize) -> Result<Vec<f64>> {
        let relaxing = self.relaxation_eigenvalues();
        if k > relaxing.len() {
            bail!(MsmError::InsufficientStates {
                requested: k,
                available: relaxing.len()
            });
        }
        Ok(relaxing
            .iter()
            .take(k)
            .map(|lambda| -1.0 / lambda.norm().ln())
            .collect())
    }

    /// Detailed balance `pi_i T_ij = pi_j T_ji` within epsilon.
    pub fn is_reversible(&self) -> Result<bool> {
        let pi = self.stationary_distribution()?;
        let n = self.len();
        Ok((0..n).all(|i| {
            (i + 1..n).all(|j| {
                (pi[i] * self.t[(i, j)] - pi[j] * self.t[(j, i)]).abs() <= self.config.epsilon
            })
        }))
    }

    /// Expected number of steps to first reach any of the `target` states, zero on the target
    /// and infinite for states that reach the target with probability below one.
    pub fn mfpt(&self, target: &[usize]) -> Result<Distribution> {
        let n = self.len();
        if target.is_empty() || target.iter().any(|&i| i >= n) {
            bail!(MsmError::InvalidSet {
                reason: String::from("target must be non-empty and within the state space"),
                source_set: Vec::new(),
                target_set: target.to_vec(),
            });
        }
        let target_set = as_bitset(target, n);
        let succ = successors(&self.t);
        let pred = predecessors(&self.t);
        let reaches_target = reachable(&pred, target, &FixedBitSet::with_capacity(n));
        let dead_ends = (0..n)
            .filter(|&i| !reaches_target.contains(i))
            .collect::<Vec<_>>();
        // states that may wander into a dead end before hitting the target
        let may_miss = reachable(&pred, &dead_ends, &target_set);

        let finite = (0..n)
            .filter(|&i| !target_set.contains(i) && !may_miss.contains(i))
            .collect::<Vec<_>>();
        let mut times = Distribution::from_fn(n, |i, _| {
            if target_set.contains(i) {
                0.0
            } else {
                f64::INFINITY
            }
        });
        if finite.is_empty() {
            return Ok(times);
        }
        let position = positions(&finite, n);
        let m = finite.len();
        let mut a = TransitionMatrix::identity(m, m);
        for (row, &i) in finite.iter().enumerate() {
            for &j in &succ[i] {
                if let Some(col) = position[j] {
                    a[(row, col)] -= self.t[(i, j)];
                }
            }
            a[(row, row)] -= self.t[(i, i)];
        }
        let solution = a
            .lu()
            .solve(&Distribution::from_element(m, 1.0))
            .ok_or_else(|| anyhow!("Singular system while solving for mean first passage times."))?;
        for (row, &i) in finite.iter().enumerate() {
            times[i] = solution[row];
        }
        Ok(times)
    }

    /// Distribution after `steps` steps of the chain started from `initial`.
    pub fn propagate(&self, initial: &Distribution, steps: usize) -> Result<Distribution> {
        if initial.len() != self.len() {
            bail!(
                "Initial distribution has {} entries, the model has {} states.",
                initial.len(),
                self.len()
            );
        }
        let mut p = initial.clone();
        for _ in 0..steps {
            p = self.t.tr_mul(&p);
        }
        Ok(p)
    }

    /// Probability of following exactly the given sequence of states, one step at a time.
    pub fn path_probability(&self, path: &[usize]) -> Result<f64> {
        if let Some(&state) = path.iter().find(|&&i| i >= self.len()) {
            bail!("State {} is outside of the {} model states.", state, self.len());
        }
        Ok(path
            .windows(2)
            .map(|step| self.t[(step[0], step[1])])
            .product())
    }
}

/// Position of every listed state in the list, `None` for states not listed.
pub(crate) fn positions(states: &[usize], n: usize) -> Vec<Option<usize>> {
    let mut position = vec![None; n];
    for (k, &i) in states.iter().enumerate() {
        position[i] = Some(k);
    }
    position
}

use std::collections::BinaryHeap;
use std::fmt::Display;

use anyhow::{anyhow, bail};
use fixedbitset::FixedBitSet;
use itertools::Itertools;
use log::{debug, info, warn};

use crate::errors::MsmError;
use crate::f64_h;
use crate::markov_model::connectivity::{as_bitset, predecessors, reachable, successors};
use crate::markov_model::{positions, Distribution, MarkovStateModel};
use crate::transition_model::TransitionMatrix;
use crate::Result;

pub type FluxMatrix = TransitionMatrix;

#[derive(Debug, Clone, PartialEq)]
pub struct Committors {
    /// Probability of reaching the target before the source.
    pub forward: Distribution,
    /// Probability that the source rather than the target was visited last.
    pub backward: Distribution,
}

/// One reactive pathway from the source to the target set.
#[derive(Debug, Clone, PartialEq)]
pub struct Pathway {
    pub states: Vec<usize>,
    /// Bottleneck flux carried by the pathway.
    pub flux: f64,
    /// Share of the total flux carried by the pathway.
    pub fraction: f64,
}

impl Display for Pathway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} (flux {:.6e}, {:.2}%)",
            self.states.iter().join(" -> "),
            self.flux,
            self.fraction * 100.0
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FluxResult {
    pub source: Vec<usize>,
    pub target: Vec<usize>,
    /// Stationary distribution of the chain the fluxes were computed on, `None` when the target
    /// cannot be reached from the source.
    pub stationary: Option<Distribution>,
    pub forward_committor: Distribution,
    pub backward_committor: Distribution,
    pub gross_flux: FluxMatrix,
    pub net_flux: FluxMatrix,
    pub total_flux: f64,
    /// Number of source to target transitions per step, `total_flux / sum(pi_i q-_i)`.
    pub rate: f64,
    /// Mean duration of a source to target cycle, `1 / rate`.
    pub mfpt: f64,
    pub pathways: Vec<Pathway>,
    /// Part of the total flux not assigned to any extracted pathway.
    pub unresolved_flux: f64,
}

impl FluxResult {
    fn disconnected(
        source: &[usize],
        target: &[usize],
        n: usize,
        committors: Committors,
    ) -> Self {
        Self {
            source: source.to_vec(),
            target: target.to_vec(),
            stationary: None,
            forward_committor: committors.forward,
            backward_committor: committors.backward,
            gross_flux: FluxMatrix::zeros(n, n),
            net_flux: FluxMatrix::zeros(n, n),
            total_flux: 0.0,
            rate: 0.0,
            mfpt: f64::INFINITY,
            pathways: Vec::new(),
            unresolved_flux: 0.0,
        }
    }
}

/// Chain on which the reactive fluxes are computed, together with its stationary distribution.
struct ReactiveChain {
    t: TransitionMatrix,
    pi: Distribution,
}

/// Transition path theory analysis between a source and a target set of genotypes.
///
/// For an irreducible model the fluxes are computed on the model itself. For a reducible model in
/// which the target can be reached from the source, the fluxes are computed on the
/// source-recycled chain: every transition out of the target, and out of states that cannot reach
/// the target any more, is redirected uniformly into the source.
///
/// # Example
/// ```
/// use gpmsm::flux::FluxAnalyzer;
/// use gpmsm::markov_model::MarkovStateModel;
/// use gpmsm::transition_model::TransitionMatrix;
/// let t = TransitionMatrix::from_row_slice(3, 3, &[0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0]);
/// let msm = MarkovStateModel::new(t).unwrap();
/// let result = FluxAnalyzer::new(&msm, &[0], &[2])
///     .unwrap()
///     .dominant_pathways(5, 1.0)
///     .unwrap();
/// assert_eq!(result.pathways[0].states, vec![0, 1, 2]);
/// assert!((result.pathways[0].fraction - 1.0).abs() < 1e-12);
/// ```
#[derive(Debug, Clone)]
pub struct FluxAnalyzer<'a> {
    msm: &'a MarkovStateModel,
    source: Vec<usize>,
    target: Vec<usize>,
}

impl<'a> FluxAnalyzer<'a> {
    /// Bails with `MsmError::InvalidSet` if either set is empty, the sets overlap or a state is
    /// outside of the model. Repeated states are ignored.
    pub fn new(msm: &'a MarkovStateModel, source: &[usize], target: &[usize]) -> Result<Self> {
        let invalid = |reason: &str| MsmError::InvalidSet {
            reason: String::from(reason),
            source_set: source.to_vec(),
            target_set: target.to_vec(),
        };
        if source.is_empty() || target.is_empty() {
            bail!(invalid("source and target must be non-empty"));
        }
        if source.iter().chain(target).any(|&i| i >= msm.len()) {
            bail!(invalid("states must be within the state space"));
        }
        let source = source.iter().copied().sorted_unstable().dedup().collect::<Vec<_>>();
        let target = target.iter().copied().sorted_unstable().dedup().collect::<Vec<_>>();
        if source.iter().any(|i| target.binary_search(i).is_ok()) {
            bail!(invalid("source and target must be disjoint"));
        }
        Ok(Self {
            msm,
            source,
            target,
        })
    }

    pub fn source(&self) -> &[usize] {
        &self.source
    }

    pub fn target(&self) -> &[usize] {
        &self.target
    }

    /// Forward and backward committors.
    ///
    /// If the target cannot be reached from the source the backward committor is the probability
    /// of reaching the source before the target under the forward chain.
    pub fn committors(&self) -> Result<Committors> {
        match self.reactive_chain()? {
            Some(chain) => self.committors_on(&chain),
            None => self.disconnected_committors(),
        }
    }

    /// Committors, gross and net flux, total flux and reaction rate. No pathways are extracted,
    /// the whole flux is reported as unresolved.
    ///
    /// Bails with `MsmError::FluxConsistency` if the net flux leaving the source differs from the
    /// net flux entering the target.
    pub fn net_flux(&self) -> Result<FluxResult> {
        let n = self.msm.len();
        info!(
            "Flux analysis from {:?} to {:?} over {} states.",
            self.source, self.target, n
        );
        let Some(chain) = self.reactive_chain()? else {
            info!("Target is not reachable from the source, the reactive flux is zero.");
            return Ok(FluxResult::disconnected(
                &self.source,
                &self.target,
                n,
                self.disconnected_committors()?,
            ));
        };
        let committors = self.committors_on(&chain)?;
        let (q_plus, q_minus) = (&committors.forward, &committors.backward);

        let gross_flux = FluxMatrix::from_fn(n, n, |i, j| {
            if i == j {
                0.0
            } else {
                chain.pi[i] * q_minus[i] * chain.t[(i, j)] * q_plus[j]
            }
        });
        let net_flux = FluxMatrix::from_fn(n, n, |i, j| {
            (gross_flux[(i, j)] - gross_flux[(j, i)]).max(0.0)
        });

        let out_of_source = self
            .source
            .iter()
            .map(|&i| net_flux.row(i).sum())
            .sum::<f64>();
        let into_target = self
            .target
            .iter()
            .map(|&j| net_flux.column(j).sum())
            .sum::<f64>();
        check_conservation(out_of_source, into_target, self.msm.config().epsilon)?;

        let total_flux = out_of_source;
        let reactive_weight = chain.pi.dot(q_minus);
        let rate = if reactive_weight > 0.0 {
            total_flux / reactive_weight
        } else {
            0.0
        };
        info!("Total flux {}, rate {}.", total_flux, rate);
        Ok(FluxResult {
            source: self.source.clone(),
            target: self.target.clone(),
            stationary: Some(chain.pi),
            forward_committor: committors.forward,
            backward_committor: committors.backward,
            gross_flux,
            net_flux,
            total_flux,
            rate,
            mfpt: 1.0 / rate,
            pathways: Vec::new(),
            unresolved_flux: total_flux,
        })
    }

    /// Net flux analysis followed by greedy extraction of at most `max_paths` maximum-bottleneck
    /// pathways, stopping once they cover `max_fraction` of the total flux.
    pub fn dominant_pathways(&self, max_paths: usize, max_fraction: f64) -> Result<FluxResult> {
        if !(0.0..=1.0).contains(&max_fraction) {
            bail!(
                "Fraction of the flux to cover must be within [0, 1], got {}.",
                max_fraction
            );
        }
        let mut result = self.net_flux()?;
        let (pathways, unresolved_flux) = extract_pathways(
            &result.net_flux,
            &self.source,
            &self.target,
            result.total_flux,
            max_paths,
            max_fraction,
            self.msm.config().epsilon,
        );
        result.pathways = pathways;
        result.unresolved_flux = unresolved_flux;
        Ok(result)
    }

    fn reactive_chain(&self) -> Result<Option<ReactiveChain>> {
        self.msm.check_stochastic()?;
        if self.msm.is_irreducible() {
            let pi = self.msm.stationary_distribution()?.clone();
            return Ok(Some(ReactiveChain {
                t: self.msm.transition_matrix().clone(),
                pi,
            }));
        }

        let t = self.msm.transition_matrix();
        let n = self.msm.len();
        let no_block = FixedBitSet::with_capacity(n);
        let from_source = reachable(&successors(t), &self.source, &no_block);
        if !self.target.iter().any(|&j| from_source.contains(j)) {
            return Ok(None);
        }
        warn!(
            "The chain is reducible, computing the flux on the chain recycled from {:?} into {:?}.",
            self.target, self.source
        );

        let target_set = as_bitset(&self.target, n);
        let reaches_target = reachable(&predecessors(t), &self.target, &no_block);
        let mut recycled = t.clone();
        let share = 1.0 / self.source.len() as f64;
        for i in 0..n {
            if target_set.contains(i) || !reaches_target.contains(i) {
                recycled.row_mut(i).fill(0.0);
                for &a in &self.source {
                    recycled[(i, a)] = share;
                }
            }
        }

        let closed = reachable(&successors(&recycled), &self.source, &no_block)
            .ones()
            .collect::<Vec<_>>();
        debug!("Recycled chain keeps {} of {} states.", closed.len(), n);
        let sub = recycled.select_rows(&closed).select_columns(&closed);
        let sub_msm = MarkovStateModel::with_config(sub, *self.msm.config())?;
        let sub_pi = sub_msm.stationary_distribution()?;
        let mut pi = Distribution::zeros(n);
        for (k, &i) in closed.iter().enumerate() {
            pi[i] = sub_pi[k];
        }
        Ok(Some(ReactiveChain { t: recycled, pi }))
    }

    fn committors_on(&self, chain: &ReactiveChain) -> Result<Committors> {
        let forward = hitting_probability(&chain.t, &self.target, &self.source)?;
        let n = chain.t.nrows();
        let reversed = TransitionMatrix::from_fn(n, n, |i, j| {
            if chain.pi[i] > 0.0 {
                chain.pi[j] * chain.t[(j, i)] / chain.pi[i]
            } else {
                0.0
            }
        });
        let backward = hitting_probability(&reversed, &self.source, &self.target)?;
        Ok(Committors { forward, backward })
    }

    fn disconnected_committors(&self) -> Result<Committors> {
        let t = self.msm.transition_matrix();
        Ok(Committors {
            forward: hitting_probability(t, &self.target, &self.source)?,
            backward: hitting_probability(t, &self.source, &self.target)?,
        })
    }
}

/// Probability of entering `hit` before `avoid` for every state, exactly one on `hit` and zero on
/// `avoid`. States that cannot reach `hit` without passing through `avoid` get zero, the others
/// come from an LU solve of the reduced system.
pub(crate) fn hitting_probability(
    t: &TransitionMatrix,
    hit: &[usize],
    avoid: &[usize],
) -> Result<Distribution> {
    let n = t.nrows();
    let hit_set = as_bitset(hit, n);
    let avoid_set = as_bitset(avoid, n);
    let can_hit = reachable(&predecessors(t), hit, &avoid_set);
    let unknown = (0..n)
        .filter(|&i| can_hit.contains(i) && !hit_set.contains(i) && !avoid_set.contains(i))
        .collect::<Vec<_>>();

    let mut q = Distribution::from_fn(n, |i, _| if hit_set.contains(i) { 1.0 } else { 0.0 });
    if unknown.is_empty() {
        return Ok(q);
    }
    let position = positions(&unknown, n);
    let m = unknown.len();
    let mut a = TransitionMatrix::identity(m, m);
    let mut b = Distribution::zeros(m);
    for (row, &i) in unknown.iter().enumerate() {
        for j in 0..n {
            let p = t[(i, j)];
            if p == 0.0 {
                continue;
            }
            if let Some(col) = position[j] {
                a[(row, col)] -= p;
            } else if hit_set.contains(j) {
                b[row] += p;
            }
        }
    }
    let solution = a
        .lu()
        .solve(&b)
        .ok_or_else(|| anyhow!("Singular system while solving for committor probabilities."))?;
    for (row, &i) in unknown.iter().enumerate() {
        q[i] = solution[row].clamp(0.0, 1.0);
    }
    Ok(q)
}

pub(crate) fn check_conservation(out_of_source: f64, into_target: f64, epsilon: f64) -> Result<()> {
    if (out_of_source - into_target).abs() > epsilon * out_of_source.abs().max(1.0) {
        bail!(MsmError::FluxConsistency {
            out_of_source,
            into_target
        });
    }
    Ok(())
}

/// Greedy pathway decomposition of a net flux matrix. Returns the pathways and the flux left
/// after extraction.
pub(crate) fn extract_pathways(
    net_flux: &FluxMatrix,
    source: &[usize],
    target: &[usize],
    total_flux: f64,
    max_paths: usize,
    max_fraction: f64,
    epsilon: f64,
) -> (Vec<Pathway>, f64) {
    let mut pathways = Vec::new();
    if total_flux <= 0.0 {
        return (pathways, 0.0);
    }
    let target_set = as_bitset(target, net_flux.nrows());
    let mut residual = net_flux.clone();
    let mut extracted = 0.0;
    while pathways.len() < max_paths && extracted < max_fraction * total_flux {
        let Some(bottleneck) = widest_bottleneck(&residual, source, &target_set) else {
            break;
        };
        if bottleneck <= epsilon * total_flux {
            break;
        }
        let Some(states) = smallest_path(&residual, source, &target_set, bottleneck) else {
            break;
        };
        for step in states.windows(2) {
            residual[(step[0], step[1])] = (residual[(step[0], step[1])] - bottleneck).max(0.0);
        }
        extracted += bottleneck;
        let pathway = Pathway {
            states,
            flux: bottleneck,
            fraction: bottleneck / total_flux,
        };
        debug!("Extracted pathway {}.", pathway);
        pathways.push(pathway);
    }
    let unresolved = (total_flux - extracted).max(0.0);
    info!(
        "Extracted {} pathway(s), unresolved flux {}.",
        pathways.len(),
        unresolved
    );
    (pathways, unresolved)
}

/// Largest bottleneck over all paths from the source into the target, paths do not continue
/// through target states.
fn widest_bottleneck(flux: &FluxMatrix, source: &[usize], target_set: &FixedBitSet) -> Option<f64> {
    let n = flux.nrows();
    let mut capacity = vec![0.0; n];
    let mut done = FixedBitSet::with_capacity(n);
    let mut queue = BinaryHeap::new();
    for &a in source {
        capacity[a] = f64::INFINITY;
        queue.push((f64_h::from(f64::INFINITY), a));
    }
    while let Some((cap, node)) = queue.pop() {
        if done.put(node) || target_set.contains(node) {
            continue;
        }
        for next in 0..n {
            let c = cap.0.min(flux[(node, next)]);
            if c > capacity[next] {
                capacity[next] = c;
                queue.push((f64_h::from(c), next));
            }
        }
    }
    target_set
        .ones()
        .map(|j| capacity[j])
        .filter(|&c| c > 0.0)
        .max_by_key(|&c| f64_h::from(c))
}

/// Lexicographically first path found by a depth-first search over edges carrying at least
/// `bottleneck`, visiting source states and neighbours in increasing order.
fn smallest_path(
    flux: &FluxMatrix,
    source: &[usize],
    target_set: &FixedBitSet,
    bottleneck: f64,
) -> Option<Vec<usize>> {
    let n = flux.nrows();
    let mut visited = FixedBitSet::with_capacity(n);
    for &start in source {
        if visited.put(start) {
            continue;
        }
        let mut path = vec![start];
        let mut next_candidate = vec![0_usize];
        while let Some(&node) = path.last() {
            if target_set.contains(node) {
                return Some(path);
            }
            let candidates = next_candidate.last_mut()?;
            match (*candidates..n).find(|&j| !visited.contains(j) && flux[(node, j)] >= bottleneck)
            {
                Some(j) => {
                    *candidates = j + 1;
                    visited.insert(j);
                    path.push(j);
                    next_candidate.push(0);
                }
                None => {
                    path.pop();
                    next_candidate.pop();
                }
            }
        }
    }
    None
}

use anyhow::bail;
use log::{debug, info, warn};
use nalgebra::DMatrix;

use crate::errors::MsmError;
use crate::fixation::FixationProbability;
use crate::landscape::Landscape;
use crate::Result;

pub type TransitionMatrix = DMatrix<f64>;

pub const DEFAULT_EPSILON: f64 = 1e-8;

/// How fixation probabilities of the single-mutation neighbours are turned into one-step
/// transition probabilities.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum NeighbourWeighting {
    /// `T[i][j] = fix(f_i, f_j) / k_i` where `k_i` is the number of neighbours of `i`.
    Uniform,
    /// `T[i][j] = mu * fix(f_i, f_j)` for a per-site mutation rate `mu`.
    MutationRate(f64),
}

/// What to do when the outgoing probabilities of a genotype sum to more than one.
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub enum RowOverflow {
    #[default]
    Fail,
    /// Rescale the outgoing probabilities to sum to one, leaving no self-transition.
    Renormalise,
}

#[derive(Debug, Clone)]
pub struct TransitionModelBuilder {
    fixation: Box<dyn FixationProbability>,
    weighting: NeighbourWeighting,
    overflow: RowOverflow,
    epsilon: f64,
}

impl TransitionModelBuilder {
    /// Creates a builder for the given fixation rule with uniform neighbour weighting, failing on
    /// overflowing rows and the default tolerance of 1e-8.
    ///
    /// # Example
    /// ```
    /// use gpmsm::fixation::FixationModel;
    /// use gpmsm::landscape::LandscapeGraph;
    /// use gpmsm::transition_model::{NeighbourWeighting, TransitionModelBuilder};
    /// let landscape = LandscapeGraph::hypercube(&[1.0, 1.1, 1.2, 1.5]).unwrap();
    /// let t = TransitionModelBuilder::new(FixationModel::Moran { population_size: 10.0 })
    ///     .weighting(NeighbourWeighting::MutationRate(0.1))
    ///     .build(&landscape)
    ///     .unwrap();
    /// assert_eq!(t.nrows(), 4);
    /// for row in t.row_iter() {
    ///     assert!((row.sum() - 1.0).abs() < 1e-12);
    /// }
    /// ```
    pub fn new<F: FixationProbability + 'static>(fixation: F) -> Self {
        Self::from_boxed(Box::new(fixation))
    }

    pub fn from_boxed(fixation: Box<dyn FixationProbability>) -> Self {
        Self {
            fixation,
            weighting: NeighbourWeighting::Uniform,
            overflow: RowOverflow::default(),
            epsilon: DEFAULT_EPSILON,
        }
    }

    pub fn weighting(mut self, weighting: NeighbourWeighting) -> Self {
        self.weighting = weighting;
        self
    }

    pub fn row_overflow(mut self, overflow: RowOverflow) -> Self {
        self.overflow = overflow;
        self
    }

    pub fn epsilon(mut self, epsilon: f64) -> Self {
        self.epsilon = epsilon;
        self
    }

    /// Builds the row-stochastic transition matrix of the landscape.
    /// Genotypes without neighbours become absorbing.
    ///
    /// Bails with `MsmError::InvalidFixation` if the fixation rule returns a value outside of
    /// [0, 1], and with `MsmError::InvalidRate` if the outgoing probabilities of a genotype exceed
    /// one (beyond the tolerance) while overflowing rows are not renormalised. Neighbours outside
    /// of the landscape and self-loops give `MsmError::InvalidLandscape`.
    pub fn build<L: Landscape + ?Sized>(&self, landscape: &L) -> Result<TransitionMatrix> {
        if let NeighbourWeighting::MutationRate(rate) = self.weighting {
            if !rate.is_finite() || rate < 0.0 {
                bail!("Mutation rate must be finite and non-negative, got {}.", rate);
            }
        }
        let n = landscape.len();
        info!(
            "Building the transition matrix for {} genotypes with {:?} fixation and {:?} weighting.",
            n, self.fixation, self.weighting
        );
        let mut t = TransitionMatrix::zeros(n, n);
        for i in 0..n {
            let neighbours = landscape.neighbours(i);
            if neighbours.is_empty() {
                debug!("Genotype {} has no neighbours and is absorbing.", i);
                t[(i, i)] = 1.0;
                continue;
            }
            if let Some(&j) = neighbours.iter().find(|&&j| j >= n || j == i) {
                bail!(MsmError::InvalidLandscape {
                    message: format!(
                        "genotype {} lists neighbour {} among {} genotypes",
                        i, j, n
                    )
                });
            }
            let fitness_i = landscape.fitness(i);
            let mut outgoing = 0.0;
            for &j in neighbours {
                let fix = self.fixation.probability(fitness_i, landscape.fitness(j));
                if !(0.0..=1.0).contains(&fix) {
                    bail!(MsmError::InvalidFixation {
                        from: i,
                        to: j,
                        value: fix
                    });
                }
                let p = match self.weighting {
                    NeighbourWeighting::Uniform => fix / neighbours.len() as f64,
                    NeighbourWeighting::MutationRate(rate) => rate * fix,
                };
                t[(i, j)] = p;
                outgoing += p;
            }
            if outgoing > 1.0 + self.epsilon {
                match self.overflow {
                    RowOverflow::Fail => bail!(MsmError::InvalidRate { row: i, outgoing }),
                    RowOverflow::Renormalise => {
                        warn!(
                            "Outgoing probabilities of genotype {} sum to {}, renormalising.",
                            i, outgoing
                        );
                        for &j in neighbours {
                            t[(i, j)] /= outgoing;
                        }
                        continue;
                    }
                }
            }
            t[(i, i)] = (1.0 - outgoing).max(0.0);
        }
        Ok(t)
    }
}

#[cfg(test)]
#[cfg_attr(coverage, coverage(off))]
mod tests;

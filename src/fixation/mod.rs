use std::fmt::{Debug, Display};
use std::sync::Arc;

use anyhow::bail;
use dyn_clone::DynClone;
use log::{info, warn};

use crate::Result;

pub const DEFAULT_POPULATION_SIZE: f64 = 100.0;

/// Probability that a single mutant with fitness `fitness_to` takes over a population fixed for
/// a genotype with fitness `fitness_from`.
pub trait FixationProbability: Debug + DynClone + Send + Sync {
    fn probability(&self, fitness_from: f64, fitness_to: f64) -> f64;
}

dyn_clone::clone_trait_object!(FixationProbability);

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum FixationType {
    Neutral,
    Moran,
    McCandlish,
    Metropolis,
    StrongSelection,
    Undef,
}

impl From<&str> for FixationType {
    fn from(name: &str) -> Self {
        match name.to_lowercase().as_str() {
            "neutral" => FixationType::Neutral,
            "moran" => FixationType::Moran,
            "mccandlish" | "kimura" => FixationType::McCandlish,
            "metropolis" => FixationType::Metropolis,
            "sswm" => FixationType::StrongSelection,
            _ => FixationType::Undef,
        }
    }
}

impl Display for FixationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FixationType::Neutral => write!(f, "neutral"),
            FixationType::Moran => write!(f, "Moran"),
            FixationType::McCandlish => write!(f, "McCandlish"),
            FixationType::Metropolis => write!(f, "Metropolis"),
            FixationType::StrongSelection => write!(f, "SSWM"),
            FixationType::Undef => write!(f, "Undefined"),
        }
    }
}

/// Built-in fixation rules.
///
/// `Moran` and `StrongSelection` work on multiplicative (strictly positive) fitness values,
/// `McCandlish` and `Metropolis` on additive (log) fitness values.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum FixationModel {
    /// Every mutant fixes with the drift probability `1/N`.
    Neutral { population_size: f64 },
    /// Moran process with relative fitness `r = f_to / f_from`: `(1 - 1/r) / (1 - 1/r^N)`.
    Moran { population_size: f64 },
    /// Sella-Hirsh / Kimura diffusion limit with `s = f_to - f_from`:
    /// `(1 - exp(-2s)) / (1 - exp(-2Ns))`.
    McCandlish { population_size: f64 },
    /// Always accept improvements, accept deleterious steps with `exp(N (f_to - f_from))`.
    Metropolis { population_size: f64 },
    /// Strong selection weak mutation, `1 - exp(-s)` for `s = (f_to - f_from) / f_from > 0`,
    /// deleterious and neutral steps never fix.
    StrongSelection,
}

impl FixationModel {
    /// Creates a fixation rule of the given type, the only parameter is the population size
    /// (defaults to 100) which the strong-selection rule ignores.
    ///
    /// # Example
    /// ```
    /// use gpmsm::fixation::{FixationModel, FixationProbability, FixationType};
    /// let moran = FixationModel::new(FixationType::Moran, &[10.0]).unwrap();
    /// assert_eq!(moran, FixationModel::Moran { population_size: 10.0 });
    /// assert!((moran.probability(1.0, 1.0) - 0.1).abs() < 1e-12);
    /// ```
    pub fn new(fixation_type: FixationType, params: &[f64]) -> Result<Self> {
        let model = match fixation_type {
            FixationType::Neutral => FixationModel::Neutral {
                population_size: parse_population_size(fixation_type, params)?,
            },
            FixationType::Moran => FixationModel::Moran {
                population_size: parse_population_size(fixation_type, params)?,
            },
            FixationType::McCandlish => FixationModel::McCandlish {
                population_size: parse_population_size(fixation_type, params)?,
            },
            FixationType::Metropolis => FixationModel::Metropolis {
                population_size: parse_population_size(fixation_type, params)?,
            },
            FixationType::StrongSelection => {
                if !params.is_empty() {
                    warn!("SSWM fixation takes no parameters, ignoring {:?}.", params);
                }
                FixationModel::StrongSelection
            }
            FixationType::Undef => bail!("Unknown fixation rule requested."),
        };
        info!("Setting up {} fixation.", model);
        Ok(model)
    }

    pub fn fixation_type(&self) -> FixationType {
        match self {
            FixationModel::Neutral { .. } => FixationType::Neutral,
            FixationModel::Moran { .. } => FixationType::Moran,
            FixationModel::McCandlish { .. } => FixationType::McCandlish,
            FixationModel::Metropolis { .. } => FixationType::Metropolis,
            FixationModel::StrongSelection => FixationType::StrongSelection,
        }
    }
}

fn parse_population_size(fixation_type: FixationType, params: &[f64]) -> Result<f64> {
    if params.len() > 1 {
        warn!(
            "Too many values provided for {} fixation, only the population size is used.",
            fixation_type
        );
    }
    let population_size = params.first().copied().unwrap_or(DEFAULT_POPULATION_SIZE);
    if !population_size.is_finite() || population_size < 1.0 {
        bail!(
            "Population size must be a finite number of at least 1, got {}.",
            population_size
        );
    }
    Ok(population_size)
}

impl FixationProbability for FixationModel {
    fn probability(&self, fitness_from: f64, fitness_to: f64) -> f64 {
        match *self {
            FixationModel::Neutral { population_size } => 1.0 / population_size,
            FixationModel::Moran { population_size } => {
                moran(fitness_from, fitness_to, population_size)
            }
            FixationModel::McCandlish { population_size } => {
                mccandlish(fitness_from, fitness_to, population_size)
            }
            FixationModel::Metropolis { population_size } => {
                let delta = fitness_to - fitness_from;
                if delta >= 0.0 {
                    1.0
                } else {
                    (population_size * delta).exp()
                }
            }
            FixationModel::StrongSelection => {
                let s = (fitness_to - fitness_from) / fitness_from;
                if s.is_nan() || fitness_from <= 0.0 {
                    f64::NAN
                } else if s > 0.0 {
                    -(-s).exp_m1()
                } else {
                    0.0
                }
            }
        }
    }
}

fn moran(fitness_from: f64, fitness_to: f64, population_size: f64) -> f64 {
    if fitness_from <= 0.0 || fitness_to <= 0.0 {
        return f64::NAN;
    }
    let r = fitness_to / fitness_from;
    if r == 1.0 {
        return 1.0 / population_size;
    }
    (1.0 - 1.0 / r) / (1.0 - r.powf(-population_size))
}

fn mccandlish(fitness_from: f64, fitness_to: f64, population_size: f64) -> f64 {
    let s = fitness_to - fitness_from;
    if s == 0.0 {
        return 1.0 / population_size;
    }
    let p = (-2.0 * s).exp_m1() / (-2.0 * population_size * s).exp_m1();
    if p.is_nan() {
        // both terms overflow for strongly deleterious steps
        0.0
    } else {
        p
    }
}

impl Display for FixationModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FixationModel::StrongSelection => write!(f, "{}", self.fixation_type()),
            FixationModel::Neutral { population_size }
            | FixationModel::Moran { population_size }
            | FixationModel::McCandlish { population_size }
            | FixationModel::Metropolis { population_size } => {
                write!(f, "{} [N = {}]", self.fixation_type(), population_size)
            }
        }
    }
}

/// Fixation rule backed by an arbitrary function of the two fitness values.
///
/// # Example
/// ```
/// use gpmsm::fixation::{CustomFixation, FixationProbability};
/// let greedy = CustomFixation::new("greedy", |from, to| if to > from { 1.0 } else { 0.0 });
/// assert_eq!(greedy.probability(1.0, 2.0), 1.0);
/// assert_eq!(greedy.probability(2.0, 1.0), 0.0);
/// ```
#[derive(Clone)]
pub struct CustomFixation {
    name: String,
    function: Arc<dyn Fn(f64, f64) -> f64 + Send + Sync>,
}

impl CustomFixation {
    pub fn new<F>(name: &str, function: F) -> Self
    where
        F: Fn(f64, f64) -> f64 + Send + Sync + 'static,
    {
        Self {
            name: name.to_string(),
            function: Arc::new(function),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Debug for CustomFixation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CustomFixation")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl FixationProbability for CustomFixation {
    fn probability(&self, fitness_from: f64, fitness_to: f64) -> f64 {
        (self.function)(fitness_from, fitness_to)
    }
}

#[cfg(test)]
#[cfg_attr(coverage, coverage(off))]
mod tests;

use thiserror::Error;

/// Failures raised by the landscape, transition model, MSM, flux and simulation code.
///
/// Errors are returned through the crate-wide `anyhow` result type, the concrete
/// variant can be recovered with `err.downcast_ref::<MsmError>()`.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MsmError {
    #[error("Outgoing transition probabilities of genotype {row} sum to {outgoing} > 1.")]
    InvalidRate { row: usize, outgoing: f64 },

    #[error("Fixation probability {value} for the step {from} -> {to} is outside of [0, 1].")]
    InvalidFixation { from: usize, to: usize, value: f64 },

    #[error("Row {row} of the transition matrix is not stochastic, row sum is {row_sum}.")]
    NonStochasticMatrix { row: usize, row_sum: f64 },

    #[error("The chain is reducible: {components} strongly connected components, states {unreachable:?} are not mutually reachable with state 0.")]
    ReducibleChain {
        components: usize,
        unreachable: Vec<usize>,
    },

    #[error("No convergence after {iterations} iterations, last residual {residual}.")]
    Convergence { iterations: usize, residual: f64 },

    #[error("Requested {requested} timescales but only {available} are available.")]
    InsufficientStates { requested: usize, available: usize },

    #[error("Invalid source/target sets ({reason}): source {source_set:?}, target {target_set:?}.")]
    InvalidSet {
        reason: String,
        source_set: Vec<usize>,
        target_set: Vec<usize>,
    },

    #[error("Flux is not conserved: {out_of_source} leaves the source but {into_target} enters the target.")]
    FluxConsistency {
        out_of_source: f64,
        into_target: f64,
    },

    #[error("Invalid landscape: {message}")]
    InvalidLandscape { message: String },
}

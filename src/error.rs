use derive_more::{Display, Error};

use crate::Status;

/// Errors surfaced by the probability engine, the barrier synthesis and the
/// dataset layer.
///
/// Upper-bound solver non-convergence is *not* represented here: it is
/// recovered locally by falling back to the box-approximation bound.
#[derive(Debug, Display, Error)]
pub enum Error {
    /// Malformed input rejected before any work is done (bad region bounds,
    /// non-positive noise, shape mismatches).
    #[display("invalid input: {_0}")]
    InvalidInput(#[error(not(source))] String),

    /// A dataset file had the wrong shape or inconsistent contents.
    #[display("dataset error: {_0}")]
    Dataset(#[error(not(source))] String),

    /// A dataset file failed to parse.
    #[display("dataset parse error")]
    DatasetParse(serde_json::Error),

    /// A dataset file could not be read or written.
    #[display("i/o error")]
    Io(std::io::Error),

    /// A probability-bound invariant failed after the consistency step.
    /// Indicates the system is inherently unsafe or the sparsity tolerance is
    /// too loose.
    #[display("probability invariant violated: {_0}")]
    InvariantViolation(#[error(not(source))] String),

    /// The barrier linear program admits no feasible assignment. Typically the
    /// probability bounds are too loose or the obstacle intersects the initial
    /// set.
    #[display("{_0} is infeasible")]
    Infeasible(#[error(not(source))] &'static str),

    /// An optimization solver failed to produce a usable solution.
    #[display("{context} solver failed with status {status:?}")]
    SolverFailure {
        context: &'static str,
        status: Status,
    },

    /// The requested synthesis backend is not compiled into this build.
    #[display("unsupported barrier algorithm: {_0}")]
    UnsupportedAlgorithm(#[error(not(source))] &'static str),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::DatasetParse(err)
    }
}

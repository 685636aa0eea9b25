//! Error kinds surfaced by the engine.  The core never silently repairs an
//! invariant break; workers treat per-candidate failures as "no improvement"
//! and the outer driver decides whether to abort or restart.

use crate::tree::NodeKind;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The distance matrix is unusable: too small, asymmetric, or contains a
    /// negative/non-finite entry.  Fatal at construction.
    #[error("invalid distance matrix: {0}")]
    InvalidMatrix(String),

    /// A topology edit broke (or would break) the ternary-tree invariant.
    /// Fatal for the affected tree.
    #[error("tree invariant violated: {0}")]
    InvariantViolation(String),

    /// Rejection sampling ran dry because no node of the requested kind
    /// exists.  Programming error.
    #[error("no {0:?} node available for sampling")]
    Starvation(NodeKind),

    /// A raw quartet cost fell outside `[min, max]` beyond tolerance,
    /// indicating a scoring bug.
    #[error("raw cost {raw} outside [{min}, {max}]")]
    NumericTolerance { raw: f64, min: f64, max: f64 },

    #[error("tree serialization failed")]
    Serialize(#[from] serde_json::Error),
}

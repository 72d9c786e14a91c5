use nalgebra::{storage::StorageMut, Complex, Dyn, RealField, Vector};
use thiserror::Error;

/// Result of one mixing step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// No stopping condition was reached, the iteration should continue with
    /// the proposed vector.
    Continue,
    /// The maximum component change dropped below the configured tolerance.
    Converged,
    /// The accumulated history is degenerate and no new vector could be
    /// proposed. The input vector is left untouched; the caller may retry the
    /// same iteration with a different vector or [reset](Mixer::reset) the
    /// session.
    Failed,
}

/// Error returned from session lifecycle and stepping operations.
///
/// All variants indicate misuse by the caller rather than a numeric failure.
/// Numeric failures are reported through [`Status::Failed`] instead.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SessionError {
    /// A session is already open on this engine instance.
    #[error("session already active")]
    AlreadyActive,
    /// There is no open session.
    #[error("no active session")]
    NotActive,
    /// The absolute iteration index is not the next unprocessed one for the
    /// session. Indices must advance one by one from the origin; only a step
    /// that returned [`Status::Failed`] leaves its index unprocessed and may
    /// be retried.
    #[error("iteration {iteration} does not follow reset origin {origin}")]
    InvalidIteration {
        /// The offending absolute iteration index.
        iteration: usize,
        /// The origin recorded at activation or the last reset.
        origin: usize,
    },
    /// The vector passed to the step does not match the engine dimension.
    #[error("vector length {actual} does not match engine dimension {expected}")]
    DimensionMismatch {
        /// Dimension the engine was configured with.
        expected: usize,
        /// Length of the vector passed in.
        actual: usize,
    },
    /// The session has accumulated as many iterations as the history can
    /// hold; the caller must reset or give up.
    #[error("history capacity {capacity} exceeded")]
    CapacityExceeded {
        /// The configured history capacity.
        capacity: usize,
    },
}

/// Interface of a mixing engine.
///
/// A mixer is a stateful iterative algorithm that proposes the next input
/// vector of a fixed-point iteration from the output of the external map.
/// State accumulates in a *session*: the period between [`activate`](Mixer::activate)
/// (or [`reset`](Mixer::reset)) and the next [`deactivate`](Mixer::deactivate)
/// or reset. Exactly one session may be open on an engine instance at a time
/// and steps within it are strictly sequential.
///
/// Iteration indices passed to [`mix_next`](Mixer::mix_next) are *absolute*:
/// the engine subtracts the origin recorded at activation, so several
/// independent engine instances can run concurrently without sharing any
/// counters.
pub trait Mixer<T: RealField + Copy> {
    /// Name of the mixer.
    const NAME: &'static str;

    /// Error reported on lifecycle misuse or an invalid step.
    type Error;

    /// Opens a session, allocating and zeroing all internal state.
    ///
    /// `origin` is the absolute iteration number at which the session starts;
    /// the first call to [`mix_next`](Mixer::mix_next) must use `origin + 1`.
    fn activate(&mut self, origin: usize) -> Result<(), Self::Error>;

    /// Discards the open session and starts a new one with a fresh origin.
    ///
    /// Equivalent to [`deactivate`](Mixer::deactivate) followed by
    /// [`activate`](Mixer::activate), performed atomically.
    fn reset(&mut self, origin: usize) -> Result<(), Self::Error>;

    /// Closes the open session, releasing all its state.
    fn deactivate(&mut self) -> Result<(), Self::Error>;

    /// Returns true while a session is open.
    fn is_active(&self) -> bool;

    /// Performs one mixing step.
    ///
    /// On entry, `v` holds the output of the external map for the previously
    /// proposed vector; `iteration` is the absolute iteration index. Indices
    /// must be consecutive within a session: the first step uses `origin + 1`
    /// and each successful step advances the expected index by one. A step
    /// that returned [`Status::Failed`] does not advance it, so the same
    /// index may be retried. On `Continue` and `Converged`, `v` is
    /// overwritten with the next proposed input vector. On `Failed` the
    /// proposed vector is left unchanged.
    fn mix_next<Sv>(
        &mut self,
        v: &mut Vector<Complex<T>, Dyn, Sv>,
        iteration: usize,
    ) -> Result<Status, Self::Error>
    where
        Sv: StorageMut<Complex<T>, Dyn>;

    /// Returns the maximum component change of the last step, if one has been
    /// computed in the open session.
    fn current_diff(&self) -> Option<T>;
}

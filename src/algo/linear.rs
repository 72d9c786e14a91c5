//! Plain damped mixing.
//!
//! The simplest way of driving a fixed-point iteration towards
//! self-consistency: every step applies a fixed fraction of the raw residual,
//! `V ← V + α·(Φ(V) − V)`, with no history and no correction. Converges only
//! for sufficiently contractive maps and slowly near self-consistency, but it
//! has no failure modes and serves as the baseline that
//! [Broyden](super::broyden) mixing is measured against.
//!
//! The lifecycle and status contract is identical to the Broyden engine so
//! the two can be swapped freely in the [driver](crate::driver).

use getset::{CopyGetters, Setters};
use log::debug;
use nalgebra::{
    convert, storage::StorageMut, Complex, ComplexField, DimName, Dyn, OVector, RealField,
    Vector, U1,
};
use num_traits::{One, Zero};

use crate::core::{Mixer, SessionError, Status};

/// Options for the [`Linear`] mixer.
#[derive(Debug, Clone, Copy, CopyGetters, Setters)]
#[getset(get_copy = "pub")]
pub struct LinearOptions<T: RealField + Copy> {
    /// Length of the vectors being mixed.
    dim: usize,
    /// Mixing coefficient applied to the residual. Default: `0.5`.
    #[getset(set = "pub")]
    alpha: T,
    /// Convergence tolerance on the maximum component change. Default:
    /// `1e-9`.
    #[getset(set = "pub")]
    tolerance: T,
}

impl<T: RealField + Copy> LinearOptions<T> {
    /// Initializes the options for vectors of the given length with default
    /// values.
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            alpha: convert(0.5),
            tolerance: convert(1e-9),
        }
    }
}

struct Session<T: RealField + Copy> {
    origin: usize,
    last_it: usize,
    v: OVector<Complex<T>, Dyn>,
    v_prev: OVector<Complex<T>, Dyn>,
    current_diff: Option<T>,
}

/// Plain damped mixer.
///
/// See [module](self) documentation for more details.
pub struct Linear<T: RealField + Copy> {
    options: LinearOptions<T>,
    session: Option<Session<T>>,
}

impl<T: RealField + Copy> Linear<T> {
    /// Initializes the mixer for vectors of the given length with default
    /// options.
    pub fn new(dim: usize) -> Self {
        Self::with_options(LinearOptions::new(dim))
    }

    /// Initializes the mixer with given options.
    pub fn with_options(options: LinearOptions<T>) -> Self {
        Self {
            options,
            session: None,
        }
    }
}

impl<T: RealField + Copy> Mixer<T> for Linear<T> {
    const NAME: &'static str = "Linear";

    type Error = SessionError;

    fn activate(&mut self, origin: usize) -> Result<(), Self::Error> {
        if self.session.is_some() {
            return Err(SessionError::AlreadyActive);
        }
        let dim = self.options.dim;
        self.session = Some(Session {
            origin,
            last_it: 0,
            v: OVector::zeros_generic(Dyn(dim), U1::name()),
            v_prev: OVector::zeros_generic(Dyn(dim), U1::name()),
            current_diff: None,
        });
        Ok(())
    }

    fn reset(&mut self, origin: usize) -> Result<(), Self::Error> {
        if self.session.is_none() {
            return Err(SessionError::NotActive);
        }
        self.session = None;
        self.activate(origin)
    }

    fn deactivate(&mut self) -> Result<(), Self::Error> {
        if self.session.take().is_none() {
            return Err(SessionError::NotActive);
        }
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.session.is_some()
    }

    fn mix_next<Sv>(
        &mut self,
        v: &mut Vector<Complex<T>, Dyn, Sv>,
        iteration: usize,
    ) -> Result<Status, Self::Error>
    where
        Sv: StorageMut<Complex<T>, Dyn>,
    {
        let LinearOptions {
            alpha, tolerance, ..
        } = self.options;

        let session = self.session.as_mut().ok_or(SessionError::NotActive)?;

        let dim = session.v.nrows();
        if v.nrows() != dim {
            return Err(SessionError::DimensionMismatch {
                expected: dim,
                actual: v.nrows(),
            });
        }

        // Same consecutive-index contract as the Broyden engine.
        let it = iteration.saturating_sub(session.origin);
        if it != session.last_it + 1 {
            return Err(SessionError::InvalidIteration {
                iteration,
                origin: session.origin,
            });
        }

        // Same first-step rule as the Broyden engine: unit coefficient when
        // there is no previous residual to damp against.
        let coefficient = if it > 1 {
            Complex::new(alpha, T::zero())
        } else {
            Complex::new(T::one(), T::zero())
        };

        session.v_prev.copy_from(&session.v);
        for i in 0..dim {
            let residual = v[i] - session.v_prev[i];
            session.v[i] = session.v_prev[i] + coefficient * residual;
            v[i] = session.v[i];
        }
        session.last_it = it;

        if it == 1 {
            return Ok(Status::Continue);
        }

        let mut max_diff = T::zero();
        for i in 0..dim {
            let diff = (session.v[i] - session.v_prev[i]).modulus();
            if diff > max_diff {
                max_diff = diff;
            }
        }
        session.current_diff = Some(max_diff);
        debug!("linear: diff = {}", max_diff);

        if max_diff < tolerance {
            Ok(Status::Converged)
        } else {
            Ok(Status::Continue)
        }
    }

    fn current_diff(&self) -> Option<T> {
        self.session.as_ref().and_then(|session| session.current_diff)
    }
}

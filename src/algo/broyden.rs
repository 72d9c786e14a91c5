//! Generalized Broyden mixing.
//!
//! A multisecant quasi-Newton method for fixed-point iterations `V = Φ(V)`
//! over complex vectors. The engine accumulates normalized secant pairs from
//! the history of inputs and residuals, builds their Gram matrix and solves a
//! regularized linear system for the correction coefficients that turn plain
//! damped mixing into a quasi-Newton step. The regularization weight `ω₀`
//! controls how much the accumulated history is trusted; `ω₀ = 0` disables it
//! entirely, relying purely on the conditioning of the Gram matrix.
//!
//! The first step of a session has no history and is pure mixing with unit
//! coefficient; the second step reduces to the secant method.
//!
//! # References
//!
//! \[1\] [D. D. Johnson, Modified Broyden's method for accelerating
//! convergence in self-consistent
//! calculations](https://journals.aps.org/prb/abstract/10.1103/PhysRevB.38.12807)
//!
//! \[2\] [V. Eyert, A Comparative Study on Methods for Convergence
//! Acceleration of Iterative Vector
//! Sequences](https://www.sciencedirect.com/science/article/pii/S0021999196900059)

use getset::{CopyGetters, Setters};
use log::debug;
use nalgebra::{
    convert, storage::StorageMut, Complex, ComplexField, DimName, Dyn, OMatrix, OVector,
    RealField, Vector, U1,
};
use num_traits::{One, Zero};

use crate::core::{Mixer, SessionError, Status};
use crate::linalg;

/// Options for the [`Broyden`] mixing engine.
///
/// The options must not be mutated while a session is open; they are read on
/// every step and the session allocations are sized at activation.
#[derive(Debug, Clone, Copy, CopyGetters, Setters)]
#[getset(get_copy = "pub")]
pub struct BroydenOptions<T: RealField + Copy> {
    /// Length of the vectors being mixed.
    dim: usize,
    /// Maximum number of iterations tracked in one session. Also bounds the
    /// number of steps a session can take. Default: `100`.
    capacity: usize,
    /// Mixing coefficient applied to the residual. Default: `0.5`.
    #[getset(set = "pub")]
    alpha: T,
    /// Regularization weight added to the diagonal of the history Gram matrix
    /// before inversion. Default: `0.01`.
    #[getset(set = "pub")]
    omega0: T,
    /// Convergence tolerance on the maximum component change. Default:
    /// `1e-9`.
    #[getset(set = "pub")]
    tolerance: T,
}

impl<T: RealField + Copy> BroydenOptions<T> {
    /// Initializes the options for vectors of the given length with default
    /// values.
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            capacity: 100,
            alpha: convert(0.5),
            omega0: convert(0.01),
            tolerance: convert(1e-9),
        }
    }

    /// Sets the history capacity.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }
}

/// Fixed-capacity arena of normalized secant pairs and their Gram matrix.
///
/// Pair `p` is recorded at relative iteration `p + 2`; only the prefix
/// `0..len` is populated, entries beyond it are zero and never read. The
/// newest slot may be overwritten, which is what allows retrying an iteration
/// after a [`Status::Failed`] step.
struct History<T: RealField + Copy> {
    capacity: usize,
    len: usize,
    dv: Vec<OVector<Complex<T>, Dyn>>,
    df: Vec<OVector<Complex<T>, Dyn>>,
    u: Vec<OVector<Complex<T>, Dyn>>,
    a: OMatrix<Complex<T>, Dyn, Dyn>,
    c: OVector<Complex<T>, Dyn>,
}

/// Conjugate-linear inner product `⟨a, b⟩ = Σ aᵢ · conj(bᵢ)`.
fn inner<T: RealField + Copy>(
    a: &OVector<Complex<T>, Dyn>,
    b: &OVector<Complex<T>, Dyn>,
) -> Complex<T> {
    b.dotc(a)
}

impl<T: RealField + Copy> History<T> {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            len: 0,
            dv: Vec::new(),
            df: Vec::new(),
            u: Vec::new(),
            a: OMatrix::zeros_generic(Dyn(capacity), Dyn(capacity)),
            c: OVector::zeros_generic(Dyn(capacity), U1::name()),
        }
    }

    /// Normalizes and records a secant pair in the given slot, extending the
    /// Gram matrix by the corresponding row and column.
    ///
    /// Both deltas are divided by the same scalar, the square root of the
    /// *unconjugated* sum of squares of the residual delta. This is not a
    /// norm for complex vectors and is kept on purpose; see the references in
    /// the module docs.
    ///
    /// Returns false when the normalizer is exactly zero (the residual did
    /// not change), in which case nothing is recorded.
    fn record(
        &mut self,
        slot: usize,
        mut raw_dv: OVector<Complex<T>, Dyn>,
        mut raw_df: OVector<Complex<T>, Dyn>,
    ) -> bool {
        debug_assert!(slot < self.capacity, "secant slot out of capacity");
        debug_assert!(slot <= self.len, "secant slots must be contiguous");

        let normalizer = raw_df.iter().map(|&z| z * z).sum::<Complex<T>>().sqrt();
        if normalizer.modulus() == T::zero() {
            return false;
        }

        raw_df /= normalizer;
        raw_dv /= normalizer;

        if slot == self.dv.len() {
            self.dv.push(raw_dv);
            self.df.push(raw_df);
        } else {
            self.dv[slot] = raw_dv;
            self.df[slot] = raw_df;
        }
        self.len = slot + 1;

        for i in 0..=slot {
            let product = inner(&self.df[i], &self.df[slot]);
            self.a[(i, slot)] = product;
            self.a[(slot, i)] = product.conj();
        }

        true
    }

    /// Builds the regularized Gram submatrix `A + ω₀²·I` over the populated
    /// prefix.
    fn regularized(&self, omega0: T) -> OMatrix<Complex<T>, Dyn, Dyn> {
        let m = self.len;
        let mut t = self.a.view((0, 0), (m, m)).clone_owned();
        let weight = Complex::new(omega0 * omega0, T::zero());
        for i in 0..m {
            t[(i, i)] += weight;
        }
        t
    }

    /// Recomputes the combination vectors `U[p] = α·DF[p] + DV[p]`.
    fn update_u(&mut self, alpha: T) {
        let alpha = Complex::new(alpha, T::zero());
        self.u.clear();
        for p in 0..self.len {
            self.u.push(&self.df[p] * alpha + &self.dv[p]);
        }
    }

    /// Recomputes the projection coefficients `c[p] = ⟨F, DF[p]⟩` of the
    /// current residual onto the recorded residual deltas.
    fn update_c(&mut self, f: &OVector<Complex<T>, Dyn>) {
        for p in 0..self.len {
            self.c[p] = inner(f, &self.df[p]);
        }
    }

    /// Computes the correction term `corrᵢ = Σₙₖ c[k]·Beta[k][n]·U[n]ᵢ`.
    fn correction(&self, beta: &OMatrix<Complex<T>, Dyn, Dyn>) -> OVector<Complex<T>, Dyn> {
        let m = self.len;
        let dim = self.dv[0].nrows();

        let gamma = beta.tr_mul(&self.c.rows(0, m));

        let mut corr: OVector<Complex<T>, Dyn> = OVector::zeros_generic(Dyn(dim), U1::name());
        for n in 0..m {
            corr.axpy(gamma[n], &self.u[n], Complex::one());
        }
        corr
    }
}

/// Per-session state, created on activation and destroyed on deactivation.
struct Session<T: RealField + Copy> {
    origin: usize,
    /// Relative index of the last successful step; a failed step does not
    /// advance it, which is what permits retrying the same index.
    last_it: usize,
    v: OVector<Complex<T>, Dyn>,
    v_prev: OVector<Complex<T>, Dyn>,
    f: OVector<Complex<T>, Dyn>,
    f_prev: OVector<Complex<T>, Dyn>,
    history: History<T>,
    current_diff: Option<T>,
}

impl<T: RealField + Copy> Session<T> {
    fn new(dim: usize, capacity: usize, origin: usize) -> Self {
        let zero = || OVector::zeros_generic(Dyn(dim), U1::name());
        Self {
            origin,
            last_it: 0,
            v: zero(),
            v_prev: zero(),
            f: zero(),
            f_prev: zero(),
            history: History::new(capacity),
            current_diff: None,
        }
    }
}

/// Broyden mixing engine.
///
/// See [module](self) documentation for more details.
pub struct Broyden<T: RealField + Copy> {
    options: BroydenOptions<T>,
    session: Option<Session<T>>,
}

impl<T: RealField + Copy> Broyden<T> {
    /// Initializes the engine for vectors of the given length with default
    /// options.
    pub fn new(dim: usize) -> Self {
        Self::with_options(BroydenOptions::new(dim))
    }

    /// Initializes the engine with given options.
    pub fn with_options(options: BroydenOptions<T>) -> Self {
        Self {
            options,
            session: None,
        }
    }

    /// Returns the options the engine was configured with.
    pub fn options(&self) -> &BroydenOptions<T> {
        &self.options
    }
}

impl<T: RealField + Copy> Mixer<T> for Broyden<T> {
    const NAME: &'static str = "Broyden";

    type Error = SessionError;

    fn activate(&mut self, origin: usize) -> Result<(), Self::Error> {
        if self.session.is_some() {
            return Err(SessionError::AlreadyActive);
        }
        self.session = Some(Session::new(self.options.dim, self.options.capacity, origin));
        Ok(())
    }

    fn reset(&mut self, origin: usize) -> Result<(), Self::Error> {
        if self.session.is_none() {
            return Err(SessionError::NotActive);
        }
        debug!("broyden reset at iteration {}", origin);
        self.session = Some(Session::new(self.options.dim, self.options.capacity, origin));
        Ok(())
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
        let BroydenOptions {
            alpha,
            omega0,
            tolerance,
            ..
        } = self.options;

        let session = self.session.as_mut().ok_or(SessionError::NotActive)?;

        let dim = session.v.nrows();
        if v.nrows() != dim {
            return Err(SessionError::DimensionMismatch {
                expected: dim,
                actual: v.nrows(),
            });
        }

        // Relative iteration within the session, starting at 1. The history
        // layout requires consecutive steps, so anything other than the next
        // unprocessed index (which a failed step leaves unprocessed) is a
        // caller bug.
        let it = iteration.saturating_sub(session.origin);
        if it != session.last_it + 1 {
            return Err(SessionError::InvalidIteration {
                iteration,
                origin: session.origin,
            });
        }
        if it > session.history.capacity {
            return Err(SessionError::CapacityExceeded {
                capacity: session.history.capacity,
            });
        }

        // The residual is the external map's output minus the input that
        // produced it.
        session.f_prev.copy_from(&session.f);
        for i in 0..dim {
            session.f[i] = v[i] - session.v[i];
        }

        let correction = if it > 1 {
            let raw_df = &session.f - &session.f_prev;
            let raw_dv = &session.v - &session.v_prev;

            if !session.history.record(it - 2, raw_dv, raw_df) {
                debug!("broyden: zero secant normalizer at iteration {}", iteration);
                // Restore the last committed residual so the step can be
                // retried against it.
                session.f.copy_from(&session.f_prev);
                return Ok(Status::Failed);
            }

            let t = session.history.regularized(omega0);
            let beta = match linalg::decompose(t) {
                Ok(lu) if !lu.degenerate() => lu.inverse(),
                _ => {
                    debug!(
                        "broyden: singular regularized gram matrix at iteration {}",
                        iteration
                    );
                    session.f.copy_from(&session.f_prev);
                    return Ok(Status::Failed);
                }
            };

            session.history.update_u(alpha);
            session.history.update_c(&session.f);

            Some(session.history.correction(&beta))
        } else {
            None
        };

        session.v_prev.copy_from(&session.v);
        match correction {
            Some(corr) => {
                let alpha = Complex::new(alpha, T::zero());
                for i in 0..dim {
                    session.v[i] = session.v_prev[i] + alpha * session.f[i] - corr[i];
                }
            }
            // The first iteration has no history; pure mixing with unit
            // coefficient.
            None => {
                for i in 0..dim {
                    session.v[i] = session.v_prev[i] + session.f[i];
                }
            }
        }

        for i in 0..dim {
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
        debug!("broyden: diff = {}", max_diff);

        if max_diff < tolerance {
            debug!("broyden: converged");
            Ok(Status::Converged)
        } else {
            Ok(Status::Continue)
        }
    }

    fn current_diff(&self) -> Option<T> {
        self.session.as_ref().and_then(|session| session.current_diff)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c(re: f64, im: f64) -> Complex<f64> {
        Complex::new(re, im)
    }

    fn vector(entries: &[Complex<f64>]) -> OVector<Complex<f64>, Dyn> {
        OVector::from_vec_generic(Dyn(entries.len()), U1::name(), entries.to_vec())
    }

    #[test]
    fn first_step_is_pure_mixing() {
        for (alpha, omega0) in [(0.5, 0.01), (0.1, 0.0), (0.9, 2.0)] {
            let mut options = BroydenOptions::new(3);
            options.set_alpha(alpha);
            options.set_omega0(omega0);
            let mut engine = Broyden::with_options(options);
            engine.activate(7).unwrap();

            let out = vector(&[c(1.0, -2.0), c(0.5, 0.25), c(-3.0, 0.0)]);
            let mut v = out.clone();
            let status = engine.mix_next(&mut v, 8).unwrap();

            // V_prev is zero after activation, so the step must reproduce the
            // map output exactly: V = V_prev + F with unit coefficient.
            assert_eq!(status, Status::Continue);
            assert_eq!(v, out);
            assert_eq!(engine.current_diff(), None);
        }
    }

    #[test]
    fn reset_is_equivalent_to_fresh_activation() {
        let options = BroydenOptions::new(2).with_capacity(10);

        let mut seasoned = Broyden::with_options(options);
        seasoned.activate(0).unwrap();
        for (i, out) in [
            vector(&[c(1.0, 2.0), c(-0.5, 0.0)]),
            vector(&[c(0.8, 1.5), c(-0.3, 0.1)]),
            vector(&[c(0.7, 1.2), c(-0.2, 0.2)]),
        ]
        .into_iter()
        .enumerate()
        {
            let mut v = out;
            seasoned.mix_next(&mut v, i + 1).unwrap();
        }
        seasoned.reset(3).unwrap();

        let mut fresh = Broyden::with_options(options);
        fresh.activate(3).unwrap();

        let out = vector(&[c(0.6, 1.0), c(-0.1, 0.3)]);
        let mut v1 = out.clone();
        let mut v2 = out;
        let s1 = seasoned.mix_next(&mut v1, 4).unwrap();
        let s2 = fresh.mix_next(&mut v2, 4).unwrap();

        assert_eq!(s1, s2);
        assert_eq!(v1, v2);
    }

    #[test]
    fn gram_matrix_is_hermitian() {
        let mut engine = Broyden::new(2);
        engine.activate(0).unwrap();

        let outputs = [
            vector(&[c(1.0, 0.5), c(-0.5, 1.0)]),
            vector(&[c(0.4, 0.9), c(-0.1, 0.3)]),
            vector(&[c(0.9, -0.2), c(0.6, 0.8)]),
            vector(&[c(0.2, 0.1), c(-0.7, 0.4)]),
            vector(&[c(0.3, 0.6), c(0.1, -0.5)]),
        ];

        for (i, out) in outputs.into_iter().enumerate() {
            let mut v = out;
            engine.mix_next(&mut v, i + 1).unwrap();

            let history = &engine.session.as_ref().unwrap().history;
            for row in 0..history.len {
                for col in 0..history.len {
                    let delta = history.a[(row, col)] - history.a[(col, row)].conj();
                    assert!(delta.norm() < 1e-12);
                }
            }
        }
    }

    #[test]
    fn reported_diff_matches_recomputation() {
        let mut engine = Broyden::new(2);
        engine.activate(0).unwrap();

        let outputs = [
            vector(&[c(1.0, 0.0), c(2.0, -1.0)]),
            vector(&[c(0.5, 0.2), c(1.5, -0.5)]),
            vector(&[c(0.4, 0.1), c(1.2, -0.3)]),
        ];

        for (i, out) in outputs.into_iter().enumerate() {
            let mut v = out;
            engine.mix_next(&mut v, i + 1).unwrap();

            let session = engine.session.as_ref().unwrap();
            let expected = (0..2)
                .map(|j| (session.v[j] - session.v_prev[j]).modulus())
                .fold(0.0, f64::max);

            if i == 0 {
                assert_eq!(engine.current_diff(), None);
            } else {
                assert_eq!(engine.current_diff(), Some(expected));
            }
        }
    }

    #[test]
    fn unchanged_residual_fails_without_panicking() {
        let mut options = BroydenOptions::new(1);
        options.set_omega0(0.0);
        let mut engine = Broyden::with_options(options);
        engine.activate(0).unwrap();

        // First output: V becomes [1], F stays [1].
        let mut v = vector(&[c(1.0, 0.0)]);
        assert_eq!(engine.mix_next(&mut v, 1).unwrap(), Status::Continue);

        // Map output chosen so the new residual equals the previous one; the
        // secant normalizer is exactly zero.
        let before = vector(&[c(2.0, 0.0)]);
        let mut v = before.clone();
        assert_eq!(engine.mix_next(&mut v, 2).unwrap(), Status::Failed);
        // The proposed vector must be left untouched on failure.
        assert_eq!(v, before);
    }

    #[test]
    fn iteration_gap_is_rejected() {
        let mut engine = Broyden::new(1);
        engine.activate(0).unwrap();

        let mut v = vector(&[c(1.0, 0.0)]);
        engine.mix_next(&mut v, 1).unwrap();

        // Skipping an index would leave a hole in the secant history.
        let mut v = vector(&[c(0.5, 0.0)]);
        assert_eq!(
            engine.mix_next(&mut v, 3),
            Err(SessionError::InvalidIteration {
                iteration: 3,
                origin: 0
            })
        );
    }

    #[test]
    fn failed_step_can_be_retried() {
        let mut options = BroydenOptions::new(1);
        options.set_omega0(0.0);
        let mut engine = Broyden::with_options(options);
        engine.activate(0).unwrap();

        let mut v = vector(&[c(1.0, 0.0)]);
        engine.mix_next(&mut v, 1).unwrap();

        // Output chosen so the residual repeats and the step fails.
        let mut v = vector(&[c(2.0, 0.0)]);
        assert_eq!(engine.mix_next(&mut v, 2).unwrap(), Status::Failed);

        // Retrying the same index with a different output must behave as if
        // the failed attempt never happened: the secant update through
        // (V0, F1) = (0, 1) and (V1, F2) = (1, 0.5) gives exactly 2.
        let mut v = vector(&[c(1.5, 0.0)]);
        assert_eq!(engine.mix_next(&mut v, 2).unwrap(), Status::Continue);
        assert!((v[0].re - 2.0).abs() < 1e-12);
        assert!(v[0].im.abs() < 1e-12);
    }

    #[test]
    fn identical_residual_deltas_fail() {
        let mut options = BroydenOptions::new(2);
        options.set_omega0(0.0);
        let mut engine = Broyden::with_options(options);
        engine.activate(0).unwrap();

        let mut v = vector(&[c(1.0, 0.0), c(0.5, 0.0)]);
        engine.mix_next(&mut v, 1).unwrap();
        let mut v = vector(&[c(4.0, 0.0), c(1.0, 0.0)]);
        engine.mix_next(&mut v, 2).unwrap();

        // Third output crafted (in exact dyadic arithmetic) so the new
        // residual delta repeats the previous one; without regularization
        // the history Gram matrix is exactly singular.
        let before = vector(&[c(4.5, 0.0), c(0.5, 0.0)]);
        let mut v = before.clone();
        assert_eq!(engine.mix_next(&mut v, 3).unwrap(), Status::Failed);
        assert_eq!(v, before);
    }

    #[test]
    fn capacity_is_enforced() {
        let mut engine = Broyden::with_options(BroydenOptions::new(1).with_capacity(2));
        engine.activate(0).unwrap();

        let mut v = vector(&[c(1.0, 0.0)]);
        engine.mix_next(&mut v, 1).unwrap();
        let mut v = vector(&[c(0.5, 0.0)]);
        engine.mix_next(&mut v, 2).unwrap();

        let mut v = vector(&[c(0.25, 0.0)]);
        assert_eq!(
            engine.mix_next(&mut v, 3),
            Err(SessionError::CapacityExceeded { capacity: 2 })
        );
    }

    #[test]
    fn lifecycle_misuse_is_reported() {
        let mut engine = Broyden::<f64>::new(1);

        assert_eq!(engine.deactivate(), Err(SessionError::NotActive));
        assert_eq!(engine.reset(0), Err(SessionError::NotActive));

        let mut v = vector(&[c(1.0, 0.0)]);
        assert_eq!(engine.mix_next(&mut v, 1), Err(SessionError::NotActive));

        engine.activate(0).unwrap();
        assert_eq!(engine.activate(5), Err(SessionError::AlreadyActive));

        // The absolute index must be strictly greater than the origin.
        assert_eq!(
            engine.mix_next(&mut v, 0),
            Err(SessionError::InvalidIteration {
                iteration: 0,
                origin: 0
            })
        );

        let mut wrong = vector(&[c(1.0, 0.0), c(2.0, 0.0)]);
        assert_eq!(
            engine.mix_next(&mut wrong, 1),
            Err(SessionError::DimensionMismatch {
                expected: 1,
                actual: 2
            })
        );

        engine.deactivate().unwrap();
        assert!(!engine.is_active());
    }

    #[test]
    fn second_step_is_secant_method() {
        // For a real scalar sequence the correction at the second step must
        // reduce to the secant update V - F·ΔV/ΔF, independently of alpha.
        let mut options = BroydenOptions::new(1);
        options.set_alpha(0.35);
        options.set_omega0(0.0);
        let mut engine = Broyden::with_options(options);
        engine.activate(0).unwrap();

        let out1 = 0.8;
        let mut v = vector(&[c(out1, 0.0)]);
        engine.mix_next(&mut v, 1).unwrap();

        let out2 = 0.6;
        let mut v = vector(&[c(out2, 0.0)]);
        engine.mix_next(&mut v, 2).unwrap();

        // V1 = out1, F1 = out1, F2 = out2 - out1.
        let v1 = out1;
        let f1 = out1;
        let f2 = out2 - v1;
        let expected = v1 - f2 * (v1 - 0.0) / (f2 - f1);
        assert!((v[0].re - expected).abs() < 1e-12);
        assert!(v[0].im.abs() < 1e-12);
    }
}

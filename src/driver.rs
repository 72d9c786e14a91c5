//! High-level API for driving a fixed-point iteration.
//!
//! The driver encapsulates the loop of evaluating the external map and
//! feeding its output to a mixing engine, together with the session lifecycle
//! and the retry policy for ill-conditioned histories.
//!
//! The simplest way of using the driver is to initialize it with the
//! defaults, which uses the [Broyden](crate::algo::broyden) engine:
//!
//! ```rust
//! use broydn::MixDriver;
//! # use broydn::nalgebra as na;
//! # use broydn::num_complex::Complex;
//! # use broydn::FixedPointMap;
//! # use na::{Dyn, IsContiguous, Vector};
//! #
//! # struct Cosine;
//! #
//! # impl FixedPointMap for Cosine {
//! #     type Field = f64;
//! #
//! #     fn dim(&self) -> usize {
//! #         1
//! #     }
//! #
//! #     fn apply<Sv, Sout>(
//! #         &self,
//! #         v: &Vector<Complex<f64>, Dyn, Sv>,
//! #         out: &mut Vector<Complex<f64>, Dyn, Sout>,
//! #     ) where
//! #         Sv: na::storage::Storage<Complex<f64>, Dyn> + IsContiguous,
//! #         Sout: na::storage::StorageMut<Complex<f64>, Dyn>,
//! #     {
//! #         out[0] = v[0].cos();
//! #     }
//! # }
//!
//! let map = Cosine;
//!
//! let mut driver = MixDriver::new(&map);
//! ```
//!
//! If you need to specify additional settings, use the builder:
//!
//! ```rust
//! use broydn::algo::Linear;
//! use broydn::num_complex::Complex;
//! use broydn::MixDriver;
//! # use broydn::nalgebra as na;
//! # use broydn::FixedPointMap;
//! # use na::{Dyn, IsContiguous, Vector};
//! #
//! # struct Cosine;
//! #
//! # impl FixedPointMap for Cosine {
//! #     type Field = f64;
//! #
//! #     fn dim(&self) -> usize {
//! #         1
//! #     }
//! #
//! #     fn apply<Sv, Sout>(
//! #         &self,
//! #         v: &Vector<Complex<f64>, Dyn, Sv>,
//! #         out: &mut Vector<Complex<f64>, Dyn, Sout>,
//! #     ) where
//! #         Sv: na::storage::Storage<Complex<f64>, Dyn> + IsContiguous,
//! #         Sout: na::storage::StorageMut<Complex<f64>, Dyn>,
//! #     {
//! #         out[0] = v[0].cos();
//! #     }
//! # }
//!
//! let map = Cosine;
//!
//! let mut driver = MixDriver::builder(&map)
//!     .with_initial(vec![Complex::new(1.0, 0.0)])
//!     .with_mixer(|map| Linear::<f64>::new(map.dim()))
//!     .build();
//! ```
//!
//! Once you have the driver, [`solve`](MixDriver::solve) runs the whole
//! process for a given iteration budget, or [`find`](MixDriver::find) gives
//! control over the stopping criterion, or [`next`](MixDriver::next) does the
//! iterations manually.

use log::debug;
use nalgebra::{convert, Complex, DimName, Dyn, OVector, RealField, U1};

use crate::algo::Broyden;
use crate::core::{FixedPointMap, Mixer, Status};

/// Builder for the [`MixDriver`].
pub struct MixBuilder<'a, F: FixedPointMap, M> {
    f: &'a F,
    mixer: M,
    x0: OVector<Complex<F::Field>, Dyn>,
    restarts: Vec<OVector<Complex<F::Field>, Dyn>>,
}

impl<'a, F: FixedPointMap> MixBuilder<'a, F, Broyden<F::Field>> {
    fn new(f: &'a F) -> Self {
        let dim = f.dim();
        Self {
            f,
            mixer: Broyden::new(dim),
            x0: OVector::zeros_generic(Dyn(dim), U1::name()),
            restarts: Vec::new(),
        }
    }
}

impl<'a, F: FixedPointMap, M> MixBuilder<'a, F, M> {
    /// Sets the initial point from which the iterative process starts.
    pub fn with_initial(mut self, x0: Vec<Complex<F::Field>>) -> Self {
        assert_eq!(x0.len(), self.f.dim(), "initial point has wrong dimension");
        self.x0 = OVector::from_vec_generic(Dyn(x0.len()), U1::name(), x0);
        self
    }

    /// Sets alternate starting points tried in order when the mixer reports
    /// [`Status::Failed`]; each retry resets the mixer session.
    pub fn with_restarts(mut self, restarts: Vec<Vec<Complex<F::Field>>>) -> Self {
        let dim = self.f.dim();
        self.restarts = restarts
            .into_iter()
            .map(|x0| {
                assert_eq!(x0.len(), dim, "restart point has wrong dimension");
                OVector::from_vec_generic(Dyn(x0.len()), U1::name(), x0)
            })
            .collect();
        self
    }

    /// Sets specific mixer to be used.
    ///
    /// This builder method accepts a closure that takes the reference to the
    /// map. For the mixers in broydn, you can simply construct one from the
    /// map dimension (e.g., `|map| Linear::new(map.dim())`).
    pub fn with_mixer<M2, FM>(self, factory: FM) -> MixBuilder<'a, F, M2>
    where
        FM: FnOnce(&F) -> M2,
    {
        let mixer = factory(self.f);

        MixBuilder {
            f: self.f,
            mixer,
            x0: self.x0,
            restarts: self.restarts,
        }
    }

    /// Builds the [`MixDriver`].
    pub fn build(self) -> MixDriver<'a, F, M> {
        let MixBuilder {
            f,
            mixer,
            x0,
            mut restarts,
        } = self;
        let out = x0.clone_owned();

        // Restarts are consumed from the back.
        restarts.reverse();

        MixDriver {
            f,
            mixer,
            x: x0,
            out,
            restarts,
            iteration: 0,
        }
    }
}

/// Outcome of a driven solve.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Outcome<T> {
    /// The maximum component change dropped below the mixer tolerance.
    Converged {
        /// Number of map evaluations performed.
        iterations: usize,
        /// The final maximum component change.
        diff: T,
    },
    /// The iteration budget was exhausted without convergence.
    Exhausted {
        /// Number of map evaluations performed.
        iterations: usize,
    },
}

/// The driver for the process of solving a fixed-point iteration.
///
/// For default settings, use [`MixDriver::new`]. For more flexibility, use
/// [`MixDriver::builder`]. For the usage of the driver, see [module](self)
/// documentation.
pub struct MixDriver<'a, F: FixedPointMap, M> {
    f: &'a F,
    mixer: M,
    x: OVector<Complex<F::Field>, Dyn>,
    out: OVector<Complex<F::Field>, Dyn>,
    restarts: Vec<OVector<Complex<F::Field>, Dyn>>,
    iteration: usize,
}

impl<'a, F: FixedPointMap> MixDriver<'a, F, Broyden<F::Field>> {
    /// Returns the builder for specifying additional settings.
    pub fn builder(f: &'a F) -> MixBuilder<'a, F, Broyden<F::Field>> {
        MixBuilder::new(f)
    }

    /// Initializes the driver with the default settings.
    pub fn new(f: &'a F) -> Self {
        MixDriver::builder(f).build()
    }
}

impl<'a, F: FixedPointMap, M> MixDriver<'a, F, M> {
    /// Returns reference to the current point.
    pub fn x(&self) -> &[Complex<F::Field>] {
        self.x.as_slice()
    }

    /// Returns the absolute iteration index of the last performed step.
    pub fn iteration(&self) -> usize {
        self.iteration
    }
}

impl<'a, F: FixedPointMap, M: Mixer<F::Field>> MixDriver<'a, F, M> {
    /// Returns the maximum component change of the last step, if any.
    pub fn diff(&self) -> Option<F::Field> {
        self.mixer.current_diff()
    }

    /// Returns the name of the used mixer.
    pub fn name(&self) -> &str {
        M::NAME
    }

    /// Does one iteration of the process: evaluates the map at the current
    /// point and mixes its output into the next proposed point.
    ///
    /// Lazily opens a mixer session on the first call. On
    /// [`Status::Failed`], the current point is left unchanged so the caller
    /// can retry or [reset](Mixer::reset) through the mixer.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Result<Status, M::Error> {
        if !self.mixer.is_active() {
            self.mixer.activate(self.iteration)?;
        }

        self.iteration += 1;
        self.f.apply(&self.x, &mut self.out);
        let status = self.mixer.mix_next(&mut self.out, self.iteration)?;

        if status != Status::Failed {
            self.x.copy_from(&self.out);
        }

        Ok(status)
    }

    /// Runs the iterative process until given stopping criterion is
    /// satisfied, returning the status of the last step.
    ///
    /// The mixer session is left open; use [`solve`](MixDriver::solve) for
    /// the full managed lifecycle.
    pub fn find<C>(&mut self, stop: C) -> Result<Status, M::Error>
    where
        C: Fn(MixIterState<'_, F::Field>) -> bool,
    {
        loop {
            let status = self.next()?;

            let state = MixIterState {
                x: self.x.as_slice(),
                diff: self.mixer.current_diff(),
                iteration: self.iteration,
                status,
            };

            if stop(state) {
                return Ok(status);
            }
        }
    }

    /// Runs the whole solving process with up to `budget` map evaluations.
    ///
    /// Opens a session if none is open and always closes it before
    /// returning. When the mixer reports [`Status::Failed`], the next restart
    /// point is tried after a session reset; once no restart points remain,
    /// the session is instead reset in place and the map output that the
    /// failed step rejected is replayed as the first step of the fresh
    /// session, so the evaluation is not wasted. The budget must not exceed
    /// the history capacity of the mixer, which reports the excess as an
    /// error.
    pub fn solve(&mut self, budget: usize) -> Result<Outcome<F::Field>, M::Error> {
        let mut iterations = 0;
        let mut outcome = Outcome::Exhausted { iterations };

        while iterations < budget {
            iterations += 1;
            outcome = Outcome::Exhausted { iterations };

            match self.next()? {
                Status::Converged => {
                    outcome = Outcome::Converged {
                        iterations,
                        diff: self.mixer.current_diff().unwrap_or_else(|| convert(0.0)),
                    };
                    break;
                }
                Status::Continue => {}
                Status::Failed => match self.restarts.pop() {
                    Some(x0) => {
                        debug!("mixer failed, restarting from an alternate point");
                        self.mixer.reset(self.iteration)?;
                        self.x = x0;
                    }
                    None => {
                        debug!("mixer failed, restarting the session in place");
                        // A step can only fail with history behind it, so the
                        // index of the step before the failed one is valid as
                        // the new origin. The failed step left the map output
                        // in the buffer; the first step of a fresh session is
                        // pure adoption and cannot fail on it.
                        self.mixer.reset(self.iteration - 1)?;
                        self.mixer.mix_next(&mut self.out, self.iteration)?;
                        self.x.copy_from(&self.out);
                    }
                },
            }
        }

        if self.mixer.is_active() {
            self.mixer.deactivate()?;
        }

        Ok(outcome)
    }
}

/// State of the current iteration.
pub struct MixIterState<'a, T: RealField + Copy> {
    x: &'a [Complex<T>],
    diff: Option<T>,
    iteration: usize,
    status: Status,
}

impl<'a, T: RealField + Copy> MixIterState<'a, T> {
    /// Returns reference to the current point.
    pub fn x(&self) -> &[Complex<T>] {
        self.x
    }

    /// Returns the maximum component change of the last step, if any.
    pub fn diff(&self) -> Option<T> {
        self.diff
    }

    /// Returns the absolute iteration index of the last step.
    pub fn iteration(&self) -> usize {
        self.iteration
    }

    /// Returns the status of the last step.
    pub fn status(&self) -> Status {
        self.status
    }
}

#![allow(clippy::many_single_char_names)]
#![allow(clippy::type_complexity)]
#![warn(missing_docs)]

//! # Broydn
//!
//! A pure Rust implementation of generalized Broyden mixing for accelerating
//! expensive complex-valued fixed-point iterations.
//!
//! Many self-consistency loops in physics and engineering repeatedly evaluate
//! an expensive map `Φ` and feed its output back as the next input until the
//! input stops changing. Plain damped mixing of the output converges slowly
//! (or not at all) near self-consistency. This library implements the
//! multisecant quasi-Newton scheme of Johnson (Phys. Rev. B 38, 12807),
//! which builds an approximate inverse Jacobian from the history of previous
//! iterations and typically cuts the number of map evaluations by an order of
//! magnitude.
//!
//! ## Algorithms
//!
//! * [Broyden](algo::broyden) -- Recommended engine to be used as a default.
//! * [Linear](algo::linear) -- Plain damped mixing, the baseline with no
//!   failure modes.
//!
//! ## Problem
//!
//! The problem is finding a self-consistent vector of an iterated map. In
//! mathematical notation, given a map `Φ` acting on complex vectors of length
//! *n*, the goal is
//!
//! ```text
//! V = Φ(V),
//!
//! where V = { V1, ..., Vn } with Vi complex
//! ```
//!
//! The map is treated as a black box: one evaluation per iteration, no
//! derivatives, no assumptions beyond a fixed dimension. When it comes to
//! code, the map is any type that implements the [`FixedPointMap`] trait.
//!
//! ```rust
//! // Broydn is based on `nalgebra` crate.
//! use broydn::nalgebra as na;
//! use broydn::num_complex::Complex;
//! use broydn::FixedPointMap;
//! use na::{Dyn, IsContiguous};
//!
//! // A map is represented by a type.
//! struct Cosine;
//!
//! impl FixedPointMap for Cosine {
//!     // The real field underlying the complex entries. Usually f64.
//!     type Field = f64;
//!
//!     // Length of the vectors the map acts on.
//!     fn dim(&self) -> usize {
//!         1
//!     }
//!
//!     // Evaluate the map at a trial vector.
//!     fn apply<Sv, Sout>(
//!         &self,
//!         v: &na::Vector<Complex<f64>, Dyn, Sv>,
//!         out: &mut na::Vector<Complex<f64>, Dyn, Sout>,
//!     ) where
//!         Sv: na::storage::Storage<Complex<f64>, Dyn> + IsContiguous,
//!         Sout: na::storage::StorageMut<Complex<f64>, Dyn>,
//!     {
//!         out[0] = v[0].cos();
//!     }
//! }
//! ```
//!
//! ## Solving
//!
//! When you have your map available, you can use the [`MixDriver`] to run
//! the iteration process until convergence or a budget is spent.
//!
//! ```rust
//! use broydn::{MixDriver, Outcome};
//! # use broydn::nalgebra as na;
//! # use broydn::num_complex::Complex;
//! # use broydn::FixedPointMap;
//! # use na::{Dyn, IsContiguous};
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
//! #         v: &na::Vector<Complex<f64>, Dyn, Sv>,
//! #         out: &mut na::Vector<Complex<f64>, Dyn, Sout>,
//! #     ) where
//! #         Sv: na::storage::Storage<Complex<f64>, Dyn> + IsContiguous,
//! #         Sout: na::storage::StorageMut<Complex<f64>, Dyn>,
//! #     {
//! #         out[0] = v[0].cos();
//! #     }
//! # }
//!
//! let map = Cosine;
//! let mut driver = MixDriver::builder(&map)
//!     .with_initial(vec![Complex::new(1.0, 0.0)])
//!     .build();
//!
//! match driver.solve(100).expect("mixer encountered an error") {
//!     Outcome::Converged { iterations, .. } => {
//!         println!("converged after {iterations} evaluations: {:?}", driver.x());
//!     }
//!     outcome => println!("did not converge: {outcome:?}"),
//! }
//! ```
//!
//! ## License
//!
//! Licensed under MIT.

pub mod algo;
mod core;
pub mod driver;
pub mod linalg;

pub use core::*;
pub use driver::{MixBuilder, MixDriver, MixIterState, Outcome};

#[cfg(feature = "testing")]
pub mod testing;

#[cfg(not(feature = "testing"))]
pub(crate) mod testing;

pub use nalgebra;
pub use num_complex;

//! Testing maps and utilities useful for debugging and smoke testing.
//!
//! [`Cosine`] and [`LinearContraction`] are recommended for first tests.
//! [`Drift`] exists for exercising the degenerate-history failure path.

#![allow(unused)]

use nalgebra::{
    storage::{Storage, StorageMut},
    Complex, DimName, Dyn, IsContiguous, OMatrix, OVector, Vector, U1,
};
use num_traits::{One, Zero};

use crate::core::FixedPointMap;
use crate::linalg;

/// The one-dimensional map `Φ(V) = cos(V)`.
///
/// Its unique real fixed point is the Dottie number, available as
/// [`Cosine::ROOT`].
#[derive(Debug, Clone, Copy)]
pub struct Cosine;

impl Cosine {
    /// The fixed point of `cos`.
    pub const ROOT: f64 = 0.739_085_133_215_160_6;
}

impl FixedPointMap for Cosine {
    type Field = f64;

    fn dim(&self) -> usize {
        1
    }

    fn apply<Sv, Sout>(
        &self,
        v: &Vector<Complex<f64>, Dyn, Sv>,
        out: &mut Vector<Complex<f64>, Dyn, Sout>,
    ) where
        Sv: Storage<Complex<f64>, Dyn> + IsContiguous,
        Sout: StorageMut<Complex<f64>, Dyn>,
    {
        out[0] = v[0].cos();
    }
}

/// The affine map `Φ(V) = A·V + b`.
///
/// With `A` a strict contraction, the map has the unique fixed point
/// `(I − A)⁻¹·b` and plain damped mixing converges to it linearly, which
/// makes it a good benchmark for acceleration.
#[derive(Debug, Clone)]
pub struct LinearContraction {
    a: OMatrix<Complex<f64>, Dyn, Dyn>,
    b: OVector<Complex<f64>, Dyn>,
}

impl LinearContraction {
    /// Initializes the map with given matrix and offset.
    pub fn new(a: OMatrix<Complex<f64>, Dyn, Dyn>, b: OVector<Complex<f64>, Dyn>) -> Self {
        assert_eq!(a.nrows(), a.ncols(), "matrix is not square");
        assert_eq!(a.nrows(), b.nrows(), "matrix and offset dimensions differ");
        Self { a, b }
    }

    /// A two-dimensional strict contraction with spectral radius 0.3.
    pub fn example() -> Self {
        let c = |re: f64| Complex::new(re, 0.0);
        let a = OMatrix::from_row_slice_generic(
            Dyn(2),
            Dyn(2),
            &[c(0.2), c(0.1), c(0.0), c(0.3)],
        );
        let b = OVector::from_vec_generic(Dyn(2), U1::name(), vec![c(1.0), c(1.0)]);
        Self::new(a, b)
    }

    /// The unique fixed point `(I − A)⁻¹·b`.
    pub fn fixed_point(&self) -> OVector<Complex<f64>, Dyn> {
        let n = self.a.nrows();
        let identity: OMatrix<Complex<f64>, Dyn, Dyn> = OMatrix::identity_generic(Dyn(n), Dyn(n));
        let lu = linalg::decompose(identity - &self.a).expect("contraction is invertible");
        let mut root = self.b.clone_owned();
        lu.solve_in_place(&mut root);
        root
    }
}

impl FixedPointMap for LinearContraction {
    type Field = f64;

    fn dim(&self) -> usize {
        self.a.nrows()
    }

    fn apply<Sv, Sout>(
        &self,
        v: &Vector<Complex<f64>, Dyn, Sv>,
        out: &mut Vector<Complex<f64>, Dyn, Sout>,
    ) where
        Sv: Storage<Complex<f64>, Dyn> + IsContiguous,
        Sout: StorageMut<Complex<f64>, Dyn>,
    {
        out.copy_from(&self.b);
        out.gemv(Complex::one(), &self.a, v, Complex::one());
    }
}

/// The fixed-point-free map `Φ(V) = V + d` with a constant nonzero shift.
///
/// The residual is the same at every point, so the first secant pair of any
/// mixing session has an exactly zero normalizer. Useful for asserting that
/// engines report degenerate history instead of dividing by zero.
#[derive(Debug, Clone, Copy)]
pub struct Drift {
    dim: usize,
    shift: Complex<f64>,
}

impl Drift {
    /// Initializes the map with given dimension and shift.
    pub fn new(dim: usize, shift: Complex<f64>) -> Self {
        Self { dim, shift }
    }
}

impl FixedPointMap for Drift {
    type Field = f64;

    fn dim(&self) -> usize {
        self.dim
    }

    fn apply<Sv, Sout>(
        &self,
        v: &Vector<Complex<f64>, Dyn, Sv>,
        out: &mut Vector<Complex<f64>, Dyn, Sout>,
    ) where
        Sv: Storage<Complex<f64>, Dyn> + IsContiguous,
        Sout: StorageMut<Complex<f64>, Dyn>,
    {
        for i in 0..self.dim {
            out[i] = v[i] + self.shift;
        }
    }
}

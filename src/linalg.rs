//! Dense complex linear algebra for small systems.
//!
//! The mixing engines need to invert the regularized Gram matrix of their
//! iteration history each step. These matrices are small (bounded by the
//! history capacity) and dense, so a plain LU decomposition with scaled
//! partial pivoting is used, specialized for complex entries.
//!
//! An exactly singular input (a row of zeros) is reported as
//! [`SingularMatrixError`] instead of dividing by zero. An exactly zero
//! *pivot* encountered during elimination is replaced by a small fixed value
//! so the factorization can proceed; the substitution is recorded in the
//! [`LuFactors::degenerate`] flag and the degeneracy also shows up downstream
//! as very large solution magnitudes.
//!
//! # References
//!
//! \[1\] [Numerical Recipes](http://numerical.recipes/) (`ludcmp`/`lubksb`)

use nalgebra::{convert, Complex, ComplexField, DimName, Dyn, OMatrix, OVector, RealField, U1};
use num_traits::{One, Zero};
use thiserror::Error;

/// Error returned when a matrix has an exactly zero row and cannot be
/// decomposed.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("singular matrix in lu decomposition")]
pub struct SingularMatrixError;

/// LU factorization of a square complex matrix with its row permutation.
#[derive(Debug, Clone)]
pub struct LuFactors<T: RealField + Copy> {
    lu: OMatrix<Complex<T>, Dyn, Dyn>,
    perm: Vec<usize>,
    degenerate: bool,
}

/// Decomposes a square complex matrix in place into its LU factorization
/// using Crout's method with scaled partial pivoting.
///
/// Each row is implicitly scaled by the reciprocal of its largest entry
/// modulus and the pivot maximizing the scaled modulus is chosen at every
/// column. Fails with [`SingularMatrixError`] if some row is exactly zero.
pub fn decompose<T: RealField + Copy>(
    mut a: OMatrix<Complex<T>, Dyn, Dyn>,
) -> Result<LuFactors<T>, SingularMatrixError> {
    let n = a.nrows();
    debug_assert_eq!(n, a.ncols(), "matrix is not square");

    // Implicit row scales for the pivot choice.
    let mut scale = vec![T::zero(); n];
    for i in 0..n {
        let mut big = T::zero();
        for j in 0..n {
            let entry = a[(i, j)].modulus();
            if entry > big {
                big = entry;
            }
        }
        if big == T::zero() {
            return Err(SingularMatrixError);
        }
        scale[i] = T::one() / big;
    }

    let tiny: T = convert(1e-20);
    let mut perm = vec![0; n];
    let mut degenerate = false;

    for j in 0..n {
        for i in 0..j {
            let mut sum = a[(i, j)];
            for k in 0..i {
                sum -= a[(i, k)] * a[(k, j)];
            }
            a[(i, j)] = sum;
        }

        let mut big = T::zero();
        let mut imax = j;
        for i in j..n {
            let mut sum = a[(i, j)];
            for k in 0..j {
                sum -= a[(i, k)] * a[(k, j)];
            }
            a[(i, j)] = sum;

            let weight = scale[i] * sum.modulus();
            if weight >= big {
                big = weight;
                imax = i;
            }
        }

        if j != imax {
            a.swap_rows(j, imax);
            scale[imax] = scale[j];
        }
        perm[j] = imax;

        // A zero pivot at this point means degeneracy that the scaled pivot
        // search could not avoid. Substitute a tiny value instead of failing
        // so elimination can proceed, but record the substitution for callers
        // that need to reject the degenerate factorization.
        if a[(j, j)] == Complex::zero() {
            a[(j, j)] = Complex::new(tiny, T::zero());
            degenerate = true;
        }

        if j + 1 < n {
            let pivot_inv = Complex::<T>::one() / a[(j, j)];
            for i in (j + 1)..n {
                a[(i, j)] *= pivot_inv;
            }
        }
    }

    Ok(LuFactors {
        lu: a,
        perm,
        degenerate,
    })
}

impl<T: RealField + Copy> LuFactors<T> {
    /// Returns the dimension of the decomposed matrix.
    pub fn dim(&self) -> usize {
        self.perm.len()
    }

    /// Returns true if an exactly zero pivot had to be substituted during the
    /// decomposition, meaning the matrix is rank-deficient and solutions
    /// computed from these factors are garbage of huge magnitude.
    pub fn degenerate(&self) -> bool {
        self.degenerate
    }

    /// Solves the system for the given right-hand side by forward and back
    /// substitution, writing the solution into `b`.
    pub fn solve_in_place(&self, b: &mut OVector<Complex<T>, Dyn>) {
        let n = self.perm.len();
        debug_assert_eq!(n, b.nrows(), "rhs has wrong dimension");

        // Forward substitution, unscrambling the permutation as we go and
        // skipping leading zeros of the right-hand side.
        let mut first_nonzero = None;
        for i in 0..n {
            let ip = self.perm[i];
            let mut sum = b[ip];
            b[ip] = b[i];
            if let Some(start) = first_nonzero {
                for j in start..i {
                    sum -= self.lu[(i, j)] * b[j];
                }
            } else if sum != Complex::zero() {
                first_nonzero = Some(i);
            }
            b[i] = sum;
        }

        // Back substitution.
        for i in (0..n).rev() {
            let mut sum = b[i];
            for j in (i + 1)..n {
                sum -= self.lu[(i, j)] * b[j];
            }
            b[i] = sum / self.lu[(i, i)];
        }
    }

    /// Builds the explicit inverse of the decomposed matrix by solving for
    /// every standard basis vector.
    pub fn inverse(&self) -> OMatrix<Complex<T>, Dyn, Dyn> {
        let n = self.perm.len();

        let mut inverse: OMatrix<Complex<T>, Dyn, Dyn> = OMatrix::zeros_generic(Dyn(n), Dyn(n));
        let mut col: OVector<Complex<T>, Dyn> = OVector::zeros_generic(Dyn(n), U1::name());

        for j in 0..n {
            col.fill(Complex::zero());
            col[j] = Complex::one();
            self.solve_in_place(&mut col);
            inverse.column_mut(j).copy_from(&col);
        }

        inverse
    }
}

/// Computes the explicit inverse of a square complex matrix, consuming it.
///
/// Decomposes once and solves for every standard basis vector. Propagates
/// [`SingularMatrixError`] from the decomposition.
pub fn invert<T: RealField + Copy>(
    a: OMatrix<Complex<T>, Dyn, Dyn>,
) -> Result<OMatrix<Complex<T>, Dyn, Dyn>, SingularMatrixError> {
    Ok(decompose(a)?.inverse())
}

#[cfg(test)]
mod tests {
    use super::*;

    use approx::assert_abs_diff_eq;
    use nalgebra::{dmatrix, dvector};

    fn c(re: f64, im: f64) -> Complex<f64> {
        Complex::new(re, im)
    }

    #[test]
    fn invert_complex() {
        let a = dmatrix![
            c(1.0, 1.0), c(2.0, 0.0), c(0.0, -1.0);
            c(0.0, 0.0), c(1.0, -1.0), c(3.0, 0.5);
            c(2.0, 0.0), c(0.0, 1.0), c(1.0, 0.0);
        ];

        let inv = invert(a.clone()).unwrap();
        let product = &a * &inv;

        for i in 0..3 {
            for j in 0..3 {
                let expected = if i == j { c(1.0, 0.0) } else { c(0.0, 0.0) };
                assert!((product[(i, j)] - expected).norm() < 1e-12);
            }
        }
    }

    #[test]
    fn invert_requires_pivoting() {
        // Zero in the top-left corner forces a row swap in the first column.
        let a = dmatrix![
            c(0.0, 0.0), c(1.0, 0.0);
            c(1.0, 0.0), c(0.0, 0.0);
        ];

        let inv = invert(a.clone()).unwrap();
        for i in 0..2 {
            for j in 0..2 {
                assert!((inv[(i, j)] - a[(i, j)]).norm() < 1e-12);
            }
        }
    }

    #[test]
    fn solve_known_system() {
        let a = dmatrix![
            c(2.0, 0.0), c(1.0, 0.0);
            c(1.0, 0.0), c(3.0, 0.0);
        ];
        // Solution of [2 1; 1 3] x = [5; 10] is [1; 3].
        let mut b = dvector![c(5.0, 0.0), c(10.0, 0.0)];

        let lu = decompose(a).unwrap();
        assert!(!lu.degenerate());
        lu.solve_in_place(&mut b);

        assert_abs_diff_eq!(b[0].re, 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(b[0].im, 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(b[1].re, 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(b[1].im, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn zero_row_is_singular() {
        let a = dmatrix![
            c(1.0, 2.0), c(3.0, 0.0);
            c(0.0, 0.0), c(0.0, 0.0);
        ];

        assert_eq!(decompose(a).unwrap_err(), SingularMatrixError);
    }

    #[test]
    fn rank_deficient_is_flagged_not_failed() {
        // Both rows nonzero but linearly dependent. The tiny pivot
        // substitution keeps the factorization alive and flags it; the
        // degeneracy also shows up as huge inverse entries.
        let a = dmatrix![
            c(1.0, 0.0), c(1.0, 0.0);
            c(1.0, 0.0), c(1.0, 0.0);
        ];

        let lu = decompose(a).unwrap();
        assert!(lu.degenerate());
        assert!(lu.inverse()[(1, 1)].norm() > 1e10);
    }
}

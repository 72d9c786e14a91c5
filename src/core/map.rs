use nalgebra::{
    storage::{Storage, StorageMut},
    Complex, Dyn, IsContiguous, RealField, Vector,
};

/// The trait for defining the external fixed-point map.
///
/// A fixed-point map is any expensive computation `Φ` taking a complex vector
/// and producing a complex vector of the same length; the goal of the whole
/// crate is to find `V` such that `Φ(V) = V`. The mixing engines never call
/// the map themselves, the [driver](crate::driver) does.
///
/// For the convergence theory behind the mixing engines to apply, the map
/// should be a pure function of its input. This is not enforced.
///
/// ## Defining a map
///
/// ```rust
/// use broydn::nalgebra as na;
/// use broydn::num_complex::Complex;
/// use broydn::FixedPointMap;
/// use na::{Dyn, IsContiguous, Vector};
///
/// struct Cosine;
///
/// impl FixedPointMap for Cosine {
///     type Field = f64;
///
///     fn dim(&self) -> usize {
///         1
///     }
///
///     fn apply<Sv, Sout>(
///         &self,
///         v: &Vector<Complex<f64>, Dyn, Sv>,
///         out: &mut Vector<Complex<f64>, Dyn, Sout>,
///     ) where
///         Sv: na::storage::Storage<Complex<f64>, Dyn> + IsContiguous,
///         Sout: na::storage::StorageMut<Complex<f64>, Dyn>,
///     {
///         out[0] = v[0].cos();
///     }
/// }
/// ```
pub trait FixedPointMap {
    /// Type of the real scalar, usually f64 or f32. All vector entries are
    /// complex numbers over this field.
    type Field: RealField + Copy;

    /// Returns the length of the vectors the map operates on.
    fn dim(&self) -> usize;

    /// Evaluates the map at `v` and writes the output into `out`.
    fn apply<Sv, Sout>(
        &self,
        v: &Vector<Complex<Self::Field>, Dyn, Sv>,
        out: &mut Vector<Complex<Self::Field>, Dyn, Sout>,
    ) where
        Sv: Storage<Complex<Self::Field>, Dyn> + IsContiguous,
        Sout: StorageMut<Complex<Self::Field>, Dyn>;
}

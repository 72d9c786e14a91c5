//! The collection of implemented mixing algorithms.

pub mod broyden;
pub mod linear;

pub use broyden::Broyden;
pub use linear::Linear;

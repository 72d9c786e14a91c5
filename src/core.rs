//! Core abstractions and types for broydn.
//!
//! *Users* are mainly interested in implementing the [`FixedPointMap`] trait
//! and driving it through the [driver](crate::driver).
//!
//! Mixing algorithm *developers* are interested in implementing the [`Mixer`]
//! trait and using the tools in the [linalg](crate::linalg) module.

mod map;
mod mixer;

pub use map::*;
pub use mixer::*;

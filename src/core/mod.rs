//! Core traits: the lazy-matrix abstraction, covariance functions, and the
//! dense/lazy value union.

pub mod traits;

pub use traits::{CovarianceFn, KernelValue, LinearOp, Scalar};

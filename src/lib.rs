//! gramian: lazily evaluated kernel (Gram) matrices
//!
//! This crate provides a lazy operator over the kernel matrix `K[i, j] =
//! k(x1[i], x2[j]; params)` of two point sets under a user-supplied
//! covariance function, with batch broadcasting across independent problem
//! instances, efficient diagonal extraction, index/slice views that avoid
//! dense evaluation, and structural batch transforms.
//!
//! The covariance function itself is an external collaborator: this crate
//! never implements a kernel formula.
//!
//! ```rust,ignore
//! use gramian::{KernelOperator, KernelValue, Params};
//!
//! // k must read `lengthscale` from the params it is handed on each call;
//! // capturing it from the environment would evaluate against stale values
//! // once the operator is sliced or permuted.
//! let op = KernelOperator::from_fn(x1, x2, rbf, Params::new()
//!     .with_tensor("lengthscale", lengthscale)
//!     .with_tensor("outputscale", outputscale))?;
//! let diag = op.diagonal()?;
//! ```

pub mod core;
pub mod error;
pub mod index;
pub mod matrix;
pub mod operator;
pub mod utils;

// Re-exports for convenience
pub use crate::core::*;
pub use error::*;
pub use index::Index;
pub use matrix::*;
pub use operator::*;
pub use utils::*;

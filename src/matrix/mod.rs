//! Matrix module: dense materialized operators and batched multiply kernels.

pub mod dense;
pub use dense::{batched_matmul, DenseOp};

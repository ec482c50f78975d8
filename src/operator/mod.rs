//! The lazily evaluated kernel operator and its parameter model.

pub mod kernel;
pub mod params;

pub use kernel::KernelOperator;
pub use params::{ParamValue, Params};

/// Outputs per input point along the row and column axes of the kernel
/// matrix. `(1, 1)` for ordinary kernels; larger for multitask or gradient
/// kernels that produce cross-covariance blocks per input pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockSize {
    pub rows: usize,
    pub cols: usize,
}

impl BlockSize {
    pub const UNIT: BlockSize = BlockSize { rows: 1, cols: 1 };

    pub fn is_unit(self) -> bool {
        self == Self::UNIT
    }

    /// Reverse the row/column roles (used by transpose).
    pub(crate) fn reversed(self) -> Self {
        BlockSize {
            rows: self.cols,
            cols: self.rows,
        }
    }
}

impl Default for BlockSize {
    fn default() -> Self {
        Self::UNIT
    }
}

impl From<usize> for BlockSize {
    fn from(n: usize) -> Self {
        BlockSize { rows: n, cols: n }
    }
}

impl From<(usize, usize)> for BlockSize {
    fn from((rows, cols): (usize, usize)) -> Self {
        BlockSize { rows, cols }
    }
}

use thiserror::Error;

// Unified error type for gramian

#[derive(Error, Debug)]
pub enum GramError {
    #[error("incompatible data shapes for a kernel matrix: x1.shape={x1:?}, x2.shape={x2:?}")]
    DataShapes { x1: Vec<usize>, x2: Vec<usize> },
    #[error(
        "kernel parameter shapes {params:?} are incompatible with data shapes \
         x1.shape={x1:?}, x2.shape={x2:?}"
    )]
    ParamShapes {
        params: Vec<(String, Vec<usize>)>,
        x1: Vec<usize>,
        x2: Vec<usize>,
    },
    #[error("kernel parameter `{name}` needs at least two trailing dimensions, got shape {shape:?}")]
    ParamRank { name: String, shape: Vec<usize> },
    #[error("outputs per input must be positive, got ({0}, {1})")]
    InvalidBlockSize(usize, usize),
    #[error(
        "diagonal is undefined for a {rows}x{cols} kernel with ({block_rows}, {block_cols}) \
         outputs per input"
    )]
    DiagonalUndefined {
        rows: usize,
        cols: usize,
        block_rows: usize,
        block_cols: usize,
    },
    #[error("unsupported index: {0}")]
    UnsupportedIndex(String),
    #[error("index {index} out of range for axis of length {len}")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("invalid batch permutation {dims:?} for batch rank {rank}")]
    InvalidPermutation { dims: Vec<usize>, rank: usize },
    #[error("batch dimension {dim} out of range for batch rank {rank}")]
    BatchDimOutOfRange { dim: usize, rank: usize },
    #[error("covariance function returned shape {got:?}, expected trailing dimensions {expected:?}")]
    CovarianceShape { got: Vec<usize>, expected: Vec<usize> },
    #[error("shape mismatch in {op}: lhs {lhs:?}, rhs {rhs:?}")]
    ShapeMismatch {
        op: &'static str,
        lhs: Vec<usize>,
        rhs: Vec<usize>,
    },
    #[error("a dense operator needs at least two dimensions, got shape {0:?}")]
    NotAMatrix(Vec<usize>),
}

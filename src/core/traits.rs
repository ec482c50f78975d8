//! Core lazy-matrix traits for gramian.

use crate::error::GramError;
use crate::index::Index;
use crate::operator::params::Params;
use ndarray::ArrayD;

/// Scalar element type for kernel operators.
pub trait Scalar: num_traits::Float + ndarray::LinalgScalar + Send + Sync + 'static {}

impl<T> Scalar for T where T: num_traits::Float + ndarray::LinalgScalar + Send + Sync + 'static {}

/// A lazily evaluated, batched matrix value.
///
/// `size()` is the logical shape: batch dimensions followed by (rows, cols).
/// Everything else is a side-effect-free derivation; implementations must not
/// mutate shared state beyond pure memoization.
pub trait LinearOp<T: Scalar>: Send + Sync {
    /// Logical size: batch shape followed by (rows, cols).
    fn size(&self) -> Vec<usize>;

    /// Materialize the full (batched) matrix.
    fn to_dense(&self) -> Result<ArrayD<T>, GramError>;

    /// The batched diagonal, shaped batch + (rows,). Defined only for square
    /// operators with unit output multiplicity.
    fn diagonal(&self) -> Result<ArrayD<T>, GramError>;

    /// Batched matrix multiply. `rhs` is either a trailing vector of length
    /// `cols` or a batched `cols x c` stack, broadcast against the operator's
    /// batch shape.
    fn matmul(&self, rhs: &ArrayD<T>) -> Result<ArrayD<T>, GramError>;

    /// Explicit element lookup with one concrete index per batch dimension.
    fn get(&self, batch: &[usize], row: usize, col: usize) -> Result<T, GramError>;

    /// Indexed/sliced view. Returns a lazy sub-operator when the index can be
    /// translated without dense evaluation, a dense block otherwise.
    fn index(
        &self,
        batch: &[Index],
        row: &Index,
        col: &Index,
    ) -> Result<KernelValue<T>, GramError>;

    /// Swap the row and column roles.
    fn transpose(&self) -> Result<Box<dyn LinearOp<T>>, GramError>;

    /// Apply `dims` to the batch dimensions; the trailing two are untouched.
    fn permute_batch(&self, dims: &[usize]) -> Result<Box<dyn LinearOp<T>>, GramError>;

    /// Insert a size-1 batch dimension at `dim`.
    fn unsqueeze_batch(&self, dim: usize) -> Result<Box<dyn LinearOp<T>>, GramError>;

    /// Batch shape (all but the trailing two dimensions of `size()`).
    fn batch_shape(&self) -> Vec<usize> {
        let s = self.size();
        s[..s.len() - 2].to_vec()
    }
}

/// Either a concrete array or another lazy matrix: the result type of
/// covariance functions and of indexing an operator.
pub enum KernelValue<T: Scalar> {
    Dense(ArrayD<T>),
    Lazy(Box<dyn LinearOp<T>>),
}

impl<T: Scalar> KernelValue<T> {
    /// Logical size of the value.
    pub fn size(&self) -> Vec<usize> {
        match self {
            KernelValue::Dense(a) => a.shape().to_vec(),
            KernelValue::Lazy(op) => op.size(),
        }
    }

    /// Force the value into a concrete array.
    pub fn to_dense(&self) -> Result<ArrayD<T>, GramError> {
        match self {
            KernelValue::Dense(a) => Ok(a.clone()),
            KernelValue::Lazy(op) => op.to_dense(),
        }
    }

    /// Force the value into a concrete array, consuming it.
    pub fn into_dense(self) -> Result<ArrayD<T>, GramError> {
        match self {
            KernelValue::Dense(a) => Ok(a),
            KernelValue::Lazy(op) => op.to_dense(),
        }
    }
}

impl<T: Scalar> std::fmt::Debug for KernelValue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KernelValue::Dense(a) => f.debug_tuple("Dense").field(&a.shape()).finish(),
            KernelValue::Lazy(op) => f.debug_tuple("Lazy").field(&op.size()).finish(),
        }
    }
}

/// A pairwise covariance function `k(x1, x2; params)`.
///
/// The function must be pure with respect to parameters: every parameter it
/// needs has to come from the `Params` argument by name. Derived operators
/// (sliced, permuted, transposed) pass re-derived parameter values on each
/// call, so a function that captures a parameter from its environment would
/// silently evaluate against stale values.
pub trait CovarianceFn<T: Scalar>: Send + Sync {
    fn eval(&self, x1: &ArrayD<T>, x2: &ArrayD<T>, params: &Params<T>) -> KernelValue<T>;
}

impl<T, F> CovarianceFn<T> for F
where
    T: Scalar,
    F: Fn(&ArrayD<T>, &ArrayD<T>, &Params<T>) -> KernelValue<T> + Send + Sync,
{
    fn eval(&self, x1: &ArrayD<T>, x2: &ArrayD<T>, params: &Params<T>) -> KernelValue<T> {
        self(x1, x2, params)
    }
}

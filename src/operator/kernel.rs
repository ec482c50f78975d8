//! Lazily evaluated kernel (Gram) matrix operator.
//!
//! [`KernelOperator`] represents the M×N matrix of pairwise covariances
//! between two point sets without materializing it. Construction eagerly
//! validates and broadcast-expands all inputs to a common batch shape; every
//! operation afterwards either derives a new operator over re-sliced inputs
//! or invokes the covariance function to produce a concrete array.

use crate::core::traits::{CovarianceFn, KernelValue, LinearOp, Scalar};
use crate::error::GramError;
use crate::index::{apply_axes, index_dense, translate_blocked, BlockTranslation, Index};
use crate::matrix::dense::batched_matmul;
use crate::operator::params::Params;
use crate::operator::BlockSize;
use crate::utils::broadcast::{align_inputs, check_permutation, AlignedInputs};
use crate::utils::memo::Memo;
use ndarray::{ArrayD, ArrayViewD, Axis, IxDyn};
use std::sync::Arc;

/// The kernel matrix `K[i, j] = k(x1[i], x2[j]; params)` as a lazy operator.
///
/// `x1` is shaped `(batch.., M, D)` and `x2` `(batch.., N, D)`; tensor
/// parameters are shaped `(batch.., P1, P2)` and batch-broadcast with the
/// data. With a non-unit [`BlockSize`] `(br, bc)` the covariance function
/// produces `br`/`bc` matrix rows/columns per input point and the logical
/// size is `(M·br, N·bc)`.
///
/// The operator is immutable; the dense materialization and the diagonal are
/// memoized at most once per instance.
pub struct KernelOperator<T: Scalar> {
    x1: ArrayD<T>,
    x2: ArrayD<T>,
    covar: Arc<dyn CovarianceFn<T>>,
    params: Params<T>,
    block: BlockSize,
    batch_shape: Vec<usize>,
    covar_mat: Memo<KernelValue<T>>,
    dense: Memo<ArrayD<T>>,
    diag: Memo<ArrayD<T>>,
}

impl<T: Scalar> KernelOperator<T> {
    /// Build an operator over `x1`, `x2`, and `params`, validating and
    /// broadcast-expanding everything to a common batch shape.
    ///
    /// The covariance function must read every parameter it needs from the
    /// `Params` it is handed on each call; see [`CovarianceFn`].
    pub fn new(
        x1: ArrayD<T>,
        x2: ArrayD<T>,
        covar: Arc<dyn CovarianceFn<T>>,
        block: impl Into<BlockSize>,
        params: Params<T>,
    ) -> Result<Self, GramError> {
        let block = block.into();
        if block.rows == 0 || block.cols == 0 {
            return Err(GramError::InvalidBlockSize(block.rows, block.cols));
        }
        let (tensor, opaque) = params.into_parts();
        let AlignedInputs {
            x1,
            x2,
            tensor_params,
            batch_shape,
        } = align_inputs(x1, x2, tensor)?;
        Ok(Self {
            x1,
            x2,
            covar,
            params: Params::from_parts(tensor_params, opaque),
            block,
            batch_shape,
            covar_mat: Memo::new(),
            dense: Memo::new(),
            diag: Memo::new(),
        })
    }

    /// Convenience constructor for a unit-block operator from a closure.
    pub fn from_fn<F>(
        x1: ArrayD<T>,
        x2: ArrayD<T>,
        covar: F,
        params: Params<T>,
    ) -> Result<Self, GramError>
    where
        F: Fn(&ArrayD<T>, &ArrayD<T>, &Params<T>) -> KernelValue<T> + Send + Sync + 'static,
    {
        Self::new(x1, x2, Arc::new(covar), BlockSize::UNIT, params)
    }

    /// Common batch shape shared by the point sets and tensor parameters.
    pub fn batch_shape(&self) -> &[usize] {
        &self.batch_shape
    }

    /// Outputs per input along the row/column axes.
    pub fn block(&self) -> BlockSize {
        self.block
    }

    /// Number of points (M, N) in the row and column sets.
    pub fn num_points(&self) -> (usize, usize) {
        (
            self.x1.shape()[self.x1.ndim() - 2],
            self.x2.shape()[self.x2.ndim() - 2],
        )
    }

    /// Logical number of matrix rows, `M · block.rows`.
    pub fn rows(&self) -> usize {
        self.num_points().0 * self.block.rows
    }

    /// Logical number of matrix columns, `N · block.cols`.
    pub fn cols(&self) -> usize {
        self.num_points().1 * self.block.cols
    }

    /// Logical size: batch shape followed by (rows, cols). O(1).
    pub fn size(&self) -> Vec<usize> {
        let mut s = self.batch_shape.clone();
        s.push(self.rows());
        s.push(self.cols());
        s
    }

    pub fn x1(&self) -> &ArrayD<T> {
        &self.x1
    }

    pub fn x2(&self) -> &ArrayD<T> {
        &self.x2
    }

    pub fn params(&self) -> &Params<T> {
        &self.params
    }

    /// Ground-truth covariance evaluation over the full inputs. Memoized.
    fn covar_mat(&self) -> Result<&KernelValue<T>, GramError> {
        self.covar_mat.get_or_try_init(|| {
            log::debug!(
                "materializing kernel matrix of size {:?}",
                self.size()
            );
            let value = self.covar.eval(&self.x1, &self.x2, &self.params);
            let got = value.size();
            let expected = vec![self.rows(), self.cols()];
            if got.len() < 2 || got[got.len() - 2..] != expected[..] {
                return Err(GramError::CovarianceShape { got, expected });
            }
            Ok(value)
        })
    }

    fn dense(&self) -> Result<&ArrayD<T>, GramError> {
        self.dense
            .get_or_try_init(|| self.covar_mat()?.to_dense())
    }

    /// Materialize the full (batched) matrix. Memoized; subsequent calls
    /// clone the cached array.
    pub fn to_dense(&self) -> Result<ArrayD<T>, GramError> {
        self.dense().cloned()
    }

    /// The batched diagonal `k(x_i, x_i)`, shaped batch + (M,).
    ///
    /// Defined only when the block size is unit and M = N. Computed without
    /// materializing the full matrix: the count dimension is promoted to a
    /// synthetic leading batch dimension, one covariance call evaluates M
    /// batched 1×1 kernels, and the result folds back into a vector.
    /// Memoized.
    pub fn diagonal(&self) -> Result<ArrayD<T>, GramError> {
        let (m, n) = self.num_points();
        if !self.block.is_unit() || m != n {
            return Err(GramError::DiagonalUndefined {
                rows: self.rows(),
                cols: self.cols(),
                block_rows: self.block.rows,
                block_cols: self.block.cols,
            });
        }
        self.diag.get_or_try_init(|| self.compute_diagonal()).cloned()
    }

    fn compute_diagonal(&self) -> Result<ArrayD<T>, GramError> {
        // (*B, M, D) -> (M, *B, 1, D)
        let x1 = promote_count_to_batch(&self.x1);
        let x2 = promote_count_to_batch(&self.x2);
        let params = self
            .params
            .map_tensors(|_, p| Ok::<_, GramError>(p.clone().insert_axis(Axis(0))))?;
        let mat = self.covar.eval(&x1, &x2, &params).into_dense()?;
        let nd = mat.ndim();
        if nd < 2 || mat.shape()[nd - 2..] != [1, 1] {
            return Err(GramError::CovarianceShape {
                got: mat.shape().to_vec(),
                expected: vec![1, 1],
            });
        }
        // (M, *B, 1, 1) -> (*B, M)
        let mut v = mat.view();
        v.swap_axes(0, nd - 2);
        let v = v.index_axis_move(Axis(nd - 1), 0);
        let v = v.index_axis_move(Axis(0), 0);
        Ok(v.to_owned())
    }

    /// Batched matrix multiply against a trailing vector of length `cols` or
    /// a batched `cols x c` stack. The right-hand side is forced into a
    /// standard layout before multiplying.
    pub fn matmul(&self, rhs: &ArrayD<T>) -> Result<ArrayD<T>, GramError> {
        match self.covar_mat()? {
            KernelValue::Dense(k) => batched_matmul(k, rhs),
            KernelValue::Lazy(op) => op.matmul(rhs),
        }
    }

    /// Explicit element lookup: one concrete index per batch dimension plus a
    /// logical row and column. Evaluates a single point-vs-point covariance.
    pub fn get(&self, batch: &[usize], row: usize, col: usize) -> Result<T, GramError> {
        if batch.len() != self.batch_shape.len() {
            return Err(GramError::UnsupportedIndex(format!(
                "{} batch indices for batch rank {}",
                batch.len(),
                self.batch_shape.len()
            )));
        }
        check_bound(row, self.rows())?;
        check_bound(col, self.cols())?;
        let (point_row, inner_row) = (row / self.block.rows, row % self.block.rows);
        let (point_col, inner_col) = (col / self.block.cols, col % self.block.cols);

        let x1 = take_point(&self.x1, batch, point_row)?;
        let x2 = take_point(&self.x2, batch, point_col)?;
        let params = self.params.map_tensors(|_, p| take_batch(p, batch))?;
        let mat = self.covar.eval(&x1, &x2, &params).into_dense()?;

        let nd = mat.ndim();
        let expected = vec![self.block.rows, self.block.cols];
        if nd < 2
            || mat.shape()[nd - 2..] != expected[..]
            || mat.shape()[..nd - 2].iter().any(|&d| d != 1)
        {
            return Err(GramError::CovarianceShape {
                got: mat.shape().to_vec(),
                expected,
            });
        }
        let mut idx = vec![0usize; nd - 2];
        idx.push(inner_row);
        idx.push(inner_col);
        Ok(mat[IxDyn(&idx)])
    }

    /// Indexed/sliced view.
    ///
    /// With a unit block this re-slices the point sets and parameters and
    /// returns a lazy sub-operator; no covariance evaluation occurs. With a
    /// non-unit block, row/col indices must be unstepped ranges with bounds
    /// divisible by the block size; anything else falls back to materializing
    /// the dense matrix and delegating the index to it.
    pub fn index(
        &self,
        batch: &[Index],
        row: &Index,
        col: &Index,
    ) -> Result<KernelValue<T>, GramError> {
        let (row_pts, col_pts) = if self.block.is_unit() {
            (row.clone(), col.clone())
        } else {
            match translate_blocked(row, col, (self.block.rows, self.block.cols)) {
                BlockTranslation::Exact { row, col } => (row, col),
                BlockTranslation::Dense(reason) => {
                    log::debug!(
                        "dense fallback for {}/{} index: {reason}",
                        row.kind(),
                        col.kind()
                    );
                    return self.index_via_dense(batch, row, col, reason);
                }
            }
        };
        self.index_points(batch, &row_pts, &col_pts)
    }

    /// Delegate an untranslatable index to the dense materialization.
    fn index_via_dense(
        &self,
        batch: &[Index],
        row: &Index,
        col: &Index,
        reason: &'static str,
    ) -> Result<KernelValue<T>, GramError> {
        let dense = self.dense()?;
        index_dense(dense, batch, row, col)
            .map(KernelValue::Dense)
            .map_err(|e| GramError::UnsupportedIndex(format!("{reason}; dense delegation failed: {e}")))
    }

    /// Re-slice the point sets directly: row index on x1's count axis, column
    /// index on x2's, batch indices on the batch axes of everything.
    fn index_points(
        &self,
        batch: &[Index],
        row: &Index,
        col: &Index,
    ) -> Result<KernelValue<T>, GramError> {
        let rank = self.batch_shape.len();

        // A point index on the count axis would collapse the matrix; widen it
        // to a one-element range (scalar extraction is `get`).
        let widen = |idx: &Index| match idx {
            Index::Point(i) => Index::range(*i..*i + 1),
            other => other.clone(),
        };
        let row = widen(row);
        let col = widen(col);

        let (x1, x2, params);
        let (x1_ref, x2_ref, params_ref) = if batch.len() > rank {
            // More batch indices than batch dimensions: raise everything to
            // the requested rank with synthetic size-1 leading axes. Only
            // plain ranges can index a synthetic dimension.
            if let Some(bad) = batch
                .iter()
                .find(|b| !matches!(b, Index::Full | Index::Range { .. }))
            {
                return Err(GramError::UnsupportedIndex(format!(
                    "{} batch index on a broadcast batch dimension",
                    bad.kind()
                )));
            }
            let extra = batch.len() - rank;
            x1 = raise_rank(&self.x1, extra);
            x2 = raise_rank(&self.x2, extra);
            params = self
                .params
                .map_tensors(|_, p| Ok::<_, GramError>(raise_rank(p, extra)))?;
            (&x1, &x2, &params)
        } else {
            (&self.x1, &self.x2, &self.params)
        };

        let batch_rank = x1_ref.ndim() - 2;
        let mut batch_idx: Vec<Index> = batch.to_vec();
        batch_idx.resize(batch_rank, Index::Full);

        let mut idx1 = batch_idx.clone();
        idx1.push(row);
        idx1.push(Index::Full);
        let x1s = apply_axes(x1_ref, &idx1)?;

        let mut idx2 = batch_idx.clone();
        idx2.push(col);
        idx2.push(Index::Full);
        let x2s = apply_axes(x2_ref, &idx2)?;

        let params_s = params_ref.map_tensors(|_, p| {
            let mut idx = batch_idx.clone();
            idx.push(Index::Full);
            idx.push(Index::Full);
            apply_axes(p, &idx)
        })?;

        let sub = KernelOperator::new(
            x1s,
            x2s,
            Arc::clone(&self.covar),
            self.block,
            params_s,
        )?;
        Ok(KernelValue::Lazy(Box::new(sub)))
    }

    /// Swap the row and column roles: the derived operator evaluates
    /// `k(x2, x1)` with the block size reversed.
    pub fn transpose(&self) -> Result<Self, GramError> {
        KernelOperator::new(
            self.x2.clone(),
            self.x1.clone(),
            Arc::clone(&self.covar),
            self.block.reversed(),
            self.params.clone(),
        )
    }

    /// Apply the same permutation to the batch dimensions of the point sets
    /// and every tensor parameter.
    pub fn permute_batch(&self, dims: &[usize]) -> Result<Self, GramError> {
        check_permutation(dims, self.batch_shape.len())?;
        let x1 = permute_with_trailing(&self.x1, dims);
        let x2 = permute_with_trailing(&self.x2, dims);
        let params = self
            .params
            .map_tensors(|_, p| Ok::<_, GramError>(permute_with_trailing(p, dims)))?;
        KernelOperator::new(x1, x2, Arc::clone(&self.covar), self.block, params)
    }

    /// Insert a size-1 batch dimension at `dim` into the point sets and every
    /// tensor parameter.
    pub fn unsqueeze_batch(&self, dim: usize) -> Result<Self, GramError> {
        let rank = self.batch_shape.len();
        if dim > rank {
            return Err(GramError::BatchDimOutOfRange { dim, rank });
        }
        let x1 = self.x1.clone().insert_axis(Axis(dim));
        let x2 = self.x2.clone().insert_axis(Axis(dim));
        let params = self
            .params
            .map_tensors(|_, p| Ok::<_, GramError>(p.clone().insert_axis(Axis(dim))))?;
        KernelOperator::new(x1, x2, Arc::clone(&self.covar), self.block, params)
    }
}

impl<T: Scalar> LinearOp<T> for KernelOperator<T> {
    fn size(&self) -> Vec<usize> {
        KernelOperator::size(self)
    }

    fn to_dense(&self) -> Result<ArrayD<T>, GramError> {
        KernelOperator::to_dense(self)
    }

    fn diagonal(&self) -> Result<ArrayD<T>, GramError> {
        KernelOperator::diagonal(self)
    }

    fn matmul(&self, rhs: &ArrayD<T>) -> Result<ArrayD<T>, GramError> {
        KernelOperator::matmul(self, rhs)
    }

    fn get(&self, batch: &[usize], row: usize, col: usize) -> Result<T, GramError> {
        KernelOperator::get(self, batch, row, col)
    }

    fn index(
        &self,
        batch: &[Index],
        row: &Index,
        col: &Index,
    ) -> Result<KernelValue<T>, GramError> {
        KernelOperator::index(self, batch, row, col)
    }

    fn transpose(&self) -> Result<Box<dyn LinearOp<T>>, GramError> {
        Ok(Box::new(KernelOperator::transpose(self)?))
    }

    fn permute_batch(&self, dims: &[usize]) -> Result<Box<dyn LinearOp<T>>, GramError> {
        Ok(Box::new(KernelOperator::permute_batch(self, dims)?))
    }

    fn unsqueeze_batch(&self, dim: usize) -> Result<Box<dyn LinearOp<T>>, GramError> {
        Ok(Box::new(KernelOperator::unsqueeze_batch(self, dim)?))
    }
}

impl<T: Scalar> Clone for KernelOperator<T> {
    fn clone(&self) -> Self {
        Self {
            x1: self.x1.clone(),
            x2: self.x2.clone(),
            covar: Arc::clone(&self.covar),
            params: self.params.clone(),
            block: self.block,
            batch_shape: self.batch_shape.clone(),
            covar_mat: Memo::new(),
            dense: Memo::new(),
            diag: Memo::new(),
        }
    }
}

impl<T: Scalar> std::fmt::Debug for KernelOperator<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KernelOperator")
            .field("size", &self.size())
            .field("block", &self.block)
            .field("params", &self.params)
            .finish()
    }
}

/// (*B, M, D) -> (M, *B, 1, D), contiguous, for the batched diagonal trick.
fn promote_count_to_batch<T: Clone>(x: &ArrayD<T>) -> ArrayD<T> {
    let mut v = x.view().insert_axis(Axis(0));
    let nd = v.ndim();
    v.swap_axes(0, nd - 2);
    v.to_owned()
}

/// Insert `extra` synthetic size-1 leading axes.
fn raise_rank<T: Clone>(a: &ArrayD<T>, extra: usize) -> ArrayD<T> {
    let mut v = a.view();
    for _ in 0..extra {
        v = v.insert_axis(Axis(0));
    }
    v.to_owned()
}

/// Permute batch axes by `dims`, carrying the trailing two axes unchanged.
fn permute_with_trailing<T: Clone>(a: &ArrayD<T>, dims: &[usize]) -> ArrayD<T> {
    let nd = a.ndim();
    let mut order: Vec<usize> = dims.to_vec();
    order.extend(nd - 2..nd);
    a.view().permuted_axes(IxDyn(&order)).to_owned()
}

fn check_bound(index: usize, len: usize) -> Result<(), GramError> {
    if index < len {
        Ok(())
    } else {
        Err(GramError::IndexOutOfRange { index, len })
    }
}

/// `x[batch.., i, :]` as a `(1, D)` array.
fn take_point<T: Scalar>(
    x: &ArrayD<T>,
    batch: &[usize],
    i: usize,
) -> Result<ArrayD<T>, GramError> {
    let v = peel_batch(x.view(), batch)?;
    check_bound(i, v.shape()[0])?;
    let v = v.index_axis_move(Axis(0), i);
    Ok(v.insert_axis(Axis(0)).to_owned())
}

/// `p[batch.., :, :]` with all batch axes consumed.
fn take_batch<T: Scalar>(p: &ArrayD<T>, batch: &[usize]) -> Result<ArrayD<T>, GramError> {
    Ok(peel_batch(p.view(), batch)?.to_owned())
}

fn peel_batch<'a, T>(
    mut v: ArrayViewD<'a, T>,
    batch: &[usize],
) -> Result<ArrayViewD<'a, T>, GramError> {
    for &b in batch {
        check_bound(b, v.shape()[0])?;
        v = v.index_axis_move(Axis(0), b);
    }
    Ok(v)
}

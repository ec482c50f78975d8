//! Dense (materialized) batched matrices as lazy-matrix values.
//!
//! [`DenseOp`] wraps a concrete array and implements the full [`LinearOp`]
//! surface. It is the delegation target when a blocked index cannot be
//! translated exactly, and the natural lazy payload for covariance functions
//! that return an already-wrapped result.

use crate::core::traits::{KernelValue, LinearOp, Scalar};
use crate::error::GramError;
use crate::index::{index_dense, Index};
use crate::utils::broadcast::{broadcast_shapes, check_permutation};
use ndarray::{Array2, ArrayD, ArrayView2, ArrayViewD, ArrayViewMutD, Axis, Ix2, IxDyn};

#[cfg(feature = "rayon")]
use rayon::prelude::*;

/// A fully materialized batched matrix, shaped batch + (rows, cols).
#[derive(Clone, Debug)]
pub struct DenseOp<T>(ArrayD<T>);

impl<T: Scalar> DenseOp<T> {
    pub fn new(mat: ArrayD<T>) -> Result<Self, GramError> {
        if mat.ndim() < 2 {
            return Err(GramError::NotAMatrix(mat.shape().to_vec()));
        }
        Ok(Self(mat))
    }

    pub fn as_array(&self) -> &ArrayD<T> {
        &self.0
    }

    pub fn into_array(self) -> ArrayD<T> {
        self.0
    }
}

impl<T: Scalar> LinearOp<T> for DenseOp<T> {
    fn size(&self) -> Vec<usize> {
        self.0.shape().to_vec()
    }

    fn to_dense(&self) -> Result<ArrayD<T>, GramError> {
        Ok(self.0.clone())
    }

    fn diagonal(&self) -> Result<ArrayD<T>, GramError> {
        let nd = self.0.ndim();
        let (m, n) = (self.0.shape()[nd - 2], self.0.shape()[nd - 1]);
        if m != n {
            return Err(GramError::DiagonalUndefined {
                rows: m,
                cols: n,
                block_rows: 1,
                block_cols: 1,
            });
        }
        let batch = self.0.shape()[..nd - 2].to_vec();
        let mut out_shape = batch.clone();
        out_shape.push(m);
        let mut out = ArrayD::zeros(IxDyn(&out_shape));
        let total: usize = batch.iter().product();
        for flat in 0..total {
            let idx = unravel(flat, &batch);
            let mat = batch_view2(self.0.view(), &idx)?;
            let mut lane = peel_mut(out.view_mut(), &idx);
            for i in 0..m {
                lane[[i]] = mat[(i, i)];
            }
        }
        Ok(out)
    }

    fn matmul(&self, rhs: &ArrayD<T>) -> Result<ArrayD<T>, GramError> {
        batched_matmul(&self.0, rhs)
    }

    fn get(&self, batch: &[usize], row: usize, col: usize) -> Result<T, GramError> {
        let nd = self.0.ndim();
        if batch.len() != nd - 2 {
            return Err(GramError::UnsupportedIndex(format!(
                "{} batch indices for batch rank {}",
                batch.len(),
                nd - 2
            )));
        }
        let mut idx = batch.to_vec();
        idx.push(row);
        idx.push(col);
        for (&i, &len) in idx.iter().zip(self.0.shape()) {
            if i >= len {
                return Err(GramError::IndexOutOfRange { index: i, len });
            }
        }
        Ok(self.0[IxDyn(&idx)])
    }

    fn index(
        &self,
        batch: &[Index],
        row: &Index,
        col: &Index,
    ) -> Result<KernelValue<T>, GramError> {
        index_dense(&self.0, batch, row, col).map(KernelValue::Dense)
    }

    fn transpose(&self) -> Result<Box<dyn LinearOp<T>>, GramError> {
        let nd = self.0.ndim();
        let mut v = self.0.view();
        v.swap_axes(nd - 2, nd - 1);
        Ok(Box::new(DenseOp(v.to_owned())))
    }

    fn permute_batch(&self, dims: &[usize]) -> Result<Box<dyn LinearOp<T>>, GramError> {
        let nd = self.0.ndim();
        check_permutation(dims, nd - 2)?;
        let mut order = dims.to_vec();
        order.extend(nd - 2..nd);
        let permuted = self.0.view().permuted_axes(IxDyn(&order)).to_owned();
        Ok(Box::new(DenseOp(permuted)))
    }

    fn unsqueeze_batch(&self, dim: usize) -> Result<Box<dyn LinearOp<T>>, GramError> {
        let rank = self.0.ndim() - 2;
        if dim > rank {
            return Err(GramError::BatchDimOutOfRange { dim, rank });
        }
        Ok(Box::new(DenseOp(self.0.clone().insert_axis(Axis(dim)))))
    }
}

/// Batched matrix multiply with right-aligned batch broadcasting.
///
/// `rhs` is either a plain vector (trailing length matching the operator's
/// columns) or a batched stack of matrices. Both sides are broadcast to a
/// common batch shape; `rhs` is forced into standard layout before the
/// per-batch GEMMs.
pub fn batched_matmul<T: Scalar>(lhs: &ArrayD<T>, rhs: &ArrayD<T>) -> Result<ArrayD<T>, GramError> {
    let vector_rhs = rhs.ndim() == 1;
    let rhs_mat;
    let rhs = if vector_rhs {
        rhs_mat = rhs.clone().insert_axis(Axis(1));
        &rhs_mat
    } else {
        rhs
    };
    if lhs.ndim() < 2 || rhs.ndim() < 2 {
        return Err(GramError::ShapeMismatch {
            op: "matmul",
            lhs: lhs.shape().to_vec(),
            rhs: rhs.shape().to_vec(),
        });
    }
    let (lnd, rnd) = (lhs.ndim(), rhs.ndim());
    let (m, k) = (lhs.shape()[lnd - 2], lhs.shape()[lnd - 1]);
    let (k2, c) = (rhs.shape()[rnd - 2], rhs.shape()[rnd - 1]);
    if k != k2 {
        return Err(GramError::ShapeMismatch {
            op: "matmul",
            lhs: lhs.shape().to_vec(),
            rhs: rhs.shape().to_vec(),
        });
    }
    let batch = broadcast_shapes(&[&lhs.shape()[..lnd - 2], &rhs.shape()[..rnd - 2]]).ok_or(
        GramError::ShapeMismatch {
            op: "matmul batch broadcast",
            lhs: lhs.shape().to_vec(),
            rhs: rhs.shape().to_vec(),
        },
    )?;

    // Guard against exotic layouts on the right-hand side.
    let rhs_std = rhs.as_standard_layout();

    let mut lhs_full = batch.clone();
    lhs_full.extend([m, k]);
    let mut rhs_full = batch.clone();
    rhs_full.extend([k, c]);
    let lv = lhs
        .broadcast(IxDyn(&lhs_full))
        .ok_or_else(|| internal_shape("matmul lhs broadcast", lhs.shape(), &lhs_full))?;
    let rv = rhs_std
        .broadcast(IxDyn(&rhs_full))
        .ok_or_else(|| internal_shape("matmul rhs broadcast", rhs.shape(), &rhs_full))?;

    let total: usize = batch.iter().product();

    #[cfg(feature = "rayon")]
    let blocks: Vec<Array2<T>> = (0..total)
        .into_par_iter()
        .map(|flat| {
            let idx = unravel(flat, &batch);
            let a = batch_view2(lv.view(), &idx)?;
            let b = batch_view2(rv.view(), &idx)?;
            Ok(a.dot(&b))
        })
        .collect::<Result<_, GramError>>()?;

    #[cfg(not(feature = "rayon"))]
    let blocks: Vec<Array2<T>> = (0..total)
        .map(|flat| {
            let idx = unravel(flat, &batch);
            let a = batch_view2(lv.view(), &idx)?;
            let b = batch_view2(rv.view(), &idx)?;
            Ok(a.dot(&b))
        })
        .collect::<Result<_, GramError>>()?;

    let mut out_shape = batch.clone();
    out_shape.extend([m, c]);
    let mut out = ArrayD::zeros(IxDyn(&out_shape));
    for (flat, block) in blocks.iter().enumerate() {
        let idx = unravel(flat, &batch);
        let mut slot = peel_mut(out.view_mut(), &idx);
        slot.assign(block);
    }

    if vector_rhs {
        let nd = out.ndim();
        out = out.index_axis_move(Axis(nd - 1), 0);
    }
    Ok(out)
}

/// Decode a flat batch position into a multi-index over `shape`.
pub(crate) fn unravel(mut flat: usize, shape: &[usize]) -> Vec<usize> {
    let mut idx = vec![0usize; shape.len()];
    for (i, &d) in shape.iter().enumerate().rev() {
        idx[i] = flat % d;
        flat /= d;
    }
    idx
}

/// Peel the leading batch axes off `v` and view the remaining two as 2-D.
pub(crate) fn batch_view2<'a, T>(
    mut v: ArrayViewD<'a, T>,
    idx: &[usize],
) -> Result<ArrayView2<'a, T>, GramError> {
    for &i in idx {
        v = v.index_axis_move(Axis(0), i);
    }
    let shape = v.shape().to_vec();
    v.into_dimensionality::<Ix2>()
        .map_err(|_| internal_shape("batch view", &shape, &[]))
}

/// Mutable view of a batch slot (all remaining trailing axes).
fn peel_mut<'a, T>(mut v: ArrayViewMutD<'a, T>, idx: &[usize]) -> ArrayViewMutD<'a, T> {
    for &i in idx {
        v = v.index_axis_move(Axis(0), i);
    }
    v
}

fn internal_shape(op: &'static str, lhs: &[usize], rhs: &[usize]) -> GramError {
    GramError::ShapeMismatch {
        op,
        lhs: lhs.to_vec(),
        rhs: rhs.to_vec(),
    }
}

//! Batch-shape broadcasting and validation for kernel operator inputs.
//!
//! Broadcasting is right-aligned: trailing dimensions must be equal or one of
//! them 1, and shorter shapes are left-padded with 1. Point sets and tensor
//! parameters keep their own trailing two dimensions; only the leading batch
//! dimensions participate.

use crate::error::GramError;
use ndarray::{ArrayD, IxDyn};
use std::collections::BTreeMap;

/// Compute the common right-aligned broadcast of `shapes`, or `None` if they
/// are incompatible.
pub fn broadcast_shapes(shapes: &[&[usize]]) -> Option<Vec<usize>> {
    let rank = shapes.iter().map(|s| s.len()).max().unwrap_or(0);
    let mut out = vec![1usize; rank];
    for shape in shapes {
        let pad = rank - shape.len();
        for (i, &d) in shape.iter().enumerate() {
            let o = &mut out[pad + i];
            if *o == 1 {
                *o = d;
            } else if d != 1 && d != *o {
                return None;
            }
        }
    }
    Some(out)
}

/// Expand `a` to `batch` + its own trailing two dimensions, in standard
/// (contiguous) layout. Expansion only repeats along size-1 dims.
fn expand_to_batch<T: Clone>(a: &ArrayD<T>, batch: &[usize]) -> Option<ArrayD<T>> {
    let nd = a.ndim();
    let mut full = batch.to_vec();
    full.extend_from_slice(&a.shape()[nd - 2..]);
    a.broadcast(IxDyn(&full)).map(|v| v.to_owned())
}

/// Validated, batch-aligned kernel inputs: x1, x2, and every tensor parameter
/// share the identical batch shape.
#[derive(Debug)]
pub struct AlignedInputs<T> {
    pub x1: ArrayD<T>,
    pub x2: ArrayD<T>,
    pub tensor_params: BTreeMap<String, ArrayD<T>>,
    pub batch_shape: Vec<usize>,
}

/// Validate and broadcast-expand the row set, column set, and tensor
/// parameters to a common batch shape.
///
/// On failure, first checks whether x1 and x2 alone are compatible (with their
/// count dimension replaced by 1, since counts are never supposed to broadcast
/// against each other): if not, the data shapes are at fault; otherwise the
/// offending parameter(s) are reported by name.
pub fn align_inputs<T: Clone>(
    x1: ArrayD<T>,
    x2: ArrayD<T>,
    tensor_params: BTreeMap<String, ArrayD<T>>,
) -> Result<AlignedInputs<T>, GramError> {
    if x1.ndim() < 2 || x2.ndim() < 2 {
        return Err(GramError::DataShapes {
            x1: x1.shape().to_vec(),
            x2: x2.shape().to_vec(),
        });
    }
    for (name, p) in &tensor_params {
        if p.ndim() < 2 {
            return Err(GramError::ParamRank {
                name: name.clone(),
                shape: p.shape().to_vec(),
            });
        }
    }

    let x1_batch = &x1.shape()[..x1.ndim() - 2];
    let x2_batch = &x2.shape()[..x2.ndim() - 2];
    let param_batches: Vec<&[usize]> = tensor_params
        .values()
        .map(|p| &p.shape()[..p.ndim() - 2])
        .collect();

    let mut shapes: Vec<&[usize]> = vec![x1_batch, x2_batch];
    shapes.extend(param_batches.iter().copied());

    let Some(batch_shape) = broadcast_shapes(&shapes) else {
        return Err(diagnose_failure(&x1, &x2, &tensor_params));
    };

    let expand = |a: &ArrayD<T>| {
        expand_to_batch(a, &batch_shape).ok_or_else(|| GramError::DataShapes {
            x1: x1.shape().to_vec(),
            x2: x2.shape().to_vec(),
        })
    };
    let x1e = expand(&x1)?;
    let x2e = expand(&x2)?;
    let mut expanded = BTreeMap::new();
    for (name, p) in &tensor_params {
        expanded.insert(name.clone(), expand(p)?);
    }

    Ok(AlignedInputs {
        x1: x1e,
        x2: x2e,
        tensor_params: expanded,
        batch_shape,
    })
}

fn diagnose_failure<T>(
    x1: &ArrayD<T>,
    x2: &ArrayD<T>,
    tensor_params: &BTreeMap<String, ArrayD<T>>,
) -> GramError {
    let nodata = |a: &ArrayD<T>| {
        let nd = a.ndim();
        let mut s = a.shape()[..nd - 2].to_vec();
        s.push(1);
        s.push(a.shape()[nd - 1]);
        s
    };
    let x1_nodata = nodata(x1);
    let x2_nodata = nodata(x2);
    let Some(data_batch) = broadcast_shapes(&[&x1_nodata, &x2_nodata]) else {
        return GramError::DataShapes {
            x1: x1.shape().to_vec(),
            x2: x2.shape().to_vec(),
        };
    };
    // The data is self-consistent, so some parameter batch shape is at fault.
    // Name the specific offenders; fall back to all of them when the conflict
    // is mutual.
    let data_batch = &data_batch[..data_batch.len() - 2];
    let mut offenders: Vec<(String, Vec<usize>)> = tensor_params
        .iter()
        .filter(|(_, p)| {
            let pb = &p.shape()[..p.ndim() - 2];
            broadcast_shapes(&[data_batch, pb]).is_none()
        })
        .map(|(name, p)| (name.clone(), p.shape().to_vec()))
        .collect();
    if offenders.is_empty() {
        offenders = tensor_params
            .iter()
            .map(|(name, p)| (name.clone(), p.shape().to_vec()))
            .collect();
    }
    GramError::ParamShapes {
        params: offenders,
        x1: x1.shape().to_vec(),
        x2: x2.shape().to_vec(),
    }
}

/// Check that `dims` is a permutation of `0..rank`.
pub(crate) fn check_permutation(dims: &[usize], rank: usize) -> Result<(), GramError> {
    let mut seen = vec![false; rank];
    let valid = dims.len() == rank
        && dims.iter().all(|&d| {
            if d >= rank || seen[d] {
                false
            } else {
                seen[d] = true;
                true
            }
        });
    if valid {
        Ok(())
    } else {
        Err(GramError::InvalidPermutation {
            dims: dims.to_vec(),
            rank,
        })
    }
}

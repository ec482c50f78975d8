//! Index expressions and their application to batched arrays.
//!
//! An [`Index`] selects positions along a single axis. Applying one never
//! evaluates a covariance function; the block-structured translation for
//! multi-output operators lives in [`translate_blocked`].

use crate::error::GramError;
use ndarray::{ArrayD, Axis, Slice};

/// A single-axis index expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Index {
    /// The whole axis, untouched.
    Full,
    /// Half-open range with a positive step. Bounds past the end of the axis
    /// are clamped, like slice semantics everywhere.
    Range {
        start: usize,
        end: usize,
        step: usize,
    },
    /// A single position; the axis is dropped.
    Point(usize),
    /// An explicit list of positions; the axis is kept.
    Select(Vec<usize>),
}

impl Index {
    /// Step-1 range over `r`.
    pub fn range(r: std::ops::Range<usize>) -> Self {
        Index::Range {
            start: r.start,
            end: r.end,
            step: 1,
        }
    }

    /// Range over `r` with the given step.
    pub fn stepped(r: std::ops::Range<usize>, step: usize) -> Self {
        Index::Range {
            start: r.start,
            end: r.end,
            step,
        }
    }

    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Index::Full => "full",
            Index::Range { step: 1, .. } => "range",
            Index::Range { .. } => "stepped range",
            Index::Point(_) => "point",
            Index::Select(_) => "select",
        }
    }
}

/// Apply `idx` along `axis` of `a`. `Point` drops the axis; everything else
/// keeps it.
pub(crate) fn apply_axis<T: Clone>(
    a: &ArrayD<T>,
    axis: usize,
    idx: &Index,
) -> Result<ArrayD<T>, GramError> {
    let len = a.shape()[axis];
    match idx {
        Index::Full => Ok(a.clone()),
        Index::Range { start, end, step } => {
            if *step == 0 {
                return Err(GramError::UnsupportedIndex("zero-step range".into()));
            }
            let end = (*end).min(len);
            let start = (*start).min(end);
            Ok(a
                .slice_axis(
                    Axis(axis),
                    Slice::new(start as isize, Some(end as isize), *step as isize),
                )
                .to_owned())
        }
        Index::Point(i) => {
            if *i >= len {
                return Err(GramError::IndexOutOfRange { index: *i, len });
            }
            Ok(a.index_axis(Axis(axis), *i).to_owned())
        }
        Index::Select(positions) => {
            if let Some(&bad) = positions.iter().find(|&&p| p >= len) {
                return Err(GramError::IndexOutOfRange { index: bad, len });
            }
            Ok(a.select(Axis(axis), positions))
        }
    }
}

/// Apply one index per leading axis, right to left so `Point` removals never
/// shift the axes still to be indexed.
pub(crate) fn apply_axes<T: Clone>(a: &ArrayD<T>, idx: &[Index]) -> Result<ArrayD<T>, GramError> {
    let mut out = None;
    for (axis, ix) in idx.iter().enumerate().rev() {
        if matches!(ix, Index::Full) {
            continue;
        }
        let src = out.as_ref().unwrap_or(a);
        out = Some(apply_axis(src, axis, ix)?);
    }
    Ok(out.unwrap_or_else(|| a.clone()))
}

/// Index a dense batched matrix: batch indices on the leading axes, `row` and
/// `col` on the trailing two. Missing batch indices take their axes in full.
pub(crate) fn index_dense<T: Clone>(
    a: &ArrayD<T>,
    batch: &[Index],
    row: &Index,
    col: &Index,
) -> Result<ArrayD<T>, GramError> {
    let batch_rank = a.ndim() - 2;
    if batch.len() > batch_rank {
        return Err(GramError::UnsupportedIndex(format!(
            "{} batch indices for batch rank {batch_rank}",
            batch.len()
        )));
    }
    let mut idx: Vec<Index> = batch.to_vec();
    idx.resize(batch_rank, Index::Full);
    idx.push(row.clone());
    idx.push(col.clone());
    apply_axes(a, &idx)
}

/// Outcome of translating blocked row/col indices onto point-set indices.
#[derive(Debug)]
pub(crate) enum BlockTranslation {
    /// Both indices divide exactly; use the translated point indices.
    Exact { row: Index, col: Index },
    /// Exact translation impossible; evaluate densely and delegate.
    Dense(&'static str),
}

/// Translate row/col indices over a matrix with (rows, cols) outputs per
/// input onto indices over the underlying point sets.
///
/// Valid only for unstepped ranges whose bounds are exactly divisible by the
/// respective multiplicity; anything else is reported for dense delegation
/// with the precise reason.
pub(crate) fn translate_blocked(row: &Index, col: &Index, blocks: (usize, usize)) -> BlockTranslation {
    fn translate(idx: &Index, block: usize) -> Result<Index, &'static str> {
        match idx {
            Index::Full => Ok(Index::Full),
            Index::Range { start, end, step: 1 } => {
                if start % block == 0 && end % block == 0 {
                    Ok(Index::Range {
                        start: start / block,
                        end: end / block,
                        step: 1,
                    })
                } else {
                    Err("slice bounds not aligned to the output block")
                }
            }
            Index::Range { .. } => Err("stepped slice over a blocked axis"),
            Index::Point(_) | Index::Select(_) => Err("non-slice index over a blocked axis"),
        }
    }
    match (translate(row, blocks.0), translate(col, blocks.1)) {
        (Ok(row), Ok(col)) => BlockTranslation::Exact { row, col },
        (Err(reason), _) | (_, Err(reason)) => BlockTranslation::Dense(reason),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{ArrayD, IxDyn};

    fn arange(shape: &[usize]) -> ArrayD<f64> {
        let n: usize = shape.iter().product();
        ArrayD::from_shape_vec(IxDyn(shape), (0..n).map(|i| i as f64).collect()).unwrap()
    }

    #[test]
    fn range_slices_and_clamps() {
        let a = arange(&[5, 3]);
        let b = apply_axis(&a, 0, &Index::range(1..4)).unwrap();
        assert_eq!(b.shape(), &[3, 3]);
        assert_eq!(b[[0, 0]], 3.0);
        let c = apply_axis(&a, 0, &Index::range(2..99)).unwrap();
        assert_eq!(c.shape(), &[3, 3]);
    }

    #[test]
    fn point_drops_the_axis() {
        let a = arange(&[4, 3]);
        let b = apply_axis(&a, 0, &Index::Point(2)).unwrap();
        assert_eq!(b.shape(), &[3]);
        assert_eq!(b[[1]], 7.0);
        assert!(apply_axis(&a, 0, &Index::Point(4)).is_err());
    }

    #[test]
    fn select_gathers_positions() {
        let a = arange(&[4, 2]);
        let b = apply_axis(&a, 0, &Index::Select(vec![3, 0])).unwrap();
        assert_eq!(b.shape(), &[2, 2]);
        assert_eq!(b[[0, 0]], 6.0);
        assert_eq!(b[[1, 0]], 0.0);
    }

    #[test]
    fn apply_axes_handles_point_removal() {
        let a = arange(&[2, 4, 3]);
        let b = apply_axes(&a, &[Index::Point(1), Index::range(0..2), Index::Full]).unwrap();
        assert_eq!(b.shape(), &[2, 3]);
        assert_eq!(b[[0, 0]], 12.0);
    }

    #[test]
    fn blocked_translation_divides_aligned_slices() {
        match translate_blocked(&Index::range(0..4), &Index::Full, (2, 1)) {
            BlockTranslation::Exact { row, col } => {
                assert_eq!(row, Index::range(0..2));
                assert_eq!(col, Index::Full);
            }
            other => panic!("expected exact translation, got {other:?}"),
        }
    }

    #[test]
    fn blocked_translation_rejects_misaligned_and_stepped() {
        assert!(matches!(
            translate_blocked(&Index::range(1..3), &Index::Full, (2, 1)),
            BlockTranslation::Dense(_)
        ));
        assert!(matches!(
            translate_blocked(&Index::stepped(0..4, 2), &Index::Full, (2, 1)),
            BlockTranslation::Dense(_)
        ));
        assert!(matches!(
            translate_blocked(&Index::Select(vec![0, 1]), &Index::Full, (2, 1)),
            BlockTranslation::Dense(_)
        ));
    }
}

//! Tests for indexed/sliced views of kernel operators.
//!
//! Unit-block indices must re-slice the point sets and parameters (staying
//! lazy) and agree with slicing the materialized matrix. Indices over a
//! multi-output operator must translate exactly when aligned with the output
//! block and fall back to dense delegation otherwise.

use approx::assert_abs_diff_eq;
use gramian::{GramError, Index, KernelOperator, KernelValue, Params};
use ndarray::{ArrayD, Axis, IxDyn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;

fn randn(shape: &[usize], seed: u64) -> ArrayD<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    let n: usize = shape.iter().product();
    let data: Vec<f64> = (0..n).map(|_| rng.r#gen::<f64>() * 2.0 - 1.0).collect();
    ArrayD::from_shape_vec(IxDyn(shape), data).unwrap()
}

/// Linear covariance scaled by a per-batch `scale` parameter, so that tests
/// can observe whether parameters were re-sliced along with the data.
fn scaled_linear(x1: &ArrayD<f64>, x2: &ArrayD<f64>, params: &Params<f64>) -> KernelValue<f64> {
    let scale = params.tensor("scale").unwrap();
    let n1 = x1.ndim();
    let n2 = x2.ndim();
    let x1u = x1.view().insert_axis(Axis(n1 - 1)); // batch + (M, 1, D)
    let x2u = x2.view().insert_axis(Axis(n2 - 2)); // batch + (1, N, D)
    let full: Vec<usize> = x1u
        .shape()
        .iter()
        .zip(x2u.shape())
        .map(|(&a, &b)| a.max(b))
        .collect();
    let d1 = x1u.broadcast(IxDyn(&full)).unwrap();
    let d2 = x2u.broadcast(IxDyn(&full)).unwrap();
    let dot = (&d1 * &d2).sum_axis(Axis(full.len() - 1));
    KernelValue::Dense(dot * scale)
}

fn linear_op(
    x1: ArrayD<f64>,
    x2: ArrayD<f64>,
    scale: ArrayD<f64>,
) -> KernelOperator<f64> {
    KernelOperator::from_fn(x1, x2, scaled_linear, Params::new().with_tensor("scale", scale))
        .unwrap()
}

/// Two matrix rows per row point: row `2i` holds the dot products of point
/// `i`, row `2i + 1` their squares plus one. Row structure depends only on
/// the point, so slicing the point set commutes with evaluation.
fn two_output(x1: &ArrayD<f64>, x2: &ArrayD<f64>, _params: &Params<f64>) -> KernelValue<f64> {
    let m = x1.shape()[0];
    let n = x2.shape()[0];
    let d = x1.shape()[1];
    let mut out = ArrayD::zeros(IxDyn(&[2 * m, n]));
    for i in 0..m {
        for j in 0..n {
            let mut dot = 0.0;
            for k in 0..d {
                dot += x1[[i, k]] * x2[[j, k]];
            }
            out[[2 * i, j]] = dot;
            out[[2 * i + 1, j]] = dot * dot + 1.0;
        }
    }
    KernelValue::Dense(out)
}

fn assert_dense_eq(value: &KernelValue<f64>, expected: &ArrayD<f64>) {
    let got = value.to_dense().unwrap();
    assert_eq!(got.shape(), expected.shape());
    for (a, b) in got.iter().zip(expected.iter()) {
        assert_abs_diff_eq!(a, b, epsilon = 1e-12);
    }
}

/// Full-range indices reproduce the operator unchanged, lazily.
#[test]
fn full_index_stays_lazy_and_complete() {
    let op = linear_op(
        randn(&[5, 2], 1),
        randn(&[4, 2], 2),
        ArrayD::from_elem(IxDyn(&[1, 1]), 1.0),
    );
    let dense = op.to_dense().unwrap();
    let sub = op.index(&[], &Index::Full, &Index::Full).unwrap();
    assert!(matches!(sub, KernelValue::Lazy(_)));
    assert_eq!(sub.size(), vec![5, 4]);
    assert_dense_eq(&sub, &dense);
}

/// Range and select indices on a unit-block operator re-slice the point sets
/// and agree with slicing the dense matrix.
#[test]
fn unit_block_slices_match_dense_slices() {
    let op = linear_op(
        randn(&[5, 2], 3),
        randn(&[4, 2], 4),
        ArrayD::from_elem(IxDyn(&[1, 1]), 2.5),
    );
    let dense = op.to_dense().unwrap();

    let sub = op
        .index(&[], &Index::range(1..4), &Index::Select(vec![3, 0]))
        .unwrap();
    assert!(matches!(sub, KernelValue::Lazy(_)));
    assert_eq!(sub.size(), vec![3, 2]);
    let got = sub.to_dense().unwrap();
    for i in 0..3 {
        for (jj, &j) in [3usize, 0].iter().enumerate() {
            assert_abs_diff_eq!(got[[i, jj]], dense[[i + 1, j]], epsilon = 1e-12);
        }
    }

    // A point index on the count axis widens to a one-row view.
    let row = op.index(&[], &Index::Point(2), &Index::Full).unwrap();
    assert_eq!(row.size(), vec![1, 4]);
    let got = row.to_dense().unwrap();
    for j in 0..4 {
        assert_abs_diff_eq!(got[[0, j]], dense[[2, j]], epsilon = 1e-12);
    }
}

/// A point index on a batch dimension drops it and re-slices the batched
/// parameters along with the data.
#[test]
fn batch_point_index_selects_the_slot() {
    let op = linear_op(
        randn(&[2, 5, 2], 5),
        randn(&[2, 4, 2], 6),
        randn(&[2, 1, 1], 7),
    );
    let dense = op.to_dense().unwrap();

    let sub = op
        .index(&[Index::Point(1)], &Index::Full, &Index::Full)
        .unwrap();
    assert_eq!(sub.size(), vec![5, 4]);
    let got = sub.to_dense().unwrap();
    for i in 0..5 {
        for j in 0..4 {
            assert_abs_diff_eq!(got[[i, j]], dense[[1, i, j]], epsilon = 1e-12);
        }
    }

    // Fewer batch indices than batch dimensions: the rest are taken in full.
    let all = op.index(&[], &Index::range(0..2), &Index::Full).unwrap();
    assert_eq!(all.size(), vec![2, 2, 4]);
}

/// More batch indices than batch dimensions raises the operator with
/// synthetic size-1 axes; only plain ranges may index those.
#[test]
fn extra_batch_indices_need_plain_ranges() {
    let op = linear_op(
        randn(&[5, 2], 8),
        randn(&[4, 2], 9),
        ArrayD::from_elem(IxDyn(&[1, 1]), 1.0),
    );
    let dense = op.to_dense().unwrap();

    let sub = op
        .index(&[Index::range(0..1)], &Index::Full, &Index::Full)
        .unwrap();
    assert_eq!(sub.size(), vec![1, 5, 4]);
    let got = sub.to_dense().unwrap();
    for i in 0..5 {
        for j in 0..4 {
            assert_abs_diff_eq!(got[[0, i, j]], dense[[i, j]], epsilon = 1e-12);
        }
    }

    assert!(matches!(
        op.index(&[Index::Point(0)], &Index::Full, &Index::Full),
        Err(GramError::UnsupportedIndex(_))
    ));
    assert!(matches!(
        op.index(&[Index::Select(vec![0])], &Index::Full, &Index::Full),
        Err(GramError::UnsupportedIndex(_))
    ));
}

/// Block-aligned slices over a two-outputs-per-row operator translate onto
/// the point sets and stay lazy.
#[test]
fn aligned_blocked_slice_stays_lazy() {
    let x1 = randn(&[3, 2], 10);
    let x2 = randn(&[4, 2], 11);
    let op =
        KernelOperator::new(x1, x2, Arc::new(two_output), (2usize, 1usize), Params::new())
            .unwrap();
    assert_eq!(op.size(), vec![6, 4]);

    let dense = op.to_dense().unwrap();
    let sub = op.index(&[], &Index::range(0..4), &Index::Full).unwrap();
    assert!(matches!(sub, KernelValue::Lazy(_)));
    assert_eq!(sub.size(), vec![4, 4]);
    let got = sub.to_dense().unwrap();
    for i in 0..4 {
        for j in 0..4 {
            assert_abs_diff_eq!(got[[i, j]], dense[[i, j]], epsilon = 1e-12);
        }
    }
}

/// Misaligned, stepped, and non-slice indices over a blocked axis delegate to
/// the dense matrix and come back as concrete arrays with the right values.
#[test]
fn misaligned_blocked_slice_falls_back_to_dense() {
    let x1 = randn(&[3, 2], 12);
    let x2 = randn(&[4, 2], 13);
    let op =
        KernelOperator::new(x1, x2, Arc::new(two_output), (2usize, 1usize), Params::new())
            .unwrap();
    let dense = op.to_dense().unwrap();

    let sub = op.index(&[], &Index::range(1..3), &Index::Full).unwrap();
    assert!(matches!(sub, KernelValue::Dense(_)));
    assert_eq!(sub.size(), vec![2, 4]);
    let got = sub.to_dense().unwrap();
    for i in 0..2 {
        for j in 0..4 {
            assert_abs_diff_eq!(got[[i, j]], dense[[i + 1, j]], epsilon = 1e-12);
        }
    }

    let stepped = op
        .index(&[], &Index::stepped(0..6, 2), &Index::Full)
        .unwrap();
    assert!(matches!(stepped, KernelValue::Dense(_)));
    assert_eq!(stepped.size(), vec![3, 4]);
    let got = stepped.to_dense().unwrap();
    for i in 0..3 {
        for j in 0..4 {
            assert_abs_diff_eq!(got[[i, j]], dense[[2 * i, j]], epsilon = 1e-12);
        }
    }

    let picked = op
        .index(&[], &Index::Select(vec![5, 0]), &Index::Full)
        .unwrap();
    assert!(matches!(picked, KernelValue::Dense(_)));
    let got = picked.to_dense().unwrap();
    for j in 0..4 {
        assert_abs_diff_eq!(got[[0, j]], dense[[5, j]], epsilon = 1e-12);
        assert_abs_diff_eq!(got[[1, j]], dense[[0, j]], epsilon = 1e-12);
    }
}

/// Element lookup on a blocked operator resolves the inner position within
/// the output block.
#[test]
fn get_resolves_blocked_elements() {
    let x1 = randn(&[3, 2], 14);
    let x2 = randn(&[4, 2], 15);
    let op =
        KernelOperator::new(x1, x2, Arc::new(two_output), (2usize, 1usize), Params::new())
            .unwrap();
    let dense = op.to_dense().unwrap();
    for (i, j) in [(0, 0), (1, 2), (4, 3), (5, 1)] {
        assert_abs_diff_eq!(op.get(&[], i, j).unwrap(), dense[[i, j]], epsilon = 1e-12);
    }
}

/// Transposing reverses the outputs-per-input along with the point sets.
#[test]
fn transpose_reverses_the_block() {
    let x1 = randn(&[3, 2], 16);
    let x2 = randn(&[4, 2], 17);
    let op =
        KernelOperator::new(x1, x2, Arc::new(two_output), (2usize, 1usize), Params::new())
            .unwrap();
    let t = op.transpose().unwrap();
    assert_eq!(t.size(), vec![4, 6]);
    assert_eq!(t.block().rows, 1);
    assert_eq!(t.block().cols, 2);
}

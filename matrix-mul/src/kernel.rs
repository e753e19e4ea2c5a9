//! Local multiply kernel: the textbook i-j-k triple loop.

use crate::{Error, Matrix};

/// Fails with [`Error::DimensionMismatch`] unless `a.cols == b.rows`.
pub fn check_compatible(a: &Matrix, b: &Matrix) -> Result<(), Error> {
    if a.cols() != b.rows() {
        return Err(Error::DimensionMismatch(
            a.rows(),
            a.cols(),
            b.rows(),
            b.cols(),
        ));
    }
    Ok(())
}

/// Computes the row-block of C for a row-block of A against the full B.
///
/// A block with zero rows yields an empty `0 × b.cols` block.
pub fn multiply_block(a_block: &Matrix, b: &Matrix) -> Result<Matrix, Error> {
    check_compatible(a_block, b)?;
    let mut c_block = Matrix::zeros(a_block.rows(), b.cols())?;
    if a_block.rows() == 0 {
        return Ok(c_block);
    }
    multiply_rows_into(a_block.as_slice(), a_block.cols(), b, c_block.as_mut_slice());
    Ok(c_block)
}

/// Reference single-worker product.
pub fn multiply_sequential(a: &Matrix, b: &Matrix) -> Result<Matrix, Error> {
    multiply_block(a, b)
}

/// Writes `a_rows · b` into `out`.
///
/// `a_rows` holds whole rows of width `k` and `out` the matching rows of
/// width `b.cols()`. Each output cell is accumulated left to right over `k`
/// and written once, so disjoint row ranges can be computed concurrently.
pub fn multiply_rows_into(a_rows: &[f64], k: usize, b: &Matrix, out: &mut [f64]) {
    let m = b.cols();
    debug_assert_eq!(k, b.rows());
    if m == 0 {
        return;
    }
    let rows = out.len() / m;
    debug_assert_eq!(a_rows.len(), rows * k);

    let b = b.as_slice();
    for i in 0..rows {
        let a_row = &a_rows[i * k..(i + 1) * k];
        let c_row = &mut out[i * m..(i + 1) * m];
        for (j, cell) in c_row.iter_mut().enumerate() {
            let mut sum = 0.0;
            for (kk, &a_ik) in a_row.iter().enumerate() {
                sum += a_ik * b[kk * m + j];
            }
            *cell = sum;
        }
    }
}

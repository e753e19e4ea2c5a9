//! Dense row-major matrix of `f64` backed by one flat buffer.

use std::ops::Range;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::Error;

/// A dense `rows × cols` matrix stored row-major in a single allocation.
///
/// Element `(i, j)` lives at `data[i * cols + j]`. A matrix with zero rows
/// or zero columns is valid and owns an empty buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct Matrix {
    rows: usize,
    cols: usize,
    data: Vec<f64>,
}

impl Matrix {
    /// Allocates a zero-filled matrix.
    ///
    /// The buffer is reserved up front so an oversized request surfaces as
    /// [`Error::Allocation`] instead of aborting the process.
    pub fn zeros(rows: usize, cols: usize) -> Result<Self, Error> {
        let len = element_count(rows, cols)?;
        let mut data = Vec::new();
        data.try_reserve_exact(len)
            .map_err(|_| Error::Allocation { rows, cols })?;
        data.resize(len, 0.0);
        Ok(Self { rows, cols, data })
    }

    /// Wraps an existing row-major buffer.
    pub fn from_vec(rows: usize, cols: usize, data: Vec<f64>) -> Result<Self, Error> {
        let len = element_count(rows, cols)?;
        if data.len() != len {
            return Err(Error::Shape {
                rows,
                cols,
                len: data.len(),
            });
        }
        Ok(Self { rows, cols, data })
    }

    pub fn from_fn(
        rows: usize,
        cols: usize,
        mut f: impl FnMut(usize, usize) -> f64,
    ) -> Result<Self, Error> {
        let mut m = Self::zeros(rows, cols)?;
        for i in 0..rows {
            for (j, cell) in m.row_mut(i).iter_mut().enumerate() {
                *cell = f(i, j);
            }
        }
        Ok(m)
    }

    pub fn identity(n: usize) -> Result<Self, Error> {
        Self::from_fn(n, n, |i, j| if i == j { 1.0 } else { 0.0 })
    }

    /// Fills a matrix with uniform values in `[0, 1)` from a seeded generator.
    ///
    /// The same seed always yields the same matrix, which is what lets the
    /// backends be compared against each other.
    pub fn random(rows: usize, cols: usize, seed: u64) -> Result<Self, Error> {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut m = Self::zeros(rows, cols)?;
        for cell in m.data.iter_mut() {
            *cell = rng.gen_range(0.0..1.0);
        }
        Ok(m)
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.data[self.index(i, j)]
    }

    pub fn row(&self, i: usize) -> &[f64] {
        &self.data[self.span(i..i + 1)]
    }

    pub fn row_mut(&mut self, i: usize) -> &mut [f64] {
        let span = self.span(i..i + 1);
        &mut self.data[span]
    }

    /// Rows `offset..offset + count` as one contiguous slice.
    pub fn rows_slice(&self, offset: usize, count: usize) -> &[f64] {
        &self.data[self.span(offset..offset + count)]
    }

    pub fn rows_slice_mut(&mut self, offset: usize, count: usize) -> &mut [f64] {
        let span = self.span(offset..offset + count);
        &mut self.data[span]
    }

    /// Copies rows `offset..offset + count` into a new matrix.
    pub fn row_block(&self, offset: usize, count: usize) -> Result<Self, Error> {
        Self::from_vec(count, self.cols, self.rows_slice(offset, count).to_vec())
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [f64] {
        &mut self.data
    }

    /// Compares element-wise with a relative tolerance.
    ///
    /// Values are treated as equal when `|x - y| <= tol * max(|x|, |y|, 1)`,
    /// so cells near zero are compared absolutely.
    pub fn approx_eq(&self, other: &Matrix, tol: f64) -> bool {
        if self.rows != other.rows || self.cols != other.cols {
            return false;
        }
        self.data.iter().zip(&other.data).all(|(&x, &y)| {
            let scale = x.abs().max(y.abs()).max(1.0);
            (x - y).abs() <= tol * scale
        })
    }

    fn index(&self, i: usize, j: usize) -> usize {
        assert!(
            i < self.rows && j < self.cols,
            "index ({}, {}) out of bounds for {}x{} matrix",
            i,
            j,
            self.rows,
            self.cols
        );
        i * self.cols + j
    }

    fn span(&self, rows: Range<usize>) -> Range<usize> {
        assert!(
            rows.start <= rows.end && rows.end <= self.rows,
            "rows {:?} out of bounds for {}x{} matrix",
            rows,
            self.rows,
            self.cols
        );
        rows.start * self.cols..rows.end * self.cols
    }
}

fn element_count(rows: usize, cols: usize) -> Result<usize, Error> {
    rows.checked_mul(cols)
        .filter(|&len| len <= isize::MAX as usize / std::mem::size_of::<f64>())
        .ok_or(Error::Allocation { rows, cols })
}

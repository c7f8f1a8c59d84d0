use sprs::CsMat;

use crate::error::ConvertError;

/// Row-major dense matrix of doubles.
#[derive(Debug, Clone, PartialEq)]
pub struct DenseMatrix {
    nrows: usize,
    ncols: usize,
    data: Vec<f64>,
}

impl DenseMatrix {
    pub fn zeros(nrows: usize, ncols: usize) -> Self {
        Self {
            nrows,
            ncols,
            data: vec![0.0; nrows * ncols],
        }
    }

    pub fn from_row_major(
        nrows: usize,
        ncols: usize,
        data: Vec<f64>,
    ) -> Result<Self, ConvertError> {
        if data.len() != nrows * ncols {
            return Err(ConvertError::InvalidMatrix(format!(
                "{} values cannot fill a {nrows}x{ncols} matrix",
                data.len()
            )));
        }
        Ok(Self { nrows, ncols, data })
    }

    pub fn from_rows(rows: &[Vec<f64>]) -> Result<Self, ConvertError> {
        let ncols = rows.first().map(Vec::len).unwrap_or(0);
        let mut data = Vec::with_capacity(rows.len() * ncols);
        for (idx, row) in rows.iter().enumerate() {
            if row.len() != ncols {
                return Err(ConvertError::InvalidMatrix(format!(
                    "row {idx} has {} values, expected {ncols}",
                    row.len()
                )));
            }
            data.extend_from_slice(row);
        }
        Ok(Self {
            nrows: rows.len(),
            ncols,
            data,
        })
    }

    pub fn nrows(&self) -> usize {
        self.nrows
    }

    pub fn ncols(&self) -> usize {
        self.ncols
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.nrows, self.ncols)
    }

    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.data[row * self.ncols + col]
    }

    pub fn set(&mut self, row: usize, col: usize, value: f64) {
        self.data[row * self.ncols + col] = value;
    }

    pub fn row(&self, row: usize) -> &[f64] {
        &self.data[row * self.ncols..(row + 1) * self.ncols]
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    pub fn transpose(&self) -> DenseMatrix {
        let mut out = DenseMatrix::zeros(self.ncols, self.nrows);
        for row in 0..self.nrows {
            for col in 0..self.ncols {
                out.data[col * self.nrows + row] = self.data[row * self.ncols + col];
            }
        }
        out
    }

    /// Values in column-major order, the layout R uses for matrices.
    pub fn to_column_major(&self) -> Vec<f64> {
        let mut out = Vec::with_capacity(self.data.len());
        for col in 0..self.ncols {
            for row in 0..self.nrows {
                out.push(self.data[row * self.ncols + col]);
            }
        }
        out
    }
}

/// Expression values, cells as rows and genes as columns.
#[derive(Debug, Clone, PartialEq)]
pub enum ExpressionMatrix {
    Dense(DenseMatrix),
    /// Either storage order; `sprs` keeps (row, col) meaning for both.
    Sparse(CsMat<f64>),
}

impl ExpressionMatrix {
    pub fn shape(&self) -> (usize, usize) {
        match self {
            ExpressionMatrix::Dense(matrix) => matrix.shape(),
            ExpressionMatrix::Sparse(matrix) => matrix.shape(),
        }
    }

    pub fn is_sparse(&self) -> bool {
        matches!(self, ExpressionMatrix::Sparse(_))
    }

    pub fn nnz(&self) -> usize {
        match self {
            ExpressionMatrix::Dense(matrix) => {
                matrix.as_slice().iter().filter(|value| **value != 0.0).count()
            }
            ExpressionMatrix::Sparse(matrix) => matrix.nnz(),
        }
    }

    /// Dense genes x cells matrix.
    pub fn densify_transposed(&self) -> DenseMatrix {
        match self {
            ExpressionMatrix::Dense(matrix) => matrix.transpose(),
            ExpressionMatrix::Sparse(matrix) => {
                let (nrows, ncols) = matrix.shape();
                let mut dense = DenseMatrix::zeros(ncols, nrows);
                for (&value, (row, col)) in matrix.iter() {
                    dense.set(col, row, value);
                }
                dense
            }
        }
    }
}

impl From<DenseMatrix> for ExpressionMatrix {
    fn from(value: DenseMatrix) -> Self {
        ExpressionMatrix::Dense(value)
    }
}

impl From<CsMat<f64>> for ExpressionMatrix {
    fn from(value: CsMat<f64>) -> Self {
        ExpressionMatrix::Sparse(value)
    }
}

//! The immutable N×N distance matrix that seeds a search.

use std::sync::Arc;

use crate::error::{Error, Result};

/// Symmetry/diagonal slack when validating user-supplied matrices.
const ENTRY_TOL: f64 = 1e-9;

/// A symmetric matrix of pairwise distances between `dim` leaf objects,
/// optionally labelled.  Validated once at construction and immutable from
/// then on; every [`Tree`](crate::tree::Tree) in a search shares one matrix
/// behind an [`Arc`].
#[derive(Debug, Clone)]
pub struct DistanceMatrix {
    dim: usize,
    cells: Vec<f64>,
    labels: Option<Vec<String>>,
}

impl DistanceMatrix {
    /// Build a matrix from row-major data.  Fails with
    /// [`Error::InvalidMatrix`] when `dim < 4`, the rows aren't square, any
    /// entry is negative or non-finite, the matrix isn't symmetric, or the
    /// diagonal isn't zero.
    pub fn from_rows(rows: Vec<Vec<f64>>) -> Result<Self> {
        let dim = rows.len();
        if dim < 4 {
            return Err(Error::InvalidMatrix(format!(
                "need at least 4 objects, got {}",
                dim
            )));
        }
        for (i, row) in rows.iter().enumerate() {
            if row.len() != dim {
                return Err(Error::InvalidMatrix(format!(
                    "row {} has {} entries, expected {}",
                    i,
                    row.len(),
                    dim
                )));
            }
        }
        let mut cells = vec![0.0; dim * dim];
        for (i, row) in rows.iter().enumerate() {
            for (j, &value) in row.iter().enumerate() {
                if !value.is_finite() {
                    return Err(Error::InvalidMatrix(format!(
                        "entry ({}, {}) is not finite",
                        i, j
                    )));
                }
                if value < 0.0 {
                    return Err(Error::InvalidMatrix(format!(
                        "entry ({}, {}) is negative: {}",
                        i, j, value
                    )));
                }
                cells[i * dim + j] = value;
            }
        }
        for i in 0..dim {
            if cells[i * dim + i].abs() > ENTRY_TOL {
                return Err(Error::InvalidMatrix(format!(
                    "diagonal entry ({}, {}) is nonzero",
                    i, i
                )));
            }
            for j in (i + 1)..dim {
                if (cells[i * dim + j] - cells[j * dim + i]).abs() > ENTRY_TOL {
                    return Err(Error::InvalidMatrix(format!(
                        "asymmetric at ({}, {}): {} vs {}",
                        i,
                        j,
                        cells[i * dim + j],
                        cells[j * dim + i]
                    )));
                }
            }
        }
        Ok(Self {
            dim,
            cells,
            labels: None,
        })
    }

    /// As [`Self::from_rows`], attaching one label per object.
    pub fn with_labels(rows: Vec<Vec<f64>>, labels: Vec<String>) -> Result<Self> {
        let mut matrix = Self::from_rows(rows)?;
        if labels.len() != matrix.dim {
            return Err(Error::InvalidMatrix(format!(
                "{} labels for {} objects",
                labels.len(),
                matrix.dim
            )));
        }
        matrix.labels = Some(labels);
        Ok(matrix)
    }

    /// Convenience constructor used all over the tests: a unit matrix with
    /// every off-diagonal distance equal to 1.
    pub fn unit(dim: usize) -> Result<Arc<Self>> {
        let rows = (0..dim)
            .map(|i| (0..dim).map(|j| if i == j { 0.0 } else { 1.0 }).collect())
            .collect();
        Ok(Arc::new(Self::from_rows(rows)?))
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Distance between objects `i` and `j`.
    #[inline]
    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.cells[i * self.dim + j]
    }

    pub fn has_labels(&self) -> bool {
        self.labels.is_some()
    }

    pub fn label(&self, i: usize) -> Option<&str> {
        self.labels.as_ref().and_then(|ls| ls.get(i)).map(String::as_str)
    }
}

use crate::error::ConvertError;
use crate::matrix::ExpressionMatrix;
use crate::metadata::MetadataTable;

/// Read access to an annotated single-cell dataset: a cells x genes matrix,
/// the ordered cell and gene identifiers, and a per-cell metadata table.
pub trait AnnotatedData {
    fn matrix(&self) -> &ExpressionMatrix;
    fn cell_ids(&self) -> &[String];
    fn gene_ids(&self) -> &[String];
    fn metadata(&self) -> &MetadataTable;
}

#[derive(Debug, Clone)]
pub struct AnnotatedMatrix {
    matrix: ExpressionMatrix,
    cell_ids: Vec<String>,
    gene_ids: Vec<String>,
    metadata: MetadataTable,
}

impl AnnotatedMatrix {
    pub fn new(
        matrix: impl Into<ExpressionMatrix>,
        cell_ids: Vec<String>,
        gene_ids: Vec<String>,
        metadata: MetadataTable,
    ) -> Result<Self, ConvertError> {
        let data = Self {
            matrix: matrix.into(),
            cell_ids,
            gene_ids,
            metadata,
        };
        check_alignment(&data)?;
        Ok(data)
    }

    /// Dataset with an empty metadata table indexed by the cell ids.
    pub fn without_metadata(
        matrix: impl Into<ExpressionMatrix>,
        cell_ids: Vec<String>,
        gene_ids: Vec<String>,
    ) -> Result<Self, ConvertError> {
        let metadata = MetadataTable::new(cell_ids.clone());
        Self::new(matrix, cell_ids, gene_ids, metadata)
    }

    /// Replace the metadata table, re-checking alignment.
    pub fn with_metadata(self, metadata: MetadataTable) -> Result<Self, ConvertError> {
        Self::new(self.matrix, self.cell_ids, self.gene_ids, metadata)
    }

    pub fn n_cells(&self) -> usize {
        self.cell_ids.len()
    }

    pub fn n_genes(&self) -> usize {
        self.gene_ids.len()
    }
}

impl AnnotatedData for AnnotatedMatrix {
    fn matrix(&self) -> &ExpressionMatrix {
        &self.matrix
    }

    fn cell_ids(&self) -> &[String] {
        &self.cell_ids
    }

    fn gene_ids(&self) -> &[String] {
        &self.gene_ids
    }

    fn metadata(&self) -> &MetadataTable {
        &self.metadata
    }
}

/// Matrix rows must match the cells, matrix columns the genes, and the
/// metadata index must list the cells in the same order.
pub fn check_alignment<D: AnnotatedData + ?Sized>(data: &D) -> Result<(), ConvertError> {
    let (rows, cols) = data.matrix().shape();
    let cells = data.cell_ids().len();
    let genes = data.gene_ids().len();
    if rows != cells || cols != genes {
        return Err(ConvertError::ShapeMismatch {
            rows,
            cols,
            cells,
            genes,
        });
    }

    let metadata = data.metadata();
    if metadata.len() != cells {
        return Err(ConvertError::MetadataRowCount {
            expected: cells,
            found: metadata.len(),
        });
    }
    for column in metadata.columns() {
        if column.values.len() != cells {
            return Err(ConvertError::MetadataColumnLength {
                column: column.name.clone(),
                expected: cells,
                found: column.values.len(),
            });
        }
    }
    if let Some((position, (expected, found))) = data
        .cell_ids()
        .iter()
        .zip(metadata.index())
        .enumerate()
        .find(|(_, (cell, row))| cell != row)
    {
        return Err(ConvertError::MetadataMisaligned {
            position,
            expected: expected.clone(),
            found: found.clone(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::matrix::DenseMatrix;

    fn ids(prefix: &str, n: usize) -> Vec<String> {
        (0..n).map(|idx| format!("{prefix}{idx}")).collect()
    }

    #[test]
    fn accepts_aligned_data() {
        let matrix = DenseMatrix::zeros(3, 2);
        let data = AnnotatedMatrix::without_metadata(matrix, ids("c", 3), ids("g", 2)).unwrap();
        assert_eq!(data.n_cells(), 3);
        assert_eq!(data.n_genes(), 2);
    }

    #[test]
    fn rejects_swapped_orientation() {
        let matrix = DenseMatrix::zeros(2, 3);
        let err = AnnotatedMatrix::without_metadata(matrix, ids("c", 3), ids("g", 2)).unwrap_err();
        assert_matches!(
            err,
            ConvertError::ShapeMismatch {
                rows: 2,
                cols: 3,
                cells: 3,
                genes: 2
            }
        );
    }

    #[test]
    fn rejects_short_metadata() {
        let matrix = DenseMatrix::zeros(3, 2);
        let metadata = MetadataTable::new(ids("c", 2));
        let err = AnnotatedMatrix::new(matrix, ids("c", 3), ids("g", 2), metadata).unwrap_err();
        assert_matches!(err, ConvertError::MetadataRowCount { expected: 3, found: 2 });
    }

    #[test]
    fn rejects_misordered_metadata() {
        let matrix = DenseMatrix::zeros(2, 1);
        let metadata = MetadataTable::new(vec!["c1".to_string(), "c0".to_string()]);
        let err = AnnotatedMatrix::new(matrix, ids("c", 2), ids("g", 1), metadata).unwrap_err();
        assert_matches!(err, ConvertError::MetadataMisaligned { position: 0, .. });
    }
}

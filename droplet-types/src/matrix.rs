use anyhow::{bail, Error};
use sprs::CsMat;
use std::collections::HashSet;

/// Feature type assumed when a features file carries no type column.
pub const DEFAULT_FEATURE_TYPE: &str = "Gene Expression";

#[derive(Clone, Debug)]
pub struct GenericFeatureBarcodeMatrix<M> {
    pub name: String,
    pub barcodes: Vec<String>,
    pub feature_ids: Vec<String>,
    pub feature_names: Vec<String>,
    pub feature_types: Vec<String>,
    pub matrix: M,
}

/// UMI counts, features (rows) by barcodes (columns), compressed sparse column layout.
pub type CountMatrixType = CsMat<u32>;
pub type FeatureBarcodeMatrix = GenericFeatureBarcodeMatrix<CountMatrixType>;

fn check_unique(what: &str, labels: &[String]) -> Result<(), Error> {
    let mut seen = HashSet::with_capacity(labels.len());
    for label in labels {
        if !seen.insert(label.as_str()) {
            bail!("duplicate {what} label: {label}");
        }
    }
    Ok(())
}

impl FeatureBarcodeMatrix {
    /// Assemble a matrix from its labels and counts. Barcodes and feature ids must be unique
    /// and every label vector must match the matrix shape. CSR input is converted to CSC.
    pub fn new(
        name: String,
        barcodes: Vec<String>,
        feature_ids: Vec<String>,
        feature_names: Vec<String>,
        feature_types: Vec<String>,
        matrix: CountMatrixType,
    ) -> Result<FeatureBarcodeMatrix, Error> {
        let (rows, cols) = matrix.shape();
        if barcodes.len() != cols {
            bail!("{} barcodes for a matrix with {} columns", barcodes.len(), cols);
        }
        for (what, labels) in [
            ("feature ids", &feature_ids),
            ("feature names", &feature_names),
            ("feature types", &feature_types),
        ] {
            if labels.len() != rows {
                bail!("{} {} for a matrix with {} rows", labels.len(), what, rows);
            }
        }
        check_unique("barcode", &barcodes)?;
        check_unique("feature id", &feature_ids)?;

        let matrix = if matrix.is_csc() { matrix } else { matrix.to_csc() };
        Ok(GenericFeatureBarcodeMatrix {
            name,
            barcodes,
            feature_ids,
            feature_names,
            feature_types,
            matrix,
        })
    }

    pub fn num_features(&self) -> usize {
        self.matrix.rows()
    }

    pub fn num_barcodes(&self) -> usize {
        self.matrix.cols()
    }

    pub fn nnz(&self) -> usize {
        self.matrix.nnz()
    }

    /// Total UMI count of every barcode.
    pub fn barcode_totals(&self) -> Vec<u64> {
        column_sums(&self.matrix)
    }

    /// Total UMI count of every feature.
    pub fn feature_totals(&self) -> Vec<u64> {
        row_sums(&self.matrix)
    }

    /// Sub-matrix restricted to the given barcodes and features, labels included.
    /// Both index lists must be strictly increasing.
    pub fn select(&self, barcode_indices: &[usize], feature_indices: &[usize]) -> FeatureBarcodeMatrix {
        let pick = |labels: &[String], idx: &[usize]| idx.iter().map(|&i| labels[i].clone()).collect::<Vec<_>>();
        GenericFeatureBarcodeMatrix {
            name: self.name.clone(),
            barcodes: pick(&self.barcodes, barcode_indices),
            feature_ids: pick(&self.feature_ids, feature_indices),
            feature_names: pick(&self.feature_names, feature_indices),
            feature_types: pick(&self.feature_types, feature_indices),
            matrix: select_csc(&self.matrix, barcode_indices, feature_indices),
        }
    }
}

/// Column sums of a count matrix in either storage order.
pub fn column_sums(matrix: &CountMatrixType) -> Vec<u64> {
    let mut sums = vec![0u64; matrix.cols()];
    if matrix.is_csc() {
        for (col, vec) in matrix.outer_iterator().enumerate() {
            sums[col] = vec.data().iter().map(|&v| u64::from(v)).sum();
        }
    } else {
        for vec in matrix.outer_iterator() {
            for (col, &v) in vec.iter() {
                sums[col] += u64::from(v);
            }
        }
    }
    sums
}

/// Row sums of a count matrix in either storage order.
pub fn row_sums(matrix: &CountMatrixType) -> Vec<u64> {
    let mut sums = vec![0u64; matrix.rows()];
    if matrix.is_csr() {
        for (row, vec) in matrix.outer_iterator().enumerate() {
            sums[row] = vec.data().iter().map(|&v| u64::from(v)).sum();
        }
    } else {
        for vec in matrix.outer_iterator() {
            for (row, &v) in vec.iter() {
                sums[row] += u64::from(v);
            }
        }
    }
    sums
}

/// Copy the selected columns and rows of a CSC matrix into a new CSC matrix, without
/// densifying. `cols` and `rows` must be strictly increasing.
pub fn select_csc(matrix: &CountMatrixType, cols: &[usize], rows: &[usize]) -> CountMatrixType {
    assert!(matrix.is_csc(), "select_csc requires CSC storage");
    debug_assert!(cols.windows(2).all(|w| w[0] < w[1]));
    debug_assert!(rows.windows(2).all(|w| w[0] < w[1]));

    let mut row_map = vec![None; matrix.rows()];
    for (new_row, &row) in rows.iter().enumerate() {
        row_map[row] = Some(new_row);
    }

    let mut indptr = Vec::with_capacity(cols.len() + 1);
    let mut indices = Vec::new();
    let mut data = Vec::new();
    indptr.push(0);
    for &col in cols {
        if let Some(vec) = matrix.outer_view(col) {
            for (row, &v) in vec.iter() {
                if let Some(new_row) = row_map[row] {
                    indices.push(new_row);
                    data.push(v);
                }
            }
        }
        indptr.push(indices.len());
    }

    CsMat::new_csc((rows.len(), cols.len()), indptr, indices, data)
}

#[cfg(test)]
mod test {
    use super::*;
    use sprs::TriMat;

    fn labels(prefix: &str, n: usize) -> Vec<String> {
        (0..n).map(|i| format!("{prefix}{i}")).collect()
    }

    // 3 features x 4 barcodes
    //   [1 0 0 2]
    //   [0 0 0 3]
    //   [4 0 5 0]
    fn small_counts() -> CountMatrixType {
        let mut tri = TriMat::new((3, 4));
        tri.add_triplet(0, 0, 1u32);
        tri.add_triplet(2, 0, 4);
        tri.add_triplet(2, 2, 5);
        tri.add_triplet(0, 3, 2);
        tri.add_triplet(1, 3, 3);
        tri.to_csc()
    }

    fn small_matrix() -> FeatureBarcodeMatrix {
        FeatureBarcodeMatrix::new(
            "small".to_string(),
            labels("BC", 4),
            labels("ENSG", 3),
            labels("gene", 3),
            vec![DEFAULT_FEATURE_TYPE.to_string(); 3],
            small_counts(),
        )
        .unwrap()
    }

    #[test]
    fn test_totals() {
        let fbm = small_matrix();
        assert_eq!(fbm.barcode_totals(), vec![5, 0, 5, 5]);
        assert_eq!(fbm.feature_totals(), vec![3, 3, 9]);

        let csr: CountMatrixType = small_counts().to_csr();
        assert_eq!(column_sums(&csr), vec![5, 0, 5, 5]);
        assert_eq!(row_sums(&csr), vec![3, 3, 9]);
    }

    #[test]
    fn test_csr_is_converted() {
        let fbm = FeatureBarcodeMatrix::new(
            "small".to_string(),
            labels("BC", 4),
            labels("ENSG", 3),
            labels("gene", 3),
            vec![DEFAULT_FEATURE_TYPE.to_string(); 3],
            small_counts().to_csr(),
        )
        .unwrap();
        assert!(fbm.matrix.is_csc());
        assert_eq!(fbm.nnz(), 5);
    }

    #[test]
    fn test_label_checks() {
        let mut barcodes = labels("BC", 4);
        barcodes[3] = "BC0".to_string();
        let dup = FeatureBarcodeMatrix::new(
            "dup".to_string(),
            barcodes,
            labels("ENSG", 3),
            labels("gene", 3),
            vec![DEFAULT_FEATURE_TYPE.to_string(); 3],
            small_counts(),
        );
        assert!(dup.is_err());

        let short = FeatureBarcodeMatrix::new(
            "short".to_string(),
            labels("BC", 4),
            labels("ENSG", 2),
            labels("gene", 3),
            vec![DEFAULT_FEATURE_TYPE.to_string(); 3],
            small_counts(),
        );
        assert!(short.is_err());

        // feature names may repeat, ids may not
        let names = FeatureBarcodeMatrix::new(
            "names".to_string(),
            labels("BC", 4),
            labels("ENSG", 3),
            vec!["gene".to_string(); 3],
            vec![DEFAULT_FEATURE_TYPE.to_string(); 3],
            small_counts(),
        );
        assert!(names.is_ok());
    }

    #[test]
    fn test_select() {
        let fbm = small_matrix();
        let sub = fbm.select(&[0, 3], &[0, 2]);
        assert_eq!(sub.barcodes, vec!["BC0", "BC3"]);
        assert_eq!(sub.feature_ids, vec!["ENSG0", "ENSG2"]);
        assert_eq!(sub.matrix.shape(), (2, 2));
        assert_eq!(sub.matrix.get(0, 0), Some(&1));
        assert_eq!(sub.matrix.get(1, 0), Some(&4));
        assert_eq!(sub.matrix.get(0, 1), Some(&2));
        assert_eq!(sub.matrix.get(1, 1), None);
        assert_eq!(sub.barcode_totals(), vec![5, 2]);
    }
}

//! Keep the barcodes whose total UMI count clears a threshold.

use crate::knee::KneeInflection;
use anyhow::{bail, Error};
use droplet_types::matrix::{select_csc, CountMatrixType, FeatureBarcodeMatrix};
use log::info;
use std::fmt::Display;
use std::str::FromStr;

/// Which total-count threshold to filter at
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Threshold {
    /// conservative: the knee of the rank curve
    Knee,
    /// permissive: the inflection of the rank curve
    Inflection,
    /// explicit total-count threshold
    Custom(f64),
}

impl Threshold {
    /// Total-count value of this threshold for a given estimate
    pub fn resolve(&self, estimate: &KneeInflection) -> f64 {
        match *self {
            Threshold::Knee => estimate.knee,
            Threshold::Inflection => estimate.inflection,
            Threshold::Custom(value) => value,
        }
    }
}

impl FromStr for Threshold {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "knee" => Ok(Threshold::Knee),
            "inflection" => Ok(Threshold::Inflection),
            _ => match s.parse::<f64>() {
                Ok(value) if value.is_finite() => Ok(Threshold::Custom(value)),
                _ => bail!("Threshold not recognized: {}", s),
            },
        }
    }
}

impl Display for Threshold {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Threshold::Knee => f.write_str("knee"),
            Threshold::Inflection => f.write_str("inflection"),
            Threshold::Custom(value) => write!(f, "{value}"),
        }
    }
}

/// Filtered CSC matrix with the positions its columns and rows had in the input
#[derive(Clone, Debug)]
pub struct FilteredCsc {
    /// retained counts
    pub matrix: CountMatrixType,
    /// input column of every retained barcode
    pub barcode_indices: Vec<usize>,
    /// input row of every retained feature
    pub feature_indices: Vec<usize>,
}

fn kept_indices(
    matrix: &CountMatrixType,
    total_counts: &[u64],
    threshold: f64,
    drop_empty_features: bool,
) -> Result<(Vec<usize>, Vec<usize>), Error> {
    if !matrix.is_csc() {
        bail!("expected a CSC count matrix");
    }
    if total_counts.len() != matrix.cols() {
        bail!(
            "{} total counts for a matrix with {} barcodes",
            total_counts.len(),
            matrix.cols()
        );
    }
    if threshold.is_nan() {
        bail!("threshold is NaN");
    }

    let barcodes = total_counts
        .iter()
        .enumerate()
        .filter(|&(_, &total)| total as f64 > threshold)
        .map(|(i, _)| i)
        .collect::<Vec<_>>();

    let features: Vec<usize> = if drop_empty_features {
        let mut detected = vec![false; matrix.rows()];
        for &col in &barcodes {
            if let Some(vec) = matrix.outer_view(col) {
                for (row, &count) in vec.iter() {
                    if count > 0 {
                        detected[row] = true;
                    }
                }
            }
        }
        (0..matrix.rows()).filter(|&row| detected[row]).collect()
    } else {
        (0..matrix.rows()).collect()
    };

    info!(
        "kept {} of {} barcodes above {:.1} UMIs, {} of {} features",
        barcodes.len(),
        matrix.cols(),
        threshold,
        features.len(),
        matrix.rows()
    );
    Ok((barcodes, features))
}

/// Retain the columns of a CSC matrix whose total strictly exceeds `threshold`, optionally
/// dropping rows left without counts.
pub fn filter_csc(
    matrix: &CountMatrixType,
    total_counts: &[u64],
    threshold: f64,
    drop_empty_features: bool,
) -> Result<FilteredCsc, Error> {
    let (barcode_indices, feature_indices) = kept_indices(matrix, total_counts, threshold, drop_empty_features)?;
    Ok(FilteredCsc {
        matrix: select_csc(matrix, &barcode_indices, &feature_indices),
        barcode_indices,
        feature_indices,
    })
}

/// Retain the barcodes of `matrix` whose total strictly exceeds `threshold`. With
/// `drop_empty_features`, features without counts in the retained barcodes are dropped too.
/// The input is left untouched.
pub fn filter_matrix(
    matrix: &FeatureBarcodeMatrix,
    total_counts: &[u64],
    threshold: f64,
    drop_empty_features: bool,
) -> Result<FeatureBarcodeMatrix, Error> {
    let (barcodes, features) = kept_indices(&matrix.matrix, total_counts, threshold, drop_empty_features)?;
    Ok(matrix.select(&barcodes, &features))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::knee::Confidence;
    use droplet_types::matrix::DEFAULT_FEATURE_TYPE;
    use sprs::TriMat;

    // 4 features x 5 barcodes, totals [6, 0, 3, 10, 1], feature 2 only in barcode 4
    fn counts() -> CountMatrixType {
        let mut tri = TriMat::new((4, 5));
        tri.add_triplet(0, 0, 4u32);
        tri.add_triplet(1, 0, 2);
        tri.add_triplet(0, 2, 3);
        tri.add_triplet(0, 3, 5);
        tri.add_triplet(3, 3, 5);
        tri.add_triplet(2, 4, 1);
        tri.to_csc()
    }

    fn matrix() -> FeatureBarcodeMatrix {
        FeatureBarcodeMatrix::new(
            "test".to_string(),
            (0..5).map(|i| format!("BC{i}")).collect(),
            (0..4).map(|i| format!("F{i}")).collect(),
            (0..4).map(|i| format!("gene{i}")).collect(),
            vec![DEFAULT_FEATURE_TYPE.to_string(); 4],
            counts(),
        )
        .unwrap()
    }

    #[test]
    fn test_strict_threshold() {
        let fbm = matrix();
        let totals = fbm.barcode_totals();
        assert_eq!(totals, vec![6, 0, 3, 10, 1]);

        let filtered = filter_matrix(&fbm, &totals, 3.0, false).unwrap();
        assert_eq!(filtered.barcodes, vec!["BC0", "BC3"]);
        assert_eq!(filtered.num_features(), 4);
        assert!(filtered.barcode_totals().iter().all(|&t| t as f64 > 3.0));

        let all = filter_matrix(&fbm, &totals, -1.0, false).unwrap();
        assert_eq!(all.num_barcodes(), 5);
        let none = filter_matrix(&fbm, &totals, 10.0, true).unwrap();
        assert_eq!(none.matrix.shape(), (0, 0));
    }

    #[test]
    fn test_drop_empty_features() {
        let fbm = matrix();
        let totals = fbm.barcode_totals();
        let filtered = filter_matrix(&fbm, &totals, 2.0, true).unwrap();
        assert_eq!(filtered.barcodes, vec!["BC0", "BC2", "BC3"]);
        assert_eq!(filtered.feature_ids, vec!["F0", "F1", "F3"]);
        assert_eq!(filtered.feature_totals(), vec![12, 2, 5]);
        assert_eq!(filtered.barcode_totals(), vec![6, 3, 10]);

        let csc = filter_csc(&fbm.matrix, &totals, 2.0, true).unwrap();
        assert_eq!(csc.barcode_indices, vec![0, 2, 3]);
        assert_eq!(csc.feature_indices, vec![0, 1, 3]);
        assert_eq!(csc.matrix, filtered.matrix);
    }

    #[test]
    fn test_idempotent() {
        let fbm = matrix();
        let once = filter_matrix(&fbm, &fbm.barcode_totals(), 2.0, true).unwrap();
        let twice = filter_matrix(&once, &once.barcode_totals(), 2.0, true).unwrap();
        assert_eq!(once.barcodes, twice.barcodes);
        assert_eq!(once.feature_ids, twice.feature_ids);
        assert_eq!(once.matrix, twice.matrix);
    }

    #[test]
    fn test_bad_input() {
        let fbm = matrix();
        assert!(filter_matrix(&fbm, &[1, 2, 3], 0.0, true).is_err());
        assert!(filter_matrix(&fbm, &fbm.barcode_totals(), f64::NAN, true).is_err());
        assert!(filter_csc(&fbm.matrix.to_csr(), &fbm.barcode_totals(), 0.0, true).is_err());
    }

    #[test]
    fn test_threshold() {
        let est = KneeInflection {
            knee: 900.0,
            inflection: 120.0,
            confidence: Confidence::High,
        };
        assert_eq!("knee".parse::<Threshold>().unwrap().resolve(&est), 900.0);
        assert_eq!("inflection".parse::<Threshold>().unwrap().resolve(&est), 120.0);
        assert_eq!("250.5".parse::<Threshold>().unwrap(), Threshold::Custom(250.5));
        assert!("elbow".parse::<Threshold>().is_err());
        assert!("inf".parse::<Threshold>().is_err());
        assert_eq!(Threshold::Inflection.to_string(), "inflection");
    }
}

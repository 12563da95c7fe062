//! Random droplet count matrices with known cell and empty-droplet populations.

use droplet_types::matrix::{CountMatrixType, DEFAULT_FEATURE_TYPE};
use droplet_types::FeatureBarcodeMatrix;
use rand::prelude::Rng;
use rand::seq::SliceRandom;
use sprs::CsMat;
use std::ops::RangeInclusive;

/// A group of barcodes whose totals are drawn uniformly from `totals`
#[derive(Clone, Debug)]
pub struct DropletPopulation {
    /// number of barcodes
    pub num_barcodes: usize,
    /// inclusive range of total UMI counts
    pub totals: RangeInclusive<u64>,
}

impl DropletPopulation {
    /// Create a population. Panics on an empty `totals` range.
    pub fn new(num_barcodes: usize, totals: RangeInclusive<u64>) -> DropletPopulation {
        assert!(!totals.is_empty(), "empty total range {totals:?}");
        DropletPopulation { num_barcodes, totals }
    }
}

/// Draw the totals of every barcode in `populations`, in random order.
pub fn random_totals(rng: &mut impl Rng, populations: &[DropletPopulation]) -> Vec<u64> {
    let mut totals = populations
        .iter()
        .flat_map(|p| std::iter::repeat(p.totals.clone()).take(p.num_barcodes))
        .map(|range| rng.random_range(range))
        .collect::<Vec<_>>();
    totals.shuffle(rng);
    totals
}

/// Generate a `num_features x barcodes` CSC count matrix with the given column totals. Every
/// UMI of a barcode lands on a uniformly chosen feature.
pub fn random_counts_with_totals(rng: &mut impl Rng, num_features: usize, totals: &[u64]) -> CountMatrixType {
    assert!(num_features > 0 || totals.iter().all(|&t| t == 0));

    let mut indptr = Vec::with_capacity(totals.len() + 1);
    let mut indices = Vec::new();
    let mut data = Vec::new();
    let mut column = vec![0u32; num_features];

    indptr.push(0);
    for &total in totals {
        column.iter_mut().for_each(|c| *c = 0);
        for _ in 0..total {
            column[rng.random_range(0..num_features)] += 1;
        }
        for (row, &count) in column.iter().enumerate() {
            if count > 0 {
                indices.push(row);
                data.push(count);
            }
        }
        indptr.push(indices.len());
    }
    CsMat::new_csc((num_features, totals.len()), indptr, indices, data)
}

/// Generate a random CSC count matrix holding the barcodes of `populations`, in random order.
pub fn random_droplet_counts(
    rng: &mut impl Rng,
    num_features: usize,
    populations: &[DropletPopulation],
) -> CountMatrixType {
    let totals = random_totals(rng, populations);
    random_counts_with_totals(rng, num_features, &totals)
}

/// Like `random_droplet_counts`, with generated barcode and feature labels.
pub fn random_feature_barcode_matrix(
    rng: &mut impl Rng,
    num_features: usize,
    populations: &[DropletPopulation],
) -> FeatureBarcodeMatrix {
    let matrix = random_droplet_counts(rng, num_features, populations);
    FeatureBarcodeMatrix {
        name: "simulated".to_string(),
        barcodes: (0..matrix.cols()).map(|i| format!("BC{i:07}-1")).collect(),
        feature_ids: (0..num_features).map(|i| format!("FEAT{i:05}")).collect(),
        feature_names: (0..num_features).map(|i| format!("gene{i}")).collect(),
        feature_types: vec![DEFAULT_FEATURE_TYPE.to_string(); num_features],
        matrix,
    }
}

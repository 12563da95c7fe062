//! Rank barcodes, locate the knee and inflection, and keep the barcodes above a threshold.

use crate::filter::{filter_matrix, Threshold};
use crate::knee::{estimate_knee_inflection_with, Confidence, InsufficientDataError, KneeInflection, KneeParams};
use crate::rank_curve::{compute_rank_curve, rank_barcodes, RankCurve, DEFAULT_LOWER};
use crate::stats::{fraction_of_umis, median_total};
use anyhow::{bail, Error};
use droplet_types::FeatureBarcodeMatrix;
use log::info;

/// Parameters of the barcode rank analysis
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct BarcodeRankParams {
    /// Barcodes whose total is not above this are left off the rank curve
    pub lower: f64,
    /// Knee/inflection search
    pub knee: KneeParams,
}

impl Default for BarcodeRankParams {
    fn default() -> Self {
        BarcodeRankParams {
            lower: DEFAULT_LOWER,
            knee: KneeParams::default(),
        }
    }
}

impl BarcodeRankParams {
    /// Check the parameters for consistency
    pub fn validate(&self) -> Result<(), Error> {
        if !self.lower.is_finite() {
            bail!("lower must be finite, got {}", self.lower);
        }
        self.knee.validate()
    }
}

/// Per-barcode totals and ranks of a count matrix, with its rank curve and estimate
#[derive(Clone, Debug)]
pub struct BarcodeRanks {
    /// total UMI count of every barcode, in matrix order
    pub totals: Vec<u64>,
    /// minimum rank of every barcode, in matrix order
    pub ranks: Vec<usize>,
    /// rank curve above the floor
    pub curve: RankCurve,
    /// knee and inflection of the curve
    pub estimate: Result<KneeInflection, InsufficientDataError>,
}

impl BarcodeRanks {
    /// Rank the barcodes of `matrix`. Panics on invalid `params`.
    pub fn compute(matrix: &FeatureBarcodeMatrix, params: &BarcodeRankParams) -> BarcodeRanks {
        BarcodeRanks::from_totals(matrix.barcode_totals(), params)
    }

    /// Rank barcodes with the given totals. Panics on invalid `params`.
    pub fn from_totals(totals: Vec<u64>, params: &BarcodeRankParams) -> BarcodeRanks {
        let ranks = rank_barcodes(&totals);
        let curve = compute_rank_curve(&totals, params.lower);
        let estimate = estimate_knee_inflection_with(&curve, &params.knee);
        BarcodeRanks {
            totals,
            ranks,
            curve,
            estimate,
        }
    }
}

/// Outcome of cell calling
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CellCallSummary {
    /// barcodes in the input
    pub num_barcodes: usize,
    /// barcodes called as cells
    pub num_cells: usize,
    /// features in the input
    pub num_features: usize,
    /// features kept in the filtered matrix
    pub num_features_kept: usize,
    /// threshold the cells were called at
    pub threshold: Threshold,
    /// total-count value of the threshold
    pub threshold_umis: f64,
    /// knee of the rank curve, if it could be estimated
    pub knee: Option<f64>,
    /// inflection of the rank curve, if it could be estimated
    pub inflection: Option<f64>,
    /// confidence of the estimate
    pub confidence: Option<Confidence>,
    /// median total UMI count of the called cells
    pub median_umis_per_cell: f64,
    /// fraction of all UMIs found in called cells
    pub fraction_umis_in_cells: f64,
}

/// Filtered matrix with the ranking and summary that produced it
#[derive(Clone, Debug)]
pub struct CellCalls {
    /// cell barcodes only
    pub matrix: FeatureBarcodeMatrix,
    /// ranking of the input barcodes
    pub ranks: BarcodeRanks,
    /// summary numbers
    pub summary: CellCallSummary,
}

/// Call cells in `matrix`: every barcode whose total exceeds `threshold`. A `Custom`
/// threshold is applied even when the rank curve is too short for an estimate, the knee
/// and inflection thresholds fail with the `InsufficientDataError`.
pub fn call_cells(
    matrix: &FeatureBarcodeMatrix,
    params: &BarcodeRankParams,
    threshold: Threshold,
    drop_empty_features: bool,
) -> Result<CellCalls, Error> {
    params.validate()?;
    let ranks = BarcodeRanks::compute(matrix, params);

    let threshold_umis = match (threshold, &ranks.estimate) {
        (Threshold::Custom(value), _) => value,
        (_, Ok(estimate)) => threshold.resolve(estimate),
        (_, Err(e)) => return Err(e.clone().into()),
    };
    let filtered = filter_matrix(matrix, &ranks.totals, threshold_umis, drop_empty_features)?;

    let cell_totals = filtered.barcode_totals();
    let estimate = ranks.estimate.as_ref().ok();
    let summary = CellCallSummary {
        num_barcodes: matrix.num_barcodes(),
        num_cells: filtered.num_barcodes(),
        num_features: matrix.num_features(),
        num_features_kept: filtered.num_features(),
        threshold,
        threshold_umis,
        knee: estimate.map(|e| e.knee),
        inflection: estimate.map(|e| e.inflection),
        confidence: estimate.map(|e| e.confidence),
        median_umis_per_cell: median_total(&cell_totals).unwrap_or(0.0),
        fraction_umis_in_cells: fraction_of_umis(&cell_totals, &ranks.totals),
    };
    info!(
        "{}: called {} cells of {} barcodes at {} ({:.1} UMIs)",
        matrix.name, summary.num_cells, summary.num_barcodes, threshold, threshold_umis
    );

    Ok(CellCalls {
        matrix: filtered,
        ranks,
        summary,
    })
}

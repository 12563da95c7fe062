//! # droplet-rs: separating cells from empty droplets by their barcode rank curve
//!
//! Parameter structs may come from serde and are checked with their `validate` methods.
//! `call_cells` validates its parameters and returns the error; the lower-level
//! estimators panic on parameters that fail validation.

#![deny(missing_docs)]

/// Barcode rank curve
pub mod rank_curve;

/// Local polynomial smoothing
pub mod smooth;

/// Knee and inflection of the rank curve
pub mod knee;

/// Total-count filtering of barcodes
pub mod filter;

/// Rank, estimate and filter in one call
pub mod cell_calling;

/// MTX loading and writing routines
pub mod mtx;

/// Random droplet matrices
pub mod sim;

/// Statistics functions
pub mod stats;

pub use cell_calling::{call_cells, BarcodeRankParams, BarcodeRanks, CellCallSummary, CellCalls};
pub use filter::{filter_csc, filter_matrix, Threshold};
pub use knee::{
    estimate_knee_inflection, estimate_knee_inflection_with, Confidence, InsufficientDataError, KneeInflection,
    KneeParams,
};
pub use rank_curve::{compute_rank_curve, rank_barcodes, RankCurve, RankEntry};

#[cfg(test)]
mod test;

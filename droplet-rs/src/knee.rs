//! Knee and inflection points of the barcode rank curve.
//!
//! The curve is a step function of log10(total) against log10(rank). It is resampled on a
//! uniform log10(rank) grid, so the few top barcodes and the dense tail of empty droplets
//! carry comparable weight, and smoothed with a local quadratic fit. The plateaus left by
//! duplicate totals vanish in the fit, and its first and second derivatives drive the
//! selection of both points:
//! - the inflection is the steepest point of the smoothed curve,
//! - the knee is the point of maximum curvature above the inflection.

use crate::rank_curve::{RankCurve, RankEntry};
use crate::smooth::{LocalFit, LocalQuadratic};
use anyhow::{bail, Error};
use log::{debug, info, warn};
use ndarray::Array1;
use noisy_float::prelude::n64;
use std::fmt::Display;

// fewest grid points in the knee search window
const MIN_KNEE_POINTS: usize = 5;

/// Parameters of the knee/inflection search
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct KneeParams {
    /// Barcodes ranked above this are excluded from the knee search
    pub exclude_from: usize,
    /// Fewest distinct totals above the floor needed for an estimate
    pub min_distinct: usize,
    /// Smoothing half-window, in decades of rank
    pub bandwidth: f64,
    /// Spacing of the log10(rank) resampling grid
    pub grid_step: f64,
    /// Restrict the inflection to smoothed totals within `[lo, hi]`
    pub fit_bounds: Option<(f64, f64)>,
}

impl Default for KneeParams {
    fn default() -> Self {
        KneeParams {
            exclude_from: 50,
            min_distinct: 3,
            bandwidth: 0.1,
            grid_step: 0.01,
            fit_bounds: None,
        }
    }
}

impl KneeParams {
    /// Check the parameters for consistency
    pub fn validate(&self) -> Result<(), Error> {
        if !(self.grid_step.is_finite() && self.grid_step > 0.0) {
            bail!("grid_step must be positive, got {}", self.grid_step);
        }
        if !(self.bandwidth.is_finite() && self.bandwidth >= 3.0 * self.grid_step) {
            bail!(
                "bandwidth {} must cover at least three grid steps of {}",
                self.bandwidth,
                self.grid_step
            );
        }
        if self.min_distinct < 2 {
            bail!("min_distinct must be at least 2, got {}", self.min_distinct);
        }
        if let Some((lo, hi)) = self.fit_bounds {
            if !(lo.is_finite() && hi.is_finite() && lo < hi) {
                bail!("invalid fit bounds [{lo}, {hi}]");
            }
        }
        Ok(())
    }
}

/// How much to trust a knee/inflection estimate
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Confidence {
    /// both points came from the smoothed curve
    High,
    /// degenerate curve, at least one point is a fallback
    Low,
}

/// Total-count thresholds at the knee and the inflection of a rank curve
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct KneeInflection {
    /// conservative threshold, at maximum curvature
    pub knee: f64,
    /// permissive threshold, at the steepest drop
    pub inflection: f64,
    /// whether the estimate is trustworthy
    pub confidence: Confidence,
}

/// Too few distinct totals above the floor to fit the rank curve
#[derive(Clone, Debug, PartialEq)]
pub struct InsufficientDataError {
    /// distinct totals available, counted within `fit_bounds` when those are set
    pub distinct_totals: usize,
    /// distinct totals required
    pub required: usize,
    /// total-count bounds of the inflection search
    pub fit_bounds: Option<(f64, f64)>,
}

impl std::error::Error for InsufficientDataError {}

impl Display for InsufficientDataError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "insufficient data for knee/inflection estimation: {} distinct totals",
            self.distinct_totals
        )?;
        if let Some((lo, hi)) = self.fit_bounds {
            write!(f, " within [{lo}, {hi}]")?;
        }
        write!(f, ", need {}", self.required)
    }
}

/// Estimate the knee and inflection of `curve` with default parameters.
pub fn estimate_knee_inflection(curve: &RankCurve) -> Result<KneeInflection, InsufficientDataError> {
    estimate_knee_inflection_with(curve, &KneeParams::default())
}

/// Estimate the knee and inflection of `curve`.
///
/// # Panics
///
/// If `params` fails `KneeParams::validate`. Parameters read from a file should be
/// validated before they get here, as `call_cells` does.
pub fn estimate_knee_inflection_with(
    curve: &RankCurve,
    params: &KneeParams,
) -> Result<KneeInflection, InsufficientDataError> {
    if let Err(e) = params.validate() {
        panic!("invalid knee parameters: {e}");
    }

    // zero totals have no place on a log scale
    let positive = curve.entries().iter().filter(|e| e.total > 0).collect::<Vec<&RankEntry>>();
    let insufficient = |distinct_totals, fit_bounds| InsufficientDataError {
        distinct_totals,
        required: params.min_distinct,
        fit_bounds,
    };

    match positive.len() {
        0 => return Err(insufficient(0, None)),
        1 => {
            let total = positive[0].total as f64;
            warn!("all {} barcodes above the floor have {} UMIs", positive[0].num_barcodes, total);
            return Ok(KneeInflection {
                knee: total,
                inflection: total,
                confidence: Confidence::Low,
            });
        }
        n if n < params.min_distinct => return Err(insufficient(n, None)),
        _ => (),
    }
    if let Some((lo, hi)) = params.fit_bounds {
        let within = positive
            .iter()
            .filter(|e| (lo..=hi).contains(&(e.total as f64)))
            .count();
        if within < params.min_distinct {
            return Err(insufficient(within, params.fit_bounds));
        }
    }

    let max_total = positive[0].total as f64;
    let min_total = positive[positive.len() - 1].total as f64;
    let last_rank = positive[positive.len() - 1].last_rank();

    // step curve resampled on a uniform log10(rank) grid, closed at the last rank
    let log_last = (last_rank as f64).log10();
    let num_grid = (log_last / params.grid_step - 1e-9).ceil().max(0.0) as usize + 1;
    let x = Array1::from_shape_fn(num_grid, |g| (g as f64 * params.grid_step).min(log_last));
    let y = Array1::from_shape_fn(num_grid, |g| {
        let rank = if g + 1 == num_grid {
            last_rank
        } else {
            ((10f64.powf(x[g]) + 1e-9).floor() as usize).clamp(1, last_rank)
        };
        curve.total_at_rank(rank).map_or(0.0, |t| (t as f64).log10())
    });
    debug!("rank curve resampled at {num_grid} points up to rank {last_rank}");

    let fits = LocalQuadratic::new(params.bandwidth).fit(x.view(), y.view());
    let finite = |g: usize| fits[g].filter(|f| f.value.is_finite() && f.slope.is_finite() && f.second.is_finite());

    let in_bounds = |fit: &LocalFit| {
        params.fit_bounds.map_or(true, |(lo, hi)| {
            let t = 10f64.powf(fit.value);
            lo <= t && t <= hi
        })
    };
    let Some((g_infl, steepest)) = (0..num_grid)
        .filter_map(|g| finite(g).filter(in_bounds).map(|f| (g, f)))
        .min_by_key(|(_, f)| n64(f.slope))
    else {
        // no point of the smoothed curve lies within the bounds
        return Err(match params.fit_bounds {
            Some(bounds) => insufficient(0, Some(bounds)),
            None => insufficient(positive.len(), None),
        });
    };
    let inflection = 10f64.powf(steepest.value).clamp(min_total, max_total);

    // knee search window: below the top barcodes, and clear of the drop at the inflection
    let start = (params.exclude_from.max(1) as f64).log10();
    let stop = x[g_infl] - params.bandwidth;
    let window = (0..num_grid)
        .filter(|&g| x[g] >= start && x[g] <= stop)
        .filter_map(|g| finite(g).map(|f| (g, f)))
        .collect::<Vec<_>>();

    let bend = if window.len() < MIN_KNEE_POINTS {
        warn!(
            "only {} points above the inflection for the knee search, falling back",
            window.len()
        );
        None
    } else {
        window
            .iter()
            .map(|&(g, f)| (g, f, f.second / (1.0 + f.slope * f.slope).powf(1.5)))
            .min_by_key(|&(_, _, curvature)| n64(curvature))
            .filter(|&(_, _, curvature)| {
                if curvature < 0.0 {
                    true
                } else {
                    warn!("rank curve has no concave bend above the inflection, falling back");
                    false
                }
            })
    };

    let (knee, confidence) = match bend {
        Some((g, fit, curvature)) => {
            debug!("maximum curvature {curvature:.3} at rank {:.0}", 10f64.powf(x[g]));
            (10f64.powf(fit.value), Confidence::High)
        }
        None => {
            // total at the top of the steepest drop
            let g = (0..num_grid).take_while(|&g| x[g] <= stop).last().unwrap_or(0);
            (10f64.powf(y[g]), Confidence::Low)
        }
    };
    // the smoothed curve may wobble near the drop
    let knee = knee.max(inflection).min(max_total);

    info!(
        "knee at {:.1} UMIs, inflection at {:.1} UMIs ({:?} confidence)",
        knee, inflection, confidence
    );
    Ok(KneeInflection {
        knee,
        inflection,
        confidence,
    })
}

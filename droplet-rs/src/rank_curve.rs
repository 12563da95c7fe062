//! Barcode rank curve: distinct total UMI counts in descending order, each with the
//! minimum rank of the barcodes that hold it.

use itertools::Itertools;
use log::debug;

/// Default floor for the curve. Barcodes whose total is not above it are left out of the fit.
pub const DEFAULT_LOWER: f64 = 1.0;

/// One step of the rank curve.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RankEntry {
    /// 1-based rank, shared by every barcode with this total
    pub rank: usize,
    /// total UMI count
    pub total: u64,
    /// number of barcodes with this total
    pub num_barcodes: usize,
}

impl RankEntry {
    /// Rank of the last barcode holding this total
    pub fn last_rank(&self) -> usize {
        self.rank + self.num_barcodes - 1
    }
}

/// Rank curve built by `compute_rank_curve`
#[derive(Clone, Debug, PartialEq)]
pub struct RankCurve {
    entries: Vec<RankEntry>,
    lower: f64,
    num_barcodes: usize,
}

impl RankCurve {
    /// Curve steps, sorted by descending total
    pub fn entries(&self) -> &[RankEntry] {
        &self.entries
    }

    /// `(rank, total)` pairs, sorted by descending total
    pub fn pairs(&self) -> impl Iterator<Item = (usize, u64)> + '_ {
        self.entries.iter().map(|e| (e.rank, e.total))
    }

    /// Number of steps in the curve
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no barcode lies above the floor
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of distinct totals on the curve
    pub fn num_distinct(&self) -> usize {
        self.entries.len()
    }

    /// Floor the curve was built with
    pub fn lower(&self) -> f64 {
        self.lower
    }

    /// Number of barcodes in the input, including excluded ones
    pub fn num_barcodes(&self) -> usize {
        self.num_barcodes
    }

    /// Number of barcodes left out by the floor
    pub fn num_excluded(&self) -> usize {
        self.num_barcodes - self.entries.iter().map(|e| e.num_barcodes).sum::<usize>()
    }

    /// Highest rank present on the curve, 0 for an empty curve
    pub fn last_rank(&self) -> usize {
        self.entries.last().map_or(0, RankEntry::last_rank)
    }

    /// Total held by the barcode at `rank`, treating the curve as a step function.
    pub fn total_at_rank(&self, rank: usize) -> Option<u64> {
        if rank == 0 || rank > self.last_rank() {
            return None;
        }
        let idx = self.entries.partition_point(|e| e.rank <= rank);
        Some(self.entries[idx - 1].total)
    }
}

/// Build the rank curve of `total_counts`. Ranks are assigned over all barcodes, then
/// barcodes whose total is not strictly above `lower` are dropped. A negative `lower`
/// keeps empty barcodes.
pub fn compute_rank_curve(total_counts: &[u64], lower: f64) -> RankCurve {
    let mut totals = total_counts.to_vec();
    totals.sort_unstable_by(|a, b| b.cmp(a));

    let mut entries = Vec::new();
    let mut rank = 1;
    for (num_barcodes, total) in totals.into_iter().dedup_with_count() {
        // descending order: everything after this is below the floor as well
        if total as f64 <= lower {
            break;
        }
        entries.push(RankEntry {
            rank,
            total,
            num_barcodes,
        });
        rank += num_barcodes;
    }

    let curve = RankCurve {
        entries,
        lower,
        num_barcodes: total_counts.len(),
    };
    debug!(
        "rank curve: {} barcodes, {} distinct totals above {}, {} excluded",
        curve.num_barcodes(),
        curve.num_distinct(),
        lower,
        curve.num_excluded()
    );
    curve
}

/// Minimum ("sports") rank of every barcode, in input order.
pub fn rank_barcodes(total_counts: &[u64]) -> Vec<usize> {
    let mut order = (0..total_counts.len()).collect::<Vec<_>>();
    order.sort_by(|&a, &b| total_counts[b].cmp(&total_counts[a]));

    let mut ranks = vec![0; total_counts.len()];
    for (pos, &idx) in order.iter().enumerate() {
        ranks[idx] = if pos > 0 && total_counts[order[pos - 1]] == total_counts[idx] {
            ranks[order[pos - 1]]
        } else {
            pos + 1
        };
    }
    ranks
}

//! Summary statistics of called cells

use ndarray::prelude::*;
use ndarray::DataMut;
use ndarray_stats::errors::QuantileError;
use noisy_float::prelude::{n64, N64};
use num_traits::FromPrimitive;
use std::ops::{Add, Div};

/// Return the median, averaging the two middle values for an even length. Sorts its argument
/// in place.
// ndarray-stats' quantile_mut can overflow the stack on large inputs
// (https://github.com/rust-ndarray/ndarray-stats/issues/86)
pub fn median_mut<S, T>(xs: &mut ArrayBase<S, Ix1>) -> Result<T, QuantileError>
where
    S: DataMut<Elem = T>,
    T: Copy + Ord + FromPrimitive + Add<Output = T> + Div<Output = T>,
{
    if xs.is_empty() {
        return Err(QuantileError::EmptyInput);
    }
    match xs.as_slice_mut() {
        Some(values) => values.sort_unstable(),
        None => panic!("median of non-contiguous data"),
    }
    let mid = xs.len() / 2;
    if xs.len() % 2 == 0 {
        let two = T::from_u8(2).ok_or(QuantileError::InvalidQuantile(n64(0.5)))?;
        Ok((xs[mid - 1] + xs[mid]) / two)
    } else {
        Ok(xs[mid])
    }
}

/// Median of a set of UMI totals.
pub fn median_total(totals: &[u64]) -> Result<f64, QuantileError> {
    let mut values = totals.iter().map(|&t| n64(t as f64)).collect::<Array1<N64>>();
    median_mut(&mut values).map(N64::raw)
}

/// Fraction of all UMIs held by `kept`, 0 when there are none.
pub fn fraction_of_umis(kept: &[u64], all: &[u64]) -> f64 {
    let total = all.iter().sum::<u64>();
    if total == 0 {
        0.0
    } else {
        kept.iter().sum::<u64>() as f64 / total as f64
    }
}

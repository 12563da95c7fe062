//! Local quadratic regression with a tricube kernel. The fitted polynomial at each point
//! gives the smoothed value together with its first and second derivatives.

use ndarray::{Array1, Array2, ArrayView1};

/// Smoothed value and derivatives at one abscissa
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LocalFit {
    /// fitted value
    pub value: f64,
    /// first derivative
    pub slope: f64,
    /// second derivative
    pub second: f64,
}

/// Local quadratic smoother with a fixed half-window `bandwidth`, in units of x.
#[derive(Clone, Copy, Debug)]
pub struct LocalQuadratic {
    bandwidth: f64,
}

// fewest positively weighted points for a stable quadratic fit
const MIN_SUPPORT: usize = 4;

fn tricube(u: f64) -> f64 {
    let d = u.abs();
    if d >= 1.0 {
        0.0
    } else {
        (1.0 - d * d * d).powi(3)
    }
}

impl LocalQuadratic {
    /// Create a smoother. Panics if `bandwidth` is not a positive finite number.
    pub fn new(bandwidth: f64) -> LocalQuadratic {
        assert!(
            bandwidth.is_finite() && bandwidth > 0.0,
            "bandwidth must be positive, got {bandwidth}"
        );
        LocalQuadratic { bandwidth }
    }

    /// Half-window of the smoother
    pub fn bandwidth(&self) -> f64 {
        self.bandwidth
    }

    /// Fit every point of `(x, y)`. `x` must be sorted ascending. Points whose window has too
    /// little support, or whose local system is singular, are `None`.
    pub fn fit(&self, x: ArrayView1<f64>, y: ArrayView1<f64>) -> Vec<Option<LocalFit>> {
        assert_eq!(x.len(), y.len());
        debug_assert!(x.windows(2).into_iter().all(|w| w[0] <= w[1]));

        let n = x.len();
        let mut fits = Vec::with_capacity(n);
        let (mut lo, mut hi) = (0, 0);
        for i in 0..n {
            while x[i] - x[lo] >= self.bandwidth {
                lo += 1;
            }
            while hi < n && x[hi] - x[i] < self.bandwidth {
                hi += 1;
            }
            fits.push(self.fit_window(x, y, i, lo, hi));
        }
        fits
    }

    fn fit_window(&self, x: ArrayView1<f64>, y: ArrayView1<f64>, center: usize, lo: usize, hi: usize) -> Option<LocalFit> {
        let h = self.bandwidth;
        let x0 = x[center];

        // weighted normal equations in the scaled offset u = (x - x0) / h
        let mut xtwx = Array2::<f64>::zeros((3, 3));
        let mut xtwy = Array1::<f64>::zeros(3);
        let mut support = 0;
        for j in lo..hi {
            let u = (x[j] - x0) / h;
            let w = tricube(u);
            if w <= 0.0 {
                continue;
            }
            support += 1;
            let basis = [1.0, u, u * u];
            for r in 0..3 {
                xtwy[r] += w * basis[r] * y[j];
                for c in 0..3 {
                    xtwx[[r, c]] += w * basis[r] * basis[c];
                }
            }
        }
        if support < MIN_SUPPORT {
            return None;
        }

        let coef = solve(xtwx, xtwy)?;
        Some(LocalFit {
            value: coef[0],
            slope: coef[1] / h,
            second: 2.0 * coef[2] / (h * h),
        })
    }
}

/// Solve `a * x = b` by Gaussian elimination with partial pivoting. Returns `None` for a
/// (numerically) singular system.
pub fn solve(mut a: Array2<f64>, mut b: Array1<f64>) -> Option<Array1<f64>> {
    let n = b.len();
    assert_eq!(a.dim(), (n, n));

    let scale = a.iter().fold(0.0_f64, |m, v| m.max(v.abs()));
    if scale == 0.0 {
        return None;
    }
    let eps = scale * 1e-12;

    for k in 0..n {
        let pivot = (k..n).max_by(|&i, &j| a[[i, k]].abs().total_cmp(&a[[j, k]].abs()))?;
        if a[[pivot, k]].abs() < eps {
            return None;
        }
        if pivot != k {
            for c in 0..n {
                a.swap([k, c], [pivot, c]);
            }
            b.swap(k, pivot);
        }
        for i in k + 1..n {
            let f = a[[i, k]] / a[[k, k]];
            for c in k..n {
                a[[i, c]] -= f * a[[k, c]];
            }
            b[i] -= f * b[k];
        }
    }

    let mut x = Array1::<f64>::zeros(n);
    for i in (0..n).rev() {
        let tail: f64 = (i + 1..n).map(|c| a[[i, c]] * x[c]).sum();
        x[i] = (b[i] - tail) / a[[i, i]];
    }
    Some(x)
}

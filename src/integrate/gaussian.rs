// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Three-dimensional Gaussian profile fit.
//!
//! Models a peak as `I(x) = A exp(-(x-c)^T D (x-c) / 2) + B` with `D`
//! parameterised by its six upper-triangular entries, fitted by
//! Levenberg-Marquardt from a method-of-moments initial guess over the same
//! region of interest.

use nalgebra::{DVector, Matrix3, Vector3};

use crate::refine::{minimize, MinimizerOptions, RefineError};

#[derive(Clone, Debug)]
pub struct GaussianFit {
    pub amplitude: f64,
    pub background: f64,
    pub centre: Vector3<f64>,
    pub shape: Matrix3<f64>,
    pub chi2_per_point: f64,
    /// Positive amplitude, positive-definite shape and an acceptable
    /// chi-square.
    pub success: bool,
}

fn pack_shape(d: &Matrix3<f64>) -> [f64; 6] {
    [
        d[(0, 0)],
        d[(0, 1)],
        d[(0, 2)],
        d[(1, 1)],
        d[(1, 2)],
        d[(2, 2)],
    ]
}

fn unpack_shape(p: &[f64]) -> Matrix3<f64> {
    Matrix3::new(
        p[0], p[1], p[2], p[1], p[3], p[4], p[2], p[4], p[5],
    )
}

fn model(x: &DVector<f64>, p: Vector3<f64>) -> f64 {
    let a = x[0];
    let b = x[1];
    let c = Vector3::new(x[2], x[3], x[4]);
    let d = unpack_shape(&[x[5], x[6], x[7], x[8], x[9], x[10]]);
    let dp = p - c;
    a * (-0.5 * dp.dot(&(d * dp))).exp() + b
}

/// Method-of-moments seed over the region of interest.
fn moments_seed(points: &[(Vector3<f64>, f64)]) -> DVector<f64> {
    let vmin = points.iter().map(|(_, v)| *v).fold(f64::INFINITY, f64::min);
    let vmax = points
        .iter()
        .map(|(_, v)| *v)
        .fold(f64::NEG_INFINITY, f64::max);

    let mut m0 = 0.0;
    let mut m1 = Vector3::zeros();
    let mut m2 = Matrix3::zeros();
    for (p, v) in points {
        let w = (v - vmin).max(0.0);
        m0 += w;
        m1 += w * p;
        m2 += w * p * p.transpose();
    }
    let centre = if m0 > 0.0 { m1 / m0 } else { Vector3::zeros() };
    let cov = if m0 > 0.0 {
        m2 / m0 - centre * centre.transpose()
    } else {
        Matrix3::identity()
    };
    let d = cov.try_inverse().unwrap_or_else(Matrix3::identity);

    let mut x = DVector::zeros(11);
    x[0] = (vmax - vmin).max(1.0);
    x[1] = vmin;
    x[2] = centre.x;
    x[3] = centre.y;
    x[4] = centre.z;
    let packed = pack_shape(&d);
    for (i, value) in packed.iter().enumerate() {
        x[5 + i] = *value;
    }
    x
}

/// Fit a Gaussian plus constant background to weighted points
/// `(position, counts)`.
pub fn fit_gaussian(
    points: &[(Vector3<f64>, f64)],
    max_iter: usize,
    chi2_threshold: f64,
) -> Result<GaussianFit, RefineError> {
    if points.len() < 12 {
        return Err(RefineError::NoPeaks);
    }
    let mut x = moments_seed(points);
    let mut f = |x: &DVector<f64>| {
        let mut r = DVector::zeros(points.len());
        for (i, (p, v)) in points.iter().enumerate() {
            r[i] = model(x, *p) - v;
        }
        Some(r)
    };
    let options = MinimizerOptions {
        max_iter,
        ..MinimizerOptions::default()
    };
    let report = minimize(&mut x, &mut f, None, &options)?;

    let amplitude = x[0];
    let background = x[1];
    let centre = Vector3::new(x[2], x[3], x[4]);
    let shape = unpack_shape(&[x[5], x[6], x[7], x[8], x[9], x[10]]);
    let chi2_per_point = report
        .cost_trace
        .last()
        .map(|c| c / points.len() as f64)
        .unwrap_or(f64::NAN);

    let spd = nalgebra::Cholesky::new(shape).is_some();
    Ok(GaussianFit {
        amplitude,
        background,
        centre,
        shape,
        chi2_per_point,
        success: report.converged && spd && amplitude > 0.0 && chi2_per_point < chi2_threshold,
    })
}

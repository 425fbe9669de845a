// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Levenberg-Marquardt least squares.
//!
//! The routine takes the residual function and optionally its Jacobian; a
//! forward-difference Jacobian is used when none is supplied. Termination
//! follows the usual trio of relative tolerances on the parameters, the
//! gradient and the residual norm, plus an iteration cap. After a
//! successful fit the variance-covariance matrix of the parameters is
//! available from the inverse of `J^T J`.

use nalgebra::{DMatrix, DVector};

use super::RefineError;

pub type ResidualFn<'a> = dyn FnMut(&DVector<f64>) -> Option<DVector<f64>> + 'a;
pub type JacobianFn<'a> = dyn FnMut(&DVector<f64>) -> Option<DMatrix<f64>> + 'a;

#[derive(Clone, Debug)]
pub struct MinimizerOptions {
    pub xtol: f64,
    pub gtol: f64,
    pub ftol: f64,
    pub max_iter: usize,
}

impl Default for MinimizerOptions {
    fn default() -> MinimizerOptions {
        MinimizerOptions {
            xtol: 1e-10,
            gtol: 1e-10,
            ftol: 1e-10,
            max_iter: 100,
        }
    }
}

#[derive(Clone, Debug)]
pub struct FitReport {
    pub converged: bool,
    pub iterations: usize,
    /// Sum of squared residuals after every accepted step.
    pub cost_trace: Vec<f64>,
    /// `(J^T J)^-1` at the solution, when invertible.
    pub covariance: Option<DMatrix<f64>>,
}

impl FitReport {
    pub fn mean_squared_error(&self, n_values: usize) -> f64 {
        match self.cost_trace.last() {
            Some(&cost) if n_values > 0 => cost / n_values as f64,
            _ => f64::NAN,
        }
    }
}

fn numerical_jacobian(
    x: &DVector<f64>,
    r0: &DVector<f64>,
    f: &mut ResidualFn,
) -> Option<DMatrix<f64>> {
    let n = x.len();
    let m = r0.len();
    let mut jac = DMatrix::<f64>::zeros(m, n);
    for j in 0..n {
        let h = 1e-7 * x[j].abs().max(1.0);
        let mut xh = x.clone();
        xh[j] += h;
        let rh = f(&xh)?;
        if rh.len() != m {
            return None;
        }
        for i in 0..m {
            jac[(i, j)] = (rh[i] - r0[i]) / h;
        }
    }
    Some(jac)
}

/// Minimise `|f(x)|^2` starting from `x`, updating it in place.
pub fn minimize(
    x: &mut DVector<f64>,
    f: &mut ResidualFn,
    df: Option<&mut JacobianFn>,
    options: &MinimizerOptions,
) -> Result<FitReport, RefineError> {
    let mut df = df;
    let mut r = f(x).ok_or(RefineError::ResidualEvaluation)?;
    let mut cost = r.norm_squared();
    let mut cost_trace = vec![cost];
    let mut lambda = 1e-3;
    let mut converged = false;
    let mut iterations = 0;
    let mut last_jtj: Option<DMatrix<f64>> = None;

    for iter in 0..options.max_iter {
        iterations = iter + 1;

        let jac = match df.as_mut() {
            Some(dfun) => dfun(x).ok_or(RefineError::ResidualEvaluation)?,
            None => numerical_jacobian(x, &r, f).ok_or(RefineError::ResidualEvaluation)?,
        };
        let jtj = jac.transpose() * &jac;
        let grad = jac.transpose() * &r;
        last_jtj = Some(jtj.clone());

        if grad.amax() <= options.gtol {
            converged = true;
            break;
        }

        // damped step, retried with stronger damping on failure
        let mut stepped = false;
        for _ in 0..20 {
            let mut damped = jtj.clone();
            for i in 0..damped.nrows() {
                damped[(i, i)] += lambda * jtj[(i, i)].max(1e-12);
            }
            let delta = match damped.lu().solve(&(-&grad)) {
                Some(d) => d,
                None => {
                    lambda *= 10.0;
                    continue;
                }
            };
            if !delta.iter().all(|d| d.is_finite()) {
                lambda *= 10.0;
                continue;
            }

            let x_new = &*x + &delta;
            let r_new = match f(&x_new) {
                Some(r) => r,
                None => {
                    lambda *= 10.0;
                    continue;
                }
            };
            let cost_new = r_new.norm_squared();
            if cost_new <= cost {
                // accepted
                let dx = delta.norm();
                let df_rel = (cost - cost_new).abs() / cost.max(1e-300);
                *x = x_new;
                r = r_new;
                cost = cost_new;
                cost_trace.push(cost);
                lambda = (lambda * 0.1).max(1e-12);
                stepped = true;

                if dx <= options.xtol * (x.norm() + options.xtol) || df_rel <= options.ftol {
                    converged = true;
                }
                break;
            }
            lambda *= 10.0;
        }

        if !stepped {
            // no acceptable step even with heavy damping: either we are at
            // the minimum or the problem is degenerate
            converged = grad.amax() <= options.gtol * 1e3 || cost_trace.len() > 1;
            break;
        }
        if converged {
            break;
        }
    }

    let covariance = last_jtj.and_then(|jtj| jtj.try_inverse());
    Ok(FitReport {
        converged,
        iterations,
        cost_trace,
        covariance,
    })
}

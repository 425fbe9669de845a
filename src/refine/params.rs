// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Fit-parameter arena with linear equality constraints.
//!
//! Parameters live in a flat arena addressed by index; the original values
//! are kept for reset. Constraints `C x = 0` are turned into a kernel basis
//! `K` with columns spanning the null space of `C` and a projector
//! `P = (K^T K)^-1 K^T`, so the solver works on the reduced coordinates
//! `y = P x` and every evaluation pushes `x = K y` back into the arena.

use nalgebra::{DMatrix, DVector};

use super::RefineError;

/// Index of one parameter in the arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ParamId(pub usize);

#[derive(Clone, Debug, Default)]
pub struct FitParameters {
    values: Vec<f64>,
    original: Vec<f64>,
    /// Kernel basis and projector of the constraint set, when present.
    kernel: Option<(DMatrix<f64>, DMatrix<f64>)>,
}

impl FitParameters {
    pub fn new() -> FitParameters {
        FitParameters::default()
    }

    pub fn add(&mut self, value: f64) -> ParamId {
        self.values.push(value);
        self.original.push(value);
        self.kernel = None;
        ParamId(self.values.len() - 1)
    }

    pub fn get(&self, id: ParamId) -> f64 {
        self.values[id.0]
    }

    pub fn set(&mut self, id: ParamId, value: f64) {
        self.values[id.0] = value;
    }

    pub fn n_params(&self) -> usize {
        self.values.len()
    }

    /// Number of free coordinates after constraint elimination.
    pub fn n_free(&self) -> usize {
        match &self.kernel {
            Some((k, _)) => k.ncols(),
            None => self.values.len(),
        }
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Restore every parameter to its original value.
    pub fn reset(&mut self) {
        self.values.copy_from_slice(&self.original);
    }

    /// Install the constraint matrix `C` (each row one linear relation
    /// `C x = 0`). The kernel is extracted from the SVD of `C`.
    pub fn set_constraints(&mut self, c: &DMatrix<f64>) -> Result<(), RefineError> {
        if c.ncols() != self.values.len() {
            return Err(RefineError::ConstraintShape {
                cols: c.ncols(),
                params: self.values.len(),
            });
        }
        let svd = c.clone().svd(false, true);
        let v_t = svd.v_t.as_ref().expect("svd was requested with V^T");
        let tol = 1e-10 * svd.singular_values.max().max(1.0);
        let rank = svd.singular_values.iter().filter(|&&s| s > tol).count();
        let n = self.values.len();
        if rank >= n {
            return Err(RefineError::OverConstrained);
        }

        // rows of V^T beyond the rank span the null space
        let mut k = DMatrix::<f64>::zeros(n, n - rank);
        for (j, row) in (rank..v_t.nrows()).enumerate() {
            for i in 0..n {
                k[(i, j)] = v_t[(row, i)];
            }
        }
        let ktk = k.transpose() * &k;
        let p = ktk
            .try_inverse()
            .ok_or(RefineError::OverConstrained)?
            * k.transpose();
        self.kernel = Some((k, p));
        Ok(())
    }

    pub fn clear_constraints(&mut self) {
        self.kernel = None;
    }

    /// Reduced coordinates of the current parameter values.
    pub fn reduced(&self) -> DVector<f64> {
        let x = DVector::from_column_slice(&self.values);
        match &self.kernel {
            Some((_, p)) => p * x,
            None => x,
        }
    }

    /// Push reduced coordinates back into the arena.
    pub fn set_reduced(&mut self, y: &DVector<f64>) {
        let x = match &self.kernel {
            Some((k, _)) => k * y,
            None => y.clone(),
        };
        for (v, xi) in self.values.iter_mut().zip(x.iter()) {
            *v = *xi;
        }
    }
}

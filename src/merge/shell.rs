// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Resolution shelling.
//!
//! The d-range splits into shells of equal reciprocal-space volume, i.e.
//! uniform spacing in `1/d^3`, so each shell holds a comparable number of
//! reflections for a roughly uniform reciprocal lattice.

use super::MergeError;

#[derive(Clone, Debug)]
pub struct ResolutionShells {
    /// Shell edges in d, descending from d_max to d_min, `n + 1` entries.
    edges: Vec<f64>,
}

impl ResolutionShells {
    pub fn new(d_min: f64, d_max: f64, n_shells: usize) -> Result<ResolutionShells, MergeError> {
        if !(d_min > 0.0 && d_min < d_max) {
            return Err(MergeError::BadShellBounds);
        }
        let n = n_shells.max(1);
        let v_lo = 1.0 / d_max.powi(3);
        let v_hi = 1.0 / d_min.powi(3);
        let edges = (0..=n)
            .map(|i| {
                let v = v_lo + (v_hi - v_lo) * i as f64 / n as f64;
                v.powf(-1.0 / 3.0)
            })
            .collect();
        Ok(ResolutionShells { edges })
    }

    pub fn n_shells(&self) -> usize {
        self.edges.len() - 1
    }

    /// Bounds `(d_lo, d_hi)` of every shell, lowest resolution first.
    pub fn bounds(&self) -> Vec<(f64, f64)> {
        (0..self.n_shells())
            .map(|i| (self.edges[i + 1], self.edges[i]))
            .collect()
    }

    /// Index of the shell containing a d-spacing, if inside the range.
    pub fn shell_of(&self, d: f64) -> Option<usize> {
        if d > self.edges[0] || d < *self.edges.last().expect("edges are non-empty") {
            return None;
        }
        for i in 0..self.n_shells() {
            if d >= self.edges[i + 1] {
                return Some(i);
            }
        }
        Some(self.n_shells() - 1)
    }
}

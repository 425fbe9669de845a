// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Radial intensity profile with sigma/I cutoff.
//!
//! The metric radius range `[0, sigma_max]` is split into equal-volume
//! shells; a point at squared radius `r2` contributes to every cumulative
//! bin whose endpoint contains it, so bin `k` always holds the integral of
//! the region `r <= r_k`. The optimal cutoff is the bin minimising the
//! relative error of its net intensity.

use crate::peak::Intensity;

#[derive(Clone, Debug)]
pub struct IntegratedProfile {
    counts: Vec<f64>,
    n_points: Vec<usize>,
    /// Squared radii of the bin boundaries, `n + 1` entries.
    endpoints2: Vec<f64>,
    sigma_max: f64,
}

impl IntegratedProfile {
    pub fn new(sigma_max: f64, n_bins: usize) -> IntegratedProfile {
        let n_bins = n_bins.max(1);
        let dr3 = sigma_max.powi(3) / n_bins as f64;
        let endpoints2 = (0..=n_bins)
            .map(|i| (i as f64 * dr3).powf(2.0 / 3.0))
            .collect();
        IntegratedProfile {
            counts: vec![0.0; n_bins],
            n_points: vec![0; n_bins],
            endpoints2,
            sigma_max,
        }
    }

    pub fn n_bins(&self) -> usize {
        self.counts.len()
    }

    pub fn sigma_max(&self) -> f64 {
        self.sigma_max
    }

    /// Add a point at squared metric radius `r2` carrying `counts`.
    pub fn add_point(&mut self, r2: f64, counts: f64) {
        if r2 < 0.0 || r2 > *self.endpoints2.last().expect("non-empty endpoints") {
            return;
        }
        for i in 0..self.counts.len() {
            if r2 <= self.endpoints2[i + 1] {
                self.counts[i] += counts;
                self.n_points[i] += 1;
            }
        }
    }

    /// Net intensity of cumulative bin `k` for a given mean background.
    pub fn intensity(&self, k: usize, mean_bkg: &Intensity) -> Intensity {
        let n = self.n_points[k] as f64;
        let value = self.counts[k] - n * mean_bkg.value;
        // Poisson signal plus the correlated background-mean error
        let variance = self.counts[k] + n * n * mean_bkg.variance;
        Intensity::new(value, variance)
    }

    /// Bin minimising sigma(I)/I, i.e. the sigma/I-optimal cutoff.
    pub fn optimal_bin(&self, mean_bkg: &Intensity) -> usize {
        let mut best = self.counts.len() - 1;
        let mut best_ratio = f64::INFINITY;
        for k in 0..self.counts.len() {
            if self.n_points[k] == 0 {
                continue;
            }
            let i = self.intensity(k, mean_bkg);
            if i.value <= 0.0 {
                continue;
            }
            let ratio = i.sigma() / i.value;
            if ratio < best_ratio {
                best_ratio = ratio;
                best = k;
            }
        }
        best
    }

    pub fn reset(&mut self) {
        self.counts.iter_mut().for_each(|c| *c = 0.0);
        self.n_points.iter_mut().for_each(|n| *n = 0);
    }
}

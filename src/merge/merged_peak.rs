// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! One orbit of symmetry-equivalent observations.

use crate::crystal::MillerIndex;
use crate::peak::Intensity;

use super::MergeObservation;

#[derive(Clone, Debug)]
pub struct MergedPeak {
    representative: MillerIndex,
    observations: Vec<Intensity>,
    d_sum: f64,
}

impl MergedPeak {
    pub fn new(representative: MillerIndex) -> MergedPeak {
        MergedPeak {
            representative,
            observations: Vec::new(),
            d_sum: 0.0,
        }
    }

    pub fn add(&mut self, obs: MergeObservation) {
        self.observations.push(obs.intensity);
        self.d_sum += obs.d;
    }

    /// Canonical (lexicographically minimal) index of the orbit.
    pub fn representative(&self) -> MillerIndex {
        self.representative
    }

    pub fn observations(&self) -> &[Intensity] {
        &self.observations
    }

    /// Number of observations merged into the orbit.
    pub fn redundancy(&self) -> usize {
        self.observations.len()
    }

    pub fn mean_d(&self) -> f64 {
        if self.observations.is_empty() {
            0.0
        } else {
            self.d_sum / self.observations.len() as f64
        }
    }

    /// Mean intensity with the standard error of the mean as its sigma. A
    /// single observation keeps its own counting error.
    pub fn intensity(&self) -> Intensity {
        let n = self.observations.len();
        if n == 0 {
            return Intensity::zero();
        }
        let mean: f64 = self.observations.iter().map(|i| i.value).sum::<f64>() / n as f64;
        if n == 1 {
            return Intensity::new(mean, self.observations[0].variance);
        }
        let ss: f64 = self
            .observations
            .iter()
            .map(|i| (i.value - mean).powi(2))
            .sum();
        let sem2 = ss / ((n - 1) as f64 * n as f64);
        Intensity::new(mean, sem2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn obs(value: f64) -> MergeObservation {
        MergeObservation {
            hkl: MillerIndex::new(1, 0, 0),
            d: 2.5,
            intensity: Intensity::new(value, value),
        }
    }

    #[test]
    fn mean_and_standard_error() {
        let mut peak = MergedPeak::new(MillerIndex::new(1, 0, 0));
        for v in [9.0, 10.0, 11.0, 10.0] {
            peak.add(obs(v));
        }
        let i = peak.intensity();
        assert_abs_diff_eq!(i.value, 10.0);
        // sample variance 2/3, standard error^2 = (2/3)/4
        assert_abs_diff_eq!(i.variance, 2.0 / 3.0 / 4.0, epsilon = 1e-12);
        assert_eq!(peak.redundancy(), 4);
        assert_abs_diff_eq!(peak.mean_d(), 2.5);
    }

    #[test]
    fn single_observation_keeps_its_counting_error() {
        let mut peak = MergedPeak::new(MillerIndex::new(0, 1, 0));
        peak.add(obs(100.0));
        let i = peak.intensity();
        assert_abs_diff_eq!(i.value, 100.0);
        assert_abs_diff_eq!(i.variance, 100.0);
    }
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Library of peak shapes in the standard frame.
//!
//! Integrated peaks deposit their standard-frame metrics here keyed by
//! Miller index and observation frame; the predictor asks for a metric at a
//! reflection it is about to place and gets a neighbourhood average, or the
//! library default when too few neighbours are known.

use nalgebra::Matrix3;
use strum_macros::{Display, EnumString};

use crate::crystal::MillerIndex;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "kebab-case")]
pub enum InterpolationMode {
    Nearest,
    InverseDistance,
    Mean,
}

#[derive(Clone, Debug)]
struct ShapeEntry {
    hkl: MillerIndex,
    frame: f64,
    metric: Matrix3<f64>,
}

#[derive(Clone, Debug)]
pub struct ShapeLibrary {
    entries: Vec<ShapeEntry>,
    default_metric: Matrix3<f64>,
}

impl Default for ShapeLibrary {
    fn default() -> ShapeLibrary {
        // unit standard deviations along every standard axis
        ShapeLibrary {
            entries: Vec::new(),
            default_metric: Matrix3::identity(),
        }
    }
}

impl ShapeLibrary {
    pub fn new(default_metric: Matrix3<f64>) -> ShapeLibrary {
        ShapeLibrary {
            entries: Vec::new(),
            default_metric,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn default_metric(&self) -> &Matrix3<f64> {
        &self.default_metric
    }

    pub fn add(&mut self, hkl: MillerIndex, frame: f64, metric: Matrix3<f64>) {
        self.entries.push(ShapeEntry { hkl, frame, metric });
    }

    /// Mean metric over the whole library; the default when empty.
    pub fn mean_metric(&self) -> Matrix3<f64> {
        if self.entries.is_empty() {
            return self.default_metric;
        }
        let sum: Matrix3<f64> = self.entries.iter().map(|e| e.metric).sum();
        sum / self.entries.len() as f64
    }

    /// Metric for a reflection near a given frame. Neighbours are entries
    /// within `radius` of the reflection in Miller space and `n_frames` in
    /// frame; with fewer than `min_neighbours` of them the library default
    /// is returned.
    pub fn assign(
        &self,
        hkl: MillerIndex,
        frame: f64,
        radius: f64,
        n_frames: f64,
        min_neighbours: usize,
        mode: InterpolationMode,
    ) -> Matrix3<f64> {
        let target = hkl.vector();
        let neighbours: Vec<(f64, &ShapeEntry)> = self
            .entries
            .iter()
            .filter(|e| (e.frame - frame).abs() <= n_frames)
            .map(|e| ((e.hkl.vector() - target).norm(), e))
            .filter(|(d, _)| *d <= radius)
            .collect();

        if neighbours.len() < min_neighbours.max(1) {
            return self.default_metric;
        }

        match mode {
            InterpolationMode::Nearest => {
                neighbours
                    .iter()
                    .min_by(|a, b| a.0.partial_cmp(&b.0).unwrap())
                    .map(|(_, e)| e.metric)
                    .unwrap_or(self.default_metric)
            }
            InterpolationMode::InverseDistance => {
                let mut total = 0.0;
                let mut sum = Matrix3::zeros();
                for (d, e) in &neighbours {
                    let w = 1.0 / (d + 1e-6);
                    total += w;
                    sum += e.metric * w;
                }
                sum / total
            }
            InterpolationMode::Mean => {
                let sum: Matrix3<f64> = neighbours.iter().map(|(_, e)| e.metric).sum();
                sum / neighbours.len() as f64
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use std::str::FromStr;

    fn diag(x: f64) -> Matrix3<f64> {
        Matrix3::identity() * x
    }

    #[test]
    fn mode_names_parse() {
        assert_eq!(
            InterpolationMode::from_str("inverse-distance").unwrap(),
            InterpolationMode::InverseDistance
        );
        assert_eq!(InterpolationMode::Nearest.to_string(), "nearest");
    }

    #[test]
    fn falls_back_to_default_with_few_neighbours() {
        let mut lib = ShapeLibrary::new(diag(4.0));
        lib.add(MillerIndex::new(10, 0, 0), 50.0, diag(1.0));
        // far away in Miller space
        let m = lib.assign(
            MillerIndex::new(0, 0, 0),
            50.0,
            2.0,
            10.0,
            1,
            InterpolationMode::Mean,
        );
        assert_abs_diff_eq!(m, diag(4.0), epsilon = 1e-12);

        // near in Miller space but far in frame
        let m = lib.assign(
            MillerIndex::new(10, 0, 0),
            0.0,
            2.0,
            10.0,
            1,
            InterpolationMode::Mean,
        );
        assert_abs_diff_eq!(m, diag(4.0), epsilon = 1e-12);
    }

    #[test]
    fn mean_and_nearest_interpolation() {
        let mut lib = ShapeLibrary::default();
        lib.add(MillerIndex::new(1, 0, 0), 10.0, diag(1.0));
        lib.add(MillerIndex::new(2, 0, 0), 11.0, diag(3.0));

        let mean = lib.assign(
            MillerIndex::new(1, 0, 0),
            10.0,
            1.5,
            5.0,
            2,
            InterpolationMode::Mean,
        );
        assert_abs_diff_eq!(mean, diag(2.0), epsilon = 1e-12);

        let nearest = lib.assign(
            MillerIndex::new(1, 0, 0),
            10.0,
            1.5,
            5.0,
            2,
            InterpolationMode::Nearest,
        );
        assert_abs_diff_eq!(nearest, diag(1.0), epsilon = 1e-12);
    }

    #[test]
    fn inverse_distance_weights_the_closer_entry() {
        let mut lib = ShapeLibrary::default();
        lib.add(MillerIndex::new(1, 0, 0), 10.0, diag(1.0));
        lib.add(MillerIndex::new(3, 0, 0), 10.0, diag(5.0));
        let m = lib.assign(
            MillerIndex::new(2, 0, 0),
            10.0,
            2.0,
            5.0,
            2,
            InterpolationMode::InverseDistance,
        );
        // equidistant: plain mean
        assert_abs_diff_eq!(m, diag(3.0), epsilon = 1e-9);

        let m = lib.assign(
            MillerIndex::new(1, 0, 0),
            10.0,
            2.5,
            5.0,
            2,
            InterpolationMode::InverseDistance,
        );
        // entry at distance 0 dominates
        assert!(m[(0, 0)] < 1.01);
    }
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The peak entity and its intensity bookkeeping.
//!
//! A peak owns its detector-space ellipsoid and refers to the data set it
//! was found in and the unit cell it is indexed against by arena indices;
//! it never owns either.

mod coord;
mod shape;

pub use coord::PeakCoordinateSystem;
pub use shape::{InterpolationMode, ShapeLibrary};

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::crystal::{MillerIndex, UnitCell};
use crate::data::{DataError, DataSet, DetectorEvent};
use crate::geometry::Ellipsoid;

/// Index of a data set in the session arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DataSetId(pub usize);

/// Index of a unit cell in the sample arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CellId(pub usize);

/// An intensity with its variance; arithmetic propagates errors assuming
/// independent terms.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Intensity {
    pub value: f64,
    pub variance: f64,
}

impl Intensity {
    pub fn new(value: f64, variance: f64) -> Intensity {
        Intensity { value, variance }
    }

    pub fn zero() -> Intensity {
        Intensity::new(0.0, 0.0)
    }

    /// A Poisson count: the variance is the count itself.
    pub fn counts(n: f64) -> Intensity {
        Intensity::new(n, n)
    }

    pub fn sigma(&self) -> f64 {
        self.variance.max(0.0).sqrt()
    }
}

impl std::ops::Add for Intensity {
    type Output = Intensity;

    fn add(self, rhs: Intensity) -> Intensity {
        Intensity::new(self.value + rhs.value, self.variance + rhs.variance)
    }
}

impl std::ops::AddAssign for Intensity {
    fn add_assign(&mut self, rhs: Intensity) {
        *self = *self + rhs;
    }
}

impl std::ops::Sub for Intensity {
    type Output = Intensity;

    fn sub(self, rhs: Intensity) -> Intensity {
        Intensity::new(self.value - rhs.value, self.variance + rhs.variance)
    }
}

impl std::ops::Mul<f64> for Intensity {
    type Output = Intensity;

    fn mul(self, s: f64) -> Intensity {
        Intensity::new(self.value * s, self.variance * s * s)
    }
}

impl std::ops::Div<f64> for Intensity {
    type Output = Intensity;

    fn div(self, s: f64) -> Intensity {
        Intensity::new(self.value / s, self.variance / (s * s))
    }
}

/// A Bragg peak candidate on the detector.
#[derive(Clone, Debug)]
pub struct Peak {
    /// Shape in detector coordinates (px, py, frame).
    shape: Ellipsoid,
    pub data_set: DataSetId,
    pub cell: Option<CellId>,
    pub raw_intensity: Intensity,
    pub transmission: f64,
    pub selected: bool,
    pub masked: bool,
    /// Set for peaks produced by the predictor rather than the finder.
    pub predicted: bool,
    /// Cached integer indices, set when the peak is indexed against a cell.
    hkl: Option<MillerIndex>,
}

impl Peak {
    pub fn new(shape: Ellipsoid, data_set: DataSetId) -> Peak {
        Peak {
            shape,
            data_set,
            cell: None,
            raw_intensity: Intensity::zero(),
            transmission: 1.0,
            selected: true,
            masked: false,
            predicted: false,
            hkl: None,
        }
    }

    pub fn shape(&self) -> &Ellipsoid {
        &self.shape
    }

    pub fn set_shape(&mut self, shape: Ellipsoid) {
        self.shape = shape;
    }

    pub fn centre(&self) -> DetectorEvent {
        let c = self.shape.centre();
        DetectorEvent::new(c.x, c.y, c.z)
    }

    /// Whether the peak takes part in further processing.
    pub fn enabled(&self) -> bool {
        self.selected && !self.masked
    }

    pub fn hkl(&self) -> Option<MillerIndex> {
        self.hkl
    }

    pub fn indexed(&self) -> bool {
        self.hkl.is_some() && self.cell.is_some()
    }

    /// Momentum transfer of the peak centre in the sample frame.
    pub fn q(&self, data: &DataSet) -> Result<Vector3<f64>, DataError> {
        data.q_at(&self.centre())
    }

    /// Index the peak against a cell; caches the Miller indices on success
    /// and clears them otherwise.
    pub fn index_with(&mut self, data: &DataSet, cell_id: CellId, cell: &UnitCell) -> bool {
        self.cell = Some(cell_id);
        match self.q(data) {
            Ok(q) => {
                self.hkl = cell.index_q(q, cell.indexing_tolerance);
                self.hkl.is_some()
            }
            Err(_) => {
                self.hkl = None;
                false
            }
        }
    }

    /// Assign predicted indices directly (used by the predictor, which knows
    /// the reflection it placed the peak at).
    pub fn set_hkl(&mut self, hkl: MillerIndex, cell_id: CellId) {
        self.hkl = Some(hkl);
        self.cell = Some(cell_id);
    }

    /// Lorentz factor `1 / (sin |gamma| cos nu)` from the spherical angles of
    /// the scattered beam at the peak centre.
    pub fn lorentz_factor(&self, data: &DataSet) -> Result<f64, DataError> {
        let ev = self.centre();
        let state = data.interpolated_state(ev.frame);
        let rest = data.instrument.detector.pixel_position(ev.px, ev.py)?;
        let kf = state.kf_lab(rest);
        let gamma = kf.x.atan2(kf.y);
        let nu = (kf.z / kf.norm()).asin();
        Ok(1.0 / (gamma.abs().sin() * nu.cos()))
    }

    /// Corrected intensity: raw counts scaled by the Lorentz factor and the
    /// transmission.
    pub fn corrected_intensity(&self, data: &DataSet) -> Result<Intensity, DataError> {
        let lorentz = self.lorentz_factor(data)?;
        Ok(self.raw_intensity * (lorentz / self.transmission))
    }
}

/// Keep the peaks that are selected and not masked.
pub fn filter_enabled(peaks: &[Peak]) -> Vec<usize> {
    (0..peaks.len()).filter(|&i| peaks[i].enabled()).collect()
}

/// Keep the peaks of `ids` indexed against the given cell.
pub fn filter_indexed(peaks: &[Peak], ids: &[usize], cell_id: CellId) -> Vec<usize> {
    ids.iter()
        .copied()
        .filter(|&i| peaks[i].cell == Some(cell_id) && peaks[i].hkl().is_some())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::test_support::empty_data_set;
    use approx::{assert_abs_diff_eq, assert_relative_eq};
    use nalgebra::Matrix3;

    fn peak_at(px: f64, py: f64, frame: f64) -> Peak {
        let shape = Ellipsoid::new(
            Vector3::new(px, py, frame),
            Matrix3::identity() * 2.0,
        )
        .unwrap();
        Peak::new(shape, DataSetId(0))
    }

    #[test]
    fn intensity_error_propagation() {
        let a = Intensity::counts(100.0);
        let b = Intensity::counts(25.0);
        let sum = a + b;
        assert_relative_eq!(sum.value, 125.0);
        assert_relative_eq!(sum.sigma(), 125.0_f64.sqrt());

        let scaled = a * 2.0;
        assert_relative_eq!(scaled.value, 200.0);
        assert_relative_eq!(scaled.variance, 400.0);

        let diff = a - b;
        assert_relative_eq!(diff.value, 75.0);
        assert_relative_eq!(diff.variance, 125.0);
    }

    #[test]
    fn indexing_caches_hkl() {
        let data = empty_data_set(64, 64, 30);
        let mut peak = peak_at(40.0, 25.0, 12.0);
        let q = peak.q(&data).unwrap();

        // build a cell whose (1, 0, 0) reflection is exactly this q
        let rot = nalgebra::Rotation3::rotation_between(&Vector3::x(), &q.normalize()).unwrap();
        let astar = q;
        let bstar = rot * Vector3::y() * 0.05;
        let cstar = rot * Vector3::z() * 0.07;
        let cell = UnitCell::from_reciprocal_vectors(astar, bstar, cstar).unwrap();

        assert!(peak.index_with(&data, CellId(3), &cell));
        assert_eq!(peak.hkl(), Some(MillerIndex::new(1, 0, 0)));
        assert!(peak.indexed());
        assert_eq!(peak.cell, Some(CellId(3)));
    }

    #[test]
    fn lorentz_factor_is_finite_off_axis() {
        let data = empty_data_set(64, 64, 5);
        let peak = peak_at(10.0, 20.0, 2.0);
        let lorentz = peak.lorentz_factor(&data).unwrap();
        assert!(lorentz.is_finite());
        assert!(lorentz > 1.0);

        let corrected = {
            let mut p = peak.clone();
            p.raw_intensity = Intensity::counts(400.0);
            p.corrected_intensity(&data).unwrap()
        };
        assert_abs_diff_eq!(corrected.value, 400.0 * lorentz, epsilon = 1e-9);
    }

    #[test]
    fn filters_compose() {
        let mut peaks: Vec<Peak> = (0..4).map(|i| peak_at(10.0 + i as f64, 10.0, 1.0)).collect();
        peaks[1].selected = false;
        peaks[2].masked = true;
        let enabled = filter_enabled(&peaks);
        assert_eq!(enabled, vec![0, 3]);
        let indexed = filter_indexed(&peaks, &enabled, CellId(0));
        assert!(indexed.is_empty());
    }
}

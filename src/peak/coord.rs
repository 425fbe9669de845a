// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The peak-local standard coordinate frame.
//!
//! Each peak defines an orthogonal frame spanned by `e1 = kf x ki` and
//! `e2 = kf x e1`, scaled so that the first two coordinates are scattering
//! angles in degrees, while the third follows the scan rotation: `eps3 =
//! zeta * (frame - frame0)` with `zeta` the projection of the scan axis on
//! `e1` times the step size. Beam divergence and mosaicity are isotropic in
//! this frame, which is what makes it the natural home for the shape
//! library.

use nalgebra::{Matrix3, Vector3};

use crate::data::{DataError, DataSet, DetectorEvent};
use crate::geometry::{Ellipsoid, GeometryError};

use super::Peak;

const RAD2DEG: f64 = 180.0 / std::f64::consts::PI;

pub struct PeakCoordinateSystem {
    event: DetectorEvent,
    state: crate::instrument::InterpolatedState,
    kf: Vector3<f64>,
    e1: Vector3<f64>,
    e2: Vector3<f64>,
    zeta: f64,
}

impl PeakCoordinateSystem {
    pub fn new(peak: &Peak, data: &DataSet) -> Result<PeakCoordinateSystem, DataError> {
        let event = peak.centre();
        let state = data.interpolated_state(event.frame);
        let ki = state.ki();
        let rest = data
            .instrument
            .detector
            .pixel_position(event.px, event.py)?;
        let kf = state.kf_lab(rest);

        let mut e1 = kf.cross(&ki);
        let mut e2 = kf.cross(&e1);
        e1.normalize_mut();
        e2.normalize_mut();

        let zeta = e1.dot(&state.axis) * RAD2DEG * state.step;
        e1 *= RAD2DEG / kf.norm();
        e2 *= RAD2DEG / kf.norm();

        Ok(PeakCoordinateSystem {
            event,
            state,
            kf,
            e1,
            e2,
            zeta,
        })
    }

    /// Map a detector event into the standard frame.
    pub fn transform(&self, ev: &DetectorEvent, data: &DataSet) -> Result<Vector3<f64>, DataError> {
        let rest = data.instrument.detector.pixel_position(ev.px, ev.py)?;
        let dk = self.state.kf_lab(rest) - self.kf;
        Ok(Vector3::new(
            self.e1.dot(&dk),
            self.e2.dot(&dk),
            self.zeta * (ev.frame - self.event.frame),
        ))
    }

    /// Analytic Jacobian of `transform` at the peak centre.
    pub fn jacobian(&self, data: &DataSet) -> Matrix3<f64> {
        let jk = self
            .state
            .jacobian_k(&data.instrument.detector, self.event.px, self.event.py);
        let mut j = Matrix3::zeros();
        j.set_row(0, &(self.e1.transpose() * jk));
        j.set_row(1, &(self.e2.transpose() * jk));
        j[(2, 2)] = self.zeta;
        j
    }

    /// Detector-space ellipsoid of a peak with the given beam divergence and
    /// mosaicity (standard deviations in the standard frame).
    pub fn detector_shape(
        &self,
        sigma_d: f64,
        sigma_m: f64,
        data: &DataSet,
    ) -> Result<Ellipsoid, GeometryError> {
        let j = self.jacobian(data);
        let mut lambda = Matrix3::zeros();
        lambda[(0, 0)] = 1.0 / (sigma_d * sigma_d);
        lambda[(1, 1)] = 1.0 / (sigma_d * sigma_d);
        lambda[(2, 2)] = 1.0 / (sigma_m * sigma_m);
        let metric = j.transpose() * lambda * j;
        Ellipsoid::new(self.event.coords(), 0.5 * (metric + metric.transpose()))
    }

    /// Push the peak's detector-space metric into the standard frame.
    pub fn standard_shape(&self, peak: &Peak, data: &DataSet) -> Result<Ellipsoid, GeometryError> {
        let j = self.jacobian(data);
        let cov = j * peak.shape().inverse_metric() * j.transpose();
        let metric = cov
            .try_inverse()
            .ok_or(GeometryError::NotPositiveDefinite)?;
        Ellipsoid::new(Vector3::zeros(), 0.5 * (metric + metric.transpose()))
    }

    /// Beam divergence estimate of a peak: mean in-plane standard deviation
    /// of its standard shape.
    pub fn estimate_divergence(&self, peak: &Peak, data: &DataSet) -> Result<f64, GeometryError> {
        let shape = self.standard_shape(peak, data)?;
        let c = shape.inverse_metric();
        Ok((0.5 * (c[(0, 0)] + c[(1, 1)])).sqrt())
    }

    /// Mosaicity estimate of a peak: out-of-plane standard deviation of its
    /// standard shape.
    pub fn estimate_mosaicity(&self, peak: &Peak, data: &DataSet) -> Result<f64, GeometryError> {
        let shape = self.standard_shape(peak, data)?;
        Ok(shape.inverse_metric()[(2, 2)].sqrt())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::test_support::empty_data_set;
    use crate::peak::DataSetId;
    use approx::assert_abs_diff_eq;

    fn peak_at(px: f64, py: f64, frame: f64) -> Peak {
        let shape = Ellipsoid::new(
            Vector3::new(px, py, frame),
            Matrix3::identity() * 2.0,
        )
        .unwrap();
        Peak::new(shape, DataSetId(0))
    }

    #[test]
    fn centre_maps_to_the_origin() {
        let data = empty_data_set(64, 64, 20);
        let peak = peak_at(40.0, 25.0, 10.0);
        let frame = PeakCoordinateSystem::new(&peak, &data).unwrap();
        let eps = frame.transform(&peak.centre(), &data).unwrap();
        assert_abs_diff_eq!(eps, Vector3::zeros(), epsilon = 1e-12);
    }

    /// The analytic Jacobian must reproduce the transform of nearby events
    /// to within 10% for displacements of norm 0.1.
    #[test]
    fn jacobian_linearises_the_transform() {
        let data = empty_data_set(64, 64, 20);
        let peak = peak_at(40.0, 25.0, 10.0);
        let frame = PeakCoordinateSystem::new(&peak, &data).unwrap();
        let j = frame.jacobian(&data);

        for delta in [
            Vector3::new(0.1, 0.0, 0.0),
            Vector3::new(0.0, 0.1, 0.0),
            Vector3::new(0.0, 0.0, 0.1),
            Vector3::new(0.06, -0.06, 0.05),
        ] {
            let ev = DetectorEvent::new(
                peak.centre().px + delta.x,
                peak.centre().py + delta.y,
                peak.centre().frame + delta.z,
            );
            let eps = frame.transform(&ev, &data).unwrap();
            let lin = j * delta;
            assert!(
                (eps - lin).norm() / lin.norm().max(1e-12) < 0.1,
                "non-linearity too large: {eps:?} vs {lin:?}"
            );
        }
    }

    /// Pushing the detector metric forward and pulling it back must agree:
    /// the detector shape built from the estimated divergence and mosaicity
    /// reproduces the standard deviations.
    #[test]
    fn divergence_mosaicity_round_trip() {
        let data = empty_data_set(64, 64, 20);
        let mut peak = peak_at(40.0, 25.0, 10.0);
        let frame = PeakCoordinateSystem::new(&peak, &data).unwrap();

        let (sigma_d, sigma_m) = (0.3, 0.6);
        let detector_shape = frame.detector_shape(sigma_d, sigma_m, &data).unwrap();
        peak.set_shape(detector_shape);

        let d = frame.estimate_divergence(&peak, &data).unwrap();
        let m = frame.estimate_mosaicity(&peak, &data).unwrap();
        assert_abs_diff_eq!(d, sigma_d, epsilon = 1e-6);
        assert_abs_diff_eq!(m, sigma_m, epsilon = 1e-6);
    }

    /// Invariant: the metric of the standard shape times its inverse is the
    /// identity.
    #[test]
    fn standard_shape_metric_is_consistent() {
        let data = empty_data_set(64, 64, 20);
        let peak = peak_at(30.0, 35.0, 8.0);
        let frame = PeakCoordinateSystem::new(&peak, &data).unwrap();
        let shape = frame.standard_shape(&peak, &data).unwrap();
        let prod = shape.metric() * shape.inverse_metric();
        assert_abs_diff_eq!(prod, Matrix3::identity(), epsilon = 1e-8);
    }
}

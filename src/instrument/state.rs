// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Per-frame instrument state and its interpolation.
//!
//! A state at integer frame index holds the sample position, the sample and
//! detector orientations, the incoming-beam direction and the wavelength.
//! States between frames interpolate positions and the beam linearly and the
//! orientations by quaternion SLERP. The cumulative scan axis and per-frame
//! step angle are derived from the discrete orientation differences.

use nalgebra::{Matrix3, Rotation3, UnitQuaternion, Vector3};

use super::Detector;

#[derive(Clone, Debug)]
pub struct InstrumentState {
    /// Sample position in the laboratory frame (metres).
    pub sample_position: Vector3<f64>,
    pub sample_orientation: UnitQuaternion<f64>,
    pub detector_orientation: UnitQuaternion<f64>,
    /// Detector position offset (metres), refined away from zero.
    pub detector_position: Vector3<f64>,
    /// Unit vector along the incoming beam propagation direction.
    pub beam: Vector3<f64>,
    /// Wavelength in angstroms.
    pub wavelength: f64,
    /// Unit rotation axis of the scan at this frame.
    pub axis: Vector3<f64>,
    /// Scan step in radians per frame.
    pub step: f64,
    pub refined: bool,
}

/// A state interpolated at a fractional frame coordinate.
pub type InterpolatedState = InstrumentState;

impl InstrumentState {
    pub fn new(
        sample_orientation: UnitQuaternion<f64>,
        detector_orientation: UnitQuaternion<f64>,
        beam: Vector3<f64>,
        wavelength: f64,
    ) -> InstrumentState {
        InstrumentState {
            sample_position: Vector3::zeros(),
            sample_orientation,
            detector_orientation,
            detector_position: Vector3::zeros(),
            beam: beam.normalize(),
            wavelength,
            axis: Vector3::z(),
            step: 0.0,
            refined: false,
        }
    }

    /// Incident wavevector, 1/angstrom, along the beam.
    pub fn ki(&self) -> Vector3<f64> {
        self.beam / self.wavelength
    }

    pub fn sample_orientation_matrix(&self) -> Matrix3<f64> {
        *Rotation3::from(self.sample_orientation).matrix()
    }

    pub fn detector_orientation_matrix(&self) -> Matrix3<f64> {
        *Rotation3::from(self.detector_orientation).matrix()
    }

    /// Laboratory position of a detector rest-frame point (metres).
    pub fn detector_lab_position(&self, rest: Vector3<f64>) -> Vector3<f64> {
        self.detector_orientation * rest + self.detector_position
    }

    /// Scattered wavevector through a detector rest-frame position, scaled to
    /// the incident magnitude (elastic scattering).
    pub fn kf_lab(&self, rest: Vector3<f64>) -> Vector3<f64> {
        let dir = self.detector_lab_position(rest) - self.sample_position;
        dir.normalize() * self.ki().norm()
    }

    /// Momentum transfer `kf - ki` rotated into the sample frame.
    pub fn sample_q(&self, kf: Vector3<f64>) -> Vector3<f64> {
        self.sample_orientation.inverse() * (kf - self.ki())
    }

    /// Jacobian of `kf` with respect to `(px, py, frame)` at a pixel. The
    /// frame column is zero; frame dependence enters through the scan axis.
    pub fn jacobian_k(&self, detector: &Detector, px: f64, py: f64) -> Matrix3<f64> {
        let rest = match detector.pixel_position(px, py) {
            Ok(p) => p,
            Err(_) => return Matrix3::zeros(),
        };
        let dp = self.detector_lab_position(rest) - self.sample_position;
        let r = dp.norm();
        let rhat = dp / r;
        // d(kf)/d(lab position) for a direction scaled to |ki|
        let dk_dpos = (Matrix3::identity() - rhat * rhat.transpose()) * (self.ki().norm() / r);
        let j_lab = self.detector_orientation_matrix() * detector.jacobian(px, py);
        dk_dpos * j_lab
    }
}

/// Derive the scan axis and step of every state from the forward orientation
/// differences of the sequence.
pub fn set_scan_axes(states: &mut [InstrumentState]) {
    if states.len() < 2 {
        return;
    }
    for i in 0..states.len() - 1 {
        let delta = states[i + 1].sample_orientation * states[i].sample_orientation.inverse();
        if let Some(axis) = delta.axis() {
            states[i].axis = axis.into_inner();
            states[i].step = delta.angle();
        }
    }
    // final frame inherits the last difference
    let n = states.len();
    states[n - 1].axis = states[n - 2].axis;
    states[n - 1].step = states[n - 2].step;
}

/// Interpolate the state sequence at the fractional frame `t`, clamped to the
/// valid range.
pub fn interpolated_state(states: &[InstrumentState], t: f64) -> Option<InterpolatedState> {
    if states.is_empty() {
        return None;
    }
    if states.len() == 1 {
        return Some(states[0].clone());
    }
    let clamped = t.clamp(0.0, (states.len() - 1) as f64);
    let i = (clamped.floor() as usize).min(states.len() - 2);
    let u = clamped - i as f64;
    let (a, b) = (&states[i], &states[i + 1]);

    let beam = (a.beam * (1.0 - u) + b.beam * u).normalize();
    Some(InstrumentState {
        sample_position: a.sample_position * (1.0 - u) + b.sample_position * u,
        sample_orientation: a.sample_orientation.slerp(&b.sample_orientation, u),
        detector_orientation: a.detector_orientation.slerp(&b.detector_orientation, u),
        detector_position: a.detector_position * (1.0 - u) + b.detector_position * u,
        beam,
        wavelength: a.wavelength * (1.0 - u) + b.wavelength * u,
        axis: a.axis,
        step: a.step,
        refined: a.refined && b.refined,
    })
}

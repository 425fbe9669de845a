// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Frame streams and the detector-event / momentum-transfer conversions.
//!
//! A [`DataSet`] owns one numor: its metadata, the ordered instrument-state
//! sequence, the detector description and a lazy frame store. Conversions in
//! both directions live here: a [`DetectorEvent`] maps to a q-vector through
//! the interpolated state, and [`DataSet::events_for`] enumerates the
//! fractional frames at which a q-vector crosses the Ewald sphere.

pub mod absorption;
pub mod ill_ascii;
mod metadata;

pub use metadata::{MetaData, MetaValue};

use nalgebra::Vector3;
use ndarray::Array2;
use thiserror::Error;

use crate::instrument::{
    interpolated_state, DetectorShape, Instrument, InstrumentError, InstrumentState,
    InterpolatedState,
};

#[derive(Error, Debug)]
pub enum DataError {
    #[error("frame {frame} outside the numor (0..{n_frames})")]
    FrameOutOfRange { frame: usize, n_frames: usize },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Instrument(#[from] InstrumentError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A point in detector coordinates: column, row and (fractional) frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DetectorEvent {
    pub px: f64,
    pub py: f64,
    pub frame: f64,
}

impl DetectorEvent {
    pub fn new(px: f64, py: f64, frame: f64) -> DetectorEvent {
        DetectorEvent { px, py, frame }
    }

    pub fn coords(&self) -> Vector3<f64> {
        Vector3::new(self.px, self.py, self.frame)
    }
}

/// Lazy access to the frames of a numor. Implementations may decode or
/// memory-map on demand; `frame` must return synchronously.
pub trait FrameStore: Send + Sync {
    fn n_frames(&self) -> usize;
    fn frame(&self, i: usize) -> Result<Array2<u32>, DataError>;
}

/// The simplest store: every frame already decoded in memory.
pub struct MemoryFrames {
    frames: Vec<Array2<u32>>,
}

impl MemoryFrames {
    pub fn new(frames: Vec<Array2<u32>>) -> MemoryFrames {
        MemoryFrames { frames }
    }
}

impl FrameStore for MemoryFrames {
    fn n_frames(&self) -> usize {
        self.frames.len()
    }

    fn frame(&self, i: usize) -> Result<Array2<u32>, DataError> {
        self.frames
            .get(i)
            .cloned()
            .ok_or(DataError::FrameOutOfRange {
                frame: i,
                n_frames: self.frames.len(),
            })
    }
}

/// One numor: metadata, instrument, per-frame states and the frame store.
pub struct DataSet {
    pub numor: u32,
    pub metadata: MetaData,
    pub instrument: Instrument,
    states: Vec<InstrumentState>,
    store: Box<dyn FrameStore>,
}

impl DataSet {
    pub fn new(
        numor: u32,
        metadata: MetaData,
        instrument: Instrument,
        states: Vec<InstrumentState>,
        store: Box<dyn FrameStore>,
    ) -> Result<DataSet, DataError> {
        if states.len() != store.n_frames() {
            return Err(DataError::InvalidInput(format!(
                "{} instrument states for {} frames",
                states.len(),
                store.n_frames()
            )));
        }
        if states.is_empty() {
            return Err(DataError::InvalidInput("numor has no frames".into()));
        }
        Ok(DataSet {
            numor,
            metadata,
            instrument,
            states,
            store,
        })
    }

    pub fn n_frames(&self) -> usize {
        self.store.n_frames()
    }

    pub fn n_rows(&self) -> usize {
        self.instrument.detector.n_rows
    }

    pub fn n_cols(&self) -> usize {
        self.instrument.detector.n_cols
    }

    pub fn frame(&self, i: usize) -> Result<Array2<u32>, DataError> {
        if i >= self.n_frames() {
            return Err(DataError::FrameOutOfRange {
                frame: i,
                n_frames: self.n_frames(),
            });
        }
        self.store.frame(i)
    }

    pub fn states(&self) -> &[InstrumentState] {
        &self.states
    }

    pub fn states_mut(&mut self) -> &mut [InstrumentState] {
        &mut self.states
    }

    pub fn interpolated_state(&self, t: f64) -> InterpolatedState {
        // states are non-empty by construction
        interpolated_state(&self.states, t).expect("non-empty state list")
    }

    /// Momentum transfer of a detector event, in the sample frame
    /// (1/angstrom).
    pub fn q_at(&self, ev: &DetectorEvent) -> Result<Vector3<f64>, DataError> {
        let state = self.interpolated_state(ev.frame);
        let rest = self.instrument.detector.pixel_position(ev.px, ev.py)?;
        let kf = state.kf_lab(rest);
        Ok(state.sample_q(kf))
    }

    /// All detector events at which the sample-frame q crosses the Ewald
    /// sphere during the scan.
    pub fn events_for(&self, q_sample: Vector3<f64>) -> Vec<DetectorEvent> {
        ewald_events(&self.instrument, &self.states, q_sample)
    }
}

fn ewald_mismatch(states: &[InstrumentState], q_sample: Vector3<f64>, t: f64) -> f64 {
    let state = interpolated_state(states, t).expect("non-empty state list");
    let q_lab = state.sample_orientation * q_sample;
    let ki = state.ki();
    (ki + q_lab).norm() - ki.norm()
}

/// Map a laboratory-frame scattered direction to a detector pixel, if the
/// ray from the sample hits the detector.
pub fn detect_event(
    instrument: &Instrument,
    state: &InterpolatedState,
    kf: Vector3<f64>,
) -> Option<(f64, f64)> {
    let det = &instrument.detector;
    // work in the detector rest frame
    let rot_inv = state.detector_orientation.inverse();
    let origin = rot_inv * (state.sample_position - state.detector_position);
    let dir = rot_inv * kf;

    match det.shape {
        DetectorShape::Flat { width, height } => {
            if dir.y.abs() < f64::EPSILON {
                return None;
            }
            let t = (det.distance - origin.y) / dir.y;
            if t <= 0.0 {
                return None;
            }
            let p = origin + dir * t;
            let fx = p.x / width + 0.5;
            let fy = p.z / height + 0.5;
            if !(0.0..=1.0).contains(&fx) || !(0.0..=1.0).contains(&fy) {
                return None;
            }
            Some((
                det.col_min + fx * (det.n_cols - 1) as f64,
                det.row_min + fy * (det.n_rows - 1) as f64,
            ))
        }
        DetectorShape::Cylindrical {
            angular_width,
            height,
        } => {
            // solve |xy(origin) + t * xy(dir)| = distance
            let a = dir.x * dir.x + dir.y * dir.y;
            let b = 2.0 * (origin.x * dir.x + origin.y * dir.y);
            let c = origin.x * origin.x + origin.y * origin.y - det.distance * det.distance;
            let delta = b * b - 4.0 * a * c;
            if delta < 0.0 || a == 0.0 {
                return None;
            }
            let t = 0.5 * (-b + delta.sqrt()) / a;
            if t <= 0.0 {
                return None;
            }
            let p = origin + dir * t;
            let phi = p.x.atan2(p.y) + 0.5 * angular_width;
            if !(0.0..=angular_width).contains(&phi) {
                return None;
            }
            let fy = p.z / height + 0.5;
            if !(0.0..=1.0).contains(&fy) {
                return None;
            }
            Some((
                det.col_min + phi / angular_width * (det.n_cols - 1) as f64,
                det.row_min + fy * (det.n_rows - 1) as f64,
            ))
        }
    }
}

/// All detector events at which a sample-frame q crosses the Ewald sphere
/// during the scan described by `states`. The mismatch function is scanned
/// over every frame interval and each sign change is refined by bisection;
/// crossings whose scattered ray misses the detector are dropped.
pub fn ewald_events(
    instrument: &Instrument,
    states: &[InstrumentState],
    q_sample: Vector3<f64>,
) -> Vec<DetectorEvent> {
    let mut events = Vec::new();
    let n = states.len();
    if n < 2 || q_sample.norm() == 0.0 {
        return events;
    }

    let mut f_lo = ewald_mismatch(states, q_sample, 0.0);
    for i in 0..n - 1 {
        let t_hi = (i + 1) as f64;
        let f_hi = ewald_mismatch(states, q_sample, t_hi);
        if f_lo == 0.0 || f_lo * f_hi < 0.0 {
            let mut lo = i as f64;
            let mut hi = t_hi;
            let mut flo = f_lo;
            for _ in 0..60 {
                let mid = 0.5 * (lo + hi);
                let fm = ewald_mismatch(states, q_sample, mid);
                if flo * fm <= 0.0 {
                    hi = mid;
                } else {
                    lo = mid;
                    flo = fm;
                }
            }
            let t = 0.5 * (lo + hi);
            let state = interpolated_state(states, t).expect("non-empty state list");
            let kf = state.sample_orientation * q_sample + state.ki();
            if let Some((px, py)) = detect_event(instrument, &state, kf) {
                events.push(DetectorEvent::new(px, py, t));
            }
        }
        f_lo = f_hi;
    }
    events
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn frame_out_of_range() {
        let data = empty_data_set(32, 32, 5);
        assert!(data.frame(4).is_ok());
        assert!(matches!(
            data.frame(5),
            Err(DataError::FrameOutOfRange { .. })
        ));
    }

    #[test]
    fn state_count_must_match_frames() {
        let frames = vec![ndarray::Array2::<u32>::zeros((8, 8)); 4];
        let result = DataSet::new(
            1,
            MetaData::new(),
            test_instrument(8, 8),
            scan_states(3, 0.4, 2.67),
            Box::new(MemoryFrames::new(frames)),
        );
        assert!(matches!(result, Err(DataError::InvalidInput(_))));
    }

    #[test]
    fn event_q_round_trip() {
        // q of an event must cross the Ewald sphere back at the same event
        let data = empty_data_set(64, 64, 30);
        let ev = DetectorEvent::new(40.0, 25.0, 12.3);
        let q = data.q_at(&ev).unwrap();
        let events = data.events_for(q);
        assert!(!events.is_empty());
        let best = events
            .iter()
            .min_by(|a, b| {
                (a.frame - ev.frame)
                    .abs()
                    .partial_cmp(&(b.frame - ev.frame).abs())
                    .unwrap()
            })
            .unwrap();
        assert_abs_diff_eq!(best.px, ev.px, epsilon = 1e-3);
        assert_abs_diff_eq!(best.py, ev.py, epsilon = 1e-3);
        assert_abs_diff_eq!(best.frame, ev.frame, epsilon = 1e-3);
    }

    #[test]
    fn q_magnitude_is_physical() {
        // Bragg's law: |q| = 2 sin(theta) / lambda
        let data = empty_data_set(64, 64, 5);
        let ev = DetectorEvent::new(10.0, 32.0, 2.0);
        let q = data.q_at(&ev).unwrap();
        let state = data.interpolated_state(2.0);
        let rest = data.instrument.detector.pixel_position(10.0, 32.0).unwrap();
        let kf = state.kf_lab(rest);
        let two_theta = kf.angle(&state.ki());
        assert_abs_diff_eq!(
            q.norm(),
            2.0 * (two_theta / 2.0).sin() / 2.67,
            epsilon = 1e-9
        );
    }
}

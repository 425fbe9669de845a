// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Refinement of the lattice and the instrument state against indexed
//! observations.
//!
//! The scan is split into contiguous batches of peaks by centre frame. Each
//! batch owns a copy of the unit cell, a copy of the instrument-state
//! sequence and a [`FitParameters`] arena holding the activated parameter
//! sets: the direct basis plus per-state offset blocks for the states in
//! the batch's frame window. Linear equality constraints `C x = 0` reduce
//! the arena to free coordinates `y = P x`; the Levenberg-Marquardt solver
//! iterates on `y`, and every residual evaluation pushes `x = K y` back
//! into the arena before re-predicting the detector-space positions through
//! the Ewald-crossing search.

mod minimizer;
mod params;

pub use minimizer::{minimize, FitReport, JacobianFn, MinimizerOptions, ResidualFn};
pub use params::{FitParameters, ParamId};

use log::{debug, warn};
use nalgebra::{DMatrix, DVector, Matrix3, Rotation3, UnitQuaternion, Vector3};
use thiserror::Error;

use crate::crystal::{CrystalError, UnitCell};
use crate::data::{ewald_events, DataSet};
use crate::instrument::InstrumentState;
use crate::peak::{filter_enabled, Peak};

#[derive(Error, Debug)]
pub enum RefineError {
    #[error("no indexed peaks to refine against")]
    NoPeaks,

    #[error("batch count must be > 0")]
    NoBatches,

    #[error("constraint matrix has {cols} columns for {params} parameters")]
    ConstraintShape { cols: usize, params: usize },

    #[error("constraints leave no free parameters")]
    OverConstrained,

    #[error("residual function failed to evaluate")]
    ResidualEvaluation,

    #[error("refinement did not converge within the iteration budget")]
    NotConverged,

    #[error(transparent)]
    Crystal(#[from] CrystalError),
}

/// The parameter sets a batch may activate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParameterSet {
    CellBasis,
    SamplePosition,
    SampleOrientation,
    DetectorPosition,
    BeamDirection,
    Wavelength,
}

impl ParameterSet {
    /// Arena width of one state's block; the cell basis has a single block
    /// of nine.
    fn state_width(self) -> usize {
        match self {
            ParameterSet::CellBasis => 9,
            ParameterSet::Wavelength => 1,
            _ => 3,
        }
    }
}

#[derive(Clone, Debug)]
pub struct RefineOptions {
    pub n_batches: usize,
    /// Tie the per-state offset blocks of every batch equal through the
    /// constraint kernel; untied states each refine their own offsets.
    pub tie_states: bool,
    pub minimizer: MinimizerOptions,
}

impl Default for RefineOptions {
    fn default() -> RefineOptions {
        RefineOptions {
            n_batches: 1,
            tie_states: true,
            minimizer: MinimizerOptions::default(),
        }
    }
}

/// A residual is missing when a reflection no longer crosses the Ewald
/// sphere; this constant keeps the solver pointed back toward the data.
const MISSING_CROSSING_PENALTY: f64 = 1e3;

#[derive(Clone, Debug)]
struct Observation {
    /// Index of the source peak in the caller's peak list.
    peak_index: usize,
    px: f64,
    py: f64,
    frame: f64,
    hkl: Vector3<f64>,
    /// Cholesky factor of the peak's shape metric; maps detector-space
    /// displacements into shape standard deviations.
    weight: Matrix3<f64>,
}

#[derive(Clone, Debug)]
pub struct RefinementBatch {
    f_min: f64,
    f_max: f64,
    cell: UnitCell,
    states: Vec<InstrumentState>,
    /// Inclusive state-index range covered by the batch's peaks; the
    /// per-state parameter blocks span exactly these states.
    window: (usize, usize),
    observations: Vec<Observation>,
    active: Vec<ParameterSet>,
    params: FitParameters,
    /// Arena layout: `(set, offset, length)` per activated set.
    layout: Vec<(ParameterSet, usize, usize)>,
    cost_trace: Vec<f64>,
    converged: bool,
}

impl RefinementBatch {
    fn new(cell: UnitCell, states: Vec<InstrumentState>, observations: Vec<Observation>) -> Self {
        let f_min = observations
            .iter()
            .map(|o| o.frame)
            .fold(f64::INFINITY, f64::min)
            .floor();
        let f_max = observations
            .iter()
            .map(|o| o.frame)
            .fold(f64::NEG_INFINITY, f64::max)
            .ceil();
        let last = states.len().saturating_sub(1);
        let window = (
            (f_min.max(0.0) as usize).min(last),
            (f_max.max(0.0) as usize).min(last),
        );
        let mut batch = RefinementBatch {
            f_min,
            f_max,
            cell,
            states,
            window,
            observations,
            active: vec![ParameterSet::CellBasis],
            params: FitParameters::new(),
            layout: Vec::new(),
            cost_trace: Vec::new(),
            converged: false,
        };
        batch.rebuild_params();
        batch
    }

    pub fn contains(&self, frame: f64) -> bool {
        frame >= self.f_min - 0.5 && frame <= self.f_max + 0.5
    }

    pub fn cell(&self) -> &UnitCell {
        &self.cell
    }

    pub fn states(&self) -> &[InstrumentState] {
        &self.states
    }

    pub fn n_peaks(&self) -> usize {
        self.observations.len()
    }

    pub fn cost_trace(&self) -> &[f64] {
        &self.cost_trace
    }

    pub fn converged(&self) -> bool {
        self.converged
    }

    pub fn parameters(&self) -> &FitParameters {
        &self.params
    }

    /// Number of states carrying offset blocks.
    pub fn n_window_states(&self) -> usize {
        self.window.1 - self.window.0 + 1
    }

    /// Arena position `(offset, length)` of an activated set.
    pub fn parameter_span(&self, set: ParameterSet) -> Option<(usize, usize)> {
        self.layout
            .iter()
            .find(|(s, _, _)| *s == set)
            .map(|&(_, at, len)| (at, len))
    }

    fn set_active(&mut self, active: &[ParameterSet]) {
        self.active = active.to_vec();
        if !self.active.contains(&ParameterSet::CellBasis) {
            self.active.insert(0, ParameterSet::CellBasis);
        }
        self.rebuild_params();
    }

    /// Lay the activated sets out in a fresh arena: nine entries for the
    /// basis, one block per window state for the rest, zero-initialised
    /// offsets. Rebuilding drops any installed constraints.
    fn rebuild_params(&mut self) {
        let mut params = FitParameters::new();
        let mut layout = Vec::new();
        let n_states = self.n_window_states();
        for &set in &self.active {
            let start = params.n_params();
            match set {
                ParameterSet::CellBasis => {
                    let a = self.cell.basis();
                    for i in 0..3 {
                        for j in 0..3 {
                            params.add(a[(i, j)]);
                        }
                    }
                }
                _ => {
                    for _ in 0..set.state_width() * n_states {
                        params.add(0.0);
                    }
                }
            }
            layout.push((set, start, params.n_params() - start));
        }
        self.params = params;
        self.layout = layout;
    }

    /// Install a constraint matrix `C` (one row per relation `C x = 0`)
    /// over the batch's arena.
    pub fn set_constraints(&mut self, c: &DMatrix<f64>) -> Result<(), RefineError> {
        self.params.set_constraints(c)
    }

    /// Constrain every per-state offset block to a single shared value by
    /// tying consecutive states equal. A batch with only the cell basis
    /// active has nothing to tie and is left unconstrained.
    pub fn tie_states(&mut self) -> Result<(), RefineError> {
        let n_states = self.n_window_states();
        let mut rows: Vec<(usize, usize)> = Vec::new();
        for &(set, at, _) in &self.layout {
            if set == ParameterSet::CellBasis {
                continue;
            }
            let w = set.state_width();
            for s in 0..n_states.saturating_sub(1) {
                for k in 0..w {
                    rows.push((at + s * w + k, at + (s + 1) * w + k));
                }
            }
        }
        if rows.is_empty() {
            self.params.clear_constraints();
            return Ok(());
        }
        let mut c = DMatrix::<f64>::zeros(rows.len(), self.params.n_params());
        for (r, (i, j)) in rows.iter().enumerate() {
            c[(r, *i)] = 1.0;
            c[(r, *j)] = -1.0;
        }
        self.set_constraints(&c)
    }

    /// Realise the arena values as a concrete cell and state sequence.
    fn unpack(&self, x: &[f64]) -> Option<(UnitCell, Vec<InstrumentState>)> {
        let mut cell = self.cell.clone();
        let mut states = self.states.clone();
        for &(set, at, _) in &self.layout {
            match set {
                ParameterSet::CellBasis => {
                    let mut a = Matrix3::zeros();
                    for i in 0..3 {
                        for j in 0..3 {
                            a[(i, j)] = x[at + 3 * i + j];
                        }
                    }
                    let tolerance = cell.indexing_tolerance;
                    let (bravais, centring) = (cell.bravais, cell.centring);
                    cell = UnitCell::from_basis(a).ok()?;
                    cell.indexing_tolerance = tolerance;
                    cell.bravais = bravais;
                    cell.centring = centring;
                }
                _ => {
                    let w = set.state_width();
                    for (k, s) in (self.window.0..=self.window.1).enumerate() {
                        let state = &mut states[s];
                        match set {
                            ParameterSet::SamplePosition => {
                                state.sample_position +=
                                    Vector3::new(x[at + 3 * k], x[at + 3 * k + 1], x[at + 3 * k + 2]);
                            }
                            ParameterSet::SampleOrientation => {
                                let v = Vector3::new(
                                    x[at + 3 * k],
                                    x[at + 3 * k + 1],
                                    x[at + 3 * k + 2],
                                );
                                state.sample_orientation =
                                    UnitQuaternion::from(Rotation3::new(v)) * state.sample_orientation;
                            }
                            ParameterSet::DetectorPosition => {
                                state.detector_position +=
                                    Vector3::new(x[at + 3 * k], x[at + 3 * k + 1], x[at + 3 * k + 2]);
                            }
                            ParameterSet::BeamDirection => {
                                let v = Vector3::new(
                                    x[at + 3 * k],
                                    x[at + 3 * k + 1],
                                    x[at + 3 * k + 2],
                                );
                                // unit norm is restored after the additive update
                                state.beam = (state.beam + v).normalize();
                            }
                            ParameterSet::Wavelength => {
                                state.wavelength += x[at + w * k];
                            }
                            ParameterSet::CellBasis => unreachable!("handled above"),
                        }
                    }
                }
            }
        }
        Some((cell, states))
    }

    fn residuals(&self, data: &DataSet, x: &[f64]) -> Option<DVector<f64>> {
        let (cell, states) = self.unpack(x)?;
        let mut out = DVector::zeros(3 * self.observations.len());
        for (i, obs) in self.observations.iter().enumerate() {
            let q_pred = cell.reciprocal_basis() * obs.hkl;
            let events = ewald_events(&data.instrument, &states, q_pred);
            let best = events
                .iter()
                .filter(|e| self.contains(e.frame))
                .min_by(|a, b| {
                    (a.frame - obs.frame)
                        .abs()
                        .partial_cmp(&(b.frame - obs.frame).abs())
                        .unwrap()
                });
            match best {
                Some(ev) => {
                    let d = Vector3::new(obs.px - ev.px, obs.py - ev.py, obs.frame - ev.frame);
                    let w = obs.weight.transpose() * d;
                    out[3 * i] = w.x;
                    out[3 * i + 1] = w.y;
                    out[3 * i + 2] = w.z;
                }
                None => {
                    out[3 * i] = MISSING_CROSSING_PENALTY;
                    out[3 * i + 1] = MISSING_CROSSING_PENALTY;
                    out[3 * i + 2] = MISSING_CROSSING_PENALTY;
                }
            }
        }
        Some(out)
    }

    /// Run the fit on the reduced coordinates. Returns whether the
    /// minimizer converged; the refined cell and states are kept either way
    /// for inspection.
    pub fn refine(
        &mut self,
        data: &DataSet,
        options: &MinimizerOptions,
    ) -> Result<bool, RefineError> {
        if self.observations.is_empty() {
            return Err(RefineError::NoPeaks);
        }

        let mut params = self.params.clone();
        let mut y = params.reduced();
        let mut f = |y: &DVector<f64>| {
            // push x = K y back into the arena before every evaluation
            params.set_reduced(y);
            self.residuals(data, params.values())
        };
        let report = minimize(&mut y, &mut f, None, options)?;

        params.set_reduced(&y);
        let x = params.values().to_vec();
        self.params = params;
        if let Some((cell, states)) = self.unpack(&x) {
            self.cell = cell;
            let refined = report.converged;
            self.states = states;
            for s in &mut self.states {
                s.refined = refined;
            }
        }
        self.cost_trace = report.cost_trace;
        self.converged = report.converged;
        debug!(
            "batch [{:.0}, {:.0}]: {} peaks, {} free of {} parameters, {} iterations, converged: {}",
            self.f_min,
            self.f_max,
            self.observations.len(),
            self.params.n_free(),
            self.params.n_params(),
            report.iterations,
            report.converged
        );
        Ok(report.converged)
    }
}

pub struct Refiner {
    batches: Vec<RefinementBatch>,
}

impl Refiner {
    /// Partition the indexed, enabled peaks of `peaks` into `n_batches`
    /// contiguous batches by centre frame.
    pub fn new(
        data: &DataSet,
        cell: &UnitCell,
        peaks: &[Peak],
        n_batches: usize,
    ) -> Result<Refiner, RefineError> {
        if n_batches == 0 {
            return Err(RefineError::NoBatches);
        }
        let mut ids: Vec<usize> = filter_enabled(peaks)
            .into_iter()
            .filter(|&i| peaks[i].hkl().is_some())
            .collect();
        if ids.is_empty() {
            return Err(RefineError::NoPeaks);
        }
        ids.sort_by(|&a, &b| {
            peaks[a]
                .centre()
                .frame
                .partial_cmp(&peaks[b].centre().frame)
                .unwrap()
        });

        let to_observation = |&i: &usize| -> Observation {
            let peak = &peaks[i];
            let c = peak.centre();
            let weight = nalgebra::Cholesky::new(*peak.shape().metric())
                .map(|ch| ch.l())
                .unwrap_or_else(Matrix3::identity);
            Observation {
                peak_index: i,
                px: c.px,
                py: c.py,
                frame: c.frame,
                hkl: peak.hkl().expect("filtered to indexed peaks").vector(),
                weight,
            }
        };

        let batch_size = ids.len() as f64 / n_batches as f64;
        let mut batches = Vec::new();
        let mut bucket: Vec<Observation> = Vec::new();
        let mut current = 0usize;
        for (i, id) in ids.iter().enumerate() {
            bucket.push(to_observation(id));
            if (i + 1) as f64 + 0.1 >= (current + 1) as f64 * batch_size {
                if !bucket.is_empty() {
                    batches.push(RefinementBatch::new(
                        cell.clone(),
                        data.states().to_vec(),
                        std::mem::take(&mut bucket),
                    ));
                }
                current += 1;
            }
        }
        if !bucket.is_empty() {
            batches.push(RefinementBatch::new(
                cell.clone(),
                data.states().to_vec(),
                bucket,
            ));
        }

        Ok(Refiner { batches })
    }

    pub fn batches(&self) -> &[RefinementBatch] {
        &self.batches
    }

    /// Mutable batch access for custom per-batch constraints.
    pub fn batches_mut(&mut self) -> &mut [RefinementBatch] {
        &mut self.batches
    }

    /// Activate parameter sets on every batch; the direct basis is always
    /// refined. Rebuilding the arenas drops any installed constraints.
    pub fn set_parameters(&mut self, sets: &[ParameterSet]) {
        for batch in &mut self.batches {
            batch.set_active(sets);
        }
    }

    /// Refine every batch. When `tie_states` is set the per-state offset
    /// blocks are first tied equal through the constraint kernel. Fails on
    /// the first batch that errors; a batch that merely fails to converge
    /// is logged and reported in the return value, matching the per-item
    /// policy of the pipeline.
    pub fn refine(&mut self, data: &DataSet, options: &RefineOptions) -> Result<bool, RefineError> {
        let mut all_converged = true;
        for batch in &mut self.batches {
            if options.tie_states {
                batch.tie_states()?;
            }
            match batch.refine(data, &options.minimizer) {
                Ok(true) => {}
                Ok(false) => {
                    warn!(
                        "batch [{:.0}, {:.0}] did not converge",
                        batch.f_min, batch.f_max
                    );
                    all_converged = false;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(all_converged)
    }

    /// Re-predict the centres of the given peaks from their batch's refined
    /// cell and states. Peaks whose reflection no longer produces a single
    /// crossing are deselected. Returns the number of updated peaks.
    pub fn update_predictions(&self, peaks: &mut [Peak], data: &DataSet) -> usize {
        let mut updated = 0;
        for batch in &self.batches {
            for obs in &batch.observations {
                let peak = &mut peaks[obs.peak_index];
                if !peak.enabled() {
                    continue;
                }
                let q_pred = batch.cell.reciprocal_basis() * obs.hkl;
                let events: Vec<_> = ewald_events(&data.instrument, &batch.states, q_pred)
                    .into_iter()
                    .filter(|e| batch.contains(e.frame))
                    .collect();
                if events.len() != 1 {
                    peak.selected = false;
                    continue;
                }
                let ev = events[0];
                let metric = *peak.shape().metric();
                match crate::geometry::Ellipsoid::new(
                    Vector3::new(ev.px, ev.py, ev.frame),
                    metric,
                ) {
                    Ok(shape) => {
                        peak.set_shape(shape);
                        updated += 1;
                    }
                    Err(_) => peak.selected = false,
                }
            }
        }
        updated
    }
}

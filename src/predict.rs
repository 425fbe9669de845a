// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Peak prediction.
//!
//! Every reflection of the cell inside the requested resolution shell is
//! mapped to its Ewald crossings; each crossing becomes a predicted peak
//! whose shape comes from the shape library, interpolated over the
//! neighbouring observed reflections, pushed from the standard frame to
//! detector coordinates through the local Jacobian.

use log::{debug, warn};
use nalgebra::Matrix3;
use rayon::prelude::*;
use thiserror::Error;

use crate::crystal::{CrystalError, SpaceGroup, UnitCell};
use crate::data::{DataError, DataSet};
use crate::geometry::{Ellipsoid, GeometryError};
use crate::peak::{
    CellId, DataSetId, InterpolationMode, Peak, PeakCoordinateSystem, ShapeLibrary,
};
use crate::progress::ProgressHandler;

#[derive(Error, Debug)]
pub enum PredictError {
    #[error("resolution shell is empty or inverted: d_min {d_min}, d_max {d_max}")]
    BadShell { d_min: f64, d_max: f64 },

    #[error(transparent)]
    Data(#[from] DataError),

    #[error(transparent)]
    Crystal(#[from] CrystalError),

    #[error(transparent)]
    Geometry(#[from] GeometryError),
}

#[derive(Clone, Debug)]
pub struct PredictorParameters {
    pub d_min: f64,
    pub d_max: f64,
    /// Miller-space neighbour radius for shape interpolation.
    pub radius: f64,
    /// Frame window for shape interpolation.
    pub n_frames: f64,
    pub min_neighbours: usize,
    pub mode: InterpolationMode,
}

impl Default for PredictorParameters {
    fn default() -> PredictorParameters {
        PredictorParameters {
            d_min: 1.5,
            d_max: 50.0,
            radius: 3.0,
            n_frames: 10.0,
            min_neighbours: 3,
            mode: InterpolationMode::Mean,
        }
    }
}

/// Predict the peaks of `cell` over a numor.
///
/// Reflections forbidden by the cell's space group are skipped when the
/// group is known. Crossings whose shape cannot be realised on the detector
/// (degenerate Jacobian at the very edge) are logged and dropped.
pub fn predict_peaks(
    data: &DataSet,
    data_id: DataSetId,
    cell: &UnitCell,
    cell_id: CellId,
    library: &ShapeLibrary,
    params: &PredictorParameters,
    progress: &dyn ProgressHandler,
) -> Result<Vec<Peak>, PredictError> {
    if params.d_min <= 0.0 || params.d_max <= params.d_min {
        return Err(PredictError::BadShell {
            d_min: params.d_min,
            d_max: params.d_max,
        });
    }

    let group = match &cell.space_group {
        Some(symbol) => Some(SpaceGroup::new(symbol)?),
        None => None,
    };

    let reflections = cell.reflections_in_shell(params.d_min, params.d_max);
    debug!(
        "{} reflections in the {:.2}..{:.2} A shell",
        reflections.len(),
        params.d_min,
        params.d_max
    );
    progress.begin("Predicting peaks", reflections.len() as u64);

    let peaks: Vec<Peak> = reflections
        .into_par_iter()
        .filter_map(|hkl| {
            if progress.should_abort() {
                return None;
            }
            if let Some(group) = &group {
                if group.is_extinct(hkl) {
                    progress.advance(1);
                    return None;
                }
            }

            let events = data.events_for(cell.q_of(hkl));
            let mut out = Vec::new();
            for ev in events {
                let metric_std = library.assign(
                    hkl,
                    ev.frame,
                    params.radius,
                    params.n_frames,
                    params.min_neighbours,
                    params.mode,
                );

                // seed peak to anchor the standard frame at the event
                let seed = match Ellipsoid::new(ev.coords(), Matrix3::identity()) {
                    Ok(e) => Peak::new(e, data_id),
                    Err(_) => continue,
                };
                let frame = match PeakCoordinateSystem::new(&seed, data) {
                    Ok(f) => f,
                    Err(e) => {
                        warn!("predicted reflection {hkl} at frame {:.1}: {e}", ev.frame);
                        continue;
                    }
                };
                let j = frame.jacobian(data);
                let metric_det = j.transpose() * metric_std * j;
                let shape =
                    match Ellipsoid::new(ev.coords(), 0.5 * (metric_det + metric_det.transpose()))
                    {
                        Ok(s) => s,
                        Err(e) => {
                            warn!("predicted reflection {hkl} at frame {:.1}: {e}", ev.frame);
                            continue;
                        }
                    };

                let mut peak = Peak::new(shape, data_id);
                peak.predicted = true;
                peak.set_hkl(hkl, cell_id);
                out.push(peak);
            }
            progress.advance(1);
            if out.is_empty() {
                None
            } else {
                Some(out)
            }
        })
        .flatten()
        .collect();

    if progress.should_abort() {
        progress.finish("Prediction aborted");
        return Ok(Vec::new());
    }
    progress.finish("Prediction finished");
    debug!("{} peaks predicted", peaks.len());
    Ok(peaks)
}

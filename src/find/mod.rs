// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The blob finder: 3-D connected-component segmentation of a frame stack.
//!
//! Frames are read by a producer thread and convolved with the configured
//! kernel; the labelling pass runs in frame order on the consumer side
//! because cross-frame unions need the previous frame's labels fully
//! resolved. Above-threshold pixels are labelled with a union-find over
//! in-frame 4-neighbours and the pixel directly behind in the previous
//! frame; blob moments accumulate incrementally so the whole pass is linear
//! in pixel count.

mod blob;
mod convolver;

pub use blob::Blob3D;
pub use convolver::{Convolver, KernelKind};

use std::collections::HashMap;
use std::thread;

use crossbeam_channel::bounded;
use log::{debug, warn};
use ndarray::Array2;
use thiserror::Error;

use crate::data::{DataError, DataSet};
use crate::geometry::{Aabb, GeometryError, Octree};
use crate::peak::{DataSetId, Intensity, Peak};
use crate::progress::ProgressHandler;

#[derive(Error, Debug)]
pub enum FindError {
    #[error(transparent)]
    Data(#[from] DataError),

    #[error(transparent)]
    Geometry(#[from] GeometryError),

    #[error("threshold must be > 0, got {0}")]
    BadThreshold(f64),

    #[error("peak scale must be > 0, got {0}")]
    BadScale(f64),
}

#[derive(Clone, Debug)]
pub struct FinderParameters {
    pub kernel: KernelKind,
    /// Pixels whose filtered value exceeds this are labelled.
    pub threshold: f64,
    /// Interpret `threshold` as a multiple of the frame mean instead of an
    /// absolute filtered count.
    pub relative_threshold: bool,
    /// Semi-axis scale of the fitted ellipsoids, in standard deviations.
    pub peak_scale: f64,
    /// Blobs spanning fewer pixels are noise.
    pub min_components: usize,
    /// Blobs spanning more pixels are artefacts (powder lines, shadows).
    pub max_components: usize,
    /// Detector regions to exclude; peaks colliding with one are masked.
    pub masks: Vec<Aabb>,
}

impl Default for FinderParameters {
    fn default() -> FinderParameters {
        FinderParameters {
            kernel: KernelKind::default(),
            threshold: 80.0,
            relative_threshold: false,
            peak_scale: 1.0,
            min_components: 30,
            max_components: 10_000,
            masks: Vec::new(),
        }
    }
}

/// Union-find over blob labels.
struct Labels {
    parent: Vec<usize>,
}

impl Labels {
    fn new() -> Labels {
        Labels { parent: Vec::new() }
    }

    fn fresh(&mut self) -> usize {
        let id = self.parent.len();
        self.parent.push(id);
        id
    }

    fn find(&mut self, mut id: usize) -> usize {
        while self.parent[id] != id {
            // path halving
            self.parent[id] = self.parent[self.parent[id]];
            id = self.parent[id];
        }
        id
    }

    fn union(&mut self, a: usize, b: usize) -> usize {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra != rb {
            let (lo, hi) = (ra.min(rb), ra.max(rb));
            self.parent[hi] = lo;
            lo
        } else {
            ra
        }
    }
}

/// Find peaks in a numor.
///
/// Returns the ordered peak list; an abort through the progress handler
/// yields an empty list. Blobs that fail the moment analysis are logged and
/// skipped rather than failing the whole pass.
pub fn find_peaks(
    data: &DataSet,
    data_id: DataSetId,
    params: &FinderParameters,
    progress: &dyn ProgressHandler,
) -> Result<Vec<Peak>, FindError> {
    if params.threshold <= 0.0 {
        return Err(FindError::BadThreshold(params.threshold));
    }
    if params.peak_scale <= 0.0 {
        return Err(FindError::BadScale(params.peak_scale));
    }

    let n_frames = data.n_frames();
    let (n_rows, n_cols) = (data.n_rows(), data.n_cols());
    progress.begin("Finding blobs", n_frames as u64);

    let mut labels = Labels::new();
    let mut blobs: Vec<Blob3D> = Vec::new();
    let mut prev: Array2<usize> = Array2::from_elem((n_rows, n_cols), usize::MAX);
    let mut aborted = false;

    // Producer reads and filters frames ahead of the labelling pass; the
    // kernel transform cache lives with the convolver on that side.
    let (tx, rx) = bounded::<(usize, Result<Array2<f64>, DataError>)>(4);
    let kernel = params.kernel;
    thread::scope(|scope| {
        scope.spawn(move || {
            let mut convolver = Convolver::new(kernel);
            for i in 0..n_frames {
                let filtered = data
                    .frame(i)
                    .map(|frame| convolver.convolve(&frame.mapv(|c| c as f64)));
                // the consumer only hangs up early on abort
                if tx.send((i, filtered)).is_err() {
                    break;
                }
            }
        });

        let mut current: Array2<usize> = Array2::from_elem((n_rows, n_cols), usize::MAX);
        for (i, filtered) in rx.iter() {
            if progress.should_abort() {
                aborted = true;
                break;
            }
            let filtered = match filtered {
                Ok(f) => f,
                Err(e) => {
                    // a corrupt frame is unrecoverable for the labelling pass
                    warn!("frame {i}: {e}");
                    aborted = true;
                    break;
                }
            };

            let cut = if params.relative_threshold {
                params.threshold * filtered.mean().unwrap_or(0.0).max(0.0)
            } else {
                params.threshold
            };

            current.fill(usize::MAX);
            for r in 0..n_rows {
                for c in 0..n_cols {
                    let value = filtered[(r, c)];
                    if value <= cut {
                        continue;
                    }
                    // in-frame 4-neighbours already visited, plus the pixel
                    // behind in the previous frame
                    let mut label = usize::MAX;
                    for neighbour in [
                        if r > 0 { current[(r - 1, c)] } else { usize::MAX },
                        if c > 0 { current[(r, c - 1)] } else { usize::MAX },
                        prev[(r, c)],
                    ] {
                        if neighbour == usize::MAX {
                            continue;
                        }
                        label = if label == usize::MAX {
                            labels.find(neighbour)
                        } else {
                            labels.union(label, neighbour)
                        };
                    }
                    if label == usize::MAX {
                        label = labels.fresh();
                        blobs.push(Blob3D::new());
                    }
                    current[(r, c)] = label;
                    let root = labels.find(label);
                    blobs[root].add_point(c as f64, r as f64, i as f64, value.max(0.0));
                }
            }
            std::mem::swap(&mut prev, &mut current);
            progress.advance(1);
        }
        drop(rx);
    });

    if aborted {
        progress.finish("Blob search aborted");
        return Ok(Vec::new());
    }

    // resolve the union-find: merge every blob into its root
    let mut merged: HashMap<usize, Blob3D> = HashMap::new();
    for id in 0..blobs.len() {
        let root = labels.find(id);
        let blob = std::mem::take(&mut blobs[id]);
        if blob.n_points() == 0 {
            continue;
        }
        merged
            .entry(root)
            .and_modify(|b| b.merge(&blob))
            .or_insert(blob);
    }
    debug!("{} raw blobs after labelling", merged.len());

    let mut final_blobs: Vec<Blob3D> = merged
        .into_values()
        .filter(|b| b.n_points() >= params.min_components && b.n_points() <= params.max_components)
        .collect();

    // merge blobs whose scaled ellipsoids still collide, using an octree to
    // prune the candidate pairs; one merge per round until quiescent
    loop {
        let shapes: Vec<(usize, crate::geometry::Ellipsoid)> = final_blobs
            .iter()
            .enumerate()
            .filter_map(|(i, b)| b.to_ellipsoid(params.peak_scale).ok().map(|e| (i, e)))
            .collect();
        if shapes.len() < 2 {
            break;
        }
        let mut lower = nalgebra::Vector3::repeat(f64::INFINITY);
        let mut upper = nalgebra::Vector3::repeat(f64::NEG_INFINITY);
        for (_, shape) in &shapes {
            let bb = shape.aabb();
            for k in 0..3 {
                lower[k] = lower[k].min(bb.lower()[k]);
                upper[k] = upper[k].max(bb.upper()[k]);
            }
        }
        let mut tree = Octree::new(lower, upper);
        for (_, shape) in &shapes {
            tree.add(shape.aabb());
        }
        let hits = tree.collisions(|a, b| shapes[a].1.collide(&shapes[b].1));
        match hits.iter().next() {
            Some(&(a, b)) => {
                let (ia, ib) = (shapes[a].0, shapes[b].0);
                let blob = final_blobs.remove(ia.max(ib));
                final_blobs[ia.min(ib)].merge(&blob);
            }
            None => break,
        }
    }

    // blob -> ellipsoid -> peak
    let mut peaks = Vec::with_capacity(final_blobs.len());
    for blob in &final_blobs {
        let shape = match blob.to_ellipsoid(params.peak_scale) {
            Ok(e) => e,
            Err(e) => {
                warn!("blob at {:?} skipped: {e}", blob.centre().ok());
                continue;
            }
        };
        let masked = params.masks.iter().any(|m| shape.collide_aabb(m));
        let mut peak = Peak::new(shape, data_id);
        peak.raw_intensity = Intensity::counts(blob.mass());
        peak.masked = masked;
        peaks.push(peak);
    }

    peaks.sort_by(|p, q| {
        let (a, b) = (p.centre(), q.centre());
        (a.frame, a.px, a.py)
            .partial_cmp(&(b.frame, b.px, b.py))
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    progress.finish("Finished blob search");
    debug!("{} peaks after filtering", peaks.len());
    Ok(peaks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::test_support::data_set_with_frames;
    use crate::progress::{AbortFlag, SilentProgress};
    use approx::assert_abs_diff_eq;
    use ndarray::Array2;

    /// A Gaussian spot spanning a few frames on a quiet background.
    fn synthetic_stack(
        n: usize,
        size: usize,
        spots: &[(f64, f64, f64, f64)],
    ) -> Vec<Array2<u32>> {
        (0..n)
            .map(|f| {
                let mut img = Array2::<u32>::zeros((size, size));
                for r in 0..size {
                    for c in 0..size {
                        let mut v = 1.0;
                        for &(cx, cy, cf, amp) in spots {
                            let d2 = ((c as f64 - cx) / 2.0).powi(2)
                                + ((r as f64 - cy) / 2.0).powi(2)
                                + ((f as f64 - cf) / 1.5).powi(2);
                            v += amp * (-0.5 * d2).exp();
                        }
                        img[(r, c)] = v.round() as u32;
                    }
                }
                img
            })
            .collect()
    }

    fn default_params(threshold: f64) -> FinderParameters {
        FinderParameters {
            kernel: KernelKind::Delta,
            threshold,
            relative_threshold: false,
            peak_scale: 2.0,
            min_components: 10,
            max_components: 100_000,
            masks: Vec::new(),
        }
    }

    #[test]
    fn finds_an_isolated_spot() {
        let frames = synthetic_stack(20, 48, &[(24.0, 20.0, 10.0, 500.0)]);
        let data = data_set_with_frames(frames, 0.4);
        let peaks = find_peaks(
            &data,
            DataSetId(0),
            &default_params(20.0),
            &SilentProgress,
        )
        .unwrap();
        assert_eq!(peaks.len(), 1);
        let c = peaks[0].centre();
        assert_abs_diff_eq!(c.px, 24.0, epsilon = 0.2);
        assert_abs_diff_eq!(c.py, 20.0, epsilon = 0.2);
        assert_abs_diff_eq!(c.frame, 10.0, epsilon = 0.2);
        assert!(peaks[0].raw_intensity.value > 0.0);
    }

    #[test]
    fn separates_two_distant_spots() {
        let frames = synthetic_stack(
            24,
            64,
            &[(16.0, 16.0, 8.0, 400.0), (48.0, 48.0, 16.0, 400.0)],
        );
        let data = data_set_with_frames(frames, 0.4);
        let peaks = find_peaks(
            &data,
            DataSetId(0),
            &default_params(20.0),
            &SilentProgress,
        )
        .unwrap();
        assert_eq!(peaks.len(), 2);
        // ordered by frame
        assert!(peaks[0].centre().frame < peaks[1].centre().frame);
    }

    #[test]
    fn component_bounds_reject_noise_and_monsters() {
        let frames = synthetic_stack(20, 48, &[(24.0, 20.0, 10.0, 500.0)]);
        let data = data_set_with_frames(frames, 0.4);
        let mut params = default_params(20.0);
        params.min_components = 100_000;
        let peaks = find_peaks(&data, DataSetId(0), &params, &SilentProgress).unwrap();
        assert!(peaks.is_empty());
    }

    #[test]
    fn masked_regions_flag_peaks() {
        let frames = synthetic_stack(20, 48, &[(24.0, 20.0, 10.0, 500.0)]);
        let data = data_set_with_frames(frames, 0.4);
        let mut params = default_params(20.0);
        params.masks = vec![Aabb::new(
            nalgebra::Vector3::new(20.0, 16.0, 0.0),
            nalgebra::Vector3::new(28.0, 24.0, 20.0),
        )];
        let peaks = find_peaks(&data, DataSetId(0), &params, &SilentProgress).unwrap();
        assert_eq!(peaks.len(), 1);
        assert!(peaks[0].masked);
        assert!(!peaks[0].enabled());
    }

    #[test]
    fn abort_returns_empty() {
        let frames = synthetic_stack(20, 48, &[(24.0, 20.0, 10.0, 500.0)]);
        let data = data_set_with_frames(frames, 0.4);
        let flag = AbortFlag::new();
        flag.abort();
        let peaks = find_peaks(&data, DataSetId(0), &default_params(20.0), &flag).unwrap();
        assert!(peaks.is_empty());
    }

    #[test]
    fn bad_parameters_are_rejected() {
        let frames = synthetic_stack(4, 16, &[]);
        let data = data_set_with_frames(frames, 0.4);
        assert!(matches!(
            find_peaks(&data, DataSetId(0), &default_params(0.0), &SilentProgress),
            Err(FindError::BadThreshold(_))
        ));
    }
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! FFT auto-indexing.
//!
//! Candidate direct-lattice vectors come from one-dimensional projections:
//! for each direction on a near-uniform sphere sampling, the observed q
//! vectors are projected and histogrammed, and a periodic structure in the
//! histogram shows up as a harmonic in its Fourier spectrum. The best
//! triples of candidate vectors are Niggli-reduced, classified with the
//! Gruber decision table, polished by a linear least-squares fit of the
//! reciprocal basis against the indexed observations, and ranked by the
//! fraction of observations they index.

use itertools::Itertools;
use log::debug;
use nalgebra::{Matrix3, Vector3};
use num_complex::Complex;
use rustfft::FftPlanner;

use crate::progress::ProgressHandler;

use super::{gruber_reduce, niggli_reduce, CrystalError, UnitCell};

#[derive(Clone, Debug)]
pub struct IndexerParameters {
    /// Largest plausible direct-lattice edge, angstroms.
    pub maxdim: f64,
    /// Number of sphere directions to scan.
    pub n_vertices: usize,
    /// Histogram subdivision per reciprocal period.
    pub subdiv: usize,
    pub indexing_tolerance: f64,
    pub niggli_tolerance: f64,
    pub gruber_tolerance: f64,
    /// Candidate triples spanning less volume than this are rejected.
    pub min_cell_volume: f64,
    /// Metric-tensor tolerance under which two solutions are the same.
    pub cell_equivalence_tolerance: f64,
    /// Number of solutions to report.
    pub n_solutions: usize,
    /// Number of top-quality candidate vectors to combine into triples.
    pub n_candidates: usize,
}

impl Default for IndexerParameters {
    fn default() -> IndexerParameters {
        IndexerParameters {
            maxdim: 200.0,
            n_vertices: 4000,
            subdiv: 25,
            indexing_tolerance: 0.2,
            niggli_tolerance: 1e-3,
            gruber_tolerance: 4e-2,
            min_cell_volume: 20.0,
            cell_equivalence_tolerance: 0.01,
            n_solutions: 10,
            n_candidates: 12,
        }
    }
}

#[derive(Clone, Debug)]
pub struct IndexerSolution {
    pub cell: UnitCell,
    /// Fraction of the observations the cell indexes, 0 to 100.
    pub percent_indexed: f64,
}

/// A candidate direct-lattice vector with its spectral quality.
#[derive(Clone, Debug)]
struct TVector {
    vector: Vector3<f64>,
    quality: f64,
}

pub struct AutoIndexer {
    params: IndexerParameters,
}

impl AutoIndexer {
    pub fn new(params: IndexerParameters) -> AutoIndexer {
        AutoIndexer { params }
    }

    /// Index a set of observed q vectors.
    pub fn index(
        &self,
        qs: &[Vector3<f64>],
        progress: &dyn ProgressHandler,
    ) -> Result<Vec<IndexerSolution>, CrystalError> {
        if qs.len() < 10 {
            return Err(CrystalError::TooFewObservations(qs.len()));
        }

        let candidates = self.find_candidate_vectors(qs, progress);
        if progress.should_abort() {
            return Ok(Vec::new());
        }
        debug!("{} candidate direct-lattice vectors", candidates.len());

        let solutions = self.rank_triples(qs, &candidates)?;
        Ok(solutions)
    }

    /// Scan sphere directions and collect the strongest periodicities.
    fn find_candidate_vectors(
        &self,
        qs: &[Vector3<f64>],
        progress: &dyn ProgressHandler,
    ) -> Vec<TVector> {
        let q_max = qs.iter().map(|q| q.norm()).fold(0.0, f64::max);
        let mut n_points =
            (2.0 * q_max * self.params.subdiv as f64 * self.params.maxdim).ceil() as usize;
        if n_points % 2 == 1 {
            n_points += 1;
        }
        let n_half = n_points / 2;
        let dq_inv = n_points as f64 / (2.0 * q_max);

        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(n_points);

        // golden-ratio spiral over the upper hemisphere: opposite directions
        // carry the same information
        let golden = std::f64::consts::PI * (3.0 - 5.0_f64.sqrt());
        let mut result: Vec<TVector> = Vec::new();
        progress.begin("Scanning directions", self.params.n_vertices as u64);
        let mut hist = vec![Complex::new(0.0, 0.0); n_points];

        for v in 0..self.params.n_vertices {
            if progress.should_abort() {
                return Vec::new();
            }
            let z = (v as f64 + 0.5) / self.params.n_vertices as f64; // (0, 1]
            let r = (1.0 - z * z).max(0.0).sqrt();
            let phi = golden * v as f64;
            let n = Vector3::new(r * phi.cos(), r * phi.sin(), z);

            for h in hist.iter_mut() {
                *h = Complex::new(0.0, 0.0);
            }
            for q in qs {
                let proj = q.dot(&n);
                let mut index = ((proj + q_max) * dq_inv).floor() as isize;
                index = index.clamp(0, n_points as isize - 1);
                hist[index as usize].re += 1.0;
            }

            fft.process(&mut hist);

            // first spectral peak above 70% of the direct current term
            let f_zero = hist[0].norm();
            let mut pos_max = 0usize;
            let mut value = 0.0;
            for (i, h) in hist.iter().enumerate().take(n_half).skip(self.params.subdiv / 2) {
                let current = h.norm();
                if current < 0.7 * f_zero {
                    continue;
                }
                if current > value {
                    value = current;
                    pos_max = i;
                } else {
                    break;
                }
            }
            if pos_max > 2 {
                let length = pos_max as f64 * (self.params.subdiv as f64 * self.params.maxdim)
                    / n_points as f64;
                result.push(TVector {
                    vector: n * length,
                    quality: value,
                });
            }
            progress.advance(1);
        }
        progress.finish("Direction scan finished");

        result.sort_by(|a, b| b.quality.partial_cmp(&a.quality).unwrap());
        result.truncate(self.params.n_candidates.max(3));
        result
    }

    /// Build, classify, polish and rank cells from candidate triples.
    fn rank_triples(
        &self,
        qs: &[Vector3<f64>],
        candidates: &[TVector],
    ) -> Result<Vec<IndexerSolution>, CrystalError> {
        let mut solutions: Vec<IndexerSolution> = Vec::new();
        let mut saw_triple = false;

        for (ti, tj, tk) in candidates.iter().tuple_combinations() {
            let (a, b, c) = (ti.vector, tj.vector, tk.vector);
            let volume = a.cross(&b).dot(&c).abs();
            if volume < self.params.min_cell_volume {
                continue;
            }
            saw_triple = true;

            let cell = match self.build_cell(a, b, c) {
                Ok(cell) => cell,
                Err(_) => continue,
            };
            let solution = match self.polish(qs, cell) {
                Some(solution) => solution,
                None => continue,
            };

            // merge with an equivalent earlier solution if any
            let duplicate = solutions.iter_mut().find(|s| {
                s.cell
                    .equivalent(&solution.cell, self.params.cell_equivalence_tolerance)
            });
            match duplicate {
                Some(existing) => {
                    if solution.percent_indexed > existing.percent_indexed {
                        *existing = solution;
                    }
                }
                None => solutions.push(solution),
            }
        }

        if solutions.is_empty() {
            return Err(if saw_triple {
                CrystalError::TooFewObservations(qs.len())
            } else {
                CrystalError::CoplanarBasis
            });
        }

        solutions.sort_by(|a, b| {
            b.percent_indexed
                .partial_cmp(&a.percent_indexed)
                .unwrap()
                .then(
                    a.cell
                        .volume()
                        .partial_cmp(&b.cell.volume())
                        .unwrap(),
                )
        });
        solutions.truncate(self.params.n_solutions);
        Ok(solutions)
    }

    /// Niggli-reduce and classify a candidate basis.
    fn build_cell(
        &self,
        a: Vector3<f64>,
        b: Vector3<f64>,
        c: Vector3<f64>,
    ) -> Result<UnitCell, CrystalError> {
        let mut cell = UnitCell::from_direct_vectors(a, b, c)?;
        cell.indexing_tolerance = self.params.indexing_tolerance;

        let (reduced, p) = niggli_reduce(&cell.metric(), self.params.niggli_tolerance)?;
        cell.transform(&p)?;
        let gruber = gruber_reduce(&reduced, self.params.gruber_tolerance)?;
        cell.transform(&gruber.transform)?;
        cell.bravais = gruber.bravais;
        cell.centring = gruber.centring;
        Ok(cell)
    }

    /// Index the observations with a candidate cell and re-fit the
    /// reciprocal basis to them by linear least squares. The re-fit turns a
    /// histogram-quantised guess into the exact lattice when the
    /// assignments are right.
    fn polish(&self, qs: &[Vector3<f64>], cell: UnitCell) -> Option<IndexerSolution> {
        let mut cell = cell;
        for _ in 0..3 {
            let mut hh = Matrix3::<f64>::zeros();
            let mut qh = Matrix3::<f64>::zeros();
            let mut n_indexed = 0usize;
            for q in qs {
                if let Some(hkl) = cell.index_q(*q, self.params.indexing_tolerance) {
                    let h = hkl.vector();
                    hh += h * h.transpose();
                    qh += q * h.transpose();
                    n_indexed += 1;
                }
            }
            if n_indexed < 3 {
                return None;
            }
            let hh_inv = hh.try_inverse()?;
            let b = qh * hh_inv;
            let refit = UnitCell::from_reciprocal_vectors(
                b.column(0).into(),
                b.column(1).into(),
                b.column(2).into(),
            )
            .ok()?;
            let mut refit = refit;
            refit.indexing_tolerance = cell.indexing_tolerance;
            refit.bravais = cell.bravais;
            refit.centring = cell.centring;
            cell = refit;
        }

        let n_indexed = qs
            .iter()
            .filter(|q| cell.index_q(**q, self.params.indexing_tolerance).is_some())
            .count();
        Some(IndexerSolution {
            percent_indexed: 100.0 * n_indexed as f64 / qs.len() as f64,
            cell,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::SilentProgress;
    use approx::assert_abs_diff_eq;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    const DEG: f64 = std::f64::consts::PI / 180.0;

    fn qs_of_cell(cell: &UnitCell, d_min: f64, d_max: f64, every: usize) -> Vec<Vector3<f64>> {
        cell.reflections_in_shell(d_min, d_max)
            .into_iter()
            .step_by(every)
            .map(|hkl| cell.q_of(hkl))
            .collect()
    }

    // A coarse histogram subdivision keeps the spectral search window open
    // down to the shortest cell edges of the test lattices.
    fn test_params(maxdim: f64, n_vertices: usize) -> IndexerParameters {
        IndexerParameters {
            maxdim,
            n_vertices,
            subdiv: 10,
            ..IndexerParameters::default()
        }
    }

    #[test]
    fn too_few_observations() {
        let indexer = AutoIndexer::new(IndexerParameters::default());
        let qs = vec![Vector3::new(0.1, 0.0, 0.0); 3];
        assert!(matches!(
            indexer.index(&qs, &SilentProgress),
            Err(CrystalError::TooFewObservations(_))
        ));
    }

    #[test]
    fn indexes_an_orthorhombic_lattice() {
        let cell = UnitCell::from_parameters(
            46.3559,
            59.9255,
            85.5735,
            90.0 * DEG,
            90.0 * DEG,
            90.0 * DEG,
        )
        .unwrap();
        // low-order reflections: the coarse FFT length estimate must keep
        // the fractional index error inside the tolerance on the first
        // pass, and the spectral search only sees periods above
        // subdiv / (4 qmax)
        let qs = qs_of_cell(&cell, 10.0, 80.0, 1);
        assert!(qs.len() > 500);

        let indexer = AutoIndexer::new(test_params(95.0, 8000));
        let solutions = indexer.index(&qs, &SilentProgress).unwrap();
        assert!(!solutions.is_empty());

        let best = &solutions[0];
        assert!(
            best.percent_indexed >= 99.9,
            "best solution only indexes {:.2}%",
            best.percent_indexed
        );
        // the least-squares polish recovers the lattice to machine noise
        let mut lengths = [best.cell.a(), best.cell.b(), best.cell.c()];
        lengths.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert_abs_diff_eq!(lengths[0], 46.3559, epsilon = 1e-6);
        assert_abs_diff_eq!(lengths[1], 59.9255, epsilon = 1e-6);
        assert_abs_diff_eq!(lengths[2], 85.5735, epsilon = 1e-6);
        assert_abs_diff_eq!(best.cell.alpha(), 90.0 * DEG, epsilon = 1e-9);
        assert_abs_diff_eq!(best.cell.beta(), 90.0 * DEG, epsilon = 1e-9);
        assert_abs_diff_eq!(best.cell.gamma(), 90.0 * DEG, epsilon = 1e-9);
    }

    #[test]
    fn indexes_a_rotated_monoclinic_lattice_with_noise() {
        let cell =
            UnitCell::from_parameters(26.0, 32.0, 40.0, 90.0 * DEG, 102.0 * DEG, 90.0 * DEG)
                .unwrap();
        let rot = nalgebra::Rotation3::from_euler_angles(0.4, -0.7, 1.1);
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let qs: Vec<Vector3<f64>> = cell
            .reflections_in_shell(5.0, 60.0)
            .into_iter()
            .step_by(2)
            .map(|hkl| {
                let noise = Vector3::new(
                    rng.gen_range(-1e-4..1e-4),
                    rng.gen_range(-1e-4..1e-4),
                    rng.gen_range(-1e-4..1e-4),
                );
                rot * cell.q_of(hkl) + noise
            })
            .collect();
        assert!(qs.len() > 100);

        let indexer = AutoIndexer::new(test_params(45.0, 6000));
        let solutions = indexer.index(&qs, &SilentProgress).unwrap();
        let best = &solutions[0];
        assert!(
            best.percent_indexed >= 95.0,
            "best solution only indexes {:.2}%",
            best.percent_indexed
        );
        // cell volume survives reduction and polish
        assert_abs_diff_eq!(best.cell.volume(), cell.volume(), epsilon = 50.0);
    }
}

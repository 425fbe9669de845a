// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The command-line driver: one subcommand per pipeline stage.
//!
//! Peak lists and unit cells travel between stages in session files; raw
//! frames are read from the ILL ASCII format against a YAML instrument
//! description. Per-item failures are printed and skipped; anything else
//! maps onto the exit codes 1 (invalid input), 2 (convergence failure) and
//! 3 (I/O).

use std::path::{Path, PathBuf};
use std::str::FromStr;

use clap::{Parser, Subcommand};
use log::{info, warn};

use crate::crystal::{AutoIndexer, IndexerParameters, SpaceGroup, UnitCell};
use crate::data::{ill_ascii, DataSet};
use crate::error::HklReduceError;
use crate::find::{find_peaks, FinderParameters, KernelKind};
use crate::instrument::load_instrument;
use crate::integrate::{integrate_peaks, IntegrationMethod, IntegrationParameters};
use crate::merge::{shell_statistics, statistics, MergeObservation, MergedData};
use crate::peak::{CellId, DataSetId, InterpolationMode, Peak, ShapeLibrary};
use crate::predict::{predict_peaks, PredictorParameters};
use crate::progress::BarProgress;
use crate::refine::{ParameterSet, Refiner, RefineOptions};
use crate::session::{
    entry_to_cell, entry_to_peak, experiment_entry, load_session, save_session, Session,
};

#[derive(Parser, Debug)]
#[clap(name = "hklreduce", about, version)]
pub struct Args {
    #[clap(subcommand)]
    pub command: Command,

    /// The verbosity of the program. The default is to print high-level
    /// information.
    #[clap(short, long, parse(from_occurrences), global = true)]
    pub verbosity: u8,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Search a numor for peaks.
    FindPeaks {
        /// Path to the raw numor file.
        numor: PathBuf,

        /// Path to the YAML instrument description.
        #[clap(long)]
        instrument: PathBuf,

        /// Convolution kernel: none, box, annular or radial.
        #[clap(long, default_value = "annular")]
        kernel: String,

        /// Filtered-count threshold.
        #[clap(long, default_value_t = 80.0)]
        threshold: f64,

        /// Interpret the threshold as a multiple of the frame mean.
        #[clap(long)]
        relative: bool,

        /// Semi-axis scale of the fitted ellipsoids.
        #[clap(long, default_value_t = 1.0)]
        peak_scale: f64,

        /// Minimum blob size in pixels.
        #[clap(long, default_value_t = 30)]
        min_size: usize,

        /// Maximum blob size in pixels.
        #[clap(long, default_value_t = 10000)]
        max_size: usize,

        /// Output peak-list file.
        #[clap(short, long, default_value = "peaks.yml")]
        output: PathBuf,
    },

    /// Find unit-cell solutions for a peak list.
    Index {
        /// Peak-list session file.
        peaks: PathBuf,

        /// Raw numor the peaks came from.
        #[clap(long)]
        numor: PathBuf,

        #[clap(long)]
        instrument: PathBuf,

        /// Number of solutions to report.
        #[clap(long, default_value_t = 10)]
        solutions: usize,

        /// Largest plausible cell edge in angstroms.
        #[clap(long, default_value_t = 200.0)]
        max_dim: f64,

        /// Write the peaks, indexed against the best solution, here.
        #[clap(short, long)]
        output: Option<PathBuf>,
    },

    /// Refine the lattice and instrument state against indexed peaks.
    Refine {
        peaks: PathBuf,

        #[clap(long)]
        numor: PathBuf,

        #[clap(long)]
        instrument: PathBuf,

        /// Number of frame batches.
        #[clap(long, default_value_t = 1)]
        batches: usize,

        /// Also refine the per-state sample position offsets.
        #[clap(long)]
        sample_position: bool,

        /// Also refine the per-state sample orientation offsets.
        #[clap(long)]
        sample_orientation: bool,

        /// Also refine the per-state detector position offsets.
        #[clap(long)]
        detector_position: bool,

        /// Also refine the per-state incoming-beam direction.
        #[clap(long)]
        beam: bool,

        /// Also refine the per-state wavelength.
        #[clap(long)]
        wavelength: bool,

        /// Let every state refine its own offsets instead of tying them
        /// equal across each batch through the constraint kernel.
        #[clap(long)]
        untied_states: bool,

        #[clap(short, long)]
        output: Option<PathBuf>,
    },

    /// Predict the peaks of the refined cell over a numor.
    Predict {
        /// Session file carrying the unit cell (and any observed shapes).
        peaks: PathBuf,

        #[clap(long)]
        numor: PathBuf,

        #[clap(long)]
        instrument: PathBuf,

        #[clap(long = "d-min")]
        d_min: f64,

        #[clap(long = "d-max")]
        d_max: f64,

        /// Shape interpolation: nearest, inverse-distance or mean.
        #[clap(long, default_value = "mean")]
        interpolation: String,

        #[clap(short, long, default_value = "predicted.yml")]
        output: PathBuf,
    },

    /// Integrate a peak list.
    Integrate {
        peaks: PathBuf,

        #[clap(long)]
        numor: PathBuf,

        #[clap(long)]
        instrument: PathBuf,

        #[clap(long, default_value_t = 3.0)]
        peak_end: f64,

        #[clap(long, default_value_t = 3.5)]
        bkg_begin: f64,

        #[clap(long, default_value_t = 4.5)]
        bkg_end: f64,

        /// Integration method: sum, profile or gaussian.
        #[clap(long, default_value = "sum")]
        method: String,

        #[clap(short, long)]
        output: Option<PathBuf>,
    },

    /// Merge symmetry-equivalent peaks and report statistics.
    Merge {
        peaks: PathBuf,

        /// Space group symbol, e.g. "P 21 21 21".
        #[clap(long = "space-group")]
        space_group: String,

        /// Treat Friedel pairs as equivalent.
        #[clap(long)]
        friedel: bool,

        /// Number of resolution shells in the report.
        #[clap(long, default_value_t = 10)]
        shells: usize,
    },
}

fn load_data(numor: &Path, instrument: &Path) -> Result<DataSet, HklReduceError> {
    let inst = load_instrument(instrument)?;
    Ok(ill_ascii::load_numor(numor, inst)?)
}

/// Wrap a peak list in a single-experiment session document.
fn session_of(data: &DataSet, peaks: &[Peak], cells: &[UnitCell]) -> Session {
    Session {
        version: crate::session::SESSION_VERSION,
        experiments: vec![experiment_entry(data, peaks, cells)],
    }
}

/// Pull the peaks and cells back out of a session document. Peaks that fail
/// to revive (degenerate stored metric) are printed and skipped.
fn revive_session(path: &Path) -> Result<(Vec<Peak>, Vec<UnitCell>), HklReduceError> {
    let session = load_session(path)?;
    let mut peaks = Vec::new();
    let mut cells = Vec::new();
    for expt in &session.experiments {
        for entry in &expt.cells {
            cells.push(entry_to_cell(entry)?);
        }
        for ds in &expt.data_sets {
            for (i, entry) in ds.peaks.iter().enumerate() {
                match entry_to_peak(entry, DataSetId(0)) {
                    Ok(peak) => peaks.push(peak),
                    Err(e) => println!("peak {i}: {}", HklReduceError::from(e)),
                }
            }
        }
    }
    if peaks.is_empty() {
        return Err(HklReduceError::InvalidInput(format!(
            "no usable peaks in {}",
            path.display()
        )));
    }
    Ok((peaks, cells))
}

pub fn run_command(args: Args) -> Result<(), HklReduceError> {
    match args.command {
        Command::FindPeaks {
            numor,
            instrument,
            kernel,
            threshold,
            relative,
            peak_scale,
            min_size,
            max_size,
            output,
        } => {
            let data = load_data(&numor, &instrument)?;
            let kernel = KernelKind::from_str(&kernel).map_err(HklReduceError::InvalidInput)?;
            let params = FinderParameters {
                kernel,
                threshold,
                relative_threshold: relative,
                peak_scale,
                min_components: min_size,
                max_components: max_size,
                masks: Vec::new(),
            };
            let progress = BarProgress::new(true);
            let peaks = find_peaks(&data, DataSetId(0), &params, &progress)?;
            info!("{} peaks found in numor {}", peaks.len(), data.numor);
            save_session(&output, &session_of(&data, &peaks, &[]))?;
            println!("{} peaks -> {}", peaks.len(), output.display());
            Ok(())
        }

        Command::Index {
            peaks,
            numor,
            instrument,
            solutions,
            max_dim,
            output,
        } => {
            let data = load_data(&numor, &instrument)?;
            let (mut peak_list, _) = revive_session(&peaks)?;

            let mut qs = Vec::new();
            for (i, peak) in peak_list.iter().enumerate() {
                if !peak.enabled() {
                    continue;
                }
                match peak.q(&data) {
                    Ok(q) => qs.push(q),
                    Err(e) => println!("peak {i}: {}", HklReduceError::from(e)),
                }
            }

            let indexer = AutoIndexer::new(IndexerParameters {
                maxdim: max_dim,
                n_solutions: solutions,
                ..IndexerParameters::default()
            });
            let progress = BarProgress::new(true);
            let found = indexer.index(&qs, &progress)?;

            println!("{:>8} {:>9} {:>9} {:>9} {:>8} {:>8} {:>8}  {}", "% idx", "a", "b", "c", "alpha", "beta", "gamma", "Bravais");
            for s in &found {
                let c = &s.cell;
                println!(
                    "{:>8.2} {:>9.4} {:>9.4} {:>9.4} {:>8.3} {:>8.3} {:>8.3}  {}",
                    s.percent_indexed,
                    c.a(),
                    c.b(),
                    c.c(),
                    c.alpha().to_degrees(),
                    c.beta().to_degrees(),
                    c.gamma().to_degrees(),
                    c.bravais_symbol(),
                );
            }

            if let (Some(output), Some(best)) = (output, found.first()) {
                for peak in &mut peak_list {
                    peak.index_with(&data, CellId(0), &best.cell);
                }
                let indexed = peak_list.iter().filter(|p| p.indexed()).count();
                info!("{indexed}/{} peaks indexed with the best cell", peak_list.len());
                save_session(
                    &output,
                    &session_of(&data, &peak_list, &[best.cell.clone()]),
                )?;
                println!("indexed peaks -> {}", output.display());
            }
            Ok(())
        }

        Command::Refine {
            peaks,
            numor,
            instrument,
            batches,
            sample_position,
            sample_orientation,
            detector_position,
            beam,
            wavelength,
            untied_states,
            output,
        } => {
            let data = load_data(&numor, &instrument)?;
            let (mut peak_list, cells) = revive_session(&peaks)?;
            let cell = cells.first().ok_or_else(|| {
                HklReduceError::NotIndexed("the session carries no unit cell".to_string())
            })?;

            let mut sets = vec![ParameterSet::CellBasis];
            for (flag, set) in [
                (sample_position, ParameterSet::SamplePosition),
                (sample_orientation, ParameterSet::SampleOrientation),
                (detector_position, ParameterSet::DetectorPosition),
                (beam, ParameterSet::BeamDirection),
                (wavelength, ParameterSet::Wavelength),
            ] {
                if flag {
                    sets.push(set);
                }
            }

            let mut refiner = Refiner::new(&data, cell, &peak_list, batches)?;
            refiner.set_parameters(&sets);
            let options = RefineOptions {
                n_batches: batches,
                tie_states: !untied_states,
                ..RefineOptions::default()
            };
            let all_converged = refiner.refine(&data, &options)?;
            for (i, batch) in refiner.batches().iter().enumerate() {
                let c = batch.cell();
                println!(
                    "batch {i}: {} peaks, {}/{} free parameters, converged: {}, cell {:.4} {:.4} {:.4}",
                    batch.n_peaks(),
                    batch.parameters().n_free(),
                    batch.parameters().n_params(),
                    batch.converged(),
                    c.a(),
                    c.b(),
                    c.c(),
                );
            }
            let updated = refiner.update_predictions(&mut peak_list, &data);
            info!("{updated} peak centres re-predicted");

            if let Some(output) = output {
                let best = refiner.batches()[0].cell().clone();
                save_session(&output, &session_of(&data, &peak_list, &[best]))?;
                println!("refined peaks -> {}", output.display());
            }
            if !all_converged {
                return Err(HklReduceError::NotConverged(
                    "one or more refinement batches hit the iteration cap".to_string(),
                ));
            }
            Ok(())
        }

        Command::Predict {
            peaks,
            numor,
            instrument,
            d_min,
            d_max,
            interpolation,
            output,
        } => {
            let data = load_data(&numor, &instrument)?;
            let (_, cells) = revive_session(&peaks)?;
            let cell = cells.first().ok_or_else(|| {
                HklReduceError::NotIndexed("the session carries no unit cell".to_string())
            })?;
            let mode = InterpolationMode::from_str(&interpolation)
                .map_err(|e| HklReduceError::InvalidInput(e.to_string()))?;

            let params = PredictorParameters {
                d_min,
                d_max,
                mode,
                ..PredictorParameters::default()
            };
            let progress = BarProgress::new(true);
            let predicted = predict_peaks(
                &data,
                DataSetId(0),
                cell,
                CellId(0),
                &ShapeLibrary::default(),
                &params,
                &progress,
            )?;
            save_session(&output, &session_of(&data, &predicted, &[cell.clone()]))?;
            println!("{} predicted peaks -> {}", predicted.len(), output.display());
            Ok(())
        }

        Command::Integrate {
            peaks,
            numor,
            instrument,
            peak_end,
            bkg_begin,
            bkg_end,
            method,
            output,
        } => {
            let data = load_data(&numor, &instrument)?;
            let (mut peak_list, cells) = revive_session(&peaks)?;
            let method = match method.as_str() {
                "sum" => IntegrationMethod::PixelSum,
                "profile" => IntegrationMethod::ProfileSigma,
                "gaussian" => IntegrationMethod::GaussianFit,
                other => {
                    return Err(HklReduceError::InvalidInput(format!(
                        "unknown integration method '{other}'"
                    )))
                }
            };
            let params = IntegrationParameters {
                peak_end,
                bkg_begin,
                bkg_end,
                method,
                ..IntegrationParameters::default()
            };
            let progress = BarProgress::new(true);
            let n = integrate_peaks(&data, &mut peak_list, &params, &progress)?;
            println!("{n}/{} peaks integrated", peak_list.len());

            // the integrated table, one line per enabled peak
            for peak in peak_list.iter().filter(|p| p.enabled()) {
                let i = peak.raw_intensity;
                match peak.hkl() {
                    Some(hkl) => println!(
                        "{:>4} {:>4} {:>4} {:>12.2} {:>10.2}",
                        hkl.h,
                        hkl.k,
                        hkl.l,
                        i.value,
                        i.sigma()
                    ),
                    None => println!("   ?    ?    ? {:>12.2} {:>10.2}", i.value, i.sigma()),
                }
            }

            if let Some(output) = output {
                save_session(&output, &session_of(&data, &peak_list, &cells))?;
                println!("integrated peaks -> {}", output.display());
            }
            Ok(())
        }

        Command::Merge {
            peaks,
            space_group,
            friedel,
            shells,
        } => {
            let (peak_list, cells) = revive_session(&peaks)?;
            let cell = cells.first().ok_or_else(|| {
                HklReduceError::NotIndexed("the session carries no unit cell".to_string())
            })?;
            let group = SpaceGroup::new(&space_group)?;

            let mut merged = MergedData::new(group, friedel);
            let mut skipped = 0usize;
            for peak in peak_list.iter().filter(|p| p.enabled()) {
                match peak.hkl() {
                    Some(hkl) => {
                        merged.add_observation(MergeObservation {
                            hkl,
                            d: cell.d(hkl),
                            intensity: peak.raw_intensity,
                        });
                    }
                    None => skipped += 1,
                }
            }
            if skipped > 0 {
                warn!("{skipped} unindexed peaks skipped");
            }
            if merged.n_unique() == 0 {
                return Err(HklReduceError::NotIndexed(
                    "no indexed peaks to merge".to_string(),
                ));
            }

            let d_values: Vec<f64> = merged.peaks().map(|p| p.mean_d()).collect();
            // pad the range so degenerate single-shell inputs still shell
            let d_min = d_values.iter().cloned().fold(f64::INFINITY, f64::min) * 0.999;
            let d_max = d_values.iter().cloned().fold(f64::NEG_INFINITY, f64::max) * 1.001;

            let overall = statistics(&merged, d_min, d_max)?;
            println!(
                "{:>8} {:>8} {:>7} {:>7} {:>8} {:>8} {:>8} {:>8} {:>8} {:>8}",
                "d_min", "d_max", "obs", "unique", "red.", "Rfactor", "Rmerge", "Rmeas", "CC1/2", "CC*"
            );
            for s in shell_statistics(&merged, d_min, d_max, shells)? {
                println!(
                    "{:>8.3} {:>8.3} {:>7} {:>7} {:>8.2} {:>8.4} {:>8.4} {:>8.4} {:>8.4} {:>8.4}",
                    s.d_min,
                    s.d_max,
                    s.n_observations,
                    s.n_unique,
                    s.redundancy,
                    s.r_factor,
                    s.r_merge,
                    s.r_meas,
                    s.cc_half,
                    s.cc_star
                );
            }
            println!(
                "{:>8.3} {:>8.3} {:>7} {:>7} {:>8.2} {:>8.4} {:>8.4} {:>8.4} {:>8.4} {:>8.4}  overall",
                overall.d_min,
                overall.d_max,
                overall.n_observations,
                overall.n_unique,
                overall.redundancy,
                overall.r_factor,
                overall.r_merge,
                overall.r_meas,
                overall.cc_half,
                overall.cc_star
            );
            Ok(())
        }
    }
}

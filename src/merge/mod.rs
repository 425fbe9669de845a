// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Merging of symmetry-equivalent reflections.
//!
//! Observations are grouped into orbits under the chosen space group
//! (optionally extended by the Friedel relation); each orbit keeps a
//! running mean and standard error. Merging statistics (redundancy, the
//! R-factor family, CC1/2 and CC*) are reported overall and per resolution
//! shell.

mod cc;
mod merged_peak;
mod shell;

pub use cc::{cc_half, cc_star};
pub use merged_peak::MergedPeak;
pub use shell::ResolutionShells;

use std::collections::BTreeMap;

use thiserror::Error;

use crate::crystal::{CrystalError, MillerIndex, SpaceGroup};
use crate::peak::Intensity;

#[derive(Error, Debug)]
pub enum MergeError {
    #[error("no observations to merge")]
    NoObservations,

    #[error("resolution shell bounds must satisfy 0 < d_min < d_max")]
    BadShellBounds,

    #[error(transparent)]
    Crystal(#[from] CrystalError),
}

/// One observation entering the merge: indices, a d-spacing and the
/// (corrected) intensity.
#[derive(Clone, Copy, Debug)]
pub struct MergeObservation {
    pub hkl: MillerIndex,
    pub d: f64,
    pub intensity: Intensity,
}

#[derive(Debug)]
pub struct MergedData {
    group: SpaceGroup,
    friedel: bool,
    peaks: BTreeMap<MillerIndex, MergedPeak>,
}

impl MergedData {
    pub fn new(group: SpaceGroup, friedel: bool) -> MergedData {
        MergedData {
            group,
            friedel,
            peaks: BTreeMap::new(),
        }
    }

    pub fn group(&self) -> &SpaceGroup {
        &self.group
    }

    pub fn friedel(&self) -> bool {
        self.friedel
    }

    /// Merge one observation into its orbit. Returns true when the orbit is
    /// new.
    pub fn add_observation(&mut self, obs: MergeObservation) -> bool {
        let key = self.group.representative(obs.hkl, self.friedel);
        match self.peaks.get_mut(&key) {
            Some(merged) => {
                merged.add(obs);
                false
            }
            None => {
                let mut merged = MergedPeak::new(key);
                merged.add(obs);
                self.peaks.insert(key, merged);
                true
            }
        }
    }

    pub fn peaks(&self) -> impl Iterator<Item = &MergedPeak> {
        self.peaks.values()
    }

    pub fn n_unique(&self) -> usize {
        self.peaks.len()
    }

    /// Total number of observations, including redundant ones.
    pub fn total_size(&self) -> usize {
        self.peaks.values().map(|p| p.redundancy()).sum()
    }

    pub fn redundancy(&self) -> f64 {
        if self.peaks.is_empty() {
            return 0.0;
        }
        self.total_size() as f64 / self.peaks.len() as f64
    }

    pub fn clear(&mut self) {
        self.peaks.clear();
    }
}

/// Goodness-of-merging summary over a d-range.
#[derive(Clone, Debug)]
pub struct MergeStatistics {
    pub d_min: f64,
    pub d_max: f64,
    pub n_observations: usize,
    pub n_unique: usize,
    pub redundancy: f64,
    /// `sum |I - <I>| / sum |I|` over every orbit.
    pub r_factor: f64,
    /// Same restricted to multiply-observed orbits.
    pub r_merge: f64,
    /// Redundancy-corrected R-factor.
    pub r_meas: f64,
    /// Precision-indicating R-factor.
    pub r_pim: f64,
    pub cc_half: f64,
    pub cc_star: f64,
}

/// Compute the statistics of the orbits whose d lies in `[d_min, d_max]`.
pub fn statistics(
    merged: &MergedData,
    d_min: f64,
    d_max: f64,
) -> Result<MergeStatistics, MergeError> {
    let selected: Vec<&MergedPeak> = merged
        .peaks()
        .filter(|p| {
            let d = p.mean_d();
            d >= d_min && d <= d_max
        })
        .collect();
    if selected.is_empty() {
        return Err(MergeError::NoObservations);
    }

    let n_observations: usize = selected.iter().map(|p| p.redundancy()).sum();
    let n_unique = selected.len();

    let mut num_factor = 0.0;
    let mut num_merge = 0.0;
    let mut num_meas = 0.0;
    let mut num_pim = 0.0;
    let mut den_all = 0.0;
    let mut den_multi = 0.0;
    for peak in &selected {
        let mean = peak.intensity().value;
        let n = peak.redundancy() as f64;
        let dev: f64 = peak
            .observations()
            .iter()
            .map(|i| (i.value - mean).abs())
            .sum();
        let sum_abs: f64 = peak.observations().iter().map(|i| i.value.abs()).sum();
        num_factor += dev;
        den_all += sum_abs;
        if peak.redundancy() > 1 {
            num_merge += dev;
            num_meas += (n / (n - 1.0)).sqrt() * dev;
            num_pim += (1.0 / (n - 1.0)).sqrt() * dev;
            den_multi += sum_abs;
        }
    }

    let cc = cc_half(&selected);
    Ok(MergeStatistics {
        d_min,
        d_max,
        n_observations,
        n_unique,
        redundancy: n_observations as f64 / n_unique as f64,
        r_factor: if den_all > 0.0 { num_factor / den_all } else { 0.0 },
        r_merge: if den_multi > 0.0 { num_merge / den_multi } else { 0.0 },
        r_meas: if den_multi > 0.0 { num_meas / den_multi } else { 0.0 },
        r_pim: if den_multi > 0.0 { num_pim / den_multi } else { 0.0 },
        cc_half: cc,
        cc_star: cc_star(cc),
    })
}

/// Per-shell statistics over `n_shells` equal-volume resolution shells.
pub fn shell_statistics(
    merged: &MergedData,
    d_min: f64,
    d_max: f64,
    n_shells: usize,
) -> Result<Vec<MergeStatistics>, MergeError> {
    let shells = ResolutionShells::new(d_min, d_max, n_shells)?;
    let mut out = Vec::new();
    for (lo, hi) in shells.bounds() {
        match statistics(merged, lo, hi) {
            Ok(s) => out.push(s),
            // empty shells are simply skipped
            Err(MergeError::NoObservations) => {}
            Err(e) => return Err(e),
        }
    }
    Ok(out)
}

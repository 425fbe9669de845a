// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Persisted analysis state.
//!
//! A session file is a versioned YAML document holding per-experiment
//! entries: unit cells (by direct basis and tags) and per-data-set peak
//! lists (ellipsoid centre, the six upper-triangular metric entries, raw
//! intensity, transmission, flags, cell id and Miller indices). Readers
//! accept any version at or below their own.

use std::path::Path;

use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::crystal::{BravaisType, CrystalError, LatticeCentring, MillerIndex, UnitCell};
use crate::geometry::{Ellipsoid, GeometryError};
use crate::peak::{CellId, DataSetId, Intensity, Peak};

pub const SESSION_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("session version {found} is newer than supported version {supported}")]
    VersionTooNew { found: u32, supported: u32 },

    #[error("malformed session document: {0}")]
    Parse(String),

    #[error(transparent)]
    Geometry(#[from] GeometryError),

    #[error(transparent)]
    Crystal(#[from] CrystalError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PeakEntry {
    pub centre: [f64; 3],
    /// Upper-triangular metric entries: m11 m12 m13 m22 m23 m33.
    pub metric: [f64; 6],
    pub intensity: Intensity,
    pub transmission: f64,
    pub selected: bool,
    pub masked: bool,
    #[serde(default)]
    pub predicted: bool,
    #[serde(default)]
    pub cell: Option<usize>,
    #[serde(default)]
    pub hkl: Option<[i32; 3]>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CellEntry {
    /// Direct basis rows.
    pub basis: [[f64; 3]; 3],
    pub bravais: BravaisType,
    pub centring: LatticeCentring,
    #[serde(default)]
    pub space_group: Option<String>,
    pub indexing_tolerance: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DataSetEntry {
    pub numor: u32,
    #[serde(default)]
    pub peaks: Vec<PeakEntry>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExperimentEntry {
    pub name: String,
    #[serde(default)]
    pub instrument: Option<String>,
    #[serde(default)]
    pub cells: Vec<CellEntry>,
    #[serde(default)]
    pub data_sets: Vec<DataSetEntry>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Session {
    pub version: u32,
    #[serde(default)]
    pub experiments: Vec<ExperimentEntry>,
}

impl Default for Session {
    fn default() -> Session {
        Session {
            version: SESSION_VERSION,
            experiments: Vec::new(),
        }
    }
}

pub fn peak_to_entry(peak: &Peak) -> PeakEntry {
    let c = peak.shape().centre();
    let m = peak.shape().metric();
    PeakEntry {
        centre: [c.x, c.y, c.z],
        metric: [
            m[(0, 0)],
            m[(0, 1)],
            m[(0, 2)],
            m[(1, 1)],
            m[(1, 2)],
            m[(2, 2)],
        ],
        intensity: peak.raw_intensity,
        transmission: peak.transmission,
        selected: peak.selected,
        masked: peak.masked,
        predicted: peak.predicted,
        cell: peak.cell.map(|CellId(i)| i),
        hkl: peak.hkl().map(|h| [h.h, h.k, h.l]),
    }
}

pub fn entry_to_peak(entry: &PeakEntry, data_set: DataSetId) -> Result<Peak, SessionError> {
    let m = &entry.metric;
    let metric = Matrix3::new(
        m[0], m[1], m[2], m[1], m[3], m[4], m[2], m[4], m[5],
    );
    let shape = Ellipsoid::new(
        Vector3::new(entry.centre[0], entry.centre[1], entry.centre[2]),
        metric,
    )?;
    let mut peak = Peak::new(shape, data_set);
    peak.raw_intensity = entry.intensity;
    peak.transmission = entry.transmission;
    peak.selected = entry.selected;
    peak.masked = entry.masked;
    peak.predicted = entry.predicted;
    if let (Some(cell), Some(hkl)) = (entry.cell, entry.hkl) {
        peak.set_hkl(MillerIndex::new(hkl[0], hkl[1], hkl[2]), CellId(cell));
    } else if let Some(cell) = entry.cell {
        peak.cell = Some(CellId(cell));
    }
    Ok(peak)
}

pub fn cell_to_entry(cell: &UnitCell) -> CellEntry {
    let a = cell.basis();
    let row = |i: usize| [a[(i, 0)], a[(i, 1)], a[(i, 2)]];
    CellEntry {
        basis: [row(0), row(1), row(2)],
        bravais: cell.bravais,
        centring: cell.centring,
        space_group: cell.space_group.clone(),
        indexing_tolerance: cell.indexing_tolerance,
    }
}

pub fn entry_to_cell(entry: &CellEntry) -> Result<UnitCell, SessionError> {
    let b = &entry.basis;
    let basis = Matrix3::new(
        b[0][0], b[0][1], b[0][2], b[1][0], b[1][1], b[1][2], b[2][0], b[2][1], b[2][2],
    );
    let mut cell = UnitCell::from_basis(basis)?;
    cell.bravais = entry.bravais;
    cell.centring = entry.centring;
    cell.space_group = entry.space_group.clone();
    cell.indexing_tolerance = entry.indexing_tolerance;
    Ok(cell)
}

/// Wrap a peak list and its cells into a single-experiment entry.
pub fn experiment_entry(
    data: &crate::data::DataSet,
    peaks: &[Peak],
    cells: &[UnitCell],
) -> ExperimentEntry {
    ExperimentEntry {
        name: data.instrument.name.clone(),
        instrument: Some(data.instrument.name.clone()),
        cells: cells.iter().map(cell_to_entry).collect(),
        data_sets: vec![DataSetEntry {
            numor: data.numor,
            peaks: peaks.iter().map(peak_to_entry).collect(),
        }],
    }
}

pub fn save_session<P: AsRef<Path>>(path: P, session: &Session) -> Result<(), SessionError> {
    let text =
        serde_yaml::to_string(session).map_err(|e| SessionError::Parse(e.to_string()))?;
    std::fs::write(path, text)?;
    Ok(())
}

pub fn load_session<P: AsRef<Path>>(path: P) -> Result<Session, SessionError> {
    let text = std::fs::read_to_string(path)?;
    let session: Session =
        serde_yaml::from_str(&text).map_err(|e| SessionError::Parse(e.to_string()))?;
    if session.version > SESSION_VERSION {
        return Err(SessionError::VersionTooNew {
            found: session.version,
            supported: SESSION_VERSION,
        });
    }
    Ok(session)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use tempfile::tempdir;

    const DEG: f64 = std::f64::consts::PI / 180.0;

    fn sample_session() -> Session {
        let cell =
            UnitCell::from_parameters(10.0, 12.0, 15.0, 90.0 * DEG, 95.0 * DEG, 90.0 * DEG)
                .unwrap();
        let shape = Ellipsoid::new(
            Vector3::new(100.5, 200.25, 12.75),
            Matrix3::new(2.0, 0.1, 0.0, 0.1, 1.5, 0.2, 0.0, 0.2, 3.0),
        )
        .unwrap();
        let mut peak = Peak::new(shape, DataSetId(0));
        peak.raw_intensity = Intensity::new(1234.5, 1300.0);
        peak.transmission = 0.9;
        peak.set_hkl(MillerIndex::new(2, -1, 7), CellId(0));

        Session {
            version: SESSION_VERSION,
            experiments: vec![ExperimentEntry {
                name: "demo".to_string(),
                instrument: Some("D19".to_string()),
                cells: vec![cell_to_entry(&cell)],
                data_sets: vec![DataSetEntry {
                    numor: 12345678,
                    peaks: vec![peak_to_entry(&peak)],
                }],
            }],
        }
    }

    #[test]
    fn session_round_trips_through_yaml() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("session.yml");
        let session = sample_session();
        save_session(&path, &session).unwrap();
        let loaded = load_session(&path).unwrap();

        assert_eq!(loaded.version, SESSION_VERSION);
        let expt = &loaded.experiments[0];
        assert_eq!(expt.name, "demo");

        let peak = entry_to_peak(&expt.data_sets[0].peaks[0], DataSetId(0)).unwrap();
        assert_abs_diff_eq!(peak.centre().px, 100.5);
        assert_abs_diff_eq!(peak.raw_intensity.value, 1234.5);
        assert_eq!(peak.hkl(), Some(MillerIndex::new(2, -1, 7)));
        assert_eq!(peak.cell, Some(CellId(0)));

        let cell = entry_to_cell(&expt.cells[0]).unwrap();
        assert_abs_diff_eq!(cell.a(), 10.0, epsilon = 1e-9);
        assert_abs_diff_eq!(cell.beta(), 95.0 * DEG, epsilon = 1e-9);
    }

    #[test]
    fn newer_versions_are_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("session.yml");
        let mut session = sample_session();
        session.version = SESSION_VERSION + 1;
        save_session(&path, &session).unwrap();
        assert!(matches!(
            load_session(&path),
            Err(SessionError::VersionTooNew { .. })
        ));
    }

    #[test]
    fn older_versions_are_accepted() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("session.yml");
        let mut session = sample_session();
        session.version = 0;
        save_session(&path, &session).unwrap();
        assert!(load_session(&path).is_ok());
    }

    #[test]
    fn degenerate_metric_is_rejected_on_load() {
        let mut entry = peak_to_entry(
            &Peak::new(
                Ellipsoid::sphere(Vector3::zeros(), 1.0).unwrap(),
                DataSetId(0),
            ),
        );
        entry.metric = [1.0, 0.0, 0.0, -1.0, 0.0, 1.0];
        assert!(entry_to_peak(&entry, DataSetId(0)).is_err());
    }
}

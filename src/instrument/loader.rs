// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Instrument description files.
//!
//! Instruments are described by hand-authored YAML documents; every physical
//! quantity is a `{value, units}` pair with the unit drawn from the closed
//! tables in [`crate::units`].

use std::path::Path;
use std::str::FromStr;

use nalgebra::Vector3;
use serde::Deserialize;

use crate::units::{angle_factor, length_factor, ANG};

use super::{
    Axis, AxisKind, DataOrder, Detector, DetectorShape, Goniometer, InstrumentError,
};

#[derive(Clone, Debug)]
pub struct Monochromator {
    pub name: String,
    /// Beam cross-section in metres.
    pub width: f64,
    pub height: f64,
    /// Nominal wavelength and its spread, angstroms.
    pub wavelength: f64,
    pub fwhm: f64,
}

#[derive(Clone, Debug)]
pub struct Instrument {
    pub name: String,
    pub detector: Detector,
    pub sample_goniometer: Goniometer,
    pub monochromator: Monochromator,
}

// Raw document shapes; converted and validated below.

#[derive(Deserialize)]
struct RawDocument {
    instrument: RawInstrument,
}

#[derive(Deserialize)]
struct RawInstrument {
    name: String,
    detector: RawDetector,
    sample: RawSample,
    source: RawSource,
}

#[derive(Deserialize)]
struct RawQuantity {
    value: f64,
    units: String,
}

impl RawQuantity {
    fn as_length(&self) -> Result<f64, InstrumentError> {
        Ok(self.value * length_factor(&self.units)?)
    }

    fn as_angle(&self) -> Result<f64, InstrumentError> {
        Ok(self.value * angle_factor(&self.units)?)
    }

    fn as_angstroms(&self) -> Result<f64, InstrumentError> {
        Ok(self.as_length()? / ANG)
    }
}

#[derive(Deserialize)]
struct RawDetector {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    name: Option<String>,
    sample_distance: RawQuantity,
    #[serde(default)]
    width: Option<RawQuantity>,
    #[serde(default)]
    angular_width: Option<RawQuantity>,
    height: RawQuantity,
    nrows: usize,
    ncols: usize,
    #[serde(default)]
    row_min: f64,
    #[serde(default)]
    col_min: f64,
    data_ordering: String,
    gain: f64,
    baseline: f64,
    #[serde(default)]
    goniometer: Option<RawGoniometer>,
}

#[derive(Deserialize)]
struct RawSample {
    #[serde(default)]
    goniometer: Option<RawGoniometer>,
}

#[derive(Deserialize)]
struct RawSource {
    monochromator: RawMonochromator,
}

#[derive(Deserialize)]
struct RawMonochromator {
    #[serde(default)]
    name: Option<String>,
    width: RawQuantity,
    height: RawQuantity,
    wavelength: RawQuantity,
    fwhm: RawQuantity,
}

#[derive(Deserialize)]
struct RawGoniometer {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    axis: Vec<RawAxis>,
}

#[derive(Deserialize)]
struct RawAxis {
    name: String,
    #[serde(rename = "type")]
    kind: String,
    direction: [f64; 3],
    #[serde(default)]
    clockwise: bool,
    #[serde(default = "default_physical")]
    physical: bool,
}

fn default_physical() -> bool {
    true
}

fn convert_goniometer(
    raw: Option<RawGoniometer>,
    fallback_name: &str,
) -> Result<Goniometer, InstrumentError> {
    let raw = match raw {
        Some(raw) => raw,
        None => return Ok(Goniometer::empty(fallback_name)),
    };
    let mut axes = Vec::with_capacity(raw.axis.len());
    for a in raw.axis {
        let kind = match a.kind.as_str() {
            "rotation" => AxisKind::Rotation {
                clockwise: a.clockwise,
            },
            "translation" => AxisKind::Translation,
            other => return Err(InstrumentError::UnknownAxisType(other.to_string())),
        };
        axes.push(Axis {
            name: a.name,
            kind,
            direction: Vector3::new(a.direction[0], a.direction[1], a.direction[2]),
            physical: a.physical,
            offset: 0.0,
        });
    }
    Ok(Goniometer::new(
        raw.name.as_deref().unwrap_or(fallback_name),
        axes,
    ))
}

/// Parse an instrument description from YAML text.
pub fn parse_instrument(text: &str) -> Result<Instrument, InstrumentError> {
    let doc: RawDocument =
        serde_yaml::from_str(text).map_err(|e| InstrumentError::Parse(e.to_string()))?;
    let raw = doc.instrument;

    let shape = match raw.detector.kind.as_str() {
        "flat" => {
            let width = raw
                .detector
                .width
                .as_ref()
                .ok_or_else(|| InstrumentError::Parse("flat detector needs 'width'".into()))?
                .as_length()?;
            DetectorShape::Flat {
                width,
                height: raw.detector.height.as_length()?,
            }
        }
        "cylindrical" => {
            let angular_width = raw
                .detector
                .angular_width
                .as_ref()
                .ok_or_else(|| {
                    InstrumentError::Parse("cylindrical detector needs 'angular_width'".into())
                })?
                .as_angle()?;
            DetectorShape::Cylindrical {
                angular_width,
                height: raw.detector.height.as_length()?,
            }
        }
        other => return Err(InstrumentError::UnknownDetectorType(other.to_string())),
    };

    let data_order = DataOrder::from_str(&raw.detector.data_ordering)
        .map_err(|_| InstrumentError::UnknownDataOrder(raw.detector.data_ordering.clone()))?;

    let detector = Detector {
        name: raw
            .detector
            .name
            .unwrap_or_else(|| "detector".to_string()),
        shape,
        distance: raw.detector.sample_distance.as_length()?,
        n_rows: raw.detector.nrows,
        n_cols: raw.detector.ncols,
        row_min: raw.detector.row_min,
        col_min: raw.detector.col_min,
        gain: raw.detector.gain,
        baseline: raw.detector.baseline,
        data_order,
        goniometer: convert_goniometer(raw.detector.goniometer, "detector-gonio")?,
    }
    .validated()?;

    let sample_goniometer = convert_goniometer(raw.sample.goniometer, "sample-gonio")?;

    let m = raw.source.monochromator;
    let monochromator = Monochromator {
        name: m.name.unwrap_or_else(|| "mono".to_string()),
        width: m.width.as_length()?,
        height: m.height.as_length()?,
        wavelength: m.wavelength.as_angstroms()?,
        fwhm: m.fwhm.as_angstroms()?,
    };

    Ok(Instrument {
        name: raw.name,
        detector,
        sample_goniometer,
        monochromator,
    })
}

/// Load an instrument description from a file.
pub fn load_instrument<P: AsRef<Path>>(path: P) -> Result<Instrument, InstrumentError> {
    let text = std::fs::read_to_string(path)?;
    parse_instrument(&text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use indoc::indoc;

    const BANANA_YAML: &str = indoc! {"
        instrument:
            name: D19
            detector:
                type: cylindrical
                name: banana
                sample_distance:
                    value: 764.0
                    units: mm
                angular_width:
                    value: 120.0
                    units: deg
                height:
                    units: m
                    value: 0.4
                nrows: 256
                ncols: 640
                row_min: 0
                col_min: 0
                data_ordering: TopRightColMajor
                gain: 0.86
                baseline: 0.0
                goniometer:
                    name: detector-gonio
                    axis:
                        - name: 2theta(gamma)
                          type: rotation
                          direction: [0.0, 0.0, 1.0]
                          clockwise: true
                          physical: true
                        - name: 2theta(nu)
                          type: rotation
                          direction: [1.0, 0.0, 0.0]
                          clockwise: true
                          physical: false
            sample:
                goniometer:
                    name: sample-gonio
                    axis:
                        - name: omega
                          type: rotation
                          direction: [0.0, 0.0, 1.0]
                          clockwise: true
                          physical: true
                        - name: chi
                          type: rotation
                          direction: [0.0, 1.0, 0.0]
                          clockwise: false
                          physical: true
                        - name: phi
                          type: rotation
                          direction: [0.0, 0.0, 1.0]
                          clockwise: true
                          physical: true
            source:
                name: monochromatic source
                monochromator:
                    name: mono
                    width:
                        value: 1.0
                        units: mm
                    height:
                        value: 1.0
                        units: mm
                    wavelength:
                        value: 1.24
                        units: ang
                    fwhm:
                        value: 0.00901
                        units: ang
    "};

    #[test]
    fn parses_a_cylindrical_instrument() {
        let inst = parse_instrument(BANANA_YAML).unwrap();
        assert_eq!(inst.name, "D19");
        assert_abs_diff_eq!(inst.detector.distance, 0.764, epsilon = 1e-12);
        assert_eq!(inst.detector.n_rows, 256);
        assert_eq!(inst.detector.n_cols, 640);
        assert_eq!(inst.detector.data_order, DataOrder::TopRightColMajor);
        match inst.detector.shape {
            DetectorShape::Cylindrical {
                angular_width,
                height,
            } => {
                assert_abs_diff_eq!(angular_width, 120.0_f64.to_radians(), epsilon = 1e-12);
                assert_abs_diff_eq!(height, 0.4, epsilon = 1e-12);
            }
            _ => panic!("expected a cylindrical detector"),
        }
        assert_eq!(inst.detector.goniometer.n_axes(), 2);
        assert_eq!(inst.detector.goniometer.n_physical_axes(), 1);
        assert_eq!(inst.sample_goniometer.n_physical_axes(), 3);
        assert_abs_diff_eq!(inst.monochromator.wavelength, 1.24, epsilon = 1e-12);
    }

    #[test]
    fn rejects_unknown_detector_type() {
        let text = BANANA_YAML.replace("type: cylindrical", "type: spherical");
        assert!(matches!(
            parse_instrument(&text),
            Err(InstrumentError::UnknownDetectorType(_))
        ));
    }

    #[test]
    fn rejects_unknown_units() {
        let text = BANANA_YAML.replace("units: mm", "units: cubits");
        assert!(matches!(
            parse_instrument(&text),
            Err(InstrumentError::Unit(_))
        ));
    }

    #[test]
    fn rejects_unknown_data_ordering() {
        let text = BANANA_YAML.replace("TopRightColMajor", "SidewaysRowMajor");
        assert!(matches!(
            parse_instrument(&text),
            Err(InstrumentError::UnknownDataOrder(_))
        ));
    }
}

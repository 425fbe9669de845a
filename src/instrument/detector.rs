// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Detector geometry.
//!
//! The laboratory frame looks at the detector from the sample: in the rest
//! position the beam runs along +y, x is horizontal and z vertical, so pixel
//! (row_min, col_min) is the bottom-left corner. A detector is either flat or
//! cylindrical (banana); both expose a pure `pixel_position` and its analytic
//! Jacobian with respect to the pixel coordinates.

use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

use super::{Goniometer, InstrumentError};

/// Order in which raw frame data is laid out on disk, named after the corner
/// holding the first value and the major direction from there.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Display, EnumString, Serialize, Deserialize,
)]
pub enum DataOrder {
    TopLeftColMajor,
    TopLeftRowMajor,
    TopRightColMajor,
    TopRightRowMajor,
    BottomLeftColMajor,
    BottomLeftRowMajor,
    BottomRightColMajor,
    BottomRightRowMajor,
}

#[derive(Clone, Debug)]
pub enum DetectorShape {
    /// A flat plate of the given physical width and height (metres).
    Flat { width: f64, height: f64 },
    /// A cylinder section: the column coordinate sweeps `angular_width`
    /// radians at the sample distance, the row coordinate is linear over
    /// `height` metres.
    Cylindrical { angular_width: f64, height: f64 },
}

#[derive(Clone, Debug)]
pub struct Detector {
    pub name: String,
    pub shape: DetectorShape,
    /// Sample-to-detector distance in metres.
    pub distance: f64,
    pub n_rows: usize,
    pub n_cols: usize,
    pub row_min: f64,
    pub col_min: f64,
    pub gain: f64,
    pub baseline: f64,
    pub data_order: DataOrder,
    pub goniometer: Goniometer,
}

impl Detector {
    fn check(&self) -> Result<(), InstrumentError> {
        if self.n_rows == 0 || self.n_cols == 0 {
            return Err(InstrumentError::EmptyDetector);
        }
        let ok = match self.shape {
            DetectorShape::Flat { width, height } => width > 0.0 && height > 0.0,
            DetectorShape::Cylindrical {
                angular_width,
                height,
            } => angular_width > 0.0 && height > 0.0,
        };
        if !ok {
            return Err(InstrumentError::ZeroDimension);
        }
        if self.distance <= 0.0 {
            return Err(InstrumentError::ZeroDistance);
        }
        Ok(())
    }

    pub fn validated(self) -> Result<Detector, InstrumentError> {
        self.check()?;
        Ok(self)
    }

    fn in_range(&self, px: f64, py: f64) -> bool {
        px >= self.col_min
            && px <= self.col_min + (self.n_cols - 1) as f64
            && py >= self.row_min
            && py <= self.row_min + (self.n_rows - 1) as f64
    }

    /// Laboratory position of the pixel centre in the detector rest frame
    /// (metres). `px` is the column coordinate, `py` the row coordinate.
    pub fn pixel_position(&self, px: f64, py: f64) -> Result<Vector3<f64>, InstrumentError> {
        if !self.in_range(px, py) {
            return Err(InstrumentError::PixelOutOfRange {
                px,
                py,
                nrows: self.n_rows,
                ncols: self.n_cols,
            });
        }
        let x = px - self.col_min;
        let y = py - self.row_min;
        let fx = x / (self.n_cols - 1) as f64 - 0.5;
        let fy = y / (self.n_rows - 1) as f64 - 0.5;

        Ok(match self.shape {
            DetectorShape::Flat { width, height } => {
                Vector3::new(fx * width, self.distance, fy * height)
            }
            DetectorShape::Cylindrical {
                angular_width,
                height,
            } => {
                let gamma = fx * angular_width;
                Vector3::new(
                    self.distance * gamma.sin(),
                    self.distance * gamma.cos(),
                    fy * height,
                )
            }
        })
    }

    /// Analytic Jacobian d(x, y, z)/d(px, py) of `pixel_position`, with the
    /// third column zero so the matrix composes with 3-D event coordinates.
    pub fn jacobian(&self, px: f64, _py: f64) -> Matrix3<f64> {
        let mut j = Matrix3::zeros();
        match self.shape {
            DetectorShape::Flat { width, height } => {
                j[(0, 0)] = width / (self.n_cols - 1) as f64;
                j[(2, 1)] = height / (self.n_rows - 1) as f64;
            }
            DetectorShape::Cylindrical {
                angular_width,
                height,
            } => {
                let x = px - self.col_min;
                let gamma = (x / (self.n_cols - 1) as f64 - 0.5) * angular_width;
                let dgamma = angular_width / (self.n_cols - 1) as f64;
                j[(0, 0)] = self.distance * gamma.cos() * dgamma;
                j[(1, 0)] = -self.distance * gamma.sin() * dgamma;
                j[(2, 1)] = height / (self.n_rows - 1) as f64;
            }
        }
        j
    }

    /// Physical width in metres (arc length for a cylindrical detector).
    pub fn width(&self) -> f64 {
        match self.shape {
            DetectorShape::Flat { width, .. } => width,
            DetectorShape::Cylindrical { angular_width, .. } => angular_width * self.distance,
        }
    }

    pub fn height(&self) -> f64 {
        match self.shape {
            DetectorShape::Flat { height, .. } | DetectorShape::Cylindrical { height, .. } => {
                height
            }
        }
    }
}

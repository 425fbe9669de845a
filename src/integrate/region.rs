// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Integration region of a peak.
//!
//! Three scaled copies of the peak ellipsoid share its centre and
//! orientation: the signal region inside `peak_end`, a guard zone up to
//! `bkg_begin` that belongs to neither signal nor background, and the
//! background annulus out to `bkg_end`.

use nalgebra::Vector3;

use crate::geometry::{Aabb, Ellipsoid};

use super::IntegrateError;

/// Classification of one pixel against the region.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventType {
    Peak,
    /// Between the signal and the background shells, or masked.
    Forbidden,
    Background,
    Excluded,
}

#[derive(Clone, Debug)]
pub struct IntegrationRegion {
    shape: Ellipsoid,
    peak_end: f64,
    bkg_begin: f64,
    bkg_end: f64,
}

impl IntegrationRegion {
    pub fn new(
        shape: Ellipsoid,
        peak_end: f64,
        bkg_begin: f64,
        bkg_end: f64,
    ) -> Result<IntegrationRegion, IntegrateError> {
        if !(peak_end > 0.0 && peak_end <= bkg_begin && bkg_begin < bkg_end) {
            return Err(IntegrateError::BadScales {
                peak_end,
                bkg_begin,
                bkg_end,
            });
        }
        Ok(IntegrationRegion {
            shape,
            peak_end,
            bkg_begin,
            bkg_end,
        })
    }

    pub fn shape(&self) -> &Ellipsoid {
        &self.shape
    }

    /// Bounding box of the outer background ellipsoid.
    pub fn aabb(&self) -> Aabb {
        self.shape.scaled(self.bkg_end).aabb()
    }

    /// Bounding box of the signal ellipsoid.
    pub fn peak_aabb(&self) -> Aabb {
        self.shape.scaled(self.peak_end).aabb()
    }

    /// Squared metric radius of a point.
    pub fn r2(&self, p: Vector3<f64>) -> f64 {
        self.shape.r2(p)
    }

    pub fn classify(&self, p: Vector3<f64>) -> EventType {
        let rr = self.shape.r2(p);
        if rr <= self.peak_end * self.peak_end {
            EventType::Peak
        } else if rr > self.bkg_end * self.bkg_end {
            EventType::Excluded
        } else if rr >= self.bkg_begin * self.bkg_begin {
            EventType::Background
        } else {
            EventType::Forbidden
        }
    }
}

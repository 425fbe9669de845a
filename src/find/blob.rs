// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Running-moment accumulation of connected intensity regions.
//!
//! A blob records mass, first and second moments as pixels are added, so the
//! cost of a labelling pass stays linear in pixel count and blobs can be
//! merged without revisiting their pixels. The moment analysis turns a blob
//! into an ellipsoid.

use nalgebra::{Matrix3, Vector3};

use crate::geometry::{Ellipsoid, GeometryError};

const MINIMUM_BLOB_MASS: f64 = 1e-15;

#[derive(Clone, Debug)]
pub struct Blob3D {
    m0: f64,
    m1: Vector3<f64>,
    m2: Matrix3<f64>,
    n_points: usize,
    min_value: f64,
    max_value: f64,
}

impl Default for Blob3D {
    fn default() -> Blob3D {
        Blob3D {
            m0: 0.0,
            m1: Vector3::zeros(),
            m2: Matrix3::zeros(),
            n_points: 0,
            min_value: f64::MAX,
            max_value: f64::MIN,
        }
    }
}

impl Blob3D {
    pub fn new() -> Blob3D {
        Blob3D::default()
    }

    pub fn add_point(&mut self, x: f64, y: f64, z: f64, mass: f64) {
        let v = Vector3::new(x, y, z);
        self.m0 += mass;
        self.m1 += mass * v;
        self.m2 += mass * v * v.transpose();
        self.n_points += 1;
        self.min_value = self.min_value.min(mass);
        self.max_value = self.max_value.max(mass);
    }

    pub fn merge(&mut self, other: &Blob3D) {
        self.m0 += other.m0;
        self.m1 += other.m1;
        self.m2 += other.m2;
        self.n_points += other.n_points;
        self.min_value = self.min_value.min(other.min_value);
        self.max_value = self.max_value.max(other.max_value);
    }

    pub fn mass(&self) -> f64 {
        self.m0
    }

    pub fn n_points(&self) -> usize {
        self.n_points
    }

    pub fn min_value(&self) -> f64 {
        self.min_value
    }

    pub fn max_value(&self) -> f64 {
        self.max_value
    }

    pub fn centre(&self) -> Result<Vector3<f64>, GeometryError> {
        if self.m0 < MINIMUM_BLOB_MASS {
            return Err(GeometryError::ZeroMass);
        }
        Ok(self.m1 / self.m0)
    }

    /// Mass-weighted covariance of the blob's pixels.
    pub fn covariance(&self) -> Result<Matrix3<f64>, GeometryError> {
        let c = self.centre()?;
        Ok(self.m2 / self.m0 - c * c.transpose())
    }

    /// Convert the blob to an ellipsoid whose semi-axes are `scale` standard
    /// deviations of the intensity distribution. A blob whose inertia tensor
    /// has a non-positive eigenvalue (a line or plane of pixels) is rejected
    /// rather than patched up.
    pub fn to_ellipsoid(&self, scale: f64) -> Result<Ellipsoid, GeometryError> {
        let centre = self.centre()?;
        let inertia = self.covariance()?;

        let eigen = nalgebra::SymmetricEigen::new(inertia);
        if eigen.eigenvalues.iter().any(|&l| l <= 0.0) {
            return Err(GeometryError::NotPositiveDefinite);
        }
        let semi_axes = Vector3::new(
            scale * eigen.eigenvalues[0].sqrt(),
            scale * eigen.eigenvalues[1].sqrt(),
            scale * eigen.eigenvalues[2].sqrt(),
        );
        Ellipsoid::from_axes(centre, semi_axes, eigen.eigenvectors)
    }
}

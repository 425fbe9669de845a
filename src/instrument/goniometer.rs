// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Goniometer axis chains.
//!
//! A goniometer is an ordered list of axes, outermost first. The homogeneous
//! transform at a set of axis values is the ordered product of the individual
//! axis transforms, so the innermost axis acts on the sample first.

use nalgebra::{Isometry3, Matrix3, Rotation3, Translation3, UnitQuaternion, UnitVector3, Vector3};

use super::InstrumentError;

#[derive(Clone, Debug, PartialEq)]
pub enum AxisKind {
    /// Rotation about `direction`; `clockwise` negates the angle.
    Rotation { clockwise: bool },
    /// Translation along `direction`.
    Translation,
}

#[derive(Clone, Debug)]
pub struct Axis {
    pub name: String,
    pub kind: AxisKind,
    pub direction: Vector3<f64>,
    /// Physical axes consume one value from the scan metadata; virtual ones
    /// are fixed at zero.
    pub physical: bool,
    /// Per-axis offset added to every supplied value.
    pub offset: f64,
}

impl Axis {
    pub fn rotation(name: &str, direction: Vector3<f64>, clockwise: bool) -> Axis {
        Axis {
            name: name.to_string(),
            kind: AxisKind::Rotation { clockwise },
            direction,
            physical: true,
            offset: 0.0,
        }
    }

    pub fn translation(name: &str, direction: Vector3<f64>) -> Axis {
        Axis {
            name: name.to_string(),
            kind: AxisKind::Translation,
            direction,
            physical: true,
            offset: 0.0,
        }
    }

    /// Transform of this axis at the given value (radians or metres).
    pub fn transform(&self, value: f64) -> Isometry3<f64> {
        let value = value + self.offset;
        match self.kind {
            AxisKind::Rotation { clockwise } => {
                let angle = if clockwise { -value } else { value };
                let axis = UnitVector3::new_normalize(self.direction);
                Isometry3::from_parts(
                    Translation3::identity(),
                    UnitQuaternion::from_axis_angle(&axis, angle),
                )
            }
            AxisKind::Translation => Isometry3::from_parts(
                Translation3::from(self.direction.normalize() * value),
                UnitQuaternion::identity(),
            ),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct Goniometer {
    pub name: String,
    pub axes: Vec<Axis>,
}

impl Goniometer {
    pub fn new(name: &str, axes: Vec<Axis>) -> Goniometer {
        Goniometer {
            name: name.to_string(),
            axes,
        }
    }

    pub fn empty(name: &str) -> Goniometer {
        Goniometer::new(name, Vec::new())
    }

    pub fn n_axes(&self) -> usize {
        self.axes.len()
    }

    pub fn n_physical_axes(&self) -> usize {
        self.axes.iter().filter(|a| a.physical).count()
    }

    /// Homogeneous transform at the given physical-axis values. Virtual axes
    /// stay at zero; the value list must match the physical axis count.
    pub fn transform(&self, values: &[f64]) -> Result<Isometry3<f64>, InstrumentError> {
        if values.len() != self.n_physical_axes() {
            return Err(InstrumentError::AxisCountMismatch {
                gonio: self.name.clone(),
                expected: self.n_physical_axes(),
                got: values.len(),
            });
        }
        let mut iso = Isometry3::identity();
        let mut vi = 0;
        for axis in &self.axes {
            let value = if axis.physical {
                let v = values[vi];
                vi += 1;
                v
            } else {
                0.0
            };
            iso *= axis.transform(value);
        }
        Ok(iso)
    }

    /// Rotation part of the transform as a matrix.
    pub fn orientation(&self, values: &[f64]) -> Result<Matrix3<f64>, InstrumentError> {
        Ok(Rotation3::from(self.transform(values)?.rotation)
            .matrix()
            .to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn clockwise_rotation_negates_the_angle() {
        let cw = Axis::rotation("omega", Vector3::z(), true);
        let ccw = Axis::rotation("omega", Vector3::z(), false);
        let p = nalgebra::Point3::new(1.0, 0.0, 0.0);
        let a = std::f64::consts::FRAC_PI_2;
        assert_abs_diff_eq!(
            cw.transform(a).transform_point(&p).coords,
            Vector3::new(0.0, -1.0, 0.0),
            epsilon = 1e-12
        );
        assert_abs_diff_eq!(
            ccw.transform(a).transform_point(&p).coords,
            Vector3::new(0.0, 1.0, 0.0),
            epsilon = 1e-12
        );
    }

    #[test]
    fn chain_applies_innermost_axis_first() {
        // outer: rotation of 90 deg about z; inner: translation along x.
        // A point at the origin first moves along x, then rotates to +y.
        let g = Goniometer::new(
            "sample-gonio",
            vec![
                Axis::rotation("omega", Vector3::z(), false),
                Axis::translation("tx", Vector3::x()),
            ],
        );
        let iso = g
            .transform(&[std::f64::consts::FRAC_PI_2, 2.0])
            .unwrap();
        let p = iso.transform_point(&nalgebra::Point3::origin());
        assert_abs_diff_eq!(p.coords, Vector3::new(0.0, 2.0, 0.0), epsilon = 1e-12);
    }

    #[test]
    fn virtual_axes_consume_no_values() {
        let mut nu = Axis::rotation("2theta(nu)", Vector3::x(), true);
        nu.physical = false;
        let g = Goniometer::new(
            "detector-gonio",
            vec![Axis::rotation("2theta(gamma)", Vector3::z(), true), nu],
        );
        assert_eq!(g.n_physical_axes(), 1);
        assert!(g.transform(&[0.3]).is_ok());
        assert!(matches!(
            g.transform(&[0.3, 0.1]),
            Err(InstrumentError::AxisCountMismatch { .. })
        ));
    }

    #[test]
    fn per_axis_offsets_apply() {
        let mut ax = Axis::rotation("phi", Vector3::z(), false);
        ax.offset = 0.1;
        let g = Goniometer::new("gonio", vec![ax]);
        let m = g.orientation(&[0.2]).unwrap();
        let expected = Rotation3::from_axis_angle(&UnitVector3::new_normalize(Vector3::z()), 0.3);
        assert_abs_diff_eq!(m, *expected.matrix(), epsilon = 1e-12);
    }
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Ellipsoids in metric form.
//!
//! An ellipsoid is the set `{ x : (x - c)^T M (x - c) <= 1 }` for a centre
//! `c` and a symmetric positive-definite metric `M`. Both the metric and its
//! inverse are cached because the integration and collision paths hit them in
//! tight per-pixel loops.

use nalgebra::{Matrix2, Matrix3, Matrix4, Vector2, Vector3};

use super::{Aabb, GeometryError};

#[derive(Clone, Debug)]
pub struct Ellipsoid {
    centre: Vector3<f64>,
    metric: Matrix3<f64>,
    inverse_metric: Matrix3<f64>,
}

impl Ellipsoid {
    /// Construct from a centre and a symmetric positive-definite metric.
    pub fn new(centre: Vector3<f64>, metric: Matrix3<f64>) -> Result<Ellipsoid, GeometryError> {
        // Cholesky doubles as the positive-definiteness check.
        if nalgebra::Cholesky::new(metric).is_none() {
            return Err(GeometryError::NotPositiveDefinite);
        }
        let inverse_metric = metric
            .try_inverse()
            .ok_or(GeometryError::NotPositiveDefinite)?;
        Ok(Ellipsoid {
            centre,
            metric,
            inverse_metric,
        })
    }

    /// Construct from semi-axis lengths and an orthonormal orientation whose
    /// columns are the axis directions.
    pub fn from_axes(
        centre: Vector3<f64>,
        semi_axes: Vector3<f64>,
        axes: Matrix3<f64>,
    ) -> Result<Ellipsoid, GeometryError> {
        if semi_axes.iter().any(|&a| a <= 0.0) {
            return Err(GeometryError::NotPositiveDefinite);
        }
        let d = Matrix3::from_diagonal(&Vector3::new(
            1.0 / (semi_axes.x * semi_axes.x),
            1.0 / (semi_axes.y * semi_axes.y),
            1.0 / (semi_axes.z * semi_axes.z),
        ));
        let metric = axes * d * axes.transpose();
        // symmetrise against roundoff before the SPD check
        let metric = 0.5 * (metric + metric.transpose());
        Ellipsoid::new(centre, metric)
    }

    /// Unit sphere of the given radius.
    pub fn sphere(centre: Vector3<f64>, radius: f64) -> Result<Ellipsoid, GeometryError> {
        Ellipsoid::from_axes(
            centre,
            Vector3::new(radius, radius, radius),
            Matrix3::identity(),
        )
    }

    pub fn centre(&self) -> Vector3<f64> {
        self.centre
    }

    pub fn metric(&self) -> &Matrix3<f64> {
        &self.metric
    }

    pub fn inverse_metric(&self) -> &Matrix3<f64> {
        &self.inverse_metric
    }

    /// Squared metric distance of `p` from the centre; `<= 1` is inside.
    pub fn r2(&self, p: Vector3<f64>) -> f64 {
        let d = p - self.centre;
        d.dot(&(self.metric * d))
    }

    pub fn contains(&self, p: Vector3<f64>) -> bool {
        self.r2(p) <= 1.0
    }

    pub fn translate(&mut self, t: Vector3<f64>) {
        self.centre += t;
    }

    /// Scale the semi-axes by `s`, i.e. `M <- M / s^2`.
    pub fn scale(&mut self, s: f64) {
        self.metric /= s * s;
        self.inverse_metric *= s * s;
    }

    pub fn scaled(&self, s: f64) -> Ellipsoid {
        let mut e = self.clone();
        e.scale(s);
        e
    }

    pub fn volume(&self) -> f64 {
        // det(M^-1) = (abc)^2 for semi-axes a, b, c
        4.0 / 3.0 * std::f64::consts::PI * self.inverse_metric.determinant().sqrt()
    }

    /// Tight axis-aligned bounding box. The half-extent along axis `i` is
    /// `sqrt((M^-1)_ii)`.
    pub fn aabb(&self) -> Aabb {
        let e = Vector3::new(
            self.inverse_metric[(0, 0)].max(0.0).sqrt(),
            self.inverse_metric[(1, 1)].max(0.0).sqrt(),
            self.inverse_metric[(2, 2)].max(0.0).sqrt(),
        );
        Aabb::new(self.centre - e, self.centre + e)
    }

    /// Collision with an axis-aligned box: pad the box by the ellipsoid's
    /// projected half-extents along each box axis, then test containment of
    /// the centre.
    pub fn collide_aabb(&self, b: &Aabb) -> bool {
        let pad = Vector3::new(
            self.inverse_metric[(0, 0)].max(0.0).sqrt(),
            self.inverse_metric[(1, 1)].max(0.0).sqrt(),
            self.inverse_metric[(2, 2)].max(0.0).sqrt(),
        );
        b.pad(pad).contains(self.centre)
    }

    /// Exact overlap test against another ellipsoid.
    ///
    /// Maximises the Perram-Wertheim contact function
    /// `F(t) = t (1 - t) r^T [(1 - t) M1^-1 + t M2^-1]^-1 r`
    /// over `t` in `[0, 1]`; the ellipsoids are disjoint iff the maximum
    /// exceeds 1. `F` is concave on the interval, so a bracketed section
    /// search converges unconditionally.
    pub fn collide(&self, other: &Ellipsoid) -> bool {
        let r = other.centre - self.centre;
        if r.norm_squared() == 0.0 {
            return true;
        }

        let f = |t: f64| -> f64 {
            let m = (1.0 - t) * self.inverse_metric + t * other.inverse_metric;
            match m.try_inverse() {
                Some(minv) => t * (1.0 - t) * r.dot(&(minv * r)),
                None => 0.0,
            }
        };

        // golden-section style refinement of the concave maximum; cheap and
        // free of derivative bookkeeping
        let mut lo = 0.0;
        let mut hi = 1.0;
        for _ in 0..60 {
            let m1 = lo + (hi - lo) / 3.0;
            let m2 = hi - (hi - lo) / 3.0;
            if f(m1) < f(m2) {
                lo = m1;
            } else {
                hi = m2;
            }
        }
        let fmax = f(0.5 * (lo + hi));
        fmax <= 1.0
    }

    /// Homogeneous quadric form: `x^T Q x <= 0` for `x = (p, 1)`.
    pub fn homogeneous(&self) -> Matrix4<f64> {
        let mc = self.metric * self.centre;
        let mut q = Matrix4::zeros();
        q.fixed_view_mut::<3, 3>(0, 0).copy_from(&self.metric);
        q.fixed_view_mut::<3, 1>(0, 3).copy_from(&(-mc));
        q.fixed_view_mut::<1, 3>(3, 0).copy_from(&(-mc.transpose()));
        q[(3, 3)] = self.centre.dot(&mc) - 1.0;
        q
    }

    pub fn homogeneous_inverse(&self) -> Option<Matrix4<f64>> {
        self.homogeneous().try_inverse()
    }

    /// Intersection with the plane `z = frame`. Returns the 2-D centre and
    /// metric of the slice ellipse, or `None` if the plane misses.
    pub fn slice(&self, frame: f64) -> Option<(Vector2<f64>, Matrix2<f64>)> {
        let a2 = self.metric.fixed_view::<2, 2>(0, 0).into_owned();
        let b = Vector2::new(self.metric[(0, 2)], self.metric[(1, 2)]);
        let m33 = self.metric[(2, 2)];
        let w = frame - self.centre.z;

        let a2_inv = a2.try_inverse()?;
        let schur = m33 - b.dot(&(a2_inv * b));
        let rhs = 1.0 - w * w * schur;
        if rhs <= 0.0 {
            return None;
        }
        let centre = Vector2::new(self.centre.x, self.centre.y) - a2_inv * b * w;
        Some((centre, a2 / rhs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn rejects_indefinite_metric() {
        let m = Matrix3::from_diagonal(&Vector3::new(1.0, -1.0, 1.0));
        assert!(Ellipsoid::new(Vector3::zeros(), m).is_err());
    }

    #[test]
    fn metric_inverse_cached() {
        let e = Ellipsoid::from_axes(
            Vector3::new(1.0, 2.0, 3.0),
            Vector3::new(1.0, 2.0, 3.0),
            Matrix3::identity(),
        )
        .unwrap();
        let prod = e.metric() * e.inverse_metric();
        assert_abs_diff_eq!(prod, Matrix3::identity(), epsilon = 1e-12);
    }

    #[test]
    fn aabb_of_axis_aligned() {
        let e = Ellipsoid::from_axes(
            Vector3::zeros(),
            Vector3::new(1.0, 2.0, 3.0),
            Matrix3::identity(),
        )
        .unwrap();
        let bb = e.aabb();
        assert_abs_diff_eq!(bb.lower(), Vector3::new(-1.0, -2.0, -3.0), epsilon = 1e-12);
        assert_abs_diff_eq!(bb.upper(), Vector3::new(1.0, 2.0, 3.0), epsilon = 1e-12);
    }

    #[test]
    fn scaling_divides_metric() {
        let mut e = Ellipsoid::sphere(Vector3::zeros(), 1.0).unwrap();
        e.scale(2.0);
        assert!(e.contains(Vector3::new(1.9, 0.0, 0.0)));
        assert!(!e.contains(Vector3::new(2.1, 0.0, 0.0)));
        assert_abs_diff_eq!(e.volume(), 4.0 / 3.0 * std::f64::consts::PI * 8.0, epsilon = 1e-9);
    }

    #[test]
    fn sphere_collisions() {
        let a = Ellipsoid::sphere(Vector3::zeros(), 0.45).unwrap();
        let b = Ellipsoid::sphere(Vector3::new(1.0, 0.0, 0.0), 0.45).unwrap();
        // gap of 0.1 between surfaces
        assert!(!a.collide(&b));

        let c = Ellipsoid::sphere(Vector3::new(0.5, 0.5, 0.5), 0.45).unwrap();
        // distance sqrt(0.75) ~ 0.866 < 0.9
        assert!(a.collide(&c));

        // touching spheres count as colliding
        let d = Ellipsoid::sphere(Vector3::new(0.9, 0.0, 0.0), 0.45).unwrap();
        assert!(a.collide(&d));
    }

    #[test]
    fn anisotropic_collision() {
        // long thin ellipsoid along x against a sphere just off its tip
        let e = Ellipsoid::from_axes(
            Vector3::zeros(),
            Vector3::new(3.0, 0.2, 0.2),
            Matrix3::identity(),
        )
        .unwrap();
        let near = Ellipsoid::sphere(Vector3::new(3.5, 0.0, 0.0), 0.6).unwrap();
        let far = Ellipsoid::sphere(Vector3::new(0.0, 1.0, 0.0), 0.6).unwrap();
        assert!(e.collide(&near));
        assert!(!e.collide(&far));
    }

    #[test]
    fn aabb_collision_pads_box() {
        let e = Ellipsoid::sphere(Vector3::new(2.0, 0.5, 0.5), 0.6).unwrap();
        let b = Aabb::new(Vector3::zeros(), Vector3::new(1.0, 1.0, 1.0));
        assert!(e.collide_aabb(&b));
        let far = Ellipsoid::sphere(Vector3::new(2.7, 0.5, 0.5), 0.6).unwrap();
        assert!(!far.collide_aabb(&b));
    }

    #[test]
    fn plane_slice() {
        let e = Ellipsoid::from_axes(
            Vector3::new(0.0, 0.0, 5.0),
            Vector3::new(2.0, 1.0, 3.0),
            Matrix3::identity(),
        )
        .unwrap();
        let (c, m) = e.slice(5.0).unwrap();
        assert_abs_diff_eq!(c, Vector2::zeros(), epsilon = 1e-12);
        // full cross-section: semi-axes 2 and 1
        assert_abs_diff_eq!(m[(0, 0)], 0.25, epsilon = 1e-12);
        assert_abs_diff_eq!(m[(1, 1)], 1.0, epsilon = 1e-12);

        assert!(e.slice(8.5).is_none());
        assert!(e.slice(7.9).is_some());
    }

    #[test]
    fn homogeneous_form_vanishes_on_surface() {
        let e = Ellipsoid::from_axes(
            Vector3::new(1.0, -1.0, 0.5),
            Vector3::new(1.5, 1.0, 0.5),
            Matrix3::identity(),
        )
        .unwrap();
        let q = e.homogeneous();
        let p = e.centre() + Vector3::new(1.5, 0.0, 0.0);
        let x = nalgebra::Vector4::new(p.x, p.y, p.z, 1.0);
        assert_abs_diff_eq!((x.transpose() * q * x)[(0, 0)], 0.0, epsilon = 1e-10);
    }
}

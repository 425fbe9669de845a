// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Axis-aligned bounding boxes.

use nalgebra::Vector3;

/// An axis-aligned box given by its lower and upper corners.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Aabb {
    lower: Vector3<f64>,
    upper: Vector3<f64>,
}

impl Aabb {
    pub fn new(lower: Vector3<f64>, upper: Vector3<f64>) -> Aabb {
        Aabb { lower, upper }
    }

    pub fn lower(&self) -> Vector3<f64> {
        self.lower
    }

    pub fn upper(&self) -> Vector3<f64> {
        self.upper
    }

    pub fn centre(&self) -> Vector3<f64> {
        0.5 * (self.lower + self.upper)
    }

    /// Half-widths along each axis.
    pub fn extents(&self) -> Vector3<f64> {
        0.5 * (self.upper - self.lower)
    }

    pub fn volume(&self) -> f64 {
        let d = self.upper - self.lower;
        d.x * d.y * d.z
    }

    pub fn translate(&mut self, t: Vector3<f64>) {
        self.lower += t;
        self.upper += t;
    }

    /// Scale the box about its centre.
    pub fn scale(&mut self, s: f64) {
        let c = self.centre();
        let e = self.extents() * s;
        self.lower = c - e;
        self.upper = c + e;
    }

    /// Grow the box by `pad` on every side.
    pub fn pad(&self, pad: Vector3<f64>) -> Aabb {
        Aabb {
            lower: self.lower - pad,
            upper: self.upper + pad,
        }
    }

    pub fn contains(&self, p: Vector3<f64>) -> bool {
        (0..3).all(|i| p[i] >= self.lower[i] && p[i] <= self.upper[i])
    }

    /// Interval-overlap test on each axis.
    pub fn collide(&self, other: &Aabb) -> bool {
        (0..3).all(|i| self.lower[i] <= other.upper[i] && self.upper[i] >= other.lower[i])
    }

    /// Slab intersection of the ray `origin + t * dir` with the box. Returns
    /// the entry and exit parameters `(t1, t2)` with `t1 <= t2`, or `None` if
    /// the ray misses.
    pub fn ray_intersect(&self, origin: Vector3<f64>, dir: Vector3<f64>) -> Option<(f64, f64)> {
        let mut t1 = f64::NEG_INFINITY;
        let mut t2 = f64::INFINITY;

        for i in 0..3 {
            if dir[i].abs() < f64::EPSILON {
                // Ray parallel to this slab: must already be inside it.
                if origin[i] < self.lower[i] || origin[i] > self.upper[i] {
                    return None;
                }
                continue;
            }
            let inv = 1.0 / dir[i];
            let mut ta = (self.lower[i] - origin[i]) * inv;
            let mut tb = (self.upper[i] - origin[i]) * inv;
            if ta > tb {
                std::mem::swap(&mut ta, &mut tb);
            }
            t1 = t1.max(ta);
            t2 = t2.min(tb);
            if t1 > t2 {
                return None;
            }
        }
        Some((t1, t2))
    }
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! First Brillouin zone of a reciprocal lattice.
//!
//! The zone is the intersection of the half-spaces `2 x . g <= |g|^2` over
//! the short reciprocal lattice vectors `g`. Only lattice vectors within a
//! radius proportional to the shortest basis norm can contribute faces, so
//! the candidate set stays small.

use nalgebra::{Matrix3, Vector3};

use super::{ConvexHull, GeometryError};

/// Lattice vectors beyond this multiple of the shortest reciprocal basis
/// norm cannot cut the zone.
const SEARCH_RADIUS_FACTOR: f64 = 2.0;

#[derive(Clone, Debug)]
pub struct BrillouinZone {
    /// One representative of each +-g face pair.
    normals: Vec<Vector3<f64>>,
    vertices: Vec<Vector3<f64>>,
    hull: ConvexHull,
    eps: f64,
}

impl BrillouinZone {
    /// Build the zone of the reciprocal basis `b` (rows are the reciprocal
    /// basis vectors). `eps` is the relative tolerance of the `inside` test.
    pub fn new(b: &Matrix3<f64>, eps: f64) -> Result<BrillouinZone, GeometryError> {
        let rows: Vec<Vector3<f64>> = (0..3).map(|i| b.row(i).transpose()).collect();
        let qmin = rows.iter().map(|r| r.norm()).fold(f64::INFINITY, f64::min);
        let radius = SEARCH_RADIUS_FACTOR * qmin * 3.0_f64.sqrt();
        let bound = (0..3)
            .map(|i| (radius / rows[i].norm()).ceil() as i64)
            .max()
            .unwrap_or(1)
            .max(1);

        // candidate lattice vectors, one per +-pair
        let mut candidates: Vec<Vector3<f64>> = Vec::new();
        for h in -bound..=bound {
            for k in -bound..=bound {
                for l in -bound..=bound {
                    if (h, k, l) <= (0, 0, 0) {
                        continue;
                    }
                    let g = h as f64 * rows[0] + k as f64 * rows[1] + l as f64 * rows[2];
                    if g.norm() <= radius {
                        candidates.push(g);
                    }
                }
            }
        }
        candidates.sort_by(|a, b| a.norm().partial_cmp(&b.norm()).unwrap());

        // drop half-spaces made redundant by shorter ones
        let mut normals: Vec<Vector3<f64>> = Vec::new();
        for g in &candidates {
            let mid = 0.5 * g;
            let redundant = normals
                .iter()
                .any(|n| 2.0 * mid.dot(n).abs() > n.norm_squared() * (1.0 + eps));
            if !redundant {
                normals.push(*g);
            }
        }

        // zone vertices: intersections of three face planes that satisfy
        // every remaining constraint
        let mut planes: Vec<(Vector3<f64>, f64)> = Vec::new();
        for n in &normals {
            planes.push((*n, 0.5 * n.norm_squared()));
            planes.push((-*n, 0.5 * n.norm_squared()));
        }
        let mut vertices: Vec<Vector3<f64>> = Vec::new();
        for i in 0..planes.len() {
            for j in (i + 1)..planes.len() {
                for k in (j + 1)..planes.len() {
                    let m = Matrix3::from_rows(&[
                        planes[i].0.transpose(),
                        planes[j].0.transpose(),
                        planes[k].0.transpose(),
                    ]);
                    let rhs = Vector3::new(planes[i].1, planes[j].1, planes[k].1);
                    if m.determinant().abs() < 1e-12 {
                        continue;
                    }
                    let inv = match m.try_inverse() {
                        Some(inv) => inv,
                        None => continue,
                    };
                    let x = inv * rhs;
                    let ok = planes
                        .iter()
                        .all(|(n, c)| x.dot(n) <= c * (1.0 + eps) + 1e-12);
                    if ok && !vertices.iter().any(|v| (v - x).norm() < 1e-9) {
                        vertices.push(x);
                    }
                }
            }
        }

        // prune normals whose face plane does not touch the zone
        let touching: Vec<Vector3<f64>> = normals
            .into_iter()
            .filter(|n| {
                let c = 0.5 * n.norm_squared();
                vertices
                    .iter()
                    .any(|v| (v.dot(n).abs() - c).abs() < 1e-9 * (1.0 + c))
            })
            .collect();

        let mut hull = ConvexHull::new();
        for v in &vertices {
            hull.add_vertex(*v);
        }
        hull.update_hull()?;

        Ok(BrillouinZone {
            normals: touching,
            vertices,
            hull,
            eps,
        })
    }

    /// One representative per opposite face pair; the zone has twice as many
    /// faces as there are normals.
    pub fn normals(&self) -> &[Vector3<f64>] {
        &self.normals
    }

    pub fn vertices(&self) -> &[Vector3<f64>] {
        &self.vertices
    }

    pub fn convex_hull(&self) -> &ConvexHull {
        &self.hull
    }

    /// Whether `q` lies in the first zone.
    pub fn inside(&self, q: Vector3<f64>) -> bool {
        self.normals
            .iter()
            .all(|g| 2.0 * q.dot(g).abs() <= g.norm_squared() * (1.0 + self.eps))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn cubic_zone_is_the_unit_cube() {
        let zone = BrillouinZone::new(&Matrix3::identity(), 1e-6).unwrap();

        assert_eq!(zone.vertices().len(), 8);
        assert_eq!(2 * zone.normals().len(), 6);
        assert_eq!(zone.convex_hull().n_vertices(), 8);
        assert_abs_diff_eq!(zone.convex_hull().volume(), 1.0, epsilon = 1e-8);

        for n in zone.normals() {
            assert!(zone.inside(0.5 * n));
            assert!(zone.inside(-0.5 * n));
            assert!(!zone.inside(0.51 * n));
            assert!(!zone.inside(-0.51 * n));
        }
    }

    #[test]
    fn face_midpoints_and_vertices() {
        // orthorhombic lattice
        let b = Matrix3::from_diagonal(&Vector3::new(0.8, 1.0, 1.25));
        let zone = BrillouinZone::new(&b, 1e-6).unwrap();
        assert_abs_diff_eq!(
            zone.convex_hull().volume(),
            b.determinant().abs(),
            epsilon = 1e-8
        );
        for v in zone.vertices() {
            assert!(zone.inside(*v));
            assert!(!zone.inside(1.01 * v));
        }
    }

    #[test]
    fn triclinic_zone_volume_matches_determinant() {
        // a deliberately skewed reciprocal basis
        let b = Matrix3::new(1.0, 0.1, 0.05, 0.0, 0.9, 0.1, 0.0, 0.0, 1.1);
        let zone = BrillouinZone::new(&b, 1e-6).unwrap();
        assert_abs_diff_eq!(
            zone.convex_hull().volume(),
            b.determinant().abs(),
            epsilon = 1e-6
        );
        for n in zone.normals() {
            assert!(zone.inside(0.5 * n));
            assert!(!zone.inside(0.52 * n));
        }
    }
}

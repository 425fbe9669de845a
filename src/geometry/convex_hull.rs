// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Incremental three-dimensional convex hull.
//!
//! Vertices are collected with [`ConvexHull::add_vertex`] and the hull is
//! (re)built by [`ConvexHull::update_hull`]. Faces are stored as outward
//! oriented triangles indexing into the vertex arena; adding a vertex outside
//! the current hull removes every face it can see and cones new triangles
//! over the horizon edges.

use std::collections::HashMap;

use nalgebra::Vector3;

use super::{Aabb, GeometryError};

const COPLANARITY_EPS: f64 = 1e-10;

#[derive(Clone, Copy, Debug)]
struct Face {
    v: [usize; 3],
}

#[derive(Clone, Debug, Default)]
pub struct ConvexHull {
    points: Vec<Vector3<f64>>,
    faces: Vec<Face>,
}

/// Six times the signed volume of the tetrahedron (a, b, c, d). Positive when
/// `d` lies on the inner side of the outward-oriented triangle (a, b, c).
fn volume_sign(a: Vector3<f64>, b: Vector3<f64>, c: Vector3<f64>, d: Vector3<f64>) -> f64 {
    (b - a).cross(&(c - a)).dot(&(a - d))
}

impl ConvexHull {
    pub fn new() -> ConvexHull {
        ConvexHull::default()
    }

    pub fn add_vertex(&mut self, p: Vector3<f64>) {
        self.points.push(p);
    }

    /// Rebuild the hull from all collected vertices.
    pub fn update_hull(&mut self) -> Result<(), GeometryError> {
        if self.points.len() < 4 {
            return Err(GeometryError::TooFewVertices(self.points.len()));
        }
        self.faces.clear();

        let seed = self.initial_tetrahedron()?;
        for f in seed {
            self.faces.push(f);
        }

        let n = self.points.len();
        for i in 0..n {
            self.insert_point(i);
        }

        debug_assert_eq!(
            self.n_vertices() as i64 - self.n_edges() as i64 + self.n_faces() as i64,
            2,
            "hull violates the Euler relation"
        );
        Ok(())
    }

    /// Find four non-coplanar points and return the four outward-oriented
    /// triangles of their tetrahedron.
    fn initial_tetrahedron(&self) -> Result<[Face; 4], GeometryError> {
        let pts = &self.points;
        let i0 = 0;
        let i1 = (1..pts.len())
            .find(|&i| (pts[i] - pts[i0]).norm() > COPLANARITY_EPS)
            .ok_or(GeometryError::DegenerateHull)?;
        let i2 = (1..pts.len())
            .find(|&i| {
                (pts[i1] - pts[i0])
                    .cross(&(pts[i] - pts[i0]))
                    .norm()
                    > COPLANARITY_EPS
            })
            .ok_or(GeometryError::DegenerateHull)?;
        let i3 = (1..pts.len())
            .find(|&i| volume_sign(pts[i0], pts[i1], pts[i2], pts[i]).abs() > COPLANARITY_EPS)
            .ok_or(GeometryError::DegenerateHull)?;

        // orient all four faces outwards
        let (a, b, c, d) = (i0, i1, i2, i3);
        let mk = |x: usize, y: usize, z: usize, opposite: usize| -> Face {
            if volume_sign(pts[x], pts[y], pts[z], pts[opposite]) >= 0.0 {
                Face { v: [x, y, z] }
            } else {
                Face { v: [x, z, y] }
            }
        };
        Ok([
            mk(a, b, c, d),
            mk(a, b, d, c),
            mk(a, c, d, b),
            mk(b, c, d, a),
        ])
    }

    fn insert_point(&mut self, idx: usize) {
        let p = self.points[idx];

        // faces the point can see; on-plane counts as visible so that points
        // landing on an existing face become hull vertices
        let visible: Vec<usize> = (0..self.faces.len())
            .filter(|&f| {
                let [a, b, c] = self.faces[f].v;
                volume_sign(self.points[a], self.points[b], self.points[c], p) < COPLANARITY_EPS
            })
            .collect();
        if visible.is_empty() {
            return;
        }

        // horizon edges: directed edges of visible faces whose reverse edge
        // is not part of any visible face
        let mut edge_count: HashMap<(usize, usize), usize> = HashMap::new();
        for &f in &visible {
            let [a, b, c] = self.faces[f].v;
            for (u, v) in [(a, b), (b, c), (c, a)] {
                *edge_count.entry((u, v)).or_insert(0) += 1;
            }
        }
        let horizon: Vec<(usize, usize)> = edge_count
            .keys()
            .filter(|&&(u, v)| !edge_count.contains_key(&(v, u)))
            .copied()
            .collect();

        // drop visible faces (reverse order keeps indices valid)
        let mut sorted = visible;
        sorted.sort_unstable_by(|a, b| b.cmp(a));
        for f in sorted {
            self.faces.swap_remove(f);
        }

        // cone new faces over the horizon, keeping outward orientation
        for (u, v) in horizon {
            self.faces.push(Face { v: [u, v, idx] });
        }
    }

    /// Indices of the vertices that lie on the hull surface.
    fn hull_vertex_ids(&self) -> Vec<usize> {
        let mut ids: Vec<usize> = self.faces.iter().flat_map(|f| f.v).collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    pub fn n_vertices(&self) -> usize {
        self.hull_vertex_ids().len()
    }

    pub fn n_faces(&self) -> usize {
        self.faces.len()
    }

    pub fn n_edges(&self) -> usize {
        let mut edges: Vec<(usize, usize)> = Vec::with_capacity(3 * self.faces.len());
        for f in &self.faces {
            let [a, b, c] = f.v;
            for (u, v) in [(a, b), (b, c), (c, a)] {
                edges.push((u.min(v), u.max(v)));
            }
        }
        edges.sort_unstable();
        edges.dedup();
        edges.len()
    }

    pub fn vertices(&self) -> Vec<Vector3<f64>> {
        self.hull_vertex_ids()
            .into_iter()
            .map(|i| self.points[i])
            .collect()
    }

    /// Signed-volume convexity certificate: every vertex lies on the inner
    /// side of every face.
    pub fn is_convex(&self) -> bool {
        self.faces.iter().all(|f| {
            let [a, b, c] = f.v;
            self.hull_vertex_ids().iter().all(|&i| {
                volume_sign(self.points[a], self.points[b], self.points[c], self.points[i])
                    >= -COPLANARITY_EPS
            })
        })
    }

    pub fn contains(&self, p: Vector3<f64>) -> bool {
        !self.faces.is_empty()
            && self.faces.iter().all(|f| {
                let [a, b, c] = f.v;
                volume_sign(self.points[a], self.points[b], self.points[c], p) >= -COPLANARITY_EPS
            })
    }

    /// Hull volume by summing signed tetrahedra against the centroid.
    pub fn volume(&self) -> f64 {
        if self.faces.is_empty() {
            return 0.0;
        }
        let ids = self.hull_vertex_ids();
        let centroid: Vector3<f64> =
            ids.iter().map(|&i| self.points[i]).sum::<Vector3<f64>>() / ids.len() as f64;
        self.faces
            .iter()
            .map(|f| {
                let [a, b, c] = f.v;
                volume_sign(self.points[a], self.points[b], self.points[c], centroid) / 6.0
            })
            .sum()
    }

    pub fn aabb(&self) -> Aabb {
        let mut lower = Vector3::repeat(f64::INFINITY);
        let mut upper = Vector3::repeat(f64::NEG_INFINITY);
        for &i in &self.hull_vertex_ids() {
            let p = self.points[i];
            for k in 0..3 {
                lower[k] = lower[k].min(p[k]);
                upper[k] = upper[k].max(p[k]);
            }
        }
        Aabb::new(lower, upper)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn cube_hull() -> ConvexHull {
        let mut hull = ConvexHull::new();
        for x in [0.0, 1.0] {
            for y in [0.0, 1.0] {
                for z in [0.0, 1.0] {
                    hull.add_vertex(Vector3::new(x, y, z));
                }
            }
        }
        hull.update_hull().unwrap();
        hull
    }

    #[test]
    fn too_few_vertices() {
        let mut hull = ConvexHull::new();
        hull.add_vertex(Vector3::zeros());
        hull.add_vertex(Vector3::new(1.0, 0.0, 0.0));
        hull.add_vertex(Vector3::new(0.0, 1.0, 0.0));
        assert!(matches!(
            hull.update_hull(),
            Err(GeometryError::TooFewVertices(3))
        ));
    }

    #[test]
    fn tetrahedron() {
        let mut hull = ConvexHull::new();
        hull.add_vertex(Vector3::zeros());
        hull.add_vertex(Vector3::new(1.0, 0.0, 0.0));
        hull.add_vertex(Vector3::new(0.0, 1.0, 0.0));
        hull.add_vertex(Vector3::new(0.0, 0.0, 1.0));
        hull.update_hull().unwrap();

        assert_eq!(hull.n_vertices(), 4);
        assert_eq!(hull.n_edges(), 6);
        assert_eq!(hull.n_faces(), 4);
        assert!(hull.is_convex());
        assert_abs_diff_eq!(hull.volume(), 1.0 / 6.0, epsilon = 1e-12);
    }

    #[test]
    fn cube_euler_relation() {
        let hull = cube_hull();
        // triangulated cube: 8 vertices, 18 edges, 12 faces
        assert_eq!(hull.n_vertices(), 8);
        assert_eq!(
            hull.n_vertices() as i64 - hull.n_edges() as i64 + hull.n_faces() as i64,
            2
        );
        assert!(hull.is_convex());
        assert_abs_diff_eq!(hull.volume(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn interior_points_are_discarded() {
        let mut hull = cube_hull();
        hull.add_vertex(Vector3::new(0.5, 0.5, 0.5));
        hull.update_hull().unwrap();
        assert_eq!(hull.n_vertices(), 8);
        assert_abs_diff_eq!(hull.volume(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn exterior_point_extends_hull() {
        let mut hull = cube_hull();
        hull.add_vertex(Vector3::new(0.5, 0.5, 2.0));
        hull.update_hull().unwrap();
        assert_eq!(hull.n_vertices(), 9);
        assert!(hull.is_convex());
        // cube plus pyramid of height 1 over a unit square
        assert_abs_diff_eq!(hull.volume(), 1.0 + 1.0 / 3.0, epsilon = 1e-12);
        assert_eq!(
            hull.n_vertices() as i64 - hull.n_edges() as i64 + hull.n_faces() as i64,
            2
        );
    }

    #[test]
    fn containment() {
        let hull = cube_hull();
        assert!(hull.contains(Vector3::new(0.5, 0.5, 0.5)));
        assert!(hull.contains(Vector3::new(0.0, 0.0, 0.0)));
        assert!(!hull.contains(Vector3::new(1.2, 0.5, 0.5)));
    }
}

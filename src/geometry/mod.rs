// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Geometric primitives used throughout the reduction pipeline: axis-aligned
//! boxes, ellipsoids, convex hulls, Brillouin zones and a spatial octree.

mod aabb;
mod brillouin;
mod convex_hull;
mod ellipsoid;
mod octree;

pub use aabb::Aabb;
pub use brillouin::BrillouinZone;
pub use convex_hull::ConvexHull;
pub use ellipsoid::Ellipsoid;
pub use octree::Octree;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum GeometryError {
    #[error("ellipsoid metric is not positive-definite")]
    NotPositiveDefinite,

    #[error("convex hull needs at least 4 non-coplanar vertices, got {0}")]
    TooFewVertices(usize),

    #[error("convex hull vertices are degenerate (coplanar or coincident)")]
    DegenerateHull,

    #[error("zero-mass blob cannot be converted to an ellipsoid")]
    ZeroMass,
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Crystallography: unit cells, lattice reduction, space groups and the
//! FFT auto-indexer.

mod gruber;
mod indexer;
mod niggli;
mod space_group;
mod unit_cell;

pub use gruber::{gruber_reduce, GruberSolution};
pub use indexer::{AutoIndexer, IndexerParameters, IndexerSolution};
pub use niggli::{is_niggli_reduced, niggli_reduce};
pub use space_group::{SpaceGroup, SymmetryOp};
pub use unit_cell::{BravaisType, LatticeCentring, MillerIndex, UnitCell};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CrystalError {
    #[error("too few observations to index ({0})")]
    TooFewObservations(usize),

    #[error("candidate basis vectors are coplanar")]
    CoplanarBasis,

    #[error("lattice reduction did not converge after {0} iterations")]
    ReductionDidNotConverge(usize),

    #[error("reduction tolerance must be > 0, got {0}")]
    BadTolerance(f64),

    #[error("unknown space group '{0}'")]
    UnknownSpaceGroup(String),

    #[error("singular basis matrix")]
    SingularBasis,
}

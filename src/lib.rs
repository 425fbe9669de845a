// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Data reduction for neutron single-crystal diffraction.
//!
//! The pipeline turns a stack of detector frames into a merged table of
//! structure-factor intensities: blob search, auto-indexing, refinement of
//! the lattice and instrument state, prediction, integration and merging
//! under a space group.

pub mod crystal;
pub mod data;
pub(crate) mod error;
pub mod find;
pub mod geometry;
pub mod instrument;
pub mod integrate;
pub mod merge;
pub mod peak;
pub mod predict;
pub(crate) mod progress;
pub mod refine;
pub mod session;
pub mod units;

mod cli;

// Re-exports.
pub use cli::{run_command, Args};
pub use error::HklReduceError;
pub use progress::{AbortFlag, BarProgress, ProgressHandler, SilentProgress};
pub use session::{load_session, save_session, Session, SESSION_VERSION};

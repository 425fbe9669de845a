// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Instrument model: detector geometry, goniometer axis chains and the
//! per-frame instrument state with its interpolation rules.

mod detector;
mod goniometer;
mod loader;
mod state;

pub use detector::{DataOrder, Detector, DetectorShape};
pub use goniometer::{Axis, AxisKind, Goniometer};
pub use loader::{load_instrument, parse_instrument, Instrument, Monochromator};
pub use state::{interpolated_state, set_scan_axes, InstrumentState, InterpolatedState};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum InstrumentError {
    #[error("detector has no pixels: nrows and ncols must be > 0")]
    EmptyDetector,

    #[error("detector physical dimensions must be > 0")]
    ZeroDimension,

    #[error("sample distance must be > 0")]
    ZeroDistance,

    #[error("pixel ({px}, {py}) outside the detector (rows {nrows}, cols {ncols})")]
    PixelOutOfRange {
        px: f64,
        py: f64,
        nrows: usize,
        ncols: usize,
    },

    #[error("goniometer '{gonio}' has {expected} axes but {got} angle values were supplied")]
    AxisCountMismatch {
        gonio: String,
        expected: usize,
        got: usize,
    },

    #[error("unknown detector type '{0}' (expected 'flat' or 'cylindrical')")]
    UnknownDetectorType(String),

    #[error("unknown axis type '{0}' (expected 'rotation' or 'translation')")]
    UnknownAxisType(String),

    #[error("unknown data ordering '{0}'")]
    UnknownDataOrder(String),

    #[error(transparent)]
    Unit(#[from] crate::units::UnitError),

    #[error("malformed instrument description: {0}")]
    Parse(String),

    #[error("IO error reading instrument description: {0}")]
    Io(#[from] std::io::Error),
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Error type for all hklreduce-related errors. This should be the *only*
//! error enum that is publicly visible, and the only place the exit-code
//! mapping lives.

use thiserror::Error;

use crate::crystal::CrystalError;
use crate::data::DataError;
use crate::find::FindError;
use crate::geometry::GeometryError;
use crate::instrument::InstrumentError;
use crate::integrate::IntegrateError;
use crate::merge::MergeError;
use crate::predict::PredictError;
use crate::refine::RefineError;
use crate::session::SessionError;
use crate::units::UnitError;

/// The *only* publicly visible error from hklreduce, reduced to the error
/// kinds the driver maps onto exit codes.
#[derive(Error, Debug)]
pub enum HklReduceError {
    /// Malformed file, out-of-range parameter or empty required collection.
    #[error("InvalidInput: {0}")]
    InvalidInput(String),

    /// The operation requires a unit-cell linkage that is absent.
    #[error("NotIndexed: {0}")]
    NotIndexed(String),

    /// A nonlinear solver hit its iteration cap without meeting tolerances.
    #[error("NotConverged: {0}")]
    NotConverged(String),

    /// Non-positive-definite metric, near-singular Jacobian, zero-mass blob.
    #[error("NumericalFailure: {0}")]
    NumericalFailure(String),

    /// Frame index outside the numor or pixel outside the detector.
    #[error("OutOfRange: {0}")]
    OutOfRange(String),

    /// The integration region overlaps a forbidden detector region.
    #[error("Masked: {0}")]
    Masked(String),

    /// A reader or writer failed; carries the wrapped system message.
    #[error("IO: {0}")]
    Io(String),
}

impl HklReduceError {
    /// Exit code of the driver: 1 invalid input, 2 convergence failure,
    /// 3 I/O error.
    pub fn exit_code(&self) -> i32 {
        match self {
            HklReduceError::NotConverged(_) => 2,
            HklReduceError::Io(_) => 3,
            _ => 1,
        }
    }
}

impl From<std::io::Error> for HklReduceError {
    fn from(e: std::io::Error) -> Self {
        HklReduceError::Io(e.to_string())
    }
}

impl From<UnitError> for HklReduceError {
    fn from(e: UnitError) -> Self {
        HklReduceError::InvalidInput(e.to_string())
    }
}

impl From<GeometryError> for HklReduceError {
    fn from(e: GeometryError) -> Self {
        let s = e.to_string();
        match e {
            GeometryError::NotPositiveDefinite | GeometryError::ZeroMass => {
                HklReduceError::NumericalFailure(s)
            }
            GeometryError::TooFewVertices(_) | GeometryError::DegenerateHull => {
                HklReduceError::InvalidInput(s)
            }
        }
    }
}

impl From<InstrumentError> for HklReduceError {
    fn from(e: InstrumentError) -> Self {
        let s = e.to_string();
        match e {
            InstrumentError::PixelOutOfRange { .. } => HklReduceError::OutOfRange(s),
            InstrumentError::Io(_) => HklReduceError::Io(s),
            _ => HklReduceError::InvalidInput(s),
        }
    }
}

impl From<DataError> for HklReduceError {
    fn from(e: DataError) -> Self {
        let s = e.to_string();
        match e {
            DataError::FrameOutOfRange { .. } => HklReduceError::OutOfRange(s),
            DataError::InvalidInput(_) => HklReduceError::InvalidInput(s),
            DataError::Instrument(inner) => HklReduceError::from(inner),
            DataError::Io(_) => HklReduceError::Io(s),
        }
    }
}

impl From<FindError> for HklReduceError {
    fn from(e: FindError) -> Self {
        let s = e.to_string();
        match e {
            FindError::Data(inner) => HklReduceError::from(inner),
            FindError::Geometry(inner) => HklReduceError::from(inner),
            FindError::BadThreshold(_) | FindError::BadScale(_) => {
                HklReduceError::InvalidInput(s)
            }
        }
    }
}

impl From<CrystalError> for HklReduceError {
    fn from(e: CrystalError) -> Self {
        let s = e.to_string();
        match e {
            CrystalError::ReductionDidNotConverge(_) => HklReduceError::NotConverged(s),
            CrystalError::SingularBasis => HklReduceError::NumericalFailure(s),
            CrystalError::TooFewObservations(_)
            | CrystalError::CoplanarBasis
            | CrystalError::BadTolerance(_)
            | CrystalError::UnknownSpaceGroup(_) => HklReduceError::InvalidInput(s),
        }
    }
}

impl From<RefineError> for HklReduceError {
    fn from(e: RefineError) -> Self {
        let s = e.to_string();
        match e {
            RefineError::NotConverged => HklReduceError::NotConverged(s),
            RefineError::NoPeaks => HklReduceError::NotIndexed(s),
            RefineError::ResidualEvaluation => HklReduceError::NumericalFailure(s),
            RefineError::NoBatches
            | RefineError::ConstraintShape { .. }
            | RefineError::OverConstrained => HklReduceError::InvalidInput(s),
            RefineError::Crystal(inner) => HklReduceError::from(inner),
        }
    }
}

impl From<PredictError> for HklReduceError {
    fn from(e: PredictError) -> Self {
        let s = e.to_string();
        match e {
            PredictError::BadShell { .. } => HklReduceError::InvalidInput(s),
            PredictError::Data(inner) => HklReduceError::from(inner),
            PredictError::Crystal(inner) => HklReduceError::from(inner),
            PredictError::Geometry(inner) => HklReduceError::from(inner),
        }
    }
}

impl From<IntegrateError> for HklReduceError {
    fn from(e: IntegrateError) -> Self {
        let s = e.to_string();
        match e {
            IntegrateError::Masked => HklReduceError::Masked(s),
            IntegrateError::BadScales { .. } => HklReduceError::InvalidInput(s),
            IntegrateError::EmptyBackground(_) => HklReduceError::NumericalFailure(s),
            IntegrateError::Data(inner) => HklReduceError::from(inner),
            IntegrateError::Fit(inner) => HklReduceError::from(inner),
        }
    }
}

impl From<MergeError> for HklReduceError {
    fn from(e: MergeError) -> Self {
        let s = e.to_string();
        match e {
            MergeError::NoObservations | MergeError::BadShellBounds => {
                HklReduceError::InvalidInput(s)
            }
            MergeError::Crystal(inner) => HklReduceError::from(inner),
        }
    }
}

impl From<SessionError> for HklReduceError {
    fn from(e: SessionError) -> Self {
        let s = e.to_string();
        match e {
            SessionError::VersionTooNew { .. } | SessionError::Parse(_) => {
                HklReduceError::InvalidInput(s)
            }
            SessionError::Geometry(inner) => HklReduceError::from(inner),
            SessionError::Crystal(inner) => HklReduceError::from(inner),
            SessionError::Io(_) => HklReduceError::Io(s),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_follow_the_kind() {
        assert_eq!(HklReduceError::InvalidInput(String::new()).exit_code(), 1);
        assert_eq!(HklReduceError::NotConverged(String::new()).exit_code(), 2);
        assert_eq!(HklReduceError::Io(String::new()).exit_code(), 3);
        assert_eq!(
            HklReduceError::NumericalFailure(String::new()).exit_code(),
            1
        );
    }

    #[test]
    fn kinds_survive_conversion() {
        let e: HklReduceError = CrystalError::ReductionDidNotConverge(100).into();
        assert!(matches!(e, HklReduceError::NotConverged(_)));

        let e: HklReduceError = DataError::FrameOutOfRange {
            frame: 9,
            n_frames: 5,
        }
        .into();
        assert!(matches!(e, HklReduceError::OutOfRange(_)));

        let e: HklReduceError = IntegrateError::Masked.into();
        assert!(matches!(e, HklReduceError::Masked(_)));
    }
}

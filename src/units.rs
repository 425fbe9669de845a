// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Closed unit tables for the quantities that appear in instrument
//! description files and scan metadata.
//!
//! Lengths convert to metres, angles to radians and times to seconds. The
//! suffix sets are closed; anything else is a hard parse error so that typos
//! in hand-authored instrument files surface immediately.

use thiserror::Error;

/// Metres per angstrom.
pub const ANG: f64 = 1e-10;

#[derive(Error, Debug)]
pub enum UnitError {
    #[error("unknown length unit '{0}' (expected one of m, cm, mm, um, nm, pm, fm, ang)")]
    UnknownLength(String),

    #[error("unknown angle unit '{0}' (expected one of rad, deg, mrad)")]
    UnknownAngle(String),

    #[error("unknown time unit '{0}' (expected one of s, ms, us, min, hour, day, year)")]
    UnknownTime(String),
}

/// Factor converting a length in the given unit to metres.
pub fn length_factor(unit: &str) -> Result<f64, UnitError> {
    Ok(match unit {
        "m" => 1.0,
        "cm" => 1e-2,
        "mm" => 1e-3,
        "um" => 1e-6,
        "nm" => 1e-9,
        "pm" => 1e-12,
        "fm" => 1e-15,
        "ang" => ANG,
        other => return Err(UnitError::UnknownLength(other.to_string())),
    })
}

/// Factor converting an angle in the given unit to radians.
pub fn angle_factor(unit: &str) -> Result<f64, UnitError> {
    Ok(match unit {
        "rad" => 1.0,
        "deg" => std::f64::consts::PI / 180.0,
        "mrad" => 1e-3,
        other => return Err(UnitError::UnknownAngle(other.to_string())),
    })
}

/// Factor converting a time in the given unit to seconds.
pub fn time_factor(unit: &str) -> Result<f64, UnitError> {
    Ok(match unit {
        "s" => 1.0,
        "ms" => 1e-3,
        "us" => 1e-6,
        "min" => 60.0,
        "hour" => 3600.0,
        "day" => 86400.0,
        "year" => 86400.0 * 365.25,
        other => return Err(UnitError::UnknownTime(other.to_string())),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn lengths() {
        assert_relative_eq!(length_factor("mm").unwrap(), 1e-3);
        assert_relative_eq!(length_factor("ang").unwrap(), 1e-10);
        assert!(length_factor("furlong").is_err());
    }

    #[test]
    fn angles() {
        assert_relative_eq!(angle_factor("deg").unwrap() * 180.0, std::f64::consts::PI);
        assert!(angle_factor("grad").is_err());
    }

    #[test]
    fn times() {
        assert_relative_eq!(time_factor("min").unwrap(), 60.0);
        assert!(time_factor("fortnight").is_err());
    }
}

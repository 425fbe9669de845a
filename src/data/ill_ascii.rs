// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Reader for the legacy ILL line-oriented ASCII numor format.
//!
//! The file opens with an 80-column `RRRR...` banner, followed by the numor
//! line (8-digit numor, 4-digit format code), the fixed-column header block
//! (instrument, user, local contact, date, time), the integer-metadata block
//! (31 integers over three rows), the float-metadata block (wavelength,
//! omega, gamma, phi, chi) and then one block per frame: a 6-integer counter
//! line, then `nbdata` counts. The scanned omega value rides in the counter
//! line in millidegrees.

use std::path::Path;

use log::debug;
use nalgebra::Vector3;
use ndarray::Array2;

use crate::instrument::{set_scan_axes, DataOrder, Instrument, InstrumentState};

use super::{DataError, DataSet, MemoryFrames, MetaData};

const INT_BLOCK_NAMES: [&str; 31] = [
    "nvers", "ntype", "kctrl", "manip", "nbang", "nkmes", "npdone", "jcode", "ipara", "ianal",
    "imode", "itgv", "iregul", "ivolt", "naxe", "npstart", "ilast1", "isa", "flgkif", "ih", "ik",
    "nbsqs", "nb_det", "nbdata", "icdesc1", "icdesc2", "icdesc3", "icdesc4", "icdesc5", "icdesc6",
    "icdesc7",
];

const FLOAT_BLOCK_NAMES: [&str; 5] = ["wavelength", "omega", "gamma", "phi", "chi"];

struct Lines<'a> {
    inner: std::str::Lines<'a>,
    n: usize,
}

impl<'a> Lines<'a> {
    fn next(&mut self) -> Result<&'a str, DataError> {
        self.n += 1;
        self.inner
            .next()
            .ok_or_else(|| DataError::InvalidInput(format!("unexpected end of file at line {}", self.n)))
    }
}

fn fixed_field<'a>(line: &'a str, from: usize, to: usize) -> &'a str {
    let len = line.len();
    line[from.min(len)..to.min(len)].trim()
}

fn parse_ints(tokens: &mut impl Iterator<Item = Result<i64, DataError>>, n: usize) -> Result<Vec<i64>, DataError> {
    let mut out = Vec::with_capacity(n);
    for _ in 0..n {
        out.push(tokens.next().ok_or_else(|| {
            DataError::InvalidInput("integer metadata block is truncated".into())
        })??);
    }
    Ok(out)
}

/// Map the k-th value of a serial data stream onto (row, col) with the
/// laboratory convention that (0, 0) is the bottom-left pixel.
fn place(order: DataOrder, k: usize, n_rows: usize, n_cols: usize) -> (usize, usize) {
    use DataOrder::*;
    let (col_major, from_top, from_right) = match order {
        TopLeftColMajor => (true, true, false),
        TopLeftRowMajor => (false, true, false),
        TopRightColMajor => (true, true, true),
        TopRightRowMajor => (false, true, true),
        BottomLeftColMajor => (true, false, false),
        BottomLeftRowMajor => (false, false, false),
        BottomRightColMajor => (true, false, true),
        BottomRightRowMajor => (false, false, true),
    };
    let (mut row, mut col) = if col_major {
        (k % n_rows, k / n_rows)
    } else {
        (k / n_cols, k % n_cols)
    };
    if from_top {
        row = n_rows - 1 - row;
    }
    if from_right {
        col = n_cols - 1 - col;
    }
    (row, col)
}

/// Parse a numor from ASCII text against the given instrument.
pub fn parse_numor(text: &str, instrument: Instrument) -> Result<DataSet, DataError> {
    let mut lines = Lines {
        inner: text.lines(),
        n: 0,
    };

    let banner = lines.next()?;
    if banner.len() < 80 || !banner.chars().all(|c| c == 'R') {
        return Err(DataError::InvalidInput(
            "missing RRRR banner line".to_string(),
        ));
    }

    let numor_line = lines.next()?;
    let numor: u32 = fixed_field(numor_line, 0, 8)
        .parse()
        .map_err(|_| DataError::InvalidInput("malformed numor field".into()))?;
    let format_code: u32 = fixed_field(numor_line, 8, 12)
        .parse()
        .map_err(|_| DataError::InvalidInput("malformed format code".into()))?;

    let header = lines.next()?;
    let mut metadata = MetaData::new();
    metadata.set_int("numor", numor as i64);
    metadata.set_int("format", format_code as i64);
    metadata.set_str("instrument", fixed_field(header, 0, 16));
    metadata.set_str("user", fixed_field(header, 16, 32));
    metadata.set_str("local_contact", fixed_field(header, 32, 48));
    metadata.set_str("date", fixed_field(header, 48, 60));
    metadata.set_str("time", fixed_field(header, 60, 68));

    if metadata.get_str("instrument") != Some(instrument.name.as_str()) {
        debug!(
            "numor {} was recorded on '{}' but is being reduced with the '{}' description",
            numor,
            metadata.get_str("instrument").unwrap_or("?"),
            instrument.name
        );
    }

    // integer metadata: 31 values over three rows
    let int_text = [lines.next()?, lines.next()?, lines.next()?].join(" ");
    let mut int_tokens = int_text.split_whitespace().map(|t| {
        t.parse::<i64>()
            .map_err(|_| DataError::InvalidInput(format!("bad integer metadata token '{t}'")))
    });
    let ints = parse_ints(&mut int_tokens, INT_BLOCK_NAMES.len())?;
    for (name, value) in INT_BLOCK_NAMES.iter().zip(&ints) {
        metadata.set_int(name, *value);
    }

    // float metadata: wavelength and the fixed axis angles (degrees)
    let float_line = lines.next()?;
    let floats: Vec<f64> = float_line
        .split_whitespace()
        .map(|t| {
            t.parse::<f64>()
                .map_err(|_| DataError::InvalidInput(format!("bad float metadata token '{t}'")))
        })
        .collect::<Result<_, _>>()?;
    if floats.len() != FLOAT_BLOCK_NAMES.len() {
        return Err(DataError::InvalidInput(format!(
            "float metadata block has {} values, expected {}",
            floats.len(),
            FLOAT_BLOCK_NAMES.len()
        )));
    }
    for (name, value) in FLOAT_BLOCK_NAMES.iter().zip(&floats) {
        metadata.set_double(name, *value);
    }

    let n_frames = metadata.get_int("npdone").unwrap_or(0) as usize;
    let nbdata = metadata.get_int("nbdata").unwrap_or(0) as usize;
    let n_rows = instrument.detector.n_rows;
    let n_cols = instrument.detector.n_cols;
    if n_frames == 0 {
        return Err(DataError::InvalidInput("numor contains no frames".into()));
    }
    if nbdata != n_rows * n_cols {
        return Err(DataError::InvalidInput(format!(
            "frame payload of {nbdata} counts does not fill the {n_rows}x{n_cols} detector"
        )));
    }

    // axis values, degrees; omega is scanned per frame
    let gamma = floats[2];
    let phi = floats[3];
    let chi = floats[4];

    let mut frames = Vec::with_capacity(n_frames);
    let mut omegas = Vec::with_capacity(n_frames);
    for _ in 0..n_frames {
        let counter = lines.next()?;
        let counters: Vec<i64> = counter
            .split_whitespace()
            .map(|t| {
                t.parse::<i64>()
                    .map_err(|_| DataError::InvalidInput(format!("bad counter token '{t}'")))
            })
            .collect::<Result<_, _>>()?;
        if counters.len() != 6 {
            return Err(DataError::InvalidInput(format!(
                "frame counter line has {} values, expected 6",
                counters.len()
            )));
        }
        omegas.push(counters[3] as f64 * 1e-3);

        let mut frame = Array2::<u32>::zeros((n_rows, n_cols));
        let mut k = 0;
        while k < nbdata {
            let line = lines.next()?;
            for tok in line.split_whitespace() {
                if k >= nbdata {
                    return Err(DataError::InvalidInput(
                        "frame payload has too many counts".into(),
                    ));
                }
                let value: u32 = tok.parse().map_err(|_| {
                    DataError::InvalidInput(format!("bad count token '{tok}'"))
                })?;
                let (row, col) = place(instrument.detector.data_order, k, n_rows, n_cols);
                frame[(row, col)] = value;
                k += 1;
            }
        }
        frames.push(frame);
    }

    let states = build_states(&instrument, &omegas, gamma, chi, phi)?;
    debug!(
        "numor {numor}: {n_frames} frames of {n_rows}x{n_cols}, omega {:.4}..{:.4} deg",
        omegas.first().copied().unwrap_or(0.0),
        omegas.last().copied().unwrap_or(0.0)
    );
    DataSet::new(
        numor,
        metadata,
        instrument,
        states,
        Box::new(MemoryFrames::new(frames)),
    )
}

/// Compose the per-frame states from the goniometer descriptions and the
/// angle values recorded in the numor. Axis values are matched by name; an
/// axis the numor cannot supply is a hard error.
fn build_states(
    instrument: &Instrument,
    omegas_deg: &[f64],
    gamma_deg: f64,
    chi_deg: f64,
    phi_deg: f64,
) -> Result<Vec<InstrumentState>, DataError> {
    let sample_axes: Vec<&str> = instrument
        .sample_goniometer
        .axes
        .iter()
        .filter(|a| a.physical)
        .map(|a| a.name.as_str())
        .collect();
    let detector_axes: Vec<&str> = instrument
        .detector
        .goniometer
        .axes
        .iter()
        .filter(|a| a.physical)
        .map(|a| a.name.as_str())
        .collect();

    let detector_values: Vec<f64> = detector_axes
        .iter()
        .map(|name| match *name {
            "gamma" | "2theta(gamma)" => Ok(gamma_deg.to_radians()),
            other => Err(DataError::InvalidInput(format!(
                "numor supplies no value for detector axis '{other}'"
            ))),
        })
        .collect::<Result<_, _>>()?;

    let mut states = Vec::with_capacity(omegas_deg.len());
    for &omega_deg in omegas_deg {
        let sample_values: Vec<f64> = sample_axes
            .iter()
            .map(|name| match *name {
                "omega" => Ok(omega_deg.to_radians()),
                "chi" => Ok(chi_deg.to_radians()),
                "phi" => Ok(phi_deg.to_radians()),
                other => Err(DataError::InvalidInput(format!(
                    "numor supplies no value for sample axis '{other}'"
                ))),
            })
            .collect::<Result<_, _>>()?;

        let sample_orientation = instrument
            .sample_goniometer
            .transform(&sample_values)?
            .rotation;
        let detector_orientation = instrument
            .detector
            .goniometer
            .transform(&detector_values)?
            .rotation;

        let mut state = InstrumentState::new(
            sample_orientation,
            detector_orientation,
            Vector3::y(),
            instrument.monochromator.wavelength,
        );
        state.refined = false;
        states.push(state);
    }
    set_scan_axes(&mut states);
    Ok(states)
}

/// Read a numor file from disk.
pub fn load_numor<P: AsRef<Path>>(path: P, instrument: Instrument) -> Result<DataSet, DataError> {
    let text = std::fs::read_to_string(path)?;
    parse_numor(&text, instrument)
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::fmt::Write;

    /// Serialise a fake numor in the layout `parse_numor` accepts.
    pub fn write_fake_numor(
        numor: u32,
        frames: &[Vec<u32>],
        n_rows: usize,
        n_cols: usize,
        omega_start_deg: f64,
        omega_step_deg: f64,
        wavelength: f64,
    ) -> String {
        let mut out = String::new();
        out.push_str(&"R".repeat(80));
        out.push('\n');
        writeln!(out, "{numor:08}{:04}", 1).unwrap();
        writeln!(
            out,
            "{:<16}{:<16}{:<16}{:<12}{:<8}",
            "synthetic", "nobody", "nobody", "01-Jan-24", "00:00:00"
        )
        .unwrap();
        // integer block: nvers ntype kctrl manip nbang nkmes npdone jcode ipara ianal
        writeln!(
            out,
            "1 2 0 0 1 {n} {n} 0 0 0",
            n = frames.len()
        )
        .unwrap();
        // imode itgv iregul ivolt naxe npstart ilast1 isa flgkif ih
        writeln!(out, "0 0 0 0 1 1 0 0 0 0").unwrap();
        // ik nbsqs nb_det nbdata icdesc1..7
        writeln!(out, "0 0 1 {} 0 0 0 0 0 0 0", n_rows * n_cols).unwrap();
        // wavelength omega gamma phi chi
        writeln!(out, "{wavelength} {omega_start_deg} 0.0 0.0 0.0").unwrap();

        for (i, counts) in frames.iter().enumerate() {
            let omega_mdeg = ((omega_start_deg + i as f64 * omega_step_deg) * 1000.0).round();
            writeln!(out, "{} 1000 {} {} 100 0", i + 1, counts.iter().sum::<u32>(), omega_mdeg)
                .unwrap();
            for chunk in counts.chunks(16) {
                let line: Vec<String> = chunk.iter().map(|c| c.to_string()).collect();
                writeln!(out, "{}", line.join(" ")).unwrap();
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::test_instrument;
    use super::test_support::write_fake_numor;
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn round_trips_a_fake_numor() {
        let n_rows = 8;
        let n_cols = 4;
        let frames: Vec<Vec<u32>> = (0..3)
            .map(|f| (0..n_rows * n_cols).map(|k| (f * 100 + k) as u32).collect())
            .collect();
        let text = write_fake_numor(12345678, &frames, n_rows, n_cols, 10.0, 0.05, 2.67);
        let data = parse_numor(&text, test_instrument(n_rows, n_cols)).unwrap();

        assert_eq!(data.numor, 12345678);
        assert_eq!(data.n_frames(), 3);
        assert_eq!(data.metadata.get_int("npdone"), Some(3));
        assert_eq!(data.metadata.get_int("nbdata"), Some(32));
        assert_eq!(data.metadata.get_str("instrument"), Some("synthetic"));

        // TopLeftColMajor: first serial value lands on the top-left pixel
        let f0 = data.frame(0).unwrap();
        assert_eq!(f0[(n_rows - 1, 0)], 0);
        assert_eq!(f0[(n_rows - 2, 0)], 1);
        assert_eq!(f0[(n_rows - 1, 1)], n_rows as u32);

        // omega scan encoded in the counter lines
        let states = data.states();
        let step = states[1].sample_orientation.angle() - states[0].sample_orientation.angle();
        assert_abs_diff_eq!(step.abs(), 0.05_f64.to_radians(), epsilon = 1e-9);
    }

    #[test]
    fn missing_banner_is_invalid_input() {
        let text = "hello\n";
        assert!(matches!(
            parse_numor(text, test_instrument(4, 4)),
            Err(DataError::InvalidInput(_))
        ));
    }

    #[test]
    fn wrong_detector_size_is_invalid_input() {
        let frames: Vec<Vec<u32>> = vec![vec![0; 32]];
        let text = write_fake_numor(1, &frames, 8, 4, 0.0, 0.05, 2.67);
        // instrument says 16x16, numor carries 8x4 frames
        assert!(matches!(
            parse_numor(&text, test_instrument(16, 16)),
            Err(DataError::InvalidInput(_))
        ));
    }

    #[test]
    fn unknown_sample_axis_is_invalid_input() {
        let mut instrument = test_instrument(4, 4);
        instrument.sample_goniometer.axes[0].name = "kappa".to_string();
        let frames: Vec<Vec<u32>> = vec![vec![0; 16]];
        let text = write_fake_numor(1, &frames, 4, 4, 0.0, 0.05, 2.67);
        assert!(matches!(
            parse_numor(&text, instrument),
            Err(DataError::InvalidInput(_))
        ));
    }
}

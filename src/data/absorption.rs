// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Parser for absorption-correction info files.
//!
//! The first line carries the instrument name and the acquisition date; the
//! second line the goniometer axis values as `name: value` pairs; every
//! following line describes one crystal image as `name: value jpg_path`.

use std::path::{Path, PathBuf};

use super::DataError;

#[derive(Clone, Debug, PartialEq)]
pub struct ImageEntry {
    pub axis_name: String,
    pub axis_value: f64,
    pub image_path: PathBuf,
}

#[derive(Clone, Debug, Default)]
pub struct AbsorptionInfo {
    pub instrument: String,
    pub date: String,
    pub axes: Vec<(String, f64)>,
    pub images: Vec<ImageEntry>,
}

fn split_pair(token_name: &str, token_value: &str) -> Result<(String, f64), DataError> {
    let name = token_name.trim_end_matches(':');
    if name.is_empty() || !token_name.ends_with(':') {
        return Err(DataError::InvalidInput(format!(
            "expected 'name:' token, got '{token_name}'"
        )));
    }
    let value: f64 = token_value.parse().map_err(|_| {
        DataError::InvalidInput(format!("bad axis value '{token_value}' for '{name}'"))
    })?;
    Ok((name.to_string(), value))
}

pub fn parse_absorption_info(text: &str) -> Result<AbsorptionInfo, DataError> {
    let mut lines = text.lines().filter(|l| !l.trim().is_empty());

    let first = lines
        .next()
        .ok_or_else(|| DataError::InvalidInput("empty absorption info file".into()))?;
    let mut head = first.split_whitespace();
    let instrument = head
        .next()
        .ok_or_else(|| DataError::InvalidInput("missing instrument name".into()))?
        .to_string();
    let date = head.collect::<Vec<_>>().join(" ");
    if date.is_empty() {
        return Err(DataError::InvalidInput(
            "missing date on the header line".into(),
        ));
    }

    let axis_line = lines
        .next()
        .ok_or_else(|| DataError::InvalidInput("missing axis line".into()))?;
    let tokens: Vec<&str> = axis_line.split_whitespace().collect();
    if tokens.len() % 2 != 0 || tokens.is_empty() {
        return Err(DataError::InvalidInput(
            "axis line must hold 'name: value' pairs".into(),
        ));
    }
    let mut axes = Vec::with_capacity(tokens.len() / 2);
    for pair in tokens.chunks(2) {
        axes.push(split_pair(pair[0], pair[1])?);
    }

    let mut images = Vec::new();
    for line in lines {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.len() != 3 {
            return Err(DataError::InvalidInput(format!(
                "image line must be 'name: value jpg_path', got '{line}'"
            )));
        }
        let (axis_name, axis_value) = split_pair(tokens[0], tokens[1])?;
        images.push(ImageEntry {
            axis_name,
            axis_value,
            image_path: PathBuf::from(tokens[2]),
        });
    }

    Ok(AbsorptionInfo {
        instrument,
        date,
        axes,
        images,
    })
}

pub fn load_absorption_info<P: AsRef<Path>>(path: P) -> Result<AbsorptionInfo, DataError> {
    let text = std::fs::read_to_string(path)?;
    parse_absorption_info(&text)
}

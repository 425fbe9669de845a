// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Peak integration.
//!
//! Every peak is integrated over the frames its background ellipsoid's
//! bounding box touches. Pixels classify into signal, guard, background and
//! excluded by metric radius; the background annulus yields the mean count
//! and its variance, and the signal is the background-subtracted sum with
//! Poisson statistics. The sigma/I profile cutoff and the Gaussian profile
//! fit are available as alternatives to the plain pixel sum.

mod gaussian;
mod profile;
mod region;

pub use gaussian::{fit_gaussian, GaussianFit};
pub use profile::IntegratedProfile;
pub use region::{EventType, IntegrationRegion};

use log::{debug, warn};
use nalgebra::Vector3;
use thiserror::Error;

use crate::data::{DataError, DataSet};
use crate::geometry::Aabb;
use crate::peak::{Intensity, Peak};
use crate::progress::ProgressHandler;
use crate::refine::RefineError;

#[derive(Error, Debug)]
pub enum IntegrateError {
    #[error(
        "integration shells must satisfy 0 < peak_end <= bkg_begin < bkg_end, got {peak_end}, {bkg_begin}, {bkg_end}"
    )]
    BadScales {
        peak_end: f64,
        bkg_begin: f64,
        bkg_end: f64,
    },

    #[error("peak region is fully masked")]
    Masked,

    #[error("background annulus holds fewer than {0} pixels")]
    EmptyBackground(usize),

    #[error(transparent)]
    Data(#[from] DataError),

    #[error(transparent)]
    Fit(#[from] RefineError),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IntegrationMethod {
    /// Plain background-subtracted pixel sum.
    PixelSum,
    /// Radial-profile cutoff minimising sigma/I.
    ProfileSigma,
    /// 3-D Gaussian profile fit.
    GaussianFit,
}

#[derive(Clone, Debug)]
pub struct IntegrationParameters {
    pub peak_end: f64,
    pub bkg_begin: f64,
    pub bkg_end: f64,
    pub method: IntegrationMethod,
    /// Radial bins of the sigma/I profile.
    pub n_profile_bins: usize,
    /// Chi-square acceptance of the Gaussian fit.
    pub chi2_threshold: f64,
    /// Detector regions whose pixels never contribute.
    pub masks: Vec<Aabb>,
    /// Minimum background sample size.
    pub min_background: usize,
}

impl Default for IntegrationParameters {
    fn default() -> IntegrationParameters {
        IntegrationParameters {
            peak_end: 3.0,
            bkg_begin: 3.5,
            bkg_end: 4.5,
            method: IntegrationMethod::PixelSum,
            n_profile_bins: 10,
            chi2_threshold: 10.0,
            masks: Vec::new(),
            min_background: 5,
        }
    }
}

struct PixelSums {
    bkg_sum: f64,
    bkg_sum2: f64,
    n_bkg: usize,
    peak_sum: f64,
    n_peak: usize,
    profile: IntegratedProfile,
    points: Vec<(Vector3<f64>, f64)>,
}

/// Collect the classified pixel sums of one peak.
fn collect(
    data: &DataSet,
    region: &IntegrationRegion,
    params: &IntegrationParameters,
) -> Result<PixelSums, IntegrateError> {
    let bb = region.aabb();
    let f_lo = (bb.lower().z.floor().max(0.0)) as usize;
    let f_hi = (bb.upper().z.ceil().min((data.n_frames() - 1) as f64)) as usize;
    let x_lo = bb.lower().x.floor().max(0.0) as usize;
    let x_hi = (bb.upper().x.ceil() as usize).min(data.n_cols() - 1);
    let y_lo = bb.lower().y.floor().max(0.0) as usize;
    let y_hi = (bb.upper().y.ceil() as usize).min(data.n_rows() - 1);

    let mut sums = PixelSums {
        bkg_sum: 0.0,
        bkg_sum2: 0.0,
        n_bkg: 0,
        peak_sum: 0.0,
        n_peak: 0,
        profile: IntegratedProfile::new(params.bkg_end, params.n_profile_bins),
        points: Vec::new(),
    };

    for f in f_lo..=f_hi {
        let frame = data.frame(f)?;
        for y in y_lo..=y_hi {
            for x in x_lo..=x_hi {
                let p = Vector3::new(x as f64, y as f64, f as f64);
                let masked = params.masks.iter().any(|m| m.contains(p));
                if masked {
                    continue;
                }
                let counts = frame[(y, x)] as f64;
                match region.classify(p) {
                    EventType::Peak => {
                        sums.peak_sum += counts;
                        sums.n_peak += 1;
                        sums.points.push((p, counts));
                    }
                    EventType::Background => {
                        sums.bkg_sum += counts;
                        sums.bkg_sum2 += counts * counts;
                        sums.n_bkg += 1;
                        sums.points.push((p, counts));
                    }
                    EventType::Forbidden | EventType::Excluded => {}
                }
                sums.profile.add_point(region.r2(p), counts);
            }
        }
    }
    Ok(sums)
}

/// Integrate one peak in place.
fn integrate_one(
    data: &DataSet,
    peak: &mut Peak,
    params: &IntegrationParameters,
) -> Result<(), IntegrateError> {
    let region = IntegrationRegion::new(
        peak.shape().clone(),
        params.peak_end,
        params.bkg_begin,
        params.bkg_end,
    )?;

    // a signal region swallowed by a mask is not integrable
    let peak_bb = region.peak_aabb();
    if params.masks.iter().any(|m| {
        m.contains(peak_bb.lower()) && m.contains(peak_bb.upper())
    }) {
        return Err(IntegrateError::Masked);
    }

    let sums = collect(data, &region, params)?;
    if sums.n_bkg < params.min_background {
        return Err(IntegrateError::EmptyBackground(params.min_background));
    }
    if sums.n_peak == 0 {
        return Err(IntegrateError::EmptyBackground(1));
    }

    let n = sums.n_bkg as f64;
    let mean_bkg_value = sums.bkg_sum / n;
    // sample variance of the annulus, then the variance of its mean
    let sample_var = (sums.bkg_sum2 - n * mean_bkg_value * mean_bkg_value) / (n - 1.0).max(1.0);
    let mean_bkg = Intensity::new(mean_bkg_value, sample_var / n);

    let intensity = match params.method {
        IntegrationMethod::PixelSum => {
            let np = sums.n_peak as f64;
            Intensity::new(
                sums.peak_sum - np * mean_bkg.value,
                sums.peak_sum + np * np * mean_bkg.variance,
            )
        }
        IntegrationMethod::ProfileSigma => {
            let k = sums.profile.optimal_bin(&mean_bkg);
            sums.profile.intensity(k, &mean_bkg)
        }
        IntegrationMethod::GaussianFit => {
            let fit = fit_gaussian(&sums.points, 100, params.chi2_threshold)?;
            if !fit.success {
                return Err(IntegrateError::Fit(RefineError::NotConverged));
            }
            // analytic volume of the Gaussian over the background
            let det = fit.shape.determinant();
            let volume = (2.0 * std::f64::consts::PI).powf(1.5) / det.sqrt();
            let value = fit.amplitude * volume;
            // conservative: Poisson-like variance on the integrated counts
            Intensity::new(value, value.abs() + fit.chi2_per_point * sums.n_peak as f64)
        }
    };

    peak.raw_intensity = intensity;
    Ok(())
}

/// Integrate a peak list against its data set.
///
/// Failures on individual peaks are logged and the peak is deselected; the
/// return value is the number of successfully integrated peaks. An abort
/// leaves the peak list untouched and returns 0.
pub fn integrate_peaks(
    data: &DataSet,
    peaks: &mut [Peak],
    params: &IntegrationParameters,
    progress: &dyn ProgressHandler,
) -> Result<usize, IntegrateError> {
    // reject bad shell parameters once, up front
    IntegrationRegion::new(
        crate::geometry::Ellipsoid::sphere(Vector3::zeros(), 1.0)
            .expect("unit sphere is a valid ellipsoid"),
        params.peak_end,
        params.bkg_begin,
        params.bkg_end,
    )?;

    progress.begin("Integrating", peaks.len() as u64);
    let mut integrated = 0;
    for (i, peak) in peaks.iter_mut().enumerate() {
        if progress.should_abort() {
            progress.finish("Integration aborted");
            return Ok(0);
        }
        if !peak.enabled() {
            progress.advance(1);
            continue;
        }
        match integrate_one(data, peak, params) {
            Ok(()) => integrated += 1,
            Err(e) => {
                warn!("peak {i}: {e}");
                peak.selected = false;
            }
        }
        progress.advance(1);
    }
    progress.finish("Integration finished");
    debug!("{integrated}/{} peaks integrated", peaks.len());
    Ok(integrated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::test_support::data_set_with_frames;
    use crate::geometry::Ellipsoid;
    use crate::peak::DataSetId;
    use crate::progress::SilentProgress;
    use approx::assert_abs_diff_eq;
    use ndarray::Array2;

    /// A stack with uniform background `bkg` plus a hard ball of `extra`
    /// counts per pixel centred at (cx, cy, cf) with radius `r`.
    fn ball_stack(
        n: usize,
        size: usize,
        bkg: u32,
        extra: u32,
        centre: (f64, f64, f64),
        r: f64,
    ) -> Vec<Array2<u32>> {
        (0..n)
            .map(|f| {
                let mut img = Array2::from_elem((size, size), bkg);
                for y in 0..size {
                    for x in 0..size {
                        let d2 = (x as f64 - centre.0).powi(2)
                            + (y as f64 - centre.1).powi(2)
                            + (f as f64 - centre.2).powi(2);
                        if d2.sqrt() <= r {
                            img[(y, x)] += extra;
                        }
                    }
                }
                img
            })
            .collect()
    }

    fn ball_peak(centre: (f64, f64, f64), sigma: f64) -> Peak {
        let shape = Ellipsoid::sphere(
            Vector3::new(centre.0, centre.1, centre.2),
            sigma,
        )
        .unwrap();
        Peak::new(shape, DataSetId(0))
    }

    #[test]
    fn pixel_sum_subtracts_the_background() {
        let centre = (16.0, 16.0, 8.0);
        let data = data_set_with_frames(ball_stack(16, 32, 10, 50, centre, 2.0), 0.4);
        // unit-sigma sphere: peak_end 3 covers the r = 2 ball markedly
        let mut peaks = vec![ball_peak(centre, 1.0)];
        let n = integrate_peaks(
            &data,
            &mut peaks,
            &IntegrationParameters::default(),
            &SilentProgress,
        )
        .unwrap();
        assert_eq!(n, 1);

        let ball_pixels: f64 = {
            // count the pixels the stack actually set
            let mut c = 0;
            for f in 0..16 {
                for y in 0..32 {
                    for x in 0..32 {
                        let d2 = (x as f64 - centre.0).powi(2)
                            + (y as f64 - centre.1).powi(2)
                            + (f as f64 - centre.2).powi(2);
                        if d2.sqrt() <= 2.0 {
                            c += 1;
                        }
                    }
                }
            }
            c as f64
        };
        let expected = 50.0 * ball_pixels;
        let got = peaks[0].raw_intensity;
        assert_abs_diff_eq!(got.value, expected, epsilon = expected * 0.02);
        assert!(got.sigma() > 0.0);
    }

    #[test]
    fn profile_cutoff_matches_pixel_sum_for_a_contained_ball() {
        let centre = (16.0, 16.0, 8.0);
        let data = data_set_with_frames(ball_stack(16, 32, 10, 50, centre, 2.0), 0.4);
        let mut sum_peaks = vec![ball_peak(centre, 1.0)];
        let mut prof_peaks = vec![ball_peak(centre, 1.0)];

        integrate_peaks(
            &data,
            &mut sum_peaks,
            &IntegrationParameters::default(),
            &SilentProgress,
        )
        .unwrap();
        integrate_peaks(
            &data,
            &mut prof_peaks,
            &IntegrationParameters {
                method: IntegrationMethod::ProfileSigma,
                ..IntegrationParameters::default()
            },
            &SilentProgress,
        )
        .unwrap();

        let a = sum_peaks[0].raw_intensity.value;
        let b = prof_peaks[0].raw_intensity.value;
        // the optimal cutoff keeps at least the strong core
        assert!(b > 0.6 * a, "profile {b} vs sum {a}");
        assert!(b <= a * 1.05);
    }

    #[test]
    fn masked_core_fails_the_peak() {
        let centre = (16.0, 16.0, 8.0);
        let data = data_set_with_frames(ball_stack(16, 32, 10, 50, centre, 2.0), 0.4);
        let mut peaks = vec![ball_peak(centre, 1.0)];
        let params = IntegrationParameters {
            masks: vec![Aabb::new(
                Vector3::new(0.0, 0.0, 0.0),
                Vector3::new(32.0, 32.0, 16.0),
            )],
            ..IntegrationParameters::default()
        };
        let n = integrate_peaks(&data, &mut peaks, &params, &SilentProgress).unwrap();
        assert_eq!(n, 0);
        assert!(!peaks[0].selected);
    }

    #[test]
    fn bad_shell_parameters_fail_fast() {
        let centre = (8.0, 8.0, 4.0);
        let data = data_set_with_frames(ball_stack(8, 16, 5, 10, centre, 1.5), 0.4);
        let mut peaks = vec![ball_peak(centre, 1.0)];
        let params = IntegrationParameters {
            peak_end: 4.0,
            bkg_begin: 3.0,
            bkg_end: 5.0,
            ..IntegrationParameters::default()
        };
        assert!(matches!(
            integrate_peaks(&data, &mut peaks, &params, &SilentProgress),
            Err(IntegrateError::BadScales { .. })
        ));
    }

    #[test]
    fn gaussian_fit_integrates_a_gaussian_spot() {
        let centre = (16.0, 16.0, 8.0);
        // build a Gaussian spot rather than a hard ball
        let frames: Vec<Array2<u32>> = (0..16)
            .map(|f| {
                let mut img = Array2::from_elem((32, 32), 10u32);
                for y in 0..32 {
                    for x in 0..32 {
                        let d2 = ((x as f64 - centre.0) / 1.5).powi(2)
                            + ((y as f64 - centre.1) / 1.5).powi(2)
                            + ((f as f64 - centre.2) / 1.5).powi(2);
                        img[(y, x)] += (400.0 * (-0.5 * d2).exp()).round() as u32;
                    }
                }
                img
            })
            .collect();
        let data = data_set_with_frames(frames, 0.4);
        let mut peaks = vec![ball_peak(centre, 1.5)];
        let params = IntegrationParameters {
            method: IntegrationMethod::GaussianFit,
            chi2_threshold: 50.0,
            ..IntegrationParameters::default()
        };
        let n = integrate_peaks(&data, &mut peaks, &params, &SilentProgress).unwrap();
        assert_eq!(n, 1);

        // analytic integral: A (2 pi)^{3/2} sx sy sz
        let expected = 400.0 * (2.0 * std::f64::consts::PI).powf(1.5) * 1.5f64.powi(3);
        let got = peaks[0].raw_intensity.value;
        assert_abs_diff_eq!(got, expected, epsilon = expected * 0.1);
    }
}

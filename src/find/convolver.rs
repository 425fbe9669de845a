// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Convolution pre-filter for the blob finder.
//!
//! Frames are convolved with a pre-registered kernel by 2-D FFT with
//! periodic wrap-around. The transformed kernel is computed once per frame
//! size and cached, so per-frame cost is two transforms and a pointwise
//! product.

use ndarray::Array2;
use num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use std::str::FromStr;
use std::sync::Arc;

/// The registered convolution kernels.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum KernelKind {
    /// Pass the frame through untouched.
    Delta,
    /// Normalised box average over a `(2 size + 1)^2` window.
    Box { size: usize },
    /// Positive disk of radius `r1` minus the annulus `r2..r3`, both
    /// normalised; a matched filter with local background subtraction.
    Annular { r1: f64, r2: f64, r3: f64 },
    /// Normalised isotropic Gaussian of the given sigma, truncated at three
    /// sigma.
    Radial { sigma: f64 },
}

impl Default for KernelKind {
    fn default() -> KernelKind {
        KernelKind::Annular {
            r1: 5.0,
            r2: 10.0,
            r3: 15.0,
        }
    }
}

impl FromStr for KernelKind {
    type Err = String;

    fn from_str(s: &str) -> Result<KernelKind, String> {
        match s {
            "none" | "delta" => Ok(KernelKind::Delta),
            "box" => Ok(KernelKind::Box { size: 2 }),
            "annular" => Ok(KernelKind::default()),
            "radial" => Ok(KernelKind::Radial { sigma: 2.0 }),
            other => Err(format!(
                "unknown kernel '{other}' (expected none, box, annular or radial)"
            )),
        }
    }
}

impl KernelKind {
    /// Render the kernel onto a frame-sized matrix with the kernel origin at
    /// (0, 0) and periodic wrap-around, ready for FFT convolution.
    fn matrix(&self, n_rows: usize, n_cols: usize) -> Array2<f64> {
        let mut m = Array2::<f64>::zeros((n_rows, n_cols));
        // wrapped offsets from the origin
        let wrap = |i: usize, n: usize| -> f64 {
            let i = i as f64;
            let n = n as f64;
            if i <= n / 2.0 {
                i
            } else {
                i - n
            }
        };
        match *self {
            KernelKind::Delta => {
                m[(0, 0)] = 1.0;
            }
            KernelKind::Box { size } => {
                let size = size as f64;
                let mut n = 0usize;
                for r in 0..n_rows {
                    for c in 0..n_cols {
                        if wrap(r, n_rows).abs() <= size && wrap(c, n_cols).abs() <= size {
                            m[(r, c)] = 1.0;
                            n += 1;
                        }
                    }
                }
                if n > 0 {
                    m /= n as f64;
                }
            }
            KernelKind::Annular { r1, r2, r3 } => {
                let mut n_inner = 0usize;
                let mut n_outer = 0usize;
                for r in 0..n_rows {
                    for c in 0..n_cols {
                        let d = (wrap(r, n_rows).powi(2) + wrap(c, n_cols).powi(2)).sqrt();
                        if d <= r1 {
                            n_inner += 1;
                        } else if d >= r2 && d <= r3 {
                            n_outer += 1;
                        }
                    }
                }
                for r in 0..n_rows {
                    for c in 0..n_cols {
                        let d = (wrap(r, n_rows).powi(2) + wrap(c, n_cols).powi(2)).sqrt();
                        if d <= r1 && n_inner > 0 {
                            m[(r, c)] = 1.0 / n_inner as f64;
                        } else if d >= r2 && d <= r3 && n_outer > 0 {
                            m[(r, c)] = -1.0 / n_outer as f64;
                        }
                    }
                }
            }
            KernelKind::Radial { sigma } => {
                let cut = 3.0 * sigma;
                let mut total = 0.0;
                for r in 0..n_rows {
                    for c in 0..n_cols {
                        let d2 = wrap(r, n_rows).powi(2) + wrap(c, n_cols).powi(2);
                        if d2.sqrt() <= cut {
                            let v = (-0.5 * d2 / (sigma * sigma)).exp();
                            m[(r, c)] = v;
                            total += v;
                        }
                    }
                }
                if total > 0.0 {
                    m /= total;
                }
            }
        }
        m
    }
}

struct Plan {
    n_rows: usize,
    n_cols: usize,
    row_fft: Arc<dyn Fft<f64>>,
    row_ifft: Arc<dyn Fft<f64>>,
    col_fft: Arc<dyn Fft<f64>>,
    col_ifft: Arc<dyn Fft<f64>>,
    kernel_hat: Array2<Complex<f64>>,
}

/// FFT convolver with a cached kernel transform.
pub struct Convolver {
    kind: KernelKind,
    planner: FftPlanner<f64>,
    plan: Option<Plan>,
}

fn fft2(
    data: &mut Array2<Complex<f64>>,
    row_fft: &Arc<dyn Fft<f64>>,
    col_fft: &Arc<dyn Fft<f64>>,
) {
    for mut row in data.rows_mut() {
        let slice = row.as_slice_mut().expect("contiguous row");
        row_fft.process(slice);
    }
    // columns: transpose, transform rows, transpose back
    let mut t = data.t().to_owned();
    for mut row in t.rows_mut() {
        let slice = row.as_slice_mut().expect("contiguous row");
        col_fft.process(slice);
    }
    data.assign(&t.t());
}

impl Convolver {
    pub fn new(kind: KernelKind) -> Convolver {
        Convolver {
            kind,
            planner: FftPlanner::new(),
            plan: None,
        }
    }

    pub fn kind(&self) -> KernelKind {
        self.kind
    }

    fn plan_for(&mut self, n_rows: usize, n_cols: usize) {
        let rebuild = match &self.plan {
            Some(p) => p.n_rows != n_rows || p.n_cols != n_cols,
            None => true,
        };
        if !rebuild {
            return;
        }

        let row_fft = self.planner.plan_fft_forward(n_cols);
        let row_ifft = self.planner.plan_fft_inverse(n_cols);
        let col_fft = self.planner.plan_fft_forward(n_rows);
        let col_ifft = self.planner.plan_fft_inverse(n_rows);

        let kernel = self.kind.matrix(n_rows, n_cols);
        let mut kernel_hat = kernel.mapv(|v| Complex::new(v, 0.0));
        fft2(&mut kernel_hat, &row_fft, &col_fft);

        self.plan = Some(Plan {
            n_rows,
            n_cols,
            row_fft,
            row_ifft,
            col_fft,
            col_ifft,
            kernel_hat,
        });
    }

    /// Circular convolution of an image with the kernel.
    pub fn convolve(&mut self, image: &Array2<f64>) -> Array2<f64> {
        let (n_rows, n_cols) = image.dim();
        if let KernelKind::Delta = self.kind {
            return image.clone();
        }
        self.plan_for(n_rows, n_cols);
        let plan = self.plan.as_ref().expect("plan was just built");

        let mut hat = image.mapv(|v| Complex::new(v, 0.0));
        fft2(&mut hat, &plan.row_fft, &plan.col_fft);

        let factor = 1.0 / (n_rows * n_cols) as f64;
        hat.zip_mut_with(&plan.kernel_hat, |a, b| *a = *a * b * factor);

        fft2(&mut hat, &plan.row_ifft, &plan.col_ifft);
        hat.mapv(|v| v.re)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn impulse(n: usize, r: usize, c: usize) -> Array2<f64> {
        let mut img = Array2::zeros((n, n));
        img[(r, c)] = 1.0;
        img
    }

    #[test]
    fn kernel_names_parse() {
        assert_eq!(KernelKind::from_str("delta").unwrap(), KernelKind::Delta);
        assert!(matches!(
            KernelKind::from_str("annular").unwrap(),
            KernelKind::Annular { .. }
        ));
        assert!(KernelKind::from_str("sombrero").is_err());
    }

    #[test]
    fn delta_kernel_is_the_identity() {
        let mut conv = Convolver::new(KernelKind::Delta);
        let img = impulse(16, 7, 3);
        let out = conv.convolve(&img);
        assert_abs_diff_eq!(out[(7, 3)], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn box_kernel_preserves_total_mass() {
        let mut conv = Convolver::new(KernelKind::Box { size: 1 });
        let img = impulse(16, 8, 8);
        let out = conv.convolve(&img);
        assert_abs_diff_eq!(out.sum(), 1.0, epsilon = 1e-9);
        // impulse smeared over a 3x3 window
        assert_abs_diff_eq!(out[(8, 8)], 1.0 / 9.0, epsilon = 1e-9);
        assert_abs_diff_eq!(out[(7, 9)], 1.0 / 9.0, epsilon = 1e-9);
        assert_abs_diff_eq!(out[(5, 8)], 0.0, epsilon = 1e-9);
    }

    #[test]
    fn convolution_wraps_periodically() {
        let mut conv = Convolver::new(KernelKind::Box { size: 1 });
        let img = impulse(16, 0, 0);
        let out = conv.convolve(&img);
        assert_abs_diff_eq!(out[(15, 15)], 1.0 / 9.0, epsilon = 1e-9);
    }

    #[test]
    fn annular_kernel_suppresses_flat_background() {
        let mut conv = Convolver::new(KernelKind::Annular {
            r1: 2.0,
            r2: 4.0,
            r3: 6.0,
        });
        let img = Array2::from_elem((32, 32), 5.0);
        let out = conv.convolve(&img);
        // +ring and -ring each integrate to one: flat images map to zero
        for v in out.iter() {
            assert_abs_diff_eq!(*v, 0.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn kernel_cache_survives_frame_size_changes(){
        let mut conv = Convolver::new(KernelKind::Box { size: 1 });
        let a = conv.convolve(&impulse(16, 8, 8));
        let b = conv.convolve(&impulse(8, 4, 4));
        let c = conv.convolve(&impulse(16, 8, 8));
        assert_abs_diff_eq!(a[(8, 8)], c[(8, 8)], epsilon = 1e-12);
        assert_abs_diff_eq!(b[(4, 4)], 1.0 / 9.0, epsilon = 1e-9);
    }
}

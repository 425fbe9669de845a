// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Niggli reduction of a lattice metric.
//!
//! The eight-step state machine of Krivy and Gruber: each pass applies the
//! first condition that fires as a basis change on the metric tensor and
//! restarts from the top; the loop ends when no condition applies. The
//! character is `A = g11, B = g22, C = g33, xi = 2 g23, eta = 2 g13,
//! zeta = 2 g12`.

use nalgebra::Matrix3;

use super::CrystalError;

const MAX_ITERATIONS: usize = 100;

/// Reduce a metric tensor. Returns the reduced metric and the accumulated
/// basis transform `P` with `G_red = P^T G P`.
pub fn niggli_reduce(
    g: &Matrix3<f64>,
    epsilon: f64,
) -> Result<(Matrix3<f64>, Matrix3<f64>), CrystalError> {
    if epsilon <= 0.0 {
        return Err(CrystalError::BadTolerance(epsilon));
    }
    // the caller's tolerance is relative to the size of the metric
    let eps = epsilon * (g[(0, 0)] + g[(1, 1)] + g[(2, 2)]) / 3.0;

    let mut gm = *g;
    let mut total = Matrix3::<f64>::identity();

    for _ in 0..MAX_ITERATIONS {
        let a = gm[(0, 0)];
        let b = gm[(1, 1)];
        let c = gm[(2, 2)];
        let xi = 2.0 * gm[(1, 2)];
        let eta = 2.0 * gm[(0, 2)];
        let zeta = 2.0 * gm[(0, 1)];

        let sign_of = |v: f64| -> i32 {
            if v < -eps {
                -1
            } else if v > eps {
                1
            } else {
                0
            }
        };
        let l = sign_of(xi);
        let m = sign_of(eta);
        let n = sign_of(zeta);
        let approx = |x: f64, y: f64| (x - y).abs() <= eps;

        let cm: Matrix3<f64>;

        // sign normalisation matrix of steps 3 and 4; identity when the
        // angle character is already consistent
        let flip = if l * m * n == 1 {
            // step 3: all acute
            let i = if l == -1 { -1.0 } else { 1.0 };
            let j = if m == -1 { -1.0 } else { 1.0 };
            let k = if n == -1 { -1.0 } else { 1.0 };
            Matrix3::from_diagonal(&nalgebra::Vector3::new(i, j, k))
        } else {
            // step 4: all obtuse or zero
            let mut i = if l == 1 { -1.0 } else { 1.0 };
            let mut j = if m == 1 { -1.0 } else { 1.0 };
            let mut k = if n == 1 { -1.0 } else { 1.0 };
            if i * j * k < 0.0 {
                if l == 0 {
                    i = -1.0;
                }
                if m == 0 {
                    j = -1.0;
                }
                if n == 0 {
                    k = -1.0;
                }
            }
            Matrix3::from_diagonal(&nalgebra::Vector3::new(i, j, k))
        };
        let flip_is_identity = flip[(0, 0)] > 0.0 && flip[(1, 1)] > 0.0 && flip[(2, 2)] > 0.0;

        if a > b + eps || (approx(a, b) && xi.abs() > eta.abs() + eps) {
            // step 1: order a and b
            cm = Matrix3::new(0.0, -1.0, 0.0, -1.0, 0.0, 0.0, 0.0, 0.0, -1.0);
        } else if b > c + eps || (approx(b, c) && eta.abs() > zeta.abs() + eps) {
            // step 2: order b and c
            cm = Matrix3::new(-1.0, 0.0, 0.0, 0.0, 0.0, -1.0, 0.0, -1.0, 0.0);
        } else if !flip_is_identity {
            cm = flip;
        } else if xi.abs() > b + eps
            || (approx(xi, b) && 2.0 * eta < zeta - eps)
            || (approx(xi, -b) && zeta < -eps)
        {
            // step 5
            let s = if xi > 0.0 { 1.0 } else { -1.0 };
            cm = Matrix3::new(1.0, 0.0, 0.0, 0.0, 1.0, -s, 0.0, 0.0, 1.0);
        } else if eta.abs() > a + eps
            || (approx(eta, a) && 2.0 * xi < zeta - eps)
            || (approx(eta, -a) && zeta < -eps)
        {
            // step 6
            let s = if eta > 0.0 { 1.0 } else { -1.0 };
            cm = Matrix3::new(1.0, 0.0, -s, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0);
        } else if zeta.abs() > a + eps
            || (approx(zeta, a) && 2.0 * xi < eta - eps)
            || (approx(zeta, -a) && eta < -eps)
        {
            // step 7
            let s = if zeta > 0.0 { 1.0 } else { -1.0 };
            cm = Matrix3::new(1.0, -s, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0);
        } else if xi + eta + zeta + a + b < -eps
            || (approx(xi + eta + zeta + a + b, 0.0) && 2.0 * (a + eta) + zeta > eps)
        {
            // step 8
            cm = Matrix3::new(1.0, 0.0, 1.0, 0.0, 1.0, 1.0, 0.0, 0.0, 1.0);
        } else {
            return Ok((gm, total));
        }

        gm = cm.transpose() * gm * cm;
        total *= cm;
    }

    Err(CrystalError::ReductionDidNotConverge(MAX_ITERATIONS))
}

/// Whether a metric satisfies the main Niggli conditions.
pub fn is_niggli_reduced(g: &Matrix3<f64>, epsilon: f64) -> bool {
    let a = g[(0, 0)];
    let b = g[(1, 1)];
    let c = g[(2, 2)];
    let xi = 2.0 * g[(1, 2)];
    let eta = 2.0 * g[(0, 2)];
    let zeta = 2.0 * g[(0, 1)];
    let eps = epsilon * (a + b + c) / 3.0;
    a <= b + eps
        && b <= c + eps
        && xi.abs() <= b + eps
        && eta.abs() <= a + eps
        && zeta.abs() <= a + eps
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crystal::UnitCell;
    use approx::assert_abs_diff_eq;

    const DEG: f64 = std::f64::consts::PI / 180.0;

    fn reduce_cell(
        a: f64,
        b: f64,
        c: f64,
        al: f64,
        be: f64,
        ga: f64,
    ) -> (Matrix3<f64>, Matrix3<f64>) {
        let cell = UnitCell::from_parameters(a, b, c, al * DEG, be * DEG, ga * DEG).unwrap();
        let g = cell.metric();
        let (gr, p) = niggli_reduce(&g, 1e-5).unwrap();
        assert_abs_diff_eq!(p.transpose() * g * p, gr, epsilon = 1e-6);
        (gr, p)
    }

    #[test]
    fn already_reduced_cell_is_untouched() {
        let (gr, p) = reduce_cell(5.0, 6.0, 8.0, 90.0, 90.0, 90.0);
        assert_abs_diff_eq!(p, Matrix3::identity(), epsilon = 1e-12);
        assert_abs_diff_eq!(gr[(0, 0)], 25.0, epsilon = 1e-9);
    }

    #[test]
    fn edges_come_out_ordered() {
        let (gr, _) = reduce_cell(8.0, 5.0, 6.0, 90.0, 90.0, 90.0);
        assert!(gr[(0, 0)] <= gr[(1, 1)] + 1e-9);
        assert!(gr[(1, 1)] <= gr[(2, 2)] + 1e-9);
        assert!(is_niggli_reduced(&gr, 1e-5));
    }

    #[test]
    fn skew_basis_reduces_to_the_primitive_cell() {
        // basis (a, b, a+b+c): same lattice as the orthorhombic cell
        let cell =
            UnitCell::from_parameters(4.0, 5.0, 7.0, 90.0 * DEG, 90.0 * DEG, 90.0 * DEG).unwrap();
        let a = cell.a_vector();
        let b = cell.b_vector();
        let c = cell.c_vector();
        let skew = UnitCell::from_direct_vectors(a, b, a + b + c).unwrap();
        let (gr, _) = niggli_reduce(&skew.metric(), 1e-5).unwrap();
        assert_abs_diff_eq!(gr[(0, 0)], 16.0, epsilon = 1e-6);
        assert_abs_diff_eq!(gr[(1, 1)], 25.0, epsilon = 1e-6);
        assert_abs_diff_eq!(gr[(2, 2)], 49.0, epsilon = 1e-6);
        assert_abs_diff_eq!(gr[(0, 1)].abs(), 0.0, epsilon = 1e-6);
        assert_abs_diff_eq!(gr[(0, 2)].abs(), 0.0, epsilon = 1e-6);
        assert_abs_diff_eq!(gr[(1, 2)].abs(), 0.0, epsilon = 1e-6);
    }

    #[test]
    fn oblique_cells_stay_reduced_and_preserve_volume() {
        for (a, b, c, al, be, ga) in [
            (6.0, 7.0, 9.0, 80.0, 95.0, 103.0),
            (10.0, 4.0, 6.5, 66.0, 100.0, 88.0),
            (3.0, 12.0, 7.0, 120.0, 70.0, 95.0),
        ] {
            let cell =
                UnitCell::from_parameters(a, b, c, al * DEG, be * DEG, ga * DEG).unwrap();
            let g = cell.metric();
            let (gr, p) = niggli_reduce(&g, 1e-5).unwrap();
            assert!(is_niggli_reduced(&gr, 1e-4), "not reduced for {a} {b} {c}");
            assert_abs_diff_eq!(gr.determinant(), g.determinant(), epsilon = 1e-5);
            assert_abs_diff_eq!(p.determinant().abs(), 1.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn bad_epsilon_is_rejected() {
        let g = Matrix3::identity();
        assert!(matches!(
            niggli_reduce(&g, 0.0),
            Err(CrystalError::BadTolerance(_))
        ));
    }
}

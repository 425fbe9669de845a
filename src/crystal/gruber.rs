// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Bravais classification of a Niggli metric.
//!
//! The 44 lattice characters of Gruber, organised by the equalities among
//! the squared cell edges. Each character fixes the Bravais type, the
//! centring and the transformation from the Niggli cell to the conventional
//! cell. Characters are tested most-specific first within each branch so
//! that the generic triclinic rows only catch what nothing else claims.
//!
//! The metric parameters follow the Niggli character convention
//! `A = g11, B = g22, C = g33, D = g23, E = g13, F = g12`.

use nalgebra::Matrix3;

use super::{BravaisType, CrystalError, LatticeCentring};

#[derive(Clone, Debug)]
pub struct GruberSolution {
    /// Matching character, 1 ..= 44.
    pub condition: usize,
    pub bravais: BravaisType,
    pub centring: LatticeCentring,
    /// Basis transform from the Niggli cell to the conventional cell.
    pub transform: Matrix3<f64>,
}

fn symbol(tag: &str) -> (BravaisType, LatticeCentring) {
    let bravais = match tag.as_bytes()[0] {
        b'a' => BravaisType::Triclinic,
        b'm' => BravaisType::Monoclinic,
        b'o' => BravaisType::Orthorhombic,
        b't' => BravaisType::Tetragonal,
        b'h' => BravaisType::Hexagonal,
        b'c' => BravaisType::Cubic,
        _ => unreachable!("tags are internal"),
    };
    let centring = match tag.as_bytes()[1] {
        b'P' => LatticeCentring::P,
        b'A' => LatticeCentring::A,
        b'B' => LatticeCentring::B,
        b'C' => LatticeCentring::C,
        b'I' => LatticeCentring::I,
        b'F' => LatticeCentring::F,
        b'R' => LatticeCentring::R,
        _ => unreachable!("tags are internal"),
    };
    (bravais, centring)
}

#[rustfmt::skip]
fn transform_of(condition: usize) -> Matrix3<f64> {
    let m: [f64; 9] = match condition {
        1  => [1.0, -1.0, 1.0,   1.0, 1.0, -1.0,   -1.0, 1.0, 1.0],
        2  => [1.0, -1.0, 0.0,   -1.0, 0.0, 1.0,   -1.0, -1.0, -1.0],
        3  => [1.0, 0.0, 0.0,    0.0, 1.0, 0.0,    0.0, 0.0, 1.0],
        4  => [1.0, -1.0, 0.0,   -1.0, 0.0, 1.0,   -1.0, -1.0, -1.0],
        5  => [1.0, 0.0, 1.0,    1.0, 1.0, 0.0,    0.0, 1.0, 1.0],
        6  => [0.0, 1.0, 1.0,    1.0, 0.0, 1.0,    1.0, 1.0, 0.0],
        7  => [1.0, 0.0, 1.0,    1.0, 1.0, 0.0,    0.0, 1.0, 1.0],
        8  => [-1.0, -1.0, 0.0,  -1.0, 0.0, -1.0,  0.0, -1.0, -1.0],
        9  => [1.0, 0.0, 0.0,    -1.0, 1.0, 0.0,   -1.0, -1.0, 3.0],
        10 => [1.0, 1.0, 0.0,    1.0, -1.0, 0.0,   0.0, 0.0, -1.0],
        11 => [1.0, 0.0, 0.0,    0.0, 1.0, 0.0,    0.0, 0.0, 1.0],
        12 => [1.0, 0.0, 0.0,    0.0, 1.0, 0.0,    0.0, 0.0, 1.0],
        13 => [1.0, 1.0, 0.0,    -1.0, 1.0, 0.0,   0.0, 0.0, 1.0],
        14 => [1.0, 1.0, 0.0,    -1.0, 1.0, 0.0,   0.0, 0.0, 1.0],
        15 => [1.0, 0.0, 0.0,    0.0, 1.0, 0.0,    1.0, 1.0, 2.0],
        16 => [-1.0, -1.0, 0.0,  1.0, -1.0, 0.0,   1.0, 1.0, 2.0],
        17 => [1.0, -1.0, 0.0,   1.0, 1.0, 0.0,    -1.0, 0.0, -1.0],
        18 => [0.0, -1.0, 1.0,   1.0, -1.0, -1.0,  1.0, 0.0, 0.0],
        19 => [-1.0, 0.0, 0.0,   0.0, -1.0, 1.0,   -1.0, 1.0, 1.0],
        20 => [0.0, 1.0, 1.0,    0.0, 1.0, -1.0,   -1.0, 0.0, 0.0],
        21 => [0.0, 1.0, 0.0,    0.0, 0.0, 1.0,    1.0, 0.0, 0.0],
        22 => [0.0, 1.0, 0.0,    0.0, 0.0, 1.0,    1.0, 0.0, 0.0],
        23 => [0.0, 1.0, 1.0,    0.0, -1.0, 1.0,   1.0, 0.0, 0.0],
        24 => [1.0, 2.0, 1.0,    0.0, -1.0, 1.0,   1.0, 0.0, 0.0],
        25 => [0.0, 1.0, 1.0,    0.0, 1.0, -1.0,   -1.0, 0.0, 0.0],
        26 => [1.0, 0.0, 0.0,    -1.0, 2.0, 0.0,   -1.0, 0.0, 2.0],
        27 => [-1.0, 2.0, 0.0,   -1.0, 0.0, 0.0,   0.0, -1.0, 1.0],
        28 => [-1.0, 0.0, 0.0,   -1.0, 0.0, 2.0,   0.0, 1.0, 0.0],
        29 => [1.0, 0.0, 0.0,    1.0, -2.0, 0.0,   0.0, 0.0, -1.0],
        30 => [0.0, 1.0, 0.0,    0.0, 1.0, -2.0,   -1.0, 0.0, 0.0],
        31 => [1.0, 0.0, 0.0,    0.0, 1.0, 0.0,    0.0, 0.0, 1.0],
        32 => [1.0, 0.0, 0.0,    0.0, 1.0, 0.0,    0.0, 0.0, 1.0],
        33 => [1.0, 0.0, 0.0,    0.0, 1.0, 0.0,    0.0, 0.0, 1.0],
        34 => [-1.0, 0.0, 0.0,   0.0, 0.0, -1.0,   0.0, -1.0, 0.0],
        35 => [0.0, -1.0, 0.0,   -1.0, 0.0, 0.0,   0.0, 0.0, -1.0],
        36 => [1.0, 0.0, 0.0,    -1.0, 0.0, -2.0,  0.0, 1.0, 0.0],
        37 => [1.0, 0.0, 2.0,    1.0, 0.0, 0.0,    0.0, 1.0, 0.0],
        38 => [-1.0, 0.0, 0.0,   1.0, 2.0, 0.0,    0.0, 0.0, -1.0],
        39 => [-1.0, -2.0, 0.0,  -1.0, 0.0, 0.0,   0.0, 0.0, -1.0],
        40 => [0.0, -1.0, 0.0,   0.0, 1.0, 2.0,    -1.0, 0.0, 0.0],
        41 => [0.0, -1.0, -2.0,  0.0, -1.0, 0.0,   -1.0, 0.0, 0.0],
        42 => [-1.0, 0.0, 0.0,   0.0, -1.0, 0.0,   1.0, 1.0, 2.0],
        43 => [-1.0, 0.0, 0.0,   -1.0, -1.0, -2.0, 0.0, -1.0, 0.0],
        44 => [1.0, 0.0, 0.0,    0.0, 1.0, 0.0,    0.0, 0.0, 1.0],
        _ => unreachable!("characters run 1..=44"),
    };
    Matrix3::from_row_slice(&m)
}

const CHARACTER_SYMBOLS: [&str; 44] = [
    "cF", "hR", "cP", "hR", "cI", "tI", "tI", "oI", "hR", "mC", "tP", "hP", "oC", "mC", "tI",
    "oF", "mC", "tI", "oI", "mC", "tP", "hP", "oC", "hR", "mC", "oF", "mC", "mC", "mC", "mC",
    "aP", "oP", "mP", "mP", "mP", "oC", "mC", "oC", "mC", "oC", "mC", "oI", "mI", "aP",
];

fn solution(condition: usize) -> GruberSolution {
    let (bravais, centring) = symbol(CHARACTER_SYMBOLS[condition - 1]);
    GruberSolution {
        condition,
        bravais,
        centring,
        transform: transform_of(condition),
    }
}

/// Classify a (Niggli-reduced) metric into one of the 44 lattice
/// characters.
pub fn gruber_reduce(g: &Matrix3<f64>, epsilon: f64) -> Result<GruberSolution, CrystalError> {
    if epsilon <= 0.0 {
        return Err(CrystalError::BadTolerance(epsilon));
    }

    let a = g[(0, 0)];
    let b = g[(1, 1)];
    let c = g[(2, 2)];
    let d = 0.5 * (g[(1, 2)] + g[(2, 1)]);
    let e = 0.5 * (g[(0, 2)] + g[(2, 0)]);
    let f = 0.5 * (g[(0, 1)] + g[(1, 0)]);

    let eps = epsilon * (a + b + c) / 3.0;
    let eq = |x: f64, y: f64| (x - y).abs() <= eps;
    let pos = |x: f64| x > eps;
    // 2|D + E + F| = A + B marks the body/face-centred characters
    let two_sum = 2.0 * (d + e + f).abs();

    let condition: usize = if eq(a, b) && eq(b, c) {
        // A = B = C
        if eq(d, 0.5 * a) && eq(e, 0.5 * a) && eq(f, 0.5 * a) {
            1
        } else if eq(d, e) && eq(e, f) && pos(d) {
            2
        } else if eq(d, 0.0) && eq(e, 0.0) && eq(f, 0.0) {
            3
        } else if eq(d, -a / 3.0) && eq(e, -a / 3.0) && eq(f, -a / 3.0) {
            5
        } else if eq(d, e) && eq(e, f) {
            4
        } else if eq(d, e) && eq(two_sum, a + b) {
            6
        } else if eq(e, f) && eq(two_sum, a + b) {
            7
        } else if eq(two_sum, a + b) {
            8
        } else {
            if pos(d) && pos(e) && pos(f) {
                31
            } else {
                44
            }
        }
    } else if eq(a, b) {
        // A = B
        if eq(d, 0.5 * a) && eq(e, 0.5 * a) && eq(f, 0.5 * a) {
            9
        } else if eq(d, e) && pos(d) && pos(f) {
            10
        } else if eq(d, 0.0) && eq(e, 0.0) && eq(f, 0.0) {
            11
        } else if eq(d, 0.0) && eq(e, 0.0) && eq(f, -0.5 * a) {
            12
        } else if eq(d, 0.0) && eq(e, 0.0) {
            13
        } else if eq(d, -0.5 * a) && eq(e, -0.5 * a) && eq(f, 0.0) {
            15
        } else if eq(d, e) && !pos(d) && eq(two_sum, a + b) {
            16
        } else if eq(d, e) && !pos(d) {
            14
        } else if eq(two_sum, a + b) {
            17
        } else if pos(d) && pos(e) && pos(f) {
            31
        } else {
            44
        }
    } else if eq(b, c) {
        // B = C
        if eq(d, 0.25 * a) && eq(e, 0.5 * a) && eq(f, 0.5 * a) {
            18
        } else if eq(e, 0.5 * a) && eq(f, 0.5 * a) {
            19
        } else if eq(e, f) && pos(e) && pos(d) {
            20
        } else if eq(d, 0.0) && eq(e, 0.0) && eq(f, 0.0) {
            21
        } else if eq(d, -0.5 * b) && eq(e, 0.0) && eq(f, 0.0) {
            22
        } else if eq(e, 0.0) && eq(f, 0.0) {
            23
        } else if eq(e, -a / 3.0) && eq(f, -a / 3.0) && eq(two_sum, a + b) {
            24
        } else if eq(e, f) {
            25
        } else if pos(d) && pos(e) && pos(f) {
            31
        } else {
            44
        }
    } else {
        // all edges distinct
        if eq(d, 0.25 * a) && eq(e, 0.5 * a) && eq(f, 0.5 * a) {
            26
        } else if eq(e, 0.5 * a) && eq(f, 0.5 * a) {
            27
        } else if eq(e, 0.5 * a) && eq(f, 2.0 * d) {
            28
        } else if eq(e, 2.0 * d) && eq(f, 0.5 * a) {
            29
        } else if eq(d, 0.5 * b) && eq(f, 2.0 * e) {
            30
        } else if pos(d) && pos(e) && pos(f) {
            31
        } else if eq(d, 0.0) && eq(e, 0.0) && eq(f, 0.0) {
            32
        } else if eq(d, -0.5 * b) && eq(e, -0.5 * a) && eq(f, 0.0) {
            42
        } else if eq(d, 0.0) && eq(e, -0.5 * a) && eq(f, 0.0) {
            36
        } else if eq(e, -0.5 * a) && eq(f, 0.0) {
            37
        } else if eq(d, 0.0) && eq(e, 0.0) && eq(f, -0.5 * a) {
            38
        } else if eq(e, 0.0) && eq(f, -0.5 * a) {
            39
        } else if eq(d, -0.5 * b) && eq(e, 0.0) && eq(f, 0.0) {
            40
        } else if eq(d, -0.5 * b) && eq(f, 0.0) {
            41
        } else if eq(d, 0.0) && eq(f, 0.0) {
            33
        } else if eq(d, 0.0) && eq(e, 0.0) {
            34
        } else if eq(e, 0.0) && eq(f, 0.0) {
            35
        } else if eq(two_sum, a + b) && eq((2.0 * d + f).abs(), b) {
            43
        } else {
            44
        }
    };

    Ok(solution(condition))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crystal::{niggli_reduce, UnitCell};
    use approx::assert_abs_diff_eq;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    const GRUBER_TOL: f64 = 1e-4;

    /// Metric from the Niggli character parameters.
    fn metric(p: &[f64; 6]) -> Matrix3<f64> {
        Matrix3::new(
            p[0], p[5], p[4], p[5], p[1], p[3], p[4], p[3], p[2], // A F E / F B D / E D C
        )
    }

    /// The exemplar of every character, from the classic test table.
    fn characters() -> Vec<(&'static str, [f64; 6])> {
        let a = 32.3232323232;
        let b = 43.23232323;
        let c = 35.35353535;
        let d = 10.10101010;
        let e = 5.15151515;
        let f = 8.8888888;

        let s6 = a / (2.0 * d + f);
        let s7 = a / (d + 2.0 * e);
        let s8 = a / (d + e + f);
        let s16 = a / (2.0 * d + f);
        let s17 = a / (d + e + f);
        let s24 = (b - a / 3.0) / (2.0 * d);
        let t43 = (2.0 * d + f) / b;
        let s43 = (2.0 * (d + e + f) - t43 * b) / a;

        vec![
            ("cF", [a, a, a, a / 2.0, a / 2.0, a / 2.0]),
            ("hR", [a, a, a, d, d, d]),
            ("cP", [a, a, a, 0.0, 0.0, 0.0]),
            ("hR", [a, a, a, -d, -d, -d]),
            ("cI", [a, a, a, -a / 3.0, -a / 3.0, -a / 3.0]),
            ("tI", [a, a, a, -d * s6, -d * s6, -f * s6]),
            ("tI", [a, a, a, -d * s7, -e * s7, -e * s7]),
            ("oI", [a, a, a, -d * s8, -e * s8, -f * s8]),
            ("hR", [a, a, c, a / 2.0, a / 2.0, a / 2.0]),
            ("mC", [a, a, c, d, d, f]),
            ("tP", [a, a, c, 0.0, 0.0, 0.0]),
            ("hP", [a, a, c, 0.0, 0.0, -a / 2.0]),
            ("oC", [a, a, c, 0.0, 0.0, f]),
            ("mC", [a, a, c, -d, -d, -f]),
            ("tI", [a, a, c, -a / 2.0, -a / 2.0, 0.0]),
            ("oF", [a, a, c, -d * s16, -d * s16, -f * s16]),
            ("mC", [a, a, c, -d * s17, -e * s17, -f * s17]),
            ("tI", [a, b, b, a / 4.0, a / 2.0, a / 2.0]),
            ("oI", [a, b, b, d, a / 2.0, a / 2.0]),
            ("mC", [a, b, b, d, e, e]),
            ("tP", [a, b, b, 0.0, 0.0, 0.0]),
            ("hP", [a, b, b, -b / 2.0, 0.0, 0.0]),
            ("oC", [a, b, b, d, 0.0, 0.0]),
            ("hR", [a, b, b, -d * s24, -a / 3.0, -a / 3.0]),
            ("mC", [a, b, b, -d, e, e]),
            ("oF", [a, b, c, a / 4.0, a / 2.0, a / 2.0]),
            ("mC", [a, b, c, d, a / 2.0, a / 2.0]),
            ("mC", [a, b, c, d, a / 2.0, 2.0 * d]),
            ("mC", [a, b, c, d, 2.0 * d, a / 2.0]),
            ("mC", [a, b, c, b / 2.0, e, 2.0 * e]),
            ("aP", [a, b, c, d, e, f]),
            ("oP", [a, b, c, 0.0, 0.0, 0.0]),
            ("mP", [a, b, c, 0.0, e, 0.0]),
            ("mP", [a, b, c, 0.0, 0.0, f]),
            ("mP", [a, b, c, d, 0.0, 0.0]),
            ("oC", [a, b, c, 0.0, -a / 2.0, 0.0]),
            ("mC", [a, b, c, d, -a / 2.0, 0.0]),
            ("oC", [a, b, c, 0.0, 0.0, -a / 2.0]),
            ("mC", [a, b, c, d, 0.0, -a / 2.0]),
            ("oC", [a, b, c, -b / 2.0, 0.0, 0.0]),
            ("mC", [a, b, c, -b / 2.0, e, 0.0]),
            ("oI", [a, b, c, -b / 2.0, -a / 2.0, 0.0]),
            ("mI", [a * s43, b * t43, c, -d, -e, -f]),
            ("aP", [a, b, c, -d, -e, -f]),
        ]
    }

    #[test]
    fn all_44_characters_classify() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        for (i, (expected, p)) in characters().into_iter().enumerate() {
            let condition = i + 1;
            for _ in 0..10 {
                let jitter: [f64; 6] = {
                    let mut q = p;
                    for v in &mut q {
                        *v += rng.gen_range(-0.1 * GRUBER_TOL..0.1 * GRUBER_TOL);
                    }
                    q
                };
                let g = metric(&jitter);
                let sol = gruber_reduce(&g, GRUBER_TOL).unwrap();
                assert_eq!(
                    sol.condition, condition,
                    "character {condition} misclassified as {}",
                    sol.condition
                );
                let got = format!("{}{}", sol.bravais.letter(), sol.centring.letter());
                assert_eq!(got, *expected, "character {condition}");
                assert!(sol.transform.determinant().abs() > 0.0);
            }
        }
    }

    #[test]
    fn orthorhombic_primitive_cell_classifies_as_oP() {
        const DEG: f64 = std::f64::consts::PI / 180.0;
        let cell = UnitCell::from_parameters(
            46.3559,
            59.9255,
            85.5735,
            90.0 * DEG,
            90.0 * DEG,
            90.0 * DEG,
        )
        .unwrap();
        let (gr, _) = niggli_reduce(&cell.metric(), 1e-5).unwrap();
        let sol = gruber_reduce(&gr, 1e-2).unwrap();
        assert_eq!(sol.condition, 32);
        assert_eq!(sol.bravais, BravaisType::Orthorhombic);
        assert_eq!(sol.centring, LatticeCentring::P);
    }

    #[test]
    fn fcc_primitive_cell_classifies_as_cF() {
        // primitive basis of an fcc lattice with cube edge 4: every edge
        // 2*sqrt(2), every angle 60 degrees
        let h = 2.0;
        let a = nalgebra::Vector3::new(0.0, h, h);
        let b = nalgebra::Vector3::new(h, 0.0, h);
        let c = nalgebra::Vector3::new(h, h, 0.0);
        let cell = UnitCell::from_direct_vectors(a, b, c).unwrap();
        let (gr, _) = niggli_reduce(&cell.metric(), 1e-5).unwrap();
        let sol = gruber_reduce(&gr, 1e-4).unwrap();
        assert_eq!(sol.condition, 1);
        assert_eq!(sol.bravais, BravaisType::Cubic);
        assert_eq!(sol.centring, LatticeCentring::F);

        // conventional transform recovers the cube volume (4 primitive cells)
        let mut conventional = cell.clone();
        conventional.transform(&sol.transform).unwrap();
        assert_abs_diff_eq!(conventional.volume(), 64.0, epsilon = 1e-9);
    }

    #[test]
    fn bcc_primitive_cell_classifies_as_ci() {
        // primitive basis of a bcc lattice with cube edge 4
        let h = 2.0;
        let a = nalgebra::Vector3::new(-h, h, h);
        let b = nalgebra::Vector3::new(h, -h, h);
        let c = nalgebra::Vector3::new(h, h, -h);
        let cell = UnitCell::from_direct_vectors(a, b, c).unwrap();
        let (gr, _) = niggli_reduce(&cell.metric(), 1e-5).unwrap();
        let sol = gruber_reduce(&gr, 1e-4).unwrap();
        assert_eq!(sol.bravais, BravaisType::Cubic);
        assert_eq!(sol.centring, LatticeCentring::I);
    }
}

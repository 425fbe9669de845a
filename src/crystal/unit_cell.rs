// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Crystallographic unit cells.
//!
//! A cell is stored as its direct basis `A` whose columns are the lattice
//! vectors a, b, c in angstroms, with the a axis along x and b in the xy
//! plane when built from scalar parameters. The reciprocal basis
//! `B = A^-T` is cached; its columns map integer Miller indices to
//! sample-frame q vectors.

use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};

use super::CrystalError;

/// Crystal system tag, one letter of the Bravais symbol.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BravaisType {
    Triclinic,
    Monoclinic,
    Orthorhombic,
    Tetragonal,
    Hexagonal,
    Cubic,
}

impl BravaisType {
    pub fn letter(self) -> char {
        match self {
            BravaisType::Triclinic => 'a',
            BravaisType::Monoclinic => 'm',
            BravaisType::Orthorhombic => 'o',
            BravaisType::Tetragonal => 't',
            BravaisType::Hexagonal => 'h',
            BravaisType::Cubic => 'c',
        }
    }
}

/// Lattice centring tag, the second letter of the Bravais symbol.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LatticeCentring {
    P,
    A,
    B,
    C,
    I,
    F,
    R,
}

impl LatticeCentring {
    pub fn letter(self) -> char {
        match self {
            LatticeCentring::P => 'P',
            LatticeCentring::A => 'A',
            LatticeCentring::B => 'B',
            LatticeCentring::C => 'C',
            LatticeCentring::I => 'I',
            LatticeCentring::F => 'F',
            LatticeCentring::R => 'R',
        }
    }
}

/// Integer Miller indices.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MillerIndex {
    pub h: i32,
    pub k: i32,
    pub l: i32,
}

impl MillerIndex {
    pub fn new(h: i32, k: i32, l: i32) -> MillerIndex {
        MillerIndex { h, k, l }
    }

    pub fn from_rounded(v: Vector3<f64>) -> MillerIndex {
        MillerIndex {
            h: v.x.round() as i32,
            k: v.y.round() as i32,
            l: v.z.round() as i32,
        }
    }

    pub fn vector(&self) -> Vector3<f64> {
        Vector3::new(self.h as f64, self.k as f64, self.l as f64)
    }

    pub fn neg(&self) -> MillerIndex {
        MillerIndex::new(-self.h, -self.k, -self.l)
    }
}

impl std::fmt::Display for MillerIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({} {} {})", self.h, self.k, self.l)
    }
}

const DEFAULT_INDEXING_TOLERANCE: f64 = 0.2;

#[derive(Clone, Debug)]
pub struct UnitCell {
    /// Direct basis, columns a, b, c in angstroms.
    a_mat: Matrix3<f64>,
    /// Cached reciprocal basis `A^-T`.
    b_mat: Matrix3<f64>,
    pub bravais: BravaisType,
    pub centring: LatticeCentring,
    pub indexing_tolerance: f64,
    pub space_group: Option<String>,
}

impl UnitCell {
    pub fn from_basis(a_mat: Matrix3<f64>) -> Result<UnitCell, CrystalError> {
        let inv = a_mat.try_inverse().ok_or(CrystalError::SingularBasis)?;
        Ok(UnitCell {
            a_mat,
            b_mat: inv.transpose(),
            bravais: BravaisType::Triclinic,
            centring: LatticeCentring::P,
            indexing_tolerance: DEFAULT_INDEXING_TOLERANCE,
            space_group: None,
        })
    }

    /// Build from scalar parameters; lengths in angstroms, angles in radians.
    /// The a vector points along x and b lies in the xy plane.
    pub fn from_parameters(
        a: f64,
        b: f64,
        c: f64,
        alpha: f64,
        beta: f64,
        gamma: f64,
    ) -> Result<UnitCell, CrystalError> {
        let (ca, cb, cc) = (alpha.cos(), beta.cos(), gamma.cos());
        let sc = gamma.sin();
        let a32 = c / sc * (ca - cb * cc);
        let arg = 1.0 - ca * ca - cb * cb - cc * cc + 2.0 * ca * cb * cc;
        if arg <= 0.0 || sc == 0.0 {
            return Err(CrystalError::SingularBasis);
        }
        let volume = a * b * c * arg.sqrt();
        let a33 = volume / (a * b * sc);
        let a_mat = Matrix3::new(
            a,
            b * cc,
            c * cb,
            0.0,
            b * sc,
            a32,
            0.0,
            0.0,
            a33,
        );
        UnitCell::from_basis(a_mat)
    }

    pub fn from_direct_vectors(
        a: Vector3<f64>,
        b: Vector3<f64>,
        c: Vector3<f64>,
    ) -> Result<UnitCell, CrystalError> {
        let volume = a.cross(&b).dot(&c);
        if volume.abs() < 1e-9 {
            return Err(CrystalError::CoplanarBasis);
        }
        UnitCell::from_basis(Matrix3::from_columns(&[a, b, c]))
    }

    pub fn from_reciprocal_vectors(
        astar: Vector3<f64>,
        bstar: Vector3<f64>,
        cstar: Vector3<f64>,
    ) -> Result<UnitCell, CrystalError> {
        let volume = astar.cross(&bstar).dot(&cstar);
        if volume.abs() < 1e-12 {
            return Err(CrystalError::CoplanarBasis);
        }
        let a = bstar.cross(&cstar) / volume;
        let b = cstar.cross(&astar) / volume;
        let c = astar.cross(&bstar) / volume;
        UnitCell::from_direct_vectors(a, b, c)
    }

    pub fn basis(&self) -> &Matrix3<f64> {
        &self.a_mat
    }

    pub fn reciprocal_basis(&self) -> &Matrix3<f64> {
        &self.b_mat
    }

    pub fn a_vector(&self) -> Vector3<f64> {
        self.a_mat.column(0).into()
    }

    pub fn b_vector(&self) -> Vector3<f64> {
        self.a_mat.column(1).into()
    }

    pub fn c_vector(&self) -> Vector3<f64> {
        self.a_mat.column(2).into()
    }

    pub fn a(&self) -> f64 {
        self.a_vector().norm()
    }

    pub fn b(&self) -> f64 {
        self.b_vector().norm()
    }

    pub fn c(&self) -> f64 {
        self.c_vector().norm()
    }

    pub fn alpha(&self) -> f64 {
        self.b_vector().angle(&self.c_vector())
    }

    pub fn beta(&self) -> f64 {
        self.a_vector().angle(&self.c_vector())
    }

    pub fn gamma(&self) -> f64 {
        self.a_vector().angle(&self.b_vector())
    }

    pub fn volume(&self) -> f64 {
        self.a_mat.determinant().abs()
    }

    /// Direct metric tensor `A^T A`.
    pub fn metric(&self) -> Matrix3<f64> {
        self.a_mat.transpose() * self.a_mat
    }

    /// Sample-frame momentum transfer of a reflection, 1/angstrom.
    pub fn q_of(&self, hkl: MillerIndex) -> Vector3<f64> {
        self.b_mat * hkl.vector()
    }

    /// Fractional Miller coordinates of a q vector.
    pub fn miller_fractional(&self, q: Vector3<f64>) -> Vector3<f64> {
        self.a_mat.transpose() * q
    }

    /// Round a q vector to integer Miller indices if it indexes within the
    /// tolerance (infinity norm of the fractional residual).
    pub fn index_q(&self, q: Vector3<f64>, tolerance: f64) -> Option<MillerIndex> {
        let frac = self.miller_fractional(q);
        let hkl = MillerIndex::from_rounded(frac);
        let res = frac - hkl.vector();
        if res.amax() <= tolerance {
            Some(hkl)
        } else {
            None
        }
    }

    /// d-spacing of a reflection in angstroms.
    pub fn d(&self, hkl: MillerIndex) -> f64 {
        1.0 / self.q_of(hkl).norm()
    }

    /// Angle between two reflections, radians.
    pub fn angle(&self, h1: MillerIndex, h2: MillerIndex) -> f64 {
        self.q_of(h1).angle(&self.q_of(h2))
    }

    /// Apply a basis transform `A <- A P`.
    pub fn transform(&mut self, p: &Matrix3<f64>) -> Result<(), CrystalError> {
        let a_mat = self.a_mat * p;
        let inv = a_mat.try_inverse().ok_or(CrystalError::SingularBasis)?;
        self.a_mat = a_mat;
        self.b_mat = inv.transpose();
        Ok(())
    }

    /// Two-letter Bravais symbol, e.g. `oP`.
    pub fn bravais_symbol(&self) -> String {
        format!("{}{}", self.bravais.letter(), self.centring.letter())
    }

    /// Busing-Levy B matrix built from the scalar cell parameters.
    pub fn busing_levy_b(&self) -> Matrix3<f64> {
        let rec = self.b_mat;
        let b1 = rec.column(0).norm();
        let b2 = rec.column(1).norm();
        let b3 = rec.column(2).norm();
        let beta2 = Vector3::from(rec.column(0)).angle(&Vector3::from(rec.column(2)));
        let beta3 = Vector3::from(rec.column(0)).angle(&Vector3::from(rec.column(1)));
        let alpha1 = self.alpha();
        Matrix3::new(
            b1,
            b2 * beta3.cos(),
            b3 * beta2.cos(),
            0.0,
            b2 * beta3.sin(),
            -b3 * beta2.sin() * alpha1.cos(),
            0.0,
            0.0,
            1.0 / self.c(),
        )
    }

    /// Orientation part of the reciprocal basis relative to the Busing-Levy
    /// frame, so that `B = U B_BL`.
    pub fn busing_levy_u(&self) -> Matrix3<f64> {
        let bl = self.busing_levy_b();
        match bl.try_inverse() {
            Some(inv) => self.b_mat * inv,
            None => Matrix3::identity(),
        }
    }

    /// All reflections with `|q| < dstar_max`, i.e. d above `1/dstar_max`.
    pub fn reflections_in_sphere(&self, dstar_max: f64) -> Vec<MillerIndex> {
        // h = a . q, so |h| <= |a| dstar; exact per-index bounds
        let hmax = (dstar_max * self.a()).ceil() as i32;
        let kmax = (dstar_max * self.b()).ceil() as i32;
        let lmax = (dstar_max * self.c()).ceil() as i32;

        let mut out = Vec::new();
        for h in -hmax..=hmax {
            for k in -kmax..=kmax {
                for l in -lmax..=lmax {
                    if h == 0 && k == 0 && l == 0 {
                        continue;
                    }
                    let hkl = MillerIndex::new(h, k, l);
                    if self.q_of(hkl).norm() < dstar_max {
                        out.push(hkl);
                    }
                }
            }
        }
        out
    }

    /// Reflections whose d-spacing lies in `[d_min, d_max]`.
    pub fn reflections_in_shell(&self, d_min: f64, d_max: f64) -> Vec<MillerIndex> {
        self.reflections_in_sphere(1.0 / d_min)
            .into_iter()
            .filter(|hkl| {
                let d = self.d(*hkl);
                d >= d_min && d <= d_max
            })
            .collect()
    }

    /// Whether two cells describe the same lattice within a tolerance on the
    /// metric tensors.
    pub fn equivalent(&self, other: &UnitCell, tolerance: f64) -> bool {
        let g1 = self.metric();
        let g2 = other.metric();
        let scale = g1.norm().max(g2.norm()).max(1e-12);
        (g1 - g2).norm() / scale < tolerance
    }
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Space groups.
//!
//! Groups are constructed by name from a closed table. Each table entry
//! lists the generators in Jones-faithful notation (plus centring
//! translations where the symbol calls for them); the full coset list is
//! produced by closure. The table covers the standard settings used in
//! practice across all seven crystal systems; it is not the complete set of
//! 230 types.

use std::collections::HashMap;

use lazy_static::lazy_static;

use super::{BravaisType, CrystalError, MillerIndex};

/// A symmetry operation: integer rotation part and fractional translation,
/// acting on fractional coordinates.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SymmetryOp {
    pub rot: [[i32; 3]; 3],
    pub trans: [f64; 3],
}

fn frac(x: f64) -> f64 {
    let f = x - x.floor();
    if (f - 1.0).abs() < 1e-9 {
        0.0
    } else {
        f
    }
}

impl SymmetryOp {
    pub fn identity() -> SymmetryOp {
        SymmetryOp {
            rot: [[1, 0, 0], [0, 1, 0], [0, 0, 1]],
            trans: [0.0; 3],
        }
    }

    pub fn inversion() -> SymmetryOp {
        SymmetryOp {
            rot: [[-1, 0, 0], [0, -1, 0], [0, 0, -1]],
            trans: [0.0; 3],
        }
    }

    fn translation(t: [f64; 3]) -> SymmetryOp {
        SymmetryOp {
            rot: [[1, 0, 0], [0, 1, 0], [0, 0, 1]],
            trans: [frac(t[0]), frac(t[1]), frac(t[2])],
        }
    }

    /// Composition `self` after `other`.
    pub fn compose(&self, other: &SymmetryOp) -> SymmetryOp {
        let mut rot = [[0i32; 3]; 3];
        let mut trans = [0.0; 3];
        for i in 0..3 {
            for j in 0..3 {
                for (k, row) in other.rot.iter().enumerate() {
                    rot[i][j] += self.rot[i][k] * row[j];
                }
            }
            let mut t = self.trans[i];
            for k in 0..3 {
                t += self.rot[i][k] as f64 * other.trans[k];
            }
            trans[i] = frac(t);
        }
        SymmetryOp { rot, trans }
    }

    /// Action on Miller indices: the row vector `h` times the rotation part.
    pub fn apply_hkl(&self, hkl: MillerIndex) -> MillerIndex {
        let h = [hkl.h, hkl.k, hkl.l];
        let mut out = [0i32; 3];
        for (j, o) in out.iter_mut().enumerate() {
            for (i, hi) in h.iter().enumerate() {
                *o += hi * self.rot[i][j];
            }
        }
        MillerIndex::new(out[0], out[1], out[2])
    }

    /// Phase `h . t` of a reflection under this operation.
    pub fn phase(&self, hkl: MillerIndex) -> f64 {
        hkl.h as f64 * self.trans[0] + hkl.k as f64 * self.trans[1] + hkl.l as f64 * self.trans[2]
    }

    fn key(&self) -> ([[i32; 3]; 3], [i64; 3]) {
        let quant = |t: f64| (frac(t) * 24.0).round() as i64 % 24;
        (
            self.rot,
            [
                quant(self.trans[0]),
                quant(self.trans[1]),
                quant(self.trans[2]),
            ],
        )
    }
}

/// Parse one Jones-faithful coordinate triplet like `1/2-x,y,-z`.
fn parse_jones(s: &str) -> Result<SymmetryOp, CrystalError> {
    let bad = || CrystalError::UnknownSpaceGroup(format!("bad symmetry triplet '{s}'"));
    let parts: Vec<&str> = s.split(',').collect();
    if parts.len() != 3 {
        return Err(bad());
    }
    let mut rot = [[0i32; 3]; 3];
    let mut trans = [0.0; 3];
    for (i, part) in parts.iter().enumerate() {
        let bytes: Vec<char> = part.trim().chars().filter(|c| !c.is_whitespace()).collect();
        let mut j = 0;
        let mut sign = 1i32;
        while j < bytes.len() {
            match bytes[j] {
                '+' => {
                    sign = 1;
                    j += 1;
                }
                '-' => {
                    sign = -1;
                    j += 1;
                }
                'x' => {
                    rot[i][0] += sign;
                    sign = 1;
                    j += 1;
                }
                'y' => {
                    rot[i][1] += sign;
                    sign = 1;
                    j += 1;
                }
                'z' => {
                    rot[i][2] += sign;
                    sign = 1;
                    j += 1;
                }
                '0'..='9' => {
                    let mut num = String::new();
                    while j < bytes.len() && bytes[j].is_ascii_digit() {
                        num.push(bytes[j]);
                        j += 1;
                    }
                    let p: f64 = num.parse().map_err(|_| bad())?;
                    let value = if j < bytes.len() && bytes[j] == '/' {
                        j += 1;
                        let mut den = String::new();
                        while j < bytes.len() && bytes[j].is_ascii_digit() {
                            den.push(bytes[j]);
                            j += 1;
                        }
                        let q: f64 = den.parse().map_err(|_| bad())?;
                        if q == 0.0 {
                            return Err(bad());
                        }
                        p / q
                    } else {
                        p
                    };
                    trans[i] += sign as f64 * value;
                    sign = 1;
                }
                _ => return Err(bad()),
            }
        }
        trans[i] = frac(trans[i]);
    }
    Ok(SymmetryOp { rot, trans })
}

struct GroupEntry {
    system: BravaisType,
    /// Centring translations beyond the lattice, e.g. C gives (1/2,1/2,0).
    centring: &'static [[f64; 3]],
    generators: &'static [&'static str],
}

const NO_CENTRING: &[[f64; 3]] = &[];
const CENTRING_A: &[[f64; 3]] = &[[0.0, 0.5, 0.5]];
const CENTRING_C: &[[f64; 3]] = &[[0.5, 0.5, 0.0]];
const CENTRING_I: &[[f64; 3]] = &[[0.5, 0.5, 0.5]];
const CENTRING_F: &[[f64; 3]] = &[[0.0, 0.5, 0.5], [0.5, 0.0, 0.5], [0.5, 0.5, 0.0]];
const CENTRING_R: &[[f64; 3]] = &[
    [2.0 / 3.0, 1.0 / 3.0, 1.0 / 3.0],
    [1.0 / 3.0, 2.0 / 3.0, 2.0 / 3.0],
];

macro_rules! groups {
    ($($name:literal => ($system:ident, $centring:ident, [$($g:literal),*])),* $(,)?) => {{
        let mut m: HashMap<&'static str, GroupEntry> = HashMap::new();
        $(
            m.insert($name, GroupEntry {
                system: BravaisType::$system,
                centring: $centring,
                generators: &[$($g),*],
            });
        )*
        m
    }};
}

lazy_static! {
    static ref GROUP_TABLE: HashMap<&'static str, GroupEntry> = groups![
        // triclinic
        "P 1" => (Triclinic, NO_CENTRING, []),
        "P -1" => (Triclinic, NO_CENTRING, ["-x,-y,-z"]),
        // monoclinic (unique axis b)
        "P 2" => (Monoclinic, NO_CENTRING, ["-x,y,-z"]),
        "P 21" => (Monoclinic, NO_CENTRING, ["-x,1/2+y,-z"]),
        "C 2" => (Monoclinic, CENTRING_C, ["-x,y,-z"]),
        "P m" => (Monoclinic, NO_CENTRING, ["x,-y,z"]),
        "P c" => (Monoclinic, NO_CENTRING, ["x,-y,1/2+z"]),
        "C c" => (Monoclinic, CENTRING_C, ["x,-y,1/2+z"]),
        "P 2/m" => (Monoclinic, NO_CENTRING, ["-x,y,-z", "-x,-y,-z"]),
        "P 21/m" => (Monoclinic, NO_CENTRING, ["-x,1/2+y,-z", "-x,-y,-z"]),
        "C 2/m" => (Monoclinic, CENTRING_C, ["-x,y,-z", "-x,-y,-z"]),
        "P 2/c" => (Monoclinic, NO_CENTRING, ["-x,y,1/2-z", "-x,-y,-z"]),
        "P 21/c" => (Monoclinic, NO_CENTRING, ["-x,1/2+y,1/2-z", "-x,-y,-z"]),
        "C 2/c" => (Monoclinic, CENTRING_C, ["-x,y,1/2-z", "-x,-y,-z"]),
        // orthorhombic
        "P 2 2 2" => (Orthorhombic, NO_CENTRING, ["-x,-y,z", "x,-y,-z"]),
        "P 2 2 21" => (Orthorhombic, NO_CENTRING, ["-x,-y,1/2+z", "x,-y,-z"]),
        "P 21 21 2" => (Orthorhombic, NO_CENTRING, ["-x,-y,z", "1/2-x,1/2+y,-z"]),
        "P 21 21 21" => (Orthorhombic, NO_CENTRING, ["1/2-x,-y,1/2+z", "-x,1/2+y,1/2-z"]),
        "C 2 2 2" => (Orthorhombic, CENTRING_C, ["-x,-y,z", "x,-y,-z"]),
        "F 2 2 2" => (Orthorhombic, CENTRING_F, ["-x,-y,z", "x,-y,-z"]),
        "I 2 2 2" => (Orthorhombic, CENTRING_I, ["-x,-y,z", "x,-y,-z"]),
        "P m m 2" => (Orthorhombic, NO_CENTRING, ["-x,-y,z", "x,-y,z"]),
        "P m m m" => (Orthorhombic, NO_CENTRING, ["-x,-y,z", "x,-y,-z", "-x,-y,-z"]),
        "P n m a" => (Orthorhombic, NO_CENTRING, ["1/2-x,-y,1/2+z", "-x,1/2+y,-z", "-x,-y,-z"]),
        "C m m m" => (Orthorhombic, CENTRING_C, ["-x,-y,z", "x,-y,-z", "-x,-y,-z"]),
        "I m m m" => (Orthorhombic, CENTRING_I, ["-x,-y,z", "x,-y,-z", "-x,-y,-z"]),
        "F m m m" => (Orthorhombic, CENTRING_F, ["-x,-y,z", "x,-y,-z", "-x,-y,-z"]),
        // tetragonal
        "P 4" => (Tetragonal, NO_CENTRING, ["-y,x,z"]),
        "P 41" => (Tetragonal, NO_CENTRING, ["-y,x,1/4+z"]),
        "P 42" => (Tetragonal, NO_CENTRING, ["-y,x,1/2+z"]),
        "P 43" => (Tetragonal, NO_CENTRING, ["-y,x,3/4+z"]),
        "I 4" => (Tetragonal, CENTRING_I, ["-y,x,z"]),
        "P -4" => (Tetragonal, NO_CENTRING, ["y,-x,-z"]),
        "P 4/m" => (Tetragonal, NO_CENTRING, ["-y,x,z", "-x,-y,-z"]),
        "I 4/m" => (Tetragonal, CENTRING_I, ["-y,x,z", "-x,-y,-z"]),
        "P 4 2 2" => (Tetragonal, NO_CENTRING, ["-y,x,z", "x,-y,-z"]),
        "P 41 21 2" => (Tetragonal, NO_CENTRING, ["1/2-y,1/2+x,1/4+z", "y,x,-z"]),
        "P 43 21 2" => (Tetragonal, NO_CENTRING, ["1/2-y,1/2+x,3/4+z", "y,x,-z"]),
        "P 4/m m m" => (Tetragonal, NO_CENTRING, ["-y,x,z", "x,-y,-z", "-x,-y,-z"]),
        "I 4/m m m" => (Tetragonal, CENTRING_I, ["-y,x,z", "x,-y,-z", "-x,-y,-z"]),
        // trigonal
        "P 3" => (Hexagonal, NO_CENTRING, ["-y,x-y,z"]),
        "P 31" => (Hexagonal, NO_CENTRING, ["-y,x-y,1/3+z"]),
        "P 32" => (Hexagonal, NO_CENTRING, ["-y,x-y,2/3+z"]),
        "R 3" => (Hexagonal, CENTRING_R, ["-y,x-y,z"]),
        "P -3" => (Hexagonal, NO_CENTRING, ["-y,x-y,z", "-x,-y,-z"]),
        "R -3" => (Hexagonal, CENTRING_R, ["-y,x-y,z", "-x,-y,-z"]),
        "P 3 2 1" => (Hexagonal, NO_CENTRING, ["-y,x-y,z", "y,x,-z"]),
        "R 3 2" => (Hexagonal, CENTRING_R, ["-y,x-y,z", "y,x,-z"]),
        "R -3 m" => (Hexagonal, CENTRING_R, ["-y,x-y,z", "y,x,-z", "-x,-y,-z"]),
        // hexagonal
        "P 6" => (Hexagonal, NO_CENTRING, ["x-y,x,z"]),
        "P 61" => (Hexagonal, NO_CENTRING, ["x-y,x,1/6+z"]),
        "P 65" => (Hexagonal, NO_CENTRING, ["x-y,x,5/6+z"]),
        "P 62" => (Hexagonal, NO_CENTRING, ["x-y,x,1/3+z"]),
        "P 64" => (Hexagonal, NO_CENTRING, ["x-y,x,2/3+z"]),
        "P 63" => (Hexagonal, NO_CENTRING, ["x-y,x,1/2+z"]),
        "P 6/m" => (Hexagonal, NO_CENTRING, ["x-y,x,z", "-x,-y,-z"]),
        "P 6 2 2" => (Hexagonal, NO_CENTRING, ["x-y,x,z", "y,x,-z"]),
        "P 6/m m m" => (Hexagonal, NO_CENTRING, ["x-y,x,z", "y,x,-z", "-x,-y,-z"]),
        // cubic
        "P 2 3" => (Cubic, NO_CENTRING, ["-x,-y,z", "x,-y,-z", "z,x,y"]),
        "F 2 3" => (Cubic, CENTRING_F, ["-x,-y,z", "x,-y,-z", "z,x,y"]),
        "I 2 3" => (Cubic, CENTRING_I, ["-x,-y,z", "x,-y,-z", "z,x,y"]),
        "P 21 3" => (Cubic, NO_CENTRING, ["1/2-x,-y,1/2+z", "-x,1/2+y,1/2-z", "z,x,y"]),
        "P m -3" => (Cubic, NO_CENTRING, ["-x,-y,z", "x,-y,-z", "z,x,y", "-x,-y,-z"]),
        "P 4 3 2" => (Cubic, NO_CENTRING, ["-y,x,z", "z,x,y"]),
        "F 4 3 2" => (Cubic, CENTRING_F, ["-y,x,z", "z,x,y"]),
        "I 4 3 2" => (Cubic, CENTRING_I, ["-y,x,z", "z,x,y"]),
        "P m -3 m" => (Cubic, NO_CENTRING, ["-y,x,z", "z,x,y", "-x,-y,-z"]),
        "F m -3 m" => (Cubic, CENTRING_F, ["-y,x,z", "z,x,y", "-x,-y,-z"]),
        "I m -3 m" => (Cubic, CENTRING_I, ["-y,x,z", "z,x,y", "-x,-y,-z"]),
    ];
}

#[derive(Clone, Debug)]
pub struct SpaceGroup {
    symbol: String,
    system: BravaisType,
    ops: Vec<SymmetryOp>,
}

impl SpaceGroup {
    /// Look a group up by its canonical symbol, e.g. `P 21 21 2`.
    pub fn new(symbol: &str) -> Result<SpaceGroup, CrystalError> {
        let entry = GROUP_TABLE
            .get(symbol)
            .ok_or_else(|| CrystalError::UnknownSpaceGroup(symbol.to_string()))?;

        let mut seed = vec![SymmetryOp::identity()];
        for g in entry.generators {
            seed.push(parse_jones(g)?);
        }
        for t in entry.centring {
            seed.push(SymmetryOp::translation(*t));
        }

        // closure by repeated composition
        let mut ops: Vec<SymmetryOp> = Vec::new();
        let mut seen: HashMap<([[i32; 3]; 3], [i64; 3]), ()> = HashMap::new();
        let mut queue = seed.clone();
        while let Some(op) = queue.pop() {
            if seen.contains_key(&op.key()) {
                continue;
            }
            seen.insert(op.key(), ());
            ops.push(op);
            for g in &seed {
                queue.push(g.compose(&op));
            }
            if ops.len() > 192 {
                return Err(CrystalError::UnknownSpaceGroup(format!(
                    "generators of '{symbol}' do not close"
                )));
            }
        }
        ops.sort_by_key(|o| o.key());

        Ok(SpaceGroup {
            symbol: symbol.to_string(),
            system: entry.system,
            ops,
        })
    }

    /// Every symbol in the closed table.
    pub fn symbols() -> Vec<&'static str> {
        let mut names: Vec<&'static str> = GROUP_TABLE.keys().copied().collect();
        names.sort_unstable();
        names
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn ops(&self) -> &[SymmetryOp] {
        &self.ops
    }

    pub fn order(&self) -> usize {
        self.ops.len()
    }

    pub fn system(&self) -> BravaisType {
        self.system
    }

    /// Two-letter Bravais symbol of the group's lattice.
    pub fn bravais_symbol(&self) -> String {
        let centring = self.symbol.chars().next().unwrap_or('P');
        format!("{}{}", self.system.letter(), centring)
    }

    /// Whether the group contains the inversion (so Friedel pairs are
    /// already equivalent).
    pub fn is_centrosymmetric(&self) -> bool {
        self.ops.iter().any(|o| {
            o.rot == SymmetryOp::inversion().rot
                && o.trans.iter().all(|&t| frac(t).abs() < 1e-9)
        })
    }

    /// Orbit of a reflection, optionally extended by the Friedel relation.
    /// The result is sorted and deduplicated.
    pub fn orbit(&self, hkl: MillerIndex, friedel: bool) -> Vec<MillerIndex> {
        let mut out: Vec<MillerIndex> = self.ops.iter().map(|o| o.apply_hkl(hkl)).collect();
        if friedel {
            let extra: Vec<MillerIndex> = out.iter().map(|h| h.neg()).collect();
            out.extend(extra);
        }
        out.sort_unstable();
        out.dedup();
        out
    }

    /// Canonical representative of the orbit: its lexicographic minimum.
    pub fn representative(&self, hkl: MillerIndex, friedel: bool) -> MillerIndex {
        self.orbit(hkl, friedel)[0]
    }

    /// Systematic absence test: a reflection is extinct when some operation
    /// fixes it with a non-integral phase shift.
    pub fn is_extinct(&self, hkl: MillerIndex) -> bool {
        self.ops.iter().any(|o| {
            o.apply_hkl(hkl) == hkl && {
                let phase = o.phase(hkl);
                (phase - phase.round()).abs() > 1e-6
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbols_round_trip() {
        for name in SpaceGroup::symbols() {
            let group = SpaceGroup::new(name).unwrap();
            assert_eq!(group.symbol(), name);
            assert!(group.order() >= 1);
        }
    }

    #[test]
    fn unknown_symbol_is_an_error() {
        assert!(matches!(
            SpaceGroup::new("Q 5"),
            Err(CrystalError::UnknownSpaceGroup(_))
        ));
    }

    #[test]
    fn group_orders() {
        for (name, order) in [
            ("P 1", 1),
            ("P -1", 2),
            ("P 21", 2),
            ("P 21/c", 4),
            ("C 2/c", 8),
            ("P 21 21 2", 4),
            ("P 21 21 21", 4),
            ("P n m a", 8),
            ("P 43 21 2", 8),
            ("R -3 m", 36),
            ("P 6/m m m", 24),
            ("P m -3 m", 48),
            ("F m -3 m", 192),
        ] {
            let group = SpaceGroup::new(name).unwrap();
            assert_eq!(group.order(), order, "order of {name}");
        }
    }

    #[test]
    fn closure_is_a_group() {
        // every pairwise product stays in the op list
        let group = SpaceGroup::new("P 43 21 2").unwrap();
        for a in group.ops() {
            for b in group.ops() {
                let c = a.compose(b);
                assert!(
                    group.ops().iter().any(|o| o.key() == c.key()),
                    "product escapes the group"
                );
            }
        }
    }

    #[test]
    fn orbit_of_a_general_reflection() {
        let group = SpaceGroup::new("P 21 21 2").unwrap();
        let orbit = group.orbit(MillerIndex::new(1, 2, 3), false);
        assert_eq!(orbit.len(), 4);
        let with_friedel = group.orbit(MillerIndex::new(1, 2, 3), true);
        assert_eq!(with_friedel.len(), 8);

        // representative is stable across the orbit
        let rep = group.representative(MillerIndex::new(1, 2, 3), true);
        for h in &with_friedel {
            assert_eq!(group.representative(*h, true), rep);
        }
    }

    #[test]
    fn centrosymmetric_groups_contain_friedel() {
        let group = SpaceGroup::new("P 21/c").unwrap();
        assert!(group.is_centrosymmetric());
        let orbit = group.orbit(MillerIndex::new(1, 2, 3), false);
        assert!(orbit.contains(&MillerIndex::new(-1, -2, -3)));

        let chiral = SpaceGroup::new("P 21 21 21").unwrap();
        assert!(!chiral.is_centrosymmetric());
    }

    #[test]
    fn screw_axis_extinctions() {
        let group = SpaceGroup::new("P 21 21 21").unwrap();
        // axial reflections with odd index are absent
        assert!(group.is_extinct(MillerIndex::new(1, 0, 0)));
        assert!(group.is_extinct(MillerIndex::new(0, 3, 0)));
        assert!(group.is_extinct(MillerIndex::new(0, 0, 5)));
        assert!(!group.is_extinct(MillerIndex::new(2, 0, 0)));
        assert!(!group.is_extinct(MillerIndex::new(1, 2, 3)));
    }

    #[test]
    fn centring_extinctions() {
        let group = SpaceGroup::new("C 2").unwrap();
        // h + k odd is absent for C centring
        assert!(group.is_extinct(MillerIndex::new(1, 0, 0)));
        assert!(group.is_extinct(MillerIndex::new(2, 1, 3)));
        assert!(!group.is_extinct(MillerIndex::new(1, 1, 2)));

        let f = SpaceGroup::new("F m -3 m").unwrap();
        assert!(f.is_extinct(MillerIndex::new(1, 1, 2)));
        assert!(!f.is_extinct(MillerIndex::new(1, 1, 1)));
        assert!(!f.is_extinct(MillerIndex::new(2, 0, 0)));
    }

    #[test]
    fn glide_extinctions() {
        let group = SpaceGroup::new("P 21/c").unwrap();
        // c glide perpendicular to b: (h 0 l) absent for odd l
        assert!(group.is_extinct(MillerIndex::new(2, 0, 1)));
        assert!(!group.is_extinct(MillerIndex::new(2, 0, 2)));
        // screw axis: (0 k 0) absent for odd k
        assert!(group.is_extinct(MillerIndex::new(0, 1, 0)));
        assert!(!group.is_extinct(MillerIndex::new(0, 2, 0)));
    }
}

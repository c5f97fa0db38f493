//! Difference Bound Matrix (DBM) algebra over integer clock bounds.
//!
//! A DBM of order `n+1` represents a convex zone over `n` clocks plus the
//! synthetic reference clock `x0` (always 0). Entry `matrix[i][j]` encodes
//! the constraint `x_i - x_j <bound>`.

use crate::error::DbmError;
use std::cmp::Ordering;
use std::fmt;

/// Strictness of a bound: `<` is strict, `<=` is non-strict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strictness {
    Strict,
    NonStrict,
}

use Strictness::{NonStrict, Strict};

/// An integer (or infinite) bound with strictness, i.e. one DBM entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bound {
    pub value: i64,
    pub strict: Strictness,
}

impl Bound {
    pub const INFINITY: i64 = i64::MAX;

    pub fn new(value: i64, strict: Strictness) -> Self {
        Self { value, strict }
    }

    pub fn le(value: i64) -> Self {
        Self::new(value, NonStrict)
    }

    pub fn lt(value: i64) -> Self {
        Self::new(value, Strict)
    }

    pub fn zero() -> Self {
        Self::le(0)
    }

    pub fn infinite() -> Self {
        Self::lt(Self::INFINITY)
    }

    pub fn is_infinite(&self) -> bool {
        self.value == Self::INFINITY
    }

    pub fn negate(&self) -> Self {
        Self::new(-self.value, self.strict)
    }
}

impl std::ops::Add for Bound {
    type Output = Bound;
    fn add(self, rhs: Bound) -> Bound {
        if self.is_infinite() || rhs.is_infinite() {
            return Bound::infinite();
        }
        let strict = if self.strict == NonStrict && rhs.strict == NonStrict {
            NonStrict
        } else {
            Strict
        };
        Bound::new(self.value + rhs.value, strict)
    }
}

impl PartialOrd for Bound {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Bound {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.value.cmp(&other.value) {
            Ordering::Equal => match (self.strict, other.strict) {
                (Strict, NonStrict) => Ordering::Less,
                (NonStrict, Strict) => Ordering::Greater,
                _ => Ordering::Equal,
            },
            ord => ord,
        }
    }
}

impl fmt::Display for Bound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_infinite() {
            write!(f, "+inf")
        } else {
            let rel = if self.strict == Strict { "<" } else { "<=" };
            write!(f, "{}{}", rel, self.value)
        }
    }
}

/// Relational operator used to constrain a clock difference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rel {
    Lt,
    Le,
    Eq,
    Ge,
    Gt,
}

/// A closed or half-open integer interval, as returned by [`Dbm::get_interval`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interval {
    pub lo: i64,
    pub lo_incl: bool,
    pub hi: i64,
    pub hi_incl: bool,
}

impl Interval {
    /// The smallest integer inside the interval, if any.
    pub fn min_integer(&self) -> Option<i64> {
        let lo = if self.lo_incl { self.lo } else { self.lo + 1 };
        let hi = if self.hi_incl { self.hi } else { self.hi - 1 };
        if lo <= hi {
            Some(lo)
        } else {
            None
        }
    }

    /// The largest integer inside the interval, if any.
    pub fn max_integer(&self) -> Option<i64> {
        let lo = if self.lo_incl { self.lo } else { self.lo + 1 };
        let hi = if self.hi_incl { self.hi } else { self.hi - 1 };
        if lo <= hi {
            Some(hi)
        } else {
            None
        }
    }
}

/// A difference bound matrix over `clocks` (index 0 is always the synthetic
/// reference clock).
#[derive(Debug, Clone)]
pub struct Dbm {
    clocks: Vec<String>,
    matrix: Vec<Vec<Bound>>,
}

impl Dbm {
    /// Builds a new DBM over `clocks`, prepending the reference clock.
    ///
    /// `zero_init` picks between all-zero (every clock frozen at 0, as
    /// Uppaal initializes a fresh instantiation) and all-unconstrained
    /// (`+inf` off-diagonal) starting matrices.
    pub fn new(clocks: &[String], zero_init: bool) -> Self {
        let mut all = Vec::with_capacity(clocks.len() + 1);
        all.push("t0_ref".to_string());
        all.extend(clocks.iter().cloned());
        let n = all.len();
        let matrix = if zero_init {
            vec![vec![Bound::zero(); n]; n]
        } else {
            let mut m = vec![vec![Bound::infinite(); n]; n];
            for (i, row) in m.iter_mut().enumerate() {
                row[i] = Bound::zero();
            }
            m
        };
        Self { clocks: all, matrix }
    }

    pub fn clocks(&self) -> &[String] {
        &self.clocks
    }

    fn index_of(&self, clock: &str) -> Result<usize, DbmError> {
        self.clocks
            .iter()
            .position(|c| c == clock)
            .ok_or_else(|| DbmError::UnknownClock(clock.to_string()))
    }

    pub fn order(&self) -> usize {
        self.matrix.len()
    }

    pub fn get(&self, i: usize, j: usize) -> Bound {
        self.matrix[i][j]
    }

    fn set(&mut self, i: usize, j: usize, b: Bound) {
        self.matrix[i][j] = b;
    }

    /// Floyd-Warshall shortest-path closure over the bound semiring.
    pub fn canonicalize(&mut self) -> &mut Self {
        let n = self.order();
        for k in 0..n {
            for i in 0..n {
                if i == k {
                    continue;
                }
                for j in 0..n {
                    if i == j {
                        continue;
                    }
                    let via = self.matrix[i][k] + self.matrix[k][j];
                    if via < self.matrix[i][j] {
                        self.matrix[i][j] = via;
                    }
                }
            }
        }
        self
    }

    /// True iff the zone this DBM represents is empty, i.e. some clock's
    /// tightened interval has its upper bound below its lower bound.
    pub fn is_empty(&self) -> bool {
        let n = self.order();
        for i in 0..n {
            let lo = self.matrix[0][i];
            let up = self.matrix[i][0];
            let sum = lo + up;
            if sum < Bound::zero() {
                return true;
            }
        }
        false
    }

    /// True iff `self` is a super-zone of `other` (`other` implies `self`).
    pub fn includes(&self, other: &Dbm) -> bool {
        let n = self.order();
        for i in 0..n {
            for j in 0..n {
                if !(other.matrix[i][j] <= self.matrix[i][j]) {
                    return false;
                }
            }
        }
        true
    }

    /// Elementwise minimum with `other`, then re-canonicalize.
    pub fn intersect(&mut self, other: &Dbm) -> &mut Self {
        let n = self.order();
        for i in 0..n {
            for j in 0..n {
                self.matrix[i][j] = self.matrix[i][j].min(other.matrix[i][j]);
            }
        }
        self.canonicalize()
    }

    /// Constrains `c1 - c2 <rel> v`. Installs the bound only if it is
    /// strictly tighter than the current one. Does *not* re-canonicalize —
    /// callers batch several conjugations and close once (§4.7 Stage 3).
    pub fn conjugate(&mut self, c1: &str, c2: &str, rel: Rel, v: i64) -> Result<&mut Self, DbmError> {
        match rel {
            Rel::Lt => self.conjugate_le(c1, c2, Bound::lt(v))?,
            Rel::Le => self.conjugate_le(c1, c2, Bound::le(v))?,
            Rel::Gt => self.conjugate_le(c2, c1, Bound::lt(-v))?,
            Rel::Ge => self.conjugate_le(c2, c1, Bound::le(-v))?,
            Rel::Eq => {
                self.conjugate_le(c1, c2, Bound::le(v))?;
                self.conjugate_le(c2, c1, Bound::le(-v))?;
            }
        }
        Ok(self)
    }

    fn conjugate_le(&mut self, c1: &str, c2: &str, bound: Bound) -> Result<(), DbmError> {
        let i = self.index_of(c1)?;
        let j = self.index_of(c2)?;
        if bound < self.matrix[i][j] {
            self.matrix[i][j] = bound;
        }
        Ok(())
    }

    /// Resets `clock` to `v`, adjusting its row/column so differences to
    /// every other clock reflect the new value exactly. Produces a
    /// canonical DBM directly (property 3, §8): no `close()` needed after.
    pub fn reset(&mut self, clock: &str, v: i64) -> Result<&mut Self, DbmError> {
        let k = self.index_of(clock)?;
        let n = self.order();
        let row0: Vec<Bound> = (0..n).map(|i| self.matrix[i][0]).collect();
        let col0: Vec<Bound> = (0..n).map(|j| self.matrix[0][j]).collect();
        for i in 0..n {
            self.set(i, k, Bound::le(-v) + row0[i]);
        }
        for j in 0..n {
            self.set(k, j, Bound::le(v) + col0[j]);
        }
        self.set(k, k, Bound::zero());
        Ok(self)
    }

    /// Lets every non-reference clock's upper bound go to `+inf` (time may
    /// advance without limit) while leaving lower bounds untouched.
    pub fn delay_future(&mut self) -> &mut Self {
        let n = self.order();
        for i in 1..n {
            self.set(i, 0, Bound::infinite());
        }
        self
    }

    /// Resets every non-reference clock's lower bound to 0 (can have
    /// started arbitrarily far in the past).
    pub fn delay_past(&mut self) -> &mut Self {
        let n = self.order();
        for j in 1..n {
            self.set(0, j, Bound::zero());
        }
        self
    }

    /// The tightened `[lo, hi]` interval for `clock`, derived from its
    /// column/row against the reference clock.
    pub fn get_interval(&self, clock: &str) -> Result<Interval, DbmError> {
        let k = self.index_of(clock)?;
        let lower = self.matrix[0][k];
        let upper = self.matrix[k][0];
        Ok(Interval {
            lo: -lower.value,
            lo_incl: lower.strict == NonStrict,
            hi: upper.value,
            hi_incl: upper.strict == NonStrict,
        })
    }

    /// Draws an integer uniformly from `clock`'s current interval.
    pub fn draw_integer(&self, clock: &str, rng: &mut impl rand::Rng) -> Result<i64, DbmError> {
        let interval = self.get_interval(clock)?;
        let lo = interval.min_integer().ok_or(DbmError::EmptyInterval)?;
        let hi = interval.max_integer().ok_or(DbmError::EmptyInterval)?;
        Ok(rng.gen_range(lo..=hi))
    }
}

impl fmt::Display for Dbm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, row) in self.matrix.iter().enumerate() {
            writeln!(
                f,
                "{}: {}",
                self.clocks[i],
                row.iter()
                    .map(|b| b.to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clocks(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn zero_init_is_all_zero_and_canonical() {
        let mut dbm = Dbm::new(&clocks(&["x"]), true);
        assert!(!dbm.is_empty());
        dbm.canonicalize();
        assert!(!dbm.is_empty());
    }

    #[test]
    fn constraint_then_close_bounds_interval() {
        let mut dbm = Dbm::new(&clocks(&["x"]), true);
        dbm.conjugate("x", "t0_ref", Rel::Le, 3).unwrap();
        dbm.canonicalize();
        let iv = dbm.get_interval("x").unwrap();
        assert_eq!(iv, Interval { lo: 0, lo_incl: true, hi: 3, hi_incl: true });

        dbm.delay_future();
        dbm.canonicalize();
        let iv2 = dbm.get_interval("x").unwrap();
        assert_eq!(iv2, Interval { lo: 0, lo_incl: true, hi: 3, hi_incl: true });
    }

    #[test]
    fn reset_produces_tight_difference() {
        let mut dbm = Dbm::new(&clocks(&["x", "y"]), true);
        dbm.reset("x", 5).unwrap();
        let iv = dbm.get_interval("y").unwrap();
        assert_eq!(iv, Interval { lo: 0, lo_incl: true, hi: 0, hi_incl: true });
        let xi = dbm.index_of("x").unwrap();
        let yi = dbm.index_of("y").unwrap();
        assert_eq!(dbm.get(xi, yi), Bound::le(5));
        assert_eq!(dbm.get(yi, xi), Bound::le(-5));
        assert_eq!(dbm.get(xi, xi), Bound::zero());
    }

    #[test]
    fn reset_is_already_canonical() {
        let mut dbm = Dbm::new(&clocks(&["x", "y"]), true);
        dbm.conjugate("x", "t0_ref", Rel::Le, 10).unwrap();
        dbm.canonicalize();
        dbm.reset("x", 5).unwrap();
        let xi = dbm.index_of("x").unwrap();
        assert_eq!(dbm.get(xi, xi), Bound::zero());
        let mut closed = dbm.clone();
        closed.canonicalize();
        for i in 0..dbm.order() {
            for j in 0..dbm.order() {
                assert_eq!(dbm.get(i, j), closed.get(i, j));
            }
        }
    }

    #[test]
    fn conjugate_then_close_never_expands_zone() {
        let mut dbm = Dbm::new(&clocks(&["x"]), false);
        dbm.canonicalize();
        let before = dbm.clone();
        dbm.conjugate("x", "t0_ref", Rel::Le, 5).unwrap();
        dbm.canonicalize();
        assert!(before.includes(&dbm));
    }

    #[test]
    fn empty_zone_detection() {
        let mut dbm = Dbm::new(&clocks(&["x"]), true);
        dbm.conjugate("x", "t0_ref", Rel::Le, 2).unwrap();
        dbm.conjugate("t0_ref", "x", Rel::Le, -5).unwrap();
        dbm.canonicalize();
        assert!(dbm.is_empty());
    }

    #[test]
    fn includes_reflexive() {
        let mut dbm = Dbm::new(&clocks(&["x", "y"]), true);
        dbm.canonicalize();
        assert!(dbm.includes(&dbm.clone()));
    }

    #[test]
    fn intersect_tightens() {
        let mut a = Dbm::new(&clocks(&["x"]), false);
        a.canonicalize();
        a.conjugate("x", "t0_ref", Rel::Le, 10).unwrap();
        a.canonicalize();

        let mut b = Dbm::new(&clocks(&["x"]), false);
        b.canonicalize();
        b.conjugate("x", "t0_ref", Rel::Le, 3).unwrap();
        b.canonicalize();

        let before = a.clone();
        a.intersect(&b);
        assert!(before.includes(&a));
        let iv = a.get_interval("x").unwrap();
        assert_eq!(iv.hi, 3);
    }

    #[test]
    fn draw_integer_within_bounds() {
        let mut dbm = Dbm::new(&clocks(&["x"]), true);
        dbm.conjugate("x", "t0_ref", Rel::Le, 4).unwrap();
        dbm.canonicalize();
        let mut rng = rand::thread_rng();
        for _ in 0..50 {
            let v = dbm.draw_integer("x", &mut rng).unwrap();
            assert!((0..=4).contains(&v));
        }
    }

    #[test]
    fn unknown_clock_errors() {
        let dbm = Dbm::new(&clocks(&["x"]), true);
        assert!(matches!(dbm.get_interval("y"), Err(DbmError::UnknownClock(_))));
    }
}

//! The DBM operation record (C8): a flat, replayable log of the DBM
//! mutations one transition performed.

use crate::dbm::{Dbm, Rel};
use crate::error::DbmError;

/// One mutation applied to a [`Dbm`] during a transition firing.
#[derive(Debug, Clone, PartialEq)]
pub enum DbmOp {
    Reset(String, i64),
    Constraint(String, String, Rel, i64),
    DelayFuture,
    Close,
}

impl DbmOp {
    pub fn apply(&self, dbm: &mut Dbm) -> Result<(), DbmError> {
        match self {
            DbmOp::Reset(clock, v) => {
                dbm.reset(clock, *v)?;
            }
            DbmOp::Constraint(c1, c2, rel, v) => {
                dbm.conjugate(c1, c2, *rel, *v)?;
            }
            DbmOp::DelayFuture => {
                dbm.delay_future();
            }
            DbmOp::Close => {
                dbm.canonicalize();
            }
        }
        Ok(())
    }

    fn rel_symbol(rel: Rel) -> &'static str {
        match rel {
            Rel::Lt => "<",
            Rel::Le => "\u{2264}",
            Rel::Eq => "==",
            Rel::Ge => "\u{2265}",
            Rel::Gt => ">",
        }
    }
}

impl std::fmt::Display for DbmOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DbmOp::Reset(clock, v) => write!(f, "Reset({} := {})", clock, v),
            DbmOp::Constraint(c1, c2, rel, v) if c2 == "t0_ref" => {
                write!(f, "Constraint({} {} {})", c1, Self::rel_symbol(*rel), v)
            }
            DbmOp::Constraint(c1, c2, rel, v) => {
                write!(f, "Constraint({} \u{2212} {} {} {})", c1, c2, Self::rel_symbol(*rel), v)
            }
            DbmOp::DelayFuture => write!(f, "DelayFuture()"),
            DbmOp::Close => write!(f, "Close()"),
        }
    }
}

/// Replays `ops` against a zero-initialized DBM over `clocks`, flattening
/// any nested sequences first (callers are expected to have already
/// flattened `==` into two `Constraint`s before pushing to the log).
pub fn replay(clocks: &[String], ops: &[DbmOp]) -> Result<Dbm, DbmError> {
    let mut dbm = Dbm::new(clocks, true);
    for op in ops {
        op.apply(&mut dbm)?;
    }
    Ok(dbm)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_renders_as_assignment() {
        let op = DbmOp::Reset("t".into(), 0);
        assert_eq!(op.to_string(), "Reset(t := 0)");
    }

    #[test]
    fn constraint_against_reference_clock_omits_difference() {
        let op = DbmOp::Constraint("x".into(), "t0_ref".into(), Rel::Le, 3);
        assert_eq!(op.to_string(), "Constraint(x \u{2264} 3)");
    }

    #[test]
    fn constraint_between_two_clocks_shows_difference() {
        let op = DbmOp::Constraint("x".into(), "y".into(), Rel::Le, 3);
        assert_eq!(op.to_string(), "Constraint(x \u{2212} y \u{2264} 3)");
    }

    #[test]
    fn replay_reproduces_direct_application() {
        let clocks = vec!["x".to_string()];
        let ops = vec![
            DbmOp::Constraint("x".into(), "t0_ref".into(), Rel::Le, 5),
            DbmOp::Close,
        ];
        let replayed = replay(&clocks, &ops).unwrap();

        let mut direct = Dbm::new(&clocks, true);
        direct.conjugate("x", "t0_ref", Rel::Le, 5).unwrap();
        direct.canonicalize();

        assert_eq!(replayed.get_interval("x").unwrap(), direct.get_interval("x").unwrap());
    }
}

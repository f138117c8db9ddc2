//! Merging of two path formulas under the captured branch predicate.

use crate::{devirt::detect::BranchPredicate, engine::SymbolicExpr, Error, Result};

/// Combines the return formulas of both replays.
///
/// With a single trace the result is `ret1`. With two traces the result is
/// `ite(predicate, ret2, ret1)`: the predicate was captured on the second path, so it selects
/// that path's formula when it holds.
///
/// # Errors
///
/// Returns [`Error::SolverInconclusive`] if `ret2` is given without a predicate, and
/// [`Error::Engine`] if the two formulas have different widths.
pub fn merge(
    ret1: SymbolicExpr,
    ret2: Option<SymbolicExpr>,
    predicate: Option<&BranchPredicate>,
) -> Result<SymbolicExpr> {
    let Some(ret2) = ret2 else {
        return Ok(ret1);
    };

    let Some(predicate) = predicate else {
        return Err(Error::SolverInconclusive(
            "No virtual branch predicate was captured on the second trace".to_string(),
        ));
    };

    if ret1.bits() != ret2.bits() {
        return Err(Error::Engine(format!(
            "Cannot merge a {}-bit formula with a {}-bit formula",
            ret1.bits(),
            ret2.bits()
        )));
    }

    Ok(SymbolicExpr::ite(predicate.constraint.clone(), ret2, ret1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Flag, Model, SymbolicOp};
    use std::collections::BTreeMap;

    fn predicate() -> BranchPredicate {
        let x = SymbolicExpr::variable(0, 32);
        let y = SymbolicExpr::variable(1, 32);
        BranchPredicate {
            address: 0x1000,
            flag: Flag::Cf,
            constraint: SymbolicExpr::binary(SymbolicOp::LtU, x, y),
            model: Model::default(),
        }
    }

    #[test]
    fn single_path_is_unchanged() -> Result<()> {
        let ret1 = SymbolicExpr::constant(0x2a, 32);
        assert_eq!(merge(ret1.clone(), None, None)?, ret1);
        Ok(())
    }

    #[test]
    fn dual_path_selects_by_predicate() -> Result<()> {
        let x = SymbolicExpr::variable(0, 32);
        let y = SymbolicExpr::variable(1, 32);
        let ret1 = SymbolicExpr::binary(SymbolicOp::Sub, x.clone(), y.clone());
        let ret2 = SymbolicExpr::binary(SymbolicOp::Add, x, y);
        let merged = merge(ret1, Some(ret2), Some(&predicate()))?;

        let taken = merged.evaluate(&BTreeMap::from([(0, 1), (1, 7)]))?;
        let fallthrough = merged.evaluate(&BTreeMap::from([(0, 5), (1, 3)]))?;
        assert_eq!(taken, 8);
        assert_eq!(fallthrough, 2);
        Ok(())
    }

    #[test]
    fn second_path_requires_predicate() {
        let ret = SymbolicExpr::constant(1, 32);
        assert!(matches!(
            merge(ret.clone(), Some(ret), None),
            Err(Error::SolverInconclusive(_))
        ));
    }

    #[test]
    fn width_mismatch() {
        assert!(matches!(
            merge(
                SymbolicExpr::constant(1, 32),
                Some(SymbolicExpr::constant(1, 64)),
                Some(&predicate())
            ),
            Err(Error::Engine(_))
        ));
    }
}

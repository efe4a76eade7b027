//! Reference-comparison instrumentation: aliasing decisions at `==`/`!=`
//! branches over object references.

use crate::explorer::Explorer;
use crate::expr::{Expr, NULL_REF};
use crate::vm::{InstructionRef, ThreadInfo};

/// Lifts a concrete reference into the expression algebra.
fn reference_operand(concrete: u32) -> Expr {
    if concrete == NULL_REF {
        Expr::Null
    } else {
        Expr::RefConst(concrete)
    }
}

/// Instruments a reference-equality branch. `branch_on_equal` distinguishes
/// the `==`-taken instruction from the `!=`-taken one. Returns whether the
/// branch is taken concretely.
///
/// With no symbolic operand the comparison stays fully concrete and no
/// decision is recorded.
#[allow(clippy::too_many_arguments)]
pub fn instrument_reference_compare(
    explorer: &mut dyn Explorer,
    thread: &ThreadInfo,
    instruction: &InstructionRef,
    left: u32,
    right: u32,
    left_expr: Option<&Expr>,
    right_expr: Option<&Expr>,
    branch_on_equal: bool,
) -> bool {
    let equal = left == right;
    let taken = if branch_on_equal { equal } else { !equal };

    if left_expr.is_none() && right_expr.is_none() {
        return taken;
    }

    let constraints = if explorer.needs_decisions() {
        let lhs = left_expr.cloned().unwrap_or_else(|| reference_operand(left));
        let rhs = right_expr.cloned().unwrap_or_else(|| reference_operand(right));
        let cmp = if branch_on_equal {
            Expr::ref_eq(lhs, rhs)
        } else {
            Expr::ref_ne(lhs, rhs)
        };
        Some(vec![cmp.clone(), Expr::not(cmp)])
    } else {
        None
    };

    let branch_idx = if taken { 0 } else { 1 };
    explorer.decision(thread, instruction, branch_idx, constraints);
    taken
}

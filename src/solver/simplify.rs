//! Simplification over exact-type predicates: early infeasibility detection
//! and pruning of branches the dispatch instrumentation found unrealisable.

use std::collections::{BTreeMap, HashSet};

use tracing::debug;

use crate::expr::reach::{PredId, ReachabilityTable};
use crate::expr::{Expr, LogicalOp};

use super::SolverVerdict;

/// All exact-type predicates in the given constraints, nested included,
/// grouped by type signature.
fn collect_exact_type_groups(exprs: &[Expr]) -> BTreeMap<String, Vec<PredId>> {
    let mut groups: BTreeMap<String, Vec<PredId>> = BTreeMap::new();
    for expr in exprs {
        expr.walk(&mut |node| {
            if let Expr::IsExactType { pred, type_sig, .. } = node {
                groups.entry(type_sig.clone()).or_default().push(*pred);
            }
        });
    }
    groups
}

/// Early UNSAT: some type signature exists whose every exact-type predicate
/// is unreachable. The constraint set is expected to be the union of the
/// current path and all tree-recorded decisions, so infeasibility in
/// not-yet-visited branches is caught too.
pub fn check_unreachable_expressions(
    exprs: &[Expr],
    reach: &ReachabilityTable,
) -> SolverVerdict {
    for (type_sig, preds) in collect_exact_type_groups(exprs) {
        if !preds.is_empty() && preds.iter().all(|p| reach.is_unreachable(*p)) {
            debug!(%type_sig, "all exact-type predicates unreachable, returning UNSAT");
            return SolverVerdict::Unsat;
        }
    }
    SolverVerdict::Sat
}

/// Conflicting exact types: two top-level exact-type predicates with
/// different signatures cannot both hold (an object has exactly one runtime
/// type).
pub fn check_exact_type_conflicts(exprs: &[Expr]) -> bool {
    let mut seen: Option<&str> = None;
    for expr in exprs {
        if let Expr::IsExactType { type_sig, .. } = expr {
            match seen {
                None => seen = Some(type_sig),
                Some(first) if first != type_sig => return true,
                Some(_) => {}
            }
        }
    }
    false
}

/// Redundancy pruning: for each type with at least one reachable predicate,
/// rewrite its unreachable duplicates to FALSE and simplify the surrounding
/// compounds (`AND(FALSE, x) -> FALSE`, `OR(FALSE, x) -> x`).
pub fn filter_redundant_unreachable(exprs: &[Expr], reach: &ReachabilityTable) -> Vec<Expr> {
    let groups = collect_exact_type_groups(exprs);
    let mut to_remove: HashSet<PredId> = HashSet::new();
    for preds in groups.values() {
        let has_reachable = preds.iter().any(|p| !reach.is_unreachable(*p));
        if has_reachable {
            to_remove.extend(preds.iter().filter(|p| reach.is_unreachable(**p)));
        }
    }

    if to_remove.is_empty() {
        return exprs.to_vec();
    }

    let filtered: Vec<Expr> = exprs.iter().map(|e| rewrite(e, &to_remove)).collect();
    let dropped = exprs
        .iter()
        .zip(filtered.iter())
        .filter(|(before, after)| before != after)
        .count();
    debug!(rewritten = dropped, "pruned redundant unreachable expressions");
    filtered
}

fn rewrite(expr: &Expr, to_remove: &HashSet<PredId>) -> Expr {
    match expr {
        Expr::IsExactType { pred, .. } if to_remove.contains(pred) => Expr::False,
        Expr::Compound { op, left, right } => {
            let l = rewrite(left, to_remove);
            let r = rewrite(right, to_remove);
            match op {
                LogicalOp::And if l == Expr::False || r == Expr::False => Expr::False,
                LogicalOp::Or if l == Expr::False => r,
                LogicalOp::Or if r == Expr::False => l,
                _ => Expr::Compound { op: *op, left: Box::new(l), right: Box::new(r) },
            }
        }
        Expr::Negation(inner) => Expr::Negation(Box::new(rewrite(inner, to_remove))),
        Expr::Binary { op, left, right } => Expr::Binary {
            op: *op,
            left: Box::new(rewrite(left, to_remove)),
            right: Box::new(rewrite(right, to_remove)),
        },
        Expr::Compare { op, left, right } => Expr::Compare {
            op: *op,
            left: Box::new(rewrite(left, to_remove)),
            right: Box::new(rewrite(right, to_remove)),
        },
        Expr::RefCompare { left, right, equal } => Expr::RefCompare {
            left: Box::new(rewrite(left, to_remove)),
            right: Box::new(rewrite(right, to_remove)),
            equal: *equal,
        },
        Expr::InstanceOf { subject, type_name } => Expr::InstanceOf {
            subject: Box::new(rewrite(subject, to_remove)),
            type_name: type_name.clone(),
        },
        other => other.clone(),
    }
}

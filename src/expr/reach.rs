//! Reachability side table for exact-type predicates.
//!
//! The dispatch instrumentation discovers that some type-discrimination
//! branches are unrealisable. Instead of a mutable flag on shared expression
//! nodes, every `IsExactType` predicate is minted with a process-unique id
//! and the per-analysis [`ReachabilityTable`] records which ids are
//! unreachable.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};

use super::Expr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PredId(pub u64);

static NEXT_PRED_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_pred_id() -> PredId {
    PredId(NEXT_PRED_ID.fetch_add(1, Ordering::Relaxed))
}

/// Per-analysis set of unreachable exact-type predicates.
///
/// Cleared together with the call-site cache at the start of a new analysis.
#[derive(Debug, Default, Clone)]
pub struct ReachabilityTable {
    unreachable: HashSet<PredId>,
}

impl ReachabilityTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_unreachable(&mut self, pred: PredId) {
        self.unreachable.insert(pred);
    }

    /// Marks every exact-type predicate inside `expr` as unreachable.
    pub fn mark_expr_unreachable(&mut self, expr: &Expr) {
        expr.walk(&mut |node| {
            if let Expr::IsExactType { pred, .. } = node {
                self.unreachable.insert(*pred);
            }
        });
    }

    pub fn is_unreachable(&self, pred: PredId) -> bool {
        self.unreachable.contains(&pred)
    }

    pub fn clear(&mut self) {
        self.unreachable.clear();
    }

    pub fn len(&self) -> usize {
        self.unreachable.len()
    }

    pub fn is_empty(&self) -> bool {
        self.unreachable.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::Expr;

    #[test]
    fn test_mark_expr_covers_nested_predicates() {
        let e = Expr::and(
            Expr::is_exact_type(Expr::ref_var("x(ref)"), "LDog;"),
            Expr::not(Expr::is_exact_type(Expr::ref_var("x(ref)"), "LCat;")),
        );
        let mut table = ReachabilityTable::new();
        table.mark_expr_unreachable(&e);
        assert_eq!(table.len(), 2);

        e.walk(&mut |node| {
            if let Expr::IsExactType { pred, .. } = node {
                assert!(table.is_unreachable(*pred));
            }
        });
    }

    #[test]
    fn test_clear_resets_table() {
        let e = Expr::is_exact_type(Expr::ref_var("x(ref)"), "LDog;");
        let mut table = ReachabilityTable::new();
        table.mark_expr_unreachable(&e);
        assert!(!table.is_empty());
        table.clear();
        assert!(table.is_empty());
    }
}

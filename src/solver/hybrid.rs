//! The hybrid solver context: push/pop/add/solve over an underlying numeric
//! solver, with high-level constraints held back per scope and delegated to
//! the oracle together with collected heap, parameter, and source context.
//!
//! Every failure below the oracle reply is confined here: collectors are
//! best-effort, and a transport-level oracle failure degrades to the base
//! solver's verdict so exploration continues as if nothing happened.

use tracing::{debug, warn};

use crate::collect::{HeapSlicer, SourceContextCollector};
use crate::explorer::Explorer;
use crate::expr::reach::ReachabilityTable;
use crate::expr::Expr;
use crate::materialize::apply_oracle_valuation;
use crate::oracle::{Oracle, SolveRequest};
use crate::vm::{ClassLoader, ClassRegistry, Heap, ThreadInfo};

use super::scope::ScopeStack;
use super::simplify;
use super::{BaseSolver, SolverVerdict, Valuation};

/// Everything scoped to the running analysis that the collectors and the
/// materialiser need, assembled by the caller.
pub struct AnalysisSession<'a> {
    pub explorer: &'a mut dyn Explorer,
    pub thread: &'a ThreadInfo,
    pub heap: &'a mut Heap,
    pub registry: &'a ClassRegistry,
    pub loader: &'a mut ClassLoader,
}

pub struct HybridSolverContext<S: BaseSolver, O: Oracle> {
    base: S,
    oracle: O,
    heap_slicer: HeapSlicer,
    source_collector: SourceContextCollector,
    scopes: ScopeStack,
}

impl<S: BaseSolver, O: Oracle> HybridSolverContext<S, O> {
    pub fn new(base: S, oracle: O) -> Self {
        Self::with_collectors(base, oracle, HeapSlicer::default(), SourceContextCollector::default())
    }

    pub fn with_collectors(
        base: S,
        oracle: O,
        heap_slicer: HeapSlicer,
        source_collector: SourceContextCollector,
    ) -> Self {
        Self {
            base,
            oracle,
            heap_slicer,
            source_collector,
            scopes: ScopeStack::new(),
        }
    }

    pub fn source_collector_mut(&mut self) -> &mut SourceContextCollector {
        &mut self.source_collector
    }

    pub fn scope_depth(&self) -> usize {
        self.scopes.depth()
    }

    pub fn push(&mut self) {
        self.base.push();
        self.scopes.push();
    }

    pub fn pop(&mut self, n: usize) {
        self.base.pop(n);
        self.scopes.pop(n);
    }

    /// Partitions the added constraints: anything containing a high-level
    /// node is held back in the current scope, the rest goes to the base
    /// solver immediately.
    pub fn add(&mut self, constraints: Vec<Expr>) {
        if constraints.is_empty() {
            return;
        }
        let mut normal = Vec::new();
        for expr in constraints {
            if expr.contains_high_level() {
                self.scopes.add_high_level(expr);
            } else {
                normal.push(expr);
            }
        }
        if !normal.is_empty() {
            self.base.add(&normal);
        }
    }

    pub fn dispose(&mut self) {
        self.scopes.clear();
        self.base.dispose();
    }

    /// The full solve pipeline. `session` carries the explorer and VM
    /// handles; without it the oracle is still consulted, but with
    /// constraints only.
    pub fn solve(
        &mut self,
        val: &mut Valuation,
        mut session: Option<&mut AnalysisSession<'_>>,
    ) -> SolverVerdict {
        // No high-level constraints anywhere: a plain numeric solve.
        if !self.scopes.has_high_level() {
            return self.base.solve(val);
        }

        let base_verdict = self.base.solve(val);
        if base_verdict != SolverVerdict::Sat {
            debug!(verdict = %base_verdict, "base constraints already infeasible");
            return base_verdict;
        }

        let hl = self.scopes.all_high_level();

        // Broaden the simplifier's view with every high-level decision
        // recorded in the explorer's tree, so infeasibility in tree-reachable
        // but not-yet-visited branches is caught. Duplicates are fine.
        let mut merged = hl.clone();
        if let Some(s) = session.as_deref_mut() {
            merged.extend(s.explorer.constraints_tree().all_decision_constraints());
        }

        let empty_reach = ReachabilityTable::new();
        let reach = session
            .as_deref()
            .map(|s| s.explorer.reachability())
            .unwrap_or(&empty_reach);

        if simplify::check_unreachable_expressions(&merged, reach) != SolverVerdict::Sat {
            return SolverVerdict::Unsat;
        }

        let pruned = simplify::filter_redundant_unreachable(&hl, reach);

        if simplify::check_exact_type_conflicts(&pruned) {
            debug!("conflicting exact-type constraints, returning UNSAT");
            return SolverVerdict::Unsat;
        }

        let parameter_types = session
            .as_deref()
            .map(|s| s.explorer.parameter_type_constraints())
            .unwrap_or_default();

        let source_context = match session.as_deref_mut() {
            Some(s) => match self.source_collector.collect(
                s.thread,
                Some(&*s.explorer),
                s.registry,
                &pruned,
                &parameter_types,
            ) {
                Ok(ctx) => Some(ctx),
                Err(err) => {
                    warn!(%err, "source context collection failed, omitting");
                    None
                }
            },
            None => None,
        };

        let heap_state = session
            .as_deref()
            .map(|s| self.heap_slicer.collect(s.thread, &*s.heap, s.registry, val, &pruned));

        let request = SolveRequest::new(&pruned)
            .with_heap_state(heap_state)
            .with_parameter_types(parameter_types)
            .with_source_context(source_context);

        let reply = match self.oracle.solve(&request) {
            Ok(reply) => reply,
            Err(err) => {
                // The oracle being unreachable must not abort exploration:
                // fall back to the verdict the base solver produced.
                warn!(%err, "oracle call failed, falling back to base verdict");
                return base_verdict;
            }
        };

        if reply.verdict == SolverVerdict::Sat {
            if let (Some(entries), Some(s)) = (reply.valuation.as_deref(), session.as_deref_mut()) {
                let outcome = apply_oracle_valuation(
                    entries,
                    val,
                    self.scopes.current_free_vars(),
                    s.explorer,
                    s.heap,
                    s.registry,
                    s.loader,
                    s.thread,
                );
                debug!(
                    updated = outcome.updated,
                    allocated = outcome.allocated,
                    skipped = outcome.skipped,
                    "applied oracle valuation"
                );
            }
        }

        debug!(verdict = %reply.verdict, "oracle verdict");
        reply.verdict
    }
}

//! Failure behavior: base-UNSAT short-circuit and oracle unreachability.

mod common;

use common::{fresh_world, list_explorer, node_registry, ScriptedBase, ScriptedOracle};
use lucid_solver::config::OracleConfig;
use lucid_solver::expr::{Expr, Value, Variable, NULL_REF};
use lucid_solver::oracle::HttpOracle;
use lucid_solver::solver::hybrid::{AnalysisSession, HybridSolverContext};
use lucid_solver::solver::{SolverVerdict, Valuation};
use std::time::Duration;

fn held_back() -> Vec<Expr> {
    vec![Expr::ref_ne(Expr::ref_var("head(ref)"), Expr::Null)]
}

/// Property 6: base UNSAT means no oracle call and an UNSAT verdict.
#[test]
fn base_unsat_short_circuits() {
    let base = ScriptedBase::unsat();
    let oracle = ScriptedOracle::sat();
    let mut ctx = HybridSolverContext::new(&base, &oracle);
    ctx.add(held_back());

    let mut val = Valuation::new();
    assert_eq!(ctx.solve(&mut val, None), SolverVerdict::Unsat);
    assert_eq!(oracle.calls(), 0);
}

/// Scenario E / property 9: with the endpoint refusing connections, solve
/// returns the base verdict and the valuation is untouched by the oracle
/// layer.
#[test]
fn connection_refused_degrades_to_base_verdict() {
    let registry = node_registry();
    let (mut heap, mut loader, thread) = fresh_world(&registry);
    let mut explorer = list_explorer();

    let base = ScriptedBase::with_assignment(
        Variable::reference("head(ref)"),
        Value::Ref(NULL_REF),
    );
    // Port 9 (discard) is unassigned on loopback: connection refused.
    let oracle = HttpOracle::new(OracleConfig {
        service_url: "http://127.0.0.1:9/solve".to_string(),
        timeout: Duration::from_millis(400),
    });
    let mut ctx = HybridSolverContext::new(&base, oracle);
    ctx.add(held_back());

    let mut val = Valuation::new();
    let mut session = AnalysisSession {
        explorer: &mut explorer,
        thread: &thread,
        heap: &mut heap,
        registry: &registry,
        loader: &mut loader,
    };
    let verdict = ctx.solve(&mut val, Some(&mut session));

    assert_eq!(verdict, SolverVerdict::Sat);
    // Only the base solver's pre-oracle assignment is present.
    assert_eq!(val.get("head(ref)"), Some(Value::Ref(NULL_REF)));
    assert_eq!(heap.len(), 0);
}

/// A DONT_KNOW reply (protocol-level degradation) passes through verbatim,
/// unlike a transport failure.
#[test]
fn dont_know_reply_is_not_substituted() {
    let base = ScriptedBase::default();
    let oracle = ScriptedOracle::from_json(r#"{"result":"UNKNOWN"}"#);
    let mut ctx = HybridSolverContext::new(&base, &oracle);
    ctx.add(held_back());

    let mut val = Valuation::new();
    assert_eq!(ctx.solve(&mut val, None), SolverVerdict::DontKnow);
}

//! Valuation materialisation: turning the oracle's variable assignments into
//! heap objects and valuation updates.
//!
//! Reference values arrive either as the literal string `"null"` or as a JVM
//! type signature `L<qualified/name>;` meaning "allocate a fresh instance of
//! this type". Freshly allocated objects are re-symbolised so the next
//! iteration of exploration observes their fields as symbolic.
//!
//! This step never raises: every failure is logged and skipped.

use std::collections::BTreeMap;

use serde_json::{Map as JsonMap, Value as JsonValue};
use tracing::{debug, warn};

use crate::explorer::Explorer;
use crate::expr::{Value, Variable, NULL_REF};
use crate::solver::Valuation;
use crate::vm::{ClassLoader, ClassRegistry, Heap, ThreadInfo};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MaterializeOutcome {
    pub updated: usize,
    pub allocated: usize,
    pub skipped: usize,
}

/// Applies an oracle valuation array to `val`, allocating objects as needed.
#[allow(clippy::too_many_arguments)]
pub fn apply_oracle_valuation(
    entries: &[JsonMap<String, JsonValue>],
    val: &mut Valuation,
    scope_vars: &BTreeMap<String, Variable>,
    explorer: &mut dyn Explorer,
    heap: &mut Heap,
    registry: &ClassRegistry,
    loader: &mut ClassLoader,
    thread: &ThreadInfo,
) -> MaterializeOutcome {
    let mut outcome = MaterializeOutcome::default();

    for entry in entries {
        for (var_name, value) in entry {
            // The variable must be known either to the valuation or to the
            // current scope's free variables.
            let variable = match val.variable(var_name).cloned() {
                Some(v) => v,
                None => match scope_vars.get(var_name) {
                    Some(v) => v.clone(),
                    None => {
                        warn!(var = %var_name, "oracle named unknown variable, skipping");
                        outcome.skipped += 1;
                        continue;
                    }
                },
            };

            match value {
                JsonValue::Null => {
                    val.set_casted(&variable, Value::Int(0));
                    debug!(var = %var_name, "oracle assigned null reference");
                    outcome.updated += 1;
                }
                JsonValue::String(s) if s == "null" => {
                    val.set_casted(&variable, Value::Int(0));
                    debug!(var = %var_name, "oracle assigned null reference");
                    outcome.updated += 1;
                }
                JsonValue::String(s) if is_type_signature(s) => {
                    match materialize_reference(
                        s, &variable, var_name, val, explorer, heap, registry, loader, thread,
                    ) {
                        Materialized::Kept => outcome.updated += 1,
                        Materialized::Allocated => {
                            outcome.updated += 1;
                            outcome.allocated += 1;
                        }
                        Materialized::Skipped => outcome.skipped += 1,
                    }
                }
                JsonValue::Number(n) => {
                    if let Some(i) = n.as_i64() {
                        val.set_casted(&variable, Value::Int(i));
                        outcome.updated += 1;
                    } else {
                        warn!(var = %var_name, "non-integral numeric value ignored");
                        outcome.skipped += 1;
                    }
                }
                JsonValue::Bool(b) => {
                    val.set_casted(&variable, Value::Bool(*b));
                    outcome.updated += 1;
                }
                other => {
                    // Strings without the signature shape and structured
                    // values have no defined encoding yet.
                    debug!(var = %var_name, value = %other, "unhandled oracle value ignored");
                    outcome.skipped += 1;
                }
            }
        }
    }

    outcome
}

enum Materialized {
    Kept,
    Allocated,
    Skipped,
}

fn is_type_signature(s: &str) -> bool {
    s.len() >= 3 && s.starts_with('L') && s.ends_with(';')
}

#[allow(clippy::too_many_arguments)]
fn materialize_reference(
    type_signature: &str,
    variable: &Variable,
    var_name: &str,
    val: &mut Valuation,
    explorer: &mut dyn Explorer,
    heap: &mut Heap,
    registry: &ClassRegistry,
    loader: &mut ClassLoader,
    thread: &ThreadInfo,
) -> Materialized {
    let class_name = type_signature[1..type_signature.len() - 1].replace('/', ".");

    // If the variable already holds a live instance of the target class,
    // keep the existing reference.
    if let Some(Value::Ref(current)) = val.get(var_name) {
        if current != NULL_REF && heap.class_name_of(current) == Some(class_name.as_str()) {
            debug!(var = %var_name, class = %class_name, reference = current,
                "type already matches, keeping existing object");
            return Materialized::Kept;
        }
    }

    if let Err(err) = loader.resolve(registry, &class_name) {
        warn!(var = %var_name, %err, "failed to resolve class for type signature");
        return Materialized::Skipped;
    }
    if !loader.is_initialized(&class_name) {
        if let Err(err) = loader.initialize(registry, &class_name) {
            warn!(var = %var_name, %err, "failed to initialize class before allocation");
            return Materialized::Skipped;
        }
    }

    let obj = match heap.new_object(registry, &class_name, thread) {
        Ok(obj) => obj,
        Err(err) => {
            warn!(var = %var_name, %err, "allocation failed");
            return Materialized::Skipped;
        }
    };

    val.set_casted(variable, Value::Ref(obj));
    debug!(var = %var_name, class = %class_name, reference = obj,
        "allocated fresh object for oracle assignment");

    // Re-symbolise so subsequent dispatches observe the fields as symbolic.
    explorer
        .symbolic_objects_mut()
        .process_polymorphic_object(heap, registry, obj, var_name, val);

    Materialized::Allocated
}

//! Polymorphic dispatch instrumentation.
//!
//! Runs before a virtual or interface dispatch executes, side-effect-only on
//! the symbolic side: enumerates the concrete types the call could dispatch
//! to, emits mutually-exclusive type-discrimination constraints, and records
//! a branch decision indexed into the frozen type order. The explorer's
//! replay matching relies on that order being stable across executions.

pub mod refcmp;

use std::collections::{BTreeSet, HashMap};

use tracing::{debug, warn};

use crate::config::DispatchConfig;
use crate::explorer::Explorer;
use crate::expr::{Expr, NULL_REF};
use crate::vm::{ClassLoader, ClassRegistry, Heap, InstructionRef, ThreadInfo, TypeHierarchy};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchKind {
    Virtual,
    Interface,
}

impl DispatchKind {
    fn name(self) -> &'static str {
        match self {
            DispatchKind::Virtual => "invokevirtual",
            DispatchKind::Interface => "invokeinterface",
        }
    }
}

/// The static callee reference read out of the instruction: the class named
/// by the bytecode plus method name and signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalleeRef {
    pub class_name: String,
    pub method_name: String,
    pub signature: String,
}

impl CalleeRef {
    pub fn new(
        class_name: impl Into<String>,
        method_name: impl Into<String>,
        signature: impl Into<String>,
    ) -> Self {
        Self {
            class_name: class_name.into(),
            method_name: method_name.into(),
            signature: signature.into(),
        }
    }
}

/// Identifies a dispatch point across replays.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallSiteKey {
    pub caller: String,
    pub position: usize,
    pub target: String,
}

impl CallSiteKey {
    pub fn new(instruction: &InstructionRef, declared: &str, callee: &CalleeRef) -> Self {
        Self {
            caller: instruction.method_fqn.clone(),
            position: instruction.position,
            target: format!("{declared}.{}{}", callee.method_name, callee.signature),
        }
    }
}

/// Session-owned instrumentation state: the per-call-site frozen type lists
/// and the inclusion filter.
#[derive(Debug, Default)]
pub struct DispatchInstrumentation {
    cfg: DispatchConfig,
    cache: HashMap<CallSiteKey, Vec<String>>,
}

impl DispatchInstrumentation {
    pub fn new(cfg: DispatchConfig) -> Self {
        Self { cfg, cache: HashMap::new() }
    }

    pub fn from_env() -> Self {
        Self::new(DispatchConfig::from_env())
    }

    /// Clears the call-site cache. Called at the start of a new analysis;
    /// never during one.
    pub fn reset(&mut self) {
        self.cache.clear();
    }

    pub fn cached_types(&self, key: &CallSiteKey) -> Option<&[String]> {
        self.cache.get(key).map(Vec::as_slice)
    }

    /// Instruments one polymorphic invocation. Returns the recorded branch
    /// index, or `None` when the site is not instrumented (null or
    /// non-symbolic receiver, filtered type, unknown receiver class).
    #[allow(clippy::too_many_arguments)]
    pub fn instrument_invocation(
        &mut self,
        kind: DispatchKind,
        explorer: &mut dyn Explorer,
        thread: &ThreadInfo,
        registry: &ClassRegistry,
        loader: &ClassLoader,
        heap: &Heap,
        instruction: &InstructionRef,
        callee: &CalleeRef,
        receiver: u32,
        receiver_expr: Option<&Expr>,
    ) -> Option<usize> {
        // A null receiver raises before dispatching; a concrete receiver
        // needs no type discrimination.
        if receiver == NULL_REF {
            return None;
        }
        let symbolic = receiver_expr?;

        let actual_type = heap.class_name_of(receiver)?.to_string();
        let declared_type = if registry.contains(&callee.class_name) {
            callee.class_name.clone()
        } else {
            // Fall back to the declaring class of the resolved callee.
            resolve_declaring_class(registry, &actual_type, &callee.method_name, &callee.signature)?
        };

        if !self.cfg.admits(&declared_type) {
            debug!(declared = %declared_type, "dispatch filter skips instrumentation");
            return None;
        }

        let key = CallSiteKey::new(instruction, &declared_type, callee);
        let first_visit = explorer.needs_decisions();

        let frozen = match self.cache.entry(key.clone()) {
            std::collections::hash_map::Entry::Occupied(e) => e.into_mut(),
            std::collections::hash_map::Entry::Vacant(v) => {
                if !first_visit {
                    warn!(site = %key.target, caller = %key.caller,
                        "call-site cache miss on replay, re-enumerating types");
                }
                let discovered = collect_possible_implementing_types(
                    kind,
                    registry,
                    loader,
                    &declared_type,
                    &actual_type,
                    &callee.method_name,
                    &callee.signature,
                );
                v.insert(discovered)
            }
        };
        if !frozen.iter().any(|t| t == &actual_type) {
            frozen.push(actual_type.clone());
            sort_by_specificity(registry, frozen);
        }
        let types = frozen.clone();

        if types.is_empty() {
            warn!(site = %key.target, "no candidate types collected, skipping instrumentation");
            return None;
        }

        let constraints = if first_visit {
            let built = build_exclusive_type_constraints(symbolic, &types);
            debug!(
                kind = kind.name(),
                site = %key.target,
                candidates = types.len(),
                "emitting exclusive type constraints"
            );
            Some(built)
        } else {
            None
        };

        let branch_idx = match types.iter().position(|t| t == &actual_type) {
            Some(idx) => idx,
            None => {
                warn!(actual = %actual_type, site = %key.target,
                    "actual type missing from candidate list, falling back to branch 0");
                0
            }
        };

        // Always record the decision so the explorer can match replay paths.
        explorer.decision(thread, instruction, branch_idx, constraints);
        Some(branch_idx)
    }

    /// Symbolic `instanceof`: evaluates the check concretely and attaches
    /// the symbolic predicate when the operand carries an expression.
    pub fn instrument_instanceof(
        &self,
        registry: &ClassRegistry,
        heap: &Heap,
        operand: u32,
        operand_expr: Option<&Expr>,
        type_name: &str,
    ) -> (bool, Option<Expr>) {
        let concrete = operand != NULL_REF
            && heap
                .class_name_of(operand)
                .map(|cn| registry.is_subtype_of(cn, type_name))
                .unwrap_or(false);
        let symbolic = operand_expr.map(|e| Expr::instance_of(e.clone(), type_name));
        (concrete, symbolic)
    }
}

/// Walks the receiver's hierarchy for the class declaring the callee.
fn resolve_declaring_class(
    registry: &ClassRegistry,
    actual_type: &str,
    method: &str,
    signature: &str,
) -> Option<String> {
    let mut current = Some(actual_type.to_string());
    while let Some(cn) = current {
        let def = registry.get(&cn)?;
        if def.declared_method(method, signature).is_some() {
            return Some(cn);
        }
        current = def.super_name.clone();
    }
    None
}

/// Enumerates the non-abstract classes that could receive this dispatch:
/// subtypes of the declared class (or implementors of the declared
/// interface) with a concrete method body, inheritance taken into account.
fn collect_possible_implementing_types(
    kind: DispatchKind,
    registry: &ClassRegistry,
    loader: &ClassLoader,
    declared_type: &str,
    actual_type: &str,
    method: &str,
    signature: &str,
) -> Vec<String> {
    if let Some(hierarchy) = TypeHierarchy::extract(registry, declared_type) {
        debug!(hierarchy = %hierarchy.to_descriptive_string(), "declared-type hierarchy");
    }

    let admits = |class_name: &str| -> bool {
        let Some(def) = registry.get(class_name) else { return false };
        !def.is_interface
            && !def.is_abstract
            && !def.is_array
            && registry.is_subtype_of(class_name, declared_type)
            && registry.has_concrete_method(class_name, method, signature)
    };

    // Preferred: scan every definition the registry knows, resolved or not.
    let mut discovered: BTreeSet<String> = registry
        .all()
        .filter(|def| admits(&def.name))
        .map(|def| def.name.clone())
        .collect();

    // Fallback: only the classes already resolved by the running program.
    if discovered.is_empty() {
        debug!(
            kind = kind.name(),
            declared = declared_type,
            "registry scan found nothing, falling back to resolved classes"
        );
        discovered = loader
            .resolved_classes()
            .filter(|cn| admits(cn))
            .cloned()
            .collect();
    }

    if admits(declared_type) {
        discovered.insert(declared_type.to_string());
    }
    if admits(actual_type) {
        discovered.insert(actual_type.to_string());
    }

    let mut types: Vec<String> = discovered.into_iter().collect();
    if types.is_empty() {
        warn!(
            declared = declared_type,
            method, "no concrete implementations found, using declared type as placeholder"
        );
        types.push(declared_type.to_string());
    }
    sort_by_specificity(registry, &mut types);
    types
}

/// Stable candidate order: inheritance depth descending (more specific
/// first), then full class name.
fn sort_by_specificity(registry: &ClassRegistry, types: &mut [String]) {
    types.sort_by(|a, b| {
        registry
            .inheritance_depth(b)
            .cmp(&registry.inheritance_depth(a))
            .then_with(|| a.cmp(b))
    });
}

/// The exclusive cascade over `[T0, .., Tn-1]`:
/// `c_i = InstanceOf(recv, T_i) && !InstanceOf(recv, T_0) && .. && !InstanceOf(recv, T_{i-1})`.
pub fn build_exclusive_type_constraints(receiver: &Expr, types: &[String]) -> Vec<Expr> {
    let base_checks: Vec<Expr> = types
        .iter()
        .map(|t| Expr::instance_of(receiver.clone(), t.clone()))
        .collect();

    base_checks
        .iter()
        .enumerate()
        .map(|(i, check)| {
            let mut constraint = check.clone();
            for excluded in &base_checks[..i] {
                constraint = Expr::and(constraint, Expr::not(excluded.clone()));
            }
            constraint
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::explorer::{MethodExplorer, MethodUnderAnalysis};
    use crate::vm::class::ClassDef;

    fn animal_world() -> (ClassRegistry, Heap, ClassLoader, ThreadInfo, MethodExplorer) {
        let mut reg = ClassRegistry::new();
        reg.add(ClassDef::interface("IAnimal").abstract_method("makeSound", "()V"));
        reg.add(ClassDef::class("Dog").implements("IAnimal").method("makeSound", "()V"));
        reg.add(ClassDef::class("Cat").implements("IAnimal").method("makeSound", "()V"));
        let explorer = MethodExplorer::new(MethodUnderAnalysis {
            class_name: "demo.Zoo".to_string(),
            method_name: "f".to_string(),
            signature: "(LIAnimal;)V".to_string(),
            is_static: false,
            parameters: vec![("a".to_string(), "IAnimal".to_string())],
        });
        (reg, Heap::new(), ClassLoader::new(), ThreadInfo::new("main"), explorer)
    }

    #[test]
    fn test_exclusive_cascade_shape() {
        let recv = Expr::ref_var("a(ref)");
        let constraints = build_exclusive_type_constraints(
            &recv,
            &["Dog".to_string(), "Cat".to_string()],
        );
        assert_eq!(constraints.len(), 2);
        assert_eq!(constraints[0].to_string(), "(a(ref) instanceof Dog)");
        assert_eq!(
            constraints[1].to_string(),
            "((a(ref) instanceof Cat) && !((a(ref) instanceof Dog)))"
        );
    }

    #[test]
    fn test_interface_call_enumerates_both_implementors() {
        let (reg, mut heap, loader, thread, mut explorer) = animal_world();
        let dog = heap.new_object(&reg, "Dog", &thread).unwrap();
        let mut instr = DispatchInstrumentation::default();
        let site = InstructionRef::new("demo.Zoo.f(LIAnimal;)V", 4);
        let callee = CalleeRef::new("IAnimal", "makeSound", "()V");
        let recv = Expr::ref_var("a(ref)");

        let idx = instr
            .instrument_invocation(
                DispatchKind::Interface,
                &mut explorer,
                &thread,
                &reg,
                &loader,
                &heap,
                &site,
                &callee,
                dog,
                Some(&recv),
            )
            .expect("instrumented");

        let key = CallSiteKey::new(&site, "IAnimal", &callee);
        let types = instr.cached_types(&key).expect("frozen");
        assert_eq!(types, &["Cat".to_string(), "Dog".to_string()]);
        assert_eq!(idx, 1);
        // Constraints were recorded into the tree on first visit.
        let recorded = explorer.constraints_tree().all_decision_constraints();
        assert_eq!(recorded.len(), 2);
    }

    #[test]
    fn test_null_or_concrete_receiver_is_not_instrumented() {
        let (reg, mut heap, loader, thread, mut explorer) = animal_world();
        let dog = heap.new_object(&reg, "Dog", &thread).unwrap();
        let mut instr = DispatchInstrumentation::default();
        let site = InstructionRef::new("demo.Zoo.f(LIAnimal;)V", 4);
        let callee = CalleeRef::new("IAnimal", "makeSound", "()V");
        let recv = Expr::ref_var("a(ref)");

        let none = instr.instrument_invocation(
            DispatchKind::Interface,
            &mut explorer,
            &thread,
            &reg,
            &loader,
            &heap,
            &site,
            &callee,
            NULL_REF,
            Some(&recv),
        );
        assert!(none.is_none());

        let none = instr.instrument_invocation(
            DispatchKind::Interface,
            &mut explorer,
            &thread,
            &reg,
            &loader,
            &heap,
            &site,
            &callee,
            dog,
            None,
        );
        assert!(none.is_none());
        assert!(explorer.decision_log().is_empty());
    }

    #[test]
    fn test_replay_reuses_frozen_order_without_new_constraints() {
        let (reg, mut heap, loader, thread, mut explorer) = animal_world();
        let dog = heap.new_object(&reg, "Dog", &thread).unwrap();
        let cat = heap.new_object(&reg, "Cat", &thread).unwrap();
        let mut instr = DispatchInstrumentation::default();
        let site = InstructionRef::new("demo.Zoo.f(LIAnimal;)V", 4);
        let callee = CalleeRef::new("IAnimal", "makeSound", "()V");
        let recv = Expr::ref_var("a(ref)");

        let fresh_idx = instr
            .instrument_invocation(
                DispatchKind::Interface,
                &mut explorer,
                &thread,
                &reg,
                &loader,
                &heap,
                &site,
                &callee,
                dog,
                Some(&recv),
            )
            .unwrap();
        let tree_before = explorer.constraints_tree().decisions().len();

        explorer.begin_replay();
        let replay_idx = instr
            .instrument_invocation(
                DispatchKind::Interface,
                &mut explorer,
                &thread,
                &reg,
                &loader,
                &heap,
                &site,
                &callee,
                dog,
                Some(&recv),
            )
            .unwrap();
        assert_eq!(fresh_idx, replay_idx);
        assert_eq!(explorer.constraints_tree().decisions().len(), tree_before);

        // A different runtime type on the same path maps to the other index.
        let cat_idx = instr
            .instrument_invocation(
                DispatchKind::Interface,
                &mut explorer,
                &thread,
                &reg,
                &loader,
                &heap,
                &site,
                &callee,
                cat,
                Some(&recv),
            )
            .unwrap();
        assert_ne!(cat_idx, replay_idx);
    }

    #[test]
    fn test_new_actual_type_extends_frozen_list_once() {
        let (mut reg, mut heap, loader, thread, mut explorer) = animal_world();
        let mut instr = DispatchInstrumentation::default();
        let site = InstructionRef::new("demo.Zoo.f(LIAnimal;)V", 4);
        let callee = CalleeRef::new("IAnimal", "makeSound", "()V");
        let recv = Expr::ref_var("a(ref)");

        let dog = heap.new_object(&reg, "Dog", &thread).unwrap();
        instr
            .instrument_invocation(
                DispatchKind::Interface,
                &mut explorer,
                &thread,
                &reg,
                &loader,
                &heap,
                &site,
                &callee,
                dog,
                Some(&recv),
            )
            .unwrap();

        // A type the registry learns about later shows up as a new actual.
        reg.add(ClassDef::class("Fox").implements("IAnimal").method("makeSound", "()V"));
        let fox = heap.new_object(&reg, "Fox", &thread).unwrap();
        let idx = instr
            .instrument_invocation(
                DispatchKind::Interface,
                &mut explorer,
                &thread,
                &reg,
                &loader,
                &heap,
                &site,
                &callee,
                fox,
                Some(&recv),
            )
            .unwrap();

        let key = CallSiteKey::new(&site, "IAnimal", &callee);
        let types = instr.cached_types(&key).unwrap();
        assert_eq!(types, &["Cat".to_string(), "Dog".to_string(), "Fox".to_string()]);
        assert_eq!(idx, 2);
    }

    #[test]
    fn test_placeholder_when_no_implementors() {
        let mut reg = ClassRegistry::new();
        reg.add(ClassDef::interface("IGhost").abstract_method("vanish", "()V"));
        reg.add(ClassDef::class("Shell").implements("IGhost"));
        let types = collect_possible_implementing_types(
            DispatchKind::Interface,
            &reg,
            &ClassLoader::new(),
            "IGhost",
            "Shell",
            "vanish",
            "()V",
        );
        assert_eq!(types, vec!["IGhost".to_string()]);
    }

    #[test]
    fn test_specificity_order_prefers_deeper_types() {
        let mut reg = ClassRegistry::new();
        reg.add(ClassDef::class("Animal").method("makeSound", "()V"));
        reg.add(ClassDef::class("Dog").extends("Animal").method("makeSound", "()V"));
        reg.add(ClassDef::class("Puppy").extends("Dog"));
        let mut types = vec!["Animal".to_string(), "Puppy".to_string(), "Dog".to_string()];
        sort_by_specificity(&reg, &mut types);
        assert_eq!(types, vec!["Puppy".to_string(), "Dog".to_string(), "Animal".to_string()]);
    }

    #[test]
    fn test_filter_skips_excluded_declared_types() {
        let (reg, mut heap, loader, thread, mut explorer) = animal_world();
        let dog = heap.new_object(&reg, "Dog", &thread).unwrap();
        let cfg = DispatchConfig {
            filter_enabled: true,
            packages: vec!["other.*".to_string()],
        };
        let mut instr = DispatchInstrumentation::new(cfg);
        let site = InstructionRef::new("demo.Zoo.f(LIAnimal;)V", 4);
        let callee = CalleeRef::new("IAnimal", "makeSound", "()V");
        let recv = Expr::ref_var("a(ref)");

        let none = instr.instrument_invocation(
            DispatchKind::Interface,
            &mut explorer,
            &thread,
            &reg,
            &loader,
            &heap,
            &site,
            &callee,
            dog,
            Some(&recv),
        );
        assert!(none.is_none());
    }

    #[test]
    fn test_instanceof_attaches_symbolic_predicate() {
        let (reg, mut heap, _loader, thread, _explorer) = animal_world();
        let dog = heap.new_object(&reg, "Dog", &thread).unwrap();
        let instr = DispatchInstrumentation::default();
        let recv = Expr::ref_var("a(ref)");

        let (concrete, symbolic) =
            instr.instrument_instanceof(&reg, &heap, dog, Some(&recv), "IAnimal");
        assert!(concrete);
        assert_eq!(symbolic.unwrap().to_string(), "(a(ref) instanceof IAnimal)");

        let (concrete, symbolic) =
            instr.instrument_instanceof(&reg, &heap, NULL_REF, None, "IAnimal");
        assert!(!concrete);
        assert!(symbolic.is_none());
    }
}

//! Symbolic-objects registry: fresh symbolic names for object fields under
//! the dotted-path convention, so subsequent reads and dispatches observe
//! them as symbolic.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::expr::{Value, VarType, Variable, NULL_REF};
use crate::solver::Valuation;
use crate::vm::class::FieldType;
use crate::vm::{ClassRegistry, Heap};

/// A symbolic variable attached to one object field.
#[derive(Debug, Clone)]
pub struct SymbolicField {
    pub variable: Variable,
    pub owner: u32,
    pub field: String,
}

#[derive(Debug, Default, Clone)]
pub struct SymbolicObjects {
    vars: BTreeMap<String, SymbolicField>,
}

impl SymbolicObjects {
    /// Re-symbolises `obj` under `name`: walks the declared instance fields,
    /// creating `name.field` variables (`(ref)`-suffixed for reference
    /// fields), seeding the valuation with the current heap values, and
    /// recursing through non-null reference fields.
    pub fn process_polymorphic_object(
        &mut self,
        heap: &Heap,
        registry: &ClassRegistry,
        obj: u32,
        name: &str,
        init_val: &mut Valuation,
    ) {
        let mut seen = BTreeSet::new();
        self.process_object(heap, registry, obj, name, init_val, &mut seen);
    }

    fn process_object(
        &mut self,
        heap: &Heap,
        registry: &ClassRegistry,
        obj: u32,
        name: &str,
        init_val: &mut Valuation,
        seen: &mut BTreeSet<u32>,
    ) {
        if obj == NULL_REF || !seen.insert(obj) {
            return;
        }
        let Some(ei) = heap.get(obj) else { return };
        let Some(def) = registry.get(&ei.class_name) else { return };
        debug!(class = %ei.class_name, %name, "annotating polymorphic object");

        for field in &def.fields {
            let current = ei.get_field(&field.name);
            match &field.ty {
                FieldType::Reference(_) => {
                    let var_name = format!("{}.{}(ref)", name, field.name);
                    let variable = Variable::reference(&var_name);
                    let child = match current {
                        Some(Value::Ref(r)) => r,
                        _ => NULL_REF,
                    };
                    init_val.set_casted(&variable, Value::Ref(child));
                    self.vars.insert(
                        var_name.clone(),
                        SymbolicField { variable, owner: obj, field: field.name.clone() },
                    );
                    self.process_object(heap, registry, child, &var_name, init_val, seen);
                }
                FieldType::Boolean => {
                    let var_name = format!("{}.{}", name, field.name);
                    let variable = Variable::bool(&var_name);
                    init_val.set_casted(&variable, current.unwrap_or(Value::Bool(false)));
                    self.vars.insert(
                        var_name,
                        SymbolicField { variable, owner: obj, field: field.name.clone() },
                    );
                }
                _ => {
                    let var_name = format!("{}.{}", name, field.name);
                    let variable = Variable::int(&var_name);
                    init_val.set_casted(&variable, current.unwrap_or(Value::Int(0)));
                    self.vars.insert(
                        var_name,
                        SymbolicField { variable, owner: obj, field: field.name.clone() },
                    );
                }
            }
        }
    }

    /// Writes solved valuation values back into the owning object fields.
    pub fn apply(&self, val: &Valuation, heap: &mut Heap) {
        for sym in self.vars.values() {
            let Some(value) = val.get(&sym.variable.name) else { continue };
            let written = match (sym.variable.ty, value) {
                (VarType::Reference, Value::Ref(r)) => Value::Ref(r),
                (VarType::Reference, _) => Value::Ref(NULL_REF),
                (_, v) => v,
            };
            if let Some(ei) = heap.get_mut(sym.owner) {
                let _ = ei.set_field(&sym.field, written);
            }
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&SymbolicField> {
        self.vars.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &String> {
        self.vars.keys()
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::class::ClassDef;
    use crate::vm::ThreadInfo;

    fn node_world() -> (ClassRegistry, Heap, ThreadInfo) {
        let mut reg = ClassRegistry::new();
        reg.add(
            ClassDef::class("Node")
                .field("value", FieldType::Int)
                .field("next", FieldType::reference("Node")),
        );
        (reg, Heap::new(), ThreadInfo::new("main"))
    }

    #[test]
    fn test_fields_get_dotted_names() {
        let (reg, mut heap, thread) = node_world();
        let n = heap.new_object(&reg, "Node", &thread).expect("alloc");
        let mut registry = SymbolicObjects::default();
        let mut val = Valuation::new();
        registry.process_polymorphic_object(&heap, &reg, n, "head(ref)", &mut val);

        assert!(registry.contains("head(ref).value"));
        assert!(registry.contains("head(ref).next(ref)"));
        assert_eq!(val.get("head(ref).next(ref)"), Some(Value::Ref(NULL_REF)));
        assert_eq!(val.get("head(ref).value"), Some(Value::Int(0)));
    }

    #[test]
    fn test_recursion_follows_live_references_once() {
        let (reg, mut heap, thread) = node_world();
        let n0 = heap.new_object(&reg, "Node", &thread).expect("alloc");
        let n1 = heap.new_object(&reg, "Node", &thread).expect("alloc");
        heap.get_mut(n0).unwrap().set_field("next", Value::Ref(n1)).unwrap();
        // Cycle back to n0; processing must terminate.
        heap.get_mut(n1).unwrap().set_field("next", Value::Ref(n0)).unwrap();

        let mut registry = SymbolicObjects::default();
        let mut val = Valuation::new();
        registry.process_polymorphic_object(&heap, &reg, n0, "head(ref)", &mut val);

        assert!(registry.contains("head(ref).next(ref).next(ref)"));
        assert_eq!(val.get("head(ref).next(ref)"), Some(Value::Ref(n1)));
    }

    #[test]
    fn test_apply_writes_back_into_fields() {
        let (reg, mut heap, thread) = node_world();
        let n = heap.new_object(&reg, "Node", &thread).expect("alloc");
        let mut registry = SymbolicObjects::default();
        let mut val = Valuation::new();
        registry.process_polymorphic_object(&heap, &reg, n, "head(ref)", &mut val);

        val.set_casted(&Variable::int("head(ref).value"), Value::Int(42));
        registry.apply(&val, &mut heap);
        assert_eq!(heap.get(n).unwrap().get_field("value"), Some(Value::Int(42)));
    }
}

//! Constraint-aware heap slicing.
//!
//! From the reference variables named by the pending high-level constraints,
//! build a depth- and size-bounded slice of the reachable heap, plus the
//! bindings and per-class schemas the oracle needs to interpret it.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use serde::Serialize;
use serde_json::{json, Map as JsonMap, Value as JsonValue};

use crate::config::HeapSliceConfig;
use crate::expr::{Expr, Value, Variable, NULL_REF};
use crate::solver::Valuation;
use crate::vm::class::{simple_name, ClassRegistry};
use crate::vm::{ElementInfo, Heap, ObjectKind, ThreadInfo};

const ARRAY_SAMPLE_CAP: usize = 10;

#[derive(Debug, Clone, Serialize)]
pub struct ClassSchema {
    pub fields: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ObjectDesc {
    pub class: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub length: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elements: Option<Vec<JsonValue>>,
    pub fields: JsonMap<String, JsonValue>,
}

/// The oracle-facing heap snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct HeapState {
    pub bindings: BTreeMap<String, Option<u32>>,
    pub objects: BTreeMap<String, ObjectDesc>,
    pub modifiable_objects: Vec<String>,
    pub allowed_to_allocate: bool,
    pub schemas: BTreeMap<String, ClassSchema>,
}

impl HeapState {
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty() && self.objects.is_empty() && self.schemas.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct HeapSlicer {
    cfg: HeapSliceConfig,
}

impl HeapSlicer {
    pub fn new(cfg: HeapSliceConfig) -> Self {
        Self { cfg }
    }

    pub fn from_env() -> Self {
        Self::new(HeapSliceConfig::from_env())
    }

    /// Collects the heap slice for the given constraints and valuation.
    pub fn collect(
        &self,
        thread: &ThreadInfo,
        heap: &Heap,
        registry: &ClassRegistry,
        val: &Valuation,
        hl_constraints: &[Expr],
    ) -> HeapState {
        let ref_var_names = extract_reference_variable_names(hl_constraints);
        let relevant_classes = extract_relevant_class_names(&ref_var_names);
        let bindings = build_bindings(val, &ref_var_names);

        let mut roots: BTreeSet<u32> = bindings.values().flatten().copied().collect();
        let has_valid_bindings = !roots.is_empty();

        if !has_valid_bindings && !relevant_classes.is_empty() {
            roots = find_objects_by_type(heap, &relevant_classes);
        }
        if roots.is_empty() && ref_var_names.is_empty() {
            roots = collect_root_references(thread, heap, val);
        }

        let slice = self.reachability(heap, &roots);

        let mut schema_classes = collect_relevant_classes(heap, slice.keys().copied());
        if schema_classes.is_empty() {
            schema_classes = relevant_classes;
        }
        let schemas = self.build_schemas(registry, &schema_classes);
        let objects = self.build_objects(heap, registry, &slice);

        let modifiable: BTreeSet<u32> = bindings.values().flatten().copied().collect();
        HeapState {
            bindings,
            objects,
            modifiable_objects: modifiable.iter().map(u32::to_string).collect(),
            allowed_to_allocate: true,
            schemas,
        }
    }

    /// Bounded BFS from the root references. Returns object ref to depth.
    fn reachability(&self, heap: &Heap, roots: &BTreeSet<u32>) -> BTreeMap<u32, usize> {
        let mut depths: BTreeMap<u32, usize> = BTreeMap::new();
        let mut worklist: VecDeque<u32> = VecDeque::new();
        for &r in roots {
            if r != NULL_REF && heap.get(r).is_some() {
                depths.insert(r, 0);
                worklist.push_back(r);
            }
        }

        while let Some(r) = worklist.pop_front() {
            if depths.len() >= self.cfg.max_objects {
                break;
            }
            let depth = depths[&r];
            if depth >= self.cfg.max_depth {
                continue;
            }
            let Some(ei) = heap.get(r) else { continue };

            match &ei.kind {
                ObjectKind::Array { component_is_reference: true, elements, .. } => {
                    for element in elements {
                        if depths.len() >= self.cfg.max_objects {
                            break;
                        }
                        if let Value::Ref(child) = element {
                            if *child != NULL_REF && !depths.contains_key(child) {
                                depths.insert(*child, depth + 1);
                                worklist.push_back(*child);
                            }
                        }
                    }
                }
                ObjectKind::Array { .. } => {}
                ObjectKind::Plain { fields } => {
                    for (name, value) in fields {
                        if self.cfg.irrelevant(name) {
                            continue;
                        }
                        if let Value::Ref(child) = value {
                            if *child != NULL_REF && !depths.contains_key(child) {
                                depths.insert(*child, depth + 1);
                                worklist.push_back(*child);
                            }
                        }
                    }
                }
            }
        }
        depths
    }

    fn build_schemas(
        &self,
        registry: &ClassRegistry,
        class_names: &BTreeSet<String>,
    ) -> BTreeMap<String, ClassSchema> {
        let mut schemas = BTreeMap::new();
        for class_name in class_names {
            let def = registry
                .get(class_name)
                .or_else(|| registry.get_by_simple_name(class_name));
            let Some(def) = def else { continue };
            let mut fields = BTreeMap::new();
            for field in &def.fields {
                if self.cfg.irrelevant(&field.name) {
                    continue;
                }
                fields.insert(field.name.clone(), field.ty.display_name());
            }
            schemas.insert(def.simple_name().to_string(), ClassSchema { fields });
        }
        schemas
    }

    fn build_objects(
        &self,
        heap: &Heap,
        registry: &ClassRegistry,
        slice: &BTreeMap<u32, usize>,
    ) -> BTreeMap<String, ObjectDesc> {
        let mut objects = BTreeMap::new();
        for &r in slice.keys() {
            let Some(ei) = heap.get(r) else { continue };
            objects.insert(r.to_string(), self.describe_object(ei, registry));
        }
        objects
    }

    fn describe_object(&self, ei: &ElementInfo, registry: &ClassRegistry) -> ObjectDesc {
        match &ei.kind {
            ObjectKind::Array { component_is_reference, elements, .. } => {
                let sample = if *component_is_reference {
                    Some(
                        elements
                            .iter()
                            .take(ARRAY_SAMPLE_CAP)
                            .map(|v| match v {
                                Value::Ref(r) if *r != NULL_REF => json!(r),
                                _ => json!("null"),
                            })
                            .collect(),
                    )
                } else {
                    None
                };
                ObjectDesc {
                    class: ei.class_name.clone(),
                    length: Some(elements.len()),
                    elements: sample,
                    fields: JsonMap::new(),
                }
            }
            ObjectKind::Plain { fields } => {
                let mut out = JsonMap::new();
                // Keep declaration order when the registry knows the class.
                let ordered: Vec<&String> = match registry.get(&ei.class_name) {
                    Some(def) => def
                        .fields
                        .iter()
                        .map(|f| &f.name)
                        .filter(|n| fields.contains_key(*n))
                        .collect(),
                    None => fields.keys().collect(),
                };
                for name in ordered {
                    if self.cfg.irrelevant(name) {
                        continue;
                    }
                    let rendered = match fields[name] {
                        Value::Ref(r) if r == NULL_REF => json!("null"),
                        Value::Ref(r) => json!(r),
                        Value::Bool(b) => json!(b),
                        Value::Int(i) => json!(i),
                    };
                    out.insert(name.clone(), rendered);
                }
                ObjectDesc {
                    class: ei.class_name.clone(),
                    length: None,
                    elements: None,
                    fields: out,
                }
            }
        }
    }
}

/// Reference variable names in the constraints: free variables with the
/// `(ref)` suffix plus `name(ref)` tokens mined from the rendered form.
fn extract_reference_variable_names(hl_constraints: &[Expr]) -> BTreeSet<String> {
    let mut names = BTreeSet::new();
    for expr in hl_constraints {
        for (name, _) in expr.free_variables() {
            if Variable::is_reference_name(&name) {
                names.insert(name);
            }
        }
        scan_ref_tokens(&expr.to_string(), &mut names);
    }
    names
}

/// Scans `name(ref)` tokens out of a rendered constraint. A token is a word
/// of `[A-Za-z0-9_.]` starting with a letter or underscore, immediately
/// followed by the literal `(ref)`.
fn scan_ref_tokens(rendered: &str, out: &mut BTreeSet<String>) {
    let bytes = rendered.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if b.is_ascii_alphabetic() || b == b'_' {
            let start = i;
            let mut end = i + 1;
            while end < bytes.len()
                && (bytes[end].is_ascii_alphanumeric() || bytes[end] == b'_' || bytes[end] == b'.')
            {
                end += 1;
            }
            if rendered[end..].starts_with("(ref)") {
                out.insert(format!("{}(ref)", &rendered[start..end]));
                i = end + "(ref)".len();
                continue;
            }
            i = end;
        } else {
            i += 1;
        }
    }
}

/// Candidate class names inferred from reference variable names: the last
/// dotted segment, `(ref)` stripped, PascalCased (`node` -> `Node`).
fn extract_relevant_class_names(ref_var_names: &BTreeSet<String>) -> BTreeSet<String> {
    let mut classes = BTreeSet::new();
    for name in ref_var_names {
        let last = name.rsplit('.').next().unwrap_or(name);
        let base = last.strip_suffix("(ref)").unwrap_or(last);
        let mut chars = base.chars();
        if let Some(first) = chars.next() {
            let class: String = first.to_ascii_uppercase().to_string() + chars.as_str();
            classes.insert(class);
        }
    }
    classes
}

fn build_bindings(
    val: &Valuation,
    ref_var_names: &BTreeSet<String>,
) -> BTreeMap<String, Option<u32>> {
    let mut bindings = BTreeMap::new();
    for name in ref_var_names {
        let bound = match val.get(name) {
            Some(Value::Ref(r)) if r != NULL_REF => Some(r),
            Some(Value::Int(i)) if i > 0 => u32::try_from(i).ok(),
            _ => None,
        };
        bindings.insert(name.clone(), bound);
    }
    bindings
}

fn find_objects_by_type(heap: &Heap, class_names: &BTreeSet<String>) -> BTreeSet<u32> {
    heap.live_objects()
        .filter(|(_, ei)| {
            class_names.contains(&ei.class_name)
                || class_names.contains(simple_name(&ei.class_name))
        })
        .map(|(r, _)| r)
        .collect()
}

/// Last-resort seeding when the constraints name no variables at all: the
/// top frame's reference slots plus integer-valued symbolic variables that
/// resolve to live objects.
fn collect_root_references(thread: &ThreadInfo, heap: &Heap, val: &Valuation) -> BTreeSet<u32> {
    let mut roots = BTreeSet::new();
    if let Some(frame) = thread.top_frame() {
        roots.extend(frame.reference_slots());
    }
    for (_, value) in val.entries() {
        if let Some(r) = value.as_ref_id() {
            if r != NULL_REF && heap.get(r).is_some() {
                roots.insert(r);
            }
        }
    }
    roots
}

/// Classes from the slice needing schemas: no arrays, no standard library.
fn collect_relevant_classes(
    heap: &Heap,
    slice: impl Iterator<Item = u32>,
) -> BTreeSet<String> {
    let mut classes = BTreeSet::new();
    for r in slice {
        let Some(ei) = heap.get(r) else { continue };
        if ei.is_array() || is_standard_library(&ei.class_name) {
            continue;
        }
        classes.insert(ei.class_name.clone());
    }
    classes
}

fn is_standard_library(class_name: &str) -> bool {
    class_name.starts_with("java.lang.")
        || class_name.starts_with("java.util.")
        || class_name.starts_with('[')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::class::{ClassDef, FieldType};

    fn node_registry() -> ClassRegistry {
        let mut reg = ClassRegistry::new();
        reg.add(
            ClassDef::class("Node")
                .field("value", FieldType::Int)
                .field("next", FieldType::reference("Node")),
        );
        reg
    }

    #[test]
    fn test_scan_ref_tokens_splits_dotted_paths() {
        let mut out = BTreeSet::new();
        scan_ref_tokens("(head(ref).next(ref) == null)", &mut out);
        assert!(out.contains("head(ref)"));
        assert!(out.contains("next(ref)"));
    }

    #[test]
    fn test_free_variables_keep_full_dotted_names() {
        let c = Expr::ref_eq(Expr::ref_var("head(ref).next(ref)"), Expr::Null);
        let names = extract_reference_variable_names(std::slice::from_ref(&c));
        assert!(names.contains("head(ref).next(ref)"));
        assert!(names.contains("next(ref)"));
    }

    #[test]
    fn test_class_name_inference_uses_last_segment() {
        let mut names = BTreeSet::new();
        names.insert("head(ref).next(ref)".to_string());
        names.insert("node(ref)".to_string());
        let classes = extract_relevant_class_names(&names);
        assert!(classes.contains("Next"));
        assert!(classes.contains("Node"));
    }

    #[test]
    fn test_cycle_terminates_and_slices_exactly() {
        let reg = node_registry();
        let mut heap = Heap::new();
        let thread = ThreadInfo::new("main");
        let n0 = heap.new_object(&reg, "Node", &thread).unwrap();
        let n1 = heap.new_object(&reg, "Node", &thread).unwrap();
        let n2 = heap.new_object(&reg, "Node", &thread).unwrap();
        heap.get_mut(n0).unwrap().set_field("next", Value::Ref(n1)).unwrap();
        heap.get_mut(n1).unwrap().set_field("next", Value::Ref(n2)).unwrap();
        heap.get_mut(n2).unwrap().set_field("next", Value::Ref(n0)).unwrap();
        // An unrelated object that must stay out of the slice.
        let stray = heap.new_object(&reg, "Node", &thread).unwrap();

        let mut val = Valuation::new();
        val.set(&Variable::reference("head(ref)"), Value::Ref(n0));
        let constraints = vec![Expr::ref_ne(Expr::ref_var("head(ref)"), Expr::Null)];

        let slicer = HeapSlicer::default();
        let state = slicer.collect(&thread, &heap, &reg, &val, &constraints);

        assert_eq!(state.bindings.get("head(ref)"), Some(&Some(n0)));
        let ids: BTreeSet<&String> = state.objects.keys().collect();
        assert_eq!(ids.len(), 3);
        assert!(!state.objects.contains_key(&stray.to_string()));
        assert_eq!(state.modifiable_objects, vec![n0.to_string()]);
        assert!(state.allowed_to_allocate);
        assert!(state.schemas.contains_key("Node"));
    }

    #[test]
    fn test_max_objects_bounds_slice() {
        let reg = node_registry();
        let mut heap = Heap::new();
        let thread = ThreadInfo::new("main");
        let mut prev = NULL_REF;
        let mut first = NULL_REF;
        for _ in 0..20 {
            let n = heap.new_object(&reg, "Node", &thread).unwrap();
            if prev != NULL_REF {
                heap.get_mut(prev).unwrap().set_field("next", Value::Ref(n)).unwrap();
            } else {
                first = n;
            }
            prev = n;
        }
        let mut val = Valuation::new();
        val.set(&Variable::reference("head(ref)"), Value::Ref(first));
        let constraints = vec![Expr::ref_ne(Expr::ref_var("head(ref)"), Expr::Null)];

        let mut cfg = HeapSliceConfig::default();
        cfg.max_objects = 5;
        let state = HeapSlicer::new(cfg).collect(&thread, &heap, &reg, &val, &constraints);
        assert!(state.objects.len() <= 5);
    }

    #[test]
    fn test_unbound_variables_fall_back_to_type_seeding() {
        let reg = node_registry();
        let mut heap = Heap::new();
        let thread = ThreadInfo::new("main");
        let n0 = heap.new_object(&reg, "Node", &thread).unwrap();

        let val = Valuation::new();
        let constraints = vec![Expr::ref_ne(Expr::ref_var("node(ref)"), Expr::Null)];
        let state = HeapSlicer::default().collect(&thread, &heap, &reg, &val, &constraints);

        assert_eq!(state.bindings.get("node(ref)"), Some(&None));
        assert!(state.objects.contains_key(&n0.to_string()));
        assert!(state.modifiable_objects.is_empty());
    }

    #[test]
    fn test_irrelevant_fields_are_omitted() {
        let mut reg = ClassRegistry::new();
        reg.add(
            ClassDef::class("Box")
                .field("hash", FieldType::Int)
                .field("payload", FieldType::reference("Node")),
        );
        let mut heap = Heap::new();
        let thread = ThreadInfo::new("main");
        let b = heap.new_object(&reg, "Box", &thread).unwrap();

        let mut val = Valuation::new();
        val.set(&Variable::reference("box(ref)"), Value::Ref(b));
        let constraints = vec![Expr::ref_ne(Expr::ref_var("box(ref)"), Expr::Null)];
        let state = HeapSlicer::default().collect(&thread, &heap, &reg, &val, &constraints);

        let desc = &state.objects[&b.to_string()];
        assert!(!desc.fields.contains_key("hash"));
        assert!(desc.fields.contains_key("payload"));
        assert!(!state.schemas["Box"].fields.contains_key("hash"));
    }

    #[test]
    fn test_array_objects_report_length_and_sample() {
        let reg = node_registry();
        let mut heap = Heap::new();
        let thread = ThreadInfo::new("main");
        let n = heap.new_object(&reg, "Node", &thread).unwrap();
        let mut elements = vec![Value::Ref(n)];
        elements.extend(std::iter::repeat(Value::Ref(NULL_REF)).take(14));
        let arr = heap.new_array("Node", true, elements);

        let mut val = Valuation::new();
        val.set(&Variable::reference("nodes(ref)"), Value::Ref(arr));
        let constraints = vec![Expr::ref_ne(Expr::ref_var("nodes(ref)"), Expr::Null)];
        let state = HeapSlicer::default().collect(&thread, &heap, &reg, &val, &constraints);

        let desc = &state.objects[&arr.to_string()];
        assert_eq!(desc.length, Some(15));
        assert_eq!(desc.elements.as_ref().map(Vec::len), Some(10));
        // The referenced element joined the slice.
        assert!(state.objects.contains_key(&n.to_string()));
    }
}

//! Class metadata, the registry/loader split, and type-hierarchy queries.
//!
//! The registry holds every class definition known to the analysis (the
//! classpath analogue); implementing-type enumeration scans it without
//! resolving anything. The loader tracks which classes the running program
//! has actually resolved and initialized.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use crate::error::VmError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldType {
    Boolean,
    Byte,
    Char,
    Short,
    Int,
    Long,
    Float,
    Double,
    /// Object or array type, by (possibly qualified) type name.
    Reference(String),
}

impl FieldType {
    pub fn reference(name: impl Into<String>) -> Self {
        FieldType::Reference(name.into())
    }

    pub fn is_reference(&self) -> bool {
        matches!(self, FieldType::Reference(_))
    }

    /// Human-readable type name: primitive keyword, or the bare class name.
    pub fn display_name(&self) -> String {
        match self {
            FieldType::Boolean => "boolean".to_string(),
            FieldType::Byte => "byte".to_string(),
            FieldType::Char => "char".to_string(),
            FieldType::Short => "short".to_string(),
            FieldType::Int => "int".to_string(),
            FieldType::Long => "long".to_string(),
            FieldType::Float => "float".to_string(),
            FieldType::Double => "double".to_string(),
            FieldType::Reference(name) => simple_name(name).to_string(),
        }
    }
}

pub fn simple_name(qualified: &str) -> &str {
    qualified.rsplit('.').next().unwrap_or(qualified)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDecl {
    pub name: String,
    pub ty: FieldType,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDecl {
    pub name: String,
    pub signature: String,
    pub is_abstract: bool,
    pub is_static: bool,
    /// Source line range, when known. Used by the source-context collector.
    pub start_line: u32,
    pub end_line: u32,
}

#[derive(Debug, Clone)]
pub struct ClassDef {
    /// Qualified dotted name, e.g. `demo.Dog`.
    pub name: String,
    pub super_name: Option<String>,
    pub interfaces: Vec<String>,
    pub is_interface: bool,
    pub is_abstract: bool,
    pub is_array: bool,
    pub fields: Vec<FieldDecl>,
    pub methods: Vec<MethodDecl>,
    pub source_file: Option<PathBuf>,
}

impl ClassDef {
    pub fn class(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            super_name: None,
            interfaces: Vec::new(),
            is_interface: false,
            is_abstract: false,
            is_array: false,
            fields: Vec::new(),
            methods: Vec::new(),
            source_file: None,
        }
    }

    pub fn interface(name: impl Into<String>) -> Self {
        let mut def = Self::class(name);
        def.is_interface = true;
        def.is_abstract = true;
        def
    }

    pub fn array(component: impl Into<String>) -> Self {
        let mut def = Self::class(format!("{}[]", component.into()));
        def.is_array = true;
        def
    }

    pub fn extends(mut self, super_name: impl Into<String>) -> Self {
        self.super_name = Some(super_name.into());
        self
    }

    pub fn implements(mut self, interface: impl Into<String>) -> Self {
        self.interfaces.push(interface.into());
        self
    }

    pub fn abstract_class(mut self) -> Self {
        self.is_abstract = true;
        self
    }

    pub fn field(mut self, name: impl Into<String>, ty: FieldType) -> Self {
        self.fields.push(FieldDecl { name: name.into(), ty });
        self
    }

    pub fn method(mut self, name: impl Into<String>, signature: impl Into<String>) -> Self {
        self.methods.push(MethodDecl {
            name: name.into(),
            signature: signature.into(),
            is_abstract: false,
            is_static: false,
            start_line: 0,
            end_line: 0,
        });
        self
    }

    pub fn abstract_method(mut self, name: impl Into<String>, signature: impl Into<String>) -> Self {
        self.methods.push(MethodDecl {
            name: name.into(),
            signature: signature.into(),
            is_abstract: true,
            is_static: false,
            start_line: 0,
            end_line: 0,
        });
        self
    }

    pub fn method_at(
        mut self,
        name: impl Into<String>,
        signature: impl Into<String>,
        start_line: u32,
        end_line: u32,
    ) -> Self {
        self.methods.push(MethodDecl {
            name: name.into(),
            signature: signature.into(),
            is_abstract: false,
            is_static: false,
            start_line,
            end_line,
        });
        self
    }

    pub fn static_method(mut self, name: impl Into<String>, signature: impl Into<String>) -> Self {
        self.methods.push(MethodDecl {
            name: name.into(),
            signature: signature.into(),
            is_abstract: false,
            is_static: true,
            start_line: 0,
            end_line: 0,
        });
        self
    }

    pub fn source(mut self, path: impl Into<PathBuf>) -> Self {
        self.source_file = Some(path.into());
        self
    }

    pub fn simple_name(&self) -> &str {
        simple_name(&self.name)
    }

    /// JVM descriptor form, e.g. `Ldemo/Dog;`.
    pub fn type_signature(&self) -> String {
        format!("L{};", self.name.replace('.', "/"))
    }

    /// Declared method lookup, this class only.
    pub fn declared_method(&self, name: &str, signature: &str) -> Option<&MethodDecl> {
        self.methods
            .iter()
            .find(|m| m.name == name && m.signature == signature)
    }
}

/// All class definitions known to the analysis, keyed by qualified name.
#[derive(Debug, Default, Clone)]
pub struct ClassRegistry {
    classes: BTreeMap<String, ClassDef>,
}

impl ClassRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, def: ClassDef) {
        self.classes.insert(def.name.clone(), def);
    }

    pub fn get(&self, name: &str) -> Option<&ClassDef> {
        self.classes.get(name)
    }

    pub fn get_by_simple_name(&self, simple: &str) -> Option<&ClassDef> {
        self.classes.values().find(|c| c.simple_name() == simple)
    }

    pub fn all(&self) -> impl Iterator<Item = &ClassDef> {
        self.classes.values()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.classes.contains_key(name)
    }

    /// Distance of a class from the hierarchy root, counting itself.
    pub fn inheritance_depth(&self, name: &str) -> usize {
        let mut depth = 0;
        let mut current = Some(name.to_string());
        while let Some(cn) = current {
            depth += 1;
            current = self.get(&cn).and_then(|c| c.super_name.clone());
            if depth > self.classes.len() + 1 {
                break; // cyclic metadata, stop counting
            }
        }
        depth
    }

    /// Every interface reachable from `name` via supertypes and interface
    /// extension.
    pub fn interface_closure(&self, name: &str) -> BTreeSet<String> {
        let mut closure = BTreeSet::new();
        let mut work = vec![name.to_string()];
        let mut seen = BTreeSet::new();
        while let Some(cn) = work.pop() {
            if !seen.insert(cn.clone()) {
                continue;
            }
            let Some(def) = self.get(&cn) else { continue };
            for iface in &def.interfaces {
                if closure.insert(iface.clone()) {
                    work.push(iface.clone());
                }
            }
            if let Some(sup) = &def.super_name {
                work.push(sup.clone());
            }
        }
        closure
    }

    /// Every superclass of `name`, nearest first, excluding itself.
    pub fn ancestor_chain(&self, name: &str) -> Vec<String> {
        let mut chain = Vec::new();
        let mut current = self.get(name).and_then(|c| c.super_name.clone());
        while let Some(cn) = current {
            if chain.contains(&cn) {
                break;
            }
            chain.push(cn.clone());
            current = self.get(&cn).and_then(|c| c.super_name.clone());
        }
        chain
    }

    /// Subtype check: same class, transitive superclass, or (for interface
    /// bases) membership in the interface closure.
    pub fn is_subtype_of(&self, candidate: &str, base: &str) -> bool {
        if candidate == base {
            return true;
        }
        if self.ancestor_chain(candidate).iter().any(|c| c == base) {
            return true;
        }
        if self.get(base).map(|b| b.is_interface).unwrap_or(false) {
            return self.interface_closure(candidate).contains(base);
        }
        false
    }

    /// Whether `class_name` can dispatch `(method, signature)` to a concrete
    /// body, taking inheritance into account.
    pub fn has_concrete_method(&self, class_name: &str, method: &str, signature: &str) -> bool {
        let mut current = Some(class_name.to_string());
        let mut hops = 0;
        while let Some(cn) = current {
            hops += 1;
            if hops > self.classes.len() + 1 {
                return false;
            }
            let Some(def) = self.get(&cn) else { return false };
            if let Some(m) = def.declared_method(method, signature) {
                return !m.is_abstract;
            }
            current = def.super_name.clone();
        }
        false
    }
}

/// Resolution and initialization state, per class loader.
#[derive(Debug, Default, Clone)]
pub struct ClassLoader {
    resolved: BTreeSet<String>,
    initialized: BTreeSet<String>,
}

impl ClassLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves a class, loading it into this loader. Errors when the
    /// registry has no such class.
    pub fn resolve<'r>(
        &mut self,
        registry: &'r ClassRegistry,
        name: &str,
    ) -> Result<&'r ClassDef, VmError> {
        let def = registry
            .get(name)
            .ok_or_else(|| VmError::UnknownClass(name.to_string()))?;
        self.resolved.insert(name.to_string());
        Ok(def)
    }

    /// Non-resolving lookup: only classes this loader has already resolved.
    pub fn try_get_resolved<'r>(
        &self,
        registry: &'r ClassRegistry,
        name: &str,
    ) -> Option<&'r ClassDef> {
        if self.resolved.contains(name) {
            registry.get(name)
        } else {
            None
        }
    }

    pub fn mark_resolved(&mut self, name: impl Into<String>) {
        self.resolved.insert(name.into());
    }

    pub fn resolved_classes(&self) -> impl Iterator<Item = &String> {
        self.resolved.iter()
    }

    pub fn is_initialized(&self, name: &str) -> bool {
        self.initialized.contains(name)
    }

    pub fn initialize(&mut self, registry: &ClassRegistry, name: &str) -> Result<(), VmError> {
        if !registry.contains(name) {
            return Err(VmError::InitFailed {
                class: name.to_string(),
                reason: "class not present in registry".to_string(),
            });
        }
        self.resolved.insert(name.to_string());
        self.initialized.insert(name.to_string());
        Ok(())
    }
}

/// Hierarchy facts for one type, extracted opportunistically for diagnostics
/// and oracle context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeHierarchy {
    pub class_name: String,
    pub type_signature: String,
    pub is_interface: bool,
    pub is_abstract: bool,
    pub is_array: bool,
    pub super_class: Option<String>,
    pub direct_interfaces: Vec<String>,
    pub all_super_classes: Vec<String>,
    pub all_interfaces: Vec<String>,
}

impl TypeHierarchy {
    pub fn extract(registry: &ClassRegistry, name: &str) -> Option<Self> {
        let def = registry.get(name)?;
        let all_super_classes = registry.ancestor_chain(name);
        let all_interfaces: Vec<String> = registry.interface_closure(name).into_iter().collect();
        Some(Self {
            class_name: def.name.clone(),
            type_signature: def.type_signature(),
            is_interface: def.is_interface,
            is_abstract: def.is_abstract,
            is_array: def.is_array,
            super_class: def.super_name.clone(),
            direct_interfaces: def.interfaces.clone(),
            all_super_classes,
            all_interfaces,
        })
    }

    pub fn to_descriptive_string(&self) -> String {
        let mut out = format!("Type: {} (signature: {})", self.class_name, self.type_signature);
        if self.is_interface {
            out.push_str(" [interface]");
        } else if self.is_abstract {
            out.push_str(" [abstract]");
        }
        if self.is_array {
            out.push_str(" [array]");
        }
        if let Some(sup) = &self.super_class {
            out.push_str(&format!("\n  extends: {sup}"));
        }
        if !self.direct_interfaces.is_empty() {
            out.push_str(&format!("\n  implements: {}", self.direct_interfaces.join(", ")));
        }
        if !self.all_super_classes.is_empty() {
            out.push_str(&format!("\n  ancestors: {}", self.all_super_classes.join(" -> ")));
        }
        if !self.all_interfaces.is_empty() {
            out.push_str(&format!("\n  all interfaces: {}", self.all_interfaces.join(", ")));
        }
        out
    }
}

//! Heap of typed objects keyed by dense ids. Id 0 is the null reference.

use std::collections::BTreeMap;

use crate::error::VmError;
use crate::expr::{Value, NULL_REF};

use super::class::{ClassRegistry, FieldType};
use super::thread::ThreadInfo;

#[derive(Debug, Clone)]
pub enum ObjectKind {
    Plain {
        fields: BTreeMap<String, Value>,
    },
    Array {
        component: String,
        component_is_reference: bool,
        elements: Vec<Value>,
    },
}

#[derive(Debug, Clone)]
pub struct ElementInfo {
    pub class_name: String,
    pub kind: ObjectKind,
}

impl ElementInfo {
    pub fn is_array(&self) -> bool {
        matches!(self.kind, ObjectKind::Array { .. })
    }

    pub fn get_field(&self, name: &str) -> Option<Value> {
        match &self.kind {
            ObjectKind::Plain { fields } => fields.get(name).copied(),
            ObjectKind::Array { .. } => None,
        }
    }

    pub fn set_field(&mut self, name: &str, value: Value) -> Result<(), VmError> {
        match &mut self.kind {
            ObjectKind::Plain { fields } => {
                if !fields.contains_key(name) {
                    return Err(VmError::NoSuchField {
                        class: self.class_name.clone(),
                        field: name.to_string(),
                    });
                }
                fields.insert(name.to_string(), value);
                Ok(())
            }
            ObjectKind::Array { .. } => Err(VmError::NoSuchField {
                class: self.class_name.clone(),
                field: name.to_string(),
            }),
        }
    }

    /// Reads a reference-typed field; null when the field is absent or holds
    /// a non-reference value.
    pub fn get_reference_field(&self, name: &str) -> u32 {
        match self.get_field(name) {
            Some(Value::Ref(r)) => r,
            _ => NULL_REF,
        }
    }

    pub fn array_length(&self) -> usize {
        match &self.kind {
            ObjectKind::Array { elements, .. } => elements.len(),
            ObjectKind::Plain { .. } => 0,
        }
    }

    pub fn reference_element(&self, idx: usize) -> u32 {
        match &self.kind {
            ObjectKind::Array { elements, .. } => match elements.get(idx) {
                Some(Value::Ref(r)) => *r,
                _ => NULL_REF,
            },
            ObjectKind::Plain { .. } => NULL_REF,
        }
    }

    pub fn has_reference_elements(&self) -> bool {
        matches!(
            self.kind,
            ObjectKind::Array { component_is_reference: true, .. }
        )
    }
}

#[derive(Debug, Default, Clone)]
pub struct Heap {
    // Slot 0 is always vacant: reference 0 means null.
    objects: Vec<Option<ElementInfo>>,
}

impl Heap {
    pub fn new() -> Self {
        Self { objects: vec![None] }
    }

    /// Allocates an object of `class_name` with default-initialized fields.
    /// Allocation happens on the current analysis thread; the thread handle
    /// is part of the contract even though this model does not partition
    /// heaps per thread.
    pub fn new_object(
        &mut self,
        registry: &ClassRegistry,
        class_name: &str,
        _thread: &ThreadInfo,
    ) -> Result<u32, VmError> {
        let def = registry
            .get(class_name)
            .ok_or_else(|| VmError::UnknownClass(class_name.to_string()))?;
        let mut fields = BTreeMap::new();
        for field in &def.fields {
            let default = match field.ty {
                FieldType::Boolean => Value::Bool(false),
                FieldType::Reference(_) => Value::Ref(NULL_REF),
                _ => Value::Int(0),
            };
            fields.insert(field.name.clone(), default);
        }
        Ok(self.insert(ElementInfo {
            class_name: class_name.to_string(),
            kind: ObjectKind::Plain { fields },
        }))
    }

    pub fn new_array(
        &mut self,
        component: impl Into<String>,
        component_is_reference: bool,
        elements: Vec<Value>,
    ) -> u32 {
        let component = component.into();
        self.insert(ElementInfo {
            class_name: format!("{component}[]"),
            kind: ObjectKind::Array { component, component_is_reference, elements },
        })
    }

    fn insert(&mut self, info: ElementInfo) -> u32 {
        self.objects.push(Some(info));
        (self.objects.len() - 1) as u32
    }

    pub fn get(&self, r: u32) -> Option<&ElementInfo> {
        if r == NULL_REF {
            return None;
        }
        self.objects.get(r as usize).and_then(|o| o.as_ref())
    }

    pub fn get_mut(&mut self, r: u32) -> Option<&mut ElementInfo> {
        if r == NULL_REF {
            return None;
        }
        self.objects.get_mut(r as usize).and_then(|o| o.as_mut())
    }

    pub fn class_name_of(&self, r: u32) -> Option<&str> {
        self.get(r).map(|ei| ei.class_name.as_str())
    }

    pub fn live_objects(&self) -> impl Iterator<Item = (u32, &ElementInfo)> {
        self.objects
            .iter()
            .enumerate()
            .filter_map(|(i, o)| o.as_ref().map(|ei| (i as u32, ei)))
    }

    pub fn len(&self) -> usize {
        self.live_objects().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

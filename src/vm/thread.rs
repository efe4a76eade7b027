//! Analysis thread and stack-frame model.

use crate::expr::NULL_REF;

/// A bytecode location inside a caller method; identifies decision points
/// and call sites across replays.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InstructionRef {
    pub method_fqn: String,
    pub position: usize,
}

impl InstructionRef {
    pub fn new(method_fqn: impl Into<String>, position: usize) -> Self {
        Self { method_fqn: method_fqn.into(), position }
    }
}

impl std::fmt::Display for InstructionRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.method_fqn, self.position)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Int(i64),
    Ref(u32),
}

#[derive(Debug, Clone)]
pub struct StackFrame {
    pub class_name: String,
    pub method_name: String,
    pub method_signature: String,
    pub slots: Vec<Slot>,
}

impl StackFrame {
    pub fn new(
        class_name: impl Into<String>,
        method_name: impl Into<String>,
        method_signature: impl Into<String>,
    ) -> Self {
        Self {
            class_name: class_name.into(),
            method_name: method_name.into(),
            method_signature: method_signature.into(),
            slots: Vec::new(),
        }
    }

    pub fn with_slots(mut self, slots: Vec<Slot>) -> Self {
        self.slots = slots;
        self
    }

    pub fn method_fqn(&self) -> String {
        format!("{}.{}{}", self.class_name, self.method_name, self.method_signature)
    }

    /// Non-null reference slots, in slot order.
    pub fn reference_slots(&self) -> impl Iterator<Item = u32> + '_ {
        self.slots.iter().filter_map(|s| match s {
            Slot::Ref(r) if *r != NULL_REF => Some(*r),
            _ => None,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ThreadInfo {
    pub name: String,
    pub frames: Vec<StackFrame>,
}

impl ThreadInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), frames: Vec::new() }
    }

    pub fn push_frame(&mut self, frame: StackFrame) {
        self.frames.push(frame);
    }

    pub fn top_frame(&self) -> Option<&StackFrame> {
        self.frames.last()
    }
}

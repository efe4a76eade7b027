//! Minimal object-model substrate: the VM/runtime contract consumed by the
//! solving layer. Class metadata lives in a registry (the classpath
//! analogue, scannable without resolving), resolution state in a class
//! loader, objects in a heap keyed by dense ids with 0 reserved for null.

pub mod class;
pub mod heap;
pub mod thread;

pub use class::{ClassDef, ClassLoader, ClassRegistry, FieldDecl, FieldType, MethodDecl, TypeHierarchy};
pub use heap::{ElementInfo, Heap, ObjectKind};
pub use thread::{InstructionRef, Slot, StackFrame, ThreadInfo};

pub use crate::expr::NULL_REF;

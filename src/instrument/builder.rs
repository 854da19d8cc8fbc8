//! Instruction stream builder
//!
//! Appends instructions and hands out labels that do not collide with the
//! labels already present in the body being rewritten.

use crate::runtime::abi::RuntimeCall;
use crate::unit::{Constant, FieldOp, FieldRef, Insn, InvokeKind, Label, MethodRef, ValueKind};

#[derive(Debug, Default)]
pub struct InsnBuilder {
    insns: Vec<Insn>,
    next_label: u32,
}

impl InsnBuilder {
    /// `first_label` must be above every label id of the surrounding body
    pub fn new(first_label: u32) -> Self {
        Self {
            insns: Vec::new(),
            next_label: first_label,
        }
    }

    pub fn with_capacity(first_label: u32, capacity: usize) -> Self {
        Self {
            insns: Vec::with_capacity(capacity),
            next_label: first_label,
        }
    }

    /// Allocate a fresh, not yet placed label
    pub fn new_label(&mut self) -> Label {
        let label = Label(self.next_label);
        self.next_label += 1;
        label
    }

    /// Allocate a fresh label and place it at the current position
    pub fn mark(&mut self) -> Label {
        let label = self.new_label();
        self.place(label);
        label
    }

    pub fn place(&mut self, label: Label) -> &mut Self {
        self.push(Insn::Label(label))
    }

    pub fn push(&mut self, insn: Insn) -> &mut Self {
        self.insns.push(insn);
        self
    }

    pub fn constant(&mut self, constant: Constant) -> &mut Self {
        self.push(Insn::Const(constant))
    }

    pub fn int(&mut self, value: i32) -> &mut Self {
        self.constant(Constant::Int(value))
    }

    pub fn string(&mut self, value: impl Into<String>) -> &mut Self {
        self.constant(Constant::Str(value.into()))
    }

    pub fn load(&mut self, kind: ValueKind, slot: u16) -> &mut Self {
        self.push(Insn::Load { kind, slot })
    }

    pub fn store(&mut self, kind: ValueKind, slot: u16) -> &mut Self {
        self.push(Insn::Store { kind, slot })
    }

    pub fn dup(&mut self) -> &mut Self {
        self.push(Insn::Dup)
    }

    pub fn pop(&mut self) -> &mut Self {
        self.push(Insn::Pop)
    }

    pub fn invoke(&mut self, kind: InvokeKind, method: MethodRef) -> &mut Self {
        self.push(Insn::Invoke { kind, method })
    }

    pub fn invoke_runtime(&mut self, call: RuntimeCall) -> &mut Self {
        let kind = call.invoke_kind();
        self.invoke(kind, call.method_ref())
    }

    pub fn get_static(&mut self, field: FieldRef) -> &mut Self {
        self.push(Insn::Field {
            op: FieldOp::GetStatic,
            field,
        })
    }

    pub fn ret(&mut self, kind: Option<ValueKind>) -> &mut Self {
        self.push(Insn::Return(kind))
    }

    pub fn throw(&mut self) -> &mut Self {
        self.push(Insn::Throw)
    }

    pub fn len(&self) -> usize {
        self.insns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.insns.is_empty()
    }

    /// Next label id that would be handed out
    pub fn label_watermark(&self) -> u32 {
        self.next_label
    }

    pub fn finish(self) -> Vec<Insn> {
        self.insns
    }
}

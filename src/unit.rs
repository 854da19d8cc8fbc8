//! In-memory model of a compiled unit
//!
//! A unit is one method-bearing definition handed to the engine by the load
//! hook. Method bodies are kept as a labelled instruction stream: branch
//! targets, handler ranges and variable scopes refer to [`Label`] markers
//! rather than byte offsets, so inserting instructions never invalidates them.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Name of instance constructors
pub const CONSTRUCTOR_NAME: &str = "<init>";

/// Computational kind of a slot or operand stack value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueKind {
    Int,
    Long,
    Float,
    Double,
    Ref,
}

impl ValueKind {
    /// Slots (and operand stack units) a value of this kind occupies
    pub fn width(self) -> u16 {
        match self {
            ValueKind::Long | ValueKind::Double => 2,
            _ => 1,
        }
    }

    pub fn mnemonic_prefix(self) -> char {
        match self {
            ValueKind::Int => 'i',
            ValueKind::Long => 'l',
            ValueKind::Float => 'f',
            ValueKind::Double => 'd',
            ValueKind::Ref => 'a',
        }
    }
}

/// Branch target / range marker inside a method body
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Label(pub u32);

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

/// Constant pushed by [`Insn::Const`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Constant {
    Null,
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Str(String),
    /// Class literal (internal name)
    Class(String),
}

impl Constant {
    pub fn kind(&self) -> ValueKind {
        match self {
            Constant::Int(_) => ValueKind::Int,
            Constant::Long(_) => ValueKind::Long,
            Constant::Float(_) => ValueKind::Float,
            Constant::Double(_) => ValueKind::Double,
            Constant::Null | Constant::Str(_) | Constant::Class(_) => ValueKind::Ref,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Cmp {
    Eq,
    Ne,
    Lt,
    Ge,
    Gt,
    Le,
}

/// Branch condition for [`Insn::Jump`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JumpCond {
    Always,
    /// Pops one int and compares it against zero
    Zero(Cmp),
    /// Pops two ints and compares them
    IntPair(Cmp),
    Null,
    NonNull,
    RefEq,
    RefNe,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvokeKind {
    Static,
    Virtual,
    Special,
    Interface,
}

/// Symbolic reference to a method
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MethodRef {
    pub owner: String,
    pub name: String,
    pub descriptor: String,
}

impl MethodRef {
    pub fn new(
        owner: impl Into<String>,
        name: impl Into<String>,
        descriptor: impl Into<String>,
    ) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
            descriptor: descriptor.into(),
        }
    }

    pub fn is_constructor(&self) -> bool {
        self.name == CONSTRUCTOR_NAME
    }
}

/// Symbolic reference to a field
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldRef {
    pub owner: String,
    pub name: String,
    pub descriptor: String,
}

impl FieldRef {
    pub fn new(
        owner: impl Into<String>,
        name: impl Into<String>,
        descriptor: impl Into<String>,
    ) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
            descriptor: descriptor.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldOp {
    GetStatic,
    PutStatic,
    GetField,
    PutField,
}

/// One instruction of a method body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Insn {
    /// Position marker; executes as a no-op
    Label(Label),
    /// Source line of the following instructions
    Line(u32),
    Nop,
    Const(Constant),
    Load {
        kind: ValueKind,
        slot: u16,
    },
    Store {
        kind: ValueKind,
        slot: u16,
    },
    /// Add `delta` to the int in `slot`
    Iinc {
        slot: u16,
        delta: i16,
    },
    Arith {
        op: ArithOp,
        kind: ValueKind,
    },
    Pop,
    Pop2,
    Dup,
    Swap,
    Jump {
        cond: JumpCond,
        target: Label,
    },
    /// Pops an int and jumps to the matching case, or `default`
    Switch {
        default: Label,
        cases: Vec<(i32, Label)>,
    },
    Invoke {
        kind: InvokeKind,
        method: MethodRef,
    },
    Field {
        op: FieldOp,
        field: FieldRef,
    },
    /// Allocate an uninitialized instance of the named unit
    New(String),
    /// Pops a length and pushes a new array of the element type (field descriptor)
    NewArray(String),
    ArrayLength,
    ArrayLoad(ValueKind),
    ArrayStore(ValueKind),
    CheckCast(String),
    InstanceOf(String),
    /// Return from the method; `None` for void
    Return(Option<ValueKind>),
    Throw,
}

impl Insn {
    /// Highest slot index touched by this instruction (wide values use two)
    pub fn slot_extent(&self) -> Option<u32> {
        match self {
            Insn::Load { kind, slot } | Insn::Store { kind, slot } => {
                Some(u32::from(*slot) + u32::from(kind.width()))
            }
            Insn::Iinc { slot, .. } => Some(u32::from(*slot) + 1),
            _ => None,
        }
    }

    pub fn is_return(&self) -> bool {
        matches!(self, Insn::Return(_))
    }

    pub fn is_throw(&self) -> bool {
        matches!(self, Insn::Throw)
    }

    /// Labels this instruction refers to (not the label it defines)
    pub fn targets(&self) -> Vec<Label> {
        match self {
            Insn::Jump { target, .. } => vec![*target],
            Insn::Switch { default, cases } => {
                let mut labels = Vec::with_capacity(cases.len() + 1);
                labels.push(*default);
                labels.extend(cases.iter().map(|(_, l)| *l));
                labels
            }
            _ => Vec::new(),
        }
    }
}

/// Exception table entry
///
/// Covers instructions between `start` (inclusive) and `end` (exclusive).
/// Entries are searched in order; the first matching entry wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Handler {
    pub start: Label,
    pub end: Label,
    pub handler: Label,
    /// `None` catches everything
    pub catch_type: Option<String>,
}

/// Local variable scope / name metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalVar {
    pub name: String,
    pub descriptor: String,
    pub start: Label,
    pub end: Label,
    pub slot: u16,
}

/// Method body
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Code {
    pub max_stack: u16,
    pub max_locals: u16,
    pub instructions: Vec<Insn>,
    #[serde(default)]
    pub handlers: Vec<Handler>,
    #[serde(default)]
    pub local_vars: Vec<LocalVar>,
}

impl Code {
    /// First label id not used anywhere in the body
    pub fn label_watermark(&self) -> u32 {
        let mut max = None;
        let mut see = |label: Label| {
            max = Some(max.map_or(label.0, |m: u32| m.max(label.0)));
        };
        for insn in &self.instructions {
            if let Insn::Label(label) = insn {
                see(*label);
            }
            for target in insn.targets() {
                see(target);
            }
        }
        for handler in &self.handlers {
            see(handler.start);
            see(handler.end);
            see(handler.handler);
        }
        for var in &self.local_vars {
            see(var.start);
            see(var.end);
        }
        max.map_or(0, |m| m.saturating_add(1))
    }

    /// Instruction index of every defined label
    pub fn label_positions(&self) -> HashMap<Label, usize> {
        self.instructions
            .iter()
            .enumerate()
            .filter_map(|(index, insn)| match insn {
                Insn::Label(label) => Some((*label, index)),
                _ => None,
            })
            .collect()
    }
}

/// Access flags of a method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AccessFlags(pub u16);

impl AccessFlags {
    pub const PUBLIC: u16 = 0x0001;
    pub const PRIVATE: u16 = 0x0002;
    pub const PROTECTED: u16 = 0x0004;
    pub const STATIC: u16 = 0x0008;
    pub const FINAL: u16 = 0x0010;
    pub const SYNCHRONIZED: u16 = 0x0020;
    pub const BRIDGE: u16 = 0x0040;
    pub const VARARGS: u16 = 0x0080;
    pub const NATIVE: u16 = 0x0100;
    pub const ABSTRACT: u16 = 0x0400;
    pub const SYNTHETIC: u16 = 0x1000;

    pub fn contains(self, flag: u16) -> bool {
        self.0 & flag != 0
    }

    pub fn is_static(self) -> bool {
        self.contains(Self::STATIC)
    }

    pub fn is_abstract(self) -> bool {
        self.contains(Self::ABSTRACT)
    }

    pub fn is_native(self) -> bool {
        self.contains(Self::NATIVE)
    }
}

/// One method definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Method {
    pub access: AccessFlags,
    pub name: String,
    pub descriptor: String,
    /// Declared parameter names, when the unit carries them
    #[serde(default)]
    pub parameter_names: Vec<Option<String>>,
    /// `None` for abstract and native methods
    pub code: Option<Code>,
}

impl Method {
    pub fn is_constructor(&self) -> bool {
        self.name == CONSTRUCTOR_NAME
    }
}

/// A compiled unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Unit {
    /// Internal (`/`-separated) name
    pub name: String,
    pub super_name: Option<String>,
    #[serde(default)]
    pub source_file: Option<String>,
    pub methods: Vec<Method>,
}

impl Unit {
    pub fn method(&self, name: &str, descriptor: &str) -> Option<&Method> {
        self.methods
            .iter()
            .find(|m| m.name == name && m.descriptor == descriptor)
    }

    /// Name in dotted form, as seen by filters and frames
    pub fn dotted_name(&self) -> String {
        dotted(&self.name)
    }
}

/// Convert an internal name (`a/b/C`) to dotted form (`a.b.C`)
pub fn dotted(name: &str) -> String {
    name.replace('/', ".")
}

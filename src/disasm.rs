//! Unit listing
//!
//! Renders units in an assembly-like text form. Used by `--listing` and
//! when debugging rewritten bodies.
//!
//! # Format
//! ```text
//! unit com/acme/Widget extends java/lang/Object
//!
//!   method static add(II)I
//!     max_stack=2 max_locals=2
//!     0000  iload 0
//!     0001  iload 1
//!     0002  iadd
//!     0003  ireturn
//! ```

use crate::unit::{ArithOp, Cmp, Code, Constant, FieldOp, Insn, InvokeKind, JumpCond, Method, Unit};
use std::fmt;

/// Full listing of a unit
pub fn disassemble(unit: &Unit) -> String {
    Listing(unit).to_string()
}

/// Listing of one method body
pub fn disassemble_code(code: &Code) -> String {
    CodeListing(code).to_string()
}

struct Listing<'a>(&'a Unit);

impl fmt::Display for Listing<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let unit = self.0;
        write!(f, "unit {}", unit.name)?;
        if let Some(super_name) = &unit.super_name {
            write!(f, " extends {}", super_name)?;
        }
        writeln!(f)?;
        if let Some(source) = &unit.source_file {
            writeln!(f, "  source {}", source)?;
        }
        for method in &unit.methods {
            writeln!(f)?;
            write_method(f, method)?;
        }
        Ok(())
    }
}

fn write_method(f: &mut fmt::Formatter<'_>, method: &Method) -> fmt::Result {
    write!(f, "  method ")?;
    if method.access.is_static() {
        write!(f, "static ")?;
    }
    if method.access.is_abstract() {
        write!(f, "abstract ")?;
    }
    if method.access.is_native() {
        write!(f, "native ")?;
    }
    writeln!(f, "{}{}", method.name, method.descriptor)?;
    match &method.code {
        Some(code) => write!(f, "{}", CodeListing(code)),
        None => Ok(()),
    }
}

struct CodeListing<'a>(&'a Code);

impl fmt::Display for CodeListing<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = self.0;
        writeln!(
            f,
            "    max_stack={} max_locals={}",
            code.max_stack, code.max_locals
        )?;
        for (index, insn) in code.instructions.iter().enumerate() {
            writeln!(f, "    {:04}  {}", index, insn)?;
        }
        if !code.handlers.is_empty() {
            writeln!(f, "    handlers:")?;
            for h in &code.handlers {
                writeln!(
                    f,
                    "      {}..{} -> {} {}",
                    h.start,
                    h.end,
                    h.handler,
                    h.catch_type.as_deref().unwrap_or("any")
                )?;
            }
        }
        if !code.local_vars.is_empty() {
            writeln!(f, "    locals:")?;
            for v in &code.local_vars {
                writeln!(
                    f,
                    "      slot {} {} {} {}..{}",
                    v.slot, v.name, v.descriptor, v.start, v.end
                )?;
            }
        }
        Ok(())
    }
}

fn arith_name(op: ArithOp) -> &'static str {
    match op {
        ArithOp::Add => "add",
        ArithOp::Sub => "sub",
        ArithOp::Mul => "mul",
        ArithOp::Div => "div",
        ArithOp::Rem => "rem",
        ArithOp::Neg => "neg",
    }
}

fn cmp_suffix(cmp: Cmp) -> &'static str {
    match cmp {
        Cmp::Eq => "eq",
        Cmp::Ne => "ne",
        Cmp::Lt => "lt",
        Cmp::Ge => "ge",
        Cmp::Gt => "gt",
        Cmp::Le => "le",
    }
}

fn jump_mnemonic(cond: JumpCond) -> String {
    match cond {
        JumpCond::Always => "goto".to_string(),
        JumpCond::Zero(cmp) => format!("if{}", cmp_suffix(cmp)),
        JumpCond::IntPair(cmp) => format!("if_icmp{}", cmp_suffix(cmp)),
        JumpCond::Null => "ifnull".to_string(),
        JumpCond::NonNull => "ifnonnull".to_string(),
        JumpCond::RefEq => "if_acmpeq".to_string(),
        JumpCond::RefNe => "if_acmpne".to_string(),
    }
}

fn invoke_mnemonic(kind: InvokeKind) -> &'static str {
    match kind {
        InvokeKind::Static => "invokestatic",
        InvokeKind::Virtual => "invokevirtual",
        InvokeKind::Special => "invokespecial",
        InvokeKind::Interface => "invokeinterface",
    }
}

fn field_mnemonic(op: FieldOp) -> &'static str {
    match op {
        FieldOp::GetStatic => "getstatic",
        FieldOp::PutStatic => "putstatic",
        FieldOp::GetField => "getfield",
        FieldOp::PutField => "putfield",
    }
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constant::Null => f.write_str("null"),
            Constant::Int(v) => write!(f, "{}", v),
            Constant::Long(v) => write!(f, "{}L", v),
            Constant::Float(v) => write!(f, "{}F", v),
            Constant::Double(v) => write!(f, "{}D", v),
            Constant::Str(s) => write!(f, "{:?}", s),
            Constant::Class(name) => write!(f, "class {}", name),
        }
    }
}

impl fmt::Display for Insn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Insn::Label(label) => write!(f, "{}:", label),
            Insn::Line(line) => write!(f, "line {}", line),
            Insn::Nop => f.write_str("nop"),
            Insn::Const(Constant::Null) => f.write_str("aconst_null"),
            Insn::Const(c) => write!(f, "ldc {}", c),
            Insn::Load { kind, slot } => write!(f, "{}load {}", kind.mnemonic_prefix(), slot),
            Insn::Store { kind, slot } => write!(f, "{}store {}", kind.mnemonic_prefix(), slot),
            Insn::Iinc { slot, delta } => write!(f, "iinc {} {}", slot, delta),
            Insn::Arith { op, kind } => write!(f, "{}{}", kind.mnemonic_prefix(), arith_name(*op)),
            Insn::Pop => f.write_str("pop"),
            Insn::Pop2 => f.write_str("pop2"),
            Insn::Dup => f.write_str("dup"),
            Insn::Swap => f.write_str("swap"),
            Insn::Jump { cond, target } => write!(f, "{} {}", jump_mnemonic(*cond), target),
            Insn::Switch { default, cases } => {
                write!(f, "switch default {} [", default)?;
                for (i, (key, label)) in cases.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{} -> {}", key, label)?;
                }
                f.write_str("]")
            }
            Insn::Invoke { kind, method } => write!(
                f,
                "{} {}.{}{}",
                invoke_mnemonic(*kind),
                method.owner,
                method.name,
                method.descriptor
            ),
            Insn::Field { op, field } => write!(
                f,
                "{} {}.{} : {}",
                field_mnemonic(*op),
                field.owner,
                field.name,
                field.descriptor
            ),
            Insn::New(name) => write!(f, "new {}", name),
            Insn::NewArray(element) => write!(f, "newarray {}", element),
            Insn::ArrayLength => f.write_str("arraylength"),
            Insn::ArrayLoad(kind) => write!(f, "{}aload", kind.mnemonic_prefix()),
            Insn::ArrayStore(kind) => write!(f, "{}astore", kind.mnemonic_prefix()),
            Insn::CheckCast(name) => write!(f, "checkcast {}", name),
            Insn::InstanceOf(name) => write!(f, "instanceof {}", name),
            Insn::Return(None) => f.write_str("return"),
            Insn::Return(Some(kind)) => write!(f, "{}return", kind.mnemonic_prefix()),
            Insn::Throw => f.write_str("athrow"),
        }
    }
}

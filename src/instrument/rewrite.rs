//! Rewrite pass: weaves the runtime calls into a method body
//!
//! Pure function of the original body and its [`MethodLayout`]. Original
//! labels are kept as-is; synthesized code only uses labels at or above
//! the layout's watermark.

use super::analysis::{EntryPoint, MethodLayout, Parm};
use super::builder::InsnBuilder;
use crate::runtime::abi::{ParamFormat, RuntimeCall, STRING_CLASS};
use crate::unit::{Code, Handler, Insn, Label, LocalVar, ValueKind};

/// Per-site bookkeeping collected while emitting
struct Emitted {
    site_handlers: Vec<Handler>,
    guard_start: Option<Label>,
}

pub fn rewrite(code: &Code, layout: &MethodLayout) -> Code {
    let extra = layout.return_sites.len() * 3 + layout.throw_sites.len() * 14 + 32;
    let mut b = InsnBuilder::with_capacity(
        layout.first_label,
        code.instructions.len() + extra + layout.parms.len() * 7,
    );
    let mut emitted = Emitted {
        site_handlers: Vec::with_capacity(layout.throw_sites.len()),
        guard_start: None,
    };

    if layout.entry == EntryPoint::MethodStart {
        emit_entry(&mut b, layout);
        emitted.guard_start = Some(b.mark());
    }

    let mut returns = layout.return_sites.iter().peekable();
    let mut throws = layout.throw_sites.iter().peekable();
    for (index, insn) in code.instructions.iter().enumerate() {
        if returns.next_if(|&&site| site == index).is_some() {
            if let Insn::Return(kind) = insn {
                emit_return(&mut b, layout, *kind);
                continue;
            }
        }
        if throws.next_if(|&&site| site == index).is_some() {
            emit_throw(&mut b, layout, &mut emitted.site_handlers);
            continue;
        }

        b.push(shift_insn(insn, layout));

        if layout.entry == EntryPoint::AfterDelegation(index) {
            emit_entry(&mut b, layout);
            emitted.guard_start = Some(b.mark());
        }
    }

    let mut handlers = emitted.site_handlers;
    handlers.extend(code.handlers.iter().cloned());
    if let Some(guard_start) = emitted.guard_start {
        let guard_end = b.mark();
        let guard_handler = b.mark();
        emit_guard(&mut b, layout);
        handlers.push(Handler {
            start: guard_start,
            end: guard_end,
            handler: guard_handler,
            catch_type: None,
        });
    }

    Code {
        max_stack: layout.max_stack,
        max_locals: layout.max_locals,
        instructions: b.finish(),
        handlers,
        local_vars: code
            .local_vars
            .iter()
            .map(|var| LocalVar {
                slot: layout.shift.apply(var.slot),
                ..var.clone()
            })
            .collect(),
    }
}

fn shift_insn(insn: &Insn, layout: &MethodLayout) -> Insn {
    let shift = layout.shift;
    match insn {
        Insn::Load { kind, slot } => Insn::Load {
            kind: *kind,
            slot: shift.apply(*slot),
        },
        Insn::Store { kind, slot } => Insn::Store {
            kind: *kind,
            slot: shift.apply(*slot),
        },
        Insn::Iinc { slot, delta } => Insn::Iinc {
            slot: shift.apply(*slot),
            delta: *delta,
        },
        other => other.clone(),
    }
}

/// Snapshot the depth, build the frame, push it
fn emit_entry(b: &mut InsnBuilder, layout: &MethodLayout) {
    b.invoke_runtime(RuntimeCall::CurrentStack)
        .dup()
        .invoke_runtime(RuntimeCall::Depth)
        .store(ValueKind::Int, layout.depth_slot)
        .string(layout.owner.as_str())
        .string(layout.method.as_str());

    if layout.is_parameterless() {
        b.get_static(RuntimeCall::empty_params_field());
    } else {
        emit_params(b, layout);
    }

    b.invoke_runtime(RuntimeCall::Push);
}

fn emit_params(b: &mut InsnBuilder, layout: &MethodLayout) {
    let limit = i32::try_from(layout.parm_size_limit).unwrap_or(i32::MAX);
    b.int(layout.parms.len() as i32)
        .push(Insn::NewArray(format!("L{};", STRING_CLASS)));
    for (index, parm) in layout.parms.iter().enumerate() {
        emit_param(b, index as i32, parm, limit);
    }
}

fn emit_param(b: &mut InsnBuilder, index: i32, parm: &Parm, limit: i32) {
    b.dup()
        .int(index)
        .string(parm.name.as_str())
        .load(parm.tag.kind(), parm.slot)
        .int(limit)
        .invoke_runtime(RuntimeCall::FormatParam(ParamFormat::for_tag(&parm.tag)))
        .push(Insn::ArrayStore(ValueKind::Ref));
}

fn emit_return(b: &mut InsnBuilder, layout: &MethodLayout, kind: Option<ValueKind>) {
    b.load(ValueKind::Int, layout.depth_slot)
        .invoke_runtime(RuntimeCall::PopToDepth)
        .ret(kind);
}

/// Enrich, unwind, rethrow; failures inside the region are dropped
fn emit_throw(b: &mut InsnBuilder, layout: &MethodLayout, handlers: &mut Vec<Handler>) {
    let ex = layout.exception_slot;
    let depth = layout.depth_slot;

    b.store(ValueKind::Ref, ex);
    let start = b.mark();
    b.load(ValueKind::Ref, ex)
        .invoke_runtime(RuntimeCall::Embellish)
        .load(ValueKind::Int, depth)
        .invoke_runtime(RuntimeCall::PopToDepth);
    let end = b.mark();
    b.load(ValueKind::Ref, ex).throw();

    let handler = b.mark();
    b.pop()
        .load(ValueKind::Int, depth)
        .invoke_runtime(RuntimeCall::PopToDepth)
        .load(ValueKind::Ref, ex)
        .throw();

    handlers.push(Handler {
        start,
        end,
        handler,
        catch_type: None,
    });
}

/// Exits not covered by an explicit throw unwind here without re-enriching
fn emit_guard(b: &mut InsnBuilder, layout: &MethodLayout) {
    b.store(ValueKind::Ref, layout.exception_slot)
        .load(ValueKind::Int, layout.depth_slot)
        .invoke_runtime(RuntimeCall::PopToDepth)
        .load(ValueKind::Ref, layout.exception_slot)
        .throw();
}

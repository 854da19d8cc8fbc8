//! Analysis pass: everything the rewrite needs, computed up front
//!
//! The pass never touches the body. It resolves parameter slots and names,
//! picks the two fresh slots, derives the slot shift, finds the entry point
//! and the exit sites, and sizes the rewritten frame. The rewrite pass then
//! applies the resulting [`MethodLayout`] without further decisions.

use std::collections::HashMap;

use super::{InstrumentError, MethodTransformer};
use crate::descriptor::{MethodDescriptor, TypeTag};
use crate::unit::{Code, Insn, InvokeKind};

/// Slots reserved by instrumentation
pub const FRESH_SLOTS: u16 = 2;

/// Labels synthesized per throw site and for the method-wide guard
const LABELS_PER_THROW: u64 = 3;
const GUARD_LABELS: u64 = 3;

/// Operand stack needed on top of the original contents at exit sites
const EXIT_STACK_HEADROOM: u32 = 1;

/// One declared parameter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parm {
    pub tag: TypeTag,
    pub slot: u16,
    pub name: String,
}

/// Renumbering applied to every slot reference at or above `from`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotShift {
    pub from: u16,
    pub by: u16,
}

impl SlotShift {
    /// Analysis guarantees shifted slots stay in range
    pub fn apply(self, slot: u16) -> u16 {
        if slot >= self.from {
            slot + self.by
        } else {
            slot
        }
    }
}

/// Where entry instrumentation goes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryPoint {
    /// Before the first instruction
    MethodStart,
    /// Right after the delegating constructor call at this index
    AfterDelegation(usize),
}

impl EntryPoint {
    /// Whether the instruction at `index` executes after entry instrumentation
    pub fn covers(self, index: usize) -> bool {
        match self {
            EntryPoint::MethodStart => true,
            EntryPoint::AfterDelegation(call) => index > call,
        }
    }
}

/// Result of the analysis pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodLayout {
    /// Dotted owner name recorded in frames
    pub owner: String,
    pub method: String,
    pub parm_size_limit: usize,
    pub parms: Vec<Parm>,
    /// Holds the in-flight exception at throw sites and in the exit guard
    pub exception_slot: u16,
    /// Holds the stack depth snapshot taken at entry
    pub depth_slot: u16,
    pub shift: SlotShift,
    pub entry: EntryPoint,
    /// Indices of return instructions to instrument
    pub return_sites: Vec<usize>,
    /// Indices of throw instructions to instrument
    pub throw_sites: Vec<usize>,
    /// First label id free for synthesized code
    pub first_label: u32,
    pub max_stack: u16,
    pub max_locals: u16,
}

impl MethodLayout {
    pub fn is_parameterless(&self) -> bool {
        self.parms.is_empty()
    }
}

pub(super) fn analyze(
    transformer: &MethodTransformer,
    code: &Code,
) -> Result<MethodLayout, InstrumentError> {
    let descriptor = MethodDescriptor::parse(&transformer.descriptor).map_err(|source| {
        InstrumentError::Descriptor {
            method: transformer.method_name.clone(),
            source,
        }
    })?;

    let receiver_slots: u32 = if transformer.is_static { 0 } else { 1 };
    let first_fresh = receiver_slots + descriptor.param_slots();
    let max_extent = code
        .instructions
        .iter()
        .filter_map(Insn::slot_extent)
        .chain(
            code.local_vars
                .iter()
                .map(|v| u32::from(v.slot) + local_var_width(&v.descriptor)),
        )
        .max()
        .unwrap_or(0);
    let locals_before = u32::from(code.max_locals).max(first_fresh).max(max_extent);
    let locals_after = locals_before + u32::from(FRESH_SLOTS);
    let max_locals = u16::try_from(locals_after).map_err(|_| InstrumentError::SlotOverflow {
        method: transformer.method_name.clone(),
        needed: locals_after,
    })?;
    // first_fresh < locals_after <= u16::MAX, so both fit
    let exception_slot = first_fresh as u16;
    let depth_slot = exception_slot + 1;

    let parms = assign_parms(transformer, code, &descriptor, receiver_slots as u16);

    let entry = if transformer.is_constructor() {
        let call = find_delegation(code).ok_or_else(|| InstrumentError::MissingDelegation {
            method: transformer.method_name.clone(),
        })?;
        EntryPoint::AfterDelegation(call)
    } else {
        EntryPoint::MethodStart
    };

    let mut return_sites = Vec::new();
    let mut throw_sites = Vec::new();
    for (index, insn) in code.instructions.iter().enumerate() {
        if !entry.covers(index) {
            continue;
        }
        if insn.is_return() {
            return_sites.push(index);
        } else if insn.is_throw() {
            throw_sites.push(index);
        }
    }

    let first_label = code.label_watermark();
    let labels = LABELS_PER_THROW * throw_sites.len() as u64 + GUARD_LABELS;
    if u64::from(first_label) + labels > u64::from(u32::MAX) {
        return Err(InstrumentError::LabelOverflow {
            method: transformer.method_name.clone(),
        });
    }

    let entry_need = entry_stack_need(&parms);
    let entry_base = match entry {
        EntryPoint::MethodStart => 0,
        EntryPoint::AfterDelegation(_) => u32::from(code.max_stack),
    };
    let stack = (u32::from(code.max_stack) + EXIT_STACK_HEADROOM).max(entry_base + entry_need);
    let max_stack = u16::try_from(stack).map_err(|_| InstrumentError::StackOverflow {
        method: transformer.method_name.clone(),
        needed: stack,
    })?;

    Ok(MethodLayout {
        owner: transformer.owner.clone(),
        method: transformer.method_name.clone(),
        parm_size_limit: transformer.parm_size_limit,
        parms,
        exception_slot,
        depth_slot,
        shift: SlotShift {
            from: exception_slot,
            by: FRESH_SLOTS,
        },
        entry,
        return_sites,
        throw_sites,
        first_label,
        max_stack,
        max_locals,
    })
}

fn assign_parms(
    transformer: &MethodTransformer,
    code: &Code,
    descriptor: &MethodDescriptor,
    first_slot: u16,
) -> Vec<Parm> {
    let mut local_names: HashMap<u16, &str> = HashMap::new();
    for var in &code.local_vars {
        local_names.entry(var.slot).or_insert(var.name.as_str());
    }

    let mut slot = first_slot;
    descriptor
        .params
        .iter()
        .enumerate()
        .map(|(index, tag)| {
            let declared = transformer
                .parameter_names
                .get(index)
                .and_then(|n| n.as_deref())
                .filter(|n| !n.is_empty());
            let name = declared
                .or_else(|| local_names.get(&slot).copied())
                .map(str::to_string)
                .unwrap_or_else(|| format!("parm {}", index + 1));
            let parm = Parm {
                tag: tag.clone(),
                slot,
                name,
            };
            slot += tag.width();
            parm
        })
        .collect()
}

/// Index of the constructor's own delegating `<init>` call
///
/// Allocations (`New`) inside the constructor are initialized by their own
/// `<init>` calls; the first special `<init>` call without a pending
/// allocation is the one initializing the receiver.
fn find_delegation(code: &Code) -> Option<usize> {
    let mut pending_allocations = 0usize;
    for (index, insn) in code.instructions.iter().enumerate() {
        match insn {
            Insn::New(_) => pending_allocations += 1,
            Insn::Invoke {
                kind: InvokeKind::Special,
                method,
            } if method.is_constructor() => {
                if pending_allocations == 0 {
                    return Some(index);
                }
                pending_allocations -= 1;
            }
            _ => {}
        }
    }
    None
}

/// Peak operand stack used by the entry sequence
fn entry_stack_need(parms: &[Parm]) -> u32 {
    // stack handle + dup while snapshotting the depth
    let snapshot = 2;
    // handle, owner, method, then the parameter array
    let frame = match parms.iter().map(|p| u32::from(p.tag.width())).max() {
        None => 4,
        // array, dup, index, name, value, limit
        Some(widest) => 3 + 1 + 1 + 1 + 1 + widest + 1,
    };
    snapshot.max(frame)
}

fn local_var_width(descriptor: &str) -> u32 {
    TypeTag::parse(descriptor).map_or(1, |tag| u32::from(tag.width()))
}

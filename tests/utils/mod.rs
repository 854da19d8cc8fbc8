// Integration test utilities
//
// A small reference interpreter for units, with the runtime entry points
// bound to an explicit ShadowStack, plus shorthand for building units.
#![allow(dead_code)]

use exembellish::codec::{MsgPackCodec, UnitCodec};
use exembellish::options::AgentOptions;
use exembellish::runtime::abi::{
    ParamFormat, PrimitiveElement, RuntimeCall, EMPTY_PARAMS_FIELD, FAILURE_CLASS, RUNTIME_CLASS,
};
use exembellish::runtime::{
    format_param, ArgValue, EmbellishError, Frame, MutableMessage, ShadowStack,
};
use exembellish::transformer::{Embellisher, UnitTransformer};
use exembellish::unit::*;
use std::borrow::Cow;
use std::collections::HashMap;
use std::rc::Rc;

/// Throwable whose message cannot be replaced
pub const SEALED_CLASS: &str = "test/SealedError";

const MAX_CALL_DEPTH: usize = 256;

// ============================================================================
// Values and heap
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Null,
    Ref(usize),
    /// Uninitialized slot, or the upper half of a wide value
    Top,
}

impl Value {
    fn width(self) -> usize {
        match self {
            Value::Long(_) | Value::Double(_) => 2,
            _ => 1,
        }
    }

    fn has_kind(self, kind: ValueKind) -> bool {
        matches!(
            (kind, self),
            (ValueKind::Int, Value::Int(_))
                | (ValueKind::Long, Value::Long(_))
                | (ValueKind::Float, Value::Float(_))
                | (ValueKind::Double, Value::Double(_))
                | (ValueKind::Ref, Value::Null)
                | (ValueKind::Ref, Value::Ref(_))
        )
    }

    pub fn as_int(self) -> i32 {
        match self {
            Value::Int(v) => v,
            other => panic!("expected int, found {:?}", other),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Object {
    Str(String),
    Instance {
        class: String,
        fields: HashMap<String, Value>,
    },
    Throwable {
        class: String,
        message: Option<String>,
    },
    Array {
        element: String,
        items: Vec<Value>,
    },
    /// Handle returned by `Runtime.current()`
    StackHandle,
}

fn builtin_super(class: &str) -> Option<&'static str> {
    Some(match class {
        "java/lang/Object" => return None,
        "java/lang/Throwable" => "java/lang/Object",
        "java/lang/Exception" => "java/lang/Throwable",
        "java/lang/RuntimeException" => "java/lang/Exception",
        "java/lang/IllegalStateException"
        | "java/lang/IllegalArgumentException"
        | "java/lang/ArithmeticException"
        | "java/lang/NullPointerException"
        | "java/lang/ClassCastException"
        | "java/lang/ArrayIndexOutOfBoundsException"
        | "java/lang/NegativeArraySizeException"
        | SEALED_CLASS
        | FAILURE_CLASS => "java/lang/RuntimeException",
        _ => "java/lang/Object",
    })
}

/// Heap throwable seen through the message capability
struct HeapThrowable<'a> {
    object: &'a mut Object,
}

impl MutableMessage for HeapThrowable<'_> {
    fn message(&self) -> Option<Cow<'_, str>> {
        match &*self.object {
            Object::Throwable { message, .. } => message.as_deref().map(Cow::Borrowed),
            _ => None,
        }
    }

    fn replace_message(&mut self, text: String) -> Result<(), EmbellishError> {
        match &mut *self.object {
            Object::Throwable { class, .. } if class == SEALED_CLASS => {
                Err(EmbellishError::ImmutableMessage {
                    type_name: class.clone(),
                })
            }
            Object::Throwable { message, .. } => {
                *message = Some(text);
                Ok(())
            }
            _ => Err(EmbellishError::ImmutableMessage {
                type_name: "non-throwable".to_string(),
            }),
        }
    }
}

// ============================================================================
// Interpreter
// ============================================================================

/// Outcome of a call: a return value, or the heap id of the thrown object
pub type CallResult = Result<Option<Value>, usize>;

enum Step {
    Next,
    Jump(Label),
    Return(Option<Value>),
}

struct Activation<'c> {
    method: String,
    code: &'c Code,
    labels: HashMap<Label, usize>,
    locals: Vec<Value>,
    stack: Vec<Value>,
    stack_units: usize,
}

impl<'c> Activation<'c> {
    fn push(&mut self, value: Value) {
        self.stack_units += value.width();
        assert!(
            self.stack_units <= self.code.max_stack as usize,
            "{}: operand stack {} exceeds max_stack {}",
            self.method,
            self.stack_units,
            self.code.max_stack
        );
        self.stack.push(value);
    }

    fn pop(&mut self) -> Value {
        let value = self
            .stack
            .pop()
            .unwrap_or_else(|| panic!("{}: operand stack underflow", self.method));
        self.stack_units -= value.width();
        value
    }

    fn pop_int(&mut self) -> i32 {
        match self.pop() {
            Value::Int(v) => v,
            other => panic!("{}: expected int on stack, found {:?}", self.method, other),
        }
    }

    fn pop_ref(&mut self) -> Option<usize> {
        match self.pop() {
            Value::Ref(id) => Some(id),
            Value::Null => None,
            other => panic!("{}: expected reference on stack, found {:?}", self.method, other),
        }
    }

    fn check_slot(&self, slot: u16, width: usize) {
        assert!(
            slot as usize + width <= self.code.max_locals as usize,
            "{}: slot {} outside max_locals {}",
            self.method,
            slot,
            self.code.max_locals
        );
    }

    fn load(&self, kind: ValueKind, slot: u16) -> Value {
        self.check_slot(slot, kind.width() as usize);
        let value = self.locals[slot as usize];
        assert!(
            value.has_kind(kind),
            "{}: load {:?} from slot {} holding {:?}",
            self.method,
            kind,
            slot,
            value
        );
        value
    }

    fn store(&mut self, kind: ValueKind, slot: u16, value: Value) {
        self.check_slot(slot, kind.width() as usize);
        assert!(
            value.has_kind(kind),
            "{}: store {:?} of {:?}",
            self.method,
            kind,
            value
        );
        self.locals[slot as usize] = value;
        if kind.width() == 2 {
            self.locals[slot as usize + 1] = Value::Top;
        }
    }

    fn target(&self, label: Label) -> usize {
        *self
            .labels
            .get(&label)
            .unwrap_or_else(|| panic!("{}: undefined label {}", self.method, label))
    }
}

pub struct Vm {
    units: HashMap<String, Rc<Unit>>,
    pub heap: Vec<Object>,
    statics: HashMap<(String, String), Value>,
    /// Shadow stack of the single interpreted thread
    pub stack: ShadowStack,
    /// Stack depth right after every frame push
    pub push_depths: Vec<usize>,
    stack_handle: Option<usize>,
    empty_params: Option<usize>,
    call_depth: usize,
}

impl Vm {
    pub fn new(units: Vec<Unit>) -> Self {
        Self {
            units: units
                .into_iter()
                .map(|u| (u.name.clone(), Rc::new(u)))
                .collect(),
            heap: Vec::new(),
            statics: HashMap::new(),
            stack: ShadowStack::new(),
            push_depths: Vec::new(),
            stack_handle: None,
            empty_params: None,
            call_depth: 0,
        }
    }

    fn alloc(&mut self, object: Object) -> usize {
        self.heap.push(object);
        self.heap.len() - 1
    }

    pub fn new_string(&mut self, text: &str) -> Value {
        Value::Ref(self.alloc(Object::Str(text.to_string())))
    }

    pub fn new_array(&mut self, element: &str, items: Vec<Value>) -> Value {
        Value::Ref(self.alloc(Object::Array {
            element: element.to_string(),
            items,
        }))
    }

    pub fn new_instance(&mut self, class: &str) -> Value {
        Value::Ref(self.alloc(Object::Instance {
            class: class.to_string(),
            fields: HashMap::new(),
        }))
    }

    pub fn new_throwable(&mut self, class: &str, message: Option<&str>) -> usize {
        self.alloc(Object::Throwable {
            class: class.to_string(),
            message: message.map(str::to_string),
        })
    }

    pub fn string(&self, value: Value) -> Option<&str> {
        match value {
            Value::Ref(id) => match &self.heap[id] {
                Object::Str(s) => Some(s),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn class_of(&self, id: usize) -> &str {
        match &self.heap[id] {
            Object::Str(_) => "java/lang/String",
            Object::Instance { class, .. } | Object::Throwable { class, .. } => class,
            Object::Array { .. } => "java/lang/Object",
            Object::StackHandle => "exembellish/runtime/ShadowStack",
        }
    }

    pub fn message_of(&self, id: usize) -> Option<&str> {
        match &self.heap[id] {
            Object::Throwable { message, .. } => message.as_deref(),
            _ => None,
        }
    }

    pub fn static_field(&self, owner: &str, name: &str) -> Option<Value> {
        self.statics
            .get(&(owner.to_string(), name.to_string()))
            .copied()
    }

    fn super_of(&self, class: &str) -> Option<String> {
        match self.units.get(class) {
            Some(unit) => unit.super_name.clone(),
            None => builtin_super(class).map(str::to_string),
        }
    }

    pub fn is_subclass(&self, class: &str, target: &str) -> bool {
        let mut current = Some(class.to_string());
        while let Some(name) = current {
            if name == target {
                return true;
            }
            current = self.super_of(&name);
        }
        false
    }

    fn is_throwable_class(&self, class: &str) -> bool {
        self.is_subclass(class, "java/lang/Throwable")
    }

    fn raise(&mut self, class: &str, message: &str) -> usize {
        self.new_throwable(class, Some(message))
    }

    fn find_method(&self, class: &str, name: &str, descriptor: &str) -> Option<(Rc<Unit>, usize)> {
        let mut current = Some(class.to_string());
        while let Some(owner) = current {
            if let Some(unit) = self.units.get(&owner) {
                if let Some(index) = unit
                    .methods
                    .iter()
                    .position(|m| m.name == name && m.descriptor == descriptor)
                {
                    return Some((Rc::clone(unit), index));
                }
            }
            current = self.super_of(&owner);
        }
        None
    }

    /// Call a method by owner; instance methods take the receiver first
    pub fn call(
        &mut self,
        owner: &str,
        name: &str,
        descriptor: &str,
        args: Vec<Value>,
    ) -> CallResult {
        match self.find_method(owner, name, descriptor) {
            Some((unit, index)) => self.execute(&unit, index, args),
            None => panic!("no method {}.{}{}", owner, name, descriptor),
        }
    }

    fn execute(&mut self, unit: &Rc<Unit>, index: usize, args: Vec<Value>) -> CallResult {
        let method = &unit.methods[index];
        let code = method
            .code
            .as_ref()
            .unwrap_or_else(|| panic!("{}.{} has no code", unit.name, method.name));
        self.call_depth += 1;
        assert!(self.call_depth < MAX_CALL_DEPTH, "call depth limit");

        let mut act = Activation {
            method: format!("{}.{}{}", unit.name, method.name, method.descriptor),
            code,
            labels: code.label_positions(),
            locals: vec![Value::Top; code.max_locals as usize],
            stack: Vec::new(),
            stack_units: 0,
        };
        let mut slot = 0usize;
        for arg in args {
            assert!(
                slot + arg.width() <= act.locals.len(),
                "{}: arguments exceed max_locals",
                act.method
            );
            act.locals[slot] = arg;
            slot += arg.width();
        }

        let result = self.run(&mut act);
        self.call_depth -= 1;
        result
    }

    fn run(&mut self, act: &mut Activation<'_>) -> CallResult {
        let code = act.code;
        let mut pc = 0usize;
        loop {
            assert!(
                pc < code.instructions.len(),
                "{}: fell off the end of the body",
                act.method
            );
            let insn = &code.instructions[pc];
            match self.step(act, insn) {
                Ok(Step::Next) => pc += 1,
                Ok(Step::Jump(label)) => pc = act.target(label),
                Ok(Step::Return(value)) => {
                    return Ok(value);
                }
                Err(thrown) => match self.find_handler(act, pc, thrown) {
                    Some(handler_pc) => {
                        act.stack.clear();
                        act.stack_units = 0;
                        act.push(Value::Ref(thrown));
                        pc = handler_pc;
                    }
                    None => return Err(thrown),
                },
            }
        }
    }

    fn find_handler(&self, act: &Activation<'_>, pc: usize, thrown: usize) -> Option<usize> {
        let class = self.class_of(thrown).to_string();
        act.code.handlers.iter().find_map(|h| {
            let start = act.target(h.start);
            let end = act.target(h.end);
            let covered = start <= pc && pc < end;
            let catches = match &h.catch_type {
                None => true,
                Some(target) => self.is_subclass(&class, target),
            };
            (covered && catches).then(|| act.target(h.handler))
        })
    }

    fn step(&mut self, act: &mut Activation<'_>, insn: &Insn) -> Result<Step, usize> {
        match insn {
            Insn::Label(_) | Insn::Line(_) | Insn::Nop => {}
            Insn::Const(constant) => {
                let value = match constant {
                    Constant::Null => Value::Null,
                    Constant::Int(v) => Value::Int(*v),
                    Constant::Long(v) => Value::Long(*v),
                    Constant::Float(v) => Value::Float(*v),
                    Constant::Double(v) => Value::Double(*v),
                    Constant::Str(s) | Constant::Class(s) => self.new_string(s),
                };
                act.push(value);
            }
            Insn::Load { kind, slot } => {
                let value = act.load(*kind, *slot);
                act.push(value);
            }
            Insn::Store { kind, slot } => {
                let value = act.pop();
                act.store(*kind, *slot, value);
            }
            Insn::Iinc { slot, delta } => {
                let v = act.load(ValueKind::Int, *slot).as_int();
                act.store(ValueKind::Int, *slot, Value::Int(v.wrapping_add(*delta as i32)));
            }
            Insn::Arith { op, kind } => {
                let value = self.arith(act, *op, *kind)?;
                act.push(value);
            }
            Insn::Pop => {
                act.pop();
            }
            Insn::Pop2 => {
                if act.pop().width() == 1 {
                    act.pop();
                }
            }
            Insn::Dup => {
                let top = act.pop();
                act.push(top);
                act.push(top);
            }
            Insn::Swap => {
                let a = act.pop();
                let b = act.pop();
                act.push(a);
                act.push(b);
            }
            Insn::Jump { cond, target } => {
                let taken = match cond {
                    JumpCond::Always => true,
                    JumpCond::Zero(cmp) => compare(*cmp, act.pop_int(), 0),
                    JumpCond::IntPair(cmp) => {
                        let b = act.pop_int();
                        let a = act.pop_int();
                        compare(*cmp, a, b)
                    }
                    JumpCond::Null => act.pop_ref().is_none(),
                    JumpCond::NonNull => act.pop_ref().is_some(),
                    JumpCond::RefEq => act.pop_ref() == act.pop_ref(),
                    JumpCond::RefNe => act.pop_ref() != act.pop_ref(),
                };
                if taken {
                    return Ok(Step::Jump(*target));
                }
            }
            Insn::Switch { default, cases } => {
                let key = act.pop_int();
                let target = cases
                    .iter()
                    .find(|(k, _)| *k == key)
                    .map_or(*default, |(_, label)| *label);
                return Ok(Step::Jump(target));
            }
            Insn::Invoke { kind, method } => {
                if let Some(value) = self.invoke(act, *kind, method)? {
                    act.push(value);
                }
            }
            Insn::Field { op, field } => self.field(act, *op, field)?,
            Insn::New(class) => {
                let object = if self.is_throwable_class(class) {
                    Object::Throwable {
                        class: class.clone(),
                        message: None,
                    }
                } else {
                    Object::Instance {
                        class: class.clone(),
                        fields: HashMap::new(),
                    }
                };
                let id = self.alloc(object);
                act.push(Value::Ref(id));
            }
            Insn::NewArray(element) => {
                let len = act.pop_int();
                if len < 0 {
                    let message = len.to_string();
                    return Err(self.raise("java/lang/NegativeArraySizeException", &message));
                }
                let fill = default_value(element);
                let array = self.new_array(element, vec![fill; len as usize]);
                act.push(array);
            }
            Insn::ArrayLength => {
                let id = self.non_null(act.pop_ref())?;
                let len = match &self.heap[id] {
                    Object::Array { items, .. } => items.len() as i32,
                    other => panic!("{}: arraylength on {:?}", act.method, other),
                };
                act.push(Value::Int(len));
            }
            Insn::ArrayLoad(_) => {
                let index = act.pop_int();
                let id = self.non_null(act.pop_ref())?;
                let value = match &self.heap[id] {
                    Object::Array { items, .. } => items.get(index as usize).copied(),
                    other => panic!("{}: array load on {:?}", act.method, other),
                };
                match value {
                    Some(value) if index >= 0 => act.push(value),
                    _ => {
                        return Err(self.raise(
                            "java/lang/ArrayIndexOutOfBoundsException",
                            &index.to_string(),
                        ))
                    }
                }
            }
            Insn::ArrayStore(kind) => {
                let value = act.pop();
                assert!(value.has_kind(*kind), "{}: array store of {:?}", act.method, value);
                let index = act.pop_int();
                let id = self.non_null(act.pop_ref())?;
                let stored = match &mut self.heap[id] {
                    Object::Array { items, .. } if index >= 0 && (index as usize) < items.len() => {
                        items[index as usize] = value;
                        true
                    }
                    Object::Array { .. } => false,
                    other => panic!("array store on {:?}", other),
                };
                if !stored {
                    return Err(self.raise(
                        "java/lang/ArrayIndexOutOfBoundsException",
                        &index.to_string(),
                    ));
                }
            }
            Insn::CheckCast(class) => {
                let value = act.pop();
                if let Value::Ref(id) = value {
                    let actual = self.class_of(id).to_string();
                    if !self.is_subclass(&actual, class) {
                        return Err(self.raise("java/lang/ClassCastException", &actual));
                    }
                }
                act.push(value);
            }
            Insn::InstanceOf(class) => {
                let result = match act.pop_ref() {
                    Some(id) => {
                        let actual = self.class_of(id).to_string();
                        self.is_subclass(&actual, class)
                    }
                    None => false,
                };
                act.push(Value::Int(result as i32));
            }
            Insn::Return(kind) => {
                let value = kind.map(|k| {
                    let v = act.pop();
                    assert!(v.has_kind(k), "{}: return {:?} of {:?}", act.method, k, v);
                    v
                });
                return Ok(Step::Return(value));
            }
            Insn::Throw => {
                let id = self.non_null(act.pop_ref())?;
                return Err(id);
            }
        }
        Ok(Step::Next)
    }

    fn non_null(&mut self, id: Option<usize>) -> Result<usize, usize> {
        id.ok_or_else(|| self.raise("java/lang/NullPointerException", "null"))
    }

    fn arith(
        &mut self,
        act: &mut Activation<'_>,
        op: ArithOp,
        kind: ValueKind,
    ) -> Result<Value, usize> {
        if op == ArithOp::Neg {
            return Ok(match act.pop() {
                Value::Int(v) => Value::Int(v.wrapping_neg()),
                Value::Long(v) => Value::Long(v.wrapping_neg()),
                Value::Float(v) => Value::Float(-v),
                Value::Double(v) => Value::Double(-v),
                other => panic!("{}: negate {:?}", act.method, other),
            });
        }
        let b = act.pop();
        let a = act.pop();
        assert!(a.has_kind(kind) && b.has_kind(kind), "{}: arith on {:?} {:?}", act.method, a, b);
        let divides = matches!(op, ArithOp::Div | ArithOp::Rem);
        Ok(match (a, b) {
            (Value::Int(_), Value::Int(0)) | (Value::Long(_), Value::Long(0)) if divides => {
                return Err(self.raise("java/lang/ArithmeticException", "/ by zero"));
            }
            (Value::Int(x), Value::Int(y)) => Value::Int(match op {
                ArithOp::Add => x.wrapping_add(y),
                ArithOp::Sub => x.wrapping_sub(y),
                ArithOp::Mul => x.wrapping_mul(y),
                ArithOp::Div => x.wrapping_div(y),
                ArithOp::Rem => x.wrapping_rem(y),
                ArithOp::Neg => unreachable!(),
            }),
            (Value::Long(x), Value::Long(y)) => Value::Long(match op {
                ArithOp::Add => x.wrapping_add(y),
                ArithOp::Sub => x.wrapping_sub(y),
                ArithOp::Mul => x.wrapping_mul(y),
                ArithOp::Div => x.wrapping_div(y),
                ArithOp::Rem => x.wrapping_rem(y),
                ArithOp::Neg => unreachable!(),
            }),
            (Value::Float(x), Value::Float(y)) => Value::Float(match op {
                ArithOp::Add => x + y,
                ArithOp::Sub => x - y,
                ArithOp::Mul => x * y,
                ArithOp::Div => x / y,
                ArithOp::Rem => x % y,
                ArithOp::Neg => unreachable!(),
            }),
            (Value::Double(x), Value::Double(y)) => Value::Double(match op {
                ArithOp::Add => x + y,
                ArithOp::Sub => x - y,
                ArithOp::Mul => x * y,
                ArithOp::Div => x / y,
                ArithOp::Rem => x % y,
                ArithOp::Neg => unreachable!(),
            }),
            other => panic!("{}: arith on {:?}", act.method, other),
        })
    }

    fn field(
        &mut self,
        act: &mut Activation<'_>,
        op: FieldOp,
        field: &FieldRef,
    ) -> Result<(), usize> {
        match op {
            FieldOp::GetStatic => {
                let value = if field.owner == RUNTIME_CLASS && field.name == EMPTY_PARAMS_FIELD {
                    assert_eq!(*field, RuntimeCall::empty_params_field());
                    self.empty_params()
                } else {
                    self.statics
                        .get(&(field.owner.clone(), field.name.clone()))
                        .copied()
                        .unwrap_or_else(|| default_value(&field.descriptor))
                };
                act.push(value);
            }
            FieldOp::PutStatic => {
                let value = act.pop();
                self.statics
                    .insert((field.owner.clone(), field.name.clone()), value);
            }
            FieldOp::GetField => {
                let id = self.non_null(act.pop_ref())?;
                let value = match &self.heap[id] {
                    Object::Instance { fields, .. } => fields
                        .get(&field.name)
                        .copied()
                        .unwrap_or_else(|| default_value(&field.descriptor)),
                    other => panic!("{}: getfield on {:?}", act.method, other),
                };
                act.push(value);
            }
            FieldOp::PutField => {
                let value = act.pop();
                let id = self.non_null(act.pop_ref())?;
                match &mut self.heap[id] {
                    Object::Instance { fields, .. } => {
                        fields.insert(field.name.clone(), value);
                    }
                    other => panic!("putfield on {:?}", other),
                }
            }
        }
        Ok(())
    }

    fn empty_params(&mut self) -> Value {
        let id = match self.empty_params {
            Some(id) => id,
            None => {
                let id = self.alloc(Object::Array {
                    element: "Ljava/lang/String;".to_string(),
                    items: Vec::new(),
                });
                self.empty_params = Some(id);
                id
            }
        };
        Value::Ref(id)
    }

    fn stack_handle(&mut self) -> Value {
        let id = match self.stack_handle {
            Some(id) => id,
            None => {
                let id = self.alloc(Object::StackHandle);
                self.stack_handle = Some(id);
                id
            }
        };
        Value::Ref(id)
    }

    fn invoke(
        &mut self,
        act: &mut Activation<'_>,
        kind: InvokeKind,
        method: &MethodRef,
    ) -> Result<Option<Value>, usize> {
        if let Some(call) = RuntimeCall::decode(method) {
            assert_eq!(kind, call.invoke_kind(), "{}: runtime call kind", act.method);
            return self.runtime_call(act, call);
        }

        let descriptor = exembellish::descriptor::MethodDescriptor::parse(&method.descriptor)
            .unwrap_or_else(|e| panic!("{}: {}", act.method, e));
        let mut args: Vec<Value> = (0..descriptor.params.len()).map(|_| act.pop()).collect();
        if kind != InvokeKind::Static {
            args.push(act.pop());
        }
        args.reverse();

        let class = match kind {
            InvokeKind::Static | InvokeKind::Special => method.owner.clone(),
            InvokeKind::Virtual | InvokeKind::Interface => match args[0] {
                Value::Ref(id) => self.class_of(id).to_string(),
                _ => return Err(self.raise("java/lang/NullPointerException", &method.name)),
            },
        };

        if let Some((unit, index)) = self.find_method(&class, &method.name, &method.descriptor) {
            return self.execute(&unit, index, args);
        }
        self.builtin(act, method, &args)
    }

    fn builtin(
        &mut self,
        act: &Activation<'_>,
        method: &MethodRef,
        args: &[Value],
    ) -> Result<Option<Value>, usize> {
        let receiver = args.first().copied();
        match (method.name.as_str(), method.descriptor.as_str()) {
            ("<init>", "()V") => Ok(None),
            ("<init>", "(Ljava/lang/String;)V") => {
                let text = self.string(args[1]).map(str::to_string);
                if let Some(Value::Ref(id)) = receiver {
                    if let Object::Throwable { message, .. } = &mut self.heap[id] {
                        *message = text;
                    }
                }
                Ok(None)
            }
            ("getMessage", "()Ljava/lang/String;") => {
                let id = self.non_null(match receiver {
                    Some(Value::Ref(id)) => Some(id),
                    _ => None,
                })?;
                let message = self.message_of(id).map(str::to_string);
                Ok(Some(match message {
                    Some(text) => self.new_string(&text),
                    None => Value::Null,
                }))
            }
            ("toString", "()Ljava/lang/String;") => {
                let text = self.generic_text(args[0])?;
                Ok(Some(self.new_string(&text)))
            }
            ("length", "()I") => {
                let text = self.string(args[0]).unwrap_or_default();
                Ok(Some(Value::Int(text.chars().count() as i32)))
            }
            ("concat", "(Ljava/lang/String;)Ljava/lang/String;") => {
                let joined = format!(
                    "{}{}",
                    self.string(args[0]).unwrap_or_default(),
                    self.string(args[1]).unwrap_or_default()
                );
                Ok(Some(self.new_string(&joined)))
            }
            _ => panic!(
                "{}: unknown method {}.{}{}",
                act.method, method.owner, method.name, method.descriptor
            ),
        }
    }

    fn runtime_call(
        &mut self,
        act: &mut Activation<'_>,
        call: RuntimeCall,
    ) -> Result<Option<Value>, usize> {
        match call {
            RuntimeCall::CurrentStack => Ok(Some(self.stack_handle())),
            RuntimeCall::Depth => {
                let handle = act.pop();
                assert_eq!(handle, self.stack_handle(), "{}: depth on foreign handle", act.method);
                Ok(Some(Value::Int(self.stack.depth() as i32)))
            }
            RuntimeCall::Push => {
                let params = act.pop();
                let method = act.pop();
                let owner = act.pop();
                let handle = act.pop();
                assert_eq!(handle, self.stack_handle(), "{}: push on foreign handle", act.method);
                let params = match params {
                    Value::Ref(id) => match &self.heap[id] {
                        Object::Array { items, .. } => items
                            .iter()
                            .map(|v| self.string(*v).unwrap_or("null").to_string())
                            .collect(),
                        other => panic!("{}: params {:?}", act.method, other),
                    },
                    other => panic!("{}: params {:?}", act.method, other),
                };
                let frame = Frame::new(
                    self.string(owner).unwrap_or_default(),
                    self.string(method).unwrap_or_default(),
                    params,
                );
                self.stack.push(frame);
                self.push_depths.push(self.stack.depth());
                Ok(None)
            }
            RuntimeCall::PopToDepth => {
                let depth = act.pop_int();
                self.stack.pop_to_depth(depth.max(0) as usize);
                Ok(None)
            }
            RuntimeCall::Embellish => {
                let Some(id) = act.pop_ref() else {
                    return Err(self.raise(FAILURE_CLASS, "null exception"));
                };
                let outcome = {
                    let mut target = HeapThrowable {
                        object: &mut self.heap[id],
                    };
                    self.stack.embellish(&mut target)
                };
                match outcome {
                    Ok(()) => Ok(None),
                    Err(e) => Err(self.raise(FAILURE_CLASS, &e.to_string())),
                }
            }
            RuntimeCall::FormatParam(format) => {
                let limit = act.pop_int();
                let value = act.pop();
                let name = act.pop();
                let name = self.string(name).unwrap_or_default().to_string();
                let arg = self.arg_value(format, value)?;
                let text = format_param(&name, &arg, limit.max(0) as usize);
                Ok(Some(self.new_string(&text)))
            }
        }
    }

    fn arg_value(&mut self, format: ParamFormat, value: Value) -> Result<ArgValue, usize> {
        Ok(match (format, value) {
            (ParamFormat::Bool, Value::Int(v)) => ArgValue::Bool(v != 0),
            (ParamFormat::Char, Value::Int(v)) => {
                ArgValue::Char(char::from_u32(v as u32).unwrap_or('?'))
            }
            (ParamFormat::Byte, Value::Int(v)) => ArgValue::Byte(v as i8),
            (ParamFormat::Short, Value::Int(v)) => ArgValue::Short(v as i16),
            (ParamFormat::Int, Value::Int(v)) => ArgValue::Int(v),
            (ParamFormat::Long, Value::Long(v)) => ArgValue::Long(v),
            (ParamFormat::Float, Value::Float(v)) => ArgValue::Float(v),
            (ParamFormat::Double, Value::Double(v)) => ArgValue::Double(v),
            (_, Value::Null) => ArgValue::Null,
            (ParamFormat::Object, v) => ArgValue::Text(self.generic_text(v)?),
            (ParamFormat::PrimitiveArray(element), Value::Ref(id)) => {
                let items = self.array_items(id);
                ArgValue::Array(items.into_iter().map(|v| primitive_arg(element, v)).collect())
            }
            (ParamFormat::ObjectArray, Value::Ref(id)) => {
                let items = self.array_items(id);
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(match item {
                        Value::Null => ArgValue::Null,
                        other => ArgValue::Text(self.generic_text(other)?),
                    });
                }
                ArgValue::Array(out)
            }
            (format, value) => panic!("formatParam {:?} with {:?}", format, value),
        })
    }

    fn array_items(&self, id: usize) -> Vec<Value> {
        match &self.heap[id] {
            Object::Array { items, .. } => items.clone(),
            other => panic!("expected array, found {:?}", other),
        }
    }

    /// Generic text of a reference; calls the unit's own stringification hook
    pub fn generic_text(&mut self, value: Value) -> Result<String, usize> {
        let id = match value {
            Value::Ref(id) => id,
            Value::Null => return Ok("null".to_string()),
            other => return Ok(format!("{:?}", other)),
        };
        match self.heap[id].clone() {
            Object::Str(s) => Ok(s),
            Object::Throwable { class, message } => Ok(match message {
                Some(m) => format!("{}: {}", dotted(&class), m),
                None => dotted(&class),
            }),
            Object::Array { element, .. } => Ok(format!("[{}@{}", element, id)),
            Object::StackHandle => Ok(format!("ShadowStack@{}", id)),
            Object::Instance { class, .. } => {
                match self.find_method(&class, "toString", "()Ljava/lang/String;") {
                    Some((unit, index)) => {
                        let text = self.execute(&unit, index, vec![value])?;
                        Ok(text
                            .and_then(|v| self.string(v).map(str::to_string))
                            .unwrap_or_else(|| "null".to_string()))
                    }
                    None => Ok(format!("{}@{}", dotted(&class), id)),
                }
            }
        }
    }
}

fn primitive_arg(element: PrimitiveElement, value: Value) -> ArgValue {
    match (element, value) {
        (PrimitiveElement::Bool, Value::Int(v)) => ArgValue::Bool(v != 0),
        (PrimitiveElement::Char, Value::Int(v)) => {
            ArgValue::Char(char::from_u32(v as u32).unwrap_or('?'))
        }
        (PrimitiveElement::Byte, Value::Int(v)) => ArgValue::Byte(v as i8),
        (PrimitiveElement::Short, Value::Int(v)) => ArgValue::Short(v as i16),
        (PrimitiveElement::Int, Value::Int(v)) => ArgValue::Int(v),
        (PrimitiveElement::Long, Value::Long(v)) => ArgValue::Long(v),
        (PrimitiveElement::Float, Value::Float(v)) => ArgValue::Float(v),
        (PrimitiveElement::Double, Value::Double(v)) => ArgValue::Double(v),
        (element, value) => panic!("{:?} element holding {:?}", element, value),
    }
}

fn compare(cmp: Cmp, a: i32, b: i32) -> bool {
    match cmp {
        Cmp::Eq => a == b,
        Cmp::Ne => a != b,
        Cmp::Lt => a < b,
        Cmp::Ge => a >= b,
        Cmp::Gt => a > b,
        Cmp::Le => a <= b,
    }
}

fn default_value(descriptor: &str) -> Value {
    match descriptor {
        "Z" | "C" | "B" | "S" | "I" => Value::Int(0),
        "J" => Value::Long(0),
        "F" => Value::Float(0.0),
        "D" => Value::Double(0.0),
        _ => Value::Null,
    }
}

// ============================================================================
// Unit construction shorthand
// ============================================================================

pub fn iload(slot: u16) -> Insn {
    Insn::Load { kind: ValueKind::Int, slot }
}

pub fn istore(slot: u16) -> Insn {
    Insn::Store { kind: ValueKind::Int, slot }
}

pub fn lload(slot: u16) -> Insn {
    Insn::Load { kind: ValueKind::Long, slot }
}

pub fn lstore(slot: u16) -> Insn {
    Insn::Store { kind: ValueKind::Long, slot }
}

pub fn dload(slot: u16) -> Insn {
    Insn::Load { kind: ValueKind::Double, slot }
}

pub fn aload(slot: u16) -> Insn {
    Insn::Load { kind: ValueKind::Ref, slot }
}

pub fn astore(slot: u16) -> Insn {
    Insn::Store { kind: ValueKind::Ref, slot }
}

pub fn iconst(v: i32) -> Insn {
    Insn::Const(Constant::Int(v))
}

pub fn sconst(s: &str) -> Insn {
    Insn::Const(Constant::Str(s.to_string()))
}

pub fn label(n: u32) -> Insn {
    Insn::Label(Label(n))
}

pub fn goto(n: u32) -> Insn {
    Insn::Jump { cond: JumpCond::Always, target: Label(n) }
}

pub fn if_zero(cmp: Cmp, n: u32) -> Insn {
    Insn::Jump { cond: JumpCond::Zero(cmp), target: Label(n) }
}

pub fn iop(op: ArithOp) -> Insn {
    Insn::Arith { op, kind: ValueKind::Int }
}

pub fn invoke_static(owner: &str, name: &str, descriptor: &str) -> Insn {
    Insn::Invoke { kind: InvokeKind::Static, method: MethodRef::new(owner, name, descriptor) }
}

pub fn invoke_special(owner: &str, name: &str, descriptor: &str) -> Insn {
    Insn::Invoke { kind: InvokeKind::Special, method: MethodRef::new(owner, name, descriptor) }
}

pub fn invoke_virtual(owner: &str, name: &str, descriptor: &str) -> Insn {
    Insn::Invoke { kind: InvokeKind::Virtual, method: MethodRef::new(owner, name, descriptor) }
}

/// `new class(message); athrow`
pub fn throw_new(class: &str, message: &str) -> Vec<Insn> {
    vec![
        Insn::New(class.to_string()),
        Insn::Dup,
        sconst(message),
        invoke_special(class, "<init>", "(Ljava/lang/String;)V"),
        Insn::Throw,
    ]
}

pub fn catch(start: u32, end: u32, handler: u32, catch_type: Option<&str>) -> Handler {
    Handler {
        start: Label(start),
        end: Label(end),
        handler: Label(handler),
        catch_type: catch_type.map(str::to_string),
    }
}

pub fn code(max_stack: u16, max_locals: u16, instructions: Vec<Insn>) -> Code {
    Code {
        max_stack,
        max_locals,
        instructions,
        handlers: Vec::new(),
        local_vars: Vec::new(),
    }
}

pub fn static_method(name: &str, descriptor: &str, code: Code) -> Method {
    Method {
        access: AccessFlags(AccessFlags::PUBLIC | AccessFlags::STATIC),
        name: name.to_string(),
        descriptor: descriptor.to_string(),
        parameter_names: Vec::new(),
        code: Some(code),
    }
}

pub fn instance_method(name: &str, descriptor: &str, code: Code) -> Method {
    Method {
        access: AccessFlags(AccessFlags::PUBLIC),
        name: name.to_string(),
        descriptor: descriptor.to_string(),
        parameter_names: Vec::new(),
        code: Some(code),
    }
}

/// `<init>()V` delegating to `java/lang/Object`
pub fn default_constructor() -> Method {
    instance_method(
        "<init>",
        "()V",
        code(
            1,
            1,
            vec![
                aload(0),
                invoke_special("java/lang/Object", "<init>", "()V"),
                Insn::Return(None),
            ],
        ),
    )
}

pub fn unit(name: &str, methods: Vec<Method>) -> Unit {
    Unit {
        name: name.to_string(),
        super_name: Some("java/lang/Object".to_string()),
        source_file: None,
        methods,
    }
}

/// Run a unit through the engine as a load hook would
pub fn instrument_with(unit: &Unit, options: AgentOptions) -> Unit {
    let bytes = MsgPackCodec.encode(unit).expect("encode");
    let engine = Embellisher::new(options);
    let out = engine.transform(&unit.name, &bytes).expect("transform");
    MsgPackCodec.decode(&out).expect("decode")
}

pub fn instrument(unit: &Unit) -> Unit {
    instrument_with(unit, AgentOptions::all())
}

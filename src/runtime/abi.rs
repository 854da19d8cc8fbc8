//! Symbolic entry points called by instrumented code
//!
//! Rewritten method bodies reference the runtime through these
//! owner/name/descriptor triples. A host binds them to [`crate::runtime`]
//! (or to its own per-logical-thread [`crate::runtime::ShadowStack`]) by
//! decoding each invocation with [`RuntimeCall::decode`].

use crate::descriptor::TypeTag;
use crate::unit::{FieldRef, InvokeKind, MethodRef};

/// Namespace reserved for the engine; units inside it are never rewritten
pub const ENGINE_NAMESPACE: &str = "exembellish";

/// Owner of the static runtime entry points
pub const RUNTIME_CLASS: &str = "exembellish/runtime/Runtime";
/// Owner of the per-thread stack handle methods
pub const STACK_CLASS: &str = "exembellish/runtime/ShadowStack";
/// Type of the failure raised when a message cannot be enriched
pub const FAILURE_CLASS: &str = "exembellish/runtime/EmbellishFailure";

pub const STRING_CLASS: &str = "java/lang/String";
pub const OBJECT_CLASS: &str = "java/lang/Object";
pub const THROWABLE_CLASS: &str = "java/lang/Throwable";

/// Shared empty parameter sequence used by zero-parameter methods
pub const EMPTY_PARAMS_FIELD: &str = "EMPTY_PARAMS";

const CURRENT_NAME: &str = "current";
const DEPTH_NAME: &str = "depth";
const PUSH_NAME: &str = "push";
const POP_TO_DEPTH_NAME: &str = "popToDepth";
const EMBELLISH_NAME: &str = "embellish";
const FORMAT_PARAM_NAME: &str = "formatParam";

/// One runtime operation reachable from instrumented code
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeCall {
    /// `() -> ShadowStack`: the calling thread's stack handle
    CurrentStack,
    /// `ShadowStack.depth() -> int`
    Depth,
    /// `ShadowStack.push(owner, method, params[])`
    Push,
    /// `popToDepth(int)`
    PopToDepth,
    /// `embellish(Throwable)`; may raise [`FAILURE_CLASS`]
    Embellish,
    /// `formatParam(name, value, limit) -> String` for the given format
    FormatParam(ParamFormat),
}

/// Argument formatting selected from a parameter's declared type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamFormat {
    Bool,
    Char,
    Byte,
    Short,
    Int,
    Long,
    Float,
    Double,
    /// Generic text of any reference
    Object,
    /// Array with elements of the given primitive format
    PrimitiveArray(PrimitiveElement),
    /// Array of references or nested arrays; elements use generic text
    ObjectArray,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveElement {
    Bool,
    Char,
    Byte,
    Short,
    Int,
    Long,
    Float,
    Double,
}

impl PrimitiveElement {
    fn descriptor_char(self) -> char {
        match self {
            PrimitiveElement::Bool => 'Z',
            PrimitiveElement::Char => 'C',
            PrimitiveElement::Byte => 'B',
            PrimitiveElement::Short => 'S',
            PrimitiveElement::Int => 'I',
            PrimitiveElement::Long => 'J',
            PrimitiveElement::Float => 'F',
            PrimitiveElement::Double => 'D',
        }
    }

    fn from_tag(tag: &TypeTag) -> Option<Self> {
        Some(match tag {
            TypeTag::Bool => PrimitiveElement::Bool,
            TypeTag::Char => PrimitiveElement::Char,
            TypeTag::Byte => PrimitiveElement::Byte,
            TypeTag::Short => PrimitiveElement::Short,
            TypeTag::Int => PrimitiveElement::Int,
            TypeTag::Long => PrimitiveElement::Long,
            TypeTag::Float => PrimitiveElement::Float,
            TypeTag::Double => PrimitiveElement::Double,
            TypeTag::Object(_) | TypeTag::Array(_) => return None,
        })
    }
}

impl ParamFormat {
    /// Formatting used for a parameter of the given declared type
    pub fn for_tag(tag: &TypeTag) -> Self {
        match tag {
            TypeTag::Bool => ParamFormat::Bool,
            TypeTag::Char => ParamFormat::Char,
            TypeTag::Byte => ParamFormat::Byte,
            TypeTag::Short => ParamFormat::Short,
            TypeTag::Int => ParamFormat::Int,
            TypeTag::Long => ParamFormat::Long,
            TypeTag::Float => ParamFormat::Float,
            TypeTag::Double => ParamFormat::Double,
            TypeTag::Object(_) => ParamFormat::Object,
            TypeTag::Array(element) => match PrimitiveElement::from_tag(element) {
                Some(primitive) => ParamFormat::PrimitiveArray(primitive),
                None => ParamFormat::ObjectArray,
            },
        }
    }

    /// Field descriptor of the value operand
    pub fn value_descriptor(self) -> String {
        match self {
            ParamFormat::Bool => "Z".to_string(),
            ParamFormat::Char => "C".to_string(),
            ParamFormat::Byte => "B".to_string(),
            ParamFormat::Short => "S".to_string(),
            ParamFormat::Int => "I".to_string(),
            ParamFormat::Long => "J".to_string(),
            ParamFormat::Float => "F".to_string(),
            ParamFormat::Double => "D".to_string(),
            ParamFormat::Object => format!("L{};", OBJECT_CLASS),
            ParamFormat::PrimitiveArray(element) => format!("[{}", element.descriptor_char()),
            ParamFormat::ObjectArray => format!("[L{};", OBJECT_CLASS),
        }
    }

    fn from_value_descriptor(descriptor: &str) -> Option<Self> {
        let format = match TypeTag::parse(descriptor).ok()? {
            TypeTag::Object(name) if name == OBJECT_CLASS => ParamFormat::Object,
            TypeTag::Array(element) => match *element {
                TypeTag::Object(name) if name == OBJECT_CLASS => ParamFormat::ObjectArray,
                other => ParamFormat::PrimitiveArray(PrimitiveElement::from_tag(&other)?),
            },
            TypeTag::Object(_) => return None,
            primitive => ParamFormat::for_tag(&primitive),
        };
        Some(format)
    }
}

fn string_array_descriptor() -> String {
    format!("[L{};", STRING_CLASS)
}

impl RuntimeCall {
    /// How the call is issued from instrumented code
    pub fn invoke_kind(&self) -> InvokeKind {
        match self {
            RuntimeCall::Depth | RuntimeCall::Push => InvokeKind::Virtual,
            _ => InvokeKind::Static,
        }
    }

    /// Symbolic method reference emitted into rewritten code
    pub fn method_ref(&self) -> MethodRef {
        match self {
            RuntimeCall::CurrentStack => {
                MethodRef::new(RUNTIME_CLASS, CURRENT_NAME, format!("()L{};", STACK_CLASS))
            }
            RuntimeCall::Depth => MethodRef::new(STACK_CLASS, DEPTH_NAME, "()I"),
            RuntimeCall::Push => MethodRef::new(
                STACK_CLASS,
                PUSH_NAME,
                format!(
                    "(L{s};L{s};{})V",
                    string_array_descriptor(),
                    s = STRING_CLASS
                ),
            ),
            RuntimeCall::PopToDepth => MethodRef::new(RUNTIME_CLASS, POP_TO_DEPTH_NAME, "(I)V"),
            RuntimeCall::Embellish => MethodRef::new(
                RUNTIME_CLASS,
                EMBELLISH_NAME,
                format!("(L{};)V", THROWABLE_CLASS),
            ),
            RuntimeCall::FormatParam(format) => MethodRef::new(
                RUNTIME_CLASS,
                FORMAT_PARAM_NAME,
                format!(
                    "(L{s};{}I)L{s};",
                    format.value_descriptor(),
                    s = STRING_CLASS
                ),
            ),
        }
    }

    /// Recognize an invocation of a runtime entry point
    pub fn decode(method: &MethodRef) -> Option<Self> {
        let call = match (method.owner.as_str(), method.name.as_str()) {
            (RUNTIME_CLASS, CURRENT_NAME) => RuntimeCall::CurrentStack,
            (STACK_CLASS, DEPTH_NAME) => RuntimeCall::Depth,
            (STACK_CLASS, PUSH_NAME) => RuntimeCall::Push,
            (RUNTIME_CLASS, POP_TO_DEPTH_NAME) => RuntimeCall::PopToDepth,
            (RUNTIME_CLASS, EMBELLISH_NAME) => RuntimeCall::Embellish,
            (RUNTIME_CLASS, FORMAT_PARAM_NAME) => {
                let rest = method
                    .descriptor
                    .strip_prefix(&format!("(L{};", STRING_CLASS))?;
                let value = rest.strip_suffix(&format!("I)L{};", STRING_CLASS))?;
                RuntimeCall::FormatParam(ParamFormat::from_value_descriptor(value)?)
            }
            _ => return None,
        };
        (call.method_ref() == *method).then_some(call)
    }

    /// Static field holding the shared empty parameter sequence
    pub fn empty_params_field() -> FieldRef {
        FieldRef::new(RUNTIME_CLASS, EMPTY_PARAMS_FIELD, string_array_descriptor())
    }
}

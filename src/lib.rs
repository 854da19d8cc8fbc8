//! exembellish - exception messages that carry the call history
//!
//! Rewrites compiled method bodies so every instrumented call pushes a frame
//! (owner, method, formatted arguments) onto a per-thread shadow stack. When
//! an instrumented method throws, the exception message is extended with the
//! active frames, most recent first.
//!
//! The load-time side is [`transformer::Embellisher`]; the run-time side that
//! rewritten code calls into is [`runtime`].

pub mod cli;
pub mod codec;
pub mod descriptor;
pub mod disasm;
pub mod dispatcher;
pub mod dump;
pub mod instrument;
pub mod options;
pub mod runtime;
pub mod transformer;
pub mod unit;

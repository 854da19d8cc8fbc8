//! Method transformer: shadow stack bookkeeping for one method body
//!
//! Rewriting happens in two passes. [`analysis`] inspects the body and
//! produces a [`MethodLayout`]; [`rewrite`] applies it. The rewritten body:
//!
//! - pushes a frame (owner, method, formatted arguments) on entry, after the
//!   delegating call for constructors
//! - pops back to the entry depth before every return
//! - enriches the exception message and pops to depth before every throw
//! - pops to depth on any other exceptional exit via a method-wide guard
//!
//! Slots from the first one past the parameters shift up by two to make room
//! for the exception and depth temporaries.

pub mod analysis;
pub mod builder;
pub mod rewrite;

pub use analysis::{EntryPoint, MethodLayout, Parm, SlotShift};
pub use builder::InsnBuilder;

use crate::descriptor::DescriptorError;
use crate::unit::{Code, CONSTRUCTOR_NAME};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum InstrumentError {
    #[error("method {method}: bad descriptor: {source}")]
    Descriptor {
        method: String,
        #[source]
        source: DescriptorError,
    },

    #[error("method {method}: needs {needed} local slots, more than the slot space allows")]
    SlotOverflow { method: String, needed: u32 },

    #[error("method {method}: needs an operand stack of {needed}, more than allowed")]
    StackOverflow { method: String, needed: u32 },

    #[error("method {method}: label space exhausted")]
    LabelOverflow { method: String },

    #[error("constructor {method}: no delegating constructor call")]
    MissingDelegation { method: String },
}

/// Rewrites one method, built per method by the dispatcher
#[derive(Debug, Clone)]
pub struct MethodTransformer {
    pub(crate) owner: String,
    pub(crate) method_name: String,
    pub(crate) is_static: bool,
    pub(crate) descriptor: String,
    pub(crate) parm_size_limit: usize,
    pub(crate) parameter_names: Vec<Option<String>>,
}

impl MethodTransformer {
    /// `owner` is the dotted unit name recorded in frames
    pub fn new(
        owner: impl Into<String>,
        method_name: impl Into<String>,
        is_static: bool,
        descriptor: impl Into<String>,
        parm_size_limit: usize,
    ) -> Self {
        Self {
            owner: owner.into(),
            method_name: method_name.into(),
            is_static,
            descriptor: descriptor.into(),
            parm_size_limit,
            parameter_names: Vec::new(),
        }
    }

    /// Declared parameter names, in parameter order
    pub fn with_parameter_names(mut self, names: Vec<Option<String>>) -> Self {
        self.parameter_names = names;
        self
    }

    pub fn is_constructor(&self) -> bool {
        !self.is_static && self.method_name == CONSTRUCTOR_NAME
    }

    pub fn analyze(&self, code: &Code) -> Result<MethodLayout, InstrumentError> {
        analysis::analyze(self, code)
    }

    /// Rewrite `code` in place; on error it is left untouched
    pub fn transform(&self, code: &mut Code) -> Result<MethodLayout, InstrumentError> {
        let layout = self.analyze(code)?;
        *code = rewrite::rewrite(code, &layout);
        tracing::debug!(
            "instrumented {}.{}{}: {} parms, {} returns, {} throws",
            self.owner,
            self.method_name,
            self.descriptor,
            layout.parms.len(),
            layout.return_sites.len(),
            layout.throw_sites.len()
        );
        Ok(layout)
    }
}

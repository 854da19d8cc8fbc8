//! Shadow call stack runtime support
//!
//! Instrumented code reports every entry and exit of an instrumented method
//! here. The stack mirrors the real call stack of one thread of execution and
//! is consulted when an exception is thrown, so the exception message can list
//! the instrumented frames (with formatted arguments) that were active.
//!
//! [`ShadowStack`] is the explicit per-thread context object. Hosts that run
//! several logical threads on one OS thread keep one `ShadowStack` per logical
//! thread themselves; everybody else goes through the thread-keyed service
//! functions ([`push`], [`pop_to_depth`], [`depth`], [`embellish`]), which
//! lazily create the calling thread's stack on first use.

pub mod abi;
pub mod format;
pub mod message;

use std::cell::RefCell;
use std::fmt;

pub use format::{format_param, truncate, ArgValue};
pub use message::{EmbellishError, Enrichable, MutableMessage};

/// Recorded identity and formatted arguments of one active instrumented call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    owner: String,
    method: String,
    params: Vec<String>,
}

impl Frame {
    /// `params` holds already formatted `name: value` entries
    pub fn new(owner: impl Into<String>, method: impl Into<String>, params: Vec<String>) -> Self {
        Self {
            owner: owner.into(),
            method: method.into(),
            params,
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn params(&self) -> &[String] {
        &self.params
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}({})", self.owner, self.method, self.params.join(", "))
    }
}

/// Ordered sequence of frames for one thread of execution
#[derive(Debug, Default, Clone)]
pub struct ShadowStack {
    frames: Vec<Frame>,
}

impl ShadowStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of frames currently recorded
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Frames, oldest first
    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn push(&mut self, frame: Frame) {
        self.frames.push(frame);
    }

    /// Discard the newest frames until at most `depth` remain
    ///
    /// No-op when the stack is already at or below `depth`.
    pub fn pop_to_depth(&mut self, depth: usize) {
        self.frames.truncate(depth);
    }

    /// Render the active frames, most recent first, one per line
    pub fn render(&self) -> String {
        self.frames
            .iter()
            .rev()
            .map(Frame::to_string)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Append the active frames to the exception's message
    ///
    /// The result is the original message followed by one line per frame,
    /// most recent first. An exception without a message gets the frame
    /// lines alone. Only the message changes; the exception itself is left
    /// as it was.
    pub fn embellish(&self, target: &mut dyn MutableMessage) -> Result<(), EmbellishError> {
        let mut message = target
            .message()
            .map(|m| m.into_owned())
            .unwrap_or_default();
        for frame in self.frames.iter().rev() {
            if !message.is_empty() {
                message.push('\n');
            }
            message.push_str(&frame.to_string());
        }
        target.replace_message(message)
    }
}

thread_local! {
    static CURRENT: RefCell<ShadowStack> = RefCell::new(ShadowStack::new());
}

/// Run `f` against the calling thread's stack, creating it on first use
///
/// Returns `None` only while the thread is being torn down.
pub fn with_current<R>(f: impl FnOnce(&mut ShadowStack) -> R) -> Option<R> {
    CURRENT
        .try_with(|cell| cell.try_borrow_mut().ok().map(|mut stack| f(&mut stack)))
        .ok()
        .flatten()
}

/// Append a frame to the calling thread's stack
pub fn push(frame: Frame) {
    with_current(|stack| stack.push(frame));
}

/// Truncate the calling thread's stack to `depth` frames
///
/// Negative depths empty the stack.
pub fn pop_to_depth(depth: i32) {
    let depth = usize::try_from(depth).unwrap_or(0);
    with_current(|stack| stack.pop_to_depth(depth));
}

/// Current size of the calling thread's stack
pub fn depth() -> i32 {
    with_current(|stack| stack.depth())
        .map(|d| i32::try_from(d).unwrap_or(i32::MAX))
        .unwrap_or(0)
}

/// Enrich `target` with the calling thread's active frames
pub fn embellish(target: &mut dyn MutableMessage) -> Result<(), EmbellishError> {
    with_current(|stack| stack.embellish(target)).unwrap_or(Ok(()))
}

/// Snapshot of the calling thread's frames, oldest first
pub fn snapshot() -> Vec<Frame> {
    with_current(|stack| stack.frames().to_vec()).unwrap_or_default()
}

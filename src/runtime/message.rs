//! Message capability for exceptions
//!
//! Enrichment only ever replaces message text. Exception representations opt
//! in by implementing [`MutableMessage`]; representations that cannot be
//! mutated can be wrapped in [`Enrichable`] at the boundary instead.

use std::borrow::Cow;
use std::error::Error;
use std::fmt;
use thiserror::Error;

/// Errors raised while enriching an exception message
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EmbellishError {
    #[error("{type_name} does not expose a mutable message")]
    ImmutableMessage { type_name: String },
}

/// An exception whose message text can be read and replaced
pub trait MutableMessage {
    fn message(&self) -> Option<Cow<'_, str>>;

    /// Replace the message text
    ///
    /// Implementations with a fixed message return
    /// [`EmbellishError::ImmutableMessage`] and leave themselves unchanged.
    fn replace_message(&mut self, message: String) -> Result<(), EmbellishError>;
}

/// Decorator that gives any error a replaceable message
///
/// Until a message is set the wrapper displays exactly like the wrapped
/// error. `source()` is forwarded, so the cause chain is untouched.
#[derive(Debug)]
pub struct Enrichable<E> {
    inner: E,
    message: Option<String>,
}

impl<E> Enrichable<E> {
    pub fn new(inner: E) -> Self {
        Self {
            inner,
            message: None,
        }
    }

    pub fn get_ref(&self) -> &E {
        &self.inner
    }

    pub fn into_inner(self) -> E {
        self.inner
    }

    pub fn is_enriched(&self) -> bool {
        self.message.is_some()
    }
}

impl<E: fmt::Display> fmt::Display for Enrichable<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(message) => f.write_str(message),
            None => self.inner.fmt(f),
        }
    }
}

impl<E: Error> Error for Enrichable<E> {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.inner.source()
    }
}

impl<E: fmt::Display> MutableMessage for Enrichable<E> {
    fn message(&self) -> Option<Cow<'_, str>> {
        match &self.message {
            Some(message) => Some(Cow::Borrowed(message.as_str())),
            None => Some(Cow::Owned(self.inner.to_string())),
        }
    }

    fn replace_message(&mut self, message: String) -> Result<(), EmbellishError> {
        self.message = Some(message);
        Ok(())
    }
}

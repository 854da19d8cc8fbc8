//! Engine entry point registered with the load hook
//!
//! `transform(unit_name, bytes)` hands back the input untouched for reserved
//! namespaces and filtered-out units, and rewritten bytes otherwise.

use crate::codec::{CodecError, MsgPackCodec, UnitCodec};
use crate::dispatcher::{DispatchReport, ExclusionRule, UnitDispatcher};
use crate::dump::DebugDump;
use crate::instrument::InstrumentError;
use crate::options::AgentOptions;
use crate::runtime::abi::ENGINE_NAMESPACE;
use crate::unit::{dotted, Unit};
use std::borrow::Cow;
use thiserror::Error;

/// Platform namespaces that are never rewritten (dotted prefixes)
pub const PLATFORM_NAMESPACES: &[&str] = &["java.", "javax.", "sun."];

#[derive(Error, Debug)]
pub enum TransformError {
    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("unit {unit}: {source}")]
    Instrument {
        unit: String,
        #[source]
        source: InstrumentError,
    },

    #[error("unit name mismatch: loading {expected}, container holds {found}")]
    NameMismatch { expected: String, found: String },
}

/// Contract between the load hook and the engine
pub trait UnitTransformer {
    /// Returns `bytes` itself when the unit is left alone
    fn transform<'a>(&self, unit_name: &str, bytes: &'a [u8])
        -> Result<Cow<'a, [u8]>, TransformError>;

    /// Fail-open variant: any error yields the original bytes
    fn transform_or_passthrough<'a>(&self, unit_name: &str, bytes: &'a [u8]) -> Cow<'a, [u8]> {
        match self.transform(unit_name, bytes) {
            Ok(out) => out,
            Err(e) => {
                tracing::warn!("leaving {} unmodified: {}", unit_name, e);
                Cow::Borrowed(bytes)
            }
        }
    }
}

/// Whether a unit lives in a namespace the engine must not touch
pub fn is_reserved(unit_name: &str) -> bool {
    let name = dotted(unit_name);
    let engine_prefix = format!("{}.", ENGINE_NAMESPACE);
    PLATFORM_NAMESPACES
        .iter()
        .any(|prefix| name.starts_with(prefix))
        || name.starts_with(&engine_prefix)
}

pub struct Embellisher {
    options: AgentOptions,
    dispatcher: UnitDispatcher,
    codec: Box<dyn UnitCodec>,
    dump: Option<DebugDump>,
}

impl std::fmt::Debug for Embellisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Embellisher")
            .field("options", &self.options)
            .field("dispatcher", &self.dispatcher)
            .field("dump", &self.dump)
            .finish_non_exhaustive()
    }
}

impl Embellisher {
    /// Engine reading and writing MessagePack containers
    pub fn new(options: AgentOptions) -> Self {
        let dispatcher = UnitDispatcher::new(options.parm_size_limit());
        Self {
            options,
            dispatcher,
            codec: Box::new(MsgPackCodec),
            dump: None,
        }
    }

    pub fn with_codec(mut self, codec: Box<dyn UnitCodec>) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_dump(mut self, dump: DebugDump) -> Self {
        self.dump = Some(dump);
        self
    }

    pub fn with_exclusion(mut self, rule: ExclusionRule) -> Self {
        self.dispatcher = self.dispatcher.with_exclusion(rule);
        self
    }

    pub fn options(&self) -> &AgentOptions {
        &self.options
    }

    pub fn codec(&self) -> &dyn UnitCodec {
        self.codec.as_ref()
    }

    /// Reserved-namespace check plus the configured filter
    pub fn accepts(&self, unit_name: &str) -> bool {
        !is_reserved(unit_name) && self.options.should_instrument(&dotted(unit_name))
    }

    /// Instrument a decoded unit in place
    ///
    /// Returns `None` when the unit is not accepted. On error the unit is
    /// left unmodified.
    pub fn transform_unit(
        &self,
        unit: &mut Unit,
    ) -> Result<Option<DispatchReport>, TransformError> {
        if !self.accepts(&unit.name) {
            tracing::debug!("not instrumenting {}", unit.dotted_name());
            return Ok(None);
        }
        self.dispatcher
            .dispatch(unit)
            .map(|report| {
                tracing::debug!("{}: {}", unit.dotted_name(), report);
                Some(report)
            })
            .map_err(|source| TransformError::Instrument {
                unit: unit.dotted_name(),
                source,
            })
    }
}

impl UnitTransformer for Embellisher {
    fn transform<'a>(
        &self,
        unit_name: &str,
        bytes: &'a [u8],
    ) -> Result<Cow<'a, [u8]>, TransformError> {
        self.transform_with_report(unit_name, bytes)
            .map(|outcome| outcome.bytes)
    }
}

/// Result of one `transform` call
#[derive(Debug)]
pub struct Transformed<'a> {
    pub bytes: Cow<'a, [u8]>,
    /// `None` when the unit was not accepted
    pub report: Option<DispatchReport>,
}

impl Transformed<'_> {
    pub fn is_rewritten(&self) -> bool {
        matches!(self.bytes, Cow::Owned(_))
    }
}

impl Embellisher {
    /// `transform` that also reports what happened to each method
    pub fn transform_with_report<'a>(
        &self,
        unit_name: &str,
        bytes: &'a [u8],
    ) -> Result<Transformed<'a>, TransformError> {
        if !self.accepts(unit_name) {
            tracing::debug!("not instrumenting {}", dotted(unit_name));
            return Ok(Transformed {
                bytes: Cow::Borrowed(bytes),
                report: None,
            });
        }

        let mut unit = self.codec.decode(bytes)?;
        if unit.dotted_name() != dotted(unit_name) {
            return Err(TransformError::NameMismatch {
                expected: dotted(unit_name),
                found: unit.dotted_name(),
            });
        }

        let report = self.transform_unit(&mut unit)?;
        let changed = report.as_ref().is_some_and(|r| !r.is_unchanged());
        if !changed {
            return Ok(Transformed {
                bytes: Cow::Borrowed(bytes),
                report,
            });
        }

        let rewritten = self.codec.encode(&unit)?;
        if let Some(dump) = &self.dump {
            dump.write(&unit.name, &rewritten);
        }
        Ok(Transformed {
            bytes: Cow::Owned(rewritten),
            report,
        })
    }
}

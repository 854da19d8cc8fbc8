//! Unit dispatcher: walks a unit's methods and instruments each one
//!
//! Skip decisions come from an explicit exclusion table keyed by
//! (name, descriptor). The argument stringification hook is always in the
//! table: instrumenting it would push frames while formatting frames.

use crate::instrument::{InstrumentError, MethodTransformer};
use crate::unit::{Code, Method, Unit};
use std::fmt;

/// Name of the generic stringification hook
pub const STRINGIFY_NAME: &str = "toString";
/// Descriptor of the generic stringification hook
pub const STRINGIFY_DESCRIPTOR: &str = "()Ljava/lang/String;";

/// Why a method is kept out of instrumentation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExclusionTag {
    /// Called while formatting arguments; would recurse
    StringificationHook,
    /// Excluded by the host, with its reason
    Host(String),
}

impl fmt::Display for ExclusionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExclusionTag::StringificationHook => f.write_str("stringification hook"),
            ExclusionTag::Host(reason) => write!(f, "host exclusion ({})", reason),
        }
    }
}

/// One row of the exclusion table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExclusionRule {
    pub name: String,
    pub descriptor: String,
    pub tag: ExclusionTag,
}

impl ExclusionRule {
    pub fn new(name: impl Into<String>, descriptor: impl Into<String>, tag: ExclusionTag) -> Self {
        Self {
            name: name.into(),
            descriptor: descriptor.into(),
            tag,
        }
    }

    fn matches(&self, method: &Method) -> bool {
        self.name == method.name && self.descriptor == method.descriptor
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Abstract or native
    NoCode,
    Excluded(ExclusionTag),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::NoCode => f.write_str("no code"),
            SkipReason::Excluded(tag) => write!(f, "excluded: {}", tag),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MethodDecision {
    Instrument,
    Skip(SkipReason),
}

/// What happened to each method of a unit
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// `name` + `descriptor` of every instrumented method
    pub instrumented: Vec<String>,
    pub skipped: Vec<(String, SkipReason)>,
}

impl DispatchReport {
    pub fn instrumented_count(&self) -> usize {
        self.instrumented.len()
    }

    pub fn skipped_count(&self) -> usize {
        self.skipped.len()
    }

    pub fn is_unchanged(&self) -> bool {
        self.instrumented.is_empty()
    }
}

impl fmt::Display for DispatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} instrumented, {} skipped",
            self.instrumented_count(),
            self.skipped_count()
        )
    }
}

#[derive(Debug, Clone)]
pub struct UnitDispatcher {
    parm_size_limit: usize,
    exclusions: Vec<ExclusionRule>,
}

impl Default for UnitDispatcher {
    fn default() -> Self {
        Self::new(0)
    }
}

impl UnitDispatcher {
    /// Dispatcher with the built-in exclusion table
    pub fn new(parm_size_limit: usize) -> Self {
        Self {
            parm_size_limit,
            exclusions: vec![ExclusionRule::new(
                STRINGIFY_NAME,
                STRINGIFY_DESCRIPTOR,
                ExclusionTag::StringificationHook,
            )],
        }
    }

    pub fn with_exclusion(mut self, rule: ExclusionRule) -> Self {
        self.exclusions.push(rule);
        self
    }

    pub fn exclusions(&self) -> &[ExclusionRule] {
        &self.exclusions
    }

    pub fn decide(&self, method: &Method) -> MethodDecision {
        if let Some(rule) = self.exclusions.iter().find(|r| r.matches(method)) {
            return MethodDecision::Skip(SkipReason::Excluded(rule.tag.clone()));
        }
        if method.code.is_none() {
            return MethodDecision::Skip(SkipReason::NoCode);
        }
        MethodDecision::Instrument
    }

    /// Instrument every eligible method of `unit`
    ///
    /// All or nothing: on error no method of the unit is modified.
    pub fn dispatch(&self, unit: &mut Unit) -> Result<DispatchReport, InstrumentError> {
        let owner = unit.dotted_name();
        let mut report = DispatchReport::default();
        let mut rewritten: Vec<(usize, Code)> = Vec::new();

        for (index, method) in unit.methods.iter().enumerate() {
            let key = format!("{}{}", method.name, method.descriptor);
            match (self.decide(method), &method.code) {
                (MethodDecision::Instrument, Some(code)) => {
                    let transformer = MethodTransformer::new(
                        owner.as_str(),
                        method.name.as_str(),
                        method.access.is_static(),
                        method.descriptor.as_str(),
                        self.parm_size_limit,
                    )
                    .with_parameter_names(method.parameter_names.clone());
                    let mut code = code.clone();
                    transformer.transform(&mut code)?;
                    rewritten.push((index, code));
                    report.instrumented.push(key);
                }
                (MethodDecision::Skip(reason), _) => {
                    tracing::debug!("{}: skipping {} ({})", owner, key, reason);
                    report.skipped.push((key, reason));
                }
                (MethodDecision::Instrument, None) => {
                    report.skipped.push((key, SkipReason::NoCode));
                }
            }
        }

        for (index, code) in rewritten {
            unit.methods[index].code = Some(code);
        }

        tracing::debug!("{}: {}", owner, report);
        Ok(report)
    }
}

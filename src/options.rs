//! Agent options: unit filtering and argument length cap
//!
//! Parses the agent argument string `key1=val1;key2=val2;...`. Recognized keys:
//! - `inclusion_pattern`: regex a unit name must match to be instrumented
//! - `exclusion_pattern`: regex that excludes matching units (wins over inclusion)
//! - `parm_size_limit`: max characters per formatted argument (0 = unlimited)
//!
//! Parsing never fails. Malformed entries are dropped one by one and the rest
//! still apply.

use regex::Regex;
use std::fmt;

const EXCLUSION_PATTERN_NAME: &str = "exclusion_pattern";
const INCLUSION_PATTERN_NAME: &str = "inclusion_pattern";
const PARM_SIZE_LIMIT_NAME: &str = "parm_size_limit";

/// Compiled pattern that must match the whole unit name
#[derive(Debug, Clone)]
struct UnitPattern {
    source: String,
    regex: Regex,
}

impl UnitPattern {
    fn compile(source: &str) -> Result<Self, regex::Error> {
        let regex = Regex::new(&format!("^(?:{})$", source))?;
        Ok(Self {
            source: source.to_string(),
            regex,
        })
    }

    fn matches(&self, unit_name: &str) -> bool {
        self.regex.is_match(unit_name)
    }
}

/// Immutable filter configuration built once at startup
#[derive(Debug, Clone, Default)]
pub struct AgentOptions {
    inclusion: Option<UnitPattern>,
    exclusion: Option<UnitPattern>,
    parm_size_limit: usize,
}

impl AgentOptions {
    /// Options that instrument everything with no length cap
    pub fn all() -> Self {
        Self::default()
    }

    /// Parse an agent argument string; `None` yields the defaults
    pub fn parse(args: Option<&str>) -> Self {
        let mut options = Self::default();
        let Some(args) = args else {
            return options;
        };

        for entry in args.split(';') {
            let entry = entry.trim();
            if entry.is_empty() {
                continue;
            }
            if let Err(reason) = options.apply(entry) {
                tracing::debug!("ignoring agent option `{}`: {}", entry, reason);
            }
        }

        options
    }

    fn apply(&mut self, entry: &str) -> Result<(), String> {
        let (key, value) = entry
            .split_once('=')
            .ok_or_else(|| "expected key=value".to_string())?;
        let key = key.trim();
        let value = value.trim();

        match key {
            EXCLUSION_PATTERN_NAME => {
                self.exclusion = Some(UnitPattern::compile(value).map_err(|e| e.to_string())?);
            }
            INCLUSION_PATTERN_NAME => {
                self.inclusion = Some(UnitPattern::compile(value).map_err(|e| e.to_string())?);
            }
            PARM_SIZE_LIMIT_NAME => {
                self.parm_size_limit = value
                    .parse::<usize>()
                    .map_err(|e| format!("invalid limit: {}", e))?;
            }
            _ => tracing::debug!("unknown agent option `{}`", key),
        }
        Ok(())
    }

    /// Builder-style setter for the argument length cap
    pub fn with_parm_size_limit(mut self, limit: usize) -> Self {
        self.parm_size_limit = limit;
        self
    }

    /// Decide whether a unit (dotted name) should be instrumented
    ///
    /// Exclusion dominates; with no inclusion pattern everything else passes.
    pub fn should_instrument(&self, unit_name: &str) -> bool {
        if let Some(exclusion) = &self.exclusion {
            if exclusion.matches(unit_name) {
                return false;
            }
        }

        match &self.inclusion {
            Some(inclusion) => inclusion.matches(unit_name),
            None => true,
        }
    }

    /// Max characters per formatted argument; 0 = unlimited
    pub fn parm_size_limit(&self) -> usize {
        self.parm_size_limit
    }

    pub fn inclusion_pattern(&self) -> Option<&str> {
        self.inclusion.as_ref().map(|p| p.source.as_str())
    }

    pub fn exclusion_pattern(&self) -> Option<&str> {
        self.exclusion.as_ref().map(|p| p.source.as_str())
    }
}

impl fmt::Display for AgentOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if let Some(pattern) = self.inclusion_pattern() {
            parts.push(format!("{}={}", INCLUSION_PATTERN_NAME, pattern));
        }
        if let Some(pattern) = self.exclusion_pattern() {
            parts.push(format!("{}={}", EXCLUSION_PATTERN_NAME, pattern));
        }
        parts.push(format!("{}={}", PARM_SIZE_LIMIT_NAME, self.parm_size_limit));
        f.write_str(&parts.join(";"))
    }
}

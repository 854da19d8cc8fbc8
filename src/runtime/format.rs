//! Argument stringification
//!
//! Hosts convert each argument into an [`ArgValue`] according to the
//! parameter's declared type and hand it to [`format_param`]. Reference
//! arguments arrive as [`ArgValue::Text`], produced by the host's own
//! stringification hook, which is never instrumented.

use std::fmt;

/// Host-provided value of one argument
#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    Bool(bool),
    Char(char),
    Byte(i8),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Null,
    /// Generic text of a reference (object, string, nested array)
    Text(String),
    /// Array contents; primitive elements keep their own variant, object
    /// and nested-array elements arrive as `Text` or `Null`
    Array(Vec<ArgValue>),
}

impl fmt::Display for ArgValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgValue::Bool(v) => write!(f, "{}", v),
            ArgValue::Char(v) => write!(f, "{}", v),
            ArgValue::Byte(v) => write!(f, "{}", v),
            ArgValue::Short(v) => write!(f, "{}", v),
            ArgValue::Int(v) => write!(f, "{}", v),
            ArgValue::Long(v) => write!(f, "{}", v),
            ArgValue::Float(v) => write_float(f, *v),
            ArgValue::Double(v) => write_float(f, *v),
            ArgValue::Null => f.write_str("null"),
            ArgValue::Text(text) => f.write_str(text),
            ArgValue::Array(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str("]")
            }
        }
    }
}

// Integral floats keep a trailing `.0`; infinities are spelled out.
fn write_float<T>(f: &mut fmt::Formatter<'_>, v: T) -> fmt::Result
where
    T: fmt::Display + Into<f64> + Copy,
{
    let wide: f64 = v.into();
    if wide.is_nan() {
        f.write_str("NaN")
    } else if wide.is_infinite() {
        f.write_str(if wide > 0.0 { "Infinity" } else { "-Infinity" })
    } else if wide.fract() == 0.0 {
        write!(f, "{:.1}", v)
    } else {
        write!(f, "{}", v)
    }
}

/// Cut `text` to at most `limit` characters; 0 means unlimited
pub fn truncate(text: &str, limit: usize) -> &str {
    if limit == 0 {
        return text;
    }
    match text.char_indices().nth(limit) {
        Some((byte_offset, _)) => &text[..byte_offset],
        None => text,
    }
}

/// Render one `name: value` parameter entry
pub fn format_param(name: &str, value: &ArgValue, limit: usize) -> String {
    let text = value.to_string();
    format!("{}: {}", name, truncate(&text, limit))
}

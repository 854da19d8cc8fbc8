//! Method descriptor parsing
//!
//! Descriptors use the compact field-type grammar of compiled units:
//! `(` parameter types `)` return type, where a field type is one of
//! `Z C B S I J F D`, `L<internal/name>;` or `[` followed by a field type.
//! The return type may also be `V`.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::unit::ValueKind;

/// Errors raised while parsing a descriptor
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DescriptorError {
    #[error("descriptor `{0}` does not start with `(`")]
    MissingOpenParen(String),

    #[error("descriptor `{0}` has no closing `)`")]
    MissingCloseParen(String),

    #[error("unexpected `{found}` at offset {offset} in descriptor `{descriptor}`")]
    UnexpectedChar {
        descriptor: String,
        offset: usize,
        found: char,
    },

    #[error("descriptor `{0}` ends inside a type")]
    Truncated(String),

    #[error("array type at offset {offset} has more than 255 dimensions")]
    TooManyDimensions { offset: usize },
}

/// Deepest array type a descriptor may name
pub const MAX_ARRAY_DIMENSIONS: usize = 255;

/// Static type of a parameter or return value
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeTag {
    Bool,
    Char,
    Byte,
    Short,
    Int,
    Long,
    Float,
    Double,
    /// Reference to an instance of the named unit (internal form)
    Object(String),
    /// Array of the element type
    Array(Box<TypeTag>),
}

impl TypeTag {
    /// Number of local slots a value of this type occupies
    pub fn width(&self) -> u16 {
        self.kind().width()
    }

    /// Computational kind used by load/store instructions
    pub fn kind(&self) -> ValueKind {
        match self {
            TypeTag::Bool | TypeTag::Char | TypeTag::Byte | TypeTag::Short | TypeTag::Int => {
                ValueKind::Int
            }
            TypeTag::Long => ValueKind::Long,
            TypeTag::Float => ValueKind::Float,
            TypeTag::Double => ValueKind::Double,
            TypeTag::Object(_) | TypeTag::Array(_) => ValueKind::Ref,
        }
    }

    pub fn is_primitive(&self) -> bool {
        !matches!(self, TypeTag::Object(_) | TypeTag::Array(_))
    }

    pub fn is_wide(&self) -> bool {
        matches!(self, TypeTag::Long | TypeTag::Double)
    }

    /// Convenience constructor for `L<name>;`
    pub fn object(name: impl Into<String>) -> Self {
        TypeTag::Object(name.into())
    }

    /// Convenience constructor for `[<element>`
    pub fn array_of(element: TypeTag) -> Self {
        TypeTag::Array(Box::new(element))
    }

    /// Parse a single field type, e.g. `[I` or `Ljava/lang/String;`
    pub fn parse(text: &str) -> Result<Self, DescriptorError> {
        let mut cursor = Cursor::new(text);
        let tag = cursor.field_type()?;
        match cursor.peek() {
            None => Ok(tag),
            Some(found) => Err(cursor.unexpected(found)),
        }
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeTag::Bool => f.write_str("Z"),
            TypeTag::Char => f.write_str("C"),
            TypeTag::Byte => f.write_str("B"),
            TypeTag::Short => f.write_str("S"),
            TypeTag::Int => f.write_str("I"),
            TypeTag::Long => f.write_str("J"),
            TypeTag::Float => f.write_str("F"),
            TypeTag::Double => f.write_str("D"),
            TypeTag::Object(name) => write!(f, "L{};", name),
            TypeTag::Array(element) => write!(f, "[{}", element),
        }
    }
}

/// Parsed method descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDescriptor {
    pub params: Vec<TypeTag>,
    /// `None` for `V`
    pub ret: Option<TypeTag>,
}

impl MethodDescriptor {
    pub fn parse(descriptor: &str) -> Result<Self, DescriptorError> {
        let mut cursor = Cursor::new(descriptor);
        if cursor.bump() != Some('(') {
            return Err(DescriptorError::MissingOpenParen(descriptor.to_string()));
        }

        let mut params = Vec::new();
        loop {
            match cursor.peek() {
                Some(')') => {
                    cursor.bump();
                    break;
                }
                Some(_) => params.push(cursor.field_type()?),
                None => return Err(DescriptorError::MissingCloseParen(descriptor.to_string())),
            }
        }

        let ret = match cursor.peek() {
            Some('V') => {
                cursor.bump();
                None
            }
            Some(_) => Some(cursor.field_type()?),
            None => return Err(DescriptorError::Truncated(descriptor.to_string())),
        };

        if let Some(found) = cursor.peek() {
            return Err(cursor.unexpected(found));
        }

        Ok(Self { params, ret })
    }

    /// Total slots taken by the parameters (receiver excluded)
    pub fn param_slots(&self) -> u32 {
        self.params.iter().map(|p| u32::from(p.width())).sum()
    }
}

impl fmt::Display for MethodDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for param in &self.params {
            write!(f, "{}", param)?;
        }
        f.write_str(")")?;
        match &self.ret {
            Some(ret) => write!(f, "{}", ret),
            None => f.write_str("V"),
        }
    }
}

struct Cursor<'a> {
    text: &'a str,
    offset: usize,
}

impl<'a> Cursor<'a> {
    fn new(text: &'a str) -> Self {
        Self { text, offset: 0 }
    }

    fn peek(&self) -> Option<char> {
        self.text[self.offset..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.offset += c.len_utf8();
        Some(c)
    }

    fn unexpected(&self, found: char) -> DescriptorError {
        DescriptorError::UnexpectedChar {
            descriptor: self.text.to_string(),
            offset: self.offset,
            found,
        }
    }

    fn field_type(&mut self) -> Result<TypeTag, DescriptorError> {
        let start = self.offset;
        let mut dimensions = 0;
        while self.peek() == Some('[') {
            if dimensions == MAX_ARRAY_DIMENSIONS {
                return Err(DescriptorError::TooManyDimensions { offset: start });
            }
            self.bump();
            dimensions += 1;
        }

        let mut tag = self.element_type()?;
        for _ in 0..dimensions {
            tag = TypeTag::Array(Box::new(tag));
        }
        Ok(tag)
    }

    fn element_type(&mut self) -> Result<TypeTag, DescriptorError> {
        let start = self.offset;
        let c = self
            .bump()
            .ok_or_else(|| DescriptorError::Truncated(self.text.to_string()))?;
        let tag = match c {
            'Z' => TypeTag::Bool,
            'C' => TypeTag::Char,
            'B' => TypeTag::Byte,
            'S' => TypeTag::Short,
            'I' => TypeTag::Int,
            'J' => TypeTag::Long,
            'F' => TypeTag::Float,
            'D' => TypeTag::Double,
            'L' => {
                let rest = &self.text[self.offset..];
                let end = rest
                    .find(';')
                    .ok_or_else(|| DescriptorError::Truncated(self.text.to_string()))?;
                if end == 0 {
                    return Err(self.unexpected(';'));
                }
                let name = rest[..end].to_string();
                self.offset += end + 1;
                TypeTag::Object(name)
            }
            other => {
                self.offset = start;
                return Err(self.unexpected(other));
            }
        };
        Ok(tag)
    }
}

//! Unit container codecs
//!
//! The engine works on raw bytes; a [`UnitCodec`] turns them into a [`Unit`]
//! and back. MessagePack is the compact container used by load hooks, JSON is
//! handy for hand-written fixtures and inspection.

use crate::unit::Unit;
use clap::ValueEnum;
use thiserror::Error;

/// Errors raised while decoding or encoding a unit
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("failed to decode MessagePack unit: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    #[error("failed to encode MessagePack unit: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    #[error("failed to decode JSON unit: {0}")]
    JsonDecode(#[source] serde_json::Error),

    #[error("failed to encode JSON unit: {0}")]
    JsonEncode(#[source] serde_json::Error),
}

/// Decodes and encodes the compiled-unit container format
pub trait UnitCodec: Send + Sync {
    fn decode(&self, bytes: &[u8]) -> Result<Unit, CodecError>;
    fn encode(&self, unit: &Unit) -> Result<Vec<u8>, CodecError>;
}

/// MessagePack container (named fields)
#[derive(Debug, Clone, Copy, Default)]
pub struct MsgPackCodec;

impl UnitCodec for MsgPackCodec {
    fn decode(&self, bytes: &[u8]) -> Result<Unit, CodecError> {
        Ok(rmp_serde::from_slice(bytes)?)
    }

    fn encode(&self, unit: &Unit) -> Result<Vec<u8>, CodecError> {
        Ok(rmp_serde::to_vec_named(unit)?)
    }
}

/// JSON container
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec {
    pub pretty: bool,
}

impl UnitCodec for JsonCodec {
    fn decode(&self, bytes: &[u8]) -> Result<Unit, CodecError> {
        serde_json::from_slice(bytes).map_err(CodecError::JsonDecode)
    }

    fn encode(&self, unit: &Unit) -> Result<Vec<u8>, CodecError> {
        let encoded = if self.pretty {
            serde_json::to_vec_pretty(unit)
        } else {
            serde_json::to_vec(unit)
        };
        encoded.map_err(CodecError::JsonEncode)
    }
}

/// Container format selectable from the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum UnitFormat {
    /// MessagePack (default)
    #[default]
    Msgpack,
    /// JSON
    Json,
}

impl UnitFormat {
    pub fn codec(self) -> Box<dyn UnitCodec> {
        match self {
            UnitFormat::Msgpack => Box::new(MsgPackCodec),
            UnitFormat::Json => Box::new(JsonCodec { pretty: true }),
        }
    }
}
